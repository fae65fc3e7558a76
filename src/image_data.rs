use base64::Engine as _;

use crate::errors::ImageDecodeError;

/// Encodes raw image bytes for the worker's JSON transport.
pub fn encode_image(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decodes an image field that is either raw base64 or a
/// `data:image/...;base64,` URL. A data URL keeps everything after the first
/// comma.
pub fn decode_image_field(data: &str) -> Result<Vec<u8>, ImageDecodeError> {
    let base64_data = if let Some(comma) = data.find(',') {
        &data[(comma + 1)..]
    } else {
        data
    };
    base64::engine::general_purpose::STANDARD
        .decode(base64_data.trim())
        .map_err(|e| ImageDecodeError {
            message: format!("base64 decode failed: {}", e),
        })
}

/// Validates that `bytes` is a decodable image and re-encodes it as PNG for
/// saving to disk.
pub fn to_png(bytes: &[u8]) -> Result<Vec<u8>, ImageDecodeError> {
    let img = image::load_from_memory(bytes).map_err(|e| ImageDecodeError {
        message: format!("image decode failed: {}", e),
    })?;
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .map_err(|e| ImageDecodeError {
            message: format!("png encode failed: {}", e),
        })?;
    Ok(out.into_inner())
}

pub fn mime_for_file_name(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit('.')
        .next()
        .map(|ext| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}
