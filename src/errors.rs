use std::error::Error;

#[derive(Debug)]
pub struct APIError {
    pub endpoint_url: String,
    pub status: u16,
    pub error_message: String,
}

impl APIError {
    /// Builds an error from a non-success response. The services report
    /// failures as JSON with an `error` field (cutout worker) or a `detail`
    /// field (search validation); any other body is carried verbatim.
    pub fn from_response_parts(endpoint_url: String, status: u16, body: &[u8]) -> APIError {
        APIError {
            endpoint_url,
            status,
            error_message: extract_error_message(body),
        }
    }
}

fn extract_error_message(body: &[u8]) -> String {
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<serde_json::Value>,
        detail: Option<serde_json::Value>,
    }

    if let Ok(parsed) = serde_json::from_slice::<ErrorBody>(body) {
        if let Some(field) = parsed.error.or(parsed.detail) {
            return match field {
                serde_json::Value::String(msg) => msg,
                other => other.to_string(),
            };
        }
    }
    String::from_utf8_lossy(body).to_string()
}

impl Error for APIError {}

impl std::fmt::Display for APIError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "API endpoint {} responded with status {}: {}",
            self.endpoint_url, self.status, self.error_message
        )
    }
}

#[derive(Debug)]
pub struct JobFailedError {
    pub job_id: String,
    pub error_message: String,
}

impl Error for JobFailedError {}

impl std::fmt::Display for JobFailedError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "cutout worker failed to execute job {}, error msg is: {}",
            self.job_id, self.error_message
        )
    }
}

#[derive(Debug)]
pub struct JobTimeoutError {
    pub job_id: String,
    pub attempts: u32,
}

impl Error for JobTimeoutError {}

impl std::fmt::Display for JobTimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "timed out waiting for job {} after {} polls; the remote job may still be running",
            self.job_id, self.attempts
        )
    }
}

#[derive(Debug)]
pub struct JobOutputError {
    pub job_id: String,
    pub error_message: String,
}

impl Error for JobOutputError {}

impl std::fmt::Display for JobOutputError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "job {} completed but the worker reported an error: {}",
            self.job_id, self.error_message
        )
    }
}

#[derive(Debug)]
pub struct ImageDecodeError {
    pub message: String,
}

impl Error for ImageDecodeError {}

impl std::fmt::Display for ImageDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "could not decode image data: {}", self.message)
    }
}

#[derive(Debug)]
pub struct MissingEnvError {
    pub variable: String,
}

impl Error for MissingEnvError {}

impl std::fmt::Display for MissingEnvError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "required environment variable {} is not set",
            self.variable
        )
    }
}
