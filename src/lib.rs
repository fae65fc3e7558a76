use std::error::Error;

pub const DEFAULT_SERVER_ADDR: &str = "http://34.58.76.140:8000";

pub mod config;
pub mod cutout_job;
pub mod errors;
pub mod image_data;
pub mod job_status;
pub mod search_result;

pub use config::WorkerConfig;
pub use cutout_job::{CutoutRequest, CutoutWorkerClient, DEFAULT_WORKER_ADDR};
pub use job_status::{CutoutOutput, JobStatus, JobStatusMsg};
pub use search_result::{PinMatch, SearchResult};

/// Client for the synchronous pin-search API. One multipart upload, one JSON
/// response; no credentials required.
#[derive(Debug)]
pub struct PinSearchAPIClient {
    server_addr: url::Url,
    http_client: reqwest::blocking::Client,
}

impl PinSearchAPIClient {
    pub fn new() -> Result<PinSearchAPIClient, Box<dyn Error>> {
        PinSearchAPIClient::new_for_server(DEFAULT_SERVER_ADDR)
    }

    pub fn new_for_server(server_addr: &str) -> Result<PinSearchAPIClient, Box<dyn Error>> {
        let server_addr_parsed = url::Url::parse(server_addr)?;
        Ok(PinSearchAPIClient {
            server_addr: server_addr_parsed,
            http_client: reqwest::blocking::Client::new(),
        })
    }

    /// Uploads one image file and returns the match result. Validation
    /// failures (422) and any other non-200 status surface as `APIError`
    /// carrying the response body.
    pub fn search_image(
        &self,
        file_name: &str,
        image: Vec<u8>,
    ) -> Result<SearchResult, Box<dyn Error>> {
        use reqwest::blocking::multipart::{Form, Part};
        use reqwest::header::ACCEPT;

        let endpoint_url = self.server_addr.join("/search")?;
        let part = Part::bytes(image)
            .file_name(file_name.to_string())
            .mime_str(image_data::mime_for_file_name(file_name))?;
        let form = Form::new().part("file", part);

        log::info!("uploading {} to {}", file_name, endpoint_url);
        let resp = self
            .http_client
            .post(endpoint_url.clone())
            .header(ACCEPT, "application/json")
            .multipart(form)
            .send()?;

        let resp_status = resp.status().as_u16();
        let resp_body_bytes = resp.bytes()?;
        if resp_status != 200 {
            return Err(Box::new(errors::APIError::from_response_parts(
                endpoint_url.into(),
                resp_status,
                &resp_body_bytes,
            )));
        }
        let result: SearchResult = serde_json::from_slice(&resp_body_bytes)?;
        Ok(result)
    }

    /// Detail page for a pin, shown for similar pins that carry no direct
    /// image link.
    pub fn pin_page_url(&self, pin_id: &str) -> Result<url::Url, Box<dyn Error>> {
        Ok(self.server_addr.join(&format!("/pin/{}", pin_id))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_pin_page_url_from_server_addr() {
        let client = PinSearchAPIClient::new_for_server("http://search.example:8000").unwrap();
        let url = client.pin_page_url("8812").unwrap();
        assert_eq!(url.as_str(), "http://search.example:8000/pin/8812");
    }

    #[test]
    fn rejects_unparsable_server_addr() {
        assert!(PinSearchAPIClient::new_for_server("not a url").is_err());
    }
}

#[cfg(test)]
/// Ignored by default since they require the live search service.
mod live_search_tests {
    use super::*;

    #[test]
    #[ignore] // Requires the deployed search API to be reachable.
    fn test_search_image() {
        let client = PinSearchAPIClient::new().unwrap();
        let image = std::fs::read("demo-pin.jpg").expect("demo image next to the manifest");
        let result = client.search_image("demo-pin.jpg", image).unwrap();
        println!(
            "match: {}, count: {}, confidence: {:?}",
            result.match_found, result.count, result.confidence
        );
    }
}
