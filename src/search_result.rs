use serde::{Deserialize, Serialize};

/// Response of the synchronous `/search` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(rename = "match", default)]
    pub match_found: bool,
    #[serde(default)]
    pub count: u32,
    pub confidence: Option<String>,
    pub threshold: Option<f64>,
    pub time_taken_sec: Option<f64>,
    #[serde(default)]
    pub matches: Vec<PinMatch>,
    #[serde(default)]
    pub debug: Vec<PinMatch>,
    pub cutout_image: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinMatch {
    pub pin_id: Option<serde_json::Value>,
    pub similarity: Option<f64>,
    pub distance: Option<f64>,
    pub name: Option<String>,
    pub origin: Option<String>,
    pub image_link: Option<String>,
}

impl PinMatch {
    /// `pin_id` arrives as a number or a string depending on the service
    /// version.
    pub fn pin_id_display(&self) -> String {
        match &self.pin_id {
            Some(serde_json::Value::String(id)) => id.clone(),
            Some(other) => other.to_string(),
            None => String::from("?"),
        }
    }
}
