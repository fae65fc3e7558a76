use std::env;

use crate::errors::MissingEnvError;

pub const ENDPOINT_ID_VAR: &str = "CUTOUT_ENDPOINT_ID";
pub const API_KEY_VAR: &str = "CUTOUT_API_KEY";

/// Credentials for the cutout worker queue. Both values are required; the
/// worker has no anonymous access.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub endpoint_id: String,
    pub api_key: String,
}

impl WorkerConfig {
    /// Reads the configuration from the process environment. A missing or
    /// empty variable is fatal for the caller; there is no fallback.
    pub fn from_env() -> Result<WorkerConfig, MissingEnvError> {
        Ok(WorkerConfig {
            endpoint_id: require_env(ENDPOINT_ID_VAR)?,
            api_key: require_env(API_KEY_VAR)?,
        })
    }
}

fn require_env(variable: &str) -> Result<String, MissingEnvError> {
    match env::var(variable) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(MissingEnvError {
            variable: variable.to_string(),
        }),
    }
}
