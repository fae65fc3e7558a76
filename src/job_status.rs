use serde::Deserialize;

/// Lifecycle state of a remote cutout job.
///
/// The worker's vocabulary is not fully specified, so anything outside the
/// known strings lands in `Other` and is treated as still running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    InQueue,
    InProgress,
    Completed,
    Failed,
    Other(String),
}

impl JobStatus {
    pub fn parse(raw: &str) -> JobStatus {
        match raw {
            "IN_QUEUE" | "QUEUED" => JobStatus::InQueue,
            "IN_PROGRESS" => JobStatus::InProgress,
            "COMPLETED" => JobStatus::Completed,
            "FAILED" => JobStatus::Failed,
            other => JobStatus::Other(other.to_string()),
        }
    }

    /// Terminal states stop the poll loop; everything else keeps polling.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl<'de> Deserialize<'de> for JobStatus {
    fn deserialize<D>(deserializer: D) -> Result<JobStatus, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(JobStatus::parse(&raw))
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            JobStatus::InQueue => write!(f, "IN_QUEUE"),
            JobStatus::InProgress => write!(f, "IN_PROGRESS"),
            JobStatus::Completed => write!(f, "COMPLETED"),
            JobStatus::Failed => write!(f, "FAILED"),
            JobStatus::Other(raw) => write!(f, "{}", raw),
        }
    }
}

/// One status snapshot as returned by `GET status/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct JobStatusMsg {
    pub status: JobStatus,
    pub output: Option<CutoutOutput>,
    pub error: Option<String>,
}

/// Payload of a completed job. `error` set here means the worker ran fine but
/// could not produce an artifact (e.g. no pin detected in the image).
#[derive(Debug, Clone, Deserialize)]
pub struct CutoutOutput {
    pub image: Option<String>,
    pub model_used: Option<String>,
    pub embedding_model: Option<String>,
    pub embedding: Option<Vec<f64>>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_status_vocabulary() {
        assert_eq!(JobStatus::parse("IN_QUEUE"), JobStatus::InQueue);
        assert_eq!(JobStatus::parse("QUEUED"), JobStatus::InQueue);
        assert_eq!(JobStatus::parse("IN_PROGRESS"), JobStatus::InProgress);
        assert_eq!(JobStatus::parse("COMPLETED"), JobStatus::Completed);
        assert_eq!(JobStatus::parse("FAILED"), JobStatus::Failed);
    }

    #[test]
    fn unknown_status_is_not_terminal() {
        let status = JobStatus::parse("WARMING_UP");
        assert_eq!(status, JobStatus::Other("WARMING_UP".to_string()));
        assert!(!status.is_terminal());
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::InQueue.is_terminal());
        assert!(!JobStatus::InProgress.is_terminal());
    }

    #[test]
    fn deserializes_in_progress_snapshot() {
        let msg: JobStatusMsg = serde_json::from_str(r#"{"status": "IN_PROGRESS"}"#).unwrap();
        assert_eq!(msg.status, JobStatus::InProgress);
        assert!(msg.output.is_none());
        assert!(msg.error.is_none());
    }

    #[test]
    fn deserializes_completed_snapshot_with_output() {
        let msg: JobStatusMsg = serde_json::from_str(
            r#"{
                "status": "COMPLETED",
                "output": {
                    "image": "aGVsbG8=",
                    "model_used": "birefnet",
                    "embedding_model": "clip-vit",
                    "embedding": [0.25, -0.5, 1.0]
                }
            }"#,
        )
        .unwrap();
        assert_eq!(msg.status, JobStatus::Completed);
        let output = msg.output.unwrap();
        assert_eq!(output.image.as_deref(), Some("aGVsbG8="));
        assert_eq!(output.model_used.as_deref(), Some("birefnet"));
        assert_eq!(output.embedding_model.as_deref(), Some("clip-vit"));
        assert_eq!(output.embedding.unwrap(), vec![0.25, -0.5, 1.0]);
        assert!(output.error.is_none());
    }

    #[test]
    fn deserializes_embedded_output_error() {
        let msg: JobStatusMsg = serde_json::from_str(
            r#"{"status": "COMPLETED", "output": {"error": "no pin detected"}}"#,
        )
        .unwrap();
        assert_eq!(msg.status, JobStatus::Completed);
        assert_eq!(msg.output.unwrap().error.as_deref(), Some("no pin detected"));
    }
}
