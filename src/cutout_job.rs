//! Client for the queue-based cutout worker: submit an image, poll the job
//! on a fixed schedule, classify the terminal result.

use std::error::Error;
use std::thread;
use std::time::Duration;

use crate::config::WorkerConfig;
use crate::errors;
use crate::image_data;
use crate::job_status::{CutoutOutput, JobStatus, JobStatusMsg};

pub const DEFAULT_WORKER_ADDR: &str = "https://api.runpod.ai/v2/";

/// Default polling budget: 60 polls two seconds apart, i.e. two minutes of
/// wall clock before a run is declared timed out.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 60;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub const DEFAULT_MODEL: &str = "birefnet";

/// One unit of work for the cutout worker. Immutable once submitted; the
/// image is base64-encoded at the transport boundary.
#[derive(Debug, Clone)]
pub struct CutoutRequest {
    pub image: Vec<u8>,
    pub model: String,
    pub enhance: bool,
}

impl CutoutRequest {
    pub fn new(image: Vec<u8>) -> CutoutRequest {
        CutoutRequest {
            image,
            model: DEFAULT_MODEL.to_string(),
            enhance: false,
        }
    }
}

#[derive(Debug)]
pub struct CutoutWorkerClient {
    endpoint_url: url::Url,
    api_key: String,
    http_client: reqwest::blocking::Client,
}

impl CutoutWorkerClient {
    pub fn new(config: WorkerConfig) -> Result<CutoutWorkerClient, Box<dyn Error>> {
        CutoutWorkerClient::new_for_server(config, DEFAULT_WORKER_ADDR)
    }

    pub fn new_for_server(
        config: WorkerConfig,
        server_addr: &str,
    ) -> Result<CutoutWorkerClient, Box<dyn Error>> {
        // Url::join treats the last path segment as a file name unless the
        // path ends with a slash.
        let mut server_addr_parsed = url::Url::parse(server_addr)?;
        if !server_addr_parsed.path().ends_with('/') {
            let with_slash = format!("{}/", server_addr_parsed.path());
            server_addr_parsed.set_path(&with_slash);
        }
        let endpoint_url =
            server_addr_parsed.join(&format!("{}/", config.endpoint_id.trim_matches('/')))?;
        Ok(CutoutWorkerClient {
            endpoint_url,
            api_key: config.api_key,
            http_client: reqwest::blocking::Client::new(),
        })
    }

    /// Submits one image to the worker queue and returns the job id.
    pub fn submit_cutout_request(&self, request: &CutoutRequest) -> Result<String, Box<dyn Error>> {
        use serde::Deserialize;

        #[derive(Deserialize)]
        struct RunResponse {
            id: Option<String>,
        }

        let endpoint_url = self.endpoint_url.join("run")?;
        let body = serde_json::json!({
            "input": {
                "image": image_data::encode_image(&request.image),
                "model": request.model,
                "enhance": request.enhance,
            }
        });

        log::info!("submitting cutout job to {}", endpoint_url);
        let resp = self
            .http_client
            .post(endpoint_url.clone())
            .bearer_auth(&self.api_key)
            .json(&body)
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
        let resp_data: RunResponse = serde_json::from_slice(&resp_body_bytes)?;
        resp_data.id.ok_or(Box::new(errors::APIError {
            endpoint_url: endpoint_url.into(),
            status: resp_status,
            error_message: String::from("missing id in server response"),
        }))
    }

    /// One status check for a submitted job.
    pub fn poll_job(&self, job_id: &str) -> Result<JobStatusMsg, Box<dyn Error>> {
        let endpoint_url = self.endpoint_url.join(&format!("status/{}", job_id))?;
        let resp = self
            .http_client
            .get(endpoint_url.clone())
            .bearer_auth(&self.api_key)
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
        let status_msg: JobStatusMsg = serde_json::from_slice(&resp_body_bytes)?;
        Ok(status_msg)
    }

    /// Polls `job_id` on a fixed schedule until a terminal status is observed
    /// or the attempt budget runs out. Each iteration sleeps `interval`, polls
    /// once, then hands the snapshot to `cb` together with the attempt
    /// counter. The callback is an observer only, except that returning
    /// `Ok(true)` abandons the wait early; the remote job keeps running.
    ///
    /// Returns the terminal status message, or `None` when the wait was
    /// abandoned or the budget ran out first.
    pub fn watch_job<F>(
        &self,
        job_id: &str,
        max_attempts: u32,
        interval: Duration,
        cb: F,
    ) -> Result<Option<JobStatusMsg>, Box<dyn Error>>
    where
        F: FnMut(u32, u32, &JobStatusMsg) -> Result<bool, Box<dyn Error>>,
    {
        run_poll_schedule(max_attempts, interval, || self.poll_job(job_id), cb)
    }

    /// Like `watch_job`, but an exhausted budget is a `JobTimeoutError` and
    /// the terminal snapshot is returned directly.
    pub fn wait_for_job(
        &self,
        job_id: &str,
        max_attempts: u32,
        interval: Duration,
    ) -> Result<JobStatusMsg, Box<dyn Error>> {
        let outcome = self.watch_job(job_id, max_attempts, interval, |attempt, total, msg| {
            log::info!("job {}: poll {}/{} returned {}", job_id, attempt, total, msg.status);
            Ok(false)
        })?;
        match outcome {
            Some(status_msg) => Ok(status_msg),
            None => Err(Box::new(errors::JobTimeoutError {
                job_id: job_id.to_string(),
                attempts: max_attempts,
            })),
        }
    }

    /// Waits for the job and classifies the terminal result, with `cb`
    /// observing every poll.
    pub fn watch_job_output<F>(
        &self,
        job_id: &str,
        max_attempts: u32,
        interval: Duration,
        cb: F,
    ) -> Result<CutoutOutput, Box<dyn Error>>
    where
        F: FnMut(u32, u32, &JobStatusMsg) -> Result<bool, Box<dyn Error>>,
    {
        match self.watch_job(job_id, max_attempts, interval, cb)? {
            Some(status_msg) => classify_terminal(job_id, status_msg),
            None => Err(Box::new(errors::JobTimeoutError {
                job_id: job_id.to_string(),
                attempts: max_attempts,
            })),
        }
    }

    pub fn wait_for_job_output(
        &self,
        job_id: &str,
        max_attempts: u32,
        interval: Duration,
    ) -> Result<CutoutOutput, Box<dyn Error>> {
        let status_msg = self.wait_for_job(job_id, max_attempts, interval)?;
        classify_terminal(job_id, status_msg)
    }

    /// Submit plus wait with the default budget.
    pub fn remove_background(&self, request: &CutoutRequest) -> Result<CutoutOutput, Box<dyn Error>> {
        let job_id = self.submit_cutout_request(request)?;
        self.wait_for_job_output(&job_id, DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL)
    }
}

fn run_poll_schedule<P, F>(
    max_attempts: u32,
    interval: Duration,
    mut poll: P,
    mut cb: F,
) -> Result<Option<JobStatusMsg>, Box<dyn Error>>
where
    P: FnMut() -> Result<JobStatusMsg, Box<dyn Error>>,
    F: FnMut(u32, u32, &JobStatusMsg) -> Result<bool, Box<dyn Error>>,
{
    for attempt in 1..=max_attempts {
        thread::sleep(interval);
        let status_msg = poll()?;
        let is_final = status_msg.status.is_terminal();
        let should_stop = cb(attempt, max_attempts, &status_msg)?;
        if is_final {
            return Ok(Some(status_msg));
        }
        if should_stop {
            return Ok(None);
        }
    }
    Ok(None)
}

/// Splits a terminal snapshot into the success artifact and the two failure
/// channels: a transport-level FAILED status, and an error the worker embeds
/// inside an otherwise COMPLETED output.
fn classify_terminal(job_id: &str, status_msg: JobStatusMsg) -> Result<CutoutOutput, Box<dyn Error>> {
    match status_msg.status {
        JobStatus::Completed => {
            let output = match status_msg.output {
                Some(output) => output,
                None => {
                    return Err(Box::new(errors::JobFailedError {
                        job_id: job_id.to_string(),
                        error_message: String::from("completed job lacks an 'output' field"),
                    }))
                }
            };
            if let Some(message) = &output.error {
                return Err(Box::new(errors::JobOutputError {
                    job_id: job_id.to_string(),
                    error_message: message.clone(),
                }));
            }
            Ok(output)
        }
        JobStatus::Failed => {
            let error_message = status_msg
                .error
                .or_else(|| status_msg.output.and_then(|output| output.error))
                .unwrap_or_default();
            Err(Box::new(errors::JobFailedError {
                job_id: job_id.to_string(),
                error_message,
            }))
        }
        other => Err(Box::new(errors::JobFailedError {
            job_id: job_id.to_string(),
            error_message: format!("unexpected terminal status {}", other),
        })),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::errors::{JobFailedError, JobOutputError, JobTimeoutError};

    fn snapshot(status: &str) -> JobStatusMsg {
        JobStatusMsg {
            status: JobStatus::parse(status),
            output: None,
            error: None,
        }
    }

    fn scripted<'a>(
        script: &'a [&'a str],
        polls: &'a Cell<u32>,
    ) -> impl FnMut() -> Result<JobStatusMsg, Box<dyn Error>> + 'a {
        move || {
            let i = polls.get();
            polls.set(i + 1);
            Ok(snapshot(script[i as usize]))
        }
    }

    #[test]
    fn stops_after_exactly_k_polls_on_completion() {
        let polls = Cell::new(0);
        let script = ["IN_QUEUE", "IN_PROGRESS", "COMPLETED", "COMPLETED"];
        let outcome = run_poll_schedule(
            10,
            Duration::ZERO,
            scripted(&script, &polls),
            |_, _, _| Ok(false),
        )
        .unwrap();

        assert_eq!(polls.get(), 3);
        assert_eq!(outcome.unwrap().status, JobStatus::Completed);
    }

    #[test]
    fn stops_immediately_on_failed() {
        let polls = Cell::new(0);
        let script = ["FAILED", "IN_PROGRESS"];
        let outcome = run_poll_schedule(
            5,
            Duration::ZERO,
            scripted(&script, &polls),
            |_, _, _| Ok(false),
        )
        .unwrap();

        assert_eq!(polls.get(), 1);
        assert_eq!(outcome.unwrap().status, JobStatus::Failed);
    }

    #[test]
    fn exhausted_budget_returns_none_after_n_polls() {
        let polls = Cell::new(0);
        let callbacks = Cell::new(0);
        let outcome = run_poll_schedule(
            5,
            Duration::ZERO,
            || {
                polls.set(polls.get() + 1);
                Ok(snapshot("IN_PROGRESS"))
            },
            |attempt, total, _| {
                callbacks.set(callbacks.get() + 1);
                assert_eq!(total, 5);
                assert_eq!(attempt, callbacks.get());
                Ok(false)
            },
        )
        .unwrap();

        assert!(outcome.is_none());
        assert_eq!(polls.get(), 5);
        assert_eq!(callbacks.get(), 5);
    }

    #[test]
    fn unrecognized_status_keeps_polling() {
        let polls = Cell::new(0);
        let script = ["WARMING_UP", "SOMETHING_NEW", "COMPLETED"];
        let outcome = run_poll_schedule(
            10,
            Duration::ZERO,
            scripted(&script, &polls),
            |_, _, _| Ok(false),
        )
        .unwrap();

        assert_eq!(polls.get(), 3);
        assert!(outcome.is_some());
    }

    #[test]
    fn callback_stop_abandons_the_wait() {
        let polls = Cell::new(0);
        let outcome = run_poll_schedule(
            10,
            Duration::ZERO,
            || {
                polls.set(polls.get() + 1);
                Ok(snapshot("IN_PROGRESS"))
            },
            |attempt, _, _| Ok(attempt == 2),
        )
        .unwrap();

        assert!(outcome.is_none());
        assert_eq!(polls.get(), 2);
    }

    #[test]
    fn terminal_status_wins_over_callback_stop() {
        let polls = Cell::new(0);
        let script = ["COMPLETED"];
        let outcome = run_poll_schedule(
            10,
            Duration::ZERO,
            scripted(&script, &polls),
            |_, _, _| Ok(true),
        )
        .unwrap();

        assert_eq!(outcome.unwrap().status, JobStatus::Completed);
    }

    #[test]
    fn poll_error_propagates_and_stops_the_loop() {
        let polls = Cell::new(0);
        let result = run_poll_schedule(
            10,
            Duration::ZERO,
            || {
                polls.set(polls.get() + 1);
                if polls.get() == 2 {
                    Err(Box::new(JobFailedError {
                        job_id: "abc".to_string(),
                        error_message: "connection reset".to_string(),
                    }) as Box<dyn Error>)
                } else {
                    Ok(snapshot("IN_PROGRESS"))
                }
            },
            |_, _, _| Ok(false),
        );

        assert!(result.is_err());
        assert_eq!(polls.get(), 2);
    }

    #[test]
    fn scenario_completes_on_third_poll_with_output() {
        let polls = Cell::new(0);
        let outcome = run_poll_schedule(
            10,
            Duration::ZERO,
            || {
                polls.set(polls.get() + 1);
                if polls.get() < 3 {
                    Ok(snapshot("IN_PROGRESS"))
                } else {
                    Ok(serde_json::from_str(
                        r#"{
                            "status": "COMPLETED",
                            "output": {"image": "aGVsbG8=", "model_used": "birefnet"}
                        }"#,
                    )
                    .unwrap())
                }
            },
            |_, _, _| Ok(false),
        )
        .unwrap();

        assert_eq!(polls.get(), 3);
        let output = classify_terminal("abc", outcome.unwrap()).unwrap();
        assert_eq!(output.image.as_deref(), Some("aGVsbG8="));
        assert_eq!(output.model_used.as_deref(), Some("birefnet"));
    }

    #[test]
    fn classifies_failed_status_with_diagnostic() {
        let status_msg: JobStatusMsg =
            serde_json::from_str(r#"{"status": "FAILED", "error": "CUDA out of memory"}"#).unwrap();
        let err = classify_terminal("abc", status_msg).unwrap_err();
        let failed = err.downcast_ref::<JobFailedError>().expect("JobFailedError");
        assert_eq!(failed.error_message, "CUDA out of memory");
    }

    #[test]
    fn classifies_embedded_output_error_as_payload_failure() {
        let status_msg: JobStatusMsg = serde_json::from_str(
            r#"{"status": "COMPLETED", "output": {"error": "no pin detected"}}"#,
        )
        .unwrap();
        let err = classify_terminal("abc", status_msg).unwrap_err();
        let payload = err.downcast_ref::<JobOutputError>().expect("JobOutputError");
        assert_eq!(payload.error_message, "no pin detected");
    }

    #[test]
    fn completed_without_output_is_a_failure() {
        let err = classify_terminal("abc", snapshot("COMPLETED")).unwrap_err();
        assert!(err.downcast_ref::<JobFailedError>().is_some());
    }

    #[test]
    fn timeout_error_is_distinct_from_remote_failure() {
        let timeout: Box<dyn Error> = Box::new(JobTimeoutError {
            job_id: "abc".to_string(),
            attempts: 3,
        });
        assert!(timeout.downcast_ref::<JobTimeoutError>().is_some());
        assert!(timeout.downcast_ref::<JobFailedError>().is_none());
    }
}
