use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};

use crate::batch::{BatchService, JobHandle, JobState, JobStatus};
use crate::http::{
    base_url_from_env, non_empty_env, response_bytes_or_error, response_json_or_error,
};

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_UPLOAD_BASE: &str = "https://generativelanguage.googleapis.com/upload/v1beta";
const DEFAULT_DOWNLOAD_BASE: &str = "https://generativelanguage.googleapis.com/download/v1beta";
const JSONL_MIME: &str = "jsonl";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(600);

/// Gemini Batch API over REST: resumable file upload, batch creation,
/// status polling and result download.
pub struct GeminiBatchService {
    api_base: String,
    upload_base: String,
    download_base: String,
    api_key: String,
    http: HttpClient,
}

impl GeminiBatchService {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            upload_base: DEFAULT_UPLOAD_BASE.to_string(),
            download_base: DEFAULT_DOWNLOAD_BASE.to_string(),
            api_key: api_key.into(),
            http: HttpClient::new(),
        }
    }

    /// Reads `GEMINI_API_KEY` (or `GOOGLE_API_KEY`) plus optional base URL
    /// overrides.
    pub fn from_env() -> Result<Self> {
        let Some(api_key) = Self::api_key() else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        Ok(Self {
            api_base: base_url_from_env("GEMINI_API_BASE", DEFAULT_API_BASE),
            upload_base: base_url_from_env("GEMINI_UPLOAD_BASE", DEFAULT_UPLOAD_BASE),
            download_base: base_url_from_env("GEMINI_DOWNLOAD_BASE", DEFAULT_DOWNLOAD_BASE),
            api_key,
            http: HttpClient::new(),
        })
    }

    pub fn api_key() -> Option<String> {
        non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"))
    }

    fn batch_endpoint(&self, model: &str) -> String {
        format!("{}/{}:batchGenerateContent", self.api_base, model_path(model))
    }
}

impl BatchService for GeminiBatchService {
    fn name(&self) -> &str {
        "gemini"
    }

    fn upload_file(&self, path: &Path, display_name: &str) -> Result<String> {
        let bytes =
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;

        let start = self
            .http
            .post(format!("{}/files", self.upload_base))
            .query(&[("key", self.api_key.as_str())])
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", bytes.len().to_string())
            .header("X-Goog-Upload-Header-Content-Type", JSONL_MIME)
            .timeout(REQUEST_TIMEOUT)
            .json(&json!({ "file": { "display_name": display_name } }))
            .send()
            .context("Gemini upload start failed")?;
        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let Some(upload_url) = upload_url else {
            let payload = response_json_or_error("Gemini upload start", start)?;
            bail!("Gemini upload start returned no upload URL: {payload}");
        };

        let response = self
            .http
            .post(&upload_url)
            .header("X-Goog-Upload-Command", "upload, finalize")
            .header("X-Goog-Upload-Offset", "0")
            .header(CONTENT_TYPE, JSONL_MIME)
            .timeout(TRANSFER_TIMEOUT)
            .body(bytes)
            .send()
            .context("Gemini upload failed")?;
        let payload = response_json_or_error("Gemini upload", response)?;
        payload
            .pointer("/file/name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .with_context(|| format!("Gemini upload response missing file name: {payload}"))
    }

    fn create_job(&self, model: &str, source_file: &str, display_name: &str) -> Result<JobHandle> {
        let endpoint = self.batch_endpoint(model);
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", self.api_key.as_str())])
            .timeout(REQUEST_TIMEOUT)
            .json(&json!({
                "batch": {
                    "display_name": display_name,
                    "input_config": { "file_name": source_file },
                }
            }))
            .send()
            .with_context(|| format!("Gemini batch create failed ({endpoint})"))?;
        let payload = response_json_or_error("Gemini batch create", response)?;
        let name = payload
            .get("name")
            .and_then(Value::as_str)
            .with_context(|| format!("Gemini batch create response missing name: {payload}"))?;
        Ok(JobHandle {
            name: name.to_string(),
            display_name: display_name.to_string(),
        })
    }

    fn job_status(&self, job_name: &str) -> Result<JobStatus> {
        let response = self
            .http
            .get(format!("{}/{}", self.api_base, job_name))
            .query(&[("key", self.api_key.as_str())])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .with_context(|| format!("Gemini batch status failed ({job_name})"))?;
        let payload = response_json_or_error("Gemini batch status", response)?;
        Ok(parse_job_status(job_name, &payload))
    }

    fn download_file(&self, file_name: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(format!("{}/{}:download", self.download_base, file_name))
            .query(&[("alt", "media"), ("key", self.api_key.as_str())])
            .timeout(TRANSFER_TIMEOUT)
            .send()
            .with_context(|| format!("Gemini download failed ({file_name})"))?;
        response_bytes_or_error("Gemini download", response)
    }
}

fn model_path(model: &str) -> String {
    let trimmed = model.trim();
    if trimmed.starts_with("models/") {
        trimmed.to_string()
    } else {
        format!("models/{trimmed}")
    }
}

/// Reads a batch operation payload. The state may live on the operation
/// metadata or at the top level, and the results file moves between
/// `metadata.output`, `response` and `dest` depending on API revision.
fn parse_job_status(job_name: &str, payload: &Value) -> JobStatus {
    let raw_state = ["/metadata/state", "/state", "/response/state"]
        .iter()
        .find_map(|pointer| payload.pointer(pointer).and_then(Value::as_str))
        .unwrap_or("BATCH_STATE_PENDING")
        .to_string();
    let done = payload.get("done").and_then(Value::as_bool).unwrap_or(false);
    let mut state = JobState::parse(&raw_state);
    if done && !state.is_terminal() {
        state = if payload.get("error").is_some() {
            JobState::Failed
        } else {
            JobState::Succeeded
        };
    }
    let output_file = [
        "/metadata/output/responsesFile",
        "/response/responsesFile",
        "/response/output/responsesFile",
        "/dest/fileName",
        "/dest/file_name",
    ]
    .iter()
    .find_map(|pointer| payload.pointer(pointer).and_then(Value::as_str))
    .filter(|value| !value.trim().is_empty())
    .map(str::to_string);
    let name = payload
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or(job_name)
        .to_string();
    JobStatus {
        name,
        state,
        raw_state,
        output_file,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn batch_endpoint_prefixes_models_once() {
        let service = GeminiBatchService::new("key");
        assert_eq!(
            service.batch_endpoint("gemini-2.5-flash-image"),
            concat!(
                "https://generativelanguage.googleapis.com/v1beta/models/",
                "gemini-2.5-flash-image:batchGenerateContent"
            )
        );
        assert_eq!(model_path(" models/custom "), "models/custom");
    }

    #[test]
    fn running_operation_reports_state_without_output() {
        let status = parse_job_status(
            "batches/abc",
            &json!({
                "name": "batches/abc",
                "metadata": { "state": "BATCH_STATE_RUNNING" }
            }),
        );
        assert_eq!(status.state, JobState::Running);
        assert_eq!(status.raw_state, "BATCH_STATE_RUNNING");
        assert_eq!(status.output_file, None);
    }

    #[test]
    fn succeeded_operation_exposes_responses_file() {
        let status = parse_job_status(
            "batches/abc",
            &json!({
                "name": "batches/abc",
                "done": true,
                "metadata": {
                    "state": "BATCH_STATE_SUCCEEDED",
                    "output": { "responsesFile": "files/batch-abc-out" }
                }
            }),
        );
        assert_eq!(status.state, JobState::Succeeded);
        assert_eq!(status.output_file.as_deref(), Some("files/batch-abc-out"));

        let alt = parse_job_status(
            "batches/xyz",
            &json!({
                "done": true,
                "response": { "responsesFile": "files/xyz" }
            }),
        );
        assert_eq!(alt.name, "batches/xyz");
        assert_eq!(alt.state, JobState::Succeeded);
        assert_eq!(alt.output_file.as_deref(), Some("files/xyz"));
    }

    #[test]
    fn done_with_error_is_failed() {
        let status = parse_job_status(
            "batches/abc",
            &json!({ "done": true, "error": { "code": 3, "message": "bad input" } }),
        );
        assert_eq!(status.state, JobState::Failed);
    }
}
