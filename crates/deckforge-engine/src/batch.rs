use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use deckforge_contracts::events::EventWriter;
use deckforge_contracts::wire::{write_jsonl, CardRequest};
use serde_json::json;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

const CANCEL_CHECK_SLICE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    /// Accepts SDK (`JOB_STATE_*`) and REST (`BATCH_STATE_*`) spellings.
    /// Expired jobs count as failed; anything unrecognised is still queued.
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_uppercase();
        let bare = normalized
            .strip_prefix("JOB_STATE_")
            .or_else(|| normalized.strip_prefix("BATCH_STATE_"))
            .unwrap_or(&normalized);
        match bare {
            "RUNNING" => Self::Running,
            "SUCCEEDED" => Self::Succeeded,
            "FAILED" | "EXPIRED" => Self::Failed,
            "CANCELLED" | "CANCELED" => Self::Cancelled,
            _ => Self::Queued,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub name: String,
    pub display_name: String,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        job_id(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub name: String,
    pub state: JobState,
    /// State string exactly as reported by the service.
    pub raw_state: String,
    /// Result file to download once the job has succeeded.
    pub output_file: Option<String>,
}

/// Remote side of a batch run. Implementations block until the call returns.
pub trait BatchService {
    fn name(&self) -> &str;
    /// Uploads a request file and returns the service-side file name.
    fn upload_file(&self, path: &Path, display_name: &str) -> Result<String>;
    fn create_job(&self, model: &str, source_file: &str, display_name: &str) -> Result<JobHandle>;
    fn job_status(&self, job_name: &str) -> Result<JobStatus>;
    fn download_file(&self, file_name: &str) -> Result<Vec<u8>>;
}

/// `batches/abc123` -> `abc123`.
pub fn job_id(job_name: &str) -> &str {
    job_name.rsplit('/').next().unwrap_or(job_name)
}

/// Where request files and extracted card images go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    pub results_dir: PathBuf,
    pub images_dir: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            results_dir: root.join("batch_output"),
            images_dir: root.join("card_images"),
        }
    }

    pub fn ensure(&self) -> Result<()> {
        for dir in [&self.results_dir, &self.images_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn request_file(&self, file_name: &str) -> PathBuf {
        self.results_dir.join(file_name)
    }

    pub fn job_folder(&self, job_name: &str) -> PathBuf {
        self.images_dir.join(job_id(job_name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    /// `None` waits for a terminal state indefinitely (still cancellable).
    pub timeout: Option<Duration>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
        }
    }
}

/// User-tunable knobs for a batch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSettings {
    pub model: String,
    pub poll: PollSettings,
    pub max_retry_rounds: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            poll: PollSettings::default(),
            max_retry_rounds: crate::retry::DEFAULT_MAX_RETRY_ROUNDS,
        }
    }
}

/// Everything a batch run needs, passed explicitly to each step.
pub struct BatchContext {
    service: Box<dyn BatchService>,
    pub layout: OutputLayout,
    pub model: String,
    pub poll: PollSettings,
    events: EventWriter,
    cancel: Arc<AtomicBool>,
}

impl BatchContext {
    pub fn new(
        service: Box<dyn BatchService>,
        layout: OutputLayout,
        model: impl Into<String>,
        events: EventWriter,
    ) -> Self {
        Self {
            service,
            layout,
            model: model.into(),
            poll: PollSettings::default(),
            events,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_poll(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    pub fn service_name(&self) -> &str {
        self.service.name()
    }

    /// Setting the returned flag aborts an in-progress wait at the next tick.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Shares a flag owned elsewhere, such as an interrupt handler.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Writes `requests` to `<results_dir>/<file_name>`, uploads it and creates
    /// the job. Errors are returned as-is; nothing here retries.
    pub fn submit(&self, requests: &[CardRequest], file_name: &str) -> Result<JobHandle> {
        self.layout.ensure()?;
        let path = self.layout.request_file(file_name);
        write_jsonl(&path, requests)?;

        let stem = Path::new(file_name)
            .file_stem()
            .and_then(|value| value.to_str())
            .unwrap_or(file_name);
        let uploaded = self
            .service
            .upload_file(&path, file_name)
            .with_context(|| format!("failed to upload {}", path.display()))?;
        println!("Uploaded: {uploaded}");

        let display_name = format!("card-deck-{stem}");
        let handle = self
            .service
            .create_job(&self.model, &uploaded, &display_name)
            .context("failed to create batch job")?;
        println!("Created job: {}", handle.name);

        self.events.emit_json(
            "batch_submitted",
            json!({
                "job": handle.name,
                "job_id": handle.id(),
                "display_name": handle.display_name,
                "request_file": path.to_string_lossy(),
                "uploaded_file": uploaded,
                "requests": requests.len(),
                "model": self.model,
            }),
        )?;
        Ok(handle)
    }

    /// Polls until the job reaches a terminal state, the poll deadline passes
    /// or the cancel flag is raised.
    pub fn await_completion(&self, handle: &JobHandle) -> Result<JobStatus> {
        let started = Instant::now();
        let mut status = self.service.job_status(&handle.name)?;
        while !status.state.is_terminal() {
            let elapsed = started.elapsed();
            println!("Current state: {}", status.raw_state);
            println!("Elapsed: {}s", elapsed.as_secs());
            self.events.emit_json(
                "batch_poll",
                json!({
                    "job": handle.name,
                    "state": status.state.as_str(),
                    "elapsed_s": elapsed.as_secs(),
                }),
            )?;

            let mut pause = self.poll.interval;
            if let Some(timeout) = self.poll.timeout {
                if elapsed >= timeout {
                    bail!(
                        "batch job {} still {} after {}s",
                        handle.name,
                        status.state,
                        timeout.as_secs()
                    );
                }
                pause = pause.min(timeout - elapsed);
            }
            if !sleep_unless_cancelled(pause, &self.cancel) {
                bail!("cancelled while waiting for batch job {}", handle.name);
            }
            status = self.service.job_status(&handle.name)?;
        }

        println!("Total processing time: {}s", started.elapsed().as_secs());
        println!("Final state: {}", status.raw_state);
        self.events.emit_json(
            "batch_finished",
            json!({
                "job": handle.name,
                "state": status.state.as_str(),
                "raw_state": status.raw_state,
                "elapsed_s": started.elapsed().as_secs(),
            }),
        )?;
        Ok(status)
    }

    /// Result text of a succeeded job; `None` for any other terminal state.
    pub fn download(&self, status: &JobStatus) -> Result<Option<String>> {
        if status.state != JobState::Succeeded {
            println!("Batch job {} ended {}.", status.name, status.state);
            return Ok(None);
        }
        let Some(file_name) = status.output_file.as_deref() else {
            bail!("batch job {} succeeded without a responses file", status.name);
        };
        let bytes = self
            .service
            .download_file(file_name)
            .with_context(|| format!("failed to download {file_name}"))?;
        let text = String::from_utf8(bytes).context("batch results are not valid UTF-8")?;
        println!("Downloaded results for {} ({} bytes)", status.name, text.len());
        Ok(Some(text))
    }

    /// `submit` followed by `await_completion`.
    pub fn run_batch(&self, requests: &[CardRequest], file_name: &str) -> Result<JobStatus> {
        let handle = self.submit(requests, file_name)?;
        self.await_completion(&handle)
    }
}

/// Sleeps for `duration` in short slices; returns `false` once `cancel` is set.
fn sleep_unless_cancelled(duration: Duration, cancel: &AtomicBool) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if cancel.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(CANCEL_CHECK_SLICE.min(deadline - now));
    }
}
