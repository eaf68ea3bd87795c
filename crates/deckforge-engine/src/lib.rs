pub mod batch;
pub mod cost;
pub mod extract;
pub mod gemini;
pub mod local;
pub mod retry;
pub mod workflow;

mod http;

pub use batch::{
    BatchContext, BatchService, BatchSettings, JobHandle, JobState, JobStatus, OutputLayout,
    PollSettings,
};
pub use cost::CostTracker;
pub use extract::{extract_images, Extraction};
pub use gemini::GeminiBatchService;
pub use local::{
    Device, DiffusionPipeline, DryrunPipeline, GenerationMode, LocalDeckRunner, RenderSettings,
    WebUiPipeline,
};
pub use retry::{build_retry_requests, RetryController};
pub use workflow::{run_deck_batch, DeckBatchOutcome};
