use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use deckforge_contracts::deck::{
    build_prompt, standard_deck, CardDescriptor, DeckStyle, SUITS, VALUES,
};
use deckforge_contracts::events::{now_utc_iso, EventWriter};
use deckforge_contracts::summary::{
    format_minutes_seconds, write_summary, CardOutcome, CardStatus, LocalRunSummary,
};
use image::{ImageFormat, Rgb, RgbImage};
use reqwest::blocking::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::http::{base_url_from_env, non_empty_env, response_json_or_error};

pub const DEFAULT_WEBUI_URL: &str = "http://127.0.0.1:7860";
pub const DEFAULT_LOCAL_THEME: &str = "Western Steampunk";
pub const DEFAULT_LOCAL_TECHNIQUE: &str = "Victorian engraving";
pub const DEFAULT_LOCAL_BACKGROUND: &str = "aged parchment";
pub const SUMMARY_FILE: &str = "batch_results.json";

const RENDER_TIMEOUT: Duration = Duration::from_secs(900);
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const PROGRESS_WIDTH: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cuda,
    Mps,
    Cpu,
}

impl Device {
    /// CUDA when an NVIDIA driver is visible, MPS on Apple silicon, else CPU.
    pub fn detect() -> Self {
        let nvidia_driver = Path::new("/proc/driver/nvidia/version").exists();
        let visible_devices = non_empty_env("CUDA_VISIBLE_DEVICES")
            .filter(|value| value != "-1")
            .is_some();
        if nvidia_driver || visible_devices {
            Self::Cuda
        } else if cfg!(all(target_os = "macos", target_arch = "aarch64")) {
            Self::Mps
        } else {
            Self::Cpu
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cuda => "cuda",
            Self::Mps => "mps",
            Self::Cpu => "cpu",
        }
    }
}

impl FromStr for Device {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cuda" => Ok(Self::Cuda),
            "mps" => Ok(Self::Mps),
            "cpu" => Ok(Self::Cpu),
            other => bail!("unknown device '{other}' (expected cuda, mps or cpu)"),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderSettings {
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub seed: Option<i64>,
    pub guidance_scale: f64,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 1152,
            steps: 9,
            seed: None,
            guidance_scale: 0.0,
        }
    }
}

impl RenderSettings {
    /// Smaller frames and fewer steps for quick previews.
    pub fn fast() -> Self {
        Self {
            width: 512,
            height: 896,
            steps: 4,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            bail!("image size must be non-zero (got {}x{})", self.width, self.height);
        }
        if self.steps == 0 {
            bail!("inference steps must be at least 1");
        }
        Ok(())
    }

    pub fn request(&self, prompt: impl Into<String>) -> RenderRequest {
        RenderRequest {
            prompt: prompt.into(),
            width: self.width,
            height: self.height,
            steps: self.steps,
            seed: self.seed,
            guidance_scale: self.guidance_scale,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub seed: Option<i64>,
    pub guidance_scale: f64,
}

/// Encoded PNG bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedImage {
    pub bytes: Vec<u8>,
}

pub trait DiffusionPipeline {
    fn name(&self) -> &str;
    fn device(&self) -> Device;
    /// One-line readiness report; errors when the backend is unreachable.
    fn probe(&self) -> Result<String> {
        Ok(format!("{} pipeline ready on {}", self.name(), self.device()))
    }
    fn render(&self, request: &RenderRequest) -> Result<RenderedImage>;
}

/// Stable Diffusion WebUI (`--api`) running on this machine.
pub struct WebUiPipeline {
    base_url: String,
    device: Device,
    http: HttpClient,
}

#[derive(Debug, Serialize)]
struct Txt2ImgPayload<'a> {
    prompt: &'a str,
    width: u32,
    height: u32,
    steps: u32,
    seed: i64,
    cfg_scale: f64,
    batch_size: u32,
    n_iter: u32,
}

#[derive(Debug, Deserialize)]
struct Txt2ImgResponse {
    #[serde(default)]
    images: Vec<String>,
}

impl WebUiPipeline {
    pub fn new(base_url: impl Into<String>, device: Device) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            device,
            http: HttpClient::new(),
        }
    }

    /// `DECKFORGE_WEBUI_URL`, falling back to the WebUI's default port.
    pub fn from_env(device: Device) -> Self {
        Self::new(base_url_from_env("DECKFORGE_WEBUI_URL", DEFAULT_WEBUI_URL), device)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl DiffusionPipeline for WebUiPipeline {
    fn name(&self) -> &str {
        "webui"
    }

    fn device(&self) -> Device {
        self.device
    }

    fn probe(&self) -> Result<String> {
        let endpoint = format!("{}/sdapi/v1/sd-models", self.base_url);
        let response = self
            .http
            .get(&endpoint)
            .timeout(PROBE_TIMEOUT)
            .send()
            .with_context(|| format!("WebUI not reachable at {}", self.base_url))?;
        let payload = response_json_or_error("WebUI", response)?;
        let models = payload.as_array().map(Vec::len).unwrap_or(0);
        Ok(format!("WebUI at {} reports {models} model(s)", self.base_url))
    }

    fn render(&self, request: &RenderRequest) -> Result<RenderedImage> {
        let endpoint = format!("{}/sdapi/v1/txt2img", self.base_url);
        let payload = Txt2ImgPayload {
            prompt: &request.prompt,
            width: request.width,
            height: request.height,
            steps: request.steps,
            seed: request.seed.unwrap_or(-1),
            cfg_scale: request.guidance_scale,
            batch_size: 1,
            n_iter: 1,
        };
        let response = self
            .http
            .post(&endpoint)
            .timeout(RENDER_TIMEOUT)
            .json(&payload)
            .send()
            .with_context(|| format!("WebUI request failed ({endpoint})"))?;
        let body = response_json_or_error("WebUI", response)?;
        let parsed: Txt2ImgResponse =
            serde_json::from_value(body).context("WebUI returned an unexpected payload")?;
        let Some(encoded) = parsed.images.first() else {
            bail!("WebUI returned no images");
        };
        let encoded = match encoded.split_once(',') {
            Some((prefix, data)) if prefix.starts_with("data:") => data,
            _ => encoded.as_str(),
        };
        let bytes = BASE64
            .decode(encoded.as_bytes())
            .context("WebUI image base64 decode failed")?;
        Ok(RenderedImage { bytes })
    }
}

/// Offline pipeline: solid colour derived from the prompt and seed.
pub struct DryrunPipeline {
    device: Device,
}

impl DryrunPipeline {
    pub fn new(device: Device) -> Self {
        Self { device }
    }
}

impl DiffusionPipeline for DryrunPipeline {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn device(&self) -> Device {
        self.device
    }

    fn render(&self, request: &RenderRequest) -> Result<RenderedImage> {
        let (r, g, b) = color_from_prompt(&request.prompt, request.seed.unwrap_or_default() as u64);
        let mut image = RgbImage::new(request.width, request.height);
        for pixel in image.pixels_mut() {
            *pixel = Rgb([r, g, b]);
        }
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .context("failed to encode dryrun image")?;
        Ok(RenderedImage { bytes })
    }
}

fn color_from_prompt(prompt: &str, seed: u64) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(seed.to_be_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn short_digest(bytes: &[u8]) -> String {
    hex::encode(&Sha256::digest(bytes)[..6])
}

/// Which deck positions a local run renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationMode {
    SingleCard { value: String, suit: String },
    CardBack,
    FullDeck,
}

impl GenerationMode {
    /// Single cards must name a known value and suit (case-insensitive).
    pub fn cards(&self) -> Result<Vec<CardDescriptor>> {
        match self {
            Self::SingleCard { value, suit } => {
                let Some(value) = VALUES
                    .iter()
                    .find(|known| known.eq_ignore_ascii_case(value.trim()))
                else {
                    bail!("unknown card value '{value}' (expected one of {})", VALUES.join(", "));
                };
                let Some(suit) = SUITS
                    .iter()
                    .find(|known| known.eq_ignore_ascii_case(suit.trim()))
                else {
                    bail!("unknown suit '{suit}' (expected one of {})", SUITS.join(", "));
                };
                Ok(vec![CardDescriptor::standard(*value, *suit)])
            }
            Self::CardBack => Ok(vec![CardDescriptor::Back]),
            Self::FullDeck => Ok(standard_deck()),
        }
    }
}

/// Renders cards one at a time and keeps `batch_results.json` current.
pub struct LocalDeckRunner {
    pipeline: Box<dyn DiffusionPipeline>,
    settings: RenderSettings,
    style: DeckStyle,
    output_dir: PathBuf,
    events: EventWriter,
    stop: Arc<AtomicBool>,
}

impl LocalDeckRunner {
    pub fn new(
        pipeline: Box<dyn DiffusionPipeline>,
        settings: RenderSettings,
        style: DeckStyle,
        output_dir: impl Into<PathBuf>,
        events: EventWriter,
    ) -> Self {
        Self {
            pipeline,
            settings,
            style,
            output_dir: output_dir.into(),
            events,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Raising the flag ends the run before the next card starts.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Shares a flag owned elsewhere, such as an interrupt handler.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn summary_path(&self) -> PathBuf {
        self.output_dir.join(SUMMARY_FILE)
    }

    pub fn run(&self, mode: &GenerationMode) -> Result<LocalRunSummary> {
        self.settings.validate()?;
        let cards = mode.cards()?;
        std::fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("failed to create {}", self.output_dir.display()))?;

        let total = cards.len();
        let mut summary = LocalRunSummary {
            timestamp: now_utc_iso(),
            theme: self.style.theme.clone(),
            technique: self.style.technique.clone(),
            background: self.style.background.clone(),
            device: self.pipeline.device().to_string(),
            pipeline: self.pipeline.name().to_string(),
            total_cards: total,
            completed: 0,
            failed: 0,
            interrupted: false,
            total_time: format_minutes_seconds(0.0),
            avg_time_per_card: "n/a".to_string(),
            cards: Vec::with_capacity(total),
        };
        println!(
            "Rendering {total} card(s) with {} on {} ({}x{}, {} steps)",
            self.pipeline.name(),
            self.pipeline.device(),
            self.settings.width,
            self.settings.height,
            self.settings.steps
        );

        let started = Instant::now();
        for (idx, card) in cards.iter().enumerate() {
            if self.stop.load(Ordering::SeqCst) {
                summary.interrupted = true;
                println!("\nStopped after {} of {total} card(s).", idx);
                break;
            }
            println!("\n{} {}", progress_bar(idx, total), card);

            let key = card.key();
            let filename = format!("{key}.png");
            let card_started = Instant::now();
            let rendered = self.render_card(card, &filename);
            let card_secs = card_started.elapsed().as_secs_f64();

            let outcome = match rendered {
                Ok(digest) => {
                    summary.completed += 1;
                    println!("Saved {filename} in {card_secs:.2}s");
                    self.events.emit_json(
                        "local_card",
                        json!({
                            "key": key,
                            "status": "success",
                            "file": filename,
                            "seconds": card_secs,
                            "digest": digest,
                        }),
                    )?;
                    CardOutcome {
                        card: card.display_name(),
                        key,
                        filename,
                        status: CardStatus::Success,
                        time: Some(format!("{card_secs:.2}s")),
                        error: None,
                    }
                }
                Err(err) => {
                    summary.failed += 1;
                    println!("Failed {card}: {err:#}");
                    self.events.emit_json(
                        "local_card",
                        json!({ "key": key, "status": "failed", "error": format!("{err:#}") }),
                    )?;
                    CardOutcome {
                        card: card.display_name(),
                        key,
                        filename,
                        status: CardStatus::Failed,
                        time: None,
                        error: Some(format!("{err:#}")),
                    }
                }
            };
            summary.cards.push(outcome);

            let elapsed = started.elapsed().as_secs_f64();
            if let Some(eta) = estimate_remaining(elapsed, summary.completed, total - (idx + 1)) {
                println!("ETA: {}", format_minutes_seconds(eta));
            }
            self.refresh_timing(&mut summary, elapsed);
            write_summary(&self.summary_path(), &summary)?;
        }

        self.refresh_timing(&mut summary, started.elapsed().as_secs_f64());
        write_summary(&self.summary_path(), &summary)?;
        println!(
            "\nDone: {} succeeded, {} failed in {}. Summary: {}",
            summary.completed,
            summary.failed,
            summary.total_time,
            self.summary_path().display()
        );
        Ok(summary)
    }

    /// Renders and writes one card, returning a short digest of the file.
    fn render_card(&self, card: &CardDescriptor, filename: &str) -> Result<String> {
        let prompt = build_prompt(card, &self.style);
        let image = self.pipeline.render(&self.settings.request(prompt))?;
        let path = self.output_dir.join(filename);
        std::fs::write(&path, &image.bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(short_digest(&image.bytes))
    }

    fn refresh_timing(&self, summary: &mut LocalRunSummary, elapsed: f64) {
        summary.total_time = format_minutes_seconds(elapsed);
        summary.avg_time_per_card = if summary.completed > 0 {
            format!("{:.2}s", elapsed / summary.completed as f64)
        } else {
            "n/a".to_string()
        };
    }
}

/// Renders the Ace of Spades into `output_dir/test_card.png`.
pub fn render_test_card(
    pipeline: &dyn DiffusionPipeline,
    settings: &RenderSettings,
    output_dir: &Path,
) -> Result<PathBuf> {
    settings.validate()?;
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;
    let style = DeckStyle::new(
        DEFAULT_LOCAL_THEME,
        DEFAULT_LOCAL_TECHNIQUE,
        DEFAULT_LOCAL_BACKGROUND,
    );
    let card = CardDescriptor::standard("Ace", "Spades");
    let started = Instant::now();
    let image = pipeline.render(&settings.request(build_prompt(&card, &style)))?;
    let path = output_dir.join("test_card.png");
    std::fs::write(&path, &image.bytes)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!(
        "Test card rendered in {:.2}s: {}",
        started.elapsed().as_secs_f64(),
        path.display()
    );
    Ok(path)
}

/// Seconds left, from the average time per completed card.
fn estimate_remaining(elapsed: f64, completed: usize, remaining: usize) -> Option<f64> {
    if completed == 0 || remaining == 0 {
        return None;
    }
    Some(remaining as f64 * (elapsed / completed as f64))
}

fn progress_bar(done: usize, total: usize) -> String {
    let filled = if total == 0 {
        PROGRESS_WIDTH
    } else {
        done * PROGRESS_WIDTH / total
    };
    format!(
        "[{}{}] {}/{}",
        "#".repeat(filled),
        "-".repeat(PROGRESS_WIDTH - filled),
        done + 1,
        total
    )
}
