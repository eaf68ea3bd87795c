use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use deckforge_contracts::events::EventWriter;
use serde_json::{json, Value};

use crate::batch::OutputLayout;
use crate::cost::CostTracker;

/// What one pass over a results file produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub output_folder: PathBuf,
    /// Keys that failed or never showed up, deduplicated, in first-seen order.
    pub failed_keys: Vec<String>,
    pub successful_keys: Vec<String>,
    pub images_written: Vec<PathBuf>,
    pub cost: CostTracker,
}

struct InlineImage {
    bytes: Vec<u8>,
    extension: &'static str,
}

enum RecordOutcome {
    Images(Vec<InlineImage>),
    Failed(String),
}

/// Decodes every inline image in `results_text` into the job folder.
///
/// A key that produced at least one image on any line is never reported
/// failed. Expected keys that never appear are failed as missing.
pub fn extract_images(
    results_text: &str,
    job_name: &str,
    expected_keys: &[String],
    layout: &OutputLayout,
    events: &EventWriter,
) -> Result<Extraction> {
    let output_folder = layout.job_folder(job_name);
    std::fs::create_dir_all(&output_folder)
        .with_context(|| format!("failed to create {}", output_folder.display()))?;

    let mut tally = KeyTally::default();
    let mut cost = CostTracker::new();
    let mut images_written = Vec::new();

    for (idx, line) in results_text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: Value = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(err) => {
                println!("Skipping unreadable result line {}: {err}", idx + 1);
                continue;
            }
        };
        let Some(key) = record.get("key").and_then(Value::as_str) else {
            println!("Skipping result line {} without a key", idx + 1);
            continue;
        };

        match read_record(&record, &mut cost) {
            RecordOutcome::Images(images) => {
                for image in images {
                    let path = output_folder.join(format!("{key}{}", image.extension));
                    std::fs::write(&path, &image.bytes)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    cost.add_image();
                    println!("Saved: {}", path.display());
                    events.emit_json(
                        "card_saved",
                        json!({
                            "key": key,
                            "path": path.to_string_lossy(),
                            "bytes": image.bytes.len(),
                        }),
                    )?;
                    images_written.push(path);
                }
                tally.succeed(key);
            }
            RecordOutcome::Failed(reason) => {
                println!("Failed {key}: {reason}");
                events.emit_json("card_failed", json!({ "key": key, "reason": reason }))?;
                tally.fail(key);
            }
        }
    }

    for key in expected_keys {
        if !tally.seen(key) {
            println!("Missing from results: {key}");
            events.emit_json("card_failed", json!({ "key": key, "reason": "missing" }))?;
            tally.fail(key);
        }
    }

    println!("{}", cost.render_summary(tally.failed.len()));
    events.emit("cost_summary", cost.to_event_payload())?;

    Ok(Extraction {
        output_folder,
        failed_keys: tally.failed,
        successful_keys: tally.succeeded,
        images_written,
        cost,
    })
}

fn read_record(record: &Value, cost: &mut CostTracker) -> RecordOutcome {
    let Some(response) = record.get("response").filter(|value| !value.is_null()) else {
        return match record.get("error") {
            Some(error) => RecordOutcome::Failed(format!("error: {error}")),
            None => RecordOutcome::Failed("no response".to_string()),
        };
    };
    if let Some(error) = response.get("error") {
        return RecordOutcome::Failed(format!("error: {error}"));
    }
    let Some(candidate) = response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
    else {
        return RecordOutcome::Failed("no candidates".to_string());
    };
    if let Some(usage) = response.get("usageMetadata") {
        cost.add_usage(usage);
    }

    let parts = candidate
        .pointer("/content/parts")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut images = Vec::new();
    for part in parts {
        let Some(inline) = part.get("inlineData").or_else(|| part.get("inline_data")) else {
            continue;
        };
        let Some(data) = inline.get("data").and_then(Value::as_str) else {
            continue;
        };
        if data.is_empty() {
            continue;
        }
        let bytes = match BASE64.decode(data.as_bytes()) {
            Ok(bytes) => bytes,
            Err(err) => return RecordOutcome::Failed(format!("invalid image data: {err}")),
        };
        let mime_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .unwrap_or("");
        images.push(InlineImage {
            bytes,
            extension: extension_for_mime(mime_type),
        });
    }
    if images.is_empty() {
        return RecordOutcome::Failed("no image data".to_string());
    }
    RecordOutcome::Images(images)
}

fn extension_for_mime(mime_type: &str) -> &'static str {
    if mime_type.to_ascii_lowercase().contains("png") {
        ".png"
    } else {
        ".jpg"
    }
}

#[derive(Default)]
struct KeyTally {
    succeeded: Vec<String>,
    failed: Vec<String>,
    known: HashSet<String>,
}

impl KeyTally {
    fn seen(&self, key: &str) -> bool {
        self.known.contains(key)
    }

    fn succeed(&mut self, key: &str) {
        self.failed.retain(|failed| failed != key);
        if !self.succeeded.iter().any(|done| done == key) {
            self.succeeded.push(key.to_string());
        }
        self.known.insert(key.to_string());
    }

    fn fail(&mut self, key: &str) {
        let already = self.succeeded.iter().chain(self.failed.iter()).any(|k| k == key);
        if !already {
            self.failed.push(key.to_string());
        }
        self.known.insert(key.to_string());
    }
}
