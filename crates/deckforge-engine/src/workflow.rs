use std::path::PathBuf;

use anyhow::Result;
use deckforge_contracts::deck::{standard_deck, DeckStyle};
use deckforge_contracts::wire::build_requests;
use serde_json::json;

use crate::batch::{BatchContext, JobState};
use crate::cost::CostTracker;
use crate::extract::extract_images;
use crate::retry::RetryController;

pub const DECK_REQUEST_FILE: &str = "deck.jsonl";

#[derive(Debug, Clone, PartialEq)]
pub struct DeckBatchOutcome {
    pub job_name: String,
    pub job_state: JobState,
    pub output_folder: Option<PathBuf>,
    pub failed_keys: Vec<String>,
    pub images_written: usize,
    pub retry_rounds: usize,
    pub cost: CostTracker,
}

impl DeckBatchOutcome {
    /// At least one card image made it to disk.
    pub fn produced_images(&self) -> bool {
        self.images_written > 0
    }
}

/// Full 55-card batch run: submit, wait, extract, then offer retries for
/// whatever failed.
pub fn run_deck_batch(
    ctx: &BatchContext,
    style: &DeckStyle,
    retry: &RetryController,
    confirm_retry: &mut dyn FnMut(usize, &[String]) -> bool,
) -> Result<DeckBatchOutcome> {
    let requests = build_requests(&standard_deck(), style);
    let expected: Vec<String> = requests.iter().map(|req| req.key.clone()).collect();
    println!("Prepared {} card requests", requests.len());

    let status = ctx.run_batch(&requests, DECK_REQUEST_FILE)?;
    let mut outcome = DeckBatchOutcome {
        job_name: status.name.clone(),
        job_state: status.state,
        output_folder: None,
        failed_keys: expected.clone(),
        images_written: 0,
        retry_rounds: 0,
        cost: CostTracker::new(),
    };

    let Some(results) = ctx.download(&status)? else {
        println!("Batch job failed. No images saved.");
        return Ok(outcome);
    };

    let extraction = extract_images(
        &results,
        &status.name,
        &expected,
        &ctx.layout,
        ctx.events(),
    )?;
    outcome.output_folder = Some(extraction.output_folder.clone());
    outcome.images_written = extraction.images_written.len();
    outcome.cost = extraction.cost;
    outcome.failed_keys = extraction.failed_keys;

    if !outcome.failed_keys.is_empty() {
        println!("\n{} card(s) failed:", outcome.failed_keys.len());
        for key in &outcome.failed_keys {
            println!("  - {key}");
        }
        let retried = retry.run(
            ctx,
            &status.name,
            style,
            std::mem::take(&mut outcome.failed_keys),
            confirm_retry,
        )?;
        outcome.retry_rounds = retried.rounds;
        outcome.images_written += retried.images_written;
        outcome.cost.merge(&retried.cost);
        outcome.failed_keys = retried.failed_keys;
    }

    if outcome.failed_keys.is_empty() {
        println!("\nAll cards generated.");
    } else {
        println!("\nStill missing {} card(s):", outcome.failed_keys.len());
        for key in &outcome.failed_keys {
            println!("  - {key}");
        }
    }
    if let Some(folder) = &outcome.output_folder {
        println!("Done! Cards saved in {}", folder.display());
    }

    ctx.events().emit_json(
        "deck_finished",
        json!({
            "job": outcome.job_name,
            "images_written": outcome.images_written,
            "failed": outcome.failed_keys,
            "retry_rounds": outcome.retry_rounds,
            "total_cost_usd": outcome.cost.total_cost(),
        }),
    )?;
    Ok(outcome)
}
