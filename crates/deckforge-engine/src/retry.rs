use std::collections::HashSet;

use anyhow::{Error, Result};
use deckforge_contracts::deck::{CardDescriptor, DeckStyle};
use deckforge_contracts::wire::CardRequest;
use serde_json::json;

use crate::batch::{BatchContext, JobState};
use crate::cost::CostTracker;
use crate::extract::extract_images;

pub const DEFAULT_MAX_RETRY_ROUNDS: usize = 3;

/// Requests rebuilt from failed keys, plus the keys that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPlan {
    pub requests: Vec<CardRequest>,
    pub skipped: Vec<String>,
}

/// Reverses each failed key into a card and re-renders its prompt.
pub fn build_retry_requests(failed_keys: &[String], style: &DeckStyle) -> RetryPlan {
    let mut requests = Vec::with_capacity(failed_keys.len());
    let mut skipped = Vec::new();
    for key in failed_keys {
        match CardDescriptor::from_key(key) {
            Some(card) => {
                if !card.is_known() {
                    println!("Warning: '{key}' is not a standard card, retrying as-is");
                }
                requests.push(CardRequest::for_card(&card, style));
            }
            None => {
                println!("Warning: could not parse key '{key}', skipping");
                skipped.push(key.clone());
            }
        }
    }
    RetryPlan { requests, skipped }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome {
    pub rounds: usize,
    pub failed_keys: Vec<String>,
    pub images_written: usize,
    pub cost: CostTracker,
}

/// Drives up to `max_rounds` follow-up batches for failed cards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryController {
    pub max_rounds: usize,
}

impl Default for RetryController {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_RETRY_ROUNDS,
        }
    }
}

impl RetryController {
    pub fn new(max_rounds: usize) -> Self {
        Self { max_rounds }
    }

    /// Each round asks `confirm(round, failed)` first; a `false` answer stops.
    /// Retried images land in the original job's folder, and the failed set
    /// never grows from one round to the next. A round whose upload, wait or
    /// download fails ends the retries with the failed set unchanged.
    pub fn run(
        &self,
        ctx: &BatchContext,
        original_job_name: &str,
        style: &DeckStyle,
        failed_keys: Vec<String>,
        confirm: &mut dyn FnMut(usize, &[String]) -> bool,
    ) -> Result<RetryOutcome> {
        let mut failed = failed_keys;
        let mut outcome = RetryOutcome {
            rounds: 0,
            failed_keys: Vec::new(),
            images_written: 0,
            cost: CostTracker::new(),
        };

        while !failed.is_empty() && outcome.rounds < self.max_rounds {
            let round = outcome.rounds + 1;
            if !confirm(round, &failed) {
                break;
            }
            outcome.rounds = round;
            println!(
                "\nRetry {round}/{}: resubmitting {} failed card(s)",
                self.max_rounds,
                failed.len()
            );

            let plan = build_retry_requests(&failed, style);
            if plan.requests.is_empty() {
                println!("No retryable cards left.");
                break;
            }

            let request_file = format!("deck_retry_{round}.jsonl");
            let status = match ctx.run_batch(&plan.requests, &request_file) {
                Ok(status) => status,
                Err(err) => {
                    report_round_error(ctx, round, failed.len(), &err)?;
                    break;
                }
            };
            let before = failed.len();
            if status.state == JobState::Succeeded {
                let downloaded = match ctx.download(&status) {
                    Ok(downloaded) => downloaded,
                    Err(err) => {
                        report_round_error(ctx, round, failed.len(), &err)?;
                        break;
                    }
                };
                if let Some(text) = downloaded {
                    let extraction = extract_images(
                        &text,
                        original_job_name,
                        &failed,
                        &ctx.layout,
                        ctx.events(),
                    )?;
                    let previous: HashSet<&String> = failed.iter().collect();
                    let narrowed: Vec<String> = extraction
                        .failed_keys
                        .iter()
                        .filter(|key| previous.contains(key))
                        .cloned()
                        .collect();
                    outcome.images_written += extraction.images_written.len();
                    outcome.cost.merge(&extraction.cost);
                    failed = narrowed;
                }
            } else {
                println!(
                    "Retry batch {} ended {}; keeping failed set.",
                    status.name, status.state
                );
            }

            ctx.events().emit_json(
                "retry_round",
                json!({
                    "round": round,
                    "job": status.name,
                    "state": status.state.as_str(),
                    "failed_before": before,
                    "failed_after": failed.len(),
                }),
            )?;
        }

        outcome.failed_keys = failed;
        Ok(outcome)
    }
}

fn report_round_error(ctx: &BatchContext, round: usize, failed: usize, err: &Error) -> Result<()> {
    println!("Retry round {round} failed: {err:#}");
    ctx.events().emit_json(
        "retry_round",
        json!({
            "round": round,
            "error": format!("{err:#}"),
            "failed_before": failed,
            "failed_after": failed,
        }),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use deckforge_contracts::events::EventWriter;

    use super::*;
    use crate::batch::testing::FakeBatchService;
    use crate::batch::{OutputLayout, PollSettings, DEFAULT_MODEL};

    fn style() -> DeckStyle {
        DeckStyle::new("Pirates", "woodcut", "sea chart")
    }

    fn keys(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn context(service: &FakeBatchService, root: &std::path::Path) -> BatchContext {
        BatchContext::new(
            Box::new(service.clone()),
            OutputLayout::new(root),
            DEFAULT_MODEL,
            EventWriter::discard("test"),
        )
        .with_poll(PollSettings {
            interval: Duration::ZERO,
            timeout: None,
        })
    }

    fn image_line(key: &str) -> String {
        json!({
            "key": key,
            "response": { "candidates": [{ "content": { "parts": [
                { "inlineData": {
                    "mimeType": "image/png",
                    "data": BASE64.encode(key.as_bytes())
                } }
            ]}}]}
        })
        .to_string()
    }

    #[test]
    fn retry_requests_rebuild_prompts_and_skip_garbage() {
        let plan = build_retry_requests(
            &keys(&[
                "Spades_13_King",
                "ZZ_Joker_14_Joker1",
                "ZZ_ZZ_00_Card-Back",
                "Stars_00_Eleven",
                "garbage",
            ]),
            &style(),
        );
        let rebuilt: Vec<&str> = plan.requests.iter().map(|req| req.key.as_str()).collect();
        assert_eq!(
            rebuilt,
            vec![
                "Spades_13_King",
                "ZZ_Joker_14_Joker1",
                "ZZ_ZZ_00_Card-Back",
                "Stars_00_Eleven"
            ]
        );
        assert!(plan.requests[0].prompt.contains("King of Spades"));
        assert_eq!(plan.skipped, keys(&["garbage"]));
    }

    #[test]
    fn successful_retry_writes_into_original_job_folder() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let service = FakeBatchService::default();
        service.script(
            vec!["JOB_STATE_SUCCEEDED"],
            Some(image_line("Spades_13_King")),
        );
        let ctx = context(&service, temp.path());

        let outcome = RetryController::default().run(
            &ctx,
            "batches/original",
            &style(),
            keys(&["Spades_13_King"]),
            &mut |_, _| true,
        )?;

        assert_eq!(outcome.rounds, 1);
        assert!(outcome.failed_keys.is_empty());
        assert_eq!(outcome.images_written, 1);
        assert!(temp
            .path()
            .join("card_images/original/Spades_13_King.png")
            .exists());
        assert!(temp.path().join("batch_output/deck_retry_1.jsonl").exists());
        Ok(())
    }

    #[test]
    fn failed_retry_job_keeps_failed_set_and_stops_at_max_rounds() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let service = FakeBatchService::default();
        for _ in 0..3 {
            service.script(vec!["JOB_STATE_FAILED"], None);
        }
        let ctx = context(&service, temp.path());
        let mut asked = Vec::new();

        let outcome = RetryController::new(2).run(
            &ctx,
            "batches/original",
            &style(),
            keys(&["Hearts_01_Ace", "Clubs_02_2"]),
            &mut |round, failed| {
                asked.push((round, failed.len()));
                true
            },
        )?;

        assert_eq!(outcome.rounds, 2);
        assert_eq!(outcome.failed_keys, keys(&["Hearts_01_Ace", "Clubs_02_2"]));
        assert_eq!(asked, vec![(1, 2), (2, 2)]);
        assert_eq!(service.state.borrow().jobs.len(), 2);
        Ok(())
    }

    #[test]
    fn declining_skips_all_rounds() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let service = FakeBatchService::default();
        let ctx = context(&service, temp.path());

        let outcome = RetryController::default().run(
            &ctx,
            "batches/original",
            &style(),
            keys(&["Hearts_01_Ace"]),
            &mut |_, _| false,
        )?;

        assert_eq!(outcome.rounds, 0);
        assert_eq!(outcome.failed_keys, keys(&["Hearts_01_Ace"]));
        assert!(service.state.borrow().jobs.is_empty());
        Ok(())
    }

    #[test]
    fn partial_retry_narrows_and_ignores_unrequested_keys() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let service = FakeBatchService::default();
        let results = [
            image_line("Hearts_01_Ace"),
            json!({ "key": "Clubs_02_2", "response": { "error": "blocked" } }).to_string(),
            json!({ "key": "Diamonds_03_3", "response": { "error": "stray" } }).to_string(),
        ]
        .join("\n");
        service.script(vec!["JOB_STATE_SUCCEEDED"], Some(results));
        let ctx = context(&service, temp.path());

        let outcome = RetryController::new(1).run(
            &ctx,
            "batches/original",
            &style(),
            keys(&["Hearts_01_Ace", "Clubs_02_2"]),
            &mut |_, _| true,
        )?;

        assert_eq!(outcome.failed_keys, keys(&["Clubs_02_2"]));
        Ok(())
    }

    #[test]
    fn upload_error_in_a_round_keeps_failed_set() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let service = FakeBatchService::default();
        service.state.borrow_mut().fail_upload = true;
        let ctx = context(&service, temp.path());
        let mut asked = 0;

        let outcome = RetryController::new(3).run(
            &ctx,
            "batches/original",
            &style(),
            keys(&["Hearts_01_Ace", "Clubs_02_2"]),
            &mut |_, _| {
                asked += 1;
                true
            },
        )?;

        assert_eq!(asked, 1);
        assert_eq!(outcome.rounds, 1);
        assert_eq!(outcome.failed_keys, keys(&["Hearts_01_Ace", "Clubs_02_2"]));
        assert_eq!(outcome.images_written, 0);
        assert!(service.state.borrow().jobs.is_empty());
        Ok(())
    }
}
