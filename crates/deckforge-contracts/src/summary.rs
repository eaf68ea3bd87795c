use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardStatus {
    Success,
    Failed,
}

/// Per-card row of a local generation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardOutcome {
    pub card: String,
    pub key: String,
    pub filename: String,
    pub status: CardStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Contents of `batch_results.json` for a local run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalRunSummary {
    pub timestamp: String,
    pub theme: String,
    pub technique: String,
    pub background: String,
    pub device: String,
    pub pipeline: String,
    pub total_cards: usize,
    pub completed: usize,
    pub failed: usize,
    pub interrupted: bool,
    pub total_time: String,
    pub avg_time_per_card: String,
    pub cards: Vec<CardOutcome>,
}

pub fn write_summary(path: &Path, summary: &LocalRunSummary) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(summary)?)?;
    Ok(())
}

pub fn read_summary(path: &Path) -> anyhow::Result<LocalRunSummary> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// `"3m 7s"` style duration used in summaries and the ETA line.
pub fn format_minutes_seconds(seconds: f64) -> String {
    let whole = seconds.max(0.0) as u64;
    format!("{}m {}s", whole / 60, whole % 60)
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    #[test]
    fn summary_round_trips_and_omits_empty_fields() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("batch_results.json");
        let summary = LocalRunSummary {
            timestamp: "2026-02-19T00:00:00+00:00".to_string(),
            theme: "Pirates".to_string(),
            technique: "etching".to_string(),
            background: "parchment".to_string(),
            device: "cpu".to_string(),
            pipeline: "dryrun".to_string(),
            total_cards: 2,
            completed: 1,
            failed: 1,
            interrupted: false,
            total_time: "0m 3s".to_string(),
            avg_time_per_card: "3.00s".to_string(),
            cards: vec![
                CardOutcome {
                    card: "Ace of Hearts".to_string(),
                    key: "Hearts_01_Ace".to_string(),
                    filename: "Hearts_01_Ace.png".to_string(),
                    status: CardStatus::Success,
                    time: Some("3.00s".to_string()),
                    error: None,
                },
                CardOutcome {
                    card: "Card Back".to_string(),
                    key: "ZZ_ZZ_00_Card-Back".to_string(),
                    filename: "ZZ_ZZ_00_Card-Back.png".to_string(),
                    status: CardStatus::Failed,
                    time: None,
                    error: Some("out of memory".to_string()),
                },
            ],
        };
        write_summary(&path, &summary)?;

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(raw["cards"][0]["status"], json!("success"));
        assert!(raw["cards"][0].get("error").is_none());
        assert_eq!(raw["cards"][1]["error"], json!("out of memory"));

        assert_eq!(read_summary(&path)?, summary);
        Ok(())
    }

    #[test]
    fn durations_render_as_minutes_and_seconds() {
        assert_eq!(format_minutes_seconds(0.4), "0m 0s");
        assert_eq!(format_minutes_seconds(187.9), "3m 7s");
        assert_eq!(format_minutes_seconds(-5.0), "0m 0s");
    }
}
