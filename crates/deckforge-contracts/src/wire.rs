//! Line-delimited JSON request format accepted by the batch endpoint.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::deck::{build_prompt, CardDescriptor, DeckStyle};

/// One card to generate: its deck key and the prompt text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardRequest {
    pub key: String,
    pub prompt: String,
}

impl CardRequest {
    pub fn for_card(card: &CardDescriptor, style: &DeckStyle) -> Self {
        Self {
            key: card.key(),
            prompt: build_prompt(card, style),
        }
    }

    pub fn to_line(&self) -> BatchRequestLine {
        BatchRequestLine {
            key: self.key.clone(),
            request: GenerateContentRequest {
                contents: vec![Content {
                    parts: vec![TextPart {
                        text: self.prompt.clone(),
                    }],
                }],
                generation_config: GenerationConfig::default(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequestLine {
    pub key: String,
    pub request: GenerateContentRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    pub generation_config: GenerationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(rename = "responseModalities")]
    pub response_modalities: Vec<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            response_modalities: vec!["TEXT".to_string(), "IMAGE".to_string()],
        }
    }
}

pub fn build_requests(cards: &[CardDescriptor], style: &DeckStyle) -> Vec<CardRequest> {
    cards
        .iter()
        .map(|card| CardRequest::for_card(card, style))
        .collect()
}

pub fn encode_jsonl(requests: &[CardRequest]) -> anyhow::Result<String> {
    let mut out = String::new();
    for request in requests {
        let line = serde_json::to_string(&request.to_line())
            .with_context(|| format!("failed to encode request {}", request.key))?;
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

pub fn write_jsonl(path: &Path, requests: &[CardRequest]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, encode_jsonl(requests)?)
        .with_context(|| format!("failed to write {}", path.display()))
}
