use serde_json::{json, Map, Value};

/// Dollars per million prompt + candidate tokens.
pub const TOKEN_RATE_PER_MILLION_USD: f64 = 0.15;
/// Dollars per generated image.
pub const IMAGE_RATE_USD: f64 = 0.0195;

/// Running token and image totals for one extraction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CostTracker {
    pub prompt_tokens: u64,
    pub candidates_tokens: u64,
    pub images: u64,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `promptTokenCount` / `candidatesTokenCount` from a `usageMetadata`
    /// object; missing or non-numeric counters count as zero.
    pub fn add_usage(&mut self, usage: &Value) {
        self.prompt_tokens += token_count(usage, "promptTokenCount");
        self.candidates_tokens += token_count(usage, "candidatesTokenCount");
    }

    pub fn add_image(&mut self) {
        self.images += 1;
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.candidates_tokens
    }

    pub fn token_cost(&self) -> f64 {
        self.total_tokens() as f64 / 1_000_000.0 * TOKEN_RATE_PER_MILLION_USD
    }

    pub fn image_cost(&self) -> f64 {
        self.images as f64 * IMAGE_RATE_USD
    }

    pub fn total_cost(&self) -> f64 {
        self.token_cost() + self.image_cost()
    }

    pub fn merge(&mut self, other: &CostTracker) {
        self.prompt_tokens += other.prompt_tokens;
        self.candidates_tokens += other.candidates_tokens;
        self.images += other.images;
    }

    pub fn to_event_payload(&self) -> Map<String, Value> {
        let value = json!({
            "prompt_tokens": self.prompt_tokens,
            "candidates_tokens": self.candidates_tokens,
            "total_tokens": self.total_tokens(),
            "images": self.images,
            "token_cost_usd": self.token_cost(),
            "image_cost_usd": self.image_cost(),
            "total_cost_usd": self.total_cost(),
        });
        value.as_object().cloned().unwrap_or_default()
    }

    /// Printable cost table.
    pub fn render_summary(&self, failed: usize) -> String {
        let rule = "─".repeat(60);
        let mut lines = vec![
            String::new(),
            rule.clone(),
            "  COST SUMMARY".to_string(),
            rule.clone(),
            format!("  Prompt Tokens:      {}", group_thousands(self.prompt_tokens)),
            format!(
                "  Candidates Tokens:  {}",
                group_thousands(self.candidates_tokens)
            ),
            format!("  Total Tokens:       {}", group_thousands(self.total_tokens())),
            format!("  Images Generated:   {}", self.images),
        ];
        if failed > 0 {
            lines.push(format!("  Failed/Missing:     {failed}"));
        }
        lines.push(rule.clone());
        lines.push(format!("  Token Cost:         ${:.4}", self.token_cost()));
        lines.push(format!("  Image Cost:         ${:.4}", self.image_cost()));
        lines.push(format!("  {}", "─".repeat(29)));
        lines.push(format!("  TOTAL COST:         ${:.4}", self.total_cost()));
        lines.push(rule);
        lines.join("\n")
    }
}

fn token_count(usage: &Value, field: &str) -> u64 {
    usage.get(field).and_then(Value::as_u64).unwrap_or(0)
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
