//! Reading the agent's `stream-json` transcript.
//!
//! Each line is one JSON event. The harness only needs the final `result`
//! event and a count of tool calls; every other event is ignored, as are
//! lines that are not JSON.

use serde::Deserialize;
use serde_json::Value;

/// The terminal `{"type": "result"}` event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResultEvent {
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub num_turns: Option<u32>,
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub result: Option<String>,
}

impl ResultEvent {
    /// Human-readable failure reason for an error result.
    pub fn error_reason(&self) -> String {
        let subtype = self.subtype.as_deref().unwrap_or("error");
        match self.result.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
            Some(detail) => format!("agent reported {subtype}: {}", first_line(detail)),
            None => format!("agent reported {subtype}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscriptSummary {
    pub result: Option<ResultEvent>,
    pub tool_uses: usize,
    pub events: usize,
}

pub fn summarize(transcript: &str) -> TranscriptSummary {
    let mut summary = TranscriptSummary::default();
    for line in transcript.lines() {
        let Ok(event) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        summary.events += 1;
        match event.get("type").and_then(Value::as_str) {
            Some("assistant") => summary.tool_uses += count_tool_uses(&event),
            Some("result") => {
                if let Ok(result) = serde_json::from_value::<ResultEvent>(event) {
                    summary.result = Some(result);
                }
            }
            _ => {}
        }
    }
    summary
}

fn count_tool_uses(event: &Value) -> usize {
    event
        .pointer("/message/content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter(|block| block.get("type").and_then(Value::as_str) == Some("tool_use"))
                .count()
        })
        .unwrap_or(0)
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or(text)
}
