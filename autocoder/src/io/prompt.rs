//! Session instructions rendered from embedded templates.
//!
//! Templates mark their sections with `<!-- section:KEY required|droppable -->`.
//! When a rendered prompt exceeds its byte budget, droppable sections go first
//! (oldest context first), then the last section is truncated.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, context};
use tracing::debug;

use crate::core::ledger::LedgerSummary;

const INITIALIZER_TEMPLATE: &str = include_str!("prompts/initializer.md");
const CODING_TEMPLATE: &str = include_str!("prompts/coding.md");
const SYSTEM_PROMPT: &str = include_str!("prompts/system.md");

static SECTION_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
        .expect("valid section marker regex")
});

/// Drop order when over budget.
const DROP_ORDER: &[&str] = &["history", "notes", "next"];

/// The fixed system prompt appended to the agent's own.
pub fn system_prompt() -> &'static str {
    SYSTEM_PROMPT.trim()
}

/// Inputs for an initialization session.
#[derive(Debug, Clone)]
pub struct InitPromptInputs {
    pub project_dir: String,
    pub allowed_commands: Vec<String>,
    /// Set when an earlier initialization left a broken ledger behind.
    pub resume_reason: Option<String>,
}

/// Inputs for a continuation session.
#[derive(Debug, Clone)]
pub struct CodingPromptInputs {
    pub project_dir: String,
    pub allowed_commands: Vec<String>,
    pub summary: LedgerSummary,
    pub next_features: Vec<String>,
    pub notes_tail: Vec<String>,
    pub git_log: Option<String>,
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("initializer", INITIALIZER_TEMPLATE)
            .expect("initializer template should be valid");
        env.add_template("coding", CODING_TEMPLATE)
            .expect("coding template should be valid");
        Self { env }
    }

    fn render_initializer(&self, input: &InitPromptInputs) -> Result<String> {
        let template = self.env.get_template("initializer")?;
        let rendered = template.render(context! {
            project_dir => input.project_dir,
            allowed_commands => format_commands(&input.allowed_commands),
            resumed => input.resume_reason.is_some(),
            resume_reason => input.resume_reason.as_deref().unwrap_or_default(),
        })?;
        Ok(rendered)
    }

    fn render_coding(&self, input: &CodingPromptInputs) -> Result<String> {
        let template = self.env.get_template("coding")?;
        let notes = input.notes_tail.join("\n");
        let rendered = template.render(context! {
            project_dir => input.project_dir,
            allowed_commands => format_commands(&input.allowed_commands),
            summary => input.summary,
            percent => format!("{:.1}", input.summary.percent),
            next_features => input.next_features,
            notes => (!notes.trim().is_empty()).then(|| notes.trim().to_string()),
            git_log => input.git_log.as_deref().map(str::trim).filter(|s| !s.is_empty()),
        })?;
        Ok(rendered)
    }
}

fn format_commands(commands: &[String]) -> String {
    commands
        .iter()
        .map(|command| format!("`{command}`"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let matches: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::new();

    for (i, caps) in matches.iter().enumerate() {
        let (Some(marker), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = matches
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|next| next.start())
            .unwrap_or(rendered.len());
        let content = rendered[marker.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }

    sections
}

fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total_len =
        |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == *key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    if total_len(sections) <= budget {
        return;
    }
    let other_len: usize = sections
        .iter()
        .take(sections.len().saturating_sub(1))
        .map(|s| s.content.len())
        .sum();
    let allowed = budget.saturating_sub(other_len);
    if let Some(last) = sections.last_mut()
        && last.content.len() > allowed
    {
        let before_len = last.content.len();
        let keep = floor_char_boundary(&last.content, allowed.saturating_sub(12));
        last.content.truncate(keep);
        last.content.push_str("\n[truncated]");
        debug!(
            section = last.key,
            before_len,
            after_len = last.content.len(),
            "truncated section for budget"
        );
    }
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Builds session instructions within a byte budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build_initializer(&self, input: &InitPromptInputs) -> Result<String> {
        let rendered = PromptEngine::new().render_initializer(input)?;
        Ok(self.fit(&rendered))
    }

    pub fn build_coding(&self, input: &CodingPromptInputs) -> Result<String> {
        let rendered = PromptEngine::new().render_coding(input)?;
        Ok(self.fit(&rendered))
    }

    fn fit(&self, rendered: &str) -> String {
        let mut sections = parse_sections(rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        let mut out = render_sections(&sections);
        out.push('\n');
        out
    }
}
