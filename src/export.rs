//! Export the conversation as Markdown, HTML, or a reloadable JSON snapshot.
//!
//! JSON snapshots carry the system prompt and usage totals alongside the
//! messages; [`load_json`] reads the messages back for `/load`.

use chrono::{DateTime, Local};
use pulldown_cmark::{html, Event, Parser};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::error::ExportError;
use crate::models::{ContentPart, ConversationMessage, MessageContent};
use crate::usage::{Pricing, UsageAccumulator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Markdown,
    Html,
    Json,
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "markdown" | "md" => Ok(ExportFormat::Markdown),
            "html" => Ok(ExportFormat::Html),
            "json" => Ok(ExportFormat::Json),
            other => Err(ExportError::UnknownFormat(other.to_string())),
        }
    }
}

/// What an export needs from the session.
pub struct ExportInput<'a> {
    pub history: &'a [ConversationMessage],
    pub system_prompt: &'a str,
    pub usage: &'a UsageAccumulator,
    pub pricing: &'a Pricing,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub export_time: String,
    #[serde(default)]
    pub system_prompt: String,
    pub conversation: Vec<ConversationMessage>,
    #[serde(default)]
    pub statistics: Statistics,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Statistics {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cache_creation_tokens: u64,
    pub total_cache_read_tokens: u64,
    pub total_cost: f64,
}

/// Render `input` in `format` and write it to `path`.
pub fn write(path: &Path, format: ExportFormat, input: &ExportInput<'_>) -> Result<(), ExportError> {
    let now = Local::now();
    let rendered = match format {
        ExportFormat::Markdown => to_markdown(input.history, now),
        ExportFormat::Html => to_html(input.history, now),
        ExportFormat::Json => to_json(input, now)?,
    };
    std::fs::write(path, rendered).map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn to_markdown(history: &[ConversationMessage], exported_at: DateTime<Local>) -> String {
    let mut out = String::from("# Conversation Export\n\n");
    out.push_str(&format!(
        "Exported: {}\n\n---\n\n",
        exported_at.format("%Y-%m-%d %H:%M:%S")
    ));

    for msg in history {
        out.push_str(&format!("## {}\n\n", msg.role.label()));
        for block in blocks(&msg.content) {
            match block {
                Block::Text(text) => out.push_str(&format!("{}\n\n", text)),
                Block::Image => out.push_str("[image]\n\n"),
            }
        }
    }
    out
}

const HTML_STYLE: &str = "\
body { font-family: Arial, sans-serif; background-color: #1e1e1e; color: #d4d4d4; max-width: 800px; margin: 0 auto; padding: 20px; }
.message { margin: 20px 0; padding: 15px; border-radius: 8px; }
.user { background-color: #2d3748; }
.assistant { background-color: #1a202c; }
.role { font-weight: bold; margin-bottom: 10px; }
code { background-color: #2d2d2d; padding: 2px 4px; border-radius: 3px; font-family: 'Courier New', monospace; }
pre { background-color: #2d2d2d; padding: 10px; border-radius: 5px; overflow-x: auto; }
";

pub fn to_html(history: &[ConversationMessage], exported_at: DateTime<Local>) -> String {
    let mut out = String::new();
    out.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"UTF-8\">\n");
    out.push_str("<title>Conversation Export</title>\n<style>\n");
    out.push_str(HTML_STYLE);
    out.push_str("</style>\n</head>\n<body>\n<h1>Conversation Export</h1>\n");
    out.push_str(&format!(
        "<p>Exported: {}</p>\n<hr>\n",
        exported_at.format("%Y-%m-%d %H:%M:%S")
    ));

    for msg in history {
        out.push_str(&format!(
            "<div class=\"message {}\">\n<div class=\"role\">{}</div>\n",
            msg.role.as_str(),
            msg.role.label()
        ));
        for block in blocks(&msg.content) {
            match block {
                Block::Text(text) => {
                    out.push_str("<div>");
                    html::push_html(&mut out, escape_raw_html(Parser::new(text)));
                    out.push_str("</div>\n");
                }
                Block::Image => out.push_str("<div>[image]</div>\n"),
            }
        }
        out.push_str("</div>\n");
    }

    out.push_str("</body>\n</html>\n");
    out
}

/// Raw HTML in message text is shown, not interpreted.
fn escape_raw_html<'a>(parser: Parser<'a, 'a>) -> impl Iterator<Item = Event<'a>> {
    parser.map(|event| match event {
        Event::Html(raw) => Event::Text(raw),
        other => other,
    })
}

fn to_json(input: &ExportInput<'_>, exported_at: DateTime<Local>) -> Result<String, ExportError> {
    let snapshot = Snapshot {
        export_time: exported_at.to_rfc3339(),
        system_prompt: input.system_prompt.to_string(),
        conversation: input.history.to_vec(),
        statistics: Statistics {
            total_input_tokens: input.usage.input_tokens,
            total_output_tokens: input.usage.output_tokens,
            total_cache_creation_tokens: input.usage.cache_write_tokens,
            total_cache_read_tokens: input.usage.cache_read_tokens,
            total_cost: input.usage.cost(input.pricing),
        },
    };
    Ok(serde_json::to_string_pretty(&snapshot)?)
}

/// Read a JSON snapshot and return its conversation.
pub fn load_json(path: &Path) -> Result<Vec<ConversationMessage>, ExportError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let snapshot: Snapshot = serde_json::from_str(&raw)?;
    Ok(snapshot.conversation)
}

enum Block<'a> {
    Text(&'a str),
    Image,
}

fn blocks(content: &MessageContent) -> Vec<Block<'_>> {
    match content {
        MessageContent::Text(text) => vec![Block::Text(text)],
        MessageContent::Parts(parts) => parts
            .iter()
            .map(|p| match p {
                ContentPart::Text { text } => Block::Text(text),
                ContentPart::Image { .. } => Block::Image,
            })
            .collect(),
    }
}
