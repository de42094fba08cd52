//! Export of an annotated review
//!
//! Markdown for reading, JSON for programmatic consumption.

use crate::annotate::{FileSidebars, LabelWidths, SidebarEntry};
use crate::index::FileDisplayIndex;
use crate::session::ReviewSession;
use anyhow::Result;
use serde::Serialize;

/// Export format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Markdown,
    Json,
}

impl ExportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "md" | "markdown" => Some(Self::Markdown),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// New-side lines shown between two display rows
fn displayed_lines(file: &FileDisplayIndex, start: usize, end: usize) -> Option<(u32, u32)> {
    let rows = file.lines.get(start..=end)?;
    let first = rows.iter().find_map(|l| l.new)?;
    let last = rows.iter().rev().find_map(|l| l.new)?;
    Some((first, last))
}

fn entry_line(entry: &SidebarEntry) -> String {
    let marker = if entry.modified { " [✎]" } else { "" };
    let first_line = entry.tooltip.lines().next().unwrap_or_default();
    let detail = entry.tooltip.lines().last().unwrap_or_default();
    format!("  - `{}`, {}{}\n", detail, first_line, marker)
}

/// Exports the review in markdown format
pub fn export_markdown(session: &ReviewSession, widths: LabelWidths) -> String {
    if session.organized.is_empty() {
        return format!("# {}\n\nNo method calls in the displayed lines\n", session.title());
    }

    let mut output = format!("# Call map: {}\n\n", session.title());

    for path in session.organized.keys() {
        let (Some(file), Some(sidebars)) = (session.file_index(path), session.sidebars(path, widths))
        else {
            continue;
        };
        output.push_str(&format!("## {}\n\n", path));

        if !sidebars.callers.is_empty() {
            output.push_str("### Called from\n\n");
            for block in &sidebars.callers {
                let lines = match displayed_lines(file, block.start_index, block.end_index) {
                    Some((a, b)) if a == b => format!("L{}", a),
                    Some((a, b)) => format!("L{}-{}", a, b),
                    None => "?".to_string(),
                };
                output.push_str(&format!(
                    "- {} (rows {}-{})\n",
                    lines, block.start_index, block.end_index
                ));
                for entry in &block.entries {
                    output.push_str(&entry_line(entry));
                }
            }
            output.push('\n');
        }

        if !sidebars.callees.is_empty() {
            output.push_str("### Calls\n\n");
            for cell in &sidebars.callees {
                output.push_str(&format!("- L{}\n", cell.new_line));
                for entry in &cell.entries {
                    output.push_str(&entry_line(entry));
                }
            }
            output.push('\n');
        }
    }

    output
}

#[derive(Serialize)]
struct ExportReview {
    title: String,
    pull_request: Option<String>,
    review_id: Option<i64>,
    call_count: usize,
    files: Vec<FileSidebars>,
}

/// Exports the review as JSON
pub fn export_json(session: &ReviewSession, widths: LabelWidths) -> Result<String> {
    let export = ExportReview {
        title: session.title(),
        pull_request: session.pr.as_ref().map(|pr| pr.url.clone()),
        review_id: session.review_id.map(|id| id.0),
        call_count: session.calls.len(),
        files: session
            .organized
            .keys()
            .filter_map(|path| session.sidebars(path, widths))
            .collect(),
    };

    serde_json::to_string_pretty(&export).map_err(Into::into)
}

/// Main export function that handles format selection
pub fn export(session: &ReviewSession, format: ExportFormat, widths: LabelWidths) -> Result<String> {
    match format {
        ExportFormat::Markdown => Ok(export_markdown(session, widths)),
        ExportFormat::Json => export_json(session, widths),
    }
}
