//! Method-call facts
//!
//! A `MethodCall` links a call site in one file to the declaration it invokes.
//! Facts arrive either as JSON from the review backend or as the raw
//! semicolon-separated output of the extractor.

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

/// One extracted call-site → declaration relationship
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodCall {
    pub from_file: String,
    pub to_file: String,
    #[serde(deserialize_with = "lenient_line")]
    pub call_start_line: u32,
    #[serde(deserialize_with = "lenient_line")]
    pub call_end_line: u32,
    #[serde(deserialize_with = "lenient_line")]
    pub declaration_start_line: u32,
    #[serde(deserialize_with = "lenient_line")]
    pub declaration_end_line: u32,
    #[serde(rename = "short_method_qualifier")]
    pub short_qualifier: String,
    #[serde(rename = "full_method_qualifier")]
    pub full_qualifier: String,
    /// The call expression as written at the call site
    #[serde(rename = "method_call")]
    pub display_qualifier: String,
}

impl MethodCall {
    /// Whether `line` falls inside the declaration span
    pub fn declaration_contains(&self, line: u32) -> bool {
        self.declaration_start_line <= line && line <= self.declaration_end_line
    }

    pub fn declaration_span(&self) -> (u32, u32) {
        (self.declaration_start_line, self.declaration_end_line)
    }
}

// The backend stores line numbers straight from the extractor's text output,
// so they may come back as strings.
fn lenient_line<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Line {
        Number(u32),
        Text(String),
    }

    match Line::deserialize(deserializer)? {
        Line::Number(n) => Ok(n),
        Line::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid line number: {:?}", s))),
    }
}

#[derive(Deserialize)]
struct Envelope {
    data: Vec<serde_json::Value>,
}

/// Convert decoded JSON records one by one; records that don't fit are skipped
pub fn decode_calls(records: Vec<serde_json::Value>) -> Vec<MethodCall> {
    records
        .into_iter()
        .enumerate()
        .filter_map(|(i, record)| match serde_json::from_value(record) {
            Ok(call) => Some(call),
            Err(e) => {
                warn!(record = i, error = %e, "skipping malformed method call");
                None
            }
        })
        .collect()
}

/// Load call facts from file contents.
///
/// Accepts a JSON array, a backend response envelope (`{"data": [...]}`), or
/// extractor output with one call per line.
pub fn load_calls(text: &str) -> Result<Vec<MethodCall>> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        let records: Vec<serde_json::Value> =
            serde_json::from_str(trimmed).context("Failed to parse method calls JSON array")?;
        Ok(decode_calls(records))
    } else if trimmed.starts_with('{') {
        let envelope: Envelope =
            serde_json::from_str(trimmed).context("Failed to parse method calls response")?;
        Ok(decode_calls(envelope.data))
    } else {
        Ok(parse_extractor_output(text))
    }
}

const EXTRACTOR_FIELDS: usize = 13;
const ESCAPED_SEMICOLON: &str = "&%&";

/// Parse the extractor's semicolon-separated output.
///
/// Field order: origin file, call start line, start column, end line, end
/// column, call expression, signature, qualified signature, declaration file,
/// declaration start line, start column, end line, end column. Malformed lines
/// are skipped.
pub fn parse_extractor_output(text: &str) -> Vec<MethodCall> {
    let mut calls = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        match parse_extractor_line(line) {
            Some(call) => calls.push(call),
            None => warn!(line = line_no + 1, "skipping malformed extractor line"),
        }
    }
    calls
}

fn parse_extractor_line(line: &str) -> Option<MethodCall> {
    let fields: Vec<&str> = line.split(';').collect();
    if fields.len() != EXTRACTOR_FIELDS {
        return None;
    }
    let num = |i: usize| fields[i].trim().parse::<u32>().ok();

    Some(MethodCall {
        from_file: fields[0].to_string(),
        call_start_line: num(1)?,
        call_end_line: num(3)?,
        display_qualifier: fields[5].replace(ESCAPED_SEMICOLON, ";"),
        short_qualifier: fields[6].to_string(),
        full_qualifier: fields[7].to_string(),
        to_file: fields[8].to_string(),
        declaration_start_line: num(9)?,
        declaration_end_line: num(11)?,
    })
}
