//! Alignment of method calls to displayed diff rows
//!
//! Callees are grouped by the displayed new-side line a call starts on.
//! Callers are grouped by declaration: every run of displayed rows that lies
//! inside one declaration span becomes a single range, even when hunk headers
//! or deleted lines interrupt it on screen.

use crate::calls::MethodCall;
use crate::index::{DisplayedLine, FileDisplayIndex, FileIndex, RegionHandle};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Calls starting on one displayed line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalleeGroup {
    pub new_line: u32,
    pub calls: Vec<MethodCall>,
}

/// Displayed rows `start_index..=end_index` covered by one declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallerRange {
    pub start_index: usize,
    pub end_index: usize,
    pub calls: Vec<MethodCall>,
}

/// Everything to draw in the sidebars of one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrganizedFile {
    pub path: String,
    #[serde(skip)]
    pub region: RegionHandle,
    pub callees: Vec<CalleeGroup>,
    pub callers: Vec<CallerRange>,
}

impl OrganizedFile {
    pub fn is_empty(&self) -> bool {
        self.callees.is_empty() && self.callers.is_empty()
    }
}

/// Organized calls keyed by file path
pub type Organized = BTreeMap<String, OrganizedFile>;

/// Group the calls made from `path` by the displayed line they start on
pub fn align_callees(path: &str, file: &FileDisplayIndex, calls: &[MethodCall]) -> Vec<CalleeGroup> {
    let outgoing: Vec<&MethodCall> = calls.iter().filter(|c| c.from_file == path).collect();
    if outgoing.is_empty() {
        return Vec::new();
    }

    file.new_lines()
        .filter_map(|new_line| {
            let on_line: Vec<MethodCall> = outgoing
                .iter()
                .filter(|c| c.call_start_line == new_line)
                .map(|c| (*c).clone())
                .collect();
            (!on_line.is_empty()).then_some(CalleeGroup {
                new_line,
                calls: on_line,
            })
        })
        .collect()
}

/// Merge displayed rows into one range per declaration located in `path`
pub fn merge_caller_ranges(
    path: &str,
    file: &FileDisplayIndex,
    calls: &[MethodCall],
) -> Vec<CallerRange> {
    let incoming: Vec<&MethodCall> = calls.iter().filter(|c| c.to_file == path).collect();
    if incoming.is_empty() {
        return Vec::new();
    }

    let lines = &file.lines;
    let mut ranges = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        // No declaration starts on a header or deletion row
        let Some(n) = lines[i].new else {
            i += 1;
            continue;
        };

        let matches: Vec<&MethodCall> = incoming
            .iter()
            .copied()
            .filter(|c| c.declaration_contains(n))
            .collect();
        let Some(first) = matches.first() else {
            i += 1;
            continue;
        };

        let span = first.declaration_span();
        if matches.iter().any(|c| c.declaration_span() != span) {
            debug!(
                path,
                line = n,
                "overlapping declarations, using span {}-{}",
                span.0,
                span.1
            );
        }

        let start_index = i;
        let end_index = extend_range(lines, i, span);
        ranges.push(CallerRange {
            start_index,
            end_index,
            calls: matches.into_iter().cloned().collect(),
        });
        i = end_index + 1;
    }

    ranges
}

/// Last display index of the range opened at `start`.
///
/// Rows without a new-side line are bridged only when the next row that has
/// one is still inside `span`.
fn extend_range(lines: &[DisplayedLine], start: usize, span: (u32, u32)) -> usize {
    let within = |n: u32| span.0 <= n && n <= span.1;
    let mut end = start;
    let mut i = start + 1;

    while i < lines.len() {
        match lines[i].new {
            Some(n) if within(n) => {
                end = i;
                i += 1;
            }
            Some(_) => break,
            None => {
                let next_present = (i + 1..lines.len()).find(|&j| lines[j].new.is_some());
                match next_present {
                    Some(j) if lines[j].new.is_some_and(within) => {
                        end = j;
                        i = j + 1;
                    }
                    _ => break,
                }
            }
        }
    }

    end
}

/// Align every call against every indexed file.
///
/// Files with nothing to show are left out. Calls whose files are not part of
/// the diff only appear as members of groups of files that are.
pub fn organize(calls: &[MethodCall], index: &FileIndex) -> Organized {
    let mut organized = Organized::new();

    for file in index.iter() {
        let entry = OrganizedFile {
            path: file.path.clone(),
            region: file.region,
            callees: align_callees(&file.path, file, calls),
            callers: merge_caller_ranges(&file.path, file, calls),
        };
        if entry.is_empty() {
            trace!(path = %file.path, "no calls aligned");
            continue;
        }
        organized.insert(file.path.clone(), entry);
    }

    debug!(
        files = organized.len(),
        calls = calls.len(),
        "organized method calls"
    );
    organized
}
