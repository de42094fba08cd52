//! Sidebar annotations
//!
//! Turns organized calls into what the sidebars show: a two-line label per
//! call, a tooltip, and where a click leads. A call into a file that is part
//! of the change set opens that file's diff; anything else opens plain source.

use crate::align::{CalleeGroup, CallerRange, OrganizedFile};
use crate::calls::MethodCall;
use crate::index::{FileDisplayIndex, FileIndex};
use serde::Serialize;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

const MODIFIED_PREFIX: &str = "✎ ";
const QUALIFIER_PREFIX: &str = "└ ";
const ELLIPSIS: &str = "..";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PopupKind {
    /// The file changed in this pull request: show its diff
    Diff,
    /// Unchanged file: show its source
    Source,
}

/// What a click on an annotation opens
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PopupTarget {
    pub kind: PopupKind,
    pub path: String,
    /// Inclusive new-side line range to highlight
    pub lines: Option<(u32, u32)>,
}

impl PopupTarget {
    pub fn for_file(path: &str, index: &FileIndex, lines: Option<(u32, u32)>) -> Self {
        let kind = if index.contains(path) {
            PopupKind::Diff
        } else {
            PopupKind::Source
        };
        Self {
            kind,
            path: path.to_string(),
            lines,
        }
    }
}

/// One call as shown in a sidebar
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SidebarEntry {
    pub upper: String,
    pub lower: String,
    pub tooltip: String,
    /// The other end of the call is modified in this pull request
    pub modified: bool,
    pub target: PopupTarget,
}

/// Maximum label widths, in terminal columns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelWidths {
    pub caller: usize,
    pub callee: usize,
}

impl Default for LabelWidths {
    fn default() -> Self {
        Self {
            caller: 27,
            callee: 29,
        }
    }
}

/// Callers of one declaration, drawn across its displayed rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallerBlock {
    pub start_index: usize,
    pub end_index: usize,
    /// Starts on the first displayed row of the file
    pub at_top: bool,
    /// Ends on the last displayed row of the file
    pub at_bottom: bool,
    pub entries: Vec<SidebarEntry>,
}

/// Callees of one displayed line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalleeCell {
    pub new_line: u32,
    pub entries: Vec<SidebarEntry>,
}

/// Both sidebars of one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSidebars {
    pub path: String,
    /// Opened from the file header
    pub header: PopupTarget,
    pub callers: Vec<CallerBlock>,
    pub callees: Vec<CalleeCell>,
}

impl FileSidebars {
    pub fn build(
        organized: &OrganizedFile,
        file: &FileDisplayIndex,
        index: &FileIndex,
        widths: LabelWidths,
    ) -> Self {
        Self {
            path: organized.path.clone(),
            header: file_header_target(file),
            callers: organized
                .callers
                .iter()
                .map(|r| caller_block(r, file.lines.len(), index, widths.caller))
                .collect(),
            callees: organized
                .callees
                .iter()
                .map(|g| callee_cell(g, index, widths.callee))
                .collect(),
        }
    }

    pub fn caller_block_at(&self, index: usize) -> Option<&CallerBlock> {
        self.callers
            .iter()
            .find(|b| b.start_index <= index && index <= b.end_index)
    }

    pub fn callee_cell_at(&self, new_line: u32) -> Option<&CalleeCell> {
        self.callees.iter().find(|c| c.new_line == new_line)
    }
}

/// The whole diff of a file, highlighting every displayed new-side line
pub fn file_header_target(file: &FileDisplayIndex) -> PopupTarget {
    PopupTarget {
        kind: PopupKind::Diff,
        path: file.path.clone(),
        lines: file.new_line_bounds(),
    }
}

fn caller_block(range: &CallerRange, row_count: usize, index: &FileIndex, width: usize) -> CallerBlock {
    CallerBlock {
        start_index: range.start_index,
        end_index: range.end_index,
        at_top: range.start_index == 0,
        at_bottom: range.end_index + 1 == row_count,
        entries: range
            .calls
            .iter()
            .map(|c| caller_entry(c, index, width))
            .collect(),
    }
}

fn callee_cell(group: &CalleeGroup, index: &FileIndex, width: usize) -> CalleeCell {
    CalleeCell {
        new_line: group.new_line,
        entries: group
            .calls
            .iter()
            .map(|c| callee_entry(c, index, width))
            .collect(),
    }
}

/// Entry for the left sidebar: where the declaration is called from
pub fn caller_entry(call: &MethodCall, index: &FileIndex, max: usize) -> SidebarEntry {
    let target = PopupTarget::for_file(
        &call.from_file,
        index,
        Some((call.call_start_line, call.call_end_line)),
    );
    let modified = target.kind == PopupKind::Diff;
    let line = call.call_start_line.to_string();
    let name = file_label(&call.from_file, modified);
    let name_budget = max.saturating_sub(line.len() + 2);

    SidebarEntry {
        upper: format!("{}:L{}", truncate(&name, name_budget), line),
        lower: truncate(&format!("{}{}", QUALIFIER_PREFIX, call.display_qualifier), max),
        tooltip: format!(
            "In {}:L{}\n\n{}",
            call.from_file, call.call_start_line, call.display_qualifier
        ),
        modified,
        target,
    }
}

/// Entry for the right sidebar: which declaration a line calls into
pub fn callee_entry(call: &MethodCall, index: &FileIndex, max: usize) -> SidebarEntry {
    let target = PopupTarget::for_file(
        &call.to_file,
        index,
        Some((call.declaration_start_line, call.declaration_end_line)),
    );
    let modified = target.kind == PopupKind::Diff;
    let lines = format!(
        "L{}-{}",
        call.declaration_start_line, call.declaration_end_line
    );
    let name = file_label(&call.to_file, modified);
    let name_budget = max.saturating_sub(lines.len() + 1);

    SidebarEntry {
        upper: format!("{}:{}", truncate(&name, name_budget), lines),
        lower: truncate(&format!("{}{}", QUALIFIER_PREFIX, call.short_qualifier), max),
        tooltip: format!(
            "In {}:{}\n\n{}",
            call.to_file, lines, call.full_qualifier
        ),
        modified,
        target,
    }
}

fn file_label(path: &str, modified: bool) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    if modified {
        format!("{}{}", MODIFIED_PREFIX, name)
    } else {
        name.to_string()
    }
}

/// Cut `text` to `max` columns, ending in `..` when shortened
pub fn truncate(text: &str, max: usize) -> String {
    if text.width() <= max {
        return text.to_string();
    }
    let budget = max.saturating_sub(ELLIPSIS.len());
    let mut out = String::new();
    let mut used = 0;
    for c in text.chars() {
        let w = c.width().unwrap_or(0);
        if used + w > budget {
            break;
        }
        used += w;
        out.push(c);
    }
    out.push_str(ELLIPSIS);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::organize;
    use crate::calls::tests::call;
    use crate::index::{DisplayedLine, RegionHandle};

    fn index_with(paths: &[&str]) -> FileIndex {
        let mut index = FileIndex::default();
        for (i, p) in paths.iter().enumerate() {
            index.insert(FileDisplayIndex {
                path: p.to_string(),
                lines: (5..=7)
                    .map(|n| DisplayedLine {
                        old: Some(n),
                        new: Some(n),
                    })
                    .collect(),
                region: RegionHandle(i),
            });
        }
        index
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("exactly-10", 10), "exactly-10");
        assert_eq!(truncate("a-bit-too-long", 10), "a-bit-to..");
        assert_eq!(truncate("└ x", 3), "└ x");
        assert_eq!(truncate("anything", 1), "..");
    }

    #[test]
    fn test_popup_routing_follows_change_set() {
        let index = index_with(&["src/A.java"]);
        let outgoing = call("src/A.java", 6, "lib/B.java", (20, 30));
        let into_self = call("src/A.java", 6, "src/A.java", (5, 7));

        let unchanged = callee_entry(&outgoing, &index, 29);
        assert!(!unchanged.modified);
        assert_eq!(unchanged.target.kind, PopupKind::Source);
        assert_eq!(unchanged.target.path, "lib/B.java");
        assert_eq!(unchanged.target.lines, Some((20, 30)));

        let changed = callee_entry(&into_self, &index, 29);
        assert!(changed.modified);
        assert_eq!(changed.target.kind, PopupKind::Diff);
    }

    #[test]
    fn test_callee_labels() {
        let index = index_with(&["src/A.java"]);
        let c = call("src/A.java", 6, "lib/B.java", (20, 30));
        let entry = callee_entry(&c, &index, 29);

        assert_eq!(entry.upper, "B.java:L20-30");
        assert_eq!(entry.lower, "└ m20()");
        assert_eq!(entry.tooltip, "In lib/B.java:L20-30\n\npkg.Type.m20()");
    }

    #[test]
    fn test_caller_labels_are_truncated() {
        let index = index_with(&["src/VeryLongControllerName.java"]);
        let mut c = call("src/VeryLongControllerName.java", 120, "A.java", (5, 7));
        c.display_qualifier = "controller.handleIncomingRequest(request)".to_string();
        let entry = caller_entry(&c, &index, 27);

        // 27 - len("120") - 2 = 22 columns for the name, "✎" counting as one
        assert_eq!(entry.upper, "✎ VeryLongController..:L120");
        assert_eq!(entry.lower.width(), 27);
        assert!(entry.lower.starts_with("└ controller."));
        assert!(entry.lower.ends_with(".."));
        assert_eq!(entry.target.lines, Some((120, 120)));
    }

    #[test]
    fn test_sidebars_for_organized_file() {
        let index = index_with(&["A.java"]);
        let calls = vec![
            call("A.java", 6, "B.java", (20, 30)),
            call("C.java", 1, "A.java", (5, 7)),
        ];
        let organized = organize(&calls, &index);
        let file = index.get("A.java").unwrap();
        let sidebars = FileSidebars::build(&organized["A.java"], file, &index, LabelWidths::default());

        assert_eq!(sidebars.header.lines, Some((5, 7)));
        assert_eq!(sidebars.callers.len(), 1);
        let block = &sidebars.callers[0];
        assert!(block.at_top && block.at_bottom);
        assert!(!block.entries[0].modified);
        assert_eq!(block.entries[0].upper, "C.java:L1");
        assert!(sidebars.caller_block_at(1).is_some());
        assert_eq!(sidebars.callee_cell_at(6).unwrap().entries.len(), 1);
        assert!(sidebars.callee_cell_at(5).is_none());
    }
}
