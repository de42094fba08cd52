//! Detail views opened from the sidebars
//!
//! Fetches run on a worker thread, so a response can arrive after the user has
//! already asked for something else. Each request carries a ticket and only
//! the latest ticket's response is shown.

use crate::annotate::{PopupKind, PopupTarget};
use crate::client::{ReviewBackend, ReviewId};
use crate::diff::{DiffEngine, DiffMode, RenderedDiff, RowKind};
use crate::index::{FileDisplayIndex, RegionHandle};
use anyhow::{Context, Result};
use std::sync::Arc;

/// Identifies one detail-view request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopupTicket(u64);

/// Hands out tickets; issuing a new one makes every older one stale
#[derive(Debug, Default)]
pub struct PopupRequests {
    generation: u64,
}

impl PopupRequests {
    pub fn issue(&mut self) -> PopupTicket {
        self.generation += 1;
        PopupTicket(self.generation)
    }

    /// Drop interest in whatever is in flight (popup closed)
    pub fn invalidate(&mut self) {
        self.generation += 1;
    }

    pub fn is_current(&self, ticket: &PopupTicket) -> bool {
        ticket.0 == self.generation
    }
}

/// Where the text of a detail view comes from
pub trait DetailSource: Send + Sync {
    fn fetch(&self, target: &PopupTarget) -> Result<String>;
}

/// Files served by the review backend
pub struct BackendDetails {
    backend: Arc<dyn ReviewBackend>,
    review: ReviewId,
}

impl BackendDetails {
    pub fn new(backend: Arc<dyn ReviewBackend>, review: ReviewId) -> Self {
        Self { backend, review }
    }
}

impl DetailSource for BackendDetails {
    fn fetch(&self, target: &PopupTarget) -> Result<String> {
        let text = match target.kind {
            PopupKind::Source => self.backend.file_source(self.review, &target.path),
            PopupKind::Diff => self.backend.file_diff(self.review, &target.path),
        };
        text.with_context(|| format!("Failed to load {}", target.path))
    }
}

/// Files of a local repository
pub struct LocalDetails {
    engine: DiffEngine,
    mode: DiffMode,
}

impl LocalDetails {
    pub fn new(engine: DiffEngine, mode: DiffMode) -> Self {
        Self { engine, mode }
    }
}

impl DetailSource for LocalDetails {
    fn fetch(&self, target: &PopupTarget) -> Result<String> {
        match target.kind {
            PopupKind::Source => self.engine.file_source(&self.mode, &target.path),
            PopupKind::Diff => self.engine.file_diff_text(&self.mode, &target.path),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailLine {
    pub kind: RowKind,
    pub old_line: Option<u32>,
    pub new_line: Option<u32>,
    pub text: String,
    /// Inside the requested line range
    pub relevant: bool,
}

/// Content of an open popup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailView {
    pub title: String,
    pub kind: PopupKind,
    pub lines: Vec<DetailLine>,
    /// Index of the first line to show
    pub scroll: usize,
}

/// First line to show: a few lines above the range when there is room
fn first_shown_line(start: u32, slack: u32) -> u32 {
    if start > slack {
        start - slack
    } else {
        start
    }
}

impl DetailView {
    /// Numbered source of an unchanged file
    pub fn source(text: &str, target: &PopupTarget, slack: u32) -> Self {
        let in_range = |n: u32| matches!(target.lines, Some((a, b)) if a <= n && n <= b);
        let lines = text
            .lines()
            .zip(1u32..)
            .map(|(line, n)| DetailLine {
                kind: RowKind::Context,
                old_line: Some(n),
                new_line: Some(n),
                text: line.to_string(),
                relevant: in_range(n),
            })
            .collect::<Vec<_>>();

        let scroll = match target.lines {
            Some((start, _)) => (first_shown_line(start, slack) as usize)
                .saturating_sub(1)
                .min(lines.len().saturating_sub(1)),
            None => 0,
        };

        Self {
            title: target.path.clone(),
            kind: PopupKind::Source,
            lines,
            scroll,
        }
    }

    /// Whole-file diff of a changed file, relevant rows matched on new-side lines
    pub fn diff(text: &str, target: &PopupTarget, slack: u32) -> Self {
        let rendered = RenderedDiff::from_text(text);
        let mut lines = Vec::new();
        for file in &rendered.files {
            let numbers = FileDisplayIndex::build(file, RegionHandle(0));
            for (row, shown) in file.rows.iter().zip(&numbers.lines) {
                let relevant = match (target.lines, shown.new) {
                    (Some((a, b)), Some(n)) => a <= n && n <= b,
                    _ => false,
                };
                lines.push(DetailLine {
                    kind: row.kind,
                    old_line: shown.old,
                    new_line: shown.new,
                    text: row.content.clone(),
                    relevant,
                });
            }
        }

        let scroll = target
            .lines
            .and_then(|(start, _)| {
                let first = first_shown_line(start, slack);
                lines.iter().position(|l| l.new_line == Some(first))
            })
            .unwrap_or(0);

        Self {
            title: format!("[✎] {}", target.path),
            kind: PopupKind::Diff,
            lines,
            scroll,
        }
    }

    pub fn build(text: &str, target: &PopupTarget, slack: u32) -> Self {
        match target.kind {
            PopupKind::Source => Self::source(text, target, slack),
            PopupKind::Diff => Self::diff(text, target, slack),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relevant_count(view: &DetailView) -> usize {
        view.lines.iter().filter(|l| l.relevant).count()
    }

    fn target(kind: PopupKind, lines: Option<(u32, u32)>) -> PopupTarget {
        PopupTarget {
            kind,
            path: "src/B.java".to_string(),
            lines,
        }
    }

    #[test]
    fn test_backend_details_route_by_kind() {
        let backend = Arc::new(crate::poll::tests::ScriptedBackend::new(Vec::new()));
        let details = BackendDetails::new(backend, ReviewId(3));

        assert_eq!(
            details.fetch(&target(PopupKind::Source, None)).unwrap(),
            "source of src/B.java"
        );
        assert_eq!(
            details.fetch(&target(PopupKind::Diff, Some((1, 2)))).unwrap(),
            "diff of src/B.java"
        );
    }

    #[test]
    fn test_newer_ticket_makes_older_stale() {
        let mut requests = PopupRequests::default();
        let first = requests.issue();
        assert!(requests.is_current(&first));

        let second = requests.issue();
        assert!(!requests.is_current(&first));
        assert!(requests.is_current(&second));

        requests.invalidate();
        assert!(!requests.is_current(&second));
    }

    #[test]
    fn test_source_view_marks_and_scrolls() {
        let text = (1..=20).map(|n| format!("line {}", n)).collect::<Vec<_>>().join("\n");
        let view = DetailView::source(&text, &target(PopupKind::Source, Some((10, 12))), 3);

        assert_eq!(view.title, "src/B.java");
        assert_eq!(view.lines.len(), 20);
        assert_eq!(relevant_count(&view), 3);
        assert!(view.lines[9].relevant);
        assert!(!view.lines[12].relevant);
        // line 7 is at index 6
        assert_eq!(view.scroll, 6);
    }

    #[test]
    fn test_source_view_near_top_keeps_start() {
        let view = DetailView::source("a\nb\nc\nd", &target(PopupKind::Source, Some((2, 2))), 3);
        assert_eq!(view.scroll, 1);

        let whole = DetailView::source("a\nb", &target(PopupKind::Source, None), 3);
        assert_eq!(whole.scroll, 0);
        assert_eq!(relevant_count(&whole), 0);
    }

    #[test]
    fn test_diff_view_matches_new_lines() {
        let text = "\
diff --git a/src/B.java b/src/B.java
--- a/src/B.java
+++ b/src/B.java
@@ -1,8 +1,8 @@
 one
 two
 three
 four
-five
+FIVE
 six
 seven
 eight
";
        let view = DetailView::diff(text, &target(PopupKind::Diff, Some((5, 6))), 3);

        assert_eq!(view.title, "[✎] src/B.java");
        assert_eq!(view.lines[0].kind, RowKind::HunkHeader);
        // deleted "five" has no new line and is not relevant
        assert_eq!(relevant_count(&view), 2);
        assert!(view.lines.iter().any(|l| l.relevant && l.text == "FIVE"));
        // new line 2 sits at row 2 after the header
        assert_eq!(view.scroll, 2);
    }
}
