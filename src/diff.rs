//! Unified diff parsing and display rows
//!
//! Parses `git diff` style text (a pull-request diff from GitHub, a per-file
//! diff from the review backend, or a local `git diff`) and lays every file out
//! as the rows a reader sees: one header row per hunk, then one row per line.

use anyhow::{Context, Result};
use git2::Repository;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Marker placed between old and new path in the display name of a renamed file
pub const RENAME_MARKER: char = '→';

const WHOLE_FILE_CONTEXT: u32 = 99_999_999;

/// What to compare when diffing a local repository
#[derive(Debug, Clone)]
pub enum DiffMode {
    /// Working tree vs index (unstaged changes) - `git diff`
    Unstaged,
    /// Index vs HEAD (staged changes) - `git diff --staged`
    Staged,
    /// Between two commits - `git diff <from>..<to>`
    Commits { from: String, to: String },
}

impl DiffMode {
    /// Short human readable label, used as the session title
    pub fn label(&self) -> String {
        match self {
            Self::Unstaged => "working tree".to_string(),
            Self::Staged => "staged changes".to_string(),
            Self::Commits { from, to } => format!("{}..{}", from, to),
        }
    }
}

/// Represents a changed file in a diff
#[derive(Debug, Clone)]
pub struct DiffFile {
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub status: FileStatus,
    pub hunks: Vec<DiffHunk>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Added,
    Deleted,
    Modified,
    Renamed,
    Copied,
}

/// A hunk of changes within a file
#[derive(Debug, Clone)]
pub struct DiffHunk {
    /// The raw `@@ ... @@` line as it appeared in the diff
    pub header_line: String,
    pub lines: Vec<DiffLine>,
}

/// A single line in a diff
#[derive(Debug, Clone)]
pub struct DiffLine {
    pub kind: LineKind,
    pub old_line_no: Option<u32>,
    pub new_line_no: Option<u32>,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Context,
    Addition,
    Deletion,
}

/// Kind of a displayed row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    HunkHeader,
    Context,
    Addition,
    Deletion,
}

/// One displayed row of a file.
///
/// Line numbers are kept as the text of their cells, exactly what the viewer
/// prints in the gutter. Empty text means the side has no line on this row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayRow {
    pub kind: RowKind,
    pub old_cell: String,
    pub new_cell: String,
    pub content: String,
}

/// A file as laid out on screen
#[derive(Debug, Clone)]
pub struct RenderedFile {
    /// Name shown in the file header; renamed files read `old → new`
    pub name: String,
    pub rows: Vec<DisplayRow>,
}

impl RenderedFile {
    pub fn is_rename(&self) -> bool {
        self.name.contains(RENAME_MARKER)
    }
}

/// Every file of a diff, in display order
#[derive(Debug, Clone, Default)]
pub struct RenderedDiff {
    pub files: Vec<RenderedFile>,
}

impl RenderedDiff {
    pub fn from_files(files: &[DiffFile]) -> Self {
        Self {
            files: files.iter().map(DiffFile::render).collect(),
        }
    }

    /// Parse diff text and lay it out in one step
    pub fn from_text(text: &str) -> Self {
        Self::from_files(&parse_unified_diff(text))
    }
}

impl DiffFile {
    /// Path used to identify the file in the review
    pub fn path(&self) -> &str {
        let path = match self.status {
            FileStatus::Deleted => self.old_path.as_ref().or(self.new_path.as_ref()),
            _ => self.new_path.as_ref().or(self.old_path.as_ref()),
        };
        path.map(String::as_str).unwrap_or("")
    }

    /// Name shown in the file header
    pub fn display_name(&self) -> String {
        match (&self.old_path, &self.new_path, self.status) {
            (Some(old), Some(new), FileStatus::Renamed | FileStatus::Copied) if old != new => {
                format!("{} {} {}", old, RENAME_MARKER, new)
            }
            _ => self.path().to_string(),
        }
    }

    /// Display rows: a header row per hunk followed by its lines
    pub fn rows(&self) -> Vec<DisplayRow> {
        let mut rows = Vec::new();
        for hunk in &self.hunks {
            rows.push(DisplayRow {
                kind: RowKind::HunkHeader,
                old_cell: String::new(),
                new_cell: String::new(),
                content: hunk.header_line.clone(),
            });
            for line in &hunk.lines {
                let kind = match line.kind {
                    LineKind::Context => RowKind::Context,
                    LineKind::Addition => RowKind::Addition,
                    LineKind::Deletion => RowKind::Deletion,
                };
                rows.push(DisplayRow {
                    kind,
                    old_cell: cell_text(line.old_line_no),
                    new_cell: cell_text(line.new_line_no),
                    content: line.content.clone(),
                });
            }
        }
        rows
    }

    pub fn render(&self) -> RenderedFile {
        RenderedFile {
            name: self.display_name(),
            rows: self.rows(),
        }
    }
}

fn cell_text(n: Option<u32>) -> String {
    n.map(|n| n.to_string()).unwrap_or_default()
}

/// Parse full unified diff output into DiffFile structs.
///
/// Files without hunks (binary or mode-only changes, pure renames) are kept so
/// that they still count as part of the change set.
pub fn parse_unified_diff(diff_output: &str) -> Vec<DiffFile> {
    let mut files = Vec::new();
    let mut current_file: Option<DiffFile> = None;
    let mut current_hunk: Option<DiffHunk> = None;
    let mut old_line = 0u32;
    let mut new_line = 0u32;

    for line in diff_output.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.starts_with("diff --git") {
            // Save previous file
            if let Some(mut f) = current_file.take() {
                if let Some(h) = current_hunk.take() {
                    f.hunks.push(h);
                }
                files.push(f);
            }
            let (old_path, new_path) = parse_diff_git_line(line);
            current_file = Some(DiffFile {
                old_path,
                new_path,
                status: FileStatus::Modified,
                hunks: Vec::new(),
            });
            continue;
        }

        // Inside a hunk every line belongs to the hunk
        if let Some(ref mut hunk) = current_hunk {
            if !line.starts_with("@@") {
                let (kind, old_no, new_no) = if line.starts_with('+') {
                    let no = new_line;
                    new_line = new_line.saturating_add(1);
                    (LineKind::Addition, None, Some(no))
                } else if line.starts_with('-') {
                    let no = old_line;
                    old_line = old_line.saturating_add(1);
                    (LineKind::Deletion, Some(no), None)
                } else if line.starts_with(' ') || line.is_empty() {
                    let old_no = old_line;
                    let new_no = new_line;
                    old_line = old_line.saturating_add(1);
                    new_line = new_line.saturating_add(1);
                    (LineKind::Context, Some(old_no), Some(new_no))
                } else {
                    // "\ No newline at end of file" and anything unknown
                    continue;
                };

                let content = if line.len() > 1 { &line[1..] } else { "" };
                hunk.lines.push(DiffLine {
                    kind,
                    old_line_no: old_no,
                    new_line_no: new_no,
                    content: content.to_string(),
                });
                continue;
            }
        }

        if line.starts_with("@@") {
            if let Some(h) = current_hunk.take() {
                if let Some(ref mut f) = current_file {
                    f.hunks.push(h);
                }
            }
            if current_file.is_none() {
                continue;
            }
            if let Some(header) = parse_hunk_header(line) {
                old_line = header.0;
                new_line = header.2;
                current_hunk = Some(DiffHunk {
                    header_line: line.to_string(),
                    lines: Vec::new(),
                });
            }
        } else if let Some(ref mut f) = current_file {
            if line.starts_with("new file") {
                f.status = FileStatus::Added;
            } else if line.starts_with("deleted file") {
                f.status = FileStatus::Deleted;
            } else if let Some(path) = line.strip_prefix("rename from ") {
                f.status = FileStatus::Renamed;
                f.old_path = Some(path.to_string());
            } else if let Some(path) = line.strip_prefix("rename to ") {
                f.status = FileStatus::Renamed;
                f.new_path = Some(path.to_string());
            } else if let Some(path) = line.strip_prefix("copy from ") {
                f.status = FileStatus::Copied;
                f.old_path = Some(path.to_string());
            } else if let Some(path) = line.strip_prefix("copy to ") {
                f.status = FileStatus::Copied;
                f.new_path = Some(path.to_string());
            }
        }
    }

    // Don't forget the last file/hunk
    if let Some(mut f) = current_file {
        if let Some(h) = current_hunk {
            f.hunks.push(h);
        }
        files.push(f);
    }

    files
}

/// Diff engine using git diff command
#[derive(Clone)]
pub struct DiffEngine {
    repo_path: PathBuf,
    context_lines: u32,
}

impl DiffEngine {
    pub fn new(repo_path: PathBuf, context_lines: u32) -> Self {
        Self {
            repo_path,
            context_lines,
        }
    }

    /// Raw unified diff text for the requested comparison
    pub fn diff_text(&self, mode: &DiffMode) -> Result<String> {
        self.diff_via_git_cmd(mode, self.context_lines, None)
    }

    /// Diff of a single file with the whole file as context
    pub fn file_diff_text(&self, mode: &DiffMode, path: &str) -> Result<String> {
        self.diff_via_git_cmd(mode, WHOLE_FILE_CONTEXT, Some(path))
    }

    /// Contents of a file on the new side of the comparison
    pub fn file_source(&self, mode: &DiffMode, path: &str) -> Result<String> {
        match mode {
            DiffMode::Unstaged => {
                let full = self.repo_path.join(path);
                std::fs::read_to_string(&full)
                    .with_context(|| format!("Failed to read {}", full.display()))
            }
            DiffMode::Staged => self.git_show(&format!(":{}", path)),
            DiffMode::Commits { to, .. } => self.git_show(&format!("{}:{}", to, path)),
        }
    }

    fn git_show(&self, object: &str) -> Result<String> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.repo_path)
            .arg("show")
            .arg(object)
            .output()
            .context("Failed to run git show")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("git show {} failed: {}", object, stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Use git diff command directly - handles custom diff drivers properly
    fn diff_via_git_cmd(&self, mode: &DiffMode, context: u32, path: Option<&str>) -> Result<String> {
        let mut cmd = Command::new("git");
        cmd.arg("-C")
            .arg(&self.repo_path)
            .arg("diff")
            .arg("--no-color")
            .arg("--no-ext-diff")
            .arg(format!("-U{}", context))
            .arg("--find-renames");

        match mode {
            DiffMode::Unstaged => {}
            DiffMode::Staged => {
                cmd.arg("--staged");
            }
            DiffMode::Commits { from, to } => {
                cmd.arg(format!("{}..{}", from, to));
            }
        }
        if let Some(path) = path {
            cmd.arg("--").arg(path);
        }

        debug!(repo = %self.repo_path.display(), mode = %mode.label(), ?path, "running git diff");
        let output = cmd.output().context("Failed to run git diff")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("git diff failed: {}", stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Parse "diff --git a/path b/path" line
fn parse_diff_git_line(line: &str) -> (Option<String>, Option<String>) {
    // "diff --git a/old/path b/new/path"
    let line = line.strip_prefix("diff --git ").unwrap_or(line);
    let parts: Vec<&str> = line.splitn(2, " b/").collect();

    let old_path = parts.first().and_then(|p| p.strip_prefix("a/")).map(String::from);
    let new_path = parts.get(1).map(|p| p.to_string());

    (old_path, new_path)
}

/// Parse a unified diff hunk header: @@ -old_start,old_count +new_start,new_count @@ <header>
fn parse_hunk_header(line: &str) -> Option<(u32, u32, u32, u32)> {
    // @@ -1,5 +1,7 @@ optional header
    let line = line.trim_start_matches('@').trim();
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 2 {
        return None;
    }

    let old_part = parts[0].strip_prefix('-')?;
    let new_part = parts[1].strip_prefix('+')?;

    let (old_start, old_count) = parse_range(old_part)?;
    let (new_start, new_count) = parse_range(new_part)?;

    Some((old_start, old_count, new_start, new_count))
}

fn parse_range(s: &str) -> Option<(u32, u32)> {
    if let Some((start, count)) = s.split_once(',') {
        Some((start.parse().ok()?, count.parse().ok()?))
    } else {
        Some((s.parse().ok()?, 1))
    }
}

/// Find the git repository root from a path
pub fn find_repo_root(start: &Path) -> Result<PathBuf> {
    let repo = Repository::discover(start).context("Not in a git repository")?;

    repo.workdir()
        .map(PathBuf::from)
        .context("Repository has no working directory")
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_FILES: &str = "\
diff --git a/src/A.java b/src/A.java
index 1111111..2222222 100644
--- a/src/A.java
+++ b/src/A.java
@@ -1,3 +1,4 @@ class A {
 line one
-old two
+new two
+new three
 line four
@@ -20,2 +21,2 @@
 twenty
-twenty one
+twenty one!
diff --git a/Old.java b/New.java
similarity index 90%
rename from Old.java
rename to New.java
index 3333333..4444444 100644
--- a/Old.java
+++ b/New.java
@@ -1 +1 @@
-a
+b
";

    #[test]
    fn test_parse_line_numbers() {
        let files = parse_unified_diff(TWO_FILES);
        assert_eq!(files.len(), 2);

        let a = &files[0];
        assert_eq!(a.path(), "src/A.java");
        assert_eq!(a.status, FileStatus::Modified);
        assert_eq!(a.hunks.len(), 2);

        let first = &a.hunks[0].lines;
        assert_eq!(first.len(), 5);
        assert_eq!((first[0].old_line_no, first[0].new_line_no), (Some(1), Some(1)));
        assert_eq!((first[1].old_line_no, first[1].new_line_no), (Some(2), None));
        assert_eq!((first[2].old_line_no, first[2].new_line_no), (None, Some(2)));
        assert_eq!((first[3].old_line_no, first[3].new_line_no), (None, Some(3)));
        assert_eq!((first[4].old_line_no, first[4].new_line_no), (Some(3), Some(4)));

        let second = &a.hunks[1].lines;
        assert_eq!(second[0].new_line_no, Some(21));
        assert_eq!(second[2].new_line_no, Some(22));
    }

    #[test]
    fn test_rows_include_hunk_headers() {
        let files = parse_unified_diff(TWO_FILES);
        let rows = files[0].rows();

        // 2 headers + 5 + 3 lines
        assert_eq!(rows.len(), 10);
        assert_eq!(rows[0].kind, RowKind::HunkHeader);
        assert!(rows[0].old_cell.is_empty() && rows[0].new_cell.is_empty());
        assert_eq!(rows[6].kind, RowKind::HunkHeader);
        assert_eq!(rows[2].kind, RowKind::Deletion);
        assert_eq!(rows[2].old_cell, "2");
        assert_eq!(rows[2].new_cell, "");
    }

    #[test]
    fn test_rename_display_name() {
        let files = parse_unified_diff(TWO_FILES);
        let renamed = &files[1];
        assert_eq!(renamed.status, FileStatus::Renamed);
        assert_eq!(renamed.display_name(), "Old.java → New.java");
        assert!(renamed.render().is_rename());
        assert!(!files[0].render().is_rename());
    }

    #[test]
    fn test_deleted_file_uses_old_path() {
        let diff = "\
diff --git a/gone.txt b/gone.txt
deleted file mode 100644
index 1111111..0000000
--- a/gone.txt
+++ /dev/null
@@ -1,2 +0,0 @@
-one
-two
";
        let files = parse_unified_diff(diff);
        assert_eq!(files[0].status, FileStatus::Deleted);
        assert_eq!(files[0].display_name(), "gone.txt");
        assert!(files[0].rows().iter().all(|r| r.new_cell.is_empty()));
    }

    #[test]
    fn test_binary_file_kept_without_rows() {
        let diff = "\
diff --git a/logo.png b/logo.png
index 1111111..2222222 100644
Binary files a/logo.png and b/logo.png differ
";
        let rendered = RenderedDiff::from_text(diff);
        assert_eq!(rendered.files.len(), 1);
        assert_eq!(rendered.files[0].name, "logo.png");
        assert!(rendered.files[0].rows.is_empty());
    }

    #[test]
    fn test_no_newline_marker_is_not_displayed() {
        let diff = "\
diff --git a/a.txt b/a.txt
--- a/a.txt
+++ b/a.txt
@@ -1 +1 @@
-a
\\ No newline at end of file
+b
\\ No newline at end of file
";
        let rendered = RenderedDiff::from_text(diff);
        assert_eq!(rendered.files[0].rows.len(), 3);
    }

    #[test]
    fn test_line_numbers_stop_at_u32_max() {
        let diff = "\
diff --git a/a.txt b/a.txt
--- a/a.txt
+++ b/a.txt
@@ -1 +4294967295,2 @@
+a
+b
";
        let files = parse_unified_diff(diff);
        let lines = &files[0].hunks[0].lines;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].new_line_no, Some(u32::MAX));
        assert_eq!(lines[1].new_line_no, Some(u32::MAX));
    }

    #[test]
    fn test_removed_line_starting_with_dashes_stays_in_hunk() {
        let diff = "\
diff --git a/a.sql b/a.sql
--- a/a.sql
+++ b/a.sql
@@ -1,2 +1,1 @@
--- comment
 select 1;
";
        let files = parse_unified_diff(diff);
        let lines = &files[0].hunks[0].lines;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].kind, LineKind::Deletion);
        assert_eq!(lines[0].content, "-- comment");
    }

    #[test]
    fn test_parse_hunk_header() {
        assert_eq!(parse_hunk_header("@@ -1,5 +1,7 @@ fn main()"), Some((1, 5, 1, 7)));
        assert_eq!(parse_hunk_header("@@ -3 +4 @@"), Some((3, 1, 4, 1)));
        assert_eq!(parse_hunk_header("@@ garbage @@"), None);
    }

    fn commit_file(repo: &Repository, path: &str, contents: &str, message: &str) -> git2::Oid {
        let workdir = repo.workdir().unwrap();
        std::fs::write(workdir.join(path), contents).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(path)).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = git2::Signature::now("test", "test@example.com").unwrap();
        let parents = match repo.head() {
            Ok(head) => vec![head.peel_to_commit().unwrap()],
            Err(_) => Vec::new(),
        };
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)
            .unwrap()
    }

    #[test]
    fn test_engine_diffs_commits_and_reads_sources() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let first = commit_file(&repo, "A.java", "one\ntwo\nthree\n", "first");
        let second = commit_file(&repo, "A.java", "one\nTWO\nthree\n", "second");

        let engine = DiffEngine::new(find_repo_root(dir.path()).unwrap(), 3);
        let mode = DiffMode::Commits {
            from: first.to_string(),
            to: second.to_string(),
        };

        let files = parse_unified_diff(&engine.diff_text(&mode).unwrap());
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path(), "A.java");

        let whole = RenderedDiff::from_text(&engine.file_diff_text(&mode, "A.java").unwrap());
        assert_eq!(whole.files[0].rows.len(), 5);

        assert_eq!(engine.file_source(&mode, "A.java").unwrap(), "one\nTWO\nthree\n");
        assert!(engine.file_source(&mode, "Missing.java").is_err());
    }
}
