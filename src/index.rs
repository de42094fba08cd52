//! Displayed-line index
//!
//! For every file of a rendered diff, records which old/new line numbers are
//! actually visible and in which order. Row positions in this index are the
//! display indices the caller ranges refer to.

use crate::diff::{RenderedDiff, RenderedFile};
use std::collections::HashMap;

/// One displayed row: old and new line number, if that side has one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayedLine {
    pub old: Option<u32>,
    pub new: Option<u32>,
}

/// Position of a file inside the rendered diff
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegionHandle(pub usize);

/// Displayed rows of one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDisplayIndex {
    pub path: String,
    pub lines: Vec<DisplayedLine>,
    pub region: RegionHandle,
}

impl FileDisplayIndex {
    /// Extract the displayed line numbers of a single rendered file
    pub fn build(file: &RenderedFile, region: RegionHandle) -> Self {
        let lines = file
            .rows
            .iter()
            .map(|row| DisplayedLine {
                old: parse_line_number(&row.old_cell),
                new: parse_line_number(&row.new_cell),
            })
            .collect();

        Self {
            path: file.name.clone(),
            lines,
            region,
        }
    }

    /// Displayed new-side line numbers, in display order
    pub fn new_lines(&self) -> impl Iterator<Item = u32> + '_ {
        self.lines.iter().filter_map(|l| l.new)
    }

    /// First and last displayed new-side line, if any
    pub fn new_line_bounds(&self) -> Option<(u32, u32)> {
        let first = self.new_lines().next()?;
        let last = self.new_lines().last()?;
        Some((first, last))
    }
}

/// Cell text to a line number; anything unparsable counts as absent
fn parse_line_number(cell: &str) -> Option<u32> {
    cell.trim().parse().ok()
}

/// Displayed rows of every non-renamed file of a diff
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileIndex {
    files: Vec<FileDisplayIndex>,
    by_path: HashMap<String, usize>,
}

impl FileIndex {
    pub fn build(diff: &RenderedDiff) -> Self {
        let mut index = Self::default();
        for (position, file) in diff.files.iter().enumerate() {
            // Renamed files have nothing to anchor on
            if file.is_rename() {
                continue;
            }
            index.insert(FileDisplayIndex::build(file, RegionHandle(position)));
        }
        index
    }

    /// Add a file; a later file with the same path replaces the earlier one
    pub fn insert(&mut self, file: FileDisplayIndex) {
        match self.by_path.get(&file.path) {
            Some(&slot) => self.files[slot] = file,
            None => {
                self.by_path.insert(file.path.clone(), self.files.len());
                self.files.push(file);
            }
        }
    }

    pub fn get(&self, path: &str) -> Option<&FileDisplayIndex> {
        self.by_path.get(path).map(|&slot| &self.files[slot])
    }

    /// Whether the file is part of the change set
    pub fn contains(&self, path: &str) -> bool {
        self.by_path.contains_key(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileDisplayIndex> {
        self.files.iter()
    }
}
