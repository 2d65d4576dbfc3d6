//! Diff data model and unified-diff parser
//!
//! Parses `git diff` output into per-file hunks with resolved old/new line
//! numbers. Also parses `--name-status` listings into changed-file records.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;
use thiserror::Error;

static DIFF_HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^diff --git a/(.+) b/(.+)$").expect("valid regex"));

static HUNK_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("valid regex")
});

/// Header lines between `diff --git` and the first hunk that carry no content.
const STRUCTURAL_PREFIXES: &[&str] = &[
    "index ",
    "old mode ",
    "new mode ",
    "similarity index ",
    "dissimilarity index ",
    "rename from ",
    "rename to ",
    "copy from ",
    "copy to ",
];

/// Errors raised while parsing diff text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid hunk header on line {line}: {text:?}")]
    InvalidHunkHeader { line: usize, text: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    Context,
    Added,
    Removed,
}

impl LineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Context => "context",
            Self::Added => "added",
            Self::Removed => "removed",
        }
    }

    /// Whether this line is part of a change block.
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Added | Self::Removed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Added,
    Modified,
    Deleted,
    Renamed,
    Binary,
}

impl FileStatus {
    /// Map a `--name-status` code (`M`, `A`, `R100`, ...) to a status.
    pub fn from_code(code: &str) -> Self {
        match code.chars().next() {
            Some('A') | Some('C') => Self::Added,
            Some('D') => Self::Deleted,
            Some('R') => Self::Renamed,
            Some('B') => Self::Binary,
            _ => Self::Modified,
        }
    }

    pub fn code(&self) -> char {
        match self {
            Self::Added => 'A',
            Self::Modified => 'M',
            Self::Deleted => 'D',
            Self::Renamed => 'R',
            Self::Binary => 'B',
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Renamed => "renamed",
            Self::Binary => "binary",
        }
    }
}

/// A single line in a hunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub content: String,
    pub kind: LineKind,
    pub old_number: Option<u32>,
    pub new_number: Option<u32>,
}

impl Line {
    fn new(kind: LineKind, content: &str) -> Self {
        Self {
            content: content.to_string(),
            kind,
            old_number: None,
            new_number: None,
        }
    }

    /// Line number annotations anchor to: the new side, except for removed lines.
    pub fn anchor_number(&self) -> Option<u32> {
        match self.kind {
            LineKind::Removed => self.old_number,
            LineKind::Added | LineKind::Context => self.new_number,
        }
    }
}

/// A contiguous section of a diff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: u32,
    pub old_count: u32,
    pub new_start: u32,
    pub new_count: u32,
    /// The literal `@@ ... @@` line
    pub header: String,
    pub lines: Vec<Line>,
}

impl Hunk {
    /// Number of lines contributing to the old side.
    pub fn old_len(&self) -> u32 {
        self.lines.iter().filter(|l| l.kind != LineKind::Added).count() as u32
    }

    /// Number of lines contributing to the new side.
    pub fn new_len(&self) -> u32 {
        self.lines
            .iter()
            .filter(|l| l.kind != LineKind::Removed)
            .count() as u32
    }

    /// True once the declared old and new line budgets are both consumed.
    pub fn is_complete(&self) -> bool {
        self.old_len() >= self.old_count && self.new_len() >= self.new_count
    }

    fn assign_line_numbers(&mut self) {
        let mut old_no = self.old_start;
        let mut new_no = self.new_start;

        for line in &mut self.lines {
            match line.kind {
                LineKind::Context => {
                    line.old_number = Some(old_no);
                    line.new_number = Some(new_no);
                    old_no = old_no.saturating_add(1);
                    new_no = new_no.saturating_add(1);
                }
                LineKind::Added => {
                    line.old_number = None;
                    line.new_number = Some(new_no);
                    new_no = new_no.saturating_add(1);
                }
                LineKind::Removed => {
                    line.old_number = Some(old_no);
                    line.new_number = None;
                    old_no = old_no.saturating_add(1);
                }
            }
        }
    }
}

/// The diff for a single file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiff {
    pub path: String,
    pub status: FileStatus,
    pub hunks: Vec<Hunk>,
}

impl FileDiff {
    pub fn new(path: impl Into<String>, status: FileStatus) -> Self {
        Self {
            path: path.into(),
            status,
            hunks: Vec::new(),
        }
    }

    /// Synthesize a diff listing every line of `content` as added.
    ///
    /// Used for untracked files, which git has no diff for.
    pub fn all_added(path: impl Into<String>, content: &str) -> Self {
        let mut file = Self::new(path, FileStatus::Added);
        let lines: Vec<Line> = content
            .lines()
            .map(|l| Line::new(LineKind::Added, l))
            .collect();
        if lines.is_empty() {
            return file;
        }

        let count = lines.len() as u32;
        let mut hunk = Hunk {
            old_start: 0,
            old_count: 0,
            new_start: 1,
            new_count: count,
            header: format!("@@ -0,0 +1,{} @@", count),
            lines,
        };
        hunk.assign_line_numbers();
        file.hunks.push(hunk);
        file
    }

    pub fn is_binary(&self) -> bool {
        self.status == FileStatus::Binary
    }

    pub fn line_count(&self) -> usize {
        self.hunks.iter().map(|h| h.lines.len()).sum()
    }
}

/// A file that changed between two refs, from `git diff --name-status`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    pub path: String,
    pub status: FileStatus,
}

impl ChangedFile {
    pub fn new(path: impl Into<String>, status: FileStatus) -> Self {
        Self {
            path: path.into(),
            status,
        }
    }
}

/// Parse unified diff output into one `FileDiff` per file section.
///
/// Empty input yields an empty vector. A line starting with `@@` that is not a
/// well-formed hunk header is an error.
pub fn parse_diff(raw: &str) -> Result<Vec<FileDiff>, ParseError> {
    let mut files = Vec::new();
    if raw.is_empty() {
        return Ok(files);
    }

    let mut current: Option<FileDiff> = None;
    // Old and new lines the open hunk still expects.
    let mut remaining = (0u32, 0u32);

    for (idx, line) in raw.split('\n').enumerate() {
        if let Some(caps) = DIFF_HEADER_RE.captures(line) {
            if let Some(f) = current.take() {
                files.push(f);
            }
            current = Some(FileDiff::new(&caps[2], FileStatus::Modified));
            remaining = (0, 0);
            continue;
        }

        if line.starts_with("@@") {
            let hunk = parse_hunk_header(line).ok_or_else(|| ParseError::InvalidHunkHeader {
                line: idx + 1,
                text: line.to_string(),
            })?;
            remaining = (hunk.old_count, hunk.new_count);
            current
                .get_or_insert_with(|| FileDiff::new("", FileStatus::Modified))
                .hunks
                .push(hunk);
            continue;
        }

        // Inside a hunk that still expects lines, `--- `/`+++ ` lines are content.
        let in_open_hunk = remaining != (0, 0)
            && current.as_ref().is_some_and(|f| !f.hunks.is_empty());

        if !in_open_hunk {
            if let Some(rest) = line.strip_prefix("--- ") {
                // Without a `diff --git` preamble, `---` opens the next file section.
                let starts_section = current.as_ref().map_or(true, |f| !f.hunks.is_empty());
                if starts_section {
                    if let Some(f) = current.take() {
                        files.push(f);
                    }
                    let file = match rest.trim_end() {
                        "/dev/null" => FileDiff::new("", FileStatus::Added),
                        p => FileDiff::new(strip_side_prefix(p, "a/"), FileStatus::Modified),
                    };
                    current = Some(file);
                    remaining = (0, 0);
                } else if rest.trim_end() == "/dev/null" {
                    if let Some(f) = current.as_mut() {
                        f.status = FileStatus::Added;
                    }
                }
                continue;
            }

            if let Some(rest) = line.strip_prefix("+++ ") {
                let file = current.get_or_insert_with(|| FileDiff::new("", FileStatus::Modified));
                match rest.trim_end() {
                    "/dev/null" => file.status = FileStatus::Deleted,
                    p => file.path = strip_side_prefix(p, "b/").to_string(),
                }
                continue;
            }

            if line.starts_with("new file mode ") {
                if let Some(f) = current.as_mut() {
                    f.status = FileStatus::Added;
                }
                continue;
            }

            if line.starts_with("deleted file mode ") {
                if let Some(f) = current.as_mut() {
                    f.status = FileStatus::Deleted;
                }
                continue;
            }

            if line.starts_with("rename from ") || line.starts_with("similarity index ") {
                if let Some(f) = current.as_mut() {
                    if f.status == FileStatus::Modified {
                        f.status = FileStatus::Renamed;
                    }
                }
                continue;
            }

            if line.starts_with("Binary files ") || line == "GIT binary patch" {
                if let Some(f) = current.as_mut() {
                    f.status = FileStatus::Binary;
                }
                continue;
            }

            if STRUCTURAL_PREFIXES.iter().any(|p| line.starts_with(p)) {
                continue;
            }

        }

        // "\ No newline at end of file"
        if line.starts_with("\\ ") {
            continue;
        }

        let Some(hunk) = current.as_mut().and_then(|f| f.hunks.last_mut()) else {
            continue;
        };

        let parsed = if let Some(rest) = line.strip_prefix('+') {
            Some(Line::new(LineKind::Added, rest))
        } else if let Some(rest) = line.strip_prefix('-') {
            Some(Line::new(LineKind::Removed, rest))
        } else if let Some(rest) = line.strip_prefix(' ') {
            Some(Line::new(LineKind::Context, rest))
        } else if line.is_empty() && in_open_hunk {
            // Some generators drop the leading space of a blank context line.
            Some(Line::new(LineKind::Context, ""))
        } else {
            None
        };

        if let Some(l) = parsed {
            match l.kind {
                LineKind::Context => {
                    remaining.0 = remaining.0.saturating_sub(1);
                    remaining.1 = remaining.1.saturating_sub(1);
                }
                LineKind::Removed => remaining.0 = remaining.0.saturating_sub(1),
                LineKind::Added => remaining.1 = remaining.1.saturating_sub(1),
            }
            hunk.lines.push(l);
        }
    }

    if let Some(f) = current {
        files.push(f);
    }

    for file in &mut files {
        for hunk in &mut file.hunks {
            hunk.assign_line_numbers();
        }
    }

    log::trace!("parsed {} file diff(s)", files.len());
    Ok(files)
}

/// Parse `git diff --name-status` output.
///
/// Each line is `STATUS\tPATH`; renames and copies carry two paths, of which the
/// destination is kept. Blank and malformed lines are skipped.
pub fn parse_name_status(raw: &str) -> Vec<ChangedFile> {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter_map(|l| {
            let (status, paths) = l.split_once('\t')?;
            let path = paths.rsplit('\t').next().unwrap_or(paths);
            if path.is_empty() {
                return None;
            }
            Some(ChangedFile::new(path, FileStatus::from_code(status)))
        })
        .collect()
}

fn parse_hunk_header(line: &str) -> Option<Hunk> {
    let caps = HUNK_HEADER_RE.captures(line)?;
    let number = |i: usize, default: Option<u32>| match caps.get(i) {
        Some(m) => m.as_str().parse::<u32>().ok(),
        None => default,
    };

    let (old_start, old_count) = (number(1, None)?, number(2, Some(1))?);
    let (new_start, new_count) = (number(3, None)?, number(4, Some(1))?);
    // Ranges that run past u32::MAX cannot be numbered.
    old_start.checked_add(old_count)?;
    new_start.checked_add(new_count)?;

    Some(Hunk {
        old_start,
        old_count,
        new_start,
        new_count,
        header: line.to_string(),
        lines: Vec::new(),
    })
}

fn strip_side_prefix<'a>(path: &'a str, prefix: &str) -> &'a str {
    path.strip_prefix(prefix).unwrap_or(path)
}
