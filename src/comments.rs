//! Review comments and their export
//!
//! Comments live in memory for the session and are rendered as markdown (for
//! pasting into a coding agent) or JSON when the review is finished.

use crate::diff::LineKind;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// A review comment anchored to a line (or range) of a file.
///
/// Line numbers follow the viewer's annotation convention: new-side numbers
/// for added and context lines, old-side numbers for removed lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Comment {
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub kind: LineKind,
    pub body: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub code_snippet: String,
}

/// In-memory comment collection, in insertion order
#[derive(Debug, Clone, Default)]
pub struct CommentStore {
    comments: Vec<Comment>,
}

impl CommentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a comment, replacing any existing one at the same file and start line.
    pub fn add(&mut self, comment: Comment) {
        match self
            .comments
            .iter_mut()
            .find(|c| c.file_path == comment.file_path && c.start_line == comment.start_line)
        {
            Some(existing) => *existing = comment,
            None => self.comments.push(comment),
        }
    }

    /// Remove the comment starting at `start_line`. Returns whether one existed.
    pub fn delete(&mut self, file_path: &str, start_line: u32) -> bool {
        let before = self.comments.len();
        self.comments
            .retain(|c| !(c.file_path == file_path && c.start_line == start_line));
        self.comments.len() != before
    }

    pub fn get(&self, file_path: &str, line: u32) -> Option<&Comment> {
        self.comments
            .iter()
            .find(|c| c.file_path == file_path && c.start_line == line)
    }

    pub fn has_comment(&self, file_path: &str, line: u32) -> bool {
        self.get(file_path, line).is_some()
    }

    pub fn all(&self) -> &[Comment] {
        &self.comments
    }

    pub fn for_file<'a>(&'a self, file_path: &'a str) -> impl Iterator<Item = &'a Comment> + 'a {
        self.comments.iter().filter(move |c| c.file_path == file_path)
    }

    /// Start lines of the comments on `file_path`.
    pub fn lines_for_file(&self, file_path: &str) -> Vec<u32> {
        self.for_file(file_path).map(|c| c.start_line).collect()
    }

    pub fn len(&self) -> usize {
        self.comments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.comments.is_empty()
    }
}

/// Render comments as markdown, grouped by file in first-seen order.
pub fn format_markdown(comments: &[Comment]) -> String {
    if comments.is_empty() {
        return String::new();
    }

    let mut order: Vec<&str> = Vec::new();
    let mut by_file: HashMap<&str, Vec<&Comment>> = HashMap::new();
    for comment in comments {
        let path = comment.file_path.as_str();
        by_file
            .entry(path)
            .or_insert_with(|| {
                order.push(path);
                Vec::new()
            })
            .push(comment);
    }

    let mut output = String::new();
    output.push_str("## Code Review Comments\n\n");

    for (i, path) in order.iter().enumerate() {
        output.push_str(&format!("### {}\n\n", path));

        for comment in &by_file[path] {
            output.push_str(&format!("**{}:**\n", line_info(comment)));

            if !comment.code_snippet.is_empty() {
                output.push_str(&format!(
                    "```{}\n{}\n```\n",
                    fence_language(path),
                    comment.code_snippet
                ));
            }

            output.push_str(&format!("**Comment:** {}\n\n", comment.body));
        }

        if i + 1 < order.len() {
            output.push_str("---\n\n");
        }
    }

    output
}

fn line_info(comment: &Comment) -> String {
    let kind = match comment.kind {
        LineKind::Context => String::new(),
        k => format!(" ({})", k.as_str()),
    };
    if comment.end_line == comment.start_line || comment.end_line == 0 {
        format!("Line {}{}", comment.start_line, kind)
    } else {
        format!("Lines {}-{}{}", comment.start_line, comment.end_line, kind)
    }
}

fn fence_language(path: &str) -> &str {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
}

/// Render comments as a pretty-printed JSON array.
pub fn format_json(comments: &[Comment]) -> Result<String> {
    serde_json::to_string_pretty(comments).map_err(Into::into)
}

/// Review output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReviewFormat {
    #[default]
    Markdown,
    Json,
}

impl ReviewFormat {
    /// File extension used when the review is written to disk.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Markdown => "md",
            Self::Json => "json",
        }
    }
}

/// Format comments in the requested format
pub fn format_review(comments: &[Comment], format: ReviewFormat) -> Result<String> {
    match format {
        ReviewFormat::Markdown => Ok(format_markdown(comments)),
        ReviewFormat::Json => format_json(comments),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn comment(path: &str, start: u32, end: u32, kind: LineKind, body: &str) -> Comment {
        Comment {
            file_path: path.to_string(),
            start_line: start,
            end_line: end,
            kind,
            body: body.to_string(),
            code_snippet: String::new(),
        }
    }

    #[test]
    fn test_store_add_get_delete() {
        let mut store = CommentStore::new();
        store.add(comment("a.rs", 1, 1, LineKind::Context, "hello"));
        store.add(comment("a.rs", 5, 5, LineKind::Added, "world"));
        assert_eq!(store.len(), 2);
        assert!(store.has_comment("a.rs", 5));
        assert!(!store.has_comment("a.rs", 2));
        assert!(!store.has_comment("b.rs", 1));

        assert!(store.delete("a.rs", 1));
        assert!(!store.delete("a.rs", 1));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a.rs", 5).unwrap().body, "world");
    }

    #[test]
    fn test_store_add_replaces_same_start_line() {
        let mut store = CommentStore::new();
        store.add(comment("a.rs", 3, 3, LineKind::Added, "first"));
        store.add(comment("b.rs", 3, 3, LineKind::Added, "other file"));
        store.add(comment("a.rs", 3, 6, LineKind::Added, "second"));
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("a.rs", 3).unwrap().body, "second");
        assert_eq!(store.all()[0].end_line, 6);
    }

    #[test]
    fn test_for_file() {
        let mut store = CommentStore::new();
        store.add(comment("a.rs", 1, 1, LineKind::Context, "x"));
        store.add(comment("b.rs", 2, 2, LineKind::Context, "y"));
        store.add(comment("a.rs", 9, 9, LineKind::Removed, "z"));
        assert_eq!(store.lines_for_file("a.rs"), vec![1, 9]);
        assert_eq!(store.for_file("c.rs").count(), 0);
    }

    #[test]
    fn test_format_empty() {
        assert_eq!(format_markdown(&[]), "");
    }

    #[test]
    fn test_format_single_comment() {
        let mut c = comment("src/main.rs", 10, 10, LineKind::Added, "This needs error handling.");
        c.code_snippet = "fn do_thing() {".to_string();

        assert_eq!(
            format_markdown(&[c]),
            "## Code Review Comments\n\n\
             ### src/main.rs\n\n\
             **Line 10 (added):**\n\
             ```rs\nfn do_thing() {\n```\n\
             **Comment:** This needs error handling.\n\n"
        );
    }

    #[test]
    fn test_format_range_and_context() {
        let comments = vec![
            comment("util.go", 5, 8, LineKind::Removed, "Why was this removed?"),
            comment("util.go", 12, 0, LineKind::Context, "ok"),
        ];
        let md = format_markdown(&comments);
        assert!(md.contains("**Lines 5-8 (removed):**"));
        assert!(md.contains("**Line 12:**"));
        assert!(!md.contains("```"));
    }

    #[test]
    fn test_format_groups_by_file_in_first_seen_order() {
        let comments = vec![
            comment("b.rs", 1, 1, LineKind::Context, "first"),
            comment("a.rs", 1, 1, LineKind::Context, "second"),
            comment("b.rs", 5, 5, LineKind::Context, "third"),
        ];
        let md = format_markdown(&comments);
        assert_eq!(md.matches("### b.rs").count(), 1);
        assert_eq!(md.matches("### a.rs").count(), 1);
        assert_eq!(md.matches("---").count(), 1);
        assert!(md.find("### b.rs").unwrap() < md.find("### a.rs").unwrap());
        assert!(md.find("third").unwrap() < md.find("### a.rs").unwrap());
    }

    #[test]
    fn test_format_json() {
        let comments = vec![comment("x.rs", 4, 4, LineKind::Removed, "gone")];
        let json = format_review(&comments, ReviewFormat::Json).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.as_array().unwrap().len(), 1);
        assert_eq!(parsed[0]["file_path"], "x.rs");
        assert_eq!(parsed[0]["kind"], "removed");
        assert_eq!(parsed[0]["body"], "gone");
        assert!(parsed[0].get("code_snippet").is_none());
    }
}
