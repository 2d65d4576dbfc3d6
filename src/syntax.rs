//! Syntax highlighting using syntect-assets (bat themes)
//!
//! Highlights the lines of a diff. Each side of a hunk is run through the
//! parser separately so multi-line constructs keep their state.

use crate::diff::{FileDiff, LineKind};
use anyhow::Result;
use syntect::highlighting::{FontStyle, HighlightIterator, HighlightState, Highlighter};
use syntect::parsing::{ParseState, ScopeStack, SyntaxReference, SyntaxSet};
use syntect_assets::assets::HighlightingAssets;

/// A simple style used for diff highlighting (foreground + modifiers).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextStyle {
    pub fg: (u8, u8, u8),
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
}

/// A highlighted byte range within a line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxHighlight {
    pub start: usize,
    pub end: usize,
    pub style: TextStyle,
}

/// Highlights for every line of a file diff, indexed `[hunk][line]`.
pub type DiffHighlights = Vec<Vec<Vec<SyntaxHighlight>>>;

/// Syntax highlighter using syntect parsers and themes
pub struct SyntaxHighlighter {
    assets: HighlightingAssets,
    theme_name: String,
}

impl SyntaxHighlighter {
    pub fn new(theme_name: Option<&str>) -> Result<Self> {
        let assets = HighlightingAssets::from_binary();
        let theme_name = theme_name
            .map(|s| s.to_string())
            .or_else(|| std::env::var("BAT_THEME").ok())
            .unwrap_or_else(|| HighlightingAssets::default_theme().to_string());
        log::debug!("syntax theme {}", theme_name);
        Ok(Self { assets, theme_name })
    }

    /// Highlight every line of `diff`.
    ///
    /// Old-side lines (context and removed) and new-side lines (context and
    /// added) are parsed as two streams per hunk; context lines take the
    /// new-side result.
    pub fn highlight_diff(&self, diff: &FileDiff) -> DiffHighlights {
        diff.hunks
            .iter()
            .map(|hunk| {
                let mut per_line = vec![Vec::new(); hunk.lines.len()];

                for side in [LineKind::Removed, LineKind::Added] {
                    let indices: Vec<usize> = hunk
                        .lines
                        .iter()
                        .enumerate()
                        .filter(|(_, l)| l.kind == side || l.kind == LineKind::Context)
                        .map(|(i, _)| i)
                        .collect();
                    let texts: Vec<&str> =
                        indices.iter().map(|&i| hunk.lines[i].content.as_str()).collect();

                    for (i, highlights) in indices.into_iter().zip(self.highlight_lines(&texts, &diff.path)) {
                        per_line[i] = highlights;
                    }
                }
                per_line
            })
            .collect()
    }

    /// Highlight consecutive lines of one file.
    pub fn highlight_lines(&self, lines: &[&str], file_path: &str) -> Vec<Vec<SyntaxHighlight>> {
        let theme = self.assets.get_theme(&self.theme_name);
        let Ok(syntax_set) = self.assets.get_syntax_set() else {
            return vec![Vec::new(); lines.len()];
        };
        let syntax = find_syntax(syntax_set, file_path);

        let highlighter = Highlighter::new(theme);
        let mut highlight_state = HighlightState::new(&highlighter, ScopeStack::new());
        let mut parse_state = ParseState::new(syntax);

        let mut per_line: Vec<Vec<SyntaxHighlight>> = Vec::with_capacity(lines.len());

        for line in lines {
            let mut text = String::with_capacity(line.len() + 1);
            text.push_str(line);
            text.push('\n');

            let ops = match parse_state.parse_line(&text, syntax_set) {
                Ok(o) => o,
                Err(e) => {
                    log::debug!("syntax parse failed in {}: {}", file_path, e);
                    per_line.push(Vec::new());
                    continue;
                }
            };

            let iter = HighlightIterator::new(&mut highlight_state, &ops[..], &text, &highlighter);
            let mut line_highlights: Vec<SyntaxHighlight> = Vec::new();
            let mut offset = 0usize;
            for (style, segment) in iter {
                let len = segment.strip_suffix('\n').unwrap_or(segment).len();
                if len == 0 {
                    continue;
                }
                line_highlights.push(SyntaxHighlight {
                    start: offset,
                    end: offset + len,
                    style: to_text_style(style),
                });
                offset += len;
            }
            per_line.push(line_highlights);
        }

        per_line
    }
}

fn find_syntax<'a>(syntax_set: &'a SyntaxSet, file_path: &str) -> &'a SyntaxReference {
    syntax_set
        .find_syntax_for_file(file_path)
        .ok()
        .flatten()
        .or_else(|| {
            std::path::Path::new(file_path)
                .extension()
                .and_then(|ext| ext.to_str())
                .and_then(|ext| syntax_set.find_syntax_by_extension(ext))
        })
        .unwrap_or_else(|| syntax_set.find_syntax_plain_text())
}

fn to_text_style(style: syntect::highlighting::Style) -> TextStyle {
    TextStyle {
        fg: (style.foreground.r, style.foreground.g, style.foreground.b),
        bold: style.font_style.contains(FontStyle::BOLD),
        italic: style.font_style.contains(FontStyle::ITALIC),
        underline: style.font_style.contains(FontStyle::UNDERLINE),
    }
}
