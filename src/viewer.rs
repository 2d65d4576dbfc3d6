//! Diff viewer engine
//!
//! Owns all interactive state for the file on screen: the flattened display
//! rows, cursor, scroll offset, visual selection, search matches and pending
//! two-key sequences. Every operation is a pure state transition; rendering and
//! I/O belong to the host.

use crate::diff::{FileDiff, Line};
use std::collections::BTreeSet;
use std::ops::Range;

/// A renderable row, addressed by its position in the flattened sequence.
///
/// Rows refer to hunks and lines by index into the viewer's `FileDiff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayRow {
    HunkHeader { hunk: usize },
    Code { hunk: usize, line: usize },
}

impl DisplayRow {
    pub fn is_hunk_header(&self) -> bool {
        matches!(self, Self::HunkHeader { .. })
    }

    pub fn hunk(&self) -> usize {
        match *self {
            Self::HunkHeader { hunk } | Self::Code { hunk, .. } => hunk,
        }
    }
}

/// Flatten a file's hunks into display rows: a header row per hunk followed by
/// one row per line.
pub fn flatten(diff: &FileDiff) -> Vec<DisplayRow> {
    let mut rows = Vec::with_capacity(diff.hunks.len() + diff.line_count());
    for (h, hunk) in diff.hunks.iter().enumerate() {
        rows.push(DisplayRow::HunkHeader { hunk: h });
        rows.extend((0..hunk.lines.len()).map(|l| DisplayRow::Code { hunk: h, line: l }));
    }
    rows
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Keys the viewer understands, decoupled from the terminal backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Ctrl(char),
    Up,
    Down,
    PageUp,
    PageDown,
    Home,
    End,
    Tab,
    Esc,
    Other,
}

/// Result of feeding one key to the viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    /// The key was consumed.
    Handled,
    /// A hunk or change-block jump ran off the end of the file.
    FileBoundary(Direction),
    /// Not a viewer key; the host may handle it.
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingKey {
    /// `[` or `]` was pressed; `origin` is the cursor before the change-block jump.
    Bracket { direction: Direction, origin: usize },
    /// First `g` of `gg`.
    G,
}

/// Interactive state for one file's diff.
#[derive(Debug, Clone, Default)]
pub struct DiffViewer {
    diff: Option<FileDiff>,
    rows: Vec<DisplayRow>,
    cursor: usize,
    offset: usize,
    width: usize,
    height: usize,
    visual_anchor: Option<usize>,
    side_by_side: bool,
    search_term: Option<String>,
    search_matches: Vec<usize>,
    pending: Option<PendingKey>,
    /// Line numbers (anchor convention) that carry annotations.
    annotated_lines: BTreeSet<u32>,
    /// Display rows whose anchor line number is annotated.
    annotation_rows: BTreeSet<usize>,
}

impl DiffViewer {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }

    /// Load a new file, resetting position, selection, search and annotations.
    pub fn set_diff(&mut self, diff: Option<FileDiff>) {
        self.rows = diff.as_ref().map(flatten).unwrap_or_default();
        self.diff = diff;
        self.cursor = 0;
        self.offset = 0;
        self.visual_anchor = None;
        self.search_term = None;
        self.search_matches.clear();
        self.pending = None;
        self.annotated_lines.clear();
        self.annotation_rows.clear();
        log::trace!("viewer loaded {} rows", self.rows.len());
    }

    /// Replace the content of the current file, keeping the cursor, scroll and
    /// selection where they were (clamped to the new bounds).
    pub fn refresh_diff(&mut self, diff: Option<FileDiff>) {
        self.rows = diff.as_ref().map(flatten).unwrap_or_default();
        self.diff = diff;

        if self.rows.is_empty() {
            self.cursor = 0;
            self.offset = 0;
            self.visual_anchor = None;
        } else {
            let last = self.rows.len() - 1;
            self.cursor = self.cursor.min(last);
            self.offset = self.offset.min(last);
            self.visual_anchor = self.visual_anchor.map(|a| a.min(last));
            self.adjust_scroll();
        }

        if let Some(term) = self.search_term.take() {
            self.set_search(&term);
        }
        self.rebuild_annotation_rows();
    }

    pub fn diff(&self) -> Option<&FileDiff> {
        self.diff.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[DisplayRow] {
        &self.rows
    }

    pub fn row(&self, idx: usize) -> Option<DisplayRow> {
        self.rows.get(idx).copied()
    }

    pub fn total_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn cursor_row(&self) -> usize {
        self.cursor
    }

    pub fn scroll_offset(&self) -> usize {
        self.offset
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// The code line at `idx`, or `None` for hunk headers and out-of-range rows.
    pub fn line_at(&self, idx: usize) -> Option<&Line> {
        match self.rows.get(idx)? {
            DisplayRow::Code { hunk, line } => self.diff.as_ref()?.hunks.get(*hunk)?.lines.get(*line),
            DisplayRow::HunkHeader { .. } => None,
        }
    }

    /// The `@@` header text at `idx`, if that row is a hunk header.
    pub fn header_at(&self, idx: usize) -> Option<&str> {
        match self.rows.get(idx)? {
            DisplayRow::HunkHeader { hunk } => {
                self.diff.as_ref()?.hunks.get(*hunk).map(|h| h.header.as_str())
            }
            DisplayRow::Code { .. } => None,
        }
    }

    pub fn current_line(&self) -> Option<&Line> {
        self.line_at(self.cursor)
    }

    /// Annotation line number at `idx`: new number for added/context lines, old
    /// number for removed lines.
    pub fn line_no_at(&self, idx: usize) -> Option<u32> {
        self.line_at(idx).and_then(Line::anchor_number)
    }

    pub fn current_line_no(&self) -> Option<u32> {
        self.line_no_at(self.cursor)
    }

    /// Contents of the code lines between two rows (inclusive), newline-joined.
    pub fn snippet_range(&self, start: usize, end: usize) -> String {
        (start..=end)
            .filter_map(|i| self.line_at(i))
            .map(|l| l.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Row indices currently inside the viewport.
    pub fn visible_rows(&self) -> Range<usize> {
        let end = (self.offset + self.page()).min(self.rows.len());
        self.offset.min(end)..end
    }

    pub fn set_size(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
        self.adjust_scroll();
    }

    fn page(&self) -> usize {
        self.height.max(1)
    }

    /// Keep the cursor inside the viewport with minimal scrolling.
    fn adjust_scroll(&mut self) {
        let page = self.page();
        if self.cursor < self.offset {
            self.offset = self.cursor;
        }
        if self.cursor >= self.offset + page {
            self.offset = self.cursor + 1 - page;
        }
    }

    fn last_row(&self) -> usize {
        self.rows.len().saturating_sub(1)
    }

    fn set_cursor(&mut self, row: usize) {
        self.cursor = row.min(self.last_row());
        self.adjust_scroll();
    }

    /// Move the cursor by `delta` rows, clamped to the file.
    pub fn move_cursor(&mut self, delta: isize) {
        if self.rows.is_empty() {
            return;
        }
        let target = self.cursor.saturating_add_signed(delta);
        self.set_cursor(target);
    }

    pub fn jump_top(&mut self) {
        self.cursor = 0;
        self.offset = 0;
    }

    pub fn jump_bottom(&mut self) {
        self.set_cursor(self.last_row());
    }

    /// Put the cursor on the last row, used when entering a file from below.
    pub fn set_cursor_to_end(&mut self) {
        self.jump_bottom();
    }

    /// Move the cursor back to a previously saved row.
    pub fn restore_cursor(&mut self, row: usize) {
        self.set_cursor(row);
    }

    pub fn half_page_down(&mut self) {
        self.move_cursor((self.page() / 2).max(1) as isize);
    }

    pub fn half_page_up(&mut self) {
        self.move_cursor(-((self.page() / 2).max(1) as isize));
    }

    pub fn page_down(&mut self) {
        self.move_cursor(self.page() as isize);
    }

    pub fn page_up(&mut self) {
        self.move_cursor(-(self.page() as isize));
    }

    /// Jump to the next/previous hunk header. Returns false at the file edge.
    pub fn jump_hunk(&mut self, direction: Direction) -> bool {
        let target = match direction {
            Direction::Forward => (self.cursor + 1..self.rows.len())
                .find(|&i| self.rows[i].is_hunk_header()),
            Direction::Backward => (0..self.cursor)
                .rev()
                .find(|&i| self.rows[i].is_hunk_header()),
        };
        self.land(target)
    }

    fn is_change_row(&self, idx: usize) -> bool {
        self.line_at(idx).is_some_and(|l| l.kind.is_change())
    }

    /// Jump to the start of the next/previous run of added or removed lines.
    /// Returns false when there is no further change block in that direction.
    pub fn jump_change_block(&mut self, direction: Direction) -> bool {
        let target = match direction {
            Direction::Forward => self.next_change_block(),
            Direction::Backward => self.prev_change_block(),
        };
        self.land(target)
    }

    fn next_change_block(&self) -> Option<usize> {
        let len = self.rows.len();
        let mut i = self.cursor;
        while i < len && self.is_change_row(i) {
            i += 1;
        }
        while i < len && !self.is_change_row(i) {
            i += 1;
        }
        (i < len).then_some(i)
    }

    fn prev_change_block(&self) -> Option<usize> {
        if self.rows.is_empty() {
            return None;
        }
        let mut i = self.cursor;
        if self.is_change_row(i) {
            i = i.checked_sub(1)?;
        }
        while !self.is_change_row(i) {
            i = i.checked_sub(1)?;
        }
        while i > 0 && self.is_change_row(i - 1) {
            i -= 1;
        }
        Some(i)
    }

    fn land(&mut self, target: Option<usize>) -> bool {
        match target {
            Some(row) => {
                self.set_cursor(row);
                true
            }
            None => false,
        }
    }

    /// Enter visual mode anchored at the cursor, or leave it.
    pub fn toggle_visual(&mut self) {
        self.visual_anchor = match self.visual_anchor {
            Some(_) => None,
            None => Some(self.cursor),
        };
    }

    pub fn exit_visual_mode(&mut self) {
        self.visual_anchor = None;
    }

    pub fn in_visual_mode(&self) -> bool {
        self.visual_anchor.is_some()
    }

    /// Selected rows as an ordered, inclusive `(start, end)` pair.
    pub fn visual_range(&self) -> Option<(usize, usize)> {
        self.visual_anchor
            .map(|anchor| (anchor.min(self.cursor), anchor.max(self.cursor)))
    }

    pub fn in_visual_range(&self, idx: usize) -> bool {
        self.visual_range()
            .is_some_and(|(start, end)| (start..=end).contains(&idx))
    }

    pub fn toggle_side_by_side(&mut self) {
        self.side_by_side = !self.side_by_side;
    }

    pub fn set_side_by_side(&mut self, enabled: bool) {
        self.side_by_side = enabled;
    }

    pub fn is_side_by_side(&self) -> bool {
        self.side_by_side
    }

    /// Record the rows whose content contains `term`. An empty term clears the search.
    pub fn set_search(&mut self, term: &str) {
        self.search_matches.clear();
        if term.is_empty() {
            self.search_term = None;
            return;
        }
        self.search_matches = (0..self.rows.len())
            .filter(|&i| self.line_at(i).is_some_and(|l| l.content.contains(term)))
            .collect();
        self.search_term = Some(term.to_string());
    }

    pub fn search_term(&self) -> Option<&str> {
        self.search_term.as_deref()
    }

    pub fn search_matches(&self) -> &[usize] {
        &self.search_matches
    }

    pub fn is_search_match(&self, idx: usize) -> bool {
        self.search_matches.binary_search(&idx).is_ok()
    }

    /// Move to the next match after the cursor, wrapping to the first.
    pub fn search_next(&mut self) -> bool {
        let Some(&first) = self.search_matches.first() else {
            return false;
        };
        let target = self
            .search_matches
            .iter()
            .copied()
            .find(|&i| i > self.cursor)
            .unwrap_or(first);
        self.set_cursor(target);
        true
    }

    /// Move to the previous match before the cursor, wrapping to the last.
    pub fn search_prev(&mut self) -> bool {
        let Some(&last) = self.search_matches.last() else {
            return false;
        };
        let target = self
            .search_matches
            .iter()
            .rev()
            .copied()
            .find(|&i| i < self.cursor)
            .unwrap_or(last);
        self.set_cursor(target);
        true
    }

    /// Set the annotated line numbers for this file and recompute marker rows.
    pub fn set_annotated_lines(&mut self, lines: impl IntoIterator<Item = u32>) {
        self.annotated_lines = lines.into_iter().collect();
        self.rebuild_annotation_rows();
    }

    fn rebuild_annotation_rows(&mut self) {
        self.annotation_rows = if self.annotated_lines.is_empty() {
            BTreeSet::new()
        } else {
            (0..self.rows.len())
                .filter(|&i| {
                    self.line_no_at(i)
                        .is_some_and(|n| self.annotated_lines.contains(&n))
                })
                .collect()
        };
    }

    pub fn has_annotation(&self, idx: usize) -> bool {
        self.annotation_rows.contains(&idx)
    }

    pub fn annotation_rows(&self) -> &BTreeSet<usize> {
        &self.annotation_rows
    }

    /// Jump to the next/previous annotated row relative to the cursor.
    pub fn jump_comment(&mut self, direction: Direction) -> bool {
        let target = match direction {
            Direction::Forward => self.annotation_rows.range(self.cursor + 1..).next().copied(),
            Direction::Backward => self.annotation_rows.range(..self.cursor).next_back().copied(),
        };
        self.land(target)
    }

    /// True while the first key of a two-key sequence is held.
    pub fn has_pending_key(&self) -> bool {
        self.pending.is_some()
    }

    /// The direction and pre-jump cursor of a pending `[`/`]`.
    pub fn pending_bracket(&self) -> Option<(Direction, usize)> {
        match self.pending {
            Some(PendingKey::Bracket { direction, origin }) => Some((direction, origin)),
            _ => None,
        }
    }

    pub fn clear_pending_key(&mut self) {
        self.pending = None;
    }

    /// Apply one key press.
    ///
    /// A pending prefix resolves against this key first; if the key is not the
    /// expected continuation the prefix is dropped and the key handled normally.
    pub fn handle_key(&mut self, key: Key) -> KeyOutcome {
        if let Some(pending) = self.pending.take() {
            match (pending, key) {
                (PendingKey::Bracket { direction, origin }, Key::Char('c')) => {
                    self.restore_cursor(origin);
                    self.jump_comment(direction);
                    return KeyOutcome::Handled;
                }
                (PendingKey::G, Key::Char('g')) => {
                    self.jump_top();
                    return KeyOutcome::Handled;
                }
                _ => {}
            }
        }

        match key {
            Key::Char('j') | Key::Down => self.move_cursor(1),
            Key::Char('k') | Key::Up => self.move_cursor(-1),
            Key::Char('g') => self.pending = Some(PendingKey::G),
            Key::Home => self.jump_top(),
            Key::Char('G') | Key::End => self.jump_bottom(),
            Key::Ctrl('d') => self.half_page_down(),
            Key::Ctrl('u') => self.half_page_up(),
            Key::Ctrl('f') | Key::PageDown => self.page_down(),
            Key::Ctrl('b') | Key::PageUp => self.page_up(),
            Key::Char('}') => return self.boundary(Direction::Forward, |v, d| v.jump_hunk(d)),
            Key::Char('{') => return self.boundary(Direction::Backward, |v, d| v.jump_hunk(d)),
            Key::Char(']') => return self.bracket(Direction::Forward),
            Key::Char('[') => return self.bracket(Direction::Backward),
            Key::Char('v') => self.toggle_visual(),
            Key::Esc => self.exit_visual_mode(),
            Key::Tab => self.toggle_side_by_side(),
            Key::Char('n') => {
                self.search_next();
            }
            Key::Char('N') => {
                self.search_prev();
            }
            _ => return KeyOutcome::Ignored,
        }
        KeyOutcome::Handled
    }

    fn boundary(
        &mut self,
        direction: Direction,
        jump: impl FnOnce(&mut Self, Direction) -> bool,
    ) -> KeyOutcome {
        if jump(self, direction) {
            KeyOutcome::Handled
        } else {
            KeyOutcome::FileBoundary(direction)
        }
    }

    fn bracket(&mut self, direction: Direction) -> KeyOutcome {
        let origin = self.cursor;
        let outcome = self.boundary(direction, |v, d| v.jump_change_block(d));
        self.pending = Some(PendingKey::Bracket { direction, origin });
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{parse_diff, LineKind};
    use pretty_assertions::assert_eq;

    // Rows:
    //  0 @@ -1,4 +1,4 @@   7 " e"
    //  1 " a"              8 "-f"
    //  2 "-b"              9 "+F"
    //  3 "+B"             10 "+G"
    //  4 " c"             11 " h"
    //  5 " d"             12 " i"
    //  6 @@ -10,4 +10,5 @@
    const FIXTURE: &str = "diff --git a/lib.rs b/lib.rs
--- a/lib.rs
+++ b/lib.rs
@@ -1,4 +1,4 @@
 a
-b
+B
 c
 d
@@ -10,4 +10,5 @@ fn second() {
 e
-f
+F
+G
 h
 i
";

    fn fixture() -> FileDiff {
        parse_diff(FIXTURE).unwrap().remove(0)
    }

    fn viewer(height: usize) -> DiffViewer {
        let mut v = DiffViewer::new(80, height);
        v.set_diff(Some(fixture()));
        v
    }

    fn small_diff() -> FileDiff {
        parse_diff("@@ -1,3 +1,3 @@\n x\n-y\n+z\n w\n").unwrap().remove(0)
    }

    #[test]
    fn test_flatten() {
        let diff = fixture();
        let rows = flatten(&diff);
        let expected: usize = diff.hunks.iter().map(|h| 1 + h.lines.len()).sum();
        assert_eq!(rows.len(), expected);
        assert_eq!(rows[0], DisplayRow::HunkHeader { hunk: 0 });
        assert_eq!(rows[1], DisplayRow::Code { hunk: 0, line: 0 });
        assert_eq!(rows[6], DisplayRow::HunkHeader { hunk: 1 });
        assert_eq!(rows[12], DisplayRow::Code { hunk: 1, line: 5 });
    }

    #[test]
    fn test_flatten_empty() {
        assert!(flatten(&FileDiff::all_added("x", "")).is_empty());
    }

    #[test]
    fn test_current_line_semantics() {
        let mut v = viewer(20);
        assert!(v.current_line().is_none());
        assert_eq!(v.header_at(0), Some("@@ -1,4 +1,4 @@"));
        assert_eq!(v.current_line_no(), None);

        v.move_cursor(2);
        assert_eq!(v.current_line().unwrap().kind, LineKind::Removed);
        assert_eq!(v.current_line_no(), Some(2));

        v.move_cursor(8);
        assert_eq!(v.current_line().unwrap().content, "G");
        assert_eq!(v.current_line_no(), Some(12));
        assert_eq!(v.line_no_at(12), Some(14));
        assert_eq!(v.line_no_at(99), None);
    }

    #[test]
    fn test_linear_moves_clamp() {
        let mut v = viewer(20);
        v.handle_key(Key::Char('k'));
        assert_eq!(v.cursor_row(), 0);
        for _ in 0..20 {
            v.handle_key(Key::Char('j'));
        }
        assert_eq!(v.cursor_row(), 12);
        v.handle_key(Key::Up);
        assert_eq!(v.cursor_row(), 11);
    }

    #[test]
    fn test_scroll_follows_cursor() {
        let mut v = viewer(4);
        v.move_cursor(5);
        assert_eq!(v.scroll_offset(), 2);
        assert_eq!(v.visible_rows(), 2..6);
        v.move_cursor(-1);
        assert_eq!(v.scroll_offset(), 2);
        v.move_cursor(-3);
        assert_eq!(v.scroll_offset(), 1);
        v.handle_key(Key::Char('G'));
        assert_eq!((v.cursor_row(), v.scroll_offset()), (12, 9));
        v.handle_key(Key::Char('g'));
        v.handle_key(Key::Char('g'));
        assert_eq!((v.cursor_row(), v.scroll_offset()), (0, 0));
    }

    #[test]
    fn test_page_moves() {
        let mut v = viewer(4);
        v.handle_key(Key::Ctrl('d'));
        assert_eq!(v.cursor_row(), 2);
        v.handle_key(Key::Ctrl('f'));
        assert_eq!(v.cursor_row(), 6);
        v.handle_key(Key::Ctrl('f'));
        v.handle_key(Key::Ctrl('f'));
        assert_eq!(v.cursor_row(), 12);
        v.handle_key(Key::Ctrl('u'));
        assert_eq!(v.cursor_row(), 10);
        v.handle_key(Key::Ctrl('b'));
        assert_eq!(v.cursor_row(), 6);
        v.handle_key(Key::PageUp);
        v.handle_key(Key::PageUp);
        assert_eq!(v.cursor_row(), 0);
    }

    #[test]
    fn test_pending_g_reprocesses_other_key() {
        let mut v = viewer(20);
        v.move_cursor(3);
        assert_eq!(v.handle_key(Key::Char('g')), KeyOutcome::Handled);
        assert!(v.has_pending_key());
        v.handle_key(Key::Char('j'));
        assert!(!v.has_pending_key());
        assert_eq!(v.cursor_row(), 4);
    }

    #[test]
    fn test_hunk_jumps() {
        let mut v = viewer(20);
        assert_eq!(v.handle_key(Key::Char('}')), KeyOutcome::Handled);
        assert_eq!(v.cursor_row(), 6);
        assert_eq!(
            v.handle_key(Key::Char('}')),
            KeyOutcome::FileBoundary(Direction::Forward)
        );
        assert_eq!(v.cursor_row(), 6);
        v.move_cursor(3);
        assert_eq!(v.handle_key(Key::Char('{')), KeyOutcome::Handled);
        assert_eq!(v.cursor_row(), 6);
        assert_eq!(v.handle_key(Key::Char('{')), KeyOutcome::Handled);
        assert_eq!(v.cursor_row(), 0);
        assert_eq!(
            v.handle_key(Key::Char('{')),
            KeyOutcome::FileBoundary(Direction::Backward)
        );
    }

    #[test]
    fn test_change_block_forward() {
        let mut v = viewer(20);
        assert!(v.jump_change_block(Direction::Forward));
        assert_eq!(v.cursor_row(), 2);
        // From inside a run, skip context rows and the hunk header.
        v.move_cursor(1);
        assert!(v.jump_change_block(Direction::Forward));
        assert_eq!(v.cursor_row(), 8);
        assert!(!v.jump_change_block(Direction::Forward));
        assert_eq!(v.cursor_row(), 8);
    }

    #[test]
    fn test_change_block_backward() {
        let mut v = viewer(20);
        v.jump_bottom();
        assert!(v.jump_change_block(Direction::Backward));
        assert_eq!(v.cursor_row(), 8);
        assert!(v.jump_change_block(Direction::Backward));
        assert_eq!(v.cursor_row(), 2);
        assert!(!v.jump_change_block(Direction::Backward));
        assert_eq!(v.cursor_row(), 2);

        // Mid-block, the first jump lands on the start of the current block.
        v.restore_cursor(10);
        assert!(v.jump_change_block(Direction::Backward));
        assert_eq!(v.cursor_row(), 8);
    }

    #[test]
    fn test_change_block_boundary_outcome() {
        let mut v = viewer(20);
        v.restore_cursor(9);
        assert_eq!(
            v.handle_key(Key::Char(']')),
            KeyOutcome::FileBoundary(Direction::Forward)
        );
        assert_eq!(v.pending_bracket(), Some((Direction::Forward, 9)));
    }

    #[test]
    fn test_visual_range_ordered() {
        let mut v = viewer(20);
        v.move_cursor(5);
        v.handle_key(Key::Char('v'));
        assert_eq!(v.visual_range(), Some((5, 5)));
        v.move_cursor(-3);
        assert_eq!(v.visual_range(), Some((2, 5)));
        v.move_cursor(6);
        assert_eq!(v.visual_range(), Some((5, 8)));
        assert!(v.in_visual_range(6));
        assert!(!v.in_visual_range(4));

        v.handle_key(Key::Char('v'));
        assert_eq!(v.visual_range(), None);
        assert_eq!(v.cursor_row(), 8);

        v.handle_key(Key::Char('v'));
        v.handle_key(Key::Esc);
        assert!(!v.in_visual_mode());
    }

    #[test]
    fn test_snippet_range_skips_headers() {
        let v = viewer(20);
        assert_eq!(v.snippet_range(4, 8), "c\nd\ne\nf");
    }

    #[test]
    fn test_side_by_side_toggle() {
        let mut v = viewer(20);
        v.move_cursor(4);
        v.handle_key(Key::Tab);
        assert!(v.is_side_by_side());
        assert_eq!(v.cursor_row(), 4);
        assert_eq!(v.total_rows(), 13);
        v.handle_key(Key::Tab);
        assert!(!v.is_side_by_side());
    }

    #[test]
    fn test_search() {
        let mut v = viewer(20);
        v.set_search("F");
        assert_eq!(v.search_matches(), &[9]);
        assert_eq!(v.search_term(), Some("F"));
        assert_eq!(v.cursor_row(), 0);

        v.set_search("");
        assert!(v.search_matches().is_empty());
        assert_eq!(v.search_term(), None);
        assert!(!v.search_next());
    }

    #[test]
    fn test_search_wraps() {
        let mut v = viewer(20);
        v.search_matches = vec![2, 5, 9];
        v.restore_cursor(9);
        v.handle_key(Key::Char('n'));
        assert_eq!(v.cursor_row(), 2);
        v.handle_key(Key::Char('n'));
        assert_eq!(v.cursor_row(), 5);
        v.handle_key(Key::Char('N'));
        assert_eq!(v.cursor_row(), 2);
        v.handle_key(Key::Char('N'));
        assert_eq!(v.cursor_row(), 9);
    }

    #[test]
    fn test_annotation_rows_follow_anchor_numbers() {
        let mut v = viewer(20);
        // Old line 2 and new line 2 share the number; both rows are marked.
        v.set_annotated_lines([2, 11]);
        assert_eq!(
            v.annotation_rows().iter().copied().collect::<Vec<_>>(),
            vec![2, 3, 8, 9]
        );
        assert!(v.has_annotation(8));
        assert!(!v.has_annotation(0));
    }

    #[test]
    fn test_comment_jumps() {
        let mut v = viewer(20);
        v.set_annotated_lines([2, 11]);
        assert!(v.jump_comment(Direction::Forward));
        assert_eq!(v.cursor_row(), 2);
        v.restore_cursor(5);
        assert!(v.jump_comment(Direction::Backward));
        assert_eq!(v.cursor_row(), 3);
        v.restore_cursor(12);
        assert!(!v.jump_comment(Direction::Forward));
        assert_eq!(v.cursor_row(), 12);
    }

    #[test]
    fn test_bracket_c_uses_pre_bracket_cursor() {
        let mut v = viewer(20);
        v.set_annotated_lines([2, 11]);
        v.restore_cursor(4);

        // `[` alone jumps to the previous change block...
        v.handle_key(Key::Char('['));
        assert_eq!(v.cursor_row(), 2);
        // ...but `[c` resolves from row 4, not row 2.
        v.handle_key(Key::Char('c'));
        assert_eq!(v.cursor_row(), 3);
        assert!(!v.has_pending_key());

        v.restore_cursor(4);
        v.handle_key(Key::Char(']'));
        v.handle_key(Key::Char('c'));
        assert_eq!(v.cursor_row(), 8);
    }

    #[test]
    fn test_bracket_then_other_key() {
        let mut v = viewer(20);
        v.handle_key(Key::Char(']'));
        assert_eq!(v.cursor_row(), 2);
        v.handle_key(Key::Char(']'));
        assert_eq!(v.cursor_row(), 8);
        v.handle_key(Key::Char('k'));
        assert_eq!(v.cursor_row(), 7);
        assert!(!v.has_pending_key());
    }

    #[test]
    fn test_set_diff_resets_state() {
        let mut v = viewer(4);
        v.set_annotated_lines([1]);
        v.set_search("a");
        v.move_cursor(9);
        v.toggle_visual();

        v.set_diff(Some(small_diff()));
        assert_eq!((v.cursor_row(), v.scroll_offset()), (0, 0));
        assert!(!v.in_visual_mode());
        assert!(v.search_matches().is_empty());
        assert!(v.annotation_rows().is_empty());
        assert_eq!(v.total_rows(), 5);
    }

    #[test]
    fn test_refresh_clamps_to_smaller_diff() {
        let mut v = viewer(3);
        v.jump_bottom();
        v.toggle_visual();
        assert_eq!((v.cursor_row(), v.scroll_offset()), (12, 10));

        v.refresh_diff(Some(small_diff()));
        assert!(v.cursor_row() < v.total_rows());
        assert!(v.scroll_offset() < v.total_rows());
        assert_eq!(v.cursor_row(), 4);
        assert_eq!(v.scroll_offset(), 4);
        assert_eq!(v.visual_range(), Some((4, 4)));
    }

    #[test]
    fn test_refresh_preserves_position() {
        let mut v = viewer(5);
        v.move_cursor(7);
        v.set_search("h");
        v.set_annotated_lines([13]);
        let before = (v.cursor_row(), v.scroll_offset());

        let mut updated = fixture();
        updated.hunks[1].lines[5].content = "h again".to_string();
        v.refresh_diff(Some(updated));

        assert_eq!((v.cursor_row(), v.scroll_offset()), before);
        assert_eq!(v.search_matches(), &[11, 12]);
        assert_eq!(v.annotation_rows().iter().copied().collect::<Vec<_>>(), vec![11]);
    }

    #[test]
    fn test_refresh_with_nothing() {
        let mut v = viewer(5);
        v.move_cursor(7);
        v.refresh_diff(None);
        assert!(v.is_empty());
        assert_eq!((v.cursor_row(), v.scroll_offset()), (0, 0));
        assert!(v.current_line().is_none());
        v.handle_key(Key::Char('j'));
        v.handle_key(Key::Char('G'));
        assert_eq!(v.cursor_row(), 0);
        assert!(!v.jump_change_block(Direction::Backward));
    }

    #[test]
    fn test_unknown_key_ignored() {
        let mut v = viewer(5);
        assert_eq!(v.handle_key(Key::Char('c')), KeyOutcome::Ignored);
        assert_eq!(v.handle_key(Key::Other), KeyOutcome::Ignored);
    }
}
