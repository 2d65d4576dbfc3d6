//! Side-by-side pairing of diff lines
//!
//! Removed lines are queued and matched, in order, with the added lines that
//! follow them. Context lines appear on both sides.

use crate::diff::{Line, LineKind};
use similar::{DiffTag, TextDiff};
use std::collections::VecDeque;
use std::ops::Range;

/// Below this similarity, paired lines are shown without intra-line emphasis.
const MIN_INLINE_RATIO: f32 = 0.3;

/// One row of the side-by-side layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinePair<'a> {
    pub left: Option<&'a Line>,
    pub right: Option<&'a Line>,
}

impl<'a> LinePair<'a> {
    /// A removed line with an added replacement.
    pub fn is_replacement(&self) -> bool {
        matches!(
            (self.left, self.right),
            (Some(l), Some(r)) if l.kind == LineKind::Removed && r.kind == LineKind::Added
        )
    }
}

/// Pair lines for side-by-side display.
///
/// Every input line appears in exactly one pair (context lines as both sides of
/// the same pair) and pairs follow the order in which lines first appear.
pub fn pair_lines(lines: &[Line]) -> Vec<LinePair<'_>> {
    pair_indices(lines)
        .into_iter()
        .map(|(left, right)| LinePair {
            left: left.map(|i| &lines[i]),
            right: right.map(|i| &lines[i]),
        })
        .collect()
}

/// Same pairing as [`pair_lines`], as `(left, right)` indices into `lines`.
pub fn pair_indices(lines: &[Line]) -> Vec<(Option<usize>, Option<usize>)> {
    let mut pairs = Vec::with_capacity(lines.len());
    let mut removed: VecDeque<usize> = VecDeque::new();

    for (i, line) in lines.iter().enumerate() {
        match line.kind {
            LineKind::Removed => removed.push_back(i),
            LineKind::Added => pairs.push((removed.pop_front(), Some(i))),
            LineKind::Context => {
                pairs.extend(removed.drain(..).map(|r| (Some(r), None)));
                pairs.push((Some(i), Some(i)));
            }
        }
    }

    pairs.extend(removed.drain(..).map(|r| (Some(r), None)));
    pairs
}

/// For each line, the index of the line it is paired against as a replacement.
pub fn replacement_partners(lines: &[Line]) -> Vec<Option<usize>> {
    let mut partners = vec![None; lines.len()];
    for (left, right) in pair_indices(lines) {
        if let (Some(l), Some(r)) = (left, right) {
            if l != r {
                partners[l] = Some(r);
                partners[r] = Some(l);
            }
        }
    }
    partners
}

/// Byte ranges that differ between a removed line and its replacement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InlineChanges {
    pub old: Vec<Range<usize>>,
    pub new: Vec<Range<usize>>,
}

/// Compute character-level changed spans between two paired lines.
pub fn inline_changes(old: &str, new: &str) -> InlineChanges {
    let diff = TextDiff::from_chars(old, new);
    if diff.ratio() < MIN_INLINE_RATIO {
        return InlineChanges::default();
    }

    let old_offsets = char_offsets(old);
    let new_offsets = char_offsets(new);
    let mut changes = InlineChanges::default();

    for op in diff.ops() {
        if op.tag() == DiffTag::Equal {
            continue;
        }
        let r = op.old_range();
        if !r.is_empty() {
            push_merged(&mut changes.old, old_offsets[r.start]..old_offsets[r.end]);
        }
        let r = op.new_range();
        if !r.is_empty() {
            push_merged(&mut changes.new, new_offsets[r.start]..new_offsets[r.end]);
        }
    }

    changes
}

/// Byte offset of every char boundary, including the end of the string.
fn char_offsets(s: &str) -> Vec<usize> {
    s.char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(s.len()))
        .collect()
}

fn push_merged(ranges: &mut Vec<Range<usize>>, range: Range<usize>) {
    match ranges.last_mut() {
        Some(last) if last.end == range.start => last.end = range.end,
        _ => ranges.push(range),
    }
}
