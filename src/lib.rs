//! revdiff - review a branch or working tree diff and hand the comments to a
//! coding agent
//!
//! The viewing core (`diff`, `viewer`, `sidebyside`) has no terminal
//! dependencies; `tui` hosts it with ratatui.

pub mod comments;
pub mod config;
pub mod diff;
pub mod git;
pub mod output;
pub mod sidebyside;
pub mod syntax;
pub mod tui;
pub mod viewer;
