//! TUI layer using ratatui and crossterm
//!
//! Hosts the file list, diff pane, comment and search prompts, help overlay and
//! output selector. Uncommitted reviews refresh in the background.

use crate::comments::{format_review, Comment, CommentStore, ReviewFormat};
use crate::config::Config;
use crate::diff::{ChangedFile, FileDiff, FileStatus, Line as DiffLine, LineKind};
use crate::git::DiffSource;
use crate::output::{detect_targets, Deliverer, OutputTarget, TargetKind};
use crate::sidebyside::{inline_changes, pair_indices, replacement_partners};
use crate::syntax::{DiffHighlights, SyntaxHighlight, SyntaxHighlighter};
use crate::viewer::{DiffViewer, Direction, DisplayRow, Key, KeyOutcome};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction as LayoutDirection, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
    Frame, Terminal,
};
use std::io::{self, Stdout};
use std::ops::Range;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tui_textarea::{CursorMove, TextArea};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

const ADDED_BG: Color = Color::Rgb(18, 48, 28);
const REMOVED_BG: Color = Color::Rgb(58, 20, 24);
const ADDED_EMPHASIS_BG: Color = Color::Rgb(36, 100, 52);
const REMOVED_EMPHASIS_BG: Color = Color::Rgb(122, 36, 44);
const SELECTION_BG: Color = Color::Rgb(48, 52, 92);
const SEARCH_BG: Color = Color::Rgb(200, 170, 40);

/// What is being reviewed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewMode {
    /// Commits on `branch` since `base`
    Branch { base: String, branch: String },
    /// Working tree and index against HEAD
    Uncommitted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Focus {
    FileList,
    Diff,
}

struct CommentDraft {
    file_path: String,
    start_line: u32,
    end_line: u32,
    kind: LineKind,
    snippet: String,
    input: TextArea<'static>,
}

struct OutputSelector {
    targets: Vec<OutputTarget>,
    cursor: usize,
    content: String,
    error: Option<String>,
}

/// Cursor position before a `[`/`]` that crossed into another file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BracketOrigin {
    file: usize,
    cursor: usize,
    direction: Direction,
}

/// Outcome of a background refresh
struct RefreshResult {
    requested_path: Option<String>,
    files: Result<Vec<ChangedFile>>,
    diff: Option<Result<FileDiff>>,
}

struct Refresher {
    tx: Sender<RefreshResult>,
    rx: Receiver<RefreshResult>,
    interval: Duration,
    last: Instant,
    in_progress: bool,
    watch_rx: Option<Receiver<()>>,
    _watcher: Option<RecommendedWatcher>,
}

/// Application state
pub struct App {
    source: Arc<dyn DiffSource>,
    mode: ReviewMode,
    files: Vec<ChangedFile>,
    selected: usize,
    /// Path whose diff the viewer currently holds
    shown_path: Option<String>,
    viewer: DiffViewer,
    highlighter: Option<SyntaxHighlighter>,
    highlights: Option<DiffHighlights>,
    /// Replacement partners per hunk of the shown diff
    partners: Vec<Vec<Option<usize>>>,
    comments: CommentStore,

    // UI state
    focus: Focus,
    draft: Option<CommentDraft>,
    search: Option<TextArea<'static>>,
    selector: Option<OutputSelector>,
    show_help: bool,
    pending_z: bool,
    bracket_origin: Option<BracketOrigin>,
    message: Option<String>,
    file_error: Option<String>,
    file_list_width: u16,

    format: ReviewFormat,
    deliverer: Deliverer,
    refresh: Refresher,
    exit_message: Option<String>,
}

impl App {
    pub fn new(
        source: Arc<dyn DiffSource>,
        mode: ReviewMode,
        files: Vec<ChangedFile>,
        config: &Config,
    ) -> Self {
        let highlighter = if config.syntax_highlighting {
            match SyntaxHighlighter::new(config.syntax_theme.as_deref()) {
                Ok(h) => Some(h),
                Err(e) => {
                    log::warn!("syntax highlighting disabled: {e:#}");
                    None
                }
            }
        } else {
            None
        };

        let mut viewer = DiffViewer::new(80, 20);
        viewer.set_side_by_side(config.side_by_side);

        let (tx, rx) = mpsc::channel();
        let mut app = Self {
            source,
            mode,
            files,
            selected: 0,
            shown_path: None,
            viewer,
            highlighter,
            highlights: None,
            partners: Vec::new(),
            comments: CommentStore::new(),
            focus: Focus::FileList,
            draft: None,
            search: None,
            selector: None,
            show_help: false,
            pending_z: false,
            bracket_origin: None,
            message: None,
            file_error: None,
            file_list_width: config.file_list_width,
            format: config.format,
            deliverer: Deliverer::new(std::env::temp_dir(), config.format),
            refresh: Refresher {
                tx,
                rx,
                interval: Duration::from_millis(config.refresh_interval_ms.max(100)),
                last: Instant::now(),
                in_progress: false,
                watch_rx: None,
                _watcher: None,
            },
            exit_message: None,
        };
        app.load_selected_file();
        app
    }

    /// Trigger early refreshes when files under `root` change.
    pub fn watch(&mut self, root: &Path) -> Result<()> {
        let (tx, rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let Ok(event) = res else { return };
            // Our own git invocations touch .git; ignore those.
            let outside_git = event
                .paths
                .iter()
                .any(|p| !p.components().any(|c| c.as_os_str() == ".git"));
            if outside_git {
                let _ = tx.send(());
            }
        })
        .context("Failed to create file watcher")?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", root.display()))?;

        self.refresh.watch_rx = Some(rx);
        self.refresh._watcher = Some(watcher);
        Ok(())
    }

    fn selected_file(&self) -> Option<&ChangedFile> {
        self.files.get(self.selected)
    }

    fn selected_path(&self) -> Option<String> {
        self.selected_file().map(|f| f.path.clone())
    }

    fn fetch_diff(&self, path: &str) -> Result<FileDiff> {
        match &self.mode {
            ReviewMode::Branch { base, .. } => self.source.file_diff(base, path),
            ReviewMode::Uncommitted => self.source.uncommitted_file_diff(path),
        }
    }

    /// Load the selected file into the viewer, resetting its position.
    fn load_selected_file(&mut self) {
        self.file_error = None;
        let Some(file) = self.selected_file().cloned() else {
            self.shown_path = None;
            self.viewer.set_diff(None);
            self.update_render_cache();
            return;
        };

        let diff = match self.fetch_diff(&file.path) {
            Ok(diff) => diff,
            Err(e) => {
                log::warn!("failed to load diff for {}: {e:#}", file.path);
                self.file_error = Some(format!("{e:#}"));
                FileDiff::new(file.path.as_str(), file.status)
            }
        };

        self.viewer.set_diff(Some(diff));
        self.shown_path = Some(file.path);
        self.update_markers();
        self.update_render_cache();
    }

    fn update_markers(&mut self) {
        if let Some(path) = &self.shown_path {
            let lines = self.comments.lines_for_file(path);
            self.viewer.set_annotated_lines(lines);
        }
    }

    /// Recompute per-diff render data after the viewer's content changes.
    fn update_render_cache(&mut self) {
        self.highlights = match (&self.highlighter, self.viewer.diff()) {
            (Some(h), Some(diff)) => Some(h.highlight_diff(diff)),
            _ => None,
        };
        self.partners = self
            .viewer
            .diff()
            .map(|diff| {
                diff.hunks
                    .iter()
                    .map(|h| replacement_partners(&h.lines))
                    .collect()
            })
            .unwrap_or_default();
    }

    /// Size the viewer to the diff pane for a terminal of the given size.
    pub fn resize(&mut self, width: u16, height: u16) {
        let pane_width = width.saturating_sub(self.file_list_width).saturating_sub(2);
        let pane_height = height
            .saturating_sub(1)
            .saturating_sub(self.bottom_height())
            .saturating_sub(2);
        self.viewer
            .set_size(pane_width as usize, pane_height as usize);
    }

    fn bottom_height(&self) -> u16 {
        if self.draft.is_some() {
            3
        } else {
            1
        }
    }

    /// Handle a key press. Returns true when the application should exit.
    pub fn handle_key(&mut self, key: KeyEvent) -> bool {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return true;
        }
        self.message = None;

        if self.selector.is_some() {
            return self.handle_selector_key(key);
        }
        if self.draft.is_some() {
            self.handle_draft_key(key);
            return false;
        }
        if self.search.is_some() {
            self.handle_search_key(key);
            return false;
        }
        self.handle_normal_key(key)
    }

    fn handle_normal_key(&mut self, key: KeyEvent) -> bool {
        if self.show_help {
            if matches!(key.code, KeyCode::Char('?') | KeyCode::Esc) {
                self.show_help = false;
            }
            return false;
        }

        if key.code == KeyCode::Char('Z') {
            if self.pending_z {
                self.pending_z = false;
                return self.finish_review();
            }
            self.pending_z = true;
            return false;
        }
        self.pending_z = false;

        let bracket = self.bracket_origin.take();
        if self.focus == Focus::Diff {
            if self.viewer.has_pending_key() {
                let outcome = self.viewer.handle_key(viewer_key(&key));
                if outcome != KeyOutcome::Ignored {
                    self.apply_outcome(outcome);
                    return false;
                }
            } else if key.code == KeyCode::Char('c') {
                if let Some(origin) = bracket {
                    self.resume_bracket_comment(origin);
                    return false;
                }
            }
        }

        match (key.code, self.focus) {
            (KeyCode::Char('q'), _) => return true,
            (KeyCode::Char('?'), _) => self.show_help = true,
            (KeyCode::Char('/'), Focus::Diff) => self.search = Some(prompt_input(Vec::new())),
            (KeyCode::Char('h'), Focus::Diff) => self.focus = Focus::FileList,
            (KeyCode::Char('l') | KeyCode::Enter, Focus::FileList) => {
                self.focus = Focus::Diff;
                if self.shown_path != self.selected_path() {
                    self.load_selected_file();
                }
            }
            (KeyCode::Char('c'), Focus::Diff) => self.begin_comment(),
            (KeyCode::Char('D'), Focus::Diff) => self.delete_comment(),
            (_, Focus::FileList) => self.handle_file_list_key(key),
            (_, Focus::Diff) => {
                let outcome = self.viewer.handle_key(viewer_key(&key));
                self.apply_outcome(outcome);
            }
        }
        false
    }

    fn handle_file_list_key(&mut self, key: KeyEvent) {
        let before = self.selected;
        match key.code {
            KeyCode::Char('j') | KeyCode::Down => {
                if self.selected + 1 < self.files.len() {
                    self.selected += 1;
                }
            }
            KeyCode::Char('k') | KeyCode::Up => self.selected = self.selected.saturating_sub(1),
            KeyCode::Char('g') | KeyCode::Home => self.selected = 0,
            KeyCode::Char('G') | KeyCode::End => self.selected = self.files.len().saturating_sub(1),
            _ => {}
        }
        if self.selected != before {
            self.load_selected_file();
        }
    }

    fn apply_outcome(&mut self, outcome: KeyOutcome) {
        if let KeyOutcome::FileBoundary(direction) = outcome {
            self.cross_file(direction);
        }
    }

    /// Move to the neighbouring file after a jump ran off the current one.
    fn cross_file(&mut self, direction: Direction) {
        let target = match direction {
            Direction::Forward => Some(self.selected + 1).filter(|&i| i < self.files.len()),
            Direction::Backward => self.selected.checked_sub(1),
        };
        let Some(idx) = target else { return };

        let origin = self
            .viewer
            .pending_bracket()
            .map(|(direction, cursor)| BracketOrigin {
                file: self.selected,
                cursor,
                direction,
            });

        self.selected = idx;
        self.load_selected_file();
        if direction == Direction::Backward {
            self.viewer.set_cursor_to_end();
        }
        self.bracket_origin = origin;
    }

    /// `]c`/`[c` where the bracket already moved to another file: search for a
    /// comment from where the bracket was pressed.
    fn resume_bracket_comment(&mut self, origin: BracketOrigin) {
        if origin.file != self.selected && origin.file < self.files.len() {
            self.selected = origin.file;
            self.load_selected_file();
        }
        self.viewer.restore_cursor(origin.cursor);
        self.viewer.jump_comment(origin.direction);
    }

    fn begin_comment(&mut self) {
        let Some(path) = self.shown_path.clone() else {
            return;
        };

        let (start_line, end_line, kind, snippet) = if let Some((start, end)) =
            self.viewer.visual_range()
        {
            self.viewer.exit_visual_mode();
            let code_rows: Vec<usize> = (start..=end)
                .filter(|&i| self.viewer.line_at(i).is_some())
                .collect();
            let (Some(&first), Some(&last)) = (code_rows.first(), code_rows.last()) else {
                return;
            };
            let kind = self
                .viewer
                .line_at(first)
                .map_or(LineKind::Context, |l| l.kind);
            (
                self.viewer.line_no_at(first).unwrap_or(0),
                self.viewer.line_no_at(last).unwrap_or(0),
                kind,
                self.viewer.snippet_range(start, end),
            )
        } else if let Some(line) = self.viewer.current_line() {
            let n = line.anchor_number().unwrap_or(0);
            (n, n, line.kind, line.content.clone())
        } else if self.is_binary_selection() {
            // Binary files have no lines; the comment covers the whole file.
            (0, 0, LineKind::Context, String::new())
        } else {
            return;
        };

        let existing = self
            .comments
            .get(&path, start_line)
            .map(|c| c.body.lines().map(str::to_string).collect())
            .unwrap_or_default();

        let title = if end_line != start_line {
            format!(" Comment {}:{}-{} ", path, start_line, end_line)
        } else {
            format!(" Comment {}:{} ", path, start_line)
        };
        let mut input = prompt_input(existing);
        input.set_block(Block::default().borders(Borders::ALL).title(title));

        self.draft = Some(CommentDraft {
            file_path: path,
            start_line,
            end_line,
            kind,
            snippet,
            input,
        });
    }

    fn is_binary_selection(&self) -> bool {
        self.viewer.diff().is_some_and(FileDiff::is_binary)
            || self
                .selected_file()
                .is_some_and(|f| f.status == FileStatus::Binary)
    }

    fn handle_draft_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => self.draft = None,
            KeyCode::Enter => self.submit_draft(),
            _ => {
                if let Some(draft) = self.draft.as_mut() {
                    draft.input.input(key);
                }
            }
        }
    }

    fn submit_draft(&mut self) {
        let Some(draft) = self.draft.take() else {
            return;
        };
        let body = draft.input.lines().join("\n").trim().to_string();
        if body.is_empty() {
            return;
        }

        self.comments.add(Comment {
            file_path: draft.file_path,
            start_line: draft.start_line,
            end_line: draft.end_line,
            kind: draft.kind,
            body,
            code_snippet: draft.snippet,
        });
        self.update_markers();
        self.message = Some("Comment saved".to_string());
    }

    fn delete_comment(&mut self) {
        let Some(path) = self.shown_path.clone() else {
            return;
        };
        let line = self.viewer.current_line_no().unwrap_or(0);
        if self.comments.delete(&path, line) {
            self.update_markers();
            self.message = Some("Comment deleted".to_string());
        }
    }

    fn handle_search_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => self.search = None,
            KeyCode::Enter => {
                if let Some(input) = self.search.take() {
                    let term = input.lines().join("");
                    self.viewer.set_search(&term);
                    if !term.is_empty() {
                        self.message = Some(format!(
                            "{} match(es) for \"{}\"",
                            self.viewer.search_matches().len(),
                            term
                        ));
                    }
                }
            }
            _ => {
                if let Some(input) = self.search.as_mut() {
                    input.input(key);
                }
            }
        }
    }

    /// Format the review and offer output targets. Returns true when there
    /// is nothing to deliver and the app should exit.
    fn finish_review(&mut self) -> bool {
        if self.comments.is_empty() {
            return true;
        }
        match format_review(self.comments.all(), self.format) {
            Ok(content) => {
                let tmux = std::env::var("TMUX").ok();
                let pane = std::env::var("TMUX_PANE").ok();
                self.selector = Some(OutputSelector {
                    targets: detect_targets(tmux.as_deref(), pane.as_deref()),
                    cursor: 0,
                    content,
                    error: None,
                });
            }
            Err(e) => self.message = Some(format!("Failed to format review: {e:#}")),
        }
        false
    }

    fn handle_selector_key(&mut self, key: KeyEvent) -> bool {
        let Some(selector) = self.selector.as_mut() else {
            return false;
        };
        match key.code {
            KeyCode::Char('j') | KeyCode::Down => {
                if selector.cursor + 1 < selector.targets.len() {
                    selector.cursor += 1;
                }
            }
            KeyCode::Char('k') | KeyCode::Up => {
                selector.cursor = selector.cursor.saturating_sub(1);
            }
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::Enter => {
                let Some(target) = selector.targets.get(selector.cursor) else {
                    return false;
                };
                match self.deliverer.deliver(target, &selector.content) {
                    Ok(msg) => {
                        self.exit_message = Some(msg);
                        return true;
                    }
                    Err(e) => {
                        log::warn!("delivery failed: {e:#}");
                        selector.error = Some(format!("{e:#}"));
                    }
                }
            }
            _ => {}
        }
        false
    }

    /// Apply finished refreshes and start a new one when due.
    pub fn tick(&mut self) {
        while let Ok(result) = self.refresh.rx.try_recv() {
            self.apply_refresh(result);
        }
        if self.mode != ReviewMode::Uncommitted {
            return;
        }

        let mut changed = false;
        if let Some(rx) = &self.refresh.watch_rx {
            while rx.try_recv().is_ok() {
                changed = true;
            }
        }

        if !self.refresh.in_progress
            && (changed || self.refresh.last.elapsed() >= self.refresh.interval)
        {
            self.start_refresh();
        }
    }

    fn start_refresh(&mut self) {
        self.refresh.in_progress = true;
        self.refresh.last = Instant::now();

        let source = Arc::clone(&self.source);
        let tx = self.refresh.tx.clone();
        let requested = self.selected_path();
        std::thread::spawn(move || {
            let _ = tx.send(fetch_refresh(source.as_ref(), requested));
        });
    }

    fn apply_refresh(&mut self, result: RefreshResult) {
        self.refresh.in_progress = false;
        let files = match result.files {
            Ok(files) => files,
            Err(e) => {
                log::warn!("refresh failed: {e:#}");
                return;
            }
        };

        let previous = self.selected_path();
        let selected = previous
            .as_ref()
            .and_then(|p| files.iter().position(|f| &f.path == p))
            .unwrap_or_else(|| self.selected.min(files.len().saturating_sub(1)));
        self.selected = selected;
        self.files = files;

        let current = self.selected_path();
        if current.is_none() {
            self.shown_path = None;
            self.viewer.refresh_diff(None);
            self.update_render_cache();
            return;
        }
        if current != self.shown_path {
            self.load_selected_file();
            return;
        }
        if result.requested_path != current {
            log::debug!("discarding refresh for {:?}", result.requested_path);
            return;
        }

        match result.diff {
            Some(Ok(diff)) => {
                self.file_error = None;
                self.viewer.refresh_diff(Some(diff));
                self.update_markers();
                self.update_render_cache();
            }
            Some(Err(e)) => log::warn!("refreshing diff failed: {e:#}"),
            None => {}
        }
    }
}

fn fetch_refresh(source: &dyn DiffSource, requested_path: Option<String>) -> RefreshResult {
    let files = source.uncommitted_files();
    let diff = match (&files, &requested_path) {
        (Ok(files), Some(path)) if files.iter().any(|f| &f.path == path) => {
            Some(source.uncommitted_file_diff(path))
        }
        _ => None,
    };
    RefreshResult {
        requested_path,
        files,
        diff,
    }
}

fn viewer_key(key: &KeyEvent) -> Key {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        if let KeyCode::Char(c) = key.code {
            return Key::Ctrl(c);
        }
    }
    match key.code {
        KeyCode::Char(c) => Key::Char(c),
        KeyCode::Up => Key::Up,
        KeyCode::Down => Key::Down,
        KeyCode::PageUp => Key::PageUp,
        KeyCode::PageDown => Key::PageDown,
        KeyCode::Home => Key::Home,
        KeyCode::End => Key::End,
        KeyCode::Tab => Key::Tab,
        KeyCode::Esc => Key::Esc,
        _ => Key::Other,
    }
}

fn prompt_input(lines: Vec<String>) -> TextArea<'static> {
    let mut input = TextArea::new(lines);
    input.set_cursor_line_style(Style::default());
    input.move_cursor(CursorMove::Bottom);
    input.move_cursor(CursorMove::End);
    input
}

/// Runs the TUI application, returning the delivery message if a review was sent
pub fn run(mut app: App) -> Result<Option<String>> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, &mut app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result.map(|_| app.exit_message.take())
}

fn run_app(terminal: &mut Terminal<CrosstermBackend<Stdout>>, app: &mut App) -> Result<()> {
    loop {
        let size = terminal.size()?;
        app.resize(size.width, size.height);
        terminal.draw(|f| ui(f, app))?;

        if event::poll(POLL_INTERVAL)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press && app.handle_key(key) {
                    return Ok(());
                }
            }
        }
        app.tick();
    }
}

fn ui(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(LayoutDirection::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(app.bottom_height()),
        ])
        .split(f.area());

    let body = Layout::default()
        .direction(LayoutDirection::Horizontal)
        .constraints([Constraint::Length(app.file_list_width), Constraint::Min(0)])
        .split(chunks[1]);

    render_header(f, app, chunks[0]);
    render_file_list(f, app, body[0]);
    render_diff(f, app, body[1]);
    render_status(f, app, chunks[2]);

    if app.show_help {
        render_help(f);
    }
    if let Some(selector) = &app.selector {
        render_selector(f, selector);
    }
}

fn render_header(f: &mut Frame, app: &App, area: Rect) {
    let title = match &app.mode {
        ReviewMode::Branch { base, branch } => format!(" revdiff  {} → {} ", base, branch),
        ReviewMode::Uncommitted => " revdiff  uncommitted changes ".to_string(),
    };
    let mut spans = vec![Span::styled(
        title,
        Style::default().fg(Color::Blue).add_modifier(Modifier::BOLD),
    )];
    if !app.comments.is_empty() {
        spans.push(Span::styled(
            format!(" {} comment(s) ", app.comments.len()),
            Style::default().fg(Color::Yellow),
        ));
    }
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn status_style(status: FileStatus) -> Style {
    let color = match status {
        FileStatus::Added => Color::Green,
        FileStatus::Modified => Color::Yellow,
        FileStatus::Deleted => Color::Red,
        FileStatus::Renamed => Color::Cyan,
        FileStatus::Binary => Color::Magenta,
    };
    Style::default().fg(color)
}

fn render_file_list(f: &mut Frame, app: &App, area: Rect) {
    let focused = app.focus == Focus::FileList;
    let block = Block::default()
        .borders(Borders::ALL)
        .title(format!(" Files ({}) ", app.files.len()))
        .border_style(border_style(focused));

    if app.files.is_empty() {
        f.render_widget(Paragraph::new(" No changed files").block(block), area);
        return;
    }

    let path_width = (area.width as usize).saturating_sub(6);
    let items: Vec<ListItem> = app
        .files
        .iter()
        .map(|file| {
            let marker = if app.comments.for_file(&file.path).next().is_some() {
                "●"
            } else {
                " "
            };
            ListItem::new(Line::from(vec![
                Span::styled(file.status.code().to_string(), status_style(file.status)),
                Span::styled(marker, Style::default().fg(Color::Yellow)),
                Span::raw(truncate_left(&file.path, path_width)),
            ]))
        })
        .collect();

    let highlight = if focused {
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
    } else {
        Style::default().add_modifier(Modifier::BOLD)
    };
    let list = List::new(items)
        .block(block)
        .highlight_symbol("▸ ")
        .highlight_style(highlight);
    let mut state = ListState::default().with_selected(Some(app.selected));
    f.render_stateful_widget(list, area, &mut state);
}

fn border_style(focused: bool) -> Style {
    if focused {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default().fg(Color::DarkGray)
    }
}

/// Shorten `path` from the left to fit `width` display columns.
fn truncate_left(path: &str, width: usize) -> String {
    if path.width() <= width {
        return path.to_string();
    }
    let mut kept: Vec<char> = Vec::new();
    let mut used = 1;
    for c in path.chars().rev() {
        let w = c.width().unwrap_or(0);
        if used + w > width {
            break;
        }
        used += w;
        kept.push(c);
    }
    std::iter::once('…').chain(kept.into_iter().rev()).collect()
}

fn render_diff(f: &mut Frame, app: &App, area: Rect) {
    let title = match &app.shown_path {
        Some(path) if app.viewer.is_side_by_side() => format!(" {} [side-by-side] ", path),
        Some(path) => format!(" {} ", path),
        None => " Diff ".to_string(),
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .title(title)
        .border_style(border_style(app.focus == Focus::Diff));
    let inner = block.inner(area);
    f.render_widget(block, area);

    if let Some(err) = &app.file_error {
        let text = Paragraph::new(format!("Could not load diff: {}", err))
            .style(Style::default().fg(Color::Red))
            .wrap(Wrap { trim: false });
        f.render_widget(text, inner);
        return;
    }

    if app.viewer.is_empty() {
        let placeholder = if app.is_binary_selection() {
            "Binary file (press c to comment on the file)"
        } else if app.shown_path.is_some() {
            "No textual changes"
        } else {
            "Nothing to review"
        };
        f.render_widget(
            Paragraph::new(placeholder).style(Style::default().fg(Color::DarkGray)),
            inner,
        );
        return;
    }

    if app.viewer.is_side_by_side() {
        render_side_by_side(f, app, inner);
    } else {
        render_unified(f, app, inner);
    }
}

/// Per-row decorations
#[derive(Debug, Clone, Copy, Default)]
struct RowFlags {
    cursor: bool,
    selected: bool,
    annotated: bool,
    search_hit: bool,
}

impl RowFlags {
    fn for_row(app: &App, idx: usize) -> Self {
        Self {
            cursor: idx == app.viewer.cursor_row(),
            selected: app.viewer.in_visual_range(idx),
            annotated: app.viewer.has_annotation(idx),
            search_hit: app.viewer.is_search_match(idx),
        }
    }

    fn merge(self, other: Self) -> Self {
        Self {
            cursor: self.cursor || other.cursor,
            selected: self.selected || other.selected,
            annotated: self.annotated || other.annotated,
            search_hit: self.search_hit || other.search_hit,
        }
    }
}

fn marker_spans(flags: RowFlags, focused: bool) -> Vec<Span<'static>> {
    let marker = if flags.annotated {
        Span::styled("●", Style::default().fg(Color::Yellow))
    } else {
        Span::raw(" ")
    };
    let cursor = if flags.cursor {
        let color = if focused { Color::Cyan } else { Color::DarkGray };
        Span::styled("→", Style::default().fg(color).add_modifier(Modifier::BOLD))
    } else {
        Span::raw(" ")
    };
    vec![marker, cursor]
}

fn number(n: Option<u32>) -> String {
    n.map(|n| n.to_string()).unwrap_or_default()
}

fn sign_span(kind: LineKind) -> Span<'static> {
    match kind {
        LineKind::Added => Span::styled("+", Style::default().fg(Color::Green)),
        LineKind::Removed => Span::styled("-", Style::default().fg(Color::Red)),
        LineKind::Context => Span::raw(" "),
    }
}

fn gutter_style(flags: RowFlags) -> Style {
    if flags.cursor {
        Style::default().fg(Color::White).bg(Color::DarkGray)
    } else if flags.search_hit {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::DarkGray)
    }
}

fn header_line(app: &App, idx: usize, header: &str) -> Line<'static> {
    let mut spans = marker_spans(RowFlags::for_row(app, idx), app.focus == Focus::Diff);
    spans.push(Span::styled(
        header.to_string(),
        Style::default().fg(Color::Cyan),
    ));
    Line::from(spans)
}

/// Styled spans for a line's content: syntax colours, inline change emphasis
/// and search hits.
fn content_spans(
    app: &App,
    hunk: usize,
    line_idx: usize,
    line: &DiffLine,
    emphasis: &[Range<usize>],
    selected: bool,
) -> Vec<Span<'static>> {
    let syntax: &[SyntaxHighlight] = app
        .highlights
        .as_ref()
        .and_then(|h| h.get(hunk)?.get(line_idx))
        .map_or(&[][..], Vec::as_slice);

    let mut base = match line.kind {
        LineKind::Added => Style::default().bg(ADDED_BG),
        LineKind::Removed => Style::default().bg(REMOVED_BG),
        LineKind::Context => Style::default(),
    };
    if app.highlights.is_none() {
        base = match line.kind {
            LineKind::Added => base.fg(Color::Green),
            LineKind::Removed => base.fg(Color::Red),
            LineKind::Context => base,
        };
    }
    if selected {
        base = base.bg(SELECTION_BG);
    }

    let emphasis_style = match line.kind {
        LineKind::Added => Style::default().bg(ADDED_EMPHASIS_BG),
        LineKind::Removed => Style::default().bg(REMOVED_EMPHASIS_BG),
        LineKind::Context => Style::default(),
    };
    let mut overlays: Vec<(Range<usize>, Style)> = emphasis
        .iter()
        .map(|r| (r.clone(), emphasis_style))
        .collect();
    if let Some(term) = app.viewer.search_term() {
        overlays.extend(line.content.match_indices(term).map(|(i, m)| {
            (
                i..i + m.len(),
                Style::default().bg(SEARCH_BG).fg(Color::Black),
            )
        }));
    }

    styled_segments(&line.content, syntax, &overlays, base)
}

fn styled_segments(
    content: &str,
    syntax: &[SyntaxHighlight],
    overlays: &[(Range<usize>, Style)],
    base: Style,
) -> Vec<Span<'static>> {
    let mut cuts: Vec<usize> = vec![0, content.len()];
    cuts.extend(syntax.iter().flat_map(|h| [h.start, h.end]));
    cuts.extend(overlays.iter().flat_map(|(r, _)| [r.start, r.end]));
    cuts.retain(|&c| content.is_char_boundary(c));
    cuts.sort_unstable();
    cuts.dedup();

    cuts.windows(2)
        .map(|w| {
            let (start, end) = (w[0], w[1]);
            let mut style = base;
            if let Some(h) = syntax.iter().find(|h| h.start <= start && start < h.end) {
                let (r, g, b) = h.style.fg;
                style = style.fg(Color::Rgb(r, g, b));
                if h.style.bold {
                    style = style.add_modifier(Modifier::BOLD);
                }
                if h.style.italic {
                    style = style.add_modifier(Modifier::ITALIC);
                }
                if h.style.underline {
                    style = style.add_modifier(Modifier::UNDERLINED);
                }
            }
            for (range, overlay) in overlays {
                if range.start <= start && start < range.end {
                    style = style.patch(*overlay);
                }
            }
            Span::styled(content[start..end].replace('\t', "    "), style)
        })
        .collect()
}

fn render_unified(f: &mut Frame, app: &App, area: Rect) {
    let Some(diff) = app.viewer.diff() else {
        return;
    };
    let focused = app.focus == Focus::Diff;
    let mut lines: Vec<Line> = Vec::with_capacity(area.height as usize);

    for idx in app.viewer.visible_rows() {
        match app.viewer.row(idx) {
            Some(DisplayRow::HunkHeader { hunk }) => {
                lines.push(header_line(app, idx, &diff.hunks[hunk].header));
            }
            Some(DisplayRow::Code { hunk, line: li }) => {
                let hunk_lines = &diff.hunks[hunk].lines;
                let line = &hunk_lines[li];
                let partner = app.partners.get(hunk).and_then(|p| p.get(li).copied()).flatten();

                let emphasis = match (partner, line.kind) {
                    (Some(p), LineKind::Removed) => {
                        inline_changes(&line.content, &hunk_lines[p].content).old
                    }
                    (Some(p), LineKind::Added) => {
                        inline_changes(&hunk_lines[p].content, &line.content).new
                    }
                    _ => Vec::new(),
                };

                let flags = RowFlags::for_row(app, idx);
                let mut spans = marker_spans(flags, focused);
                spans.push(Span::styled(
                    format!(
                        " {:>4} {:>4} ",
                        number(line.old_number),
                        number(line.new_number)
                    ),
                    gutter_style(flags),
                ));
                spans.push(sign_span(line.kind));
                spans.push(Span::raw(" "));
                spans.extend(content_spans(app, hunk, li, line, &emphasis, flags.selected));
                lines.push(Line::from(spans));
            }
            None => {}
        }
    }

    f.render_widget(Paragraph::new(lines), area);
}

fn render_side_by_side(f: &mut Frame, app: &App, area: Rect) {
    let Some(diff) = app.viewer.diff() else {
        return;
    };
    let focused = app.focus == Focus::Diff;
    let columns = Layout::default()
        .direction(LayoutDirection::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    let mut left: Vec<Line> = Vec::new();
    let mut right: Vec<Line> = Vec::new();

    let visible = app.viewer.visible_rows();
    let mut idx = visible.start;
    while idx < visible.end {
        let (hunk, first) = match app.viewer.row(idx) {
            Some(DisplayRow::HunkHeader { hunk }) => {
                left.push(header_line(app, idx, &diff.hunks[hunk].header));
                right.push(Line::default());
                idx += 1;
                continue;
            }
            Some(DisplayRow::Code { hunk, line }) => (hunk, line),
            None => break,
        };

        // Consecutive code rows of one hunk are paired together.
        let mut end = idx + 1;
        while end < visible.end
            && matches!(app.viewer.row(end), Some(DisplayRow::Code { hunk: h, .. }) if h == hunk)
        {
            end += 1;
        }
        let run = &diff.hunks[hunk].lines[first..first + (end - idx)];

        for (left_pos, right_pos) in pair_indices(run) {
            let flags = [left_pos, right_pos]
                .into_iter()
                .flatten()
                .map(|p| RowFlags::for_row(app, idx + p))
                .fold(RowFlags::default(), RowFlags::merge);

            let changes = match (left_pos, right_pos) {
                (Some(l), Some(r)) if l != r => Some(inline_changes(&run[l].content, &run[r].content)),
                _ => None,
            };

            let mut left_spans = marker_spans(flags, focused);
            match left_pos {
                Some(p) => {
                    let line = &run[p];
                    let emphasis = changes.as_ref().map_or(&[][..], |c| c.old.as_slice());
                    left_spans.push(Span::styled(
                        format!(" {:>4} ", number(line.old_number)),
                        gutter_style(flags),
                    ));
                    left_spans.push(sign_span(line.kind));
                    left_spans.push(Span::raw(" "));
                    left_spans.extend(content_spans(
                        app,
                        hunk,
                        first + p,
                        line,
                        emphasis,
                        flags.selected,
                    ));
                }
                None => left_spans.push(Span::styled("      ", gutter_style(flags))),
            }

            let mut right_spans = Vec::new();
            if let Some(p) = right_pos {
                let line = &run[p];
                let emphasis = changes.as_ref().map_or(&[][..], |c| c.new.as_slice());
                right_spans.push(Span::styled(
                    format!(" {:>4} ", number(line.new_number)),
                    gutter_style(flags),
                ));
                right_spans.push(sign_span(line.kind));
                right_spans.push(Span::raw(" "));
                right_spans.extend(content_spans(
                    app,
                    hunk,
                    first + p,
                    line,
                    emphasis,
                    flags.selected,
                ));
            }

            left.push(Line::from(left_spans));
            right.push(Line::from(right_spans));
        }
        idx = end;
    }

    f.render_widget(Paragraph::new(left), columns[0]);
    f.render_widget(
        Paragraph::new(right).block(
            Block::default()
                .borders(Borders::LEFT)
                .border_style(Style::default().fg(Color::DarkGray)),
        ),
        columns[1],
    );
}

fn render_status(f: &mut Frame, app: &App, area: Rect) {
    if let Some(draft) = &app.draft {
        f.render_widget(&draft.input, area);
        return;
    }

    if let Some(input) = &app.search {
        let parts = Layout::default()
            .direction(LayoutDirection::Horizontal)
            .constraints([Constraint::Length(1), Constraint::Min(0)])
            .split(area);
        f.render_widget(
            Paragraph::new("/").style(Style::default().fg(Color::Yellow)),
            parts[0],
        );
        f.render_widget(input, parts[1]);
        return;
    }

    let content = if let Some(msg) = &app.message {
        format!(" {}", msg)
    } else if app.viewer.in_visual_mode() {
        " -- VISUAL --  c: comment selection | v/Esc: cancel".to_string()
    } else {
        match app.focus {
            Focus::FileList => " j/k: select | l: open | ZZ: finish | ?: help | q: quit".to_string(),
            Focus::Diff => {
                " c: comment | v: visual | /: search | Tab: layout | h: files | ZZ: finish | ?: help"
                    .to_string()
            }
        }
    };

    f.render_widget(
        Paragraph::new(content).style(Style::default().fg(Color::Yellow)),
        area,
    );
}

const HELP_TEXT: &[&str] = &[
    "",
    "  Navigation:",
    "    j / k         Move down / up",
    "    h / l         Switch panel (files / diff)",
    "    gg / G        Go to top / bottom",
    "    Ctrl+d / u    Half page down / up",
    "    Ctrl+f / b    Page down / up",
    "    [ / ]         Previous / next change",
    "    { / }         Previous / next hunk",
    "",
    "  Comments:",
    "    c             Add or edit comment on current line",
    "    D             Delete comment on current line",
    "    v             Visual mode (select a line range)",
    "    [c / ]c       Previous / next comment",
    "",
    "  Views:",
    "    Tab           Toggle unified / side-by-side",
    "    /             Search in diff",
    "    n / N         Next / previous match",
    "",
    "  Other:",
    "    ZZ            Finish review and send comments",
    "    q             Quit without sending",
    "    ?             Toggle this help",
    "",
];

fn render_help(f: &mut Frame) {
    let area = centered_rect(60, 80, f.area());

    let help = Paragraph::new(HELP_TEXT.join("\n"))
        .style(Style::default())
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Help (? or Esc to close) ")
                .style(Style::default().bg(Color::DarkGray)),
        )
        .wrap(Wrap { trim: false });

    f.render_widget(Clear, area);
    f.render_widget(help, area);
}

fn render_selector(f: &mut Frame, selector: &OutputSelector) {
    let area = centered_rect(60, 50, f.area());

    let mut lines = vec![
        Line::from(Span::styled(
            "Send review to:",
            Style::default().fg(Color::Blue).add_modifier(Modifier::BOLD),
        )),
        Line::default(),
    ];

    let first_fallback = selector
        .targets
        .iter()
        .position(|t| t.kind != TargetKind::AgentPane);
    for (i, target) in selector.targets.iter().enumerate() {
        if Some(i) == first_fallback && i > 0 {
            lines.push(Line::from(Span::styled(
                "  ── or ──",
                Style::default().fg(Color::DarkGray),
            )));
        }
        lines.push(if i == selector.cursor {
            Line::from(Span::styled(
                format!("  > {}", target.label),
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            ))
        } else {
            Line::from(format!("    {}", target.label))
        });
    }

    if let Some(err) = &selector.error {
        lines.push(Line::default());
        lines.push(Line::from(Span::styled(
            format!("  Error: {}", err),
            Style::default().fg(Color::Red),
        )));
    }
    lines.push(Line::default());
    lines.push(Line::from(Span::styled(
        "  [Enter] select  [q] cancel",
        Style::default().fg(Color::DarkGray),
    )));

    let popup = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title(" Finish review "))
        .wrap(Wrap { trim: false });

    f.render_widget(Clear, area);
    f.render_widget(popup, area);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(LayoutDirection::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(LayoutDirection::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
