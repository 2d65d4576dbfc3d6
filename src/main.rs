//! revdiff - terminal diff reviewer
//!
//! Shows the changes on the current branch (or the uncommitted changes in the
//! working tree), collects line comments and sends them to a coding agent, the
//! clipboard or a file.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::{File, OpenOptions};
use std::sync::Arc;

use revdiff::comments::ReviewFormat;
use revdiff::config::{Config, Overrides};
use revdiff::git::{find_repo_root, DiffSource, GitRunner};
use revdiff::tui::{self, App, ReviewMode};

#[derive(Parser)]
#[command(name = "revdiff")]
#[command(about = "Review diffs in the terminal and send comments to a coding agent")]
#[command(version)]
struct Cli {
    /// Base branch to compare against (default: the remote's default branch)
    #[arg(short, long)]
    base: Option<String>,

    /// Remote used to detect the default branch
    #[arg(short, long)]
    remote: Option<String>,

    /// Review uncommitted changes instead of the branch
    #[arg(short, long)]
    uncommitted: bool,

    /// Start in side-by-side layout
    #[arg(long)]
    side_by_side: bool,

    /// Disable syntax highlighting
    #[arg(long)]
    no_highlight: bool,

    /// Output format for the finished review
    #[arg(short, long, value_enum)]
    format: Option<ReviewFormat>,

    /// Write a default config file and exit
    #[arg(long)]
    init_config: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    if cli.init_config {
        let path = Config::create_default()?;
        println!("Wrote default config to {}", path.display());
        return Ok(());
    }

    let explicit_base = cli.base.is_some();
    let config = Config::load()?.with_overrides(Overrides {
        base: cli.base,
        remote: cli.remote,
        side_by_side: cli.side_by_side,
        no_highlight: cli.no_highlight,
        format: cli.format,
    });

    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let repo_path = find_repo_root(&cwd)?;
    let git = GitRunner::new(repo_path.clone());

    let uncommitted = cli.uncommitted || (!explicit_base && git.has_uncommitted_changes());
    let (mode, files) = if uncommitted {
        let files = git.uncommitted_files()?;
        (ReviewMode::Uncommitted, files)
    } else {
        let base = config
            .base
            .clone()
            .unwrap_or_else(|| git.default_branch(&config.remote));
        if !git.branch_exists(&base) {
            anyhow::bail!("Base branch '{}' does not exist. Use --base to choose one.", base);
        }
        let branch = git.current_branch()?;
        let files = git.changed_files(&base)?;
        if files.is_empty() {
            println!("No changes between {} and {}", base, branch);
            return Ok(());
        }
        (ReviewMode::Branch { base, branch }, files)
    };
    log::info!("reviewing {} file(s) in {:?} mode", files.len(), mode);

    let mut app = App::new(Arc::new(git), mode.clone(), files, &config);
    if mode == ReviewMode::Uncommitted && config.watch {
        if let Err(e) = app.watch(&repo_path) {
            log::warn!("file watching disabled: {e:#}");
        }
    }

    if let Some(message) = tui::run(app)? {
        println!("{}", message);
    }
    Ok(())
}

/// Log to `<cache dir>/revdiff/revdiff.log`, since the terminal belongs to the
/// TUI. Falls back to stderr. `RUST_LOG` sets the filter.
fn init_logging() {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if let Some(file) = log_file() {
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
}

fn log_file() -> Option<File> {
    let dir = dirs::cache_dir()?.join("revdiff");
    std::fs::create_dir_all(&dir).ok()?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("revdiff.log"))
        .ok()
}
