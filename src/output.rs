//! Review output targets
//!
//! Finished reviews can be pasted into a coding agent running in another tmux
//! pane, loaded into the tmux paste buffer, copied to the clipboard or written
//! to a file.

use crate::comments::ReviewFormat;
use anyhow::{Context, Result};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

/// Commands recognised as coding agents when scanning tmux panes.
const AGENT_COMMANDS: &[&str] = &["claude", "codex", "aider"];

const TMUX_PANE_FORMAT: &str =
    "#{session_name}:#{window_index}.#{pane_index} #{pane_current_command} #{pane_pid} #{pane_id}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// A tmux pane running a coding agent
    AgentPane,
    TmuxBuffer,
    Clipboard,
    File,
}

/// A place a finished review can be sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    pub kind: TargetKind,
    pub label: String,
    /// Pane to paste into, for agent panes
    pub tmux_target: Option<String>,
}

impl OutputTarget {
    fn new(kind: TargetKind, label: &str) -> Self {
        Self {
            kind,
            label: label.to_string(),
            tmux_target: None,
        }
    }
}

/// Parse `tmux list-panes -a` output into agent-pane targets.
///
/// Lines are `<target> <command> [<pid> [<pane id>]]`. The pane whose id equals
/// `current_pane` is skipped; malformed lines are ignored.
pub fn parse_tmux_panes(output: &str, current_pane: Option<&str>) -> Vec<OutputTarget> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let pane = fields.next()?;
            let command = fields.next()?;
            let pane_id = fields.nth(1);

            if !AGENT_COMMANDS.contains(&command) {
                return None;
            }
            if current_pane.is_some() && pane_id == current_pane {
                return None;
            }

            Some(OutputTarget {
                kind: TargetKind::AgentPane,
                label: format!("{}  {}", pane, command),
                tmux_target: Some(pane.to_string()),
            })
        })
        .collect()
}

/// List the available targets. `tmux_env` and `tmux_pane` are the values of
/// `$TMUX` and `$TMUX_PANE`.
pub fn detect_targets(tmux_env: Option<&str>, tmux_pane: Option<&str>) -> Vec<OutputTarget> {
    let mut targets = Vec::new();

    if tmux_env.is_some_and(|t| !t.is_empty()) {
        match list_tmux_panes() {
            Ok(out) => targets.extend(parse_tmux_panes(&out, tmux_pane)),
            Err(e) => log::warn!("listing tmux panes failed: {e:#}"),
        }
        targets.push(OutputTarget::new(TargetKind::TmuxBuffer, "tmux paste buffer"));
    }

    targets.push(OutputTarget::new(TargetKind::Clipboard, "System clipboard"));
    targets.push(OutputTarget::new(TargetKind::File, "Write to file"));
    targets
}

fn list_tmux_panes() -> Result<String> {
    let output = Command::new("tmux")
        .args(["list-panes", "-a", "-F", TMUX_PANE_FORMAT])
        .output()
        .context("Failed to run tmux")?;
    if !output.status.success() {
        anyhow::bail!(
            "tmux list-panes failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Sends formatted reviews to a target
#[derive(Debug, Clone)]
pub struct Deliverer {
    output_dir: PathBuf,
    format: ReviewFormat,
}

impl Default for Deliverer {
    fn default() -> Self {
        Self::new(std::env::temp_dir(), ReviewFormat::default())
    }
}

impl Deliverer {
    pub fn new(output_dir: PathBuf, format: ReviewFormat) -> Self {
        Self { output_dir, format }
    }

    /// Deliver `content` and return a status message for the user.
    pub fn deliver(&self, target: &OutputTarget, content: &str) -> Result<String> {
        log::info!("delivering review to {}", target.label);
        match target.kind {
            TargetKind::AgentPane => {
                let pane = target
                    .tmux_target
                    .as_deref()
                    .context("Agent target has no tmux pane")?;
                load_tmux_buffer(content)?;
                run_tmux(&["paste-buffer", "-t", pane])?;
                Ok(format!("Review sent to {}", pane))
            }
            TargetKind::TmuxBuffer => {
                load_tmux_buffer(content)?;
                Ok("Review loaded into tmux paste buffer".to_string())
            }
            TargetKind::Clipboard => {
                let mut clipboard =
                    arboard::Clipboard::new().context("Clipboard not available")?;
                clipboard
                    .set_text(content.to_string())
                    .context("Failed to set clipboard text")?;
                Ok("Review copied to clipboard".to_string())
            }
            TargetKind::File => {
                let path = self.write_file(content)?;
                Ok(format!("Review written to {}", path.display()))
            }
        }
    }

    fn write_file(&self, content: &str) -> Result<PathBuf> {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let path = self.output_dir.join(format!(
            "revdiff-review-{}.{}",
            stamp,
            self.format.extension()
        ));
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write review to {}", path.display()))?;
        Ok(path)
    }
}

fn load_tmux_buffer(content: &str) -> Result<()> {
    let mut child = Command::new("tmux")
        .args(["load-buffer", "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .context("Failed to run tmux")?;

    child
        .stdin
        .take()
        .context("Failed to open tmux stdin")?
        .write_all(content.as_bytes())
        .context("Failed to send review to tmux")?;

    let output = child.wait_with_output().context("Failed to wait for tmux")?;
    if !output.status.success() {
        anyhow::bail!(
            "tmux load-buffer failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

fn run_tmux(args: &[&str]) -> Result<()> {
    let output = Command::new("tmux")
        .args(args)
        .output()
        .context("Failed to run tmux")?;
    if !output.status.success() {
        anyhow::bail!(
            "tmux {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_tmux_panes() {
        let out = "main:0.0 zsh 100 %0\n\
                   main:0.1 claude 101 %1\n\
                   \n\
                   work:2.0 codex 102 %5\n\
                   broken\n\
                   work:2.1 vim 103 %6\n";
        let targets = parse_tmux_panes(out, None);
        assert_eq!(
            targets,
            vec![
                OutputTarget {
                    kind: TargetKind::AgentPane,
                    label: "main:0.1  claude".to_string(),
                    tmux_target: Some("main:0.1".to_string()),
                },
                OutputTarget {
                    kind: TargetKind::AgentPane,
                    label: "work:2.0  codex".to_string(),
                    tmux_target: Some("work:2.0".to_string()),
                },
            ]
        );
    }

    #[test]
    fn test_parse_tmux_panes_skips_current_pane() {
        let out = "s:0.0 claude 1 %3\ns:0.1 claude 2 %4\n";
        let targets = parse_tmux_panes(out, Some("%3"));
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].tmux_target.as_deref(), Some("s:0.1"));
    }

    #[test]
    fn test_parse_tmux_panes_without_pane_id() {
        let targets = parse_tmux_panes("s:1.0 aider", Some("%1"));
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].label, "s:1.0  aider");
    }

    #[test]
    fn test_detect_targets_outside_tmux() {
        let targets = detect_targets(None, None);
        let kinds: Vec<TargetKind> = targets.iter().map(|t| t.kind).collect();
        assert_eq!(kinds, vec![TargetKind::Clipboard, TargetKind::File]);
        assert_eq!(targets[0].label, "System clipboard");
        assert_eq!(targets[1].label, "Write to file");

        assert_eq!(detect_targets(Some(""), None).len(), 2);
    }

    #[test]
    fn test_detect_targets_inside_tmux() {
        let targets = detect_targets(Some("/tmp/tmux-1000/default,1,0"), Some("%0"));
        let n = targets.len();
        assert!(n >= 3);
        assert_eq!(targets[n - 3].kind, TargetKind::TmuxBuffer);
        assert_eq!(targets[n - 3].label, "tmux paste buffer");
        assert_eq!(targets[n - 2].kind, TargetKind::Clipboard);
        assert_eq!(targets[n - 1].kind, TargetKind::File);
    }

    #[test]
    fn test_deliver_file() {
        let dir = tempfile::tempdir().unwrap();
        let deliverer = Deliverer::new(dir.path().to_path_buf(), ReviewFormat::Markdown);
        let target = OutputTarget::new(TargetKind::File, "Write to file");
        let content = "## Code Review Comments\n\nTest content";

        let msg = deliverer.deliver(&target, content).unwrap();
        let path = msg
            .strip_prefix("Review written to ")
            .expect("message names the file");
        assert!(path.contains("revdiff-review-"));
        assert!(path.ends_with(".md"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), content);
    }

    #[test]
    fn test_deliver_file_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let deliverer = Deliverer::new(dir.path().join("nope"), ReviewFormat::Json);
        let target = OutputTarget::new(TargetKind::File, "Write to file");
        assert!(deliverer.deliver(&target, "{}").is_err());
    }

    #[test]
    fn test_agent_target_requires_pane() {
        let target = OutputTarget::new(TargetKind::AgentPane, "broken");
        assert!(Deliverer::default().deliver(&target, "x").is_err());
    }
}
