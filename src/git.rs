//! Git access for the reviewer
//!
//! Shells out to `git` so that user diff configuration is honoured; `git2` is
//! only used to locate the repository.

use crate::diff::{parse_diff, parse_name_status, ChangedFile, FileDiff, FileStatus};
use anyhow::{Context, Result};
use git2::Repository;
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;

/// How many leading bytes are inspected when sniffing for binary content.
const BINARY_SNIFF_LEN: usize = 8192;

/// Where the reviewer gets its file lists and per-file diffs from.
pub trait DiffSource: Send + Sync {
    /// Files changed between `base` and HEAD.
    fn changed_files(&self, base: &str) -> Result<Vec<ChangedFile>>;

    /// Diff of one file between `base` and HEAD.
    fn file_diff(&self, base: &str, path: &str) -> Result<FileDiff>;

    /// Staged, unstaged and untracked changes relative to HEAD.
    fn uncommitted_files(&self) -> Result<Vec<ChangedFile>>;

    /// Diff of one file's uncommitted changes.
    fn uncommitted_file_diff(&self, path: &str) -> Result<FileDiff>;
}

/// Runs git commands against a working tree
#[derive(Debug, Clone)]
pub struct GitRunner {
    repo_path: PathBuf,
}

impl GitRunner {
    pub fn new(repo_path: PathBuf) -> Self {
        Self { repo_path }
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        log::debug!("git {}", args.join(" "));
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.repo_path)
            .args(args)
            .output()
            .context("Failed to run git")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("git {} failed: {}", args.join(" "), stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    pub fn current_branch(&self) -> Result<String> {
        let out = self
            .run(&["rev-parse", "--abbrev-ref", "HEAD"])
            .context("Failed to get current branch")?;
        Ok(out.trim().to_string())
    }

    /// Whether `branch` resolves to a commit.
    pub fn branch_exists(&self, branch: &str) -> bool {
        self.run(&["rev-parse", "--verify", "--quiet", branch]).is_ok()
    }

    /// Default branch of `remote` from its symbolic HEAD, falling back to `main`.
    pub fn default_branch(&self, remote: &str) -> String {
        let reference = format!("refs/remotes/{}/HEAD", remote);
        let prefix = format!("refs/remotes/{}/", remote);
        self.run(&["symbolic-ref", &reference])
            .ok()
            .and_then(|out| out.trim().strip_prefix(&prefix).map(str::to_string))
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| "main".to_string())
    }

    pub fn has_uncommitted_changes(&self) -> bool {
        self.run(&["status", "--porcelain"])
            .map(|out| !out.trim().is_empty())
            .unwrap_or(false)
    }

    /// Paths of tracked files whose uncommitted change is binary.
    fn binary_tracked_files(&self) -> HashSet<String> {
        let Ok(out) = self.run(&["diff", "HEAD", "--numstat"]) else {
            return HashSet::new();
        };
        out.lines()
            .filter_map(|l| l.strip_prefix("-\t-\t"))
            .map(|p| p.trim().to_string())
            .collect()
    }

    fn untracked_files(&self) -> Result<Vec<String>> {
        let out = self.run(&["ls-files", "--others", "--exclude-standard"])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn is_untracked(&self, path: &str) -> bool {
        self.run(&["ls-files", "--others", "--exclude-standard", "--", path])
            .map(|out| !out.trim().is_empty())
            .unwrap_or(false)
    }

    /// Sniff the start of a working-tree file for NUL bytes.
    fn is_binary_file(&self, path: &str) -> bool {
        let Ok(file) = File::open(self.repo_path.join(path)) else {
            return false;
        };
        let mut buf = Vec::with_capacity(BINARY_SNIFF_LEN);
        if file.take(BINARY_SNIFF_LEN as u64).read_to_end(&mut buf).is_err() {
            return false;
        }
        buf.contains(&0)
    }

    fn single_file(&self, raw: &str, path: &str) -> Result<Option<FileDiff>> {
        let files =
            parse_diff(raw).with_context(|| format!("Failed to parse diff for {}", path))?;
        Ok(files.into_iter().next().map(|mut f| {
            f.path = path.to_string();
            f
        }))
    }

    fn untracked_diff(&self, path: &str) -> Result<FileDiff> {
        if self.is_binary_file(path) {
            return Ok(FileDiff::new(path, FileStatus::Binary));
        }
        let bytes = std::fs::read(self.repo_path.join(path))
            .with_context(|| format!("Failed to read {}", path))?;
        Ok(FileDiff::all_added(path, &String::from_utf8_lossy(&bytes)))
    }
}

impl DiffSource for GitRunner {
    fn changed_files(&self, base: &str) -> Result<Vec<ChangedFile>> {
        let range = format!("{}..HEAD", base);
        let out = self
            .run(&["diff", "--name-status", &range])
            .context("Failed to get changed files")?;
        Ok(parse_name_status(&out))
    }

    fn file_diff(&self, base: &str, path: &str) -> Result<FileDiff> {
        let range = format!("{}..HEAD", base);
        let out = self
            .run(&["diff", "--no-color", &range, "--", path])
            .with_context(|| format!("Failed to get diff for {}", path))?;
        Ok(self
            .single_file(&out, path)?
            .unwrap_or_else(|| FileDiff::new(path, FileStatus::Modified)))
    }

    fn uncommitted_files(&self) -> Result<Vec<ChangedFile>> {
        // Without a HEAD commit only the index can be compared.
        let out = self
            .run(&["diff", "HEAD", "--name-status"])
            .or_else(|_| self.run(&["diff", "--cached", "--name-status"]))
            .context("Failed to get uncommitted files")?;
        let mut files = parse_name_status(&out);

        let binaries = self.binary_tracked_files();
        for file in &mut files {
            if binaries.contains(&file.path) {
                file.status = FileStatus::Binary;
            }
        }

        let untracked = self
            .untracked_files()
            .context("Failed to list untracked files")?;

        let seen: HashSet<String> = files.iter().map(|f| f.path.clone()).collect();
        for path in untracked {
            if seen.contains(&path) {
                continue;
            }
            let status = if self.is_binary_file(&path) {
                FileStatus::Binary
            } else {
                FileStatus::Added
            };
            files.push(ChangedFile::new(path, status));
        }

        Ok(files)
    }

    fn uncommitted_file_diff(&self, path: &str) -> Result<FileDiff> {
        let out = self
            .run(&["diff", "--no-color", "HEAD", "--", path])
            .or_else(|_| self.run(&["diff", "--no-color", "--cached", "--", path]))
            .with_context(|| format!("Failed to get diff for {}", path))?;

        if let Some(file) = self.single_file(&out, path)? {
            return Ok(file);
        }
        if self.is_untracked(path) {
            return self.untracked_diff(path);
        }
        Ok(FileDiff::new(path, FileStatus::Modified))
    }
}

/// Find the git repository root from a path
pub fn find_repo_root(start: &Path) -> Result<PathBuf> {
    let repo = Repository::discover(start).context("Not in a git repository")?;

    repo.workdir()
        .map(PathBuf::from)
        .context("Repository has no working directory")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::LineKind;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(args)
            .output()
            .unwrap()
            .status;
        assert!(status.success(), "git {:?} failed", args);
    }

    /// A repository on `main` with one commit containing `README.md`.
    fn init_repo() -> Option<TempDir> {
        if !git_available() {
            eprintln!("git not installed, skipping");
            return None;
        }
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path();
        git(p, &["init", "-q"]);
        git(p, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        git(p, &["config", "user.email", "dev@example.com"]);
        git(p, &["config", "user.name", "Dev"]);
        git(p, &["config", "commit.gpgsign", "false"]);
        fs::write(p.join("README.md"), "one\ntwo\nthree\n").unwrap();
        git(p, &["add", "."]);
        git(p, &["commit", "-q", "-m", "init"]);
        Some(dir)
    }

    #[test]
    fn test_uncommitted_files() {
        let Some(dir) = init_repo() else { return };
        let p = dir.path();
        fs::write(p.join("README.md"), "one\n2\nthree\n").unwrap();
        fs::write(p.join("notes.txt"), "hello\n").unwrap();
        fs::write(p.join("blob.bin"), [0u8, 1, 2, 3]).unwrap();

        let runner = GitRunner::new(p.to_path_buf());
        assert!(runner.has_uncommitted_changes());

        let mut files = runner.uncommitted_files().unwrap();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        assert_eq!(
            files,
            vec![
                ChangedFile::new("README.md", FileStatus::Modified),
                ChangedFile::new("blob.bin", FileStatus::Binary),
                ChangedFile::new("notes.txt", FileStatus::Added),
            ]
        );
    }

    #[test]
    fn test_uncommitted_files_outside_repo_is_error() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let runner = GitRunner::new(dir.path().join("not-a-repo"));
        assert!(runner.uncommitted_files().is_err());
    }

    #[test]
    fn test_tracked_binary_marked() {
        let Some(dir) = init_repo() else { return };
        let p = dir.path();
        fs::write(p.join("image.dat"), [0u8, 9, 9]).unwrap();
        git(p, &["add", "."]);
        git(p, &["commit", "-q", "-m", "bin"]);
        fs::write(p.join("image.dat"), [0u8, 7, 7, 7]).unwrap();

        let runner = GitRunner::new(p.to_path_buf());
        let files = runner.uncommitted_files().unwrap();
        assert_eq!(files, vec![ChangedFile::new("image.dat", FileStatus::Binary)]);
    }

    #[test]
    fn test_uncommitted_file_diff() {
        let Some(dir) = init_repo() else { return };
        let p = dir.path();
        fs::write(p.join("README.md"), "one\n2\nthree\n").unwrap();
        fs::write(p.join("notes.txt"), "alpha\nbeta\n").unwrap();
        fs::write(p.join("blob.bin"), [0u8, 1]).unwrap();
        let runner = GitRunner::new(p.to_path_buf());

        let tracked = runner.uncommitted_file_diff("README.md").unwrap();
        assert_eq!(tracked.path, "README.md");
        assert_eq!(tracked.hunks.len(), 1);
        let kinds: Vec<LineKind> = tracked.hunks[0].lines.iter().map(|l| l.kind).collect();
        assert_eq!(
            kinds,
            vec![LineKind::Context, LineKind::Removed, LineKind::Added, LineKind::Context]
        );

        let untracked = runner.uncommitted_file_diff("notes.txt").unwrap();
        assert_eq!(untracked.status, FileStatus::Added);
        assert_eq!(untracked.hunks[0].header, "@@ -0,0 +1,2 @@");
        assert_eq!(untracked.hunks[0].lines[1].content, "beta");

        let binary = runner.uncommitted_file_diff("blob.bin").unwrap();
        assert!(binary.is_binary());
        assert!(binary.hunks.is_empty());
    }

    #[test]
    fn test_branch_diff() {
        let Some(dir) = init_repo() else { return };
        let p = dir.path();
        git(p, &["checkout", "-q", "-b", "feature"]);
        fs::write(p.join("README.md"), "one\ntwo\nthree\nfour\n").unwrap();
        fs::create_dir(p.join("src")).unwrap();
        fs::write(p.join("src/lib.rs"), "pub fn f() {}\n").unwrap();
        git(p, &["add", "."]);
        git(p, &["commit", "-q", "-m", "work"]);

        let runner = GitRunner::new(p.to_path_buf());
        assert_eq!(runner.current_branch().unwrap(), "feature");
        assert!(runner.branch_exists("main"));
        assert!(!runner.branch_exists("does-not-exist"));
        assert!(!runner.has_uncommitted_changes());

        let files = runner.changed_files("main").unwrap();
        assert_eq!(
            files,
            vec![
                ChangedFile::new("README.md", FileStatus::Modified),
                ChangedFile::new("src/lib.rs", FileStatus::Added),
            ]
        );

        let readme = runner.file_diff("main", "README.md").unwrap();
        let last = readme.hunks[0].lines.last().unwrap();
        assert_eq!((last.kind, last.content.as_str(), last.new_number), (LineKind::Added, "four", Some(4)));

        let added = runner.file_diff("main", "src/lib.rs").unwrap();
        assert_eq!(added.status, FileStatus::Added);

        let unchanged = runner.file_diff("main", "missing.txt").unwrap();
        assert_eq!(unchanged.path, "missing.txt");
        assert!(unchanged.hunks.is_empty());
    }

    #[test]
    fn test_default_branch_fallback() {
        let Some(dir) = init_repo() else { return };
        let runner = GitRunner::new(dir.path().to_path_buf());
        assert_eq!(runner.default_branch("origin"), "main");
    }

    #[test]
    fn test_default_branch_from_remote_head() {
        let Some(dir) = init_repo() else { return };
        let p = dir.path();
        git(p, &["update-ref", "refs/remotes/upstream/trunk", "HEAD"]);
        git(
            p,
            &["symbolic-ref", "refs/remotes/upstream/HEAD", "refs/remotes/upstream/trunk"],
        );
        let runner = GitRunner::new(p.to_path_buf());
        assert_eq!(runner.default_branch("upstream"), "trunk");
    }

    #[test]
    fn test_find_repo_root() {
        let Some(dir) = init_repo() else { return };
        let sub = dir.path().join("a/b");
        fs::create_dir_all(&sub).unwrap();
        let root = find_repo_root(&sub).unwrap();
        assert_eq!(
            root.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn test_find_repo_root_outside_repo() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_repo_root(dir.path()).is_err());
    }
}
