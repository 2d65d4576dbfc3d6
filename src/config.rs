//! Configuration module for revdiff
//!
//! Loads user configuration from ~/.revdiff/config.toml

use crate::comments::ReviewFormat;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Start in side-by-side layout
    pub side_by_side: bool,
    pub syntax_highlighting: bool,
    /// Syntax theme name (syntect/bat theme)
    pub syntax_theme: Option<String>,
    /// Remote whose default branch is used as the base
    pub remote: String,
    /// Base branch; detected from the remote when unset
    pub base: Option<String>,
    /// Live refresh period for uncommitted changes
    pub refresh_interval_ms: u64,
    /// Refresh early when files in the working tree change
    pub watch: bool,
    pub file_list_width: u16,
    pub format: ReviewFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            side_by_side: false,
            syntax_highlighting: true,
            syntax_theme: None,
            remote: "origin".to_string(),
            base: None,
            refresh_interval_ms: 2000,
            watch: true,
            file_list_width: 30,
            format: ReviewFormat::Markdown,
        }
    }
}

/// Command-line values that take precedence over the config file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub base: Option<String>,
    pub remote: Option<String>,
    pub side_by_side: bool,
    pub no_highlight: bool,
    pub format: Option<ReviewFormat>,
}

impl Config {
    /// Load configuration from default path (~/.revdiff/config.toml)
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("no config at {}, using defaults", path.display());
            return Ok(Config::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        log::debug!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".revdiff")
            .join("config.toml")
    }

    /// Merge CLI overrides into config
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        if overrides.base.is_some() {
            self.base = overrides.base;
        }
        if let Some(remote) = overrides.remote {
            self.remote = remote;
        }
        if overrides.side_by_side {
            self.side_by_side = true;
        }
        if overrides.no_highlight {
            self.syntax_highlighting = false;
        }
        if let Some(format) = overrides.format {
            self.format = format;
        }
        self
    }

    /// Write a default config file, returning its path
    pub fn create_default() -> Result<PathBuf> {
        let config_path = Self::default_path();
        Self::default().write_to(&config_path)?;
        Ok(config_path)
    }

    fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }
}
