//! Configuration: the repository-local `.svcs/config.json` record, optional
//! environment overrides, and the global `$HOME/.svcs/settings.json` env
//! fallback.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::diff::ai::ModelProvider;

/// Directory name of the per-repository state.
pub const SVCS_DIR: &str = ".svcs";
/// Database file name inside [`SVCS_DIR`].
pub const DB_FILE: &str = "semantic.db";
/// Config file name inside [`SVCS_DIR`].
pub const CONFIG_FILE: &str = "config.json";

/// How deep analysis goes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisDepth {
    /// Layers 1-2 only: structure and signatures.
    Shallow,
    /// All layers.
    #[default]
    Full,
}

/// The repository-local configuration record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SvcsConfig {
    /// Push/fetch notes automatically from the hooks.
    pub auto_sync_notes: bool,
    /// Glob patterns of paths excluded from analysis.
    pub ignore_patterns: Vec<String>,
    /// Shallow (layers 1-2) or full analysis.
    pub analysis_depth: AnalysisDepth,
    /// Enable the layer 5b model pass.
    pub ai_enabled: bool,
    /// Minimum deterministic-event count in a file change before the model
    /// pass is worth a call.
    pub ai_complexity_threshold: u32,
    /// Per-call timeout for the model pass.
    pub ai_timeout_seconds: u64,
}

impl Default for SvcsConfig {
    fn default() -> Self {
        Self {
            auto_sync_notes: true,
            ignore_patterns: Vec::new(),
            analysis_depth: AnalysisDepth::Full,
            ai_enabled: false,
            ai_complexity_threshold: 2,
            ai_timeout_seconds: 30,
        }
    }
}

impl SvcsConfig {
    /// Path of the config file inside a repository working tree.
    pub fn config_path(workdir: &Path) -> PathBuf {
        workdir.join(SVCS_DIR).join(CONFIG_FILE)
    }

    /// Load from `.svcs/config.json`; defaults when the file is absent.
    pub fn load(workdir: &Path) -> Result<Self> {
        let path = Self::config_path(workdir);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Write the record to `.svcs/config.json`.
    pub fn save(&self, workdir: &Path) -> Result<()> {
        let path = Self::config_path(workdir);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Database path: `.svcs/semantic.db`, unless `SVCS_DB_PATH` overrides it.
    pub fn db_path(workdir: &Path) -> PathBuf {
        match get_env_var("SVCS_DB_PATH") {
            Some(path) => PathBuf::from(path),
            None => workdir.join(SVCS_DIR).join(DB_FILE),
        }
    }

    /// Compiled ignore matcher. Unparseable patterns are skipped with a
    /// warning rather than failing analysis.
    pub fn ignore_set(&self) -> GlobSet {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.ignore_patterns {
            match Glob::new(pattern) {
                Ok(glob) => {
                    builder.add(glob);
                }
                Err(err) => warn!(pattern = %pattern, error = %err, "invalid ignore pattern"),
            }
        }
        builder.build().unwrap_or_else(|_| GlobSet::empty())
    }

    /// The layer 5b provider, when enabled and a key is available.
    pub fn model_provider(&self) -> Option<ModelProvider> {
        if !self.ai_enabled {
            return None;
        }
        let Some(api_key) = get_env_var("SVCS_AI_API_KEY") else {
            warn!("ai_enabled is set but SVCS_AI_API_KEY is not available");
            return None;
        };
        Some(ModelProvider::new(
            api_key,
            get_env_var("SVCS_AI_MODEL"),
            Duration::from_secs(self.ai_timeout_seconds),
        ))
    }
}

/// Settings loaded from `$HOME/.svcs/settings.json`, used as a fallback for
/// environment variables.
#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    /// Environment variable overrides.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Settings {
    /// Load from the default location; defaults when the file is absent.
    pub fn load() -> Result<Self> {
        let path = Self::settings_path()?;
        Self::load_from_path(&path)
    }

    /// Load from a specific path.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse settings file: {}", path.display()))
    }

    /// `$HOME/.svcs/settings.json`.
    pub fn settings_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to determine home directory")?;
        Ok(home.join(SVCS_DIR).join("settings.json"))
    }
}

/// Environment variable with fallback to the global settings file.
pub fn get_env_var(key: &str) -> Option<String> {
    if let Ok(value) = env::var(key) {
        return Some(value);
    }
    Settings::load().ok().and_then(|s| s.env.get(key).cloned())
}

/// Whether debug logging was requested via `SVCS_DEBUG`.
pub fn debug_enabled() -> bool {
    get_env_var("SVCS_DEBUG").is_some_and(|v| !v.is_empty() && v != "0" && v != "false")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = SvcsConfig::default();
        assert!(config.auto_sync_notes);
        assert!(config.ignore_patterns.is_empty());
        assert_eq!(config.analysis_depth, AnalysisDepth::Full);
        assert!(!config.ai_enabled);
        assert_eq!(config.ai_complexity_threshold, 2);
        assert_eq!(config.ai_timeout_seconds, 30);
    }

    #[test]
    fn load_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = SvcsConfig {
            auto_sync_notes: false,
            ignore_patterns: vec!["vendor/**".to_string()],
            ..SvcsConfig::default()
        };
        config.save(dir.path()).unwrap();
        let loaded = SvcsConfig::load(dir.path()).unwrap();
        assert!(!loaded.auto_sync_notes);
        assert_eq!(loaded.ignore_patterns, vec!["vendor/**".to_string()]);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = SvcsConfig::load(dir.path()).unwrap();
        assert!(loaded.auto_sync_notes);
    }

    #[test]
    fn unknown_keys_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = SvcsConfig::config_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"auto_sync_notes": false, "future_key": 1}"#).unwrap();
        let loaded = SvcsConfig::load(dir.path()).unwrap();
        assert!(!loaded.auto_sync_notes);
    }

    #[test]
    fn ignore_set_matches_globs() {
        let config = SvcsConfig {
            ignore_patterns: vec!["vendor/**".to_string(), "*.min.js".to_string()],
            ..SvcsConfig::default()
        };
        let set = config.ignore_set();
        assert!(set.is_match("vendor/lib/x.py"));
        assert!(set.is_match("app.min.js"));
        assert!(!set.is_match("src/app.py"));
    }
}
