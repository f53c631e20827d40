//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{ProbeError, Result};

/// Full probestats configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    /// Device addresses excluded from every report and aggregation query.
    pub ignored: IgnoreList,
    pub paths: PathsConfig,
    pub journal: JournalConfig,
}

/// Resolved set of device addresses to exclude. Empty unless configured.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(transparent)]
pub struct IgnoreList(BTreeSet<String>);

impl IgnoreList {
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::default();
        list.extend(addresses);
        list
    }

    fn extend<I, S>(&mut self, addresses: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for address in addresses {
            let trimmed = address.as_ref().trim();
            if !trimmed.is_empty() {
                self.0.insert(trimmed.to_string());
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.0.contains(address)
    }

    /// Addresses in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Filesystem paths used by probestats.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    /// The probemon SQLite database.
    pub database: PathBuf,
    /// JSONL journal of consolidation runs.
    pub journal: PathBuf,
}

/// Consolidation journal switches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JournalConfig {
    pub enabled: bool,
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[PMS-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        let cfg = home_dir
            .join(".config")
            .join("probestats")
            .join("config.toml");
        let data = home_dir.join(".local").join("share").join("probestats");
        Self {
            config_file: cfg,
            database: PathBuf::from("probemon.db"),
            journal: data.join("consolidate.jsonl"),
        }
    }
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size_bytes: 10 * 1024 * 1024,
            max_rotated_files: 3,
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, |name| env::var(name).ok())
    }

    fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| ProbeError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(ProbeError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(lookup)?;
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut var = |name: &str| lookup(name).filter(|raw| !raw.trim().is_empty());

        if let Some(raw) = var("PROBESTATS_DB") {
            self.paths.database = PathBuf::from(raw);
        }
        if let Some(raw) = var("PROBESTATS_JOURNAL") {
            self.paths.journal = PathBuf::from(raw);
        }
        if let Some(raw) = var("PROBESTATS_JOURNAL_ENABLED") {
            self.journal.enabled = raw.trim().parse::<bool>().map_err(|error| {
                ProbeError::ConfigParse {
                    context: "env",
                    details: format!("PROBESTATS_JOURNAL_ENABLED={raw:?}: {error}"),
                }
            })?;
        }
        if let Some(raw) = var("PROBESTATS_IGNORED") {
            self.ignored.extend(raw.split(','));
        }
        Ok(())
    }

    fn normalize(&mut self) {
        // Re-insert through the trimming constructor; TOML input bypasses it.
        self.ignored = IgnoreList::new(self.ignored.0.iter());
    }

    fn validate(&self) -> Result<()> {
        if self.paths.database.as_os_str().is_empty() {
            return Err(ProbeError::InvalidConfig {
                details: "paths.database must not be empty".to_string(),
            });
        }
        if self.journal.enabled && self.journal.max_size_bytes == 0 {
            return Err(ProbeError::InvalidConfig {
                details: "journal.max_size_bytes must be > 0".to_string(),
            });
        }
        Ok(())
    }
}
