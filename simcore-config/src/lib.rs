// Copyright (c) Simcore Contributors
// SPDX-License-Identifier: Apache-2.0

//! Layered configuration for the engine: a YAML file provides defaults,
//! environment variables override the handful of operational knobs an
//! operator is most likely to need to flip without editing a file
//! (`savepath`, `saveinterval`, `bycount`).

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENV_SAVEPATH: &str = "SIMCORE_SAVEPATH";
const ENV_SAVEINTERVAL_MS: &str = "SIMCORE_SAVEINTERVAL_MS";
const ENV_BYCOUNT: &str = "SIMCORE_BYCOUNT";

const DEFAULT_SAVEPATH: &str = "dump";
const DEFAULT_SAVEINTERVAL_MS: u64 = 60_000;
const DEFAULT_BYCOUNT: u64 = 10_000;
const DEFAULT_READER_MIN_WORKERS: usize = 53;
const DEFAULT_READER_MAX_WORKERS: usize = 83;
const DEFAULT_READER_QUEUE_CAPACITY: usize = 100;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid reader pool bounds: min_workers ({min}) must be <= max_workers ({max})")]
    InvalidReaderBounds { min: usize, max: usize },
    #[error("invalid environment override {var}: {value:?}")]
    InvalidEnvOverride { var: &'static str, value: String },
}

/// Reader pool sizing. Worker count is bounded to `[53, 83]`; defaults land
/// inside that range but are configurable so deployments can tune within it.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReaderPoolConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    pub queue_capacity: usize,
}

impl Default for ReaderPoolConfig {
    fn default() -> Self {
        Self {
            min_workers: DEFAULT_READER_MIN_WORKERS,
            max_workers: DEFAULT_READER_MAX_WORKERS,
            queue_capacity: DEFAULT_READER_QUEUE_CAPACITY,
        }
    }
}

/// Top-level engine configuration.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Relative directory for dump files, resolved against the process's
    /// working directory (the `<user.dir>/<savepath>/` layout from §6).
    pub savepath: PathBuf,
    /// Milliseconds between automatic saves; the cron's initial delay
    /// equals this value too (see §4.5).
    pub saveinterval_ms: u64,
    /// Progress-log granularity for bulk vector writes.
    pub bycount: u64,
    pub reader: ReaderPoolConfig,
    /// Opaque per-basis sub-configuration (`basis.<bkey>.*`), forwarded to
    /// the kernel untouched.
    pub basis: BTreeMap<String, BTreeMap<String, serde_yaml::Value>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            savepath: PathBuf::from(DEFAULT_SAVEPATH),
            saveinterval_ms: DEFAULT_SAVEINTERVAL_MS,
            bycount: DEFAULT_BYCOUNT,
            reader: ReaderPoolConfig::default(),
            basis: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn saveinterval(&self) -> Duration {
        Duration::from_millis(self.saveinterval_ms)
    }

    /// Opaque configuration for one basis, defaulting to empty if the
    /// config file has no `basis.<bkey>` table.
    pub fn basis_config(&self, bkey: &str) -> BTreeMap<String, serde_yaml::Value> {
        self.basis.get(bkey).cloned().unwrap_or_default()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.reader.min_workers > self.reader.max_workers {
            return Err(ConfigError::InvalidReaderBounds {
                min: self.reader.min_workers,
                max: self.reader.max_workers,
            });
        }
        Ok(())
    }

    /// Loads defaults, merges in a YAML file if `path` exists, then applies
    /// environment overrides. A missing file is not an error: it just means
    /// "use the defaults", matching the engine's tolerance for an empty
    /// dump directory on startup (§8 property 4).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(value) = env::var(ENV_SAVEPATH) {
            self.savepath = PathBuf::from(value);
        }
        if let Ok(value) = env::var(ENV_SAVEINTERVAL_MS) {
            self.saveinterval_ms =
                value
                    .parse()
                    .map_err(|_| ConfigError::InvalidEnvOverride {
                        var: ENV_SAVEINTERVAL_MS,
                        value: value.clone(),
                    })?;
        }
        if let Ok(value) = env::var(ENV_BYCOUNT) {
            self.bycount = value.parse().map_err(|_| ConfigError::InvalidEnvOverride {
                var: ENV_BYCOUNT,
                value: value.clone(),
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let config = EngineConfig::load(Path::new("/nonexistent/simcore.yaml")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn parses_basis_subconfig() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "savepath: /tmp/dumps\nsaveinterval_ms: 5000\nbycount: 1000\nbasis:\n  b1:\n    metric: cosine\n"
        )
        .unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.savepath, PathBuf::from("/tmp/dumps"));
        assert_eq!(config.saveinterval(), Duration::from_secs(5));
        assert_eq!(
            config.basis_config("b1").get("metric").unwrap(),
            &serde_yaml::Value::String("cosine".into())
        );
        assert!(config.basis_config("missing").is_empty());
    }

    #[test]
    fn rejects_inverted_reader_bounds() {
        let mut config = EngineConfig::default();
        config.reader.min_workers = 90;
        config.reader.max_workers = 80;
        assert!(config.validate().is_err());
    }
}
