//! Startup configuration.
//!
//! Read from a TOML file (default `keepsake.toml` in the working directory),
//! then overridden from `KEEPSAKE_*` environment variables, then validated.
//!
//! ```toml
//! [memory]
//! max_memories = -1
//! min_importance_threshold = 0.1
//! data_dir = "./memory"
//!
//! [memory.retention_policy]
//! warm_after_days = 7
//! cold_after_days = 90
//!
//! [memory.auto_backup]
//! interval_minutes = 30
//! max_backups = 5
//! backup_location = "./memory/backups/"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memory::retention::RetentionPolicy;

/// File looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "keepsake.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {var}: '{value}'")]
    InvalidEnv { var: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepsakeConfig {
    pub memory: MemoryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// `-1` means unbounded. A positive value caps admissions; nothing is evicted.
    pub max_memories: i64,
    /// Drafts with lower importance are refused at admission.
    pub min_importance_threshold: f64,
    /// Root for entry records and the cold-tier archive.
    pub data_dir: PathBuf,
    pub retention_policy: RetentionPolicy,
    pub auto_backup: AutoBackupConfig,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_memories: -1,
            min_importance_threshold: 0.1,
            data_dir: PathBuf::from("./memory"),
            retention_policy: RetentionPolicy::default(),
            auto_backup: AutoBackupConfig::default(),
        }
    }
}

impl MemoryConfig {
    /// Admission cap, if any.
    pub fn capacity(&self) -> Option<usize> {
        usize::try_from(self.max_memories).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoBackupConfig {
    pub enabled: bool,
    pub interval_minutes: u64,
    /// Scheduled captures kept after rotation. `<= 0` keeps all of them.
    pub max_backups: i64,
    pub backup_location: PathBuf,
}

impl Default for AutoBackupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: 30,
            max_backups: 5,
            backup_location: PathBuf::from("./memory/backups/"),
        }
    }
}

impl AutoBackupConfig {
    pub fn rotation_cap(&self) -> Option<usize> {
        usize::try_from(self.max_backups).ok().filter(|cap| *cap > 0)
    }
}

impl KeepsakeConfig {
    /// Load from `path`, or from `keepsake.toml` if present, else defaults.
    /// Environment overrides and validation are applied in both cases.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `KEEPSAKE_*` overrides using `lookup` to read variables.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(var: &str, value: String) -> ConfigResult<T> {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv {
                    var: var.to_string(),
                    value,
                })
        }

        let memory = &mut self.memory;
        if let Some(v) = lookup("KEEPSAKE_DATA_DIR") {
            memory.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("KEEPSAKE_MAX_MEMORIES") {
            memory.max_memories = parsed("KEEPSAKE_MAX_MEMORIES", v)?;
        }
        if let Some(v) = lookup("KEEPSAKE_MIN_IMPORTANCE") {
            memory.min_importance_threshold = parsed("KEEPSAKE_MIN_IMPORTANCE", v)?;
        }
        if let Some(v) = lookup("KEEPSAKE_BACKUP_DIR") {
            memory.auto_backup.backup_location = PathBuf::from(v);
        }
        if let Some(v) = lookup("KEEPSAKE_MAX_BACKUPS") {
            memory.auto_backup.max_backups = parsed("KEEPSAKE_MAX_BACKUPS", v)?;
        }
        if let Some(v) = lookup("KEEPSAKE_BACKUP_INTERVAL_MINUTES") {
            memory.auto_backup.interval_minutes = parsed("KEEPSAKE_BACKUP_INTERVAL_MINUTES", v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let m = &self.memory;
        if !(0.0..=1.0).contains(&m.min_importance_threshold) {
            return Err(ConfigError::Invalid(format!(
                "min_importance_threshold must be within [0, 1], got {}",
                m.min_importance_threshold
            )));
        }
        if m.max_memories < -1 {
            return Err(ConfigError::Invalid(format!(
                "max_memories must be -1 or non-negative, got {}",
                m.max_memories
            )));
        }
        m.retention_policy.validate().map_err(ConfigError::Invalid)?;
        if m.auto_backup.interval_minutes == 0 {
            return Err(ConfigError::Invalid(
                "auto_backup.interval_minutes must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let cfg = KeepsakeConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.memory.capacity(), None);
        assert_eq!(cfg.memory.auto_backup.rotation_cap(), Some(5));
        assert_eq!(cfg.memory.retention_policy.warm_after_days, 7);
        assert_eq!(cfg.memory.retention_policy.cold_after_days, 90);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = KeepsakeConfig::from_toml(
            r#"
            [memory]
            min_importance_threshold = 0.25

            [memory.auto_backup]
            max_backups = 2
            "#,
        )
        .unwrap();
        assert_eq!(cfg.memory.min_importance_threshold, 0.25);
        assert_eq!(cfg.memory.auto_backup.max_backups, 2);
        assert_eq!(cfg.memory.auto_backup.interval_minutes, 30);
        assert_eq!(cfg.memory.max_memories, -1);
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("KEEPSAKE_MAX_MEMORIES", "100"),
            ("KEEPSAKE_BACKUP_DIR", "/tmp/ks-backups"),
            ("KEEPSAKE_MIN_IMPORTANCE", "0.3"),
        ]);
        let mut cfg = KeepsakeConfig::default();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.memory.capacity(), Some(100));
        assert_eq!(
            cfg.memory.auto_backup.backup_location,
            PathBuf::from("/tmp/ks-backups")
        );
        assert_eq!(cfg.memory.min_importance_threshold, 0.3);
    }

    #[test]
    fn bad_env_value_is_reported() {
        let mut cfg = KeepsakeConfig::default();
        let err = cfg
            .apply_overrides(|k| (k == "KEEPSAKE_MAX_BACKUPS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn validation_rejects_inverted_boundaries() {
        let mut cfg = KeepsakeConfig::default();
        cfg.memory.retention_policy.warm_after_days = 100;
        assert!(cfg.validate().is_err());

        let mut cfg = KeepsakeConfig::default();
        cfg.memory.min_importance_threshold = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = KeepsakeConfig::default();
        cfg.memory.max_memories = -5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn non_positive_max_backups_disables_rotation() {
        let mut backup = AutoBackupConfig::default();
        backup.max_backups = 0;
        assert_eq!(backup.rotation_cap(), None);
        backup.max_backups = -1;
        assert_eq!(backup.rotation_cap(), None);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = KeepsakeConfig::from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
