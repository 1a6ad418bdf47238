//! Engine configuration.
//!
//! Every field has a default, so an empty JSON object (or no file at all) is
//! a valid configuration. The CLI layers its flags on top.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default pass cadence.
pub const DEFAULT_INTERVAL_MS: u64 = 2_000;
/// Sub-second sampling is not supported.
pub const MIN_INTERVAL_MS: u64 = 1_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Milliseconds between scheduled passes.
    pub interval_ms: u64,
    /// Mount point of procfs.
    pub proc_root: PathBuf,
    /// sysfs DRM class directory scanned by the fallback GPU probe.
    pub drm_root: PathBuf,
    /// `nvidia-smi` executable (name or path).
    pub nvidia_smi: PathBuf,
    /// Upper bound for one `nvidia-smi` invocation.
    pub gpu_timeout_ms: u64,
    pub gpu_enabled: bool,
    /// Derive per-process I/O rates each pass.
    pub track_processes: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL_MS,
            proc_root: PathBuf::from("/proc"),
            drm_root: PathBuf::from("/sys/class/drm"),
            nvidia_smi: PathBuf::from("nvidia-smi"),
            gpu_timeout_ms: 1_500,
            gpu_enabled: true,
            track_processes: true,
        }
    }
}

impl EngineConfig {
    /// Load a JSON config file and validate it.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_ms < MIN_INTERVAL_MS {
            return Err(ConfigError::Invalid(format!(
                "interval_ms must be at least {MIN_INTERVAL_MS}, got {}",
                self.interval_ms
            )));
        }
        if self.gpu_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "gpu_timeout_ms must be positive".to_string(),
            ));
        }
        if self.proc_root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("proc_root is empty".to_string()));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn gpu_timeout(&self) -> Duration {
        Duration::from_millis(self.gpu_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_default() {
        assert_eq!(EngineConfig::from_json("{}").unwrap(), EngineConfig::default());
    }

    #[test]
    fn partial_override() {
        let c = EngineConfig::from_json(r#"{"interval_ms": 5000, "gpu_enabled": false}"#).unwrap();
        assert_eq!(c.interval(), Duration::from_secs(5));
        assert!(!c.gpu_enabled);
        assert!(c.track_processes);
    }

    #[test]
    fn sub_second_interval_rejected() {
        let err = EngineConfig::from_json(r#"{"interval_ms": 250}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn bad_json_is_parse_error() {
        assert!(matches!(
            EngineConfig::from_json("{not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn from_path_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ratewatch.json");
        std::fs::write(&path, r#"{"proc_root": "/host/proc"}"#).unwrap();
        let c = EngineConfig::from_path(&path).unwrap();
        assert_eq!(c.proc_root, PathBuf::from("/host/proc"));
        assert!(matches!(
            EngineConfig::from_path(&dir.path().join("missing.json")),
            Err(ConfigError::Read { .. })
        ));
    }
}
