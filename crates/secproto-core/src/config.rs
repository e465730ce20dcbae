//! Run configuration

use crate::error::ReconfigError;
use crate::protocol::Transition;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_PROCESS_TIMEOUT_SECS: u64 = 120;
const DEFAULT_REMOTE_ACCESS_SERVICE: &str = "TSM-SSH";

/// Configuration for one reconfiguration run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconfigConfig {
    /// Requested change
    pub transition: Transition,
    /// Admit hosts the version gate rejects
    pub bypass_version_check: bool,
    /// Upper bound for each process state wait
    pub process_timeout_secs: u64,
    /// Service-manager key of the remote-access capability
    pub remote_access_service: String,
}

impl Default for ReconfigConfig {
    fn default() -> Self {
        Self {
            transition: Transition::DisableLegacy,
            bypass_version_check: false,
            process_timeout_secs: DEFAULT_PROCESS_TIMEOUT_SECS,
            remote_access_service: DEFAULT_REMOTE_ACCESS_SERVICE.to_string(),
        }
    }
}

impl ReconfigConfig {
    /// Default configuration for a transition
    #[inline]
    #[must_use]
    pub fn new(transition: Transition) -> Self {
        Self {
            transition,
            ..Self::default()
        }
    }

    /// With version check bypass
    #[inline]
    #[must_use]
    pub fn with_bypass_version_check(mut self, bypass: bool) -> Self {
        self.bypass_version_check = bypass;
        self
    }

    /// With process wait bound
    #[inline]
    #[must_use]
    pub fn with_process_timeout_secs(mut self, secs: u64) -> Self {
        self.process_timeout_secs = secs;
        self
    }

    #[inline]
    #[must_use]
    pub fn process_timeout(&self) -> Duration {
        Duration::from_secs(self.process_timeout_secs)
    }

    /// Parse TOML
    ///
    /// # Errors
    /// `Config` on invalid TOML or values
    pub fn from_toml_str(content: &str) -> Result<Self, ReconfigError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ReconfigError::Config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// `Config` if the file cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self, ReconfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ReconfigError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    fn validate(&self) -> Result<(), ReconfigError> {
        if self.process_timeout_secs == 0 {
            return Err(ReconfigError::Config(
                "process_timeout_secs must be positive".to_string(),
            ));
        }
        if self.remote_access_service.trim().is_empty() {
            return Err(ReconfigError::Config(
                "remote_access_service must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = ReconfigConfig::default();
        assert_eq!(config.transition, Transition::DisableLegacy);
        assert_eq!(config.process_timeout(), Duration::from_secs(120));
        assert_eq!(config.remote_access_service, "TSM-SSH");
        assert!(!config.bypass_version_check);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = ReconfigConfig::from_toml_str(
            "transition = \"enable_legacy\"\nbypass_version_check = true\n",
        )
        .unwrap();
        assert!(config.transition.enables_legacy());
        assert!(config.bypass_version_check);
        assert_eq!(config.process_timeout_secs, 120);
    }

    #[test]
    fn zero_timeout_rejected() {
        let err = ReconfigConfig::from_toml_str("process_timeout_secs = 0").unwrap_err();
        assert!(matches!(err, ReconfigError::Config(_)));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "transition = \"disable_legacy\"").unwrap();
        writeln!(file, "process_timeout_secs = 30").unwrap();
        writeln!(file, "remote_access_service = \"SSH\"").unwrap();

        let config = ReconfigConfig::from_file(file.path()).unwrap();
        assert_eq!(config.process_timeout_secs, 30);
        assert_eq!(config.remote_access_service, "SSH");
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = ReconfigConfig::from_file(Path::new("/nonexistent/secproto.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }
}
