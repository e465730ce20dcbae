//! Host identity types

use serde::{Deserialize, Serialize};

/// Release family of a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostVariant {
    /// Newest supported family (5.5.0)
    Baseline,
    /// 5.1.0 family
    LegacyA,
    /// 5.0.0 family
    LegacyB,
    /// Outside every supported baseline
    Unsupported,
}

impl HostVariant {
    /// Whether reconfiguration may proceed on this variant
    #[inline]
    #[must_use]
    pub fn is_supported(self) -> bool {
        !matches!(self, Self::Unsupported)
    }
}

impl std::fmt::Display for HostVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Baseline => "baseline",
            Self::LegacyA => "legacy-a",
            Self::LegacyB => "legacy-b",
            Self::Unsupported => "unsupported",
        };
        f.write_str(label)
    }
}

/// Login credentials
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    #[must_use]
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"******")
            .finish()
    }
}

/// Host to reconfigure, as listed by the operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostTarget {
    /// Name used in reports and inventory lookups
    pub name: String,
    /// Address used for the command channel and probes
    pub address: String,
    /// Host login
    pub credentials: Credentials,
    /// Management endpoint is the host itself
    #[serde(default)]
    pub is_standalone: bool,
}

impl HostTarget {
    /// Create a target whose address equals its name
    #[must_use]
    pub fn new(name: impl Into<String>, credentials: Credentials) -> Self {
        let name = name.into();
        Self {
            address: name.clone(),
            name,
            credentials,
            is_standalone: false,
        }
    }

    /// With explicit address
    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Mark as standalone
    #[must_use]
    pub fn standalone(mut self) -> Self {
        self.is_standalone = true;
        self
    }
}

/// Inventory handle for a host
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostRef {
    pub name: String,
    pub address: String,
}

impl HostRef {
    /// Handle derived from a target without an inventory lookup
    #[must_use]
    pub fn from_target(target: &HostTarget) -> Self {
        Self {
            name: target.name.clone(),
            address: target.address.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_debug_is_redacted() {
        let creds = Credentials::new("root", "hunter2");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("root"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn target_builder() {
        let target = HostTarget::new("esx-01", Credentials::new("root", "x"))
            .with_address("10.0.0.1")
            .standalone();
        assert_eq!(target.address, "10.0.0.1");
        assert!(target.is_standalone);
        assert_eq!(HostRef::from_target(&target).name, "esx-01");
    }
}
