//! Reconfigurable services and their fixed processing order

use crate::host::HostVariant;
use serde::{Deserialize, Serialize};

/// Network-facing service whose protocol set is reconfigured
///
/// Declaration order is the processing order; `Ord` follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ServiceId {
    /// Authentication daemon (remote console, file copy)
    AuthService,
    /// Front reverse proxy / host agent
    EdgeProxyService,
    /// CIM object broker
    CimBrokerService,
    /// Storage vendor provider
    StorageVPService,
}

impl ServiceId {
    /// Every service, in processing order
    pub const ORDERED: [ServiceId; 4] = [
        ServiceId::AuthService,
        ServiceId::EdgeProxyService,
        ServiceId::CimBrokerService,
        ServiceId::StorageVPService,
    ];

    /// TCP port the service listens on
    #[must_use]
    pub const fn port(self) -> u16 {
        match self {
            Self::AuthService => 902,
            Self::EdgeProxyService => 443,
            Self::CimBrokerService => 5989,
            Self::StorageVPService => 8080,
        }
    }

    /// Operator-facing name
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::AuthService => "AUTHD",
            Self::EdgeProxyService => "RHTTPPROXY/HOSTD",
            Self::CimBrokerService => "SFCBD",
            Self::StorageVPService => "VSAN_VP",
        }
    }

    /// Whether the service exists on a host of this variant
    #[must_use]
    pub const fn available_on(self, variant: HostVariant) -> bool {
        match self {
            Self::StorageVPService => matches!(variant, HostVariant::Baseline),
            _ => true,
        }
    }

    /// Services considered for a variant, in processing order
    #[must_use]
    pub fn for_variant(variant: HostVariant) -> Vec<ServiceId> {
        Self::ORDERED
            .into_iter()
            .filter(|service| service.available_on(variant))
            .collect()
    }
}

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.display_name(), self.port())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_is_fixed() {
        assert_eq!(
            ServiceId::for_variant(HostVariant::Baseline),
            ServiceId::ORDERED.to_vec()
        );
        let mut sorted = ServiceId::ORDERED;
        sorted.sort();
        assert_eq!(sorted, ServiceId::ORDERED);
    }

    #[test]
    fn storage_provider_dropped_on_legacy_variants() {
        for variant in [HostVariant::LegacyA, HostVariant::LegacyB] {
            let services = ServiceId::for_variant(variant);
            assert_eq!(
                services,
                vec![
                    ServiceId::AuthService,
                    ServiceId::EdgeProxyService,
                    ServiceId::CimBrokerService
                ]
            );
        }
    }

    #[test]
    fn display_includes_port() {
        assert_eq!(ServiceId::CimBrokerService.to_string(), "SFCBD(5989)");
    }
}
