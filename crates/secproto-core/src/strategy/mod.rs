//! Service strategies
//!
//! Each service changes its protocol set differently. A strategy supplies
//! three primitives (`scan`, `write`, `revert`) and gets `apply`/`restore`
//! with post-change validation for free:
//!
//! ```text
//! apply:   write(target) -> scan -> exact match?
//! restore: [untouched: scan -> already snapshot?] -> revert(snapshot) -> scan -> exact match?
//! ```

mod auth;
mod cim_broker;
pub mod config_file;
mod edge_proxy;
mod storage_vp;

pub use auth::AuthStrategy;
pub use cim_broker::CimBrokerStrategy;
pub use edge_proxy::EdgeProxyStrategy;
pub use storage_vp::StorageVpStrategy;

use crate::error::ReconfigError;
use crate::host::HostVariant;
use crate::protocol::ProtocolSet;
use crate::remote::{CommandChannel, ProtocolProbe};
use crate::service::ServiceId;
use async_trait::async_trait;
use std::time::Duration;

/// Per-host view handed to strategies
#[derive(Clone, Copy)]
pub struct HostContext<'a> {
    pub host: &'a str,
    pub address: &'a str,
    pub variant: HostVariant,
    pub channel: &'a dyn CommandChannel,
    pub probe: &'a dyn ProtocolProbe,
    pub process_timeout: Duration,
}

impl std::fmt::Debug for HostContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContext")
            .field("host", &self.host)
            .field("address", &self.address)
            .field("variant", &self.variant)
            .field("process_timeout", &self.process_timeout)
            .finish_non_exhaustive()
    }
}

/// Scan/apply/restore for one service
#[async_trait]
pub trait ServiceStrategy: Send + Sync {
    /// Service handled by this strategy
    fn service(&self) -> ServiceId;

    /// Pre-flight check before the service is touched
    async fn prepare(&self, _ctx: &HostContext<'_>) -> Result<(), ReconfigError> {
        Ok(())
    }

    /// Currently accepted protocol set
    async fn scan(&self, ctx: &HostContext<'_>) -> Result<ProtocolSet, ReconfigError>;

    /// Mutate the service towards `target` (including any restart)
    async fn write(&self, ctx: &HostContext<'_>, target: &ProtocolSet)
        -> Result<(), ReconfigError>;

    /// Bring the service back to `snapshot` (including any restart)
    async fn revert(
        &self,
        ctx: &HostContext<'_>,
        snapshot: &ProtocolSet,
    ) -> Result<(), ReconfigError>;

    /// Apply the requested set and validate it
    ///
    /// # Errors
    /// Whatever `write` raises, or `ValidationMismatch`
    async fn apply(
        &self,
        ctx: &HostContext<'_>,
        requested: &ProtocolSet,
    ) -> Result<ProtocolSet, ReconfigError> {
        tracing::info!(host = ctx.host, service = %self.service(), target = %requested, "applying");
        self.write(ctx, requested).await?;
        let observed = self.scan(ctx).await?;
        validate(self.service(), requested, observed)
    }

    /// Return to the snapshot and validate it.
    ///
    /// `written` is set when `write` was started for this service during the
    /// run; the revert then always runs, since the live process may still
    /// serve the old set while its configuration is already changed. An
    /// untouched service is only reverted when its scan fails or differs.
    ///
    /// # Errors
    /// Whatever `revert` raises, or `ValidationMismatch`
    async fn restore(
        &self,
        ctx: &HostContext<'_>,
        snapshot: &ProtocolSet,
        written: bool,
    ) -> Result<ProtocolSet, ReconfigError> {
        if !written {
            match self.scan(ctx).await {
                Ok(current) if current == *snapshot => {
                    tracing::debug!(host = ctx.host, service = %self.service(), "already at snapshot");
                    return Ok(current);
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(
                    host = ctx.host,
                    service = %self.service(),
                    error = %err,
                    "scan before restore failed, service may be down; restoring anyway"
                ),
            }
        }
        tracing::info!(host = ctx.host, service = %self.service(), snapshot = %snapshot, "restoring");
        self.revert(ctx, snapshot).await?;
        let observed = self.scan(ctx).await?;
        validate(self.service(), snapshot, observed)
    }
}

/// Exact set equality between target and observation
///
/// # Errors
/// `ValidationMismatch` when the sets differ in any member
pub fn validate(
    service: ServiceId,
    expected: &ProtocolSet,
    observed: ProtocolSet,
) -> Result<ProtocolSet, ReconfigError> {
    if observed == *expected {
        Ok(observed)
    } else {
        tracing::warn!(%service, %expected, %observed, "validation mismatch");
        Err(ReconfigError::ValidationMismatch {
            service,
            expected: expected.clone(),
            observed,
        })
    }
}

/// Strategy selected for a service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Auth(AuthStrategy),
    EdgeProxy(EdgeProxyStrategy),
    CimBroker(CimBrokerStrategy),
    StorageVp(StorageVpStrategy),
}

impl Strategy {
    /// Strategy for a service
    #[must_use]
    pub const fn for_service(service: ServiceId) -> Self {
        match service {
            ServiceId::AuthService => Self::Auth(AuthStrategy),
            ServiceId::EdgeProxyService => Self::EdgeProxy(EdgeProxyStrategy),
            ServiceId::CimBrokerService => Self::CimBroker(CimBrokerStrategy),
            ServiceId::StorageVPService => Self::StorageVp(StorageVpStrategy),
        }
    }

    /// Dynamic view used by the orchestrator
    #[must_use]
    pub fn as_dyn(&self) -> &dyn ServiceStrategy {
        match self {
            Self::Auth(s) => s,
            Self::EdgeProxy(s) => s,
            Self::CimBroker(s) => s,
            Self::StorageVp(s) => s,
        }
    }
}

/// Advanced-setting path for the variant, falling back to the baseline path
pub(crate) fn path_for(
    variant: HostVariant,
    baseline: &'static str,
    legacy_a: &'static str,
    legacy_b: &'static str,
) -> &'static str {
    match variant {
        HostVariant::LegacyA => legacy_a,
        HostVariant::LegacyB => legacy_b,
        HostVariant::Baseline | HostVariant::Unsupported => baseline,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ChannelError, FailureKind};
    use crate::host::Credentials;
    use crate::protocol::{Protocol, Transition};
    use crate::remote::{ChannelConnector, MockProtocolProbe};
    use crate::test_harness::{FleetSpec, SimulatedFleet, SimulatedHostSpec};
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    #[test]
    fn strategy_matches_service() {
        for service in ServiceId::ORDERED {
            assert_eq!(Strategy::for_service(service).as_dyn().service(), service);
        }
    }

    #[test]
    fn validate_rejects_superset() {
        let expected = Transition::DisableLegacy.requested_for(HostVariant::Baseline);
        let observed = Transition::EnableLegacy.requested_for(HostVariant::Baseline);
        let err = validate(ServiceId::CimBrokerService, &expected, observed).unwrap_err();
        assert!(matches!(err, ReconfigError::ValidationMismatch { .. }));
    }

    #[test]
    fn validate_rejects_partial_set_with_legacy() {
        let expected = Transition::EnableLegacy.requested_for(HostVariant::Baseline);
        let observed: ProtocolSet = [Protocol::Legacy, Protocol::Modern10].into_iter().collect();
        assert!(observed.has_legacy());
        let err = validate(ServiceId::EdgeProxyService, &expected, observed).unwrap_err();
        assert_eq!(err.kind(), FailureKind::ValidationMismatch);
    }

    #[test]
    fn validate_accepts_reordered_set() {
        let expected = Transition::EnableLegacy.requested_for(HostVariant::Baseline);
        let mut reordered: Vec<_> = expected.iter().collect();
        reordered.reverse();
        let observed: ProtocolSet = reordered.into_iter().collect();
        assert!(validate(ServiceId::AuthService, &expected, observed).is_ok());
    }

    /// Strategy with scripted scan results that counts reverts
    #[derive(Default)]
    struct Scripted {
        scans: Mutex<VecDeque<Result<ProtocolSet, ReconfigError>>>,
        reverts: Mutex<u32>,
    }

    impl Scripted {
        fn with_scans(scans: Vec<Result<ProtocolSet, ReconfigError>>) -> Self {
            Self {
                scans: Mutex::new(scans.into()),
                reverts: Mutex::new(0),
            }
        }

        fn reverts(&self) -> u32 {
            *self.reverts.lock()
        }
    }

    #[async_trait]
    impl ServiceStrategy for Scripted {
        fn service(&self) -> ServiceId {
            ServiceId::EdgeProxyService
        }

        async fn scan(&self, _ctx: &HostContext<'_>) -> Result<ProtocolSet, ReconfigError> {
            self.scans
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(ReconfigError::Connectivity(ChannelError::Closed)))
        }

        async fn write(
            &self,
            _ctx: &HostContext<'_>,
            _target: &ProtocolSet,
        ) -> Result<(), ReconfigError> {
            Ok(())
        }

        async fn revert(
            &self,
            _ctx: &HostContext<'_>,
            _snapshot: &ProtocolSet,
        ) -> Result<(), ReconfigError> {
            *self.reverts.lock() += 1;
            Ok(())
        }
    }

    fn port_down() -> ReconfigError {
        ReconfigError::Connectivity(ChannelError::Probe {
            address: "esx-01".to_string(),
            port: 443,
            reason: "connection refused".to_string(),
        })
    }

    async fn run_restore(strategy: &Scripted, written: bool) -> Result<ProtocolSet, ReconfigError> {
        let fleet = SimulatedFleet::new(FleetSpec::new(vec![SimulatedHostSpec::baseline("esx-01")]));
        let channel = fleet
            .open("esx-01", &Credentials::new("root", ""))
            .await
            .unwrap();
        let probe = MockProtocolProbe::new();
        let ctx = HostContext {
            host: "esx-01",
            address: "esx-01",
            variant: HostVariant::Baseline,
            channel: &*channel,
            probe: &probe,
            process_timeout: Duration::from_secs(1),
        };
        strategy
            .restore(&ctx, &ProtocolSet::modern_for(HostVariant::Baseline), written)
            .await
    }

    #[tokio::test]
    async fn untouched_service_at_snapshot_is_left_alone() {
        let modern = ProtocolSet::modern_for(HostVariant::Baseline);
        let strategy = Scripted::with_scans(vec![Ok(modern.clone())]);
        assert_eq!(run_restore(&strategy, false).await.unwrap(), modern);
        assert_eq!(strategy.reverts(), 0);
    }

    #[tokio::test]
    async fn written_service_is_reverted_even_when_scan_matches() {
        let modern = ProtocolSet::modern_for(HostVariant::Baseline);
        let strategy = Scripted::with_scans(vec![Ok(modern.clone()), Ok(modern.clone())]);
        assert_eq!(run_restore(&strategy, true).await.unwrap(), modern);
        assert_eq!(strategy.reverts(), 1);
    }

    #[tokio::test]
    async fn failed_scan_before_restore_still_reverts() {
        let modern = ProtocolSet::modern_for(HostVariant::Baseline);
        let strategy = Scripted::with_scans(vec![Err(port_down()), Ok(modern.clone())]);
        assert_eq!(run_restore(&strategy, false).await.unwrap(), modern);
        assert_eq!(strategy.reverts(), 1);
    }

    #[tokio::test]
    async fn restore_reports_mismatch_after_revert() {
        let full = ProtocolSet::with_legacy_for(HostVariant::Baseline);
        let strategy = Scripted::with_scans(vec![Err(port_down()), Ok(full)]);
        let err = run_restore(&strategy, false).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::ValidationMismatch);
        assert_eq!(strategy.reverts(), 1);
    }
}
