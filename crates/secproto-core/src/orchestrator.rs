//! Per-host reconfiguration orchestrator
//!
//! Drives one host through
//!
//! ```text
//! Init -> VersionChecked -> ServiceLoop* -> Finalizing -> Done
//! ```
//!
//! Every service scanned is snapshotted in the [`RollbackLedger`] before the
//! decision is taken, and flagged once its write starts. When any service
//! fails, every ledger entry is restored in the fixed service order; flagged
//! entries are always reverted, even when the live scan already matches. Finalizing runs on every exit path: the
//! channel is closed, the remote-access capability is stopped again if this
//! run started it, and the ledger is cleared.

use crate::config::ReconfigConfig;
use crate::error::{FailureKind, ReconfigError};
use crate::host::{HostRef, HostTarget, HostVariant};
use crate::protocol::{ProtocolSet, Transition};
use crate::remote::{Backends, CommandChannel, ProcessState};
use crate::report::{HostOutcome, HostReport, ReconfigurationRecord};
use crate::service::ServiceId;
use crate::strategy::{HostContext, Strategy};
use crate::version_gate::VersionGate;
use chrono::Utc;
use indexmap::IndexMap;
use std::collections::HashMap;
use tracing::Instrument;

/// Pre-change snapshot of one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub snapshot: ProtocolSet,
    /// A mutating write was started for the service during this run
    pub written: bool,
}

/// Pre-change snapshots of the services touched on one host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackLedger {
    entries: HashMap<ServiceId, LedgerEntry>,
}

impl RollbackLedger {
    pub fn record(&mut self, service: ServiceId, snapshot: ProtocolSet) {
        self.entries.insert(
            service,
            LedgerEntry {
                snapshot,
                written: false,
            },
        );
    }

    /// Flag the service as about to be written
    pub fn mark_written(&mut self, service: ServiceId) {
        if let Some(entry) = self.entries.get_mut(&service) {
            entry.written = true;
        }
    }

    /// Clear the written flag when the write failed before changing anything
    pub fn mark_untouched(&mut self, service: ServiceId) {
        if let Some(entry) = self.entries.get_mut(&service) {
            entry.written = false;
        }
    }

    /// Drop an entry that has nothing to undo
    pub fn forget(&mut self, service: ServiceId) {
        self.entries.remove(&service);
    }

    /// Entries in processing order
    pub fn entries(&self) -> impl Iterator<Item = (ServiceId, &LedgerEntry)> {
        ServiceId::ORDERED
            .into_iter()
            .filter_map(move |service| self.entries.get(&service).map(|entry| (service, entry)))
    }

    #[must_use]
    pub fn get(&self, service: ServiceId) -> Option<&LedgerEntry> {
        self.entries.get(&service)
    }

    #[must_use]
    pub fn contains(&self, service: ServiceId) -> bool {
        self.entries.contains_key(&service)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// State owned by one host run
#[derive(Debug, Default)]
struct HostSession {
    variant: Option<HostVariant>,
    ledger: RollbackLedger,
    records: IndexMap<ServiceId, ReconfigurationRecord>,
}

struct ServiceFailure {
    service: ServiceId,
    error: ReconfigError,
}

/// Reconfigures one host at a time
#[derive(Debug, Clone)]
pub struct HostOrchestrator {
    backends: Backends,
    config: ReconfigConfig,
}

impl HostOrchestrator {
    #[must_use]
    pub fn new(backends: Backends, config: ReconfigConfig) -> Self {
        Self { backends, config }
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &ReconfigConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    /// Reconfigure a host addressed directly
    pub async fn reconfigure(&self, target: &HostTarget) -> HostReport {
        self.reconfigure_resolved(target, &HostRef::from_target(target))
            .await
    }

    /// Reconfigure a host resolved through the inventory.
    ///
    /// Never fails: every error ends up in the returned report.
    pub async fn reconfigure_resolved(&self, target: &HostTarget, host: &HostRef) -> HostReport {
        let span = tracing::info_span!("host", host = %target.name, address = %host.address);
        self.run_host(target, host).instrument(span).await
    }

    async fn run_host(&self, target: &HostTarget, host: &HostRef) -> HostReport {
        tracing::info!(transition = %self.config.transition, "starting host");

        let started_remote_access = match self.ensure_remote_access(host).await {
            Ok(started) => started,
            Err(err) => {
                tracing::warn!(error = %err, "remote access unavailable");
                return HostReport::without_records(
                    &target.name,
                    None,
                    HostOutcome::ConnectionFailed {
                        message: err.to_string(),
                    },
                );
            }
        };

        let mut channel = match self
            .backends
            .connector
            .open(&host.address, &target.credentials)
            .await
        {
            Ok(channel) => channel,
            Err(err) => {
                tracing::warn!(error = %err, "cannot open command channel");
                self.release_remote_access(host, started_remote_access).await;
                return HostReport::without_records(
                    &target.name,
                    None,
                    HostOutcome::ConnectionFailed {
                        message: err.to_string(),
                    },
                );
            }
        };

        let mut session = HostSession::default();
        let outcome = self
            .drive(&target.name, &host.address, &*channel, &mut session)
            .await;

        tracing::info!("finalizing");
        if let Err(err) = channel.close().await {
            tracing::warn!(error = %err, "closing channel failed");
        }
        self.release_remote_access(host, started_remote_access).await;
        session.ledger.clear();

        tracing::info!(%outcome, "host done");
        HostReport {
            host: target.name.clone(),
            variant: session.variant,
            outcome,
            records: session.records,
            finished_at: Utc::now(),
        }
    }

    async fn drive(
        &self,
        name: &str,
        address: &str,
        channel: &dyn CommandChannel,
        session: &mut HostSession,
    ) -> HostOutcome {
        let gate = VersionGate::new(self.config.bypass_version_check);
        let variant = match gate.admit(channel).await {
            Ok(variant) => variant,
            Err(err) => return Self::gate_outcome(err, session),
        };
        session.variant = Some(variant);
        tracing::info!(%variant, "version checked");

        let ctx = HostContext {
            host: name,
            address,
            variant,
            channel,
            probe: &*self.backends.probe,
            process_timeout: self.config.process_timeout(),
        };

        match self.service_loop(&ctx, session).await {
            Ok(()) => HostOutcome::FullyApplied,
            Err(ServiceFailure { service, error }) => {
                tracing::warn!(%service, error = %error, "service failed, rolling back");
                let restore_failures = Self::roll_back(&ctx, session).await;
                HostOutcome::RolledBack {
                    failed_service: Some(service),
                    kind: error.kind(),
                    message: error.to_string(),
                    restore_failures,
                }
            }
        }
    }

    fn gate_outcome(err: ReconfigError, session: &mut HostSession) -> HostOutcome {
        match err.kind() {
            FailureKind::VersionUnsupported => {
                session.variant = Some(HostVariant::Unsupported);
                tracing::warn!(error = %err, "host skipped");
                HostOutcome::SkippedUnsupported {
                    message: err.to_string(),
                }
            }
            FailureKind::Connectivity => HostOutcome::ConnectionFailed {
                message: err.to_string(),
            },
            kind => HostOutcome::RolledBack {
                failed_service: None,
                kind,
                message: err.to_string(),
                restore_failures: Vec::new(),
            },
        }
    }

    async fn service_loop(
        &self,
        ctx: &HostContext<'_>,
        session: &mut HostSession,
    ) -> Result<(), ServiceFailure> {
        let transition = self.config.transition;
        let requested = transition.requested_for(ctx.variant);
        let modern = ProtocolSet::modern_for(ctx.variant);

        for service in ServiceId::for_variant(ctx.variant) {
            let strategy = Strategy::for_service(service);
            let strategy = strategy.as_dyn();
            let fail = |error: ReconfigError| ServiceFailure { service, error };

            strategy.prepare(ctx).await.map_err(fail)?;
            let before = strategy.scan(ctx).await.map_err(fail)?;
            session.ledger.record(service, before.clone());
            tracing::info!(%service, current = %before, "scanned");

            if transition == Transition::DisableLegacy && !before.has_legacy() {
                session.ledger.forget(service);
                session
                    .records
                    .insert(service, ReconfigurationRecord::unchanged(before));
                continue;
            }

            if transition.enables_legacy() && !before.is_superset_of(&modern) {
                session.ledger.forget(service);
                return Err(fail(ReconfigError::InvalidProtocolCombination {
                    service,
                    current: before,
                    required: modern,
                }));
            }

            if before == requested {
                session
                    .records
                    .insert(service, ReconfigurationRecord::unchanged(before));
                continue;
            }

            session.ledger.mark_written(service);
            let after = match strategy.apply(ctx, &requested).await {
                Ok(after) => after,
                Err(error) => {
                    if error.is_pre_change() {
                        session.ledger.mark_untouched(service);
                    }
                    return Err(fail(error));
                }
            };
            tracing::info!(%service, %after, "applied");
            session
                .records
                .insert(service, ReconfigurationRecord::applied(before, after));
        }
        Ok(())
    }

    /// Restore every ledger entry; returns the services whose restore failed
    async fn roll_back(ctx: &HostContext<'_>, session: &mut HostSession) -> Vec<ServiceId> {
        let mut restore_failures = Vec::new();
        for (service, entry) in session.ledger.entries() {
            let snapshot = &entry.snapshot;
            let strategy = Strategy::for_service(service);
            match strategy.as_dyn().restore(ctx, snapshot, entry.written).await {
                Ok(after) => {
                    tracing::info!(%service, %after, "restored");
                    session.records.insert(
                        service,
                        ReconfigurationRecord::restored(snapshot.clone(), after),
                    );
                }
                Err(err) => {
                    tracing::warn!(%service, error = %err, "restore failed, manual check required");
                    session
                        .records
                        .insert(service, ReconfigurationRecord::restore_failed(snapshot.clone()));
                    restore_failures.push(service);
                }
            }
        }
        restore_failures
    }

    /// Returns true when this call had to start the capability
    async fn ensure_remote_access(&self, host: &HostRef) -> Result<bool, ReconfigError> {
        let key = self.config.remote_access_service.as_str();
        let manager = &self.backends.service_manager;
        if manager.service_state(host, key).await? == ProcessState::Running {
            return Ok(false);
        }
        tracing::info!(service = key, "starting remote access");
        manager.start_service(host, key).await?;
        Ok(true)
    }

    async fn release_remote_access(&self, host: &HostRef, started: bool) {
        if !started {
            return;
        }
        let key = self.config.remote_access_service.as_str();
        match self.backends.service_manager.stop_service(host, key).await {
            Ok(()) => tracing::info!(service = key, "remote access stopped"),
            Err(err) => tracing::warn!(service = key, error = %err, "could not stop remote access"),
        }
    }
}
