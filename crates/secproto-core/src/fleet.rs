//! Sequential fleet runner

use crate::error::ChannelError;
use crate::host::{Credentials, HostRef, HostTarget};
use crate::orchestrator::HostOrchestrator;
use crate::remote::{Inventory, InventorySession};
use crate::report::{FleetReport, HostOutcome, HostReport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Runs hosts one after another and aggregates their reports
#[derive(Debug, Clone)]
pub struct FleetRunner {
    orchestrator: HostOrchestrator,
    stop: Arc<AtomicBool>,
}

impl FleetRunner {
    #[must_use]
    pub fn new(orchestrator: HostOrchestrator) -> Self {
        Self {
            orchestrator,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share an externally owned stop flag
    #[must_use]
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Flag that stops the run before the next host
    #[must_use]
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    fn stopped(&self, remaining: usize) -> bool {
        let stopped = self.stop.load(Ordering::SeqCst);
        if stopped {
            tracing::warn!(remaining, "stop requested, not starting further hosts");
        }
        stopped
    }

    /// Reconfigure hosts addressed directly
    pub async fn run(&self, hosts: &[HostTarget]) -> FleetReport {
        let mut report = FleetReport::new(self.orchestrator.config().transition);
        tracing::info!(run_id = %report.run_id, hosts = hosts.len(), "fleet run started");

        for (i, target) in hosts.iter().enumerate() {
            if self.stopped(hosts.len() - i) {
                break;
            }
            report.push(self.orchestrator.reconfigure(target).await);
        }

        tracing::info!(summary = %report.summary(), "fleet run finished");
        report
    }

    /// Reconfigure hosts resolved through an inventory.
    ///
    /// Managed hosts resolve by name through a session on `endpoint`.
    /// Standalone hosts are their own endpoint and resolve to the single
    /// host they report. Unresolved hosts are reported as connection failures.
    pub async fn run_with_inventory(
        &self,
        inventory: &dyn Inventory,
        endpoint: &str,
        credentials: &Credentials,
        hosts: &[HostTarget],
    ) -> FleetReport {
        let mut report = FleetReport::new(self.orchestrator.config().transition);
        tracing::info!(run_id = %report.run_id, endpoint, hosts = hosts.len(), "fleet run started");

        let shared = if hosts.iter().any(|h| !h.is_standalone) {
            Some(inventory.login(endpoint, credentials).await)
        } else {
            None
        };

        for (i, target) in hosts.iter().enumerate() {
            if self.stopped(hosts.len() - i) {
                break;
            }

            let resolved = if target.is_standalone {
                resolve_standalone(inventory, target).await
            } else {
                match &shared {
                    Some(Ok(session)) => resolve_managed(inventory, session, &target.name).await,
                    Some(Err(err)) => Err(err.clone()),
                    None => Err(ChannelError::Inventory("no inventory session".to_string())),
                }
            };

            let host_report = match resolved {
                Ok(host) => self.orchestrator.reconfigure_resolved(target, &host).await,
                Err(err) => {
                    tracing::warn!(host = %target.name, error = %err, "host not resolved");
                    HostReport::without_records(
                        &target.name,
                        None,
                        HostOutcome::ConnectionFailed {
                            message: err.to_string(),
                        },
                    )
                }
            };
            report.push(host_report);
        }

        tracing::info!(summary = %report.summary(), "fleet run finished");
        report
    }
}

async fn resolve_managed(
    inventory: &dyn Inventory,
    session: &InventorySession,
    name: &str,
) -> Result<HostRef, ChannelError> {
    inventory
        .resolve_host(session, name)
        .await?
        .ok_or_else(|| ChannelError::Inventory(format!("host {name} not found in inventory")))
}

async fn resolve_standalone(
    inventory: &dyn Inventory,
    target: &HostTarget,
) -> Result<HostRef, ChannelError> {
    let session = inventory.login(&target.address, &target.credentials).await?;
    inventory
        .list_connected_hosts(&session)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| {
            ChannelError::Inventory(format!("standalone host {} reports no host", target.name))
        })
}
