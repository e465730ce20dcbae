//! Storage vendor provider on port 8080 (baseline hosts only)

use super::{HostContext, ServiceStrategy};
use crate::error::ReconfigError;
use crate::protocol::ProtocolSet;
use crate::remote::{process_running, restart_process, run_checked, start_process};
use crate::scanner::{scan_port, set_setting_command};
use crate::service::ServiceId;
use async_trait::async_trait;

const VSANVPD: &str = "/etc/init.d/vsanvpd";
const PATH: &str = "/UserVars/ESXiVPsDisabledProtocols";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageVpStrategy;

#[async_trait]
impl ServiceStrategy for StorageVpStrategy {
    fn service(&self) -> ServiceId {
        ServiceId::StorageVPService
    }

    /// The provider must be running before its port can be scanned
    async fn prepare(&self, ctx: &HostContext<'_>) -> Result<(), ReconfigError> {
        if process_running(ctx.channel, VSANVPD).await? {
            return Ok(());
        }
        tracing::info!(host = ctx.host, process = VSANVPD, "not running, starting");
        start_process(ctx.channel, VSANVPD, ctx.process_timeout)
            .await
            .map_err(|err| {
                tracing::warn!(host = ctx.host, error = %err, "provider did not start");
                ReconfigError::ServiceUnavailable {
                    process: VSANVPD.to_string(),
                }
            })
    }

    async fn scan(&self, ctx: &HostContext<'_>) -> Result<ProtocolSet, ReconfigError> {
        scan_port(ctx.probe, ctx.address, self.service().port()).await
    }

    async fn write(&self, ctx: &HostContext<'_>, target: &ProtocolSet) -> Result<(), ReconfigError> {
        let command = set_setting_command(PATH, target.disabled_protocols_value());
        run_checked(ctx.channel, &command).await?;
        restart_process(ctx.channel, VSANVPD, ctx.process_timeout).await
    }

    async fn revert(
        &self,
        ctx: &HostContext<'_>,
        snapshot: &ProtocolSet,
    ) -> Result<(), ReconfigError> {
        self.write(ctx, snapshot).await
    }
}
