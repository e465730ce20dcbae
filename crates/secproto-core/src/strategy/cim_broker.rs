//! CIM object broker on port 5989: `enableSSLv3` key in `sfcb.cfg`

use super::config_file::{
    sfcb_append_command, sfcb_existing_entry, sfcb_read_command, sfcb_replace_command,
    SFCB_CONFIG,
};
use super::{HostContext, ServiceStrategy};
use crate::error::ReconfigError;
use crate::protocol::ProtocolSet;
use crate::remote::{restart_process, run_checked};
use crate::scanner::scan_port;
use crate::service::ServiceId;
use async_trait::async_trait;

const SFCBD_WATCHDOG: &str = "/etc/init.d/sfcbd-watchdog";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CimBrokerStrategy;

#[async_trait]
impl ServiceStrategy for CimBrokerStrategy {
    fn service(&self) -> ServiceId {
        ServiceId::CimBrokerService
    }

    async fn scan(&self, ctx: &HostContext<'_>) -> Result<ProtocolSet, ReconfigError> {
        scan_port(ctx.probe, ctx.address, self.service().port()).await
    }

    async fn write(&self, ctx: &HostContext<'_>, target: &ProtocolSet) -> Result<(), ReconfigError> {
        let path = SFCB_CONFIG.path;
        SFCB_CONFIG.back_up(ctx.channel).await?;

        let current = run_checked(ctx.channel, &sfcb_read_command(path)).await?;
        let enabled = target.has_legacy();
        let command = match sfcb_existing_entry(&current.stdout) {
            Some(existing) => sfcb_replace_command(path, &existing, enabled),
            None => sfcb_append_command(path, enabled),
        };
        run_checked(ctx.channel, &command).await?;

        restart_process(ctx.channel, SFCBD_WATCHDOG, ctx.process_timeout).await
    }

    async fn revert(
        &self,
        ctx: &HostContext<'_>,
        _snapshot: &ProtocolSet,
    ) -> Result<(), ReconfigError> {
        SFCB_CONFIG
            .replay_backup(ctx.channel, self.service())
            .await?;
        restart_process(ctx.channel, SFCBD_WATCHDOG, ctx.process_timeout).await
    }
}
