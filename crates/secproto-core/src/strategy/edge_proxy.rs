//! Reverse proxy / host agent on port 443
//!
//! - Baseline edits `config.xml` (backed up first) and restarts the proxy.
//! - LegacyA writes the proxy setting and restarts the proxy.
//! - LegacyB writes the host agent setting and cycles the host agent, which
//!   has no usable restart.

use super::config_file::{
    has_ssl_options, ssl_options_delete_command, ssl_options_insert_command, RHTTPPROXY_CONFIG,
};
use super::{HostContext, ServiceStrategy};
use crate::error::ReconfigError;
use crate::host::HostVariant;
use crate::protocol::ProtocolSet;
use crate::remote::{cycle_process, restart_process, run_checked};
use crate::scanner::{scan_port, set_setting_command};
use crate::service::ServiceId;
use async_trait::async_trait;

const RHTTPPROXY: &str = "/etc/init.d/rhttpproxy";
const HOSTD: &str = "/etc/init.d/hostd";
const PROXY_PATH_LEGACY_A: &str = "/UserVars/ESXiRhttpproxyDisabledProtocols51";
const HOSTD_PATH_LEGACY_B: &str = "/UserVars/ESXiHostdDisabledProtocols";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EdgeProxyStrategy;

impl EdgeProxyStrategy {
    async fn edit_config(ctx: &HostContext<'_>, target: &ProtocolSet) -> Result<(), ReconfigError> {
        let path = RHTTPPROXY_CONFIG.path;
        let present = has_ssl_options(ctx.channel, path).await?;
        let want = target.has_legacy();

        if want && !present {
            run_checked(ctx.channel, &ssl_options_insert_command(path)).await?;
        } else if !want {
            run_checked(ctx.channel, &ssl_options_delete_command(path)).await?;
        } else {
            tracing::debug!(host = ctx.host, path, "sslOptions entry already present");
        }

        if has_ssl_options(ctx.channel, path).await? != want {
            return Err(ReconfigError::CommandFailed {
                command: format!("edit {path}"),
                stderr: "sslOptions entry not in the expected state after edit".to_string(),
            });
        }
        Ok(())
    }

    async fn write_setting(
        ctx: &HostContext<'_>,
        target: &ProtocolSet,
    ) -> Result<(), ReconfigError> {
        match ctx.variant {
            HostVariant::LegacyA => {
                let command =
                    set_setting_command(PROXY_PATH_LEGACY_A, target.disabled_protocols_value());
                run_checked(ctx.channel, &command).await?;
                restart_process(ctx.channel, RHTTPPROXY, ctx.process_timeout).await
            }
            _ => {
                let command =
                    set_setting_command(HOSTD_PATH_LEGACY_B, target.disabled_protocols_value());
                run_checked(ctx.channel, &command).await?;
                cycle_process(ctx.channel, HOSTD, ctx.process_timeout).await
            }
        }
    }

    fn uses_config_file(variant: HostVariant) -> bool {
        matches!(variant, HostVariant::Baseline | HostVariant::Unsupported)
    }
}

#[async_trait]
impl ServiceStrategy for EdgeProxyStrategy {
    fn service(&self) -> ServiceId {
        ServiceId::EdgeProxyService
    }

    async fn scan(&self, ctx: &HostContext<'_>) -> Result<ProtocolSet, ReconfigError> {
        scan_port(ctx.probe, ctx.address, self.service().port()).await
    }

    async fn write(&self, ctx: &HostContext<'_>, target: &ProtocolSet) -> Result<(), ReconfigError> {
        if Self::uses_config_file(ctx.variant) {
            RHTTPPROXY_CONFIG.back_up(ctx.channel).await?;
            Self::edit_config(ctx, target).await?;
            restart_process(ctx.channel, RHTTPPROXY, ctx.process_timeout).await
        } else {
            Self::write_setting(ctx, target).await
        }
    }

    async fn revert(
        &self,
        ctx: &HostContext<'_>,
        snapshot: &ProtocolSet,
    ) -> Result<(), ReconfigError> {
        if Self::uses_config_file(ctx.variant) {
            RHTTPPROXY_CONFIG
                .replay_backup(ctx.channel, self.service())
                .await?;
            restart_process(ctx.channel, RHTTPPROXY, ctx.process_timeout).await
        } else {
            Self::write_setting(ctx, snapshot).await
        }
    }
}
