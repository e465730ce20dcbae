//! Authentication daemon: setting-only, no restart

use super::{path_for, HostContext, ServiceStrategy};
use crate::error::ReconfigError;
use crate::host::HostVariant;
use crate::protocol::ProtocolSet;
use crate::remote::run_checked;
use crate::scanner::{scan_setting, set_setting_command};
use crate::service::ServiceId;
use async_trait::async_trait;

const PATH: &str = "/UserVars/VMAuthdDisabledProtocols";
const PATH_LEGACY_A: &str = "/UserVars/VMAuthdDisabledProtocols51";
const PATH_LEGACY_B: &str = "/UserVars/VMAuthdDisabledProtocols50";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthStrategy;

impl AuthStrategy {
    /// Disabled-protocols setting for the variant
    #[must_use]
    pub fn setting_path(variant: HostVariant) -> &'static str {
        path_for(variant, PATH, PATH_LEGACY_A, PATH_LEGACY_B)
    }
}

#[async_trait]
impl ServiceStrategy for AuthStrategy {
    fn service(&self) -> ServiceId {
        ServiceId::AuthService
    }

    async fn scan(&self, ctx: &HostContext<'_>) -> Result<ProtocolSet, ReconfigError> {
        scan_setting(ctx.channel, Self::setting_path(ctx.variant), ctx.variant).await
    }

    async fn write(&self, ctx: &HostContext<'_>, target: &ProtocolSet) -> Result<(), ReconfigError> {
        let command = set_setting_command(
            Self::setting_path(ctx.variant),
            target.disabled_protocols_value(),
        );
        run_checked(ctx.channel, &command).await?;
        Ok(())
    }

    async fn revert(
        &self,
        ctx: &HostContext<'_>,
        snapshot: &ProtocolSet,
    ) -> Result<(), ReconfigError> {
        self.write(ctx, snapshot).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_per_variant() {
        assert_eq!(
            AuthStrategy::setting_path(HostVariant::Baseline),
            "/UserVars/VMAuthdDisabledProtocols"
        );
        assert_eq!(
            AuthStrategy::setting_path(HostVariant::LegacyA),
            "/UserVars/VMAuthdDisabledProtocols51"
        );
        assert_eq!(
            AuthStrategy::setting_path(HostVariant::LegacyB),
            "/UserVars/VMAuthdDisabledProtocols50"
        );
    }
}
