//! Protocol scanner
//!
//! Two ways of finding out what a service accepts:
//! - probe-based: handshake scan of the service port
//! - setting-based: read the service's `*DisabledProtocols` advanced setting

use crate::error::ReconfigError;
use crate::host::HostVariant;
use crate::protocol::{Protocol, ProtocolSet};
use crate::remote::{run_checked, CommandChannel, ProtocolProbe};

const STRING_VALUE_PREFIX: &str = "String Value:";

/// Command reading an advanced setting
#[must_use]
pub fn list_setting_command(path: &str) -> String {
    format!("esxcli system settings advanced list -o {path}")
}

/// Command writing an advanced setting
#[must_use]
pub fn set_setting_command(path: &str, value: &str) -> String {
    format!("esxcli system settings advanced set -o {path} -s \"{value}\"")
}

/// Scan one port through the probe
///
/// # Errors
/// `Connectivity` if the probe fails, `MalformedOutput` on unknown labels
pub async fn scan_port(
    probe: &dyn ProtocolProbe,
    address: &str,
    port: u16,
) -> Result<ProtocolSet, ReconfigError> {
    let labels = probe.scan_port(address, port).await?;
    let scanned = ProtocolSet::from_probe_labels(&labels, &format!("probe {address}:{port}"))?;
    tracing::debug!(address, port, protocols = %scanned, "port scanned");
    Ok(scanned)
}

/// Read a disabled-protocols setting and turn it into the accepted set
///
/// # Errors
/// `CommandFailed` if the query fails, `MalformedOutput` if the value is unknown
pub async fn scan_setting(
    channel: &dyn CommandChannel,
    path: &str,
    variant: HostVariant,
) -> Result<ProtocolSet, ReconfigError> {
    let command = list_setting_command(path);
    let output = run_checked(channel, &command).await?;
    let scanned = parse_setting_output(&output.stdout, variant, &command)?;
    tracing::debug!(path, protocols = %scanned, "setting scanned");
    Ok(scanned)
}

/// Interpret the `String Value:` line of a setting listing
///
/// # Errors
/// `MalformedOutput` when the line is missing or carries an unknown value
pub fn parse_setting_output(
    output: &str,
    variant: HostVariant,
    command: &str,
) -> Result<ProtocolSet, ReconfigError> {
    let value = output
        .lines()
        .find_map(|line| line.trim().strip_prefix(STRING_VALUE_PREFIX))
        .map(str::trim)
        .ok_or_else(|| ReconfigError::MalformedOutput {
            command: command.to_string(),
            detail: "no `String Value:` line".to_string(),
        })?;

    match value {
        "" => Ok(ProtocolSet::with_legacy_for(variant)),
        v if v == Protocol::Legacy.as_str() => Ok(ProtocolSet::modern_for(variant)),
        other => Err(ReconfigError::MalformedOutput {
            command: command.to_string(),
            detail: format!("unexpected disabled-protocols value `{other}`"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChannelError;
    use crate::remote::MockProtocolProbe;
    use pretty_assertions::assert_eq;

    fn listing(value: &str) -> String {
        format!(
            "   Path: /UserVars/VMAuthdDisabledProtocols\n   Type: string\n   String Value: {value}\n   Default String Value: sslv3\n   Description: auth protocols\n"
        )
    }

    #[test]
    fn empty_value_means_legacy_enabled() {
        let set = parse_setting_output(&listing(""), HostVariant::Baseline, "list").unwrap();
        assert_eq!(set, ProtocolSet::with_legacy_for(HostVariant::Baseline));
    }

    #[test]
    fn legacy_value_means_modern_only() {
        let set = parse_setting_output(&listing("sslv3"), HostVariant::LegacyA, "list").unwrap();
        assert_eq!(set, ProtocolSet::modern_for(HostVariant::LegacyA));
    }

    #[test]
    fn default_line_is_not_the_value() {
        let output = "   Default String Value: sslv3\n";
        let err = parse_setting_output(output, HostVariant::Baseline, "list").unwrap_err();
        assert!(matches!(err, ReconfigError::MalformedOutput { .. }));
    }

    #[test]
    fn unknown_value_is_malformed() {
        let err =
            parse_setting_output(&listing("sslv3,tlsv1"), HostVariant::Baseline, "list").unwrap_err();
        assert!(matches!(err, ReconfigError::MalformedOutput { .. }));
    }

    #[test]
    fn setting_commands() {
        assert_eq!(
            set_setting_command("/UserVars/ESXiVPsDisabledProtocols", ""),
            "esxcli system settings advanced set -o /UserVars/ESXiVPsDisabledProtocols -s \"\""
        );
        assert_eq!(
            list_setting_command("/UserVars/VMAuthdDisabledProtocols50"),
            "esxcli system settings advanced list -o /UserVars/VMAuthdDisabledProtocols50"
        );
    }

    #[tokio::test]
    async fn probe_labels_become_protocol_set() {
        let mut probe = MockProtocolProbe::new();
        probe
            .expect_scan_port()
            .withf(|address, port| address.to_string() == "10.0.0.5" && *port == 443)
            .times(1)
            .returning(|_, _| Ok(vec!["TLSv1.0".to_string(), "TLSv1.2".to_string()]));

        let set = scan_port(&probe, "10.0.0.5", 443).await.unwrap();
        assert_eq!(
            set,
            [Protocol::Modern10, Protocol::Modern12].into_iter().collect::<ProtocolSet>()
        );
    }

    #[tokio::test]
    async fn probe_failure_is_connectivity() {
        let mut probe = MockProtocolProbe::new();
        probe.expect_scan_port().returning(|address, port| {
            Err(ChannelError::Probe {
                address: address.to_string(),
                port,
                reason: "handshake timed out".to_string(),
            })
        });

        let err = scan_port(&probe, "10.0.0.5", 5989).await.unwrap_err();
        assert!(matches!(err, ReconfigError::Connectivity(_)));
    }
}
