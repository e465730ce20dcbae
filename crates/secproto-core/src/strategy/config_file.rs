//! Config-file mechanics shared by file-based strategies
//!
//! Backup and replay of a config file, and the shell commands that edit the
//! reverse proxy `config.xml` and the CIM broker `sfcb.cfg`.

use crate::error::ReconfigError;
use crate::remote::{run_checked, CommandChannel};
use crate::service::ServiceId;

/// Value of the `sslOptions` entry that lets the proxy accept the legacy protocol
pub const SSL_OPTIONS_VALUE: &str = "16924672";

/// Key in `sfcb.cfg` toggling the legacy protocol
pub const SFCB_LEGACY_KEY: &str = "enableSSLv3";

/// A config file with its backup location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigFile {
    pub path: &'static str,
    pub backup: &'static str,
}

/// Reverse proxy configuration
pub const RHTTPPROXY_CONFIG: ConfigFile = ConfigFile {
    path: "/etc/vmware/rhttpproxy/config.xml",
    backup: "/etc/vmware/rhttpproxy/config.xml.bkup",
};

/// CIM broker configuration
pub const SFCB_CONFIG: ConfigFile = ConfigFile {
    path: "/etc/sfcb/sfcb.cfg",
    backup: "/etc/sfcb/sfcb.cfg.bkup",
};

impl ConfigFile {
    /// Copy the live file to its backup and confirm the backup exists.
    ///
    /// Nothing touches the live file unless this returns `Ok`.
    ///
    /// # Errors
    /// `BackupFailure` if the copy is refused or the backup is not there afterwards
    pub async fn back_up(&self, channel: &dyn CommandChannel) -> Result<(), ReconfigError> {
        let copied = channel.copy_file(self.path, self.backup).await?;
        if !copied || !channel.file_exists(self.backup).await? {
            tracing::warn!(path = self.path, backup = self.backup, "backup not verified");
            return Err(ReconfigError::BackupFailure {
                path: self.path.to_string(),
            });
        }
        tracing::debug!(path = self.path, backup = self.backup, "backup taken");
        Ok(())
    }

    /// Copy the backup back over the live file
    ///
    /// # Errors
    /// `RestoreFailure` when the backup is missing or cannot be copied back
    pub async fn replay_backup(
        &self,
        channel: &dyn CommandChannel,
        service: ServiceId,
    ) -> Result<(), ReconfigError> {
        if !channel.file_exists(self.backup).await? {
            return Err(ReconfigError::RestoreFailure {
                service,
                reason: format!("backup {} not found", self.backup),
            });
        }
        if !channel.copy_file(self.backup, self.path).await? {
            return Err(ReconfigError::RestoreFailure {
                service,
                reason: format!("could not copy {} to {}", self.backup, self.path),
            });
        }
        tracing::info!(%service, path = self.path, "config file restored from backup");
        Ok(())
    }
}

/// The exact `sslOptions` line inserted and removed
#[must_use]
pub fn ssl_options_entry() -> String {
    format!("<sslOptions>{SSL_OPTIONS_VALUE}</sslOptions>")
}

/// Look for the `sslOptions` entry
#[must_use]
pub fn ssl_options_grep_command(path: &str) -> String {
    format!("grep \"{}\" {path}", ssl_options_entry())
}

/// Insert the `sslOptions` entry before `</ssl>` inside the `<vmacore>` section
#[must_use]
pub fn ssl_options_insert_command(path: &str) -> String {
    let entry = ssl_options_entry();
    format!(
        "awk -F\"[<>]\" '/<vmacore>/ {{f=1}} /^<mm>/ && !/<vmacore>/ {{f=0}} f && /<\\/ssl>/ {{q=1}} f && q {{print \"          {entry}\";f=q=0}}1' {path}>{path}-TEMP; mv {path}-TEMP {path}"
    )
}

/// Delete every `sslOptions` entry line
#[must_use]
pub fn ssl_options_delete_command(path: &str) -> String {
    format!("sed -i -e '/<sslOptions>{SSL_OPTIONS_VALUE}<\\/sslOptions>/d' {path}")
}

/// Whether the `sslOptions` entry is present in the file
///
/// # Errors
/// `CommandFailed` if grep reports an error
pub async fn has_ssl_options(
    channel: &dyn CommandChannel,
    path: &str,
) -> Result<bool, ReconfigError> {
    let entry = ssl_options_entry();
    let output = run_checked(channel, &ssl_options_grep_command(path)).await?;
    Ok(output.stdout.lines().any(|line| line.trim() == entry))
}

/// Read the current `enableSSLv3` line
#[must_use]
pub fn sfcb_read_command(path: &str) -> String {
    format!("cat {path} | grep {SFCB_LEGACY_KEY}")
}

/// Rewrite an existing `enableSSLv3` line
#[must_use]
pub fn sfcb_replace_command(path: &str, existing: &str, enabled: bool) -> String {
    format!("sed -i -e 's/{existing}/{SFCB_LEGACY_KEY}:{enabled}/g' {path}")
}

/// Append an `enableSSLv3` line
#[must_use]
pub fn sfcb_append_command(path: &str, enabled: bool) -> String {
    format!("echo {SFCB_LEGACY_KEY}:{enabled} >> {path}")
}

/// Existing `key:value` line for the legacy toggle, with whitespace removed
#[must_use]
pub fn sfcb_existing_entry(grep_output: &str) -> Option<String> {
    grep_output
        .lines()
        .map(|line| line.chars().filter(|c| !c.is_whitespace()).collect::<String>())
        .find(|line| line.starts_with(SFCB_LEGACY_KEY) && line.contains(':'))
}
