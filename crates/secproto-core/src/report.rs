//! Per-host and fleet reports

use crate::error::FailureKind;
use crate::host::HostVariant;
use crate::protocol::{ProtocolSet, Transition};
use crate::service::ServiceId;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Text shown where a restored set is unknown
pub const RESTORE_FAILED_MARKER: &str = "restore failed, manual check required";

/// What happened to one service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Already in the requested state
    Unchanged,
    /// Changed and validated
    Applied,
    /// Rolled back to the snapshot
    Restored,
    /// Rollback failed
    RestoreFailed,
}

/// Before/after view of one service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconfigurationRecord {
    pub before: ProtocolSet,
    /// Absent when the restore failed
    pub after: Option<ProtocolSet>,
    pub status: RecordStatus,
}

impl ReconfigurationRecord {
    #[must_use]
    pub fn unchanged(current: ProtocolSet) -> Self {
        Self {
            after: Some(current.clone()),
            before: current,
            status: RecordStatus::Unchanged,
        }
    }

    #[must_use]
    pub fn applied(before: ProtocolSet, after: ProtocolSet) -> Self {
        Self {
            before,
            after: Some(after),
            status: RecordStatus::Applied,
        }
    }

    #[must_use]
    pub fn restored(before: ProtocolSet, after: ProtocolSet) -> Self {
        Self {
            before,
            after: Some(after),
            status: RecordStatus::Restored,
        }
    }

    #[must_use]
    pub fn restore_failed(before: ProtocolSet) -> Self {
        Self {
            before,
            after: None,
            status: RecordStatus::RestoreFailed,
        }
    }
}

impl std::fmt::Display for ReconfigurationRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.after {
            Some(after) => write!(f, "{} -> {}", self.before, after),
            None => write!(f, "{} -> {RESTORE_FAILED_MARKER}", self.before),
        }
    }
}

/// Final state of one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HostOutcome {
    /// Every service is in the requested state
    FullyApplied,
    /// A service failed and touched services were rolled back
    RolledBack {
        failed_service: Option<ServiceId>,
        kind: FailureKind,
        message: String,
        restore_failures: Vec<ServiceId>,
    },
    /// Version gate rejected the host
    SkippedUnsupported { message: String },
    /// Channel or remote access could not be established
    ConnectionFailed { message: String },
}

impl HostOutcome {
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::FullyApplied)
    }
}

impl std::fmt::Display for HostOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FullyApplied => f.write_str("fully applied"),
            Self::RolledBack {
                failed_service,
                kind,
                message,
                restore_failures,
            } => {
                match failed_service {
                    Some(service) => write!(f, "rolled back after {kind} on {service}: {message}")?,
                    None => write!(f, "rolled back after {kind}: {message}")?,
                }
                if !restore_failures.is_empty() {
                    let names: Vec<String> =
                        restore_failures.iter().map(ToString::to_string).collect();
                    write!(f, " ({RESTORE_FAILED_MARKER}: {})", names.join(", "))?;
                }
                Ok(())
            }
            Self::SkippedUnsupported { message } => write!(f, "skipped: {message}"),
            Self::ConnectionFailed { message } => write!(f, "connection failed: {message}"),
        }
    }
}

/// Report for one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostReport {
    pub host: String,
    pub variant: Option<HostVariant>,
    pub outcome: HostOutcome,
    pub records: IndexMap<ServiceId, ReconfigurationRecord>,
    pub finished_at: DateTime<Utc>,
}

impl HostReport {
    /// Report for a host that never reached the service loop
    #[must_use]
    pub fn without_records(
        host: impl Into<String>,
        variant: Option<HostVariant>,
        outcome: HostOutcome,
    ) -> Self {
        Self {
            host: host.into(),
            variant,
            outcome,
            records: IndexMap::new(),
            finished_at: Utc::now(),
        }
    }

    /// Record for a service
    #[must_use]
    pub fn record(&self, service: ServiceId) -> Option<&ReconfigurationRecord> {
        self.records.get(&service)
    }

    /// Text lines, one per service
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        let variant = self
            .variant
            .map_or_else(|| "unknown".to_string(), |v| v.to_string());
        let mut lines = vec![format!("{} [{variant}]: {}", self.host, self.outcome)];
        lines.extend(
            self.records
                .iter()
                .map(|(service, record)| format!("  {service}: {record} ({:?})", record.status)),
        );
        lines
    }
}

/// Aggregate of one fleet run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetReport {
    pub run_id: Ulid,
    pub transition: Transition,
    pub hosts: IndexMap<String, HostReport>,
}

impl FleetReport {
    #[must_use]
    pub fn new(transition: Transition) -> Self {
        Self {
            run_id: Ulid::new(),
            transition,
            hosts: IndexMap::new(),
        }
    }

    pub fn push(&mut self, report: HostReport) {
        self.hosts.insert(report.host.clone(), report);
    }

    #[must_use]
    pub fn host(&self, name: &str) -> Option<&HostReport> {
        self.hosts.get(name)
    }

    /// Hosts not fully applied
    pub fn needs_attention(&self) -> impl Iterator<Item = &HostReport> {
        self.hosts.values().filter(|r| !r.outcome.is_success())
    }

    /// Every host reached `FullyApplied`
    #[must_use]
    pub fn all_applied(&self) -> bool {
        let pending = self.needs_attention().count();
        pending == 0
    }

    /// One-line summary
    #[must_use]
    pub fn summary(&self) -> String {
        let total = self.hosts.len();
        let applied = self
            .hosts
            .values()
            .filter(|r| r.outcome.is_success())
            .count();
        format!(
            "run {} ({}): {applied}/{total} hosts fully applied",
            self.run_id, self.transition
        )
    }

    /// Plain-text rendering
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut out = vec![self.summary()];
        out.extend(self.hosts.values().flat_map(HostReport::lines));
        out.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restore_failed_record_renders_marker() {
        let record =
            ReconfigurationRecord::restore_failed(ProtocolSet::modern_for(HostVariant::Baseline));
        assert_eq!(record.after, None);
        assert!(record.to_string().contains(RESTORE_FAILED_MARKER));
    }

    #[test]
    fn summary_counts_successes() {
        let mut fleet = FleetReport::new(Transition::DisableLegacy);
        fleet.push(HostReport::without_records(
            "a",
            Some(HostVariant::Baseline),
            HostOutcome::FullyApplied,
        ));
        fleet.push(HostReport::without_records(
            "b",
            None,
            HostOutcome::ConnectionFailed {
                message: "refused".to_string(),
            },
        ));
        assert!(fleet.summary().ends_with("1/2 hosts fully applied"));
        assert_eq!(fleet.needs_attention().count(), 1);
        assert!(fleet.to_text().contains("b [unknown]: connection failed: refused"));
    }

    #[test]
    fn all_applied_requires_every_host() {
        let mut fleet = FleetReport::new(Transition::EnableLegacy);
        assert!(fleet.all_applied());
        fleet.push(HostReport::without_records(
            "a",
            Some(HostVariant::Baseline),
            HostOutcome::FullyApplied,
        ));
        assert!(fleet.all_applied());
        fleet.push(HostReport::without_records(
            "b",
            Some(HostVariant::Unsupported),
            HostOutcome::SkippedUnsupported {
                message: "update 2".to_string(),
            },
        ));
        assert!(!fleet.all_applied());
    }

    #[test]
    fn report_serializes_to_json() {
        let mut report = HostReport::without_records(
            "esx-01",
            Some(HostVariant::LegacyA),
            HostOutcome::FullyApplied,
        );
        report.records.insert(
            ServiceId::AuthService,
            ReconfigurationRecord::unchanged(ProtocolSet::modern_for(HostVariant::LegacyA)),
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"]["outcome"], "fully_applied");
        assert_eq!(json["records"]["AuthService"]["status"], "unchanged");
    }
}
