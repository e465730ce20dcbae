//! Protocol identifiers and protocol sets
//!
//! A [`ProtocolSet`] compares as a set (exact membership, order-independent)
//! but renders in insertion order, so reports show protocols the way they
//! were scanned.

use crate::error::ReconfigError;
use crate::host::HostVariant;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Probe label used for the first modern protocol
pub const PROBE_LABEL_MODERN_10: &str = "TLSv1.0";

/// Transport-security protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Protocol {
    /// Obsolete protocol being toggled
    #[serde(rename = "sslv3")]
    Legacy,
    /// First modern protocol
    #[serde(rename = "tlsv1")]
    Modern10,
    /// Second modern protocol
    #[serde(rename = "tlsv1.1")]
    Modern11,
    /// Third modern protocol
    #[serde(rename = "tlsv1.2")]
    Modern12,
}

impl Protocol {
    /// Identifier as used in host settings
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Legacy => "sslv3",
            Self::Modern10 => "tlsv1",
            Self::Modern11 => "tlsv1.1",
            Self::Modern12 => "tlsv1.2",
        }
    }

    /// Map a probe label onto an identifier.
    ///
    /// The probe reports the first modern protocol as `TLSv1.0`; everything
    /// else matches the identifier case-insensitively.
    #[must_use]
    pub fn from_probe_label(label: &str) -> Option<Self> {
        let label = label.trim();
        if label == PROBE_LABEL_MODERN_10 {
            return Some(Self::Modern10);
        }
        label.to_ascii_lowercase().parse().ok()
    }
}

impl FromStr for Protocol {
    type Err = ReconfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sslv3" => Ok(Self::Legacy),
            "tlsv1" => Ok(Self::Modern10),
            "tlsv1.1" => Ok(Self::Modern11),
            "tlsv1.2" => Ok(Self::Modern12),
            other => Err(ReconfigError::Config(format!("unknown protocol `{other}`"))),
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of protocols a service accepts or is asked to accept
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolSet(IndexSet<Protocol>);

impl ProtocolSet {
    /// Empty set
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Full modern set legal on a variant.
    ///
    /// Legacy variants only speak the first modern protocol.
    #[must_use]
    pub fn modern_for(variant: HostVariant) -> Self {
        match variant {
            HostVariant::LegacyA | HostVariant::LegacyB => {
                [Protocol::Modern10].into_iter().collect()
            }
            HostVariant::Baseline | HostVariant::Unsupported => {
                [Protocol::Modern10, Protocol::Modern11, Protocol::Modern12]
                    .into_iter()
                    .collect()
            }
        }
    }

    /// Modern set for the variant with the legacy protocol prepended
    #[must_use]
    pub fn with_legacy_for(variant: HostVariant) -> Self {
        let mut set: Self = std::iter::once(Protocol::Legacy).collect();
        set.extend(Self::modern_for(variant).iter());
        set
    }

    /// Add a protocol; returns false if already present
    #[inline]
    pub fn insert(&mut self, protocol: Protocol) -> bool {
        self.0.insert(protocol)
    }

    /// Membership
    #[inline]
    #[must_use]
    pub fn contains(&self, protocol: Protocol) -> bool {
        self.0.contains(&protocol)
    }

    /// Whether the legacy protocol is accepted
    #[inline]
    #[must_use]
    pub fn has_legacy(&self) -> bool {
        self.contains(Protocol::Legacy)
    }

    /// True when every protocol of `other` is in `self`
    #[must_use]
    pub fn is_superset_of(&self, other: &Self) -> bool {
        other.0.iter().all(|p| self.0.contains(p))
    }

    /// Number of protocols
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// No protocols at all
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Protocols in insertion order
    pub fn iter(&self) -> impl Iterator<Item = Protocol> + '_ {
        self.0.iter().copied()
    }

    /// Value for a `*DisabledProtocols` setting that yields this set.
    ///
    /// Hosts only let the legacy protocol be switched, so the value is empty
    /// when the set contains it and the legacy identifier otherwise.
    #[must_use]
    pub fn disabled_protocols_value(&self) -> &'static str {
        if self.has_legacy() {
            ""
        } else {
            Protocol::Legacy.as_str()
        }
    }

    /// Normalize probe labels into a set
    ///
    /// # Errors
    /// `MalformedOutput` when a label is not a known protocol
    pub fn from_probe_labels<S: AsRef<str>>(
        labels: &[S],
        source: &str,
    ) -> Result<Self, ReconfigError> {
        labels
            .iter()
            .map(|label| {
                Protocol::from_probe_label(label.as_ref()).ok_or_else(|| {
                    ReconfigError::MalformedOutput {
                        command: source.to_string(),
                        detail: format!("unknown protocol label `{}`", label.as_ref()),
                    }
                })
            })
            .collect()
    }
}

impl PartialEq for ProtocolSet {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && self.is_superset_of(other)
    }
}

impl Eq for ProtocolSet {}

impl FromIterator<Protocol> for ProtocolSet {
    fn from_iter<I: IntoIterator<Item = Protocol>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<Protocol> for ProtocolSet {
    fn extend<I: IntoIterator<Item = Protocol>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl std::fmt::Display for ProtocolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[")?;
        for (i, protocol) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{protocol}")?;
        }
        f.write_str("]")
    }
}

/// Requested change for the legacy protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// Accept the legacy protocol next to the modern ones
    EnableLegacy,
    /// Accept only the modern protocols
    DisableLegacy,
}

impl Transition {
    /// Target set for a host of the given variant
    #[must_use]
    pub fn requested_for(self, variant: HostVariant) -> ProtocolSet {
        match self {
            Self::EnableLegacy => ProtocolSet::with_legacy_for(variant),
            Self::DisableLegacy => ProtocolSet::modern_for(variant),
        }
    }

    /// Whether this is an enable request
    #[inline]
    #[must_use]
    pub fn enables_legacy(self) -> bool {
        matches!(self, Self::EnableLegacy)
    }
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EnableLegacy => f.write_str("enable-legacy"),
            Self::DisableLegacy => f.write_str("disable-legacy"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn set(protocols: &[Protocol]) -> ProtocolSet {
        protocols.iter().copied().collect()
    }

    #[test]
    fn equality_ignores_order() {
        let a = set(&[Protocol::Modern12, Protocol::Modern10, Protocol::Modern11]);
        let b = set(&[Protocol::Modern10, Protocol::Modern11, Protocol::Modern12]);
        assert_eq!(a, b);
    }

    #[test]
    fn subset_and_superset_are_not_equal() {
        let full = ProtocolSet::with_legacy_for(HostVariant::Baseline);
        let modern = ProtocolSet::modern_for(HostVariant::Baseline);
        assert_ne!(full, modern);
        assert_ne!(modern, full);
        assert!(full.is_superset_of(&modern));
        assert!(!modern.is_superset_of(&full));
    }

    #[test]
    fn display_keeps_insertion_order() {
        let s = set(&[Protocol::Modern12, Protocol::Legacy]);
        assert_eq!(s.to_string(), "[tlsv1.2, sslv3]");
        assert_eq!(
            ProtocolSet::with_legacy_for(HostVariant::Baseline).to_string(),
            "[sslv3, tlsv1, tlsv1.1, tlsv1.2]"
        );
    }

    #[test]
    fn legacy_variants_narrow_modern_set() {
        for variant in [HostVariant::LegacyA, HostVariant::LegacyB] {
            let modern = ProtocolSet::modern_for(variant);
            assert_eq!(modern, set(&[Protocol::Modern10]));
            assert!(!Transition::EnableLegacy
                .requested_for(variant)
                .contains(Protocol::Modern12));
        }
    }

    #[test]
    fn probe_labels_normalize() {
        let scanned =
            ProtocolSet::from_probe_labels(&["SSLv3", "TLSv1.0", "TLSv1.1", "TLSv1.2"], "probe")
                .unwrap();
        assert_eq!(scanned, ProtocolSet::with_legacy_for(HostVariant::Baseline));
        assert_eq!(Protocol::from_probe_label("tlsv1"), Some(Protocol::Modern10));
    }

    #[test]
    fn unknown_probe_label_is_malformed() {
        let err = ProtocolSet::from_probe_labels(&["TLSv1.3"], "probe").unwrap_err();
        assert!(matches!(err, ReconfigError::MalformedOutput { .. }));
    }

    #[test]
    fn disabled_value_tracks_legacy_membership() {
        assert_eq!(
            Transition::EnableLegacy
                .requested_for(HostVariant::Baseline)
                .disabled_protocols_value(),
            ""
        );
        assert_eq!(
            Transition::DisableLegacy
                .requested_for(HostVariant::LegacyB)
                .disabled_protocols_value(),
            "sslv3"
        );
    }

    #[test]
    fn serializes_as_identifier_list() {
        let json = serde_json::to_string(&ProtocolSet::with_legacy_for(HostVariant::LegacyA)).unwrap();
        assert_eq!(json, r#"["sslv3","tlsv1"]"#);
    }
}
