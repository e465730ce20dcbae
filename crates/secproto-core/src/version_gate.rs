//! Host version gate
//!
//! Classifies the release/update/build a host reports into a [`HostVariant`].
//! Releases compare segment-wise: every `.`-separated segment is
//! right-justified to width 3 and the concatenations compare as strings, so
//! `5.10.0` sorts above `5.2.0`.

use crate::error::ReconfigError;
use crate::host::HostVariant;
use crate::remote::{run_checked, CommandChannel};
use std::cmp::Ordering;

/// Query issued to read the host version
pub const VERSION_COMMAND: &str = "esxcli system version get";

const SEGMENT_WIDTH: usize = 3;
const BUILD_PREFIX: &str = "releasebuild-";

/// Minimum patch level per release family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Baseline {
    pub variant: HostVariant,
    pub release: &'static str,
    pub min_update: u32,
    pub min_build: u32,
}

/// Supported release families, newest first
pub const BASELINES: [Baseline; 3] = [
    Baseline {
        variant: HostVariant::Baseline,
        release: "5.5.0",
        min_update: 3,
        min_build: 3_248_547,
    },
    Baseline {
        variant: HostVariant::LegacyA,
        release: "5.1.0",
        min_update: 3,
        min_build: 3_872_664,
    },
    Baseline {
        variant: HostVariant::LegacyB,
        release: "5.0.0",
        min_update: 3,
        min_build: 3_982_828,
    },
];

/// Raw version facts reported by a host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionFacts {
    pub release: String,
    pub update: Option<u32>,
    pub build: Option<u32>,
}

impl std::fmt::Display for VersionFacts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.release)?;
        match self.update {
            Some(update) => write!(f, ", Update-{update}")?,
            None => f.write_str(", Update-?")?,
        }
        match self.build {
            Some(build) => write!(f, " Build-{build}"),
            None => f.write_str(" Build-?"),
        }
    }
}

/// Parse the output of [`VERSION_COMMAND`].
///
/// Lines are stripped of whitespace and lower-cased before matching, so
/// `Build: Releasebuild-3248547` yields build 3248547. Unparsable update or
/// build numbers come back as `None`.
///
/// # Errors
/// `MalformedOutput` when no line carries a release
pub fn parse_version_output(output: &str) -> Result<VersionFacts, ReconfigError> {
    let mut release = None;
    let mut update = None;
    let mut build = None;

    for line in output.lines() {
        let line: String = line
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();
        let Some((_, value)) = line.split_once(':') else {
            continue;
        };
        if line.contains("version") {
            release = Some(value.to_string());
        } else if line.contains("build") {
            build = value.trim_start_matches(BUILD_PREFIX).parse().ok();
        } else if line.contains("update") {
            update = value.parse().ok();
        }
    }

    let release = release
        .filter(|r| !r.is_empty())
        .ok_or_else(|| ReconfigError::MalformedOutput {
            command: VERSION_COMMAND.to_string(),
            detail: "no version line in output".to_string(),
        })?;

    Ok(VersionFacts {
        release,
        update,
        build,
    })
}

/// Right-justify every segment to a fixed width and concatenate
#[must_use]
pub fn normalized_version(version: &str) -> String {
    version
        .split('.')
        .map(|segment| format!("{segment:>SEGMENT_WIDTH$}"))
        .collect()
}

/// Segment-wise release comparison
#[must_use]
pub fn compare_versions(current: &str, supported: &str) -> Ordering {
    normalized_version(current).cmp(&normalized_version(supported))
}

/// Outcome of classifying a host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub facts: VersionFacts,
    /// Supported variant, or `Unsupported`
    pub variant: HostVariant,
    /// Release family matched, even when the patch level is too low
    pub family: Option<HostVariant>,
}

impl Classification {
    /// Classify parsed facts against [`BASELINES`]
    #[must_use]
    pub fn from_facts(facts: VersionFacts) -> Self {
        let baseline = BASELINES
            .iter()
            .find(|b| compare_versions(&facts.release, b.release) == Ordering::Equal);

        let variant = match baseline {
            Some(b)
                if facts.update.is_some_and(|u| u >= b.min_update)
                    && facts.build.is_some_and(|n| n >= b.min_build) =>
            {
                b.variant
            }
            _ => HostVariant::Unsupported,
        };

        Self {
            family: baseline.map(|b| b.variant),
            variant,
            facts,
        }
    }

    /// Minimum patch level for the matched family
    #[must_use]
    pub fn required(&self) -> Option<&'static Baseline> {
        let family = self.family?;
        BASELINES.iter().find(|b| b.variant == family)
    }

    fn unsupported_detail(&self) -> String {
        match self.required() {
            Some(b) => format!(
                "host reports {}; requires {} Update-{} Build-{} or later",
                self.facts, b.release, b.min_update, b.min_build
            ),
            None => format!(
                "host reports {}; release is not a supported family",
                self.facts
            ),
        }
    }
}

/// Version gate for one run
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionGate {
    bypass: bool,
}

impl VersionGate {
    #[must_use]
    pub fn new(bypass: bool) -> Self {
        Self { bypass }
    }

    /// Query and classify the host
    ///
    /// # Errors
    /// `Connectivity`/`CommandFailed` from the query, `MalformedOutput` from parsing
    pub async fn classify(
        &self,
        channel: &dyn CommandChannel,
    ) -> Result<Classification, ReconfigError> {
        let output = run_checked(channel, VERSION_COMMAND).await?;
        let facts = parse_version_output(&output.stdout)?;
        Ok(Classification::from_facts(facts))
    }

    /// Resolve the variant a host is processed as.
    ///
    /// With bypass enabled every failure is logged and the host is admitted
    /// as its recognised family, or `Baseline` when none is known.
    ///
    /// # Errors
    /// `VersionUnsupported` (or the query error) when bypass is off
    pub async fn admit(&self, channel: &dyn CommandChannel) -> Result<HostVariant, ReconfigError> {
        let result = self.classify(channel).await;
        match result {
            Ok(classification) if classification.variant.is_supported() => {
                tracing::info!(
                    variant = %classification.variant,
                    facts = %classification.facts,
                    "host version supported"
                );
                Ok(classification.variant)
            }
            Ok(classification) => {
                let detail = classification.unsupported_detail();
                if self.bypass {
                    let variant = classification.family.unwrap_or(HostVariant::Baseline);
                    tracing::warn!(%detail, %variant, "version check bypassed");
                    Ok(variant)
                } else {
                    Err(ReconfigError::VersionUnsupported { detail })
                }
            }
            Err(err) if self.bypass => {
                tracing::warn!(error = %err, variant = %HostVariant::Baseline, "version query failed, check bypassed");
                Ok(HostVariant::Baseline)
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const BASELINE_OUTPUT: &str = "   Product: VMware ESXi\n   Version: 5.5.0\n   Build: Releasebuild-3248547\n   Update: 3\n";

    fn facts(release: &str, update: u32, build: u32) -> VersionFacts {
        VersionFacts {
            release: release.to_string(),
            update: Some(update),
            build: Some(build),
        }
    }

    #[test]
    fn parses_version_output() {
        let parsed = parse_version_output(BASELINE_OUTPUT).unwrap();
        assert_eq!(parsed, facts("5.5.0", 3, 3_248_547));
    }

    #[test]
    fn missing_version_line_is_malformed() {
        let err = parse_version_output("Product: VMware ESXi\nBuild: 12\n").unwrap_err();
        assert!(matches!(err, ReconfigError::MalformedOutput { .. }));
    }

    #[test]
    fn garbage_build_is_unsupported_not_panic() {
        let parsed =
            parse_version_output("Version: 5.5.0\nBuild: Releasebuild-abc\nUpdate: x\n").unwrap();
        assert_eq!(parsed.build, None);
        assert_eq!(parsed.update, None);
        let classification = Classification::from_facts(parsed);
        assert_eq!(classification.variant, HostVariant::Unsupported);
        assert_eq!(classification.family, Some(HostVariant::Baseline));
    }

    #[test]
    fn segment_comparison_is_numeric() {
        assert_eq!(compare_versions("5.10.0", "5.2.0"), Ordering::Greater);
        assert_eq!(compare_versions("5.5.0", "5.5.0"), Ordering::Equal);
        assert_eq!(compare_versions("5.1.0", "5.5.0"), Ordering::Less);
        assert_eq!(normalized_version("5.5.0"), "  5  5  0");
    }

    #[test]
    fn classifies_each_baseline() {
        let cases = [
            (facts("5.5.0", 3, 3_248_547), HostVariant::Baseline),
            (facts("5.1.0", 3, 3_872_664), HostVariant::LegacyA),
            (facts("5.0.0", 4, 4_000_000), HostVariant::LegacyB),
            (facts("5.5.0", 2, 9_999_999), HostVariant::Unsupported),
            (facts("5.5.0", 3, 3_248_546), HostVariant::Unsupported),
            (facts("6.0.0", 3, 9_999_999), HostVariant::Unsupported),
        ];
        for (input, expected) in cases {
            assert_eq!(Classification::from_facts(input).variant, expected);
        }
    }

    #[test]
    fn low_patch_level_keeps_family() {
        let classification = Classification::from_facts(facts("5.1.0", 2, 100));
        assert_eq!(classification.variant, HostVariant::Unsupported);
        assert_eq!(classification.family, Some(HostVariant::LegacyA));
        assert!(classification.unsupported_detail().contains("Build-3872664"));
    }

    proptest! {
        #[test]
        fn segment_order_matches_numeric_order(
            a in proptest::collection::vec(0u16..1000, 3),
            b in proptest::collection::vec(0u16..1000, 3),
        ) {
            let render = |v: &[u16]| v.iter().map(ToString::to_string).collect::<Vec<_>>().join(".");
            prop_assert_eq!(compare_versions(&render(&a), &render(&b)), a.cmp(&b));
        }
    }
}
