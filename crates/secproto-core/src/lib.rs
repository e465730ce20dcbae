//! secproto core - legacy protocol reconfiguration
//!
//! Turns the legacy transport-security protocol on or off across the
//! network-facing services of a managed host, and rolls every change on that
//! host back when any single service fails:
//! - Gates hosts by release/build compatibility
//! - Scans the accepted protocol set per service
//! - Applies the change with a service-specific strategy and validates it
//! - Restores the pre-change state of every touched service on failure
//! - Runs a fleet of hosts sequentially and aggregates a report
//!
//! # Example
//!
//! ```rust,ignore
//! use secproto_core::prelude::*;
//!
//! # async fn example(backends: Backends, hosts: Vec<HostTarget>) {
//! let config = ReconfigConfig::new(Transition::DisableLegacy);
//! let runner = FleetRunner::new(HostOrchestrator::new(backends, config));
//!
//! let report = runner.run(&hosts).await;
//! println!("{}", report.summary());
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
pub mod config;
pub mod error;
pub mod fleet;
pub mod host;
pub mod orchestrator;
pub mod protocol;
pub mod remote;
pub mod report;
pub mod scanner;
pub mod service;
pub mod strategy;
pub mod version_gate;

// Test harness
pub mod test_harness;

// Re-exports for convenience
pub use config::ReconfigConfig;
pub use error::{ChannelError, FailureKind, ReconfigError};
pub use fleet::FleetRunner;
pub use host::{Credentials, HostRef, HostTarget, HostVariant};
pub use orchestrator::HostOrchestrator;
pub use protocol::{Protocol, ProtocolSet, Transition};
pub use remote::{
    Backends, ChannelConnector, CommandChannel, CommandOutput, Inventory, InventorySession,
    ProcessState, ProtocolProbe, ServiceManager,
};
pub use report::{FleetReport, HostOutcome, HostReport, ReconfigurationRecord, RecordStatus};
pub use service::ServiceId;
pub use version_gate::{Classification, VersionFacts, VersionGate};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving a reconfiguration run
    pub use crate::{
        Backends, Credentials, FleetReport, FleetRunner, HostOrchestrator, HostOutcome,
        HostReport, HostTarget, HostVariant, ProtocolSet, ReconfigConfig, ServiceId, Transition,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
