//! Simulated fleet
//!
//! In-memory hosts that implement every collaborator trait by interpreting
//! the exact shell commands the strategies issue:
//! - advanced settings (`esxcli system settings advanced list/set`)
//! - config files (`grep`, `awk` insert, `sed` delete/substitute, `cat | grep`, `echo >>`)
//! - init scripts (`restart`, `start`, `stop`, `status`)
//! - handshake probes, derived from the configuration a process loaded at
//!   its last (re)start
//!
//! Faults are injected per host through [`SimulatedHostSpec`].

use crate::error::{ChannelError, ReconfigError};
use crate::host::{Credentials, HostRef, HostTarget};
use crate::remote::{
    Backends, ChannelConnector, CommandChannel, CommandOutput, Inventory, InventorySession,
    ProcessState, ProtocolProbe, ServiceManager,
};
use crate::strategy::config_file::{ssl_options_entry, RHTTPPROXY_CONFIG, SFCB_CONFIG};
use crate::version_gate::VERSION_COMMAND;
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const RHTTPPROXY: &str = "/etc/init.d/rhttpproxy";
const HOSTD: &str = "/etc/init.d/hostd";
const SFCBD_WATCHDOG: &str = "/etc/init.d/sfcbd-watchdog";
const VSANVPD: &str = "/etc/init.d/vsanvpd";

const AUTH_SETTINGS: [&str; 3] = [
    "/UserVars/VMAuthdDisabledProtocols",
    "/UserVars/VMAuthdDisabledProtocols51",
    "/UserVars/VMAuthdDisabledProtocols50",
];
const PROXY_SETTING_51: &str = "/UserVars/ESXiRhttpproxyDisabledProtocols51";
const HOSTD_SETTING_50: &str = "/UserVars/ESXiHostdDisabledProtocols";
const VP_SETTING: &str = "/UserVars/ESXiVPsDisabledProtocols";

const DEFAULT_INVENTORY_ENDPOINT: &str = "vcenter.local";

/// Probe labels pinned for a port at start-up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeOverride {
    pub port: u16,
    pub labels: Vec<String>,
}

fn default_user() -> String {
    "root".to_string()
}

fn default_release() -> String {
    "5.5.0".to_string()
}

const fn default_update() -> u32 {
    3
}

const fn default_build() -> u32 {
    3_248_547
}

const fn default_true() -> bool {
    true
}

/// One simulated host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedHostSpec {
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub standalone: bool,

    #[serde(default = "default_release")]
    pub release: String,
    #[serde(default = "default_update")]
    pub update: u32,
    #[serde(default = "default_build")]
    pub build: u32,

    /// Initial state of every service
    #[serde(default)]
    pub legacy_enabled: bool,
    #[serde(default = "default_true")]
    pub remote_access_running: bool,
    #[serde(default)]
    pub unreachable: bool,
    #[serde(default = "default_true")]
    pub in_inventory: bool,

    /// Commands containing any of these fragments fail
    #[serde(default)]
    pub failing_commands: Vec<String>,
    #[serde(default)]
    pub probe_overrides: Vec<ProbeOverride>,
    /// Ports whose live protocols never change after a restart
    #[serde(default)]
    pub stale_ports: Vec<u16>,
    /// Copies onto a `.bkup` file are refused
    #[serde(default)]
    pub backup_denied: bool,
    /// Copies from a `.bkup` file are refused
    #[serde(default)]
    pub restore_copy_denied: bool,
    #[serde(default = "default_true")]
    pub storage_vp_running: bool,
    #[serde(default = "default_true")]
    pub storage_vp_startable: bool,
}

impl SimulatedHostSpec {
    /// Supported baseline host with the legacy protocol disabled everywhere
    #[must_use]
    pub fn baseline(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: None,
            user: default_user(),
            password: String::new(),
            standalone: false,
            release: default_release(),
            update: default_update(),
            build: default_build(),
            legacy_enabled: false,
            remote_access_running: true,
            unreachable: false,
            in_inventory: true,
            failing_commands: Vec::new(),
            probe_overrides: Vec::new(),
            stale_ports: Vec::new(),
            backup_denied: false,
            restore_copy_denied: false,
            storage_vp_running: true,
            storage_vp_startable: true,
        }
    }

    /// Supported 5.1 host
    #[must_use]
    pub fn legacy_a(name: impl Into<String>) -> Self {
        Self::baseline(name).with_version("5.1.0", 3, 3_872_664)
    }

    /// Supported 5.0 host
    #[must_use]
    pub fn legacy_b(name: impl Into<String>) -> Self {
        Self::baseline(name).with_version("5.0.0", 3, 3_982_828)
    }

    #[must_use]
    pub fn with_version(mut self, release: impl Into<String>, update: u32, build: u32) -> Self {
        self.release = release.into();
        self.update = update;
        self.build = build;
        self
    }

    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    #[must_use]
    pub fn standalone(mut self) -> Self {
        self.standalone = true;
        self
    }

    #[must_use]
    pub fn with_legacy_enabled(mut self) -> Self {
        self.legacy_enabled = true;
        self
    }

    #[must_use]
    pub fn with_remote_access_stopped(mut self) -> Self {
        self.remote_access_running = false;
        self
    }

    #[must_use]
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    #[must_use]
    pub fn not_in_inventory(mut self) -> Self {
        self.in_inventory = false;
        self
    }

    #[must_use]
    pub fn with_failing_command(mut self, fragment: impl Into<String>) -> Self {
        self.failing_commands.push(fragment.into());
        self
    }

    #[must_use]
    pub fn with_probe_override(mut self, port: u16, labels: &[&str]) -> Self {
        self.probe_overrides.push(ProbeOverride {
            port,
            labels: labels.iter().map(ToString::to_string).collect(),
        });
        self
    }

    #[must_use]
    pub fn with_stale_port(mut self, port: u16) -> Self {
        self.stale_ports.push(port);
        self
    }

    #[must_use]
    pub fn with_backup_denied(mut self) -> Self {
        self.backup_denied = true;
        self
    }

    #[must_use]
    pub fn with_restore_copy_denied(mut self) -> Self {
        self.restore_copy_denied = true;
        self
    }

    #[must_use]
    pub fn with_storage_vp_stopped(mut self, startable: bool) -> Self {
        self.storage_vp_running = false;
        self.storage_vp_startable = startable;
        self
    }

    /// Address, defaulting to the name
    #[must_use]
    pub fn address(&self) -> &str {
        self.address.as_deref().unwrap_or(&self.name)
    }

    /// Operator-side target for this host
    #[must_use]
    pub fn target(&self) -> HostTarget {
        let target = HostTarget::new(
            self.name.clone(),
            Credentials::new(self.user.clone(), self.password.clone()),
        )
        .with_address(self.address());
        if self.standalone {
            target.standalone()
        } else {
            target
        }
    }
}

/// Simulated fleet definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetSpec {
    /// Resolve hosts through the simulated inventory at this endpoint
    #[serde(default)]
    pub inventory_endpoint: Option<String>,
    #[serde(default)]
    pub hosts: Vec<SimulatedHostSpec>,
}

impl FleetSpec {
    #[must_use]
    pub fn new(hosts: Vec<SimulatedHostSpec>) -> Self {
        Self {
            inventory_endpoint: None,
            hosts,
        }
    }

    #[must_use]
    pub fn with_inventory(mut self, endpoint: impl Into<String>) -> Self {
        self.inventory_endpoint = Some(endpoint.into());
        self
    }

    /// Parse TOML
    ///
    /// # Errors
    /// `Config` on invalid TOML or duplicate host names
    pub fn from_toml_str(content: &str) -> Result<Self, ReconfigError> {
        let spec: Self = toml::from_str(content)
            .map_err(|e| ReconfigError::Config(format!("invalid fleet TOML: {e}")))?;
        let mut seen = BTreeSet::new();
        for host in &spec.hosts {
            if !seen.insert(host.name.as_str()) {
                return Err(ReconfigError::Config(format!(
                    "duplicate host `{}` in fleet",
                    host.name
                )));
            }
        }
        Ok(spec)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// `Config` if the file cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self, ReconfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ReconfigError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Targets in declaration order
    #[must_use]
    pub fn targets(&self) -> Vec<HostTarget> {
        self.hosts.iter().map(SimulatedHostSpec::target).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Current,
    Release51,
    Release50,
}

#[derive(Debug)]
struct HostState {
    spec: SimulatedHostSpec,
    family: Family,
    files: BTreeMap<String, String>,
    settings: BTreeMap<String, String>,
    processes: BTreeMap<String, ProcessState>,
    live: BTreeMap<u16, Vec<String>>,
    remote_access: ProcessState,
    remote_access_starts: u32,
    remote_access_stops: u32,
    channels_opened: u32,
    channels_closed: u32,
    command_log: Vec<String>,
}

fn proxy_config(legacy: bool) -> String {
    let ssl_options = if legacy {
        format!("          {}\n", ssl_options_entry())
    } else {
        String::new()
    };
    format!(
        "<config>\n   <vmacore>\n      <ssl>\n         <doVersionCheck> false </doVersionCheck>\n{ssl_options}      </ssl>\n   </vmacore>\n   <proxy>\n      <httpPort>80</httpPort>\n   </proxy>\n</config>\n"
    )
}

fn sfcb_config(legacy: bool) -> String {
    let mut config = "basicAuthLib: sfcBasicPAMAuthentication\nhttpsPort: 5989\n".to_string();
    if legacy {
        config.push_str("enableSSLv3:true\n");
    }
    config
}

fn ok(stdout: impl Into<String>) -> CommandOutput {
    CommandOutput::ok(stdout)
}

fn err(stderr: impl Into<String>) -> CommandOutput {
    CommandOutput::failed(stderr)
}

impl HostState {
    fn new(spec: SimulatedHostSpec) -> Self {
        let family = if spec.release.starts_with("5.0") {
            Family::Release50
        } else if spec.release.starts_with("5.1") {
            Family::Release51
        } else {
            Family::Current
        };
        let disabled = if spec.legacy_enabled { "" } else { "sslv3" };

        let mut settings = BTreeMap::new();
        for path in AUTH_SETTINGS
            .into_iter()
            .chain([PROXY_SETTING_51, HOSTD_SETTING_50, VP_SETTING])
        {
            settings.insert(path.to_string(), disabled.to_string());
        }

        let mut files = BTreeMap::new();
        files.insert(
            RHTTPPROXY_CONFIG.path.to_string(),
            proxy_config(spec.legacy_enabled),
        );
        files.insert(SFCB_CONFIG.path.to_string(), sfcb_config(spec.legacy_enabled));

        let mut processes = BTreeMap::new();
        for script in [RHTTPPROXY, HOSTD, SFCBD_WATCHDOG] {
            processes.insert(script.to_string(), ProcessState::Running);
        }
        if family == Family::Current {
            let state = if spec.storage_vp_running {
                ProcessState::Running
            } else {
                ProcessState::Stopped
            };
            processes.insert(VSANVPD.to_string(), state);
        }

        let remote_access = if spec.remote_access_running {
            ProcessState::Running
        } else {
            ProcessState::Stopped
        };

        let mut state = Self {
            spec,
            family,
            files,
            settings,
            processes,
            live: BTreeMap::new(),
            remote_access,
            remote_access_starts: 0,
            remote_access_stops: 0,
            channels_opened: 0,
            channels_closed: 0,
            command_log: Vec::new(),
        };
        for port in [443, 5989, 8080] {
            let labels = state.configured_labels(port);
            state.live.insert(port, labels);
        }
        for o in state.spec.probe_overrides.clone() {
            state.live.insert(o.port, o.labels);
        }
        state
    }

    fn modern_labels(&self) -> Vec<String> {
        let labels: &[&str] = match self.family {
            Family::Current => &["TLSv1.0", "TLSv1.1", "TLSv1.2"],
            Family::Release51 | Family::Release50 => &["TLSv1.0"],
        };
        labels.iter().map(ToString::to_string).collect()
    }

    fn setting_allows_legacy(&self, path: &str) -> bool {
        self.settings.get(path).is_some_and(String::is_empty)
    }

    fn configured_legacy(&self, port: u16) -> bool {
        match port {
            443 => match self.family {
                Family::Current => self
                    .files
                    .get(RHTTPPROXY_CONFIG.path)
                    .is_some_and(|c| c.lines().any(|l| l.trim() == ssl_options_entry())),
                Family::Release51 => self.setting_allows_legacy(PROXY_SETTING_51),
                Family::Release50 => self.setting_allows_legacy(HOSTD_SETTING_50),
            },
            5989 => self.files.get(SFCB_CONFIG.path).is_some_and(|c| {
                c.lines().any(|l| {
                    l.chars().filter(|ch| !ch.is_whitespace()).collect::<String>()
                        == "enableSSLv3:true"
                })
            }),
            8080 => self.setting_allows_legacy(VP_SETTING),
            _ => false,
        }
    }

    fn configured_labels(&self, port: u16) -> Vec<String> {
        let mut labels = Vec::new();
        if self.configured_legacy(port) {
            labels.push("SSLv3".to_string());
        }
        labels.extend(self.modern_labels());
        labels
    }

    fn port_of(&self, script: &str) -> Option<u16> {
        match (script, self.family) {
            (RHTTPPROXY, Family::Current | Family::Release51) | (HOSTD, Family::Release50) => {
                Some(443)
            }
            (SFCBD_WATCHDOG, _) => Some(5989),
            (VSANVPD, _) => Some(8080),
            _ => None,
        }
    }

    /// Process (re)loads its configuration
    fn load(&mut self, script: &str) {
        self.processes
            .insert(script.to_string(), ProcessState::Running);
        if let Some(port) = self.port_of(script) {
            if !self.spec.stale_ports.contains(&port) {
                let labels = self.configured_labels(port);
                self.live.insert(port, labels);
            }
        }
    }

    fn failing(&self, command: &str) -> bool {
        self.spec
            .failing_commands
            .iter()
            .any(|fragment| command.contains(fragment.as_str()))
    }

    fn version_output(&self) -> String {
        format!(
            "   Product: VMware ESXi\n   Version: {}\n   Build: Releasebuild-{}\n   Update: {}\n",
            self.spec.release, self.spec.build, self.spec.update
        )
    }

    fn execute(&mut self, command: &str) -> CommandOutput {
        self.command_log.push(command.to_string());
        if self.failing(command) {
            return err(format!("simulated failure: {command}"));
        }

        if command == VERSION_COMMAND {
            return ok(self.version_output());
        }
        if let Some(path) = command.strip_prefix("esxcli system settings advanced list -o ") {
            return self.list_setting(path.trim());
        }
        if let Some(rest) = command.strip_prefix("esxcli system settings advanced set -o ") {
            return self.set_setting(rest);
        }
        if let Some(rest) = command.strip_prefix("grep \"") {
            return match rest.split_once("\" ") {
                Some((pattern, path)) => self.grep(path.trim(), pattern),
                None => err("grep: bad usage"),
            };
        }
        if let Some(rest) = command.strip_prefix("cat ") {
            return match rest.split_once(" | grep ") {
                Some((path, pattern)) => self.grep(path.trim(), pattern.trim()),
                None => err("cat: bad usage"),
            };
        }
        if command.starts_with("awk ") {
            return self.awk_insert(last_token(command));
        }
        if let Some(rest) = command.strip_prefix("sed -i -e 's/") {
            return self.sed_substitute(rest);
        }
        if let Some(rest) = command.strip_prefix("sed -i -e '/") {
            return self.sed_delete(rest);
        }
        if let Some(rest) = command.strip_prefix("echo ") {
            return match rest.split_once(" >> ") {
                Some((text, path)) => self.append(path.trim(), text),
                None => ok(rest),
            };
        }
        if command.starts_with("/etc/init.d/") {
            return self.init_script(command);
        }
        err(format!("sh: {command}: not found"))
    }

    fn list_setting(&self, path: &str) -> CommandOutput {
        match self.settings.get(path) {
            Some(value) => ok(format!(
                "   Path: {path}\n   Type: string\n   Int Value: 0\n   Default Int Value: 0\n   String Value: {value}\n   Default String Value: sslv3\n   Valid Characters: *\n   Description: disabled protocols\n"
            )),
            None => err(format!("Unable to find option {path}")),
        }
    }

    fn set_setting(&mut self, rest: &str) -> CommandOutput {
        let Some((path, value)) = rest.split_once(" -s ") else {
            return err("Missing required parameter -s|--string-value");
        };
        let path = path.trim();
        if !self.settings.contains_key(path) {
            return err(format!("Unable to find option {path}"));
        }
        let value = value.trim().trim_matches('"');
        self.settings.insert(path.to_string(), value.to_string());
        ok("")
    }

    fn grep(&self, path: &str, pattern: &str) -> CommandOutput {
        match self.files.get(path) {
            Some(content) => ok(content
                .lines()
                .filter(|line| line.contains(pattern))
                .map(|line| format!("{line}\n"))
                .collect::<String>()),
            None => err(format!("grep: {path}: No such file or directory")),
        }
    }

    fn awk_insert(&mut self, path: &str) -> CommandOutput {
        let Some(content) = self.files.get(path) else {
            return err(format!("awk: cannot open {path}"));
        };
        let entry = format!("          {}", ssl_options_entry());
        let mut in_vmacore = false;
        let mut out = String::new();
        for line in content.lines() {
            if line.contains("<vmacore>") {
                in_vmacore = true;
            }
            if line.starts_with("<mm>") && !line.contains("<vmacore>") {
                in_vmacore = false;
            }
            if in_vmacore && line.contains("</ssl>") {
                out.push_str(&entry);
                out.push('\n');
                in_vmacore = false;
            }
            out.push_str(line);
            out.push('\n');
        }
        self.files.insert(path.to_string(), out);
        ok("")
    }

    fn sed_delete(&mut self, rest: &str) -> CommandOutput {
        let Some((pattern, path)) = rest.split_once("/d' ") else {
            return err("sed: bad expression");
        };
        let pattern = pattern.replace("\\/", "/");
        let path = path.trim();
        let Some(content) = self.files.get(path) else {
            return err(format!("sed: can't read {path}: No such file or directory"));
        };
        let kept: String = content
            .lines()
            .filter(|line| !line.contains(&pattern))
            .map(|line| format!("{line}\n"))
            .collect();
        self.files.insert(path.to_string(), kept);
        ok("")
    }

    fn sed_substitute(&mut self, rest: &str) -> CommandOutput {
        let Some((expr, path)) = rest.split_once("/g' ") else {
            return err("sed: bad expression");
        };
        let Some((old, new)) = expr.split_once('/') else {
            return err("sed: bad expression");
        };
        let path = path.trim();
        let Some(content) = self.files.get(path) else {
            return err(format!("sed: can't read {path}: No such file or directory"));
        };
        let replaced = content.replace(old, new);
        self.files.insert(path.to_string(), replaced);
        ok("")
    }

    fn append(&mut self, path: &str, text: &str) -> CommandOutput {
        let content = self.files.entry(path.to_string()).or_default();
        content.push_str(text);
        content.push('\n');
        ok("")
    }

    fn init_script(&mut self, command: &str) -> CommandOutput {
        let (script, action) = command.split_once(' ').unwrap_or((command, ""));
        let Some(state) = self.processes.get(script).copied() else {
            return err(format!("sh: {script}: not found"));
        };
        match action.trim() {
            "restart" => {
                self.load(script);
                ok(format!("{script} restarted"))
            }
            "start" => {
                if script == VSANVPD && !self.spec.storage_vp_startable {
                    return err(format!("{script}: failed to start"));
                }
                if state == ProcessState::Stopped {
                    self.load(script);
                }
                ok(format!("{script} started"))
            }
            "stop" => {
                self.processes
                    .insert(script.to_string(), ProcessState::Stopped);
                ok(format!("{script} stopped"))
            }
            "status" => {
                let name = script.trim_start_matches("/etc/init.d/");
                match state {
                    ProcessState::Running => ok(format!("{name} is running")),
                    ProcessState::Stopped => ok(format!("{name} is not running")),
                }
            }
            other => err(format!("{script}: unknown action `{other}`")),
        }
    }

    fn copy(&mut self, source: &str, destination: &str) -> bool {
        self.command_log.push(format!("cp {source} {destination}"));
        if self.spec.backup_denied && destination.ends_with(".bkup") {
            return false;
        }
        if self.spec.restore_copy_denied && source.ends_with(".bkup") {
            return false;
        }
        match self.files.get(source).cloned() {
            Some(content) => {
                self.files.insert(destination.to_string(), content);
                true
            }
            None => false,
        }
    }

    fn host_ref(&self) -> HostRef {
        HostRef {
            name: self.spec.name.clone(),
            address: self.spec.address().to_string(),
        }
    }
}

fn last_token(command: &str) -> &str {
    command.rsplit(' ').next().unwrap_or(command)
}

#[derive(Debug)]
struct FleetState {
    inventory_endpoint: String,
    hosts: IndexMap<String, HostState>,
}

impl FleetState {
    fn by_address(&mut self, address: &str) -> Option<&mut HostState> {
        self.hosts
            .values_mut()
            .find(|h| h.spec.address() == address)
    }
}

/// Simulated fleet; cheap to clone, all clones share state
#[derive(Debug, Clone)]
pub struct SimulatedFleet {
    spec: FleetSpec,
    inner: Arc<Mutex<FleetState>>,
}

impl SimulatedFleet {
    #[must_use]
    pub fn new(spec: FleetSpec) -> Self {
        let hosts = spec
            .hosts
            .iter()
            .map(|h| (h.name.clone(), HostState::new(h.clone())))
            .collect();
        let inventory_endpoint = spec
            .inventory_endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_INVENTORY_ENDPOINT.to_string());
        Self {
            spec,
            inner: Arc::new(Mutex::new(FleetState {
                inventory_endpoint,
                hosts,
            })),
        }
    }

    #[must_use]
    pub fn spec(&self) -> &FleetSpec {
        &self.spec
    }

    /// Targets in declaration order
    #[must_use]
    pub fn targets(&self) -> Vec<HostTarget> {
        self.spec.targets()
    }

    /// Collaborators backed by this fleet
    #[must_use]
    pub fn backends(&self) -> Backends {
        Backends::new(
            Arc::new(self.clone()),
            Arc::new(self.clone()),
            Arc::new(self.clone()),
        )
    }

    fn with_host<T>(&self, name: &str, f: impl FnOnce(&HostState) -> T) -> Option<T> {
        self.inner.lock().hosts.get(name).map(f)
    }

    /// Every command run on a host, `cp` entries included
    #[must_use]
    pub fn command_log(&self, host: &str) -> Vec<String> {
        self.with_host(host, |h| h.command_log.clone())
            .unwrap_or_default()
    }

    /// Commands that change host state
    #[must_use]
    pub fn mutating_commands(&self, host: &str) -> Vec<String> {
        self.command_log(host)
            .into_iter()
            .filter(|c| {
                c.contains(" advanced set ")
                    || c.starts_with("awk ")
                    || c.starts_with("sed ")
                    || c.contains(" >> ")
                    || c.ends_with(" restart")
                    || c.ends_with(" stop")
                    || c.starts_with("cp ")
            })
            .collect()
    }

    #[must_use]
    pub fn file(&self, host: &str, path: &str) -> Option<String> {
        self.with_host(host, |h| h.files.get(path).cloned()).flatten()
    }

    #[must_use]
    pub fn setting(&self, host: &str, path: &str) -> Option<String> {
        self.with_host(host, |h| h.settings.get(path).cloned())
            .flatten()
    }

    /// Labels the probe currently reports for a port
    #[must_use]
    pub fn live_labels(&self, host: &str, port: u16) -> Vec<String> {
        self.with_host(host, |h| h.live.get(&port).cloned())
            .flatten()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn process_state(&self, host: &str, script: &str) -> Option<ProcessState> {
        self.with_host(host, |h| h.processes.get(script).copied())
            .flatten()
    }

    #[must_use]
    pub fn remote_access_state(&self, host: &str) -> Option<ProcessState> {
        self.with_host(host, |h| h.remote_access)
    }

    /// (starts, stops) issued through the service manager
    #[must_use]
    pub fn remote_access_toggles(&self, host: &str) -> (u32, u32) {
        self.with_host(host, |h| (h.remote_access_starts, h.remote_access_stops))
            .unwrap_or_default()
    }

    /// Channels opened and not closed
    #[must_use]
    pub fn open_channels(&self, host: &str) -> u32 {
        self.with_host(host, |h| h.channels_opened - h.channels_closed)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn channels_opened(&self, host: &str) -> u32 {
        self.with_host(host, |h| h.channels_opened)
            .unwrap_or_default()
    }
}

/// Command channel to one simulated host
#[derive(Debug)]
pub struct SimulatedChannel {
    host: String,
    fleet: Arc<Mutex<FleetState>>,
    closed: AtomicBool,
}

impl SimulatedChannel {
    fn with_state<T>(&self, f: impl FnOnce(&mut HostState) -> T) -> Result<T, ChannelError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }
        let mut fleet = self.fleet.lock();
        let host = fleet.hosts.get_mut(&self.host).ok_or(ChannelError::Closed)?;
        Ok(f(host))
    }
}

#[async_trait]
impl CommandChannel for SimulatedChannel {
    async fn run_sync(&self, command: &str) -> Result<CommandOutput, ChannelError> {
        self.with_state(|h| h.execute(command))
    }

    async fn run_async(&self, command: &str) -> Result<(), ChannelError> {
        let output = self.with_state(|h| h.execute(command))?;
        if output.succeeded() {
            Ok(())
        } else {
            Err(ChannelError::Execution {
                command: command.to_string(),
                reason: output.stderr,
            })
        }
    }

    async fn wait_for_process(
        &self,
        process: &str,
        state: ProcessState,
        _timeout: Duration,
    ) -> Result<bool, ChannelError> {
        self.with_state(|h| h.processes.get(process).copied() == Some(state))
    }

    async fn copy_file(&self, source: &str, destination: &str) -> Result<bool, ChannelError> {
        self.with_state(|h| h.copy(source, destination))
    }

    async fn file_exists(&self, path: &str) -> Result<bool, ChannelError> {
        self.with_state(|h| h.files.contains_key(path))
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }
        if let Some(host) = self.fleet.lock().hosts.get_mut(&self.host) {
            host.channels_closed += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl ChannelConnector for SimulatedFleet {
    async fn open(
        &self,
        address: &str,
        credentials: &Credentials,
    ) -> Result<Box<dyn CommandChannel>, ChannelError> {
        let mut fleet = self.inner.lock();
        let open_err = |reason: &str| ChannelError::Open {
            address: address.to_string(),
            reason: reason.to_string(),
        };
        let host = fleet
            .by_address(address)
            .ok_or_else(|| open_err("no route to host"))?;
        if host.spec.unreachable {
            return Err(open_err("connection timed out"));
        }
        if host.spec.user != credentials.user || host.spec.password != credentials.password {
            return Err(open_err("authentication failed"));
        }
        host.channels_opened += 1;
        let name = host.spec.name.clone();
        drop(fleet);

        Ok(Box::new(SimulatedChannel {
            host: name,
            fleet: Arc::clone(&self.inner),
            closed: AtomicBool::new(false),
        }))
    }
}

#[async_trait]
impl ProtocolProbe for SimulatedFleet {
    async fn scan_port(&self, address: &str, port: u16) -> Result<Vec<String>, ChannelError> {
        let mut fleet = self.inner.lock();
        let probe_err = |reason: &str| ChannelError::Probe {
            address: address.to_string(),
            port,
            reason: reason.to_string(),
        };
        let host = fleet
            .by_address(address)
            .ok_or_else(|| probe_err("no route to host"))?;
        if host.spec.unreachable {
            return Err(probe_err("connection timed out"));
        }
        let backing = host
            .processes
            .iter()
            .find(|(script, _)| host.port_of(script) == Some(port))
            .map(|(_, state)| *state);
        if backing == Some(ProcessState::Stopped) {
            return Err(probe_err("connection refused"));
        }
        host.live
            .get(&port)
            .cloned()
            .ok_or_else(|| probe_err("connection refused"))
    }
}

impl SimulatedFleet {
    fn remote_host<T>(
        &self,
        host: &HostRef,
        key: &str,
        f: impl FnOnce(&mut HostState) -> T,
    ) -> Result<T, ChannelError> {
        let mut fleet = self.inner.lock();
        let state = fleet
            .by_address(&host.address)
            .filter(|h| !h.spec.unreachable)
            .ok_or_else(|| ChannelError::ServiceManager {
                service: key.to_string(),
                reason: format!("host {} not reachable", host.name),
            })?;
        Ok(f(state))
    }
}

#[async_trait]
impl ServiceManager for SimulatedFleet {
    async fn service_state(&self, host: &HostRef, key: &str) -> Result<ProcessState, ChannelError> {
        self.remote_host(host, key, |h| h.remote_access)
    }

    async fn start_service(&self, host: &HostRef, key: &str) -> Result<(), ChannelError> {
        self.remote_host(host, key, |h| {
            h.remote_access = ProcessState::Running;
            h.remote_access_starts += 1;
        })
    }

    async fn stop_service(&self, host: &HostRef, key: &str) -> Result<(), ChannelError> {
        self.remote_host(host, key, |h| {
            h.remote_access = ProcessState::Stopped;
            h.remote_access_stops += 1;
        })
    }
}

#[async_trait]
impl Inventory for SimulatedFleet {
    async fn login(
        &self,
        endpoint: &str,
        credentials: &Credentials,
    ) -> Result<InventorySession, ChannelError> {
        let mut fleet = self.inner.lock();
        if endpoint != fleet.inventory_endpoint {
            let host = fleet
                .by_address(endpoint)
                .filter(|h| !h.spec.unreachable)
                .ok_or_else(|| ChannelError::Inventory(format!("cannot reach {endpoint}")))?;
            if host.spec.user != credentials.user || host.spec.password != credentials.password {
                return Err(ChannelError::Inventory(format!(
                    "login to {endpoint} rejected"
                )));
            }
        }
        Ok(InventorySession {
            endpoint: endpoint.to_string(),
            token: format!("session-{}", endpoint.len()),
        })
    }

    async fn list_connected_hosts(
        &self,
        session: &InventorySession,
    ) -> Result<Vec<HostRef>, ChannelError> {
        let mut fleet = self.inner.lock();
        if session.endpoint != fleet.inventory_endpoint {
            return Ok(fleet
                .by_address(&session.endpoint)
                .map(|h| vec![h.host_ref()])
                .unwrap_or_default());
        }
        Ok(fleet
            .hosts
            .values()
            .filter(|h| h.spec.in_inventory && !h.spec.unreachable)
            .map(HostState::host_ref)
            .collect())
    }

    async fn resolve_host(
        &self,
        session: &InventorySession,
        name: &str,
    ) -> Result<Option<HostRef>, ChannelError> {
        let fleet = self.inner.lock();
        if session.endpoint != fleet.inventory_endpoint {
            return Err(ChannelError::Inventory(format!(
                "{} is not an inventory endpoint",
                session.endpoint
            )));
        }
        Ok(fleet
            .hosts
            .get(name)
            .filter(|h| h.spec.in_inventory)
            .map(HostState::host_ref))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fleet(spec: SimulatedHostSpec) -> SimulatedFleet {
        SimulatedFleet::new(FleetSpec::new(vec![spec]))
    }

    #[test]
    fn initial_labels_follow_configuration() {
        let sim = fleet(SimulatedHostSpec::baseline("a").with_legacy_enabled());
        assert_eq!(
            sim.live_labels("a", 443),
            vec!["SSLv3", "TLSv1.0", "TLSv1.1", "TLSv1.2"]
        );
        let sim = fleet(SimulatedHostSpec::legacy_b("b"));
        assert_eq!(sim.live_labels("b", 5989), vec!["TLSv1.0"]);
    }

    #[test]
    fn awk_inserts_inside_vmacore_ssl() {
        let mut host = HostState::new(SimulatedHostSpec::baseline("a"));
        let path = RHTTPPROXY_CONFIG.path;
        host.execute(&crate::strategy::config_file::ssl_options_insert_command(path));
        let content = host.files.get(path).cloned().unwrap_or_default();
        let lines: Vec<&str> = content.lines().collect();
        let entry = lines
            .iter()
            .position(|l| l.trim() == ssl_options_entry())
            .unwrap();
        assert_eq!(lines[entry + 1].trim(), "</ssl>");

        host.execute(&crate::strategy::config_file::ssl_options_delete_command(path));
        assert!(!host.files[path].contains("sslOptions"));
    }

    #[test]
    fn restart_reloads_unless_stale() {
        let mut host = HostState::new(SimulatedHostSpec::baseline("a").with_stale_port(5989));
        host.execute("echo enableSSLv3:true >> /etc/sfcb/sfcb.cfg");
        host.execute("/etc/init.d/sfcbd-watchdog restart");
        assert!(!host.live[&5989].contains(&"SSLv3".to_string()));

        host.execute("esxcli system settings advanced set -o /UserVars/ESXiVPsDisabledProtocols -s \"\"");
        host.execute("/etc/init.d/vsanvpd restart");
        assert!(host.live[&8080].contains(&"SSLv3".to_string()));
    }

    #[test]
    fn failing_fragment_writes_stderr() {
        let mut host =
            HostState::new(SimulatedHostSpec::baseline("a").with_failing_command("sfcbd-watchdog"));
        let output = host.execute("/etc/init.d/sfcbd-watchdog restart");
        assert!(!output.succeeded());
    }

    #[test]
    fn fleet_spec_from_toml() {
        let spec = FleetSpec::from_toml_str(
            r#"
            [[hosts]]
            name = "esx-01"
            address = "10.0.0.1"
            legacy_enabled = true

            [[hosts]]
            name = "esx-02"
            release = "5.1.0"
            build = 3872664
            stale_ports = [5989]
            "#,
        )
        .unwrap();
        assert_eq!(spec.hosts.len(), 2);
        assert_eq!(spec.hosts[0].address(), "10.0.0.1");
        assert_eq!(spec.hosts[1].address(), "esx-02");
        assert_eq!(spec.hosts[1].update, 3);
        assert!(spec.hosts[1].remote_access_running);
    }

    #[test]
    fn duplicate_hosts_rejected() {
        let err = FleetSpec::from_toml_str(
            "[[hosts]]\nname = \"a\"\n\n[[hosts]]\nname = \"a\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate host"));
    }

    #[tokio::test]
    async fn closed_channel_rejects_commands() {
        let sim = fleet(SimulatedHostSpec::baseline("a"));
        let mut channel = sim
            .open("a", &Credentials::new("root", ""))
            .await
            .unwrap();
        channel.close().await.unwrap();
        assert_eq!(sim.open_channels("a"), 0);
        assert!(matches!(
            channel.run_sync(VERSION_COMMAND).await,
            Err(ChannelError::Closed)
        ));
    }
}
