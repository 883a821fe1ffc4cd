// src/config/model.rs

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::hosts::{AvailWindow, Host, Resource, WeeklySchedule};
use crate::model::JobType;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [scheduler]
/// queue_dir = "/var/spool/clusterq/queue"
/// drop_dir = "/var/spool/clusterq/drop"
/// superusers = ["admin"]
///
/// [jobtype.realign]
/// requires = { matlab = 1 }
///
/// [host.node1]
/// hostname = "node1.example.org"
/// cpus = 4
/// avail = ["1-5 9-17 4 2"]
/// ```
///
/// Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub scheduler: RawSchedulerSection,

    /// Keys are job-type names as used in `.job` files.
    #[serde(default)]
    pub jobtype: BTreeMap<String, RawJobType>,

    /// Keys are host nicknames.
    #[serde(default)]
    pub host: BTreeMap<String, RawHost>,
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RawSchedulerSection {
    #[serde(default = "default_queue_dir")]
    pub queue_dir: PathBuf,

    #[serde(default = "default_drop_dir")]
    pub drop_dir: PathBuf,

    #[serde(default = "default_control_addr")]
    pub control_addr: String,

    /// Port used for hosts that do not give an explicit address.
    #[serde(default = "default_host_port")]
    pub host_port: u16,

    #[serde(default = "default_queue_delay_secs")]
    pub queue_delay_secs: u64,

    /// Users allowed to modify any sequence.
    #[serde(default)]
    pub superusers: Vec<String>,

    /// Maximum number of concurrent host exchanges.
    #[serde(default = "default_dispatch_workers")]
    pub dispatch_workers: usize,

    #[serde(default = "default_ping_timeout_secs")]
    pub ping_timeout_secs: u64,

    #[serde(default = "default_dispatch_timeout_secs")]
    pub dispatch_timeout_secs: u64,
}

fn default_queue_dir() -> PathBuf {
    PathBuf::from("queue")
}

fn default_drop_dir() -> PathBuf {
    PathBuf::from("drop")
}

fn default_control_addr() -> String {
    "0.0.0.0:6005".to_string()
}

fn default_host_port() -> u16 {
    6004
}

fn default_queue_delay_secs() -> u64 {
    15
}

fn default_dispatch_workers() -> usize {
    16
}

fn default_ping_timeout_secs() -> u64 {
    30
}

fn default_dispatch_timeout_secs() -> u64 {
    10
}

impl Default for RawSchedulerSection {
    fn default() -> Self {
        Self {
            queue_dir: default_queue_dir(),
            drop_dir: default_drop_dir(),
            control_addr: default_control_addr(),
            host_port: default_host_port(),
            queue_delay_secs: default_queue_delay_secs(),
            superusers: Vec::new(),
            dispatch_workers: default_dispatch_workers(),
            ping_timeout_secs: default_ping_timeout_secs(),
            dispatch_timeout_secs: default_dispatch_timeout_secs(),
        }
    }
}

/// `[jobtype.<name>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJobType {
    /// Named resources and the minimum count each job needs.
    #[serde(default)]
    pub requires: BTreeMap<String, u32>,
}

/// `[host.<nickname>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RawHost {
    pub hostname: String,

    /// `host:port`; defaults to `hostname:host_port`.
    #[serde(default)]
    pub address: Option<String>,

    #[serde(default)]
    pub rank: i32,

    #[serde(default = "default_cpus")]
    pub cpus: u32,

    /// `days hours priority cpus` windows; later lines win.
    #[serde(default)]
    pub avail: Vec<String>,

    #[serde(default)]
    pub resources: Vec<RawResource>,
}

fn default_cpus() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawResource {
    pub name: String,
    #[serde(default = "default_resource_count")]
    pub count: i64,
    #[serde(default)]
    pub global: bool,
}

fn default_resource_count() -> i64 {
    1
}

/// Validated scheduler settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub queue_dir: PathBuf,
    pub drop_dir: PathBuf,
    pub control_addr: String,
    pub host_port: u16,
    pub queue_delay: Duration,
    pub superusers: BTreeSet<String>,
    pub dispatch_workers: usize,
    pub ping_timeout: Duration,
    pub dispatch_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig::from_raw(RawSchedulerSection::default())
    }
}

impl SchedulerConfig {
    pub(crate) fn from_raw(raw: RawSchedulerSection) -> Self {
        Self {
            queue_dir: raw.queue_dir,
            drop_dir: raw.drop_dir,
            control_addr: raw.control_addr,
            host_port: raw.host_port,
            queue_delay: Duration::from_secs(raw.queue_delay_secs),
            superusers: raw.superusers.into_iter().collect(),
            dispatch_workers: raw.dispatch_workers,
            ping_timeout: Duration::from_secs(raw.ping_timeout_secs),
            dispatch_timeout: Duration::from_secs(raw.dispatch_timeout_secs),
        }
    }

    pub fn is_superuser(&self, user: &str) -> bool {
        self.superusers.contains(user)
    }
}

/// Validated static host descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct HostConfig {
    pub nickname: String,
    pub hostname: String,
    pub address: String,
    pub rank: i32,
    pub cpus: u32,
    pub avail: Vec<AvailWindow>,
    pub resources: Vec<Resource>,
}

impl HostConfig {
    /// Build the registry entry for this host.
    pub fn to_host(&self) -> Host {
        let mut host = Host::new(&self.nickname, &self.hostname, &self.address);
        host.rank = self.rank;
        host.schedule = WeeklySchedule::from_windows(&self.avail, self.cpus);
        for r in &self.resources {
            host.resources.insert(r.name.clone(), r.clone());
        }
        host
    }
}

/// Fully validated configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    pub scheduler: SchedulerConfig,
    pub jobtypes: BTreeMap<String, JobType>,
    pub hosts: Vec<HostConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        scheduler: SchedulerConfig,
        jobtypes: BTreeMap<String, JobType>,
        hosts: Vec<HostConfig>,
    ) -> Self {
        Self {
            scheduler,
            jobtypes,
            hosts,
        }
    }
}
