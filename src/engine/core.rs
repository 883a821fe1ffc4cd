// src/engine/core.rs

//! Core scheduler state machine.
//!
//! [`CoreRuntime`] consumes [`RuntimeEvent`]s and produces a [`CoreStep`]:
//! the host exchanges and control replies the IO shell should carry out.
//! It owns every piece of process-wide state (sequence map, host registry,
//! running-job index) and has no channels, sockets or timers, so tests can
//! drive it event by event with synthetic timestamps.

use std::collections::BTreeMap;
use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{error, info, warn};

use crate::config::{load_and_validate, ConfigFile, SchedulerConfig};
use crate::engine::event_handlers::{CoreCommand, CoreStep};
use crate::engine::{RuntimeEvent, Timestamp};
use crate::errors::Result;
use crate::hosts::HostRegistry;
use crate::model::{Job, JobId, JobType, Sequence};
use crate::store::QueueStore;

#[derive(Debug)]
pub struct CoreRuntime {
    pub(crate) settings: SchedulerConfig,
    pub(crate) jobtypes: BTreeMap<String, JobType>,
    pub(crate) store: QueueStore,
    pub(crate) sequences: BTreeMap<u32, Sequence>,
    pub(crate) hosts: HostRegistry,
    /// Definitive record of what is executing, keyed by (seq, job).
    pub(crate) running: BTreeMap<JobId, Job>,
    pub(crate) paused: bool,
    pub(crate) rng: StdRng,
    config_path: Option<PathBuf>,
}

impl CoreRuntime {
    /// Build a core from validated configuration. Nothing is read from the
    /// queue until [`CoreRuntime::load`].
    pub fn new(config: &ConfigFile, store: QueueStore) -> Self {
        Self {
            settings: config.scheduler.clone(),
            jobtypes: config.jobtypes.clone(),
            store,
            sequences: BTreeMap::new(),
            hosts: registry_from_config(config),
            running: BTreeMap::new(),
            paused: false,
            rng: StdRng::from_os_rng(),
            config_path: None,
        }
    }

    /// Fix the random host tiebreak so passes are reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Config file re-read by `RESET`.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Read the queue, reservations and running jobs from disk.
    pub fn load(&mut self, now: Timestamp) -> Result<()> {
        self.store.ensure_layout()?;
        self.sequences = self.store.load_all()?;

        self.hosts.refresh_schedules(now.weekday, now.hour, now.unix);
        for stored in self.store.load_reservations(now.unix) {
            match self.hosts.find_mut(&stored.host) {
                Some(host) => host.reservations.push(stored.reservation),
                None => warn!(host = %stored.host, "reservation for unknown host ignored"),
            }
        }

        self.rebuild_running_index(now);
        info!(
            sequences = self.sequences.len(),
            running = self.running.len(),
            hosts = self.hosts.len(),
            "scheduler state loaded"
        );
        Ok(())
    }

    /// `RESET`: re-read configuration (if a path is known) and the queue.
    pub(crate) fn reload(&mut self, now: Timestamp) -> Result<()> {
        if let Some(path) = &self.config_path {
            let mut config = load_and_validate(path)?;
            config.scheduler.queue_dir = self.settings.queue_dir.clone();
            config.scheduler.drop_dir = self.settings.drop_dir.clone();
            self.settings = config.scheduler.clone();
            self.jobtypes = config.jobtypes.clone();
            self.hosts = registry_from_config(&config);
        } else {
            let port = self.settings.host_port;
            let mut fresh = HostRegistry::new(port);
            for host in self.hosts.hosts() {
                let mut host = host.clone();
                host.running.clear();
                host.taken_cpus = 0;
                host.reservations.clear();
                fresh.insert(host);
            }
            self.hosts = fresh;
        }
        self.running.clear();
        self.load(now)
    }

    fn rebuild_running_index(&mut self, now: Timestamp) {
        self.running.clear();
        for seq in self.sequences.values() {
            for job in seq.jobs.values().filter(|j| j.status.is_running()) {
                let mut entry = job.clone();
                entry.last_report = now.unix;
                let id = entry.id();
                if let Some(host) = self.hosts.find_mut(&entry.host) {
                    host.take_slot(id);
                } else {
                    warn!(seq = id.seq, job = id.job, host = %entry.host, "running job on unknown host");
                }
                self.running.insert(id, entry);
            }
        }
    }

    pub fn sequences(&self) -> &BTreeMap<u32, Sequence> {
        &self.sequences
    }

    pub fn sequence(&self, seqnum: u32) -> Option<&Sequence> {
        self.sequences.get(&seqnum)
    }

    pub fn hosts(&self) -> &HostRegistry {
        &self.hosts
    }

    pub fn hosts_mut(&mut self) -> &mut HostRegistry {
        &mut self.hosts
    }

    pub fn running(&self) -> &BTreeMap<JobId, Job> {
        &self.running
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn store(&self) -> &QueueStore {
        &self.store
    }

    /// Handle a single runtime event, updating core state and returning
    /// the resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent, now: Timestamp) -> CoreStep {
        match event {
            RuntimeEvent::Tick => self.run_cycle(now),
            RuntimeEvent::Control {
                user,
                command,
                reply,
            } => {
                let outcome = self.handle_control(&user, command, now);
                let mut commands = Vec::new();
                if !outcome.work.is_empty() {
                    commands.push(CoreCommand::SubmitWork(outcome.work));
                }
                commands.push(CoreCommand::Reply {
                    reply_tx: reply,
                    reply: outcome.reply,
                });
                if outcome.exit {
                    commands.push(CoreCommand::RequestExit);
                }
                CoreStep {
                    commands,
                    keep_running: !outcome.exit,
                }
            }
            RuntimeEvent::DispatchFinished { job, host, outcome } => {
                self.handle_dispatch_finished(job, &host, outcome, now);
                CoreStep::idle()
            }
            RuntimeEvent::PingFinished { host, outcome } => {
                self.handle_ping_finished(&host, &outcome, now);
                CoreStep::idle()
            }
            RuntimeEvent::ShutdownRequested => CoreStep {
                commands: Vec::new(),
                keep_running: false,
            },
        }
    }

    /// Append a line to a job file, logging failures.
    pub(crate) fn persist_job_line(&self, id: JobId, line: &str) -> bool {
        match self.store.append_job_line(id.seq, id.job, line) {
            Ok(()) => true,
            Err(err) => {
                error!(seq = id.seq, job = id.job, line, error = %err, "failed to persist job update");
                false
            }
        }
    }

    /// Append a line to a sequence's info file, logging failures.
    pub(crate) fn persist_seq_line(&self, seqnum: u32, line: &str) -> bool {
        match self.store.append_seq_line(seqnum, line) {
            Ok(()) => true,
            Err(err) => {
                error!(seq = seqnum, line, error = %err, "failed to persist sequence update");
                false
            }
        }
    }
}

fn registry_from_config(config: &ConfigFile) -> HostRegistry {
    let mut registry = HostRegistry::new(config.scheduler.host_port);
    for host in &config.hosts {
        registry.insert(host.to_host());
    }
    registry
}
