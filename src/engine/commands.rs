// src/engine/commands.rs

//! Control-channel command handlers.

use std::collections::BTreeSet;
use std::path::Path;

use tracing::{error, info, warn};

use crate::control::{ControlCommand, ControlReply, SchedChange};
use crate::engine::core::CoreRuntime;
use crate::engine::Timestamp;
use crate::errors::ClusterqError;
use crate::exec::HostWork;
use crate::model::{format_number_set, JobId};
use crate::protocol::bracket::{field, quote};
use crate::types::{JobStatus, SequenceStatus};

/// Result of one control command.
#[derive(Debug)]
pub struct ControlOutcome {
    pub reply: ControlReply,
    pub work: Vec<HostWork>,
    pub exit: bool,
}

impl ControlOutcome {
    fn reply(reply: ControlReply) -> Self {
        Self {
            reply,
            work: Vec::new(),
            exit: false,
        }
    }
}

impl From<ControlReply> for ControlOutcome {
    fn from(reply: ControlReply) -> Self {
        ControlOutcome::reply(reply)
    }
}

impl CoreRuntime {
    pub fn handle_control(&mut self, user: &str, command: ControlCommand, now: Timestamp) -> ControlOutcome {
        match command {
            ControlCommand::Gimme { host, hours } => self.cmd_gimme(user, &host, hours, now).into(),
            ControlCommand::GiveBack { host } => self.cmd_giveback(user, &host).into(),
            ControlCommand::Submit { bundle } => self.cmd_submit(&bundle, now).into(),
            ControlCommand::ChangeJobStatus { seq, jobs, status } => {
                self.cmd_change_job_status(user, seq, &jobs, status).into()
            }
            ControlCommand::SetSeqInfo { seq, line } => self.cmd_set_seq_info(user, seq, &line).into(),
            ControlCommand::SetSched { seqs, change } => self.cmd_set_sched(user, &seqs, change).into(),
            ControlCommand::KillSequence { seqs } => self.cmd_kill(user, &seqs),
            ControlCommand::Hosts => self.cmd_hosts(now).into(),
            ControlCommand::Sequences => self.cmd_sequences(now).into(),
            ControlCommand::AddServer { host } => self.cmd_add_server(&host).into(),
            ControlCommand::DelServer { host } => {
                if self.hosts.remove(&host) {
                    ControlReply::text(format!("host {host} marked down")).into()
                } else {
                    ControlReply::from(ClusterqError::HostNotFound(host)).into()
                }
            }
            ControlCommand::Diag => {
                self.log_diagnostics(now);
                ControlReply::text("diagnostics written to scheduler log").into()
            }
            ControlCommand::Reset => match self.reload(now) {
                Ok(()) => {
                    info!(user, "queue reset");
                    ControlReply::text("queue reset").into()
                }
                Err(err) => {
                    error!(user, error = %err, "reset failed");
                    ControlReply::error(format!("reset failed: {err}")).into()
                }
            },
            ControlCommand::QueueOn => {
                self.paused = false;
                info!(user, "queue resumed");
                ControlReply::text("queue on").into()
            }
            ControlCommand::QueueOff => {
                self.paused = true;
                info!(user, "queue paused");
                ControlReply::text("queue off").into()
            }
            ControlCommand::Die => {
                warn!(user, "scheduler shutdown requested");
                ControlOutcome {
                    reply: ControlReply::text("scheduler exiting"),
                    work: Vec::new(),
                    exit: true,
                }
            }
            ControlCommand::Test => ControlReply::text("OK").into(),
        }
    }

    /// Owner or superuser check for sequence-mutating commands.
    fn authorize(&self, user: &str, seqnum: u32) -> Result<(), ControlReply> {
        let Some(seq) = self.sequences.get(&seqnum) else {
            return Err(ClusterqError::SequenceNotFound(seqnum).into());
        };
        if seq.is_owned_by(user) || self.settings.is_superuser(user) {
            return Ok(());
        }
        warn!(user, seq = seqnum, owner = %seq.owner, "permission denied");
        Err(ControlReply::permission_denied(seqnum))
    }

    fn authorize_all(&self, user: &str, seqs: &BTreeSet<u32>) -> Result<(), ControlReply> {
        seqs.iter().try_for_each(|&s| self.authorize(user, s))
    }

    fn cmd_gimme(&mut self, user: &str, host: &str, hours: i64, now: Timestamp) -> ControlReply {
        match self.hosts.reserve(host, user, hours, now.unix) {
            Ok((nick, reservation)) => {
                if let Err(err) = self.store.save_reservation(&nick, &reservation) {
                    error!(host = %nick, error = %err, "failed to persist reservation");
                }
                ControlReply::text(format!("host {nick} reserved for {hours} hours"))
            }
            Err(msg) => ControlReply::error(msg),
        }
    }

    fn cmd_giveback(&mut self, user: &str, host: &str) -> ControlReply {
        match self.hosts.give_back(host, user) {
            Ok(nick) => {
                if let Err(err) = self.store.remove_reservation(&nick, user) {
                    error!(host = %nick, error = %err, "failed to remove reservation file");
                }
                ControlReply::text(format!("host {nick} released"))
            }
            Err(msg) => ControlReply::error(msg),
        }
    }

    fn cmd_submit(&mut self, bundle: &Path, now: Timestamp) -> ControlReply {
        let seqnum = match self.store.allocate_number(&self.sequences) {
            Ok(n) => n,
            Err(err) => return ControlReply::error(format!("could not allocate sequence number: {err}")),
        };
        match self.store.intake_bundle(bundle, seqnum, now.unix) {
            Ok(seq) => {
                self.sequences.insert(seqnum, seq);
                ControlReply::text(format!("sequence {seqnum} queued"))
            }
            Err(err) => ControlReply::error(format!("could not submit {}: {err}", bundle.display())),
        }
    }

    fn cmd_change_job_status(
        &mut self,
        user: &str,
        seqnum: u32,
        jobs: &BTreeSet<u32>,
        status: JobStatus,
    ) -> ControlReply {
        if let Err(denied) = self.authorize(user, seqnum) {
            return denied;
        }
        let known = |jnum: u32| {
            self.sequences
                .get(&seqnum)
                .is_some_and(|seq| seq.jobs.contains_key(&jnum))
        };
        if let Some(&missing) = jobs.iter().find(|&&jnum| !known(jnum)) {
            return ClusterqError::JobNotFound(JobId::new(seqnum, missing).to_string()).into();
        }
        let line = format!("status {status}");
        let mut changed = 0;
        let mut failed = false;
        for &jnum in jobs {
            let id = JobId::new(seqnum, jnum);
            if self.set_job_info(id, &line) {
                changed += 1;
            } else {
                failed = true;
            }
        }
        if failed {
            return ControlReply::error("sequence not fully updated");
        }
        info!(user, seq = seqnum, jobs = %format_number_set(jobs), status = %status, "job status changed");
        ControlReply::text(format!("sequence {seqnum}: {changed} jobs set to {status}"))
    }

    fn cmd_set_seq_info(&mut self, user: &str, seqnum: u32, line: &str) -> ControlReply {
        if let Err(denied) = self.authorize(user, seqnum) {
            return denied;
        }
        if !self.persist_seq_line(seqnum, line) {
            return ControlReply::error("sequence not fully updated");
        }
        if let Some(seq) = self.sequences.get_mut(&seqnum) {
            seq.apply_line(line);
            seq.propagate_to_jobs();
        }
        info!(user, seq = seqnum, line, "sequence info changed");
        ControlReply::text(format!("sequence {seqnum} updated"))
    }

    fn cmd_set_sched(&mut self, user: &str, seqs: &BTreeSet<u32>, change: SchedChange) -> ControlReply {
        if let Err(denied) = self.authorize_all(user, seqs) {
            return denied;
        }

        let mut failed = false;
        let mut summary = String::new();
        for &seqnum in seqs {
            let Some(seq) = self.sequences.get_mut(&seqnum) else {
                continue;
            };
            let lines = match change {
                SchedChange::Policy(policy) => {
                    seq.priority = policy;
                    policy.record_lines()
                }
                SchedChange::MaxJobs(n) => {
                    seq.priority.maxjobs = n;
                    vec![format!("maxjobs {n}")]
                }
            };
            seq.propagate_to_jobs();
            summary = seq.priority.to_string();
            for line in lines {
                failed |= !self.persist_seq_line(seqnum, &line);
            }
            info!(user, seq = seqnum, policy = %summary, "schedule changed");
        }

        if failed {
            return ControlReply::error("sequence not fully updated");
        }
        ControlReply::text(format!("sequence {}: {summary}", format_number_set(seqs)))
    }

    fn cmd_kill(&mut self, user: &str, seqs: &BTreeSet<u32>) -> ControlOutcome {
        if let Err(denied) = self.authorize_all(user, seqs) {
            return denied.into();
        }
        let mut work = Vec::new();
        for &seqnum in seqs {
            work.extend(self.set_sequence_status(seqnum, SequenceStatus::Killed));
        }
        info!(user, seqs = %format_number_set(seqs), kills = work.len(), "sequences killed");
        ControlOutcome {
            reply: ControlReply::text(format!("sequence {} killed", format_number_set(seqs))),
            work,
            exit: false,
        }
    }

    fn cmd_hosts(&self, now: Timestamp) -> ControlReply {
        let records = self
            .hosts
            .hosts()
            .iter()
            .map(|host| {
                let jobs = self.running.values().filter(|j| j.host == host.nickname);
                host.to_record(jobs, now.unix)
            })
            .collect();
        ControlReply::Records(records)
    }

    fn cmd_sequences(&self, now: Timestamp) -> ControlReply {
        let records = self
            .sequences
            .values()
            .map(|seq| {
                let c = seq.counts;
                let mut out = String::new();
                out.push_str(&format!("[name {}]", quote(&seq.name)));
                out.push_str(&field("num", [seq.seqnum.to_string()]));
                out.push_str(&field("priority", [seq.priority.priority.to_string()]));
                out.push_str(&field("owner", [&seq.owner]));
                out.push_str(&field("status", [seq.status.as_char().to_string()]));
                out.push_str(&field("idle", [(now.unix - seq.modtime).max(0).to_string()]));
                out.push_str(&field(
                    "counts",
                    [c.total, c.waiting, c.running, c.bad, c.done].map(|n| n.to_string()),
                ));
                out.push_str("[EOS]");
                out
            })
            .collect();
        ControlReply::Records(records)
    }

    fn cmd_add_server(&mut self, name: &str) -> ControlReply {
        let created = self.hosts.add(name);
        if !created {
            let on_host: Vec<JobId> = self
                .running
                .values()
                .filter(|j| self.hosts.find(name).is_some_and(|h| h.nickname == j.host))
                .map(|j| j.id())
                .collect();
            if let Some(host) = self.hosts.find_mut(name) {
                for id in on_host {
                    host.take_slot(id);
                }
            }
            return ControlReply::text(format!("host {name} marked up"));
        }
        ControlReply::text(format!("host {name} added"))
    }

    fn log_diagnostics(&self, now: Timestamp) {
        info!(
            paused = self.paused,
            sequences = self.sequences.len(),
            running = self.running.len(),
            hosts = self.hosts.len(),
            "diagnostics"
        );
        for seq in self.sequences.values() {
            let c = seq.counts;
            info!(
                seq = seq.seqnum,
                name = %seq.name,
                owner = %seq.owner,
                status = %seq.status,
                policy = %seq.priority,
                total = c.total,
                waiting = c.waiting,
                running = c.running,
                bad = c.bad,
                done = c.done,
                "diag sequence"
            );
        }
        for host in self.hosts.hosts() {
            info!(
                host = %host.nickname,
                status = %host.status,
                total_cpus = host.total_cpus,
                taken_cpus = host.taken_cpus,
                avail_cpus = host.avail_cpus,
                current_pri = host.current_pri,
                silent_secs = now.unix - host.last_response,
                reservations = host.reservations.len(),
                "diag host"
            );
        }
        for (id, job) in &self.running {
            info!(
                job = %id,
                host = %job.host,
                status = %job.status,
                report_age_secs = now.unix - job.last_report,
                "diag running"
            );
        }
    }
}
