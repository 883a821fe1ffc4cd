// src/engine/event_handlers.rs

//! Event handling logic for the core runtime: host exchange outcomes and
//! asynchronous queue events.

use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::control::ControlReply;
use crate::engine::core::CoreRuntime;
use crate::engine::Timestamp;
use crate::exec::HostWork;
use crate::hosts::PingOutcome;
use crate::model::JobId;
use crate::protocol::DispatchOutcome;
use crate::store::QueueEvent;
use crate::types::{JobStatus, SequenceStatus};

/// Command produced by the core, to be executed by the outer IO shell.
#[derive(Debug)]
pub enum CoreCommand {
    /// Hand these exchanges to the dispatch backend.
    SubmitWork(Vec<HostWork>),
    /// Answer a control-channel client.
    Reply {
        reply_tx: oneshot::Sender<ControlReply>,
        reply: ControlReply,
    },
    /// Stop the scheduler (`DIE`).
    RequestExit,
}

/// Decision returned by the core after handling a single `RuntimeEvent`.
#[derive(Debug)]
pub struct CoreStep {
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    pub fn idle() -> Self {
        Self {
            commands: Vec::new(),
            keep_running: true,
        }
    }

    pub fn with_work(work: Vec<HostWork>) -> Self {
        let mut step = Self::idle();
        if !work.is_empty() {
            step.commands.push(CoreCommand::SubmitWork(work));
        }
        step
    }

    /// All host work carried by this step, in order.
    pub fn work(&self) -> Vec<&HostWork> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                CoreCommand::SubmitWork(work) => Some(work.iter()),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

impl CoreRuntime {
    pub(crate) fn handle_dispatch_finished(
        &mut self,
        id: JobId,
        host: &str,
        outcome: DispatchOutcome,
        now: Timestamp,
    ) {
        let Some(entry) = self.running.get_mut(&id) else {
            debug!(seq = id.seq, job = id.job, host, "dispatch finished for job no longer running");
            return;
        };
        if entry.host != host {
            debug!(seq = id.seq, job = id.job, host, "dispatch finished for a superseded placement");
            return;
        }

        match outcome {
            DispatchOutcome::Accepted { pid } => {
                entry.last_report = now.unix;
                info!(seq = id.seq, job = id.job, host, "job shipped");
                if let Some(pid) = pid {
                    entry.pid = pid;
                    if let Some(job) = self.job_mut(id) {
                        job.pid = pid;
                    }
                    self.persist_job_line(id, &format!("pid {pid}"));
                }
            }
            other => {
                if entry.status == JobStatus::Shipped {
                    self.requeue(id, &format!("dispatch failed: {other:?}"));
                } else {
                    debug!(seq = id.seq, job = id.job, "dispatch failure after job reported running; ignoring");
                }
            }
        }
    }

    pub(crate) fn handle_ping_finished(&mut self, host: &str, outcome: &PingOutcome, now: Timestamp) {
        let confirmed = self.hosts.ping_finished(host, outcome, now.unix);
        for id in confirmed {
            self.mark_reported(id, now);
        }
    }

    /// Apply one asynchronous queue event. Returns any host work it causes.
    pub(crate) fn apply_queue_event(&mut self, event: QueueEvent, now: Timestamp) -> Vec<HostWork> {
        let mut work = Vec::new();
        match event {
            QueueEvent::SetJobInfo { seq, job, line } => {
                let _ = self.set_job_info(JobId::new(seq, job), &line);
            }
            QueueEvent::JobRunning {
                host,
                seq,
                job,
                pid,
                childpid,
                started,
            } => self.job_running(&host, JobId::new(seq, job), pid, childpid, started, now),
            QueueEvent::JobDone { seq, job, finished } => {
                self.job_done(JobId::new(seq, job), finished, now)
            }
            QueueEvent::SetSeqInfo { seq, line } => {
                let Some(sequence) = self.sequences.get_mut(&seq) else {
                    error!(seq, line = %line, "setseqinfo for unknown sequence; dropping");
                    return work;
                };
                sequence.apply_line(&line);
                sequence.propagate_to_jobs();
                self.persist_seq_line(seq, &line);
            }
            QueueEvent::KillSequence { seq, status } => {
                let status = status
                    .chars()
                    .next()
                    .and_then(SequenceStatus::from_char)
                    .unwrap_or(SequenceStatus::Killed);
                work.extend(self.set_sequence_status(seq, status));
            }
            QueueEvent::HostUpdate { record } => match self.hosts.apply_report(&record, now.unix) {
                Ok(jobs) => {
                    for id in jobs {
                        self.mark_reported(id, now);
                    }
                }
                Err(err) => warn!(error = %err, "ignoring host update"),
            },
            QueueEvent::Retry {
                seq,
                job,
                generations,
            } => self.retry(JobId::new(seq, job), generations),
            QueueEvent::SaveLine { text } => info!(text = %text, "saveline"),
            QueueEvent::Email { recipient } => {
                info!(recipient = %recipient, "email requested; no mail relay configured")
            }
            QueueEvent::AdminEmail => info!("admin email requested; no mail relay configured"),
            QueueEvent::Unknown { line } => warn!(line = %line, "unknown queue event"),
        }
        work
    }

    /// Change a sequence's status; killing it also asks every host running
    /// one of its jobs to stop them.
    pub(crate) fn set_sequence_status(&mut self, seqnum: u32, status: SequenceStatus) -> Vec<HostWork> {
        let Some(seq) = self.sequences.get_mut(&seqnum) else {
            error!(seq = seqnum, "status change for unknown sequence; dropping");
            return Vec::new();
        };
        seq.status = status;
        self.persist_seq_line(seqnum, &format!("status {}", status.as_char()));
        info!(seq = seqnum, status = %status, "sequence status changed");

        if status == SequenceStatus::Killed {
            self.kill_requests(seqnum)
        } else {
            Vec::new()
        }
    }
}
