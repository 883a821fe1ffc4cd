// src/engine/running.rs

//! Running-job index maintenance: placement, confirmation, completion,
//! requeue and kill.

use std::collections::BTreeSet;

use tracing::{debug, error, info, warn};

use crate::engine::core::CoreRuntime;
use crate::engine::{Timestamp, MISSING_AFTER_SECS};
use crate::exec::HostWork;
use crate::model::{Job, JobId};
use crate::protocol::dispatch::kill_message;
use crate::protocol::JobTicket;
use crate::types::JobStatus;

impl CoreRuntime {
    pub(crate) fn job_mut(&mut self, id: JobId) -> Option<&mut Job> {
        self.sequences.get_mut(&id.seq)?.jobs.get_mut(&id.job)
    }

    fn refresh_counts(&mut self, seqnum: u32) {
        if let Some(seq) = self.sequences.get_mut(&seqnum) {
            seq.update_counts();
        }
    }

    /// Remove a job from the index and free its host slot.
    fn release(&mut self, id: JobId) -> Option<Job> {
        let entry = self.running.remove(&id)?;
        if let Some(host) = self.hosts.find_mut(&entry.host) {
            host.release_slot(id);
        }
        Some(entry)
    }

    /// Record a placement decided by the admission pass and build the
    /// dispatch for it.
    pub(crate) fn record_dispatch(&mut self, id: JobId, host_index: usize, now: Timestamp) -> Option<HostWork> {
        self.job_mut(id)?;
        let (nickname, address) = {
            let host = self.hosts.host_at_mut(host_index);
            host.take_slot(id);
            (host.nickname.clone(), host.address.clone())
        };

        let job = self.job_mut(id)?;
        job.status = JobStatus::Shipped;
        job.host = nickname.clone();
        job.started = now.unix;
        job.last_report = now.unix;
        let entry = job.clone();

        self.persist_job_line(id, &format!("startedtime {}", now.unix));
        self.persist_job_line(id, &format!("host {nickname}"));
        self.persist_job_line(id, "status S");

        self.running.insert(id, entry.clone());
        self.refresh_counts(id.seq);

        info!(seq = id.seq, job = id.job, host = %nickname, name = %entry.name, "dispatching job");
        Some(HostWork::Dispatch {
            host: nickname,
            address,
            ticket: JobTicket::from_job(&entry, 1),
        })
    }

    /// Return a job to Waiting and drop it from the index.
    pub(crate) fn requeue(&mut self, id: JobId, reason: &str) {
        let released = self.release(id);
        let Some(job) = self.job_mut(id) else {
            debug!(seq = id.seq, job = id.job, "requeue for job no longer queued");
            return;
        };
        if job.status == JobStatus::Done || job.status == JobStatus::Bad {
            return;
        }
        job.status = JobStatus::Waiting;
        self.persist_job_line(id, "status W");
        self.refresh_counts(id.seq);
        let host = released.map(|j| j.host).unwrap_or_default();
        warn!(seq = id.seq, job = id.job, host = %host, reason, "job returned to waiting");
    }

    /// A host confirmed it is still running `id`.
    pub(crate) fn mark_reported(&mut self, id: JobId, now: Timestamp) {
        if !self.sequences.contains_key(&id.seq) {
            error!(seq = id.seq, job = id.job, "host reported a job for an unknown sequence; dropping");
            return;
        }
        match self.running.get_mut(&id) {
            Some(entry) => entry.last_report = now.unix,
            None => debug!(seq = id.seq, job = id.job, "host reported a job not in the running index"),
        }
    }

    /// `setjobinfo`: apply and persist one job line. Returns `false` if
    /// the job is unknown or the line could not be written.
    pub(crate) fn set_job_info(&mut self, id: JobId, line: &str) -> bool {
        let Some(job) = self.job_mut(id) else {
            error!(seq = id.seq, job = id.job, line, "setjobinfo for unknown job; dropping");
            return false;
        };
        job.apply_line(line);
        let status = job.status;
        let persisted = self.persist_job_line(id, line);

        if !status.is_running() && self.running.contains_key(&id) {
            self.release(id);
            info!(seq = id.seq, job = id.job, status = %status, "job left the running index");
        } else if let Some(entry) = self.running.get_mut(&id) {
            entry.apply_line(line);
        }
        self.refresh_counts(id.seq);
        persisted
    }

    /// `jobrunning`: a host started the job.
    pub(crate) fn job_running(
        &mut self,
        host: &str,
        id: JobId,
        pid: i64,
        childpid: i64,
        started: i64,
        now: Timestamp,
    ) {
        let nickname = match self.hosts.find(host) {
            Some(h) => h.nickname.clone(),
            None => {
                error!(seq = id.seq, job = id.job, host, "jobrunning from unknown host; dropping");
                return;
            }
        };
        let Some(job) = self.job_mut(id) else {
            error!(seq = id.seq, job = id.job, host, "jobrunning for unknown job; dropping");
            return;
        };
        job.status = JobStatus::Running;
        job.host = nickname.clone();
        job.pid = pid;
        job.childpid = childpid;
        job.server_started = started;
        job.last_report = now.unix;
        let entry = job.clone();

        self.persist_job_line(id, &format!("serverstartedtime {started}"));
        self.persist_job_line(id, &format!("pid {pid}"));
        self.persist_job_line(id, &format!("childpid {childpid}"));
        self.persist_job_line(id, &format!("host {nickname}"));
        self.persist_job_line(id, "status R");

        if let Some(previous) = self.running.get(&id) {
            if previous.host != nickname {
                self.release(id);
            }
        }
        if let Some(h) = self.hosts.find_mut(&nickname) {
            h.take_slot(id);
        }
        self.running.insert(id, entry);
        self.refresh_counts(id.seq);
        info!(seq = id.seq, job = id.job, host = %nickname, pid, "job running");
    }

    /// `jobdone`: the job finished. A job already marked Bad stays Bad.
    pub(crate) fn job_done(&mut self, id: JobId, finished: i64, now: Timestamp) {
        let finished = if finished > 0 { finished } else { now.unix };
        self.release(id);
        let Some(job) = self.job_mut(id) else {
            error!(seq = id.seq, job = id.job, "jobdone for unknown job; dropping");
            return;
        };
        job.server_finished = finished;
        job.finished = now.unix;
        let failed = job.status == JobStatus::Bad;
        if !failed {
            job.status = JobStatus::Done;
        }

        self.persist_job_line(id, &format!("serverfinishedtime {finished}"));
        self.persist_job_line(id, &format!("finishedtime {}", now.unix));
        if !failed {
            self.persist_job_line(id, "status D");
        }
        self.refresh_counts(id.seq);
        info!(seq = id.seq, job = id.job, failed, "job finished");
    }

    /// `retry`: reset a job and, for `generations` levels, the jobs it waits
    /// on. Running jobs are left alone.
    pub(crate) fn retry(&mut self, id: JobId, generations: u32) {
        let mut frontier: BTreeSet<u32> = BTreeSet::from([id.job]);
        let mut visited = BTreeSet::new();
        for level in 0..=generations {
            let mut next = BTreeSet::new();
            for jnum in frontier {
                if !visited.insert(jnum) {
                    continue;
                }
                let jid = JobId::new(id.seq, jnum);
                if self.running.contains_key(&jid) {
                    continue;
                }
                let Some(job) = self.job_mut(jid) else {
                    if level == 0 {
                        error!(seq = id.seq, job = jnum, "retry for unknown job; dropping");
                    }
                    continue;
                };
                job.status = JobStatus::Waiting;
                job.started = 0;
                next.extend(job.waitfor.iter().copied());
                self.persist_job_line(jid, "startedtime 0");
                self.persist_job_line(jid, "status W");
                info!(seq = id.seq, job = jnum, "job reset for retry");
            }
            frontier = next;
        }
        self.refresh_counts(id.seq);
    }

    /// Kill requests for every running job of a sequence.
    pub(crate) fn kill_requests(&self, seqnum: u32) -> Vec<HostWork> {
        self.running
            .values()
            .filter(|job| job.snum == seqnum)
            .filter_map(|job| {
                let host = self.hosts.find(&job.host)?;
                Some(HostWork::Kill {
                    host: host.nickname.clone(),
                    address: host.address.clone(),
                    message: kill_message(job.pid, job.childpid),
                })
            })
            .collect()
    }

    /// Drop every index entry of a removed sequence without requeueing.
    pub(crate) fn drop_running_for_sequence(&mut self, seqnum: u32) {
        let ids: Vec<JobId> = self.running.keys().filter(|id| id.seq == seqnum).copied().collect();
        for id in ids {
            self.release(id);
            debug!(seq = id.seq, job = id.job, "dropped running job of removed sequence");
        }
    }

    /// Requeue running jobs whose last report is too old.
    pub(crate) fn sweep_missing(&mut self, now: Timestamp) {
        let missing: Vec<JobId> = self
            .running
            .values()
            .filter(|job| now.unix - job.last_report > MISSING_AFTER_SECS)
            .map(Job::id)
            .collect();
        for id in missing {
            self.requeue(id, "job missing: no report received");
        }
    }
}
