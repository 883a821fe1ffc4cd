// src/engine/cycle.rs

use tracing::{debug, error, info, warn};

use crate::engine::core::CoreRuntime;
use crate::engine::event_handlers::CoreStep;
use crate::engine::{Timestamp, PING_REPORT_AGE_SECS};
use crate::exec::HostWork;
use crate::model::JobId;
use crate::protocol::dispatch::ping_message;
use crate::types::SequenceStatus;

/// Why a sequence is leaving the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Removal {
    Finished,
    Killed,
    Private,
}

impl CoreRuntime {
    /// One scheduling cycle:
    ///
    /// 1. apply event files from the drop directory
    /// 2. ingest submitted sequences
    /// 3. refresh host schedules and detect dead hosts
    /// 4. clean up finished, killed and removed sequences
    /// 5. ping hosts that are due
    /// 6. unless paused, run the admission pass
    pub fn run_cycle(&mut self, now: Timestamp) -> CoreStep {
        let mut work = Vec::new();

        for event in self.store.drain_events() {
            debug!(?event, "applying queue event");
            work.extend(self.apply_queue_event(event, now));
        }

        self.ingest_submissions(now);
        self.refresh_hosts(now);
        self.cleanup(now);
        work.extend(self.due_pings(now));

        if self.paused {
            debug!("queue paused; skipping admission");
        } else {
            work.extend(self.admission_pass(now));
        }

        CoreStep::with_work(work)
    }

    fn ingest_submissions(&mut self, now: Timestamp) {
        match self.store.intake_drop_dir(&self.sequences, now.unix) {
            Ok(admitted) => {
                for seq in admitted {
                    self.sequences.insert(seq.seqnum, seq);
                }
            }
            Err(err) => error!(error = %err, "submission intake failed"),
        }
    }

    fn refresh_hosts(&mut self, now: Timestamp) {
        self.hosts.refresh_schedules(now.weekday, now.hour, now.unix);
        for id in self.hosts.detect_dead(now.unix) {
            self.requeue(id, "host is dead");
        }
    }

    fn removal_reason(&self, seqnum: u32) -> Option<Removal> {
        let seq = self.sequences.get(&seqnum)?;
        let has_running = self.running.keys().any(|id| id.seq == seqnum);
        if has_running {
            return None;
        }
        match seq.status {
            SequenceStatus::Private | SequenceStatus::Moving => Some(Removal::Private),
            SequenceStatus::Killed => Some(Removal::Killed),
            _ if seq.counts.total > 0 && seq.counts.done == seq.counts.total => {
                Some(Removal::Finished)
            }
            _ => None,
        }
    }

    /// Remove sequences with nothing running that are done, killed or
    /// marked private, then purge defunct directories and requeue jobs
    /// that have gone missing.
    pub(crate) fn cleanup(&mut self, now: Timestamp) {
        for seq in self.sequences.values_mut() {
            seq.update_counts();
        }

        let seqnums: Vec<u32> = self.sequences.keys().copied().collect();
        for seqnum in seqnums {
            let Some(reason) = self.removal_reason(seqnum) else {
                continue;
            };
            if reason == Removal::Finished {
                self.persist_seq_line(seqnum, "status X");
            }
            if let Err(err) = self.store.mark_defunct(seqnum) {
                error!(seq = seqnum, error = %err, "failed to retire sequence directory");
                continue;
            }
            self.drop_running_for_sequence(seqnum);
            if let Some(seq) = self.sequences.remove(&seqnum) {
                info!(
                    seq = seqnum,
                    name = %seq.name,
                    owner = %seq.owner,
                    reason = ?reason,
                    "sequence removed from queue"
                );
            }
        }

        match self.store.purge_defunct() {
            Ok(0) => {}
            Ok(n) => debug!(purged = n, "purged defunct sequence directories"),
            Err(err) => warn!(error = %err, "failed to purge defunct sequence directories"),
        }

        self.sweep_missing(now);
    }

    /// Pings for hosts that are due, each listing the jobs on that host
    /// that have not been reported recently.
    fn due_pings(&mut self, now: Timestamp) -> Vec<HostWork> {
        let due = self.hosts.claim_pings(now.unix);
        due.into_iter()
            .filter_map(|nick| {
                let host = self.hosts.find(&nick)?;
                let stale: Vec<(JobId, i64)> = self
                    .running
                    .values()
                    .filter(|job| job.host == host.nickname)
                    .filter(|job| now.unix - job.last_report > PING_REPORT_AGE_SECS)
                    .map(|job| (job.id(), job.pid))
                    .collect();
                Some(HostWork::Ping {
                    host: host.nickname.clone(),
                    address: host.address.clone(),
                    message: ping_message(&stale),
                })
            })
            .collect()
    }
}
