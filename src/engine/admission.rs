// src/engine/admission.rs

//! Admission pass: greedy, priority-ordered placement of waiting jobs.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, trace};

use crate::engine::core::CoreRuntime;
use crate::engine::Timestamp;
use crate::exec::HostWork;
use crate::hosts::HostRegistry;
use crate::model::{combined_requirements, JobId, JobType, Sequence};
use crate::types::{HostStatus, JobStatus, SequenceStatus};

/// Resource availability for one pass: per-host local pools plus the
/// cluster-wide global pools.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceSnapshot {
    local: BTreeMap<(usize, String), i64>,
    global: BTreeMap<String, i64>,
}

impl ResourceSnapshot {
    /// Every host reports the global pools it can see; the largest report
    /// wins.
    pub fn from_hosts(hosts: &HostRegistry) -> Self {
        let mut snapshot = Self::default();
        for (idx, host) in hosts.hosts().iter().enumerate() {
            for r in host.resources.values() {
                if r.global {
                    let slot = snapshot.global.entry(r.name.clone()).or_insert(r.count);
                    *slot = (*slot).max(r.count);
                } else {
                    snapshot.local.insert((idx, r.name.clone()), r.count);
                }
            }
        }
        snapshot
    }

    pub fn local(&self, host: usize, name: &str) -> i64 {
        self.local.get(&(host, name.to_string())).copied().unwrap_or(0)
    }

    pub fn global(&self, name: &str) -> i64 {
        self.global.get(name).copied().unwrap_or(0)
    }

    /// Pool that can cover `count` units of `name` on `host`: the local
    /// pool first, then the global one.
    fn covering_pool(&self, host: usize, name: &str, count: i64) -> Option<Pool> {
        if self.local(host, name) >= count {
            Some(Pool::Local)
        } else if self.global(name) >= count {
            Some(Pool::Global)
        } else {
            None
        }
    }

    fn take(&mut self, host: usize, name: &str, count: i64, pool: Pool) {
        let slot = match pool {
            Pool::Local => self.local.entry((host, name.to_string())).or_insert(0),
            Pool::Global => self.global.entry(name.to_string()).or_insert(0),
        };
        *slot -= count;
    }

    /// Debit without checking; used for jobs that are already running.
    /// A shortfall is charged to the host's own pool if it has one.
    pub fn debit(&mut self, host: usize, requires: &BTreeMap<String, u32>) {
        for (name, &count) in requires {
            let count = i64::from(count);
            let pool = self.covering_pool(host, name, count).unwrap_or_else(|| {
                if self.global.contains_key(name) && !self.local.contains_key(&(host, name.clone())) {
                    Pool::Global
                } else {
                    Pool::Local
                }
            });
            self.take(host, name, count, pool);
        }
    }

    /// Debit `requires` if every requirement can be met from this host's
    /// local pools or the global pools.
    pub fn try_take(&mut self, host: usize, requires: &BTreeMap<String, u32>) -> bool {
        let mut plan = Vec::with_capacity(requires.len());
        for (name, &count) in requires {
            if count == 0 {
                continue;
            }
            let count = i64::from(count);
            match self.covering_pool(host, name, count) {
                Some(pool) => plan.push((name.as_str(), count, pool)),
                None => return false,
            }
        }
        for (name, count, pool) in plan {
            self.take(host, name, count, pool);
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pool {
    Local,
    Global,
}

fn requirements_for(
    jobtypes: &BTreeMap<String, JobType>,
    seq: &Sequence,
    jobtype: &str,
) -> BTreeMap<String, u32> {
    combined_requirements(jobtypes.get(jobtype), &seq.requires)
}

impl CoreRuntime {
    /// Sequences that may compete this pass: Ready, not waiting on another
    /// queued sequence, and holding at least one waiting job.
    fn eligible_sequences(&self) -> BTreeSet<u32> {
        self.sequences
            .values()
            .filter(|seq| seq.status == SequenceStatus::Ready)
            .filter(|seq| !seq.waitfor.iter().any(|w| self.sequences.contains_key(w)))
            .filter(|seq| seq.jobs.values().any(|j| j.status == JobStatus::Waiting))
            .map(|seq| seq.seqnum)
            .collect()
    }

    /// Run one admission pass and return the dispatches it decided on.
    pub fn admission_pass(&mut self, now: Timestamp) -> Vec<HostWork> {
        let mut work = Vec::new();

        self.hosts.reshuffle(&mut self.rng);
        let order = self.hosts.candidate_order();

        let mut snapshot = ResourceSnapshot::from_hosts(&self.hosts);
        let mut seq_running: BTreeMap<u32, u32> = BTreeMap::new();
        let mut per_host: BTreeMap<(u32, usize), u32> = BTreeMap::new();
        for (id, job) in &self.running {
            *seq_running.entry(id.seq).or_default() += 1;
            let host_idx = self.hosts.hosts().iter().position(|h| h.nickname == job.host);
            if let Some(idx) = host_idx {
                *per_host.entry((id.seq, idx)).or_default() += 1;
                if let Some(seq) = self.sequences.get(&id.seq) {
                    snapshot.debit(idx, &requirements_for(&self.jobtypes, seq, &job.jobtype));
                }
            }
        }

        let mut eligible = self.eligible_sequences();
        loop {
            let pick = eligible
                .iter()
                .map(|&s| {
                    let running = seq_running.get(&s).copied().unwrap_or(0);
                    (s, self.sequences[&s].priority.effective_priority(running))
                })
                .filter(|(_, pri)| *pri > 0)
                .fold(None, |best: Option<(u32, u8)>, (s, pri)| match best {
                    Some((_, best_pri)) if best_pri >= pri => best,
                    _ => Some((s, pri)),
                });
            let Some((seqnum, priority)) = pick else {
                break;
            };

            match self.find_placement(seqnum, priority, &order, &mut snapshot, &per_host, now) {
                Some((jnum, host_idx)) => {
                    let id = JobId::new(seqnum, jnum);
                    if let Some(dispatch) = self.record_dispatch(id, host_idx, now) {
                        work.push(dispatch);
                    }
                    *seq_running.entry(seqnum).or_default() += 1;
                    *per_host.entry((seqnum, host_idx)).or_default() += 1;
                }
                None => {
                    trace!(seq = seqnum, "no further placement for sequence this pass");
                    eligible.remove(&seqnum);
                }
            }
        }

        if !work.is_empty() {
            debug!(dispatched = work.len(), "admission pass complete");
        }
        work
    }

    /// First waiting, unblocked job of `seqnum` and the first host that can
    /// take it. Debits the snapshot on success.
    fn find_placement(
        &self,
        seqnum: u32,
        priority: u8,
        order: &[usize],
        snapshot: &mut ResourceSnapshot,
        per_host: &BTreeMap<(u32, usize), u32>,
        now: Timestamp,
    ) -> Option<(u32, usize)> {
        let seq = self.sequences.get(&seqnum)?;
        let done = seq.done_table();
        let maxperhost = seq.priority.maxperhost;

        for job in seq.jobs.values() {
            if job.status != JobStatus::Waiting
                || job.should_refract(now.unix)
                || job.has_unsatisfied_dependencies(&done)
                || self.running.contains_key(&job.id())
            {
                continue;
            }
            let requires = requirements_for(&self.jobtypes, seq, &job.jobtype);

            for &idx in order {
                let host = self.hosts.host_at(idx);
                if host.status != HostStatus::Up || host.avail_cpus == 0 {
                    continue;
                }
                if !host.admits(priority, &seq.owner, now.unix) {
                    continue;
                }
                if maxperhost > 0 && per_host.get(&(seqnum, idx)).copied().unwrap_or(0) >= maxperhost {
                    continue;
                }
                if !job.forced_hosts.is_empty()
                    && !job.forced_hosts.iter().any(|f| host.matches(f))
                {
                    continue;
                }
                if !snapshot.try_take(idx, &requires) {
                    continue;
                }
                return Some((job.jnum, idx));
            }
        }
        None
    }
}
