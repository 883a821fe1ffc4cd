// src/model/sequence.rs

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::model::job::{split_record_line, Job};
use crate::model::numbers::{format_number_set, parse_number_set};
use crate::model::priority::{clamp_priority, PriorityPolicy};
use crate::types::{JobStatus, SequenceStatus};

/// Derived per-status job counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounts {
    pub total: u32,
    pub waiting: u32,
    pub running: u32,
    pub bad: u32,
    pub done: u32,
}

/// A named, owned group of jobs sharing one priority policy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sequence {
    pub seqnum: u32,
    pub name: String,
    pub owner: String,
    pub email: String,
    pub source: String,
    pub uid: u32,
    pub status: SequenceStatus,
    pub jobs: BTreeMap<u32, Job>,
    /// Other sequences that must leave the queue before this one runs.
    pub waitfor: BTreeSet<u32>,
    pub forced_hosts: BTreeSet<String>,
    pub requires: BTreeMap<String, u32>,
    pub priority: PriorityPolicy,
    pub queued_time: i64,
    pub modtime: i64,
    pub counts: JobCounts,
}

impl Sequence {
    /// Parse an `info.seq` file. Jobs are attached separately.
    pub fn from_info_record(text: &str) -> Self {
        let mut seq = Sequence::default();
        for line in text.lines() {
            seq.apply_line(line);
        }
        seq
    }

    /// Apply one `info.seq` line. Every key needs a value; unknown keys are
    /// ignored.
    pub fn apply_line(&mut self, line: &str) {
        let Some((key, rest)) = split_record_line(line) else {
            return;
        };
        if rest.is_empty() {
            return;
        }
        let mut words = rest.split_whitespace();
        let word = words.next().unwrap_or("");

        match key {
            "name" => self.name = rest.to_string(),
            "source" => self.source = rest.to_string(),
            "email" => self.email = word.to_string(),
            "seqnum" => set_parsed(&mut self.seqnum, word),
            "uid" => set_parsed(&mut self.uid, word),
            "require" => {
                let count = words.next().and_then(|c| c.parse().ok()).unwrap_or(0);
                self.requires.insert(word.to_string(), count);
            }
            "priority" => {
                if let Ok(p) = word.parse::<u32>() {
                    self.priority.priority = clamp_priority(p);
                }
            }
            "maxjobs" => set_parsed(&mut self.priority.maxjobs, word),
            "maxperhost" => set_parsed(&mut self.priority.maxperhost, word),
            "priority2" => {
                if let Ok(p) = word.parse::<u32>() {
                    self.priority.priority2 = clamp_priority(p);
                }
            }
            "maxjobs2" => set_parsed(&mut self.priority.maxjobs2, word),
            "forcedhost" => {
                self.forced_hosts.insert(word.to_string());
            }
            "owner" => {
                self.owner = word.to_string();
                if self.email.is_empty() {
                    self.email = self.owner.clone();
                }
            }
            "queuedtime" => set_parsed(&mut self.queued_time, word),
            "status" => {
                if let Some(status) = word.chars().next().and_then(SequenceStatus::from_char) {
                    self.status = status;
                }
            }
            "waitfor" => {
                for item in rest.split_whitespace() {
                    if let Some(set) = parse_number_set(item) {
                        self.waitfor.extend(set);
                    }
                }
            }
            _ => {}
        }
    }

    /// Serialize the sequence metadata to the `info.seq` format.
    pub fn info_record(&self) -> String {
        let mut lines = vec![
            format!("status {}", self.status),
            format!("name {}", self.name),
            format!("source {}", self.source),
            format!("owner {}", self.owner),
            format!("uid {}", self.uid),
            format!("seqnum {}", self.seqnum),
        ];
        if self.queued_time != 0 {
            lines.push(format!("queuedtime {}", self.queued_time));
        }
        for host in &self.forced_hosts {
            lines.push(format!("forcedhost {host}"));
        }
        if !self.waitfor.is_empty() {
            lines.push(format!("waitfor {}", format_number_set(&self.waitfor)));
        }
        lines.push(format!("email {}", self.email));
        lines.push(format!("maxjobs {}", self.priority.maxjobs));
        lines.push(format!("priority {}", self.priority.priority));
        lines.push(format!("maxjobs2 {}", self.priority.maxjobs2));
        lines.push(format!("priority2 {}", self.priority.priority2));
        lines.push(format!("maxperhost {}", self.priority.maxperhost));
        for (name, count) in &self.requires {
            lines.push(format!("require {name} {count}"));
        }

        let mut out = lines.join("\n");
        out.push('\n');
        out
    }

    /// Recompute [`JobCounts`] from the job map.
    pub fn update_counts(&mut self) {
        let mut counts = JobCounts::default();
        for job in self.jobs.values() {
            match job.status {
                JobStatus::Waiting => counts.waiting += 1,
                JobStatus::Shipped | JobStatus::Running => counts.running += 1,
                JobStatus::Bad => counts.bad += 1,
                JobStatus::Done => counts.done += 1,
            }
            counts.total += 1;
        }
        self.counts = counts;
    }

    /// Renumber jobs densely from `first`, rewriting every wait-set under
    /// the old-to-new mapping. When numbers change, wait entries naming no
    /// job in this sequence are dropped.
    ///
    /// Returns the number of jobs.
    pub fn renumber(&mut self, first: u32) -> usize {
        let mapping: BTreeMap<u32, u32> = self
            .jobs
            .keys()
            .enumerate()
            .map(|(index, &old)| (old, first + index as u32))
            .collect();

        if mapping.iter().all(|(old, new)| old == new) {
            return self.jobs.len();
        }

        let old_jobs = std::mem::take(&mut self.jobs);
        for (old, mut job) in old_jobs {
            let new = mapping[&old];
            job.jnum = new;
            job.waitfor = job
                .waitfor
                .iter()
                .filter_map(|w| mapping.get(w).copied())
                .collect();
            self.jobs.insert(new, job);
        }

        self.jobs.len()
    }

    /// Table indexed by job number: `true` when that job is Done.
    pub fn done_table(&self) -> Vec<bool> {
        let len = self.jobs.keys().next_back().map_or(0, |&max| max as usize + 1);
        let mut table = vec![false; len];
        for (&jnum, job) in &self.jobs {
            table[jnum as usize] = job.status == JobStatus::Done;
        }
        table
    }

    /// Copy the sequence-level fields every job carries.
    pub fn propagate_to_jobs(&mut self) {
        for job in self.jobs.values_mut() {
            job.snum = self.seqnum;
            job.email = self.email.clone();
            job.seqname = self.name.clone();
            job.uid = self.uid;
            job.owner = self.owner.clone();
            job.priority = self.priority.priority;
            job.forced_hosts = self.forced_hosts.clone();
        }
    }

    /// Find a job that participates in a dependency cycle, if any.
    pub fn dependency_cycle(&self) -> Option<u32> {
        let mut graph: DiGraphMap<u32, ()> = DiGraphMap::new();
        for &jnum in self.jobs.keys() {
            graph.add_node(jnum);
        }
        for (&jnum, job) in &self.jobs {
            for &dep in &job.waitfor {
                if self.jobs.contains_key(&dep) {
                    graph.add_edge(dep, jnum, ());
                }
            }
        }
        toposort(&graph, None).err().map(|cycle| cycle.node_id())
    }

    pub fn is_owned_by(&self, user: &str) -> bool {
        self.owner == user
    }
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, word: &str) {
    if let Ok(v) = word.parse() {
        *slot = v;
    }
}
