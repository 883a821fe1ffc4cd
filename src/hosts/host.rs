// src/hosts/host.rs

use std::collections::{BTreeMap, BTreeSet};

use crate::hosts::schedule::WeeklySchedule;
use crate::model::{Job, JobId};
use crate::protocol::bracket::field;
use crate::types::HostStatus;

/// A named, countable capability offered by a host.
///
/// Global resources are shared cluster-wide (e.g. licences); local ones
/// belong to this host only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub name: String,
    pub count: i64,
    pub global: bool,
}

/// Exclusive, time-boxed claim on a host by one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub owner: String,
    pub start: i64,
    pub end: i64,
    pub reason: String,
}

impl Reservation {
    pub fn is_active(&self, now: i64) -> bool {
        self.start <= now && now < self.end
    }
}

#[derive(Debug, Clone)]
pub struct Host {
    pub nickname: String,
    pub hostname: String,
    /// `host:port` used for pings and dispatch.
    pub address: String,
    pub status: HostStatus,
    pub rank: i32,
    pub total_cpus: u32,
    /// CPU count the host last reported; caps the scheduled count.
    pub reported_cpus: Option<u32>,
    pub taken_cpus: u32,
    pub avail_cpus: u32,
    pub load_average: f64,
    pub current_pri: u8,
    pub schedule: WeeklySchedule,
    pub resources: BTreeMap<String, Resource>,
    pub reservations: Vec<Reservation>,
    pub last_response: i64,
    /// Last time a dead host was probed.
    pub last_probe: i64,
    pub ping_outstanding: bool,
    pub running: BTreeSet<JobId>,
    pub tiebreak: u32,
}

impl Host {
    pub fn new(nickname: impl Into<String>, hostname: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            hostname: hostname.into(),
            address: address.into(),
            status: HostStatus::Unknown,
            rank: 0,
            total_cpus: 0,
            reported_cpus: None,
            taken_cpus: 0,
            avail_cpus: 0,
            load_average: 0.0,
            current_pri: 1,
            schedule: WeeklySchedule::uniform(1, 0),
            resources: BTreeMap::new(),
            reservations: Vec::new(),
            last_response: 0,
            last_probe: 0,
            ping_outstanding: false,
            running: BTreeSet::new(),
            tiebreak: 0,
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        self.nickname == name || self.hostname == name
    }

    /// `avail = min(total - ceil(load), total - taken)`, floored at zero.
    pub fn update_availability(&mut self) {
        let total = i64::from(self.total_cpus);
        let apparent = total - self.load_average.max(0.0).ceil() as i64;
        let by_policy = total - i64::from(self.taken_cpus);
        self.avail_cpus = apparent.min(by_policy).max(0) as u32;
    }

    /// Refresh the threshold and CPU ceiling from the weekly table.
    pub fn apply_schedule(&mut self, weekday: u32, hour: u32) {
        let (pri, cpus) = self.schedule.slot(weekday, hour);
        self.current_pri = pri;
        self.total_cpus = match self.reported_cpus {
            Some(reported) => cpus.min(reported),
            None => cpus,
        };
        self.update_availability();
    }

    pub fn active_reservations(&self, now: i64) -> impl Iterator<Item = &Reservation> {
        self.reservations.iter().filter(move |r| r.is_active(now))
    }

    pub fn prune_reservations(&mut self, now: i64) -> Vec<Reservation> {
        let (expired, kept): (Vec<_>, Vec<_>) =
            self.reservations.drain(..).partition(|r| r.end <= now);
        self.reservations = kept;
        expired
    }

    /// Whether a sequence at `priority` owned by `owner` may place a job
    /// here right now. Active reservations restrict the host to their
    /// owners.
    pub fn admits(&self, priority: u8, owner: &str, now: i64) -> bool {
        let mut reserved = self.active_reservations(now).peekable();
        if reserved.peek().is_some() {
            return priority > 0 && reserved.any(|r| r.owner == owner);
        }
        priority >= self.current_pri
    }

    pub fn take_slot(&mut self, job: JobId) {
        if self.running.insert(job) {
            self.taken_cpus += 1;
        }
        self.update_availability();
    }

    pub fn release_slot(&mut self, job: JobId) {
        if self.running.remove(&job) {
            self.taken_cpus = self.taken_cpus.saturating_sub(1);
        }
        self.update_availability();
    }

    /// Bracket record describing this host, as served by `HOSTS`.
    pub fn to_record<'a>(&self, jobs: impl IntoIterator<Item = &'a Job>, now: i64) -> String {
        let mut out = String::new();
        out.push_str(&field("hostname", [&self.hostname]));
        out.push_str(&field("nickname", [&self.nickname]));
        out.push_str(&field("currentpri", [self.current_pri.to_string()]));
        out.push_str(&field("load", [format!("{:.2}", self.load_average)]));
        out.push_str(&field("total_cpus", [self.total_cpus.to_string()]));
        out.push_str(&field("taken_cpus", [self.taken_cpus.to_string()]));
        out.push_str(&field("avail_cpus", [self.avail_cpus.to_string()]));
        out.push_str(&field("status", [self.status.as_str()]));
        for r in &self.reservations {
            out.push_str(&field(
                "reservation",
                [r.owner.clone(), r.start.to_string(), r.end.to_string(), r.reason.clone()],
            ));
        }
        for r in self.resources.values() {
            out.push_str(&format!(
                "[resource '{}' '{}' {}]",
                r.name,
                u8::from(r.global),
                r.count
            ));
        }
        for job in jobs {
            out.push_str(&format!(
                "[job {} {} 1 {} {} \"{}\"]",
                job.snum,
                job.jnum,
                job.percent_done,
                now - job.started,
                job.name
            ));
        }
        out
    }
}
