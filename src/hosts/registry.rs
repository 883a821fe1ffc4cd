// src/hosts/registry.rs

use rand::Rng;
use tracing::{info, warn};

use crate::hosts::host::{Host, Reservation};
use crate::hosts::report::HostReport;
use crate::hosts::schedule::WeeklySchedule;
use crate::model::JobId;
use crate::types::HostStatus;

/// Seconds without a response before a host is declared dead.
pub const DEAD_AFTER_SECS: i64 = 180;
/// A host that answered this recently is not pinged again.
pub const PING_QUIET_SECS: i64 = 20;
/// Dead hosts are re-probed at most this often.
pub const DEAD_PROBE_SECS: i64 = 120;

/// Result of a ping exchange, as seen by the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum PingOutcome {
    /// Host acknowledged, optionally with a status report attached.
    Ack { report: Option<String> },
    /// Host answered with something other than `ACK`.
    BadAck(String),
    /// Connect or read failed.
    Unreachable(String),
}

/// All known worker hosts.
#[derive(Debug, Clone, Default)]
pub struct HostRegistry {
    hosts: Vec<Host>,
    default_port: u16,
}

impl HostRegistry {
    pub fn new(default_port: u16) -> Self {
        Self {
            hosts: Vec::new(),
            default_port,
        }
    }

    pub fn insert(&mut self, host: Host) {
        if let Some(existing) = self.find_mut(&host.nickname) {
            *existing = host;
        } else {
            self.hosts.push(host);
        }
    }

    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    pub fn hosts_mut(&mut self) -> impl Iterator<Item = &mut Host> {
        self.hosts.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Look a host up by nickname or hostname.
    pub fn find(&self, name: &str) -> Option<&Host> {
        self.hosts.iter().find(|h| h.matches(name))
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Host> {
        self.hosts.iter_mut().find(|h| h.matches(name))
    }

    /// `ADDSERVER`: bring a known host back up, or register a new one
    /// under `name` on the default port.
    ///
    /// Returns `true` if the host was newly created.
    pub fn add(&mut self, name: &str) -> bool {
        if let Some(host) = self.find_mut(name) {
            host.status = HostStatus::Up;
            host.last_response = 0;
            info!(host = %host.nickname, hostname = %host.hostname, "marked host up");
            return false;
        }
        let address = format!("{name}:{}", self.default_port);
        let mut host = Host::new(name, name, address);
        host.schedule = WeeklySchedule::uniform(1, 1);
        info!(host = %name, "added host");
        self.hosts.push(host);
        true
    }

    /// `DELSERVER`: take a host out of rotation. The host record is kept.
    pub fn remove(&mut self, name: &str) -> bool {
        match self.hosts.iter_mut().find(|h| h.nickname == name) {
            Some(host) => {
                host.status = HostStatus::Down;
                info!(host = %host.nickname, hostname = %host.hostname, "marked host down");
                true
            }
            None => false,
        }
    }

    pub fn refresh_schedules(&mut self, weekday: u32, hour: u32, now: i64) {
        for host in &mut self.hosts {
            host.apply_schedule(weekday, hour);
            for expired in host.prune_reservations(now) {
                info!(host = %host.nickname, owner = %expired.owner, "reservation expired");
            }
        }
    }

    /// Mark silent hosts dead and hand back the jobs they were running.
    ///
    /// A host is only transitioned once, so each job is returned at most
    /// once per death.
    pub fn detect_dead(&mut self, now: i64) -> Vec<JobId> {
        let mut orphaned = Vec::new();
        for host in &mut self.hosts {
            if host.status == HostStatus::Dead || host.last_response == 0 {
                continue;
            }
            if now - host.last_response <= DEAD_AFTER_SECS {
                continue;
            }
            warn!(
                host = %host.nickname,
                silent_secs = now - host.last_response,
                running = host.running.len(),
                "host stopped responding; marking dead"
            );
            host.status = HostStatus::Dead;
            host.last_probe = now;
            let jobs: Vec<JobId> = std::mem::take(&mut host.running).into_iter().collect();
            host.taken_cpus = 0;
            host.update_availability();
            orphaned.extend(jobs);
        }
        orphaned
    }

    /// Select hosts that should be pinged now and mark their ping as
    /// outstanding. At most one ping per host is ever in flight.
    pub fn claim_pings(&mut self, now: i64) -> Vec<String> {
        let mut due = Vec::new();
        for host in &mut self.hosts {
            if host.ping_outstanding {
                continue;
            }
            if host.status == HostStatus::Dead {
                if now - host.last_probe < DEAD_PROBE_SECS {
                    continue;
                }
                host.last_probe = now;
            } else if host.last_response != 0 && now - host.last_response < PING_QUIET_SECS {
                continue;
            }
            host.ping_outstanding = true;
            due.push(host.nickname.clone());
        }
        due
    }

    /// Record the outcome of a ping. Returns the job ids confirmed by an
    /// attached report.
    pub fn ping_finished(&mut self, name: &str, outcome: &PingOutcome, now: i64) -> Vec<JobId> {
        let Some(host) = self.find_mut(name) else {
            warn!(host = %name, "ping finished for unknown host");
            return Vec::new();
        };
        host.ping_outstanding = false;

        match outcome {
            PingOutcome::Ack { report } => {
                host.last_response = now;
                if matches!(host.status, HostStatus::Dead | HostStatus::Unknown) {
                    info!(host = %host.nickname, "host responded; marking up");
                    host.status = HostStatus::Up;
                }
                if let Some(record) = report {
                    return match self.apply_report(record, now) {
                        Ok(jobs) => jobs,
                        Err(err) => {
                            warn!(host = %name, error = %err, "ignoring malformed report in ping reply");
                            Vec::new()
                        }
                    };
                }
                Vec::new()
            }
            PingOutcome::BadAck(reply) => {
                warn!(host = %host.nickname, reply = %reply, "bad acknowledgment for phonehome");
                Vec::new()
            }
            PingOutcome::Unreachable(_) => Vec::new(),
        }
    }

    /// Apply a host status report. Returns the running jobs it lists.
    pub fn apply_report(&mut self, record: &str, now: i64) -> Result<Vec<JobId>, String> {
        let report = HostReport::parse(record)?;
        let host = self
            .hosts
            .iter_mut()
            .find(|h| h.hostname == report.hostname)
            .ok_or_else(|| format!("invalid host update from {}", report.hostname))?;

        host.resources.clear();
        for r in &report.resources {
            host.resources.insert(r.name.clone(), r.clone());
        }
        if let Some(pri) = report.current_pri {
            host.current_pri = pri;
        }
        if let Some(load) = report.load {
            host.load_average = load;
        }
        if let Some(cpus) = report.total_cpus {
            host.reported_cpus = Some(cpus);
            host.total_cpus = host.total_cpus.min(cpus);
        }
        host.last_response = now;
        match report.status.as_deref() {
            Some("up") if matches!(host.status, HostStatus::Dead | HostStatus::Unknown) => {
                info!(host = %host.nickname, "host reported up");
                host.status = HostStatus::Up;
            }
            Some("dead") => host.status = HostStatus::Dead,
            _ => {}
        }
        host.update_availability();

        Ok(report.jobs)
    }

    /// Assign fresh random tiebreak values. Called once per pass.
    pub fn reshuffle<R: Rng>(&mut self, rng: &mut R) {
        for host in &mut self.hosts {
            host.tiebreak = rng.random();
        }
    }

    /// Host indices in candidate order: rank, then fewest taken CPUs, then
    /// the random tiebreak.
    pub fn candidate_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.hosts.len()).collect();
        order.sort_by_key(|&i| {
            let h = &self.hosts[i];
            (h.rank, h.taken_cpus, h.tiebreak)
        });
        order
    }

    pub fn host_at(&self, index: usize) -> &Host {
        &self.hosts[index]
    }

    pub fn host_at_mut(&mut self, index: usize) -> &mut Host {
        &mut self.hosts[index]
    }

    /// `GIMME`: reserve a host for `hours`.
    pub fn reserve(
        &mut self,
        name: &str,
        user: &str,
        hours: i64,
        now: i64,
    ) -> Result<(String, Reservation), String> {
        let host = self
            .find_mut(name)
            .ok_or_else(|| format!("host {name} not found"))?;
        if host.reservations.len() >= host.total_cpus.max(1) as usize {
            return Err(format!("host {} already totally reserved", host.nickname));
        }
        let reservation = Reservation {
            owner: user.to_string(),
            start: now,
            end: now + hours * 3600,
            reason: String::new(),
        };
        host.reservations.push(reservation.clone());
        info!(host = %host.nickname, owner = %user, hours, "host reserved");
        Ok((host.nickname.clone(), reservation))
    }

    /// `GIVEBACK`: drop the caller's reservation on a host.
    pub fn give_back(&mut self, name: &str, user: &str) -> Result<String, String> {
        let host = self
            .find_mut(name)
            .ok_or_else(|| format!("host {name} not found"))?;
        let Some(idx) = host.reservations.iter().rposition(|r| r.owner == user) else {
            return Err(format!(
                "host {} not currently reserved in your name",
                host.nickname
            ));
        };
        host.reservations.remove(idx);
        info!(host = %host.nickname, owner = %user, "reservation released");
        Ok(host.nickname.clone())
    }
}
