// src/config/validate.rs

use std::collections::BTreeMap;

use crate::config::model::{
    ConfigFile, HostConfig, RawConfigFile, RawHost, RawSchedulerSection, SchedulerConfig,
};
use crate::errors::{ClusterqError, Result};
use crate::hosts::{AvailWindow, Resource};
use crate::model::JobType;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = ClusterqError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_scheduler(&raw.scheduler)?;
        let jobtypes = validate_jobtypes(&raw)?;
        let hosts = validate_hosts(&raw)?;
        let scheduler = SchedulerConfig::from_raw(raw.scheduler);
        Ok(ConfigFile::new_unchecked(scheduler, jobtypes, hosts))
    }
}

/// Re-run validation on an already loaded raw config.
pub fn validate_config(raw: &RawConfigFile) -> Result<()> {
    ConfigFile::try_from(raw.clone()).map(|_| ())
}

fn validate_scheduler(cfg: &RawSchedulerSection) -> Result<()> {
    if cfg.queue_delay_secs == 0 {
        return Err(ClusterqError::ConfigError(
            "[scheduler].queue_delay_secs must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.dispatch_workers == 0 {
        return Err(ClusterqError::ConfigError(
            "[scheduler].dispatch_workers must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.queue_dir.as_os_str().is_empty() {
        return Err(ClusterqError::ConfigError(
            "[scheduler].queue_dir must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_jobtypes(cfg: &RawConfigFile) -> Result<BTreeMap<String, JobType>> {
    let mut out = BTreeMap::new();
    for (name, raw) in &cfg.jobtype {
        if let Some(bad) = raw.requires.keys().find(|k| k.trim().is_empty()) {
            return Err(ClusterqError::ConfigError(format!(
                "jobtype '{name}' has a requirement with an empty name ({bad:?})"
            )));
        }
        out.insert(
            name.clone(),
            JobType {
                name: name.clone(),
                requires: raw.requires.clone(),
            },
        );
    }
    Ok(out)
}

fn validate_hosts(cfg: &RawConfigFile) -> Result<Vec<HostConfig>> {
    let mut hosts = Vec::with_capacity(cfg.host.len());
    for (nick, raw) in &cfg.host {
        hosts.push(validate_host(nick, raw, cfg.scheduler.host_port)?);
    }
    Ok(hosts)
}

fn validate_host(nick: &str, raw: &RawHost, default_port: u16) -> Result<HostConfig> {
    if raw.hostname.trim().is_empty() {
        return Err(ClusterqError::ConfigError(format!(
            "host '{nick}' has an empty hostname"
        )));
    }

    let avail = raw
        .avail
        .iter()
        .map(|line| AvailWindow::parse(line))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ClusterqError::ConfigError(format!("host '{nick}': {e}")))?;

    let mut resources = Vec::with_capacity(raw.resources.len());
    for r in &raw.resources {
        if r.name.trim().is_empty() {
            return Err(ClusterqError::ConfigError(format!(
                "host '{nick}' has a resource with an empty name"
            )));
        }
        resources.push(Resource {
            name: r.name.clone(),
            count: r.count,
            global: r.global,
        });
    }

    let address = raw
        .address
        .clone()
        .unwrap_or_else(|| format!("{}:{default_port}", raw.hostname));

    Ok(HostConfig {
        nickname: nick.to_string(),
        hostname: raw.hostname.clone(),
        address,
        rank: raw.rank,
        cpus: raw.cpus,
        avail,
        resources,
    })
}
