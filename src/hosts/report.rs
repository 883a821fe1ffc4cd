// src/hosts/report.rs

//! Status reports sent by hosts (`hostupdate` events and ping replies).

use crate::hosts::host::Resource;
use crate::model::JobId;
use crate::protocol::bracket::parse_record;

/// Parsed host status report.
///
/// Only the fields a report may legitimately change are kept; `taken_cpus`
/// and `avail_cpus` are the scheduler's own bookkeeping and are ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostReport {
    pub hostname: String,
    pub nickname: Option<String>,
    pub current_pri: Option<u8>,
    pub load: Option<f64>,
    pub total_cpus: Option<u32>,
    pub status: Option<String>,
    pub resources: Vec<Resource>,
    pub jobs: Vec<JobId>,
}

impl HostReport {
    /// Parse a bracket record. The first group must be `[hostname ...]`.
    pub fn parse(record: &str) -> Result<Self, String> {
        let groups = parse_record(record);
        let mut iter = groups.into_iter();

        let first = iter.next().ok_or_else(|| "empty host report".to_string())?;
        if first.first().map(String::as_str) != Some("hostname") || first.len() < 2 {
            return Err("malformed host report: first field must be hostname".to_string());
        }

        let mut report = HostReport {
            hostname: first[1].clone(),
            ..HostReport::default()
        };

        for group in iter {
            let key = group[0].as_str();
            let arg = |i: usize| group.get(i).map(String::as_str);
            match key {
                "nickname" => report.nickname = arg(1).map(str::to_string),
                "currentpri" => report.current_pri = arg(1).and_then(|s| s.parse().ok()),
                "load" => report.load = arg(1).and_then(|s| s.parse().ok()),
                "total_cpus" => report.total_cpus = arg(1).and_then(|s| s.parse().ok()),
                "status" => report.status = arg(1).map(str::to_string),
                "resource" => {
                    if let (Some(name), Some(global), Some(count)) = (arg(1), arg(2), arg(3)) {
                        report.resources.push(Resource {
                            name: name.to_string(),
                            global: global.parse::<i64>().unwrap_or(0) != 0,
                            count: count.parse().unwrap_or(0),
                        });
                    }
                }
                "job" => {
                    let seq = arg(1).and_then(|s| s.parse().ok());
                    let job = arg(2).and_then(|s| s.parse().ok());
                    if let (Some(seq), Some(job)) = (seq, job) {
                        report.jobs.push(JobId::new(seq, job));
                    }
                }
                _ => {}
            }
        }

        Ok(report)
    }
}
