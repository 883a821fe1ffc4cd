// src/model/job.rs

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::model::numbers::{format_number_set, parse_number_set};
use crate::types::JobStatus;

/// Seconds a started-but-unfinished job is left alone before it may be
/// shipped again.
pub const RESEND_WAIT_SECS: i64 = 120;

/// Key of the running-job index: (sequence number, job number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId {
    pub seq: u32,
    pub job: u32,
}

impl JobId {
    pub fn new(seq: u32, job: u32) -> Self {
        Self { seq, job }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08}-{:05}", self.seq, self.job)
    }
}

/// One schedulable unit of work.
///
/// Fields in the first group are persisted in the `.job` file; the rest are
/// inherited from the owning sequence when it is loaded, or maintained by
/// the scheduler at runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub snum: u32,
    pub jnum: u32,
    pub name: String,
    pub jobtype: String,
    pub dirname: String,
    pub logdir: String,
    pub arguments: BTreeMap<String, String>,
    pub status: JobStatus,
    pub waitfor: BTreeSet<u32>,
    pub host: String,
    pub started: i64,
    pub finished: i64,
    pub server_started: i64,
    pub server_finished: i64,
    pub pid: i64,
    pub childpid: i64,
    pub percent_done: i32,
    pub magnitude: i64,

    pub priority: u8,
    pub owner: String,
    pub email: String,
    pub seqname: String,
    pub uid: u32,
    pub forced_hosts: BTreeSet<String>,
    pub last_report: i64,
}

impl Default for Job {
    fn default() -> Self {
        Self {
            snum: 0,
            jnum: 0,
            name: String::new(),
            jobtype: String::new(),
            dirname: String::new(),
            logdir: String::new(),
            arguments: BTreeMap::new(),
            status: JobStatus::Waiting,
            waitfor: BTreeSet::new(),
            host: String::new(),
            started: 0,
            finished: 0,
            server_started: 0,
            server_finished: 0,
            pid: 0,
            childpid: 0,
            percent_done: -1,
            magnitude: 0,
            priority: 0,
            owner: String::new(),
            email: String::new(),
            seqname: String::new(),
            uid: 0,
            forced_hosts: BTreeSet::new(),
            last_report: 0,
        }
    }
}

/// Split a record line into its key and the remainder.
///
/// Returns `None` for blank lines and comments (`#`, `%`, `;`).
pub(crate) fn split_record_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(['#', '%', ';']) {
        return None;
    }
    match line.split_once(char::is_whitespace) {
        Some((key, rest)) => Some((key, rest.trim())),
        None => Some((line, "")),
    }
}

fn first_word(rest: &str) -> &str {
    rest.split_whitespace().next().unwrap_or("")
}

impl Job {
    pub fn id(&self) -> JobId {
        JobId::new(self.snum, self.jnum)
    }

    /// Parse a complete `.job` file. Lines are applied in order, so later
    /// appended lines override earlier ones.
    pub fn from_record(text: &str) -> Self {
        let mut job = Job::default();
        for line in text.lines() {
            job.apply_line(line);
        }
        job
    }

    /// Apply one `key value` line. Unknown keys and unparsable values are
    /// skipped.
    pub fn apply_line(&mut self, line: &str) {
        let Some((key, rest)) = split_record_line(line) else {
            return;
        };
        if rest.is_empty() {
            return;
        }
        let word = first_word(rest);

        match key {
            "name" => self.name = rest.to_string(),
            "jnum" => set_parsed(&mut self.jnum, word),
            "argument" => {
                let (arg, value) = match rest.split_once(char::is_whitespace) {
                    Some((arg, value)) => (arg, value.trim()),
                    None => (rest, ""),
                };
                self.arguments.insert(arg.to_string(), value.to_string());
            }
            "dirname" => self.dirname = word.to_string(),
            "logdir" => self.logdir = word.to_string(),
            "jobtype" => self.jobtype = word.to_string(),
            "status" => {
                if let Some(status) = word.chars().next().and_then(JobStatus::from_char) {
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
            "startedtime" => set_parsed(&mut self.started, word),
            "finishedtime" => set_parsed(&mut self.finished, word),
            "serverstartedtime" => set_parsed(&mut self.server_started, word),
            "serverfinishedtime" => set_parsed(&mut self.server_finished, word),
            "pid" => set_parsed(&mut self.pid, word),
            "childpid" => set_parsed(&mut self.childpid, word),
            "percentdone" => set_parsed(&mut self.percent_done, word),
            "host" => self.host = word.to_string(),
            "magnitude" => set_parsed(&mut self.magnitude, word),
            _ => {}
        }
    }

    /// Serialize to the `.job` file format.
    pub fn to_record(&self) -> String {
        let mut out = String::new();
        let mut line = |s: String| {
            out.push_str(&s);
            out.push('\n');
        };

        line(format!("status {}", self.status));
        line(format!("name {}", self.name));
        line(format!("jnum {}", self.jnum));
        line(format!("dirname {}", self.dirname));
        if !self.logdir.is_empty() {
            line(format!("logdir {}", self.logdir));
        }
        line(format!("jobtype {}", self.jobtype));
        if !self.waitfor.is_empty() {
            line(format!("waitfor {}", format_number_set(&self.waitfor)));
        }
        if self.finished != 0 {
            line(format!("finishedtime {}", self.finished));
        }
        if self.started != 0 {
            line(format!("startedtime {}", self.started));
        }
        if self.server_finished != 0 {
            line(format!("serverfinishedtime {}", self.server_finished));
        }
        if self.server_started != 0 {
            line(format!("serverstartedtime {}", self.server_started));
        }
        if self.percent_done > -1 {
            line(format!("percentdone {}", self.percent_done));
        }
        if self.magnitude != 0 {
            line(format!("magnitude {}", self.magnitude));
        }
        if !self.host.is_empty() {
            line(format!("host {}", self.host));
        }
        for (arg, value) in &self.arguments {
            line(format!("argument {arg} {value}"));
        }
        line(String::new());
        line("# end of job definition".to_string());

        out
    }

    /// True while a recent dispatch may still be in flight: the job was
    /// started, has not finished since, and started no more than
    /// [`RESEND_WAIT_SECS`] ago.
    pub fn should_refract(&self, now: i64) -> bool {
        if self.started == 0 {
            return false;
        }
        if self.finished >= self.started {
            return false;
        }
        now - self.started <= RESEND_WAIT_SECS
    }

    /// Check the wait-set against a done table indexed by job number.
    ///
    /// Numbers beyond the table are ignored.
    pub fn has_unsatisfied_dependencies(&self, done: &[bool]) -> bool {
        self.waitfor
            .iter()
            .any(|&n| done.get(n as usize).is_some_and(|is_done| !is_done))
    }
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, word: &str) {
    if let Ok(v) = word.parse() {
        *slot = v;
    }
}
