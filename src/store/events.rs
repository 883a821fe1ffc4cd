// src/store/events.rs

//! Asynchronous event files (`*.vbx`) dropped by hosts and tools.
//!
//! The first line of each file names the event. Files are deleted once
//! read, whether or not the event is understood.

use tracing::warn;

use crate::store::queue::QueueStore;
use crate::store::records::file_name;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    /// `setjobinfo <seq> <job> <line...>`
    SetJobInfo { seq: u32, job: u32, line: String },
    /// `jobrunning <host> <seq> <job> <pid> <childpid> <started>`
    JobRunning {
        host: String,
        seq: u32,
        job: u32,
        pid: i64,
        childpid: i64,
        started: i64,
    },
    /// `jobdone <seq> <job> <finished>`
    JobDone { seq: u32, job: u32, finished: i64 },
    /// `setseqinfo <seq> <line...>`
    SetSeqInfo { seq: u32, line: String },
    /// `killsequence <seq> <status>`
    KillSequence { seq: u32, status: String },
    /// `hostupdate <bracket record>`
    HostUpdate { record: String },
    /// `retry <seq> <job> <generations>`
    Retry { seq: u32, job: u32, generations: u32 },
    /// `saveline <text>`
    SaveLine { text: String },
    /// `email <recipient>`
    Email { recipient: String },
    /// `adminemail`
    AdminEmail,
    /// Anything else, kept verbatim for logging.
    Unknown { line: String },
}

impl QueueEvent {
    /// Parse the first line of an event file.
    pub fn parse(line: &str) -> QueueEvent {
        Self::try_parse(line).unwrap_or_else(|| QueueEvent::Unknown {
            line: line.trim().to_string(),
        })
    }

    fn try_parse(line: &str) -> Option<QueueEvent> {
        let line = line.trim();
        let (kind, rest) = match line.split_once(char::is_whitespace) {
            Some((kind, rest)) => (kind, rest.trim()),
            None => (line, ""),
        };
        let words: Vec<&str> = rest.split_whitespace().collect();
        let num = |i: usize| words.get(i).and_then(|w| w.parse::<u32>().ok());
        let wide = |i: usize| words.get(i).and_then(|w| w.parse::<i64>().ok());

        let event = match kind {
            "setjobinfo" => QueueEvent::SetJobInfo {
                seq: num(0)?,
                job: num(1)?,
                line: tail(rest, 2)?,
            },
            "jobrunning" => QueueEvent::JobRunning {
                host: words.first()?.to_string(),
                seq: num(1)?,
                job: num(2)?,
                pid: wide(3)?,
                childpid: wide(4).unwrap_or(0),
                started: wide(5).unwrap_or(0),
            },
            "jobdone" => QueueEvent::JobDone {
                seq: num(0)?,
                job: num(1)?,
                finished: wide(2).unwrap_or(0),
            },
            "setseqinfo" => QueueEvent::SetSeqInfo {
                seq: num(0)?,
                line: tail(rest, 1)?,
            },
            "killsequence" => QueueEvent::KillSequence {
                seq: num(0)?,
                status: words.get(1)?.to_string(),
            },
            "hostupdate" if !rest.is_empty() => QueueEvent::HostUpdate {
                record: rest.to_string(),
            },
            "retry" if words.len() == 3 => QueueEvent::Retry {
                seq: num(0)?,
                job: num(1)?,
                generations: num(2)?,
            },
            "saveline" => QueueEvent::SaveLine {
                text: rest.to_string(),
            },
            "email" => QueueEvent::Email {
                recipient: words.first().map(|s| s.to_string()).unwrap_or_default(),
            },
            "adminemail" => QueueEvent::AdminEmail,
            _ => return None,
        };
        Some(event)
    }
}

/// Everything after the first `skip` words, or `None` if nothing remains.
fn tail(text: &str, skip: usize) -> Option<String> {
    let mut rest = text.trim_start();
    for _ in 0..skip {
        let idx = rest.find(char::is_whitespace)?;
        rest = rest[idx..].trim_start();
    }
    if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    }
}

impl QueueStore {
    /// Read and delete every event file in the drop directory, in name
    /// order.
    pub fn drain_events(&self) -> Vec<QueueEvent> {
        let mut events = Vec::new();
        let drop_dir = self.drop_dir();
        if !self.fs.is_dir(drop_dir) {
            return events;
        }

        let paths = match self.fs.read_dir(drop_dir) {
            Ok(paths) => paths,
            Err(err) => {
                warn!(error = %err, "failed to scan drop directory for events");
                return events;
            }
        };

        for path in paths {
            let is_event = file_name(&path).is_some_and(|n| self.patterns.event.is_match(n));
            if !is_event || !self.fs.is_file(&path) {
                continue;
            }
            match self.fs.read_to_string(&path) {
                Ok(text) => {
                    let first = text.lines().next().unwrap_or("");
                    events.push(QueueEvent::parse(first));
                }
                Err(err) => warn!(path = ?path, error = %err, "failed to read event file"),
            }
            if let Err(err) = self.fs.remove_file(&path) {
                warn!(path = ?path, error = %err, "failed to delete event file");
            }
        }

        events
    }
}
