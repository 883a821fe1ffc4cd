// src/control/command.rs

//! Control-channel command line parser.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use crate::model::{parse_number_set, PriorityPolicy};
use crate::types::JobStatus;

/// How `SETSCHED` changes a sequence's priority policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedChange {
    /// Replace the whole policy (`SETSCHED sched ...`).
    Policy(PriorityPolicy),
    /// Change only `maxjobs` (`SETSCHED max ...`).
    MaxJobs(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// `GIMME <host> [hours]`
    Gimme { host: String, hours: i64 },
    /// `GIVEBACK <host>`
    GiveBack { host: String },
    /// `SUBMIT <bundle-dir>`
    Submit { bundle: PathBuf },
    /// `CHANGEJOBSTATUS <seq> <jobs> <status>`
    ChangeJobStatus {
        seq: u32,
        jobs: BTreeSet<u32>,
        status: JobStatus,
    },
    /// `SETSEQINFO <seq> <key> <value...>`
    SetSeqInfo { seq: u32, line: String },
    /// `SETSCHED sched <seqs> <policy...>` or `SETSCHED max|m <seqs> <n>`
    SetSched {
        seqs: BTreeSet<u32>,
        change: SchedChange,
    },
    /// `KILLSEQUENCE <seqs>`
    KillSequence { seqs: BTreeSet<u32> },
    Hosts,
    Sequences,
    /// `ADDSERVER <host>`
    AddServer { host: String },
    /// `DELSERVER <host>`
    DelServer { host: String },
    Diag,
    Reset,
    QueueOn,
    QueueOff,
    Die,
    Test,
}

/// Default reservation length for `GIMME` without an hour count.
pub const DEFAULT_RESERVATION_HOURS: i64 = 24;

impl ControlCommand {
    /// Parse one command line. The verb is case-insensitive.
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let mut words = line.split_whitespace();
        let verb = words
            .next()
            .ok_or_else(|| "empty command".to_string())?
            .to_ascii_uppercase();
        let args: Vec<&str> = words.collect();

        let need = |n: usize, usage: &str| -> Result<(), String> {
            if args.len() < n {
                Err(format!("usage: {usage}"))
            } else {
                Ok(())
            }
        };
        let seq_set = |word: &str| -> Result<BTreeSet<u32>, String> {
            parse_number_set(word)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| format!("bad sequence list {word:?}"))
        };

        let cmd = match verb.as_str() {
            "GIMME" => {
                need(1, "GIMME host [hours]")?;
                let hours = match args.get(1) {
                    Some(h) => h
                        .parse::<i64>()
                        .ok()
                        .filter(|h| *h > 0)
                        .ok_or_else(|| format!("bad hour count {h:?}"))?,
                    None => DEFAULT_RESERVATION_HOURS,
                };
                ControlCommand::Gimme {
                    host: args[0].to_string(),
                    hours,
                }
            }
            "GIVEBACK" => {
                need(1, "GIVEBACK host")?;
                ControlCommand::GiveBack {
                    host: args[0].to_string(),
                }
            }
            "SUBMIT" => {
                need(1, "SUBMIT bundle-dir")?;
                ControlCommand::Submit {
                    bundle: PathBuf::from(args[0]),
                }
            }
            "CHANGEJOBSTATUS" => {
                need(3, "CHANGEJOBSTATUS seq jobs status")?;
                let seq = args[0]
                    .parse()
                    .map_err(|_| format!("bad sequence number {:?}", args[0]))?;
                let jobs = parse_number_set(args[1])
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| format!("bad job list {:?}", args[1]))?;
                let status = args[2].parse::<JobStatus>()?;
                ControlCommand::ChangeJobStatus { seq, jobs, status }
            }
            "SETSEQINFO" => {
                need(3, "SETSEQINFO seq key value")?;
                let seq = args[0]
                    .parse()
                    .map_err(|_| format!("bad sequence number {:?}", args[0]))?;
                ControlCommand::SetSeqInfo {
                    seq,
                    line: args[1..].join(" "),
                }
            }
            "SETSCHED" => {
                need(3, "SETSCHED sched|max seqs args")?;
                let seqs = seq_set(args[1])?;
                let change = match args[0].to_ascii_lowercase().as_str() {
                    "sched" => PriorityPolicy::from_args(&args[2..])
                        .map(SchedChange::Policy)
                        .ok_or_else(|| format!("bad schedule {:?}", args[2..].join(" ")))?,
                    "max" | "m" => {
                        let n = args[2]
                            .parse()
                            .map_err(|_| format!("bad job count {:?}", args[2]))?;
                        SchedChange::MaxJobs(n)
                    }
                    other => return Err(format!("unknown SETSCHED mode {other:?}")),
                };
                ControlCommand::SetSched { seqs, change }
            }
            "KILLSEQUENCE" => {
                need(1, "KILLSEQUENCE seqs")?;
                ControlCommand::KillSequence {
                    seqs: seq_set(args[0])?,
                }
            }
            "HOSTS" => ControlCommand::Hosts,
            "SEQUENCES" => ControlCommand::Sequences,
            "ADDSERVER" => {
                need(1, "ADDSERVER host")?;
                ControlCommand::AddServer {
                    host: args[0].to_string(),
                }
            }
            "DELSERVER" => {
                need(1, "DELSERVER host")?;
                ControlCommand::DelServer {
                    host: args[0].to_string(),
                }
            }
            "DIAG" => ControlCommand::Diag,
            "RESET" => ControlCommand::Reset,
            "QUEUEON" => ControlCommand::QueueOn,
            "QUEUEOFF" => ControlCommand::QueueOff,
            "DIE" => ControlCommand::Die,
            "TEST" => ControlCommand::Test,
            other => return Err(format!("unknown command {other}")),
        };
        Ok(cmd)
    }

    pub fn verb(&self) -> &'static str {
        match self {
            ControlCommand::Gimme { .. } => "GIMME",
            ControlCommand::GiveBack { .. } => "GIVEBACK",
            ControlCommand::Submit { .. } => "SUBMIT",
            ControlCommand::ChangeJobStatus { .. } => "CHANGEJOBSTATUS",
            ControlCommand::SetSeqInfo { .. } => "SETSEQINFO",
            ControlCommand::SetSched { .. } => "SETSCHED",
            ControlCommand::KillSequence { .. } => "KILLSEQUENCE",
            ControlCommand::Hosts => "HOSTS",
            ControlCommand::Sequences => "SEQUENCES",
            ControlCommand::AddServer { .. } => "ADDSERVER",
            ControlCommand::DelServer { .. } => "DELSERVER",
            ControlCommand::Diag => "DIAG",
            ControlCommand::Reset => "RESET",
            ControlCommand::QueueOn => "QUEUEON",
            ControlCommand::QueueOff => "QUEUEOFF",
            ControlCommand::Die => "DIE",
            ControlCommand::Test => "TEST",
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}
