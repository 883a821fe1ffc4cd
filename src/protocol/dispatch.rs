// src/protocol/dispatch.rs

//! Scheduler-to-host exchanges: job dispatch, liveness ping and job kill.
//!
//! Every exchange uses its own short-lived TCP connection. Lines are plain
//! ASCII `key value` pairs; replies end with `\n` or `\0`.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::model::{Job, JobId};

pub const START_MARKER: &str = "JOB";
pub const END_MARKER: &str = "EOJ";
pub const PING_COMMAND: &str = "PHONEHOME";
pub const KILL_COMMAND: &str = "KILLJOB";

const MAX_REPLY_BYTES: usize = 64 * 1024;

/// Everything a host needs to start one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTicket {
    pub seq: u32,
    pub job: u32,
    pub uid: u32,
    pub cpus: u32,
    pub email: String,
    pub logdir: String,
    pub seqname: String,
    pub name: String,
    pub jobtype: String,
    pub dirname: String,
    pub arguments: Vec<(String, String)>,
}

impl JobTicket {
    pub fn from_job(job: &Job, cpus: u32) -> Self {
        Self {
            seq: job.snum,
            job: job.jnum,
            uid: job.uid,
            cpus,
            email: job.email.clone(),
            logdir: job.logdir.clone(),
            seqname: job.seqname.clone(),
            name: job.name.clone(),
            jobtype: job.jobtype.clone(),
            dirname: job.dirname.clone(),
            arguments: job
                .arguments
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    pub fn id(&self) -> JobId {
        JobId::new(self.seq, self.job)
    }

    /// Render the ticket body, including the trailing `EOJ` line.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        let mut line = |key: &str, value: &str| {
            out.push_str(key);
            if !value.is_empty() {
                out.push(' ');
                out.push_str(value);
            }
            out.push('\n');
        };
        line("snum", &self.seq.to_string());
        line("number", &self.job.to_string());
        line("uid", &self.uid.to_string());
        line("actualcpus", &self.cpus.to_string());
        line("email", &self.email);
        line("logdir", &self.logdir);
        line("seqname", &self.seqname);
        line("name", &self.name);
        line("jobtype", &self.jobtype);
        line("dirname", &self.dirname);
        for (k, v) in &self.arguments {
            line("argument", &format!("{k} {v}"));
        }
        out.push_str(END_MARKER);
        out.push('\n');
        out
    }

    /// Parse a ticket body as produced by [`JobTicket::encode`]. Lines
    /// after `EOJ` are ignored.
    pub fn decode(text: &str) -> Result<Self> {
        let mut ticket = JobTicket {
            seq: 0,
            job: 0,
            uid: 0,
            cpus: 1,
            email: String::new(),
            logdir: String::new(),
            seqname: String::new(),
            name: String::new(),
            jobtype: String::new(),
            dirname: String::new(),
            arguments: Vec::new(),
        };
        let mut seen_seq = false;
        let mut seen_job = false;
        let mut terminated = false;

        for raw in text.lines() {
            let line = raw.trim();
            if line == END_MARKER {
                terminated = true;
                break;
            }
            let (key, value) = line.split_once(' ').unwrap_or((line, ""));
            let value = value.trim();
            match key {
                "snum" => {
                    ticket.seq = value.parse().context("bad snum")?;
                    seen_seq = true;
                }
                "number" => {
                    ticket.job = value.parse().context("bad job number")?;
                    seen_job = true;
                }
                "uid" => ticket.uid = value.parse().unwrap_or(0),
                "actualcpus" => ticket.cpus = value.parse().unwrap_or(1),
                "email" => ticket.email = value.to_string(),
                "logdir" => ticket.logdir = value.to_string(),
                "seqname" => ticket.seqname = value.to_string(),
                "name" => ticket.name = value.to_string(),
                "jobtype" => ticket.jobtype = value.to_string(),
                "dirname" => ticket.dirname = value.to_string(),
                "argument" => {
                    let (k, v) = value.split_once(' ').unwrap_or((value, ""));
                    ticket.arguments.push((k.to_string(), v.trim().to_string()));
                }
                _ => {}
            }
        }

        if !terminated {
            return Err(anyhow!("job ticket missing {END_MARKER}"));
        }
        if !seen_seq || !seen_job {
            return Err(anyhow!("job ticket missing snum or number"));
        }
        Ok(ticket)
    }
}

/// Result of shipping a job to a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Host accepted the job, optionally reporting its pid.
    Accepted { pid: Option<i64> },
    /// Host refused the job.
    Refused(String),
    /// Host answered with something that is neither ACK nor NAK.
    Malformed(String),
    /// Connect, write or read failed or timed out.
    Unreachable(String),
}


/// Per-exchange time limits.
#[derive(Debug, Clone, Copy)]
pub struct ExchangeTimeouts {
    pub connect: Duration,
    pub reply: Duration,
}

/// `PHONEHOME s j pid ...` listing jobs the scheduler wants confirmed.
pub fn ping_message(jobs: &[(JobId, i64)]) -> String {
    let mut out = String::from(PING_COMMAND);
    for (id, pid) in jobs {
        out.push_str(&format!(" {} {} {}", id.seq, id.job, pid));
    }
    out
}

pub fn kill_message(pid: i64, childpid: i64) -> String {
    format!("{KILL_COMMAND} {pid} {childpid}")
}

/// Classify a final dispatch reply.
pub fn classify_dispatch_reply(reply: &str) -> DispatchOutcome {
    let reply = reply.trim();
    let mut words = reply.split_whitespace();
    match words.next() {
        Some("ACK") => DispatchOutcome::Accepted {
            pid: words.next().and_then(|w| w.parse().ok()),
        },
        Some("NAK") => DispatchOutcome::Refused(words.collect::<Vec<_>>().join(" ")),
        _ => DispatchOutcome::Malformed(reply.to_string()),
    }
}

/// Split a ping reply into acknowledgement and optional attached report.
///
/// Returns `None` if the reply does not start with `ACK`.
pub fn parse_ping_reply(reply: &str) -> Option<Option<String>> {
    let rest = reply.trim().strip_prefix("ACK")?;
    let rest = rest.trim();
    if rest.is_empty() {
        Some(None)
    } else {
        Some(Some(rest.to_string()))
    }
}

async fn connect(address: &str, limits: ExchangeTimeouts) -> Result<TcpStream> {
    timeout(limits.connect, TcpStream::connect(address))
        .await
        .map_err(|_| anyhow!("timed out connecting to {address}"))?
        .with_context(|| format!("connecting to {address}"))
}

/// Read one reply terminated by `\n`, `\0` or end of stream.
pub async fn read_reply(stream: &mut TcpStream, limit: Duration) -> Result<String> {
    let read = async {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            let n = stream.read(&mut byte).await?;
            if n == 0 || byte[0] == b'\n' || byte[0] == 0 {
                break;
            }
            buf.push(byte[0]);
            if buf.len() >= MAX_REPLY_BYTES {
                break;
            }
        }
        Ok::<_, std::io::Error>(buf)
    };
    let buf = timeout(limit, read)
        .await
        .map_err(|_| anyhow!("timed out waiting for reply"))?
        .context("reading reply")?;
    Ok(String::from_utf8_lossy(&buf).trim_end_matches('\r').to_string())
}

/// Ship one job: start marker, ACK, ticket, final ACK/NAK.
pub async fn send_job(address: &str, ticket: &JobTicket, limits: ExchangeTimeouts) -> DispatchOutcome {
    match send_job_inner(address, ticket, limits).await {
        Ok(outcome) => outcome,
        Err(err) => DispatchOutcome::Unreachable(format!("{err:#}")),
    }
}

async fn send_job_inner(
    address: &str,
    ticket: &JobTicket,
    limits: ExchangeTimeouts,
) -> Result<DispatchOutcome> {
    let mut stream = connect(address, limits).await?;
    stream
        .write_all(format!("{START_MARKER}\n").as_bytes())
        .await
        .context("sending start marker")?;

    let first = read_reply(&mut stream, limits.reply).await?;
    if first.trim() != "ACK" {
        return Ok(DispatchOutcome::Malformed(first));
    }

    stream
        .write_all(ticket.encode().as_bytes())
        .await
        .context("sending job ticket")?;
    stream.flush().await.ok();

    let last = read_reply(&mut stream, limits.reply).await?;
    Ok(classify_dispatch_reply(&last))
}

/// Liveness ping. Any reply beginning with `ACK` counts as a response.
pub async fn phone_home(address: &str, message: &str, limits: ExchangeTimeouts) -> Result<String> {
    let mut stream = connect(address, limits).await?;
    stream
        .write_all(format!("{message}\n").as_bytes())
        .await
        .context("sending phonehome")?;
    read_reply(&mut stream, limits.reply).await
}

/// Fire a one-line message at a host; the reply, if any, is ignored.
pub async fn send_message(address: &str, message: &str, limits: ExchangeTimeouts) -> Result<()> {
    let mut stream = connect(address, limits).await?;
    stream
        .write_all(format!("{message}\n").as_bytes())
        .await
        .with_context(|| format!("sending {message:?} to {address}"))?;
    let _ = read_reply(&mut stream, limits.reply).await;
    Ok(())
}
