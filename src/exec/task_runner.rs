// src/exec/task_runner.rs

//! Single host exchange runner.

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::engine::RuntimeEvent;
use crate::exec::executor_loop::ExecutorOptions;
use crate::exec::HostWork;
use crate::hosts::PingOutcome;
use crate::protocol::dispatch::{parse_ping_reply, phone_home, send_job, send_message};
use crate::protocol::DispatchOutcome;

/// Run one exchange and report its outcome to the runtime.
///
/// Network failures are outcomes, not errors; only a closed runtime channel
/// is logged here.
pub async fn run_work(work: HostWork, options: &ExecutorOptions, runtime_tx: mpsc::Sender<RuntimeEvent>) {
    let host = work.host().to_string();
    if let Err(err) = run_work_inner(work, options, &runtime_tx).await {
        error!(host = %host, error = %err, "host exchange error");
    }
}

async fn run_work_inner(
    work: HostWork,
    options: &ExecutorOptions,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
) -> Result<()> {
    match work {
        HostWork::Dispatch {
            host,
            address,
            ticket,
        } => {
            let job = ticket.id();
            info!(host = %host, seq = job.seq, job = job.job, "shipping job");
            let outcome = send_job(&address, &ticket, options.dispatch).await;
            match &outcome {
                DispatchOutcome::Accepted { pid } => {
                    debug!(host = %host, seq = job.seq, job = job.job, ?pid, "host accepted job")
                }
                DispatchOutcome::Refused(reason) => {
                    warn!(host = %host, seq = job.seq, job = job.job, reason = %reason, "host refused job")
                }
                DispatchOutcome::Malformed(reply) => {
                    warn!(host = %host, seq = job.seq, job = job.job, reply = %reply, "bad acknowledgment for job")
                }
                DispatchOutcome::Unreachable(err) => {
                    warn!(host = %host, seq = job.seq, job = job.job, error = %err, "could not ship job")
                }
            }
            runtime_tx
                .send(RuntimeEvent::DispatchFinished {
                    job,
                    host: host.clone(),
                    outcome,
                })
                .await
                .with_context(|| format!("reporting dispatch of {job} to runtime"))?;
        }

        HostWork::Ping {
            host,
            address,
            message,
        } => {
            let outcome = match phone_home(&address, &message, options.ping).await {
                Ok(reply) => match parse_ping_reply(&reply) {
                    Some(report) => PingOutcome::Ack { report },
                    None => PingOutcome::BadAck(reply),
                },
                Err(err) => {
                    debug!(host = %host, error = %err, "ping got no response");
                    PingOutcome::Unreachable(format!("{err:#}"))
                }
            };
            runtime_tx
                .send(RuntimeEvent::PingFinished {
                    host: host.clone(),
                    outcome,
                })
                .await
                .with_context(|| format!("reporting ping of host '{host}' to runtime"))?;
        }

        HostWork::Kill {
            host,
            address,
            message,
        } => match send_message(&address, &message, options.dispatch).await {
            Ok(()) => info!(host = %host, message = %message, "kill request sent"),
            Err(err) => warn!(host = %host, error = %err, "failed to send kill request"),
        },
    }
    Ok(())
}
