// src/exec/executor_loop.rs

//! Background loop that runs host exchanges on a bounded pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::SchedulerConfig;
use crate::engine::RuntimeEvent;
use crate::exec::task_runner::run_work;
use crate::exec::HostWork;
use crate::protocol::ExchangeTimeouts;

/// Pool size and per-exchange time limits.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorOptions {
    pub workers: usize,
    pub dispatch: ExchangeTimeouts,
    pub ping: ExchangeTimeouts,
}

impl ExecutorOptions {
    pub fn from_config(cfg: &SchedulerConfig) -> Self {
        Self {
            workers: cfg.dispatch_workers.max(1),
            dispatch: ExchangeTimeouts {
                connect: cfg.dispatch_timeout,
                reply: cfg.dispatch_timeout,
            },
            ping: ExchangeTimeouts {
                connect: cfg.ping_timeout.min(Duration::from_secs(10)),
                reply: cfg.ping_timeout,
            },
        }
    }
}

/// Spawn the background executor loop.
///
/// Each work item runs in its own Tokio task once a pool permit is free.
/// **Per host there is never more than one ping in flight**: a ping for a
/// host whose previous ping is still running is dropped.
pub fn spawn_executor(
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    options: ExecutorOptions,
) -> mpsc::Sender<HostWork> {
    let (tx, mut rx) = mpsc::channel::<HostWork>(256);

    tokio::spawn(async move {
        info!(workers = options.workers, "host executor loop started");

        let permits = Arc::new(Semaphore::new(options.workers));
        let mut pings: HashMap<String, JoinHandle<()>> = HashMap::new();

        while let Some(work) = rx.recv().await {
            handle_work(work, &options, &permits, &mut pings, &runtime_tx);
        }

        info!("host executor loop finished (channel closed)");
    });

    tx
}

fn handle_work(
    work: HostWork,
    options: &ExecutorOptions,
    permits: &Arc<Semaphore>,
    pings: &mut HashMap<String, JoinHandle<()>>,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
) {
    let is_ping = matches!(work, HostWork::Ping { .. });
    let host = work.host().to_string();

    if is_ping {
        if let Some(existing) = pings.get(&host) {
            if !existing.is_finished() {
                debug!(host = %host, "ping already in flight; dropping new request");
                return;
            }
        }
    }

    let permits = Arc::clone(permits);
    let rt_tx = runtime_tx.clone();
    let options = *options;
    let handle = tokio::spawn(async move {
        let Ok(_permit) = permits.acquire_owned().await else {
            return;
        };
        run_work(work, &options, rt_tx).await;
    });

    if is_ping {
        pings.insert(host, handle);
    }
}
