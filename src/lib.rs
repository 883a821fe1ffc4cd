// src/lib.rs

pub mod cli;
pub mod config;
pub mod control;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod hosts;
pub mod lock;
pub mod logging;
pub mod model;
pub mod protocol;
pub mod store;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::{load_and_validate, ConfigFile};
use crate::control::spawn_control_server;
use crate::engine::{CoreRuntime, Runtime, RuntimeEvent, Timestamp};
use crate::exec::{ExecutorOptions, RealDispatchBackend};
use crate::fs::RealFileSystem;
use crate::lock::SingletonLock;
use crate::store::QueueStore;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and the singleton lock
/// - queue store and core runtime
/// - host executor
/// - control-channel listener
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let mut cfg = load_and_validate(&config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;
    if let Some(dir) = &args.queue_dir {
        cfg.scheduler.queue_dir = dir.clone();
    }

    let store = QueueStore::new(
        Arc::new(RealFileSystem),
        cfg.scheduler.queue_dir.clone(),
        cfg.scheduler.drop_dir.clone(),
    )?;

    if args.dry_run {
        print_dry_run(&cfg, &store);
        return Ok(());
    }

    let _lock = SingletonLock::acquire(&cfg.scheduler.queue_dir)?;

    let mut core = CoreRuntime::new(&cfg, store).with_config_path(&config_path);
    core.load(Timestamp::now())?;

    // Runtime event channel.
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(256);

    let backend = RealDispatchBackend::new(rt_tx.clone(), ExecutorOptions::from_config(&cfg.scheduler));

    let listener = TcpListener::bind(&cfg.scheduler.control_addr)
        .await
        .with_context(|| format!("binding control channel on {}", cfg.scheduler.control_addr))?;
    let _control = spawn_control_server(listener, rt_tx.clone());

    // Ctrl-C → graceful shutdown.
    {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
        });
    }

    info!(
        queue_dir = %cfg.scheduler.queue_dir.display(),
        control_addr = %cfg.scheduler.control_addr,
        "scheduler starting"
    );

    let runtime = Runtime::new(core, rt_rx, backend, cfg.scheduler.queue_delay);
    runtime.run().await?;
    Ok(())
}

/// Dry-run output: hosts, job types and whatever is queued. Nothing on
/// disk is modified.
fn print_dry_run(cfg: &ConfigFile, store: &QueueStore) {
    let s = &cfg.scheduler;
    println!("clusterq dry-run");
    println!("  scheduler.queue_dir = {}", s.queue_dir.display());
    println!("  scheduler.drop_dir = {}", s.drop_dir.display());
    println!("  scheduler.control_addr = {}", s.control_addr);
    println!("  scheduler.queue_delay_secs = {}", s.queue_delay.as_secs());
    println!("  scheduler.dispatch_workers = {}", s.dispatch_workers);
    println!();

    println!("hosts ({}):", cfg.hosts.len());
    for host in &cfg.hosts {
        println!("  - {} ({})", host.nickname, host.address);
        println!("      rank: {}  cpus: {}", host.rank, host.cpus);
        for window in &host.avail {
            println!("      avail: {window}");
        }
        for r in &host.resources {
            let scope = if r.global { "global" } else { "local" };
            println!("      resource: {} x{} ({scope})", r.name, r.count);
        }
    }
    println!();

    println!("job types ({}):", cfg.jobtypes.len());
    for (name, jobtype) in &cfg.jobtypes {
        println!("  - {name}");
        if !jobtype.requires.is_empty() {
            println!("      requires: {:?}", jobtype.requires);
        }
    }
    println!();

    match store.peek_all() {
        Ok(sequences) => {
            println!("sequences ({}):", sequences.len());
            for seq in sequences.values() {
                let c = seq.counts;
                println!(
                    "  - {} '{}' owner={} status={} policy={} jobs={} waiting={} running={} done={} bad={}",
                    seq.seqnum,
                    seq.name,
                    seq.owner,
                    seq.status,
                    seq.priority,
                    c.total,
                    c.waiting,
                    c.running,
                    c.done,
                    c.bad
                );
            }
        }
        Err(err) => println!("sequences: unreadable ({err:#})"),
    }

    debug!("dry-run complete (no scheduling)");
}
