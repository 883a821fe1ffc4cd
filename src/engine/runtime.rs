// src/engine/runtime.rs

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::exec::{DispatchBackend, HostWork};

use super::core::CoreRuntime;
use super::{CoreCommand, RuntimeEvent, Timestamp};

/// Drives the scheduler in response to `RuntimeEvent`s and a periodic
/// tick, and hands host exchanges to a `DispatchBackend`.
///
/// This is a pure IO shell around `CoreRuntime`, which holds all the
/// scheduling semantics. This struct only reads events, reads the clock,
/// and forwards the resulting commands.
pub struct Runtime<B: DispatchBackend> {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    backend: B,
    tick: Duration,
}

impl<B: DispatchBackend> fmt::Debug for Runtime<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("tick", &self.tick)
            .finish_non_exhaustive()
    }
}

impl<B: DispatchBackend> Runtime<B> {
    pub fn new(
        core: CoreRuntime,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        backend: B,
        tick: Duration,
    ) -> Self {
        Self {
            core,
            event_rx,
            backend,
            tick,
        }
    }

    /// Main event loop.
    ///
    /// - Runs a scheduling cycle every `tick`, starting immediately.
    /// - Feeds control commands and exchange outcomes into the core as
    ///   they arrive.
    /// - Executes commands returned by the core.
    pub async fn run(mut self) -> Result<CoreRuntime> {
        info!(tick_secs = self.tick.as_secs(), "clusterq runtime started");

        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let event = tokio::select! {
                received = self.event_rx.recv() => match received {
                    Some(e) => e,
                    None => {
                        info!("runtime event channel closed; exiting");
                        break;
                    }
                },
                _ = ticker.tick() => RuntimeEvent::Tick,
            };

            if !matches!(event, RuntimeEvent::Tick) {
                debug!(?event, "runtime received event");
            }

            let step = self.core.step(event, Timestamp::now());

            for command in step.commands {
                self.execute_command(command).await?;
            }

            if !step.keep_running {
                info!("core requested exit; stopping runtime");
                break;
            }
        }

        info!("runtime exiting");
        Ok(self.core)
    }

    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::SubmitWork(work) => self.submit(work).await?,
            CoreCommand::Reply { reply_tx, reply } => {
                if reply_tx.send(reply).is_err() {
                    warn!("control client went away before its reply was ready");
                }
            }
            CoreCommand::RequestExit => info!("core issued RequestExit command"),
        }
        Ok(())
    }

    async fn submit(&mut self, work: Vec<HostWork>) -> Result<()> {
        if work.is_empty() {
            return Ok(());
        }
        let hosts: Vec<_> = work.iter().map(HostWork::host).collect();
        debug!(?hosts, count = work.len(), "submitting host work");
        self.backend.submit(work).await
    }
}
