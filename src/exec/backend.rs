// src/exec/backend.rs

//! Pluggable dispatch backend.
//!
//! The runtime hands [`HostWork`] to a `DispatchBackend` instead of a raw
//! mpsc sender.
//!
//! - `RealDispatchBackend` wraps [`spawn_executor`] and talks TCP to hosts.
//! - Tests provide their own backend that records the work and answers
//!   with synthetic `DispatchFinished` / `PingFinished` events.

use std::future::Future;
use std::pin::Pin;

use anyhow::anyhow;
use tokio::sync::mpsc;

use crate::engine::RuntimeEvent;
use crate::errors::Result;
use crate::exec::executor_loop::{spawn_executor, ExecutorOptions};
use crate::exec::HostWork;

pub trait DispatchBackend: Send {
    /// Start the given exchanges. Must not wait for them to finish.
    fn submit(
        &mut self,
        work: Vec<HostWork>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Backend used in production.
pub struct RealDispatchBackend {
    tx: mpsc::Sender<HostWork>,
}

impl RealDispatchBackend {
    /// Spawns the background executor loop immediately.
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>, options: ExecutorOptions) -> Self {
        let tx = spawn_executor(runtime_tx, options);
        Self { tx }
    }
}

impl DispatchBackend for RealDispatchBackend {
    fn submit(
        &mut self,
        work: Vec<HostWork>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.tx.clone();

        Box::pin(async move {
            for item in work {
                tx.send(item)
                    .await
                    .map_err(|_| anyhow!("host executor loop has stopped"))?;
            }
            Ok(())
        })
    }
}
