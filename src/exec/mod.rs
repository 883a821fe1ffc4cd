// src/exec/mod.rs

//! Host I/O execution layer.
//!
//! Every blocking network exchange with a worker host (job dispatch,
//! liveness ping, job kill) runs in its own Tokio task so the engine loop is
//! never held up by a slow host. Outcomes flow back to the runtime as
//! [`RuntimeEvent`](crate::engine::RuntimeEvent)s.
//!
//! - [`executor_loop`] receives [`HostWork`] items and spawns them onto a
//!   bounded pool, keeping at most one ping in flight per host.
//! - [`task_runner`] performs a single exchange and reports the outcome.
//! - [`backend`] provides the `DispatchBackend` trait the runtime talks to,
//!   so tests can swap in a fake that never opens a socket.

pub mod backend;
pub mod executor_loop;
pub mod task_runner;

pub use backend::{DispatchBackend, RealDispatchBackend};
pub use executor_loop::{spawn_executor, ExecutorOptions};

use crate::model::JobId;
use crate::protocol::JobTicket;

/// One exchange with a worker host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostWork {
    /// Ship a job to `host`.
    Dispatch {
        host: String,
        address: String,
        ticket: JobTicket,
    },
    /// Liveness ping; `message` is the full `PHONEHOME` line.
    Ping {
        host: String,
        address: String,
        message: String,
    },
    /// Out-of-band kill request; no outcome is reported back.
    Kill {
        host: String,
        address: String,
        message: String,
    },
}

impl HostWork {
    pub fn host(&self) -> &str {
        match self {
            HostWork::Dispatch { host, .. }
            | HostWork::Ping { host, .. }
            | HostWork::Kill { host, .. } => host,
        }
    }

    /// Job carried by a dispatch, if any.
    pub fn job(&self) -> Option<JobId> {
        match self {
            HostWork::Dispatch { ticket, .. } => Some(ticket.id()),
            _ => None,
        }
    }
}
