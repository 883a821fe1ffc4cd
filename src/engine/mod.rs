// src/engine/mod.rs

//! Scheduling engine.
//!
//! This module ties together:
//! - the queue store and the in-memory sequence map
//! - the host registry and the running-job index
//! - the admission pass that places waiting jobs on hosts
//! - the control-channel command handlers
//!
//! The pure core state machine lives in [`core`] (it touches the queue
//! directory through the store but owns no channels or sockets); the
//! async/IO shell is implemented in [`runtime`].

use chrono::{Datelike, Local, TimeZone, Timelike};
use tokio::sync::oneshot;

use crate::control::{ControlCommand, ControlReply};
use crate::hosts::PingOutcome;
use crate::model::JobId;
use crate::protocol::DispatchOutcome;

/// Seconds without a report before a running job is declared missing.
pub const MISSING_AFTER_SECS: i64 = 180;
/// Running jobs not reported for this long are listed in the next ping.
pub const PING_REPORT_AGE_SECS: i64 = 60;

/// Wall-clock reading handed to the core with every event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    /// Seconds since the Unix epoch.
    pub unix: i64,
    /// 0 = Sunday.
    pub weekday: u32,
    pub hour: u32,
}

impl Timestamp {
    pub fn now() -> Self {
        let now = Local::now();
        Self {
            unix: now.timestamp(),
            weekday: now.weekday().num_days_from_sunday(),
            hour: now.hour(),
        }
    }

    /// Local-time reading for a given Unix time.
    pub fn from_unix(unix: i64) -> Self {
        match Local.timestamp_opt(unix, 0).single() {
            Some(t) => Self {
                unix,
                weekday: t.weekday().num_days_from_sunday(),
                hour: t.hour(),
            },
            None => Self::at(unix, 0, 0),
        }
    }

    pub fn at(unix: i64, weekday: u32, hour: u32) -> Self {
        Self {
            unix,
            weekday,
            hour,
        }
    }

    pub fn plus(self, secs: i64) -> Self {
        Self {
            unix: self.unix + secs,
            ..self
        }
    }
}

/// Events flowing into the runtime from the control channel, the host
/// executor and the tick timer.
#[derive(Debug)]
pub enum RuntimeEvent {
    /// Run one scheduling cycle.
    Tick,
    /// A client command; the reply goes back over `reply`.
    Control {
        user: String,
        command: ControlCommand,
        reply: oneshot::Sender<ControlReply>,
    },
    /// A dispatch exchange finished.
    DispatchFinished {
        job: JobId,
        host: String,
        outcome: DispatchOutcome,
    },
    /// A liveness ping finished.
    PingFinished { host: String, outcome: PingOutcome },
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

pub mod admission;
pub mod commands;
pub mod core;
pub mod cycle;
pub mod event_handlers;
pub mod running;
pub mod runtime;

pub use admission::ResourceSnapshot;
pub use commands::ControlOutcome;
pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use runtime::Runtime;
