// src/protocol/mod.rs

//! Wire codecs shared by the control channel and host exchanges.

pub mod bracket;
pub mod dispatch;

pub use dispatch::{DispatchOutcome, ExchangeTimeouts, JobTicket};
