// src/control/mod.rs

//! Control channel used by client tools: command parsing, reply framing,
//! the TCP listener and a small client helper.

pub mod client;
pub mod command;
pub mod reply;
pub mod server;

pub use client::send_command;
pub use command::{ControlCommand, SchedChange};
pub use reply::ControlReply;
pub use server::spawn_control_server;
