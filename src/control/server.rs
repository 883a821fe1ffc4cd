// src/control/server.rs

//! Control-channel listener.
//!
//! Each connection carries exactly one exchange:
//!
//! ```text
//! client: <username>\n
//! server: ACK\n
//! client: <command line>\n
//! server: <reply>
//! ```
//!
//! Commands are handed to the engine as [`RuntimeEvent::Control`] and the
//! reply is awaited over a oneshot channel.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::control::command::ControlCommand;
use crate::control::reply::ControlReply;
use crate::engine::RuntimeEvent;

/// Read timeout for the username and command lines.
pub const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Accept control connections until the runtime channel closes.
pub fn spawn_control_server(
    listener: TcpListener,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match listener.local_addr() {
            Ok(addr) => info!(%addr, "control channel listening"),
            Err(_) => info!("control channel listening"),
        }

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(conn) => conn,
                Err(err) => {
                    warn!(error = %err, "failed to accept control connection");
                    continue;
                }
            };
            if runtime_tx.is_closed() {
                break;
            }
            let tx = runtime_tx.clone();
            tokio::spawn(async move {
                if let Err(err) = handle_connection(stream, tx).await {
                    debug!(%peer, error = %err, "control connection ended with error");
                }
            });
        }

        info!("control channel closed");
    })
}

async fn read_line(reader: &mut BufReader<TcpStream>, what: &str) -> Result<String> {
    let mut line = String::new();
    let n = timeout(READ_TIMEOUT, reader.read_line(&mut line))
        .await
        .map_err(|_| anyhow!("timed out reading {what}"))?
        .with_context(|| format!("reading {what}"))?;
    if n == 0 {
        return Err(anyhow!("connection closed before {what}"));
    }
    Ok(line.trim().to_string())
}

async fn handle_connection(stream: TcpStream, runtime_tx: mpsc::Sender<RuntimeEvent>) -> Result<()> {
    let mut reader = BufReader::new(stream);

    let user = read_line(&mut reader, "username").await?;
    if user.is_empty() {
        return Err(anyhow!("empty username"));
    }
    reader.get_mut().write_all(b"ACK\n").await?;

    let line = read_line(&mut reader, "command").await?;
    let reply = match ControlCommand::parse(&line) {
        Ok(command) => {
            info!(user = %user, command = %line, "control command");
            let (reply_tx, reply_rx) = oneshot::channel();
            runtime_tx
                .send(RuntimeEvent::Control {
                    user,
                    command,
                    reply: reply_tx,
                })
                .await
                .map_err(|_| anyhow!("scheduler is shutting down"))?;
            reply_rx
                .await
                .unwrap_or_else(|_| ControlReply::error("scheduler dropped the request"))
        }
        Err(err) => {
            warn!(user = %user, command = %line, error = %err, "rejected control command");
            ControlReply::error(err)
        }
    };

    let stream = reader.get_mut();
    stream.write_all(&reply.encode()).await?;
    stream.shutdown().await.ok();
    Ok(())
}
