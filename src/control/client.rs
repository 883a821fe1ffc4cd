// src/control/client.rs

use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::control::reply::ControlReply;
use crate::errors::{ClusterqError, Result};

/// Run one control exchange against a scheduler and return its reply.
pub async fn send_command(
    address: &str,
    user: &str,
    command: &str,
    limit: Duration,
) -> Result<ControlReply> {
    let exchange = async {
        let stream = TcpStream::connect(address)
            .await
            .with_context(|| format!("connecting to scheduler at {address}"))?;
        let mut reader = BufReader::new(stream);

        reader
            .get_mut()
            .write_all(format!("{user}\n").as_bytes())
            .await?;

        let mut ack = String::new();
        reader.read_line(&mut ack).await?;
        if ack.trim() != "ACK" {
            return Err(ClusterqError::Protocol(format!(
                "scheduler did not acknowledge: {:?}",
                ack.trim()
            )));
        }

        reader
            .get_mut()
            .write_all(format!("{command}\n").as_bytes())
            .await?;

        let mut body = Vec::new();
        reader.read_to_end(&mut body).await?;
        Ok(ControlReply::decode(&body))
    };

    timeout(limit, exchange).await.map_err(|_| {
        ClusterqError::Protocol(format!("timed out talking to scheduler at {address}"))
    })?
}
