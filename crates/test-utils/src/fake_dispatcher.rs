use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use clusterq::engine::RuntimeEvent;
use clusterq::errors::Result;
use clusterq::exec::{DispatchBackend, HostWork};
use clusterq::hosts::PingOutcome;
use clusterq::protocol::DispatchOutcome;

/// How the fake hosts answer a dispatch.
#[derive(Debug, Clone)]
pub enum DispatchReply {
    /// `ACK <pid>`, with pids counting up from 1000.
    Accept,
    /// `NAK`.
    Refuse,
    /// Connection failure.
    Unreachable,
}

/// A fake dispatch backend that:
/// - records every exchange it is handed
/// - immediately answers dispatches and pings with synthetic events.
///
/// Kill requests are only recorded.
pub struct FakeDispatcher {
    runtime_tx: tokio::sync::mpsc::Sender<RuntimeEvent>,
    submitted: Arc<Mutex<Vec<HostWork>>>,
    reply: DispatchReply,
    next_pid: i64,
}

impl FakeDispatcher {
    pub fn new(
        runtime_tx: tokio::sync::mpsc::Sender<RuntimeEvent>,
        submitted: Arc<Mutex<Vec<HostWork>>>,
    ) -> Self {
        Self {
            runtime_tx,
            submitted,
            reply: DispatchReply::Accept,
            next_pid: 1000,
        }
    }

    pub fn replying(mut self, reply: DispatchReply) -> Self {
        self.reply = reply;
        self
    }
}

impl DispatchBackend for FakeDispatcher {
    fn submit(
        &mut self,
        work: Vec<HostWork>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let submitted = Arc::clone(&self.submitted);

        Box::pin(async move {
            for item in work {
                {
                    let mut guard = submitted.lock().unwrap();
                    guard.push(item.clone());
                }

                let event = match item {
                    HostWork::Dispatch { host, ticket, .. } => {
                        let outcome = match self.reply {
                            DispatchReply::Accept => {
                                self.next_pid += 1;
                                DispatchOutcome::Accepted {
                                    pid: Some(self.next_pid),
                                }
                            }
                            DispatchReply::Refuse => DispatchOutcome::Refused("NAK".to_string()),
                            DispatchReply::Unreachable => {
                                DispatchOutcome::Unreachable("connection refused".to_string())
                            }
                        };
                        RuntimeEvent::DispatchFinished {
                            job: ticket.id(),
                            host,
                            outcome,
                        }
                    }
                    HostWork::Ping { host, .. } => RuntimeEvent::PingFinished {
                        host,
                        outcome: PingOutcome::Ack { report: None },
                    },
                    HostWork::Kill { .. } => continue,
                };

                tx.send(event).await.map_err(anyhow::Error::from)?;
            }
            Ok(())
        })
    }
}
