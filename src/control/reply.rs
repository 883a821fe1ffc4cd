// src/control/reply.rs

use crate::errors::ClusterqError;

/// End-of-stream sentinel for multi-record replies.
pub const END_OF_STREAM: u8 = 0;

/// Response to one control command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlReply {
    /// Single newline-terminated message.
    Text(String),
    /// One bracket record per line, followed by a `\0` byte.
    Records(Vec<String>),
}

impl ControlReply {
    pub fn text(message: impl Into<String>) -> Self {
        ControlReply::Text(message.into())
    }

    pub fn error(message: impl AsRef<str>) -> Self {
        ControlReply::Text(format!("[E] {}", message.as_ref()))
    }

    pub fn permission_denied(seq: u32) -> Self {
        ControlReply::error(format!(
            "permission denied: you are not the owner of sequence {seq}"
        ))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ControlReply::Text(t) if t.starts_with("[E]"))
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            ControlReply::Text(text) => {
                let mut out = text.trim_end_matches('\n').as_bytes().to_vec();
                out.push(b'\n');
                out
            }
            ControlReply::Records(records) => {
                let mut out = Vec::new();
                for r in records {
                    out.extend_from_slice(r.as_bytes());
                    out.push(b'\n');
                }
                out.push(END_OF_STREAM);
                out
            }
        }
    }

    /// Decode a complete reply as read from the socket.
    pub fn decode(bytes: &[u8]) -> Self {
        match bytes.iter().position(|b| *b == END_OF_STREAM) {
            Some(end) => {
                let body = String::from_utf8_lossy(&bytes[..end]);
                ControlReply::Records(
                    body.lines()
                        .filter(|l| !l.trim().is_empty())
                        .map(str::to_string)
                        .collect(),
                )
            }
            None => ControlReply::Text(
                String::from_utf8_lossy(bytes)
                    .trim_end_matches(['\n', '\r'])
                    .to_string(),
            ),
        }
    }
}

impl From<ClusterqError> for ControlReply {
    fn from(err: ClusterqError) -> Self {
        ControlReply::error(err.to_string())
    }
}
