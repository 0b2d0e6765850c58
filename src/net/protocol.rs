//! Wire format: one JSON envelope per line.
//!
//! ```text
//! {"Type":"StopJob","Data":"[\"Job1\"]","Timestamp":"2024-05-01T10:00:00Z"}
//! ```
//!
//! `Data` carries the payload serialized as a JSON string: job names for
//! commands, a `JobState` list for status pushes, a message for errors.

use crate::backup::JobState;
use crate::error::{BackupError, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

pub const DEFAULT_PORT: u16 = 9000;

/// Longest accepted line, newline excluded.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MessageType {
    JobStatusRequest,
    JobStatus,
    StartJob,
    PauseJob,
    ResumeJob,
    StopJob,
    Ping,
    Pong,
    Error,
}

impl MessageType {
    pub fn is_command(self) -> bool {
        matches!(
            self,
            MessageType::StartJob
                | MessageType::PauseJob
                | MessageType::ResumeJob
                | MessageType::StopJob
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkMessage {
    #[serde(rename = "Type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl NetworkMessage {
    pub fn new(kind: MessageType) -> Self {
        Self {
            kind,
            data: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_payload<T: Serialize + ?Sized>(kind: MessageType, payload: &T) -> Result<Self> {
        Ok(Self {
            data: Some(serde_json::to_string(payload)?),
            ..Self::new(kind)
        })
    }

    pub fn command(kind: MessageType, job_names: &[String]) -> Result<Self> {
        if !kind.is_command() {
            return Err(BackupError::Protocol(format!("{:?} is not a job command", kind)));
        }
        Self::with_payload(kind, job_names)
    }

    pub fn status(states: &[JobState]) -> Result<Self> {
        Self::with_payload(MessageType::JobStatus, states)
    }

    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            data: serde_json::to_string(&message).ok(),
            ..Self::new(MessageType::Error)
        }
    }

    /// Decodes `Data`; `None` when the envelope carries no payload.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match self.data.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
        }
    }

    pub fn job_names(&self) -> Result<Vec<String>> {
        Ok(self.payload()?.unwrap_or_default())
    }

    pub fn job_states(&self) -> Result<Vec<JobState>> {
        Ok(self.payload()?.unwrap_or_default())
    }

    /// Error text, accepting a bare string as well as a serialized one.
    pub fn error_text(&self) -> Option<String> {
        let raw = self.data.as_deref()?;
        Some(serde_json::from_str::<String>(raw).unwrap_or_else(|_| raw.to_string()))
    }

    pub fn encode(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn decode(line: &str) -> Result<Self> {
        serde_json::from_str(line.trim())
            .map_err(|e| BackupError::Protocol(format!("malformed message: {}", e)))
    }
}

/// Reads newline-delimited envelopes. A partially received line is kept
/// across calls, so `next_message` can sit in a `select!`.
pub struct MessageReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            buf: Vec::new(),
        }
    }

    /// Next envelope, or `None` once the peer has closed the stream.
    pub async fn next_message(&mut self) -> Result<Option<NetworkMessage>> {
        loop {
            let budget = (MAX_LINE_BYTES + 1).saturating_sub(self.buf.len()) as u64;
            let read = (&mut self.inner).take(budget).read_until(b'\n', &mut self.buf).await?;
            if read == 0 {
                self.buf.clear();
                return Ok(None);
            }
            if self.buf.last() != Some(&b'\n') {
                if self.buf.len() > MAX_LINE_BYTES {
                    self.buf.clear();
                    return Err(BackupError::Protocol(format!(
                        "message exceeds {} bytes",
                        MAX_LINE_BYTES
                    )));
                }
                continue;
            }

            let line = std::mem::take(&mut self.buf);
            let text = std::str::from_utf8(&line)
                .map_err(|_| BackupError::Protocol("message is not UTF-8".to_string()))?;
            if text.trim().is_empty() {
                continue;
            }
            return NetworkMessage::decode(text).map(Some);
        }
    }
}

pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &NetworkMessage,
) -> Result<()> {
    writer.write_all(message.encode()?.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
