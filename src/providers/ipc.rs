use crate::providers::json::JsonSerializerImpl;
use serde::Deserialize;
use serde::Serialize;
use std::path::Path;
use std::path::PathBuf;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixListener;

/// Upper bound on a single frame; anything larger is treated as a broken peer.
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// One published notification: a topic string and an opaque payload.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Envelope {
    pub topic: String,
    pub payload: String,
}

impl Envelope {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    pub fn matches_any(&self, prefixes: &[String]) -> bool {
        prefixes.iter().any(|p| self.topic.starts_with(p.as_str()))
    }
}

/// Wire frame exchanged over the local sockets. Each frame is a 4-byte
/// big-endian length followed by the JSON encoding of this enum.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IpcFrame {
    Subscribe { prefixes: Vec<String> },
    Ready,
    Message(Envelope),
}

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode frame: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("frame of {0} bytes exceeds the maximum frame size")]
    TooLarge(usize),
    #[error("cannot bind unix socket at {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot connect to unix socket at {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("timed out talking to {0}")]
    Timeout(PathBuf),
    #[error("peer closed the connection")]
    Closed,
    #[error("unexpected frame from peer")]
    UnexpectedFrame,
}

pub fn encode_frame(frame: &IpcFrame) -> Result<Vec<u8>, IpcError> {
    let body = JsonSerializerImpl::to_bytes(frame).map_err(IpcError::Encode)?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(IpcError::TooLarge(body.len()));
    }

    let mut bytes = Vec::with_capacity(4 + body.len());
    bytes.extend_from_slice(&(body.len() as u32).to_be_bytes());
    bytes.extend_from_slice(&body);
    Ok(bytes)
}

pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &IpcFrame,
) -> Result<(), IpcError> {
    let bytes = encode_frame(frame)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame. A clean EOF before the length header yields `Ok(None)`.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<IpcFrame>, IpcError> {
    let mut len_buf = [0u8; 4];
    if let Err(e) = reader.read_exact(&mut len_buf).await {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            return Ok(None);
        }
        return Err(IpcError::Io(e));
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(IpcError::TooLarge(len));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;

    let frame = JsonSerializerImpl::from_bytes::<IpcFrame>(&body).map_err(IpcError::Decode)?;
    Ok(Some(frame))
}

/// Binds a unix listener, removing a stale socket file left by a previous run.
pub fn bind_socket(path: &Path) -> Result<UnixListener, IpcError> {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(IpcError::Bind {
                path: path.to_path_buf(),
                source: e,
            })
        }
    }

    UnixListener::bind(path).map_err(|e| IpcError::Bind {
        path: path.to_path_buf(),
        source: e,
    })
}

pub fn remove_socket(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("could not remove socket {}: {}", path.display(), e);
        }
    }
}
