//! Wire framing for the backend protocol
//!
//! Frames are JSON, prefixed with a 4-byte little-endian length and
//! capped at 1 MiB.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::BackendError;

/// Upper bound on a single frame body.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Frames sent by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    OpenSession {
        prompt: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image_png: Option<Vec<u8>>,
        hardware_id: String,
        session_id: String,
    },
    CancelSession {
        hardware_id: String,
    },
}

/// Frames sent by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    TextChunk {
        session_id: String,
        text: String,
    },
    AudioChunk {
        session_id: String,
        data: Vec<u8>,
    },
    /// Terminal: the backend finished the session normally.
    End {
        session_id: String,
    },
    /// Terminal: the backend failed the session.
    Error {
        session_id: String,
        message: String,
    },
    CancelAck {
        accepted: bool,
        cancelled_session_ids: Vec<String>,
    },
}

/// Write one length-prefixed frame.
pub async fn write_frame<W, T>(writer: &mut W, frame: &T) -> Result<(), BackendError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(frame)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(BackendError::FrameTooLarge { len: body.len() });
    }

    writer.write_all(&(body.len() as u32).to_le_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame. `Ok(None)` on a clean EOF at a frame
/// boundary.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, BackendError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(BackendError::FrameTooLarge { len });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(serde_json::from_slice(&body)?))
}
