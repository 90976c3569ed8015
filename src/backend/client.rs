//! The backend client trait and its TCP implementation

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::BackendError;

use super::wire::{self, ClientFrame, ServerFrame};

/// Everything needed to open one streaming session.
#[derive(Debug, Clone)]
pub struct OpenSessionRequest {
    pub prompt: String,
    pub image_png: Option<Vec<u8>>,
    pub hardware_id: String,
    pub session_id: String,
}

/// One element of an open session's response stream.
#[derive(Debug, Clone)]
pub enum ServerChunk {
    Text(String),
    Audio(Vec<u8>),
    /// Terminal: normal completion.
    End,
    /// Terminal: backend-reported failure.
    Error(String),
}

/// Acknowledgement of an out-of-band cancel.
#[derive(Debug, Clone)]
pub struct CancelAck {
    pub accepted: bool,
    pub cancelled_session_ids: Vec<String>,
}

/// The receiving side of an open session.
///
/// Yields chunks in backend order; `None` means the transport closed
/// without a terminal frame.
#[derive(Debug)]
pub struct SessionStream {
    rx: mpsc::Receiver<ServerChunk>,
}

impl SessionStream {
    pub fn from_channel(rx: mpsc::Receiver<ServerChunk>) -> Self {
        Self { rx }
    }

    pub async fn next(&mut self) -> Option<ServerChunk> {
        self.rx.recv().await
    }
}

/// The seam between the session manager and the remote backend.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Open a duplex session and return its response stream.
    async fn open_session(
        &self,
        request: OpenSessionRequest,
    ) -> Result<SessionStream, BackendError>;

    /// Cancel whatever sessions the backend holds for this hardware id.
    /// Out-of-band: safe to call while a stream is open, or when none is.
    async fn cancel_session(&self, hardware_id: &str) -> Result<CancelAck, BackendError>;
}

/// Backend client over TCP with length-prefixed JSON frames.
pub struct TcpBackendClient {
    addr: String,
}

impl TcpBackendClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl BackendClient for TcpBackendClient {
    async fn open_session(
        &self,
        request: OpenSessionRequest,
    ) -> Result<SessionStream, BackendError> {
        let stream = TcpStream::connect(self.addr.as_str()).await?;
        let (mut read_half, mut write_half) = stream.into_split();

        let session_id = request.session_id.clone();
        wire::write_frame(
            &mut write_half,
            &ClientFrame::OpenSession {
                prompt: request.prompt,
                image_png: request.image_png,
                hardware_id: request.hardware_id,
                session_id: session_id.clone(),
            },
        )
        .await?;

        debug!(session = %session_id, addr = %self.addr, "session stream opened");

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            // Keeps the write half open for the stream's lifetime.
            let _write_half = write_half;

            loop {
                match wire::read_frame::<_, ServerFrame>(&mut read_half).await {
                    Ok(Some(frame)) => {
                        let chunk = match frame {
                            ServerFrame::TextChunk { text, .. } => ServerChunk::Text(text),
                            ServerFrame::AudioChunk { data, .. } => ServerChunk::Audio(data),
                            ServerFrame::End { .. } => ServerChunk::End,
                            ServerFrame::Error { message, .. } => ServerChunk::Error(message),
                            ServerFrame::CancelAck { .. } => {
                                warn!(session = %session_id, "unexpected cancel ack on stream");
                                continue;
                            }
                        };
                        let terminal =
                            matches!(chunk, ServerChunk::End | ServerChunk::Error(_));
                        if tx.send(chunk).await.is_err() || terminal {
                            return;
                        }
                    }
                    // Transport closed; the consumer sees the channel end.
                    Ok(None) => return,
                    Err(e) => {
                        let _ = tx.send(ServerChunk::Error(e.to_string())).await;
                        return;
                    }
                }
            }
        });

        Ok(SessionStream::from_channel(rx))
    }

    async fn cancel_session(&self, hardware_id: &str) -> Result<CancelAck, BackendError> {
        let mut stream = TcpStream::connect(self.addr.as_str()).await?;

        wire::write_frame(
            &mut stream,
            &ClientFrame::CancelSession {
                hardware_id: hardware_id.to_string(),
            },
        )
        .await?;

        match wire::read_frame::<_, ServerFrame>(&mut stream).await? {
            Some(ServerFrame::CancelAck {
                accepted,
                cancelled_session_ids,
            }) => Ok(CancelAck {
                accepted,
                cancelled_session_ids,
            }),
            Some(other) => Err(BackendError::Remote(format!(
                "expected cancel ack, got {other:?}"
            ))),
            None => Err(BackendError::Closed),
        }
    }
}
