//! Remote processing backend client
//!
//! One duplex stream per utterance: the client sends an open request, the
//! backend answers with interleaved text and audio chunks followed by
//! exactly one terminal frame. Cancellation is out-of-band, keyed by
//! hardware id.

mod client;
pub mod wire;

pub use client::{
    BackendClient, CancelAck, OpenSessionRequest, ServerChunk, SessionStream, TcpBackendClient,
};
