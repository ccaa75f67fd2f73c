//! Remote gateway module
//!
//! Single-shot requests to the reply, speech synthesis and transcription
//! endpoints. No retries; every failure carries a readable cause.

mod http;

pub use http::{GatewayConfig, HttpGateway};

use async_trait::async_trait;
use bytes::Bytes;

use crate::conversation::HistoryMessage;

/// Failure of a gateway request
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The request never got a response
    #[error("request failed: {0}")]
    Transport(String),

    /// The service answered with a non-success status
    #[error("service returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The response did not have the expected shape
    #[error("unexpected response: {0}")]
    Protocol(String),
}

/// Outbound requests issued by the coordinator
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Generate the next machine turn from the full history
    async fn get_reply(&self, history: &[HistoryMessage]) -> Result<String, GatewayError>;

    /// Turn reply text into an audio clip
    async fn synthesize(&self, text: &str) -> Result<Bytes, GatewayError>;

    /// Turn a recorded clip into text
    async fn transcribe(&self, audio: Bytes) -> Result<String, GatewayError>;
}
