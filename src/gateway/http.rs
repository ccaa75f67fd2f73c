//! HTTP implementation of the remote gateway
//!
//! Reply and speech endpoints follow the web service the front end was
//! built against: JSON chat messages in, `{content}` out; `{text}` in, an
//! `audio/*` body out; multipart `file` in, `{text}` out.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::conversation::HistoryMessage;

use super::{GatewayError, RemoteGateway};

/// Endpoint locations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Base URL without trailing slash
    pub base_url: String,
    pub reply_path: String,
    pub synthesis_path: String,
    pub transcription_path: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".to_string(),
            reply_path: "/api/chat".to_string(),
            synthesis_path: "/api/speech".to_string(),
            transcription_path: "/api/speech".to_string(),
        }
    }
}

impl GatewayConfig {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Serialize)]
struct ReplyRequest<'a> {
    messages: &'a [HistoryMessage],
}

#[derive(Deserialize)]
struct ReplyBody {
    #[serde(alias = "text")]
    content: String,
}

#[derive(Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct TranscriptionBody {
    text: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// [`RemoteGateway`] over reqwest
#[derive(Debug, Clone)]
pub struct HttpGateway {
    config: GatewayConfig,
    client: Client,
}

impl HttpGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self { config, client })
    }

    /// Map a non-success response to a status error, using `{error}` if present
    async fn status_error(response: Response, fallback: &str) -> GatewayError {
        let status = response.status().as_u16();
        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => format!("{} ({})", fallback, status),
        };
        warn!(status, %message, "gateway request rejected");
        GatewayError::Status { status, message }
    }
}

fn transport(e: reqwest::Error) -> GatewayError {
    GatewayError::Transport(e.to_string())
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn get_reply(&self, history: &[HistoryMessage]) -> Result<String, GatewayError> {
        let url = self.config.url(&self.config.reply_path);
        debug!(%url, messages = history.len(), "requesting reply");

        let response = self
            .client
            .post(&url)
            .json(&ReplyRequest { messages: history })
            .send()
            .await
            .map_err(transport)?;

        if !response.status().is_success() {
            return Err(Self::status_error(response, "failed to get response").await);
        }

        let body: ReplyBody = response
            .json()
            .await
            .map_err(|e| GatewayError::Protocol(e.to_string()))?;
        if body.content.trim().is_empty() {
            return Err(GatewayError::Protocol("empty reply".to_string()));
        }
        Ok(body.content)
    }

    async fn synthesize(&self, text: &str) -> Result<Bytes, GatewayError> {
        let url = self.config.url(&self.config.synthesis_path);
        debug!(%url, chars = text.len(), "requesting speech");

        let response = self
            .client
            .post(&url)
            .json(&SynthesisRequest { text })
            .send()
            .await
            .map_err(transport)?;

        if !response.status().is_success() {
            return Err(Self::status_error(response, "failed to generate speech").await);
        }

        let is_audio = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("audio/"))
            .unwrap_or(false);
        if !is_audio {
            let message = match response.json::<ErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => "response was not audio".to_string(),
            };
            return Err(GatewayError::Protocol(message));
        }

        let audio = response.bytes().await.map_err(transport)?;
        if audio.is_empty() {
            return Err(GatewayError::Protocol("empty audio received".to_string()));
        }
        Ok(audio)
    }

    async fn transcribe(&self, audio: Bytes) -> Result<String, GatewayError> {
        let url = self.config.url(&self.config.transcription_path);
        debug!(%url, bytes = audio.len(), "requesting transcription");

        let part = Part::bytes(audio.to_vec())
            .file_name("audio.webm")
            .mime_str("audio/webm")
            .map_err(transport)?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(transport)?;

        if !response.status().is_success() {
            return Err(Self::status_error(response, "failed to transcribe audio").await);
        }

        let body: TranscriptionBody = response
            .json()
            .await
            .map_err(|e| GatewayError::Protocol(e.to_string()))?;
        Ok(body.text.trim().to_string())
    }
}
