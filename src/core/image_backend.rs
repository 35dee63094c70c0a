use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use super::params::Passthrough;
use super::{until_cancelled, ImageGenerator, USER_AGENT};
use crate::config::ImageBackendConfig;
use crate::error::{BridgeError, BridgeResult};

const INVALID_SESSION: &str = "invalid_session_id";

/// Encoded format of a generated payload, derived from its MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadFormat {
    Png,
    Jpeg,
    Webp,
    Gif,
    Mp4,
    Webm,
    Other(String),
}

impl PayloadFormat {
    pub fn from_mime(mime: &str) -> Self {
        match mime.trim().to_ascii_lowercase().as_str() {
            "image/png" => PayloadFormat::Png,
            "image/jpeg" | "image/jpg" => PayloadFormat::Jpeg,
            "image/webp" => PayloadFormat::Webp,
            "image/gif" => PayloadFormat::Gif,
            "video/mp4" => PayloadFormat::Mp4,
            "video/webm" => PayloadFormat::Webm,
            other => PayloadFormat::Other(other.to_string()),
        }
    }

    pub fn extension(&self) -> &str {
        match self {
            PayloadFormat::Png => "png",
            PayloadFormat::Jpeg => "jpg",
            PayloadFormat::Webp => "webp",
            PayloadFormat::Gif => "gif",
            PayloadFormat::Mp4 => "mp4",
            PayloadFormat::Webm => "webm",
            PayloadFormat::Other(mime) => match mime.rsplit_once('/') {
                Some((_, subtype))
                    if !subtype.is_empty()
                        && subtype.chars().all(|c| c.is_ascii_alphanumeric()) =>
                {
                    subtype
                }
                _ => "bin",
            },
        }
    }

    /// Animated or video payloads are never composited.
    pub fn is_animated(&self) -> bool {
        matches!(
            self,
            PayloadFormat::Gif | PayloadFormat::Mp4 | PayloadFormat::Webm
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub format: PayloadFormat,
}

impl ImagePayload {
    /// Parses `data:<mime>;base64,<data>`; bare base64 is taken as PNG.
    pub fn from_data_url(entry: &str) -> BridgeResult<Self> {
        let (format, data) = match entry.strip_prefix("data:") {
            Some(rest) => {
                let (header, data) = rest
                    .split_once(',')
                    .ok_or_else(|| BridgeError::Malformed("data URL without payload".to_string()))?;
                let mime = header.strip_suffix(";base64").ok_or_else(|| {
                    BridgeError::Malformed(format!("data URL is not base64: {}", header))
                })?;
                (PayloadFormat::from_mime(mime), data)
            }
            None => (PayloadFormat::Png, entry),
        };

        let bytes = BASE64
            .decode(data.trim())
            .map_err(|e| BridgeError::Malformed(format!("image base64 decode failed: {}", e)))?;
        Ok(Self { bytes, format })
    }
}

/// The one image backend session shared by every caller.
#[derive(Debug, Default)]
pub struct ImageSession {
    token: RwLock<Option<String>>,
}

impl ImageSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn current(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    /// Concurrent refreshes simply overwrite each other.
    pub async fn replace(&self, token: String) {
        *self.token.write().await = Some(token);
    }
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    images: Vec<String>,
    #[serde(default)]
    error_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

pub struct ImageBackendClient {
    client: Client,
    base_url: String,
    images: u32,
    passthrough: Passthrough,
    session: Arc<ImageSession>,
    shutdown: CancellationToken,
}

impl ImageBackendClient {
    pub fn new(
        config: &ImageBackendConfig,
        session: Arc<ImageSession>,
        shutdown: CancellationToken,
    ) -> BridgeResult<Self> {
        let passthrough = Passthrough::resolve(&config.passthrough)?;
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            images: config.images,
            passthrough,
            session,
            shutdown,
        })
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        payload: &Value,
    ) -> BridgeResult<T> {
        let url = format!("{}{}", self.base_url, endpoint);
        tracing::debug!("[ImageBackend] POST {} {}", url, payload);

        let response = until_cancelled(&self.shutdown, async {
            self.client
                .post(&url)
                .json(payload)
                .send()
                .await
                .map_err(BridgeError::from)
        })
        .await?;

        let status = response.status();
        let body = until_cancelled(&self.shutdown, async {
            response.text().await.map_err(BridgeError::from)
        })
        .await?;

        if !status.is_success() {
            return Err(BridgeError::BackendStatus {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|e| BridgeError::Malformed(e.to_string()))
    }

    async fn new_session(&self) -> BridgeResult<String> {
        let response: SessionResponse = self.post_json("/API/GetNewSession", &json!({})).await?;
        tracing::info!("[ImageBackend] Obtained new session");
        self.session.replace(response.session_id.clone()).await;
        Ok(response.session_id)
    }

    async fn session_id(&self) -> BridgeResult<String> {
        match self.session.current().await {
            Some(token) => Ok(token),
            None => self.new_session().await,
        }
    }

    async fn generate_with_session(
        &self,
        session_id: &str,
        prompt: &str,
        negative_prompt: Option<&str>,
    ) -> BridgeResult<Vec<ImagePayload>> {
        let mut payload = Map::new();
        payload.insert("session_id".to_string(), json!(session_id));
        payload.insert("prompt".to_string(), json!(prompt));
        payload.insert(
            "negativeprompt".to_string(),
            json!(negative_prompt.unwrap_or_default()),
        );
        payload.insert("images".to_string(), json!(self.images));
        self.passthrough.merge_into(&mut payload);

        let response: GenerateResponse = self
            .post_json("/API/GenerateText2Image", &Value::Object(payload))
            .await?;

        if response.error_id.as_deref() == Some(INVALID_SESSION) {
            return Err(BridgeError::InvalidSession);
        }
        if let Some(error) = response.error.or(response.error_id) {
            return Err(BridgeError::Malformed(format!("image backend error: {}", error)));
        }

        let mut payloads = Vec::with_capacity(response.images.len());
        for entry in &response.images {
            match ImagePayload::from_data_url(entry) {
                Ok(payload) => payloads.push(payload),
                Err(e) => tracing::warn!("[ImageBackend] Skipping unreadable image: {}", e),
            }
        }
        Ok(payloads)
    }
}

#[async_trait]
impl ImageGenerator for ImageBackendClient {
    async fn generate(
        &self,
        prompt: &str,
        negative_prompt: Option<&str>,
    ) -> BridgeResult<Vec<ImagePayload>> {
        let session_id = self.session_id().await?;
        match self
            .generate_with_session(&session_id, prompt, negative_prompt)
            .await
        {
            Err(BridgeError::InvalidSession) => {
                tracing::warn!("[ImageBackend] Session invalidated, retrying once with a new one");
                let fresh = self.new_session().await?;
                self.generate_with_session(&fresh, prompt, negative_prompt)
                    .await
            }
            other => other,
        }
    }
}
