//! Backend clients
//!
//! Information Hiding:
//! - HTTP payload shapes for each backend stay inside their client module
//! - Callers see plain text, image payloads and `BridgeError`
//! - Shared session and load state are injected, never global

pub mod image_backend;
pub mod load_state;
pub mod params;
pub mod text_backend;

use async_trait::async_trait;
use std::future::Future;
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, BridgeResult};
use image_backend::ImagePayload;
use params::GenerationParams;

pub const USER_AGENT: &str = concat!("bridgebot/", env!("CARGO_PKG_VERSION"));

/// Anything that can continue a prompt with text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        negative_prompt: Option<&str>,
        params: &GenerationParams,
    ) -> BridgeResult<String>;
}

/// Anything that can turn a prompt into one or more images.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        negative_prompt: Option<&str>,
    ) -> BridgeResult<Vec<ImagePayload>>;
}

/// Runs `fut` unless shutdown fires first.
pub(crate) async fn until_cancelled<T, F>(shutdown: &CancellationToken, fut: F) -> BridgeResult<T>
where
    F: Future<Output = BridgeResult<T>>,
{
    tokio::select! {
        _ = shutdown.cancelled() => Err(BridgeError::Cancelled),
        result = fut => result,
    }
}
