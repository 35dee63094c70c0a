//! Process-wide bridge state
//!
//! Information Hiding:
//! - The message cache, image session, model load flag and shutdown signal
//!   live in one object shared by `Arc`
//! - Components get the piece they need through accessors, never through globals
//! - Backend clients are built here so they always share the same state

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::cache::MessageCache;
use crate::config::Settings;
use crate::core::image_backend::{ImageBackendClient, ImageSession};
use crate::core::load_state::ModelLoadState;
use crate::core::text_backend::TextBackendClient;
use crate::error::BridgeResult;

#[derive(Debug, Default)]
pub struct BridgeState {
    cache: MessageCache,
    load_state: Arc<ModelLoadState>,
    image_session: Arc<ImageSession>,
    shutdown: CancellationToken,
}

impl BridgeState {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            shutdown,
            ..Default::default()
        }
    }

    pub fn cache(&self) -> &MessageCache {
        &self.cache
    }

    pub fn load_state(&self) -> &Arc<ModelLoadState> {
        &self.load_state
    }

    pub fn image_session(&self) -> &Arc<ImageSession> {
        &self.image_session
    }

    pub fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Fails on passthrough parameters the backend cannot take.
    pub fn text_client(&self, settings: &Settings) -> BridgeResult<TextBackendClient> {
        TextBackendClient::new(
            &settings.text_backend,
            self.load_state.clone(),
            self.shutdown.clone(),
        )
    }

    pub fn image_client(&self, settings: &Settings) -> BridgeResult<ImageBackendClient> {
        ImageBackendClient::new(
            &settings.image_backend,
            self.image_session.clone(),
            self.shutdown.clone(),
        )
    }
}
