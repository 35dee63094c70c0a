//! bridgebot - bridges a chat surface to a text backend and an image backend
//!
//! Inbound turns are answered by rebuilding the reply chain they belong to,
//! assembling a prompt and dispatching it to the right backend.

pub mod cache;
pub mod cli;
pub mod config;
pub mod context;
pub mod control;
pub mod core;
pub mod error;
pub mod orchestrator;
pub mod prompt;
pub mod state;
pub mod transport;
pub mod utils;

pub use config::Settings;
pub use error::{BridgeError, BridgeResult};
pub use orchestrator::{Orchestrator, OrchestratorHandle, Outcome};
pub use state::BridgeState;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::core::text_backend::TextBackendClient;
use crate::transport::{InboundTurn, Transport};

/// A running bridge: shared state, backend clients and the orchestrator actor.
pub struct Bridge {
    state: Arc<BridgeState>,
    text_client: Arc<TextBackendClient>,
    orchestrator: Arc<Orchestrator>,
    handle: OrchestratorHandle,
}

impl Bridge {
    /// Builds both backend clients over one shared state and starts the orchestrator.
    /// Fails fast on misconfigured passthrough parameters.
    pub fn start(
        settings: &Settings,
        transport: Arc<dyn Transport>,
        shutdown: CancellationToken,
    ) -> BridgeResult<Self> {
        let state = Arc::new(BridgeState::new(shutdown));
        let text_client = Arc::new(state.text_client(settings)?);
        let image_client = Arc::new(state.image_client(settings)?);

        let orchestrator = Arc::new(Orchestrator::new(
            settings,
            state.clone(),
            transport,
            text_client.clone(),
            image_client,
        ));
        let handle = OrchestratorHandle::new(
            orchestrator.clone(),
            settings.system.channel_buffer_size,
        );

        tracing::info!("[Bridge] Started as '{}'", settings.bot.name);
        Ok(Self {
            state,
            text_client,
            orchestrator,
            handle,
        })
    }

    pub fn state(&self) -> &Arc<BridgeState> {
        &self.state
    }

    /// The text client, shared with the control plane.
    pub fn text_client(&self) -> &Arc<TextBackendClient> {
        &self.text_client
    }

    /// For callers that want the outcome of a turn instead of fire-and-forget.
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub async fn submit(&self, inbound: InboundTurn) -> anyhow::Result<()> {
        self.handle.submit(inbound).await
    }

    /// Stops accepting turns and waits for those in flight.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.handle.shutdown().await?;
        let (hits, misses) = self.state.cache().stats();
        tracing::info!(
            "[Bridge] Shutdown complete (cache hits: {}, misses: {})",
            hits,
            misses
        );
        Ok(())
    }
}
