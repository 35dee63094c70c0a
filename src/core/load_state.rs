//! Text model load state shared between the control plane and generation calls.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, BridgeResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedModel {
    pub name: String,
    pub adapters: Vec<String>,
}

/// Single writer (the control plane), many pollers (generation calls).
#[derive(Debug, Default)]
pub struct ModelLoadState {
    unloaded: AtomicBool,
    remembered: Mutex<Option<LoadedModel>>,
}

impl ModelLoadState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_unloaded(&self) -> bool {
        self.unloaded.load(Ordering::Acquire)
    }

    /// Records the model to restore later and raises the flag.
    /// Returns false when an unload is already in effect.
    pub async fn begin_unload(&self, model: LoadedModel) -> bool {
        let mut remembered = self.remembered.lock().await;
        if self.is_unloaded() {
            return false;
        }
        *remembered = Some(model);
        self.unloaded.store(true, Ordering::Release);
        true
    }

    /// Lowers the flag and forgets the model.
    /// Used when the unload request itself failed.
    pub async fn abort_unload(&self) {
        let mut remembered = self.remembered.lock().await;
        remembered.take();
        self.unloaded.store(false, Ordering::Release);
    }

    pub async fn remembered(&self) -> Option<LoadedModel> {
        self.remembered.lock().await.clone()
    }

    /// Clears the flag once the remembered model is back.
    pub async fn finish_reload(&self) {
        let mut remembered = self.remembered.lock().await;
        remembered.take();
        self.unloaded.store(false, Ordering::Release);
    }

    /// Sleeps in `poll` steps until the flag is clear.
    pub async fn wait_until_loaded(
        &self,
        poll: Duration,
        shutdown: &CancellationToken,
    ) -> BridgeResult<()> {
        let mut announced = false;
        while self.is_unloaded() {
            if !announced {
                tracing::info!("[ModelLoadState] Text model is unloaded, holding generation");
                announced = true;
            }
            tokio::select! {
                _ = shutdown.cancelled() => return Err(BridgeError::Cancelled),
                _ = sleep(poll) => {}
            }
        }
        if announced {
            tracing::info!("[ModelLoadState] Text model is back, resuming generation");
        }
        Ok(())
    }
}
