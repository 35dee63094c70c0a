use std::sync::Arc;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::task::JoinHandle;

use super::Orchestrator;
use crate::transport::InboundTurn;

#[derive(Debug)]
pub enum OrchestratorMessage {
    Inbound(InboundTurn),
    /// Stop taking turns and wait for the ones in flight.
    Shutdown,
}

/// Front door for inbound turns; each one is handled on its own task.
pub struct OrchestratorHandle {
    sender: Sender<OrchestratorMessage>,
    task: JoinHandle<()>,
}

impl OrchestratorHandle {
    pub fn new(orchestrator: Arc<Orchestrator>, buffer_size: usize) -> Self {
        let (sender, receiver) = channel(buffer_size);
        let task = tokio::spawn(orchestrator_actor(receiver, orchestrator));
        Self { sender, task }
    }

    pub async fn send_message(&self, message: OrchestratorMessage) -> anyhow::Result<()> {
        self.sender
            .send(message)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send message to orchestrator: {}", e))
    }

    pub async fn submit(&self, inbound: InboundTurn) -> anyhow::Result<()> {
        self.send_message(OrchestratorMessage::Inbound(inbound)).await
    }

    /// Asks the actor to stop and waits until every accepted turn is done.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        // The actor may already be gone if the shutdown token fired.
        let _ = self.sender.send(OrchestratorMessage::Shutdown).await;
        self.task
            .await
            .map_err(|e| anyhow::anyhow!("Orchestrator actor panicked: {}", e))
    }
}

async fn orchestrator_actor(
    mut receiver: Receiver<OrchestratorMessage>,
    orchestrator: Arc<Orchestrator>,
) {
    let shutdown = orchestrator.state().shutdown().clone();
    let mut in_flight: Vec<JoinHandle<()>> = Vec::new();

    tracing::info!("[Orchestrator] Actor started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("[Orchestrator] Shutdown signalled");
                break;
            }
            message = receiver.recv() => match message {
                Some(OrchestratorMessage::Inbound(inbound)) => {
                    tracing::debug!(
                        "[Orchestrator] Turn {} received on channel {}",
                        inbound.id,
                        inbound.channel
                    );
                    in_flight.retain(|task| !task.is_finished());
                    in_flight.push(orchestrator.dispatch(inbound));
                }
                Some(OrchestratorMessage::Shutdown) => {
                    tracing::info!("[Orchestrator] Shutdown requested");
                    break;
                }
                None => {
                    tracing::info!("[Orchestrator] Channel closed, shutting down");
                    break;
                }
            }
        }
    }

    let pending = in_flight.len();
    if pending > 0 {
        tracing::info!("[Orchestrator] Waiting for {} turn(s) in flight", pending);
    }
    futures::future::join_all(in_flight).await;
    tracing::info!("[Orchestrator] Actor stopped");
}
