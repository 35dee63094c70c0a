//! Backend orchestration
//!
//! Information Hiding:
//! - One inbound turn runs through reconstruct, assemble, generate, render
//! - Which backend runs and how its result is turned into a reply stays here
//! - Context errors end the interaction quietly; backend failures become
//!   a rendered failure instead of an error
//! - Every turn runs as its own task; nothing orders turns against each other

mod composite;
mod handle;
mod render;

pub use composite::{composite_grid, prepare_delivery};
pub use handle::{OrchestratorHandle, OrchestratorMessage};
pub use render::{clean_caption, render_text_reply, ERROR_SENTINEL};

use anyhow::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::{BotConfig, Settings};
use crate::context::ContextReconstructor;
use crate::core::{ImageGenerator, TextGenerator};
use crate::error::{BridgeError, BridgeResult};
use crate::prompt::{AssembledPrompt, Intent, PromptAssembler, PromptRequest};
use crate::state::BridgeState;
use crate::transport::{Attachment, InboundTurn, Transport};

/// Where an interaction currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    AwaitingGeneration,
    TextReady,
    ImageReady,
    Failed,
    Rendering,
    Done,
}

/// How an interaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Not addressed to the bot, or sent by a bot.
    Ignored,
    /// Context could not be built; nothing was sent.
    Aborted,
    TextReplied,
    ImageDelivered,
    ImageFailed,
}

struct Progress {
    turn: u64,
    stage: Stage,
}

impl Progress {
    fn new(turn: u64) -> Self {
        Self {
            turn,
            stage: Stage::Idle,
        }
    }

    fn advance(&mut self, next: Stage) {
        tracing::debug!(
            "[Orchestrator] Turn {}: {:?} -> {:?}",
            self.turn,
            self.stage,
            next
        );
        self.stage = next;
    }
}

pub struct Orchestrator {
    bot: BotConfig,
    reconstructor: ContextReconstructor,
    assembler: PromptAssembler,
    state: Arc<BridgeState>,
    transport: Arc<dyn Transport>,
    text: Arc<dyn TextGenerator>,
    image: Arc<dyn ImageGenerator>,
}

impl Orchestrator {
    pub fn new(
        settings: &Settings,
        state: Arc<BridgeState>,
        transport: Arc<dyn Transport>,
        text: Arc<dyn TextGenerator>,
        image: Arc<dyn ImageGenerator>,
    ) -> Self {
        Self {
            bot: settings.bot.clone(),
            reconstructor: ContextReconstructor::new(&settings.bot),
            assembler: PromptAssembler::new(settings),
            state,
            transport,
            text,
            image,
        }
    }

    pub fn state(&self) -> &Arc<BridgeState> {
        &self.state
    }

    /// Runs `handle_turn` on its own task. Errors are logged there and go no further.
    pub fn dispatch(self: &Arc<Self>, inbound: InboundTurn) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            match orchestrator.handle_turn(&inbound).await {
                Ok(outcome) => {
                    tracing::debug!("[Orchestrator] Turn {} finished: {:?}", inbound.id, outcome)
                }
                Err(e) if is_cancelled(&e) => {
                    tracing::debug!("[Orchestrator] Turn {} cancelled by shutdown", inbound.id)
                }
                Err(e) => {
                    tracing::error!("[Orchestrator] Turn {} failed: {:#}", inbound.id, e)
                }
            }
        })
    }

    pub async fn handle_turn(&self, inbound: &InboundTurn) -> Result<Outcome> {
        if inbound.author_is_bot {
            return Ok(Outcome::Ignored);
        }

        let identity = self.transport.bot_identity();
        let context = match self
            .reconstructor
            .reconstruct(self.state.cache(), self.transport.as_ref(), inbound)
            .await
        {
            Ok(context) => context,
            Err(e) => return abort_or_fail(inbound, e),
        };
        if !context.is_valid {
            return Ok(Outcome::Ignored);
        }

        if let Err(e) = self.transport.trigger_typing(inbound.channel).await {
            tracing::debug!("[Orchestrator] Typing indicator failed: {}", e);
        }

        let assembled = match self
            .assembler
            .assemble(inbound, &identity, &context.thread, self.text.as_ref())
            .await
        {
            Ok(assembled) => assembled,
            Err(e) => return abort_or_fail(inbound, e),
        };

        let mut progress = Progress::new(inbound.id);
        progress.advance(Stage::AwaitingGeneration);

        let outcome = match &assembled.intent {
            Intent::Text => self.reply_with_text(inbound, &assembled, &mut progress).await?,
            Intent::Image(_) => self.reply_with_image(inbound, &assembled, &mut progress).await?,
        };

        progress.advance(Stage::Done);
        Ok(outcome)
    }

    async fn reply_with_text(
        &self,
        inbound: &InboundTurn,
        assembled: &AssembledPrompt,
        progress: &mut Progress,
    ) -> Result<Outcome> {
        let raw = match &assembled.request {
            Some(request) => self.run_text(request).await?,
            None => None,
        };

        let reply = match raw {
            Some(raw) => {
                progress.advance(Stage::TextReady);
                render_text_reply(&raw, self.bot.max_reply_chars)
            }
            None => {
                progress.advance(Stage::Failed);
                ERROR_SENTINEL.to_string()
            }
        };

        progress.advance(Stage::Rendering);
        self.transport.send_reply(inbound, &reply).await?;
        Ok(Outcome::TextReplied)
    }

    async fn reply_with_image(
        &self,
        inbound: &InboundTurn,
        assembled: &AssembledPrompt,
        progress: &mut Progress,
    ) -> Result<Outcome> {
        let caption = match &assembled.request {
            Some(request) => match self.run_text(request).await? {
                Some(raw) => clean_caption(&raw, &assembled.input),
                None => assembled.input.clone(),
            },
            None => assembled.input.clone(),
        };

        let Some((prompt, negative_prompt)) = assembled.image_prompt(&caption) else {
            return Err(anyhow::anyhow!("image reply requested for a text intent"));
        };
        let shown_caption = render::escape_for_transport(&caption);

        let placeholder = self
            .transport
            .send_placeholder(
                inbound,
                &format!("{} {}", shown_caption, self.bot.image_pending_message),
            )
            .await?;

        let delivery = match self.image.generate(&prompt, negative_prompt.as_deref()).await {
            Ok(images) => {
                tracing::info!(
                    "[Orchestrator] Turn {}: image backend returned {} item(s)",
                    inbound.id,
                    images.len()
                );
                prepare_delivery(images).unwrap_or_else(|e| {
                    tracing::warn!("[Orchestrator] Could not prepare images: {}", e);
                    None
                })
            }
            Err(e) if e.is_cancelled() => return Err(e.into()),
            Err(e) => {
                tracing::warn!("[Orchestrator] Image generation failed: {}", e);
                None
            }
        };

        match delivery {
            Some(payload) => {
                progress.advance(Stage::ImageReady);
                progress.advance(Stage::Rendering);
                let attachment = Attachment {
                    file_name: format!("{}.{}", inbound.id, payload.format.extension()),
                    payload,
                };
                self.transport
                    .edit_placeholder(placeholder, &shown_caption, Some(attachment))
                    .await?;
                Ok(Outcome::ImageDelivered)
            }
            None => {
                progress.advance(Stage::Failed);
                progress.advance(Stage::Rendering);
                self.transport
                    .edit_placeholder(placeholder, &self.bot.image_failure_message, None)
                    .await?;
                Ok(Outcome::ImageFailed)
            }
        }
    }

    /// `Ok(None)` when the backend failed; shutdown is the only error returned.
    async fn run_text(&self, request: &PromptRequest) -> BridgeResult<Option<String>> {
        match self
            .text
            .generate(
                &request.prompt,
                request.negative_prompt.as_deref(),
                &request.params,
            )
            .await
        {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                tracing::warn!("[Orchestrator] Text generation failed: {}", e);
                Ok(None)
            }
        }
    }
}

fn abort_or_fail(inbound: &InboundTurn, error: BridgeError) -> Result<Outcome> {
    if error.is_context_error() {
        tracing::warn!(
            "[Orchestrator] Dropping turn {} from {}: {}",
            inbound.id,
            inbound.author_name,
            error
        );
        Ok(Outcome::Aborted)
    } else {
        Err(error.into())
    }
}

fn is_cancelled(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<BridgeError>(),
        Some(BridgeError::Cancelled)
    )
}
