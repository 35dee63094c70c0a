use std::sync::Arc;

use super::{speaker_name, ConversationThread, ThreadEntry};
use crate::cache::{CachedTurn, MessageCache};
use crate::config::BotConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::transport::{InboundTurn, Transport, TurnId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconstructedContext {
    pub thread: ConversationThread,
    /// False when the turn neither mentions the bot nor replies to it.
    pub is_valid: bool,
}

/// Walks reply chains of alternating human and bot turns.
#[derive(Debug, Clone)]
pub struct ContextReconstructor {
    max_depth: usize,
    speaker_prefix: String,
    user_name_default: String,
    bot_speaker: String,
}

impl ContextReconstructor {
    pub fn new(bot: &BotConfig) -> Self {
        Self {
            max_depth: bot.max_chain_depth,
            speaker_prefix: bot.speaker_prefix.clone(),
            user_name_default: bot.user_name_default.clone(),
            bot_speaker: format!("{}{}", bot.speaker_prefix, bot.name),
        }
    }

    async fn resolve(
        cache: &MessageCache,
        transport: &dyn Transport,
        inbound: &InboundTurn,
        id: TurnId,
    ) -> BridgeResult<Arc<CachedTurn>> {
        cache
            .get(transport, inbound.channel, id)
            .await
            .ok_or(BridgeError::UnresolvedTurn(id))
    }

    /// Fails when the chain cannot be resolved or contains a turn that is not a bot reply.
    /// Chains longer than the depth cap are truncated.
    pub async fn reconstruct(
        &self,
        cache: &MessageCache,
        transport: &dyn Transport,
        inbound: &InboundTurn,
    ) -> BridgeResult<ReconstructedContext> {
        let bot = transport.bot_identity();
        let mut is_valid = bot.is_mentioned_in(&inbound.content);
        let mut newest_first = Vec::new();

        let reply = inbound
            .reply_to
            .filter(|reply| reply.channel == inbound.channel);

        if let Some(reply) = reply {
            let mut next = Some(reply.turn);
            let mut hops = 0;

            while let Some(bot_turn_id) = next.take() {
                if hops >= self.max_depth {
                    tracing::debug!(
                        "[ContextReconstructor] Chain from turn {} truncated at {} hops",
                        inbound.id,
                        hops
                    );
                    break;
                }
                hops += 1;
                is_valid = true;

                let bot_turn = Self::resolve(cache, transport, inbound, bot_turn_id).await?;
                let human_id = match bot_turn.reply_to {
                    Some(id) if bot_turn.author_id == bot.id => id,
                    _ => {
                        return Err(BridgeError::ForeignAuthor {
                            turn: bot_turn_id,
                            author: bot_turn.author_id,
                        })
                    }
                };
                let human = Self::resolve(cache, transport, inbound, human_id).await?;

                newest_first.push(ThreadEntry {
                    is_bot: true,
                    speaker: self.bot_speaker.clone(),
                    text: bot_turn.content.clone(),
                });
                newest_first.push(ThreadEntry {
                    is_bot: false,
                    speaker: format!(
                        "{}{}",
                        self.speaker_prefix,
                        speaker_name(&human.author_name, &self.user_name_default)
                    ),
                    text: bot.strip_mentions(&human.content).trim().to_string(),
                });

                next = human.reply_to;
            }
        }

        newest_first.reverse();
        Ok(ReconstructedContext {
            thread: ConversationThread::new(newest_first),
            is_valid,
        })
    }
}
