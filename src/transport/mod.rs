//! Chat transport abstraction
//!
//! Information Hiding:
//! - Message delivery, rendering and attachment upload live behind this trait
//! - The core only sees turn identifiers, text and binary payloads
//! - Any chat protocol can be plugged in without touching the orchestrator

use anyhow::Result;
use async_trait::async_trait;

use crate::core::image_backend::ImagePayload;

pub mod memory;

pub use memory::{InMemoryTransport, TransportEvent};

pub type TurnId = u64;
pub type ChannelId = u64;

/// The bot's own account on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    pub id: u64,
    pub name: String,
}

impl BotIdentity {
    /// Both mention forms the transport may use for the bot.
    pub fn mention_tokens(&self) -> [String; 2] {
        [format!("<@{}>", self.id), format!("<@!{}>", self.id)]
    }

    pub fn is_mentioned_in(&self, text: &str) -> bool {
        self.mention_tokens().iter().any(|m| text.contains(m.as_str()))
    }

    pub fn strip_mentions(&self, text: &str) -> String {
        let [plain, nick] = self.mention_tokens();
        text.replace(&plain, "").replace(&nick, "")
    }
}

/// A turn as fetched from transport history.
#[derive(Debug, Clone, Default)]
pub struct RawTurn {
    pub id: TurnId,
    pub content: String,
    pub reply_to: Option<TurnId>,
    pub author_id: u64,
    pub author_name: String,
    /// Footer-style annotations (e.g. embed footers) carried by the turn.
    pub footers: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyRef {
    pub channel: ChannelId,
    pub turn: TurnId,
}

/// A freshly delivered turn that may need an answer.
#[derive(Debug, Clone, Default)]
pub struct InboundTurn {
    pub id: TurnId,
    pub channel: ChannelId,
    /// Routing key for per-destination configuration (guild, workspace, ...).
    pub destination: String,
    pub author_id: u64,
    pub author_name: String,
    pub author_is_bot: bool,
    pub content: String,
    pub reply_to: Option<ReplyRef>,
}

/// Handle to an interim reply that will be edited once generation completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaceholderId {
    pub channel: ChannelId,
    pub turn: TurnId,
}

#[derive(Debug, Clone)]
pub struct Attachment {
    pub file_name: String,
    pub payload: ImagePayload,
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn bot_identity(&self) -> BotIdentity;

    /// Returns `Ok(None)` when the turn does not exist or is not accessible.
    async fn fetch_turn(&self, channel: ChannelId, id: TurnId) -> Result<Option<RawTurn>>;

    async fn send_reply(&self, to: &InboundTurn, text: &str) -> Result<()>;

    async fn send_placeholder(&self, to: &InboundTurn, text: &str) -> Result<PlaceholderId>;

    async fn edit_placeholder(
        &self,
        placeholder: PlaceholderId,
        text: &str,
        attachment: Option<Attachment>,
    ) -> Result<()>;

    /// Show a typing indicator in the channel (optional)
    async fn trigger_typing(&self, _channel: ChannelId) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mentions_both_forms() {
        let bot = BotIdentity {
            id: 99,
            name: "Bot".to_string(),
        };
        assert!(bot.is_mentioned_in("hey <@99> there"));
        assert!(bot.is_mentioned_in("<@!99>"));
        assert!(!bot.is_mentioned_in("<@98>"));
        assert_eq!(bot.strip_mentions("<@99> hi <@!99>"), " hi ");
    }
}
