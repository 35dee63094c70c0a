//! In-Memory Transport
//!
//! Information Hiding:
//! - Turn history kept in a HashMap behind an async RwLock
//! - Everything the bot sends is recorded as an event and stored as history,
//!   so later replies can walk back through it
//! - Suitable for testing and for the local console

use super::{
    Attachment, BotIdentity, ChannelId, InboundTurn, PlaceholderId, RawTurn, ReplyRef, Transport,
    TurnId,
};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Something the bot did through the transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Reply {
        id: TurnId,
        to: TurnId,
        text: String,
    },
    Placeholder {
        id: TurnId,
        to: TurnId,
        text: String,
    },
    Edit {
        id: TurnId,
        text: String,
        attachment: Option<Attachment>,
    },
    Typing(ChannelId),
}

pub struct InMemoryTransport {
    bot: BotIdentity,
    turns: Arc<RwLock<HashMap<TurnId, RawTurn>>>,
    events: Arc<RwLock<Vec<TransportEvent>>>,
    listener: Option<mpsc::UnboundedSender<TransportEvent>>,
    next_id: AtomicU64,
    fetches: AtomicUsize,
    fail_next: AtomicBool,
}

impl InMemoryTransport {
    pub fn new(bot: BotIdentity) -> Self {
        Self {
            bot,
            turns: Arc::new(RwLock::new(HashMap::new())),
            events: Arc::new(RwLock::new(Vec::new())),
            listener: None,
            next_id: AtomicU64::new(1000),
            fetches: AtomicUsize::new(0),
            fail_next: AtomicBool::new(false),
        }
    }

    /// Also streams every event to the returned receiver.
    pub fn with_listener(bot: BotIdentity) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut transport = Self::new(bot);
        transport.listener = Some(tx);
        (transport, rx)
    }

    fn allocate_id(&self) -> TurnId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn insert(&self, turn: RawTurn) {
        self.turns.write().await.insert(turn.id, turn);
    }

    pub async fn remove(&self, id: TurnId) {
        self.turns.write().await.remove(&id);
    }

    /// Stores a human turn in history and returns it as an inbound turn.
    pub async fn receive(
        &self,
        channel: ChannelId,
        author_id: u64,
        author_name: &str,
        content: &str,
        reply_to: Option<TurnId>,
    ) -> InboundTurn {
        let id = self.allocate_id();
        self.insert(RawTurn {
            id,
            content: content.to_string(),
            reply_to,
            author_id,
            author_name: author_name.to_string(),
            footers: Vec::new(),
        })
        .await;

        InboundTurn {
            id,
            channel,
            destination: channel.to_string(),
            author_id,
            author_name: author_name.to_string(),
            author_is_bot: false,
            content: content.to_string(),
            reply_to: reply_to.map(|turn| ReplyRef { channel, turn }),
        }
    }

    pub fn fail_next_fetch(&self) {
        self.fail_next.store(true, Ordering::Relaxed);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    pub async fn events(&self) -> Vec<TransportEvent> {
        self.events.read().await.clone()
    }

    async fn record(&self, event: TransportEvent) {
        if let Some(listener) = &self.listener {
            let _ = listener.send(event.clone());
        }
        self.events.write().await.push(event);
    }

    async fn store_bot_turn(&self, id: TurnId, to: TurnId, text: &str) {
        self.insert(RawTurn {
            id,
            content: text.to_string(),
            reply_to: Some(to),
            author_id: self.bot.id,
            author_name: self.bot.name.clone(),
            footers: Vec::new(),
        })
        .await;
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    fn bot_identity(&self) -> BotIdentity {
        self.bot.clone()
    }

    async fn fetch_turn(&self, _channel: ChannelId, id: TurnId) -> Result<Option<RawTurn>> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        if self.fail_next.swap(false, Ordering::Relaxed) {
            return Err(anyhow::anyhow!("transport unavailable"));
        }
        Ok(self.turns.read().await.get(&id).cloned())
    }

    async fn send_reply(&self, to: &InboundTurn, text: &str) -> Result<()> {
        let id = self.allocate_id();
        self.store_bot_turn(id, to.id, text).await;
        self.record(TransportEvent::Reply {
            id,
            to: to.id,
            text: text.to_string(),
        })
        .await;
        Ok(())
    }

    async fn send_placeholder(&self, to: &InboundTurn, text: &str) -> Result<PlaceholderId> {
        let id = self.allocate_id();
        self.store_bot_turn(id, to.id, text).await;
        self.record(TransportEvent::Placeholder {
            id,
            to: to.id,
            text: text.to_string(),
        })
        .await;
        Ok(PlaceholderId {
            channel: to.channel,
            turn: id,
        })
    }

    async fn edit_placeholder(
        &self,
        placeholder: PlaceholderId,
        text: &str,
        attachment: Option<Attachment>,
    ) -> Result<()> {
        {
            let mut turns = self.turns.write().await;
            let turn = turns
                .get_mut(&placeholder.turn)
                .ok_or_else(|| anyhow::anyhow!("placeholder {} not found", placeholder.turn))?;
            turn.content = text.to_string();
        }
        self.record(TransportEvent::Edit {
            id: placeholder.turn,
            text: text.to_string(),
            attachment,
        })
        .await;
        Ok(())
    }

    async fn trigger_typing(&self, channel: ChannelId) -> Result<()> {
        self.record(TransportEvent::Typing(channel)).await;
        Ok(())
    }
}
