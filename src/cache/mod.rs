//! Read-through message cache
//!
//! Information Hiding:
//! - Map structure and memoization of missing turns hidden behind `get`
//! - Content normalization happens once, when a turn is first seen
//! - Lock-free concurrent access via DashMap; racing inserts keep the first value

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::transport::{ChannelId, RawTurn, Transport, TurnId};

/// A normalized, immutable view of a transport turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedTurn {
    pub content: String,
    pub reply_to: Option<TurnId>,
    pub author_id: u64,
    pub author_name: String,
}

impl From<RawTurn> for CachedTurn {
    fn from(raw: RawTurn) -> Self {
        // A turn with no text but a single footer is a re-displayed caption.
        let content = if raw.content.trim().is_empty() && raw.footers.len() == 1 {
            raw.footers.into_iter().next().unwrap_or_default()
        } else {
            raw.content
        };

        Self {
            content,
            reply_to: raw.reply_to.filter(|id| *id != 0),
            author_id: raw.author_id,
            author_name: raw.author_name,
        }
    }
}

/// No eviction: entries live as long as the process.
#[derive(Debug, Default)]
pub struct MessageCache {
    entries: DashMap<TurnId, Option<Arc<CachedTurn>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MessageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached turn, fetching it through the transport on first use.
    /// Turns the transport reports as missing are remembered as absent.
    pub async fn get(
        &self,
        transport: &dyn Transport,
        channel: ChannelId,
        id: TurnId,
    ) -> Option<Arc<CachedTurn>> {
        let cached = self.entries.get(&id).map(|entry| entry.value().clone());
        if let Some(turn) = cached {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return turn;
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("[MessageCache] Must fill cache on turn {}", id);

        let fetched = match transport.fetch_turn(channel, id).await {
            Ok(raw) => raw.map(|raw| Arc::new(CachedTurn::from(raw))),
            Err(e) => {
                // Not memoized: the next interaction may succeed.
                tracing::warn!("[MessageCache] Fetching turn {} failed: {}", id, e);
                return None;
            }
        };

        self.entries.entry(id).or_insert(fetched).value().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// (hits, misses)
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}
