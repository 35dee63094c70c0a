//! Error taxonomy for a single bridged interaction.

use crate::transport::TurnId;

pub type BridgeResult<T> = Result<T, BridgeError>;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("reply target {0} could not be resolved")]
    UnresolvedTurn(TurnId),

    #[error("turn {turn} in the reply chain is not a bot reply (author {author})")]
    ForeignAuthor { turn: TurnId, author: u64 },

    #[error("no template configured for {0}")]
    MissingTemplate(String),

    #[error("image backend rejected the session again after a refresh")]
    InvalidSession,

    #[error("backend returned status {status}: {body}")]
    BackendStatus { status: u16, body: String },

    #[error("malformed backend response: {0}")]
    Malformed(String),

    #[error("unsupported value for passthrough parameter '{key}': {kind}")]
    UnsupportedPassthrough { key: String, kind: &'static str },

    #[error("image compositing failed: {0}")]
    Composite(String),

    #[error("interrupted by shutdown")]
    Cancelled,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl BridgeError {
    /// Errors that stop an interaction before any backend is contacted.
    /// These are logged and the turn is dropped without a reply.
    pub fn is_context_error(&self) -> bool {
        matches!(
            self,
            BridgeError::UnresolvedTurn(_)
                | BridgeError::ForeignAuthor { .. }
                | BridgeError::MissingTemplate(_)
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, BridgeError::Cancelled)
    }
}
