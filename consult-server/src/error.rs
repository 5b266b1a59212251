//! Coordinator error taxonomy.
//!
//! Every failed event handler resolves to one of these kinds; the
//! coordinator emits the display string as an `error` event to the
//! originating socket only. Peers never see a sender's failures.

use consult_crypto::TokenError;
use consult_store::StoreError;

#[derive(Debug)]
pub enum EventError {
    /// Malformed payload, empty content, out-of-range pagination.
    InvalidArgument(String),
    /// Missing, invalid, or expired token on a doctor event.
    Unauthenticated(String),
    /// Token kind mismatch or wrong-doctor join.
    Forbidden(String),
    /// Unknown room id.
    NotFound,
    /// Doctor slot already held by someone else.
    Conflict(String),
    /// Unexpected downstream failure; details go to the server log only.
    Internal(String),
}

impl EventError {
    /// Short kind tag for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Unauthenticated(_) => "unauthenticated",
            Self::Forbidden(_)       => "forbidden",
            Self::NotFound           => "not_found",
            Self::Conflict(_)        => "conflict",
            Self::Internal(_)        => "internal",
        }
    }

    /// The message carried by the `error` event.
    pub fn client_message(&self) -> String {
        match self {
            Self::InvalidArgument(msg)
            | Self::Unauthenticated(msg)
            | Self::Forbidden(msg)
            | Self::Conflict(msg) => msg.clone(),
            Self::NotFound        => "Room not found".into(),
            // Internal details stay server-side.
            Self::Internal(_)     => "Internal server error".into(),
        }
    }
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::Unauthenticated(msg) => write!(f, "unauthenticated: {msg}"),
            Self::Forbidden(msg)       => write!(f, "forbidden: {msg}"),
            Self::NotFound             => write!(f, "room not found"),
            Self::Conflict(msg)        => write!(f, "conflict: {msg}"),
            Self::Internal(detail)     => write!(f, "internal: {detail}"),
        }
    }
}

impl std::error::Error for EventError {}

impl From<StoreError> for EventError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidArgument(msg) => Self::InvalidArgument(msg),
            StoreError::NotFound             => Self::NotFound,
            StoreError::AlreadyClaimed       => Self::Conflict("Room already has a doctor assigned".into()),
            StoreError::NotClaimant          => Self::Internal("release by non-claimant".into()),
            StoreError::Decrypt(e)           => Self::Internal(format!("decrypt: {e}")),
            StoreError::Db(e)                => Self::Internal(format!("db: {e}")),
        }
    }
}

impl From<TokenError> for EventError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Expired => Self::Unauthenticated("Token expired".into()),
            TokenError::Invalid => Self::Unauthenticated("Invalid token".into()),
        }
    }
}
