//! Store error taxonomy.

use consult_crypto::CipherError;

/// The error type returned by every store operation.
#[derive(Debug)]
pub enum StoreError {
    /// Caller-supplied argument out of range or inconsistent
    /// (pagination bounds, role/sender-id mismatch).
    InvalidArgument(String),
    /// No such room.
    NotFound,
    /// `claim_doctor` lost to a different doctor already holding the slot.
    AlreadyClaimed,
    /// `release_doctor` by a doctor that does not hold the slot.
    NotClaimant,
    /// A persisted body would not decrypt under the supplied key.
    Decrypt(CipherError),
    /// Underlying SQLite failure.
    Db(rusqlite::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::NotFound             => write!(f, "room not found"),
            Self::AlreadyClaimed       => write!(f, "room already has a doctor assigned"),
            Self::NotClaimant          => write!(f, "doctor does not hold this room"),
            Self::Decrypt(e)           => write!(f, "stored body unreadable: {e}"),
            Self::Db(e)                => write!(f, "database error: {e}"),
        }
    }
}
impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Db(e)
    }
}

impl From<CipherError> for StoreError {
    fn from(e: CipherError) -> Self {
        Self::Decrypt(e)
    }
}
