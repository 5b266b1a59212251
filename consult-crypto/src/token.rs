//! Bearer-token verification.
//!
//! Tokens are compact HS256-signed envelopes carrying the account id,
//! email, account kind and the usual `iat`/`exp` pair. One symmetric
//! secret is configured at startup; the coordinator only ever calls
//! [`TokenVerifier::verify`]; issuance lives in the HTTP layer, which
//! uses [`TokenVerifier::sign`] so both sides agree on the envelope.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

// ─── Claims ──────────────────────────────────────────────────────────────────

/// What an account token asserts about its bearer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    User,
    Doctor,
}

impl std::fmt::Display for AccountKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User   => write!(f, "user"),
            Self::Doctor => write!(f, "doctor"),
        }
    }
}

/// The signed token envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Account id (UUID string).
    pub sub:   String,
    pub email: String,
    pub kind:  AccountKind,
    pub iat:   u64,
    pub exp:   u64,
}

/// A successfully verified bearer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub id:    String,
    pub email: String,
    pub kind:  AccountKind,
}

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub enum TokenError {
    /// The signature checked out but `exp` is in the past.
    Expired,
    /// Anything else: bad signature, wrong algorithm, garbled envelope.
    Invalid,
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Expired => write!(f, "token expired"),
            Self::Invalid => write!(f, "invalid token"),
        }
    }
}
impl std::error::Error for TokenError {}

// ─── TokenVerifier ───────────────────────────────────────────────────────────

/// Verifies (and, for the HTTP layer and tests, issues) HS256 tokens.
pub struct TokenVerifier {
    decoding: DecodingKey,
    encoding: EncodingKey,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            encoding: EncodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Validate a bearer string and return who it belongs to.
    pub fn verify(&self, bearer: &str) -> Result<Principal, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let data = decode::<Claims>(bearer, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            }
        })?;

        Ok(Principal {
            id:    data.claims.sub,
            email: data.claims.email,
            kind:  data.claims.kind,
        })
    }

    /// Issue a token for `id`/`email`/`kind` valid for `ttl`.
    pub fn sign(
        &self,
        id:    &str,
        email: &str,
        kind:  AccountKind,
        ttl:   Duration,
    ) -> Result<String, TokenError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock before epoch")
            .as_secs();
        let claims = Claims {
            sub:   id.to_string(),
            email: email.to_string(),
            kind,
            iat:   now,
            exp:   now + ttl.as_secs(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|_| TokenError::Invalid)
    }
}
