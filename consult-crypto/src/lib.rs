//! Cryptographic primitives for consult rooms.
//!
//! Provides:
//! - `RoomKey` — 256-bit symmetric room key, rendered lowercase hex
//! - AES-256-CBC encryption/decryption of `<iv-hex>:<ct-hex>` message bodies
//! - HS256 bearer-token verification (`TokenVerifier`)

#![deny(unsafe_code)]

pub mod cipher;
pub mod token;

pub use cipher::{decrypt, encrypt, CipherError, RoomKey};
pub use token::{AccountKind, Claims, Principal, TokenError, TokenVerifier};
