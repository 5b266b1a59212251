//! Room keys and AES-256-CBC message-body encryption.
//!
//! A message body on the wire and at rest is `<iv-hex>:<ct-hex>`: a fresh
//! random 16-byte IV, a single colon, and the PKCS#7-padded ciphertext,
//! both lowercase hex. Keys are 32 random bytes rendered as 64 lowercase
//! hex characters; 44-character standard base64 is still accepted when
//! decoding keys written by older deployments.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes256;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Errors from [`decrypt`] and [`RoomKey::from_encoded`].
#[derive(Clone, Debug, PartialEq)]
pub enum CipherError {
    /// The key string is neither 64-char hex nor 44-char base64 of 32 bytes.
    InvalidKey,
    /// The body is structurally wrong: not exactly one colon, bad hex,
    /// IV not 16 bytes, or ciphertext not block-aligned.
    Malformed,
    /// The body parsed but will not decrypt under the supplied key
    /// (bad PKCS#7 padding or non-UTF-8 plaintext).
    Undecryptable,
}

impl std::fmt::Display for CipherError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidKey    => write!(f, "invalid room key encoding"),
            Self::Malformed     => write!(f, "malformed encrypted body"),
            Self::Undecryptable => write!(f, "body does not decrypt under this key"),
        }
    }
}
impl std::error::Error for CipherError {}

// ─── RoomKey ─────────────────────────────────────────────────────────────────

/// A 256-bit symmetric room key.
///
/// Generated once at room creation and never mutated. Participants receive
/// a copy over the wire on key exchange, rendered with [`RoomKey::to_hex`].
#[derive(Clone, PartialEq, Eq)]
pub struct RoomKey([u8; 32]);

impl RoomKey {
    /// Generate a fresh key from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        getrandom::getrandom(&mut bytes).expect("getrandom failed");
        Self(bytes)
    }

    /// Wrap raw key bytes (used by tests and key import).
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Decode a stored or transmitted key.
    ///
    /// Accepts the canonical 64-char lowercase hex rendering, and (for
    /// records written before the encoding was fixed) 44-char standard
    /// base64. New keys are always rendered hex.
    pub fn from_encoded(s: &str) -> Result<Self, CipherError> {
        if s.len() == 64 {
            let raw = hex::decode(s).map_err(|_| CipherError::InvalidKey)?;
            let bytes: [u8; 32] = raw.try_into().map_err(|_| CipherError::InvalidKey)?;
            return Ok(Self(bytes));
        }
        use base64::Engine;
        let raw = base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(|_| CipherError::InvalidKey)?;
        let bytes: [u8; 32] = raw.try_into().map_err(|_| CipherError::InvalidKey)?;
        Ok(Self(bytes))
    }

    /// Canonical wire/persisted rendering: 64 lowercase hex characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for RoomKey {
    // Never log key material.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RoomKey(..)")
    }
}

// ─── encrypt / decrypt ───────────────────────────────────────────────────────

/// Encrypt a UTF-8 plaintext into an `<iv-hex>:<ct-hex>` body.
///
/// A fresh random 16-byte IV is drawn per call, so two encryptions of the
/// same plaintext produce distinct bodies.
pub fn encrypt(plaintext: &str, key: &RoomKey) -> String {
    let mut iv = [0u8; 16];
    getrandom::getrandom(&mut iv).expect("getrandom failed");

    let ct = Aes256CbcEnc::new(&key.0.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    format!("{}:{}", hex::encode(iv), hex::encode(ct))
}

/// Decrypt an `<iv-hex>:<ct-hex>` body back into its plaintext.
pub fn decrypt(body: &str, key: &RoomKey) -> Result<String, CipherError> {
    if body.bytes().filter(|&b| b == b':').count() != 1 {
        return Err(CipherError::Malformed);
    }
    let (iv_hex, ct_hex) = body.split_once(':').ok_or(CipherError::Malformed)?;

    let iv_raw = hex::decode(iv_hex).map_err(|_| CipherError::Malformed)?;
    let iv: [u8; 16] = iv_raw.try_into().map_err(|_| CipherError::Malformed)?;

    let ct = hex::decode(ct_hex).map_err(|_| CipherError::Malformed)?;
    if ct.is_empty() || ct.len() % 16 != 0 {
        return Err(CipherError::Malformed);
    }

    let plain = Aes256CbcDec::new(&key.0.into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(&ct)
        .map_err(|_| CipherError::Undecryptable)?;

    String::from_utf8(plain).map_err(|_| CipherError::Undecryptable)
}
