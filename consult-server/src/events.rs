//! Socket event vocabulary.
//!
//! Every frame on the wire is a JSON envelope `{"event": …, "data": …}`.
//! Inbound events come from clients ([`ClientEvent`]); outbound events go
//! to clients ([`ServerEvent`]). Data fields are camelCase for the
//! browser client; event names stay snake_case.

use chrono::{DateTime, Utc};
use consult_store::Role;
use serde::{Deserialize, Serialize};

// ─── Inbound ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_id:  String,
        role:     Role,
        language: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    SendMessage {
        content:  String,
        language: Option<String>,
        #[serde(default)]
        is_audio: bool,
    },
    #[serde(rename_all = "camelCase")]
    AudioChunk {
        /// Base64-encoded audio bytes.
        chunk:    String,
        is_last:  bool,
        language: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    RequestTts {
        text:       String,
        language:   Option<String>,
        message_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    UpdateLanguage { language: String },
    LeaveRoom,
}

// ─── Outbound ────────────────────────────────────────────────────────────────

/// Presence snapshot included in `room_joined`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participants {
    pub patient: bool,
    pub doctor:  bool,
}

/// Why peers should consider their key copy stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationReason {
    ParticipantLeft,
    ParticipantDisconnected,
}

/// A delivered message, either live or drained from the offline queue.
///
/// Drained messages predate delivery and carry no record id or
/// translation; those fields are simply absent on the wire.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id:                  Option<String>,
    pub content:             String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translated_content:  Option<String>,
    pub language:            String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_language:     Option<String>,
    pub sender_role:         Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id:           Option<String>,
    pub timestamp:           DateTime<Utc>,
    pub is_audio_origin:     bool,
    pub translation_errored: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    RoomJoined {
        room_id:      String,
        role:         Role,
        doctor_id:    Option<String>,
        participants: Participants,
    },
    #[serde(rename_all = "camelCase")]
    UserJoined {
        role:      Role,
        doctor_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    UserLeft {
        role:      Role,
        doctor_id: Option<String>,
    },
    NewMessage(MessagePayload),
    #[serde(rename_all = "camelCase")]
    MessageSent {
        id:        String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    MessageTranslated {
        id:                 String,
        translated_content: String,
        target_language:    String,
    },
    #[serde(rename_all = "camelCase")]
    CipherKeyExchange { cipher_key: String },
    #[serde(rename_all = "camelCase")]
    CipherKeyInvalidated { reason: InvalidationReason },
    #[serde(rename_all = "camelCase")]
    AudioTranscribed {
        text:     String,
        language: String,
    },
    #[serde(rename_all = "camelCase")]
    AudioStream {
        /// Base64-encoded audio frame.
        chunk:      String,
        index:      usize,
        total:      usize,
        is_last:    bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    SttError { message: String },
    #[serde(rename_all = "camelCase")]
    TtsError {
        #[serde(skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        message:    String,
    },
    #[serde(rename_all = "camelCase")]
    LanguageUpdated { language: String },
    Error { message: String },
}
