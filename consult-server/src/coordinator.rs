//! The room coordinator: the per-socket event state machine.
//!
//! Every inbound socket event runs through [`Coordinator::handle`] as one
//! logical transaction over the registry, the offline queue, the stores
//! and the media pipeline. Events from the same socket are handled to
//! completion in arrival order (the connection loop awaits each one);
//! events from different sockets run concurrently.
//!
//! Fan-out goes through per-socket mailboxes (unbounded channels the
//! transport side drains), so broadcasting never awaits a slow peer. The
//! paced TTS stream is the only deliberate suspension point on a send
//! path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use consult_crypto::{AccountKind, TokenVerifier};
use consult_store::{MessageStore, Role, RoomStore};
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::error::EventError;
use crate::events::{ClientEvent, InvalidationReason, MessagePayload, Participants, ServerEvent};
use crate::gateway::MediaPipeline;
use crate::queue::{OfflineQueue, QueuedMessage};
use crate::registry::{Session, SessionRegistry};

/// TTS audio is framed in 16 KiB chunks, base64-encoded per frame.
const TTS_CHUNK_SIZE: usize = 16 * 1024;
/// Pacing delay between TTS frames so slow receivers keep up.
const TTS_FRAME_DELAY: Duration = Duration::from_millis(10);
/// Upper bound on one socket's accumulated audio upload.
const MAX_AUDIO_BUFFER: usize = 10 * 1024 * 1024;

pub struct Coordinator {
    registry:  SessionRegistry,
    queue:     OfflineQueue,
    rooms:     RoomStore,
    messages:  MessageStore,
    pipeline:  MediaPipeline,
    verifier:  TokenVerifier,
    /// socket → outbound event channel, registered at transport accept.
    mailboxes: Mutex<HashMap<Uuid, UnboundedSender<ServerEvent>>>,
    /// socket → accumulated audio upload, cleared on error or disconnect.
    audio:     Mutex<HashMap<Uuid, Vec<u8>>>,
}

impl Coordinator {
    pub fn new(
        rooms:             RoomStore,
        messages:          MessageStore,
        pipeline:          MediaPipeline,
        verifier:          TokenVerifier,
        offline_queue_cap: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry:  SessionRegistry::new(),
            queue:     OfflineQueue::new(offline_queue_cap),
            rooms,
            messages,
            pipeline,
            verifier,
            mailboxes: Mutex::new(HashMap::new()),
            audio:     Mutex::new(HashMap::new()),
        })
    }

    // ─── Transport lifecycle ─────────────────────────────────────────────────

    /// Register a socket's outbound mailbox. Called once per connection
    /// before any event is handled.
    pub fn connect(&self, socket_id: Uuid, mailbox: UnboundedSender<ServerEvent>) {
        self.mailboxes.lock().unwrap().insert(socket_id, mailbox);
    }

    /// Transport-level disconnect: run the leave semantics (idempotent),
    /// then forget the socket entirely.
    pub fn disconnect(&self, socket_id: Uuid) {
        self.leave(socket_id, InvalidationReason::ParticipantDisconnected);
        self.mailboxes.lock().unwrap().remove(&socket_id);
        self.audio.lock().unwrap().remove(&socket_id);
    }

    // ─── Event dispatch ──────────────────────────────────────────────────────

    /// Handle one inbound event. Failures are reported to the originating
    /// socket as an `error` event; the connection is never torn down here.
    pub async fn handle(&self, socket_id: Uuid, token: Option<&str>, event: ClientEvent) {
        let result = match event {
            ClientEvent::JoinRoom { room_id, role, language } => {
                self.join_room(socket_id, token, room_id, role, language).await
            }
            ClientEvent::SendMessage { content, language, is_audio } => {
                self.send_message(socket_id, content, language, is_audio).await
            }
            ClientEvent::AudioChunk { chunk, is_last, language } => {
                self.audio_chunk(socket_id, chunk, is_last, language).await
            }
            ClientEvent::RequestTts { text, language, message_id } => {
                self.request_tts(socket_id, text, language, message_id).await
            }
            ClientEvent::UpdateLanguage { language } => self.update_language(socket_id, language),
            ClientEvent::LeaveRoom => {
                self.leave(socket_id, InvalidationReason::ParticipantLeft);
                Ok(())
            }
        };

        if let Err(e) = result {
            tracing::warn!("[coordinator] socket {socket_id}: {e}");
            self.send_to(&socket_id, ServerEvent::Error { message: e.client_message() });
        }
    }

    // ─── join_room ───────────────────────────────────────────────────────────

    async fn join_room(
        &self,
        socket_id: Uuid,
        token:     Option<&str>,
        room_id:   String,
        role:      Role,
        language:  Option<String>,
    ) -> Result<(), EventError> {
        if room_id.trim().is_empty() {
            return Err(EventError::InvalidArgument("Room id is required".into()));
        }

        // Doctors authenticate via the handshake token; patients are
        // anonymous by construction and carry no identity at all.
        let doctor_id = match role {
            Role::Doctor => {
                let bearer = token
                    .ok_or_else(|| EventError::Unauthenticated("Authentication required".into()))?;
                let principal = self.verifier.verify(bearer)?;
                if principal.kind != AccountKind::Doctor {
                    return Err(EventError::Forbidden(
                        "Doctor role requires a doctor account".into(),
                    ));
                }
                Some(principal.id)
            }
            Role::Patient => None,
        };

        let room = self.rooms.get(&room_id)?;

        // The doctor slot is claimed by the HTTP join endpoint before the
        // socket arrives; here we only verify the membership is legal.
        if role == Role::Doctor {
            if let Some(claimant) = &room.doctor_id {
                if Some(claimant) != doctor_id.as_ref() {
                    return Err(EventError::Conflict(
                        "Room already has a doctor assigned".into(),
                    ));
                }
            }
        }

        let language = language
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| "en".to_string());

        self.registry.put(Session {
            socket_id,
            room_id: room_id.clone(),
            role,
            doctor_id: doctor_id.clone(),
            language,
            connected_at: Utc::now(),
        });
        tracing::info!("[coordinator] {role} joined room {room_id} on socket {socket_id}");

        self.send_to(&socket_id, ServerEvent::RoomJoined {
            room_id:      room_id.clone(),
            role,
            doctor_id:    room.doctor_id.clone().or_else(|| doctor_id.clone()),
            participants: self.participants(&room_id),
        });

        self.broadcast(&room_id, Some(&socket_id), ServerEvent::UserJoined {
            role,
            doctor_id: doctor_id.clone(),
        });

        // Messages that accumulated while the room was half-empty go to
        // the joiner only, oldest first.
        for entry in self.queue.drain(&room_id) {
            self.send_to(&socket_id, ServerEvent::NewMessage(MessagePayload {
                id:                  None,
                content:             entry.content,
                translated_content:  None,
                language:            entry.language,
                target_language:     None,
                sender_role:         entry.sender_role,
                sender_id:           entry.sender_id,
                timestamp:           entry.timestamp,
                is_audio_origin:     false,
                translation_errored: false,
            }));
        }

        // Once both roles are live, everyone (joiner included) gets the key.
        if self.registry.both_present(&room_id) {
            let key_hex = room.cipher_key.to_hex();
            for peer in self.registry.room(&room_id) {
                self.send_to(&peer.socket_id, ServerEvent::CipherKeyExchange {
                    cipher_key: key_hex.clone(),
                });
            }
        }

        Ok(())
    }

    fn participants(&self, room_id: &str) -> Participants {
        let sessions = self.registry.room(room_id);
        Participants {
            patient: sessions.iter().any(|s| s.role == Role::Patient),
            doctor:  sessions.iter().any(|s| s.role == Role::Doctor),
        }
    }

    // ─── send_message ────────────────────────────────────────────────────────

    async fn send_message(
        &self,
        socket_id: Uuid,
        content:   String,
        language:  Option<String>,
        is_audio:  bool,
    ) -> Result<(), EventError> {
        let session = self
            .registry
            .get(&socket_id)
            .ok_or_else(|| EventError::InvalidArgument("No active session".into()))?;

        if content.trim().is_empty() {
            return Err(EventError::InvalidArgument("Message content cannot be empty".into()));
        }

        let room = self.rooms.get(&session.room_id)?;

        // The room row is in hand for the key anyway, so a doctor sender
        // is re-checked against the current claimant here.
        if session.role == Role::Doctor && room.doctor_id != session.doctor_id {
            return Err(EventError::Forbidden("Doctor no longer holds this room".into()));
        }

        let language = language
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| session.language.clone());

        let peers: Vec<Session> = self
            .registry
            .room(&session.room_id)
            .into_iter()
            .filter(|s| s.socket_id != socket_id)
            .collect();

        // Rooms are two-party: the first peer's language is the one
        // translation target.
        let (target_language, translated, translation_errored) = match peers.first() {
            None => (None, None, false),
            Some(peer) if peer.language == language => (None, None, false),
            Some(peer) => {
                let (text, errored) = self
                    .pipeline
                    .translate(&content, &peer.language, Some(&language))
                    .await;
                let stored = if errored { None } else { Some(text) };
                (Some(peer.language.clone()), stored, errored)
            }
        };

        let record = self.messages.append(
            &session.room_id,
            session.role,
            session.doctor_id.as_deref(),
            &content,
            &language,
            target_language.as_deref(),
            translated.as_deref(),
            is_audio,
            &room.cipher_key,
        )?;

        if peers.is_empty() {
            self.queue.enqueue(&session.room_id, QueuedMessage {
                content:     record.content.clone(),
                sender_role: record.sender_role,
                sender_id:   record.sender_id.clone(),
                language:    record.language.clone(),
                timestamp:   record.timestamp,
            });
        } else {
            // On translation failure the peer still sees the original
            // text, flagged so the client can indicate it.
            let wire_translated = if translation_errored {
                Some(record.content.clone())
            } else {
                record.translated_content.clone()
            };
            let payload = MessagePayload {
                id:                  Some(record.id.clone()),
                content:             record.content.clone(),
                translated_content:  wire_translated,
                language:            record.language.clone(),
                target_language:     record.target_language.clone(),
                sender_role:         record.sender_role,
                sender_id:           record.sender_id.clone(),
                timestamp:           record.timestamp,
                is_audio_origin:     record.is_audio_origin,
                translation_errored,
            };
            for peer in &peers {
                self.send_to(&peer.socket_id, ServerEvent::NewMessage(payload.clone()));
            }

            if !translation_errored {
                if let (Some(translation), Some(target)) =
                    (&record.translated_content, &record.target_language)
                {
                    for peer in &peers {
                        self.send_to(&peer.socket_id, ServerEvent::MessageTranslated {
                            id:                 record.id.clone(),
                            translated_content: translation.clone(),
                            target_language:    target.clone(),
                        });
                    }
                }
            }
        }

        self.send_to(&socket_id, ServerEvent::MessageSent {
            id:        record.id,
            timestamp: record.timestamp,
        });

        Ok(())
    }

    // ─── audio_chunk ─────────────────────────────────────────────────────────

    async fn audio_chunk(
        &self,
        socket_id: Uuid,
        chunk:     String,
        is_last:   bool,
        language:  Option<String>,
    ) -> Result<(), EventError> {
        let result = self.audio_chunk_inner(socket_id, chunk, is_last, language).await;
        if result.is_err() {
            self.audio.lock().unwrap().remove(&socket_id);
        }
        result
    }

    async fn audio_chunk_inner(
        &self,
        socket_id: Uuid,
        chunk:     String,
        is_last:   bool,
        language:  Option<String>,
    ) -> Result<(), EventError> {
        let session = self
            .registry
            .get(&socket_id)
            .ok_or_else(|| EventError::InvalidArgument("No active session".into()))?;

        let bytes = BASE64
            .decode(chunk.as_bytes())
            .map_err(|_| EventError::InvalidArgument("Audio chunk is not valid base64".into()))?;

        {
            let mut buffers = self.audio.lock().unwrap();
            let buffer = buffers.entry(socket_id).or_default();
            if buffer.len() + bytes.len() > MAX_AUDIO_BUFFER {
                return Err(EventError::InvalidArgument("Audio upload too large".into()));
            }
            buffer.extend_from_slice(&bytes);
        }

        if !is_last {
            return Ok(());
        }

        let audio = self.audio.lock().unwrap().remove(&socket_id).unwrap_or_default();
        let language = language
            .filter(|l| !l.trim().is_empty())
            .unwrap_or(session.language);

        // STT failure degrades to an stt_error for the sender; nothing is
        // persisted or broadcast. An empty transcription is not a provider
        // failure: it proceeds and trips the empty-content rejection in
        // the send pipeline.
        let text = match self.pipeline.transcribe(&audio, Some(&language)).await {
            Some(text) => text,
            None => {
                self.send_to(&socket_id, ServerEvent::SttError {
                    message: "Transcription failed".into(),
                });
                return Ok(());
            }
        };

        self.send_to(&socket_id, ServerEvent::AudioTranscribed {
            text:     text.clone(),
            language: language.clone(),
        });

        self.send_message(socket_id, text, Some(language), true).await
    }

    // ─── request_tts ─────────────────────────────────────────────────────────

    async fn request_tts(
        &self,
        socket_id:  Uuid,
        text:       String,
        language:   Option<String>,
        message_id: Option<String>,
    ) -> Result<(), EventError> {
        let session = self
            .registry
            .get(&socket_id)
            .ok_or_else(|| EventError::InvalidArgument("No active session".into()))?;

        if text.trim().is_empty() {
            return Err(EventError::InvalidArgument("Text is required".into()));
        }

        let language = language
            .filter(|l| !l.trim().is_empty())
            .unwrap_or(session.language);

        let audio = match self.pipeline.synthesize(&text, &language).await {
            Some(audio) if !audio.is_empty() => audio,
            _ => {
                self.send_to(&socket_id, ServerEvent::TtsError {
                    message_id,
                    message: "Speech synthesis failed".into(),
                });
                return Ok(());
            }
        };

        // Requester-only, base64 framed, paced so a slow receiver is not
        // flooded. This yield between frames is deliberate.
        let total = audio.len().div_ceil(TTS_CHUNK_SIZE);
        for (index, frame) in audio.chunks(TTS_CHUNK_SIZE).enumerate() {
            self.send_to(&socket_id, ServerEvent::AudioStream {
                chunk:      BASE64.encode(frame),
                index,
                total,
                is_last:    index + 1 == total,
                message_id: message_id.clone(),
            });
            if index + 1 < total {
                tokio::time::sleep(TTS_FRAME_DELAY).await;
            }
        }

        Ok(())
    }

    // ─── update_language ─────────────────────────────────────────────────────

    fn update_language(&self, socket_id: Uuid, language: String) -> Result<(), EventError> {
        if language.trim().is_empty() {
            return Err(EventError::InvalidArgument("Language is required".into()));
        }
        if !self.registry.update_language(&socket_id, &language) {
            return Err(EventError::InvalidArgument("No active session".into()));
        }
        // No broadcast: peers learn the new language from the next
        // message's target; nothing is retroactively re-translated.
        self.send_to(&socket_id, ServerEvent::LanguageUpdated { language });
        Ok(())
    }

    // ─── leave / disconnect ──────────────────────────────────────────────────

    /// Shared teardown for `leave_room` and transport disconnects. A
    /// socket with no session is a no-op. Runs to completion; nothing
    /// here suspends.
    fn leave(&self, socket_id: Uuid, reason: InvalidationReason) {
        let Some(session) = self.registry.get(&socket_id) else {
            return;
        };

        self.broadcast(&session.room_id, Some(&socket_id), ServerEvent::CipherKeyInvalidated {
            reason,
        });
        self.broadcast(&session.room_id, Some(&socket_id), ServerEvent::UserLeft {
            role:      session.role,
            doctor_id: session.doctor_id.clone(),
        });

        // The key itself is not rotated: invalidation is advisory and the
        // room stays usable for later sessions.
        if session.role == Role::Doctor {
            if let Some(doctor_id) = &session.doctor_id {
                if let Err(e) = self.rooms.release_doctor(&session.room_id, doctor_id) {
                    tracing::warn!(
                        "[coordinator] release_doctor for room {} failed: {e}",
                        session.room_id
                    );
                }
            }
        }

        self.registry.remove(&socket_id);
        self.audio.lock().unwrap().remove(&socket_id);
        tracing::info!(
            "[coordinator] {} left room {} ({reason:?})",
            session.role,
            session.room_id
        );
    }

    // ─── Fan-out ─────────────────────────────────────────────────────────────

    fn send_to(&self, socket_id: &Uuid, event: ServerEvent) {
        let mailboxes = self.mailboxes.lock().unwrap();
        if let Some(mailbox) = mailboxes.get(socket_id) {
            if mailbox.send(event).is_err() {
                tracing::debug!("[coordinator] mailbox for socket {socket_id} is closed");
            }
        }
    }

    fn broadcast(&self, room_id: &str, except: Option<&Uuid>, event: ServerEvent) {
        for session in self.registry.room(room_id) {
            if Some(&session.socket_id) == except {
                continue;
            }
            self.send_to(&session.socket_id, event.clone());
        }
    }
}
