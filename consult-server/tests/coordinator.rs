//! End-to-end coordinator scenarios: mock gateways, in-memory SQLite,
//! channel mailboxes standing in for sockets.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use consult_crypto::{AccountKind, TokenVerifier};
use consult_server::coordinator::Coordinator;
use consult_server::events::{ClientEvent, InvalidationReason, ServerEvent};
use consult_server::gateway::{GatewayError, MediaPipeline, Synthesizer, Transcriber, Translator};
use consult_store::{Database, MemoryCache, MessageStore, Role, Room, RoomStore};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use uuid::Uuid;

const SECRET: &str = "integration-secret";
const DOCTOR_ID: &str = "6a1f0d8e-0000-4000-8000-00000000000d";
const OTHER_DOCTOR_ID: &str = "6a1f0d8e-0000-4000-8000-00000000000e";

// ─── Mock gateways ───────────────────────────────────────────────────────────

/// Dictionary translator; flips to failure mode when `fail` is set.
struct MockTranslator {
    fail: bool,
}

#[async_trait]
impl Translator for MockTranslator {
    async fn translate(&self, text: &str, target: &str, _: Option<&str>) -> Result<String, GatewayError> {
        if self.fail {
            return Err(GatewayError::new("provider down"));
        }
        Ok(match (text, target) {
            ("hello", "es")     => "hola".to_string(),
            ("sip water", "es") => "beba agua".to_string(),
            (text, target)      => format!("{text} [{target}]"),
        })
    }
}

struct MockTranscriber {
    reply: Option<&'static str>,
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, _: &[u8], _: Option<&str>) -> Result<String, GatewayError> {
        match self.reply {
            Some(text) => Ok(text.to_string()),
            None       => Err(GatewayError::new("asr down")),
        }
    }
}

struct MockSynthesizer {
    audio: Option<Vec<u8>>,
}

#[async_trait]
impl Synthesizer for MockSynthesizer {
    async fn synthesize(&self, _: &str, _: &str) -> Result<Vec<u8>, GatewayError> {
        match &self.audio {
            Some(audio) => Ok(audio.clone()),
            None        => Err(GatewayError::new("tts down")),
        }
    }
}

// ─── Harness ─────────────────────────────────────────────────────────────────

struct Harness {
    coordinator: Arc<Coordinator>,
    rooms:       RoomStore,
    messages:    MessageStore,
    verifier:    TokenVerifier,
}

struct HarnessOptions {
    translator_fails: bool,
    transcriber:      Option<&'static str>,
    synthesizer:      Option<Vec<u8>>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            translator_fails: false,
            transcriber:      Some("sip water"),
            synthesizer:      Some(vec![7u8; 1000]),
        }
    }
}

fn harness(options: HarnessOptions) -> Harness {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let pipeline = MediaPipeline::new(
        Arc::new(MemoryCache::new()),
        Arc::new(MockTranslator { fail: options.translator_fails }),
        Arc::new(MockTranscriber { reply: options.transcriber }),
        Arc::new(MockSynthesizer { audio: options.synthesizer }),
    );
    Harness {
        coordinator: Coordinator::new(
            RoomStore::new(db.clone()),
            MessageStore::new(db.clone()),
            pipeline,
            TokenVerifier::new(SECRET),
            256,
        ),
        rooms:    RoomStore::new(db.clone()),
        messages: MessageStore::new(db),
        verifier: TokenVerifier::new(SECRET),
    }
}

impl Harness {
    fn socket(&self) -> TestSocket {
        let (tx, rx) = unbounded_channel();
        let id = Uuid::new_v4();
        self.coordinator.connect(id, tx);
        TestSocket { id, rx }
    }

    fn doctor_token(&self, doctor_id: &str) -> String {
        self.verifier
            .sign(doctor_id, "doctor@example.com", AccountKind::Doctor, Duration::from_secs(300))
            .unwrap()
    }

    fn user_token(&self) -> String {
        self.verifier
            .sign("u-1", "user@example.com", AccountKind::User, Duration::from_secs(300))
            .unwrap()
    }

    /// Simulate the HTTP join endpoint claiming the slot, then join on
    /// the socket.
    async fn join_doctor(&self, socket: &TestSocket, room: &Room, doctor_id: &str, language: &str) {
        self.rooms.claim_doctor(&room.id, doctor_id).unwrap();
        let token = self.doctor_token(doctor_id);
        self.coordinator
            .handle(socket.id, Some(&token), ClientEvent::JoinRoom {
                room_id:  room.id.clone(),
                role:     Role::Doctor,
                language: Some(language.to_string()),
            })
            .await;
    }

    async fn join_patient(&self, socket: &TestSocket, room: &Room, language: &str) {
        self.coordinator
            .handle(socket.id, None, ClientEvent::JoinRoom {
                room_id:  room.id.clone(),
                role:     Role::Patient,
                language: Some(language.to_string()),
            })
            .await;
    }

    async fn send(&self, socket: &TestSocket, content: &str) {
        self.coordinator
            .handle(socket.id, None, ClientEvent::SendMessage {
                content:  content.to_string(),
                language: None,
                is_audio: false,
            })
            .await;
    }
}

struct TestSocket {
    id: Uuid,
    rx: UnboundedReceiver<ServerEvent>,
}

impl TestSocket {
    fn next(&mut self) -> ServerEvent {
        self.rx.try_recv().expect("expected a pending event")
    }

    fn assert_idle(&mut self) {
        assert!(self.rx.try_recv().is_err(), "socket has unexpected pending events");
    }
}

// ─── S1: anonymous round trip ────────────────────────────────────────────────

#[tokio::test]
async fn s1_anonymous_round_trip() {
    let h = harness(HarnessOptions::default());
    let room = h.rooms.create().unwrap();

    let mut s1 = h.socket();
    h.join_patient(&s1, &room, "en").await;
    match s1.next() {
        ServerEvent::RoomJoined { room_id, role, participants, .. } => {
            assert_eq!(room_id, room.id);
            assert_eq!(role, Role::Patient);
            assert!(participants.patient);
            assert!(!participants.doctor);
        }
        other => panic!("expected room_joined, got {other:?}"),
    }
    s1.assert_idle();

    let mut s2 = h.socket();
    h.join_doctor(&s2, &room, DOCTOR_ID, "es").await;

    match s2.next() {
        ServerEvent::RoomJoined { participants, doctor_id, .. } => {
            assert!(participants.patient && participants.doctor);
            assert_eq!(doctor_id.as_deref(), Some(DOCTOR_ID));
        }
        other => panic!("expected room_joined, got {other:?}"),
    }
    // Both sockets receive the key exchange, joiner included.
    match s2.next() {
        ServerEvent::CipherKeyExchange { cipher_key } => {
            assert_eq!(cipher_key, room.cipher_key.to_hex());
        }
        other => panic!("expected cipher_key_exchange, got {other:?}"),
    }
    match s1.next() {
        ServerEvent::UserJoined { role, doctor_id } => {
            assert_eq!(role, Role::Doctor);
            assert_eq!(doctor_id.as_deref(), Some(DOCTOR_ID));
        }
        other => panic!("expected user_joined, got {other:?}"),
    }
    match s1.next() {
        ServerEvent::CipherKeyExchange { cipher_key } => {
            assert_eq!(cipher_key, room.cipher_key.to_hex());
        }
        other => panic!("expected cipher_key_exchange, got {other:?}"),
    }

    h.send(&s1, "hello").await;

    match s2.next() {
        ServerEvent::NewMessage(msg) => {
            assert_eq!(msg.content, "hello");
            assert_eq!(msg.language, "en");
            assert_eq!(msg.target_language.as_deref(), Some("es"));
            assert_eq!(msg.translated_content.as_deref(), Some("hola"));
            assert!(!msg.translation_errored);
            assert_eq!(msg.sender_role, Role::Patient);
            assert_eq!(msg.sender_id, None, "patient messages are anonymous");
            assert!(msg.id.is_some());
        }
        other => panic!("expected new_message, got {other:?}"),
    }
    match s2.next() {
        ServerEvent::MessageTranslated { translated_content, target_language, .. } => {
            assert_eq!(translated_content, "hola");
            assert_eq!(target_language, "es");
        }
        other => panic!("expected message_translated, got {other:?}"),
    }
    match s1.next() {
        ServerEvent::MessageSent { id, .. } => assert!(!id.is_empty()),
        other => panic!("expected message_sent, got {other:?}"),
    }
    s1.assert_idle();
    s2.assert_idle();
}

// ─── S2: offline queue drain ─────────────────────────────────────────────────

#[tokio::test]
async fn s2_offline_queue_drained_on_join() {
    let h = harness(HarnessOptions::default());
    let room = h.rooms.create().unwrap();

    let mut s1 = h.socket();
    h.join_patient(&s1, &room, "en").await;
    assert!(matches!(s1.next(), ServerEvent::RoomJoined { .. }));

    h.send(&s1, "waiting").await;
    assert!(matches!(s1.next(), ServerEvent::MessageSent { .. }));
    s1.assert_idle();

    let mut s2 = h.socket();
    h.join_doctor(&s2, &room, DOCTOR_ID, "es").await;

    // Joiner sees: room_joined, the queued message, then the key.
    assert!(matches!(s2.next(), ServerEvent::RoomJoined { .. }));
    match s2.next() {
        ServerEvent::NewMessage(msg) => {
            assert_eq!(msg.content, "waiting");
            assert_eq!(msg.sender_role, Role::Patient);
            assert_eq!(msg.id, None, "queued snapshots carry no record id");
        }
        other => panic!("expected drained new_message, got {other:?}"),
    }
    assert!(matches!(s2.next(), ServerEvent::CipherKeyExchange { .. }));
    s2.assert_idle();

    // The queue is cleared: a rejoin must not replay the message.
    let mut s3 = h.socket();
    h.join_patient(&s3, &room, "en").await;
    assert!(matches!(s3.next(), ServerEvent::RoomJoined { .. }));
    assert!(matches!(s3.next(), ServerEvent::CipherKeyExchange { .. }));
    s3.assert_idle();
}

// ─── S3: doctor exclusivity ──────────────────────────────────────────────────

#[tokio::test]
async fn s3_doctor_exclusivity() {
    let h = harness(HarnessOptions::default());
    let room = h.rooms.create().unwrap();

    let mut d1 = h.socket();
    h.join_doctor(&d1, &room, DOCTOR_ID, "en").await;
    assert!(matches!(d1.next(), ServerEvent::RoomJoined { .. }));

    // A second doctor cannot join while the slot is held.
    let mut d2 = h.socket();
    let token = h.doctor_token(OTHER_DOCTOR_ID);
    h.coordinator
        .handle(d2.id, Some(&token), ClientEvent::JoinRoom {
            room_id:  room.id.clone(),
            role:     Role::Doctor,
            language: None,
        })
        .await;
    match d2.next() {
        ServerEvent::Error { message } => {
            assert_eq!(message, "Room already has a doctor assigned");
        }
        other => panic!("expected error, got {other:?}"),
    }

    // First doctor disconnects; the slot is released.
    h.coordinator.disconnect(d1.id);
    assert_eq!(h.rooms.get(&room.id).unwrap().doctor_id, None);

    // Now the second doctor gets in.
    h.join_doctor(&d2, &room, OTHER_DOCTOR_ID, "en").await;
    assert!(matches!(d2.next(), ServerEvent::RoomJoined { .. }));
    assert_eq!(
        h.rooms.get(&room.id).unwrap().doctor_id.as_deref(),
        Some(OTHER_DOCTOR_ID)
    );
}

// ─── S4: translation degradation ─────────────────────────────────────────────

#[tokio::test]
async fn s4_translation_failure_degrades() {
    let h = harness(HarnessOptions { translator_fails: true, ..Default::default() });
    let room = h.rooms.create().unwrap();

    let s1 = h.socket();
    h.join_patient(&s1, &room, "en").await;
    let mut s2 = h.socket();
    h.join_doctor(&s2, &room, DOCTOR_ID, "fr").await;
    assert!(matches!(s2.next(), ServerEvent::RoomJoined { .. }));
    assert!(matches!(s2.next(), ServerEvent::CipherKeyExchange { .. }));

    h.send(&s1, "pain").await;

    match s2.next() {
        ServerEvent::NewMessage(msg) => {
            assert_eq!(msg.content, "pain");
            assert_eq!(msg.translated_content.as_deref(), Some("pain"));
            assert_eq!(msg.target_language.as_deref(), Some("fr"));
            assert!(msg.translation_errored);
        }
        other => panic!("expected new_message, got {other:?}"),
    }
    // No message_translated follows a failed translation.
    s2.assert_idle();

    // Persisted record holds no translation.
    let page = h.messages.page(&room.id, &room.cipher_key, 1, 0).unwrap();
    assert_eq!(page[0].content, "pain");
    assert_eq!(page[0].translated_content, None);
}

// ─── S5: key invalidation on disconnect ──────────────────────────────────────

#[tokio::test]
async fn s5_key_invalidated_on_disconnect() {
    let h = harness(HarnessOptions::default());
    let room = h.rooms.create().unwrap();

    let mut s1 = h.socket();
    h.join_patient(&s1, &room, "en").await;
    let mut s2 = h.socket();
    h.join_doctor(&s2, &room, DOCTOR_ID, "es").await;
    while s1.rx.try_recv().is_ok() {}
    while s2.rx.try_recv().is_ok() {}

    h.coordinator.disconnect(s1.id);

    match s2.next() {
        ServerEvent::CipherKeyInvalidated { reason } => {
            assert_eq!(reason, InvalidationReason::ParticipantDisconnected);
        }
        other => panic!("expected cipher_key_invalidated, got {other:?}"),
    }
    match s2.next() {
        ServerEvent::UserLeft { role, .. } => assert_eq!(role, Role::Patient),
        other => panic!("expected user_left, got {other:?}"),
    }

    // The room record is untouched; the patient holds no slot.
    let reloaded = h.rooms.get(&room.id).unwrap();
    assert_eq!(reloaded.doctor_id.as_deref(), Some(DOCTOR_ID));
    assert_eq!(reloaded.cipher_key.to_hex(), room.cipher_key.to_hex());
}

// ─── S6: audio origin ────────────────────────────────────────────────────────

#[tokio::test]
async fn s6_audio_message_pipeline() {
    let h = harness(HarnessOptions::default());
    let room = h.rooms.create().unwrap();

    let mut patient = h.socket();
    h.join_patient(&patient, &room, "es").await;
    let mut doctor = h.socket();
    h.join_doctor(&doctor, &room, DOCTOR_ID, "en").await;
    while patient.rx.try_recv().is_ok() {}
    while doctor.rx.try_recv().is_ok() {}

    // Three frames, is_last on the third.
    for (frame, is_last) in [(b"aa".as_slice(), false), (b"bb", false), (b"cc", true)] {
        h.coordinator
            .handle(doctor.id, None, ClientEvent::AudioChunk {
                chunk:    BASE64.encode(frame),
                is_last,
                language: Some("en".into()),
            })
            .await;
    }

    match doctor.next() {
        ServerEvent::AudioTranscribed { text, language } => {
            assert_eq!(text, "sip water");
            assert_eq!(language, "en");
        }
        other => panic!("expected audio_transcribed, got {other:?}"),
    }
    assert!(matches!(doctor.next(), ServerEvent::MessageSent { .. }));

    match patient.next() {
        ServerEvent::NewMessage(msg) => {
            assert_eq!(msg.content, "sip water");
            assert_eq!(msg.translated_content.as_deref(), Some("beba agua"));
            assert!(msg.is_audio_origin);
            assert_eq!(msg.sender_role, Role::Doctor);
            assert_eq!(msg.sender_id.as_deref(), Some(DOCTOR_ID));
        }
        other => panic!("expected new_message, got {other:?}"),
    }
}

// ─── Degradation and boundary cases ──────────────────────────────────────────

#[tokio::test]
async fn stt_failure_aborts_quietly() {
    let h = harness(HarnessOptions { transcriber: None, ..Default::default() });
    let room = h.rooms.create().unwrap();

    let mut patient = h.socket();
    h.join_patient(&patient, &room, "en").await;
    assert!(matches!(patient.next(), ServerEvent::RoomJoined { .. }));

    h.coordinator
        .handle(patient.id, None, ClientEvent::AudioChunk {
            chunk:    BASE64.encode(b"noise"),
            is_last:  true,
            language: None,
        })
        .await;

    assert!(matches!(patient.next(), ServerEvent::SttError { .. }));
    patient.assert_idle();
    // Nothing was persisted.
    assert!(h.messages.page(&room.id, &room.cipher_key, 10, 0).unwrap().is_empty());
}

#[tokio::test]
async fn empty_transcription_is_not_a_provider_failure() {
    let h = harness(HarnessOptions { transcriber: Some(""), ..Default::default() });
    let room = h.rooms.create().unwrap();

    let mut patient = h.socket();
    h.join_patient(&patient, &room, "en").await;
    assert!(matches!(patient.next(), ServerEvent::RoomJoined { .. }));

    h.coordinator
        .handle(patient.id, None, ClientEvent::AudioChunk {
            chunk:    BASE64.encode(b"silence"),
            is_last:  true,
            language: None,
        })
        .await;

    // The provider did answer, so the transcript event fires; the empty
    // text then fails the send pipeline's own content check.
    match patient.next() {
        ServerEvent::AudioTranscribed { text, .. } => assert_eq!(text, ""),
        other => panic!("expected audio_transcribed, got {other:?}"),
    }
    match patient.next() {
        ServerEvent::Error { message } => assert_eq!(message, "Message content cannot be empty"),
        other => panic!("expected error, got {other:?}"),
    }
    patient.assert_idle();
    assert!(h.messages.page(&room.id, &room.cipher_key, 10, 0).unwrap().is_empty());
}

#[tokio::test]
async fn tts_streams_in_paced_frames() {
    let audio = vec![42u8; 40 * 1024];
    let h = harness(HarnessOptions { synthesizer: Some(audio.clone()), ..Default::default() });
    let room = h.rooms.create().unwrap();

    let mut patient = h.socket();
    h.join_patient(&patient, &room, "en").await;
    assert!(matches!(patient.next(), ServerEvent::RoomJoined { .. }));

    h.coordinator
        .handle(patient.id, None, ClientEvent::RequestTts {
            text:       "take two tablets".into(),
            language:   None,
            message_id: Some("m-9".into()),
        })
        .await;

    // 40 KiB at 16 KiB per frame = 3 frames.
    let mut reassembled = Vec::new();
    for expected_index in 0..3 {
        match patient.next() {
            ServerEvent::AudioStream { chunk, index, total, is_last, message_id } => {
                assert_eq!(index, expected_index);
                assert_eq!(total, 3);
                assert_eq!(is_last, expected_index == 2);
                assert_eq!(message_id.as_deref(), Some("m-9"));
                reassembled.extend(BASE64.decode(chunk).unwrap());
            }
            other => panic!("expected audio_stream, got {other:?}"),
        }
    }
    assert_eq!(reassembled, audio);
    patient.assert_idle();
}

#[tokio::test]
async fn tts_failure_reports_to_requester_only() {
    let h = harness(HarnessOptions { synthesizer: None, ..Default::default() });
    let room = h.rooms.create().unwrap();

    let mut patient = h.socket();
    h.join_patient(&patient, &room, "en").await;
    let mut doctor = h.socket();
    h.join_doctor(&doctor, &room, DOCTOR_ID, "en").await;
    while patient.rx.try_recv().is_ok() {}
    while doctor.rx.try_recv().is_ok() {}

    h.coordinator
        .handle(patient.id, None, ClientEvent::RequestTts {
            text:       "hello".into(),
            language:   None,
            message_id: Some("m-1".into()),
        })
        .await;

    match patient.next() {
        ServerEvent::TtsError { message_id, .. } => assert_eq!(message_id.as_deref(), Some("m-1")),
        other => panic!("expected tts_error, got {other:?}"),
    }
    doctor.assert_idle();
}

#[tokio::test]
async fn empty_content_is_rejected_before_any_write() {
    let h = harness(HarnessOptions::default());
    let room = h.rooms.create().unwrap();

    let mut patient = h.socket();
    h.join_patient(&patient, &room, "en").await;
    assert!(matches!(patient.next(), ServerEvent::RoomJoined { .. }));

    h.send(&patient, "   ").await;
    match patient.next() {
        ServerEvent::Error { message } => assert_eq!(message, "Message content cannot be empty"),
        other => panic!("expected error, got {other:?}"),
    }
    assert!(h.messages.page(&room.id, &room.cipher_key, 10, 0).unwrap().is_empty());
}

#[tokio::test]
async fn send_without_session_is_rejected() {
    let h = harness(HarnessOptions::default());
    let mut socket = h.socket();
    h.send(&socket, "hello").await;
    match socket.next() {
        ServerEvent::Error { message } => assert_eq!(message, "No active session"),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn disconnect_without_join_is_a_noop() {
    let h = harness(HarnessOptions::default());
    let socket = h.socket();
    // Must not panic, must not emit anything anywhere.
    h.coordinator.disconnect(socket.id);
}

#[tokio::test]
async fn update_language_confirms_and_is_idempotent() {
    let h = harness(HarnessOptions::default());
    let room = h.rooms.create().unwrap();

    let mut patient = h.socket();
    h.join_patient(&patient, &room, "en").await;
    assert!(matches!(patient.next(), ServerEvent::RoomJoined { .. }));

    for _ in 0..2 {
        h.coordinator
            .handle(patient.id, None, ClientEvent::UpdateLanguage { language: "es".into() })
            .await;
        match patient.next() {
            ServerEvent::LanguageUpdated { language } => assert_eq!(language, "es"),
            other => panic!("expected language_updated, got {other:?}"),
        }
    }
    patient.assert_idle();
}

#[tokio::test]
async fn doctor_join_requires_a_doctor_token() {
    let h = harness(HarnessOptions::default());
    let room = h.rooms.create().unwrap();

    // No token at all.
    let mut bare = h.socket();
    h.coordinator
        .handle(bare.id, None, ClientEvent::JoinRoom {
            room_id:  room.id.clone(),
            role:     Role::Doctor,
            language: None,
        })
        .await;
    match bare.next() {
        ServerEvent::Error { message } => assert_eq!(message, "Authentication required"),
        other => panic!("expected error, got {other:?}"),
    }

    // A user-kind token is forbidden for the doctor role.
    let mut wrong_kind = h.socket();
    let token = h.user_token();
    h.coordinator
        .handle(wrong_kind.id, Some(&token), ClientEvent::JoinRoom {
            room_id:  room.id.clone(),
            role:     Role::Doctor,
            language: None,
        })
        .await;
    match wrong_kind.next() {
        ServerEvent::Error { message } => assert_eq!(message, "Doctor role requires a doctor account"),
        other => panic!("expected error, got {other:?}"),
    }

    // Garbage token.
    let mut garbled = h.socket();
    h.coordinator
        .handle(garbled.id, Some("no.way.jose"), ClientEvent::JoinRoom {
            room_id:  room.id.clone(),
            role:     Role::Doctor,
            language: None,
        })
        .await;
    assert!(matches!(garbled.next(), ServerEvent::Error { .. }));
}

#[tokio::test]
async fn join_unknown_room_is_rejected() {
    let h = harness(HarnessOptions::default());
    let mut socket = h.socket();
    h.coordinator
        .handle(socket.id, None, ClientEvent::JoinRoom {
            room_id:  "does-not-exist".into(),
            role:     Role::Patient,
            language: None,
        })
        .await;
    match socket.next() {
        ServerEvent::Error { message } => assert_eq!(message, "Room not found"),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn same_language_peers_skip_translation() {
    let h = harness(HarnessOptions::default());
    let room = h.rooms.create().unwrap();

    let s1 = h.socket();
    h.join_patient(&s1, &room, "en").await;
    let mut s2 = h.socket();
    h.join_doctor(&s2, &room, DOCTOR_ID, "en").await;
    while s2.rx.try_recv().is_ok() {}

    h.send(&s1, "no translation needed").await;

    match s2.next() {
        ServerEvent::NewMessage(msg) => {
            assert_eq!(msg.content, "no translation needed");
            assert_eq!(msg.translated_content, None);
            assert_eq!(msg.target_language, None);
            assert!(!msg.translation_errored);
        }
        other => panic!("expected new_message, got {other:?}"),
    }
    s2.assert_idle();
}

#[tokio::test]
async fn leave_room_invalidates_and_releases() {
    let h = harness(HarnessOptions::default());
    let room = h.rooms.create().unwrap();

    let mut patient = h.socket();
    h.join_patient(&patient, &room, "en").await;
    let doctor = h.socket();
    h.join_doctor(&doctor, &room, DOCTOR_ID, "es").await;
    while patient.rx.try_recv().is_ok() {}

    h.coordinator.handle(doctor.id, None, ClientEvent::LeaveRoom).await;

    match patient.next() {
        ServerEvent::CipherKeyInvalidated { reason } => {
            assert_eq!(reason, InvalidationReason::ParticipantLeft);
        }
        other => panic!("expected cipher_key_invalidated, got {other:?}"),
    }
    match patient.next() {
        ServerEvent::UserLeft { role, doctor_id } => {
            assert_eq!(role, Role::Doctor);
            assert_eq!(doctor_id.as_deref(), Some(DOCTOR_ID));
        }
        other => panic!("expected user_left, got {other:?}"),
    }
    // Doctor leave releases the slot.
    assert_eq!(h.rooms.get(&room.id).unwrap().doctor_id, None);
}

#[tokio::test]
async fn persisted_messages_round_trip_under_the_room_key() {
    let h = harness(HarnessOptions::default());
    let room = h.rooms.create().unwrap();

    let mut s1 = h.socket();
    h.join_patient(&s1, &room, "en").await;
    assert!(matches!(s1.next(), ServerEvent::RoomJoined { .. }));

    for content in ["first", "second", "third"] {
        h.send(&s1, content).await;
    }

    let page = h.messages.page(&room.id, &room.cipher_key, 100, 0).unwrap();
    let contents: Vec<_> = page.iter().map(|r| r.content.as_str()).collect();
    assert_eq!(contents, ["third", "second", "first"]);
    assert!(page.iter().all(|r| r.sender_id.is_none()));
}
