//! # consult-server
//!
//! Room session coordinator for anonymous two-party telemedicine chat.
//!
//! ## What it does
//! - Admits an anonymous patient and an authenticated doctor into a room
//! - Drives the cipher-key exchange once both roles are present
//! - Fans out messages to live peers, persisting them encrypted at rest
//! - Queues messages for an absent peer and drains the queue on join
//! - Runs translation, speech-to-text and text-to-speech as pipeline
//!   stages with cache-first lookups and graceful degradation
//!
//! The binary (`src/main.rs`) wires the coordinator to a WebSocket
//! listener; everything else is library surface so the integration tests
//! can drive the state machine directly.

#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod gateway;
pub mod queue;
pub mod registry;

pub use config::Config;
pub use coordinator::Coordinator;
pub use error::EventError;
pub use events::{ClientEvent, ServerEvent};
pub use gateway::{LlmGateway, MediaPipeline, Synthesizer, Transcriber, Translator};
