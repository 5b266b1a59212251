//! Translation / speech-to-text / text-to-speech gateways.
//!
//! Three one-method traits keep the provider behind a seam the tests can
//! mock. [`LlmGateway`] implements all three over an OpenAI-style HTTP
//! API. [`MediaPipeline`] layers the artifact cache on top and owns the
//! degradation rules: a failed translation falls back to the original
//! text with an error flag, failed STT/TTS yield `None`. No retries
//! anywhere: one attempt per call, bounded by the client's deadline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use consult_store::{ArtifactCache, ArtifactKind};
use serde::{Deserialize, Serialize};

const CHAT_MODEL: &str = "gpt-4o-mini";
const STT_MODEL:  &str = "whisper-1";
const TTS_MODEL:  &str = "tts-1";

/// Translation runs at low temperature for consistent clinical wording.
const TRANSLATION_TEMPERATURE: f32 = 0.3;

// ─── Errors ──────────────────────────────────────────────────────────────────

/// The single failure shape every gateway call can produce.
#[derive(Debug)]
pub struct GatewayError {
    pub message: String,
}

impl GatewayError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "provider error: {}", self.message)
    }
}
impl std::error::Error for GatewayError {}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        Self::new(e.to_string())
    }
}

// ─── Traits ──────────────────────────────────────────────────────────────────

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(
        &self,
        text:        &str,
        target_lang: &str,
        source_lang: Option<&str>,
    ) -> Result<String, GatewayError>;
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(
        &self,
        audio:    &[u8],
        language: Option<&str>,
    ) -> Result<String, GatewayError>;
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, language: &str) -> Result<Vec<u8>, GatewayError>;
}

// ─── Voice selection ─────────────────────────────────────────────────────────

/// Deterministic per-language voice, neutral default.
pub fn voice_for(language: &str) -> &'static str {
    let primary = language
        .split(['-', '_'])
        .next()
        .unwrap_or(language)
        .to_ascii_lowercase();
    match primary.as_str() {
        "en" => "nova",
        "es" => "shimmer",
        "fr" => "alloy",
        "de" => "onyx",
        "pt" => "fable",
        "hi" => "echo",
        _    => "alloy",
    }
}

// ─── LlmGateway ──────────────────────────────────────────────────────────────

/// HTTP adapter for an OpenAI-compatible provider.
pub struct LlmGateway {
    http:     reqwest::Client,
    base_url: String,
    api_key:  String,
}

impl LlmGateway {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key:  api_key.to_string(),
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model:       &'a str,
    temperature: f32,
    messages:    Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role:    &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[async_trait]
impl Translator for LlmGateway {
    async fn translate(
        &self,
        text:        &str,
        target_lang: &str,
        source_lang: Option<&str>,
    ) -> Result<String, GatewayError> {
        let instruction = match source_lang {
            Some(source) => format!(
                "You are a medical interpreter. Translate the user's message from {source} to \
                 {target_lang}. Preserve clinical meaning exactly. Reply with the translation only."
            ),
            None => format!(
                "You are a medical interpreter. Translate the user's message to {target_lang}. \
                 Preserve clinical meaning exactly. Reply with the translation only."
            ),
        };

        let request = ChatRequest {
            model:       CHAT_MODEL,
            temperature: TRANSLATION_TEMPERATURE,
            messages:    vec![
                ChatMessage { role: "system", content: &instruction },
                ChatMessage { role: "user", content: text },
            ],
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GatewayError::new(format!("translation HTTP {}", response.status())));
        }

        let body: ChatResponse = response.json().await?;
        let translation = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| GatewayError::new("empty translation response"))?;
        Ok(translation)
    }
}

#[async_trait]
impl Transcriber for LlmGateway {
    async fn transcribe(
        &self,
        audio:    &[u8],
        language: Option<&str>,
    ) -> Result<String, GatewayError> {
        let file = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name("audio.webm")
            .mime_str("audio/webm")
            .map_err(|e| GatewayError::new(e.to_string()))?;
        let mut form = reqwest::multipart::Form::new()
            .part("file", file)
            .text("model", STT_MODEL);
        if let Some(lang) = language {
            form = form.text("language", lang.to_string());
        }

        let response = self
            .http
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GatewayError::new(format!("transcription HTTP {}", response.status())));
        }

        let body: TranscriptionResponse = response.json().await?;
        Ok(body.text)
    }
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
}

#[async_trait]
impl Synthesizer for LlmGateway {
    async fn synthesize(&self, text: &str, language: &str) -> Result<Vec<u8>, GatewayError> {
        let request = SpeechRequest {
            model: TTS_MODEL,
            voice: voice_for(language),
            input: text,
        };

        let response = self
            .http
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GatewayError::new(format!("speech HTTP {}", response.status())));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

// ─── MediaPipeline ───────────────────────────────────────────────────────────

/// Cache-first orchestration over the three gateways.
pub struct MediaPipeline {
    cache:       Arc<dyn ArtifactCache>,
    translator:  Arc<dyn Translator>,
    transcriber: Arc<dyn Transcriber>,
    synthesizer: Arc<dyn Synthesizer>,
}

impl MediaPipeline {
    pub fn new(
        cache:       Arc<dyn ArtifactCache>,
        translator:  Arc<dyn Translator>,
        transcriber: Arc<dyn Transcriber>,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> Self {
        Self { cache, translator, transcriber, synthesizer }
    }

    /// Translate `text` into `target_lang`.
    ///
    /// Returns `(translation, false)` on success and `(text, true)` when
    /// the provider fails; the message still goes out, flagged so the
    /// peer knows translation did not happen.
    pub async fn translate(
        &self,
        text:        &str,
        target_lang: &str,
        source_lang: Option<&str>,
    ) -> (String, bool) {
        if let Some(cached) = self.cache.get(ArtifactKind::Translation, text, target_lang) {
            if let Ok(cached) = String::from_utf8(cached) {
                return (cached, false);
            }
        }

        match self.translator.translate(text, target_lang, source_lang).await {
            Ok(translation) => {
                self.cache.put(
                    ArtifactKind::Translation,
                    text,
                    target_lang,
                    translation.clone().into_bytes(),
                );
                (translation, false)
            }
            Err(e) => {
                tracing::warn!("[gateway] translation to {target_lang} failed: {e}");
                (text.to_string(), true)
            }
        }
    }

    /// Transcribe audio; `None` on provider failure. Audio bytes have no
    /// cache kind, so transcription always hits the provider.
    pub async fn transcribe(&self, audio: &[u8], language: Option<&str>) -> Option<String> {
        match self.transcriber.transcribe(audio, language).await {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::warn!("[gateway] transcription failed: {e}");
                None
            }
        }
    }

    /// Synthesize speech; `None` on provider failure.
    pub async fn synthesize(&self, text: &str, language: &str) -> Option<Vec<u8>> {
        if let Some(cached) = self.cache.get(ArtifactKind::Tts, text, language) {
            return Some(cached);
        }

        match self.synthesizer.synthesize(text, language).await {
            Ok(audio) => {
                self.cache.put(ArtifactKind::Tts, text, language, audio.clone());
                Some(audio)
            }
            Err(e) => {
                tracing::warn!("[gateway] speech synthesis for {language} failed: {e}");
                None
            }
        }
    }
}
