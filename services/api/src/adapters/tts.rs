//! services/api/src/adapters/tts.rs
//!
//! This module contains the adapter for OpenAI's Text-to-Speech (TTS) service.
//! It implements the `TextToSpeechService` port from the `core` crate. The
//! generated audio is returned inline as a `data:` URI the client can play directly.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::audio::{CreateSpeechRequest, SpeechModel, Voice},
    Client,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bookwise_core::ports::{PortError, PortResult, TextToSpeechService};
use tracing::debug;

/// Maps a configured model name onto the SDK enum. Unknown names pass through.
pub fn speech_model(name: &str) -> SpeechModel {
    match name {
        "tts-1" => SpeechModel::Tts1,
        "tts-1-hd" => SpeechModel::Tts1Hd,
        other => SpeechModel::Other(other.to_string()),
    }
}

/// Maps a configured voice name onto the SDK enum, falling back to `alloy`.
pub fn voice(name: &str) -> Voice {
    match name.to_ascii_lowercase().as_str() {
        "echo" => Voice::Echo,
        "fable" => Voice::Fable,
        "onyx" => Voice::Onyx,
        "nova" => Voice::Nova,
        "shimmer" => Voice::Shimmer,
        _ => Voice::Alloy,
    }
}

/// Wraps MP3 bytes into a playable `data:` URI.
pub fn audio_data_uri(bytes: &[u8]) -> String {
    format!("data:audio/mpeg;base64,{}", STANDARD.encode(bytes))
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `TextToSpeechService` port using the OpenAI TTS API.
#[derive(Clone)]
pub struct OpenAiTtsAdapter {
    client: Client<OpenAIConfig>,
    model: SpeechModel,
    voice: Voice,
}

impl OpenAiTtsAdapter {
    /// Creates a new `OpenAiTtsAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: SpeechModel, voice: Voice) -> Self {
        Self {
            client,
            model,
            voice,
        }
    }
}

//=========================================================================================
// `TextToSpeechService` Trait Implementation
//=========================================================================================

#[async_trait]
impl TextToSpeechService for OpenAiTtsAdapter {
    /// Speaks `text` and returns the audio as a `data:audio/mpeg` URI.
    async fn generate_audio(&self, text: &str) -> PortResult<String> {
        let request = CreateSpeechRequest {
            model: self.model.clone(),
            input: text.to_string(),
            voice: self.voice.clone(),
            ..Default::default()
        };

        // Call the API and manually map the error, which respects the orphan rule.
        let response = self
            .client
            .audio()
            .speech()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        if response.bytes.is_empty() {
            return Err(PortError::Unexpected(
                "Speech service returned no audio.".to_string(),
            ));
        }
        debug!(bytes = response.bytes.len(), "Generated speech audio");
        Ok(audio_data_uri(&response.bytes))
    }
}
