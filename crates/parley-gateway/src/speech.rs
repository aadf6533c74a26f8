//! Speech services: question audio and answer transcription.
//!
//! Both are optional collaborators. Synthesis returns an audio URL or
//! nothing, and never blocks question delivery. Transcription either yields
//! text or a [`TranscriptionError`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{GatewayError, RetryPolicy};

/// Raw audio produced by a speech model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechAudio {
    /// Encoded audio bytes.
    pub bytes: Vec<u8>,
    /// MIME type reported by the provider (e.g. `audio/L16;codec=pcm;rate=24000`).
    pub mime_type: String,
}

/// Errors from speech-to-text.
#[derive(Debug, Error)]
pub enum TranscriptionError {
    /// No transcriber is configured.
    #[error("speech transcription is not enabled\n\nSuggestion: Set speech.enabled in parley.json")]
    Unavailable,

    /// The audio contained no recognizable speech.
    #[error("no speech recognized in the submitted audio")]
    EmptyTranscript,

    /// The provider call failed.
    #[error("transcription failed: {0}")]
    Upstream(#[from] GatewayError),
}

/// A model able to speak and listen.
#[async_trait]
pub trait SpeechModel: Send + Sync {
    /// Synthesizes `text` into audio.
    async fn synthesize(&self, text: &str) -> Result<SpeechAudio, GatewayError>;

    /// Transcribes encoded audio into text.
    async fn transcribe(&self, audio: &[u8], mime_type: &str) -> Result<String, GatewayError>;
}

/// Text-to-speech as seen by the session manager.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Returns a retrievable URL for the spoken `text`, or `None`.
    async fn synthesize(&self, text: &str) -> Option<String>;
}

/// Speech-to-text as seen by the HTTP layer.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribes `audio` of the given MIME type.
    async fn transcribe(&self, audio: &[u8], mime_type: &str) -> Result<String, TranscriptionError>;
}

// ============================================================================
// Disabled implementations
// ============================================================================

/// Synthesizer that never produces audio.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledSpeech;

#[async_trait]
impl SpeechSynthesizer for DisabledSpeech {
    async fn synthesize(&self, _text: &str) -> Option<String> {
        None
    }
}

/// Transcriber that always reports [`TranscriptionError::Unavailable`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledTranscriber;

#[async_trait]
impl Transcriber for DisabledTranscriber {
    async fn transcribe(&self, _audio: &[u8], _mime_type: &str) -> Result<String, TranscriptionError> {
        Err(TranscriptionError::Unavailable)
    }
}

// ============================================================================
// Audio files
// ============================================================================

/// Directory of synthesized audio files served under a URL prefix.
#[derive(Debug, Clone)]
pub struct AudioStore {
    dir: PathBuf,
    url_prefix: String,
}

impl AudioStore {
    /// Creates a store writing into `dir`, served at `url_prefix`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    /// Directory audio files are written to.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `audio` to a new file and returns its URL.
    ///
    /// Raw PCM is wrapped in a WAV container so browsers can play it.
    pub async fn save(&self, audio: &SpeechAudio) -> Result<String, GatewayError> {
        let (bytes, extension) = match pcm_sample_rate(&audio.mime_type) {
            Some(rate) => (pcm_to_wav(&audio.bytes, rate), "wav"),
            None => (audio.bytes.clone(), extension_for(&audio.mime_type)),
        };

        tokio::fs::create_dir_all(&self.dir).await?;
        let file_name = format!("tts-{}.{extension}", uuid::Uuid::new_v4());
        tokio::fs::write(self.dir.join(&file_name), bytes).await?;
        debug!(file = %file_name, "Saved synthesized audio");
        Ok(format!("{}/{file_name}", self.url_prefix))
    }
}

fn extension_for(mime_type: &str) -> &'static str {
    let essence = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    match essence.as_str() {
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/ogg" => "ogg",
        "audio/webm" => "webm",
        _ => "bin",
    }
}

/// Returns the sample rate of a raw PCM MIME type such as
/// `audio/L16;codec=pcm;rate=24000`.
fn pcm_sample_rate(mime_type: &str) -> Option<u32> {
    let lower = mime_type.to_lowercase();
    if !(lower.starts_with("audio/l16") || lower.contains("codec=pcm")) {
        return None;
    }
    let rate = lower
        .split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|value| value.parse().ok())
        .unwrap_or(24_000);
    Some(rate)
}

/// Wraps 16-bit mono little-endian PCM in a WAV header.
fn pcm_to_wav(pcm: &[u8], sample_rate: u32) -> Vec<u8> {
    const CHANNELS: u16 = 1;
    const BITS_PER_SAMPLE: u16 = 16;
    let block_align = CHANNELS * BITS_PER_SAMPLE / 8;
    let byte_rate = sample_rate * u32::from(block_align);
    let data_len = u32::try_from(pcm.len()).unwrap_or(u32::MAX);

    let mut wav = Vec::with_capacity(44 + pcm.len());
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&data_len.saturating_add(36).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes());
    wav.extend_from_slice(&CHANNELS.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    wav.extend_from_slice(pcm);
    wav
}

// ============================================================================
// Model-backed implementations
// ============================================================================

/// Synthesizer that speaks through a [`SpeechModel`] and stores the audio.
#[derive(Debug, Clone)]
pub struct ModelSpeech<M> {
    model: M,
    store: AudioStore,
}

impl<M: SpeechModel> ModelSpeech<M> {
    /// Creates a synthesizer writing audio into `store`.
    #[must_use]
    pub const fn new(model: M, store: AudioStore) -> Self {
        Self { model, store }
    }
}

#[async_trait]
impl<M: SpeechModel> SpeechSynthesizer for ModelSpeech<M> {
    async fn synthesize(&self, text: &str) -> Option<String> {
        let audio = match self.model.synthesize(text).await {
            Ok(audio) if !audio.bytes.is_empty() => audio,
            Ok(_) => {
                warn!("Speech model returned no audio");
                return None;
            }
            Err(err) => {
                warn!(error = %err, "Speech synthesis failed");
                return None;
            }
        };
        match self.store.save(&audio).await {
            Ok(url) => Some(url),
            Err(err) => {
                warn!(error = %err, "Failed to store synthesized audio");
                None
            }
        }
    }
}

/// Transcriber backed by a [`SpeechModel`], with retries.
#[derive(Debug, Clone)]
pub struct ModelTranscriber<M> {
    model: M,
    retry: RetryPolicy,
}

impl<M: SpeechModel> ModelTranscriber<M> {
    /// Creates a transcriber using the given retry policy.
    #[must_use]
    pub const fn new(model: M, retry: RetryPolicy) -> Self {
        Self { model, retry }
    }
}

#[async_trait]
impl<M: SpeechModel> Transcriber for ModelTranscriber<M> {
    async fn transcribe(&self, audio: &[u8], mime_type: &str) -> Result<String, TranscriptionError> {
        if audio.is_empty() {
            return Err(TranscriptionError::EmptyTranscript);
        }
        let text = self
            .retry
            .run("transcribe", || self.model.transcribe(audio, mime_type))
            .await?;
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(TranscriptionError::EmptyTranscript);
        }
        Ok(text)
    }
}
