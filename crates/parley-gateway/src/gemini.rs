//! Gemini REST client.
//!
//! Implements [`TextModel`] for question generation and analysis, and
//! [`SpeechModel`] for text-to-speech and transcription, over the
//! `generateContent` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::speech::{SpeechAudio, SpeechModel};
use crate::{GatewayError, TextModel};

/// Default Gemini API base URL.
pub const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Default text model.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Default text-to-speech model.
pub const DEFAULT_TTS_MODEL: &str = "gemini-2.5-flash-preview-tts";

/// Default prebuilt voice.
pub const DEFAULT_VOICE: &str = "Kore";

const TRANSCRIBE_PROMPT: &str =
    "Transcribe this audio recording verbatim. Return only the transcript text.";

/// HTTP client for the Gemini API.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    tts_model: String,
    voice: String,
    base_url: String,
}

impl GeminiClient {
    /// Creates a client for `model` authenticated with `api_key`.
    #[must_use]
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            model: model.into(),
            tts_model: DEFAULT_TTS_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            base_url: BASE_URL.to_string(),
        }
    }

    /// Creates a client reading the API key from the environment variable `var`.
    pub fn from_env(var: &str, model: impl Into<String>) -> Result<Self, GatewayError> {
        match std::env::var(var) {
            Ok(key) if !key.trim().is_empty() => Ok(Self::new(key.trim(), model)),
            _ => Err(GatewayError::Configuration(format!(
                "environment variable {var} is not set"
            ))),
        }
    }

    /// Overrides the text-to-speech model.
    #[must_use]
    pub fn with_tts_model(mut self, model: impl Into<String>) -> Self {
        self.tts_model = model.into();
        self
    }

    /// Overrides the prebuilt voice.
    #[must_use]
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    /// Overrides the API base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Returns the text model name.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        model: &str,
        body: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, GatewayError> {
        let url = format!("{}/{model}:generateContent", self.base_url);

        let response = self
            .client
            .post(url)
            .query(&[("key", self.api_key.as_str())])
            .json(body)
            .send()
            .await
            .map_err(|err| GatewayError::network(format!("Gemini request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read Gemini error body".to_string());
            return Err(map_http_error(status, &body_text));
        }

        response
            .json()
            .await
            .map_err(|err| GatewayError::MalformedResponse(format!("Gemini response: {err}")))
    }
}

#[async_trait]
impl TextModel for GeminiClient {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn complete(&self, prompt: &str) -> Result<String, GatewayError> {
        let request = GenerateContentRequest::text(prompt);
        let response = self.generate(&self.model, &request).await?;
        let text = extract_text(response).unwrap_or_default();
        debug!(chars = text.len(), "Gemini completion received");
        Ok(text)
    }
}

#[async_trait]
impl SpeechModel for GeminiClient {
    #[instrument(skip_all, fields(model = %self.tts_model, voice = %self.voice))]
    async fn synthesize(&self, text: &str) -> Result<SpeechAudio, GatewayError> {
        let request = GenerateContentRequest::speech(text, &self.voice);
        let response = self.generate(&self.tts_model, &request).await?;
        let inline = extract_inline_data(response)
            .ok_or_else(|| GatewayError::empty_response("synthesize"))?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(inline.data.as_bytes())
            .map_err(|err| GatewayError::MalformedResponse(format!("audio payload: {err}")))?;
        Ok(SpeechAudio {
            bytes,
            mime_type: inline.mime_type,
        })
    }

    #[instrument(skip_all, fields(model = %self.model, bytes = audio.len()))]
    async fn transcribe(&self, audio: &[u8], mime_type: &str) -> Result<String, GatewayError> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![
                    Part::Text {
                        text: TRANSCRIBE_PROMPT.to_string(),
                    },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: mime_type.to_string(),
                            data: base64::engine::general_purpose::STANDARD.encode(audio),
                        },
                    },
                ],
            }],
            generation_config: None,
        };
        let response = self.generate(&self.model, &request).await?;
        Ok(extract_text(response).unwrap_or_default())
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

impl GenerateContentRequest {
    fn text(prompt: &str) -> Self {
        Self {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![Part::Text {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: None,
        }
    }

    fn speech(text: &str, voice: &str) -> Self {
        Self {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![Part::Text {
                    text: text.to_string(),
                }],
            }],
            generation_config: Some(GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice.to_string(),
                        },
                    },
                },
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<String>,
    speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ContentResponse>,
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
    #[serde(default)]
    parts: Vec<PartResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartResponse {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct ErrorWrapper {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    status: Option<String>,
}

fn response_parts(response: GenerateContentResponse) -> impl Iterator<Item = PartResponse> {
    response
        .candidates
        .unwrap_or_default()
        .into_iter()
        .filter_map(|candidate| candidate.content)
        .flat_map(|content| content.parts)
}

/// Concatenates the text parts of the response.
fn extract_text(response: GenerateContentResponse) -> Option<String> {
    let text: String = response_parts(response)
        .filter_map(|part| part.text)
        .collect::<Vec<_>>()
        .join("");
    (!text.trim().is_empty()).then_some(text)
}

fn extract_inline_data(response: GenerateContentResponse) -> Option<InlineData> {
    response_parts(response).find_map(|part| part.inline_data)
}

fn map_http_error(status: StatusCode, body: &str) -> GatewayError {
    let message = serde_json::from_str::<ErrorWrapper>(body).map_or_else(
        |_| body.to_string(),
        |wrapper| {
            let status_text = wrapper.error.status.unwrap_or_default();
            let msg = wrapper.error.message.unwrap_or_else(|| body.to_string());
            if status_text.is_empty() {
                msg
            } else {
                format!("{status_text}: {msg}")
            }
        },
    );
    GatewayError::from_status(status.as_u16(), message)
}
