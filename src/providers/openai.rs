//! OpenAI providers: Whisper transcription and JSON-mode chat completions.

use super::{
    Completion, GlossaryExtractor, GlossaryRequest, RefineRequest, Refiner, SpeakerProfiler,
    SpeakerRequest, TranscriptionRequest, Transcriber, TranslateRequest, TranslatedLine,
    Translator,
};
use crate::config::Prompts;
use crate::error::{Result, TolkError};
use crate::models::{new_segment_id, GlossaryTerm, SpeakerProfile, SubtitleSegment};
use crate::usage::{Charge, Usage};
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    AudioResponseFormat, ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    CreateTranscriptionRequestArgs, ResponseFormat,
};
use async_openai::Client;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Check if the OpenAI API key is configured.
pub fn check_api_key() -> Result<()> {
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.trim().is_empty() => Ok(()),
        _ => Err(TolkError::Validation(
            "OPENAI_API_KEY environment variable not set".to_string(),
        )),
    }
}

/// Build the shared API client. `timeout` bounds every HTTP request.
pub fn create_client(timeout: Duration) -> Result<Client<OpenAIConfig>> {
    let http_client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| TolkError::Provider(format!("Failed to create HTTP client: {}", e)))?;

    Ok(Client::with_config(OpenAIConfig::default()).with_http_client(http_client))
}

/// Race a request against the run's cancellation token.
async fn race<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TolkError::Cancelled(Duration::ZERO)),
        result = fut => result,
    }
}

// ============================================================================
// Whisper
// ============================================================================

/// OpenAI Whisper-based transcriber.
pub struct WhisperTranscriber {
    client: Client<OpenAIConfig>,
    model: String,
}

impl WhisperTranscriber {
    pub fn new(client: Client<OpenAIConfig>, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
        }
    }

    async fn call(&self, request: TranscriptionRequest) -> Result<Completion<Vec<SubtitleSegment>>> {
        let (file_name, bytes) = request.audio.into_upload()?;

        let mut request_builder = CreateTranscriptionRequestArgs::default();
        request_builder
            .file(async_openai::types::AudioInput::from_vec_u8(file_name, bytes))
            .model(&self.model)
            .response_format(AudioResponseFormat::VerboseJson);

        if let Some(lang) = request.language.as_deref() {
            request_builder.language(lang);
        }

        let api_request = request_builder
            .build()
            .map_err(|e| TolkError::Transcription(format!("Failed to build request: {}", e)))?;

        let response = self
            .client
            .audio()
            .transcribe_verbose_json(api_request)
            .await
            .map_err(|e| TolkError::Provider(format!("Whisper API error: {}", e)))?;

        let segments: Vec<SubtitleSegment> = match response.segments {
            Some(segs) => segs
                .iter()
                .map(|s| SubtitleSegment::new(s.start as f64, s.end as f64, s.text.trim()))
                .collect(),
            // Fallback: create single segment from full text
            None if !response.text.trim().is_empty() => vec![SubtitleSegment::new(
                0.0,
                response.duration as f64,
                response.text.trim(),
            )],
            None => Vec::new(),
        };

        debug!("Transcribed {} segments", segments.len());
        let billed = if response.duration > 0.0 {
            response.duration as f64
        } else {
            request.duration
        };
        Ok(Completion::new(segments, &self.model, Usage::audio(billed)))
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    fn model(&self) -> &str {
        &self.model
    }

    fn check_ready(&self) -> Result<()> {
        check_api_key()
    }

    #[instrument(skip_all, fields(model = %self.model, duration = request.duration))]
    async fn transcribe(
        &self,
        request: TranscriptionRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion<Vec<SubtitleSegment>>> {
        race(cancel, self.call(request)).await
    }
}

// ============================================================================
// Chat (JSON mode)
// ============================================================================

/// Shared chat client rendering prompts and parsing JSON replies.
#[derive(Clone)]
pub struct ChatClient {
    client: Client<OpenAIConfig>,
    prompts: Arc<Prompts>,
}

impl ChatClient {
    pub fn new(client: Client<OpenAIConfig>, prompts: Arc<Prompts>) -> Self {
        Self { client, prompts }
    }

    /// Send one system+user exchange and deserialize `key` from the JSON reply.
    async fn complete_json<T: DeserializeOwned>(
        &self,
        model: &str,
        system: &str,
        user: &str,
        vars: &HashMap<String, String>,
        key: &str,
    ) -> Result<Completion<T>> {
        let system_prompt = self.prompts.render_with_custom(system, vars);
        let user_prompt = self.prompts.render_with_custom(user, vars);

        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt)
                .build()
                .map_err(|e| TolkError::Provider(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user_prompt)
                .build()
                .map_err(|e| TolkError::Provider(e.to_string()))?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(messages)
            .temperature(0.0)
            .response_format(ResponseFormat::JsonObject)
            .build()
            .map_err(|e| TolkError::Provider(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| TolkError::Provider(format!("{} error: {}", model, e)))?;

        let usage = response
            .usage
            .as_ref()
            .map(|u| Usage::tokens(u.prompt_tokens as u64, u.completion_tokens as u64))
            .unwrap_or_default();

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.as_ref())
            .ok_or_else(|| TolkError::Provider("Empty response".to_string()))?;

        Ok(Completion::new(parse_keyed(content, key)?, model, usage))
    }
}

/// Parse `{"<key>": ...}` out of a JSON reply.
fn parse_keyed<T: DeserializeOwned>(content: &str, key: &str) -> Result<T> {
    let parsed: serde_json::Value = serde_json::from_str(content)
        .map_err(|e| TolkError::Provider(format!("Invalid JSON: {}", e)))?;

    let value = parsed
        .get(key)
        .ok_or_else(|| TolkError::Provider(format!("Missing {}", key)))?;

    serde_json::from_value(value.clone())
        .map_err(|e| TolkError::Provider(format!("Invalid {}: {}", key, e)))
}

fn format_glossary(terms: &[GlossaryTerm]) -> String {
    if terms.is_empty() {
        return "(none)".to_string();
    }
    terms
        .iter()
        .map(|t| match &t.notes {
            Some(notes) => format!("- {} => {} ({})", t.term, t.translation, notes),
            None => format!("- {} => {}", t.term, t.translation),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_speakers(speakers: &[SpeakerProfile]) -> String {
    if speakers.is_empty() {
        return "(none)".to_string();
    }
    speakers
        .iter()
        .map(|s| {
            let identity = s.inferred_identity.as_deref().unwrap_or("unknown");
            format!("- {} ({}): {}", s.id, identity, s.voice_characteristics)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn vars<const N: usize>(pairs: [(&str, String); N]) -> HashMap<String, String> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// A segment as returned by the refinement model.
#[derive(Debug, Deserialize)]
struct RefinedSegment {
    #[serde(default)]
    id: Option<String>,
    start_time: f64,
    end_time: f64,
    original_text: String,
    #[serde(default)]
    speaker_id: Option<String>,
}

impl From<RefinedSegment> for SubtitleSegment {
    fn from(s: RefinedSegment) -> Self {
        let mut segment = SubtitleSegment::with_id(
            s.id.filter(|id| !id.is_empty()).unwrap_or_else(new_segment_id),
            s.start_time,
            s.end_time,
            s.original_text,
        );
        segment.speaker_id = s.speaker_id;
        segment
    }
}

/// Transcript correction through a chat model.
pub struct ChatRefiner {
    chat: ChatClient,
    model: String,
}

impl ChatRefiner {
    pub fn new(chat: ChatClient, model: &str) -> Self {
        Self {
            chat,
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl Refiner for ChatRefiner {
    fn model(&self) -> &str {
        &self.model
    }

    fn check_ready(&self) -> Result<()> {
        check_api_key()
    }

    fn wants_audio(&self) -> bool {
        false
    }

    #[instrument(skip_all, fields(model = %self.model, segments = request.segments.len()))]
    async fn refine(
        &self,
        request: RefineRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion<Vec<SubtitleSegment>>> {
        let segments = serde_json::to_string_pretty(&request.segments)?;
        let vars = vars([
            ("language", request.language.clone().unwrap_or_else(|| "auto".to_string())),
            ("glossary", format_glossary(&request.glossary)),
            ("speakers", format_speakers(&request.speakers)),
            ("segments", segments),
        ]);

        let prompts = &self.chat.prompts.refine;
        let completion: Completion<Vec<RefinedSegment>> = race(
            cancel,
            self.chat
                .complete_json(&self.model, &prompts.system, &prompts.user, &vars, "segments"),
        )
        .await?;

        Ok(Completion {
            output: completion.output.into_iter().map(Into::into).collect(),
            charges: completion.charges,
        })
    }
}

/// Translation through a chat model.
pub struct ChatTranslator {
    chat: ChatClient,
    model: String,
}

impl ChatTranslator {
    pub fn new(chat: ChatClient, model: &str) -> Self {
        Self {
            chat,
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl Translator for ChatTranslator {
    fn model(&self) -> &str {
        &self.model
    }

    fn check_ready(&self) -> Result<()> {
        check_api_key()
    }

    #[instrument(skip_all, fields(model = %self.model, segments = request.segments.len()))]
    async fn translate(
        &self,
        request: TranslateRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion<Vec<TranslatedLine>>> {
        let lines: Vec<serde_json::Value> = request
            .segments
            .iter()
            .map(|s| serde_json::json!({"id": s.id, "text": s.original_text}))
            .collect();
        let vars = vars([
            ("target_language", request.target_language.clone()),
            ("glossary", format_glossary(&request.glossary)),
            ("segments", serde_json::to_string_pretty(&lines)?),
        ]);

        let prompts = &self.chat.prompts.translate;
        race(
            cancel,
            self.chat
                .complete_json(&self.model, &prompts.system, &prompts.user, &vars, "translations"),
        )
        .await
    }
}

/// Glossary extraction: transcribe a sampled chunk, then ask a chat model.
pub struct ChatGlossaryExtractor {
    chat: ChatClient,
    whisper: Arc<WhisperTranscriber>,
    model: String,
}

impl ChatGlossaryExtractor {
    pub fn new(chat: ChatClient, whisper: Arc<WhisperTranscriber>, model: &str) -> Self {
        Self {
            chat,
            whisper,
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl GlossaryExtractor for ChatGlossaryExtractor {
    fn model(&self) -> &str {
        &self.model
    }

    fn check_ready(&self) -> Result<()> {
        check_api_key()
    }

    #[instrument(skip_all, fields(model = %self.model))]
    async fn extract(
        &self,
        request: GlossaryRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion<Vec<GlossaryTerm>>> {
        let transcript = self
            .whisper
            .transcribe(
                TranscriptionRequest {
                    audio: request.audio,
                    language: request.language.clone(),
                    duration: 0.0,
                },
                cancel,
            )
            .await?;

        let text = transcript
            .output
            .iter()
            .map(|s| s.original_text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        if text.trim().is_empty() {
            return Ok(Completion::free(Vec::new()).with_charges(transcript.charges));
        }

        let vars = vars([
            ("target_language", request.target_language.clone()),
            ("transcript", text),
        ]);
        let prompts = &self.chat.prompts.glossary;
        let completion: Completion<Vec<GlossaryTerm>> = race(
            cancel,
            self.chat
                .complete_json(&self.model, &prompts.system, &prompts.user, &vars, "terms"),
        )
        .await?;

        Ok(completion.with_charges(transcript.charges))
    }
}

/// Speaker profiling: transcribe each sample, then ask a chat model.
pub struct ChatSpeakerProfiler {
    chat: ChatClient,
    whisper: Arc<WhisperTranscriber>,
    model: String,
}

impl ChatSpeakerProfiler {
    pub fn new(chat: ChatClient, whisper: Arc<WhisperTranscriber>, model: &str) -> Self {
        Self {
            chat,
            whisper,
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl SpeakerProfiler for ChatSpeakerProfiler {
    fn model(&self) -> &str {
        &self.model
    }

    fn check_ready(&self) -> Result<()> {
        check_api_key()
    }

    #[instrument(skip_all, fields(model = %self.model, samples = request.samples.len()))]
    async fn profile(
        &self,
        request: SpeakerRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion<Vec<SpeakerProfile>>> {
        let mut charges: Vec<Charge> = Vec::new();
        let mut lines = Vec::new();

        for sample in request.samples {
            let transcript = self
                .whisper
                .transcribe(
                    TranscriptionRequest {
                        audio: sample.audio,
                        language: request.language.clone(),
                        duration: sample.end - sample.start,
                    },
                    cancel,
                )
                .await?;
            charges.extend(transcript.charges);
            for segment in transcript.output {
                lines.push(format!(
                    "[{:.1}s] {}",
                    sample.start + segment.start_time,
                    segment.original_text
                ));
            }
        }

        if lines.is_empty() {
            return Ok(Completion::free(Vec::new()).with_charges(charges));
        }

        let vars = vars([
            (
                "max_speakers",
                request
                    .max_speakers
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
            ),
            ("samples", lines.join("\n")),
        ]);
        let prompts = &self.chat.prompts.speakers;
        let completion: Completion<Vec<SpeakerProfile>> = race(
            cancel,
            self.chat
                .complete_json(&self.model, &prompts.system, &prompts.user, &vars, "speakers"),
        )
        .await?;

        Ok(completion.with_charges(charges))
    }
}
