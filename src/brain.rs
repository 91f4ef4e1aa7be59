use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ProxyError, ProxyResult};
use crate::retry::RetryPolicy;
use crate::types::{ImagePayload, VerificationResult};
use crate::verdict::normalize_answer;

/// Builds the instruction sent next to the frame.
pub fn build_prompt(step: &str) -> String {
    format!(
        r#"You are checking whether a student has completed one step of a task.

Step: "{step}"

Look at the photo and decide whether it shows this step completed.
Return ONLY a single JSON object, no markdown, no explanation:
{{"confidence": <number between 0 and 1>, "feedback": "<one or two short sentences>"}}

confidence is how sure you are that the step is completed.
feedback tells the student what you see or what is missing."#
    )
}

/// Why a single model call failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelFailure {
    /// The endpoint answered with a non-success status.
    Status { status: u16, body: String },
    Timeout,
    /// Connection, DNS, TLS and similar failures.
    Transport(String),
}

/// A vision-language model that answers a prompt about one image.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Returns the model's raw text answer.
    async fn generate(&self, prompt: &str, image: &ImagePayload) -> Result<String, ModelFailure>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text {
        text: &'a str,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData<'a>,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'static str,
    data: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateContentResponse {
    /// Text parts of the first candidate, joined by newlines.
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default()
    }
}

/// Google Gemini `generateContent` endpoint.
pub struct GeminiModel {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiModel {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

#[async_trait]
impl VisionModel for GeminiModel {
    async fn generate(&self, prompt: &str, image: &ImagePayload) -> Result<String, ModelFailure> {
        let body = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    Part::Text { text: prompt },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: image.media_type.as_str(),
                            data: &image.data,
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                temperature: 0.0,
            },
        };

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_failure)?;

        let status = response.status();
        let text = response.text().await.map_err(transport_failure)?;

        if !status.is_success() {
            return Err(ModelFailure::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        match serde_json::from_str::<GenerateContentResponse>(&text) {
            Ok(parsed) => Ok(parsed.text()),
            Err(e) => {
                warn!(error = %e, "Unexpected generateContent response shape");
                Ok(String::new())
            }
        }
    }
}

fn transport_failure(e: reqwest::Error) -> ModelFailure {
    if e.is_timeout() {
        ModelFailure::Timeout
    } else {
        ModelFailure::Transport(e.to_string())
    }
}

/// Calls the model under `policy`, retrying rate-limit, overload and timeout
/// failures. Each attempt has its own timeout; a timed-out attempt is dropped
/// without affecting the rest of the sequence.
pub async fn forward(
    model: &dyn VisionModel,
    policy: &RetryPolicy,
    prompt: &str,
    image: &ImagePayload,
) -> ProxyResult<String> {
    let mut attempt = 1;
    loop {
        debug!(attempt, "Calling vision model");
        let failure =
            match tokio::time::timeout(policy.attempt_timeout, model.generate(prompt, image)).await
            {
                Ok(Ok(text)) => {
                    info!(attempt, "Vision model answered");
                    return Ok(text);
                }
                Ok(Err(failure)) => failure,
                Err(_) => ModelFailure::Timeout,
            };

        let (retryable, err) = match failure {
            ModelFailure::Status { status, .. } if policy.is_retryable_status(status) => (
                true,
                ProxyError::Unavailable {
                    status,
                    attempts: attempt,
                },
            ),
            ModelFailure::Status { status, body } => {
                (false, ProxyError::Upstream { status, detail: body })
            }
            ModelFailure::Timeout => (true, ProxyError::UpstreamTimeout { attempts: attempt }),
            ModelFailure::Transport(detail) => (false, ProxyError::Unreachable(detail)),
        };

        if !retryable || !policy.has_attempts_after(attempt) {
            warn!(attempt, error = %err, "Vision model call failed");
            return Err(err);
        }

        let delay = policy.backoff(attempt);
        warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "Retrying vision model");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Asks the model about `step` and normalizes whatever it says.
pub async fn verify(
    model: &dyn VisionModel,
    policy: &RetryPolicy,
    step: &str,
    image: &ImagePayload,
) -> ProxyResult<VerificationResult> {
    let prompt = build_prompt(step);
    let raw = forward(model, policy, &prompt, image).await?;
    let result = normalize_answer(&raw);
    info!(confidence = result.confidence, "Step verified");
    Ok(result)
}
