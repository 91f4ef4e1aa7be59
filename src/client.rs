//! Client side of the verification protocol: sends a frame and a step to the
//! proxy and always comes back with something displayable or a typed error.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ClientError, ClientResult};
use crate::hands::{self, SINGLE_SHOT_QUALITY, VideoSource};
use crate::types::{PingReply, VerificationRequest, VerificationResult};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(12);

/// Source of the signed-in user's bearer token.
pub trait TokenSource: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

/// A fixed token, or none for anonymous use.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub Option<String>);

impl TokenSource for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        self.0.clone()
    }
}

pub struct VerifyClient {
    http: Client,
    endpoint: String,
    timeout: Duration,
    require_auth: bool,
    tokens: Arc<dyn TokenSource>,
}

#[derive(Debug, Deserialize)]
struct WireResult {
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    feedback: Option<String>,
}

impl VerifyClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.into(),
            timeout: DEFAULT_TIMEOUT,
            require_auth: false,
            tokens: Arc::new(StaticToken::default()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_tokens(mut self, tokens: Arc<dyn TokenSource>) -> Self {
        self.tokens = tokens;
        self
    }

    /// Refuse to send verification requests without a token.
    pub fn require_auth(mut self, require: bool) -> Self {
        self.require_auth = require;
        self
    }

    /// Checks the proxy is reachable without spending a model call.
    pub async fn ping(&self) -> ClientResult<PingReply> {
        let (status, text) = self
            .post(&serde_json::json!({ "ping": true }), false)
            .await?;
        if !status.is_success() {
            return Err(ClientError::Upstream {
                status: status.as_u16(),
                detail: text,
            });
        }
        serde_json::from_str(&text).map_err(|_| ClientError::Upstream {
            status: status.as_u16(),
            detail: format!("unexpected ping reply: {text}"),
        })
    }

    pub async fn submit(&self, request: &VerificationRequest) -> ClientResult<VerificationResult> {
        if request.step_text().trim().is_empty() {
            return Err(ClientError::EmptyStep);
        }

        let (status, text) = self.post(request, self.require_auth).await?;
        if !status.is_success() {
            warn!(status = status.as_u16(), "Verification rejected by proxy");
            return Err(ClientError::Upstream {
                status: status.as_u16(),
                detail: text,
            });
        }

        let result = parse_result(&text);
        info!(confidence = result.confidence, "Verification result received");
        Ok(result)
    }

    /// Captures one frame and verifies it.
    pub async fn verify_single<S: VideoSource + ?Sized>(
        &self,
        source: &mut S,
        step: &str,
    ) -> ClientResult<VerificationResult> {
        if step.trim().is_empty() {
            return Err(ClientError::EmptyStep);
        }
        let image = hands::capture(source, SINGLE_SHOT_QUALITY)?;
        if !image.is_valid() {
            return Err(ClientError::NoValidFrames);
        }
        self.submit(&VerificationRequest::Single {
            step_text: step.to_string(),
            image,
        })
        .await
    }

    /// Captures a burst, keeps the best frame, and verifies only that one.
    pub async fn verify_burst<S: VideoSource + ?Sized>(
        &self,
        source: &mut S,
        step: &str,
        count: usize,
        gap: Duration,
    ) -> ClientResult<VerificationResult> {
        if step.trim().is_empty() {
            return Err(ClientError::EmptyStep);
        }
        let frames = hands::capture_burst(source, count, gap).await?;
        let best = hands::pick_best_frame(&frames)
            .cloned()
            .ok_or(ClientError::NoValidFrames)?;
        debug!(len = best.encoded_len(), "Best frame chosen");
        self.submit(&VerificationRequest::Single {
            step_text: step.to_string(),
            image: best,
        })
        .await
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        body: &B,
        needs_auth: bool,
    ) -> ClientResult<(StatusCode, String)> {
        let mut request = self.http.post(&self.endpoint).json(body);
        match self.tokens.bearer_token().filter(|t| !t.trim().is_empty()) {
            Some(token) => request = request.bearer_auth(token),
            None if needs_auth => return Err(ClientError::Unauthenticated),
            None => {}
        }

        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, text))
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Err(_) => Err(ClientError::Timeout),
            Ok(Err(e)) if e.is_timeout() => Err(ClientError::Timeout),
            Ok(Err(e)) => Err(ClientError::Transport(e)),
            Ok(Ok(reply)) => Ok(reply),
        }
    }
}

/// Reads a 2xx body. Anything that isn't the expected JSON becomes feedback
/// with zero confidence.
pub fn parse_result(text: &str) -> VerificationResult {
    match serde_json::from_str::<WireResult>(text) {
        Ok(wire) => VerificationResult::new(
            wire.confidence.unwrap_or(0.0),
            wire.feedback.unwrap_or_default(),
        ),
        Err(_) => VerificationResult::new(0.0, text),
    }
}
