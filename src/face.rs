//! HTTP surface of the verification proxy.
//!
//! One POST route. Every answer, errors included, is JSON and carries the
//! CORS headers, so browsers can read the failure detail.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    AUTHORIZATION, VARY,
};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use serde::Deserialize;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::brain::{self, GeminiModel, VisionModel};
use crate::config::ProxyConfig;
use crate::error::{ProxyError, ProxyResult};
use crate::hands::pick_best_frame;
use crate::retry::RetryPolicy;
use crate::types::{ErrorBody, ImagePayload, PingReply};

const ALLOW_METHODS: &str = "POST, OPTIONS";
const ALLOW_HEADERS: &str = "authorization, x-client-info, apikey, content-type";

/// Everything a request handler needs. Built once at startup and shared
/// read-only between requests.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    pub model: Arc<dyn VisionModel>,
    pub policy: RetryPolicy,
}

impl AppState {
    pub fn new(config: ProxyConfig, model: Arc<dyn VisionModel>) -> Self {
        let policy = config.retry_policy();
        Self {
            config: Arc::new(config),
            model,
            policy,
        }
    }

    /// State backed by the real Gemini endpoint named in `config`.
    pub fn from_config(config: ProxyConfig) -> Self {
        let model = GeminiModel::new(
            reqwest::Client::new(),
            config.upstream_url.clone(),
            config.api_key().unwrap_or_default(),
            config.model.clone(),
        );
        Self::new(config, Arc::new(model))
    }
}

pub fn build_router(state: AppState) -> Router {
    let config = state.config.clone();

    let route = if config.route.starts_with('/') {
        config.route.clone()
    } else {
        format!("/{}", config.route)
    };

    let origin = HeaderValue::from_str(&config.allow_origin).unwrap_or_else(|_| {
        warn!(origin = %config.allow_origin, "Invalid allow-origin, using *");
        HeaderValue::from_static("*")
    });

    Router::new()
        .route(&route, any(verify_step))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_ALLOW_ORIGIN,
            origin,
        ))
        .layer(SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOW_METHODS),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOW_HEADERS),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            VARY,
            HeaderValue::from_static("Origin"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Loosely typed body as it arrives. Only lives until `ProxyRequest::parse`.
#[derive(Debug, Default, Deserialize)]
struct RawBody {
    #[serde(default)]
    ping: Option<bool>,
    #[serde(default)]
    instruction_step: Option<String>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    frames: Option<Vec<String>>,
}

/// A request body after validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ProxyRequest {
    Ping,
    SingleImageVerify { step: String, image: ImagePayload },
    BurstVerify { step: String, frames: Vec<ImagePayload> },
}

impl ProxyRequest {
    pub fn parse(body: &[u8]) -> ProxyResult<Self> {
        let raw: RawBody =
            serde_json::from_slice(body).map_err(|e| ProxyError::InvalidJson(e.to_string()))?;
        Self::validate(raw)
    }

    fn validate(raw: RawBody) -> ProxyResult<Self> {
        if raw.ping == Some(true) {
            return Ok(ProxyRequest::Ping);
        }

        let step = raw
            .instruction_step
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ProxyError::BadRequest("Missing instruction_step".into()))?
            .to_string();

        match (raw.image, raw.frames) {
            (Some(_), Some(_)) => Err(ProxyError::BadRequest(
                "Provide either image or frames[], not both".into(),
            )),
            (Some(image), None) => {
                let image = ImagePayload::from_data_url(&image)
                    .map_err(|e| ProxyError::BadRequest(format!("Invalid image: {e}")))?;
                if !image.is_valid() {
                    return Err(ProxyError::BadRequest(
                        "image is too small to be a camera frame".into(),
                    ));
                }
                Ok(ProxyRequest::SingleImageVerify { step, image })
            }
            (None, Some(frames)) => {
                let frames: Vec<ImagePayload> = frames
                    .iter()
                    .filter_map(|f| ImagePayload::from_data_url(f).ok())
                    .filter(ImagePayload::is_valid)
                    .collect();
                if frames.is_empty() {
                    return Err(ProxyError::BadRequest(
                        "frames[] contains no usable image".into(),
                    ));
                }
                Ok(ProxyRequest::BurstVerify { step, frames })
            }
            (None, None) => Err(ProxyError::BadRequest("Provide image or frames[]".into())),
        }
    }

    /// The step and the single frame the model will see.
    pub fn into_job(self) -> Option<(String, ImagePayload)> {
        match self {
            ProxyRequest::Ping => None,
            ProxyRequest::SingleImageVerify { step, image } => Some((step, image)),
            ProxyRequest::BurstVerify { step, frames } => {
                pick_best_frame(&frames).cloned().map(|best| (step, best))
            }
        }
    }
}

/// Token from `Authorization: Bearer <token>`, if present and non-empty.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

async fn verify_step(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    if method == Method::OPTIONS {
        return StatusCode::NO_CONTENT.into_response();
    }

    match handle(&state, &method, &headers, body).await {
        Ok(response) => response,
        Err(err) => {
            if err.status_code().is_server_error() {
                warn!(status = err.status_code().as_u16(), error = %err, "Verification failed");
            } else {
                info!(status = err.status_code().as_u16(), error = %err, "Request rejected");
            }
            err.into_response()
        }
    }
}

async fn handle(
    state: &AppState,
    method: &Method,
    headers: &HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> ProxyResult<Response> {
    if method != Method::POST {
        return Err(ProxyError::MethodNotAllowed);
    }

    let body = body.map_err(|e| ProxyError::InvalidJson(e.body_text()))?;
    let request = ProxyRequest::parse(&body)?;

    if request == ProxyRequest::Ping {
        info!("Ping");
        return Ok(Json(PingReply {
            ok: true,
            model: state.config.model.clone(),
        })
        .into_response());
    }

    if state.config.require_auth && bearer_token(headers).is_none() {
        return Err(ProxyError::Unauthorized);
    }

    if state.config.api_key().is_none() {
        return Err(ProxyError::Misconfigured("GEMINI_API_KEY is not set".into()));
    }

    let burst = matches!(request, ProxyRequest::BurstVerify { .. });
    let (step, image) = request
        .into_job()
        .ok_or_else(|| ProxyError::BadRequest("Provide image or frames[]".into()))?;
    info!(burst, frame_len = image.encoded_len(), "Verifying step");

    let result = brain::verify(state.model.as_ref(), &state.policy, &step, &image).await?;
    Ok(Json(result).into_response())
}

async fn not_found() -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            error: "Not found".into(),
            detail: None,
            status: None,
        }),
    )
}
