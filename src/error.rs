//! Error types for the proxy and the submission client.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::types::ErrorBody;

/// Every failure the proxy can answer with. Each maps to one status code and
/// a JSON `ErrorBody`.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Invalid JSON body: {0}")]
    InvalidJson(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Missing bearer token")]
    Unauthorized,

    #[error("Server misconfiguration: {0}")]
    Misconfigured(String),

    #[error("timeout")]
    UpstreamTimeout { attempts: u32 },

    #[error("Gemini error ({status})")]
    Upstream { status: u16, detail: String },

    #[error("upstream unreachable: {0}")]
    Unreachable(String),

    #[error("unavailable")]
    Unavailable { status: u16, attempts: u32 },
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ProxyError::InvalidJson(_) | ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Unauthorized => StatusCode::UNAUTHORIZED,
            ProxyError::Misconfigured(_) | ProxyError::UpstreamTimeout { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ProxyError::Upstream { .. } | ProxyError::Unreachable(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn body(&self) -> ErrorBody {
        let (error, detail, status) = match self {
            ProxyError::MethodNotAllowed => ("Method not allowed".to_string(), None, None),
            ProxyError::InvalidJson(detail) => {
                ("Invalid JSON body".to_string(), Some(detail.clone()), None)
            }
            ProxyError::BadRequest(msg) => (msg.clone(), None, None),
            ProxyError::Unauthorized => ("Missing bearer token".to_string(), None, None),
            ProxyError::Misconfigured(detail) => (
                "Server misconfiguration".to_string(),
                Some(detail.clone()),
                None,
            ),
            ProxyError::UpstreamTimeout { attempts } => (
                "timeout".to_string(),
                Some(format!("no answer from model after {attempts} attempts")),
                None,
            ),
            ProxyError::Upstream { status, detail } => {
                ("Gemini error".to_string(), Some(detail.clone()), Some(*status))
            }
            ProxyError::Unreachable(detail) => (
                "upstream unreachable".to_string(),
                Some(detail.clone()),
                None,
            ),
            ProxyError::Unavailable { status, attempts } => (
                "unavailable".to_string(),
                Some(format!("model still busy after {attempts} attempts")),
                Some(*status),
            ),
        };
        ErrorBody {
            error,
            detail,
            status,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.body())).into_response()
    }
}

pub type ProxyResult<T> = Result<T, ProxyError>;

/// Failures on the capture/submit side.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("step text is empty")]
    EmptyStep,

    #[error("video source is not ready")]
    NoFrame,

    #[error("no captured frame passed the size check")]
    NoValidFrames,

    #[error("not signed in")]
    Unauthenticated,

    #[error("verification request timed out")]
    Timeout,

    #[error("verification service returned {status}: {detail}")]
    Upstream { status: u16, detail: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("could not encode frame: {0}")]
    Encode(#[from] image::ImageError),

    #[error("invalid image: {0}")]
    InvalidImage(#[from] crate::types::ImageParseError),
}

impl ClientError {
    /// Text suitable for showing to the person doing the task.
    pub fn user_message(&self) -> &'static str {
        match self {
            ClientError::EmptyStep => "There is no step to check.",
            ClientError::NoFrame | ClientError::Encode(_) | ClientError::InvalidImage(_) => {
                "Could not capture a frame from the camera."
            }
            ClientError::NoValidFrames => {
                "The camera frames looked blank. Check the lighting and try again."
            }
            ClientError::Unauthenticated => "Please sign in.",
            ClientError::Timeout | ClientError::Transport(_) => {
                "Verification took too long. Check your connection and try again."
            }
            ClientError::Upstream { .. } => "Verification service error.",
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_taxonomy() {
        assert_eq!(ProxyError::MethodNotAllowed.status_code(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(ProxyError::InvalidJson("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ProxyError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ProxyError::UpstreamTimeout { attempts: 3 }.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ProxyError::Upstream { status: 400, detail: String::new() }.status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ProxyError::Unavailable { status: 503, attempts: 3 }.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn upstream_error_body_carries_status_and_detail() {
        let body = ProxyError::Upstream {
            status: 400,
            detail: "bad image".into(),
        }
        .body();
        assert_eq!(body.error, "Gemini error");
        assert_eq!(body.status, Some(400));
        assert_eq!(body.detail.as_deref(), Some("bad image"));
    }

    #[test]
    fn timeout_and_network_share_user_message() {
        assert_eq!(
            ClientError::Timeout.user_message(),
            "Verification took too long. Check your connection and try again."
        );
        assert_eq!(ClientError::Unauthenticated.user_message(), "Please sign in.");
    }
}
