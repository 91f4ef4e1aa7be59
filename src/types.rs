use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Frames whose encoded payload is not longer than this are treated as
/// blank or corrupt captures.
pub const MIN_FRAME_LEN: usize = 1200;

/// Fallback feedback when the model gives nothing usable.
pub const DEFAULT_FEEDBACK: &str = "Checked.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaType {
    #[serde(rename = "image/jpeg")]
    Jpeg,
    #[serde(rename = "image/png")]
    Png,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Jpeg => "image/jpeg",
            MediaType::Png => "image/png",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Some(MediaType::Jpeg),
            "image/png" => Some(MediaType::Png),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageParseError {
    #[error("expected a data URL (data:<type>;base64,<payload>)")]
    NotDataUrl,
    #[error("unsupported media type '{0}', expected image/jpeg or image/png")]
    UnsupportedMediaType(String),
    #[error("payload is not valid base64")]
    NotBase64,
}

/// One encoded still frame. On the wire it travels as a data URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImagePayload {
    pub media_type: MediaType,
    /// Base64 payload, without the `data:` prefix.
    pub data: String,
}

impl ImagePayload {
    pub fn new(media_type: MediaType, data: impl Into<String>) -> Self {
        Self {
            media_type,
            data: data.into(),
        }
    }

    pub fn from_bytes(media_type: MediaType, bytes: &[u8]) -> Self {
        Self::new(media_type, STANDARD.encode(bytes))
    }

    /// Length of the base64 payload. Used both for the validity check and as
    /// the best-frame heuristic.
    pub fn encoded_len(&self) -> usize {
        self.data.len()
    }

    pub fn is_valid(&self) -> bool {
        self.encoded_len() > MIN_FRAME_LEN
    }

    pub fn decode(&self) -> Result<Vec<u8>, ImageParseError> {
        STANDARD
            .decode(self.data.as_bytes())
            .map_err(|_| ImageParseError::NotBase64)
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type.as_str(), self.data)
    }

    pub fn from_data_url(s: &str) -> Result<Self, ImageParseError> {
        let rest = s
            .trim()
            .strip_prefix("data:")
            .ok_or(ImageParseError::NotDataUrl)?;
        let (meta, data) = rest.split_once(',').ok_or(ImageParseError::NotDataUrl)?;
        let mime = meta
            .strip_suffix(";base64")
            .ok_or(ImageParseError::NotDataUrl)?;
        let media_type = MediaType::parse(mime)
            .ok_or_else(|| ImageParseError::UnsupportedMediaType(mime.to_string()))?;

        let payload = Self::new(media_type, data);
        payload.decode()?;
        Ok(payload)
    }
}

impl TryFrom<String> for ImagePayload {
    type Error = ImageParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_data_url(&value)
    }
}

impl From<ImagePayload> for String {
    fn from(value: ImagePayload) -> Self {
        value.to_data_url()
    }
}

/// The proxy's verdict on one captured frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Always within `[0, 1]`.
    pub confidence: f64,
    pub feedback: String,
}

impl VerificationResult {
    /// Builds a result, clamping the confidence and substituting the default
    /// feedback for blank text.
    pub fn new(confidence: f64, feedback: impl Into<String>) -> Self {
        let feedback = feedback.into();
        let feedback = if feedback.trim().is_empty() {
            DEFAULT_FEEDBACK.to_string()
        } else {
            feedback.trim().to_string()
        };
        Self {
            confidence: clamp_confidence(confidence),
            feedback,
        }
    }
}

/// Clamps to `[0, 1]`; NaN becomes 0.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Body sent by the client. Serializes to the proxy's JSON shape.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum VerificationRequest {
    Single {
        #[serde(rename = "instruction_step")]
        step_text: String,
        image: ImagePayload,
    },
    Burst {
        #[serde(rename = "instruction_step")]
        step_text: String,
        frames: Vec<ImagePayload>,
    },
}

impl VerificationRequest {
    pub fn step_text(&self) -> &str {
        match self {
            VerificationRequest::Single { step_text, .. }
            | VerificationRequest::Burst { step_text, .. } => step_text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingReply {
    pub ok: bool,
    pub model: String,
}

/// JSON body of every proxy error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

/// A published walkthrough. `content` holds one step per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
}

impl Instruction {
    pub fn steps(&self) -> Vec<String> {
        let steps: Vec<String> = self
            .content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect();

        if steps.is_empty() {
            vec![self.title.trim().to_string()]
        } else {
            steps
        }
    }
}
