//! Step verification for guided walkthroughs.
//!
//! A student follows a lesson one step at a time. For each step the client
//! grabs a frame from the camera, sends it with the step text to the proxy,
//! and the proxy asks a vision model whether the step looks done.

pub mod brain;
pub mod client;
pub mod config;
pub mod error;
pub mod face;
pub mod hands;
pub mod retry;
pub mod session;
pub mod types;
pub mod verdict;

pub use client::{StaticToken, TokenSource, VerifyClient};
pub use config::ProxyConfig;
pub use error::{ClientError, ProxyError};
pub use face::{AppState, ProxyRequest, build_router};
pub use hands::{FrameDirectory, VideoSource, capture, capture_burst, pick_best_frame};
pub use retry::RetryPolicy;
pub use session::{ACCEPT_THRESHOLD, Advance, Progress, StepSession};
pub use types::{ImagePayload, Instruction, MediaType, VerificationRequest, VerificationResult};
