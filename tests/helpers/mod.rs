//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use axum::Router;
use stepcheck::brain::{ModelFailure, VisionModel};
use stepcheck::{AppState, ImagePayload, ProxyConfig, build_router};

/// What the fake model does on every call.
#[derive(Debug, Clone)]
pub enum Behavior {
    Answer(String),
    Status(u16),
    Hang,
}

/// In-process stand-in for the vision model. Remembers the payload length of
/// every frame it was shown.
pub struct FakeModel {
    behavior: Behavior,
    seen: Mutex<Vec<usize>>,
}

impl FakeModel {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn answering(text: &str) -> Arc<Self> {
        Self::new(Behavior::Answer(text.to_string()))
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn seen_lengths(&self) -> Vec<usize> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl VisionModel for FakeModel {
    async fn generate(&self, prompt: &str, image: &ImagePayload) -> Result<String, ModelFailure> {
        assert!(prompt.contains("confidence"));
        self.seen.lock().unwrap().push(image.encoded_len());
        match &self.behavior {
            Behavior::Answer(text) => Ok(text.clone()),
            Behavior::Status(status) => Err(ModelFailure::Status {
                status: *status,
                body: format!("fake upstream {status}"),
            }),
            Behavior::Hang => std::future::pending().await,
        }
    }
}

/// Config good enough to reach the model.
pub fn config() -> ProxyConfig {
    ProxyConfig {
        api_key: Some("test-key".into()),
        model: "fake-vision".into(),
        ..ProxyConfig::default()
    }
}

pub fn app(config: ProxyConfig, model: Arc<FakeModel>) -> Router {
    build_router(AppState::new(config, model))
}

pub fn data_url(len: usize) -> String {
    format!("data:image/jpeg;base64,{}", "A".repeat(len))
}

pub fn payload(len: usize) -> ImagePayload {
    ImagePayload::from_data_url(&data_url(len)).unwrap()
}

/// Serves `app` on an ephemeral local port.
pub async fn spawn(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}
