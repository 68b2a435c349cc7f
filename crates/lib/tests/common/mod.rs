//! Shared fakes and helpers for the gateway integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use scout::channels::{DeliveryError, ReplyChannel, ReplyHandle};
use scout::dispatch::DispatchPool;
use scout::gateway::{self, GatewayState, LineEndpoint};
use scout::knowledge::{KnowledgeDocument, KnowledgeError, KnowledgeStore};
use scout::llm::{GenerationError, Generator, Prompt, PromptBuilder};
use scout::pipeline::Pipeline;
use scout::retrieval::{ContextSource, RetrievalError, RetrievalMode, RetrievedContext, Retriever};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

pub const CHANNEL_SECRET: &str = "channel-secret";

pub struct FakeRetriever {
    pub result: Result<RetrievedContext, RetrievalError>,
    pub calls: Mutex<Vec<RetrievalMode>>,
}

impl FakeRetriever {
    pub fn new(result: Result<RetrievedContext, RetrievalError>) -> Arc<Self> {
        Arc::new(Self {
            result,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<RetrievalMode> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Retriever for FakeRetriever {
    async fn retrieve(&self, mode: &RetrievalMode) -> Result<RetrievedContext, RetrievalError> {
        self.calls.lock().unwrap().push(mode.clone());
        self.result.clone()
    }
}

pub struct FakeGenerator {
    pub result: Result<String, GenerationError>,
    pub delay: Duration,
    pub prompts: Mutex<Vec<Prompt>>,
}

impl FakeGenerator {
    pub fn new(result: Result<String, GenerationError>) -> Arc<Self> {
        Self::slow(result, Duration::ZERO)
    }

    pub fn slow(result: Result<String, GenerationError>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            result,
            delay,
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for FakeGenerator {
    async fn generate(&self, prompt: &Prompt) -> Result<String, GenerationError> {
        self.prompts.lock().unwrap().push(prompt.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.result.clone()
    }
}

/// Records every reply instead of calling a platform.
#[derive(Default)]
pub struct RecordingChannel {
    pub replies: Mutex<Vec<(ReplyHandle, String)>>,
}

impl RecordingChannel {
    pub fn replies(&self) -> Vec<(ReplyHandle, String)> {
        self.replies.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReplyChannel for RecordingChannel {
    fn id(&self) -> &str {
        "line"
    }

    async fn reply(&self, handle: ReplyHandle, text: &str) -> Result<(), DeliveryError> {
        self.replies.lock().unwrap().push((handle, text.to_string()));
        Ok(())
    }
}

/// Records stored documents; fails every call when `fail` is set.
#[derive(Default)]
pub struct RecordingKnowledge {
    pub fail: bool,
    pub docs: Mutex<Vec<KnowledgeDocument>>,
}

impl RecordingKnowledge {
    pub fn docs(&self) -> Vec<KnowledgeDocument> {
        self.docs.lock().unwrap().clone()
    }
}

#[async_trait]
impl KnowledgeStore for RecordingKnowledge {
    async fn store(&self, doc: &KnowledgeDocument) -> Result<(), KnowledgeError> {
        self.docs.lock().unwrap().push(doc.clone());
        if self.fail {
            return Err(KnowledgeError::Api("embedding service unavailable".to_string()));
        }
        Ok(())
    }
}

pub fn context(text: &str) -> RetrievedContext {
    RetrievedContext {
        sources: vec![ContextSource {
            title: Some("Example".to_string()),
            url: Some("https://example.com/".to_string()),
            text: text.to_string(),
        }],
    }
}

pub fn state(
    retriever: Arc<FakeRetriever>,
    generator: Arc<FakeGenerator>,
    channel: Option<Arc<RecordingChannel>>,
) -> GatewayState {
    GatewayState {
        pipeline: Pipeline::new(retriever, generator, PromptBuilder::new("system", 6, 8000)),
        api_token: None,
        line: channel.map(|c| LineEndpoint {
            channel_secret: CHANNEL_SECRET.to_string(),
            channel: c,
        }),
        knowledge: None,
        pool: Arc::new(DispatchPool::start(2, 8)),
    }
}

/// A gateway serving on an ephemeral port until `stop` is sent.
pub struct RunningGateway {
    pub addr: SocketAddr,
    pub pool: Arc<DispatchPool>,
    stop: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<anyhow::Result<()>>,
}

impl RunningGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Stop accepting requests and wait until queued jobs have finished.
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
        self.handle.await.expect("gateway task").expect("gateway serve");
    }
}

pub async fn spawn_gateway(state: GatewayState) -> RunningGateway {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    let pool = state.pool.clone();
    let (tx, rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(gateway::serve(listener, state, async move {
        let _ = rx.await;
    }));
    RunningGateway {
        addr,
        pool,
        stop: Some(tx),
        handle,
    }
}

/// Base64 HMAC-SHA256 of `body`, as LINE sends in X-Line-Signature.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<sha2::Sha256>::new_from_slice(secret.as_bytes()).expect("hmac key");
    mac.update(body);
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

/// Serve `router` on an ephemeral port; returns its base URL. Used to stub upstream services.
pub async fn spawn_stub(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{}", addr)
}
