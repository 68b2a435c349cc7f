//! Gateway HTTP server.

use crate::channels::{
    verify_signature, InboundMessage, LineChannel, LineWebhook, ReplyChannel, LINE_SIGNATURE_HEADER,
};
use crate::config::{self, Config, Settings};
use crate::dispatch::DispatchPool;
use crate::gateway::protocol::{ErrorResponse, HealthResponse, ResearchRequest, ResearchResponse};
use crate::knowledge::{AnythingLlmKnowledgeStore, KnowledgeDocument, KnowledgeStore};
use crate::llm::{self, PromptBuilder};
use crate::pipeline::{Pipeline, Question};
use crate::retrieval::WebRetriever;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::future::Future;
use std::sync::Arc;

/// LINE webhook verification secret plus the channel used for replies.
#[derive(Clone)]
pub struct LineEndpoint {
    pub channel_secret: String,
    pub channel: Arc<dyn ReplyChannel>,
}

/// Shared state for the gateway. Built once at startup; holds no per-request data.
#[derive(Clone)]
pub struct GatewayState {
    pub pipeline: Pipeline,
    /// When Some, `/research` requires `Authorization: Bearer <token>`.
    pub api_token: Option<String>,
    /// When None, `/callback` is not mounted.
    pub line: Option<LineEndpoint>,
    pub knowledge: Option<Arc<dyn KnowledgeStore>>,
    pub pool: Arc<DispatchPool>,
}

/// Build production state from resolved settings. Must run inside a tokio runtime (starts the pool).
pub fn build_state(settings: &Settings) -> Result<GatewayState> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("scout/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("building http client")?;

    let retriever = Arc::new(WebRetriever::new(client.clone(), &settings.retrieval));
    let generator = llm::build_generator(client.clone(), &settings.generation);
    let pipeline = Pipeline::new(
        retriever,
        generator,
        PromptBuilder::from_settings(&settings.generation),
    );

    let line = settings.line.as_ref().map(|l| LineEndpoint {
        channel_secret: l.channel_secret.clone(),
        channel: Arc::new(LineChannel::new(client.clone(), l)) as Arc<dyn ReplyChannel>,
    });
    if line.is_none() {
        log::info!("line channel disabled; /callback not mounted");
    }

    let knowledge = settings.knowledge.as_ref().map(|k| {
        log::info!("knowledge write-back enabled (workspace {})", k.anything_llm.workspace);
        Arc::new(AnythingLlmKnowledgeStore::new(client.clone(), k)) as Arc<dyn KnowledgeStore>
    });

    Ok(GatewayState {
        pipeline,
        api_token: settings.api_token.clone(),
        line,
        knowledge,
        pool: Arc::new(DispatchPool::start(settings.workers, settings.queue_size)),
    })
}

pub fn build_router(state: GatewayState) -> Router {
    let mut app = Router::new()
        .route("/", get(health_http))
        .route("/research", post(research));
    if state.line.is_some() {
        app = app.route("/callback", post(line_callback));
    }
    app.with_state(state)
}

/// Serve on `listener` until `shutdown` resolves, then drain the dispatch pool.
pub async fn serve<F>(listener: tokio::net::TcpListener, state: GatewayState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let pool = state.pool.clone();
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("gateway server exited")?;
    pool.shutdown().await;
    Ok(())
}

/// Run the gateway; binds to the resolved bind:port. Fails fast when a required secret is missing.
/// Blocks until shutdown (SIGINT/SIGTERM), then lets queued replies finish.
pub async fn run_gateway(config: Config) -> Result<()> {
    let settings = Settings::resolve(&config)?;
    if !config::is_loopback_bind(&settings.bind) && settings.api_token.is_none() {
        log::warn!(
            "binding to {} with no token on /research (set gateway.auth.mode to \"token\" to require one)",
            settings.bind
        );
    }
    let state = build_state(&settings)?;

    let bind_addr = format!("{}:{}", settings.bind, settings.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    serve(listener, state, shutdown_signal()).await?;
    log::info!("gateway stopped");
    Ok(())
}

/// Completes on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                log::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, finishing queued replies");
}

/// GET / returns a simple health JSON (for probes).
async fn health_http() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "running".to_string(),
        service: "scout".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

/// POST /research: answer synchronously as `{report}`.
async fn research(State(state): State<GatewayState>, headers: HeaderMap, body: Bytes) -> Response {
    if let Some(ref expected) = state.api_token {
        if bearer_token(&headers) != Some(expected.as_str()) {
            return error_response(StatusCode::UNAUTHORIZED, "unauthorized");
        }
    }
    let request: ResearchRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("無法解析請求內容：{}", e)),
    };
    let question = match request.validate() {
        Ok(q) => q,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };
    log::info!(
        "[{}] research request from {}",
        question.id,
        question.caller.as_deref().unwrap_or("anonymous")
    );

    let outcome = state.pipeline.run(&question).await;
    let report = outcome.report();

    if let (Some(store), Some(doc)) = (state.knowledge.clone(), outcome.knowledge_document(&question)) {
        let label = format!("{}:knowledge", question.id);
        if let Err(e) = state.pool.submit(label, async move { write_back(store, doc).await }) {
            log::warn!("[{}] knowledge write-back not queued: {}", question.id, e);
        }
    }

    Json(ResearchResponse { report }).into_response()
}

/// POST /callback: LINE webhook. Verifies X-Line-Signature, queues each text message, returns "OK".
async fn line_callback(State(state): State<GatewayState>, headers: HeaderMap, body: Bytes) -> Response {
    let Some(line) = state.line.clone() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let signature = headers
        .get(LINE_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if let Err(e) = verify_signature(&line.channel_secret, &body, signature) {
        log::warn!("line webhook rejected: {}", e);
        return (StatusCode::BAD_REQUEST, "invalid signature").into_response();
    }
    let hook: LineWebhook = match serde_json::from_slice(&body) {
        Ok(h) => h,
        Err(e) => {
            log::warn!("line webhook body unparseable: {}", e);
            return (StatusCode::BAD_REQUEST, "invalid body").into_response();
        }
    };

    for msg in hook.text_messages() {
        let question = match Question::from_message(&msg.text, msg.caller.clone()) {
            Ok(q) => q,
            Err(e) => {
                log::debug!("line message skipped: {}", e);
                continue;
            }
        };
        let label = format!("{}:{}", question.id, msg.channel_id);
        let job = answer_inbound(
            state.pipeline.clone(),
            line.channel.clone(),
            state.knowledge.clone(),
            question,
            msg,
        );
        if let Err(e) = state.pool.submit(label, job) {
            log::warn!("line message dropped: {}", e);
        }
    }
    (StatusCode::OK, "OK").into_response()
}

/// Background job: run the pipeline, reply once through the channel, then write back context.
async fn answer_inbound(
    pipeline: Pipeline,
    channel: Arc<dyn ReplyChannel>,
    knowledge: Option<Arc<dyn KnowledgeStore>>,
    question: Question,
    msg: InboundMessage,
) {
    log::info!(
        "[{}] {} message from {}",
        question.id,
        msg.channel_id,
        msg.caller.as_deref().unwrap_or("unknown")
    );
    let outcome = pipeline.run(&question).await;
    match channel.reply(msg.reply_handle, &outcome.report()).await {
        Ok(()) => log::info!("[{}] reply delivered via {}", question.id, channel.id()),
        Err(e) => log::warn!("[{}] reply via {} failed: {}", question.id, channel.id(), e),
    }
    if let (Some(store), Some(doc)) = (knowledge, outcome.knowledge_document(&question)) {
        write_back(store, doc).await;
    }
}

async fn write_back(store: Arc<dyn KnowledgeStore>, doc: KnowledgeDocument) {
    match store.store(&doc).await {
        Ok(()) => log::info!("knowledge: stored \"{}\"", doc.title),
        Err(e) => log::warn!("knowledge: write-back of \"{}\" failed: {}", doc.title, e),
    }
}
