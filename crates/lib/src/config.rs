//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.scout/config.json`) and environment.
//! Secrets have no built-in values: [`Settings::resolve`] fails when a required one is missing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// System instruction sent ahead of every prompt unless overridden in config.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str =
    "你是一位專業的研究助理。請一律使用繁體中文回答，以 Markdown 條列整理重點，並在適當時註明資料來源。";

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Messaging channel settings (LINE).
    #[serde(default)]
    pub channels: ChannelsConfig,

    /// Search and page-reader settings.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Chat service settings.
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Knowledge-store write-back settings.
    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    /// Background worker pool settings.
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

/// Gateway bind, port, and auth settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for HTTP (default 10000). The PORT env var overrides it when serving.
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "0.0.0.0"). Overridden by SCOUT_BIND.
    #[serde(default = "default_gateway_bind")]
    pub bind: String,

    #[serde(default)]
    pub auth: GatewayAuthConfig,
}

/// Auth for `POST /research`. The LINE webhook is authenticated by its signature instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayAuthConfig {
    #[serde(default)]
    pub mode: GatewayAuthMode,

    /// Bearer token for `/research`. Overridden by SCOUT_API_TOKEN env.
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayAuthMode {
    /// No auth on `/research`.
    #[default]
    None,

    /// Require `Authorization: Bearer <token>`.
    Token,
}

fn default_gateway_port() -> u16 {
    10000
}

fn default_gateway_bind() -> String {
    "0.0.0.0".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
            auth: GatewayAuthConfig::default(),
        }
    }
}

/// Per-channel config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsConfig {
    #[serde(default)]
    pub line: LineChannelConfig,
}

/// LINE Messaging API channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineChannelConfig {
    /// When false, `/callback` is not mounted and no LINE secrets are required.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Channel secret used to verify X-Line-Signature. Overridden by LINE_CHANNEL_SECRET.
    pub channel_secret: Option<String>,
    /// Channel access token for the reply API. Overridden by LINE_CHANNEL_ACCESS_TOKEN.
    pub access_token: Option<String>,
    /// Messaging API base (tests point this at a local stub).
    pub api_base: Option<String>,
    #[serde(default = "default_delivery_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_delivery_timeout_secs() -> u64 {
    15
}

impl Default for LineChannelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channel_secret: None,
            access_token: None,
            api_base: None,
            timeout_secs: default_delivery_timeout_secs(),
        }
    }
}

/// Context retrieval: Tavily search, page reader, and the keyword fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalConfig {
    /// Tavily API key. Overridden by TAVILY_API_KEY.
    pub search_api_key: Option<String>,
    /// Search endpoint (default https://api.tavily.com/search).
    pub search_endpoint: Option<String>,
    /// Page-reader base; the target URL is appended after a slash (default https://r.jina.ai).
    pub reader_base: Option<String>,
    /// Optional reader key. Overridden by READER_API_KEY.
    pub reader_api_key: Option<String>,
    /// Web-search page used when the search API fails; `{query}` is replaced by the encoded keyword.
    pub fallback_search_url: Option<String>,
    #[serde(default = "default_retrieval_timeout_secs")]
    pub timeout_secs: u64,
    /// Bodies shorter than this (in chars) count as a failed fetch.
    #[serde(default = "default_min_body_chars")]
    pub min_body_chars: usize,
    /// Per-source character budget.
    #[serde(default = "default_source_budget")]
    pub source_budget: usize,
    /// Same-domain sub-pages fetched when the input is a URL.
    #[serde(default = "default_max_sub_links")]
    pub max_sub_links: usize,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_retrieval_timeout_secs() -> u64 {
    45
}

fn default_min_body_chars() -> usize {
    100
}

fn default_source_budget() -> usize {
    3000
}

fn default_max_sub_links() -> usize {
    3
}

fn default_max_results() -> usize {
    3
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            search_api_key: None,
            search_endpoint: None,
            reader_base: None,
            reader_api_key: None,
            fallback_search_url: None,
            timeout_secs: default_retrieval_timeout_secs(),
            min_body_chars: default_min_body_chars(),
            source_budget: default_source_budget(),
            max_sub_links: default_max_sub_links(),
            max_results: default_max_results(),
        }
    }
}

/// Which chat service answers questions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationBackend {
    /// AnythingLLM workspace chat (`/api/v1/workspace/{slug}/chat`).
    #[default]
    AnythingLlm,
    /// OpenAI-compatible `/chat/completions`.
    Openai,
}

/// Chat service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(default)]
    pub backend: GenerationBackend,
    /// AnythingLLM base URL. Overridden by ANYTHING_LLM_URL.
    pub anything_llm_url: Option<String>,
    /// AnythingLLM API key. Overridden by ANYTHING_LLM_KEY.
    pub anything_llm_key: Option<String>,
    /// AnythingLLM workspace slug. Overridden by ANYTHING_LLM_WORKSPACE.
    pub workspace: Option<String>,
    /// OpenAI-compatible base URL including `/v1`. Overridden by OPENAI_BASE_URL.
    pub openai_base_url: Option<String>,
    /// OpenAI-compatible API key. Overridden by OPENAI_API_KEY.
    pub openai_api_key: Option<String>,
    /// Model id for the openai backend.
    #[serde(default = "default_model")]
    pub model: String,
    /// Static system instruction; defaults to [`DEFAULT_SYSTEM_INSTRUCTION`].
    pub system_instruction: Option<String>,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    /// Character budget for the rendered context block.
    #[serde(default = "default_context_budget")]
    pub context_budget: usize,
    /// Number of most recent history turns kept in the prompt.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_generation_timeout_secs() -> u64 {
    90
}

fn default_context_budget() -> usize {
    8000
}

fn default_history_window() -> usize {
    6
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            backend: GenerationBackend::default(),
            anything_llm_url: None,
            anything_llm_key: None,
            workspace: None,
            openai_base_url: None,
            openai_api_key: None,
            model: default_model(),
            system_instruction: None,
            timeout_secs: default_generation_timeout_secs(),
            context_budget: default_context_budget(),
            history_window: default_history_window(),
        }
    }
}

/// Write fetched context back into the AnythingLLM workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_knowledge_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_knowledge_timeout_secs() -> u64 {
    30
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_secs: default_knowledge_timeout_secs(),
        }
    }
}

/// Background worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

fn default_workers() -> usize {
    4
}

fn default_queue_size() -> usize {
    64
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_size: default_queue_size(),
        }
    }
}

/// Non-blank env var, trimmed.
fn env_nonblank(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Env var first, then the config value; blank counts as unset on both sides.
fn env_or(key: &str, configured: Option<&String>) -> Option<String> {
    env_nonblank(key).or_else(|| {
        configured
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// Port from the PORT env var (hosting platforms assign it).
pub fn port_from_env() -> Option<u16> {
    env_nonblank("PORT").and_then(|p| p.parse().ok())
}

/// Resolve the `/research` token: env SCOUT_API_TOKEN overrides config.
pub fn resolve_api_token(config: &Config) -> Option<String> {
    env_or("SCOUT_API_TOKEN", config.gateway.auth.token.as_ref())
}

/// True if the bind address is loopback (127.0.0.1, ::1, etc.).
pub fn is_loopback_bind(bind: &str) -> bool {
    let b = bind.trim();
    b == "127.0.0.1" || b == "::1" || b == "localhost"
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("SCOUT_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".scout").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path (or the default). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

/// Resolved LINE channel credentials.
#[derive(Debug, Clone)]
pub struct LineSettings {
    pub channel_secret: String,
    pub access_token: String,
    pub api_base: Option<String>,
    pub timeout: Duration,
}

/// Resolved retrieval settings.
#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    pub search_api_key: String,
    pub search_endpoint: Option<String>,
    pub reader_base: Option<String>,
    pub reader_api_key: Option<String>,
    pub fallback_search_url: Option<String>,
    pub timeout: Duration,
    pub min_body_chars: usize,
    pub source_budget: usize,
    pub max_sub_links: usize,
    pub max_results: usize,
}

/// AnythingLLM connection (chat and knowledge store share it).
#[derive(Debug, Clone)]
pub struct AnythingLlmSettings {
    pub base_url: String,
    pub api_key: String,
    pub workspace: String,
}

/// Resolved chat service target.
#[derive(Debug, Clone)]
pub enum GenerationTarget {
    AnythingLlm(AnythingLlmSettings),
    Openai {
        base_url: String,
        api_key: String,
        model: String,
    },
}

/// Resolved generation settings.
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub target: GenerationTarget,
    pub system_instruction: String,
    pub timeout: Duration,
    pub context_budget: usize,
    pub history_window: usize,
}

/// Resolved knowledge-store settings.
#[derive(Debug, Clone)]
pub struct KnowledgeSettings {
    pub anything_llm: AnythingLlmSettings,
    pub timeout: Duration,
}

/// Everything the service needs, resolved once at startup and passed down explicitly.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind: String,
    pub port: u16,
    /// Required bearer token for `/research`; None when auth mode is none.
    pub api_token: Option<String>,
    /// None when the LINE channel is disabled.
    pub line: Option<LineSettings>,
    pub retrieval: RetrievalSettings,
    pub generation: GenerationSettings,
    /// None when write-back is disabled.
    pub knowledge: Option<KnowledgeSettings>,
    pub workers: usize,
    pub queue_size: usize,
}

fn require(value: Option<String>, what: &str, env: &str) -> Result<String> {
    value.ok_or_else(|| anyhow::anyhow!("missing {} (set {} or the config file)", what, env))
}

fn resolve_anything_llm(config: &Config) -> Result<AnythingLlmSettings> {
    let g = &config.generation;
    Ok(AnythingLlmSettings {
        base_url: require(
            env_or("ANYTHING_LLM_URL", g.anything_llm_url.as_ref()),
            "AnythingLLM base URL",
            "ANYTHING_LLM_URL",
        )?
        .trim_end_matches('/')
        .to_string(),
        api_key: require(
            env_or("ANYTHING_LLM_KEY", g.anything_llm_key.as_ref()),
            "AnythingLLM API key",
            "ANYTHING_LLM_KEY",
        )?,
        workspace: require(
            env_or("ANYTHING_LLM_WORKSPACE", g.workspace.as_ref()),
            "AnythingLLM workspace slug",
            "ANYTHING_LLM_WORKSPACE",
        )?,
    })
}

impl Settings {
    /// Resolve config plus env into settings. Fails fast on any missing secret.
    pub fn resolve(config: &Config) -> Result<Self> {
        let bind = env_nonblank("SCOUT_BIND").unwrap_or_else(|| config.gateway.bind.trim().to_string());

        let api_token = if config.gateway.auth.mode == GatewayAuthMode::Token {
            Some(require(resolve_api_token(config), "gateway token", "SCOUT_API_TOKEN")?)
        } else {
            None
        };

        let line_cfg = &config.channels.line;
        let line = if line_cfg.enabled {
            Some(LineSettings {
                channel_secret: require(
                    env_or("LINE_CHANNEL_SECRET", line_cfg.channel_secret.as_ref()),
                    "LINE channel secret",
                    "LINE_CHANNEL_SECRET",
                )?,
                access_token: require(
                    env_or("LINE_CHANNEL_ACCESS_TOKEN", line_cfg.access_token.as_ref()),
                    "LINE channel access token",
                    "LINE_CHANNEL_ACCESS_TOKEN",
                )?,
                api_base: line_cfg.api_base.clone(),
                timeout: Duration::from_secs(line_cfg.timeout_secs),
            })
        } else {
            None
        };

        let r = &config.retrieval;
        let retrieval = RetrievalSettings {
            search_api_key: require(
                env_or("TAVILY_API_KEY", r.search_api_key.as_ref()),
                "search API key",
                "TAVILY_API_KEY",
            )?,
            search_endpoint: r.search_endpoint.clone(),
            reader_base: r.reader_base.clone(),
            reader_api_key: env_or("READER_API_KEY", r.reader_api_key.as_ref()),
            fallback_search_url: r.fallback_search_url.clone(),
            timeout: Duration::from_secs(r.timeout_secs),
            min_body_chars: r.min_body_chars,
            source_budget: r.source_budget,
            max_sub_links: r.max_sub_links,
            max_results: r.max_results,
        };

        let g = &config.generation;
        let target = match g.backend {
            GenerationBackend::AnythingLlm => GenerationTarget::AnythingLlm(resolve_anything_llm(config)?),
            GenerationBackend::Openai => GenerationTarget::Openai {
                base_url: require(
                    env_or("OPENAI_BASE_URL", g.openai_base_url.as_ref()),
                    "OpenAI-compatible base URL",
                    "OPENAI_BASE_URL",
                )?
                .trim_end_matches('/')
                .to_string(),
                api_key: require(
                    env_or("OPENAI_API_KEY", g.openai_api_key.as_ref()),
                    "OpenAI-compatible API key",
                    "OPENAI_API_KEY",
                )?,
                model: g.model.trim().to_string(),
            },
        };
        let system_instruction = g
            .system_instruction
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SYSTEM_INSTRUCTION.to_string());
        let generation = GenerationSettings {
            target,
            system_instruction,
            timeout: Duration::from_secs(g.timeout_secs),
            context_budget: g.context_budget,
            history_window: g.history_window,
        };

        let knowledge = if config.knowledge.enabled {
            Some(KnowledgeSettings {
                anything_llm: resolve_anything_llm(config)?,
                timeout: Duration::from_secs(config.knowledge.timeout_secs),
            })
        } else {
            None
        };

        Ok(Self {
            bind,
            port: config.gateway.port,
            api_token,
            line,
            retrieval,
            generation,
            knowledge,
            workers: config.dispatch.workers.max(1),
            queue_size: config.dispatch.queue_size.max(1),
        })
    }
}
