use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "scout")]
#[command(about = "Scout CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config.json (no secrets are written).
    Init {
        /// Config file path (default: SCOUT_CONFIG_PATH or ~/.scout/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Run the gateway (GET /, POST /research, POST /callback for LINE).
    Serve {
        /// Config file path (default: SCOUT_CONFIG_PATH or ~/.scout/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// HTTP port (default from PORT, then config, then 10000)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Ask a running gateway a question and print the report.
    Ask {
        /// Config file path (default: SCOUT_CONFIG_PATH or ~/.scout/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Page to read and summarize
        #[arg(long, value_name = "URL", conflicts_with = "keyword")]
        url: Option<String>,

        /// Keyword to search for
        #[arg(long, short, value_name = "KEYWORD")]
        keyword: Option<String>,

        /// Question text
        query: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("scout {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Serve { config, port }) => {
            if let Err(e) = run_serve(config, port).await {
                log::error!("gateway failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Ask {
            config,
            url,
            keyword,
            query,
        }) => {
            if let Err(e) = run_ask(config, url, keyword, query).await {
                log::error!("ask failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(scout::config::default_config_path);
    let dir = scout::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    println!("set TAVILY_API_KEY, ANYTHING_LLM_URL, ANYTHING_LLM_KEY, ANYTHING_LLM_WORKSPACE, LINE_CHANNEL_SECRET and LINE_CHANNEL_ACCESS_TOKEN before `scout serve`");
    Ok(())
}

async fn run_serve(config_path: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let (mut config, path) = scout::config::load_config(config_path)?;
    log::debug!("config loaded from {}", path.display());
    if let Some(p) = port.or_else(scout::config::port_from_env) {
        config.gateway.port = p;
    }
    log::info!("starting gateway on {}:{}", config.gateway.bind, config.gateway.port);
    scout::gateway::run_gateway(config).await
}

async fn run_ask(
    config_path: Option<PathBuf>,
    url: Option<String>,
    keyword: Option<String>,
    query: Vec<String>,
) -> anyhow::Result<()> {
    let (config, _) = scout::config::load_config(config_path)?;
    let bind = config.gateway.bind.trim();
    let host = if bind.is_empty() || bind == "0.0.0.0" || bind == "::" {
        "127.0.0.1"
    } else {
        bind
    };
    let port = scout::config::port_from_env().unwrap_or(config.gateway.port);
    let endpoint = format!("http://{}:{}/research", host, port);

    let query = query.join(" ");
    let request = scout::gateway::ResearchRequest {
        query: Some(query).filter(|q| !q.trim().is_empty()),
        url,
        keyword,
        caller: Some("scout-cli".to_string()),
        ..Default::default()
    };

    let client = reqwest::Client::new();
    let mut req = client.post(&endpoint).json(&request);
    if let Some(token) = scout::config::resolve_api_token(&config) {
        req = req.bearer_auth(token);
    }
    let res = req.send().await.map_err(|e| anyhow::anyhow!("posting to {}: {}", endpoint, e))?;
    let status = res.status();
    let body: serde_json::Value = res
        .json()
        .await
        .map_err(|e| anyhow::anyhow!("reading response from {}: {}", endpoint, e))?;

    if !status.is_success() {
        let err = body
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("request failed");
        anyhow::bail!("{} ({})", err, status);
    }
    let report = body
        .get("report")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("response has no report"))?;
    println!("{}", report.trim());
    Ok(())
}
