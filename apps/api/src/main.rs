mod config;
mod db;
mod errors;
mod generation;
mod history;
mod identity;
mod llm_client;
mod models;
mod retry;
mod routes;
mod state;
mod streaming;
mod tts;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, LogFormat};
use crate::db::create_pool;
use crate::generation::generator::StoryGenerator;
use crate::identity::WechatClient;
use crate::llm_client::{ChatProvider, LlmClient};
use crate::routes::build_router;
use crate::state::AppState;
use crate::tts::TtsClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    init_tracing(&config);

    info!("Starting WordWeaver API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL (runs migrations)
    let db = create_pool(&config.database_url).await?;

    // Initialize LLM client behind the provider trait
    let llm = LlmClient::new(config.llm.clone())?;
    info!("LLM client initialized (model: {})", llm.model());
    let provider: Arc<dyn ChatProvider> = Arc::new(llm);
    let generator = StoryGenerator::new(provider);

    let tts = TtsClient::new(config.tts.clone())?;
    info!("TTS client initialized (endpoint: {})", tts.endpoint());

    let wechat = WechatClient::new(config.wechat.clone())?;
    if !wechat.has_credentials() {
        info!("WeChat credentials not set; only header and test_ logins are available");
    }

    let state = AppState {
        db,
        generator,
        tts,
        wechat,
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins once the mini-program domain is fixed

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{}={},tower_http={}",
            env!("CARGO_PKG_NAME").replace('-', "_"),
            config.rust_log,
            config.rust_log
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}
