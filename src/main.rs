use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pizzabot::api::{self, AppState};
use pizzabot::bootstrap::{build_pipeline, prepare_store};
use pizzabot::config::AppConfig;
use pizzabot::conversation::SessionStore;
use pizzabot::prompt::{PromptTemplate, CHAT_TEMPLATE};
use pizzabot::rag::BuildPolicy;

#[derive(Parser, Debug)]
#[command(name = "pizzabot")]
#[command(about = "Chat web UI answering questions from restaurant reviews")]
struct Args {
    /// Configuration file (defaults to ./pizzabot.toml when present)
    #[arg(short, long, env = "PIZZABOT_CONFIG")]
    config: Option<PathBuf>,

    /// Re-embed the dataset even if an index already exists
    #[arg(long)]
    rebuild: bool,

    /// Address to listen on, overriding the configuration
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    pizzabot::telemetry::init(false);

    let args = Args::parse();
    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    tracing::info!("Dataset: {}", config.dataset_path.display());
    tracing::info!("Index directory: {}", config.index_dir.display());
    tracing::info!("Generation service: {}", config.generation.base_url);

    let policy = if args.rebuild { BuildPolicy::ForceRebuild } else { BuildPolicy::ReuseIfPresent };
    let (store, _) = prepare_store(&config, policy).await?;

    let template = PromptTemplate::review_qa_from(
        config.prompt.chat_template_file.as_deref(),
        CHAT_TEMPLATE,
    )?;
    let pipeline = build_pipeline(&config, store, template).await?;

    let sessions =
        SessionStore::with_limits(config.server.session_idle(), config.server.max_sessions);
    let state = Arc::new(AppState { pipeline, sessions });
    let sweep_every = (config.server.session_idle() / 4).max(Duration::from_secs(1));
    api::spawn_session_sweeper(Arc::clone(&state), sweep_every);

    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!("PizzaBot listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
