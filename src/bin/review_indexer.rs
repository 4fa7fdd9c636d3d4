use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;

use pizzabot::config::AppConfig;
use pizzabot::indexer::dataset::load_reviews;
use pizzabot::rag::{embedder_from_config, BuildPolicy, ReviewStore};

#[derive(Parser, Debug)]
#[command(name = "review-indexer")]
#[command(about = "Embed the review dataset into the local similarity index")]
struct Args {
    /// Configuration file (defaults to ./pizzabot.toml when present)
    #[arg(short, long, env = "PIZZABOT_CONFIG")]
    config: Option<PathBuf>,

    /// CSV dataset with title, date, rating and review columns
    #[arg(short, long)]
    dataset: Option<PathBuf>,

    /// Directory the index is written to
    #[arg(long)]
    index_dir: Option<PathBuf>,

    /// Re-embed even if an index already exists
    #[arg(long)]
    force: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    pizzabot::telemetry::init(true);

    let args = Args::parse();
    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(dataset) = args.dataset {
        config.dataset_path = dataset;
    }
    if let Some(index_dir) = args.index_dir {
        config.index_dir = index_dir;
    }

    if !config.dataset_path.exists() {
        anyhow::bail!("Dataset does not exist: {}", config.dataset_path.display());
    }

    println!("Loading reviews from {}...", config.dataset_path.display());
    let reviews = load_reviews(&config.dataset_path)?;
    println!("Found {} reviews", reviews.len());

    let embedder = embedder_from_config(&config.embedding, config.generation.timeout())?;
    println!("Embedding with {}", embedder.model_id());
    let store = ReviewStore::new(config.index_dir.clone(), Arc::clone(&embedder));

    let policy = if args.force { BuildPolicy::ForceRebuild } else { BuildPolicy::ReuseIfPresent };

    let pb = ProgressBar::new(reviews.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let outcome = store
        .build_with_progress(&reviews, policy, |n| pb.inc(n as u64))
        .await;
    let outcome = match outcome {
        Ok(o) => o,
        Err(e) => {
            pb.abandon_with_message("failed");
            return Err(e.into());
        }
    };

    if outcome.reused {
        pb.finish_and_clear();
        println!("\nIndex already present, nothing embedded (use --force to rebuild).");
    } else {
        pb.finish_with_message("done");
        println!("\nIndexing complete!");
    }

    let status = outcome.status;
    println!("  Documents:   {}", status.document_count);
    println!("  Embedder:    {}", status.embedder);
    if let Some(dimension) = status.dimension {
        println!("  Dimension:   {}", dimension);
    }
    if let Some(built_at) = status.built_at {
        println!("  Built at:    {}", built_at.to_rfc3339());
    }
    println!("  Index dir:   {}", config.index_dir.display());

    Ok(())
}
