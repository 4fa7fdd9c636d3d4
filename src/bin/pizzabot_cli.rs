use anyhow::Result;
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use pizzabot::bootstrap::{build_pipeline, prepare_store};
use pizzabot::config::AppConfig;
use pizzabot::conversation::Conversation;
use pizzabot::prompt::{format_reviews, PromptTemplate, CLI_TEMPLATE};
use pizzabot::rag::BuildPolicy;

#[derive(Parser, Debug)]
#[command(name = "pizzabot-cli")]
#[command(about = "Ask questions about the restaurant reviews from the terminal")]
struct Args {
    /// Configuration file (defaults to ./pizzabot.toml when present)
    #[arg(short, long, env = "PIZZABOT_CONFIG")]
    config: Option<PathBuf>,

    /// Number of reviews retrieved per question, overriding the configuration
    #[arg(short = 'k', long)]
    top_k: Option<usize>,

    /// Print the retrieved reviews before each answer
    #[arg(long)]
    show_context: bool,

    /// Re-embed the dataset even if an index already exists
    #[arg(long)]
    rebuild: bool,
}

fn is_quit(input: &str) -> bool {
    input.eq_ignore_ascii_case("q")
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    pizzabot::telemetry::init(true);

    let args = Args::parse();
    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(k) = args.top_k {
        config.top_k = k;
    }

    let policy = if args.rebuild { BuildPolicy::ForceRebuild } else { BuildPolicy::ReuseIfPresent };
    let (store, _) = prepare_store(&config, policy).await?;
    let template =
        PromptTemplate::review_qa_from(config.prompt.cli_template_file.as_deref(), CLI_TEMPLATE)?;
    let pipeline = build_pipeline(&config, store, template).await?;

    let mut conversation = Conversation::new();
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        println!("\n----------------------------------------");
        print!("\n--> Ask your question (q to quit): ");
        stdout.flush().ok();

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            println!();
            break;
        }
        println!("\n");

        let question = input.trim();
        if question.is_empty() {
            continue;
        }
        if is_quit(question) {
            println!("--> Bye :) \n");
            break;
        }

        match pipeline.answer(&mut conversation, question).await {
            Ok(turn) => {
                if args.show_context {
                    println!("Retrieved reviews:\n{}\n", format_reviews(&turn.reviews));
                }
                println!("{}", turn.answer);
            }
            Err(e) => {
                tracing::error!("Failed to answer: {}", e);
                eprintln!("Error: {}", e);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quit_is_case_insensitive() {
        assert!(is_quit("q"));
        assert!(is_quit("Q"));
        assert!(!is_quit("quit"));
        assert!(!is_quit("question"));
    }
}
