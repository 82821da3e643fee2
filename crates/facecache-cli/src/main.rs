use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;

use config::Config;
use engine::Engine;

#[derive(Parser)]
#[command(name = "facecache", about = "Build and query per-identity face encoding tables")]
struct Cli {
    /// TOML configuration file (FACECACHE_* environment variables take precedence)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode every identity folder under ROOT and report what was found
    Load {
        /// Directory with one subdirectory of photos per person
        root: PathBuf,
        /// Print the full table (names and embeddings) as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check whether a face can be detected in an image
    Verify {
        image: PathBuf,
    },
    /// Identify the person in IMAGE against the identities under ROOT
    Match {
        root: PathBuf,
        image: PathBuf,
        /// Cosine similarity needed for a match (defaults to the configured threshold)
        #[arg(short, long)]
        threshold: Option<f32>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(?config, "configuration resolved");

    let mut engine = match cli.command {
        Commands::Verify { .. } => Engine::detection_only(&config),
        _ => Engine::from_config(&config),
    }
    .context("failed to initialize face models")?;

    match cli.command {
        Commands::Load { root, json } => {
            let table = engine.load(root).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&table)?);
            } else {
                for (identity, count) in table.counts() {
                    println!("{identity}: {count}");
                }
                println!("total: {} encodings", table.len());
            }
        }
        Commands::Verify { image } => {
            let found = engine.verify(image.clone()).await?;
            if found {
                println!("{}: face detected", image.display());
            } else {
                println!("{}: no face detected", image.display());
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Match {
            root,
            image,
            threshold,
        } => {
            let threshold = threshold.unwrap_or(config.similarity_threshold);
            let (table, result) = engine.identify(root, image, threshold).await?;
            match result.identity {
                Some(identity) if result.matched => {
                    println!("match: {identity} (similarity {:.3})", result.similarity);
                }
                _ => {
                    println!(
                        "no match among {} encodings (best similarity {:.3}, threshold {threshold:.3})",
                        table.len(),
                        result.similarity
                    );
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
