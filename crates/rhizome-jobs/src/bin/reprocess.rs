//! rhizome-reprocess: run reprocessing and review operations against Postgres.
//!
//! Reads `DATABASE_URL` (and `.env`), plus `RHIZOME_*` tuning variables when
//! no config file is given. Results are printed as JSON on stdout; logs go to
//! stderr, as JSON when `LOG_FORMAT=json`.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use rhizome_db::{ChunkerConfig, Database, ParagraphChunker};
use rhizome_jobs::{
    accept_suggestion, import_and_store, reject_suggestion, ChunkMigrationCoordinator,
    Collaborators, Repositories, ReprocessConfig, ReprocessingOrchestrator,
};
use rhizome_recovery::{HighlightInput, RecoveryEngine};

#[derive(Parser)]
#[command(name = "rhizome-reprocess")]
#[command(author, version, about = "Reprocess documents without losing annotations")]
#[command(propagate_version = true)]
struct Cli {
    /// TOML config file (defaults plus RHIZOME_* variables when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild a document's chunks from edited text
    Reprocess {
        #[arg(short, long)]
        document: Uuid,

        /// File holding the new document text
        #[arg(short, long)]
        text: PathBuf,

        /// Skip connection detection
        #[arg(long)]
        skip_connections: bool,

        /// Queue every recovered annotation for review
        #[arg(long)]
        force_review: bool,
    },

    /// Place highlights from a JSON file onto a document
    ImportHighlights {
        #[arg(short, long)]
        document: Uuid,

        /// File holding the document's current text
        #[arg(short, long)]
        text: PathBuf,

        /// JSON array of highlights
        #[arg(long)]
        highlights: PathBuf,
    },

    /// Accept an annotation's suggested match
    Accept {
        #[arg(short, long)]
        annotation: Uuid,
    },

    /// Reject an annotation's suggested match
    Reject {
        #[arg(short, long)]
        annotation: Uuid,
    },

    /// Resolve chunk generations left behind by an interrupted run
    Repair {
        #[arg(short, long)]
        document: Uuid,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "rhizome_jobs=info,rhizome_recovery=info,rhizome_db=warn".into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ReprocessConfig> {
    match path {
        Some(p) => ReprocessConfig::from_file(p)
            .with_context(|| format!("loading config from {}", p.display())),
        None => {
            let config = ReprocessConfig::from_env();
            config.validate().context("invalid RHIZOME_* configuration")?;
            Ok(config)
        }
    }
}

fn read_text(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = load_config(cli.config.as_deref())?;
    let url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
    let db = Database::connect(&url)
        .await
        .context("connecting to database")?;
    let repos = Repositories::from_database(&db);

    match cli.command {
        Commands::Reprocess {
            document,
            text,
            skip_connections,
            force_review,
        } => {
            config.skip_connection_detection |= skip_connections;
            config.recovery.force_review |= force_review;
            let text = read_text(&text)?;

            let chunker = ParagraphChunker::new(ChunkerConfig::default());
            let orchestrator =
                ReprocessingOrchestrator::new(repos, Collaborators::new(Arc::new(chunker)), config);
            let outcome = orchestrator.run(document, &text).await?;
            print_json(&outcome)?;
            if !outcome.is_committed() {
                anyhow::bail!(
                    "reprocessing rolled back: {}",
                    outcome.error.unwrap_or_default()
                );
            }
        }
        Commands::ImportHighlights {
            document,
            text,
            highlights,
        } => {
            let text = read_text(&text)?;
            let highlights: Vec<HighlightInput> = serde_json::from_str(&read_text(&highlights)?)
                .context("parsing highlights")?;
            let engine = RecoveryEngine::new(config.recovery);
            let report = import_and_store(
                &engine,
                repos.chunks.as_ref(),
                repos.annotations.as_ref(),
                document,
                &text,
                highlights,
            )
            .await?;
            print_json(&report)?;
        }
        Commands::Accept { annotation } => {
            print_json(&accept_suggestion(repos.annotations.as_ref(), annotation).await?)?;
        }
        Commands::Reject { annotation } => {
            print_json(&reject_suggestion(repos.annotations.as_ref(), annotation).await?)?;
        }
        Commands::Repair { document } => {
            let coordinator = ChunkMigrationCoordinator::new(repos.chunks.clone());
            print_json(&coordinator.repair_interrupted(document).await?)?;
        }
    }

    Ok(())
}
