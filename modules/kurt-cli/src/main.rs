//! The `kurt` CLI: discover, fetch, index, research, and manage workflows.

mod app;
mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kurt_common::types::WorkflowStatus;

/// Exit codes: 0 success, 1 step failure, 2 canceled, 3 internal error.
const EXIT_OK: u8 = 0;
const EXIT_STEP_FAILURE: u8 = 1;
const EXIT_CANCELED: u8 = 2;
const EXIT_INTERNAL: u8 = 3;

#[derive(Parser)]
#[command(name = "kurt", about = "Content acquisition and knowledge extraction")]
struct Cli {
    /// Path to the config file (defaults to ./kurt.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Discover documents from a source.
    Map {
        /// Positional source: a URL or folder path.
        source: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        folder: Option<String>,
        /// CMS source as platform:instance.
        #[arg(long)]
        cms: Option<String>,
        #[arg(long)]
        include: Vec<String>,
        #[arg(long)]
        exclude: Vec<String>,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Fetch content for discovered documents.
    Fetch {
        /// Optional document id or source URL to fetch.
        identifier: Option<String>,
        #[arg(long)]
        engine: Option<String>,
        /// Re-fetch documents that already have content.
        #[arg(long)]
        refetch: bool,
        #[arg(long)]
        dry_run: bool,
        /// Restrict to URL sources.
        #[arg(long)]
        urls: bool,
        /// Restrict to file sources.
        #[arg(long)]
        files: bool,
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long)]
        concurrency: Option<usize>,
        /// Confirm potentially aggressive settings (concurrency > 20).
        #[arg(long)]
        yes: bool,
        #[arg(long)]
        background: bool,
    },

    /// Run the indexing pipeline over fetched documents.
    Index {
        /// Skip documents whose content is unchanged since last indexing.
        #[arg(long)]
        delta: bool,
        /// Re-process documents even when the content hash is unchanged.
        #[arg(long)]
        reprocess_unchanged: bool,
    },

    /// Research commands.
    Research {
        #[command(subcommand)]
        command: commands::ResearchCommand,
    },

    /// Declarative workflow commands.
    Workflow {
        #[command(subcommand)]
        command: commands::WorkflowCommand,
    },

    /// Serve the read-only status API.
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8700)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kurt=info")),
        )
        .init();

    let cli = Cli::parse();

    let result = run(cli).await;
    match result {
        Ok(status) => match status {
            Some(WorkflowStatus::Completed) | None => ExitCode::from(EXIT_OK),
            Some(WorkflowStatus::Canceled) => ExitCode::from(EXIT_CANCELED),
            Some(WorkflowStatus::CompletedWithErrors) | Some(WorkflowStatus::Failed) => {
                ExitCode::from(EXIT_STEP_FAILURE)
            }
            Some(_) => ExitCode::from(EXIT_OK),
        },
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(EXIT_INTERNAL)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<Option<WorkflowStatus>> {
    let app = app::App::init(cli.config.as_deref()).await?;

    match cli.command {
        Command::Map {
            source,
            url,
            folder,
            cms,
            include,
            exclude,
            limit,
        } => commands::map(&app, source, url, folder, cms, include, exclude, limit).await,
        Command::Fetch {
            identifier,
            engine,
            refetch,
            dry_run,
            urls,
            files,
            limit,
            concurrency,
            yes,
            background,
        } => {
            commands::fetch(
                &app,
                commands::FetchArgs {
                    identifier,
                    engine,
                    refetch,
                    dry_run,
                    urls,
                    files,
                    limit,
                    concurrency,
                    yes,
                    background,
                },
            )
            .await
        }
        Command::Index {
            delta,
            reprocess_unchanged,
        } => commands::index(&app, delta, reprocess_unchanged).await,
        Command::Research { command } => commands::research(&app, command).await,
        Command::Workflow { command } => commands::workflow(&app, command).await,
        Command::Serve { host, port } => {
            let state = kurt_api::ApiState {
                runs: app.stores.runs.clone(),
                sink: app.sink.clone(),
                runner: app.runner.clone(),
            };
            let addr = format!("{host}:{port}").parse()?;
            kurt_api::serve(state, addr).await?;
            Ok(None)
        }
    }
}
