//! Command implementations. Every pipeline invocation goes through the
//! workflow runner so it gets durability and observability for free.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use serde_json::json;

use kurt_common::types::WorkflowStatus;
use kurt_runtime::{
    parse_workflow, RunOptions, StepDef, WorkflowDefinition, WorkflowHandle, WorkflowMeta,
};

use crate::app::App;

/// Concurrency above this requires explicit confirmation (`--yes`). Policy
/// lives at this edge; the core accepts any positive concurrency.
const CONCURRENCY_CONFIRM_LIMIT: usize = 20;

#[derive(Subcommand)]
pub enum ResearchCommand {
    /// Search the web through the research provider.
    Search {
        query: String,
        #[arg(long)]
        recency: Option<u32>,
        #[arg(long, default_value_t = 10)]
        max_results: usize,
        /// Save hits as discovered documents.
        #[arg(long)]
        save: bool,
    },
}

#[derive(Subcommand)]
pub enum WorkflowCommand {
    /// Run a TOML workflow file.
    Run {
        path: std::path::PathBuf,
        /// Inputs as key=value pairs.
        #[arg(short = 'i', long = "input")]
        inputs: Vec<String>,
        #[arg(long)]
        background: bool,
    },
    /// Show the live status of a workflow.
    Status { id: String },
    /// Show step events for a workflow.
    Logs {
        id: String,
        #[arg(long)]
        step: Option<String>,
        #[arg(long, default_value_t = 0)]
        since: i64,
    },
    /// Request cancellation of a running workflow.
    Cancel { id: String },
    /// Validate a TOML workflow file and print its plan without running it.
    Test { path: std::path::PathBuf },
}

pub struct FetchArgs {
    pub identifier: Option<String>,
    pub engine: Option<String>,
    pub refetch: bool,
    pub dry_run: bool,
    pub urls: bool,
    pub files: bool,
    pub limit: Option<i64>,
    pub concurrency: Option<usize>,
    pub yes: bool,
    pub background: bool,
}

fn single_step_definition(name: &str, step_type: &str, config: serde_json::Value) -> WorkflowDefinition {
    let mut step = StepDef::new(step_type);
    step.config = config;
    WorkflowDefinition {
        workflow: WorkflowMeta {
            name: name.to_string(),
            description: None,
        },
        inputs: BTreeMap::new(),
        steps: BTreeMap::from([(name.to_string(), step)]),
    }
}

async fn run_and_report(
    app: &App,
    definition: WorkflowDefinition,
    background: bool,
) -> Result<Option<WorkflowStatus>> {
    let handle = app
        .runner
        .run_definition(
            definition,
            json!({}),
            RunOptions {
                background,
                ..RunOptions::default()
            },
        )
        .await?;

    match handle {
        WorkflowHandle::Completed(outcome) => {
            for (step, outputs) in &outcome.step_outputs {
                for output in outputs {
                    println!("{step}: {output}");
                }
            }
            if let Some(error) = &outcome.error {
                eprintln!("Workflow error: {error}");
            }
            Ok(Some(outcome.status))
        }
        WorkflowHandle::Background { workflow_id } => {
            println!("Started workflow {workflow_id}");
            Ok(None)
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn map(
    app: &App,
    source: Option<String>,
    url: Option<String>,
    folder: Option<String>,
    cms: Option<String>,
    include: Vec<String>,
    exclude: Vec<String>,
    limit: Option<usize>,
) -> Result<Option<WorkflowStatus>> {
    // The positional source is a URL when it looks like one, else a folder.
    let (url, folder) = match (url, folder, source) {
        (Some(url), folder, _) => (Some(url), folder),
        (None, Some(folder), _) => (None, Some(folder)),
        (None, None, Some(source)) => {
            if source.starts_with("http://") || source.starts_with("https://") {
                (Some(source), None)
            } else {
                (None, Some(source))
            }
        }
        (None, None, None) => (None, None),
    };

    let mut config = json!({
        "include": include,
        "exclude": exclude,
    });
    if let Some(url) = url {
        config["url"] = json!(url);
    } else if let Some(folder) = folder {
        config["folder"] = json!(folder);
    } else if let Some(cms) = &cms {
        config["cms"] = json!(cms);
    } else {
        bail!("map needs a source: --url, --folder, or --cms platform:instance");
    }
    if let Some(limit) = limit {
        config["limit"] = json!(limit);
    }

    run_and_report(app, single_step_definition("map", "map", config), false).await
}

pub async fn fetch(app: &App, args: FetchArgs) -> Result<Option<WorkflowStatus>> {
    let concurrency = args.concurrency.unwrap_or(app.config.fetch.concurrency);
    if concurrency > CONCURRENCY_CONFIRM_LIMIT && !args.yes {
        bail!(
            "concurrency {concurrency} exceeds {CONCURRENCY_CONFIRM_LIMIT}; \
             re-run with --yes to confirm"
        );
    }

    let mut config = json!({
        "refetch": args.refetch,
        "dry_run": args.dry_run,
        "urls": args.urls,
        "files": args.files,
        "concurrency": concurrency,
    });
    if let Some(engine) = &args.engine {
        config["engine"] = json!(engine);
    }
    if let Some(limit) = args.limit {
        config["limit"] = json!(limit);
    }
    if let Some(batch_size) = app.config.fetch.batch_size {
        config["batch_size"] = json!(batch_size);
    }

    // An explicit identifier narrows the run to one document.
    if let Some(identifier) = &args.identifier {
        let doc = match app.stores.documents.get(identifier).await {
            Ok(doc) => doc,
            Err(_) => app
                .stores
                .documents
                .find_by_source(identifier, "url")
                .await?
                .context(format!("no document found for {identifier}"))?,
        };
        config["document_ids"] = json!([doc.id]);
    }

    run_and_report(
        app,
        single_step_definition("fetch_documents", "fetch", config),
        args.background,
    )
    .await
}

/// The indexing pipeline as a dependent chain: sections → entities →
/// clustering → resolution.
pub async fn index(
    app: &App,
    _delta: bool,
    reprocess_unchanged: bool,
) -> Result<Option<WorkflowStatus>> {
    let mut sections = StepDef::new("section-extraction");
    sections.config = json!({ "reprocess_unchanged": reprocess_unchanged });
    let entities = StepDef::new("entity-resolution").with_deps(&["sections"]);
    let clustering = StepDef::new("claim-clustering").with_deps(&["entities"]);
    let resolution = StepDef::new("claim-resolution").with_deps(&["clustering"]);

    let definition = WorkflowDefinition {
        workflow: WorkflowMeta {
            name: "index".to_string(),
            description: Some("Section, entity, and claim extraction".to_string()),
        },
        inputs: BTreeMap::new(),
        steps: BTreeMap::from([
            ("sections".to_string(), sections),
            ("entities".to_string(), entities),
            ("clustering".to_string(), clustering),
            ("resolution".to_string(), resolution),
        ]),
    };

    run_and_report(app, definition, false).await
}

pub async fn research(app: &App, command: ResearchCommand) -> Result<Option<WorkflowStatus>> {
    match command {
        ResearchCommand::Search {
            query,
            recency,
            max_results,
            save,
        } => {
            let api_key = app
                .credentials
                .tavily_api_key
                .as_deref()
                .context("research requires a Tavily API key")?;
            let research = kurt_fetch::research::Research::new(
                api_key,
                app.stores.documents.clone(),
                app.stores.staging.clone(),
            );
            let outcome = research
                .search(&query, max_results, recency, save, "research-cli")
                .await?;

            for hit in &outcome.hits {
                println!("{}\n  {}\n  {}", hit.title, hit.url, hit.snippet);
            }
            if save {
                println!("Saved {} new document(s)", outcome.saved_documents);
            }
            Ok(None)
        }
    }
}

pub async fn workflow(app: &App, command: WorkflowCommand) -> Result<Option<WorkflowStatus>> {
    match command {
        WorkflowCommand::Run {
            path,
            inputs,
            background,
        } => {
            let definition = parse_workflow(&path, None)?;

            // CLI inputs coerce through each input's declared type.
            let mut resolved = serde_json::Map::new();
            for pair in &inputs {
                let (key, value) = pair
                    .split_once('=')
                    .context(format!("input {pair} is not key=value"))?;
                let coerced = match definition.inputs.get(key) {
                    Some(input_def) => input_def
                        .input_type
                        .coerce(value)
                        .map_err(|e| anyhow::anyhow!(e))?,
                    None => json!(value),
                };
                resolved.insert(key.to_string(), coerced);
            }

            let handle = app
                .runner
                .run_definition(
                    definition,
                    serde_json::Value::Object(resolved),
                    RunOptions {
                        background,
                        ..RunOptions::default()
                    },
                )
                .await?;

            match handle {
                WorkflowHandle::Completed(outcome) => {
                    println!("Workflow {} finished: {}", outcome.workflow_id, outcome.status);
                    Ok(Some(outcome.status))
                }
                WorkflowHandle::Background { workflow_id } => {
                    println!("Started workflow {workflow_id}");
                    Ok(None)
                }
            }
        }

        WorkflowCommand::Status { id } => {
            let status = kurt_runtime::live_status(
                app.runner.state().as_ref(),
                app.sink.as_ref(),
                &id,
            )
            .await?;
            println!("Workflow {} [{}]", status.workflow_id, status.status);
            if let Some(stage) = &status.stage {
                println!("Stage: {stage} ({}/{})", status.progress_current, status.progress_total);
            }
            for step in &status.steps {
                println!(
                    "  - {}: {} {}/{} ({} ok, {} errors)",
                    step.name, step.status, step.current, step.total, step.success, step.error
                );
            }
            if let Some(last_log) = &status.last_log {
                println!("Last log: {last_log}");
            }
            Ok(None)
        }

        WorkflowCommand::Logs { id, step, since } => {
            use kurt_events::EventSink;
            let events = app
                .sink
                .read_step_events(&id, since, 500)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            for event in events {
                if let Some(step_filter) = &step {
                    if &event.step_id != step_filter {
                        continue;
                    }
                }
                println!(
                    "{} [{}] [{}] {}",
                    event.created_at.format("%Y-%m-%dT%H:%M:%SZ"),
                    event.status,
                    event.step_id,
                    event.message.unwrap_or_default()
                );
            }
            Ok(None)
        }

        WorkflowCommand::Cancel { id } => {
            let flipped = app.runner.cancel(&id).await?;
            if flipped {
                println!("Workflow {id} canceling");
            } else {
                println!("Workflow {id} is not active");
            }
            Ok(None)
        }

        WorkflowCommand::Test { path } => {
            let definition = parse_workflow(&path, None)?;
            let plan = kurt_runtime::build_dag(&definition.steps)
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;

            println!("Workflow: {}", definition.workflow.name);
            println!("Steps: {}", plan.total_steps);
            println!("Parallelizable: {}", plan.parallelizable);
            for (level, steps) in plan.levels.iter().enumerate() {
                println!("  Level {level}: {}", steps.join(", "));
            }
            println!("Critical path: {}", plan.critical_path.join(" -> "));
            Ok(None)
        }
    }
}
