//! `sheet-agent` command line: run Requests against a local database and an
//! in-memory workbook, and inspect the request history.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::agent_core::{
    Coordinator, Interpreter, KeywordInterpreter, ModelInterpreter, RequestHistory,
    StageTimeouts, StoreRetriever, SummaryAnalyzer, TemplateTranslator,
};
use crate::config::{self, AppConfig, InterpreterBackend};
use crate::datastore::SqliteDataStore;
use crate::inference::InferenceClient;
use crate::workbook::{Workbook, WorkbookApplier};

#[derive(Parser, Debug)]
#[command(name = "sheet-agent", version)]
#[command(about = "Coordinate interpreter, retriever and analyzer stages over financial data")]
pub struct Cli {
    /// Config file (defaults to $SHEET_AGENT_HOME or an upward search for sheet-agent.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one request and print the resulting sheet
    #[command(after_help = "\
Examples:
  sheet-agent submit 'show me recent revenue'
  sheet-agent submit 'top 3 net income for ACME' --json
  sheet-agent submit 'revenue trend' --retrieval-ms 500")]
    Submit {
        /// Natural-language request
        input: String,

        /// Budget applied to every stage
        #[arg(long)]
        timeout_ms: Option<u64>,

        #[arg(long)]
        classification_ms: Option<u64>,

        #[arg(long)]
        retrieval_ms: Option<u64>,

        #[arg(long)]
        analysis_ms: Option<u64>,

        /// Print the Request as JSON instead of the sheet
        #[arg(long)]
        json: bool,
    },

    /// List recent requests
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Print a recorded request with its messages
    Show { id: String },

    /// Create the schema and load demo financial data
    Seed,
}

/// Per-stage budget overrides from the command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeoutOverrides {
    pub all_ms: Option<u64>,
    pub classification_ms: Option<u64>,
    pub retrieval_ms: Option<u64>,
    pub analysis_ms: Option<u64>,
}

impl TimeoutOverrides {
    /// Config defaults, then the uniform override, then per-stage overrides.
    pub fn resolve(&self, config: &AppConfig) -> StageTimeouts {
        let mut timeouts = match self.all_ms {
            Some(ms) => StageTimeouts::uniform(Duration::from_millis(ms)),
            None => config.timeouts.stage_timeouts(),
        };
        if let Some(ms) = self.classification_ms {
            timeouts.classification = Duration::from_millis(ms);
        }
        if let Some(ms) = self.retrieval_ms {
            timeouts.retrieval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.analysis_ms {
            timeouts.analysis = Duration::from_millis(ms);
        }
        timeouts
    }
}

// ─── Entry Point ────────────────────────────────────────────────────────────

pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Submit {
            input,
            timeout_ms,
            classification_ms,
            retrieval_ms,
            analysis_ms,
            json,
        } => {
            let overrides = TimeoutOverrides {
                all_ms: timeout_ms,
                classification_ms,
                retrieval_ms,
                analysis_ms,
            };
            submit(&config, &input, overrides.resolve(&config), json).await
        }
        Command::History { limit } => {
            let history = open_history(&config)?;
            for summary in history.list_recent(limit)? {
                let outcome = match (&summary.failed_stage, &summary.error) {
                    (Some(stage), Some(error)) => format!("  [{stage}] {error}"),
                    _ => String::new(),
                };
                println!(
                    "{}  {:<9}  {}  {} msg  {}{}",
                    summary.id,
                    summary.status.as_str(),
                    summary.created_at,
                    summary.message_count,
                    summary.input,
                    outcome
                );
            }
            Ok(())
        }
        Command::Show { id } => {
            let request = open_history(&config)?.get(&id)?;
            println!("{}", serde_json::to_string_pretty(&request)?);
            Ok(())
        }
        Command::Seed => {
            let store = open_store(&config)?;
            store.create_schema()?;
            let rows = store.seed_demo_data()?;
            tracing::info!(path = store.path(), rows, "seed: demo data loaded");
            println!("seeded {rows} financial rows into {}", store.path());
            Ok(())
        }
    }
}

async fn submit(config: &AppConfig, input: &str, timeouts: StageTimeouts, json: bool) -> Result<()> {
    let store = Arc::new(open_store(config)?);
    let workbook = Arc::new(Mutex::new(Workbook::new(
        config.workbook.max_rows,
        config.workbook.max_cols,
    )));
    let coordinator = build_coordinator(config, store, workbook.clone())?;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("cli: interrupt received, cancelling request");
            trigger.cancel();
        }
    });

    let history = match open_history(config) {
        Ok(history) => Some(history),
        Err(e) => {
            tracing::warn!(error = %e, "cli: history unavailable, request will not be recorded");
            None
        }
    };

    match coordinator.submit_with_cancel(input, timeouts, cancel).await {
        Ok(request) => {
            if let Some(history) = &history {
                if let Err(e) = history.record(&request) {
                    tracing::warn!(error = %e, "cli: failed to record request");
                }
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&request)?);
            } else {
                print!("{}", workbook.lock().await.active().render_grid());
                println!("request {} completed", request.id);
            }
            Ok(())
        }
        Err(err) => {
            if let Some(history) = &history {
                if let Err(e) = history.record_failure(&err) {
                    tracing::warn!(error = %e, "cli: failed to record request");
                }
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&err.request)?);
            }
            let hint = if err.is_retryable() { " (retryable)" } else { "" };
            Err(anyhow::Error::new(err).context(format!("request did not complete{hint}")))
        }
    }
}

// ─── Wiring ─────────────────────────────────────────────────────────────────

/// Assemble the Coordinator from configuration.
pub fn build_coordinator(
    config: &AppConfig,
    store: Arc<SqliteDataStore>,
    workbook: Arc<Mutex<Workbook>>,
) -> Result<Coordinator> {
    let interpreter = build_interpreter(config)?;
    let translator = TemplateTranslator::new(
        config.retriever.default_limit,
        config.retriever.max_limit,
    );
    let retriever = StoreRetriever::new(Arc::new(translator), store);
    let layout = config.layout.apply_layout()?;

    Ok(Coordinator::new(
        interpreter,
        Arc::new(retriever),
        Arc::new(SummaryAnalyzer::new()),
        Arc::new(WorkbookApplier::new(workbook, layout)),
    ))
}

fn build_interpreter(config: &AppConfig) -> Result<Arc<dyn Interpreter>> {
    let min_confidence = config.interpreter.min_confidence;
    match config.interpreter.backend {
        InterpreterBackend::Keyword => Ok(Arc::new(KeywordInterpreter::new(min_confidence))),
        InterpreterBackend::Model => {
            let client = InferenceClient::new(&config.interpreter.model)
                .context("failed to build inference client")?;
            tracing::info!(
                base_url = client.base_url(),
                model = client.model_name(),
                "cli: using model interpreter"
            );
            Ok(Arc::new(ModelInterpreter::new(client, min_confidence)))
        }
    }
}

fn load_config(explicit: Option<&std::path::Path>) -> Result<AppConfig> {
    if let Some(path) = explicit {
        return config::load_config(path)
            .with_context(|| format!("failed to load config {}", path.display()));
    }
    let cwd = std::env::current_dir().context("failed to resolve working directory")?;
    let (config, _) = config::load_or_default(&cwd)?;
    Ok(config)
}

fn open_store(config: &AppConfig) -> Result<SqliteDataStore> {
    let path = config::expand_tilde(&config.database_path);
    SqliteDataStore::open(&path).with_context(|| format!("failed to open database {path}"))
}

/// `history_path` from config, or `history.db` in the data directory.
pub fn history_path(config: &AppConfig) -> PathBuf {
    match &config.history_path {
        Some(path) => PathBuf::from(config::expand_tilde(path)),
        None => crate::data_dir().join("history.db"),
    }
}

fn open_history(config: &AppConfig) -> Result<RequestHistory> {
    let path = history_path(config);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let path = path.to_string_lossy();
    RequestHistory::open(&path).with_context(|| format!("failed to open history {path}"))
}
