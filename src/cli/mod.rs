//! Command-line interface: argument parsing and command handlers.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

use crate::agent::factory::create_embeddings_client;
use crate::config::AppConfig;
use crate::embeddings::Embedder;
use crate::notify::{NotificationEvent, NotificationHub};
use crate::orchestrator::{CancellationFlag, OrchestratorBuilder, RunOutput, RunRequest};
use crate::persistence::Persistence;
use crate::retrieval::{ContextFilter, GraphIndex};
use crate::types::ContextItem;

/// Consumer id the binary subscribes with when none is given.
pub const DEFAULT_CONSUMER: &str = "cli";

#[derive(Parser, Debug)]
#[command(name = "kg-agent")]
#[command(about = "Turn natural-language requests into knowledge-graph changes")]
pub struct Cli {
    /// Configuration file (created from defaults when missing)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Plan and execute a request
    Run {
        /// The request text
        #[arg(short, long)]
        prompt: String,
        /// Allowed entity types, comma separated (defaults to the config)
        #[arg(short, long, value_delimiter = ',')]
        types: Option<Vec<String>>,
        /// Context kinds to retrieve, e.g. node,note
        #[arg(short, long)]
        kinds: Option<String>,
        /// Resume or name a run
        #[arg(long)]
        run_id: Option<String>,
        /// Consumer id for progress events
        #[arg(long, default_value = DEFAULT_CONSUMER)]
        consumer: String,
        /// Number of context items to retrieve
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Index context items from a JSON array file
    Seed {
        file: PathBuf,
    },
    /// Print the effective configuration
    Config,
}

pub struct CliState {
    pub config: AppConfig,
    pub persistence: Persistence,
}

impl CliState {
    /// Load configuration from `path`, or from the default locations.
    pub fn initialize(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => AppConfig::load_from_file(path)?,
            None => AppConfig::load()?,
        };
        config.apply_env_overrides();
        config.validate()?;
        Self::new_with_config(config)
    }

    pub fn new_with_config(config: AppConfig) -> Result<Self> {
        let persistence =
            Persistence::new(&config.database.path).context("initializing persistence")?;
        Ok(Self {
            config,
            persistence,
        })
    }

    pub async fn execute(&self, command: Command) -> Result<String> {
        match command {
            Command::Run {
                prompt,
                types,
                kinds,
                run_id,
                consumer,
                top_k,
            } => {
                let mut request = RunRequest::new(prompt).with_consumer(consumer);
                if let Some(types) = types {
                    request = request.with_entity_types(clean_list(types));
                }
                if let Some(kinds) = kinds {
                    request = request.with_context_filter(ContextFilter::parse(&kinds)?);
                }
                if let Some(run_id) = run_id {
                    request = request.with_run_id(run_id);
                }
                if let Some(top_k) = top_k {
                    request = request.with_top_k(top_k);
                }
                let output = self.run(request).await?;
                Ok(serde_json::to_string_pretty(&output)?)
            }
            Command::Seed { file } => {
                let count = self.seed(&file).await?;
                Ok(format!("indexed {} context item(s) from {}", count, file.display()))
            }
            Command::Config => Ok(self.config.summary()),
        }
    }

    /// Run one request, logging hub events and cancelling on Ctrl-C.
    pub async fn run(&self, request: RunRequest) -> Result<RunOutput> {
        let hub = Arc::new(NotificationHub::new());
        let orchestrator = OrchestratorBuilder::from_config(&self.config, self.persistence.clone())?
            .with_notification_channel(hub.clone())
            .build()?;

        let listener = request
            .consumer_id
            .as_deref()
            .map(|consumer| tokio::spawn(log_events(hub.subscribe(consumer))));

        let cancel = CancellationFlag::new();
        let on_signal = cancel.clone();
        let signal_task = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; stopping after the current step");
                on_signal.cancel();
            }
        });

        let result = orchestrator.run_cancellable(request, &cancel).await;
        signal_task.abort();

        // Dropping every sender closes the channel once the queued events are logged.
        drop(orchestrator);
        drop(hub);
        if let Some(listener) = listener {
            if let Err(e) = listener.await {
                warn!("progress listener stopped abnormally: {}", e);
            }
        }
        self.persistence.checkpoint()?;
        Ok(result?)
    }

    /// Embed and index every item of a JSON array of context items.
    pub async fn seed(&self, file: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(file)
            .with_context(|| format!("reading context file {}", file.display()))?;
        let items: Vec<ContextItem> = serde_json::from_str(&content)
            .with_context(|| format!("parsing context items in {}", file.display()))?;

        let embedder: Arc<dyn Embedder> =
            Arc::new(create_embeddings_client(&self.config.embeddings)?);
        let index = GraphIndex::new(self.persistence.clone(), embedder);
        let count = index.index_all(&items).await?;
        self.persistence.checkpoint()?;
        Ok(count)
    }
}

/// Log every event until the hub side closes. Returns how many were logged.
async fn log_events(mut events: broadcast::Receiver<NotificationEvent>) -> usize {
    let mut logged = 0;
    loop {
        match events.recv().await {
            Ok(event) => {
                info!(
                    consumer = %event.consumer_id,
                    "{:?} event: {}",
                    event.event_type,
                    event.payload
                );
                logged += 1;
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!("progress listener skipped {} events", skipped)
            }
            Err(RecvError::Closed) => return logged,
        }
    }
}

fn clean_list(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}
