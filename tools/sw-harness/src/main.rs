//! Command-line harness for the Insaka offline cache agent.
//!
//! Every invocation starts a fresh agent version, runs one scenario against it and
//! prints a JSON summary of the outcome plus every host event the agent emitted.
//!
//! ## Usage
//!
//! ```bash
//! # Precache the app shell from a local server and activate
//! sw-harness --scope http://localhost:8501/ --storage .cache/sw install
//!
//! # Fetch pages through the agent
//! sw-harness --storage .cache/sw fetch --navigate / /pages/2_Agenda.py
//!
//! # Show a push notification and click "View Details"
//! sw-harness click --action explore
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use insaka_common::{init_logging, AgentConfig, LogConfig, LogFormat};
use insaka_net::{Request, ResponseType};
use insaka_sw::{
    CacheAgent, Client, EventOutcome, PushData, ServiceWorkerEvent, ServiceWorkerState,
};
use serde::Serialize;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "sw-harness")]
#[command(about = "Drive the Insaka offline cache agent from the command line")]
struct Cli {
    /// Agent configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory for persisted caches
    #[arg(long, global = true)]
    storage: Option<PathBuf>,

    /// Scope URL, overriding the configuration
    #[arg(long, global = true)]
    scope: Option<String>,

    /// Log format: pretty, compact or json
    #[arg(long, global = true, default_value = "compact")]
    log_format: String,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Install the agent (precache the app shell) and activate it
    Install,

    /// Install, then fetch each path through the agent
    Fetch {
        /// Paths relative to the scope
        #[arg(required = true)]
        paths: Vec<String>,
        /// Fetch as top-level page navigations
        #[arg(long)]
        navigate: bool,
    },

    /// Deliver a push message
    Push {
        /// Payload text; omitted means no payload
        #[arg(long)]
        body: Option<String>,
    },

    /// Deliver a push message, then click the notification
    Click {
        /// Action button to click; omitted clicks the notification body
        #[arg(long)]
        action: Option<String>,
        /// Payload text
        #[arg(long)]
        body: Option<String>,
    },

    /// Fire a background sync event
    Sync {
        #[arg(long, default_value = "background-sync")]
        tag: String,
    },

    /// List persisted caches
    Caches,

    /// Delete every persisted cache
    Clear,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Install => "install",
            Command::Fetch { .. } => "fetch",
            Command::Push { .. } => "push",
            Command::Click { .. } => "click",
            Command::Sync { .. } => "sync",
            Command::Caches => "caches",
            Command::Clear => "clear",
        }
    }
}

/// Printed on stdout when a command finishes.
#[derive(Debug, Serialize)]
struct Summary {
    command: &'static str,
    cache_name: String,
    state: Option<ServiceWorkerState>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fetches: Vec<FetchSummary>,
    caches: Vec<CacheSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    windows: Vec<Client>,
    events: Vec<ServiceWorkerEvent>,
}

#[derive(Debug, Serialize)]
struct FetchSummary {
    url: String,
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_type: Option<ResponseType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bytes: Option<usize>,
}

impl FetchSummary {
    fn new(url: String, outcome: EventOutcome) -> Self {
        let mut summary = Self {
            url,
            outcome: "no-response",
            status: None,
            response_type: None,
            bytes: None,
        };
        match outcome {
            EventOutcome::PassThrough => summary.outcome = "pass-through",
            EventOutcome::Done | EventOutcome::Respond(None) => {}
            EventOutcome::Respond(Some(response)) => {
                summary.outcome = "response";
                summary.status = Some(response.status);
                summary.response_type = Some(response.response_type);
                summary.bytes = Some(response.body_len());
            }
        }
        summary
    }
}

#[derive(Debug, Serialize)]
struct CacheSummary {
    name: String,
    entries: usize,
}

fn load_config(cli: &Cli) -> anyhow::Result<AgentConfig> {
    let mut config = match &cli.config {
        Some(path) => AgentConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => match AgentConfig::default_path() {
            Some(path) => AgentConfig::load_or_default(&path)?,
            None => AgentConfig::default(),
        },
    };

    if let Some(scope) = &cli.scope {
        config.scope = scope.clone();
    }
    if let Some(storage) = &cli.storage {
        config.cache.storage_dir = Some(storage.clone());
    }
    config.validate()?;
    Ok(config)
}

async fn run(cli: Cli) -> anyhow::Result<Summary> {
    let config = load_config(&cli)?;
    let (agent, mut events) = CacheAgent::with_network(config).context("failed to start agent")?;
    let mut fetches = Vec::new();

    info!(command = cli.command.name(), cache = %agent.cache_name(), "Running");

    let command = cli.command.name();
    match cli.command {
        Command::Install => {
            agent.install().await?;
        }
        Command::Fetch { paths, navigate } => {
            agent.install().await?;
            for path in paths {
                let url = agent.scope().resolve(&path)?;
                let request = if navigate {
                    Request::navigate(url.clone())
                } else {
                    Request::get(url.clone())
                };
                let outcome = agent.fetch(request).await?;
                fetches.push(FetchSummary::new(url.to_string(), outcome));
            }
        }
        Command::Push { body } => {
            agent.push(body.map(PushData::from)).await?;
        }
        Command::Click { action, body } => {
            agent.push(body.map(PushData::from)).await?;
            let id = agent
                .scope()
                .notifications
                .read()
                .await
                .get_notifications(None)
                .last()
                .map(|n| n.id)
                .context("no notification was shown")?;
            agent.click_notification(id, action.as_deref()).await?;
        }
        Command::Sync { tag } => {
            agent.sync(&tag).await?;
        }
        Command::Caches => {}
        Command::Clear => {
            let removed = agent.clear_caches().await?;
            info!(removed, "Caches cleared");
        }
    }

    agent.settle().await;

    let caches = {
        let scope = agent.scope();
        let storage = scope.caches.read().await;
        storage
            .keys()
            .into_iter()
            .map(|name| CacheSummary {
                entries: storage.get(&name).map_or(0, |cache| cache.len()),
                name,
            })
            .collect()
    };

    let windows = agent
        .scope()
        .clients
        .read()
        .await
        .match_all(true)
        .into_iter()
        .cloned()
        .collect();

    let mut emitted = Vec::new();
    while let Ok(event) = events.try_recv() {
        emitted.push(event);
    }

    Ok(Summary {
        command,
        cache_name: agent.cache_name().to_string(),
        state: agent.state().await,
        fetches,
        caches,
        windows,
        events: emitted,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format: LogFormat = cli.log_format.parse()?;
    init_logging(LogConfig::from_verbosity(cli.verbose).with_format(format))?;

    let summary = run(cli).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
