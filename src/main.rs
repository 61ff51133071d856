//! agent-orchestra - drive coding-agent sessions from the command line

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use agent_orchestra::connection::{AuthProbe, ConnectionResolver, EnvConnectionResolver};
use agent_orchestra::{
    CliAuthProbe, OrchestraConfig, SendMessageRequest, SessionConfig, SessionEvent,
    SessionManager,
};

/// Run and inspect coding-agent sessions
#[derive(Parser, Debug)]
#[command(name = "agent-orchestra", author, version, about)]
struct Args {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the connection the current configuration resolves to
    Resolve,

    /// Check authentication and report the agent version
    Probe,

    /// Send prompts to a new session, printing events as JSON lines
    ///
    /// Prompts given as arguments are sent in order on one thread; with no
    /// arguments, each line of stdin is a prompt.
    Chat {
        /// Working directory for the agent
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,

        /// Model to request
        #[arg(long)]
        model: Option<String>,

        /// Agent mode to request
        #[arg(long)]
        agent_mode: Option<String>,

        /// Let the agent route between models
        #[arg(long)]
        auto_route: bool,

        /// Prompts to send
        prompts: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = match args.config {
        Some(ref path) => OrchestraConfig::load_from(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => OrchestraConfig::load(),
    };

    match args.command {
        Command::Resolve => {
            let connection = EnvConnectionResolver::new()
                .resolve(&config.connection, &config.resolution_env())?;
            println!("mode: {}", connection.mode);
            println!("target: {}", connection.path_or_url);
            println!("{}", connection.description());
        }
        Command::Probe => {
            let connection = EnvConnectionResolver::new()
                .resolve(&config.connection, &config.resolution_env())?;
            if !connection.requires_auth() {
                println!("{}: no CLI authentication required", connection.description());
                return Ok(());
            }
            let outcome = CliAuthProbe::default()
                .probe(&connection, &config.resolution_env())
                .await?;
            println!(
                "{}: authenticated (version {})",
                connection.description(),
                outcome.version.as_deref().unwrap_or("unknown")
            );
        }
        Command::Chat {
            dir,
            model,
            agent_mode,
            auto_route,
            prompts,
        } => chat(config, dir, model, agent_mode, auto_route, prompts).await?,
    }
    Ok(())
}

async fn chat(
    config: OrchestraConfig,
    dir: PathBuf,
    model: Option<String>,
    agent_mode: Option<String>,
    auto_route: bool,
    prompts: Vec<String>,
) -> Result<()> {
    let dir = std::fs::canonicalize(&dir)
        .with_context(|| format!("working directory {} not found", dir.display()))?;
    let manager = Arc::new(SessionManager::new(config));

    let mut builder = SessionConfig::builder(dir).auto_route(auto_route);
    if let Some(model) = model {
        builder = builder.model(model);
    }
    if let Some(agent_mode) = agent_mode {
        builder = builder.agent_id(agent_mode);
    }
    let session_id = manager.create_session(builder.build()).await?;

    let mut events = manager.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let SessionEvent::Destroyed { .. } = event {
                break;
            }
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => log::warn!("Unprintable event: {e}"),
            }
        }
    });

    let prompts = if prompts.is_empty() {
        std::io::stdin()
            .lock()
            .lines()
            .collect::<std::io::Result<Vec<_>>>()?
            .into_iter()
            .filter(|line| !line.trim().is_empty())
            .collect()
    } else {
        prompts
    };

    let mut failed = false;
    for prompt in prompts {
        let result = manager
            .send_message(SendMessageRequest::new(session_id.clone(), prompt))
            .await?;
        let attempts = result.attempts;
        if let Err(e) = result.into_result() {
            failed = true;
            log::error!("Turn failed after {attempts} attempt(s): {e}");
        }
    }

    manager.shutdown().await;
    let _ = printer.await;
    if failed {
        anyhow::bail!("one or more turns failed");
    }
    Ok(())
}
