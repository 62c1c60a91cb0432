// Nexus CLI - Main Entry Point
//
// Thin command-line front end over the session library:
// - connection status and catalog listings
// - tool execution and free-form queries
// - streaming of tool_execution push events

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nexus_session::config::Config;
use nexus_session::logging;
use nexus_session::session::{ConnectionState, HttpTransport, Session};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

/// Nexus: client for the Nexus tool service
#[derive(Parser, Debug)]
#[command(name = "nexus")]
#[command(author = "Nexus Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Connect to a Nexus API server and call its tools", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Path to the config file (default: ~/.config/nexus/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Base URL of the Nexus API server, overriding the config file
    #[arg(long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect and report the resulting connection state
    Status,
    /// List the tools the server advertises
    Tools,
    /// List resources and resource templates
    Resources,
    /// Fetch the content of one resource
    Resource {
        /// Resource URI, e.g. file:///notes.md
        uri: String,
    },
    /// Execute a tool
    Exec {
        /// Name of the tool to call
        tool: String,

        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },
    /// Send a free-form query
    Query {
        /// Query text
        text: String,

        /// Extra context as a JSON value
        #[arg(long)]
        context: Option<String>,
    },
    /// List the upstream servers behind the API server
    Servers,
    /// Print tool_execution events until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    if let Some(server) = args.server {
        config.server.base_url = server;
        config.validate()?;
    }

    logging::init(&config.logging, args.verbose)?;
    info!(server = %config.server.base_url, "Nexus client starting");

    let transport = HttpTransport::from_config(&config.server)?;
    let session = Session::new(transport, config.session.clone());

    // Retries continue in the background; settled() waits them out
    if let Err(e) = session.connect().await {
        warn!(error = %e, "Initial connect failed");
    }
    let state = session.settled().await;

    let outcome = run(&session, args.command, state).await;
    session.disconnect().await;
    outcome
}

async fn run(session: &Session<HttpTransport>, command: Commands, state: ConnectionState) -> Result<()> {
    if let Commands::Status = command {
        println!("{state}");
        if let Some(retry) = session.pending_retry() {
            println!("retries used: {}/{}", retry.attempt_count, retry.max_attempts);
        }
        return Ok(());
    }

    if state != ConnectionState::Connected {
        anyhow::bail!(
            "Could not connect to {} (state: {state})",
            session.transport().base_url()
        );
    }

    match command {
        Commands::Status => {}
        Commands::Tools => {
            for tool in session.list_tools()? {
                println!("{}\t{}", tool.name, tool.description.as_deref().unwrap_or(""));
            }
        }
        Commands::Resources => {
            for resource in session.list_resources()? {
                println!("{}\t{}", resource.uri, resource.name);
            }
            for template in session.list_resource_templates()? {
                println!("{}\t{}", template.uri_template, template.name);
            }
        }
        Commands::Resource { uri } => {
            let content = session.get_resource(&uri).await?;
            println!("{}", content.text);
        }
        Commands::Exec { tool, args } => {
            let arguments = parse_json("--args", &args)?;
            let result = session.execute_tool(&tool, arguments).await?;
            print_json(&result)?;
        }
        Commands::Query { text, context } => {
            let context = context.map(|raw| parse_json("--context", &raw)).transpose()?;
            let response = session.process_query(&text, context).await?;
            println!("{}", response.text());
        }
        Commands::Servers => {
            for server in session.list_servers().await? {
                println!("{server}");
            }
        }
        Commands::Watch => watch(session).await?,
    }

    Ok(())
}

async fn watch(session: &Session<HttpTransport>) -> Result<()> {
    let subscription = session.on_tool_execution(|event| {
        match serde_json::to_string(&event.result) {
            Ok(result) => println!("{}\t{}", event.tool, result),
            Err(e) => warn!(tool = %event.tool, error = %e, "Unprintable tool result"),
        }
    });

    info!("Watching tool executions, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    subscription.unsubscribe();
    Ok(())
}

fn parse_json(flag: &str, raw: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("{flag} is not valid JSON: {raw}"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
