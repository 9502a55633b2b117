//! Debug CLI: run one command against a server and print the decoded result
//! maps as JSON lines.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use vcwire::protocol::field::Field;
use vcwire::{
    CommandArgs, CommandSession, Connection, ConnectionConfig, FieldMap, SecureChannelFactory,
};

#[derive(Parser, Debug)]
#[command(name = "vcw", about = "Wire-protocol debug client", version)]
struct Cli {
    /// Config file (defaults to the platform config directory).
    #[arg(long, env = "VCWIRE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the server host.
    #[arg(long)]
    host: Option<String>,

    /// Override the server port.
    #[arg(long)]
    port: Option<u16>,

    /// Override the user name.
    #[arg(long)]
    user: Option<String>,

    /// Command function to run, e.g. `info` or `files`.
    command: String,

    /// Positional arguments for the command.
    args: Vec<String>,
}

fn to_json(map: &FieldMap) -> serde_json::Value {
    let mut object = serde_json::Map::new();
    let mut positional = Vec::new();
    for Field { name, value } in map.iter() {
        let value_str = String::from_utf8_lossy(value).into_owned();
        match name {
            Some(name) => {
                object.insert(name.clone(), serde_json::Value::String(value_str));
            }
            None => positional.push(serde_json::Value::String(value_str)),
        }
    }
    if !positional.is_empty() {
        object.insert("_args".to_string(), serde_json::Value::Array(positional));
    }
    serde_json::Value::Object(object)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ConnectionConfig::load(Some(path.as_path()))?,
        None => match ConnectionConfig::load(None) {
            Ok(config) => config,
            // No config file is fine as long as --host is given.
            Err(_) => ConnectionConfig::new(""),
        },
    };
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(user) = cli.user {
        config.user = user;
    }
    if config.host.is_empty() {
        anyhow::bail!("no server host: pass --host or set one in the config file");
    }

    let factory = match &config.tls {
        Some(settings) => Some(SecureChannelFactory::new(settings.clone())?),
        None => None,
    };

    let mut connection = Connection::connect(&config, factory.as_ref())
        .await
        .with_context(|| format!("connecting to {}:{}", config.host, config.port))?;
    connection.announce().await?;

    let mut session = CommandSession::new(cli.command.clone(), CommandArgs::Positional(cli.args));
    if let Some(ticket) = &config.ticket {
        session.set_ticket(ticket.as_str());
    }
    session.stream_to(Box::new(|map| {
        println!("{}", to_json(&map));
        Ok(())
    }));

    let outcome = connection.run_command(&mut session).await?;
    eprintln!("outcome: {outcome:?}");
    for msg in session.server_messages() {
        eprintln!("server {}: {}", msg.severity.as_str(), msg.text);
    }

    let stats = connection.stats().snapshot();
    tracing::info!(
        packets_sent = stats.packets_sent,
        packets_received = stats.packets_received,
        bytes_sent = stats.bytes_sent,
        bytes_received = stats.bytes_received,
        "transfer statistics"
    );
    Ok(())
}
