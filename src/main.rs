use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use serde_json::Value;
use uuid::Uuid;

use dx_streams::logging::{init_logging, LogConfig};
use dx_streams::model::diff_layers;
use dx_streams::{
    ClientConfig, ErrorCategory, JsonConverter, Layer, StreamEvent, StreamReceiver, StreamSender, SyncConfig,
};

#[derive(Parser)]
#[command(name = "dx-streams")]
#[command(about = "Publish objects to a live stream and follow streams in real time", version)]
#[command(after_help = "Connection settings fall back to DX_STREAMS_SERVER, DX_STREAMS_TOKEN and
DX_STREAMS_STREAM_ID (a .env file is honoured). Timings come from --config or DX_STREAMS_* variables.")]
struct Cli {
    /// REST endpoint of the stream server
    #[arg(long, global = true, value_name = "URL")]
    server: Option<String>,

    #[arg(long, global = true)]
    token: Option<String>,

    /// TOML file with debounce intervals and limits
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Include module targets in log lines
    #[arg(long, global = true)]
    log_targets: bool,

    /// Also write rotated log files here
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a JSON array of objects, creating a stream unless --stream is given
    Send {
        /// File holding a JSON array of typed objects
        file: PathBuf,

        #[arg(short, long)]
        stream: Option<String>,

        #[arg(short, long, default_value = "dx-streams")]
        name: String,

        /// Save a history snapshot with this label after uploading
        #[arg(long, value_name = "LABEL")]
        snapshot: Option<String>,

        /// Delete the stream again before exiting
        #[arg(long)]
        delete: bool,
    },

    /// Follow a stream and print everything that happens until Ctrl-C
    Receive {
        #[arg(short, long)]
        stream: Option<String>,
    },

    /// Save a history snapshot of a stream
    History {
        #[arg(short, long)]
        stream: Option<String>,

        /// Empty lets the server pick a name
        #[arg(default_value = "")]
        label: String,
    },

    /// Print the effective timing configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::new(&cli.log_level).with_target(cli.log_targets);
    if let Some(dir) = &cli.log_dir {
        log_config = log_config.with_log_dir(dir);
    }
    let _guard = init_logging(&log_config)?;

    let sync_config = match &cli.config {
        Some(path) => SyncConfig::from_toml_file(path)?,
        None => SyncConfig::from_env()?,
    };

    match cli.command {
        Commands::Send {
            ref file,
            ref stream,
            ref name,
            ref snapshot,
            delete,
        } => {
            let client = client_config(&cli, stream.clone())?;
            send(client, sync_config, file, name, snapshot.as_deref(), delete).await?;
        }

        Commands::Receive { ref stream } => {
            let client = client_config(&cli, stream.clone())?;
            receive(client, sync_config).await?;
        }

        Commands::History { ref stream, ref label } => {
            let client = client_config(&cli, stream.clone())?;
            history(client, sync_config, label).await?;
        }

        Commands::Config => {
            println!("{}", toml::to_string_pretty(&sync_config)?);
        }
    }

    Ok(())
}

/// Command-line flags win over the environment.
fn client_config(cli: &Cli, stream: Option<String>) -> Result<ClientConfig> {
    let mut config = match (&cli.server, &cli.token) {
        (Some(server), Some(token)) => ClientConfig::new(server, token),
        _ => {
            let mut from_env = ClientConfig::from_env()?;
            if let Some(server) = &cli.server {
                from_env.rest_endpoint = server.clone();
            }
            if let Some(token) = &cli.token {
                from_env.token = token.clone();
            }
            from_env
        }
    };
    if stream.is_some() {
        config.stream_id = stream;
    }
    Ok(config)
}

fn timestamp() -> ColoredString {
    format!("[{}]", chrono::Local::now().format("%H:%M:%S%.3f")).bright_black()
}

fn print_event(event: &StreamEvent<Value>) {
    let label = event.name();
    let detail = match event {
        StreamEvent::Ready { stream_id, initial } => match initial {
            Some(initial) => format!(
                "{} ({} objects, {} layers)",
                stream_id,
                initial.data.objects.len(),
                initial.data.layers.len()
            ),
            None => stream_id.clone(),
        },
        StreamEvent::Message { message, target } => match target {
            Some(target) => format!("{message} (to {target})"),
            None => message.clone(),
        },
        StreamEvent::Broadcast(message) => message.clone(),
        StreamEvent::DataSent { objects, references } => {
            format!("{objects} objects, {references} by reference")
        }
        StreamEvent::HistorySaved(reply) | StreamEvent::History(reply) => reply.to_string(),
        StreamEvent::Data(data) => {
            let failed = data.objects.iter().filter(|o| o.is_failed()).count();
            format!("{}: {} objects, {} failed", data.name, data.objects.len(), failed)
        }
        StreamEvent::Metadata { layers, name } => format!("{name}: {} layers", layers.len()),
        StreamEvent::Error(e) => e.to_string(),
        StreamEvent::MetadataSent | StreamEvent::UpdateNotified => String::new(),
    };

    let label = if event.is_error() {
        label.red().bold()
    } else {
        label.cyan().bold()
    };
    println!("{} {} {}", timestamp(), label, detail);

    let resolved = match event {
        StreamEvent::Data(data) => Some(data),
        StreamEvent::Ready { initial: Some(initial), .. } => Some(&initial.data),
        _ => None,
    };
    for error in resolved.into_iter().flat_map(|data| data.objects.iter().filter_map(|o| o.error())) {
        println!("  {} {}", "✗".red(), error);
    }

    if let StreamEvent::Error(e) = event {
        for hint in e.suggestions() {
            println!("  {} {}", "hint:".yellow(), hint);
        }
        if e.category().is_retryable_by_caller() {
            println!("  {} resubmitting may succeed", "hint:".yellow());
        }
    }
}

fn print_layer_changes(old: &[Layer], new: &[Layer]) {
    let diff = diff_layers(old, new);
    for layer in &diff.to_add {
        println!("  {} {} ({} objects)", "+".green(), layer.name, layer.object_count);
    }
    for layer in &diff.to_remove {
        println!("  {} {}", "-".red(), layer.name);
    }
}

async fn send(
    client: ClientConfig,
    config: SyncConfig,
    file: &Path,
    name: &str,
    snapshot: Option<&str>,
    delete: bool,
) -> Result<()> {
    let text = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let objects: Vec<Value> = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a JSON array", file.display()))?;
    let layer = Layer::new("default", Uuid::new_v4().to_string(), 0, objects.len(), 0);

    println!("{}", "📡 Connecting sender...".cyan().bold());
    let mut sender = StreamSender::new(client, JsonConverter, config)?;
    let mut objects = Some(objects);

    while let Some(event) = sender.next_event().await {
        print_event(&event);
        match event {
            StreamEvent::Ready { .. } => {
                if let Some(objects) = objects.take() {
                    sender.submit_data(objects, vec![layer.clone()], name)?;
                }
            }
            StreamEvent::DataSent { .. } => match snapshot {
                Some(label) => sender.snapshot_history(label)?,
                None => break,
            },
            StreamEvent::HistorySaved(_) => break,
            // Nothing else will arrive after these.
            StreamEvent::Error(e)
                if e.category().is_fatal() || e.category() == ErrorCategory::PayloadTooLarge =>
            {
                sender.dispose(false).await;
                bail!(e);
            }
            _ => {}
        }
    }

    let descriptor = sender.descriptor();
    println!("{}", "✓ Upload complete".green());
    println!("{}", serde_json::to_string_pretty(&descriptor)?);
    sender.dispose(delete).await;
    if delete {
        println!("{} Stream deleted", "✓".green());
    }
    Ok(())
}

async fn receive(client: ClientConfig, config: SyncConfig) -> Result<()> {
    println!("{}", "👁  Following stream...".cyan().bold());
    let mut receiver = StreamReceiver::new(client, JsonConverter, config)?;
    let mut layers: Vec<Layer> = Vec::new();

    loop {
        tokio::select! {
            event = receiver.next_event() => match event {
                Some(StreamEvent::Error(e)) if e.category().is_fatal() => {
                    print_event(&StreamEvent::Error(e.clone()));
                    receiver.dispose(false).await;
                    bail!(e);
                }
                Some(event) => {
                    print_event(&event);
                    let current = match &event {
                        StreamEvent::Ready { initial: Some(initial), .. } => Some(&initial.data.layers),
                        StreamEvent::Data(data) => Some(&data.layers),
                        StreamEvent::Metadata { layers, .. } => Some(layers),
                        _ => None,
                    };
                    if let Some(current) = current {
                        print_layer_changes(&layers, current);
                        layers = current.clone();
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("\n{}", "Stopping...".yellow());
                break;
            }
        }
    }

    receiver.dispose(false).await;
    Ok(())
}

async fn history(client: ClientConfig, config: SyncConfig, label: &str) -> Result<()> {
    let mut receiver = StreamReceiver::new(client, JsonConverter, config)?;

    while let Some(event) = receiver.next_event().await {
        match event {
            StreamEvent::Ready { .. } => receiver.snapshot_history(label)?,
            StreamEvent::HistorySaved(reply) => {
                println!("{} Snapshot saved: {}", "✓".green(), reply.to_string().bright_white());
                break;
            }
            StreamEvent::Error(e) => {
                print_event(&StreamEvent::Error(e.clone()));
                if e.category().is_fatal() || e.category() == ErrorCategory::Operation {
                    receiver.dispose(false).await;
                    bail!(e);
                }
            }
            _ => {}
        }
    }

    receiver.dispose(false).await;
    Ok(())
}
