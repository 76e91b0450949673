use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use syncwave_core::config::Config;
use syncwave_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use syncwave_core::replay::JsonMergeReducer;
use syncwave_core::service::{serve, RealtimeService};
use syncwave_core::shutdown::{install_signal_handlers, ShutdownCoordinator};
use syncwave_core::transport::{ClientEvent, StreamClient, StreamClientConfig, TransportMode};
use syncwave_core::MemoryEventLog;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "syncwave")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Parser, Debug)]
enum Command {
    /// Run the realtime server
    Serve {
        /// Address to listen on
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Transports to enable (websocket, sse, both)
        #[arg(long)]
        transport: Option<TransportMode>,

        /// Snapshot every N events per actor, 0 disables
        #[arg(long)]
        snapshot_interval: Option<u64>,
    },
    /// Print the effective configuration as TOML
    PrintConfig,
    /// Follow a server's event stream and print each message
    Tail {
        /// Server base URL, e.g. http://127.0.0.1:8080
        url: String,

        /// Only these actors (comma separated)
        #[arg(long, value_delimiter = ',')]
        actor: Vec<String>,
    },
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::default(),
    };
    config.apply_env()?;

    if let Some(level) = &args.log_level {
        config.logging.level = level.to_lowercase();
    }
    if args.json_logs {
        config.logging.json_format = true;
    }
    if let Some(Command::Serve {
        bind,
        transport,
        snapshot_interval,
    }) = &args.command
    {
        if let Some(bind) = bind {
            config.server.bind_address = *bind;
        }
        if let Some(mode) = transport {
            config.transport.mode = *mode;
        }
        if let Some(interval) = snapshot_interval {
            config.event_store.snapshot_interval = *interval;
        }
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    if let Some(Command::PrintConfig) = args.command {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    let log_config = LogConfig::from_config(&config.logging).unwrap_or_else(|e| {
        eprintln!("{e}, using 'info'");
        LogConfig::new(LogLevel::Info)
    });
    init_logging_with_config(log_config)?;

    match args.command {
        Some(Command::Serve { .. }) => run_server(config).await?,
        Some(Command::Tail { url, actor }) => tail(url, actor, &config).await?,
        Some(Command::PrintConfig) => {}
        None => {
            info!("No command specified. Use --help for usage information.");
        }
    }

    Ok(())
}

async fn run_server(config: Config) -> Result<()> {
    if config.metrics.enabled {
        PrometheusBuilder::new()
            .with_http_listener(config.metrics.bind_address)
            .install()
            .context("installing prometheus exporter")?;
        syncwave_core::metrics::init_metrics();
        info!(addr = %config.metrics.bind_address, "metrics exporter listening");
    }

    let shutdown = Arc::new(ShutdownCoordinator::new(config.server.shutdown_timeout));
    install_signal_handlers(shutdown.clone())?;

    let listener = TcpListener::bind(config.server.bind_address)
        .await
        .with_context(|| format!("binding {}", config.server.bind_address))?;

    let service = Arc::new(RealtimeService::new(
        Arc::new(MemoryEventLog::new()),
        Arc::new(JsonMergeReducer),
        config,
    ));

    info!("SyncWave server starting");
    serve(service, listener, shutdown).await?;
    info!("SyncWave server finished");
    Ok(())
}

async fn tail(url: String, actors: Vec<String>, config: &Config) -> Result<()> {
    let client_config = StreamClientConfig::new(url.trim_end_matches('/'))
        .with_actors(actors)
        .with_reconnect(config.transport.reconnect.clone());
    let (mut handle, mut events) = StreamClient::new(client_config).spawn();

    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        };
        let Some(event) = event else { break };

        match event {
            ClientEvent::Connected { client_id } => info!(%client_id, "connected"),
            ClientEvent::Message(message) => println!("{}", message.to_socket_text()?),
            ClientEvent::Resynced(page) => {
                for event in &page.events {
                    println!("{}", serde_json::to_string(event)?);
                }
            }
            ClientEvent::Disconnected { reason } => warn!(%reason, "disconnected"),
            ClientEvent::GaveUp { attempts } => {
                warn!(attempts, "giving up");
                break;
            }
        }
    }

    handle.cancel();
    Ok(())
}
