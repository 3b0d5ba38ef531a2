//! VR Movement Notifier CLI
//!
//! Sends experiment lifecycle notifications and runs the coordinating server.

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use vr_movement_notifier::{
    config::{parse_port, Config, EndpointConfig},
    ConnectionState, Gesture, Notifier, MOVEMENT_DELAY, VERSION,
};

#[derive(Parser)]
#[command(name = "vr-notifier")]
#[command(version = VERSION)]
#[command(about = "Experiment event notifier for VR movement training", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct EndpointArgs {
    /// Notification server host (overrides config and environment)
    #[arg(long)]
    host: Option<String>,

    /// Notification server port (overrides config and environment)
    #[arg(long)]
    port: Option<String>,

    /// Audit mode: go through the motions without transmitting anything
    #[arg(long)]
    audit: bool,

    /// How long to wait for the connection before giving up on it
    #[arg(long, default_value = "3000")]
    connect_timeout_ms: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a single notification
    Notify {
        #[command(flatten)]
        endpoint: EndpointArgs,

        #[command(subcommand)]
        event: NotifyEvent,
    },

    /// Run a simulated training session
    Session {
        #[command(flatten)]
        endpoint: EndpointArgs,

        /// Number of repetitions of the full gesture set
        #[arg(long, default_value = "5")]
        reps: u32,

        /// Time between movements in milliseconds
        #[arg(long, default_value = "6000")]
        interval_ms: u64,

        /// How far in the future each movement starts, in milliseconds
        #[arg(long, default_value = "1000")]
        lead_ms: i64,
    },

    /// Run the coordinating server
    Listen {
        /// Host to bind (defaults to the configured endpoint host)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (defaults to the configured endpoint port)
        #[arg(long)]
        port: Option<String>,
    },

    /// Show configuration
    Config,

    /// Save the notification server endpoint
    SetEndpoint { host: String, port: String },
}

#[derive(Subcommand)]
enum NotifyEvent {
    /// Experiment has started
    Started {
        /// Epoch milliseconds (defaults to now)
        #[arg(long)]
        timestamp: Option<i64>,
    },

    /// A movement is about to start
    Movement {
        #[arg(long)]
        rep: u32,

        /// Movement number in the training UI order (0-4)
        #[arg(long)]
        movement: u32,

        /// Epoch milliseconds when the movement starts (defaults to now)
        #[arg(long)]
        timestamp: Option<i64>,
    },

    /// Experiment has ended
    Ended {
        /// Epoch milliseconds (defaults to now)
        #[arg(long)]
        timestamp: Option<i64>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config: {e}");
        Config::default()
    });
    if let Err(e) = config.apply_env() {
        eprintln!("Warning: Ignoring environment override: {e}");
    }

    init_tracing(&config.log_level);

    match cli.command {
        Commands::Notify { endpoint, event } => cmd_notify(&config, endpoint, event).await,
        Commands::Session {
            endpoint,
            reps,
            interval_ms,
            lead_ms,
        } => cmd_session(&config, endpoint, reps, interval_ms, lead_ms).await,
        Commands::Listen { host, port } => cmd_listen(&config, host, port).await,
        Commands::Config => {
            cmd_config(&config);
            Ok(())
        }
        Commands::SetEndpoint { host, port } => cmd_set_endpoint(host, &port),
    }
}

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Endpoint and audit flag after applying command-line overrides.
fn resolve(config: &Config, args: &EndpointArgs) -> anyhow::Result<(EndpointConfig, bool)> {
    let mut config = config.clone();
    config.apply_overrides(args.host.as_deref(), args.port.as_deref())?;
    Ok((config.endpoint, args.audit || config.audit_only))
}

/// Open a notifier and give the connection a chance to come up.
async fn connect(args: &EndpointArgs, endpoint: EndpointConfig, audit: bool) -> Notifier {
    let notifier = Notifier::new(endpoint, audit);
    let url = notifier.transport().endpoint().url();

    let timeout = Duration::from_millis(args.connect_timeout_ms);
    match notifier.transport().wait_while_connecting(timeout).await {
        ConnectionState::Open => println!("Connected to {url}"),
        state => eprintln!("Warning: Connection to {url} is {state}; notifications will be dropped"),
    }

    if audit {
        println!("Audit mode: nothing will be transmitted");
    }

    notifier
}

/// Drop the notifier and let its connection close before the runtime stops.
async fn finish(notifier: Notifier) {
    println!();
    println!("{}", notifier.stats_summary());
    drop(notifier);
    tokio::time::sleep(Duration::from_millis(100)).await;
}

async fn cmd_notify(
    config: &Config,
    args: EndpointArgs,
    event: NotifyEvent,
) -> anyhow::Result<()> {
    let (endpoint, audit) = resolve(config, &args)?;
    let notifier = connect(&args, endpoint, audit).await;

    match event {
        NotifyEvent::Started { timestamp } => {
            notifier.experiment_started(timestamp.unwrap_or_else(now_ms));
        }
        NotifyEvent::Movement {
            rep,
            movement,
            timestamp,
        } => {
            if Gesture::from_movement_number(movement).is_none() {
                eprintln!("Warning: Movement number {movement} is outside the gesture catalog");
            }
            notifier.movement_occurred(rep, movement, timestamp.unwrap_or_else(now_ms));
            tokio::time::sleep(MOVEMENT_DELAY + Duration::from_millis(50)).await;
        }
        NotifyEvent::Ended { timestamp } => {
            notifier.experiment_ended(timestamp.unwrap_or_else(now_ms));
        }
    }

    finish(notifier).await;
    Ok(())
}

async fn cmd_session(
    config: &Config,
    args: EndpointArgs,
    reps: u32,
    interval_ms: u64,
    lead_ms: i64,
) -> anyhow::Result<()> {
    let (endpoint, audit) = resolve(config, &args)?;
    let notifier = connect(&args, endpoint, audit).await;

    println!("Press Ctrl+C to stop");
    println!();

    notifier.experiment_started(now_ms());
    let interval = Duration::from_millis(interval_ms);
    let mut interrupted = false;

    'session: for rep in 1..=reps {
        for (movement, gesture) in Gesture::CLIENT_ORDER.iter().enumerate() {
            notifier.movement_occurred(rep, movement as u32, now_ms() + lead_ms);
            println!(
                "[{}] Rep {rep}, movement {movement}: {gesture}",
                Utc::now().format("%H:%M:%S")
            );

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = tokio::signal::ctrl_c() => {
                    interrupted = true;
                    break 'session;
                }
            }
        }
    }

    if interrupted {
        println!();
        println!("Session interrupted; cancelling pending movements");
        notifier.cancel_pending();
    } else {
        // Let the last movement go out before reporting the end.
        tokio::time::sleep(MOVEMENT_DELAY).await;
    }

    notifier.experiment_ended(now_ms());
    finish(notifier).await;
    Ok(())
}

#[cfg(feature = "server")]
async fn cmd_listen(
    config: &Config,
    host: Option<String>,
    port: Option<String>,
) -> anyhow::Result<()> {
    use vr_movement_notifier::server::{describe_record, run, ServerConfig};

    let mut config = config.clone();
    config.apply_overrides(host.as_deref(), port.as_deref())?;

    let (events_tx, mut events) = tokio::sync::mpsc::unbounded_channel();
    let server_config =
        ServerConfig::new(config.endpoint.host.clone(), config.endpoint.port).with_events(events_tx);
    let (addr, shutdown_tx) = run(server_config).await?;

    println!("Listening on ws://{addr}");
    println!("Press Ctrl+C to stop");
    println!();

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                println!(
                    "[{}] {}: {}",
                    event.received_at.format("%H:%M:%S%.3f"),
                    event.peer,
                    describe_record(&event.record)
                );
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let _ = shutdown_tx.send(());
    println!("Server stopped");
    Ok(())
}

#[cfg(not(feature = "server"))]
async fn cmd_listen(
    _config: &Config,
    _host: Option<String>,
    _port: Option<String>,
) -> anyhow::Result<()> {
    anyhow::bail!("listen requires the `server` feature")
}

fn cmd_config(config: &Config) {
    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!("Endpoint URL: {}", config.endpoint.url());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(config).unwrap_or_else(|_| "Error".to_string())
    );
}

fn cmd_set_endpoint(host: String, port: &str) -> anyhow::Result<()> {
    let mut config = Config::load().unwrap_or_default();
    config.endpoint = EndpointConfig::new(host, parse_port(port)?);
    config.save()?;
    println!("Endpoint saved: {}", config.endpoint.url());
    Ok(())
}
