//! Gateway client CLI binary.
//!
//! # Commands
//!
//! - `identity` - Show (and create if needed) the device identity
//! - `connect` - Handshake and print the server's hello
//! - `call` - Call a method and print the response payload
//! - `events` - Stream server events
//! - `token` - Show or clear the cached device token

use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use gateway::{
    ClientOptions, Config, Connection, FileTokenStore, GatewayClient, IdentityStore,
    InMemoryTokenStore, TokenStore, VERSION,
};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "gateway")]
#[command(version = VERSION)]
#[command(about = "Client for the authenticated gateway RPC protocol", long_about = None)]
struct Cli {
    /// Config file (TOML); environment variables apply otherwise
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Gateway URL (ws:// or wss://)
    #[arg(short, long, global = true)]
    url: Option<String>,

    /// Shared gateway token
    #[arg(short, long, global = true)]
    token: Option<String>,

    /// Directory holding identity and token state
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Requested role
    #[arg(long, global = true)]
    role: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the device identity
    Identity,

    /// Connect and print the hello-ok payload
    Connect,

    /// Call a method
    Call {
        /// Method name, e.g. `health`
        method: String,

        /// JSON params (or - for stdin)
        params: Option<String>,

        /// Request timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Print server events as JSON lines
    Events {
        /// Stop after this many events
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },

    /// Inspect the cached device token
    Token {
        /// Forget the cached token instead of showing it
        #[arg(long)]
        clear: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Identity => cmd_identity(&config),
        Commands::Token { clear } => cmd_token(&config, clear),
        Commands::Connect => run(&config, cmd_connect),
        Commands::Call {
            method,
            params,
            timeout,
        } => {
            let params = read_params(params)?;
            run(&config, move |connection| {
                cmd_call(connection, method, params, timeout)
            })
        }
        Commands::Events { count } => run(&config, move |connection| cmd_events(connection, count)),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let base = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env(),
    };

    let mut overrides = Config::default();
    if let Some(url) = &cli.url {
        overrides.gateway.url = url.clone();
    }
    overrides.gateway.token = cli.token.clone();
    overrides.storage.state_dir = cli.state_dir.clone();
    if let Some(role) = &cli.role {
        overrides.client.role = role.clone();
    }
    Ok(base.merge(overrides))
}

fn token_store(config: &Config) -> Arc<dyn TokenStore> {
    if config.storage.persist_tokens {
        Arc::new(FileTokenStore::open(config.storage.root()))
    } else {
        Arc::new(InMemoryTokenStore::new())
    }
}

/// Connect, run `command`, then close.
fn run<F, Fut>(config: &Config, command: F) -> anyhow::Result<()>
where
    F: FnOnce(Connection) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    let client = GatewayClient::new(
        ClientOptions::from(config),
        Arc::new(IdentityStore::new(config.storage.root())),
        token_store(config),
    );

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let mut states = client.watch_state();
        tokio::spawn(async move {
            while states.changed().await.is_ok() {
                let state = *states.borrow_and_update();
                tracing::debug!(%state, "connection state");
            }
        });

        let connection = client.connect_url(&config.gateway.url).await?;
        let result = command(connection.clone()).await;
        connection.close();
        result
    })
}

fn cmd_identity(config: &Config) -> anyhow::Result<()> {
    let store = IdentityStore::new(config.storage.root());
    let load = store.load_or_create();
    let identity = &load.identity;

    print_json(&json!({
        "deviceId": identity.device_id,
        "publicKey": identity.public_key_base64url(),
        "createdAtMs": identity.created_at_ms,
        "path": store.path(),
        "persistence": format!("{:?}", load.persistence),
    }))
}

fn cmd_token(config: &Config, clear: bool) -> anyhow::Result<()> {
    let identity = IdentityStore::new(config.storage.root())
        .load_or_create()
        .identity;
    let store = FileTokenStore::open(config.storage.root());
    let role = &config.client.role;

    if clear {
        store.clear(&identity.device_id, role);
        store.flush()?;
        println!("Cleared device token for role {role}");
        return Ok(());
    }

    match store.load(&identity.device_id, role) {
        Some(entry) => print_json(&json!({
            "role": entry.role,
            "scopes": entry.scopes,
            "updatedAtMs": entry.updated_at_ms,
        })),
        None => {
            println!("No device token cached for role {role}");
            Ok(())
        }
    }
}

async fn cmd_connect(connection: Connection) -> anyhow::Result<()> {
    print_json(&serde_json::to_value(connection.hello())?)
}

async fn cmd_call(
    connection: Connection,
    method: String,
    params: Option<Value>,
    timeout: Option<u64>,
) -> anyhow::Result<()> {
    let features = &connection.hello().features;
    if !features.methods.is_empty() && !features.supports_method(&method) {
        tracing::warn!(%method, "server does not advertise this method");
    }

    let result = match timeout {
        Some(secs) => {
            connection
                .request_with_timeout(&method, params, Some(std::time::Duration::from_secs(secs)))
                .await?
        }
        None => connection.request(&method, params).await?,
    };
    print_json(&result)
}

async fn cmd_events(connection: Connection, count: Option<usize>) -> anyhow::Result<()> {
    let mut events = connection.subscribe();
    let mut seen = 0usize;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    println!("{}", serde_json::to_string(&event)?);
                    seen += 1;
                    if count.is_some_and(|limit| seen >= limit) {
                        return Ok(());
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    eprintln!("Skipped {skipped} events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return Ok(()),
            },
            reason = connection.closed() => {
                anyhow::bail!("Connection ended: {reason}");
            }
        }
    }
}

// Helper functions

fn read_params(input: Option<String>) -> anyhow::Result<Option<Value>> {
    let text = match input {
        None => return Ok(None),
        Some(s) if s == "-" => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
        Some(s) => s,
    };
    let value: Value = serde_json::from_str(&text)
        .map_err(|e| anyhow::anyhow!("Params are not valid JSON: {e}"))?;
    Ok(Some(value))
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
