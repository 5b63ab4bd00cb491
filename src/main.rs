// ABOUTME: CLI entry point for metadata-sync
// ABOUTME: Parses commands and routes to the serve, migrate and client handlers

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use metadata_sync::commands::{self, ClientOptions};
use metadata_sync::config::{FileConfig, ServeConfig, ServeOverrides, DEFAULT_CONNECT_RETRIES};
use sync_engine::EntityKind;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "metadata-sync")]
#[command(about = "Reconcile and stream metadata records to connected clients", long_about = None)]
#[command(version)]
struct Cli {
    /// Allow self-signed TLS certificates (insecure - use only for testing)
    #[arg(
        long = "allow-self-signed-certs",
        global = true,
        default_value_t = false
    )]
    allow_self_signed_certs: bool,
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, env = "METADATA_SYNC_LOG", global = true, default_value = "info")]
    log: String,
    /// Path to metadata-sync.toml
    #[arg(long, env = "METADATA_SYNC_CONFIG", global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ClientArgs {
    /// Sync server endpoint
    #[arg(long, env = "METADATA_SYNC_ENDPOINT", default_value = "http://127.0.0.1:50061")]
    endpoint: String,
    /// Shared token file (defaults to ~/.metadata-sync/token)
    #[arg(long, env = "METADATA_SYNC_TOKEN_FILE")]
    token_file: Option<PathBuf>,
    /// Owner id sent as the trusted identity
    #[arg(long, env = "METADATA_SYNC_OWNER")]
    owner: String,
}

impl From<ClientArgs> for ClientOptions {
    fn from(args: ClientArgs) -> Self {
        ClientOptions {
            endpoint: args.endpoint,
            token_file: args.token_file,
            owner: args.owner,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sync server
    Serve {
        /// Listen address (host:port or tcp:<port>)
        #[arg(long, env = "METADATA_SYNC_LISTEN")]
        listen: Option<String>,
        #[arg(long, env = "METADATA_SYNC_DATABASE_URL")]
        database_url: Option<String>,
        /// Shared token file (defaults to ~/.metadata-sync/token)
        #[arg(long, env = "METADATA_SYNC_TOKEN_FILE")]
        token_file: Option<PathBuf>,
        /// Events buffered per kind before a slow session starts skipping
        #[arg(long, env = "METADATA_SYNC_PUBLISHER_CAPACITY")]
        publisher_capacity: Option<usize>,
        /// Frames buffered per session
        #[arg(long, env = "METADATA_SYNC_SESSION_BUFFER")]
        session_buffer: Option<usize>,
        #[arg(long, env = "METADATA_SYNC_CONNECT_RETRIES")]
        connect_retries: Option<u32>,
        /// Create tables before serving
        #[arg(long)]
        migrate: bool,
    },
    /// Create or upgrade the metadata tables
    Migrate {
        #[arg(long, env = "METADATA_SYNC_DATABASE_URL")]
        database_url: Option<String>,
        #[arg(long, env = "METADATA_SYNC_CONNECT_RETRIES")]
        connect_retries: Option<u32>,
    },
    /// Open a sync session and print frames as JSON lines
    Watch {
        #[command(flatten)]
        client: ClientArgs,
        #[arg(long)]
        kind: EntityKind,
        /// JSON array of {"id", "updatedAt"} describing the local cache
        #[arg(long)]
        known_file: Option<PathBuf>,
    },
    /// Create or update one entity
    Put {
        #[command(flatten)]
        client: ClientArgs,
        #[arg(long)]
        kind: EntityKind,
        /// Entity id; omit to create a new one
        #[arg(long)]
        id: Option<String>,
        /// JSON object, or @path to read it from a file
        #[arg(long)]
        payload: String,
    },
    /// Delete one entity
    Remove {
        #[command(flatten)]
        client: ClientArgs,
        #[arg(long)]
        kind: EntityKind,
        #[arg(long)]
        id: String,
    },
}

fn init_tracing(log: &str) {
    // RUST_LOG wins over --log, matching the usual tracing convention.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_file_config(path: Option<&PathBuf>) -> anyhow::Result<FileConfig> {
    match path {
        Some(path) => FileConfig::load(path),
        None => Ok(FileConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log);

    let file = load_file_config(cli.config.as_ref())?;
    let allow_self_signed =
        cli.allow_self_signed_certs || file.allow_self_signed_certs.unwrap_or(false);
    metadata_sync::postgres::init_tls_policy(allow_self_signed);

    let shutdown = CancellationToken::new();
    metadata_sync::shutdown::cancel_on_signal(shutdown.clone())?;

    match cli.command {
        Commands::Serve {
            listen,
            database_url,
            token_file,
            publisher_capacity,
            session_buffer,
            connect_retries,
            migrate,
        } => {
            let overrides = ServeOverrides {
                listen,
                database_url,
                token_file,
                publisher_capacity,
                session_buffer,
                allow_self_signed_certs: cli.allow_self_signed_certs,
                connect_retries,
            };
            let config = ServeConfig::resolve(overrides, file)?;
            commands::serve(config, migrate, shutdown).await
        }
        Commands::Migrate {
            database_url,
            connect_retries,
        } => {
            let database_url = database_url
                .or(file.database_url)
                .context("database URL not provided. Use --database-url, METADATA_SYNC_DATABASE_URL or database_url in the config file")?;
            let retries = connect_retries
                .or(file.connect_retries)
                .unwrap_or(DEFAULT_CONNECT_RETRIES);
            commands::migrate(&database_url, retries).await
        }
        Commands::Watch {
            client,
            kind,
            known_file,
        } => commands::watch(client.into(), kind, known_file, shutdown).await,
        Commands::Put {
            client,
            kind,
            id,
            payload,
        } => commands::put(client.into(), kind, id, &payload).await,
        Commands::Remove { client, kind, id } => {
            commands::remove(client.into(), kind, id).await
        }
    }
}
