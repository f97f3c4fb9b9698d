use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use codemart::auth::{TokenIssuer, TokenScope};
use codemart::config::{
    CodeHostConfig, DEFAULT_CODE_HOST_API_URL, DEFAULT_CURRENCY, PaymentConfig, ServerConfig,
    Settings, TransferConfig,
};
use codemart::credentials::{CredentialResolver, TokenCipher};
use codemart::payment::ProcessorClient;
use codemart::server::{AppState, create_router};
use codemart::settlement::SettlementOrchestrator;
use codemart::store::{SqliteStore, Store};
use codemart::transport::{Git2Vcs, HostClient, SnapshotTransport};

const NOT_INITIALIZED: &str =
    "Server not initialized. Run 'codemart admin init' first to create the database and admin token.";

#[cfg(unix)]
fn set_restrictive_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
        tracing::warn!("Failed to set permissions on {}: {e}", path.display());
    }
}

#[derive(Parser)]
#[command(name = "codemart")]
#[command(about = "A marketplace server for source-code repositories", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Administrative commands
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },

    /// Start the server
    Serve(ServeArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind to
    #[arg(long, short, default_value = "8080")]
    port: u16,

    /// Data directory for the database and scratch space
    #[arg(long, default_value = "./data")]
    data_dir: String,

    /// Base64 AES-256 key for hosting tokens (see `admin generate-key`)
    #[arg(long, env = "CODEMART_CREDENTIAL_KEY", hide_env_values = true)]
    credential_key: String,

    #[arg(long, env = "PAYMENT_API_URL")]
    payment_api_url: String,

    #[arg(long, env = "PAYMENT_CLIENT_ID")]
    payment_client_id: String,

    #[arg(long, env = "PAYMENT_CLIENT_SECRET", hide_env_values = true)]
    payment_client_secret: String,

    #[arg(long, env = "PAYMENT_CURRENCY", default_value = DEFAULT_CURRENCY)]
    payment_currency: String,

    #[arg(long, env = "CODE_HOST_API_URL", default_value = DEFAULT_CODE_HOST_API_URL)]
    code_host_api_url: String,

    /// Where buyers land after each purchase step
    #[arg(long, env = "FRONTEND_URL")]
    frontend_url: String,

    /// Externally reachable URL of this server, used for payment callbacks
    #[arg(long, env = "PUBLIC_BASE_URL")]
    public_base_url: String,

    /// Total push attempts per migration
    #[arg(long, default_value = "3")]
    push_attempts: u32,
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Initialize the server (create database and admin token)
    Init {
        /// Data directory for the database
        #[arg(long, default_value = "./data")]
        data_dir: String,
    },

    /// Print a fresh credential key
    GenerateKey,

    /// Register a user with their hosting token and issue an API token
    LinkUser {
        #[arg(long, default_value = "./data")]
        data_dir: String,

        #[arg(long)]
        username: String,

        #[arg(long)]
        email: String,

        /// Code host access token
        #[arg(long, env = "CODEMART_HOSTING_TOKEN", hide_env_values = true)]
        hosting_token: String,

        #[arg(long, env = "CODEMART_CREDENTIAL_KEY", hide_env_values = true)]
        credential_key: String,
    },
}

fn open_store(data_dir: &Path) -> anyhow::Result<SqliteStore> {
    let config = ServerConfig {
        data_dir: data_dir.to_path_buf(),
        ..ServerConfig::default()
    };
    if !config.db_path().exists() {
        bail!(NOT_INITIALIZED);
    }
    Ok(SqliteStore::new(config.db_path())?)
}

fn run_init(data_dir: String) -> anyhow::Result<()> {
    let config = ServerConfig {
        data_dir: data_dir.into(),
        ..ServerConfig::default()
    };
    fs::create_dir_all(&config.data_dir)?;

    let store = SqliteStore::new(config.db_path())?;
    store.initialize()?;

    let token_file = config.data_dir.join(".admin_token");

    if store.has_admin_token()? {
        bail!(
            "Server already initialized. Admin token exists at: {}",
            token_file.display()
        );
    }

    let raw_token = TokenIssuer::new()?
        .register(&store, TokenScope::Admin, None)?
        .raw;
    fs::write(&token_file, &raw_token)?;

    #[cfg(unix)]
    set_restrictive_permissions(&token_file);

    println!();
    println!("========================================");
    println!("Admin token (save this, it won't be shown again):");
    println!();
    println!("  {raw_token}");
    println!();
    println!("Token also written to: {}", token_file.display());
    println!("========================================");
    println!();

    Ok(())
}

fn run_link_user(
    data_dir: String,
    username: &str,
    email: &str,
    hosting_token: &str,
    credential_key: &str,
) -> anyhow::Result<()> {
    let store: Arc<dyn Store> = Arc::new(open_store(Path::new(&data_dir))?);
    let cipher = Arc::new(TokenCipher::from_base64_key(credential_key)?);
    let resolver = CredentialResolver::new(store.clone(), cipher);

    let user = resolver.link_user(username.trim(), email.trim(), hosting_token.trim())?;

    let raw_token = TokenIssuer::new()?
        .register(store.as_ref(), TokenScope::User(user.id.clone()), None)?
        .raw;

    println!();
    println!("========================================");
    println!("Linked user '{}' ({}) with token:", user.username, user.id);
    println!();
    println!("  {raw_token}");
    println!();
    println!("========================================");
    println!();

    Ok(())
}

async fn run_serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = ServerConfig {
        host: args.host,
        port: args.port,
        data_dir: PathBuf::from(args.data_dir),
    };

    let store = open_store(&config.data_dir)?;
    if !store.has_admin_token()? {
        bail!(NOT_INITIALIZED);
    }
    let store: Arc<dyn Store> = Arc::new(store);

    let cipher = Arc::new(TokenCipher::from_base64_key(&args.credential_key)?);
    let credentials = CredentialResolver::new(store.clone(), cipher);

    let gateway = ProcessorClient::new(PaymentConfig {
        api_url: args.payment_api_url,
        client_id: args.payment_client_id,
        client_secret: args.payment_client_secret,
        currency: args.payment_currency,
        timeout: Duration::from_secs(30),
    })?;

    let host = HostClient::new(&CodeHostConfig {
        api_url: args.code_host_api_url,
        ..CodeHostConfig::default()
    })?;

    let transfer = TransferConfig {
        push_attempts: args.push_attempts.max(1),
        ..TransferConfig::new(config.scratch_dir())
    };
    fs::create_dir_all(&transfer.scratch_dir)?;

    let transport = SnapshotTransport::new(Arc::new(host), Arc::new(Git2Vcs), transfer);
    let settings = Settings::new(&args.frontend_url, &args.public_base_url);

    let orchestrator = SettlementOrchestrator::new(
        store.clone(),
        Arc::new(gateway),
        Arc::new(transport),
        credentials.clone(),
        settings.clone(),
    );

    let pending = orchestrator.pending_intents()?;
    if !pending.is_empty() {
        tracing::warn!(
            count = pending.len(),
            "transfer intents awaiting reconciliation"
        );
    }

    let state = Arc::new(AppState::new(
        store,
        Arc::new(orchestrator),
        credentials,
        settings,
    ));

    let app = create_router(state);
    let addr = config.socket_addr()?;

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("codemart=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Admin { command } => match command {
            AdminCommands::Init { data_dir } => run_init(data_dir)?,
            AdminCommands::GenerateKey => println!("{}", TokenCipher::generate_key()),
            AdminCommands::LinkUser {
                data_dir,
                username,
                email,
                hosting_token,
                credential_key,
            } => run_link_user(
                data_dir,
                &username,
                &email,
                &hosting_token,
                &credential_key,
            )?,
        },
        Commands::Serve(args) => run_serve(args).await?,
    }

    Ok(())
}
