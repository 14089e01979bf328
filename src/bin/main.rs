use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

use authcore::auth::{KeyProvider, NewAccount};
use authcore::{AuthCoreConfig, DatabaseConfig, SurrealCredentialStore, create_app, provision_catalog};

#[derive(Parser)]
#[command(name = "authcore")]
#[command(about = "Token-based authentication and authorization service")]
struct Cli {
    /// Path to authcore.json (defaults to the standard search locations)
    #[arg(long, global = true, env = "AUTHCORE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API
    Serve {
        /// Bind address, e.g. 0.0.0.0:8080
        #[arg(long, default_value = "127.0.0.1:8080", env = "AUTHCORE_BIND")]
        bind: String,
        #[arg(long, default_value = "memory", env = "SURREALDB_URL")]
        db_url: String,
    },
    /// Apply the schema and provision the permission catalog
    Init {
        #[arg(long, default_value = "memory", env = "SURREALDB_URL")]
        db_url: String,
    },
    /// Create an account with a password
    CreateAccount {
        #[arg(long)]
        username: String,
        #[arg(long, env = "AUTHCORE_ACCOUNT_PASSWORD")]
        password: String,
        #[arg(long)]
        email: Option<String>,
        /// Profile to assign (defaults to the configured default profile)
        #[arg(long)]
        profile: Option<String>,
        /// Comma-separated list of additional roles
        #[arg(long)]
        roles: Option<String>,
        #[arg(long, default_value = "memory", env = "SURREALDB_URL")]
        db_url: String,
    },
    /// Print the public key set
    Jwks,
}

fn load_config(path: Option<PathBuf>) -> Result<AuthCoreConfig> {
    let config = match path {
        Some(path) => AuthCoreConfig::from_file(path)?,
        None => AuthCoreConfig::load()?,
    };
    Ok(config)
}

fn database(db_url: String) -> DatabaseConfig {
    DatabaseConfig {
        url: db_url,
        ..Default::default()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("authcore=info".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config)?;

    match cli.command {
        Commands::Serve { bind, db_url } => {
            let db_config = database(db_url);
            info!("Using database url for auth server: {}", db_config.url);

            let state = create_app(&config, db_config).await?;
            let app = authcore::api::create_router(state);

            let listener = tokio::net::TcpListener::bind(&bind).await?;
            info!("Auth server listening on http://{}", bind);
            axum::serve(listener, app).await?;
        }
        Commands::Init { db_url } => {
            let db_config = database(db_url);
            info!("Using database url for initialization: {}", db_config.url);

            info!("Initializing database...");
            let db = authcore::create_connection(db_config).await?;
            authcore::ensure_schema(&db).await?;
            let store = SurrealCredentialStore::new(db);
            provision_catalog(&store, &config).await?;
            info!("Database initialized successfully");
        }
        Commands::CreateAccount {
            username,
            password,
            email,
            profile,
            roles,
            db_url,
        } => {
            let state = create_app(&config, database(db_url)).await?;

            let roles = roles
                .map(|r| {
                    r.split(',')
                        .map(|role| role.trim().to_string())
                        .filter(|role| !role.is_empty())
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();

            let account = state
                .auth
                .add_account(NewAccount {
                    username: Some(username),
                    password: Some(password),
                    email,
                    profile,
                    roles,
                })
                .await?;

            println!("Account created successfully!");
            println!();
            println!("  Id:       {}", account.id);
            println!("  Username: {}", account.username);
            println!("  Profile:  {}", account.profile);
            if !account.roles.is_empty() {
                let roles: Vec<&str> = account.roles.iter().map(|r| r.as_str()).collect();
                println!("  Roles:    {}", roles.join(", "));
            }
            if let Some(email) = &account.email {
                println!("  Email:    {}", email);
            }
        }
        Commands::Jwks => {
            let keys = KeyProvider::load(&config.keys)?;
            println!("{}", serde_json::to_string_pretty(&keys.jwks())?);
        }
    }

    Ok(())
}
