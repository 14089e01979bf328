use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use surrealdb::Surreal;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;
use tracing::debug;

pub type Db = Surreal<Any>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub namespace: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: env::var("SURREALDB_URL").unwrap_or_else(|_| "memory".to_string()),
            namespace: env::var("SURREALDB_NAMESPACE").unwrap_or_else(|_| "authcore".to_string()),
            database: env::var("SURREALDB_DATABASE").unwrap_or_else(|_| "auth".to_string()),
            username: env::var("SURREALDB_USERNAME").ok(),
            password: env::var("SURREALDB_PASSWORD").ok(),
        }
    }
}

pub async fn create_connection(config: DatabaseConfig) -> Result<Db> {
    debug!(url = %config.url, namespace = %config.namespace, database = %config.database, "Connecting to SurrealDB");
    let db = surrealdb::engine::any::connect(config.url).await?;

    // Sign in if credentials are provided
    if let (Some(username), Some(password)) = (config.username, config.password) {
        db.signin(Root {
            username: &username,
            password: &password,
        })
        .await?;
    }

    db.use_ns(config.namespace).use_db(config.database).await?;

    Ok(db)
}

/// Define tables, fields and uniqueness constraints. Idempotent.
pub async fn ensure_schema(db: &Db) -> Result<()> {
    let schema_queries = [
        // Permission catalog
        "DEFINE TABLE IF NOT EXISTS permit SCHEMAFULL;
         DEFINE FIELD IF NOT EXISTS code ON TABLE permit TYPE string;
         DEFINE FIELD IF NOT EXISTS description ON TABLE permit TYPE string DEFAULT '';
         DEFINE INDEX IF NOT EXISTS permit_code ON TABLE permit COLUMNS code UNIQUE;",
        "DEFINE TABLE IF NOT EXISTS role SCHEMAFULL;
         DEFINE FIELD IF NOT EXISTS name ON TABLE role TYPE string;
         DEFINE FIELD IF NOT EXISTS permits ON TABLE role TYPE array<string> DEFAULT [];
         DEFINE INDEX IF NOT EXISTS role_name ON TABLE role COLUMNS name UNIQUE;",
        "DEFINE TABLE IF NOT EXISTS profile SCHEMAFULL;
         DEFINE FIELD IF NOT EXISTS name ON TABLE profile TYPE string;
         DEFINE FIELD IF NOT EXISTS roles ON TABLE profile TYPE array<string> DEFAULT [];
         DEFINE INDEX IF NOT EXISTS profile_name ON TABLE profile COLUMNS name UNIQUE;",
        // Accounts
        "DEFINE TABLE IF NOT EXISTS account SCHEMALESS;
         DEFINE FIELD IF NOT EXISTS account_id ON TABLE account TYPE string;
         DEFINE FIELD IF NOT EXISTS username ON TABLE account TYPE string;
         DEFINE FIELD IF NOT EXISTS profile ON TABLE account TYPE string;
         DEFINE FIELD IF NOT EXISTS roles ON TABLE account TYPE array<string> DEFAULT [];
         DEFINE FIELD IF NOT EXISTS enabled ON TABLE account TYPE bool DEFAULT true;
         DEFINE FIELD IF NOT EXISTS locked ON TABLE account TYPE bool DEFAULT false;
         DEFINE INDEX IF NOT EXISTS account_account_id ON TABLE account COLUMNS account_id UNIQUE;
         DEFINE INDEX IF NOT EXISTS account_username ON TABLE account COLUMNS username UNIQUE;
         DEFINE INDEX IF NOT EXISTS account_refresh_token ON TABLE account COLUMNS refresh_token;",
        // Uniqueness claims, keyed by record id
        "DEFINE TABLE IF NOT EXISTS account_email SCHEMAFULL;
         DEFINE FIELD IF NOT EXISTS account_id ON TABLE account_email TYPE string;",
        "DEFINE TABLE IF NOT EXISTS federated_identity SCHEMAFULL;
         DEFINE FIELD IF NOT EXISTS account_id ON TABLE federated_identity TYPE string;
         DEFINE FIELD IF NOT EXISTS provider ON TABLE federated_identity TYPE string;
         DEFINE FIELD IF NOT EXISTS subject_id ON TABLE federated_identity TYPE string;",
    ];

    for query in schema_queries {
        db.query(query).await?.check()?;
    }

    Ok(())
}
