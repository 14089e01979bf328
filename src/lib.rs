// Core modules
mod account;
mod config;
mod db;
mod permissions;
mod store;
mod types;
pub mod api;
pub mod auth;

// Re-export key types and functions
pub use account::{Account, FederatedIdentity};
pub use config::{AuthCoreConfig, ConfigError, FederationConfig, KeyConfig, TokenConfig, resolve_config_path};
pub use db::{DatabaseConfig, Db, create_connection, ensure_schema};
pub use permissions::{CatalogDocument, CatalogError, PermissionCatalog, Permit, Profile, Role, default_document};
pub use store::{CredentialStore, MemoryCredentialStore, StoreError, SurrealCredentialStore};
pub use types::*;

use anyhow::{Context, Result, bail};
use std::sync::Arc;
use tracing::info;

use api::AppState;
use auth::{
    Argon2PasswordHasher, AuthenticationService, FederatedIdentityService, GithubIdentityProvider, KeyProvider,
    TokenService,
};

/// Load the permission catalog from the database, provisioning it first when
/// the database holds none.
pub async fn provision_catalog(store: &SurrealCredentialStore, config: &AuthCoreConfig) -> Result<PermissionCatalog> {
    if let Some(document) = store.load_catalog().await? {
        let catalog = PermissionCatalog::from_document(document).context("stored permission catalog is invalid")?;
        info!("Loaded permission catalog from database");
        return Ok(catalog);
    }

    let catalog = match &config.catalog_path {
        Some(path) => PermissionCatalog::load(path)
            .with_context(|| format!("failed to load permission catalog from {}", path.display()))?,
        None => PermissionCatalog::from_document(default_document())?,
    };
    store.store_catalog(&catalog.to_document()).await?;
    info!("Provisioned permission catalog");
    Ok(catalog)
}

/// Convenience function to wire every service from configuration.
///
/// Connects the database, applies the schema, provisions the catalog and
/// loads the signing key. The returned state is ready for [`api::create_router`].
pub async fn create_app(config: &AuthCoreConfig, db_config: DatabaseConfig) -> Result<AppState> {
    let keys = Arc::new(KeyProvider::load(&config.keys)?);

    let db = create_connection(db_config).await?;
    ensure_schema(&db).await?;
    let store = Arc::new(SurrealCredentialStore::new(db));

    let catalog = provision_catalog(&store, config).await?;
    if !catalog.has_profile(&config.default_profile) {
        bail!("default profile '{}' is not in the permission catalog", config.default_profile);
    }

    let tokens = Arc::new(TokenService::new(keys.clone(), Arc::new(catalog), config.tokens.clone()));
    let auth = Arc::new(AuthenticationService::new(
        store,
        tokens,
        Arc::new(Argon2PasswordHasher::new()),
        config.default_profile.clone(),
        config.store_timeout(),
    ));

    let github = GithubIdentityProvider::new(config.federation.github_user_url.clone(), config.federation_timeout())?;
    let federation = Arc::new(
        FederatedIdentityService::new(auth.clone(), config.federation_timeout()).with_provider(Arc::new(github)),
    );
    let providers: Vec<&str> = federation.provider_names().into_iter().map(|n| n.as_str()).collect();
    info!(providers = %providers.join(","), key_id = %keys.key_id(), "Auth services ready");

    Ok(AppState { auth, federation, keys })
}
