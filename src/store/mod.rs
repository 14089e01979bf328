//! Credential persistence.
//!
//! Services depend on the [`CredentialStore`] trait only. Two
//! implementations exist: [`MemoryCredentialStore`] for tests and embedded
//! use, and [`SurrealCredentialStore`] backed by SurrealDB.

mod memory;
mod surreal;

pub use memory::MemoryCredentialStore;
pub use surreal::SurrealCredentialStore;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::account::{Account, FederatedIdentity};
use crate::types::{AccountId, RefreshTokenDigest};

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// A uniqueness constraint was violated (username, email, federated
    /// identity) or a concurrent write won.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store error: {0}")]
    Backend(String),
}

/// Account persistence.
///
/// `save` writes the mutable profile of an account: username, password
/// hash, profile, roles and status flags. The refresh token only changes
/// through `store_refresh_token` and `swap_refresh_token`, and email and
/// federated link are fixed when the account is inserted.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<Account>, StoreError>;

    /// Account whose current refresh token has this digest.
    async fn find_by_refresh_token(&self, digest: &RefreshTokenDigest) -> Result<Option<Account>, StoreError>;

    async fn find_by_federated_id(&self, identity: &FederatedIdentity) -> Result<Option<Account>, StoreError>;

    /// Insert a new account. Fails with `Conflict` when the username, email
    /// or federated identity is already taken.
    async fn insert(&self, account: &Account) -> Result<(), StoreError>;

    /// Update an existing account. Fails with `NotFound` if it does not
    /// exist and `Conflict` if the new username is taken.
    async fn save(&self, account: &Account) -> Result<(), StoreError>;

    /// Unconditionally replace the stored refresh token.
    async fn store_refresh_token(&self, id: AccountId, digest: &RefreshTokenDigest) -> Result<(), StoreError>;

    /// Replace the stored refresh token only if it still equals `expected`.
    /// Returns `false` when another writer got there first.
    async fn swap_refresh_token(
        &self,
        id: AccountId,
        expected: &RefreshTokenDigest,
        replacement: &RefreshTokenDigest,
    ) -> Result<bool, StoreError>;
}

/// Run a store call with an upper bound on its duration.
pub async fn with_timeout<T, F>(limit: Duration, operation: &'static str, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, timeout_ms = limit.as_millis() as u64, "Credential store call timed out");
            Err(StoreError::Timeout(operation))
        }
    }
}
