//! SurrealDB-backed credential store.
//!
//! Uniqueness is enforced by the database: a unique index on
//! `account.username`, and claim records keyed by the claimed value for
//! email addresses and federated identities. An account and its claims are
//! written in one transaction.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{CredentialStore, StoreError};
use crate::account::{Account, FederatedIdentity};
use crate::db::{AccountRecord, Db, FederatedLinkRecord};
use crate::permissions::{CatalogDocument, Permit, Profile, Role};
use crate::types::{AccountId, RefreshTokenDigest};

pub struct SurrealCredentialStore {
    db: Db,
}

fn is_conflict(message: &str) -> bool {
    message.contains("already exists")
        || message.contains("already contains")
        || message.contains("conflict")
        || message.contains("can be retried")
}

/// Attempts for an unconditional write that lost an optimistic transaction
/// conflict.
const CONTENTION_RETRIES: u32 = 10;

fn is_retryable(err: &StoreError) -> bool {
    matches!(err, StoreError::Conflict(message) if message.contains("can be retried"))
}

/// Re-run `attempt` while it fails with a retryable transaction conflict.
/// Uniqueness violations and every other error are returned at once.
async fn retry_contended<T, F, Fut>(operation: &'static str, mut attempt: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut tries = 0;
    loop {
        match attempt().await {
            Err(err) if is_retryable(&err) && tries < CONTENTION_RETRIES => {
                tries += 1;
                debug!(operation, attempt = tries, "Retrying after transaction conflict");
                tokio::time::sleep(Duration::from_millis(2 * u64::from(tries))).await;
            }
            Err(err) if is_retryable(&err) => {
                warn!(operation, attempts = tries + 1, "Giving up after repeated transaction conflicts");
                return Err(err);
            }
            other => return other,
        }
    }
}

fn classify(err: surrealdb::Error) -> StoreError {
    let message = err.to_string();
    if is_conflict(&message) {
        StoreError::Conflict(message)
    } else {
        StoreError::Backend(message)
    }
}

fn into_account(records: Vec<AccountRecord>) -> Result<Option<Account>, StoreError> {
    records.into_iter().next().map(Account::try_from).transpose()
}

impl SurrealCredentialStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    async fn find_where(&self, query: &'static str, key: &'static str, value: String) -> Result<Option<Account>, StoreError> {
        let mut res = self.db.query(query).bind((key, value)).await.map_err(classify)?;
        let records: Vec<AccountRecord> = res.take(0).map_err(classify)?;
        into_account(records)
    }

    async fn insert_once(&self, account: &Account) -> Result<(), StoreError> {
        let record = AccountRecord::from(account);

        let mut query = String::from(
            "BEGIN TRANSACTION;
             CREATE type::thing('account', $account_id) CONTENT $record;",
        );
        if account.email.is_some() {
            query.push_str("CREATE type::thing('account_email', $email) CONTENT { account_id: $account_id };");
        }
        if account.federated.is_some() {
            query.push_str(
                "CREATE type::thing('federated_identity', $federated_key) CONTENT {
                    account_id: $account_id,
                    provider: $provider,
                    subject_id: $subject_id
                 };",
            );
        }
        query.push_str("COMMIT TRANSACTION;");

        let mut res = self
            .db
            .query(query)
            .bind(("account_id", record.account_id.clone()))
            .bind(("email", record.email.clone()))
            .bind(("federated_key", account.federated.as_ref().map(FederatedIdentity::key)))
            .bind(("provider", record.provider.clone()))
            .bind(("subject_id", record.subject_id.clone()))
            .bind(("record", record))
            .await
            .map_err(classify)?;

        let errors: Vec<StoreError> = res.take_errors().into_values().map(classify).collect();
        if errors.is_empty() {
            return Ok(());
        }
        // Statements that ran before the failing one report a generic
        // "not executed" error; surface the real cause.
        let err = errors
            .iter()
            .find(|e| matches!(e, StoreError::Conflict(_)))
            .cloned()
            .unwrap_or_else(|| errors[0].clone());
        debug!(username = %account.username, error = %err, "Account insert rejected");
        Err(err)
    }

    async fn save_once(&self, account: &Account) -> Result<(), StoreError> {
        let query = r#"
            UPDATE account SET
                username = $username,
                password_hash = $password_hash,
                profile = $profile,
                roles = $roles,
                enabled = $enabled,
                locked = $locked
            WHERE account_id = $account_id
            RETURN AFTER
        "#;
        let record = AccountRecord::from(account);
        let mut res = self
            .db
            .query(query)
            .bind(("account_id", record.account_id))
            .bind(("username", record.username))
            .bind(("password_hash", record.password_hash))
            .bind(("profile", record.profile))
            .bind(("roles", record.roles))
            .bind(("enabled", record.enabled))
            .bind(("locked", record.locked))
            .await
            .map_err(classify)?;
        let updated: Vec<AccountRecord> = res.take(0).map_err(classify)?;

        if updated.is_empty() {
            return Err(StoreError::NotFound(format!("account {}", account.id)));
        }
        Ok(())
    }

    async fn store_refresh_token_once(&self, id: AccountId, digest: &RefreshTokenDigest) -> Result<(), StoreError> {
        let mut res = self
            .db
            .query("UPDATE account SET refresh_token = $digest WHERE account_id = $account_id RETURN AFTER")
            .bind(("account_id", id.to_string()))
            .bind(("digest", digest.to_string()))
            .await
            .map_err(classify)?;
        let updated: Vec<AccountRecord> = res.take(0).map_err(classify)?;

        if updated.is_empty() {
            return Err(StoreError::NotFound(format!("account {id}")));
        }
        Ok(())
    }

    /// Write the permission catalog, replacing entries with the same key.
    pub async fn store_catalog(&self, document: &CatalogDocument) -> Result<(), StoreError> {
        for permit in &document.permits {
            self.db
                .query("UPSERT type::thing('permit', $key) CONTENT $value")
                .bind(("key", permit.code.to_string()))
                .bind(("value", permit.clone()))
                .await
                .map_err(classify)?
                .check()
                .map_err(classify)?;
        }
        for role in &document.roles {
            self.db
                .query("UPSERT type::thing('role', $key) CONTENT $value")
                .bind(("key", role.name.to_string()))
                .bind(("value", role.clone()))
                .await
                .map_err(classify)?
                .check()
                .map_err(classify)?;
        }
        for profile in &document.profiles {
            self.db
                .query("UPSERT type::thing('profile', $key) CONTENT $value")
                .bind(("key", profile.name.to_string()))
                .bind(("value", profile.clone()))
                .await
                .map_err(classify)?
                .check()
                .map_err(classify)?;
        }

        debug!(
            permits = document.permits.len(),
            roles = document.roles.len(),
            profiles = document.profiles.len(),
            "Stored permission catalog"
        );
        Ok(())
    }

    /// Read the permission catalog. `None` when nothing has been stored.
    pub async fn load_catalog(&self) -> Result<Option<CatalogDocument>, StoreError> {
        let query = r#"
            SELECT code, description FROM permit;
            SELECT name, permits FROM role;
            SELECT name, roles FROM profile;
        "#;
        let mut res = self.db.query(query).await.map_err(classify)?;
        let permits: Vec<Permit> = res.take(0).map_err(classify)?;
        let roles: Vec<Role> = res.take(1).map_err(classify)?;
        let profiles: Vec<Profile> = res.take(2).map_err(classify)?;

        if permits.is_empty() && roles.is_empty() && profiles.is_empty() {
            return Ok(None);
        }
        Ok(Some(CatalogDocument {
            permits,
            roles,
            profiles,
        }))
    }
}

#[async_trait]
impl CredentialStore for SurrealCredentialStore {
    async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        self.find_where(
            "SELECT * FROM account WHERE account_id = $account_id LIMIT 1",
            "account_id",
            id.to_string(),
        )
        .await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Account>, StoreError> {
        self.find_where(
            "SELECT * FROM account WHERE username = $username LIMIT 1",
            "username",
            username.to_string(),
        )
        .await
    }

    async fn find_by_refresh_token(&self, digest: &RefreshTokenDigest) -> Result<Option<Account>, StoreError> {
        self.find_where(
            "SELECT * FROM account WHERE refresh_token = $digest LIMIT 1",
            "digest",
            digest.to_string(),
        )
        .await
    }

    async fn find_by_federated_id(&self, identity: &FederatedIdentity) -> Result<Option<Account>, StoreError> {
        let mut res = self
            .db
            .query("SELECT * FROM type::thing('federated_identity', $key)")
            .bind(("key", identity.key()))
            .await
            .map_err(classify)?;
        let links: Vec<FederatedLinkRecord> = res.take(0).map_err(classify)?;

        match links.into_iter().next() {
            Some(link) => {
                let id: AccountId = link
                    .account_id
                    .parse()
                    .map_err(|e| StoreError::Backend(format!("invalid federated link: {e}")))?;
                self.find_by_id(id).await
            }
            None => Ok(None),
        }
    }

    async fn insert(&self, account: &Account) -> Result<(), StoreError> {
        retry_contended("insert", || self.insert_once(account)).await
    }

    async fn save(&self, account: &Account) -> Result<(), StoreError> {
        retry_contended("save", || self.save_once(account)).await
    }

    async fn store_refresh_token(&self, id: AccountId, digest: &RefreshTokenDigest) -> Result<(), StoreError> {
        retry_contended("store_refresh_token", || self.store_refresh_token_once(id, digest)).await
    }

    async fn swap_refresh_token(
        &self,
        id: AccountId,
        expected: &RefreshTokenDigest,
        replacement: &RefreshTokenDigest,
    ) -> Result<bool, StoreError> {
        let query = r#"
            UPDATE account SET refresh_token = $replacement
            WHERE account_id = $account_id AND refresh_token = $expected
            RETURN AFTER
        "#;
        // The condition is re-evaluated on every attempt, so a retry after a
        // conflict can only succeed while `expected` is still current.
        let result = retry_contended("swap_refresh_token", move || async move {
            let mut res = self
                .db
                .query(query)
                .bind(("account_id", id.to_string()))
                .bind(("expected", expected.to_string()))
                .bind(("replacement", replacement.to_string()))
                .await
                .map_err(classify)?;
            res.take::<Vec<AccountRecord>>(0).map_err(classify)
        })
        .await;

        match result {
            Ok(updated) => Ok(!updated.is_empty()),
            // A concurrent rotation committed first.
            Err(StoreError::Conflict(message)) => {
                debug!(account_id = %id, %message, "Refresh token swap lost a write conflict");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
