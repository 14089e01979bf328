use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::account::{Account, FederatedIdentity};
use crate::store::StoreError;
use crate::types::{AccountId, RefreshTokenDigest};

/// Persisted representation of an account (table: `account`).
///
/// The record id is `account:<uuid>`; `account_id` repeats the uuid as a
/// plain string so that rows deserialize without record-id handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    pub account_id: String,
    pub username: String,
    pub email: Option<String>,
    /// PHC string, absent for federated-only accounts.
    pub password_hash: Option<String>,
    pub profile: String,
    #[serde(default)]
    pub roles: Vec<String>,
    /// SHA-256 digest of the current refresh token.
    pub refresh_token: Option<String>,
    pub provider: Option<String>,
    pub subject_id: Option<String>,
    pub enabled: bool,
    pub locked: bool,
    /// RFC 3339 timestamp.
    pub created_at: String,
}

impl From<&Account> for AccountRecord {
    fn from(account: &Account) -> Self {
        Self {
            account_id: account.id.to_string(),
            username: account.username.to_string(),
            email: account.email.clone(),
            password_hash: account.password_hash.clone(),
            profile: account.profile.to_string(),
            roles: account.roles.iter().map(|r| r.to_string()).collect(),
            refresh_token: account.refresh_token.as_ref().map(|d| d.to_string()),
            provider: account.federated.as_ref().map(|f| f.provider.to_string()),
            subject_id: account.federated.as_ref().map(|f| f.subject_id.to_string()),
            enabled: account.enabled,
            locked: account.locked,
            created_at: account.created_at.to_rfc3339(),
        }
    }
}

impl TryFrom<AccountRecord> for Account {
    type Error = StoreError;

    fn try_from(record: AccountRecord) -> Result<Self, Self::Error> {
        let id: AccountId = record
            .account_id
            .parse()
            .map_err(|e| StoreError::Backend(format!("invalid account id '{}': {e}", record.account_id)))?;
        let created_at = DateTime::parse_from_rfc3339(&record.created_at)
            .map_err(|e| StoreError::Backend(format!("invalid created_at on account {id}: {e}")))?
            .with_timezone(&Utc);
        let federated = match (record.provider, record.subject_id) {
            (Some(provider), Some(subject)) => Some(FederatedIdentity::new(provider, subject)),
            _ => None,
        };

        Ok(Account {
            id,
            username: record.username.into(),
            email: record.email,
            password_hash: record.password_hash,
            profile: record.profile.into(),
            roles: record.roles.into_iter().map(Into::into).collect(),
            refresh_token: record.refresh_token.map(RefreshTokenDigest::new),
            federated,
            enabled: record.enabled,
            locked: record.locked,
            created_at,
        })
    }
}

/// Federated identity link (table: `federated_identity`, key
/// `provider:subject`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederatedLinkRecord {
    pub account_id: String,
    pub provider: String,
    pub subject_id: String,
}
