//! Account (credential record) data.
//!
//! An `Account` is plain data. Authorization decisions are made on the
//! narrower [`crate::auth::AuthorizationView`] computed from it on demand.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AccountId, ProfileName, ProviderName, RefreshTokenDigest, RoleName, SubjectId, Username};

/// Link between a local account and an identity held by an external provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FederatedIdentity {
    pub provider: ProviderName,
    pub subject_id: SubjectId,
}

impl FederatedIdentity {
    pub fn new(provider: impl Into<ProviderName>, subject_id: impl Into<SubjectId>) -> Self {
        Self {
            provider: provider.into(),
            subject_id: subject_id.into(),
        }
    }

    /// Composite key, unique across all accounts.
    pub fn key(&self) -> String {
        format!("{}:{}", self.provider, self.subject_id)
    }
}

/// The authenticable identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub username: Username,
    pub email: Option<String>,
    /// PHC-format password digest. `None` for accounts created through a
    /// federated login.
    pub password_hash: Option<String>,
    /// Owning profile. Every account has exactly one.
    pub profile: ProfileName,
    /// Roles layered on top of the profile's roles.
    pub roles: BTreeSet<RoleName>,
    /// Digest of the most recently issued refresh token.
    pub refresh_token: Option<RefreshTokenDigest>,
    pub federated: Option<FederatedIdentity>,
    pub enabled: bool,
    pub locked: bool,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Create an enabled, unlocked account with no credentials attached.
    pub fn new(username: impl Into<Username>, profile: impl Into<ProfileName>) -> Self {
        Self {
            id: AccountId::new(),
            username: username.into(),
            email: None,
            password_hash: None,
            profile: profile.into(),
            roles: BTreeSet::new(),
            refresh_token: None,
            federated: None,
            enabled: true,
            locked: false,
            created_at: Utc::now(),
        }
    }

    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.email = email;
        self
    }

    pub fn with_password_hash(mut self, hash: impl Into<String>) -> Self {
        self.password_hash = Some(hash.into());
        self
    }

    pub fn with_roles<I, R>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<RoleName>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    pub fn with_federated(mut self, identity: FederatedIdentity) -> Self {
        self.federated = Some(identity);
        self
    }

    /// Whether the account may currently hold a valid session.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.locked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_account_defaults() {
        let account = Account::new("alice01", "CUSTOMER");
        assert_eq!(account.username.as_str(), "alice01");
        assert_eq!(account.profile.as_str(), "CUSTOMER");
        assert!(account.roles.is_empty());
        assert!(account.password_hash.is_none());
        assert!(account.refresh_token.is_none());
        assert!(account.is_active());
    }

    #[test]
    fn test_duplicate_direct_roles_collapse() {
        let account = Account::new("alice01", "CUSTOMER")
            .with_roles(["ROLE_SELLER", "ROLE_SELLER", "ROLE_GUEST"]);
        assert_eq!(account.roles.len(), 2);
    }

    #[test]
    fn test_locked_account_is_inactive() {
        let mut account = Account::new("alice01", "CUSTOMER");
        account.locked = true;
        assert!(!account.is_active());

        account.locked = false;
        account.enabled = false;
        assert!(!account.is_active());
    }

    #[test]
    fn test_federated_key() {
        let identity = FederatedIdentity::new("github", "583231");
        assert_eq!(identity.key(), "github:583231");
    }
}
