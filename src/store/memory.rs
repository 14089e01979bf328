//! In-memory credential store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CredentialStore, StoreError};
use crate::account::{Account, FederatedIdentity};
use crate::types::{AccountId, RefreshTokenDigest};

/// Accounts held in a map behind a single lock. Every uniqueness check and
/// refresh-token swap happens under the write lock, which makes them atomic.
#[derive(Default)]
pub struct MemoryCredentialStore {
    accounts: RwLock<HashMap<AccountId, Account>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.accounts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.accounts.read().await.is_empty()
    }
}

fn conflict_for(existing: &HashMap<AccountId, Account>, account: &Account) -> Option<String> {
    for other in existing.values().filter(|a| a.id != account.id) {
        if other.username == account.username {
            return Some(format!("username '{}' already exists", account.username));
        }
        if account.email.is_some() && other.email == account.email {
            return Some("email already exists".to_string());
        }
        if account.federated.is_some() && other.federated == account.federated {
            return Some("federated identity already exists".to_string());
        }
    }
    None
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.read().await.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Account>, StoreError> {
        let accounts = self.accounts.read().await;
        Ok(accounts.values().find(|a| a.username.as_str() == username).cloned())
    }

    async fn find_by_refresh_token(&self, digest: &RefreshTokenDigest) -> Result<Option<Account>, StoreError> {
        let accounts = self.accounts.read().await;
        Ok(accounts
            .values()
            .find(|a| a.refresh_token.as_ref() == Some(digest))
            .cloned())
    }

    async fn find_by_federated_id(&self, identity: &FederatedIdentity) -> Result<Option<Account>, StoreError> {
        let accounts = self.accounts.read().await;
        Ok(accounts
            .values()
            .find(|a| a.federated.as_ref() == Some(identity))
            .cloned())
    }

    async fn insert(&self, account: &Account) -> Result<(), StoreError> {
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(&account.id) {
            return Err(StoreError::Conflict(format!("account {} already exists", account.id)));
        }
        if let Some(reason) = conflict_for(&accounts, account) {
            return Err(StoreError::Conflict(reason));
        }
        accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn save(&self, account: &Account) -> Result<(), StoreError> {
        let mut accounts = self.accounts.write().await;
        if !accounts.contains_key(&account.id) {
            return Err(StoreError::NotFound(format!("account {}", account.id)));
        }
        if accounts
            .values()
            .any(|other| other.id != account.id && other.username == account.username)
        {
            return Err(StoreError::Conflict(format!("username '{}' already exists", account.username)));
        }

        let Some(stored) = accounts.get_mut(&account.id) else {
            return Err(StoreError::NotFound(format!("account {}", account.id)));
        };
        stored.username = account.username.clone();
        stored.password_hash = account.password_hash.clone();
        stored.profile = account.profile.clone();
        stored.roles = account.roles.clone();
        stored.enabled = account.enabled;
        stored.locked = account.locked;
        Ok(())
    }

    async fn store_refresh_token(&self, id: AccountId, digest: &RefreshTokenDigest) -> Result<(), StoreError> {
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("account {id}")))?;
        account.refresh_token = Some(digest.clone());
        Ok(())
    }

    async fn swap_refresh_token(
        &self,
        id: AccountId,
        expected: &RefreshTokenDigest,
        replacement: &RefreshTokenDigest,
    ) -> Result<bool, StoreError> {
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("account {id}")))?;
        if account.refresh_token.as_ref() != Some(expected) {
            return Ok(false);
        }
        account.refresh_token = Some(replacement.clone());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn digest(s: &str) -> RefreshTokenDigest {
        RefreshTokenDigest::new(s)
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = MemoryCredentialStore::new();
        let account = Account::new("alice01", "CUSTOMER").with_email(Some("alice@example.com".into()));
        store.insert(&account).await.unwrap();

        assert_eq!(store.find_by_id(account.id).await.unwrap(), Some(account.clone()));
        assert_eq!(store.find_by_username("alice01").await.unwrap(), Some(account));
        assert!(store.find_by_username("bobby01").await.unwrap().is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicates() {
        let store = MemoryCredentialStore::new();
        store
            .insert(&Account::new("alice01", "CUSTOMER").with_email(Some("a@example.com".into())))
            .await
            .unwrap();

        let same_name = Account::new("alice01", "CUSTOMER");
        assert!(matches!(store.insert(&same_name).await, Err(StoreError::Conflict(_))));

        let same_email = Account::new("alice02", "CUSTOMER").with_email(Some("a@example.com".into()));
        assert!(matches!(store.insert(&same_email).await, Err(StoreError::Conflict(_))));

        // Two accounts without email do not collide.
        store.insert(&Account::new("bobby01", "CUSTOMER")).await.unwrap();
        store.insert(&Account::new("carol01", "CUSTOMER")).await.unwrap();
    }

    #[tokio::test]
    async fn test_federated_identity_unique() {
        let store = MemoryCredentialStore::new();
        let identity = FederatedIdentity::new("github", "42");
        let first = Account::new("octocat", "CUSTOMER").with_federated(identity.clone());
        store.insert(&first).await.unwrap();

        let second = Account::new("octocat2", "CUSTOMER").with_federated(identity.clone());
        assert!(matches!(store.insert(&second).await, Err(StoreError::Conflict(_))));

        let found = store.find_by_federated_id(&identity).await.unwrap().unwrap();
        assert_eq!(found.id, first.id);
    }

    #[tokio::test]
    async fn test_save_keeps_refresh_token() {
        let store = MemoryCredentialStore::new();
        let mut account = Account::new("alice01", "CUSTOMER");
        store.insert(&account).await.unwrap();
        store.store_refresh_token(account.id, &digest("r1")).await.unwrap();

        account.username = "alice_renamed".into();
        store.save(&account).await.unwrap();

        let stored = store.find_by_id(account.id).await.unwrap().unwrap();
        assert_eq!(stored.username.as_str(), "alice_renamed");
        assert_eq!(stored.refresh_token, Some(digest("r1")));
    }

    #[tokio::test]
    async fn test_save_missing_and_conflicting() {
        let store = MemoryCredentialStore::new();
        let ghost = Account::new("ghost01", "CUSTOMER");
        assert!(matches!(store.save(&ghost).await, Err(StoreError::NotFound(_))));

        store.insert(&Account::new("alice01", "CUSTOMER")).await.unwrap();
        let mut bob = Account::new("bobby01", "CUSTOMER");
        store.insert(&bob).await.unwrap();
        bob.username = "alice01".into();
        assert!(matches!(store.save(&bob).await, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_swap_refresh_token() {
        let store = MemoryCredentialStore::new();
        let account = Account::new("alice01", "CUSTOMER");
        store.insert(&account).await.unwrap();
        store.store_refresh_token(account.id, &digest("r1")).await.unwrap();

        assert!(store.swap_refresh_token(account.id, &digest("r1"), &digest("r2")).await.unwrap());
        assert!(!store.swap_refresh_token(account.id, &digest("r1"), &digest("r3")).await.unwrap());

        assert!(store.find_by_refresh_token(&digest("r1")).await.unwrap().is_none());
        let current = store.find_by_refresh_token(&digest("r2")).await.unwrap().unwrap();
        assert_eq!(current.id, account.id);
    }

    #[tokio::test]
    async fn test_concurrent_swaps_single_winner() {
        let store = Arc::new(MemoryCredentialStore::new());
        let account = Account::new("alice01", "CUSTOMER");
        store.insert(&account).await.unwrap();
        store.store_refresh_token(account.id, &digest("r1")).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            let id = account.id;
            handles.push(tokio::spawn(async move {
                store
                    .swap_refresh_token(id, &digest("r1"), &digest(&format!("next-{i}")))
                    .await
                    .unwrap()
            }));
        }

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }
}
