//! Login, refresh rotation and account management.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::account::Account;
use crate::auth::{AuthError, PasswordHasher, Principal, TokenPair, TokenService, fingerprint_refresh_token};
use crate::store::{CredentialStore, StoreError, with_timeout};
use crate::types::{AccountId, ProfileName, RoleName, Username};

/// Minimum length of usernames and passwords, in characters.
pub const MIN_CREDENTIAL_LENGTH: usize = 6;

const DECOY_PASSWORD: &str = "authcore-decoy-password";

/// Decides whether a username/password pair is correct.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// `Err(AuthError::InvalidCredentials)` when the pair is wrong.
    async fn authenticate(&self, username: &str, password: &str) -> Result<(), AuthError>;
}

/// Checks the password against the hash stored on the account.
///
/// Unknown usernames and accounts without a password are verified against a
/// decoy digest, so every rejected login pays for one hash verification.
pub struct PasswordAuthenticator {
    store: Arc<dyn CredentialStore>,
    hasher: Arc<dyn PasswordHasher>,
    store_timeout: Duration,
    decoy_hash: OnceCell<String>,
}

impl PasswordAuthenticator {
    pub fn new(store: Arc<dyn CredentialStore>, hasher: Arc<dyn PasswordHasher>, store_timeout: Duration) -> Self {
        Self {
            store,
            hasher,
            store_timeout,
            decoy_hash: OnceCell::new(),
        }
    }

    async fn decoy_hash(&self) -> Result<String, AuthError> {
        let hasher = self.hasher.clone();
        self.decoy_hash
            .get_or_try_init(move || async move {
                tokio::task::spawn_blocking(move || hasher.hash(DECOY_PASSWORD))
                    .await
                    .map_err(|e| AuthError::Internal(format!("password hashing task failed: {e}")))?
            })
            .await
            .cloned()
    }

    async fn verify(&self, password: &str, hash: String) -> Result<bool, AuthError> {
        let hasher = self.hasher.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| AuthError::Internal(format!("password verification task failed: {e}")))
    }
}

#[async_trait]
impl Authenticator for PasswordAuthenticator {
    async fn authenticate(&self, username: &str, password: &str) -> Result<(), AuthError> {
        let found = with_timeout(self.store_timeout, "find_by_username", self.store.find_by_username(username)).await?;
        // Federated-only accounts have no password to match.
        let Some((account, hash)) = found.and_then(|a| a.password_hash.clone().map(|hash| (a, hash))) else {
            let decoy = self.decoy_hash().await?;
            self.verify(password, decoy).await?;
            return Err(AuthError::InvalidCredentials);
        };

        if !self.verify(password, hash).await? {
            return Err(AuthError::InvalidCredentials);
        }
        if !account.is_active() {
            return Err(AuthError::AccountDisabled);
        }
        Ok(())
    }
}

/// Registration request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewAccount {
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Falls back to the configured default profile.
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Partial credential update. At least one field must be set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredentialsPatch {
    pub username: Option<String>,
    pub password: Option<String>,
}

fn long_enough(value: &str) -> bool {
    value.chars().count() >= MIN_CREDENTIAL_LENGTH
}

pub struct AuthenticationService {
    store: Arc<dyn CredentialStore>,
    tokens: Arc<TokenService>,
    hasher: Arc<dyn PasswordHasher>,
    authenticator: Arc<dyn Authenticator>,
    default_profile: ProfileName,
    store_timeout: Duration,
}

impl AuthenticationService {
    /// Build a service that authenticates logins with a
    /// [`PasswordAuthenticator`] over the same store and hasher.
    pub fn new(
        store: Arc<dyn CredentialStore>,
        tokens: Arc<TokenService>,
        hasher: Arc<dyn PasswordHasher>,
        default_profile: impl Into<ProfileName>,
        store_timeout: Duration,
    ) -> Self {
        let authenticator = Arc::new(PasswordAuthenticator::new(store.clone(), hasher.clone(), store_timeout));
        Self {
            store,
            tokens,
            hasher,
            authenticator,
            default_profile: default_profile.into(),
            store_timeout,
        }
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    pub fn tokens(&self) -> &Arc<TokenService> {
        &self.tokens
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn default_profile(&self) -> &ProfileName {
        &self.default_profile
    }

    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    async fn call<T, F>(&self, operation: &'static str, fut: F) -> Result<T, AuthError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        Ok(with_timeout(self.store_timeout, operation, fut).await?)
    }

    async fn hash_password(&self, password: String) -> Result<String, AuthError> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AuthError::Internal(format!("password hashing task failed: {e}")))?
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<TokenPair, AuthError> {
        if let Err(err) = self.authenticator.authenticate(username, password).await {
            info!(username, reason = err.kind(), "Login rejected");
            return Err(err);
        }

        let account = self
            .call("find_by_username", self.store.find_by_username(username))
            .await?
            .ok_or_else(|| {
                error!(username, "Authenticated account not found in credential store");
                AuthError::Internal(format!("account '{username}' vanished after authentication"))
            })?;

        let pair = self.start_session(&account).await?;
        info!(username, account_id = %account.id, "Login succeeded");
        Ok(pair)
    }

    /// Issue a fresh token pair and make its refresh token the current one.
    pub async fn start_session(&self, account: &Account) -> Result<TokenPair, AuthError> {
        self.start_session_at(account, Utc::now()).await
    }

    pub async fn start_session_at(&self, account: &Account, now: DateTime<Utc>) -> Result<TokenPair, AuthError> {
        let pair = self.tokens.issue_pair_at(account, now)?;
        let digest = fingerprint_refresh_token(&pair.refresh_token);
        self.call("store_refresh_token", self.store.store_refresh_token(account.id, &digest))
            .await?;
        Ok(pair)
    }

    pub async fn refresh(&self, presented: &str) -> Result<TokenPair, AuthError> {
        self.refresh_at(presented, Utc::now()).await
    }

    /// Exchange the current refresh token for a new pair. The presented
    /// token is spent whether or not the caller receives the response.
    pub async fn refresh_at(&self, presented: &str, now: DateTime<Utc>) -> Result<TokenPair, AuthError> {
        let digest = fingerprint_refresh_token(presented);
        let Some(account) = self
            .call("find_by_refresh_token", self.store.find_by_refresh_token(&digest))
            .await?
        else {
            warn!("Presented refresh token is not current for any account; possible replay");
            return Err(AuthError::RefreshTokenMismatch);
        };

        if !self.tokens.is_refresh_token_valid_at(presented, &account, now) {
            let err = self.tokens.classify_refresh_failure_at(presented, now);
            info!(username = %account.username, reason = err.kind(), "Refresh token rejected");
            return Err(err);
        }
        if !account.is_active() {
            info!(username = %account.username, "Refresh refused for inactive account");
            return Err(AuthError::AccountDisabled);
        }

        let pair = self.tokens.issue_pair_at(&account, now)?;
        let replacement = fingerprint_refresh_token(&pair.refresh_token);
        let swapped = self
            .call(
                "swap_refresh_token",
                self.store.swap_refresh_token(account.id, &digest, &replacement),
            )
            .await?;
        if !swapped {
            warn!(username = %account.username, "Refresh token was rotated concurrently; possible replay");
            return Err(AuthError::RefreshTokenMismatch);
        }

        debug!(username = %account.username, "Rotated refresh token");
        Ok(pair)
    }

    pub async fn add_account(&self, request: NewAccount) -> Result<Account, AuthError> {
        let (Some(username), Some(password)) = (request.username, request.password) else {
            return Err(AuthError::InvalidParameters("Username and password are required".into()));
        };
        let username = username.trim().to_string();
        if !long_enough(&username) {
            return Err(AuthError::InvalidParameters(AuthError::InvalidUsername.to_string()));
        }
        if !long_enough(&password) {
            return Err(AuthError::InvalidParameters(AuthError::InvalidPassword.to_string()));
        }

        let catalog = self.tokens.catalog();
        let profile = match request.profile {
            Some(name) => ProfileName::new(name),
            None => self.default_profile.clone(),
        };
        if !catalog.has_profile(profile.as_str()) {
            return Err(AuthError::InvalidParameters(format!("Unknown profile '{profile}'")));
        }
        if let Some(unknown) = request.roles.iter().find(|r| catalog.role(r).is_none()) {
            return Err(AuthError::InvalidParameters(format!("Unknown role '{unknown}'")));
        }
        let email = request
            .email
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty());

        let hash = self.hash_password(password).await?;
        let account = Account::new(username, profile)
            .with_email(email)
            .with_password_hash(hash)
            .with_roles(request.roles);

        match with_timeout(self.store_timeout, "insert", self.store.insert(&account)).await {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => {
                info!(username = %account.username, "Registration rejected: username or email taken");
                return Err(AuthError::UsernameTaken);
            }
            Err(e) => return Err(e.into()),
        }

        info!(username = %account.username, account_id = %account.id, profile = %account.profile, "Created account");
        Ok(account)
    }

    pub async fn update_credentials(&self, id: AccountId, patch: CredentialsPatch) -> Result<Account, AuthError> {
        let mut account = self
            .call("find_by_id", self.store.find_by_id(id))
            .await?
            .ok_or(AuthError::UserNotFound)?;

        if patch.username.is_none() && patch.password.is_none() {
            return Err(AuthError::InvalidParameters(
                "At least username or password must be provided".into(),
            ));
        }
        let username = patch.username.map(|u| u.trim().to_string());
        if let Some(name) = &username {
            if !long_enough(name) {
                return Err(AuthError::InvalidUsername);
            }
        }
        if let Some(password) = &patch.password {
            if !long_enough(password) {
                return Err(AuthError::InvalidPassword);
            }
        }

        if let Some(name) = username {
            if name != account.username.as_str() {
                let taken = self.call("find_by_username", self.store.find_by_username(&name)).await?;
                if taken.is_some_and(|other| other.id != account.id) {
                    return Err(AuthError::UsernameTaken);
                }
            }
            account.username = Username::new(name);
        }
        if let Some(password) = patch.password {
            account.password_hash = Some(self.hash_password(password).await?);
        }

        match with_timeout(self.store_timeout, "save", self.store.save(&account)).await {
            Ok(()) => {}
            Err(StoreError::NotFound(_)) => return Err(AuthError::UserNotFound),
            Err(StoreError::Conflict(_)) => return Err(AuthError::UsernameTaken),
            Err(e) => return Err(e.into()),
        }

        info!(account_id = %account.id, username = %account.username, "Updated credentials");
        Ok(account)
    }

    pub async fn introspect(&self, bearer: &str) -> Result<Principal, AuthError> {
        self.introspect_at(bearer, Utc::now()).await
    }

    /// Resolve a bearer access token to the principal it authenticates.
    pub async fn introspect_at(&self, bearer: &str, now: DateTime<Utc>) -> Result<Principal, AuthError> {
        let claims = self.tokens.decode_access_token_at(bearer, now)?;
        let account = self
            .call("find_by_username", self.store.find_by_username(&claims.sub))
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if !self.tokens.is_access_token_valid_at(bearer, &account, now) {
            return Err(if account.is_active() {
                AuthError::MalformedToken
            } else {
                AuthError::AccountDisabled
            });
        }

        let authorities: BTreeSet<RoleName> = claims.authorities().collect();
        let permissions = self.tokens.catalog().permits_for_roles(&authorities);
        Ok(Principal::new(account.id, account.username, authorities, permissions))
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn test_login_issues_pair_and_persists_refresh_digest() {
        let (service, store) = auth_service();
        let account = service.add_account(registration("alice01", "s3cretpw")).await.unwrap();

        let pair = service.login("alice01", "s3cretpw").await.unwrap();
        assert!(service.tokens().is_access_token_valid(&pair.access_token, &account));

        let stored = store.find_by_id(account.id).await.unwrap().unwrap();
        assert_eq!(stored.refresh_token, Some(fingerprint_refresh_token(&pair.refresh_token)));
    }

    #[tokio::test]
    async fn test_wrong_password_persists_nothing() {
        let (service, store) = auth_service();
        let account = service.add_account(registration("alice01", "s3cretpw")).await.unwrap();

        let result = service.login("alice01", "wrongpass").await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
        let result = service.login("nobody01", "s3cretpw").await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));

        let stored = store.find_by_id(account.id).await.unwrap().unwrap();
        assert!(stored.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_login_rejects_disabled_account() {
        let (service, store) = auth_service();
        let mut account = service.add_account(registration("alice01", "s3cretpw")).await.unwrap();
        account.enabled = false;
        store.save(&account).await.unwrap();

        let result = service.login("alice01", "s3cretpw").await;
        assert!(matches!(result, Err(AuthError::AccountDisabled)));
    }

    #[tokio::test]
    async fn test_refresh_token_is_single_use() {
        let (service, _store) = auth_service();
        service.add_account(registration("alice01", "s3cretpw")).await.unwrap();
        let first = service.login("alice01", "s3cretpw").await.unwrap();

        let second = service.refresh(&first.refresh_token).await.unwrap();
        assert_ne!(second.refresh_token, first.refresh_token);

        let replay = service.refresh(&first.refresh_token).await;
        assert!(matches!(replay, Err(AuthError::RefreshTokenMismatch)));

        assert!(service.refresh(&second.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_login_invalidates_previous_refresh_token() {
        let (service, _store) = auth_service();
        service.add_account(registration("alice01", "s3cretpw")).await.unwrap();
        let first = service.login("alice01", "s3cretpw").await.unwrap();
        let _second = service.login("alice01", "s3cretpw").await.unwrap();

        let result = service.refresh(&first.refresh_token).await;
        assert!(matches!(result, Err(AuthError::RefreshTokenMismatch)));
    }

    #[tokio::test]
    async fn test_concurrent_refresh_has_one_winner() {
        let (service, _store) = auth_service();
        service.add_account(registration("alice01", "s3cretpw")).await.unwrap();
        let pair = service.login("alice01", "s3cretpw").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = service.clone();
            let token = pair.refresh_token.clone();
            handles.push(tokio::spawn(async move { service.refresh(&token).await }));
        }

        let mut wins = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => wins += 1,
                Err(err) => assert!(matches!(err, AuthError::RefreshTokenMismatch)),
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sessions_on_surreal_store() {
        let (service, store) = surreal_auth_service().await;
        let account = service.add_account(registration("alice01", "s3cretpw")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = service.clone();
            let account = account.clone();
            handles.push(tokio::spawn(async move { service.start_session(&account).await }));
        }
        let mut pairs = Vec::new();
        for handle in handles {
            pairs.push(handle.await.unwrap().unwrap());
        }

        // Last writer wins: exactly one of the issued refresh tokens is current.
        let stored = store.find_by_id(account.id).await.unwrap().unwrap();
        let current = pairs
            .iter()
            .filter(|p| stored.refresh_token == Some(fingerprint_refresh_token(&p.refresh_token)))
            .count();
        assert_eq!(current, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_refresh_on_surreal_store() {
        let (service, _store) = surreal_auth_service().await;
        service.add_account(registration("alice01", "s3cretpw")).await.unwrap();
        let pair = service.login("alice01", "s3cretpw").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = service.clone();
            let token = pair.refresh_token.clone();
            handles.push(tokio::spawn(async move { service.refresh(&token).await }));
        }

        let mut wins = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => wins += 1,
                Err(err) => assert!(matches!(err, AuthError::RefreshTokenMismatch)),
            }
        }
        assert_eq!(wins, 1);
    }

    struct CountingHasher {
        inner: crate::auth::Argon2PasswordHasher,
        verifications: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl PasswordHasher for CountingHasher {
        fn hash(&self, password: &str) -> Result<String, AuthError> {
            self.inner.hash(password)
        }

        fn verify(&self, password: &str, hash: &str) -> bool {
            self.verifications.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.verify(password, hash)
        }
    }

    #[tokio::test]
    async fn test_rejected_logins_all_verify_a_hash() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let store = Arc::new(crate::store::MemoryCredentialStore::new());
        let verifications = Arc::new(AtomicUsize::new(0));
        let hasher = CountingHasher {
            inner: crate::auth::password::fast_hasher(),
            verifications: verifications.clone(),
        };
        let service = AuthenticationService::new(
            store.clone(),
            Arc::new(crate::auth::token::test_support::token_service()),
            Arc::new(hasher),
            "CUSTOMER",
            Duration::from_secs(5),
        );
        service.add_account(registration("alice01", "s3cretpw")).await.unwrap();
        store.insert(&Account::new("octocat", "CUSTOMER")).await.unwrap();

        for (username, password) in [("alice01", "wrongpass"), ("nobody01", "s3cretpw"), ("octocat", "s3cretpw")] {
            let before = verifications.load(Ordering::SeqCst);
            let result = service.login(username, password).await;
            assert!(matches!(result, Err(AuthError::InvalidCredentials)));
            assert_eq!(verifications.load(Ordering::SeqCst), before + 1, "login as {username}");
        }

        // The decoy never authenticates anyone.
        let result = service.login("nobody01", DECOY_PASSWORD).await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_expired_refresh_token() {
        let (service, _store) = auth_service();
        service.add_account(registration("alice01", "s3cretpw")).await.unwrap();
        let pair = service.login("alice01", "s3cretpw").await.unwrap();

        let later = Utc::now() + ChronoDuration::days(8);
        let result = service.refresh_at(&pair.refresh_token, later).await;
        assert!(matches!(result, Err(AuthError::TokenExpired)));
    }

    #[tokio::test]
    async fn test_unknown_refresh_token_is_mismatch() {
        let (service, _store) = auth_service();
        let result = service.refresh("never-issued").await;
        assert!(matches!(result, Err(AuthError::RefreshTokenMismatch)));
    }

    #[tokio::test]
    async fn test_refresh_refused_for_locked_account() {
        let (service, store) = auth_service();
        let mut account = service.add_account(registration("alice01", "s3cretpw")).await.unwrap();
        let pair = service.login("alice01", "s3cretpw").await.unwrap();

        account.locked = true;
        store.save(&account).await.unwrap();

        let result = service.refresh(&pair.refresh_token).await;
        assert!(matches!(result, Err(AuthError::AccountDisabled)));
    }

    #[tokio::test]
    async fn test_add_account_validation() {
        let (service, _store) = auth_service();

        let missing = NewAccount {
            username: Some("alice01".into()),
            ..Default::default()
        };
        assert!(matches!(service.add_account(missing).await, Err(AuthError::InvalidParameters(_))));

        let short_name = service.add_account(registration("ab", "s3cretpw")).await;
        assert!(matches!(short_name, Err(AuthError::InvalidParameters(_))));

        let short_password = service.add_account(registration("alice01", "pw")).await;
        assert!(matches!(short_password, Err(AuthError::InvalidParameters(_))));

        let unknown_profile = NewAccount {
            profile: Some("WIZARD".into()),
            ..registration("alice01", "s3cretpw")
        };
        assert!(matches!(
            service.add_account(unknown_profile).await,
            Err(AuthError::InvalidParameters(_))
        ));
    }

    #[tokio::test]
    async fn test_add_account_defaults_and_hashes() {
        let (service, _store) = auth_service();
        let account = service
            .add_account(NewAccount {
                email: Some(" alice@example.com ".into()),
                ..registration("alice01", "s3cretpw")
            })
            .await
            .unwrap();

        assert_eq!(account.profile.as_str(), "CUSTOMER");
        assert_eq!(account.email.as_deref(), Some("alice@example.com"));
        let hash = account.password_hash.as_deref().unwrap();
        assert_ne!(hash, "s3cretpw");
        assert!(hash.starts_with("$argon2"));
    }

    #[tokio::test]
    async fn test_add_account_rejects_duplicates() {
        let (service, _store) = auth_service();
        service.add_account(registration("alice01", "s3cretpw")).await.unwrap();

        let result = service.add_account(registration("alice01", "otherpass")).await;
        assert!(matches!(result, Err(AuthError::UsernameTaken)));
    }

    #[tokio::test]
    async fn test_update_credentials_short_username_changes_nothing() {
        let (service, store) = auth_service();
        let account = service.add_account(registration("alice01", "s3cretpw")).await.unwrap();

        let patch = CredentialsPatch {
            username: Some("ab".into()),
            password: Some("anotherpw".into()),
        };
        let result = service.update_credentials(account.id, patch).await;
        assert!(matches!(result, Err(AuthError::InvalidUsername)));

        let stored = store.find_by_id(account.id).await.unwrap().unwrap();
        assert_eq!(stored, account);
        assert!(service.login("alice01", "s3cretpw").await.is_ok());
    }

    #[tokio::test]
    async fn test_update_credentials_errors() {
        let (service, _store) = auth_service();
        let account = service.add_account(registration("alice01", "s3cretpw")).await.unwrap();

        let result = service.update_credentials(AccountId::new(), CredentialsPatch::default()).await;
        assert!(matches!(result, Err(AuthError::UserNotFound)));

        let result = service.update_credentials(account.id, CredentialsPatch::default()).await;
        assert!(matches!(result, Err(AuthError::InvalidParameters(msg)) if msg == "At least username or password must be provided"));

        let result = service
            .update_credentials(
                account.id,
                CredentialsPatch {
                    password: Some("pw".into()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(AuthError::InvalidPassword)));

        service.add_account(registration("bobby01", "s3cretpw")).await.unwrap();
        let result = service
            .update_credentials(
                account.id,
                CredentialsPatch {
                    username: Some("bobby01".into()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(AuthError::UsernameTaken)));
    }

    #[tokio::test]
    async fn test_update_credentials_applies_both_fields() {
        let (service, _store) = auth_service();
        let account = service.add_account(registration("alice01", "s3cretpw")).await.unwrap();

        let updated = service
            .update_credentials(
                account.id,
                CredentialsPatch {
                    username: Some("alice_new".into()),
                    password: Some("n3wpassword".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.username.as_str(), "alice_new");

        assert!(matches!(
            service.login("alice01", "s3cretpw").await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(service.login("alice_new", "n3wpassword").await.is_ok());
    }

    #[tokio::test]
    async fn test_introspect_resolves_permissions() {
        let (service, _store) = auth_service();
        let account = service.add_account(registration("alice01", "s3cretpw")).await.unwrap();
        let pair = service.login("alice01", "s3cretpw").await.unwrap();

        let principal = service.introspect(&pair.access_token).await.unwrap();
        assert_eq!(principal.account_id(), account.id);
        assert!(principal.has_authority("ROLE_CUSTOMER"));
        assert!(principal.has_permission("order:create"));
        assert!(!principal.has_permission("user:delete"));

        assert!(matches!(
            service.introspect(&pair.refresh_token).await,
            Err(AuthError::MalformedToken)
        ));
        let later = Utc::now() + ChronoDuration::hours(1);
        assert!(matches!(
            service.introspect_at(&pair.access_token, later).await,
            Err(AuthError::TokenExpired)
        ));
    }

    struct RejectAll;

    #[async_trait]
    impl Authenticator for RejectAll {
        async fn authenticate(&self, _username: &str, _password: &str) -> Result<(), AuthError> {
            Err(AuthError::InvalidCredentials)
        }
    }

    #[tokio::test]
    async fn test_custom_authenticator() {
        let (service, _store) = auth_service();
        service.add_account(registration("alice01", "s3cretpw")).await.unwrap();

        let service = Arc::try_unwrap(service)
            .ok()
            .unwrap()
            .with_authenticator(Arc::new(RejectAll));
        assert!(matches!(
            service.login("alice01", "s3cretpw").await,
            Err(AuthError::InvalidCredentials)
        ));
    }
}
