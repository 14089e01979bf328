//! Federated login: exchange an external provider's token for a local
//! token pair, creating the local account on first use.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::account::{Account, FederatedIdentity};
use crate::auth::{AuthError, AuthenticationService, TokenPair};
use crate::store::{StoreError, with_timeout};
use crate::types::{ProviderName, SubjectId};

/// What an identity provider asserts about the holder of a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    pub subject_id: SubjectId,
    /// Login handle, used as the local username.
    pub login: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

/// An external system that can resolve an access token to a user.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn name(&self) -> &ProviderName;

    /// Any failure is reported as [`AuthError::ExchangeFailure`].
    async fn fetch_identity(&self, provider_token: &str) -> Result<ExternalIdentity, AuthError>;
}

/// GitHub `GET /user` response body.
#[derive(Debug, Deserialize)]
struct GithubUser {
    id: u64,
    login: String,
    email: Option<String>,
    name: Option<String>,
}

/// Resolves GitHub OAuth tokens through the REST user endpoint.
pub struct GithubIdentityProvider {
    name: ProviderName,
    user_url: String,
    client: reqwest::Client,
}

impl GithubIdentityProvider {
    pub const NAME: &'static str = "github";

    pub fn new(user_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("authcore/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            name: ProviderName::new(Self::NAME),
            user_url: user_url.into(),
            client,
        })
    }
}

#[async_trait]
impl IdentityProvider for GithubIdentityProvider {
    fn name(&self) -> &ProviderName {
        &self.name
    }

    async fn fetch_identity(&self, provider_token: &str) -> Result<ExternalIdentity, AuthError> {
        debug!("Fetching GitHub user from {}", self.user_url);

        let response = self
            .client
            .get(&self.user_url)
            .bearer_auth(provider_token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| AuthError::exchange(Self::NAME, e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::exchange(
                Self::NAME,
                format!("HTTP {} from user endpoint", response.status()),
            ));
        }

        let user: GithubUser = response
            .json()
            .await
            .map_err(|e| AuthError::exchange(Self::NAME, format!("undecodable user body: {e}")))?;

        Ok(ExternalIdentity {
            subject_id: SubjectId::new(user.id.to_string()),
            login: user.login,
            email: user.email,
            display_name: user.name,
        })
    }
}

/// Registry of identity providers plus the find-or-create flow.
pub struct FederatedIdentityService {
    auth: Arc<AuthenticationService>,
    providers: HashMap<ProviderName, Arc<dyn IdentityProvider>>,
    provider_timeout: Duration,
}

impl FederatedIdentityService {
    pub fn new(auth: Arc<AuthenticationService>, provider_timeout: Duration) -> Self {
        Self {
            auth,
            providers: HashMap::new(),
            provider_timeout,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn register(&mut self, provider: Arc<dyn IdentityProvider>) {
        info!(provider = %provider.name(), "Registered identity provider");
        self.providers.insert(provider.name().clone(), provider);
    }

    pub fn provider_names(&self) -> Vec<&ProviderName> {
        let mut names: Vec<&ProviderName> = self.providers.keys().collect();
        names.sort();
        names
    }

    /// Validate `provider_token` with the named provider and issue a local
    /// token pair for the linked account.
    pub async fn exchange(&self, provider: &str, provider_token: &str) -> Result<TokenPair, AuthError> {
        let Some(idp) = self.providers.get(provider) else {
            warn!(provider, "Token exchange requested for unknown provider");
            return Err(AuthError::exchange(provider, "unknown provider"));
        };

        let identity = match tokio::time::timeout(self.provider_timeout, idp.fetch_identity(provider_token)).await {
            Ok(Ok(identity)) => identity,
            Ok(Err(err)) => {
                if let AuthError::ExchangeFailure { reason, .. } = &err {
                    warn!(provider, %reason, "Identity provider rejected token");
                }
                return Err(err);
            }
            Err(_) => {
                warn!(provider, timeout_ms = self.provider_timeout.as_millis() as u64, "Identity provider timed out");
                return Err(AuthError::exchange(provider, "timed out"));
            }
        };
        if identity.login.trim().is_empty() {
            return Err(AuthError::exchange(provider, "provider returned an empty login"));
        }

        let account = self.find_or_create(idp.name(), identity).await?;
        if !account.is_active() {
            info!(username = %account.username, "Federated login refused for inactive account");
            return Err(AuthError::AccountDisabled);
        }

        let pair = self.auth.start_session(&account).await?;
        info!(provider, username = %account.username, account_id = %account.id, "Federated login succeeded");
        Ok(pair)
    }

    /// Find the account linked to the identity, creating it if absent. When
    /// two callers race to create the same link, the loser's insert fails on
    /// the store's uniqueness constraint and it reads the winner's account.
    async fn find_or_create(&self, provider: &ProviderName, identity: ExternalIdentity) -> Result<Account, AuthError> {
        let store = self.auth.store();
        let limit = self.auth.store_timeout();
        let link = FederatedIdentity::new(provider.clone(), identity.subject_id);

        if let Some(account) = with_timeout(limit, "find_by_federated_id", store.find_by_federated_id(&link)).await? {
            return Ok(account);
        }

        let account = Account::new(identity.login, self.auth.default_profile().clone())
            .with_email(identity.email)
            .with_federated(link.clone());

        match with_timeout(limit, "insert", store.insert(&account)).await {
            Ok(()) => {
                info!(
                    provider = %provider,
                    username = %account.username,
                    account_id = %account.id,
                    "Created account for federated identity"
                );
                Ok(account)
            }
            Err(StoreError::Conflict(reason)) => {
                debug!(provider = %provider, %reason, "Federated insert conflicted; re-reading");
                match with_timeout(limit, "find_by_federated_id", store.find_by_federated_id(&link)).await? {
                    Some(existing) => Ok(existing),
                    // The conflict was on username or email, held by an
                    // unrelated account.
                    None => {
                        warn!(provider = %provider, username = %account.username, "Federated login collides with another account");
                        Err(AuthError::exchange(
                            provider.as_str(),
                            "login or email already linked to another account",
                        ))
                    }
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}
