//! Access and refresh token issuance and validation.
//!
//! Tokens are RS256 JWTs. Every token carries a `type` claim so that an
//! access token is never accepted where a refresh token is expected and
//! vice versa. Expiry is checked here against an explicit `now` rather than
//! by jsonwebtoken, which keeps the clock injectable.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Header, Validation, decode, decode_header, encode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::account::Account;
use crate::auth::{AuthError, AuthorizationView, KeyProvider};
use crate::config::TokenConfig;
use crate::permissions::PermissionCatalog;
use crate::types::{RefreshTokenDigest, RoleName, Username};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// JWT claims carried by both token types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Username of the account
    pub sub: String,
    /// Unique token id
    pub jti: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    /// Authority names; access tokens only
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

impl Claims {
    pub fn is_expired_at(&self, now: DateTime<Utc>, leeway_seconds: u64) -> bool {
        let leeway = i64::try_from(leeway_seconds).unwrap_or(i64::MAX);
        now.timestamp() >= self.exp.saturating_add(leeway)
    }

    pub fn authorities(&self) -> impl Iterator<Item = RoleName> + '_ {
        self.roles.iter().map(|r| RoleName::new(r.as_str()))
    }
}

/// Access and refresh token issued together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Hash a refresh token for storage and lookup (don't store raw tokens).
pub fn fingerprint_refresh_token(token: &str) -> RefreshTokenDigest {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let result = hasher.finalize();
    RefreshTokenDigest::new(format!("{:x}", result))
}

pub struct TokenService {
    keys: Arc<KeyProvider>,
    catalog: Arc<PermissionCatalog>,
    config: TokenConfig,
    validation: Validation,
}

impl TokenService {
    pub fn new(keys: Arc<KeyProvider>, catalog: Arc<PermissionCatalog>, config: TokenConfig) -> Self {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::from(["exp".to_string(), "sub".to_string()]);
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
            validation.required_spec_claims.insert("iss".to_string());
        }

        Self {
            keys,
            catalog,
            config,
            validation,
        }
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    pub fn catalog(&self) -> &PermissionCatalog {
        &self.catalog
    }

    pub fn issue_access_token(&self, account: &Account) -> Result<String, AuthError> {
        self.issue_access_token_at(account, Utc::now())
    }

    pub fn issue_access_token_at(&self, account: &Account, now: DateTime<Utc>) -> Result<String, AuthError> {
        let view = AuthorizationView::of(account, &self.catalog);
        let roles = view.authorities().iter().map(|r| r.as_str().to_string()).collect();
        let claims = self.claims(view.username(), TokenType::Access, roles, now, self.config.access_ttl_seconds);
        self.sign(&claims)
    }

    pub fn issue_refresh_token(&self, account: &Account) -> Result<String, AuthError> {
        self.issue_refresh_token_at(account, Utc::now())
    }

    pub fn issue_refresh_token_at(&self, account: &Account, now: DateTime<Utc>) -> Result<String, AuthError> {
        let claims = self.claims(
            &account.username,
            TokenType::Refresh,
            Vec::new(),
            now,
            self.config.refresh_ttl_seconds,
        );
        self.sign(&claims)
    }

    pub fn issue_pair_at(&self, account: &Account, now: DateTime<Utc>) -> Result<TokenPair, AuthError> {
        Ok(TokenPair {
            access_token: self.issue_access_token_at(account, now)?,
            refresh_token: self.issue_refresh_token_at(account, now)?,
        })
    }

    /// Verify the signature and parse the claims. Expiry is not checked.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let header = decode_header(token).map_err(|e| {
            debug!("Invalid JWT header: {}", e);
            AuthError::MalformedToken
        })?;
        if let Some(kid) = header.kid.as_deref() {
            if kid != self.keys.key_id() {
                debug!(kid, "Token signed with unknown key id");
                return Err(AuthError::InvalidSignature);
            }
        }

        decode::<Claims>(token, self.keys.decoding_key(), &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!("Token verification failed: {}", e);
                match e.kind() {
                    ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                    ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                    _ => AuthError::MalformedToken,
                }
            })
    }

    /// Subject of a correctly signed token, expired or not.
    pub fn extract_username(&self, token: &str) -> Result<Username, AuthError> {
        self.verify(token).map(|claims| Username::new(claims.sub))
    }

    pub fn is_access_token_valid(&self, token: &str, account: &Account) -> bool {
        self.is_access_token_valid_at(token, account, Utc::now())
    }

    pub fn is_access_token_valid_at(&self, token: &str, account: &Account, now: DateTime<Utc>) -> bool {
        let view = AuthorizationView::of(account, &self.catalog);
        match self.check(token, TokenType::Access, view.username(), now) {
            Ok(()) if view.is_active() => true,
            Ok(()) => {
                debug!(username = %view.username(), "Access token presented for inactive account");
                false
            }
            Err(reason) => {
                debug!(reason = reason.kind(), "Access token rejected");
                false
            }
        }
    }

    pub fn is_refresh_token_valid(&self, token: &str, account: &Account) -> bool {
        self.is_refresh_token_valid_at(token, account, Utc::now())
    }

    pub fn is_refresh_token_valid_at(&self, token: &str, account: &Account, now: DateTime<Utc>) -> bool {
        match self.check(token, TokenType::Refresh, &account.username, now) {
            Ok(()) => true,
            Err(reason) => {
                debug!(reason = reason.kind(), "Refresh token rejected");
                false
            }
        }
    }

    pub fn decode_access_token(&self, token: &str) -> Result<Claims, AuthError> {
        self.decode_access_token_at(token, Utc::now())
    }

    /// Typed decode of an access token, distinguishing expiry from other
    /// failures.
    pub fn decode_access_token_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, AuthError> {
        let claims = self.verify(token)?;
        if claims.token_type != TokenType::Access {
            return Err(AuthError::MalformedToken);
        }
        if claims.is_expired_at(now, self.config.leeway_seconds) {
            return Err(AuthError::TokenExpired);
        }
        Ok(claims)
    }

    /// Why a refresh token failed validation: `TokenExpired` when it is a
    /// well-formed refresh token past its expiry, `MalformedToken` otherwise.
    pub fn classify_refresh_failure_at(&self, token: &str, now: DateTime<Utc>) -> AuthError {
        match self.verify(token) {
            Ok(claims)
                if claims.token_type == TokenType::Refresh
                    && claims.is_expired_at(now, self.config.leeway_seconds) =>
            {
                AuthError::TokenExpired
            }
            _ => AuthError::MalformedToken,
        }
    }

    fn check(&self, token: &str, expected: TokenType, username: &Username, now: DateTime<Utc>) -> Result<(), AuthError> {
        let claims = self.verify(token)?;
        if claims.token_type != expected {
            return Err(AuthError::MalformedToken);
        }
        if claims.sub != username.as_str() {
            return Err(AuthError::MalformedToken);
        }
        if claims.is_expired_at(now, self.config.leeway_seconds) {
            return Err(AuthError::TokenExpired);
        }
        Ok(())
    }

    fn claims(
        &self,
        username: &Username,
        token_type: TokenType,
        roles: Vec<String>,
        now: DateTime<Utc>,
        ttl_seconds: u64,
    ) -> Claims {
        let iat = now.timestamp();
        let ttl = i64::try_from(ttl_seconds).unwrap_or(i64::MAX);
        Claims {
            sub: username.as_str().to_string(),
            jti: Uuid::new_v4().to_string(),
            iat,
            exp: iat.saturating_add(ttl),
            token_type,
            roles,
            iss: self.config.issuer.clone(),
        }
    }

    fn sign(&self, claims: &Claims) -> Result<String, AuthError> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.keys.key_id().to_string());
        encode(&header, claims, self.keys.encoding_key())
            .map_err(|e| AuthError::Internal(format!("failed to sign token: {e}")))
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::auth::keys::test_keys;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use chrono::Duration;

    fn alice() -> Account {
        Account::new("alice01", "CUSTOMER")
    }

    #[test]
    fn test_access_token_roundtrip() {
        let service = token_service();
        let account = alice();
        let now = Utc::now();

        let token = service.issue_access_token_at(&account, now).unwrap();
        assert!(service.is_access_token_valid_at(&token, &account, now));
        assert_eq!(service.extract_username(&token).unwrap().as_str(), "alice01");

        let claims = service.decode_access_token_at(&token, now).unwrap();
        assert_eq!(claims.token_type, TokenType::Access);
        assert_eq!(claims.roles, vec!["ROLE_CUSTOMER"]);
        assert_eq!(claims.exp - claims.iat, 900);
    }

    #[test]
    fn test_header_carries_key_id() {
        let service = token_service();
        let token = service.issue_access_token(&alice()).unwrap();
        let header = decode_header(&token).unwrap();
        assert_eq!(header.kid.as_deref(), Some("rsa-key"));
        assert_eq!(header.alg, Algorithm::RS256);
    }

    #[test]
    fn test_access_token_expires_after_ttl() {
        let service = token_service();
        let account = alice();
        let issued = Utc::now();
        let token = service.issue_access_token_at(&account, issued).unwrap();

        let later = issued + Duration::seconds(901);
        assert!(!service.is_access_token_valid_at(&token, &account, later));
        assert!(matches!(
            service.decode_access_token_at(&token, later),
            Err(AuthError::TokenExpired)
        ));
        // Subject is still readable from an expired token.
        assert_eq!(service.extract_username(&token).unwrap().as_str(), "alice01");
    }

    #[test]
    fn test_leeway_extends_validity() {
        let mut config = token_config();
        config.leeway_seconds = 30;
        let service = TokenService::new(
            Arc::new(test_keys::provider()),
            Arc::new(crate::permissions::default_catalog().unwrap()),
            config,
        );
        let account = alice();
        let issued = Utc::now();
        let token = service.issue_access_token_at(&account, issued).unwrap();

        assert!(service.is_access_token_valid_at(&token, &account, issued + Duration::seconds(910)));
        assert!(!service.is_access_token_valid_at(&token, &account, issued + Duration::seconds(931)));
    }

    #[test]
    fn test_refresh_token_outlives_access_token() {
        let service = token_service();
        let account = alice();
        let issued = Utc::now();
        let pair = service.issue_pair_at(&account, issued).unwrap();

        let later = issued + Duration::seconds(3600);
        assert!(!service.is_access_token_valid_at(&pair.access_token, &account, later));
        assert!(service.is_refresh_token_valid_at(&pair.refresh_token, &account, later));

        let much_later = issued + Duration::seconds(604_801);
        assert!(!service.is_refresh_token_valid_at(&pair.refresh_token, &account, much_later));
        assert!(matches!(
            service.classify_refresh_failure_at(&pair.refresh_token, much_later),
            AuthError::TokenExpired
        ));
    }

    #[test]
    fn test_token_types_are_not_interchangeable() {
        let service = token_service();
        let account = alice();
        let now = Utc::now();
        let pair = service.issue_pair_at(&account, now).unwrap();

        assert!(!service.is_access_token_valid_at(&pair.refresh_token, &account, now));
        assert!(!service.is_refresh_token_valid_at(&pair.access_token, &account, now));
        assert!(matches!(
            service.decode_access_token_at(&pair.refresh_token, now),
            Err(AuthError::MalformedToken)
        ));
    }

    #[test]
    fn test_refresh_tokens_are_unique() {
        let service = token_service();
        let account = alice();
        let now = Utc::now();

        let first = service.issue_refresh_token_at(&account, now).unwrap();
        let second = service.issue_refresh_token_at(&account, now).unwrap();
        assert_ne!(first, second);
        assert_ne!(fingerprint_refresh_token(&first), fingerprint_refresh_token(&second));
    }

    #[test]
    fn test_subject_mismatch_invalid() {
        let service = token_service();
        let token = service.issue_access_token(&alice()).unwrap();
        let bob = Account::new("bobby01", "CUSTOMER");
        assert!(!service.is_access_token_valid(&token, &bob));
    }

    #[test]
    fn test_locked_or_disabled_account_invalid() {
        let service = token_service();
        let mut account = alice();
        let token = service.issue_access_token(&account).unwrap();

        account.locked = true;
        assert!(!service.is_access_token_valid(&token, &account));

        account.locked = false;
        account.enabled = false;
        assert!(!service.is_access_token_valid(&token, &account));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let service = token_service();
        let account = alice();
        let token = service.issue_access_token(&account).unwrap();

        let parts: Vec<&str> = token.split('.').collect();
        let mut claims: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(parts[1]).unwrap()).unwrap();
        claims["roles"] = serde_json::json!(["ROLE_ADMIN"]);
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
        let forged = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);

        assert!(!service.is_access_token_valid(&forged, &account));
        assert!(matches!(service.extract_username(&forged), Err(AuthError::InvalidSignature)));
    }

    #[test]
    fn test_foreign_key_rejected() {
        let service = token_service();
        let foreign = TokenService::new(
            Arc::new(test_keys::other_provider()),
            Arc::new(crate::permissions::default_catalog().unwrap()),
            token_config(),
        );
        let account = alice();
        let token = foreign.issue_access_token(&account).unwrap();

        assert!(!service.is_access_token_valid(&token, &account));
        assert!(matches!(service.extract_username(&token), Err(AuthError::InvalidSignature)));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let service = token_service();
        assert!(matches!(service.extract_username("not-a-jwt"), Err(AuthError::MalformedToken)));
        assert!(!service.is_access_token_valid("not-a-jwt", &alice()));
        assert!(matches!(
            service.classify_refresh_failure_at("not-a-jwt", Utc::now()),
            AuthError::MalformedToken
        ));
    }

    #[test]
    fn test_issuer_is_enforced_when_configured() {
        let mut config = token_config();
        config.issuer = Some("authcore".to_string());
        let keys = Arc::new(test_keys::provider());
        let catalog = Arc::new(crate::permissions::default_catalog().unwrap());
        let with_issuer = TokenService::new(keys.clone(), catalog.clone(), config);
        let without_issuer = TokenService::new(keys, catalog, token_config());

        let account = alice();
        let token = with_issuer.issue_access_token(&account).unwrap();
        assert!(with_issuer.is_access_token_valid(&token, &account));

        let unissued = without_issuer.issue_access_token(&account).unwrap();
        assert!(!with_issuer.is_access_token_valid(&unissued, &account));
    }

    #[test]
    fn test_token_verifies_with_published_jwk() {
        let service = token_service();
        let token = service.issue_access_token(&alice()).unwrap();

        let jwk = test_keys::provider().jwk().clone();
        let key = jwk.to_decoding_key().unwrap();
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_aud = false;
        let data = decode::<Claims>(&token, &key, &validation).unwrap();
        assert_eq!(data.claims.sub, "alice01");
    }

    #[test]
    fn test_fingerprint_is_stable_hex() {
        let digest = fingerprint_refresh_token("token");
        assert_eq!(digest.as_str().len(), 64);
        assert_eq!(digest, fingerprint_refresh_token("token"));
    }
}
