//! Token lifecycle and account authentication.
//!
//! - **KeyProvider** holds the RSA signing keypair and its JWKS form
//! - **TokenService** issues and validates access/refresh JWTs
//! - **AuthenticationService** handles login, refresh rotation and
//!   account credentials
//! - **FederatedIdentityService** exchanges external provider tokens
//!
//! ## Usage
//!
//! ```ignore
//! let pair = auth.login("alice01", "s3cretpw").await?;
//! let principal = auth.introspect(&pair.access_token).await?;
//! principal.require_permission("order:read")?;
//! ```

mod error;
mod federated;
pub mod jwks;
mod keys;
mod password;
mod principal;
mod service;
mod token;

pub use error::AuthError;
pub use federated::{ExternalIdentity, FederatedIdentityService, GithubIdentityProvider, IdentityProvider};
pub use jwks::{DEFAULT_KEY_ID, Jwk, JwkError, JwksDocument};
pub use keys::{KeyError, KeyProvider};
pub use password::{Argon2PasswordHasher, PasswordHasher};
pub use principal::{AuthorizationView, Principal};
pub use service::{
    Authenticator, AuthenticationService, CredentialsPatch, MIN_CREDENTIAL_LENGTH, NewAccount, PasswordAuthenticator,
};
pub use token::{Claims, TokenPair, TokenService, TokenType, fingerprint_refresh_token};

#[cfg(test)]
pub(crate) use keys::test_keys;
#[cfg(test)]
pub(crate) use service::test_support;
