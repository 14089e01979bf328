//! JWKS (JSON Web Key Set) publication.
//!
//! The service publishes the public half of its signing key so that
//! downstream services can verify tokens without sharing a secret.

use jsonwebtoken::DecodingKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// RFC 7517 key id used when none is configured.
pub const DEFAULT_KEY_ID: &str = "rsa-key";

/// A single JSON Web Key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type (e.g., "RSA")
    pub kty: String,
    /// Key ID, matched against the JWT header `kid`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Algorithm (e.g., "RS256")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// Key use (e.g., "sig" for signature)
    #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    /// RSA modulus (base64url encoded)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// RSA exponent (base64url encoded)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
}

impl Jwk {
    /// An RS256 signature-verification key built from base64url components.
    pub fn rsa_signing(kid: impl Into<String>, n: impl Into<String>, e: impl Into<String>) -> Self {
        Self {
            kty: "RSA".to_string(),
            kid: Some(kid.into()),
            alg: Some("RS256".to_string()),
            key_use: Some("sig".to_string()),
            n: Some(n.into()),
            e: Some(e.into()),
        }
    }

    /// Convert to a jsonwebtoken verification key.
    pub fn to_decoding_key(&self) -> Result<DecodingKey, JwkError> {
        if self.kty != "RSA" {
            return Err(JwkError::UnsupportedKeyType(self.kty.clone()));
        }
        let n = self.n.as_deref().ok_or(JwkError::MissingComponent("n"))?;
        let e = self.e.as_deref().ok_or(JwkError::MissingComponent("e"))?;

        DecodingKey::from_rsa_components(n, e).map_err(|err| JwkError::InvalidComponents(err.to_string()))
    }
}

/// A JWKS document containing multiple keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwksDocument {
    pub keys: Vec<Jwk>,
}

impl JwksDocument {
    pub fn single(key: Jwk) -> Self {
        Self { keys: vec![key] }
    }
}

#[derive(Debug, Clone, Error)]
pub enum JwkError {
    #[error("unsupported key type: {0}")]
    UnsupportedKeyType(String),

    #[error("missing '{0}' in RSA key")]
    MissingComponent(&'static str),

    #[error("invalid RSA components: {0}")]
    InvalidComponents(String),
}
