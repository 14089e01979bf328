//! RSA signing keypair.

use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{DecodingKey, EncodingKey};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use thiserror::Error;
use tracing::info;

use crate::auth::jwks::{Jwk, JwksDocument};
use crate::config::KeyConfig;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("no private key configured")]
    Missing,

    #[error("failed to read key file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("public key does not match private key")]
    Mismatch,

    #[error("failed to build key: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

/// The process-wide signing keypair. Immutable once built.
pub struct KeyProvider {
    key_id: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    jwk: Jwk,
}

impl std::fmt::Debug for KeyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyProvider").field("key_id", &self.key_id).finish_non_exhaustive()
    }
}

impl KeyProvider {
    /// Build from PEM text. The private key may be PKCS#8 or PKCS#1. When no
    /// public key is given it is derived from the private key.
    pub fn from_pem(private_pem: &str, public_pem: Option<&str>, key_id: impl Into<String>) -> Result<Self, KeyError> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(private_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(private_pem))
            .map_err(|e| KeyError::InvalidPrivateKey(e.to_string()))?;

        let derived = private_key.to_public_key();
        if let Some(pem) = public_pem {
            let public_key = RsaPublicKey::from_public_key_pem(pem)
                .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
                .map_err(|e| KeyError::InvalidPublicKey(e.to_string()))?;
            if public_key != derived {
                return Err(KeyError::Mismatch);
            }
        }

        let der = private_key
            .to_pkcs1_der()
            .map_err(|e| KeyError::InvalidPrivateKey(e.to_string()))?;
        let encoding_key = EncodingKey::from_rsa_der(der.as_bytes());

        let n = URL_SAFE_NO_PAD.encode(derived.n().to_bytes_be());
        let e = URL_SAFE_NO_PAD.encode(derived.e().to_bytes_be());
        let decoding_key = DecodingKey::from_rsa_components(&n, &e)?;

        let key_id = key_id.into();
        let jwk = Jwk::rsa_signing(key_id.clone(), n, e);

        Ok(Self {
            key_id,
            encoding_key,
            decoding_key,
            jwk,
        })
    }

    /// Load the keypair named by the configuration.
    pub fn load(config: &KeyConfig) -> Result<Self, KeyError> {
        let private_path = config.private_key_path.as_deref().ok_or(KeyError::Missing)?;
        let private_pem = read_pem(private_path)?;
        let public_pem = config.public_key_path.as_deref().map(read_pem).transpose()?;

        let provider = Self::from_pem(&private_pem, public_pem.as_deref(), config.key_id.clone())?;
        info!(key_id = %provider.key_id, path = %private_path.display(), "Loaded signing key");
        Ok(provider)
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// The public key as a JWK.
    pub fn jwk(&self) -> &Jwk {
        &self.jwk
    }

    /// Public key set containing exactly the verification key.
    pub fn jwks(&self) -> JwksDocument {
        JwksDocument::single(self.jwk.clone())
    }
}

fn read_pem(path: &Path) -> Result<String, KeyError> {
    std::fs::read_to_string(path).map_err(|source| KeyError::Read {
        path: path.to_path_buf(),
        source,
    })
}
