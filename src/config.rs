use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf, time::Duration};
use thiserror::Error;

use crate::auth::DEFAULT_KEY_ID;
use crate::permissions::DEFAULT_PROFILE;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level service configuration (`authcore.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthCoreConfig {
    #[serde(default)]
    pub tokens: TokenConfig,
    #[serde(default)]
    pub keys: KeyConfig,
    #[serde(default)]
    pub federation: FederationConfig,
    /// Upper bound on a single credential store call.
    #[serde(default = "default_store_timeout_seconds")]
    pub store_timeout_seconds: u64,
    /// Profile given to accounts created without one.
    #[serde(default = "default_profile")]
    pub default_profile: String,
    /// JSON permission catalog to provision instead of the built-in one.
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    #[serde(default = "default_access_ttl_seconds")]
    pub access_ttl_seconds: u64,
    #[serde(default = "default_refresh_ttl_seconds")]
    pub refresh_ttl_seconds: u64,
    /// Clock skew tolerated when checking expiry.
    #[serde(default)]
    pub leeway_seconds: u64,
    /// `iss` claim; enforced on validation when set.
    #[serde(default)]
    pub issuer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyConfig {
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
    /// Derived from the private key when unset.
    #[serde(default)]
    pub public_key_path: Option<PathBuf>,
    #[serde(default = "default_key_id")]
    pub key_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationConfig {
    #[serde(default = "default_github_user_url")]
    pub github_user_url: String,
    #[serde(default = "default_federation_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_store_timeout_seconds() -> u64 {
    5
}

fn default_profile() -> String {
    DEFAULT_PROFILE.to_string()
}

fn default_access_ttl_seconds() -> u64 {
    15 * 60
}

fn default_refresh_ttl_seconds() -> u64 {
    7 * 24 * 60 * 60
}

fn default_key_id() -> String {
    DEFAULT_KEY_ID.to_string()
}

fn default_github_user_url() -> String {
    "https://api.github.com/user".to_string()
}

fn default_federation_timeout_seconds() -> u64 {
    10
}

impl Default for AuthCoreConfig {
    fn default() -> Self {
        Self {
            tokens: TokenConfig::default(),
            keys: KeyConfig::default(),
            federation: FederationConfig::default(),
            store_timeout_seconds: default_store_timeout_seconds(),
            default_profile: default_profile(),
            catalog_path: None,
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            access_ttl_seconds: default_access_ttl_seconds(),
            refresh_ttl_seconds: default_refresh_ttl_seconds(),
            leeway_seconds: 0,
            issuer: None,
        }
    }
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            private_key_path: None,
            public_key_path: None,
            key_id: default_key_id(),
        }
    }
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            github_user_url: default_github_user_url(),
            timeout_seconds: default_federation_timeout_seconds(),
        }
    }
}

impl TokenConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_ttl_seconds == 0 {
            return Err(ConfigError::Invalid("tokens.access_ttl_seconds must be positive".into()));
        }
        if self.refresh_ttl_seconds <= self.access_ttl_seconds {
            return Err(ConfigError::Invalid(format!(
                "tokens.refresh_ttl_seconds ({}) must be longer than tokens.access_ttl_seconds ({})",
                self.refresh_ttl_seconds, self.access_ttl_seconds
            )));
        }
        Ok(())
    }
}

impl AuthCoreConfig {
    /// Load from the resolved config file, or defaults when there is none.
    pub fn load() -> Result<Self, ConfigError> {
        match resolve_config_path() {
            Some(path) => Self::from_file(path),
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn from_file(path: PathBuf) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::from_json_with(&raw, &path, |name| env::var(name).ok())
    }

    /// Parse `raw`, expanding `${VAR}` references through `lookup`.
    pub fn from_json_with<F>(raw: &str, path: &std::path::Path, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config: Self = serde_json::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let config = config.expand(&lookup);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tokens.validate()?;
        if self.store_timeout_seconds == 0 {
            return Err(ConfigError::Invalid("store_timeout_seconds must be positive".into()));
        }
        if self.federation.timeout_seconds == 0 {
            return Err(ConfigError::Invalid("federation.timeout_seconds must be positive".into()));
        }
        if let Err(err) = url::Url::parse(&self.federation.github_user_url) {
            return Err(ConfigError::Invalid(format!(
                "federation.github_user_url '{}' is not a valid URL: {err}",
                self.federation.github_user_url
            )));
        }
        if self.default_profile.trim().is_empty() {
            return Err(ConfigError::Invalid("default_profile must not be empty".into()));
        }
        Ok(())
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_seconds)
    }

    pub fn federation_timeout(&self) -> Duration {
        Duration::from_secs(self.federation.timeout_seconds)
    }

    fn expand<F>(mut self, lookup: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let expand_path = |p: PathBuf| PathBuf::from(expand_env_vars_with(&p.to_string_lossy(), lookup));

        self.keys.private_key_path = self.keys.private_key_path.map(expand_path);
        self.keys.public_key_path = self.keys.public_key_path.map(expand_path);
        self.catalog_path = self.catalog_path.map(expand_path);
        self.federation.github_user_url = expand_env_vars_with(&self.federation.github_user_url, lookup);
        if let Some(issuer) = self.tokens.issuer.as_mut() {
            *issuer = expand_env_vars_with(issuer, lookup);
        }
        self
    }
}

/// `AUTHCORE_CONFIG`, then `$XDG_CONFIG_HOME/authcore/authcore.json`, then
/// `./authcore.json`.
pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(p) = env::var("AUTHCORE_CONFIG") {
        return Some(PathBuf::from(p));
    }

    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        let candidate = PathBuf::from(xdg).join("authcore").join("authcore.json");
        if candidate.exists() {
            return Some(candidate);
        }
    }

    let candidate = PathBuf::from("authcore.json");
    if candidate.exists() {
        return Some(candidate);
    }

    None
}

/// Replace `${NAME}` with `lookup(NAME)`. Unknown names are left as is.
pub fn expand_env_vars_with<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next(); // consume '{'
            let mut name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
            if let Some(val) = lookup(&name) {
                out.push_str(&val);
            } else {
                out.push_str("${");
                out.push_str(&name);
                out.push('}');
            }
        } else {
            out.push(ch);
        }
    }

    out
}
