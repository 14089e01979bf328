//! NewType wrappers for strong typing throughout the auth core.
//!
//! These types prevent accidental mixing of semantically different strings
//! (e.g., passing a role name where a permit code is expected).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Macro to generate a NewType wrapper with standard trait implementations.
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner String.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(
    /// Unique login handle of an account.
    ///
    /// This is the `sub` claim of every token issued for the account.
    Username
);

newtype_string!(
    /// Symbolic code of an atomic capability, e.g. "order:read".
    PermitCode
);

newtype_string!(
    /// Unique name of a role, e.g. "ROLE_CUSTOMER".
    ///
    /// Role names are the authorities embedded in access tokens.
    RoleName
);

newtype_string!(
    /// Unique name of a profile (broad account category), e.g. "CUSTOMER".
    ProfileName
);

newtype_string!(
    /// Name of an external identity provider, e.g. "github".
    ProviderName
);

newtype_string!(
    /// Subject identifier assigned to a user by an external identity provider.
    ///
    /// Only unique together with the `ProviderName` that issued it.
    SubjectId
);

newtype_string!(
    /// SHA-256 hash of a refresh token for storage and lookup.
    ///
    /// Refresh tokens are never stored in plain text. The digest is computed
    /// when the token is issued and again when it is presented.
    RefreshTokenDigest
);

/// Stable identifier of an account record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(Uuid);

impl AccountId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for AccountId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for AccountId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}
