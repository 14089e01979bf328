//! Permit/Role/Profile catalog and permission resolution.
//!
//! The graph is fixed-depth: profiles reference roles and roles reference
//! permits. It is stored as three flat keyed maps whose values hold explicit
//! join sets, so no traversal ever needs cycle detection.

mod seed;

pub use seed::{DEFAULT_PROFILE, default_catalog, default_document};

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::account::Account;
use crate::types::{PermitCode, ProfileName, RoleName};

/// An atomic, named capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permit {
    pub code: PermitCode,
    #[serde(default)]
    pub description: String,
}

/// A named bundle of permits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: RoleName,
    #[serde(default)]
    pub permits: BTreeSet<PermitCode>,
}

/// A named bundle of roles representing a broad account category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: ProfileName,
    #[serde(default)]
    pub roles: BTreeSet<RoleName>,
}

/// Serializable form of a catalog, as provisioned by a seed file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogDocument {
    #[serde(default)]
    pub permits: Vec<Permit>,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub profiles: Vec<Profile>,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("duplicate permit code '{0}'")]
    DuplicatePermit(PermitCode),

    #[error("duplicate role name '{0}'")]
    DuplicateRole(RoleName),

    #[error("duplicate profile name '{0}'")]
    DuplicateProfile(ProfileName),

    #[error("role '{role}' references unknown permit '{permit}'")]
    UnknownPermit { role: RoleName, permit: PermitCode },

    #[error("profile '{profile}' references unknown role '{role}'")]
    UnknownRole { profile: ProfileName, role: RoleName },

    #[error("failed to read catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Read-only, validated permission catalog.
#[derive(Debug, Clone, Default)]
pub struct PermissionCatalog {
    permits: HashMap<PermitCode, Permit>,
    roles: HashMap<RoleName, Role>,
    profiles: HashMap<ProfileName, Profile>,
}

impl PermissionCatalog {
    /// Build a catalog, rejecting duplicates and dangling references.
    pub fn from_document(document: CatalogDocument) -> Result<Self, CatalogError> {
        let mut catalog = Self::default();

        for permit in document.permits {
            if catalog.permits.contains_key(&permit.code) {
                return Err(CatalogError::DuplicatePermit(permit.code));
            }
            catalog.permits.insert(permit.code.clone(), permit);
        }

        for role in document.roles {
            if catalog.roles.contains_key(&role.name) {
                return Err(CatalogError::DuplicateRole(role.name));
            }
            if let Some(missing) = role.permits.iter().find(|p| !catalog.permits.contains_key(*p)) {
                return Err(CatalogError::UnknownPermit {
                    role: role.name.clone(),
                    permit: missing.clone(),
                });
            }
            catalog.roles.insert(role.name.clone(), role);
        }

        for profile in document.profiles {
            if catalog.profiles.contains_key(&profile.name) {
                return Err(CatalogError::DuplicateProfile(profile.name));
            }
            if let Some(missing) = profile.roles.iter().find(|r| !catalog.roles.contains_key(*r)) {
                return Err(CatalogError::UnknownRole {
                    profile: profile.name.clone(),
                    role: missing.clone(),
                });
            }
            catalog.profiles.insert(profile.name.clone(), profile);
        }

        Ok(catalog)
    }

    /// Load a catalog from a JSON seed file.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path)?;
        let document: CatalogDocument = serde_json::from_str(&raw)?;
        Self::from_document(document)
    }

    /// Export the catalog, sorted by key so the output is stable.
    pub fn to_document(&self) -> CatalogDocument {
        let mut permits: Vec<Permit> = self.permits.values().cloned().collect();
        permits.sort_by(|a, b| a.code.cmp(&b.code));
        let mut roles: Vec<Role> = self.roles.values().cloned().collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        let mut profiles: Vec<Profile> = self.profiles.values().cloned().collect();
        profiles.sort_by(|a, b| a.name.cmp(&b.name));

        CatalogDocument {
            permits,
            roles,
            profiles,
        }
    }

    pub fn permit(&self, code: &str) -> Option<&Permit> {
        self.permits.get(code)
    }

    pub fn role(&self, name: &str) -> Option<&Role> {
        self.roles.get(name)
    }

    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    pub fn has_profile(&self, name: &str) -> bool {
        self.profiles.contains_key(name)
    }

    /// Role names granted to an account: its profile's roles plus its
    /// directly assigned roles. Unknown names are dropped.
    pub fn authorities(&self, account: &Account) -> BTreeSet<RoleName> {
        let mut authorities = BTreeSet::new();

        match self.profiles.get(&account.profile) {
            Some(profile) => authorities.extend(profile.roles.iter().cloned()),
            None => debug!(
                username = %account.username,
                profile = %account.profile,
                "account references unknown profile"
            ),
        }

        for role in &account.roles {
            if self.roles.contains_key(role) {
                authorities.insert(role.clone());
            } else {
                debug!(username = %account.username, role = %role, "account references unknown role");
            }
        }

        authorities
    }

    /// Union of the permits reachable through the given roles.
    pub fn permits_for_roles<'a, I>(&self, roles: I) -> BTreeSet<PermitCode>
    where
        I: IntoIterator<Item = &'a RoleName>,
    {
        roles
            .into_iter()
            .filter_map(|name| self.roles.get(name))
            .flat_map(|role| role.permits.iter().cloned())
            .collect()
    }

    /// Effective permission set of an account: permits reachable through the
    /// profile's roles unioned with permits reachable through direct roles.
    pub fn effective_permissions(&self, account: &Account) -> BTreeSet<PermitCode> {
        self.permits_for_roles(&self.authorities(account))
    }
}
