//! Authorization views of an account.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::account::Account;
use crate::auth::AuthError;
use crate::permissions::PermissionCatalog;
use crate::types::{AccountId, PermitCode, RoleName, Username};

/// The narrow slice of an account that token issuance and validation need:
/// who it is, which authorities it holds and whether it may act.
///
/// Computed on demand from an [`Account`] and a catalog. It is never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationView {
    username: Username,
    authorities: BTreeSet<RoleName>,
    enabled: bool,
    locked: bool,
}

impl AuthorizationView {
    pub fn of(account: &Account, catalog: &PermissionCatalog) -> Self {
        Self {
            username: account.username.clone(),
            authorities: catalog.authorities(account),
            enabled: account.enabled,
            locked: account.locked,
        }
    }

    pub fn username(&self) -> &Username {
        &self.username
    }

    pub fn authorities(&self) -> &BTreeSet<RoleName> {
        &self.authorities
    }

    pub fn is_active(&self) -> bool {
        self.enabled && !self.locked
    }
}

/// The authenticated caller behind a bearer token.
///
/// Authorities come from the token itself and stay authoritative for the
/// token's lifetime. Permits are resolved from those authorities.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    account_id: AccountId,
    username: Username,
    authorities: BTreeSet<RoleName>,
    permissions: BTreeSet<PermitCode>,
}

impl Principal {
    pub fn new(
        account_id: AccountId,
        username: Username,
        authorities: BTreeSet<RoleName>,
        permissions: BTreeSet<PermitCode>,
    ) -> Self {
        Self {
            account_id,
            username,
            authorities,
            permissions,
        }
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn username(&self) -> &Username {
        &self.username
    }

    pub fn authorities(&self) -> &BTreeSet<RoleName> {
        &self.authorities
    }

    pub fn permissions(&self) -> &BTreeSet<PermitCode> {
        &self.permissions
    }

    pub fn has_authority(&self, role: &str) -> bool {
        self.authorities.contains(role)
    }

    pub fn has_permission(&self, permit: &str) -> bool {
        self.permissions.contains(permit)
    }

    /// Fail with [`AuthError::Forbidden`] unless the permit is held.
    pub fn require_permission(&self, permit: &str) -> Result<(), AuthError> {
        if self.has_permission(permit) {
            Ok(())
        } else {
            Err(AuthError::Forbidden)
        }
    }

    /// Whether this principal may act on the given account: either it is
    /// the account itself or it holds `permit`.
    pub fn may_manage(&self, account_id: AccountId, permit: &str) -> bool {
        self.account_id == account_id || self.has_permission(permit)
    }
}
