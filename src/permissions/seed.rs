//! Default catalog provisioned on first start.

use super::{CatalogDocument, CatalogError, PermissionCatalog, Permit, Profile, Role};
use crate::types::{PermitCode, ProfileName, RoleName};

/// Profile assigned to accounts that are created without one.
pub const DEFAULT_PROFILE: &str = "CUSTOMER";

const PERMITS: &[(&str, &str)] = &[
    ("user:read", "View user information"),
    ("user:read_self", "View self user information"),
    ("user:update", "Update user information"),
    ("user:delete", "Delete user accounts"),
    ("product:create", "Create products"),
    ("product:read", "View products"),
    ("product:update", "Update products"),
    ("product:delete", "Delete products"),
    ("order:create", "Create orders"),
    ("order:read", "View orders"),
    ("order:update", "Update orders"),
    ("order:delete", "Cancel orders"),
    ("inventory:read", "View inventory"),
    ("inventory:update", "Update inventory"),
    ("review:moderate", "Moderate reviews"),
    ("dispute:manage", "Manage disputes"),
    ("notification:send", "Send notifications"),
    ("support:respond", "Respond to support tickets"),
    ("content:create", "Create content (banners, pages, etc.)"),
    ("content:read", "Read content"),
    ("content:update", "Update content"),
    ("content:delete", "Delete content"),
];

const ROLES: &[(&str, &[&str])] = &[
    ("ROLE_GUEST", &["product:read"]),
    (
        "ROLE_CUSTOMER",
        &[
            "user:read_self",
            "user:update",
            "product:read",
            "order:create",
            "order:read",
            "order:update",
            "order:delete",
        ],
    ),
    (
        "ROLE_SELLER",
        &[
            "product:read",
            "product:create",
            "product:update",
            "order:read",
            "order:update",
            "order:delete",
            "inventory:read",
            "inventory:update",
        ],
    ),
    (
        "ROLE_ADMIN",
        &[
            "user:read_self",
            "user:update",
            "user:delete",
            "product:read",
            "product:create",
            "product:update",
            "order:create",
            "order:read",
            "order:update",
            "order:delete",
            "inventory:read",
            "inventory:update",
            "review:moderate",
            "dispute:manage",
            "support:respond",
            "content:create",
            "content:read",
            "content:update",
            "content:delete",
        ],
    ),
    ("ROLE_DELIVERY_STAFF", &["order:read", "order:update"]),
    ("ROLE_SUPPORT_AGENT", &["support:respond", "review:moderate"]),
    (
        "ROLE_USER_MANAGER",
        &["user:read_self", "user:read", "user:update", "user:delete"],
    ),
    ("ROLE_ORDER_MANAGER", &["order:read", "order:update", "order:delete"]),
    (
        "ROLE_PRODUCT_MANAGER",
        &[
            "product:read",
            "product:create",
            "product:update",
            "inventory:read",
            "inventory:update",
        ],
    ),
    (
        "ROLE_CONTENT_MODERATOR",
        &["content:create", "content:read", "content:update", "content:delete"],
    ),
];

const PROFILES: &[(&str, &[&str])] = &[
    ("CUSTOMER", &["ROLE_CUSTOMER"]),
    ("SELLER", &["ROLE_SELLER"]),
    ("ADMIN", &["ROLE_ADMIN"]),
    ("COURIER", &["ROLE_DELIVERY_STAFF"]),
    ("GUEST", &["ROLE_GUEST"]),
];

/// The seed catalog as a document, e.g. for writing to a store.
pub fn default_document() -> CatalogDocument {
    CatalogDocument {
        permits: PERMITS
            .iter()
            .map(|(code, description)| Permit {
                code: PermitCode::new(*code),
                description: description.to_string(),
            })
            .collect(),
        roles: ROLES
            .iter()
            .map(|(name, permits)| Role {
                name: RoleName::new(*name),
                permits: permits.iter().map(|p| PermitCode::new(*p)).collect(),
            })
            .collect(),
        profiles: PROFILES
            .iter()
            .map(|(name, roles)| Profile {
                name: ProfileName::new(*name),
                roles: roles.iter().map(|r| RoleName::new(*r)).collect(),
            })
            .collect(),
    }
}

/// The seed catalog.
pub fn default_catalog() -> Result<PermissionCatalog, CatalogError> {
    PermissionCatalog::from_document(default_document())
}
