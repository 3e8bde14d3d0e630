//! Authorization decisions. Every check matches exhaustively on the closed
//! `Role` enum so a new role cannot silently pass a guard.

use crate::auth::{Claims, Role};
use crate::error::ApiError;
use crate::models::{Category, Id};

/// Pass only if the identity holds the given role.
pub fn require_role(claims: &Claims, allowed: Role) -> Result<(), ApiError> {
    match (claims.role, allowed) {
        (Role::Admin, Role::Admin) | (Role::User, Role::User) => Ok(()),
        // admins implicitly satisfy a plain-user requirement
        (Role::Admin, Role::User) => Ok(()),
        (Role::User, Role::Admin) => Err(ApiError::Forbidden),
    }
}

/// Pass if the identity authored the resource, or is an admin.
pub fn require_owner_or_admin(claims: &Claims, author_id: Id) -> Result<(), ApiError> {
    match claims.role {
        Role::Admin => Ok(()),
        Role::User => {
            if claims.sub == author_id {
                Ok(())
            } else {
                Err(ApiError::Forbidden)
            }
        }
    }
}

/// Privileged categories (notices) may only be touched by admins, regardless
/// of authorship. Evaluated in addition to the ownership check, never in
/// place of it.
pub fn require_category_privilege(claims: &Claims, category: Category) -> Result<(), ApiError> {
    if !category.is_privileged() {
        return Ok(());
    }
    match claims.role {
        Role::Admin => Ok(()),
        Role::User => Err(ApiError::Forbidden),
    }
}
