// SPDX-License-Identifier: MIT OR Apache-2.0
//! Role scoping.
//!
//! Every repository operation carries a [`RoleScope`]: a non-empty ordered
//! role list (primary role first) plus the subject recorded as `changed_by`
//! on mutations. The scope is threaded into every store call so visibility
//! is enforced at the store boundary, never client-side.

use crate::{RepoError, Result};

/// The implicit role used when no identity is present (operator and
/// automation contexts with authentication disabled).
pub const ADMIN_ROLE: &str = "ADMIN";

/// A resolved caller identity, as produced by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub subject: String,
    pub roles: Vec<String>,
}

/// The caller's effective roles, primary first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleScope {
    subject: String,
    roles: Vec<String>,
}

impl RoleScope {
    pub fn new(subject: impl Into<String>, roles: Vec<String>) -> Result<Self> {
        if roles.is_empty() {
            return Err(RepoError::Validation("role scope must not be empty".into()));
        }
        if roles.iter().any(String::is_empty) {
            return Err(RepoError::Validation(
                "role scope must not contain blank role keys".into(),
            ));
        }
        Ok(Self {
            subject: subject.into(),
            roles,
        })
    }

    /// Resolve a scope from an authenticated identity, or fall back to the
    /// implicit operator scope when authentication is disabled. An identity
    /// that resolved to zero roles is an authorization failure, not an
    /// operator fallback.
    pub fn from_identity(identity: Option<&Identity>) -> Result<Self> {
        match identity {
            None => Ok(Self::operator()),
            Some(id) => {
                if id.roles.is_empty() {
                    return Err(RepoError::Authorization(format!(
                        "identity '{}' resolved to no roles",
                        id.subject
                    )));
                }
                Self::new(id.subject.clone(), id.roles.clone())
            },
        }
    }

    /// The implicit admin scope for unauthenticated operator contexts.
    pub fn operator() -> Self {
        Self {
            subject: "operator".to_string(),
            roles: vec![ADMIN_ROLE.to_string()],
        }
    }

    /// The primary role, by convention the first element.
    pub fn primary(&self) -> &str {
        &self.roles[0]
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }
}
