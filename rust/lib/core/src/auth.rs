//! Capability checks at the HTTP boundary.
//!
//! Business modules do NOT depend on any specific auth scheme. Routers only
//! know this trait; the concrete implementation is injected at startup.

use std::collections::HashMap;

use axum::http::HeaderMap;

use crate::ServiceError;

/// Pluggable authenticator. Routers call this before every handler with
/// the permission the endpoint requires, e.g. `"stock:ledger:write"`.
pub trait Authenticator: Send + Sync + 'static {
    /// Authenticate a request and check the given permission.
    ///
    /// Returns `Ok(())` if allowed, `Err(ServiceError)` if denied.
    fn check(&self, headers: &HeaderMap, permission: &str) -> Result<(), ServiceError>;
}

/// A no-op authenticator that allows everything. Used for testing
/// and for single-operator deployments.
pub struct AllowAll;

impl Authenticator for AllowAll {
    fn check(&self, _headers: &HeaderMap, _permission: &str) -> Result<(), ServiceError> {
        Ok(())
    }
}

/// An authenticator that denies everything. Used for testing.
pub struct DenyAll;

impl Authenticator for DenyAll {
    fn check(&self, _headers: &HeaderMap, _permission: &str) -> Result<(), ServiceError> {
        Err(ServiceError::PermissionDenied("access denied".into()))
    }
}

/// Bearer-token authenticator with a static grant table.
///
/// Each token maps to a list of permission patterns. A pattern matches a
/// permission exactly, or by prefix when it ends in `*`
/// (`"stock:*"` grants `"stock:ledger:write"`). An administrator token is
/// simply one granted `"*"`.
pub struct TokenAuthenticator {
    grants: HashMap<String, Vec<String>>,
}

impl TokenAuthenticator {
    pub fn new(grants: HashMap<String, Vec<String>>) -> Self {
        Self { grants }
    }

    fn bearer(headers: &HeaderMap) -> Option<&str> {
        headers
            .get(axum::http::header::AUTHORIZATION)?
            .to_str()
            .ok()?
            .strip_prefix("Bearer ")
    }
}

fn pattern_allows(pattern: &str, permission: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => permission.starts_with(prefix),
        None => pattern == permission,
    }
}

impl Authenticator for TokenAuthenticator {
    fn check(&self, headers: &HeaderMap, permission: &str) -> Result<(), ServiceError> {
        let token = Self::bearer(headers)
            .ok_or_else(|| ServiceError::Unauthorized("missing bearer token".into()))?;
        let patterns = self
            .grants
            .get(token)
            .ok_or_else(|| ServiceError::Unauthorized("unknown token".into()))?;
        if patterns.iter().any(|p| pattern_allows(p, permission)) {
            Ok(())
        } else {
            Err(ServiceError::PermissionDenied(format!(
                "missing permission {permission}"
            )))
        }
    }
}
