use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque tenant ("empresa") identifier.
///
/// Compared byte-for-byte; no normalization is applied. Bound into the
/// database as a text parameter, so any format the row-scoping policy
/// understands (usually a UUID) is carried through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Wraps a raw identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TenantId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Authenticated principal produced by the authentication stage.
///
/// The tenant claim has historically been emitted as `empresa_id` and as
/// `empresaId`; both spellings deserialize into [`Principal::tenant_id`].
/// An empty string is treated the same as a missing claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Unique identifier for the authenticated entity.
    #[serde(alias = "sub")]
    pub id: String,
    /// Roles assigned to this principal for authorization checks.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Tenant the principal belongs to. `None` for platform-level principals.
    #[serde(
        default,
        rename = "tenant_id",
        alias = "empresa_id",
        alias = "empresaId",
        deserialize_with = "non_empty_tenant"
    )]
    pub tenant_id: Option<TenantId>,
}

impl Principal {
    /// Returns the tenant this principal is scoped to, if any.
    #[must_use]
    pub fn tenant(&self) -> Option<&TenantId> {
        self.tenant_id.as_ref()
    }

    /// Whether `role` is among this principal's roles. Exact match.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

fn non_empty_tenant<'de, D>(deserializer: D) -> Result<Option<TenantId>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(TenantId))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_id_display_and_eq() {
        let a = TenantId::new("7b0c");
        assert_eq!(a.to_string(), "7b0c");
        assert_eq!(a, TenantId::from("7b0c"));
        assert_ne!(a, TenantId::from("7B0C"));
    }

    #[test]
    fn principal_accepts_snake_case_claim() {
        let p: Principal =
            serde_json::from_str(r#"{"id":"u1","roles":["admin"],"empresa_id":"t-1"}"#).unwrap();
        assert_eq!(p.tenant(), Some(&TenantId::from("t-1")));
        assert_eq!(p.roles, vec!["admin".to_string()]);
    }

    #[test]
    fn has_role_matches_exactly() {
        let p: Principal = serde_json::from_str(r#"{"id":"u1","roles":["admin","vendedor"]}"#).unwrap();
        assert!(p.has_role("admin"));
        assert!(p.has_role("vendedor"));
        assert!(!p.has_role("Admin"));
        assert!(!p.has_role("gerente"));
    }

    #[test]
    fn principal_accepts_camel_case_claim() {
        let p: Principal = serde_json::from_str(r#"{"sub":"u2","empresaId":"t-2"}"#).unwrap();
        assert_eq!(p.id, "u2");
        assert_eq!(p.tenant(), Some(&TenantId::from("t-2")));
        assert!(p.roles.is_empty());
    }

    #[test]
    fn principal_without_claim_is_unscoped() {
        let p: Principal = serde_json::from_str(r#"{"id":"root"}"#).unwrap();
        assert!(p.tenant().is_none());
    }

    #[test]
    fn blank_claim_is_unscoped() {
        let p: Principal = serde_json::from_str(r#"{"id":"u3","empresa_id":"  "}"#).unwrap();
        assert!(p.tenant().is_none());
    }

    #[test]
    fn principal_serializes_canonical_field() {
        let p = Principal {
            id: "u4".to_string(),
            roles: Vec::new(),
            tenant_id: Some(TenantId::from("t-4")),
        };
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["tenant_id"], "t-4");
    }
}
