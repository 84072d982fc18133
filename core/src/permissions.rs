//! Coarse permission levels and fine-grained scope matching.
//!
//! Permissions form a total order (`read < write < execute < admin`): a
//! caller granted any level at or above the required one is authorized.
//! Scopes layer a string-based capability check underneath; they support
//! exact matches, a global `*` wildcard, and `prefix:*` containment.

use serde::{Deserialize, Serialize};

/// Coarse authorization level carried in every agent token.
///
/// Variant order is the authorization order; the derived `Ord` is load-bearing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
    Execute,
    Admin,
}

impl Permission {
    pub fn rank(self) -> u8 {
        match self {
            Permission::Read => 1,
            Permission::Write => 2,
            Permission::Execute => 3,
            Permission::Admin => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::Execute => "execute",
            Permission::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "read" => Some(Permission::Read),
            "write" => Some(Permission::Write),
            "execute" => Some(Permission::Execute),
            "admin" => Some(Permission::Admin),
            _ => None,
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// True iff any granted permission ranks at or above the required one.
pub fn has_permission(granted: &[Permission], required: Permission) -> bool {
    granted.iter().any(|p| p.rank() >= required.rank())
}

/// Single granted-scope vs required-scope check.
///
/// `*` grants everything; `prefix:*` grants `prefix` and anything under
/// `prefix:`. Empty strings never match.
pub fn scope_matches(granted: &str, required: &str) -> bool {
    let granted = granted.trim().to_lowercase();
    let required = required.trim().to_lowercase();
    if granted.is_empty() || required.is_empty() {
        return false;
    }
    if granted == "*" || granted == required {
        return true;
    }
    if let Some(prefix) = granted.strip_suffix(":*") {
        return required == prefix || required.starts_with(&format!("{prefix}:"));
    }
    false
}

/// True iff any granted scope satisfies the required scope.
pub fn has_scope(granted: &[String], required: &str) -> bool {
    granted.iter().any(|g| scope_matches(g, required))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_order_is_total() {
        assert!(Permission::Read < Permission::Write);
        assert!(Permission::Write < Permission::Execute);
        assert!(Permission::Execute < Permission::Admin);
        assert_eq!(Permission::Admin.rank(), 4);
    }

    #[test]
    fn higher_permission_satisfies_lower_requirement() {
        assert!(has_permission(&[Permission::Execute], Permission::Read));
        assert!(has_permission(&[Permission::Admin], Permission::Execute));
    }

    #[test]
    fn lower_permission_never_satisfies_higher_requirement() {
        assert!(!has_permission(&[Permission::Read], Permission::Execute));
        assert!(!has_permission(&[Permission::Write], Permission::Admin));
        assert!(!has_permission(&[], Permission::Read));
    }

    #[test]
    fn scope_matching_supports_exact_and_wildcards() {
        assert!(scope_matches("tools:search", "tools:search"));
        assert!(scope_matches("tools:*", "tools:checkout"));
        assert!(scope_matches("tools:*", "tools"));
        assert!(scope_matches("*", "resources:catalog"));
        assert!(!scope_matches("tools:search", "tools:checkout"));
        assert!(!scope_matches("tools", "tools:checkout"));
        assert!(!scope_matches("", "tools:search"));
        assert!(!scope_matches("tools:*", ""));
    }

    #[test]
    fn scope_matching_is_case_insensitive() {
        assert!(scope_matches("Tools:*", "tools:search"));
        assert!(scope_matches(" tools:search ", "TOOLS:SEARCH"));
    }

    #[test]
    fn has_scope_fails_closed_when_nothing_granted() {
        let granted: Vec<String> = Vec::new();
        assert!(!has_scope(&granted, "tools:search"));
    }

    #[test]
    fn permission_parse_roundtrip() {
        for p in [
            Permission::Read,
            Permission::Write,
            Permission::Execute,
            Permission::Admin,
        ] {
            assert_eq!(Permission::parse(p.as_str()), Some(p));
        }
        assert_eq!(Permission::parse("root"), None);
    }
}
