//! OAuth scope sets.
//!
//! [`ScopeSet`] keeps scopes in insertion order with their original casing
//! and compares them case-insensitively. The set algebra here decides which
//! cached access tokens satisfy a request and which ones a new token
//! supersedes.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigurationError;

/// Scopes added to every user-facing token request.
pub const OIDC_DEFAULT_SCOPES: [&str; 3] = ["openid", "profile", "offline_access"];

pub const OFFLINE_ACCESS_SCOPE: &str = "offline_access";

/// A normalized, case-insensitive set of OAuth scopes.
///
/// # Examples
///
/// ```
/// use credforge_core::ScopeSet;
///
/// let scopes: ScopeSet = "User.Read Mail.Read".parse().unwrap();
/// assert!(scopes.contains_scope("user.read"));
/// assert_eq!(scopes.print_scopes_lower_case(), "user.read mail.read");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeSet {
    scopes: Vec<String>,
}

impl ScopeSet {
    /// Build a scope set from a list of scopes.
    ///
    /// Entries are trimmed and empty entries dropped. An empty result is a
    /// configuration error.
    pub fn new<I, S>(scopes: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self { scopes: Vec::new() };
        set.append_scopes(scopes);
        if set.is_empty() {
            return Err(ConfigurationError::EmptyScopes);
        }
        Ok(set)
    }

    /// Build a scope set from a space-delimited scope string.
    pub fn from_scope_string(scopes: &str) -> Result<Self, ConfigurationError> {
        Self::new(scopes.split(' '))
    }

    /// Returns true if the scope is in the set, ignoring case.
    pub fn contains_scope(&self, scope: &str) -> bool {
        let scope = scope.trim();
        !scope.is_empty() && self.scopes.iter().any(|s| s.eq_ignore_ascii_case(scope))
    }

    /// Returns true if every scope of `other` is in this set.
    ///
    /// An empty `other` is never contained.
    pub fn contains_scope_set(&self, other: &ScopeSet) -> bool {
        if other.is_empty() {
            return false;
        }
        self.len() >= other.len() && other.scopes.iter().all(|s| self.contains_scope(s))
    }

    /// Returns true if the set holds nothing but default OIDC scopes.
    pub fn contains_only_oidc_scopes(&self) -> bool {
        let default_count = OIDC_DEFAULT_SCOPES
            .iter()
            .filter(|s| self.contains_scope(s))
            .count();
        self.len() == default_count
    }

    pub fn append_scope(&mut self, scope: &str) {
        let scope = scope.trim();
        if !scope.is_empty() && !self.contains_scope(scope) {
            self.scopes.push(scope.to_string());
        }
    }

    pub fn append_scopes<I, S>(&mut self, scopes: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for scope in scopes {
            self.append_scope(scope.as_ref());
        }
    }

    /// Remove a scope, ignoring case.
    pub fn remove_scope(&mut self, scope: &str) {
        let scope = scope.trim();
        self.scopes.retain(|s| !s.eq_ignore_ascii_case(scope));
    }

    pub fn remove_oidc_scopes(&mut self) {
        for scope in OIDC_DEFAULT_SCOPES {
            self.remove_scope(scope);
        }
    }

    /// Lower-cased union of both sets.
    pub fn union_scope_sets(&self, other: &ScopeSet) -> HashSet<String> {
        other
            .scopes
            .iter()
            .chain(self.scopes.iter())
            .map(|s| s.to_lowercase())
            .collect()
    }

    /// Returns true if the two sets overlap beyond default scopes.
    ///
    /// Default scopes are stripped from `other` unless `other` holds nothing
    /// else; this set keeps its defaults. The sets intersect when their union
    /// is smaller than the sum of their sizes.
    pub fn intersecting_scope_sets(&self, other: &ScopeSet) -> bool {
        let mut other = other.clone();
        if !other.contains_only_oidc_scopes() {
            other.remove_oidc_scopes();
        }
        let union = self.union_scope_sets(&other);
        union.len() < self.len() + other.len()
    }

    /// Space-delimited scopes in original case.
    pub fn print_scopes(&self) -> String {
        self.scopes.join(" ")
    }

    pub fn print_scopes_lower_case(&self) -> String {
        self.print_scopes().to_lowercase()
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn as_vec(&self) -> Vec<String> {
        self.scopes.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.scopes.iter().map(String::as_str)
    }
}

impl FromStr for ScopeSet {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_scope_string(s)
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.print_scopes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(s: &str) -> ScopeSet {
        ScopeSet::from_scope_string(s).unwrap()
    }

    #[test]
    fn test_construction_trims_and_drops_empties() {
        let scopes = ScopeSet::new(vec!["  User.Read ", "", "   ", "Mail.Read"]).unwrap();
        assert_eq!(scopes.as_vec(), vec!["User.Read", "Mail.Read"]);
    }

    #[test]
    fn test_construction_rejects_empty() {
        assert_eq!(
            ScopeSet::new(Vec::<String>::new()),
            Err(ConfigurationError::EmptyScopes)
        );
        assert_eq!(
            ScopeSet::from_scope_string("   "),
            Err(ConfigurationError::EmptyScopes)
        );
    }

    #[test]
    fn test_duplicates_collapse_case_insensitively() {
        let scopes = set("User.Read user.read USER.READ");
        assert_eq!(scopes.len(), 1);
        assert_eq!(scopes.print_scopes(), "User.Read");
    }

    #[test]
    fn test_contains_scope_ignores_case() {
        let scopes = set("User.Read");
        assert!(scopes.contains_scope("user.read"));
        assert!(!scopes.contains_scope(""));
        assert!(!scopes.contains_scope("mail.read"));
    }

    #[test]
    fn test_contains_scope_set() {
        let broad = set("User.Read Mail.Read Files.Read");
        let narrow = set("mail.read user.read");
        assert!(broad.contains_scope_set(&narrow));
        assert!(!narrow.contains_scope_set(&broad));

        let mut empty = set("openid");
        empty.remove_oidc_scopes();
        assert!(!broad.contains_scope_set(&empty));
    }

    #[test]
    fn test_contains_only_oidc_scopes() {
        assert!(set("openid profile").contains_only_oidc_scopes());
        assert!(set("OpenID offline_access").contains_only_oidc_scopes());
        assert!(!set("openid User.Read").contains_only_oidc_scopes());
    }

    #[test]
    fn test_union_is_lower_cased() {
        let union = set("User.Read").union_scope_sets(&set("user.read Mail.Read"));
        assert_eq!(union.len(), 2);
        assert!(union.contains("mail.read"));
    }

    #[test]
    fn test_intersecting_real_overlap() {
        let cached = set("User.Read Mail.Read");
        let incoming = set("mail.read Files.Read");
        assert!(cached.intersecting_scope_sets(&incoming));
    }

    #[test]
    fn test_intersecting_ignores_default_only_overlap() {
        let cached = set("openid profile User.Read");
        let incoming = set("openid profile Mail.Read");
        assert!(!cached.intersecting_scope_sets(&incoming));
    }

    #[test]
    fn test_intersecting_keeps_defaults_when_other_is_default_only() {
        let cached = set("openid profile");
        let incoming = set("openid");
        assert!(cached.intersecting_scope_sets(&incoming));
    }

    #[test]
    fn test_intersecting_does_not_mutate_argument() {
        let cached = set("User.Read");
        let incoming = set("openid User.Read");
        assert!(cached.intersecting_scope_sets(&incoming));
        assert_eq!(incoming.len(), 2);
    }

    #[test]
    fn test_disjoint_sets_do_not_intersect() {
        assert!(!set("User.Read").intersecting_scope_sets(&set("Mail.Send")));
    }

    #[test]
    fn test_print_scopes() {
        let scopes = set("User.Read Mail.Read");
        assert_eq!(scopes.print_scopes(), "User.Read Mail.Read");
        assert_eq!(scopes.print_scopes_lower_case(), "user.read mail.read");
        assert_eq!(scopes.to_string(), "User.Read Mail.Read");
    }
}
