//! Role-based authorization for schema fields, types and mutations.
//!
//! A requirement is an AND of groups where each group is an OR of roles:
//! `[[admin], [editor, author]]` demands `admin` plus one of `editor` or
//! `author`.

use log::warn;

use crate::compiler::CompileError;

/// Claim type roles are read from unless a claim set says otherwise.
pub const DEFAULT_ROLE_CLAIM_TYPE: &str = "role";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizationRequirement {
    groups: Vec<Vec<String>>,
}

impl AuthorizationRequirement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a group satisfied by any one of `roles`.
    pub fn require_any<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.push(roles.into_iter().map(Into::into).collect());
        self
    }

    pub fn require(self, role: impl Into<String>) -> Self {
        self.require_any([role.into()])
    }

    pub fn groups(&self) -> &[Vec<String>] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Groups none of whose roles are held by `claims`.
    pub fn unmet(&self, claims: &ClaimSet) -> Vec<Vec<String>> {
        self.groups
            .iter()
            .filter(|group| !group.iter().any(|role| claims.has_role(role)))
            .cloned()
            .collect()
    }
}

/// Claims of the caller a document is compiled for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimSet {
    role_claim_type: String,
    claims: Vec<(String, String)>,
}

impl Default for ClaimSet {
    fn default() -> Self {
        ClaimSet {
            role_claim_type: DEFAULT_ROLE_CLAIM_TYPE.to_string(),
            claims: Vec::new(),
        }
    }
}

impl ClaimSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim set holding the given roles under the default role claim type.
    pub fn with_roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        roles
            .into_iter()
            .fold(ClaimSet::new(), |claims, role| claims.with_role(role))
    }

    pub fn with_role_claim_type(mut self, claim_type: impl Into<String>) -> Self {
        self.role_claim_type = claim_type.into();
        self
    }

    pub fn with_claim(mut self, claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        self.claims.push((claim_type.into(), value.into()));
        self
    }

    pub fn with_role(self, role: impl Into<String>) -> Self {
        let claim_type = self.role_claim_type.clone();
        self.with_claim(claim_type, role)
    }

    pub fn role_claim_type(&self) -> &str {
        &self.role_claim_type
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.claims
            .iter()
            .any(|(t, v)| *t == self.role_claim_type && v == role)
    }
}

/// Checks `requirement` for `target`. No requirement, or an empty one,
/// always passes.
pub fn authorize(
    target: &str,
    requirement: Option<&AuthorizationRequirement>,
    claims: &ClaimSet,
) -> Result<(), CompileError> {
    let Some(requirement) = requirement else {
        return Ok(());
    };
    let unmet = requirement.unmet(claims);
    if unmet.is_empty() {
        Ok(())
    } else {
        warn!("authorization denied for '{}': unmet role groups {:?}", target, unmet);
        Err(CompileError::Authorization {
            target: target.to_string(),
            unmet,
        })
    }
}
