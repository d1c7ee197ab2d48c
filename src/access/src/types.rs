//! Core feature access types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique rule identifier, assigned by the store
pub type RuleId = i64;

/// Feature name (globally unique key)
pub type FeatureName = String;

/// Access level held over a feature
///
/// Levels are totally ordered: `None < Read < Write < Admin < Master`.
/// `Master` is never assigned by a rule; it is only derived from a
/// superuser profile.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum AccessLevel {
    #[default]
    None = 0,
    Read = 1,
    Write = 2,
    Admin = 3,
    Master = 4,
}

impl AccessLevel {
    /// Every level, lowest first
    pub const ALL: [AccessLevel; 5] = [
        AccessLevel::None,
        AccessLevel::Read,
        AccessLevel::Write,
        AccessLevel::Admin,
        AccessLevel::Master,
    ];

    /// Whether a rule may carry this level
    pub fn is_assignable(self) -> bool {
        self != AccessLevel::Master
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccessLevel::None => "none",
            AccessLevel::Read => "read",
            AccessLevel::Write => "write",
            AccessLevel::Admin => "admin",
            AccessLevel::Master => "master",
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(AccessLevel::None),
            "read" => Ok(AccessLevel::Read),
            "write" => Ok(AccessLevel::Write),
            "admin" => Ok(AccessLevel::Admin),
            "master" => Ok(AccessLevel::Master),
            other => Err(format!("unknown access level '{}'", other)),
        }
    }
}

/// How a rule matches a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrincipalKind {
    /// Matches every profile
    All,
    /// Matches the profile's own directory id
    User,
    /// Matches any of the profile's transitive group ids
    Group,
    /// Matches any of the profile's assigned role ids
    Role,
}

impl fmt::Display for PrincipalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PrincipalKind::All => "All",
            PrincipalKind::User => "User",
            PrincipalKind::Group => "Group",
            PrincipalKind::Role => "Role",
        };
        f.write_str(name)
    }
}

/// One row of access policy: a grant or a ceiling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRule {
    /// Store-assigned identifier
    pub id: RuleId,

    /// Principal kind
    pub kind: PrincipalKind,

    /// Human-readable label (mail for users/groups, name for roles)
    #[serde(default)]
    pub reference: String,

    /// Directory identifier matched against the profile (ignored for `All`)
    #[serde(default)]
    pub principal_id: String,

    /// Level granted, or the ceiling imposed when `is_limiter` is set
    pub level: AccessLevel,

    /// `false` grants, `true` limits
    #[serde(default)]
    pub is_limiter: bool,

    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_by: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl AccessRule {
    /// Create a grant rule
    pub fn grant(
        id: RuleId,
        kind: PrincipalKind,
        principal_id: impl Into<String>,
        level: AccessLevel,
    ) -> Self {
        Self {
            id,
            kind,
            reference: String::new(),
            principal_id: principal_id.into(),
            level,
            is_limiter: false,
            created_by: None,
            created_at: None,
            updated_by: None,
            updated_at: None,
        }
    }

    /// Create a limiter rule
    pub fn limit(
        id: RuleId,
        kind: PrincipalKind,
        principal_id: impl Into<String>,
        level: AccessLevel,
    ) -> Self {
        Self {
            is_limiter: true,
            ..Self::grant(id, kind, principal_id, level)
        }
    }

    /// Set the human-readable reference
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = reference.into();
        self
    }

    /// Whether `other` addresses the same principal in the same way.
    ///
    /// `All` rules share one key regardless of `principal_id`.
    pub fn same_natural_key(&self, other: &AccessRule) -> bool {
        natural_key_eq(self.kind, &self.principal_id, other.kind, &other.principal_id)
    }
}

/// `(kind, principal_id)` equality; `All` ignores the principal id
fn natural_key_eq(
    kind: PrincipalKind,
    principal_id: &str,
    other_kind: PrincipalKind,
    other_principal_id: &str,
) -> bool {
    kind == other_kind && (kind == PrincipalKind::All || principal_id == other_principal_id)
}

/// Administrative input for creating or replacing a rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDraft {
    pub kind: PrincipalKind,
    #[serde(default)]
    pub reference: String,
    #[serde(default)]
    pub principal_id: String,
    pub level: AccessLevel,
    #[serde(default)]
    pub is_limiter: bool,
}

impl RuleDraft {
    pub fn new(kind: PrincipalKind, principal_id: impl Into<String>, level: AccessLevel) -> Self {
        Self {
            kind,
            reference: String::new(),
            principal_id: principal_id.into(),
            level,
            is_limiter: false,
        }
    }

    /// Turn the draft into a limiter
    pub fn limiter(mut self) -> Self {
        self.is_limiter = true;
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = reference.into();
        self
    }

    /// Reject drafts that could never be evaluated meaningfully
    pub fn validate(&self) -> crate::error::Result<()> {
        if !self.level.is_assignable() {
            return Err(crate::error::AccessError::InvalidInput(
                "master level cannot be assigned by a rule".to_string(),
            ));
        }
        if self.kind != PrincipalKind::All && self.principal_id.trim().is_empty() {
            return Err(crate::error::AccessError::InvalidInput(format!(
                "{} rule requires a principal id",
                self.kind
            )));
        }
        Ok(())
    }

    /// Whether `rule` has the same natural key as this draft
    pub fn matches_key(&self, rule: &AccessRule) -> bool {
        natural_key_eq(self.kind, &self.principal_id, rule.kind, &rule.principal_id)
    }
}

/// A named feature and its rules
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureRuleSet {
    pub feature_name: FeatureName,
    #[serde(default)]
    pub rules: Vec<AccessRule>,
}

/// The subject of one access decision
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessProfile {
    /// Stable directory reference (absent when unresolved)
    pub principal_id: Option<String>,

    pub email: Option<String>,

    /// Superusers evaluate to `Master` on every feature
    #[serde(default)]
    pub is_superuser: bool,
}

impl AccessProfile {
    pub fn new(principal_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            principal_id: Some(principal_id.into()),
            email: Some(email.into()),
            is_superuser: false,
        }
    }

    /// Profile for an identity that could not be resolved
    pub fn unresolved() -> Self {
        Self::default()
    }

    pub fn superuser(mut self) -> Self {
        self.is_superuser = true;
        self
    }

    /// Neither a principal id nor an email is known
    pub fn is_unresolved(&self) -> bool {
        self.principal_id.is_none() && self.email.is_none()
    }
}

/// Inbound identity claims carried by a request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(default)]
    pub email: Option<String>,

    /// Fallback login name when no email claim is present
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub roles: Vec<String>,
}

impl Identity {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            name: None,
            roles: Vec::new(),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    /// Email claim, falling back to the identity name
    pub fn login(&self) -> Option<&str> {
        self.email
            .as_deref()
            .or(self.name.as_deref())
            .filter(|login| !login.is_empty())
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Carries at least one role and is not marked external
    pub fn is_internal(&self, external_role: &str) -> bool {
        !self.roles.is_empty() && !self.has_role(external_role)
    }
}

/// Outcome of one access check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessDecision {
    /// Unique decision identifier
    pub id: String,

    pub feature: FeatureName,

    /// Minimum level the caller asked for
    pub required: AccessLevel,

    /// Level the identity actually holds
    pub level: AccessLevel,

    pub allowed: bool,

    pub timestamp: DateTime<Utc>,
}

impl AccessDecision {
    pub fn new(feature: impl Into<String>, required: AccessLevel, level: AccessLevel) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            feature: feature.into(),
            required,
            level,
            allowed: level >= required,
            timestamp: Utc::now(),
        }
    }

    /// Decision that bypasses rule evaluation
    pub fn bypass(feature: impl Into<String>, required: AccessLevel) -> Self {
        Self {
            allowed: true,
            ..Self::new(feature, required, required)
        }
    }

    pub fn deny(feature: impl Into<String>, required: AccessLevel) -> Self {
        Self {
            allowed: false,
            ..Self::new(feature, required, AccessLevel::None)
        }
    }
}
