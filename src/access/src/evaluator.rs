//! Access evaluation
//!
//! Reduces a feature's rule set to a single [`AccessLevel`] for one profile:
//!
//! 1. Superusers get `Master` unconditionally.
//! 2. Matching grant rules establish a ceiling (highest level wins).
//! 3. Matching limiter rules can only lower that ceiling (lowest level wins).
//!
//! A limiter never grants anything on its own: without a matching grant the
//! result is `None`.

use crate::types::{AccessLevel, AccessProfile, AccessRule, PrincipalKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Group and role ids believed to apply to a profile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipView {
    pub group_ids: HashSet<String>,
    pub role_ids: HashSet<String>,
}

impl MembershipView {
    pub fn new(
        group_ids: impl IntoIterator<Item = impl Into<String>>,
        role_ids: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            group_ids: group_ids.into_iter().map(Into::into).collect(),
            role_ids: role_ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// Whether `rule` applies to `profile` given its membership
pub fn rule_matches(rule: &AccessRule, profile: &AccessProfile, membership: &MembershipView) -> bool {
    match rule.kind {
        PrincipalKind::All => true,
        PrincipalKind::User => profile.principal_id.as_deref() == Some(rule.principal_id.as_str()),
        PrincipalKind::Group => membership.group_ids.contains(&rule.principal_id),
        PrincipalKind::Role => membership.role_ids.contains(&rule.principal_id),
    }
}

/// Evaluate the access level `profile` holds under `rules`
pub fn evaluate(
    rules: &[AccessRule],
    profile: &AccessProfile,
    membership: &MembershipView,
) -> AccessLevel {
    if profile.is_superuser {
        return AccessLevel::Master;
    }

    if rules.is_empty() || profile.is_unresolved() {
        return AccessLevel::None;
    }

    let (limiters, grants): (Vec<&AccessRule>, Vec<&AccessRule>) =
        rules.iter().partition(|rule| rule.is_limiter);

    let granted = grants
        .iter()
        .filter(|rule| rule_matches(rule, profile, membership))
        .map(|rule| rule.level)
        .max();

    let Some(granted) = granted else {
        return AccessLevel::None;
    };

    let limit = limiters
        .iter()
        .filter(|rule| rule_matches(rule, profile, membership))
        .map(|rule| rule.level)
        .min();

    match limit {
        Some(limit) => granted.min(limit),
        None => granted,
    }
}
