//! Authorization decision point
//!
//! Composes the feature cache, the membership cache and the evaluator to
//! answer "may this identity use this feature at this level". Decisions are
//! read-only over both caches; no lock spans the two, so one decision may see
//! slightly different snapshots of each.
//!
//! # Pipeline
//!
//! ```text
//! Identity → [global internal switch] → [exemption list]
//!          → AccessStore::resolve_profile → MembershipCache::view
//!          → FeatureAccessCache::get → evaluate → level >= minimum
//! ```
//!
//! Administrative rule changes write through the store first and only touch
//! the cache once the store has accepted them. One admin lock spans both
//! steps, so the cache applies changes in the order the store did.

use crate::config::AccessConfig;
use crate::directory::DirectoryService;
use crate::error::{AccessError, Result};
use crate::evaluator::{evaluate, MembershipView};
use crate::feature_cache::{FeatureAccessCache, RuleSnapshot};
use crate::membership::{Member, MembershipCache};
use crate::store::{AccessStore, SavedRule};
use crate::types::{AccessDecision, AccessLevel, AccessProfile, FeatureName, Identity, RuleDraft, RuleId};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Feature access decision point
pub struct AccessService {
    config: AccessConfig,
    store: Arc<dyn AccessStore>,
    features: Arc<FeatureAccessCache>,
    membership: MembershipCache,

    /// Serializes store write + cache update of admin mutations
    admin_lock: Mutex<()>,
}

impl AccessService {
    /// Create a service with fresh caches
    pub fn new(
        config: AccessConfig,
        store: Arc<dyn AccessStore>,
        directory: Arc<dyn DirectoryService>,
    ) -> Self {
        let membership = MembershipCache::from_config(directory, &config);
        Self::with_caches(config, store, Arc::new(FeatureAccessCache::new()), membership)
    }

    /// Create a service over caches owned by the caller
    pub fn with_caches(
        config: AccessConfig,
        store: Arc<dyn AccessStore>,
        features: Arc<FeatureAccessCache>,
        membership: MembershipCache,
    ) -> Self {
        Self {
            config,
            store,
            features,
            membership,
            admin_lock: Mutex::new(()),
        }
    }

    /// Populate the feature cache from the store and create declared
    /// features that are missing in either.
    pub async fn bootstrap(&self) -> Result<()> {
        let rule_sets = self.store.load_all_feature_rule_sets().await?;
        let loaded = rule_sets.len();
        let persisted: HashSet<FeatureName> = rule_sets.keys().cloned().collect();
        self.features.load(rule_sets);

        let mut created = 0;
        for feature in &self.config.declared_features {
            if persisted.contains(feature) {
                continue;
            }
            self.store.create_feature(feature).await?;
            self.features.ensure_feature(feature);
            created += 1;
        }

        info!(loaded, created, "Feature access cache bootstrapped");
        Ok(())
    }

    /// Resolve claims to a profile; failures yield the unresolved profile
    pub async fn resolve_profile(&self, identity: &Identity) -> AccessProfile {
        let mut profile = match self.store.resolve_profile(identity).await {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                debug!(login = ?identity.login(), "No account for identity");
                AccessProfile::unresolved()
            }
            Err(e) => {
                warn!(login = ?identity.login(), error = %e, "Profile resolution failed");
                AccessProfile::unresolved()
            }
        };

        if identity.has_role(&self.config.superuser_role) {
            profile.is_superuser = true;
        }

        profile
    }

    /// Full decision for `identity` on `feature` at `minimum`
    pub async fn check(&self, identity: &Identity, feature: &str, minimum: AccessLevel) -> AccessDecision {
        if self.config.global_internal_access {
            return if identity.is_internal(&self.config.external_role) {
                AccessDecision::bypass(feature, minimum)
            } else {
                debug!(feature = %feature, "Denied by global internal access");
                AccessDecision::deny(feature, minimum)
            };
        }

        if self.config.is_exempt(feature) {
            return AccessDecision::bypass(feature, minimum);
        }

        let profile = self.resolve_profile(identity).await;
        let level = self.evaluate_profile(&profile, feature).await;
        let decision = AccessDecision::new(feature, minimum, level);

        debug!(
            feature = %feature,
            principal = ?profile.principal_id,
            %level,
            required = %minimum,
            allowed = decision.allowed,
            "Access decision"
        );

        decision
    }

    /// Whether `identity` holds at least `minimum` on `feature`
    pub async fn has_access(&self, identity: &Identity, feature: &str, minimum: AccessLevel) -> bool {
        self.check(identity, feature, minimum).await.allowed
    }

    /// Level `identity` holds on `feature`, by rules alone
    pub async fn access_level(&self, identity: &Identity, feature: &str) -> AccessLevel {
        let profile = self.resolve_profile(identity).await;
        self.evaluate_profile(&profile, feature).await
    }

    /// Level an already resolved profile holds on `feature`
    pub async fn evaluate_profile(&self, profile: &AccessProfile, feature: &str) -> AccessLevel {
        let membership = match Member::from_profile(profile) {
            Some(member) if !profile.is_superuser => self.membership.view(&member).await,
            _ => MembershipView::empty(),
        };

        let rules = self.features.get(feature);
        evaluate(&rules, profile, &membership)
    }

    /// Declared features on which `identity` holds at least `minimum`,
    /// in declaration order
    pub async fn accessible_features(&self, identity: &Identity, minimum: AccessLevel) -> Vec<FeatureName> {
        if self.config.global_internal_access {
            return if identity.is_internal(&self.config.external_role) {
                self.config.declared_features.clone()
            } else {
                Vec::new()
            };
        }

        let profile = self.resolve_profile(identity).await;
        let mut accessible = Vec::new();
        for feature in &self.config.declared_features {
            if self.config.is_exempt(feature) || self.evaluate_profile(&profile, feature).await >= minimum {
                accessible.push(feature.clone());
            }
        }
        accessible
    }

    /// Declared features `identity` may administer
    pub async fn manageable_features(&self, identity: &Identity) -> Vec<FeatureName> {
        self.accessible_features(identity, AccessLevel::Admin).await
    }

    /// Refresh the identity's group and role membership, as done at login
    pub async fn sync_membership(&self, identity: &Identity, force: bool) -> bool {
        let profile = self.resolve_profile(identity).await;
        match Member::from_profile(&profile) {
            Some(member) => self.membership.sync(&member, force).await,
            None => false,
        }
    }

    /// Create or replace a rule on `feature` on behalf of `actor`
    pub async fn put_rule(&self, actor: &Identity, feature: &str, draft: RuleDraft) -> Result<SavedRule> {
        draft.validate()?;
        if !self.features.contains(feature) {
            return Err(AccessError::FeatureNotFound(feature.to_string()));
        }

        let actor_login = self.require_level(actor, feature, AccessLevel::Admin).await?;

        let saved = {
            let _guard = self.admin_lock.lock().await;
            let saved = self.store.save_rule(feature, &draft, &actor_login).await?;
            self.features.upsert(feature, saved.rule.clone());
            saved
        };

        info!(
            feature = %feature,
            rule_id = saved.rule.id,
            kind = %saved.rule.kind,
            level = %saved.rule.level,
            limiter = saved.rule.is_limiter,
            change = ?saved.change,
            actor = %actor_login,
            "Access rule saved"
        );

        Ok(saved)
    }

    /// Delete a rule on behalf of `actor`
    pub async fn delete_rule(&self, actor: &Identity, rule_id: RuleId) -> Result<()> {
        let (feature, _) = self
            .features
            .find_rule(rule_id)
            .ok_or(AccessError::RuleNotFound(rule_id))?;

        let actor_login = self.require_level(actor, &feature, AccessLevel::Admin).await?;

        {
            let _guard = self.admin_lock.lock().await;
            if !self.store.delete_rule(rule_id).await? {
                warn!(feature = %feature, rule_id, "Rule missing from store, dropping cached copy");
            }
            self.features.remove(rule_id);
        }

        info!(feature = %feature, rule_id, actor = %actor_login, "Access rule deleted");
        Ok(())
    }

    /// Current rules of `feature`
    pub fn rules(&self, feature: &str) -> RuleSnapshot {
        self.features.get(feature)
    }

    pub fn config(&self) -> &AccessConfig {
        &self.config
    }

    pub fn feature_cache(&self) -> &Arc<FeatureAccessCache> {
        &self.features
    }

    pub fn membership_cache(&self) -> &MembershipCache {
        &self.membership
    }

    async fn require_level(&self, actor: &Identity, feature: &str, required: AccessLevel) -> Result<String> {
        let profile = self.resolve_profile(actor).await;
        let level = self.evaluate_profile(&profile, feature).await;

        if level < required {
            warn!(feature = %feature, login = ?actor.login(), %level, "Insufficient access level");
            return Err(AccessError::Forbidden {
                feature: feature.to_string(),
                required,
            });
        }

        Ok(actor
            .login()
            .map(str::to_string)
            .or(profile.email)
            .unwrap_or_else(|| "unknown".to_string()))
    }
}
