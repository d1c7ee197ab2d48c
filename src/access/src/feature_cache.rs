//! Process-wide index from feature name to its access rules
//!
//! Reads vastly outnumber writes. Every mutation takes the single write lock;
//! readers take the read lock only long enough to clone an `Arc` snapshot.
//! Rule lists are copy-on-write (`Arc::make_mut`), so a snapshot handed to an
//! evaluation is never modified underneath it.

use crate::types::{AccessRule, FeatureName, RuleId};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Snapshot of one feature's rules
pub type RuleSnapshot = Arc<Vec<AccessRule>>;

/// In-memory feature access cache
#[derive(Debug, Default)]
pub struct FeatureAccessCache {
    features: RwLock<BTreeMap<FeatureName, RuleSnapshot>>,
}

impl FeatureAccessCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an empty rule list for `feature` if absent.
    ///
    /// Returns `true` when the feature was created.
    pub fn ensure_feature(&self, feature: &str) -> bool {
        let mut features = self.features.write();
        if features.contains_key(feature) {
            return false;
        }
        features.insert(feature.to_string(), Arc::default());
        debug!(feature = %feature, "Feature registered");
        true
    }

    /// Replace any rule with the same natural key, then append `rule`
    pub fn upsert(&self, feature: &str, rule: AccessRule) {
        let mut features = self.features.write();
        let rules = Arc::make_mut(features.entry(feature.to_string()).or_default());
        rules.retain(|existing| !existing.same_natural_key(&rule));
        debug!(feature = %feature, rule_id = rule.id, kind = %rule.kind, "Rule upserted");
        rules.push(rule);
    }

    /// Remove the rule with `rule_id` from whichever feature owns it
    pub fn remove(&self, rule_id: RuleId) -> bool {
        let mut features = self.features.write();
        for (feature, rules) in features.iter_mut() {
            if rules.iter().any(|rule| rule.id == rule_id) {
                Arc::make_mut(rules).retain(|rule| rule.id != rule_id);
                debug!(feature = %feature, rule_id, "Rule removed");
                return true;
            }
        }
        false
    }

    /// Current rules of `feature`; empty for unknown features
    pub fn get(&self, feature: &str) -> RuleSnapshot {
        self.features.read().get(feature).cloned().unwrap_or_default()
    }

    /// Owning feature and current value of a rule
    pub fn find_rule(&self, rule_id: RuleId) -> Option<(FeatureName, AccessRule)> {
        let features = self.features.read();
        features.iter().find_map(|(feature, rules)| {
            rules
                .iter()
                .find(|rule| rule.id == rule_id)
                .map(|rule| (feature.clone(), rule.clone()))
        })
    }

    /// Load persisted rule sets, collapsing duplicate natural keys
    pub fn load<I>(&self, rule_sets: I)
    where
        I: IntoIterator<Item = (FeatureName, Vec<AccessRule>)>,
    {
        for (feature, rules) in rule_sets {
            self.ensure_feature(&feature);
            for rule in rules {
                self.upsert(&feature, rule);
            }
        }
    }

    pub fn contains(&self, feature: &str) -> bool {
        self.features.read().contains_key(feature)
    }

    /// Known feature names, sorted
    pub fn features(&self) -> Vec<FeatureName> {
        self.features.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.features.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.read().is_empty()
    }
}
