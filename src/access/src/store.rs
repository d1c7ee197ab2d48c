//! Persistence of feature rule sets and account profiles

use crate::error::{AccessError, Result};
use crate::types::{AccessProfile, AccessRule, FeatureName, Identity, RuleDraft, RuleId};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Whether a save created or replaced a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleChange {
    Added,
    Updated,
}

/// Result of [`AccessStore::save_rule`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedRule {
    pub rule: AccessRule,
    pub change: RuleChange,
}

/// Internal account linking a login to its directory reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub email: String,

    /// Directory reference id of the account
    pub principal_id: String,

    #[serde(default)]
    pub display_name: Option<String>,

    /// Superuser role stored with the account
    #[serde(default)]
    pub is_superuser: bool,
}

impl Account {
    pub fn new(email: impl Into<String>, principal_id: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            principal_id: principal_id.into(),
            display_name: None,
            is_superuser: false,
        }
    }

    pub fn profile(&self) -> AccessProfile {
        AccessProfile {
            principal_id: Some(self.principal_id.clone()),
            email: Some(self.email.clone()),
            is_superuser: self.is_superuser,
        }
    }
}

/// Serialized store contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub features: BTreeMap<FeatureName, Vec<AccessRule>>,
    #[serde(default)]
    pub accounts: Vec<Account>,
}

/// Persistence capability consumed by the access service
#[async_trait]
pub trait AccessStore: Send + Sync {
    /// Every feature with its rules
    async fn load_all_feature_rule_sets(&self) -> Result<BTreeMap<FeatureName, Vec<AccessRule>>>;

    /// Create an empty feature; succeeds if it already exists
    async fn create_feature(&self, feature: &str) -> Result<()>;

    /// Insert a rule, or update the feature's rule with the same natural key
    async fn save_rule(&self, feature: &str, draft: &RuleDraft, actor: &str) -> Result<SavedRule>;

    /// Delete a rule by id; `false` if it did not exist
    async fn delete_rule(&self, rule_id: RuleId) -> Result<bool>;

    /// Resolve inbound claims to the stored account's profile
    async fn resolve_profile(&self, identity: &Identity) -> Result<Option<AccessProfile>>;
}

/// In-memory store implementation
pub struct InMemoryAccessStore {
    features: Arc<RwLock<BTreeMap<FeatureName, Vec<AccessRule>>>>,
    accounts: Arc<RwLock<HashMap<String, Account>>>,
    next_id: AtomicI64,
}

impl InMemoryAccessStore {
    pub fn new() -> Self {
        Self {
            features: Arc::new(RwLock::new(BTreeMap::new())),
            accounts: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let next_id = snapshot
            .features
            .values()
            .flatten()
            .map(|rule| rule.id)
            .max()
            .unwrap_or(0)
            + 1;

        let accounts = snapshot
            .accounts
            .into_iter()
            .map(|account| (account.email.to_lowercase(), account))
            .collect();

        Self {
            features: Arc::new(RwLock::new(snapshot.features)),
            accounts: Arc::new(RwLock::new(accounts)),
            next_id: AtomicI64::new(next_id),
        }
    }

    pub async fn add_account(&self, account: Account) {
        let mut accounts = self.accounts.write().await;
        accounts.insert(account.email.to_lowercase(), account);
    }

    pub async fn feature_rules(&self, feature: &str) -> Option<Vec<AccessRule>> {
        self.features.read().await.get(feature).cloned()
    }
}

impl Default for InMemoryAccessStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccessStore for InMemoryAccessStore {
    async fn load_all_feature_rule_sets(&self) -> Result<BTreeMap<FeatureName, Vec<AccessRule>>> {
        Ok(self.features.read().await.clone())
    }

    async fn create_feature(&self, feature: &str) -> Result<()> {
        let mut features = self.features.write().await;
        features.entry(feature.to_string()).or_default();
        Ok(())
    }

    async fn save_rule(&self, feature: &str, draft: &RuleDraft, actor: &str) -> Result<SavedRule> {
        let mut features = self.features.write().await;
        let rules = features
            .get_mut(feature)
            .ok_or_else(|| AccessError::FeatureNotFound(feature.to_string()))?;

        let now = Utc::now();

        if let Some(existing) = rules.iter_mut().find(|rule| draft.matches_key(rule)) {
            existing.level = draft.level;
            existing.is_limiter = draft.is_limiter;
            if !draft.reference.is_empty() {
                existing.reference = draft.reference.clone();
            }
            existing.updated_by = Some(actor.to_string());
            existing.updated_at = Some(now);

            return Ok(SavedRule {
                rule: existing.clone(),
                change: RuleChange::Updated,
            });
        }

        let rule = AccessRule {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            kind: draft.kind,
            reference: draft.reference.clone(),
            principal_id: draft.principal_id.clone(),
            level: draft.level,
            is_limiter: draft.is_limiter,
            created_by: Some(actor.to_string()),
            created_at: Some(now),
            updated_by: None,
            updated_at: None,
        };
        rules.push(rule.clone());

        Ok(SavedRule {
            rule,
            change: RuleChange::Added,
        })
    }

    async fn delete_rule(&self, rule_id: RuleId) -> Result<bool> {
        let mut features = self.features.write().await;
        for rules in features.values_mut() {
            if let Some(index) = rules.iter().position(|rule| rule.id == rule_id) {
                rules.remove(index);
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn resolve_profile(&self, identity: &Identity) -> Result<Option<AccessProfile>> {
        let Some(login) = identity.login() else {
            return Ok(None);
        };

        let accounts = self.accounts.read().await;
        Ok(accounts.get(&login.to_lowercase()).map(Account::profile))
    }
}
