//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use cretoai_access::{
    AccessError, AccessProfile, AccessRule, AccessStore, DirectoryService, FeatureName, Identity,
    InMemoryAccessStore, Result, RuleDraft, RuleId, SavedRule, StaticDirectory,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Directory wrapper that counts calls and can be made to fail or stall
#[derive(Default)]
pub struct FlakyDirectory {
    pub inner: StaticDirectory,
    calls: AtomicUsize,
    failing: AtomicBool,
    delay_ms: AtomicU64,
}

impl FlakyDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    async fn before_call(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(AccessError::Directory("directory unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DirectoryService for FlakyDirectory {
    async fn transitive_group_ids(&self, email: &str) -> Result<HashSet<String>> {
        self.before_call().await?;
        self.inner.transitive_group_ids(email).await
    }

    async fn assigned_role_ids(&self, email: &str) -> Result<HashSet<String>> {
        self.before_call().await?;
        self.inner.assigned_role_ids(email).await
    }
}

/// Store wrapper whose writes can be made to fail
#[derive(Default)]
pub struct FlakyStore {
    pub inner: InMemoryAccessStore,
    failing_writes: AtomicBool,
    failing_reads: AtomicBool,
    stall_next_save_ms: AtomicU64,
}

impl FlakyStore {
    pub fn new(inner: InMemoryAccessStore) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failing_writes: AtomicBool::new(false),
            failing_reads: AtomicBool::new(false),
            stall_next_save_ms: AtomicU64::new(0),
        })
    }

    pub fn set_failing_writes(&self, failing: bool) {
        self.failing_writes.store(failing, Ordering::SeqCst);
    }

    pub fn set_failing_reads(&self, failing: bool) {
        self.failing_reads.store(failing, Ordering::SeqCst);
    }

    /// Hold the next successful save for `delay` before returning it
    pub fn stall_next_save(&self, delay: Duration) {
        self.stall_next_save_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    fn check_write(&self) -> Result<()> {
        if self.failing_writes.load(Ordering::SeqCst) {
            return Err(AccessError::Persistence("database offline".to_string()));
        }
        Ok(())
    }

    fn check_read(&self) -> Result<()> {
        if self.failing_reads.load(Ordering::SeqCst) {
            return Err(AccessError::Persistence("database offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AccessStore for FlakyStore {
    async fn load_all_feature_rule_sets(&self) -> Result<BTreeMap<FeatureName, Vec<AccessRule>>> {
        self.check_read()?;
        self.inner.load_all_feature_rule_sets().await
    }

    async fn create_feature(&self, feature: &str) -> Result<()> {
        self.check_write()?;
        self.inner.create_feature(feature).await
    }

    async fn save_rule(&self, feature: &str, draft: &RuleDraft, actor: &str) -> Result<SavedRule> {
        self.check_write()?;
        let saved = self.inner.save_rule(feature, draft, actor).await?;

        let stall = self.stall_next_save_ms.swap(0, Ordering::SeqCst);
        if stall > 0 {
            tokio::time::sleep(Duration::from_millis(stall)).await;
        }
        Ok(saved)
    }

    async fn delete_rule(&self, rule_id: RuleId) -> Result<bool> {
        self.check_write()?;
        self.inner.delete_rule(rule_id).await
    }

    async fn resolve_profile(&self, identity: &Identity) -> Result<Option<AccessProfile>> {
        self.check_read()?;
        self.inner.resolve_profile(identity).await
    }
}
