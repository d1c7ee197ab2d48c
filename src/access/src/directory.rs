//! Directory service abstraction
//!
//! The directory is the source of truth for group and role membership. Calls
//! are slow and may fail; [`crate::membership::MembershipCache`] shields
//! evaluation from both.

use crate::error::{AccessError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Which membership set a refresh targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipKind {
    Group,
    Role,
}

/// Directory lookup capability
#[async_trait]
pub trait DirectoryService: Send + Sync {
    /// Ids of every group the identity belongs to, directly or transitively
    async fn transitive_group_ids(&self, email: &str) -> Result<HashSet<String>>;

    /// Ids of every application role assigned to the identity
    async fn assigned_role_ids(&self, email: &str) -> Result<HashSet<String>>;

    /// Dispatch on [`MembershipKind`]
    async fn membership_ids(&self, email: &str, kind: MembershipKind) -> Result<HashSet<String>> {
        match kind {
            MembershipKind::Group => self.transitive_group_ids(email).await,
            MembershipKind::Role => self.assigned_role_ids(email).await,
        }
    }
}

/// Membership of one directory entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    #[serde(default)]
    pub group_ids: HashSet<String>,
    #[serde(default)]
    pub role_ids: HashSet<String>,
}

/// In-memory directory keyed by email
pub struct StaticDirectory {
    entries: Arc<RwLock<HashMap<String, DirectoryEntry>>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn from_entries(entries: HashMap<String, DirectoryEntry>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(entries)),
        }
    }

    /// Replace the membership stored for `email`
    pub fn set_entry(&self, email: impl Into<String>, entry: DirectoryEntry) {
        self.entries.write().insert(email.into(), entry);
    }

    pub fn set_groups<I, S>(&self, email: &str, group_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut entries = self.entries.write();
        let entry = entries.entry(email.to_string()).or_default();
        entry.group_ids = group_ids.into_iter().map(Into::into).collect();
    }

    pub fn set_roles<I, S>(&self, email: &str, role_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut entries = self.entries.write();
        let entry = entries.entry(email.to_string()).or_default();
        entry.role_ids = role_ids.into_iter().map(Into::into).collect();
    }

    fn lookup(&self, email: &str) -> Result<DirectoryEntry> {
        self.entries
            .read()
            .get(email)
            .cloned()
            .ok_or_else(|| AccessError::Directory(format!("No directory entry for {}", email)))
    }
}

impl Default for StaticDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DirectoryService for StaticDirectory {
    async fn transitive_group_ids(&self, email: &str) -> Result<HashSet<String>> {
        Ok(self.lookup(email)?.group_ids)
    }

    async fn assigned_role_ids(&self, email: &str) -> Result<HashSet<String>> {
        Ok(self.lookup(email)?.role_ids)
    }
}
