//! Per-principal membership cache
//!
//! Group and role ids are fetched from a [`DirectoryService`] and served from
//! memory afterwards. The cache is soft-TTL: once a set is older than the sync
//! interval the next read triggers a refresh, but readers never wait for a
//! refresh that is already in flight. They get the last known-good set.
//!
//! # Refresh protocol
//!
//! 1. Under the record's map shard lock, decide whether a refresh is due and
//!    raise `is_syncing` (single-flight gate, best effort).
//! 2. Call the directory with no lock held, bounded by `directory_timeout`.
//! 3. Re-acquire the record, clear `is_syncing` and, on success only,
//!    replace the set and its timestamp.
//!
//! A refresh future dropped mid-call still clears `is_syncing` (see
//! [`SyncGuard`]), so a cancelled request cannot wedge a principal.

use crate::config::AccessConfig;
use crate::directory::{DirectoryService, MembershipKind};
use crate::error::{AccessError, Result};
use crate::evaluator::MembershipView;
use crate::types::AccessProfile;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// The principal a membership lookup is made for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Member {
    /// Stable directory reference, the cache key
    pub principal_id: String,

    /// Directory lookup key; without it the record can only be read
    pub email: Option<String>,
}

impl Member {
    pub fn new(principal_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            principal_id: principal_id.into(),
            email: Some(email.into()),
        }
    }

    /// `None` when the profile has no principal id
    pub fn from_profile(profile: &AccessProfile) -> Option<Self> {
        profile.principal_id.as_ref().map(|principal_id| Self {
            principal_id: principal_id.clone(),
            email: profile.email.clone(),
        })
    }
}

/// Cached membership of one principal
#[derive(Debug, Clone)]
pub struct MembershipRecord {
    pub principal_id: String,
    pub email: Option<String>,
    pub group_ids: HashSet<String>,
    pub role_ids: HashSet<String>,
    pub group_synced_at: Option<Instant>,
    pub role_synced_at: Option<Instant>,

    /// Last time a directory call was issued, whatever its outcome
    pub group_attempted_at: Option<Instant>,
    pub role_attempted_at: Option<Instant>,

    pub is_syncing: bool,
}

impl MembershipRecord {
    fn new(member: &Member) -> Self {
        Self {
            principal_id: member.principal_id.clone(),
            email: member.email.clone(),
            group_ids: HashSet::new(),
            role_ids: HashSet::new(),
            group_synced_at: None,
            role_synced_at: None,
            group_attempted_at: None,
            role_attempted_at: None,
            is_syncing: false,
        }
    }

    pub fn ids(&self, kind: MembershipKind) -> &HashSet<String> {
        match kind {
            MembershipKind::Group => &self.group_ids,
            MembershipKind::Role => &self.role_ids,
        }
    }

    pub fn synced_at(&self, kind: MembershipKind) -> Option<Instant> {
        match kind {
            MembershipKind::Group => self.group_synced_at,
            MembershipKind::Role => self.role_synced_at,
        }
    }

    /// Never synced and never attempted; only such a set is fetched inline
    pub fn is_cold(&self, kind: MembershipKind) -> bool {
        let attempted = match kind {
            MembershipKind::Group => self.group_attempted_at,
            MembershipKind::Role => self.role_attempted_at,
        };
        self.synced_at(kind).is_none() && attempted.is_none()
    }

    /// Never synced, or synced at least `interval` ago
    pub fn is_stale(&self, kind: MembershipKind, interval: Duration) -> bool {
        match self.synced_at(kind) {
            Some(at) => at.elapsed() >= interval,
            None => true,
        }
    }

    pub fn view(&self) -> MembershipView {
        MembershipView {
            group_ids: self.group_ids.clone(),
            role_ids: self.role_ids.clone(),
        }
    }

    fn mark_attempt(&mut self, kind: MembershipKind, at: Instant) {
        match kind {
            MembershipKind::Group => self.group_attempted_at = Some(at),
            MembershipKind::Role => self.role_attempted_at = Some(at),
        }
    }

    fn store(&mut self, kind: MembershipKind, ids: HashSet<String>, at: Instant) {
        match kind {
            MembershipKind::Group => {
                self.group_ids = ids;
                self.group_synced_at = Some(at);
            }
            MembershipKind::Role => {
                self.role_ids = ids;
                self.role_synced_at = Some(at);
            }
        }
    }
}

/// Directory traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MembershipStats {
    pub records: usize,
    pub directory_calls: u64,
    pub failures: u64,
    pub timeouts: u64,
}

#[derive(Default)]
struct Counters {
    directory_calls: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
}

enum RefreshTicket {
    NotDue,
    NoEmail,
    Due(String),
}

/// Clears `is_syncing` unless the refresh committed
struct SyncGuard<'a> {
    records: &'a DashMap<String, MembershipRecord>,
    principal_id: &'a str,
    armed: bool,
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Some(mut record) = self.records.get_mut(self.principal_id) {
                record.is_syncing = false;
            }
        }
    }
}

/// Soft-TTL membership cache shared by every request
#[derive(Clone)]
pub struct MembershipCache {
    records: Arc<DashMap<String, MembershipRecord>>,
    directory: Arc<dyn DirectoryService>,
    sync_interval: Duration,
    directory_timeout: Duration,
    counters: Arc<Counters>,
}

impl MembershipCache {
    pub fn new(
        directory: Arc<dyn DirectoryService>,
        sync_interval: Duration,
        directory_timeout: Duration,
    ) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            directory,
            sync_interval,
            directory_timeout,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn from_config(directory: Arc<dyn DirectoryService>, config: &AccessConfig) -> Self {
        Self::new(directory, config.sync_interval(), config.directory_timeout())
    }

    /// Refresh one membership set if due and return the current set.
    ///
    /// Never fails: on a directory error the previous set is returned.
    pub async fn get_or_refresh(
        &self,
        member: &Member,
        kind: MembershipKind,
        force: bool,
    ) -> HashSet<String> {
        self.refresh(member, kind, force).await;
        self.records
            .get(&member.principal_id)
            .map(|record| record.ids(kind).clone())
            .unwrap_or_default()
    }

    /// Refresh one membership set if due.
    ///
    /// Returns `false` only when a due refresh could not be completed.
    pub async fn refresh(&self, member: &Member, kind: MembershipKind, force: bool) -> bool {
        let email = match self.begin_refresh(member, kind, force) {
            RefreshTicket::NotDue => return true,
            RefreshTicket::NoEmail => {
                debug!(principal = %member.principal_id, ?kind, "No email to query the directory with");
                return false;
            }
            RefreshTicket::Due(email) => email,
        };

        let mut guard = SyncGuard {
            records: self.records.as_ref(),
            principal_id: &member.principal_id,
            armed: true,
        };

        let result = self.fetch(&email, kind).await;
        guard.armed = false;
        self.commit(&member.principal_id, kind, result)
    }

    /// Refresh both sets, as done at login
    pub async fn sync(&self, member: &Member, force: bool) -> bool {
        let groups = self.refresh(member, MembershipKind::Group, force).await;
        let roles = self.refresh(member, MembershipKind::Role, force).await;
        groups && roles
    }

    /// Membership snapshot for evaluation.
    ///
    /// A set that was never fetched is fetched inline, once. Stale sets,
    /// including sets whose first fetch failed, are refreshed by a
    /// background task while this call returns the pre-refresh snapshot.
    pub async fn view(&self, member: &Member) -> MembershipView {
        let record = self
            .records
            .entry(member.principal_id.clone())
            .or_insert_with(|| MembershipRecord::new(member))
            .value()
            .clone();

        if record.is_syncing {
            return record.view();
        }

        let cold: Vec<MembershipKind> = [MembershipKind::Group, MembershipKind::Role]
            .into_iter()
            .filter(|kind| record.is_cold(*kind))
            .collect();
        if !cold.is_empty() {
            for kind in cold {
                self.refresh(member, kind, false).await;
            }
            return self
                .records
                .get(&member.principal_id)
                .map(|record| record.view())
                .unwrap_or_default();
        }

        if record.is_stale(MembershipKind::Group, self.sync_interval)
            || record.is_stale(MembershipKind::Role, self.sync_interval)
        {
            self.spawn_refresh(member.clone());
        }

        record.view()
    }

    /// Snapshot of a principal's record
    pub fn record(&self, principal_id: &str) -> Option<MembershipRecord> {
        self.records.get(principal_id).map(|record| record.value().clone())
    }

    pub fn find_by_email(&self, email: &str) -> Option<MembershipRecord> {
        self.records
            .iter()
            .find(|record| {
                record
                    .email
                    .as_deref()
                    .is_some_and(|known| known.eq_ignore_ascii_case(email))
            })
            .map(|record| record.value().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn stats(&self) -> MembershipStats {
        MembershipStats {
            records: self.records.len(),
            directory_calls: self.counters.directory_calls.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
        }
    }

    fn spawn_refresh(&self, member: Member) {
        let cache = self.clone();
        tokio::spawn(async move {
            debug!(principal = %member.principal_id, "Background membership refresh");
            cache.sync(&member, false).await;
        });
    }

    fn begin_refresh(&self, member: &Member, kind: MembershipKind, force: bool) -> RefreshTicket {
        let mut record = self
            .records
            .entry(member.principal_id.clone())
            .or_insert_with(|| MembershipRecord::new(member));

        if member.email.is_some() && record.email != member.email {
            record.email = member.email.clone();
        }

        let due = force || (!record.is_syncing && record.is_stale(kind, self.sync_interval));
        if !due {
            return RefreshTicket::NotDue;
        }

        match record.email.clone() {
            Some(email) => {
                record.is_syncing = true;
                record.mark_attempt(kind, Instant::now());
                RefreshTicket::Due(email)
            }
            None => RefreshTicket::NoEmail,
        }
    }

    async fn fetch(&self, email: &str, kind: MembershipKind) -> Result<HashSet<String>> {
        self.counters.directory_calls.fetch_add(1, Ordering::Relaxed);

        match tokio::time::timeout(self.directory_timeout, self.directory.membership_ids(email, kind))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(AccessError::DirectoryTimeout(self.directory_timeout)),
        }
    }

    fn commit(&self, principal_id: &str, kind: MembershipKind, result: Result<HashSet<String>>) -> bool {
        let Some(mut record) = self.records.get_mut(principal_id) else {
            return false;
        };
        record.is_syncing = false;

        match result {
            Ok(ids) => {
                debug!(principal = %principal_id, ?kind, count = ids.len(), "Membership refreshed");
                record.store(kind, ids, Instant::now());
                true
            }
            Err(e) => {
                if matches!(e, AccessError::DirectoryTimeout(_)) {
                    self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                }
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!(principal = %principal_id, ?kind, error = %e, "Membership refresh failed, keeping cached set");
                false
            }
        }
    }
}
