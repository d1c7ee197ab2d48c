//! Membership cache refresh behavior against a misbehaving directory

mod common;

use common::FlakyDirectory;
use cretoai_access::{Member, MembershipCache, MembershipKind};
use std::time::Duration;
use tokio::time::sleep;

const LONG_INTERVAL: Duration = Duration::from_secs(600);
const TIMEOUT: Duration = Duration::from_secs(5);

fn alice() -> Member {
    Member::new("user-1", "alice@example.com")
}

fn directory_with_alice() -> std::sync::Arc<FlakyDirectory> {
    let directory = FlakyDirectory::new();
    directory.inner.set_groups("alice@example.com", ["G1"]);
    directory.inner.set_roles("alice@example.com", ["R1"]);
    directory
}

// ============================================================================
// STALENESS
// ============================================================================

#[tokio::test]
async fn test_refresh_at_most_once_within_interval() {
    let directory = directory_with_alice();
    let cache = MembershipCache::new(directory.clone(), LONG_INTERVAL, TIMEOUT);

    let first = cache.get_or_refresh(&alice(), MembershipKind::Group, false).await;
    let second = cache.get_or_refresh(&alice(), MembershipKind::Group, false).await;

    assert_eq!(first, second);
    assert!(first.contains("G1"));
    assert_eq!(directory.calls(), 1, "Second read within the interval must hit the cache");
}

#[tokio::test]
async fn test_force_always_calls_directory() {
    let directory = directory_with_alice();
    let cache = MembershipCache::new(directory.clone(), LONG_INTERVAL, TIMEOUT);

    for _ in 0..3 {
        cache.get_or_refresh(&alice(), MembershipKind::Role, true).await;
    }

    assert_eq!(directory.calls(), 3);
}

#[tokio::test]
async fn test_zero_interval_refreshes_every_read() {
    let directory = directory_with_alice();
    let cache = MembershipCache::new(directory.clone(), Duration::ZERO, TIMEOUT);

    cache.get_or_refresh(&alice(), MembershipKind::Group, false).await;
    directory.inner.set_groups("alice@example.com", ["G2"]);
    let groups = cache.get_or_refresh(&alice(), MembershipKind::Group, false).await;

    assert_eq!(directory.calls(), 2);
    assert!(groups.contains("G2"));
}

#[tokio::test]
async fn test_kinds_have_independent_timestamps() {
    let directory = directory_with_alice();
    let cache = MembershipCache::new(directory.clone(), LONG_INTERVAL, TIMEOUT);

    cache.get_or_refresh(&alice(), MembershipKind::Group, false).await;
    let record = cache.record("user-1").unwrap();
    assert!(record.group_synced_at.is_some());
    assert!(record.role_synced_at.is_none());

    cache.get_or_refresh(&alice(), MembershipKind::Role, false).await;
    assert_eq!(directory.calls(), 2);
}

// ============================================================================
// FAIL-SOFT
// ============================================================================

#[tokio::test]
async fn test_directory_failure_keeps_previous_set() {
    let directory = directory_with_alice();
    let cache = MembershipCache::new(directory.clone(), LONG_INTERVAL, TIMEOUT);

    assert!(cache.sync(&alice(), false).await);
    let before = cache.record("user-1").unwrap();

    directory.set_failing(true);
    assert!(!cache.refresh(&alice(), MembershipKind::Group, true).await);

    let after = cache.record("user-1").unwrap();
    assert_eq!(after.group_ids, before.group_ids);
    assert_eq!(after.group_synced_at, before.group_synced_at);
    assert!(!after.is_syncing);
    assert_eq!(cache.stats().failures, 1);
}

#[tokio::test]
async fn test_failure_on_first_sync_leaves_record_stale() {
    let directory = directory_with_alice();
    directory.set_failing(true);
    let cache = MembershipCache::new(directory.clone(), LONG_INTERVAL, TIMEOUT);

    let groups = cache.get_or_refresh(&alice(), MembershipKind::Group, false).await;
    assert!(groups.is_empty());

    directory.set_failing(false);
    let groups = cache.get_or_refresh(&alice(), MembershipKind::Group, false).await;
    assert!(groups.contains("G1"), "Failed refresh must be retried on the next read");
    assert_eq!(directory.calls(), 2);
}

#[tokio::test]
async fn test_unknown_email_is_a_recoverable_failure() {
    let directory = FlakyDirectory::new();
    let cache = MembershipCache::new(directory.clone(), LONG_INTERVAL, TIMEOUT);

    let member = Member::new("user-9", "ghost@example.com");
    assert!(!cache.sync(&member, false).await);
    assert!(!cache.record("user-9").unwrap().is_syncing);
}

// ============================================================================
// TIMEOUT AND CANCELLATION
// ============================================================================

#[tokio::test]
async fn test_timeout_resets_syncing_flag() {
    let directory = directory_with_alice();
    directory.set_delay(Duration::from_millis(500));
    let cache = MembershipCache::new(directory.clone(), LONG_INTERVAL, Duration::from_millis(50));

    assert!(!cache.refresh(&alice(), MembershipKind::Group, false).await);

    let record = cache.record("user-1").unwrap();
    assert!(!record.is_syncing);
    assert!(record.group_synced_at.is_none());

    let stats = cache.stats();
    assert_eq!(stats.timeouts, 1);
    assert_eq!(stats.failures, 1);
}

#[tokio::test]
async fn test_cancelled_refresh_resets_syncing_flag() {
    let directory = directory_with_alice();
    directory.set_delay(Duration::from_secs(5));
    let cache = MembershipCache::new(directory.clone(), LONG_INTERVAL, Duration::from_secs(10));

    let task = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.refresh(&alice(), MembershipKind::Group, false).await })
    };

    sleep(Duration::from_millis(50)).await;
    assert!(cache.record("user-1").unwrap().is_syncing);

    task.abort();
    let _ = task.await;

    assert!(!cache.record("user-1").unwrap().is_syncing);
}

// ============================================================================
// SINGLE FLIGHT AND BACKGROUND REFRESH
// ============================================================================

#[tokio::test]
async fn test_reader_gets_stale_set_while_refresh_in_flight() {
    let directory = directory_with_alice();
    let cache = MembershipCache::new(directory.clone(), Duration::ZERO, TIMEOUT);
    cache.sync(&alice(), false).await;
    assert_eq!(directory.calls(), 2);

    directory.inner.set_groups("alice@example.com", ["G2"]);
    directory.set_delay(Duration::from_millis(200));

    let refresh = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.refresh(&alice(), MembershipKind::Group, true).await })
    };
    sleep(Duration::from_millis(50)).await;

    let groups = cache.get_or_refresh(&alice(), MembershipKind::Group, false).await;
    assert!(groups.contains("G1"), "Reader must not wait for the in-flight refresh");
    assert_eq!(directory.calls(), 3);

    assert!(refresh.await.unwrap());
    assert!(cache.record("user-1").unwrap().group_ids.contains("G2"));
}

#[tokio::test]
async fn test_view_fetches_cold_record_inline() {
    let directory = directory_with_alice();
    let cache = MembershipCache::new(directory.clone(), LONG_INTERVAL, TIMEOUT);

    let view = cache.view(&alice()).await;
    assert!(view.group_ids.contains("G1"));
    assert!(view.role_ids.contains("R1"));

    cache.view(&alice()).await;
    assert_eq!(directory.calls(), 2);
}

#[tokio::test]
async fn test_view_does_not_block_after_failed_cold_fetch() {
    let directory = directory_with_alice();
    directory.set_failing(true);
    directory.set_delay(Duration::from_millis(200));
    let cache = MembershipCache::new(directory.clone(), LONG_INTERVAL, TIMEOUT);

    let view = cache.view(&alice()).await;
    assert!(view.group_ids.is_empty());
    assert_eq!(directory.calls(), 2);

    let started = std::time::Instant::now();
    let view = cache.view(&alice()).await;
    assert!(started.elapsed() < Duration::from_millis(100), "Second read waited on the directory");
    assert!(view.group_ids.is_empty());
    assert_eq!(directory.calls(), 2, "Second read must not call the directory inline");

    directory.set_delay(Duration::ZERO);
    directory.set_failing(false);
    sleep(Duration::from_millis(100)).await;

    let view = cache.view(&alice()).await;
    assert!(view.group_ids.contains("G1"), "Background retry should recover membership");
    assert!(view.role_ids.contains("R1"));
}

#[tokio::test]
async fn test_view_serves_stale_snapshot_and_refreshes_in_background() {
    let directory = directory_with_alice();
    let cache = MembershipCache::new(directory.clone(), Duration::ZERO, TIMEOUT);
    cache.view(&alice()).await;

    directory.inner.set_groups("alice@example.com", ["G2"]);
    let stale = cache.view(&alice()).await;
    assert!(stale.group_ids.contains("G1"));

    sleep(Duration::from_millis(100)).await;
    let record = cache.record("user-1").unwrap();
    assert!(record.group_ids.contains("G2"));
    assert!(!record.is_syncing);
}

#[tokio::test]
async fn test_slow_refresh_does_not_block_other_principal() {
    let directory = directory_with_alice();
    directory.inner.set_groups("bob@example.com", ["G3"]);
    directory.inner.set_roles("bob@example.com", Vec::<String>::new());
    let cache = MembershipCache::new(directory.clone(), LONG_INTERVAL, TIMEOUT);

    let bob = Member::new("user-2", "bob@example.com");
    cache.view(&bob).await;

    directory.set_delay(Duration::from_secs(2));
    let slow = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.sync(&alice(), true).await })
    };
    sleep(Duration::from_millis(20)).await;

    let view = tokio::time::timeout(Duration::from_millis(100), cache.view(&bob))
        .await
        .expect("Bob's evaluation must not wait on Alice's refresh");
    assert!(view.group_ids.contains("G3"));

    slow.abort();
}
