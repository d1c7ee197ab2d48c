//! # CretoAI Feature Access
//!
//! Feature-level access evaluation backed by cached directory membership.
//!
//! ## Features
//!
//! - **Ordered access levels** from `None` to `Master`
//! - **Grant and limiter rules** per feature, keyed to users, groups, roles or everyone
//! - **Soft-TTL membership cache** with single-flight refresh and fail-soft reads
//! - **Copy-on-write feature cache** safe for concurrent readers and admins
//! - **Decision point** combining both caches with exemption and superuser handling
//!
//! ## Example
//!
//! ```rust
//! use cretoai_access::{
//!     AccessConfig, AccessLevel, AccessService, Identity, InMemoryAccessStore, StaticDirectory,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = AccessService::new(
//!         AccessConfig::default(),
//!         Arc::new(InMemoryAccessStore::new()),
//!         Arc::new(StaticDirectory::new()),
//!     );
//!     service.bootstrap().await?;
//!
//!     let identity = Identity::new("alice@example.com");
//!     if service.has_access(&identity, "Dashboard", AccessLevel::Read).await {
//!         println!("Access granted!");
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod directory;
pub mod error;
pub mod evaluator;
pub mod feature_cache;
pub mod membership;
pub mod service;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use config::AccessConfig;
pub use directory::{DirectoryEntry, DirectoryService, MembershipKind, StaticDirectory};
pub use error::{AccessError, Result};
pub use evaluator::{evaluate, MembershipView};
pub use feature_cache::{FeatureAccessCache, RuleSnapshot};
pub use membership::{Member, MembershipCache, MembershipRecord, MembershipStats};
pub use service::AccessService;
pub use store::{AccessStore, Account, InMemoryAccessStore, RuleChange, SavedRule, StoreSnapshot};
pub use types::{
    AccessDecision, AccessLevel, AccessProfile, AccessRule, FeatureName, FeatureRuleSet, Identity,
    PrincipalKind, RuleDraft, RuleId,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
