//! # Access Check
//!
//! Evaluates one feature access decision against a JSON snapshot of rules,
//! accounts and directory membership, and prints the decision as JSON.
//!
//! ## Snapshot format
//!
//! ```json
//! {
//!   "features": { "Dashboard": [ { "id": 1, "kind": "All", "level": "read" } ] },
//!   "accounts": [ { "email": "alice@example.com", "principal_id": "user-1" } ],
//!   "directory": { "alice@example.com": { "group_ids": ["G1"], "role_ids": [] } }
//! }
//! ```
//!
//! `RUST_LOG` controls logging (default: info).

use anyhow::{Context, Result};
use clap::Parser;
use cretoai_access::{
    AccessConfig, AccessLevel, AccessService, DirectoryEntry, Identity, InMemoryAccessStore,
    StaticDirectory, StoreSnapshot,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Feature access check CLI
#[derive(Parser)]
#[command(name = "access-check")]
#[command(about = "Evaluate a feature access decision against a snapshot")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "CRETOAI_ACCESS_CONFIG")]
    config: Option<PathBuf>,

    /// Path to the JSON snapshot
    #[arg(short, long)]
    snapshot: PathBuf,

    /// Email of the identity to check
    #[arg(short, long)]
    email: String,

    /// Role claims carried by the identity
    #[arg(short, long)]
    role: Vec<String>,

    /// Feature to check
    #[arg(short, long)]
    feature: String,

    /// Minimum level required
    #[arg(short, long, default_value = "read")]
    level: AccessLevel,
}

#[derive(Deserialize)]
struct Snapshot {
    #[serde(flatten)]
    store: StoreSnapshot,

    #[serde(default)]
    directory: HashMap<String, DirectoryEntry>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Starting access-check v{}", cretoai_access::VERSION);

    let config = match &cli.config {
        Some(path) => AccessConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => AccessConfig::default(),
    };

    let raw = std::fs::read_to_string(&cli.snapshot)
        .with_context(|| format!("Failed to read snapshot {}", cli.snapshot.display()))?;
    let snapshot: Snapshot = serde_json::from_str(&raw).context("Failed to parse snapshot")?;

    let store = InMemoryAccessStore::from_snapshot(snapshot.store);
    let directory = StaticDirectory::from_entries(snapshot.directory);
    let service = AccessService::new(config, Arc::new(store), Arc::new(directory));
    service.bootstrap().await.context("Failed to bootstrap feature cache")?;

    let identity = Identity {
        email: Some(cli.email),
        name: None,
        roles: cli.role,
    };

    let decision = service.check(&identity, &cli.feature, cli.level).await;
    println!("{}", serde_json::to_string_pretty(&decision)?);

    Ok(())
}
