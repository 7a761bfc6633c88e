//! Database setup commands: `claimsync init-db`, `claimsync seed`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use claimsync::config::ClaimsyncConfig;
use claimsync::seed::Fixture;
use claimsync::store::SqliteStore;
use claimsync_common::SystemClock;

fn open(config: &ClaimsyncConfig) -> Result<SqliteStore> {
    SqliteStore::open(&config.database.path, Arc::new(SystemClock)).with_context(|| {
        format!(
            "Failed to initialize database at {}",
            config.database.path.display()
        )
    })
}

pub fn cmd_init_db(config: &ClaimsyncConfig) -> Result<()> {
    open(config)?;
    println!("Database initialized at {}", config.database.path.display());
    Ok(())
}

pub fn cmd_seed(config: &ClaimsyncConfig, fixture_path: &Path) -> Result<()> {
    let fixture = Fixture::load(fixture_path)?;
    let store = open(config)?;
    let counts = {
        let db = store.handle().lock_sync()?;
        fixture.apply(&db)?
    };
    println!(
        "Seeded {} owners, {} claims, {} payouts into {}",
        counts.owners,
        counts.claims,
        counts.payouts,
        config.database.path.display()
    );
    Ok(())
}
