use anyhow::{bail, Context, Result};
use rusqlite::Connection;

/// Schema scripts in order. `PRAGMA user_version` records how many have been
/// applied.
const MIGRATIONS: &[(&str, &str)] = &[("schema_v1.sql", include_str!("schemas/schema_v1.sql"))];

fn latest_version() -> i32 {
    MIGRATIONS.len() as i32
}

fn stored_version(conn: &Connection) -> Result<i32> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read storage schema version")
}

/// Brings the storage schema up to date in a single transaction.
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let from = stored_version(conn)?;
    let to = latest_version();

    if from > to {
        bail!("storage schema version {from} is newer than this build supports ({to})");
    }
    if from == to {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .context("failed to open migration transaction")?;

    for (name, script) in &MIGRATIONS[from as usize..] {
        tx.execute_batch(script)
            .with_context(|| format!("failed to apply {name}"))?;
    }

    tx.pragma_update(None, "user_version", to)
        .context("failed to record storage schema version")?;
    tx.commit().context("failed to commit storage migrations")?;

    Ok(())
}
