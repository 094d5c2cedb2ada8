use super::accounts;
use crate::error::StorageResult;
use crate::schema::NOW_MS;
use crate::store::SeedData;
use dms_types::{AppConfigEntry, config_keys};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;

pub(super) fn get(conn: &Connection, key: &str) -> StorageResult<Option<AppConfigEntry>> {
    Ok(conn
        .query_row(
            "SELECT key, value, description, updated_at FROM app_config WHERE key = ?1",
            params![key],
            |row| {
                Ok(AppConfigEntry {
                    key: row.get(0)?,
                    value: row.get(1)?,
                    description: row.get(2)?,
                    updated_at: row.get(3)?,
                })
            },
        )
        .optional()?)
}

pub(super) fn set(conn: &Connection, key: &str, value: &str, description: Option<&str>) -> StorageResult<()> {
    conn.execute(
        &format!(
            "INSERT INTO app_config (key, value, description) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                description = COALESCE(excluded.description, app_config.description),
                updated_at = {NOW_MS}"
        ),
        params![key, value, description],
    )?;
    Ok(())
}

/// Must run inside a transaction.
pub(super) fn seed(conn: &Connection, seed: &SeedData) -> StorageResult<bool> {
    if get(conn, config_keys::DB_INITIALIZED)?.is_some() {
        return Ok(false);
    }
    for account in &seed.accounts {
        accounts::insert(conn, account)?;
    }
    set(conn, config_keys::APP_VERSION, &seed.app_version, Some("Application version"))?;
    set(conn, config_keys::DB_INITIALIZED, "true", Some("Seed data written"))?;
    info!(accounts = seed.accounts.len(), "seeded local database");
    Ok(true)
}
