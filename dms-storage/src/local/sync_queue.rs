use super::codec::{json, parsed};
use crate::error::StorageResult;
use dms_types::{NewSyncItem, SyncItemId, SyncQueueItem, SyncState, now_millis, tables};
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

const COLUMNS: &str = "id, table_name, record_id, operation, payload, status, retry_count, \
                       last_attempt, created_at, idempotency_key";

fn from_row(row: &Row<'_>) -> rusqlite::Result<SyncQueueItem> {
    Ok(SyncQueueItem {
        id: SyncItemId(row.get(0)?),
        table_name: row.get(1)?,
        record_id: row.get(2)?,
        operation: parsed(row, 3)?,
        payload: json(row, 4)?,
        status: parsed(row, 5)?,
        retry_count: row.get(6)?,
        last_attempt: row.get(7)?,
        created_at: row.get(8)?,
        idempotency_key: parsed(row, 9)?,
    })
}

pub(super) fn enqueue(conn: &Connection, item: &NewSyncItem) -> StorageResult<SyncQueueItem> {
    let sql = format!(
        "INSERT INTO sync_queue
            (table_name, record_id, operation, payload, status, retry_count, created_at, idempotency_key)
         VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?6) RETURNING {COLUMNS}"
    );
    Ok(conn.query_row(
        &sql,
        params![
            item.table_name,
            item.record_id,
            item.operation.as_str(),
            serde_json::to_string(&item.payload)?,
            now_millis(),
            Uuid::now_v7().to_string(),
        ],
        from_row,
    )?)
}

pub(super) fn get(conn: &Connection, id: SyncItemId) -> StorageResult<Option<SyncQueueItem>> {
    let sql = format!("SELECT {COLUMNS} FROM sync_queue WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id.get()], from_row).optional()?)
}

pub(super) fn due(conn: &Connection, max_retries: u32) -> StorageResult<Vec<SyncQueueItem>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM sync_queue
         WHERE status = 'pending' OR (status = 'failed' AND retry_count < ?1)
         ORDER BY created_at, id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![max_retries], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(super) fn mark_synced(conn: &Connection, id: SyncItemId, at: i64) -> StorageResult<bool> {
    let changed = conn.execute(
        "UPDATE sync_queue SET status = 'synced', last_attempt = ?2
         WHERE id = ?1 AND status != 'synced'",
        params![id.get(), at],
    )?;
    Ok(changed > 0)
}

/// Must run inside a transaction.
pub(super) fn record_failure(
    conn: &Connection,
    id: SyncItemId,
    at: i64,
    max_retries: u32,
) -> StorageResult<Option<SyncQueueItem>> {
    let Some(item) = get(conn, id)? else {
        return Ok(None);
    };
    if item.status == SyncState::Synced {
        return Ok(None);
    }

    let retry_count = item.retry_count.saturating_add(1);
    let status = if retry_count >= max_retries {
        SyncState::Failed
    } else {
        SyncState::Pending
    };
    conn.execute(
        "UPDATE sync_queue SET status = ?2, retry_count = ?3, last_attempt = ?4
         WHERE id = ?1 AND status != 'synced'",
        params![id.get(), status.as_str(), retry_count, at],
    )?;
    get(conn, id)
}

pub(super) fn reset_failed(conn: &Connection) -> StorageResult<u64> {
    let changed = conn.execute(
        "UPDATE sync_queue SET status = 'pending', retry_count = 0 WHERE status = 'failed'",
        [],
    )?;
    Ok(changed as u64)
}

pub(super) fn delete_failed(conn: &Connection) -> StorageResult<u64> {
    let changed = conn.execute("DELETE FROM sync_queue WHERE status = 'failed'", [])?;
    Ok(changed as u64)
}

pub(super) fn purge_synced_before(conn: &Connection, cutoff: i64) -> StorageResult<u64> {
    let changed = conn.execute(
        "DELETE FROM sync_queue WHERE status = 'synced' AND created_at < ?1",
        params![cutoff],
    )?;
    Ok(changed as u64)
}

pub(super) fn count(conn: &Connection, status: SyncState) -> StorageResult<u64> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sync_queue WHERE status = ?1",
        params![status.as_str()],
        |row| row.get(0),
    )?;
    Ok(n.max(0) as u64)
}

/// Invoice and voucher rows carry a `sync_status` column.
pub(super) fn set_record_status(
    conn: &Connection,
    table: &str,
    record_id: i64,
    status: SyncState,
) -> StorageResult<bool> {
    let table = match table {
        tables::INVOICES => tables::INVOICES,
        tables::VOUCHERS => tables::VOUCHERS,
        _ => return Ok(false),
    };
    let changed = conn.execute(
        &format!("UPDATE {table} SET sync_status = ?2 WHERE id = ?1"),
        params![record_id, status.as_str()],
    )?;
    Ok(changed > 0)
}
