use super::codec::{Dec, dec};
use crate::error::{StorageError, StorageResult};
use crate::validate;
use dms_types::{LotDrain, LotId, NewStockLot, ProductId, Stamps, StockLot};
use rust_decimal::Decimal;
use rusqlite::{Connection, OptionalExtension, Row, params};

const COLUMNS: &str = "id, product_id, initial_quantity, remaining, unit_cost, batch_no, expiry, \
                       received_at, created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<StockLot> {
    Ok(StockLot {
        id: LotId(row.get(0)?),
        product_id: ProductId(row.get(1)?),
        initial_quantity: dec(row, 2)?,
        remaining: dec(row, 3)?,
        unit_cost: dec(row, 4)?,
        batch_no: row.get(5)?,
        expiry: row.get(6)?,
        received_at: row.get(7)?,
        stamps: Stamps {
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        },
    })
}

pub(super) fn insert(conn: &Connection, lot: &NewStockLot) -> StorageResult<StockLot> {
    validate::lot(lot)?;
    let sql = format!(
        "INSERT INTO stock_lots
            (product_id, initial_quantity, remaining, unit_cost, batch_no, expiry, received_at)
         VALUES (?1, ?2, ?2, ?3, ?4, ?5, ?6) RETURNING {COLUMNS}"
    );
    Ok(conn.query_row(
        &sql,
        params![
            lot.product_id.get(),
            Dec(lot.quantity),
            Dec(lot.unit_cost),
            lot.batch_no,
            lot.expiry,
            lot.received_at
        ],
        from_row,
    )?)
}

pub(super) fn get(conn: &Connection, id: LotId) -> StorageResult<Option<StockLot>> {
    let sql = format!("SELECT {COLUMNS} FROM stock_lots WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id.get()], from_row).optional()?)
}

pub(super) fn for_product(conn: &Connection, product_id: ProductId) -> StorageResult<Vec<StockLot>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM stock_lots WHERE product_id = ?1 ORDER BY received_at, id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![product_id.get()], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Apply drains inside the caller's transaction. Any stale `before` value
/// aborts with [`StorageError::Conflict`] and the caller rolls back.
pub(super) fn apply_drains(conn: &Connection, drains: &[LotDrain]) -> StorageResult<Vec<StockLot>> {
    let mut updated = Vec::with_capacity(drains.len());
    for drain in drains {
        if drain.after < Decimal::ZERO || drain.after > drain.before {
            return Err(StorageError::Validation(format!(
                "invalid drain of lot {}: {} -> {}",
                drain.lot_id, drain.before, drain.after
            )));
        }
        let lot = get(conn, drain.lot_id)?
            .ok_or_else(|| StorageError::NotFound(format!("stock lot {}", drain.lot_id)))?;
        if lot.product_id != drain.product_id || lot.remaining != drain.before {
            return Err(StorageError::Conflict(format!(
                "stock lot {} holds {}, expected {}",
                drain.lot_id, lot.remaining, drain.before
            )));
        }
        conn.execute(
            "UPDATE stock_lots SET remaining = ?2 WHERE id = ?1",
            params![drain.lot_id.get(), Dec(drain.after)],
        )?;
        let lot = get(conn, drain.lot_id)?
            .ok_or_else(|| StorageError::NotFound(format!("stock lot {}", drain.lot_id)))?;
        updated.push(lot);
    }
    Ok(updated)
}
