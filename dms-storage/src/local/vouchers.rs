use super::codec::{Dec, dec, parsed};
use crate::error::StorageResult;
use crate::validate;
use dms_types::{AccountId, NewVoucher, Stamps, SyncState, Voucher, VoucherId};
use rusqlite::{Connection, OptionalExtension, Row, params};

const COLUMNS: &str = "id, date, account_id, description, debit, credit, voucher_type, \
                       reference_no, sync_status, created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Voucher> {
    Ok(Voucher {
        id: VoucherId(row.get(0)?),
        date: row.get(1)?,
        account_id: AccountId(row.get(2)?),
        description: row.get(3)?,
        debit: dec(row, 4)?,
        credit: dec(row, 5)?,
        voucher_type: parsed(row, 6)?,
        reference_no: row.get(7)?,
        sync_status: parsed(row, 8)?,
        stamps: Stamps {
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        },
    })
}

pub(super) fn insert(conn: &Connection, voucher: &NewVoucher) -> StorageResult<Voucher> {
    validate::voucher(voucher)?;
    let sql = format!(
        "INSERT INTO vouchers
            (date, account_id, description, debit, credit, voucher_type, reference_no, sync_status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) RETURNING {COLUMNS}"
    );
    Ok(conn.query_row(
        &sql,
        params![
            voucher.date,
            voucher.account_id.get(),
            voucher.description,
            Dec(voucher.debit),
            Dec(voucher.credit),
            voucher.voucher_type.as_str(),
            voucher.reference_no,
            SyncState::Pending.as_str(),
        ],
        from_row,
    )?)
}

pub(super) fn get(conn: &Connection, id: VoucherId) -> StorageResult<Option<Voucher>> {
    let sql = format!("SELECT {COLUMNS} FROM vouchers WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id.get()], from_row).optional()?)
}

pub(super) fn for_account(conn: &Connection, account_id: AccountId) -> StorageResult<Vec<Voucher>> {
    let sql = format!("SELECT {COLUMNS} FROM vouchers WHERE account_id = ?1 ORDER BY date, id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![account_id.get()], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
