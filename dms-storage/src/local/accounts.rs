use super::codec::{Dec, dec, opt_dec, parsed};
use crate::error::StorageResult;
use crate::validate;
use dms_types::{Account, AccountId, AccountType, NewAccount, RouteId, Stamps};
use rusqlite::{Connection, OptionalExtension, Row, params};

const COLUMNS: &str = "id, acct_type, name, route_id, parent_id, opening_balance, credit_limit, \
                       address, phone, created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: AccountId(row.get(0)?),
        acct_type: parsed(row, 1)?,
        name: row.get(2)?,
        route_id: row.get::<_, Option<i64>>(3)?.map(RouteId),
        parent_id: row.get::<_, Option<i64>>(4)?.map(AccountId),
        opening_balance: dec(row, 5)?,
        credit_limit: opt_dec(row, 6)?,
        address: row.get(7)?,
        phone: row.get(8)?,
        stamps: Stamps {
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        },
    })
}

pub(super) fn insert(conn: &Connection, account: &NewAccount) -> StorageResult<Account> {
    validate::account(account)?;
    let sql = format!(
        "INSERT INTO accounts
            (acct_type, name, route_id, parent_id, opening_balance, credit_limit, address, phone)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) RETURNING {COLUMNS}"
    );
    Ok(conn.query_row(
        &sql,
        params![
            account.acct_type.as_str(),
            account.name,
            account.route_id.map(RouteId::get),
            account.parent_id.map(AccountId::get),
            Dec(account.opening_balance),
            account.credit_limit.map(Dec),
            account.address,
            account.phone,
        ],
        from_row,
    )?)
}

pub(super) fn get(conn: &Connection, id: AccountId) -> StorageResult<Option<Account>> {
    let sql = format!("SELECT {COLUMNS} FROM accounts WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id.get()], from_row).optional()?)
}

pub(super) fn list(conn: &Connection, acct_type: Option<AccountType>) -> StorageResult<Vec<Account>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM accounts WHERE (?1 IS NULL OR acct_type = ?1) ORDER BY name, id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![acct_type.map(|t| t.as_str())], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
