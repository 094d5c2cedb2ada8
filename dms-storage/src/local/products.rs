use super::codec::{Dec, dec};
use crate::error::{StorageError, StorageResult};
use crate::validate;
use dms_types::{CompanyId, Money, NewProduct, Product, ProductId, Stamps};
use rusqlite::{Connection, OptionalExtension, Row, params};

const COLUMNS: &str = "id, code, name, company_id, sale_price, pack_size, active, created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Product> {
    Ok(Product {
        id: ProductId(row.get(0)?),
        code: row.get(1)?,
        name: row.get(2)?,
        company_id: CompanyId(row.get(3)?),
        sale_price: dec(row, 4)?,
        pack_size: row.get(5)?,
        active: row.get(6)?,
        stamps: Stamps {
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        },
    })
}

pub(super) fn insert(conn: &Connection, product: &NewProduct) -> StorageResult<Product> {
    validate::product(product)?;
    let sql = format!(
        "INSERT INTO products (code, name, company_id, sale_price, pack_size)
         VALUES (?1, ?2, ?3, ?4, ?5) RETURNING {COLUMNS}"
    );
    conn.query_row(
        &sql,
        params![
            product.code,
            product.name,
            product.company_id.get(),
            Dec(product.sale_price),
            product.pack_size
        ],
        from_row,
    )
    .map_err(|e| super::unique_violation(e, format!("product code {:?} already exists", product.code)))
}

pub(super) fn get(conn: &Connection, id: ProductId) -> StorageResult<Option<Product>> {
    let sql = format!("SELECT {COLUMNS} FROM products WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id.get()], from_row).optional()?)
}

pub(super) fn list(
    conn: &Connection,
    company_id: Option<CompanyId>,
    active_only: bool,
) -> StorageResult<Vec<Product>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM products
         WHERE (?1 IS NULL OR company_id = ?1) AND (?2 = 0 OR active = 1)
         ORDER BY name, id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![company_id.map(CompanyId::get), active_only], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(super) fn set_price(conn: &Connection, id: ProductId, sale_price: Money) -> StorageResult<Product> {
    validate::price(sale_price)?;
    let changed = conn.execute(
        "UPDATE products SET sale_price = ?2 WHERE id = ?1",
        params![id.get(), Dec(sale_price)],
    )?;
    reload(conn, id, changed)
}

pub(super) fn set_active(conn: &Connection, id: ProductId, active: bool) -> StorageResult<Product> {
    let changed = conn.execute(
        "UPDATE products SET active = ?2 WHERE id = ?1",
        params![id.get(), active],
    )?;
    reload(conn, id, changed)
}

fn reload(conn: &Connection, id: ProductId, changed: usize) -> StorageResult<Product> {
    if changed == 0 {
        return Err(StorageError::NotFound(format!("product {id}")));
    }
    get(conn, id)?.ok_or_else(|| StorageError::NotFound(format!("product {id}")))
}
