use super::codec::{Dec, dec, parsed};
use super::lots;
use crate::error::StorageResult;
use crate::store::{PostedInvoice, Posting};
use dms_types::{
    AccountId, Invoice, InvoiceId, InvoiceKind, InvoiceLine, InvoiceLineId, NewInvoiceLine,
    ProductId, RouteId, SalesmanId, Stamps, SyncState,
};
use rusqlite::{Connection, OptionalExtension, Row, params};

const COLUMNS: &str = "id, kind, date, account_id, route_id, salesman_id, reference_no, is_cash, \
                       amount, discount, tax, net_amount, notes, sync_status, created_at, updated_at";

const LINE_COLUMNS: &str =
    "id, invoice_id, product_id, quantity, rate, discount, tax, net_amount, created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Invoice> {
    Ok(Invoice {
        id: InvoiceId(row.get(0)?),
        kind: parsed(row, 1)?,
        date: row.get(2)?,
        account_id: AccountId(row.get(3)?),
        route_id: row.get::<_, Option<i64>>(4)?.map(RouteId),
        salesman_id: row.get::<_, Option<i64>>(5)?.map(SalesmanId),
        reference_no: row.get(6)?,
        is_cash: row.get(7)?,
        amount: dec(row, 8)?,
        discount: dec(row, 9)?,
        tax: dec(row, 10)?,
        net_amount: dec(row, 11)?,
        notes: row.get(12)?,
        sync_status: parsed(row, 13)?,
        stamps: Stamps {
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
        },
    })
}

fn line_from_row(row: &Row<'_>) -> rusqlite::Result<InvoiceLine> {
    Ok(InvoiceLine {
        id: InvoiceLineId(row.get(0)?),
        invoice_id: InvoiceId(row.get(1)?),
        product_id: ProductId(row.get(2)?),
        quantity: dec(row, 3)?,
        rate: dec(row, 4)?,
        discount: dec(row, 5)?,
        tax: dec(row, 6)?,
        net_amount: dec(row, 7)?,
        stamps: Stamps {
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        },
    })
}

/// Write every row of a posting. Must run inside a transaction.
pub(super) fn commit_posting(conn: &Connection, posting: &Posting) -> StorageResult<PostedInvoice> {
    let header = &posting.invoice;
    let sql = format!(
        "INSERT INTO invoices
            (kind, date, account_id, route_id, salesman_id, reference_no, is_cash,
             amount, discount, tax, net_amount, notes, sync_status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
         RETURNING {COLUMNS}"
    );
    let invoice = conn.query_row(
        &sql,
        params![
            header.kind.as_str(),
            header.date,
            header.account_id.get(),
            header.route_id.map(RouteId::get),
            header.salesman_id.map(SalesmanId::get),
            header.reference_no,
            header.is_cash,
            Dec(header.totals.amount),
            Dec(header.totals.discount),
            Dec(header.totals.tax),
            Dec(header.totals.net_amount),
            header.notes,
            SyncState::Pending.as_str(),
        ],
        from_row,
    )?;

    let mut lines = Vec::with_capacity(posting.lines.len());
    for line in &posting.lines {
        lines.push(insert_line(conn, invoice.id, line)?);
    }

    let drained_lots = lots::apply_drains(conn, &posting.drains)?;

    let mut new_lots = Vec::with_capacity(posting.new_lots.len());
    for lot in &posting.new_lots {
        new_lots.push(lots::insert(conn, lot)?);
    }

    Ok(PostedInvoice {
        invoice,
        lines,
        drained_lots,
        new_lots,
    })
}

fn insert_line(conn: &Connection, invoice_id: InvoiceId, line: &NewInvoiceLine) -> StorageResult<InvoiceLine> {
    let sql = format!(
        "INSERT INTO invoice_lines
            (invoice_id, product_id, quantity, rate, discount, tax, net_amount)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         RETURNING {LINE_COLUMNS}"
    );
    Ok(conn.query_row(
        &sql,
        params![
            invoice_id.get(),
            line.product_id.get(),
            Dec(line.quantity),
            Dec(line.rate),
            Dec(line.discount),
            Dec(line.tax),
            Dec(line.net_amount),
        ],
        line_from_row,
    )?)
}

pub(super) fn get(conn: &Connection, id: InvoiceId) -> StorageResult<Option<Invoice>> {
    let sql = format!("SELECT {COLUMNS} FROM invoices WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id.get()], from_row).optional()?)
}

pub(super) fn lines(conn: &Connection, id: InvoiceId) -> StorageResult<Vec<InvoiceLine>> {
    let sql = format!("SELECT {LINE_COLUMNS} FROM invoice_lines WHERE invoice_id = ?1 ORDER BY id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![id.get()], line_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(super) fn for_account(
    conn: &Connection,
    account_id: AccountId,
    kinds: &[InvoiceKind],
) -> StorageResult<Vec<Invoice>> {
    let sql = format!("SELECT {COLUMNS} FROM invoices WHERE account_id = ?1 ORDER BY date, id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![account_id.get()], from_row)?
        .filter(|row| row.as_ref().map_or(true, |inv| kinds.contains(&inv.kind)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
