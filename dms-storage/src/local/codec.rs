//! Column codecs shared by the table modules.

use rust_decimal::Decimal;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use rusqlite::Row;
use std::str::FromStr;

/// Decimal stored as canonical text so no precision is lost.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Dec(pub Decimal);

impl ToSql for Dec {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0.to_string()))
    }
}

impl FromSql for Dec {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Text(bytes) => {
                let text = std::str::from_utf8(bytes).map_err(|e| FromSqlError::Other(Box::new(e)))?;
                Decimal::from_str(text.trim())
                    .map(Dec)
                    .map_err(|e| FromSqlError::Other(Box::new(e)))
            }
            ValueRef::Integer(i) => Ok(Dec(Decimal::from(i))),
            ValueRef::Real(f) => Decimal::try_from(f)
                .map(Dec)
                .map_err(|e| FromSqlError::Other(Box::new(e))),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

pub(crate) fn dec(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    row.get::<_, Dec>(idx).map(|d| d.0)
}

pub(crate) fn opt_dec(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    row.get::<_, Option<Dec>>(idx).map(|d| d.map(|d| d.0))
}

/// Text column parsed through `FromStr` (enum columns, uuids).
pub(crate) fn parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// JSON document stored as text.
pub(crate) fn json(row: &Row<'_>, idx: usize) -> rusqlite::Result<serde_json::Value> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Any column as a JSON value, for exports.
pub(crate) fn value_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::Number(i.into()),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(bytes) => serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(_) => serde_json::Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use rust_decimal_macros::dec;

    #[test]
    fn decimal_text_keeps_scale() {
        let conn = Connection::open_in_memory().unwrap();
        let value: Dec = conn
            .query_row("SELECT ?1", [Dec(dec!(30.50))], |row| row.get(0))
            .unwrap();
        assert_eq!(value.0.to_string(), "30.50");
    }

    #[test]
    fn integer_and_real_columns_decode() {
        let conn = Connection::open_in_memory().unwrap();
        let (a, b): (Dec, Dec) = conn
            .query_row("SELECT 12, 2.5", [], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap();
        assert_eq!(a.0, dec!(12));
        assert_eq!(b.0, dec!(2.5));
    }
}
