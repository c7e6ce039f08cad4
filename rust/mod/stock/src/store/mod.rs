//! SQL persistence for ponds, cycles, the movement ledger and the
//! sampling/realization records that feed it.

mod cycle;
mod ledger;
mod pond;
mod records;

pub use cycle::CycleStore;
pub use ledger::{LedgerScope, LedgerStore, LedgerWrite, MovementCursor};
pub use pond::PondStore;
pub use records::RecordStore;

use chrono::NaiveDate;

use aquafarm_core::ServiceError;
use aquafarm_sql::{Row, SQLError, Value};

pub(crate) fn storage(e: SQLError) -> ServiceError {
    ServiceError::Storage(e.to_string())
}

pub(crate) fn date_value(d: NaiveDate) -> Value {
    Value::Text(d.format("%Y-%m-%d").to_string())
}

pub(crate) fn opt_real(v: Option<f64>) -> Value {
    match v {
        Some(f) => Value::Real(f),
        None => Value::Null,
    }
}

pub(crate) fn req_str(row: &Row, col: &str) -> Result<String, ServiceError> {
    row.get_str(col)
        .map(str::to_string)
        .ok_or_else(|| ServiceError::Storage(format!("missing {col} column")))
}

pub(crate) fn opt_str(row: &Row, col: &str) -> Option<String> {
    row.get_str(col).map(str::to_string)
}

pub(crate) fn req_i64(row: &Row, col: &str) -> Result<i64, ServiceError> {
    row.get_i64(col)
        .ok_or_else(|| ServiceError::Storage(format!("missing {col} column")))
}

pub(crate) fn req_f64(row: &Row, col: &str) -> Result<f64, ServiceError> {
    row.get_f64(col)
        .ok_or_else(|| ServiceError::Storage(format!("missing {col} column")))
}

pub(crate) fn req_date(row: &Row, col: &str) -> Result<NaiveDate, ServiceError> {
    let raw = req_str(row, col)?;
    raw.parse()
        .map_err(|e| ServiceError::Storage(format!("bad {col} date {raw:?}: {e}")))
}

/// Decode a stored enum column through its `from_str`.
pub(crate) fn req_enum<T>(
    row: &Row,
    col: &str,
    parse: fn(&str) -> Option<T>,
) -> Result<T, ServiceError> {
    let raw = req_str(row, col)?;
    parse(&raw).ok_or_else(|| ServiceError::Storage(format!("bad {col} value {raw:?}")))
}
