use std::sync::Arc;

use aquafarm_core::ServiceError;
use aquafarm_sql::{Row, SQLStore, Statement, Value};

use super::{date_value, opt_real, opt_str, req_date, req_enum, req_i64, req_str, storage};
use crate::model::{CycleStatus, SeedingCycle};

const COLUMNS: &str = "id, pond_id, initial_quantity, species, seed_source, seed_size, \
                       avg_seed_weight_g, date_seeded, status, closed_by, closed_at, \
                       created_by, created_at, updated_at";

/// Persistent storage for seeding cycles.
///
/// Writes are handed out as [`Statement`]s so the manager can commit them
/// in the same transaction as the ledger entries they belong to.
pub struct CycleStore {
    db: Arc<dyn SQLStore>,
}

impl CycleStore {
    pub fn new(db: Arc<dyn SQLStore>) -> Self {
        Self { db }
    }

    /// Statement inserting a new cycle row.
    pub fn insert_stmt(cycle: &SeedingCycle) -> Statement {
        Statement::new(
            format!(
                "INSERT INTO seeding_cycles ({COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
            ),
            vec![
                Value::Text(cycle.id.clone()),
                Value::Text(cycle.pond_id.clone()),
                Value::Integer(cycle.initial_quantity),
                Value::opt_text(cycle.species.as_deref()),
                Value::opt_text(cycle.seed_source.as_deref()),
                Value::opt_text(cycle.seed_size.as_deref()),
                opt_real(cycle.avg_seed_weight_g),
                date_value(cycle.date_seeded),
                Value::Text(cycle.status.as_str().to_string()),
                Value::opt_text(cycle.closed_by.as_deref()),
                Value::opt_text(cycle.closed_at.as_deref()),
                Value::opt_text(cycle.created_by.as_deref()),
                Value::Text(cycle.created_at.clone()),
                Value::Text(cycle.updated_at.clone()),
            ],
        )
    }

    /// Statement moving `cycle` from its current status to `next`.
    ///
    /// Guarded on the status the caller read, so a concurrent transition
    /// makes the whole batch fail instead of silently overwriting it.
    pub fn transition_stmt(
        cycle: &SeedingCycle,
        next: CycleStatus,
        closed_by: Option<&str>,
        closed_at: Option<&str>,
        now: &str,
    ) -> Statement {
        Statement::guarded(
            "UPDATE seeding_cycles SET status = ?1, \
                 closed_by = COALESCE(?2, closed_by), closed_at = COALESCE(?3, closed_at), \
                 updated_at = ?4 \
             WHERE id = ?5 AND status = ?6",
            vec![
                Value::Text(next.as_str().to_string()),
                Value::opt_text(closed_by),
                Value::opt_text(closed_at),
                Value::Text(now.to_string()),
                Value::Text(cycle.id.clone()),
                Value::Text(cycle.status.as_str().to_string()),
            ],
            format!("cycle {} status {}", cycle.id, cycle.status),
        )
    }

    /// Get a cycle by ID.
    pub fn get(&self, id: &str) -> Result<SeedingCycle, ServiceError> {
        let rows = self
            .db
            .query(
                &format!("SELECT {COLUMNS} FROM seeding_cycles WHERE id = ?1"),
                &[Value::Text(id.to_string())],
            )
            .map_err(storage)?;
        let row = rows
            .first()
            .ok_or_else(|| ServiceError::NotFound(format!("seeding cycle {id}")))?;
        row_to_cycle(row)
    }

    /// The pond's `growing` cycle, if any.
    pub fn growing_for_pond(&self, pond_id: &str) -> Result<Option<SeedingCycle>, ServiceError> {
        let rows = self
            .db
            .query(
                &format!(
                    "SELECT {COLUMNS} FROM seeding_cycles WHERE pond_id = ?1 AND status = ?2"
                ),
                &[
                    Value::Text(pond_id.to_string()),
                    Value::Text(CycleStatus::Growing.as_str().to_string()),
                ],
            )
            .map_err(storage)?;
        rows.first().map(row_to_cycle).transpose()
    }

    /// All cycles of a pond, newest first.
    pub fn list_for_pond(&self, pond_id: &str) -> Result<Vec<SeedingCycle>, ServiceError> {
        let rows = self
            .db
            .query(
                &format!(
                    "SELECT {COLUMNS} FROM seeding_cycles WHERE pond_id = ?1 \
                     ORDER BY date_seeded DESC, created_at DESC"
                ),
                &[Value::Text(pond_id.to_string())],
            )
            .map_err(storage)?;
        rows.iter().map(row_to_cycle).collect()
    }
}

fn row_to_cycle(row: &Row) -> Result<SeedingCycle, ServiceError> {
    Ok(SeedingCycle {
        id: req_str(row, "id")?,
        pond_id: req_str(row, "pond_id")?,
        initial_quantity: req_i64(row, "initial_quantity")?,
        species: opt_str(row, "species"),
        seed_source: opt_str(row, "seed_source"),
        seed_size: opt_str(row, "seed_size"),
        avg_seed_weight_g: row.get_f64("avg_seed_weight_g"),
        date_seeded: req_date(row, "date_seeded")?,
        status: req_enum(row, "status", CycleStatus::from_str)?,
        closed_by: opt_str(row, "closed_by"),
        closed_at: opt_str(row, "closed_at"),
        created_by: opt_str(row, "created_by"),
        created_at: req_str(row, "created_at")?,
        updated_at: req_str(row, "updated_at")?,
    })
}
