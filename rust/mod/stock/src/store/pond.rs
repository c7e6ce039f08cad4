use std::sync::Arc;

use aquafarm_core::{ListParams, ListResult, ServiceError};
use aquafarm_sql::{Row, SQLStore, Statement, Value};

use super::{req_enum, req_f64, req_i64, req_str, opt_str, storage};
use crate::model::{Pond, PondCondition, ProductionStatus};

const COLUMNS: &str = "id, name, length_m, width_m, depth_m, volume_m3, capacity, condition, \
                       production_status, created_by, created_at, updated_at";

/// Persistent storage for ponds.
pub struct PondStore {
    db: Arc<dyn SQLStore>,
}

impl PondStore {
    pub fn new(db: Arc<dyn SQLStore>) -> Self {
        Self { db }
    }

    /// Insert a new pond.
    pub fn create(&self, pond: &Pond) -> Result<(), ServiceError> {
        self.db
            .exec(
                &format!(
                    "INSERT INTO ponds ({COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
                ),
                &[
                    Value::Text(pond.id.clone()),
                    Value::Text(pond.name.clone()),
                    Value::Real(pond.length_m),
                    Value::Real(pond.width_m),
                    Value::Real(pond.depth_m),
                    Value::Real(pond.volume_m3),
                    Value::Integer(pond.capacity),
                    Value::Text(pond.condition.as_str().to_string()),
                    Value::Text(pond.production_status.as_str().to_string()),
                    Value::opt_text(pond.created_by.as_deref()),
                    Value::Text(pond.created_at.clone()),
                    Value::Text(pond.updated_at.clone()),
                ],
            )
            .map_err(|e| {
                if e.is_unique_violation("ponds.name") {
                    ServiceError::Validation(format!("pond name {:?} already exists", pond.name))
                } else {
                    storage(e)
                }
            })?;
        Ok(())
    }

    /// Get a pond by ID.
    pub fn get(&self, id: &str) -> Result<Pond, ServiceError> {
        let rows = self
            .db
            .query(
                &format!("SELECT {COLUMNS} FROM ponds WHERE id = ?1"),
                &[Value::Text(id.to_string())],
            )
            .map_err(storage)?;
        let row = rows
            .first()
            .ok_or_else(|| ServiceError::NotFound(format!("pond {id}")))?;
        row_to_pond(row)
    }

    /// Overwrite the caller-editable fields. Production status is derived
    /// and never written here.
    pub fn update(&self, pond: &Pond) -> Result<(), ServiceError> {
        let affected = self
            .db
            .exec(
                "UPDATE ponds SET name = ?1, length_m = ?2, width_m = ?3, depth_m = ?4, \
                 volume_m3 = ?5, capacity = ?6, condition = ?7, updated_at = ?8 WHERE id = ?9",
                &[
                    Value::Text(pond.name.clone()),
                    Value::Real(pond.length_m),
                    Value::Real(pond.width_m),
                    Value::Real(pond.depth_m),
                    Value::Real(pond.volume_m3),
                    Value::Integer(pond.capacity),
                    Value::Text(pond.condition.as_str().to_string()),
                    Value::Text(pond.updated_at.clone()),
                    Value::Text(pond.id.clone()),
                ],
            )
            .map_err(|e| {
                if e.is_unique_violation("ponds.name") {
                    ServiceError::Validation(format!("pond name {:?} already exists", pond.name))
                } else {
                    storage(e)
                }
            })?;
        if affected == 0 {
            return Err(ServiceError::NotFound(format!("pond {}", pond.id)));
        }
        Ok(())
    }

    /// List ponds ordered by name.
    pub fn list(&self, params: &ListParams) -> Result<ListResult<Pond>, ServiceError> {
        let count_rows = self
            .db
            .query("SELECT COUNT(*) AS cnt FROM ponds", &[])
            .map_err(storage)?;
        let total = count_rows
            .first()
            .and_then(|r| r.get_i64("cnt"))
            .unwrap_or(0) as usize;

        let (limit, offset) = params.sql_window();
        let rows = self
            .db
            .query(
                &format!("SELECT {COLUMNS} FROM ponds ORDER BY name ASC LIMIT ?1 OFFSET ?2"),
                &[Value::Integer(limit), Value::Integer(offset)],
            )
            .map_err(storage)?;
        let items = rows.iter().map(row_to_pond).collect::<Result<Vec<_>, _>>()?;
        Ok(ListResult::new(items, total, params))
    }

    /// Statement re-deriving `production_status` from the pond's cycles.
    /// Meant to run inside the same batch that changed a cycle's status.
    pub fn refresh_status_stmt(pond_id: &str, now: &str) -> Statement {
        Statement::guarded(
            "UPDATE ponds SET production_status = CASE WHEN EXISTS (\
                 SELECT 1 FROM seeding_cycles WHERE pond_id = ?1 AND status <> 'closed'\
             ) THEN 'active' ELSE 'idle' END, updated_at = ?2 WHERE id = ?1",
            vec![Value::Text(pond_id.to_string()), Value::Text(now.to_string())],
            format!("pond {pond_id}"),
        )
    }
}

fn row_to_pond(row: &Row) -> Result<Pond, ServiceError> {
    Ok(Pond {
        id: req_str(row, "id")?,
        name: req_str(row, "name")?,
        length_m: req_f64(row, "length_m")?,
        width_m: req_f64(row, "width_m")?,
        depth_m: req_f64(row, "depth_m")?,
        volume_m3: req_f64(row, "volume_m3")?,
        capacity: req_i64(row, "capacity")?,
        condition: req_enum(row, "condition", PondCondition::from_str)?,
        production_status: req_enum(row, "production_status", ProductionStatus::from_str)?,
        created_by: opt_str(row, "created_by"),
        created_at: req_str(row, "created_at")?,
        updated_at: req_str(row, "updated_at")?,
    })
}
