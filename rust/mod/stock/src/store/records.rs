use std::sync::Arc;

use chrono::NaiveDate;

use aquafarm_core::ServiceError;
use aquafarm_sql::{Row, SQLStore, Statement, Value};

use super::{date_value, opt_real, opt_str, req_date, req_f64, req_i64, req_str, storage};
use crate::model::{GrowthSampling, HarvestRealization};

const SAMPLING_COLUMNS: &str = "id, cycle_id, pond_id, sample_date, sample_count, avg_weight_g, \
                                avg_length_cm, mortality_count, notes, created_by, created_at";

const REALIZATION_COLUMNS: &str = "id, cycle_id, pond_id, harvest_date, quantity, \
                                   total_weight_kg, price_per_kg, buyer, notes, created_by, created_at";

/// Growth samplings and harvest realizations: the business records that
/// originate ledger entries.
pub struct RecordStore {
    db: Arc<dyn SQLStore>,
}

impl RecordStore {
    pub fn new(db: Arc<dyn SQLStore>) -> Self {
        Self { db }
    }

    pub fn insert_sampling_stmt(s: &GrowthSampling) -> Statement {
        Statement::new(
            format!(
                "INSERT INTO growth_samplings ({SAMPLING_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            vec![
                Value::Text(s.id.clone()),
                Value::Text(s.cycle_id.clone()),
                Value::Text(s.pond_id.clone()),
                date_value(s.sample_date),
                Value::Integer(s.sample_count),
                Value::Real(s.avg_weight_g),
                opt_real(s.avg_length_cm),
                Value::Integer(s.mortality_count),
                Value::opt_text(s.notes.as_deref()),
                Value::opt_text(s.created_by.as_deref()),
                Value::Text(s.created_at.clone()),
            ],
        )
    }

    pub fn insert_realization_stmt(r: &HarvestRealization) -> Statement {
        Statement::new(
            format!(
                "INSERT INTO harvest_realizations ({REALIZATION_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            vec![
                Value::Text(r.id.clone()),
                Value::Text(r.cycle_id.clone()),
                Value::Text(r.pond_id.clone()),
                date_value(r.harvest_date),
                Value::Integer(r.quantity),
                Value::Real(r.total_weight_kg),
                opt_real(r.price_per_kg),
                Value::opt_text(r.buyer.as_deref()),
                Value::opt_text(r.notes.as_deref()),
                Value::opt_text(r.created_by.as_deref()),
                Value::Text(r.created_at.clone()),
            ],
        )
    }

    pub fn get_sampling(&self, id: &str) -> Result<Option<GrowthSampling>, ServiceError> {
        let rows = self
            .db
            .query(
                &format!("SELECT {SAMPLING_COLUMNS} FROM growth_samplings WHERE id = ?1"),
                &[Value::Text(id.to_string())],
            )
            .map_err(storage)?;
        rows.first().map(row_to_sampling).transpose()
    }

    /// Most recent sampling of a cycle taken on or before `date`.
    pub fn latest_sampling(
        &self,
        cycle_id: &str,
        on_or_before: NaiveDate,
    ) -> Result<Option<GrowthSampling>, ServiceError> {
        let rows = self
            .db
            .query(
                &format!(
                    "SELECT {SAMPLING_COLUMNS} FROM growth_samplings \
                     WHERE cycle_id = ?1 AND sample_date <= ?2 \
                     ORDER BY sample_date DESC, created_at DESC LIMIT 1"
                ),
                &[Value::Text(cycle_id.to_string()), date_value(on_or_before)],
            )
            .map_err(storage)?;
        rows.first().map(row_to_sampling).transpose()
    }

    /// A cycle's samplings, oldest first.
    pub fn list_samplings(&self, cycle_id: &str) -> Result<Vec<GrowthSampling>, ServiceError> {
        let rows = self
            .db
            .query(
                &format!(
                    "SELECT {SAMPLING_COLUMNS} FROM growth_samplings WHERE cycle_id = ?1 \
                     ORDER BY sample_date ASC, created_at ASC"
                ),
                &[Value::Text(cycle_id.to_string())],
            )
            .map_err(storage)?;
        rows.iter().map(row_to_sampling).collect()
    }

    pub fn get_realization(&self, id: &str) -> Result<Option<HarvestRealization>, ServiceError> {
        let rows = self
            .db
            .query(
                &format!("SELECT {REALIZATION_COLUMNS} FROM harvest_realizations WHERE id = ?1"),
                &[Value::Text(id.to_string())],
            )
            .map_err(storage)?;
        rows.first().map(row_to_realization).transpose()
    }

    /// A cycle's harvest realizations, oldest first.
    pub fn list_realizations(
        &self,
        cycle_id: &str,
    ) -> Result<Vec<HarvestRealization>, ServiceError> {
        let rows = self
            .db
            .query(
                &format!(
                    "SELECT {REALIZATION_COLUMNS} FROM harvest_realizations WHERE cycle_id = ?1 \
                     ORDER BY harvest_date ASC, created_at ASC"
                ),
                &[Value::Text(cycle_id.to_string())],
            )
            .map_err(storage)?;
        rows.iter().map(row_to_realization).collect()
    }
}

fn row_to_sampling(row: &Row) -> Result<GrowthSampling, ServiceError> {
    Ok(GrowthSampling {
        id: req_str(row, "id")?,
        cycle_id: req_str(row, "cycle_id")?,
        pond_id: req_str(row, "pond_id")?,
        sample_date: req_date(row, "sample_date")?,
        sample_count: req_i64(row, "sample_count")?,
        avg_weight_g: req_f64(row, "avg_weight_g")?,
        avg_length_cm: row.get_f64("avg_length_cm"),
        mortality_count: req_i64(row, "mortality_count")?,
        notes: opt_str(row, "notes"),
        created_by: opt_str(row, "created_by"),
        created_at: req_str(row, "created_at")?,
    })
}

fn row_to_realization(row: &Row) -> Result<HarvestRealization, ServiceError> {
    Ok(HarvestRealization {
        id: req_str(row, "id")?,
        cycle_id: req_str(row, "cycle_id")?,
        pond_id: req_str(row, "pond_id")?,
        harvest_date: req_date(row, "harvest_date")?,
        quantity: req_i64(row, "quantity")?,
        total_weight_kg: req_f64(row, "total_weight_kg")?,
        price_per_kg: row.get_f64("price_per_kg"),
        buyer: opt_str(row, "buyer"),
        notes: opt_str(row, "notes"),
        created_by: opt_str(row, "created_by"),
        created_at: req_str(row, "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use aquafarm_sql::SqliteStore;

    fn setup() -> (Arc<dyn SQLStore>, RecordStore) {
        let db: Arc<dyn SQLStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        crate::schema::init_schema(db.as_ref()).unwrap();
        db.exec(
            "INSERT INTO ponds (id, name, length_m, width_m, depth_m, volume_m3, condition, \
             production_status, created_at, updated_at) \
             VALUES ('p1', 'A1', 10, 10, 1, 100, 'good', 'active', 'now', 'now')",
            &[],
        )
        .unwrap();
        db.exec(
            "INSERT INTO seeding_cycles (id, pond_id, initial_quantity, date_seeded, status, \
             created_at, updated_at) VALUES ('c1', 'p1', 1000, '2025-01-01', 'growing', 'now', 'now')",
            &[],
        )
        .unwrap();
        let store = RecordStore::new(Arc::clone(&db));
        (db, store)
    }

    fn sampling(id: &str, date: NaiveDate, weight: f64) -> GrowthSampling {
        GrowthSampling {
            id: id.into(),
            cycle_id: "c1".into(),
            pond_id: "p1".into(),
            sample_date: date,
            sample_count: 30,
            avg_weight_g: weight,
            avg_length_cm: None,
            mortality_count: 0,
            notes: None,
            created_by: None,
            created_at: "now".into(),
        }
    }

    fn day(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, d).unwrap()
    }

    #[test]
    fn latest_sampling_respects_cutoff() {
        let (db, store) = setup();
        db.exec_atomic(&[
            RecordStore::insert_sampling_stmt(&sampling("s1", day(1, 15), 12.5)),
            RecordStore::insert_sampling_stmt(&sampling("s2", day(2, 15), 40.0)),
        ])
        .unwrap();

        let early = store.latest_sampling("c1", day(2, 1)).unwrap().unwrap();
        assert_eq!(early.id, "s1");
        let late = store.latest_sampling("c1", day(3, 1)).unwrap().unwrap();
        assert_eq!(late.avg_weight_g, 40.0);
        assert!(store.latest_sampling("c1", day(1, 1)).unwrap().is_none());
        assert_eq!(store.list_samplings("c1").unwrap().len(), 2);
    }

    #[test]
    fn realization_round_trip() {
        let (db, store) = setup();
        let r = HarvestRealization {
            id: "hr-1".into(),
            cycle_id: "c1".into(),
            pond_id: "p1".into(),
            harvest_date: day(3, 1),
            quantity: 900,
            total_weight_kg: 225.0,
            price_per_kg: Some(28000.0),
            buyer: Some("market".into()),
            notes: None,
            created_by: None,
            created_at: "now".into(),
        };
        db.exec_atomic(&[RecordStore::insert_realization_stmt(&r)])
            .unwrap();

        assert_eq!(store.get_realization("hr-1").unwrap(), Some(r));
        assert!(store.get_realization("hr-2").unwrap().is_none());
        assert_eq!(store.list_realizations("c1").unwrap().len(), 1);
    }
}
