use aquafarm_core::ServiceError;
use aquafarm_sql::SQLStore;

/// SQL DDL for the stock module.
///
/// Dates are stored as `YYYY-MM-DD` text so lexical order is date order.
/// The ledger table is append-only: triggers abort any UPDATE or DELETE.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS ponds (
        id                TEXT PRIMARY KEY,
        name              TEXT NOT NULL UNIQUE,
        length_m          REAL NOT NULL,
        width_m           REAL NOT NULL,
        depth_m           REAL NOT NULL,
        volume_m3         REAL NOT NULL,
        capacity          INTEGER NOT NULL DEFAULT 0,
        condition         TEXT NOT NULL,
        production_status TEXT NOT NULL,
        created_by        TEXT,
        created_at        TEXT NOT NULL,
        updated_at        TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS seeding_cycles (
        id                TEXT PRIMARY KEY,
        pond_id           TEXT NOT NULL REFERENCES ponds(id),
        initial_quantity  INTEGER NOT NULL CHECK (initial_quantity > 0),
        species           TEXT,
        seed_source       TEXT,
        seed_size         TEXT,
        avg_seed_weight_g REAL,
        date_seeded       TEXT NOT NULL,
        status            TEXT NOT NULL,
        closed_by         TEXT,
        closed_at         TEXT,
        created_by        TEXT,
        created_at        TEXT NOT NULL,
        updated_at        TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS stock_movements (
        id            TEXT PRIMARY KEY,
        seq           INTEGER NOT NULL UNIQUE,
        pond_id       TEXT NOT NULL REFERENCES ponds(id),
        cycle_id      TEXT REFERENCES seeding_cycles(id),
        event_type    TEXT NOT NULL,
        delta         INTEGER NOT NULL CHECK (delta <> 0),
        balance_after INTEGER NOT NULL CHECK (balance_after >= 0),
        event_date    TEXT NOT NULL,
        ref_table     TEXT,
        ref_id        TEXT,
        notes         TEXT,
        created_by    TEXT,
        created_at    TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS growth_samplings (
        id              TEXT PRIMARY KEY,
        cycle_id        TEXT NOT NULL REFERENCES seeding_cycles(id),
        pond_id         TEXT NOT NULL REFERENCES ponds(id),
        sample_date     TEXT NOT NULL,
        sample_count    INTEGER NOT NULL,
        avg_weight_g    REAL NOT NULL,
        avg_length_cm   REAL,
        mortality_count INTEGER NOT NULL DEFAULT 0,
        notes           TEXT,
        created_by      TEXT,
        created_at      TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS harvest_realizations (
        id              TEXT PRIMARY KEY,
        cycle_id        TEXT NOT NULL REFERENCES seeding_cycles(id),
        pond_id         TEXT NOT NULL REFERENCES ponds(id),
        harvest_date    TEXT NOT NULL,
        quantity        INTEGER NOT NULL,
        total_weight_kg REAL NOT NULL,
        price_per_kg    REAL,
        buyer           TEXT,
        notes           TEXT,
        created_by      TEXT,
        created_at      TEXT NOT NULL
    )",
    // One growing cycle per pond.
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_cycle_growing
        ON seeding_cycles(pond_id) WHERE status = 'growing'",
    // Idempotency: one movement per originating record and event type.
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_movement_ref
        ON stock_movements(ref_table, ref_id, event_type) WHERE ref_id IS NOT NULL",
    "CREATE INDEX IF NOT EXISTS idx_cycle_pond ON seeding_cycles(pond_id)",
    "CREATE INDEX IF NOT EXISTS idx_cycle_status ON seeding_cycles(status)",
    "CREATE INDEX IF NOT EXISTS idx_mv_cycle ON stock_movements(cycle_id, event_date, seq)",
    "CREATE INDEX IF NOT EXISTS idx_mv_pond ON stock_movements(pond_id, event_date, seq)",
    "CREATE INDEX IF NOT EXISTS idx_sampling_cycle ON growth_samplings(cycle_id, sample_date)",
    "CREATE INDEX IF NOT EXISTS idx_realization_cycle ON harvest_realizations(cycle_id)",
    "CREATE TRIGGER IF NOT EXISTS stock_movements_no_update
        BEFORE UPDATE ON stock_movements
        BEGIN SELECT RAISE(ABORT, 'stock_movements is append-only'); END",
    "CREATE TRIGGER IF NOT EXISTS stock_movements_no_delete
        BEFORE DELETE ON stock_movements
        BEGIN SELECT RAISE(ABORT, 'stock_movements is append-only'); END",
];

pub fn init_schema(sql: &dyn SQLStore) -> Result<(), ServiceError> {
    for stmt in SCHEMA {
        sql.exec(stmt, &[])
            .map_err(|e| ServiceError::Storage(format!("stock schema init failed: {e}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use aquafarm_sql::{SqliteStore, Value};

    #[test]
    fn schema_is_reentrant() {
        let db = SqliteStore::open_in_memory().unwrap();
        init_schema(&db).unwrap();
        init_schema(&db).unwrap();
    }

    #[test]
    fn ledger_rejects_update_and_delete() {
        let db = SqliteStore::open_in_memory().unwrap();
        init_schema(&db).unwrap();
        let now = Value::Text("2025-01-01T00:00:00Z".into());
        db.exec(
            "INSERT INTO ponds (id, name, length_m, width_m, depth_m, volume_m3, condition, \
             production_status, created_at, updated_at) \
             VALUES ('p1', 'A1', 1, 1, 1, 1, 'good', 'idle', ?1, ?1)",
            &[now.clone()],
        )
        .unwrap();
        db.exec(
            "INSERT INTO stock_movements (id, seq, pond_id, event_type, delta, balance_after, \
             event_date, created_at) VALUES ('m1', 1, 'p1', 'adjustment', 5, 5, '2025-01-01', ?1)",
            &[now],
        )
        .unwrap();

        assert!(db
            .exec("UPDATE stock_movements SET delta = 6 WHERE id = 'm1'", &[])
            .is_err());
        assert!(db
            .exec("DELETE FROM stock_movements WHERE id = 'm1'", &[])
            .is_err());
    }
}
