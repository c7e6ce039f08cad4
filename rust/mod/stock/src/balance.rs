use std::sync::Arc;

use chrono::NaiveDate;

use aquafarm_core::ServiceError;
use aquafarm_sql::{SQLStore, Value};

use crate::model::{
    CycleSummary, Discrepancy, EventType, ReconcileReport, SeedingCycle, StockMovement,
};
use crate::store::{LedgerStore, date_value, storage};

/// Read-only balance derivations over the ledger.
///
/// Every figure comes straight from the ledger rows; nothing here is cached
/// outside `balance_after`.
pub struct BalanceCalculator {
    db: Arc<dyn SQLStore>,
    ledger: Arc<LedgerStore>,
}

impl BalanceCalculator {
    pub fn new(db: Arc<dyn SQLStore>, ledger: Arc<LedgerStore>) -> Self {
        Self { db, ledger }
    }

    /// `balance_after` of the cycle's newest entry, 0 for an empty ledger.
    pub fn current_balance(&self, cycle_id: &str) -> Result<i64, ServiceError> {
        self.scalar(
            "SELECT balance_after AS v FROM stock_movements WHERE cycle_id = ?1 \
             ORDER BY event_date DESC, seq DESC LIMIT 1",
            &[Value::Text(cycle_id.to_string())],
        )
    }

    /// Balance at the end of `date`.
    pub fn balance_as_of(&self, cycle_id: &str, date: NaiveDate) -> Result<i64, ServiceError> {
        self.scalar(
            "SELECT balance_after AS v FROM stock_movements \
             WHERE cycle_id = ?1 AND event_date <= ?2 \
             ORDER BY event_date DESC, seq DESC LIMIT 1",
            &[Value::Text(cycle_id.to_string()), date_value(date)],
        )
    }

    /// Sum of the magnitudes of all deltas of one type. Signed types count
    /// both directions: `+5` then `-5` totals 10.
    pub fn total_by_event_type(
        &self,
        cycle_id: &str,
        event_type: EventType,
    ) -> Result<i64, ServiceError> {
        self.scalar(
            "SELECT COALESCE(SUM(ABS(delta)), 0) AS v FROM stock_movements \
             WHERE cycle_id = ?1 AND event_type = ?2",
            &[
                Value::Text(cycle_id.to_string()),
                Value::Text(event_type.as_str().to_string()),
            ],
        )
    }

    /// Sum of every delta recorded against the pond, cycle-bound or not.
    pub fn pond_balance(&self, pond_id: &str) -> Result<i64, ServiceError> {
        self.scalar(
            "SELECT COALESCE(SUM(delta), 0) AS v FROM stock_movements WHERE pond_id = ?1",
            &[Value::Text(pond_id.to_string())],
        )
    }

    /// Balance and per-type totals, read by a single statement so the
    /// figures are mutually consistent.
    pub fn cycle_summary(&self, cycle: &SeedingCycle) -> Result<CycleSummary, ServiceError> {
        let rows = self
            .db
            .query(
                "SELECT COUNT(*) AS entries,
                    COALESCE(SUM(CASE WHEN event_type = 'seeding' THEN delta END), 0) AS seeded,
                    COALESCE(SUM(CASE WHEN event_type = 'mortality' THEN ABS(delta) END), 0) AS mortality,
                    COALESCE(SUM(CASE WHEN event_type = 'harvest' THEN ABS(delta) END), 0) AS harvest,
                    COALESCE(SUM(CASE WHEN event_type = 'adjustment' THEN delta END), 0) AS adjustment,
                    COALESCE(SUM(CASE WHEN event_type = 'transfer_in' THEN ABS(delta) END), 0) AS transfer_in,
                    COALESCE(SUM(CASE WHEN event_type = 'transfer_out' THEN ABS(delta) END), 0) AS transfer_out,
                    COALESCE((SELECT balance_after FROM stock_movements WHERE cycle_id = ?1
                              ORDER BY event_date DESC, seq DESC LIMIT 1), 0) AS balance
                 FROM stock_movements WHERE cycle_id = ?1",
                &[Value::Text(cycle.id.clone())],
            )
            .map_err(storage)?;
        let row = rows
            .first()
            .ok_or_else(|| ServiceError::Internal("aggregate returned no row".into()))?;
        let col = |name: &str| row.get_i64(name).unwrap_or(0);

        let total_seeded = col("seeded");
        let total_mortality = col("mortality");
        let survival_rate = if total_seeded > 0 {
            Some(1.0 - total_mortality as f64 / total_seeded as f64)
        } else {
            None
        };

        Ok(CycleSummary {
            cycle_id: cycle.id.clone(),
            status: cycle.status,
            entries: col("entries"),
            current_balance: col("balance"),
            total_seeded,
            total_mortality,
            total_harvest: col("harvest"),
            net_adjustment: col("adjustment"),
            total_transfer_in: col("transfer_in"),
            total_transfer_out: col("transfer_out"),
            survival_rate,
        })
    }

    /// Replay a cycle's ledger and report every entry whose cached balance
    /// disagrees with the running sum of deltas.
    pub fn reconcile(&self, cycle_id: &str) -> Result<ReconcileReport, ServiceError> {
        replay(cycle_id, self.ledger.list_for_cycle(cycle_id))
    }

    fn scalar(&self, sql: &str, params: &[Value]) -> Result<i64, ServiceError> {
        let rows = self.db.query(sql, params).map_err(storage)?;
        Ok(rows.first().and_then(|r| r.get_i64("v")).unwrap_or(0))
    }
}

/// Walk `entries` in ledger order accumulating deltas.
pub fn replay<I>(cycle_id: &str, entries: I) -> Result<ReconcileReport, ServiceError>
where
    I: IntoIterator<Item = Result<StockMovement, ServiceError>>,
{
    let mut report = ReconcileReport {
        cycle_id: cycle_id.to_string(),
        entries: 0,
        ledger_sum: 0,
        discrepancies: Vec::new(),
        went_negative: false,
    };
    for entry in entries {
        let m = entry?;
        report.entries += 1;
        report.ledger_sum += m.delta;
        if report.ledger_sum < 0 {
            report.went_negative = true;
        }
        if m.balance_after != report.ledger_sum {
            report.discrepancies.push(Discrepancy {
                movement_id: m.id,
                seq: m.seq,
                expected_balance: report.ledger_sum,
                cached_balance: m.balance_after,
            });
        }
    }
    Ok(report)
}
