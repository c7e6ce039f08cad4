use std::collections::VecDeque;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info};

use aquafarm_core::{ListParams, ListResult, ServiceError, new_id, now_rfc3339};
use aquafarm_sql::{Row, SQLError, SQLStore, Statement, Value};

use super::{date_value, opt_str, req_date, req_enum, req_i64, req_str, storage};
use crate::model::{EventType, LedgerHead, MovementDraft, MovementListQuery, StockMovement};

const COLUMNS: &str = "id, seq, pond_id, cycle_id, event_type, delta, balance_after, event_date, \
                       ref_table, ref_id, notes, created_by, created_at";

/// Newest-first ordering of a ledger. `seq` is the insertion order and
/// breaks ties between entries dated the same day.
const NEWEST_FIRST: &str = "ORDER BY event_date DESC, seq DESC";

/// Which ledger a read or append addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerScope {
    /// Entries of one seeding cycle.
    Cycle(String),
    /// Every entry of a pond, cycle-bound or not.
    Pond(String),
    /// A pond's entries that belong to no cycle.
    PondLevel(String),
}

impl LedgerScope {
    fn of(draft: &MovementDraft) -> Self {
        match &draft.cycle_id {
            Some(cycle_id) => Self::Cycle(cycle_id.clone()),
            None => Self::PondLevel(draft.pond_id.clone()),
        }
    }

    /// WHERE fragment bound at parameter `?{idx}`.
    fn filter(&self, idx: usize) -> (String, Value) {
        match self {
            Self::Cycle(id) => (format!("cycle_id = ?{idx}"), Value::Text(id.clone())),
            Self::Pond(id) => (format!("pond_id = ?{idx}"), Value::Text(id.clone())),
            Self::PondLevel(id) => (
                format!("pond_id = ?{idx} AND cycle_id IS NULL"),
                Value::Text(id.clone()),
            ),
        }
    }
}

impl std::fmt::Display for LedgerScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cycle(id) => write!(f, "cycle {id}"),
            Self::Pond(id) => write!(f, "pond {id}"),
            Self::PondLevel(id) => write!(f, "pond {id} (no cycle)"),
        }
    }
}

/// Everything one business operation writes, committed as a unit.
#[derive(Debug, Default)]
pub struct LedgerWrite {
    /// Statements that must run before the entries (e.g. inserting the
    /// cycle or the originating record).
    pub before: Vec<Statement>,
    pub drafts: Vec<MovementDraft>,
    /// Statements that must run after the entries (status transitions).
    pub after: Vec<Statement>,
}

impl LedgerWrite {
    pub fn single(draft: MovementDraft) -> Self {
        Self {
            drafts: vec![draft],
            ..Default::default()
        }
    }
}

/// Append-only store of stock movements.
///
/// There is no update or delete; the table additionally carries triggers
/// that abort either.
pub struct LedgerStore {
    db: Arc<dyn SQLStore>,
    page_size: usize,
}

impl LedgerStore {
    pub fn new(db: Arc<dyn SQLStore>, page_size: usize) -> Self {
        Self {
            db,
            page_size: page_size.max(1),
        }
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Append one entry. See [`LedgerStore::commit`].
    pub fn append(&self, draft: MovementDraft) -> Result<StockMovement, ServiceError> {
        let mut written = self.commit(LedgerWrite::single(draft))?;
        written
            .pop()
            .ok_or_else(|| ServiceError::Internal("append wrote no entry".into()))
    }

    /// Persist a batch of entries and accompanying statements atomically.
    ///
    /// Each entry gets a fresh id, the next global `seq`, and
    /// `balance_after = head.balance + delta`. The insert only happens if
    /// the ledger's newest entry is still the one the draft was validated
    /// against; otherwise nothing is written and the call fails with
    /// `Conflict`.
    ///
    /// If an entry's source reference was already recorded, the existing
    /// entries are returned instead and nothing is written.
    pub fn commit(&self, write: LedgerWrite) -> Result<Vec<StockMovement>, ServiceError> {
        let LedgerWrite {
            before,
            drafts,
            after,
        } = write;

        let now = now_rfc3339();
        let ids: Vec<String> = drafts.iter().map(|_| new_id()).collect();

        let mut statements = before;
        for (id, draft) in ids.iter().zip(&drafts) {
            statements.push(append_stmt(id, draft, &now)?);
        }
        statements.extend(after);

        if let Err(e) = self.db.exec_atomic(&statements) {
            return self.resolve_commit_error(e, &drafts);
        }

        let written = ids
            .iter()
            .map(|id| self.get(id))
            .collect::<Result<Vec<_>, _>>()?;
        for m in &written {
            debug!(
                "ledger append {} seq={} {} delta={} balance_after={}",
                m.id, m.seq, m.event_type, m.delta, m.balance_after
            );
        }
        Ok(written)
    }

    /// Translate a failed batch into the service taxonomy.
    fn resolve_commit_error(
        &self,
        e: SQLError,
        drafts: &[MovementDraft],
    ) -> Result<Vec<StockMovement>, ServiceError> {
        if e.is_unique_violation("stock_movements.ref_id") {
            let mut existing = Vec::with_capacity(drafts.len());
            for draft in drafts {
                let found = match &draft.source {
                    Some(src) => self.find_by_ref(&src.table, &src.id, draft.event_type)?,
                    None => None,
                };
                match found {
                    Some(m) => existing.push(m),
                    None => {
                        return Err(ServiceError::Conflict(
                            "source already recorded by a different operation".into(),
                        ));
                    }
                }
            }
            info!("idempotent replay: returning {} existing entries", existing.len());
            return Ok(existing);
        }

        Err(match e {
            SQLError::NoRowsAffected(label) => {
                ServiceError::Conflict(format!("concurrent change on {label}; retry"))
            }
            ref c if c.is_unique_violation("seeding_cycles.pond_id") => {
                ServiceError::Validation("pond already has a growing cycle".into())
            }
            SQLError::Constraint(msg) if msg.contains("balance_after") => {
                ServiceError::InsufficientStock(format!("balance would go negative: {msg}"))
            }
            other => storage(other),
        })
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Newest entry and entry count of a ledger.
    pub fn head(&self, scope: &LedgerScope) -> Result<LedgerHead, ServiceError> {
        let (filter, value) = scope.filter(1);
        let rows = self
            .db
            .query(
                &format!(
                    "SELECT id, balance_after, event_date, \
                         (SELECT COUNT(*) FROM stock_movements WHERE {filter}) AS entries \
                     FROM stock_movements WHERE {filter} {NEWEST_FIRST} LIMIT 1"
                ),
                &[value],
            )
            .map_err(storage)?;

        match rows.first() {
            None => Ok(LedgerHead::default()),
            Some(row) => Ok(LedgerHead {
                last_id: Some(req_str(row, "id")?),
                balance: req_i64(row, "balance_after")?,
                last_event_date: Some(req_date(row, "event_date")?),
                entries: req_i64(row, "entries")?,
            }),
        }
    }

    /// Get a movement by ID.
    pub fn get(&self, id: &str) -> Result<StockMovement, ServiceError> {
        let rows = self
            .db
            .query(
                &format!("SELECT {COLUMNS} FROM stock_movements WHERE id = ?1"),
                &[Value::Text(id.to_string())],
            )
            .map_err(storage)?;
        let row = rows
            .first()
            .ok_or_else(|| ServiceError::NotFound(format!("stock movement {id}")))?;
        row_to_movement(row)
    }

    /// The entry recorded for an idempotency key, if any.
    pub fn find_by_ref(
        &self,
        ref_table: &str,
        ref_id: &str,
        event_type: EventType,
    ) -> Result<Option<StockMovement>, ServiceError> {
        let rows = self
            .db
            .query(
                &format!(
                    "SELECT {COLUMNS} FROM stock_movements \
                     WHERE ref_table = ?1 AND ref_id = ?2 AND event_type = ?3"
                ),
                &[
                    Value::Text(ref_table.to_string()),
                    Value::Text(ref_id.to_string()),
                    Value::Text(event_type.as_str().to_string()),
                ],
            )
            .map_err(storage)?;
        rows.first().map(row_to_movement).transpose()
    }

    /// Lazily iterate a cycle's entries oldest first.
    pub fn list_for_cycle(&self, cycle_id: &str) -> MovementCursor<'_> {
        MovementCursor::new(self, LedgerScope::Cycle(cycle_id.to_string()))
    }

    /// Lazily iterate all of a pond's entries oldest first.
    pub fn list_for_pond(&self, pond_id: &str) -> MovementCursor<'_> {
        MovementCursor::new(self, LedgerScope::Pond(pond_id.to_string()))
    }

    /// Offset-paged listing, newest first, for the HTTP layer.
    pub fn page(
        &self,
        scope: &LedgerScope,
        query: &MovementListQuery,
    ) -> Result<ListResult<StockMovement>, ServiceError> {
        let window = ListParams::new(query.limit, query.offset);
        let (limit, offset) = window.sql_window();

        let (filter, value) = scope.filter(1);
        let mut where_sql = format!("WHERE {filter}");
        let mut params = vec![value];
        if let Some(raw) = &query.event_type {
            let t = EventType::from_str(raw)
                .ok_or_else(|| ServiceError::Validation(format!("unknown event type {raw:?}")))?;
            where_sql.push_str(" AND event_type = ?2");
            params.push(Value::Text(t.as_str().to_string()));
        }

        let count_rows = self
            .db
            .query(
                &format!("SELECT COUNT(*) AS cnt FROM stock_movements {where_sql}"),
                &params,
            )
            .map_err(storage)?;
        let total = count_rows
            .first()
            .and_then(|r| r.get_i64("cnt"))
            .unwrap_or(0) as usize;

        let idx = params.len() + 1;
        let mut select_params = params;
        select_params.push(Value::Integer(limit));
        select_params.push(Value::Integer(offset));
        let rows = self
            .db
            .query(
                &format!(
                    "SELECT {COLUMNS} FROM stock_movements {where_sql} {NEWEST_FIRST} \
                     LIMIT ?{idx} OFFSET ?{}",
                    idx + 1
                ),
                &select_params,
            )
            .map_err(storage)?;
        let items = rows
            .iter()
            .map(row_to_movement)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ListResult::new(items, total, &window))
    }
}

/// Conditional insert of one draft: only lands if the scope's newest
/// entry is still `draft.head.last_id` (empty string for an empty ledger).
fn append_stmt(id: &str, draft: &MovementDraft, now: &str) -> Result<Statement, ServiceError> {
    let balance_after = draft
        .head
        .balance
        .checked_add(draft.delta)
        .ok_or_else(|| ServiceError::Validation("quantity out of range".into()))?;
    let scope = LedgerScope::of(draft);
    let (filter, scope_value) = scope.filter(13);

    let (ref_table, ref_id) = match &draft.source {
        Some(src) => (Value::Text(src.table.clone()), Value::Text(src.id.clone())),
        None => (Value::Null, Value::Null),
    };

    Ok(Statement::guarded(
        format!(
            "INSERT INTO stock_movements ({COLUMNS}) \
             SELECT ?1, (SELECT COALESCE(MAX(seq), 0) + 1 FROM stock_movements), \
                    ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12 \
             WHERE COALESCE((SELECT id FROM stock_movements WHERE {filter} {NEWEST_FIRST} LIMIT 1), '') = ?14"
        ),
        vec![
            Value::Text(id.to_string()),
            Value::Text(draft.pond_id.clone()),
            Value::opt_text(draft.cycle_id.as_deref()),
            Value::Text(draft.event_type.as_str().to_string()),
            Value::Integer(draft.delta),
            Value::Integer(balance_after),
            date_value(draft.event_date),
            ref_table,
            ref_id,
            Value::opt_text(draft.notes.as_deref()),
            Value::opt_text(draft.created_by.as_deref()),
            Value::Text(now.to_string()),
            scope_value,
            Value::Text(draft.head.last_id.clone().unwrap_or_default()),
        ],
        format!("ledger of {scope}"),
    ))
}

fn row_to_movement(row: &Row) -> Result<StockMovement, ServiceError> {
    Ok(StockMovement {
        id: req_str(row, "id")?,
        seq: req_i64(row, "seq")?,
        pond_id: req_str(row, "pond_id")?,
        cycle_id: opt_str(row, "cycle_id"),
        event_type: req_enum(row, "event_type", EventType::from_str)?,
        delta: req_i64(row, "delta")?,
        balance_after: req_i64(row, "balance_after")?,
        event_date: req_date(row, "event_date")?,
        ref_table: opt_str(row, "ref_table"),
        ref_id: opt_str(row, "ref_id"),
        notes: opt_str(row, "notes"),
        created_by: opt_str(row, "created_by"),
        created_at: req_str(row, "created_at")?,
    })
}

// ---------------------------------------------------------------------------
// MovementCursor
// ---------------------------------------------------------------------------

/// Oldest-first iterator over a ledger, fetched one page at a time with a
/// keyset on `(event_date, seq)`.
///
/// Finite: it stops after the entry that was newest when its last page was
/// read. Restartable: ask the store for a new cursor. A storage error is
/// yielded once and ends the iteration.
pub struct MovementCursor<'a> {
    store: &'a LedgerStore,
    scope: LedgerScope,
    last: Option<(NaiveDate, i64)>,
    buffer: VecDeque<StockMovement>,
    exhausted: bool,
}

impl<'a> MovementCursor<'a> {
    fn new(store: &'a LedgerStore, scope: LedgerScope) -> Self {
        Self {
            store,
            scope,
            last: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    fn fill(&mut self) -> Result<(), ServiceError> {
        let (filter, value) = self.scope.filter(1);
        let mut sql = format!("SELECT {COLUMNS} FROM stock_movements WHERE {filter}");
        let mut params = vec![value];
        if let Some((date, seq)) = self.last {
            sql.push_str(" AND (event_date > ?2 OR (event_date = ?2 AND seq > ?3))");
            params.push(date_value(date));
            params.push(Value::Integer(seq));
        }
        sql.push_str(&format!(
            " ORDER BY event_date ASC, seq ASC LIMIT ?{}",
            params.len() + 1
        ));
        params.push(Value::Integer(self.store.page_size as i64));

        let rows = self.store.db.query(&sql, &params).map_err(storage)?;
        if rows.len() < self.store.page_size {
            self.exhausted = true;
        }
        for row in &rows {
            self.buffer.push_back(row_to_movement(row)?);
        }
        Ok(())
    }
}

impl Iterator for MovementCursor<'_> {
    type Item = Result<StockMovement, ServiceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        let m = self.buffer.pop_front()?;
        self.last = Some((m.event_date, m.seq));
        Some(Ok(m))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourceRef;
    use aquafarm_sql::SqliteStore;

    fn setup(page_size: usize) -> LedgerStore {
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
        LedgerStore::new(db, page_size)
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    fn draft(store: &LedgerStore, t: EventType, delta: i64, date: NaiveDate) -> MovementDraft {
        MovementDraft {
            pond_id: "p1".into(),
            cycle_id: Some("c1".into()),
            event_type: t,
            delta,
            event_date: date,
            source: None,
            notes: None,
            created_by: None,
            head: store.head(&LedgerScope::Cycle("c1".into())).unwrap(),
        }
    }

    #[test]
    fn append_assigns_seq_and_balance() {
        let store = setup(10);
        let a = store
            .append(draft(&store, EventType::Seeding, 1000, day(1)))
            .unwrap();
        let b = store
            .append(draft(&store, EventType::Mortality, -50, day(10)))
            .unwrap();

        assert_eq!(a.balance_after, 1000);
        assert_eq!(b.balance_after, 950);
        assert!(b.seq > a.seq);

        let head = store.head(&LedgerScope::Cycle("c1".into())).unwrap();
        assert_eq!(head.balance, 950);
        assert_eq!(head.entries, 2);
        assert_eq!(head.last_id.as_deref(), Some(b.id.as_str()));
        assert_eq!(head.last_event_date, Some(day(10)));
    }

    #[test]
    fn stale_head_is_a_conflict() {
        let store = setup(10);
        store
            .append(draft(&store, EventType::Seeding, 1000, day(1)))
            .unwrap();

        let first = draft(&store, EventType::Harvest, -100, day(2));
        let second = draft(&store, EventType::Harvest, -100, day(2));
        store.append(first).unwrap();

        let err = store.append(second).unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
        assert_eq!(store.head(&LedgerScope::Cycle("c1".into())).unwrap().entries, 2);
    }

    #[test]
    fn duplicate_source_returns_existing_entry() {
        let store = setup(10);
        store
            .append(draft(&store, EventType::Seeding, 1000, day(1)))
            .unwrap();

        let mut d = draft(&store, EventType::Harvest, -200, day(5));
        d.source = Some(SourceRef::new("harvest_realizations", "hr-1"));
        let first = store.append(d.clone()).unwrap();

        // Same key, fresh head: the unique index rejects it, the store
        // answers with the original entry.
        let mut again = draft(&store, EventType::Harvest, -200, day(5));
        again.source = d.source.clone();
        let replay = store.append(again).unwrap();

        assert_eq!(replay, first);
        assert_eq!(store.head(&LedgerScope::Cycle("c1".into())).unwrap().balance, 800);
        assert_eq!(
            store
                .find_by_ref("harvest_realizations", "hr-1", EventType::Harvest)
                .unwrap()
                .unwrap()
                .id,
            first.id
        );
    }

    #[test]
    fn negative_balance_is_refused_by_the_table() {
        let store = setup(10);
        store
            .append(draft(&store, EventType::Seeding, 10, day(1)))
            .unwrap();
        let err = store
            .append(draft(&store, EventType::Harvest, -11, day(2)))
            .unwrap_err();
        assert!(matches!(err, ServiceError::InsufficientStock(_)));
    }

    #[test]
    fn cursor_pages_through_all_entries_in_order() {
        let store = setup(2);
        store
            .append(draft(&store, EventType::Seeding, 100, day(1)))
            .unwrap();
        for d in 2..=6 {
            store
                .append(draft(&store, EventType::Mortality, -1, day(d)))
                .unwrap();
        }

        let all: Vec<StockMovement> = store
            .list_for_cycle("c1")
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(all.len(), 6);
        assert_eq!(all[0].event_type, EventType::Seeding);
        assert!(all.windows(2).all(|w| w[0].seq < w[1].seq));
        assert_eq!(all.last().unwrap().balance_after, 95);

        // Restart from scratch.
        assert_eq!(store.list_for_cycle("c1").count(), 6);
        assert_eq!(store.list_for_pond("p1").count(), 6);
        assert_eq!(store.list_for_cycle("other").count(), 0);
    }

    #[test]
    fn page_filters_by_event_type() {
        let store = setup(10);
        store
            .append(draft(&store, EventType::Seeding, 100, day(1)))
            .unwrap();
        store
            .append(draft(&store, EventType::Mortality, -3, day(2)))
            .unwrap();
        store
            .append(draft(&store, EventType::Mortality, -4, day(3)))
            .unwrap();

        let scope = LedgerScope::Cycle("c1".into());
        let result = store
            .page(
                &scope,
                &MovementListQuery {
                    event_type: Some("mortality".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(result.total, 2);
        assert_eq!(result.items[0].delta, -4);

        let err = store
            .page(
                &scope,
                &MovementListQuery {
                    event_type: Some("theft".into()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }
}
