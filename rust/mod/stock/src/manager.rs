use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use aquafarm_core::{ServiceError, new_id, now_rfc3339};
use aquafarm_sql::{SQLError, SQLStore, Statement};

use crate::balance::BalanceCalculator;
use crate::config::LedgerConfig;
use crate::locks::{LockRegistry, cycle_key, pond_key, pond_level_key};
use crate::model::{
    AdjustmentRequest, CloseCycleRequest, CreatePondRequest, CycleStatus, CycleSummary,
    EventType, GrowthSampling, HarvestEstimate, HarvestRealization, HarvestRecorded,
    HarvestRequest, MortalityRequest, MovementDraft, OpenCycleRequest, Pond, RealizationRequest,
    ReconcileReport, SamplingRecorded, SamplingRequest, SeedingCycle, SourceRef, StockMovement,
    TransferRecorded, TransferRequest, UpdatePondRequest, ref_table, water_volume_m3,
};
use crate::schema;
use crate::store::{CycleStore, LedgerScope, LedgerStore, LedgerWrite, PondStore, RecordStore};
use crate::validator::{MovementValidator, ProposedMovement};

/// A ledger event addressed to one cycle, plus the business records that
/// must be written with it.
struct CycleEvent {
    event_type: EventType,
    delta: i64,
    date: NaiveDate,
    source: Option<SourceRef>,
    notes: Option<String>,
    created_by: Option<String>,
    records: Vec<Statement>,
}

/// Owns the seeding-cycle lifecycle and is the only writer of the ledger.
///
/// Every mutating operation runs under a keyed lock (per cycle, per pond
/// for opens, per pond for cycle-less entries), reads the ledger head,
/// validates, and commits the entries together with any record rows and
/// status changes in one transaction.
///
/// Lifecycle:
///
/// ```text
/// growing ──(first harvest / begin_harvest)──→ harvest ──(close / depletion)──→ closed
///    └──────────────────────(close)──────────────────────────────────────────────↗
/// ```
pub struct SeedingCycleManager {
    db: Arc<dyn SQLStore>,
    ponds: PondStore,
    cycles: CycleStore,
    ledger: Arc<LedgerStore>,
    records: RecordStore,
    balance: BalanceCalculator,
    locks: LockRegistry,
    config: LedgerConfig,
}

impl SeedingCycleManager {
    /// Create the manager and make sure the schema exists.
    pub fn new(db: Arc<dyn SQLStore>, config: LedgerConfig) -> Result<Self, ServiceError> {
        schema::init_schema(db.as_ref())?;
        let ledger = Arc::new(LedgerStore::new(Arc::clone(&db), config.page_size));
        Ok(Self {
            ponds: PondStore::new(Arc::clone(&db)),
            cycles: CycleStore::new(Arc::clone(&db)),
            records: RecordStore::new(Arc::clone(&db)),
            balance: BalanceCalculator::new(Arc::clone(&db), Arc::clone(&ledger)),
            locks: LockRegistry::new(config.lock_timeout()),
            ledger,
            db,
            config,
        })
    }

    pub fn ponds(&self) -> &PondStore {
        &self.ponds
    }

    pub fn cycles(&self) -> &CycleStore {
        &self.cycles
    }

    pub fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn balance(&self) -> &BalanceCalculator {
        &self.balance
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    // =======================================================================
    // Ponds
    // =======================================================================

    pub fn create_pond(&self, req: CreatePondRequest) -> Result<Pond, ServiceError> {
        let now = now_rfc3339();
        let pond = Pond {
            id: new_id(),
            name: req.name.trim().to_string(),
            length_m: req.length_m,
            width_m: req.width_m,
            depth_m: req.depth_m,
            volume_m3: water_volume_m3(req.length_m, req.width_m, req.depth_m),
            capacity: req.capacity.unwrap_or(0),
            condition: req.condition.unwrap_or_default(),
            production_status: Default::default(),
            created_by: req.created_by,
            created_at: now.clone(),
            updated_at: now,
        };
        check_pond(&pond)?;
        self.ponds.create(&pond)?;
        info!("pond {} ({}) created, volume {} m3", pond.id, pond.name, pond.volume_m3);
        Ok(pond)
    }

    pub fn update_pond(&self, id: &str, req: UpdatePondRequest) -> Result<Pond, ServiceError> {
        let mut pond = self.ponds.get(id)?;
        if let Some(name) = req.name {
            pond.name = name.trim().to_string();
        }
        if let Some(v) = req.length_m {
            pond.length_m = v;
        }
        if let Some(v) = req.width_m {
            pond.width_m = v;
        }
        if let Some(v) = req.depth_m {
            pond.depth_m = v;
        }
        if let Some(v) = req.capacity {
            pond.capacity = v;
        }
        if let Some(v) = req.condition {
            pond.condition = v;
        }
        pond.volume_m3 = water_volume_m3(pond.length_m, pond.width_m, pond.depth_m);
        pond.updated_at = now_rfc3339();
        check_pond(&pond)?;
        self.ponds.update(&pond)?;
        self.ponds.get(id)
    }

    // =======================================================================
    // Cycle lifecycle
    // =======================================================================

    /// Open a cycle: insert it, append its `seeding` entry and mark the pond
    /// active, atomically.
    pub async fn open(&self, req: OpenCycleRequest) -> Result<SeedingCycle, ServiceError> {
        if req.initial_quantity <= 0 {
            return Err(ServiceError::Validation(
                "initial quantity must be positive".into(),
            ));
        }
        let source = req
            .idempotency_key
            .as_ref()
            .map(|key| SourceRef::new(ref_table::SEEDING_REQUESTS, key.as_str()));
        if let Some(cycle) = self.opened_by(source.as_ref())? {
            return Ok(cycle);
        }

        let pond = self.ponds.get(&req.pond_id)?;
        let _lock = self.locks.acquire(&pond_key(&pond.id)).await?;
        if let Some(cycle) = self.opened_by(source.as_ref())? {
            return Ok(cycle);
        }

        if let Some(growing) = self.cycles.growing_for_pond(&pond.id)? {
            return Err(ServiceError::Validation(format!(
                "pond {} already has a growing cycle ({})",
                pond.name, growing.id
            )));
        }

        let now = now_rfc3339();
        let cycle = SeedingCycle {
            id: new_id(),
            pond_id: pond.id.clone(),
            initial_quantity: req.initial_quantity,
            species: req.species,
            seed_source: req.seed_source,
            seed_size: req.seed_size,
            avg_seed_weight_g: req.avg_seed_weight_g,
            date_seeded: req.date_seeded,
            status: CycleStatus::Growing,
            closed_by: None,
            closed_at: None,
            created_by: req.created_by.clone(),
            created_at: now.clone(),
            updated_at: now.clone(),
        };
        let head = Default::default();
        let proposed =
            ProposedMovement::new(EventType::Seeding, cycle.initial_quantity, cycle.date_seeded);
        MovementValidator::validate(&cycle, &proposed, &head)?;

        let draft = MovementDraft {
            pond_id: pond.id.clone(),
            cycle_id: Some(cycle.id.clone()),
            event_type: EventType::Seeding,
            delta: cycle.initial_quantity,
            event_date: cycle.date_seeded,
            source,
            notes: None,
            created_by: req.created_by,
            head,
        };
        let written = self.ledger.commit(LedgerWrite {
            before: vec![CycleStore::insert_stmt(&cycle)],
            drafts: vec![draft],
            after: vec![PondStore::refresh_status_stmt(&pond.id, &now)],
        })?;

        // On an idempotent replay the entry points at the earlier cycle.
        let cycle_id = written
            .first()
            .and_then(|m| m.cycle_id.clone())
            .unwrap_or(cycle.id);
        info!(
            "cycle {cycle_id} opened on pond {} with {} fish",
            pond.name, req.initial_quantity
        );
        self.cycles.get(&cycle_id)
    }

    fn opened_by(&self, source: Option<&SourceRef>) -> Result<Option<SeedingCycle>, ServiceError> {
        let Some(src) = source else {
            return Ok(None);
        };
        match self.ledger.find_by_ref(&src.table, &src.id, EventType::Seeding)? {
            Some(m) => {
                debug!("open replayed for seeding request {}", src.id);
                let cycle_id = m
                    .cycle_id
                    .ok_or_else(|| ServiceError::Internal("seeding entry without cycle".into()))?;
                Ok(Some(self.cycles.get(&cycle_id)?))
            }
            None => Ok(None),
        }
    }

    /// `growing -> harvest` without recording a harvest.
    pub async fn begin_harvest(&self, cycle_id: &str) -> Result<SeedingCycle, ServiceError> {
        let _lock = self.locks.acquire(&cycle_key(cycle_id)).await?;
        let cycle = self.cycles.get(cycle_id)?;
        if cycle.status != CycleStatus::Growing {
            return Err(ServiceError::InvalidState(format!(
                "cycle {cycle_id} is {}, not growing",
                cycle.status
            )));
        }
        let now = now_rfc3339();
        self.apply(&[CycleStore::transition_stmt(
            &cycle,
            CycleStatus::Harvest,
            None,
            None,
            &now,
        )])?;
        info!("cycle {cycle_id}: growing -> harvest");
        self.cycles.get(cycle_id)
    }

    /// Close a cycle and re-derive its pond's production status.
    pub async fn close(
        &self,
        cycle_id: &str,
        req: CloseCycleRequest,
    ) -> Result<SeedingCycle, ServiceError> {
        if let Some(ts) = &req.closed_at {
            chrono::DateTime::parse_from_rfc3339(ts).map_err(|e| {
                ServiceError::Validation(format!("closedAt {ts:?} is not RFC 3339: {e}"))
            })?;
        }

        let _lock = self.locks.acquire(&cycle_key(cycle_id)).await?;
        let cycle = self.cycles.get(cycle_id)?;
        if !cycle.status.can_transition_to(CycleStatus::Closed) {
            return Err(ServiceError::InvalidState(format!(
                "cycle {cycle_id} is already closed"
            )));
        }

        let now = now_rfc3339();
        let closed_at = req.closed_at.unwrap_or_else(|| now.clone());
        self.apply(&[
            CycleStore::transition_stmt(
                &cycle,
                CycleStatus::Closed,
                req.closed_by.as_deref(),
                Some(&closed_at),
                &now,
            ),
            PondStore::refresh_status_stmt(&cycle.pond_id, &now),
        ])?;
        info!("cycle {cycle_id}: {} -> closed", cycle.status);
        self.cycles.get(cycle_id)
    }

    // =======================================================================
    // Ledger events
    // =======================================================================

    pub async fn record_mortality(
        &self,
        cycle_id: &str,
        req: MortalityRequest,
    ) -> Result<StockMovement, ServiceError> {
        positive("mortality count", req.count)?;
        self.record_cycle_event(
            cycle_id,
            CycleEvent {
                event_type: EventType::Mortality,
                delta: -req.count,
                date: req.date,
                source: req
                    .idempotency_key
                    .map(|key| SourceRef::new(ref_table::MORTALITY_REPORTS, key)),
                notes: req.notes,
                created_by: req.created_by,
                records: Vec::new(),
            },
        )
        .await
    }

    /// Record a harvest. `ref_id` names the harvest realization and makes
    /// the call idempotent.
    pub async fn record_harvest(
        &self,
        cycle_id: &str,
        req: HarvestRequest,
    ) -> Result<StockMovement, ServiceError> {
        positive("harvest count", req.count)?;
        self.record_cycle_event(
            cycle_id,
            CycleEvent {
                event_type: EventType::Harvest,
                delta: -req.count,
                date: req.date,
                source: req
                    .ref_id
                    .map(|id| SourceRef::new(ref_table::HARVEST_REALIZATIONS, id)),
                notes: req.notes,
                created_by: req.created_by,
                records: Vec::new(),
            },
        )
        .await
    }

    pub async fn record_adjustment(
        &self,
        cycle_id: &str,
        req: AdjustmentRequest,
    ) -> Result<StockMovement, ServiceError> {
        self.record_cycle_event(
            cycle_id,
            CycleEvent {
                event_type: EventType::Adjustment,
                delta: req.delta,
                date: req.date,
                source: req
                    .idempotency_key
                    .map(|key| SourceRef::new(ref_table::ADJUSTMENTS, key)),
                notes: req.notes,
                created_by: req.created_by,
                records: Vec::new(),
            },
        )
        .await
    }

    /// Adjustment against the pond itself rather than one of its cycles.
    pub async fn record_pond_adjustment(
        &self,
        pond_id: &str,
        req: AdjustmentRequest,
    ) -> Result<StockMovement, ServiceError> {
        let pond = self.ponds.get(pond_id)?;
        let source = req
            .idempotency_key
            .map(|key| SourceRef::new(ref_table::ADJUSTMENTS, key));
        if let Some(m) = self.replayed(source.as_ref(), EventType::Adjustment, None)? {
            return Ok(m);
        }

        let _lock = self.locks.acquire(&pond_level_key(&pond.id)).await?;
        if let Some(m) = self.replayed(source.as_ref(), EventType::Adjustment, None)? {
            return Ok(m);
        }

        let head = self
            .ledger
            .head(&LedgerScope::PondLevel(pond.id.clone()))?;
        let proposed = ProposedMovement::new(EventType::Adjustment, req.delta, req.date);
        MovementValidator::validate_pond_level(&proposed, &head)?;

        let movement = self.ledger.append(MovementDraft {
            pond_id: pond.id.clone(),
            cycle_id: None,
            event_type: EventType::Adjustment,
            delta: req.delta,
            event_date: req.date,
            source,
            notes: req.notes,
            created_by: req.created_by,
            head,
        })?;
        info!(
            "pond {} adjusted by {} (pond-level balance {})",
            pond.name, movement.delta, movement.balance_after
        );
        Ok(movement)
    }

    /// Move fish from one cycle to another: `transfer_out` on the source and
    /// `transfer_in` on the destination in one transaction.
    pub async fn transfer(
        &self,
        from_cycle_id: &str,
        req: TransferRequest,
    ) -> Result<TransferRecorded, ServiceError> {
        positive("transfer count", req.count)?;
        if from_cycle_id == req.to_cycle_id {
            return Err(ServiceError::Validation(
                "cannot transfer a cycle into itself".into(),
            ));
        }
        let source = req
            .idempotency_key
            .as_ref()
            .map(|key| SourceRef::new(ref_table::TRANSFERS, key.as_str()));
        if let Some(done) = self.transferred(source.as_ref())? {
            return Ok(done);
        }

        let from_key = cycle_key(from_cycle_id);
        let to_key = cycle_key(&req.to_cycle_id);
        let _lock = self
            .locks
            .acquire_all(&[from_key.as_str(), to_key.as_str()])
            .await?;
        if let Some(done) = self.transferred(source.as_ref())? {
            return Ok(done);
        }

        let from = self.cycles.get(from_cycle_id)?;
        let to = self.cycles.get(&req.to_cycle_id)?;
        let from_head = self.ledger.head(&LedgerScope::Cycle(from.id.clone()))?;
        let to_head = self.ledger.head(&LedgerScope::Cycle(to.id.clone()))?;

        let out = ProposedMovement::new(EventType::TransferOut, -req.count, req.date);
        let into = ProposedMovement::new(EventType::TransferIn, req.count, req.date);
        MovementValidator::validate(&from, &out, &from_head)?;
        MovementValidator::validate(&to, &into, &to_head)?;

        let leg = |cycle: &SeedingCycle, p: &ProposedMovement, head| MovementDraft {
            pond_id: cycle.pond_id.clone(),
            cycle_id: Some(cycle.id.clone()),
            event_type: p.event_type,
            delta: p.delta,
            event_date: p.event_date,
            source: source.clone(),
            notes: req.notes.clone(),
            created_by: req.created_by.clone(),
            head,
        };
        let mut written = self.ledger.commit(LedgerWrite {
            drafts: vec![leg(&from, &out, from_head), leg(&to, &into, to_head)],
            ..Default::default()
        })?;

        let (Some(transfer_in), Some(transfer_out)) = (written.pop(), written.pop()) else {
            return Err(ServiceError::Internal("transfer wrote fewer than two entries".into()));
        };
        info!(
            "transferred {} fish from cycle {} to cycle {}",
            req.count, from.id, to.id
        );
        Ok(TransferRecorded {
            transfer_out,
            transfer_in,
        })
    }

    fn transferred(&self, source: Option<&SourceRef>) -> Result<Option<TransferRecorded>, ServiceError> {
        let Some(src) = source else {
            return Ok(None);
        };
        let out = self
            .ledger
            .find_by_ref(&src.table, &src.id, EventType::TransferOut)?;
        let into = self
            .ledger
            .find_by_ref(&src.table, &src.id, EventType::TransferIn)?;
        match (out, into) {
            (Some(transfer_out), Some(transfer_in)) => {
                debug!("transfer {} replayed", src.id);
                Ok(Some(TransferRecorded {
                    transfer_out,
                    transfer_in,
                }))
            }
            _ => Ok(None),
        }
    }

    // =======================================================================
    // Samplings and realizations
    // =======================================================================

    /// Record a growth sampling. A positive mortality count also appends a
    /// `mortality` entry referencing the sampling, in the same transaction.
    pub async fn record_sampling(
        &self,
        cycle_id: &str,
        req: SamplingRequest,
    ) -> Result<SamplingRecorded, ServiceError> {
        positive("sample count", req.sample_count)?;
        if !(req.avg_weight_g.is_finite() && req.avg_weight_g > 0.0) {
            return Err(ServiceError::Validation(
                "average weight must be positive".into(),
            ));
        }
        if req.mortality_count < 0 {
            return Err(ServiceError::Validation(
                "mortality count must not be negative".into(),
            ));
        }

        let id = req.id.unwrap_or_else(new_id);
        if let Some(done) = self.sampled(cycle_id, &id)? {
            return Ok(done);
        }

        let cycle = self.cycles.get(cycle_id)?;
        let sampling = GrowthSampling {
            id: id.clone(),
            cycle_id: cycle.id.clone(),
            pond_id: cycle.pond_id.clone(),
            sample_date: req.sample_date,
            sample_count: req.sample_count,
            avg_weight_g: req.avg_weight_g,
            avg_length_cm: req.avg_length_cm,
            mortality_count: req.mortality_count,
            notes: req.notes.clone(),
            created_by: req.created_by.clone(),
            created_at: now_rfc3339(),
        };
        let insert = RecordStore::insert_sampling_stmt(&sampling);

        if sampling.mortality_count > 0 {
            let movement = self
                .record_cycle_event(
                    cycle_id,
                    CycleEvent {
                        event_type: EventType::Mortality,
                        delta: -sampling.mortality_count,
                        date: sampling.sample_date,
                        source: Some(SourceRef::new(ref_table::GROWTH_SAMPLINGS, id.as_str())),
                        notes: req.notes,
                        created_by: req.created_by,
                        records: vec![insert],
                    },
                )
                .await?;
            let sampling = self
                .records
                .get_sampling(&id)?
                .ok_or_else(|| ServiceError::Internal(format!("sampling {id} not stored")))?;
            return Ok(SamplingRecorded {
                sampling,
                movement: Some(movement),
            });
        }

        // No ledger entry: only the record, still serialized with the cycle.
        let _lock = self.locks.acquire(&cycle_key(cycle_id)).await?;
        if let Some(done) = self.sampled(cycle_id, &id)? {
            return Ok(done);
        }
        let cycle = self.cycles.get(cycle_id)?;
        if cycle.status.is_closed() {
            return Err(ServiceError::InvalidState(format!("cycle {cycle_id} is closed")));
        }
        if sampling.sample_date < cycle.date_seeded {
            return Err(ServiceError::Validation(format!(
                "sample date {} is before the cycle was seeded ({})",
                sampling.sample_date, cycle.date_seeded
            )));
        }
        self.apply(&[insert])?;
        debug!("sampling {id} recorded for cycle {cycle_id}");
        Ok(SamplingRecorded {
            sampling,
            movement: None,
        })
    }

    fn sampled(&self, cycle_id: &str, id: &str) -> Result<Option<SamplingRecorded>, ServiceError> {
        let Some(sampling) = self.records.get_sampling(id)? else {
            return Ok(None);
        };
        if sampling.cycle_id != cycle_id {
            return Err(ServiceError::Validation(format!(
                "sampling {id} belongs to another cycle"
            )));
        }
        let movement =
            self.ledger
                .find_by_ref(ref_table::GROWTH_SAMPLINGS, id, EventType::Mortality)?;
        debug!("sampling {id} replayed");
        Ok(Some(SamplingRecorded { sampling, movement }))
    }

    /// Record an actual harvest and its `harvest` entry atomically.
    pub async fn record_realization(
        &self,
        cycle_id: &str,
        req: RealizationRequest,
    ) -> Result<HarvestRecorded, ServiceError> {
        positive("harvest quantity", req.quantity)?;
        if !(req.total_weight_kg.is_finite() && req.total_weight_kg > 0.0) {
            return Err(ServiceError::Validation(
                "total weight must be positive".into(),
            ));
        }

        let id = req.id.unwrap_or_else(new_id);
        match self.records.get_realization(&id)? {
            Some(existing) if existing.cycle_id != cycle_id => {
                return Err(ServiceError::Validation(format!(
                    "realization {id} belongs to another cycle"
                )));
            }
            Some(_) => {}
            None => {
                if self
                    .ledger
                    .find_by_ref(ref_table::HARVEST_REALIZATIONS, &id, EventType::Harvest)?
                    .is_some()
                {
                    return Err(bare_harvest(&id));
                }
            }
        }

        let cycle = self.cycles.get(cycle_id)?;
        let realization = HarvestRealization {
            id: id.clone(),
            cycle_id: cycle.id.clone(),
            pond_id: cycle.pond_id.clone(),
            harvest_date: req.harvest_date,
            quantity: req.quantity,
            total_weight_kg: req.total_weight_kg,
            price_per_kg: req.price_per_kg,
            buyer: req.buyer,
            notes: req.notes.clone(),
            created_by: req.created_by.clone(),
            created_at: now_rfc3339(),
        };

        let movement = self
            .record_cycle_event(
                cycle_id,
                CycleEvent {
                    event_type: EventType::Harvest,
                    delta: -realization.quantity,
                    date: realization.harvest_date,
                    source: Some(SourceRef::new(ref_table::HARVEST_REALIZATIONS, id.as_str())),
                    notes: req.notes,
                    created_by: req.created_by,
                    records: vec![RecordStore::insert_realization_stmt(&realization)],
                },
            )
            .await?;
        // A bare harvest under the same ref may have landed since the check
        // above; the ledger then replays it and no realization row exists.
        let realization = self
            .records
            .get_realization(&id)?
            .ok_or_else(|| bare_harvest(&id))?;
        Ok(HarvestRecorded {
            realization,
            movement,
        })
    }

    // =======================================================================
    // Reads
    // =======================================================================

    pub fn summary(&self, cycle_id: &str) -> Result<CycleSummary, ServiceError> {
        let cycle = self.cycles.get(cycle_id)?;
        self.balance.cycle_summary(&cycle)
    }

    /// Population on `as_of` (default today) times the latest sampled
    /// weight on or before that day. Falls back to the seed weight before
    /// the first sampling.
    pub fn estimate_harvest(
        &self,
        cycle_id: &str,
        as_of: Option<NaiveDate>,
    ) -> Result<HarvestEstimate, ServiceError> {
        let cycle = self.cycles.get(cycle_id)?;
        let as_of = as_of.unwrap_or_else(|| chrono::Utc::now().date_naive());
        let population = self.balance.balance_as_of(cycle_id, as_of)?;

        let (avg_weight_g, sampled_on) = match self.records.latest_sampling(cycle_id, as_of)? {
            Some(s) => (Some(s.avg_weight_g), Some(s.sample_date)),
            None => (cycle.avg_seed_weight_g, None),
        };
        let estimated_biomass_kg =
            avg_weight_g.map(|w| (population as f64 * w / 1000.0 * 100.0).round() / 100.0);

        Ok(HarvestEstimate {
            cycle_id: cycle.id,
            as_of,
            population,
            avg_weight_g,
            sampled_on,
            estimated_biomass_kg,
        })
    }

    pub fn reconcile(&self, cycle_id: &str) -> Result<ReconcileReport, ServiceError> {
        self.cycles.get(cycle_id)?;
        let report = self.balance.reconcile(cycle_id)?;
        if !report.is_consistent() {
            warn!(
                "cycle {cycle_id} ledger inconsistent: {} discrepancies, went_negative={}",
                report.discrepancies.len(),
                report.went_negative
            );
        }
        Ok(report)
    }

    // =======================================================================
    // Internals
    // =======================================================================

    /// Lock, replay check, validate, commit. Harvests also drive the cycle
    /// forward: the first one moves it to `harvest`, one that empties it
    /// closes it when `auto_close_on_depletion` is set.
    async fn record_cycle_event(
        &self,
        cycle_id: &str,
        event: CycleEvent,
    ) -> Result<StockMovement, ServiceError> {
        let replay_scope = Some(cycle_id);
        if let Some(m) = self.replayed(event.source.as_ref(), event.event_type, replay_scope)? {
            return Ok(m);
        }
        let _lock = self.locks.acquire(&cycle_key(cycle_id)).await?;
        if let Some(m) = self.replayed(event.source.as_ref(), event.event_type, replay_scope)? {
            return Ok(m);
        }

        let cycle = self.cycles.get(cycle_id)?;
        let head = self.ledger.head(&LedgerScope::Cycle(cycle.id.clone()))?;
        let proposed = ProposedMovement::new(event.event_type, event.delta, event.date);
        MovementValidator::validate(&cycle, &proposed, &head)?;

        let now = now_rfc3339();
        let balance_after = head.balance + event.delta;
        let after = self.lifecycle_after(&cycle, &event, balance_after, &now);
        let has_transition = !after.is_empty();

        let CycleEvent {
            event_type,
            delta,
            date,
            source,
            notes,
            created_by,
            records,
        } = event;
        let mut written = self.ledger.commit(LedgerWrite {
            before: records,
            drafts: vec![MovementDraft {
                pond_id: cycle.pond_id.clone(),
                cycle_id: Some(cycle.id.clone()),
                event_type,
                delta,
                event_date: date,
                source,
                notes,
                created_by,
                head,
            }],
            after,
        })?;
        let movement = written
            .pop()
            .ok_or_else(|| ServiceError::Internal("commit wrote no entry".into()))?;
        info!(
            "cycle {}: {} {} on {} -> balance {}",
            cycle.id, movement.event_type, movement.delta, movement.event_date, movement.balance_after
        );
        if has_transition {
            // Still under the cycle lock, so a changed status is ours.
            let status = self.cycles.get(&cycle.id)?.status;
            if status != cycle.status {
                info!("cycle {}: {} -> {} after {event_type}", cycle.id, cycle.status, status);
            }
        }
        Ok(movement)
    }

    fn lifecycle_after(
        &self,
        cycle: &SeedingCycle,
        event: &CycleEvent,
        balance_after: i64,
        now: &str,
    ) -> Vec<Statement> {
        if event.event_type != EventType::Harvest {
            return Vec::new();
        }
        if balance_after == 0 && self.config.auto_close_on_depletion {
            return vec![
                CycleStore::transition_stmt(
                    cycle,
                    CycleStatus::Closed,
                    event.created_by.as_deref(),
                    Some(now),
                    now,
                ),
                PondStore::refresh_status_stmt(&cycle.pond_id, now),
            ];
        }
        if cycle.status == CycleStatus::Growing {
            return vec![CycleStore::transition_stmt(
                cycle,
                CycleStatus::Harvest,
                None,
                None,
                now,
            )];
        }
        Vec::new()
    }

    /// Entry already recorded under `source`, if any. With `cycle_id` set,
    /// a key recorded against a different cycle is refused.
    fn replayed(
        &self,
        source: Option<&SourceRef>,
        event_type: EventType,
        cycle_id: Option<&str>,
    ) -> Result<Option<StockMovement>, ServiceError> {
        let Some(src) = source else {
            return Ok(None);
        };
        let Some(existing) = self.ledger.find_by_ref(&src.table, &src.id, event_type)? else {
            return Ok(None);
        };
        if existing.cycle_id.as_deref() != cycle_id {
            return Err(ServiceError::Validation(format!(
                "{} {} was already recorded elsewhere",
                src.table, src.id
            )));
        }
        debug!("{} {} replayed", src.table, src.id);
        Ok(Some(existing))
    }

    /// Run status statements that carry no ledger entry.
    fn apply(&self, statements: &[Statement]) -> Result<(), ServiceError> {
        self.db.exec_atomic(statements).map_err(|e| match e {
            SQLError::NoRowsAffected(label) => {
                ServiceError::Conflict(format!("concurrent change on {label}; retry"))
            }
            other => ServiceError::Storage(other.to_string()),
        })?;
        Ok(())
    }
}

fn bare_harvest(id: &str) -> ServiceError {
    ServiceError::Validation(format!(
        "harvest {id} was already recorded without realization details"
    ))
}

fn positive(what: &str, n: i64) -> Result<(), ServiceError> {
    if n <= 0 {
        return Err(ServiceError::Validation(format!("{what} must be positive")));
    }
    Ok(())
}

fn check_pond(pond: &Pond) -> Result<(), ServiceError> {
    if pond.name.is_empty() {
        return Err(ServiceError::Validation("pond name is required".into()));
    }
    for (what, v) in [
        ("length", pond.length_m),
        ("width", pond.width_m),
        ("depth", pond.depth_m),
    ] {
        if !(v.is_finite() && v > 0.0) {
            return Err(ServiceError::Validation(format!("pond {what} must be positive")));
        }
    }
    if pond.capacity < 0 {
        return Err(ServiceError::Validation("capacity must not be negative".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProductionStatus;
    use aquafarm_sql::SqliteStore;

    fn manager() -> SeedingCycleManager {
        manager_with(LedgerConfig::default())
    }

    fn manager_with(config: LedgerConfig) -> SeedingCycleManager {
        let db: Arc<dyn SQLStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        SeedingCycleManager::new(db, config).unwrap()
    }

    fn day(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, d).unwrap()
    }

    fn pond(m: &SeedingCycleManager, name: &str) -> Pond {
        m.create_pond(CreatePondRequest {
            name: name.into(),
            length_m: 20.0,
            width_m: 10.0,
            depth_m: 1.5,
            capacity: Some(5000),
            condition: None,
            created_by: None,
        })
        .unwrap()
    }

    fn open_req(pond_id: &str, qty: i64) -> OpenCycleRequest {
        OpenCycleRequest {
            pond_id: pond_id.into(),
            initial_quantity: qty,
            date_seeded: day(1, 1),
            species: Some("nila".into()),
            seed_source: None,
            seed_size: None,
            avg_seed_weight_g: Some(2.0),
            idempotency_key: None,
            created_by: Some("farmer".into()),
        }
    }

    fn mortality(count: i64, date: NaiveDate) -> MortalityRequest {
        MortalityRequest {
            count,
            date,
            notes: None,
            idempotency_key: None,
            created_by: None,
        }
    }

    fn harvest(count: i64, date: NaiveDate, ref_id: Option<&str>) -> HarvestRequest {
        HarvestRequest {
            count,
            date,
            ref_id: ref_id.map(str::to_string),
            notes: None,
            created_by: Some("farmer".into()),
        }
    }

    fn adjust(delta: i64, date: NaiveDate) -> AdjustmentRequest {
        AdjustmentRequest {
            delta,
            date,
            notes: Some("recount".into()),
            idempotency_key: None,
            created_by: None,
        }
    }

    #[tokio::test]
    async fn scenario_balances() {
        let m = manager();
        let p = pond(&m, "A1");
        let c = m.open(open_req(&p.id, 1000)).await.unwrap();
        assert_eq!(m.balance().current_balance(&c.id).unwrap(), 1000);
        assert_eq!(m.ponds().get(&p.id).unwrap().production_status, ProductionStatus::Active);

        m.record_mortality(&c.id, mortality(50, day(1, 10))).await.unwrap();
        assert_eq!(m.balance().current_balance(&c.id).unwrap(), 950);
        assert_eq!(
            m.balance().total_by_event_type(&c.id, EventType::Mortality).unwrap(),
            50
        );

        let h = m.record_harvest(&c.id, harvest(900, day(2, 1), None)).await.unwrap();
        assert_eq!(h.balance_after, 50);
        assert_eq!(m.cycles().get(&c.id).unwrap().status, CycleStatus::Harvest);

        let err = m
            .record_harvest(&c.id, harvest(100, day(2, 2), None))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InsufficientStock(_)));
        assert_eq!(m.balance().current_balance(&c.id).unwrap(), 50);
        assert_eq!(m.balance().balance_as_of(&c.id, day(1, 5)).unwrap(), 1000);
        assert!(m.reconcile(&c.id).unwrap().is_consistent());
    }

    #[tokio::test]
    async fn second_growing_cycle_is_rejected() {
        let m = manager();
        let p = pond(&m, "A1");
        m.open(open_req(&p.id, 1000)).await.unwrap();
        let err = m.open(open_req(&p.id, 500)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn open_validates_input() {
        let m = manager();
        let p = pond(&m, "A1");
        assert!(matches!(
            m.open(open_req(&p.id, 0)).await,
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            m.open(open_req("missing", 10)).await,
            Err(ServiceError::NotFound(_))
        ));
        assert_eq!(m.ponds().get(&p.id).unwrap().production_status, ProductionStatus::Idle);
    }

    #[tokio::test]
    async fn open_is_idempotent_on_key() {
        let m = manager();
        let p = pond(&m, "A1");
        let mut req = open_req(&p.id, 1000);
        req.idempotency_key = Some("seed-req-1".into());
        let first = m.open(req.clone()).await.unwrap();
        let again = m.open(req).await.unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(m.cycles().list_for_pond(&p.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn harvest_with_same_ref_is_recorded_once() {
        let m = manager();
        let p = pond(&m, "A1");
        let c = m.open(open_req(&p.id, 1000)).await.unwrap();

        let a = m
            .record_harvest(&c.id, harvest(200, day(2, 1), Some("hr-1")))
            .await
            .unwrap();
        let b = m
            .record_harvest(&c.id, harvest(200, day(2, 1), Some("hr-1")))
            .await
            .unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(m.balance().current_balance(&c.id).unwrap(), 800);
        assert_eq!(
            m.balance().total_by_event_type(&c.id, EventType::Harvest).unwrap(),
            200
        );
    }

    #[tokio::test]
    async fn depleting_harvest_closes_cycle() {
        let m = manager();
        let p = pond(&m, "A1");
        let c = m.open(open_req(&p.id, 100)).await.unwrap();
        m.record_harvest(&c.id, harvest(100, day(3, 1), None)).await.unwrap();

        let closed = m.cycles().get(&c.id).unwrap();
        assert_eq!(closed.status, CycleStatus::Closed);
        assert_eq!(closed.closed_by.as_deref(), Some("farmer"));
        assert_eq!(m.ponds().get(&p.id).unwrap().production_status, ProductionStatus::Idle);

        let err = m
            .record_adjustment(&c.id, adjust(5, day(3, 2)))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }

    #[tokio::test]
    async fn depletion_without_auto_close_keeps_harvest_state() {
        let m = manager_with(LedgerConfig {
            auto_close_on_depletion: false,
            ..Default::default()
        });
        let p = pond(&m, "A1");
        let c = m.open(open_req(&p.id, 100)).await.unwrap();
        m.record_harvest(&c.id, harvest(100, day(3, 1), None)).await.unwrap();
        assert_eq!(m.cycles().get(&c.id).unwrap().status, CycleStatus::Harvest);
    }

    #[tokio::test]
    async fn lifecycle_transitions() {
        let m = manager();
        let p = pond(&m, "A1");
        let c = m.open(open_req(&p.id, 100)).await.unwrap();

        let c = m.begin_harvest(&c.id).await.unwrap();
        assert_eq!(c.status, CycleStatus::Harvest);
        assert!(matches!(
            m.begin_harvest(&c.id).await,
            Err(ServiceError::InvalidState(_))
        ));

        // A new cycle may open while the old one is still harvesting.
        m.open(open_req(&p.id, 10)).await.unwrap();

        let closed = m
            .close(
                &c.id,
                CloseCycleRequest {
                    closed_by: Some("manager".into()),
                    closed_at: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(closed.status, CycleStatus::Closed);
        assert!(closed.closed_at.is_some());
        // The second cycle keeps the pond active.
        assert_eq!(m.ponds().get(&p.id).unwrap().production_status, ProductionStatus::Active);

        assert!(matches!(
            m.close(&c.id, CloseCycleRequest::default()).await,
            Err(ServiceError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn close_rejects_bad_timestamp() {
        let m = manager();
        let p = pond(&m, "A1");
        let c = m.open(open_req(&p.id, 100)).await.unwrap();
        let err = m
            .close(
                &c.id,
                CloseCycleRequest {
                    closed_by: None,
                    closed_at: Some("yesterday".into()),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn transfer_moves_fish_between_cycles() {
        let m = manager();
        let a = pond(&m, "A1");
        let b = pond(&m, "B1");
        let from = m.open(open_req(&a.id, 1000)).await.unwrap();
        let to = m.open(open_req(&b.id, 500)).await.unwrap();

        let req = TransferRequest {
            to_cycle_id: to.id.clone(),
            count: 300,
            date: day(1, 15),
            notes: None,
            idempotency_key: Some("tr-1".into()),
            created_by: None,
        };
        let t = m.transfer(&from.id, req.clone()).await.unwrap();
        assert_eq!(t.transfer_out.delta, -300);
        assert_eq!(t.transfer_in.delta, 300);
        assert_eq!(m.balance().current_balance(&from.id).unwrap(), 700);
        assert_eq!(m.balance().current_balance(&to.id).unwrap(), 800);

        let again = m.transfer(&from.id, req).await.unwrap();
        assert_eq!(again, t);
        assert_eq!(m.balance().current_balance(&from.id).unwrap(), 700);

        let too_many = TransferRequest {
            to_cycle_id: to.id.clone(),
            count: 701,
            date: day(1, 16),
            notes: None,
            idempotency_key: None,
            created_by: None,
        };
        assert!(matches!(
            m.transfer(&from.id, too_many).await,
            Err(ServiceError::InsufficientStock(_))
        ));
        assert_eq!(m.balance().current_balance(&to.id).unwrap(), 800);
    }

    #[tokio::test]
    async fn transfer_into_harvesting_cycle_is_refused() {
        let m = manager();
        let a = pond(&m, "A1");
        let b = pond(&m, "B1");
        let from = m.open(open_req(&a.id, 1000)).await.unwrap();
        let to = m.open(open_req(&b.id, 500)).await.unwrap();
        m.begin_harvest(&to.id).await.unwrap();

        let err = m
            .transfer(
                &from.id,
                TransferRequest {
                    to_cycle_id: to.id.clone(),
                    count: 10,
                    date: day(1, 15),
                    notes: None,
                    idempotency_key: None,
                    created_by: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
        assert_eq!(m.balance().current_balance(&from.id).unwrap(), 1000);
    }

    #[tokio::test]
    async fn pond_level_adjustments() {
        let m = manager();
        let p = pond(&m, "A1");
        let up = m.record_pond_adjustment(&p.id, adjust(40, day(1, 1))).await.unwrap();
        assert_eq!(up.cycle_id, None);
        assert_eq!(up.balance_after, 40);

        let err = m
            .record_pond_adjustment(&p.id, adjust(-41, day(1, 2)))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InsufficientStock(_)));

        let c = m.open(open_req(&p.id, 100)).await.unwrap();
        assert_eq!(m.balance().pond_balance(&p.id).unwrap(), 140);
        // Cycle ledger is unaffected by the pond-level entry.
        assert_eq!(m.balance().current_balance(&c.id).unwrap(), 100);
    }

    #[tokio::test]
    async fn sampling_with_mortality_writes_one_entry() {
        let m = manager();
        let p = pond(&m, "A1");
        let c = m.open(open_req(&p.id, 1000)).await.unwrap();

        let req = || SamplingRequest {
            id: Some("s-1".into()),
            sample_date: day(2, 1),
            sample_count: 30,
            avg_weight_g: 120.0,
            avg_length_cm: Some(15.0),
            mortality_count: 12,
            notes: None,
            created_by: None,
        };
        let first = m.record_sampling(&c.id, req()).await.unwrap();
        let movement = first.movement.clone().unwrap();
        assert_eq!(movement.delta, -12);
        assert_eq!(movement.ref_id.as_deref(), Some("s-1"));

        let again = m.record_sampling(&c.id, req()).await.unwrap();
        assert_eq!(again, first);
        assert_eq!(m.balance().current_balance(&c.id).unwrap(), 988);
    }

    #[tokio::test]
    async fn sampling_without_mortality_has_no_entry() {
        let m = manager();
        let p = pond(&m, "A1");
        let c = m.open(open_req(&p.id, 1000)).await.unwrap();
        let out = m
            .record_sampling(
                &c.id,
                SamplingRequest {
                    id: None,
                    sample_date: day(2, 1),
                    sample_count: 30,
                    avg_weight_g: 80.0,
                    avg_length_cm: None,
                    mortality_count: 0,
                    notes: None,
                    created_by: None,
                },
            )
            .await
            .unwrap();
        assert!(out.movement.is_none());
        assert_eq!(m.ledger().head(&LedgerScope::Cycle(c.id.clone())).unwrap().entries, 1);
        assert_eq!(m.records().list_samplings(&c.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn realization_and_estimate() {
        let m = manager();
        let p = pond(&m, "A1");
        let c = m.open(open_req(&p.id, 1000)).await.unwrap();

        let early = m.estimate_harvest(&c.id, Some(day(1, 2))).unwrap();
        assert_eq!(early.population, 1000);
        assert_eq!(early.avg_weight_g, Some(2.0));
        assert_eq!(early.estimated_biomass_kg, Some(2.0));

        m.record_sampling(
            &c.id,
            SamplingRequest {
                id: None,
                sample_date: day(3, 1),
                sample_count: 20,
                avg_weight_g: 250.0,
                avg_length_cm: None,
                mortality_count: 0,
                notes: None,
                created_by: None,
            },
        )
        .await
        .unwrap();
        let est = m.estimate_harvest(&c.id, Some(day(3, 2))).unwrap();
        assert_eq!(est.sampled_on, Some(day(3, 1)));
        assert_eq!(est.estimated_biomass_kg, Some(250.0));

        let req = || RealizationRequest {
            id: Some("hr-9".into()),
            harvest_date: day(3, 5),
            quantity: 400,
            total_weight_kg: 100.0,
            price_per_kg: Some(30000.0),
            buyer: None,
            notes: None,
            created_by: None,
        };
        let done = m.record_realization(&c.id, req()).await.unwrap();
        assert_eq!(done.movement.delta, -400);
        assert_eq!(done.realization.quantity, 400);
        let again = m.record_realization(&c.id, req()).await.unwrap();
        assert_eq!(again.movement.id, done.movement.id);

        let summary = m.summary(&c.id).unwrap();
        assert_eq!(summary.total_harvest, 400);
        assert_eq!(summary.current_balance, 600);
        assert_eq!(summary.status, CycleStatus::Harvest);
    }

    #[tokio::test]
    async fn realization_after_bare_harvest_with_same_ref_is_rejected() {
        let m = manager();
        let p = pond(&m, "A1");
        let c = m.open(open_req(&p.id, 1000)).await.unwrap();
        let bare = m
            .record_harvest(&c.id, harvest(100, day(2, 1), Some("hr-1")))
            .await
            .unwrap();

        let err = m
            .record_realization(
                &c.id,
                RealizationRequest {
                    id: Some("hr-1".into()),
                    harvest_date: day(2, 1),
                    quantity: 100,
                    total_weight_kg: 25.0,
                    price_per_kg: None,
                    buyer: None,
                    notes: None,
                    created_by: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)), "{err:?}");

        // Nothing new was written.
        assert_eq!(m.balance().current_balance(&c.id).unwrap(), 900);
        assert!(m.records().get_realization("hr-1").unwrap().is_none());
        let again = m
            .record_harvest(&c.id, harvest(100, day(2, 1), Some("hr-1")))
            .await
            .unwrap();
        assert_eq!(again.id, bare.id);
    }

    #[tokio::test]
    async fn rejected_depleting_harvest_leaves_status_alone() {
        let m = manager();
        let p = pond(&m, "A1");
        let c = m.open(open_req(&p.id, 100)).await.unwrap();
        let err = m
            .record_harvest(&c.id, harvest(150, day(2, 1), None))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InsufficientStock(_)));
        assert_eq!(m.cycles().get(&c.id).unwrap().status, CycleStatus::Growing);

        m.record_harvest(&c.id, harvest(100, day(2, 1), None))
            .await
            .unwrap();
        assert_eq!(m.cycles().get(&c.id).unwrap().status, CycleStatus::Closed);
    }

    #[tokio::test]
    async fn backdated_entry_is_rejected() {
        let m = manager();
        let p = pond(&m, "A1");
        let c = m.open(open_req(&p.id, 1000)).await.unwrap();
        m.record_mortality(&c.id, mortality(5, day(1, 10))).await.unwrap();
        let err = m
            .record_mortality(&c.id, mortality(5, day(1, 9)))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn pond_update_recomputes_volume() {
        let m = manager();
        let p = pond(&m, "A1");
        let updated = m
            .update_pond(
                &p.id,
                UpdatePondRequest {
                    depth_m: Some(2.0),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.volume_m3, 400.0);

        let err = m
            .update_pond(
                &p.id,
                UpdatePondRequest {
                    width_m: Some(0.0),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }
}
