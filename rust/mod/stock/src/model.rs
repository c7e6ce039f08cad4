use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// EventType
// ---------------------------------------------------------------------------

/// Kind of population change recorded by a ledger entry.
///
/// `mortality`, `harvest` and `transfer_out` always carry negative deltas,
/// `seeding` a positive one; `adjustment` and `transfer_in` may go either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Seeding,
    Mortality,
    Harvest,
    Adjustment,
    TransferIn,
    TransferOut,
}

impl EventType {
    pub const ALL: [EventType; 6] = [
        Self::Seeding,
        Self::Mortality,
        Self::Harvest,
        Self::Adjustment,
        Self::TransferIn,
        Self::TransferOut,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Seeding => "seeding",
            Self::Mortality => "mortality",
            Self::Harvest => "harvest",
            Self::Adjustment => "adjustment",
            Self::TransferIn => "transfer_in",
            Self::TransferOut => "transfer_out",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == s)
    }

    /// Event types whose delta must be strictly negative.
    pub fn is_outflow(&self) -> bool {
        matches!(self, Self::Mortality | Self::Harvest | Self::TransferOut)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// CycleStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a seeding cycle.
///
/// ```text
/// growing → harvest → closed
///         ──────────→ closed
/// ```
///
/// Forward only. Only `growing` blocks a new cycle on the same pond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Growing,
    Harvest,
    Closed,
}

impl CycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Growing => "growing",
            Self::Harvest => "harvest",
            Self::Closed => "closed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "growing" => Some(Self::Growing),
            "harvest" => Some(Self::Harvest),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Growing => 0,
            Self::Harvest => 1,
            Self::Closed => 2,
        }
    }

    pub fn can_transition_to(&self, next: CycleStatus) -> bool {
        next.rank() > self.rank()
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl std::fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Pond
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PondCondition {
    #[default]
    Good,
    Maintenance,
    Damaged,
}

impl PondCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Maintenance => "maintenance",
            Self::Damaged => "damaged",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "good" => Some(Self::Good),
            "maintenance" => Some(Self::Maintenance),
            "damaged" => Some(Self::Damaged),
            _ => None,
        }
    }
}

/// Whether the pond currently holds an unclosed cycle. Derived on every
/// cycle open/close, never written by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductionStatus {
    #[default]
    Idle,
    Active,
}

impl ProductionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "active" => Some(Self::Active),
            _ => None,
        }
    }
}

/// A physical pond.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pond {
    pub id: String,
    pub name: String,
    pub length_m: f64,
    pub width_m: f64,
    pub depth_m: f64,
    /// Recomputed from the dimensions on every write.
    pub volume_m3: f64,
    /// Nominal stocking capacity in fish (0 = unspecified).
    #[serde(default)]
    pub capacity: i64,
    #[serde(default)]
    pub condition: PondCondition,
    #[serde(default)]
    pub production_status: ProductionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Water volume of a rectangular pond in m³, rounded to centimetre-cubed
/// precision (two decimals).
pub fn water_volume_m3(length_m: f64, width_m: f64, depth_m: f64) -> f64 {
    (length_m * width_m * depth_m * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// SeedingCycle
// ---------------------------------------------------------------------------

/// One stocking-to-harvest production run in a pond.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SeedingCycle {
    pub id: String,
    pub pond_id: String,
    /// Fixed once the opening `seeding` entry exists.
    pub initial_quantity: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub species: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_seed_weight_g: Option<f64>,
    pub date_seeded: NaiveDate,
    pub status: CycleStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

// ---------------------------------------------------------------------------
// StockMovement: the ledger entry
// ---------------------------------------------------------------------------

/// Originating business record of a movement. Doubles as the idempotency
/// key: at most one movement per `(table, id, event_type)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub table: String,
    pub id: String,
}

impl SourceRef {
    pub fn new(table: &str, id: impl Into<String>) -> Self {
        Self {
            table: table.to_string(),
            id: id.into(),
        }
    }
}

/// Reference tables used as idempotency namespaces.
pub mod ref_table {
    pub const SEEDING_REQUESTS: &str = "seeding_requests";
    pub const MORTALITY_REPORTS: &str = "mortality_reports";
    pub const HARVEST_REALIZATIONS: &str = "harvest_realizations";
    pub const GROWTH_SAMPLINGS: &str = "growth_samplings";
    pub const ADJUSTMENTS: &str = "adjustments";
    pub const TRANSFERS: &str = "transfers";
}

/// An immutable ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StockMovement {
    pub id: String,
    /// Global insertion order; breaks ties between equal event dates.
    pub seq: i64,
    pub pond_id: String,
    /// `None` for pond-level adjustments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle_id: Option<String>,
    pub event_type: EventType,
    pub delta: i64,
    pub balance_after: i64,
    pub event_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: String,
}

/// The tail of one ledger (a cycle, or a pond's cycle-less entries) as
/// observed before validating an append.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerHead {
    pub last_id: Option<String>,
    pub balance: i64,
    pub last_event_date: Option<NaiveDate>,
    pub entries: i64,
}

impl LedgerHead {
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }
}

/// A movement that has passed validation but is not yet persisted.
#[derive(Debug, Clone)]
pub struct MovementDraft {
    pub pond_id: String,
    pub cycle_id: Option<String>,
    pub event_type: EventType,
    pub delta: i64,
    pub event_date: NaiveDate,
    pub source: Option<SourceRef>,
    pub notes: Option<String>,
    pub created_by: Option<String>,
    /// Head the draft was validated against. The store refuses the
    /// append if the ledger moved since.
    pub head: LedgerHead,
}

// ---------------------------------------------------------------------------
// Growth sampling / harvest realization
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GrowthSampling {
    pub id: String,
    pub cycle_id: String,
    pub pond_id: String,
    pub sample_date: NaiveDate,
    /// Number of fish weighed.
    pub sample_count: i64,
    pub avg_weight_g: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_length_cm: Option<f64>,
    /// Dead fish counted since the previous sampling.
    #[serde(default)]
    pub mortality_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HarvestRealization {
    pub id: String,
    pub cycle_id: String,
    pub pond_id: String,
    pub harvest_date: NaiveDate,
    pub quantity: i64,
    pub total_weight_kg: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_per_kg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: String,
}

// ---------------------------------------------------------------------------
// Read models
// ---------------------------------------------------------------------------

/// Population and biomass projection for a cycle on a given day.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HarvestEstimate {
    pub cycle_id: String,
    pub as_of: NaiveDate,
    pub population: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_weight_g: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampled_on: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_biomass_kg: Option<f64>,
}

/// Per-type totals of one cycle, read from a single snapshot. Outflow
/// totals are reported as positive magnitudes.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    pub cycle_id: String,
    pub status: CycleStatus,
    pub entries: i64,
    pub current_balance: i64,
    pub total_seeded: i64,
    pub total_mortality: i64,
    pub total_harvest: i64,
    pub net_adjustment: i64,
    pub total_transfer_in: i64,
    pub total_transfer_out: i64,
    /// `1 - mortality / seeded`, absent before the seeding entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub survival_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Discrepancy {
    pub movement_id: String,
    pub seq: i64,
    pub expected_balance: i64,
    pub cached_balance: i64,
}

/// Result of replaying a cycle's ledger against its cached balances.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub cycle_id: String,
    pub entries: i64,
    pub ledger_sum: i64,
    pub discrepancies: Vec<Discrepancy>,
    /// Any running sum below zero.
    pub went_negative: bool,
}

impl ReconcileReport {
    pub fn is_consistent(&self) -> bool {
        self.discrepancies.is_empty() && !self.went_negative
    }
}

/// A growth sampling together with the mortality entry it produced.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SamplingRecorded {
    pub sampling: GrowthSampling,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub movement: Option<StockMovement>,
}

/// A harvest realization together with its harvest entry.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HarvestRecorded {
    pub realization: HarvestRealization,
    pub movement: StockMovement,
}

/// Both legs of a transfer between cycles.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecorded {
    pub transfer_out: StockMovement,
    pub transfer_in: StockMovement,
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Body for `POST /ponds`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePondRequest {
    pub name: String,
    pub length_m: f64,
    pub width_m: f64,
    pub depth_m: f64,
    #[serde(default)]
    pub capacity: Option<i64>,
    #[serde(default)]
    pub condition: Option<PondCondition>,
    #[serde(default)]
    pub created_by: Option<String>,
}

/// Body for `PATCH /ponds/{id}`. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePondRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub length_m: Option<f64>,
    #[serde(default)]
    pub width_m: Option<f64>,
    #[serde(default)]
    pub depth_m: Option<f64>,
    #[serde(default)]
    pub capacity: Option<i64>,
    #[serde(default)]
    pub condition: Option<PondCondition>,
}

/// Body for `POST /cycles`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenCycleRequest {
    pub pond_id: String,
    pub initial_quantity: i64,
    pub date_seeded: NaiveDate,
    #[serde(default)]
    pub species: Option<String>,
    #[serde(default)]
    pub seed_source: Option<String>,
    #[serde(default)]
    pub seed_size: Option<String>,
    #[serde(default)]
    pub avg_seed_weight_g: Option<f64>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
}

/// Body for `POST /cycles/{id}/@mortality`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MortalityRequest {
    pub count: i64,
    pub date: NaiveDate,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
}

/// Body for `POST /cycles/{id}/@harvest`. `ref_id` is the harvest
/// realization id and keys idempotency.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarvestRequest {
    pub count: i64,
    pub date: NaiveDate,
    #[serde(default)]
    pub ref_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
}

/// Body for `POST /cycles/{id}/@adjust` and `POST /ponds/{id}/@adjust`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustmentRequest {
    pub delta: i64,
    pub date: NaiveDate,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
}

/// Body for `POST /cycles/{id}/@transfer`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub to_cycle_id: String,
    pub count: i64,
    pub date: NaiveDate,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
}

/// Body for `POST /cycles/{id}/@close`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseCycleRequest {
    #[serde(default)]
    pub closed_by: Option<String>,
    /// RFC 3339; defaults to now.
    #[serde(default)]
    pub closed_at: Option<String>,
}

/// Body for `POST /cycles/{id}/@samplings`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplingRequest {
    /// Client-generated id; makes the submission idempotent.
    #[serde(default)]
    pub id: Option<String>,
    pub sample_date: NaiveDate,
    pub sample_count: i64,
    pub avg_weight_g: f64,
    #[serde(default)]
    pub avg_length_cm: Option<f64>,
    #[serde(default)]
    pub mortality_count: i64,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
}

/// Body for `POST /cycles/{id}/@realizations`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealizationRequest {
    /// Client-generated id; makes the submission idempotent.
    #[serde(default)]
    pub id: Option<String>,
    pub harvest_date: NaiveDate,
    pub quantity: i64,
    pub total_weight_kg: f64,
    #[serde(default)]
    pub price_per_kg: Option<f64>,
    #[serde(default)]
    pub buyer: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
}

/// Query parameters for movement listings.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementListQuery {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub event_type: Option<String>,
}

/// Query parameters for point-in-time reads.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsOfQuery {
    #[serde(default)]
    pub as_of: Option<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_wire_names() {
        for t in EventType::ALL {
            assert_eq!(EventType::from_str(t.as_str()), Some(t));
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
        }
        assert_eq!(EventType::from_str("restock"), None);
    }

    #[test]
    fn outflow_types() {
        assert!(EventType::Mortality.is_outflow());
        assert!(EventType::Harvest.is_outflow());
        assert!(EventType::TransferOut.is_outflow());
        assert!(!EventType::Seeding.is_outflow());
        assert!(!EventType::Adjustment.is_outflow());
        assert!(!EventType::TransferIn.is_outflow());
    }

    #[test]
    fn cycle_status_is_forward_only() {
        use CycleStatus::*;
        assert!(Growing.can_transition_to(Harvest));
        assert!(Growing.can_transition_to(Closed));
        assert!(Harvest.can_transition_to(Closed));
        assert!(!Harvest.can_transition_to(Growing));
        assert!(!Closed.can_transition_to(Harvest));
        assert!(!Closed.can_transition_to(Closed));
    }

    #[test]
    fn volume_is_rounded_product() {
        assert_eq!(water_volume_m3(10.0, 5.0, 1.2), 60.0);
        assert_eq!(water_volume_m3(3.333, 3.0, 1.0), 10.0);
        assert_eq!(water_volume_m3(0.0, 5.0, 1.0), 0.0);
    }

    #[test]
    fn open_request_parses_iso_dates() {
        let req: OpenCycleRequest = serde_json::from_value(serde_json::json!({
            "pondId": "p1",
            "initialQuantity": 1000,
            "dateSeeded": "2025-01-01"
        }))
        .unwrap();
        assert_eq!(req.date_seeded, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert!(req.idempotency_key.is_none());
    }
}
