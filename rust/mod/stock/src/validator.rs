use chrono::NaiveDate;

use aquafarm_core::ServiceError;

use crate::model::{CycleStatus, EventType, LedgerHead, SeedingCycle};

/// A movement as requested, before it is checked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProposedMovement {
    pub event_type: EventType,
    pub delta: i64,
    pub event_date: NaiveDate,
}

impl ProposedMovement {
    pub fn new(event_type: EventType, delta: i64, event_date: NaiveDate) -> Self {
        Self {
            event_type,
            delta,
            event_date,
        }
    }
}

/// Stateless checks run before every append. Never touches storage: the
/// caller supplies the ledger head it read under the ledger lock.
pub struct MovementValidator;

impl MovementValidator {
    /// Check a cycle-bound movement against the cycle and its ledger head.
    pub fn validate(
        cycle: &SeedingCycle,
        proposed: &ProposedMovement,
        head: &LedgerHead,
    ) -> Result<(), ServiceError> {
        let ProposedMovement {
            event_type,
            delta,
            event_date,
        } = *proposed;

        if delta == 0 {
            return Err(ServiceError::Validation("quantity must not be zero".into()));
        }

        match cycle.status {
            CycleStatus::Closed => {
                return Err(ServiceError::InvalidState(format!(
                    "cycle {} is closed",
                    cycle.id
                )));
            }
            CycleStatus::Harvest
                if matches!(event_type, EventType::Seeding | EventType::TransferIn) =>
            {
                return Err(ServiceError::InvalidState(format!(
                    "cycle {} is in harvest and accepts no {event_type}",
                    cycle.id
                )));
            }
            _ => {}
        }

        if event_type == EventType::Seeding {
            if !head.is_empty() {
                return Err(ServiceError::Validation(format!(
                    "cycle {} is already seeded",
                    cycle.id
                )));
            }
            if delta < 0 {
                return Err(ServiceError::Validation("seeding must add fish".into()));
            }
        } else if head.is_empty() {
            return Err(ServiceError::Validation(format!(
                "cycle {} has no seeding entry",
                cycle.id
            )));
        }

        if event_type.is_outflow() && delta > 0 {
            return Err(ServiceError::Validation(format!(
                "{event_type} must remove fish"
            )));
        }

        if event_date < cycle.date_seeded {
            return Err(ServiceError::Validation(format!(
                "event date {event_date} is before the cycle was seeded ({})",
                cycle.date_seeded
            )));
        }
        check_dates_and_balance(proposed, head, &format!("cycle {}", cycle.id))
    }

    /// Check a pond-level (cycle-less) movement. Only adjustments exist
    /// outside a cycle.
    pub fn validate_pond_level(
        proposed: &ProposedMovement,
        head: &LedgerHead,
    ) -> Result<(), ServiceError> {
        if proposed.event_type != EventType::Adjustment {
            return Err(ServiceError::Validation(format!(
                "{} requires a seeding cycle",
                proposed.event_type
            )));
        }
        if proposed.delta == 0 {
            return Err(ServiceError::Validation("quantity must not be zero".into()));
        }
        check_dates_and_balance(proposed, head, "pond-level ledger")
    }
}

fn check_dates_and_balance(
    proposed: &ProposedMovement,
    head: &LedgerHead,
    what: &str,
) -> Result<(), ServiceError> {
    if let Some(last) = head.last_event_date {
        if proposed.event_date < last {
            return Err(ServiceError::Validation(format!(
                "event date {} is before the latest entry of {what} ({last})",
                proposed.event_date
            )));
        }
    }

    let next = head
        .balance
        .checked_add(proposed.delta)
        .ok_or_else(|| ServiceError::Validation("quantity out of range".into()))?;
    if next < 0 {
        return Err(ServiceError::InsufficientStock(format!(
            "{what} holds {}, cannot remove {}",
            head.balance,
            -proposed.delta
        )));
    }
    Ok(())
}
