//! Reservations: stock held against an external reference until released or consumed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{ProductId, ReservationId, TenantId, UserId};

use crate::error::{InventoryError, InventoryResult};

/// Reservation lifecycle: `Active -> {Released, Consumed}`; both terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationState {
    Active,
    Released,
    Consumed,
}

impl ReservationState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ReservationState::Active)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationState::Active => "active",
            ReservationState::Released => "released",
            ReservationState::Consumed => "consumed",
        }
    }
}

impl core::str::FromStr for ReservationState {
    type Err = InventoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ReservationState::Active),
            "released" => Ok(ReservationState::Released),
            "consumed" => Ok(ReservationState::Consumed),
            other => Err(InventoryError::validation(format!(
                "unknown reservation state '{other}'"
            ))),
        }
    }
}

/// Order-service request to hold stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReservation {
    pub product_id: ProductId,
    pub quantity: u64,
    /// Kind of consumer, e.g. `"order"`.
    pub reference_type: String,
    pub reference_id: String,
}

impl NewReservation {
    pub fn new(
        product_id: ProductId,
        quantity: u64,
        reference_type: impl Into<String>,
        reference_id: impl Into<String>,
    ) -> Self {
        Self {
            product_id,
            quantity,
            reference_type: reference_type.into(),
            reference_id: reference_id.into(),
        }
    }

    pub fn validate(&self) -> InventoryResult<()> {
        if self.quantity == 0 {
            return Err(InventoryError::validation("reservation quantity must be at least 1"));
        }
        if self.quantity > i64::MAX as u64 {
            return Err(InventoryError::validation("reservation quantity is out of range"));
        }
        if self.reference_type.trim().is_empty() || self.reference_id.trim().is_empty() {
            return Err(InventoryError::validation("reservation reference is required"));
        }
        Ok(())
    }
}

/// A hold on stock tied to an external reference (typically an order line).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub quantity: u64,
    pub reference_type: String,
    pub reference_id: String,
    pub state: ReservationState,
    /// Whether this reservation moved `reserved_quantity` (product was tracked at the time).
    pub tracked: bool,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Reservation {
    pub fn open(
        tenant_id: TenantId,
        request: NewReservation,
        tracked: bool,
        created_by: UserId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ReservationId::new(),
            tenant_id,
            product_id: request.product_id,
            quantity: request.quantity,
            reference_type: request.reference_type,
            reference_id: request.reference_id,
            state: ReservationState::Active,
            tracked,
            created_by,
            created_at,
            closed_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == ReservationState::Active
    }

    /// Move to a terminal state. `None` if already terminal (callers treat that as success).
    pub fn close(&self, to: ReservationState, at: DateTime<Utc>) -> Option<Self> {
        if self.state.is_terminal() || !to.is_terminal() {
            return None;
        }
        let mut next = self.clone();
        next.state = to;
        next.closed_at = Some(at);
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active() -> Reservation {
        Reservation::open(
            TenantId::new(),
            NewReservation::new(ProductId::new(), 4, "order", "SO-1001"),
            true,
            UserId::new(),
            Utc::now(),
        )
    }

    #[test]
    fn close_sets_state_and_timestamp() {
        let r = active();
        let at = Utc::now();
        let released = r.close(ReservationState::Released, at).unwrap();
        assert_eq!(released.state, ReservationState::Released);
        assert_eq!(released.closed_at, Some(at));
        assert_eq!(released.quantity, r.quantity);
    }

    #[test]
    fn terminal_states_do_not_transition() {
        let consumed = active().close(ReservationState::Consumed, Utc::now()).unwrap();
        assert!(consumed.close(ReservationState::Released, Utc::now()).is_none());
        assert!(consumed.close(ReservationState::Consumed, Utc::now()).is_none());
    }

    #[test]
    fn cannot_close_back_to_active() {
        assert!(active().close(ReservationState::Active, Utc::now()).is_none());
    }

    #[test]
    fn new_reservation_validation() {
        let p = ProductId::new();
        assert!(NewReservation::new(p, 0, "order", "1").validate().is_err());
        assert!(NewReservation::new(p, 1, "", "1").validate().is_err());
        assert!(NewReservation::new(p, 1, "order", "1").validate().is_ok());
    }

    #[test]
    fn state_strings_roundtrip() {
        for s in [
            ReservationState::Active,
            ReservationState::Released,
            ReservationState::Consumed,
        ] {
            assert_eq!(s.as_str().parse::<ReservationState>().unwrap(), s);
        }
    }
}
