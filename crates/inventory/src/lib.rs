//! Inventory control domain module.
//!
//! This crate contains the business rules for stock, reservations and the
//! quantity ledger, implemented purely as deterministic domain logic (no IO,
//! no storage, no clocks except where a timestamp is passed in).

pub mod adjustment;
pub mod error;
pub mod ledger;
pub mod record;
pub mod reservation;

pub use adjustment::{Adjustment, AdjustmentKind, BatchLine};
pub use error::{BatchItemFailure, InventoryError, InventoryResult};
pub use ledger::{ChangeType, LedgerEntry, LedgerEntryId, NewLedgerEntry, ReplayedState, replay};
pub use record::{InventoryKey, InventoryRecord, MAX_QUANTITY, QuantityChange};
pub use reservation::{NewReservation, Reservation, ReservationState};
