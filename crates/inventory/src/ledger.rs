//! Append-only quantity ledger.
//!
//! Every state-changing inventory operation produces exactly one entry. Each
//! entry records both timelines of the record it touched:
//!
//! - `quantity_*`: the `stock_quantity` before, the signed change and after
//! - `reserved_*`: the `reserved_quantity` before, the signed change and after
//!
//! so that replaying a product's entries in id order reproduces both the
//! current stock and the current reservation total (see [`replay`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{ProductId, TenantId, UserId};

use crate::error::{InventoryError, InventoryResult};
use crate::record::{InventoryRecord, QuantityChange};

/// Kind of quantity change recorded in the ledger.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Purchase,
    Sale,
    Adjustment,
    Transfer,
    Damage,
    Reservation,
    Release,
}

impl ChangeType {
    pub const ALL: [ChangeType; 7] = [
        ChangeType::Purchase,
        ChangeType::Sale,
        ChangeType::Adjustment,
        ChangeType::Transfer,
        ChangeType::Damage,
        ChangeType::Reservation,
        ChangeType::Release,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ChangeType::Purchase => "purchase",
            ChangeType::Sale => "sale",
            ChangeType::Adjustment => "adjustment",
            ChangeType::Transfer => "transfer",
            ChangeType::Damage => "damage",
            ChangeType::Reservation => "reservation",
            ChangeType::Release => "release",
        }
    }

    /// Whether a caller may label a manual stock adjustment with this type.
    ///
    /// `reservation` and `release` are produced only by the reservation flow.
    pub fn is_adjustment_label(self) -> bool {
        !matches!(self, ChangeType::Reservation | ChangeType::Release)
    }
}

impl core::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for ChangeType {
    type Err = InventoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChangeType::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| InventoryError::validation(format!("unknown change type '{s}'")))
    }
}

/// Store-assigned ledger entry id.
///
/// Strictly increasing in append order, so it doubles as the creation order
/// and as the tie breaker for equal `created_at`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedgerEntryId(pub u64);

impl core::fmt::Display for LedgerEntryId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// A ledger entry ready to be appended (no id yet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    /// Product name at the time of the change (for the history view).
    pub product_name: String,
    pub change_type: ChangeType,

    pub quantity_before: u64,
    pub quantity_changed: i64,
    pub quantity_after: u64,

    pub reserved_before: u64,
    pub reserved_changed: i64,
    pub reserved_after: u64,

    pub reason: String,
    pub reference_id: Option<String>,
    pub operated_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl NewLedgerEntry {
    /// Describe `change` applied to `record`.
    #[allow(clippy::too_many_arguments)]
    pub fn for_change(
        record: &InventoryRecord,
        product_name: impl Into<String>,
        change: &QuantityChange,
        change_type: ChangeType,
        reason: impl Into<String>,
        reference_id: Option<String>,
        operated_by: UserId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            tenant_id: record.tenant_id(),
            product_id: record.product_id(),
            product_name: product_name.into(),
            change_type,
            quantity_before: change.stock_before,
            quantity_changed: change.stock_delta(),
            quantity_after: change.stock_after,
            reserved_before: change.reserved_before,
            reserved_changed: change.reserved_delta(),
            reserved_after: change.reserved_after,
            reason: reason.into(),
            reference_id,
            operated_by,
            created_at,
        }
    }

    pub fn into_entry(self, id: LedgerEntryId) -> LedgerEntry {
        LedgerEntry {
            id,
            tenant_id: self.tenant_id,
            product_id: self.product_id,
            product_name: self.product_name,
            change_type: self.change_type,
            quantity_before: self.quantity_before,
            quantity_changed: self.quantity_changed,
            quantity_after: self.quantity_after,
            reserved_before: self.reserved_before,
            reserved_changed: self.reserved_changed,
            reserved_after: self.reserved_after,
            reason: self.reason,
            reference_id: self.reference_id,
            operated_by: self.operated_by,
            created_at: self.created_at,
        }
    }
}

/// A stored, immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub product_name: String,
    pub change_type: ChangeType,

    pub quantity_before: u64,
    pub quantity_changed: i64,
    pub quantity_after: u64,

    pub reserved_before: u64,
    pub reserved_changed: i64,
    pub reserved_after: u64,

    pub reason: String,
    pub reference_id: Option<String>,
    pub operated_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// `after == before + changed` for both timelines.
    pub fn is_self_consistent(&self) -> bool {
        apply_delta(self.quantity_before, self.quantity_changed) == Some(self.quantity_after)
            && apply_delta(self.reserved_before, self.reserved_changed) == Some(self.reserved_after)
    }
}

/// Totals reconstructed from a ledger.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ReplayedState {
    pub stock_quantity: u64,
    pub reserved_quantity: u64,
    pub entries: usize,
}

/// Fold a product's entries (any order; sorted by id here) from zero.
///
/// Fails on the first entry whose arithmetic does not hold or whose
/// before-values differ from the running totals.
pub fn replay<'a, I>(entries: I) -> InventoryResult<ReplayedState>
where
    I: IntoIterator<Item = &'a LedgerEntry>,
{
    let mut sorted: Vec<&LedgerEntry> = entries.into_iter().collect();
    sorted.sort_by_key(|e| e.id);

    let mut state = ReplayedState::default();
    for entry in sorted {
        if !entry.is_self_consistent() {
            return Err(InventoryError::LedgerChainBroken {
                entry_id: entry.id.0,
                detail: "after != before + changed".to_string(),
            });
        }
        if entry.quantity_before != state.stock_quantity
            || entry.reserved_before != state.reserved_quantity
        {
            return Err(InventoryError::LedgerChainBroken {
                entry_id: entry.id.0,
                detail: format!(
                    "expected before stock={} reserved={}, found stock={} reserved={}",
                    state.stock_quantity,
                    state.reserved_quantity,
                    entry.quantity_before,
                    entry.reserved_before
                ),
            });
        }
        state.stock_quantity = entry.quantity_after;
        state.reserved_quantity = entry.reserved_after;
        state.entries += 1;
    }

    Ok(state)
}

fn apply_delta(base: u64, delta: i64) -> Option<u64> {
    if delta >= 0 {
        base.checked_add(delta as u64)
    } else {
        base.checked_sub(delta.unsigned_abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u64, before: u64, changed: i64, r_before: u64, r_changed: i64) -> LedgerEntry {
        LedgerEntry {
            id: LedgerEntryId(id),
            tenant_id: TenantId::new(),
            product_id: ProductId::new(),
            product_name: "Widget".to_string(),
            change_type: ChangeType::Adjustment,
            quantity_before: before,
            quantity_changed: changed,
            quantity_after: apply_delta(before, changed).unwrap(),
            reserved_before: r_before,
            reserved_changed: r_changed,
            reserved_after: apply_delta(r_before, r_changed).unwrap(),
            reason: "test".to_string(),
            reference_id: None,
            operated_by: UserId::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn change_type_parses_case_insensitively() {
        assert_eq!("Purchase".parse::<ChangeType>().unwrap(), ChangeType::Purchase);
        assert_eq!(" release ".parse::<ChangeType>().unwrap(), ChangeType::Release);
        assert!(matches!(
            "refund".parse::<ChangeType>(),
            Err(InventoryError::Validation(_))
        ));
    }

    #[test]
    fn reservation_types_are_not_adjustment_labels() {
        assert!(ChangeType::Damage.is_adjustment_label());
        assert!(!ChangeType::Reservation.is_adjustment_label());
        assert!(!ChangeType::Release.is_adjustment_label());
    }

    #[test]
    fn replay_reproduces_both_timelines_regardless_of_input_order() {
        let entries = vec![
            entry(3, 20, 0, 10, -10),
            entry(1, 0, 20, 0, 0),
            entry(2, 20, 0, 0, 10),
            entry(4, 20, -5, 0, 0),
        ];
        let state = replay(&entries).unwrap();
        assert_eq!(state.stock_quantity, 15);
        assert_eq!(state.reserved_quantity, 0);
        assert_eq!(state.entries, 4);
    }

    #[test]
    fn replay_detects_gap_in_chain() {
        let entries = vec![entry(1, 0, 20, 0, 0), entry(2, 25, -5, 0, 0)];
        match replay(&entries) {
            Err(InventoryError::LedgerChainBroken { entry_id, .. }) => assert_eq!(entry_id, 2),
            other => panic!("expected broken chain, got {other:?}"),
        }
    }

    #[test]
    fn replay_rejects_bad_arithmetic() {
        let mut bad = entry(1, 0, 20, 0, 0);
        bad.quantity_after = 21;
        assert!(matches!(
            replay(&[bad]),
            Err(InventoryError::LedgerChainBroken { entry_id: 1, .. })
        ));
    }

    #[test]
    fn change_type_is_snake_case_on_the_wire() {
        let mut e = entry(1, 0, 5, 0, 0);
        e.change_type = ChangeType::Purchase;
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["change_type"], "purchase");
        assert_eq!(json["quantity_changed"], 5);
        assert_eq!(json["id"], 1);
    }

    #[test]
    fn empty_ledger_replays_to_zero() {
        assert_eq!(replay(&[]).unwrap(), ReplayedState::default());
    }
}
