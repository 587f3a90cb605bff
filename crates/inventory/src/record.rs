//! Inventory record aggregate and its quantity transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{AggregateRoot, ProductId, TenantId};

use crate::adjustment::AdjustmentKind;
use crate::error::{InventoryError, InventoryResult};

/// Largest stock level a record may hold; ledger deltas are signed 64-bit.
pub const MAX_QUANTITY: u64 = i64::MAX as u64;

/// Identity of an inventory record: one per (tenant, product).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InventoryKey {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
}

impl InventoryKey {
    pub fn new(tenant_id: TenantId, product_id: ProductId) -> Self {
        Self {
            tenant_id,
            product_id,
        }
    }
}

/// Aggregate root: stock state of one product in one tenant.
///
/// Quantities are unsigned, so "never negative" holds by construction. When
/// `track_inventory` is set, `reserved_quantity <= stock_quantity` is enforced
/// by every transition below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    key: InventoryKey,
    stock_quantity: u64,
    reserved_quantity: u64,
    track_inventory: bool,
    version: u64,
    updated_at: DateTime<Utc>,
}

/// Before/after values of one transition on a record.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct QuantityChange {
    pub stock_before: u64,
    pub stock_after: u64,
    pub reserved_before: u64,
    pub reserved_after: u64,
}

impl QuantityChange {
    pub fn stock_delta(&self) -> i64 {
        signed_delta(self.stock_before, self.stock_after)
    }

    pub fn reserved_delta(&self) -> i64 {
        signed_delta(self.reserved_before, self.reserved_after)
    }
}

fn signed_delta(before: u64, after: u64) -> i64 {
    let delta = i128::from(after) - i128::from(before);
    i64::try_from(delta).unwrap_or(if delta < 0 { i64::MIN } else { i64::MAX })
}

impl InventoryRecord {
    /// Zero-state record for a product touched for the first time (version 0, not persisted).
    pub fn empty(tenant_id: TenantId, product_id: ProductId, track_inventory: bool) -> Self {
        Self {
            key: InventoryKey::new(tenant_id, product_id),
            stock_quantity: 0,
            reserved_quantity: 0,
            track_inventory,
            version: 0,
            updated_at: DateTime::<Utc>::MIN_UTC,
        }
    }

    /// Rehydrate a record read from a store.
    pub fn from_parts(
        key: InventoryKey,
        stock_quantity: u64,
        reserved_quantity: u64,
        track_inventory: bool,
        version: u64,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            stock_quantity,
            reserved_quantity,
            track_inventory,
            version,
            updated_at,
        }
    }

    pub fn key(&self) -> InventoryKey {
        self.key
    }

    pub fn tenant_id(&self) -> TenantId {
        self.key.tenant_id
    }

    pub fn product_id(&self) -> ProductId {
        self.key.product_id
    }

    pub fn stock_quantity(&self) -> u64 {
        self.stock_quantity
    }

    pub fn reserved_quantity(&self) -> u64 {
        self.reserved_quantity
    }

    pub fn track_inventory(&self) -> bool {
        self.track_inventory
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_persisted(&self) -> bool {
        self.version > 0
    }

    /// `stock - reserved`; never negative.
    pub fn available(&self) -> u64 {
        self.stock_quantity.saturating_sub(self.reserved_quantity)
    }

    /// `reserved <= stock` whenever tracking is on.
    pub fn invariant_holds(&self) -> bool {
        !self.track_inventory || self.reserved_quantity <= self.stock_quantity
    }

    /// Decide the outcome of a manual stock adjustment.
    ///
    /// Decrease and set are guarded against dropping stock below what is
    /// reserved; nothing is clamped for tracked products. Untracked products
    /// skip the checks and saturate at zero.
    pub fn plan_adjustment(&self, kind: AdjustmentKind, quantity: u64) -> InventoryResult<QuantityChange> {
        let before = self.stock_quantity;
        let after = match kind {
            AdjustmentKind::Increase => before
                .checked_add(quantity)
                .filter(|after| *after <= MAX_QUANTITY)
                .ok_or_else(|| InventoryError::validation("stock quantity overflow"))?,
            AdjustmentKind::Decrease if self.track_inventory => {
                match before.checked_sub(quantity) {
                    Some(after) if after >= self.reserved_quantity => after,
                    _ => {
                        return Err(InventoryError::InsufficientStock {
                            reason: "requested decrease exceeds available stock",
                            requested: quantity,
                            available: self.available(),
                        });
                    }
                }
            }
            AdjustmentKind::Decrease => before.saturating_sub(quantity),
            AdjustmentKind::Set => {
                if quantity > MAX_QUANTITY {
                    return Err(InventoryError::validation("stock quantity overflow"));
                }
                if self.track_inventory && quantity < self.reserved_quantity {
                    return Err(InventoryError::InsufficientStock {
                        reason: "new stock level is below reserved quantity",
                        requested: quantity,
                        available: self.reserved_quantity,
                    });
                }
                quantity
            }
        };

        Ok(QuantityChange {
            stock_before: before,
            stock_after: after,
            reserved_before: self.reserved_quantity,
            reserved_after: self.reserved_quantity,
        })
    }

    /// Hold `quantity` units against available stock.
    pub fn plan_reserve(&self, quantity: u64) -> InventoryResult<QuantityChange> {
        let available = self.available();
        if quantity > available {
            return Err(InventoryError::InsufficientStock {
                reason: "requested quantity exceeds available stock",
                requested: quantity,
                available,
            });
        }
        Ok(QuantityChange {
            stock_before: self.stock_quantity,
            stock_after: self.stock_quantity,
            reserved_before: self.reserved_quantity,
            reserved_after: self.reserved_quantity + quantity,
        })
    }

    /// Give back a held quantity. Clamped at zero; correct bookkeeping never needs it.
    pub fn plan_release(&self, quantity: u64) -> QuantityChange {
        QuantityChange {
            stock_before: self.stock_quantity,
            stock_after: self.stock_quantity,
            reserved_before: self.reserved_quantity,
            reserved_after: self.reserved_quantity.saturating_sub(quantity),
        }
    }

    /// Fulfil a held quantity: both stock and reserved go down.
    pub fn plan_consume(&self, quantity: u64) -> QuantityChange {
        QuantityChange {
            stock_before: self.stock_quantity,
            stock_after: self.stock_quantity.saturating_sub(quantity),
            reserved_before: self.reserved_quantity,
            reserved_after: self.reserved_quantity.saturating_sub(quantity),
        }
    }

    /// Turn tracking on or off. Enabling it requires the invariant to already hold.
    pub fn with_tracking(&self, track_inventory: bool) -> InventoryResult<Self> {
        if track_inventory && self.reserved_quantity > self.stock_quantity {
            return Err(InventoryError::InsufficientStock {
                reason: "reserved quantity exceeds stock, cannot enable tracking",
                requested: self.reserved_quantity,
                available: self.stock_quantity,
            });
        }
        let mut next = self.clone();
        next.track_inventory = track_inventory;
        Ok(next)
    }

    /// Next state after `change`. The version is left for the store to bump.
    pub fn with_change(&self, change: &QuantityChange, at: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.stock_quantity = change.stock_after;
        next.reserved_quantity = change.reserved_after;
        next.updated_at = at;
        next
    }

    /// Called by stores after a successful versioned write.
    pub fn committed(mut self, version: u64, at: DateTime<Utc>) -> Self {
        self.version = version;
        self.updated_at = at;
        self
    }
}

impl AggregateRoot for InventoryRecord {
    type Id = InventoryKey;

    fn id(&self) -> &Self::Id {
        &self.key
    }

    fn version(&self) -> u64 {
        self.version
    }
}
