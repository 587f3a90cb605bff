//! Manual stock adjustments (admin API input).

use serde::{Deserialize, Serialize};

use stockroom_core::ProductId;

use crate::error::{InventoryError, InventoryResult};
use crate::ledger::ChangeType;

/// How an adjustment's quantity is applied to `stock_quantity`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentKind {
    Increase,
    Decrease,
    /// The quantity becomes the literal new stock level.
    Set,
}

impl core::str::FromStr for AdjustmentKind {
    type Err = InventoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "increase" => Ok(AdjustmentKind::Increase),
            "decrease" => Ok(AdjustmentKind::Decrease),
            "set" => Ok(AdjustmentKind::Set),
            other => Err(InventoryError::validation(format!(
                "adjustment type must be one of: increase, decrease, set (got '{other}')"
            ))),
        }
    }
}

/// A single stock adjustment request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjustment {
    pub product_id: ProductId,
    pub kind: AdjustmentKind,
    /// `>= 1` for increase/decrease, `>= 0` for set.
    pub quantity: u64,
    /// Ledger label; `adjustment` unless the caller knows better (purchase, damage, ...).
    pub change_type: ChangeType,
    pub reason: String,
    /// Caller-supplied de-duplication/audit key.
    pub reference_id: Option<String>,
}

impl Adjustment {
    pub fn new(product_id: ProductId, kind: AdjustmentKind, quantity: u64, reason: impl Into<String>) -> Self {
        Self {
            product_id,
            kind,
            quantity,
            change_type: ChangeType::Adjustment,
            reason: reason.into(),
            reference_id: None,
        }
    }

    pub fn with_change_type(mut self, change_type: ChangeType) -> Self {
        self.change_type = change_type;
        self
    }

    pub fn with_reference(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }

    pub fn validate(&self) -> InventoryResult<()> {
        if self.quantity == 0 && self.kind != AdjustmentKind::Set {
            return Err(InventoryError::validation("quantity must be at least 1"));
        }
        if self.quantity > i64::MAX as u64 {
            return Err(InventoryError::validation("quantity is out of range"));
        }
        if !self.change_type.is_adjustment_label() {
            return Err(InventoryError::validation(format!(
                "change type '{}' is reserved for the reservation flow",
                self.change_type
            )));
        }
        if self.reason.trim().is_empty() {
            return Err(InventoryError::validation("reason is required for adjustments"));
        }
        Ok(())
    }
}

/// One line of a batch adjustment; `reason` falls back to the batch reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchLine {
    pub product_id: ProductId,
    pub kind: AdjustmentKind,
    pub quantity: u64,
    pub change_type: Option<ChangeType>,
    pub reason: Option<String>,
}

impl BatchLine {
    pub fn new(product_id: ProductId, kind: AdjustmentKind, quantity: u64) -> Self {
        Self {
            product_id,
            kind,
            quantity,
            change_type: None,
            reason: None,
        }
    }

    /// Resolve into a full adjustment using the batch-level defaults.
    pub fn to_adjustment(&self, batch_reason: &str, reference_id: Option<&str>) -> Adjustment {
        let reason = match self.reason.as_deref() {
            Some(r) if !r.trim().is_empty() => r.to_string(),
            _ => batch_reason.to_string(),
        };
        Adjustment {
            product_id: self.product_id,
            kind: self.kind,
            quantity: self.quantity,
            change_type: self.change_type.unwrap_or(ChangeType::Adjustment),
            reason,
            reference_id: reference_id.map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_quantity_only_allowed_for_set() {
        let p = ProductId::new();
        assert!(Adjustment::new(p, AdjustmentKind::Increase, 0, "x").validate().is_err());
        assert!(Adjustment::new(p, AdjustmentKind::Decrease, 0, "x").validate().is_err());
        assert!(Adjustment::new(p, AdjustmentKind::Set, 0, "x").validate().is_ok());
    }

    #[test]
    fn reason_is_required() {
        let adj = Adjustment::new(ProductId::new(), AdjustmentKind::Increase, 1, "   ");
        assert_eq!(
            adj.validate(),
            Err(InventoryError::validation("reason is required for adjustments"))
        );
    }

    #[test]
    fn reservation_label_is_rejected() {
        let adj = Adjustment::new(ProductId::new(), AdjustmentKind::Increase, 1, "x")
            .with_change_type(ChangeType::Reservation);
        assert!(matches!(adj.validate(), Err(InventoryError::Validation(_))));
    }

    #[test]
    fn kind_parses() {
        assert_eq!("SET".parse::<AdjustmentKind>().unwrap(), AdjustmentKind::Set);
        assert!("bump".parse::<AdjustmentKind>().is_err());
    }

    #[test]
    fn batch_line_inherits_batch_reason() {
        let line = BatchLine::new(ProductId::new(), AdjustmentKind::Increase, 3);
        let adj = line.to_adjustment("cycle count", Some("count-7"));
        assert_eq!(adj.reason, "cycle count");
        assert_eq!(adj.change_type, ChangeType::Adjustment);
        assert_eq!(adj.reference_id.as_deref(), Some("count-7"));

        let own = BatchLine {
            reason: Some("broken pallet".to_string()),
            change_type: Some(ChangeType::Damage),
            ..BatchLine::new(ProductId::new(), AdjustmentKind::Decrease, 1)
        };
        let adj = own.to_adjustment("cycle count", None);
        assert_eq!(adj.reason, "broken pallet");
        assert_eq!(adj.change_type, ChangeType::Damage);
    }
}
