use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use stockroom_core::{AggregateRoot, ExpectedVersion, RequestContext};
use stockroom_inventory::{Adjustment, InventoryRecord, InventoryResult, LedgerEntry, NewLedgerEntry};

use crate::store::{ChangeSet, InventoryStore};

use super::{AttemptError, InventoryEngine, audit};

/// Result of a committed adjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentOutcome {
    pub record: InventoryRecord,
    pub ledger_entry: LedgerEntry,
}

impl<S: InventoryStore> InventoryEngine<S> {
    /// Manual stock change: exactly one record write and one ledger entry.
    ///
    /// Not idempotent; supply `reference_id` for upstream de-duplication.
    #[instrument(
        skip(self, ctx, adjustment),
        fields(
            tenant_id = %ctx.tenant_id(),
            actor = %ctx.actor(),
            product_id = %adjustment.product_id,
            kind = ?adjustment.kind,
            quantity = adjustment.quantity
        ),
        err(level = "warn")
    )]
    pub async fn adjust(&self, ctx: &RequestContext, adjustment: Adjustment) -> InventoryResult<AdjustmentOutcome> {
        adjustment.validate()?;

        let outcome = self
            .retrying("adjust", || self.try_adjust(ctx, &adjustment))
            .await?;

        info!(
            ledger_entry_id = outcome.ledger_entry.id.0,
            stock_quantity = outcome.record.stock_quantity(),
            version = outcome.record.version(),
            "stock adjusted"
        );
        audit(std::slice::from_ref(&outcome.ledger_entry));
        Ok(outcome)
    }

    async fn try_adjust(
        &self,
        ctx: &RequestContext,
        adjustment: &Adjustment,
    ) -> Result<AdjustmentOutcome, AttemptError> {
        let tenant_id = ctx.tenant_id();
        let (product, record) = self.load(tenant_id, adjustment.product_id).await?;
        let change = record.plan_adjustment(adjustment.kind, adjustment.quantity)?;

        let now = Utc::now();
        let entry = NewLedgerEntry::for_change(
            &record,
            product.name,
            &change,
            adjustment.change_type,
            adjustment.reason.clone(),
            adjustment.reference_id.clone(),
            ctx.actor(),
            now,
        );

        let mut changes = ChangeSet::new();
        changes
            .write_record(record.with_change(&change, now), ExpectedVersion::of(&record))
            .append(entry);

        let receipt = self.store.commit(tenant_id, changes).await?;
        Ok(AdjustmentOutcome {
            record: receipt.first_record()?.clone(),
            ledger_entry: receipt.first_entry()?.clone(),
        })
    }
}
