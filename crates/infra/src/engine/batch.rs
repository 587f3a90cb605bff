//! All-or-nothing batch adjustments.
//!
//! Every line is planned against a working copy of its product's record
//! (so two lines on the same product see each other), and the whole batch
//! commits as one change set: one version-checked write per product plus one
//! ledger entry per line. Any failing line rejects the batch and nothing is
//! written.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use stockroom_core::{AggregateRoot, ExpectedVersion, ProductId, RequestContext};
use stockroom_inventory::{
    Adjustment, BatchItemFailure, BatchLine, InventoryError, InventoryRecord, InventoryResult,
    LedgerEntry, NewLedgerEntry,
};

use crate::store::{ChangeSet, InventoryStore, ProductInfo};

use super::{AttemptError, InventoryEngine, audit};

/// Result of a committed batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// One entry per line, in line order.
    pub entries: Vec<LedgerEntry>,
    /// Final record of every product touched, in first-appearance order.
    pub records: Vec<InventoryRecord>,
}

struct Working {
    product: ProductInfo,
    loaded_version: u64,
    record: InventoryRecord,
}

impl<S: InventoryStore> InventoryEngine<S> {
    #[instrument(
        skip(self, ctx, lines, reason),
        fields(tenant_id = %ctx.tenant_id(), actor = %ctx.actor(), lines = lines.len()),
        err(level = "warn")
    )]
    pub async fn batch_adjust(
        &self,
        ctx: &RequestContext,
        lines: Vec<BatchLine>,
        reason: &str,
        reference_id: Option<&str>,
    ) -> InventoryResult<BatchOutcome> {
        if lines.is_empty() {
            return Err(InventoryError::validation("batch must contain at least one line"));
        }

        let adjustments: Vec<Adjustment> = lines
            .iter()
            .map(|line| line.to_adjustment(reason, reference_id))
            .collect();

        let failures: Vec<BatchItemFailure> = adjustments
            .iter()
            .enumerate()
            .filter_map(|(index, adjustment)| {
                adjustment.validate().err().map(|error| BatchItemFailure {
                    index,
                    product_id: adjustment.product_id,
                    error,
                })
            })
            .collect();
        if !failures.is_empty() {
            warn!(failed = failures.len(), "batch rejected by input validation");
            return Err(InventoryError::BatchRejected(failures));
        }

        let outcome = self
            .retrying("batch_adjust", || self.try_batch(ctx, &adjustments))
            .await?;

        info!(
            entries = outcome.entries.len(),
            products = outcome.records.len(),
            "batch adjustment committed"
        );
        audit(&outcome.entries);
        Ok(outcome)
    }

    async fn try_batch(
        &self,
        ctx: &RequestContext,
        adjustments: &[Adjustment],
    ) -> Result<BatchOutcome, AttemptError> {
        let tenant_id = ctx.tenant_id();
        let now = Utc::now();

        let mut working: Vec<Working> = Vec::new();
        let mut slots: HashMap<ProductId, usize> = HashMap::new();
        let mut entries = Vec::with_capacity(adjustments.len());
        let mut failures = Vec::new();

        for (index, adjustment) in adjustments.iter().enumerate() {
            let product_id = adjustment.product_id;
            let slot = match slots.get(&product_id) {
                Some(&slot) => slot,
                None => match self.load(tenant_id, product_id).await {
                    Ok((product, record)) => {
                        working.push(Working {
                            product,
                            loaded_version: record.version(),
                            record,
                        });
                        slots.insert(product_id, working.len() - 1);
                        working.len() - 1
                    }
                    Err(AttemptError::Failed(error @ InventoryError::NotFound(_))) => {
                        failures.push(BatchItemFailure {
                            index,
                            product_id,
                            error,
                        });
                        continue;
                    }
                    Err(other) => return Err(other),
                },
            };

            let w = &mut working[slot];
            match w.record.plan_adjustment(adjustment.kind, adjustment.quantity) {
                Ok(change) => {
                    entries.push(NewLedgerEntry::for_change(
                        &w.record,
                        w.product.name.clone(),
                        &change,
                        adjustment.change_type,
                        adjustment.reason.clone(),
                        adjustment.reference_id.clone(),
                        ctx.actor(),
                        now,
                    ));
                    w.record = w.record.with_change(&change, now);
                }
                Err(error) => failures.push(BatchItemFailure {
                    index,
                    product_id,
                    error,
                }),
            }
        }

        if !failures.is_empty() {
            warn!(failed = failures.len(), "batch rejected against current stock");
            return Err(InventoryError::BatchRejected(failures).into());
        }

        let mut changes = ChangeSet::new();
        for w in working {
            changes.write_record(w.record, ExpectedVersion::Exact(w.loaded_version));
        }
        for entry in entries {
            changes.append(entry);
        }

        let receipt = self.store.commit(tenant_id, changes).await?;
        Ok(BatchOutcome {
            entries: receipt.ledger,
            records: receipt.records,
        })
    }
}
