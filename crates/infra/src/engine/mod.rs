//! Inventory engine: adjustments, reservations and batches over an [`InventoryStore`].
//!
//! Every operation follows the same cycle:
//!
//! ```text
//! load record (tenant-scoped, zero-state on first touch)
//!   ↓
//! plan the transition (pure, in stockroom-inventory)
//!   ↓
//! commit record + ledger (+ reservation) as one ChangeSet, version-checked
//!   ↓
//! on Conflict: start over, up to `max_attempts`
//! ```
//!
//! No in-process lock is taken; serialization of writes to one record comes
//! entirely from the store's version check, so several engine instances may
//! run against the same store.

mod adjust;
mod batch;
mod reservation;

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use stockroom_core::{AggregateRoot, ExpectedVersion, ProductId, RequestContext, TenantId};
use stockroom_inventory::{InventoryError, InventoryRecord, InventoryResult, LedgerEntry, ReplayedState, replay};

use crate::config::EngineConfig;
use crate::store::{ChangeSet, InventoryStore, LedgerFilter, LedgerPage, Page, ProductInfo, StoreError};

pub use adjust::AdjustmentOutcome;
pub use batch::BatchOutcome;

/// Outcome of one attempt inside the retry loop.
#[derive(Debug)]
enum AttemptError {
    /// Lost a version race; the whole attempt is retried.
    Conflict(String),
    /// Anything else; returned to the caller as is.
    Failed(InventoryError),
}

impl From<InventoryError> for AttemptError {
    fn from(value: InventoryError) -> Self {
        AttemptError::Failed(value)
    }
}

impl From<StoreError> for AttemptError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(detail) => AttemptError::Conflict(detail),
            other => AttemptError::Failed(other.into()),
        }
    }
}

/// Stored record compared against a replay of its ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub recorded: InventoryRecord,
    pub replayed: ReplayedState,
    pub consistent: bool,
}

/// Entry point for every inventory operation.
///
/// Cheap to clone; clones share the store.
pub struct InventoryEngine<S> {
    store: Arc<S>,
    config: EngineConfig,
}

impl<S> Clone for InventoryEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config,
        }
    }
}

impl<S> std::fmt::Debug for InventoryEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InventoryEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: InventoryStore> InventoryEngine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    pub fn with_config(store: Arc<S>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    /// Current state of a product's record.
    ///
    /// A catalog product that was never touched reads as the zero-state
    /// record (version 0). Unknown products are `NotFound`.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id(), product_id = %product_id), err(level = "warn"))]
    pub async fn record(&self, ctx: &RequestContext, product_id: ProductId) -> InventoryResult<InventoryRecord> {
        match self.load(ctx.tenant_id(), product_id).await {
            Ok((_, record)) => Ok(record),
            Err(AttemptError::Failed(e)) => Err(e),
            Err(AttemptError::Conflict(detail)) => Err(InventoryError::Store(detail)),
        }
    }

    /// Turn quantity checks on or off for a product. Appends no ledger entry.
    #[instrument(
        skip(self, ctx),
        fields(tenant_id = %ctx.tenant_id(), actor = %ctx.actor(), product_id = %product_id),
        err(level = "warn")
    )]
    pub async fn set_track_inventory(
        &self,
        ctx: &RequestContext,
        product_id: ProductId,
        track_inventory: bool,
    ) -> InventoryResult<InventoryRecord> {
        let record = self
            .retrying("set_track_inventory", || self.try_set_tracking(ctx, product_id, track_inventory))
            .await?;
        info!(version = record.version(), track_inventory, "inventory tracking updated");
        Ok(record)
    }

    async fn try_set_tracking(
        &self,
        ctx: &RequestContext,
        product_id: ProductId,
        track_inventory: bool,
    ) -> Result<InventoryRecord, AttemptError> {
        let tenant_id = ctx.tenant_id();
        let (_, record) = self.load(tenant_id, product_id).await?;
        if record.is_persisted() && record.track_inventory() == track_inventory {
            return Ok(record);
        }
        let next = record.with_tracking(track_inventory)?;

        let mut changes = ChangeSet::new();
        changes.write_record(next, ExpectedVersion::of(&record));
        let receipt = self.store.commit(tenant_id, changes).await?;
        Ok(receipt.first_record()?.clone())
    }

    /// Every ledger entry of one product, oldest first.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id(), product_id = %product_id), err)]
    pub async fn history(&self, ctx: &RequestContext, product_id: ProductId) -> InventoryResult<Vec<LedgerEntry>> {
        Ok(self.store.history(ctx.tenant_id(), product_id).await?)
    }

    /// Paginated, latest-first ledger view for the audit screen.
    #[instrument(skip(self, ctx, filter), fields(tenant_id = %ctx.tenant_id(), page = page.page), err)]
    pub async fn query_ledger(
        &self,
        ctx: &RequestContext,
        filter: &LedgerFilter,
        page: Page,
    ) -> InventoryResult<LedgerPage> {
        Ok(self.store.query(ctx.tenant_id(), filter, page).await?)
    }

    /// Replay a product's ledger and compare it with the stored record.
    ///
    /// A broken chain is reported as `LedgerChainBroken`; a chain that is
    /// intact but ends elsewhere than the record yields `consistent: false`.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id(), product_id = %product_id), err(level = "warn"))]
    pub async fn reconcile(&self, ctx: &RequestContext, product_id: ProductId) -> InventoryResult<Reconciliation> {
        let reconciliation = self
            .retrying("reconcile", || self.try_reconcile(ctx, product_id))
            .await?;
        if !reconciliation.consistent {
            warn!(
                recorded_stock = reconciliation.recorded.stock_quantity(),
                recorded_reserved = reconciliation.recorded.reserved_quantity(),
                replayed_stock = reconciliation.replayed.stock_quantity,
                replayed_reserved = reconciliation.replayed.reserved_quantity,
                "inventory record disagrees with its ledger"
            );
        }
        Ok(reconciliation)
    }

    async fn try_reconcile(&self, ctx: &RequestContext, product_id: ProductId) -> Result<Reconciliation, AttemptError> {
        let tenant_id = ctx.tenant_id();
        let (_, recorded) = self.load(tenant_id, product_id).await?;
        let history = self.store.history(tenant_id, product_id).await?;

        // A commit between the two reads would make the comparison meaningless.
        let (_, after) = self.load(tenant_id, product_id).await?;
        if after.version() != recorded.version() {
            return Err(AttemptError::Conflict(format!(
                "record moved from version {} to {} while reading the ledger",
                recorded.version(),
                after.version()
            )));
        }

        let replayed = replay(&history)?;
        let consistent = replayed.stock_quantity == recorded.stock_quantity()
            && replayed.reserved_quantity == recorded.reserved_quantity();
        Ok(Reconciliation {
            recorded,
            replayed,
            consistent,
        })
    }

    /// Run `attempt` until it stops conflicting, at most `max_attempts` times.
    async fn retrying<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> InventoryResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        for n in 1..=max_attempts {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(AttemptError::Failed(err)) => return Err(err),
                Err(AttemptError::Conflict(detail)) => {
                    debug!(operation, attempt = n, max_attempts, %detail, "version conflict, retrying");
                }
            }
        }
        warn!(operation, attempts = max_attempts, "giving up after repeated version conflicts");
        Err(InventoryError::Contention {
            attempts: max_attempts,
        })
    }

    /// Catalog entry plus the current record, or a zero-state record on first touch.
    async fn load(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<(ProductInfo, InventoryRecord), AttemptError> {
        let product = self
            .store
            .product(tenant_id, product_id)
            .await?
            .ok_or_else(|| InventoryError::not_found(format!("product {product_id}")))?;

        let record = match self.store.get(tenant_id, product_id).await? {
            Some(record) => record,
            None => InventoryRecord::empty(tenant_id, product_id, product.track_inventory),
        };
        Ok((product, record))
    }
}

/// One `audit` event per committed ledger entry.
fn audit(entries: &[LedgerEntry]) {
    for e in entries {
        info!(
            target: "audit",
            tenant_id = %e.tenant_id,
            product_id = %e.product_id,
            ledger_entry_id = e.id.0,
            change_type = %e.change_type,
            quantity_before = e.quantity_before,
            quantity_changed = e.quantity_changed,
            quantity_after = e.quantity_after,
            reserved_before = e.reserved_before,
            reserved_changed = e.reserved_changed,
            reserved_after = e.reserved_after,
            reference_id = e.reference_id.as_deref(),
            operated_by = %e.operated_by,
            reason = %e.reason,
            "inventory ledger entry"
        );
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use stockroom_core::UserId;

    use crate::store::InMemoryInventoryStore;

    pub struct Fixture {
        pub engine: InventoryEngine<InMemoryInventoryStore>,
        pub ctx: RequestContext,
    }

    impl Fixture {
        pub fn new() -> Self {
            let store = Arc::new(InMemoryInventoryStore::new());
            let ctx = RequestContext::resolve(Some(TenantId::new()), Some(UserId::new()))
                .expect("valid context");
            Self {
                engine: InventoryEngine::new(store),
                ctx,
            }
        }

        pub fn product(&self, name: &str, track_inventory: bool) -> ProductId {
            let product_id = ProductId::new();
            self.engine
                .store()
                .register_product(
                    self.ctx.tenant_id(),
                    ProductInfo {
                        product_id,
                        name: name.to_string(),
                        track_inventory,
                    },
                )
                .expect("register product");
            product_id
        }
    }
}
