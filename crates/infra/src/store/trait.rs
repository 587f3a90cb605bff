use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockroom_core::{ExpectedVersion, ProductId, ReservationId, TenantId};
use stockroom_inventory::{
    InventoryError, InventoryRecord, LedgerEntry, LedgerEntryId, NewLedgerEntry, Reservation,
    ReservationState,
};

use super::query::{LedgerFilter, LedgerPage, Page};

/// Store operation error.
///
/// These are **infrastructure errors** (storage, concurrency, isolation) as
/// opposed to inventory rule failures, which never reach a store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A version-checked write lost the race (stale version, state already moved, duplicate row).
    #[error("optimistic concurrency check failed: {0}")]
    Conflict(String),

    /// A write or read crossed the tenant boundary.
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    /// The write itself is malformed (e.g. empty change set, out-of-range quantity).
    #[error("invalid write: {0}")]
    InvalidWrite(String),

    /// Backend failure (connection, decoding, ...).
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<StoreError> for InventoryError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(_) => InventoryError::Contention { attempts: 1 },
            StoreError::TenantIsolation(_) => InventoryError::InvalidTenantContext,
            other => InventoryError::Store(other.to_string()),
        }
    }
}

/// Catalog view of a product, as far as inventory cares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductInfo {
    pub product_id: ProductId,
    pub name: String,
    /// Initial `track_inventory` for a record created on first touch.
    pub track_inventory: bool,
}

/// Versioned write of one inventory record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordWrite {
    pub record: InventoryRecord,
    /// Version the stored row must still have; `Exact(0)` means "must not exist yet".
    pub expected_version: ExpectedVersion,
}

/// Write of one reservation row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationWrite {
    /// New reservation; conflicts if the id already exists.
    Insert(Reservation),
    /// State transition; conflicts unless the stored row is still in `expected_state`.
    Transition {
        reservation: Reservation,
        expected_state: ReservationState,
    },
}

impl ReservationWrite {
    pub fn reservation(&self) -> &Reservation {
        match self {
            ReservationWrite::Insert(r) => r,
            ReservationWrite::Transition { reservation, .. } => reservation,
        }
    }
}

/// Everything one inventory operation writes. Commits all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub records: Vec<RecordWrite>,
    pub ledger: Vec<NewLedgerEntry>,
    pub reservations: Vec<ReservationWrite>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_record(&mut self, record: InventoryRecord, expected_version: ExpectedVersion) -> &mut Self {
        self.records.push(RecordWrite {
            record,
            expected_version,
        });
        self
    }

    pub fn append(&mut self, entry: NewLedgerEntry) -> &mut Self {
        self.ledger.push(entry);
        self
    }

    pub fn insert_reservation(&mut self, reservation: Reservation) -> &mut Self {
        self.reservations.push(ReservationWrite::Insert(reservation));
        self
    }

    pub fn transition_reservation(
        &mut self,
        reservation: Reservation,
        expected_state: ReservationState,
    ) -> &mut Self {
        self.reservations.push(ReservationWrite::Transition {
            reservation,
            expected_state,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.ledger.is_empty() && self.reservations.is_empty()
    }

    /// Every write must belong to `tenant_id`.
    pub fn check_tenant(&self, tenant_id: TenantId) -> Result<(), StoreError> {
        for (idx, w) in self.records.iter().enumerate() {
            if w.record.tenant_id() != tenant_id {
                return Err(StoreError::TenantIsolation(format!(
                    "record write {idx} belongs to another tenant"
                )));
            }
        }
        for (idx, e) in self.ledger.iter().enumerate() {
            if e.tenant_id != tenant_id {
                return Err(StoreError::TenantIsolation(format!(
                    "ledger entry {idx} belongs to another tenant"
                )));
            }
        }
        for (idx, w) in self.reservations.iter().enumerate() {
            if w.reservation().tenant_id != tenant_id {
                return Err(StoreError::TenantIsolation(format!(
                    "reservation write {idx} belongs to another tenant"
                )));
            }
        }
        Ok(())
    }
}

/// Result of a committed change set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReceipt {
    /// Stored records in write order, version already incremented.
    pub records: Vec<InventoryRecord>,
    /// Stored ledger entries in append order, ids assigned.
    pub ledger: Vec<LedgerEntry>,
}

impl CommitReceipt {
    pub fn ledger_ids(&self) -> Vec<LedgerEntryId> {
        self.ledger.iter().map(|e| e.id).collect()
    }

    pub fn first_record(&self) -> Result<&InventoryRecord, StoreError> {
        self.records
            .first()
            .ok_or_else(|| StoreError::Storage("commit returned no record".to_string()))
    }

    pub fn first_entry(&self) -> Result<&LedgerEntry, StoreError> {
        self.ledger
            .first()
            .ok_or_else(|| StoreError::Storage("commit returned no ledger entry".to_string()))
    }
}

/// Tenant-scoped product lookup.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn product(&self, tenant_id: TenantId, product_id: ProductId) -> Result<Option<ProductInfo>, StoreError>;
}

/// Durable per-(tenant, product) stock state.
///
/// Enforces no business rule, only that concurrent writes to one record are
/// serialized: a write succeeds only while the stored version equals the
/// expected one, after which the version increments.
#[async_trait]
pub trait InventoryRecordStore: Send + Sync {
    async fn get(&self, tenant_id: TenantId, product_id: ProductId) -> Result<Option<InventoryRecord>, StoreError>;

    /// Single-record write; `record` must belong to `tenant_id`.
    async fn upsert_with_version_check(
        &self,
        tenant_id: TenantId,
        record: InventoryRecord,
        expected_version: ExpectedVersion,
    ) -> Result<InventoryRecord, StoreError>;
}

/// Append-only ledger of quantity changes.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// The only mutation; returns the assigned id. `entry` must belong to `tenant_id`.
    async fn append(&self, tenant_id: TenantId, entry: NewLedgerEntry) -> Result<LedgerEntryId, StoreError>;

    /// Latest first (`created_at` desc, ties by id desc), with the total match count.
    async fn query(&self, tenant_id: TenantId, filter: &LedgerFilter, page: Page) -> Result<LedgerPage, StoreError>;

    /// Every entry of one product in creation (id) order.
    async fn history(&self, tenant_id: TenantId, product_id: ProductId) -> Result<Vec<LedgerEntry>, StoreError>;
}

/// Reservation lookups. Writes go through [`InventoryUnitOfWork`].
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn reservation(&self, tenant_id: TenantId, id: ReservationId) -> Result<Option<Reservation>, StoreError>;

    async fn reservations_for_reference(
        &self,
        tenant_id: TenantId,
        reference_type: &str,
        reference_id: &str,
    ) -> Result<Vec<Reservation>, StoreError>;
}

/// Transactional boundary: commit a [`ChangeSet`] atomically.
///
/// Implementations must:
/// - reject writes for any tenant other than `tenant_id`
/// - check every record version and reservation state before writing anything
/// - assign strictly increasing ledger ids in append order
/// - persist all writes or none
#[async_trait]
pub trait InventoryUnitOfWork: Send + Sync {
    async fn commit(&self, tenant_id: TenantId, changes: ChangeSet) -> Result<CommitReceipt, StoreError>;
}

/// Everything the inventory engine needs from a backend.
pub trait InventoryStore:
    ProductCatalog + InventoryRecordStore + LedgerStore + ReservationStore + InventoryUnitOfWork
{
}

impl<T> InventoryStore for T where
    T: ProductCatalog + InventoryRecordStore + LedgerStore + ReservationStore + InventoryUnitOfWork
{
}
