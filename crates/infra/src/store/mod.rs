//! Inventory persistence: store traits, change sets and backends.
//!
//! Every read and write takes an explicit `TenantId`. Writes that must land
//! together (record + ledger + reservation) go through
//! [`InventoryUnitOfWork::commit`] as one [`ChangeSet`].

pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod r#trait;

pub use in_memory::InMemoryInventoryStore;
pub use postgres::PostgresInventoryStore;
pub use query::{DEFAULT_PAGE_SIZE, LedgerFilter, LedgerPage, MAX_PAGE_SIZE, Page};
pub use r#trait::{
    ChangeSet, CommitReceipt, InventoryRecordStore, InventoryStore, InventoryUnitOfWork,
    LedgerStore, ProductCatalog, ProductInfo, RecordWrite, ReservationStore, ReservationWrite,
    StoreError,
};
