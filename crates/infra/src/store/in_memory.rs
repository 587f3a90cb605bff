use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;

use stockroom_core::{AggregateRoot, ExpectedVersion, ProductId, ReservationId, TenantId};
use stockroom_inventory::{
    InventoryKey, InventoryRecord, LedgerEntry, LedgerEntryId, NewLedgerEntry, Reservation,
};

use super::query::{LedgerFilter, LedgerPage, Page};
use super::r#trait::{
    ChangeSet, CommitReceipt, InventoryRecordStore, InventoryUnitOfWork, LedgerStore,
    ProductCatalog, ProductInfo, ReservationStore, ReservationWrite, StoreError,
};

#[derive(Debug, Default)]
struct State {
    products: HashMap<(TenantId, ProductId), ProductInfo>,
    records: HashMap<InventoryKey, InventoryRecord>,
    reservations: HashMap<ReservationId, Reservation>,
    ledger: Vec<LedgerEntry>,
    last_ledger_id: u64,
}

/// In-memory inventory store.
///
/// Intended for tests/dev. One lock guards every table, so a change set is
/// validated and applied as a unit. The lock is never held across an `.await`.
#[derive(Debug, Default)]
pub struct InMemoryInventoryStore {
    state: RwLock<State>,
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a catalog product for a tenant.
    pub fn register_product(&self, tenant_id: TenantId, product: ProductInfo) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state.products.insert((tenant_id, product.product_id), product);
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))
    }

    fn commit_now(&self, tenant_id: TenantId, changes: ChangeSet) -> Result<CommitReceipt, StoreError> {
        if changes.is_empty() {
            return Err(StoreError::InvalidWrite("empty change set".to_string()));
        }
        changes.check_tenant(tenant_id)?;

        let mut state = self.write()?;

        // Validate everything before touching anything.
        let mut seen = HashSet::new();
        for w in &changes.records {
            let key = w.record.key();
            if !seen.insert(key) {
                return Err(StoreError::InvalidWrite(format!(
                    "record {} written twice in one change set",
                    key.product_id
                )));
            }
            let current = state.records.get(&key).map(|r| r.version()).unwrap_or(0);
            if !w.expected_version.matches(current) {
                return Err(StoreError::Conflict(format!(
                    "record {}: expected {:?}, found {current}",
                    key.product_id, w.expected_version
                )));
            }
        }
        for w in &changes.reservations {
            match w {
                ReservationWrite::Insert(r) => {
                    if state.reservations.contains_key(&r.id) {
                        return Err(StoreError::Conflict(format!("reservation {} already exists", r.id)));
                    }
                }
                ReservationWrite::Transition {
                    reservation,
                    expected_state,
                } => match state.reservations.get(&reservation.id) {
                    Some(stored) if stored.tenant_id != tenant_id => {
                        return Err(StoreError::TenantIsolation(format!(
                            "reservation {} belongs to another tenant",
                            reservation.id
                        )));
                    }
                    Some(stored) if stored.state != *expected_state => {
                        return Err(StoreError::Conflict(format!(
                            "reservation {} is {}, expected {}",
                            reservation.id,
                            stored.state.as_str(),
                            expected_state.as_str()
                        )));
                    }
                    Some(_) => {}
                    None => {
                        return Err(StoreError::InvalidWrite(format!(
                            "unknown reservation {}",
                            reservation.id
                        )));
                    }
                },
            }
        }

        let now = Utc::now();
        let mut receipt = CommitReceipt::default();

        for w in changes.records {
            let key = w.record.key();
            let current = state.records.get(&key).map(|r| r.version()).unwrap_or(0);
            let stored = w.record.committed(current + 1, now);
            state.records.insert(key, stored.clone());
            receipt.records.push(stored);
        }

        for entry in changes.ledger {
            state.last_ledger_id += 1;
            let stored = entry.into_entry(LedgerEntryId(state.last_ledger_id));
            state.ledger.push(stored.clone());
            receipt.ledger.push(stored);
        }

        for w in changes.reservations {
            let reservation = match w {
                ReservationWrite::Insert(r) => r,
                ReservationWrite::Transition { reservation, .. } => reservation,
            };
            state.reservations.insert(reservation.id, reservation);
        }

        Ok(receipt)
    }
}

#[async_trait]
impl ProductCatalog for InMemoryInventoryStore {
    async fn product(&self, tenant_id: TenantId, product_id: ProductId) -> Result<Option<ProductInfo>, StoreError> {
        Ok(self.read()?.products.get(&(tenant_id, product_id)).cloned())
    }
}

#[async_trait]
impl InventoryRecordStore for InMemoryInventoryStore {
    async fn get(&self, tenant_id: TenantId, product_id: ProductId) -> Result<Option<InventoryRecord>, StoreError> {
        let key = InventoryKey::new(tenant_id, product_id);
        Ok(self.read()?.records.get(&key).cloned())
    }

    async fn upsert_with_version_check(
        &self,
        tenant_id: TenantId,
        record: InventoryRecord,
        expected_version: ExpectedVersion,
    ) -> Result<InventoryRecord, StoreError> {
        let mut changes = ChangeSet::new();
        changes.write_record(record, expected_version);
        let receipt = self.commit_now(tenant_id, changes)?;
        receipt.first_record().cloned()
    }
}

#[async_trait]
impl LedgerStore for InMemoryInventoryStore {
    async fn append(&self, tenant_id: TenantId, entry: NewLedgerEntry) -> Result<LedgerEntryId, StoreError> {
        let mut changes = ChangeSet::new();
        changes.append(entry);
        let receipt = self.commit_now(tenant_id, changes)?;
        Ok(receipt.first_entry()?.id)
    }

    async fn query(&self, tenant_id: TenantId, filter: &LedgerFilter, page: Page) -> Result<LedgerPage, StoreError> {
        let state = self.read()?;
        let mut matching: Vec<&LedgerEntry> = state
            .ledger
            .iter()
            .filter(|e| e.tenant_id == tenant_id && filter.matches(e))
            .collect();

        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = matching.len() as u64;
        let entries = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .cloned()
            .collect();

        Ok(LedgerPage::new(entries, total, page))
    }

    async fn history(&self, tenant_id: TenantId, product_id: ProductId) -> Result<Vec<LedgerEntry>, StoreError> {
        // Appended in id order already.
        Ok(self
            .read()?
            .ledger
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.product_id == product_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ReservationStore for InMemoryInventoryStore {
    async fn reservation(&self, tenant_id: TenantId, id: ReservationId) -> Result<Option<Reservation>, StoreError> {
        Ok(self
            .read()?
            .reservations
            .get(&id)
            .filter(|r| r.tenant_id == tenant_id)
            .cloned())
    }

    async fn reservations_for_reference(
        &self,
        tenant_id: TenantId,
        reference_type: &str,
        reference_id: &str,
    ) -> Result<Vec<Reservation>, StoreError> {
        let mut found: Vec<Reservation> = self
            .read()?
            .reservations
            .values()
            .filter(|r| {
                r.tenant_id == tenant_id
                    && r.reference_type == reference_type
                    && r.reference_id == reference_id
            })
            .cloned()
            .collect();
        found.sort_by_key(|r| (r.created_at, r.id));
        Ok(found)
    }
}

#[async_trait]
impl InventoryUnitOfWork for InMemoryInventoryStore {
    async fn commit(&self, tenant_id: TenantId, changes: ChangeSet) -> Result<CommitReceipt, StoreError> {
        self.commit_now(tenant_id, changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockroom_core::UserId;
    use stockroom_inventory::{ChangeType, NewReservation, QuantityChange, ReservationState};

    fn stocked(tenant_id: TenantId, product_id: ProductId, stock: u64) -> InventoryRecord {
        InventoryRecord::empty(tenant_id, product_id, true).with_change(
            &QuantityChange {
                stock_before: 0,
                stock_after: stock,
                reserved_before: 0,
                reserved_after: 0,
            },
            Utc::now(),
        )
    }

    fn entry(tenant_id: TenantId, product_id: ProductId, name: &str) -> NewLedgerEntry {
        NewLedgerEntry {
            tenant_id,
            product_id,
            product_name: name.to_string(),
            change_type: ChangeType::Purchase,
            quantity_before: 0,
            quantity_changed: 5,
            quantity_after: 5,
            reserved_before: 0,
            reserved_changed: 0,
            reserved_after: 0,
            reason: "restock".to_string(),
            reference_id: None,
            operated_by: UserId::new(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn versioned_upsert_increments_and_rejects_stale_writes() {
        let store = InMemoryInventoryStore::new();
        let tenant = TenantId::new();
        let product = ProductId::new();

        let v1 = store
            .upsert_with_version_check(tenant, stocked(tenant, product, 5), ExpectedVersion::Exact(0))
            .await
            .unwrap();
        assert_eq!(v1.version(), 1);

        // A second "first write" lost the race.
        let err = store
            .upsert_with_version_check(tenant, stocked(tenant, product, 7), ExpectedVersion::Exact(0))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let v2 = store
            .upsert_with_version_check(tenant, stocked(tenant, product, 9), ExpectedVersion::Exact(1))
            .await
            .unwrap();
        assert_eq!(v2.version(), 2);
        assert_eq!(store.get(tenant, product).await.unwrap().unwrap().stock_quantity(), 9);
    }

    #[tokio::test]
    async fn records_are_tenant_isolated() {
        let store = InMemoryInventoryStore::new();
        let product = ProductId::new();
        let tenant_a = TenantId::new();
        store
            .upsert_with_version_check(tenant_a, stocked(tenant_a, product, 5), ExpectedVersion::Exact(0))
            .await
            .unwrap();

        assert!(store.get(TenantId::new(), product).await.unwrap().is_none());

        let mut changes = ChangeSet::new();
        changes.write_record(stocked(tenant_a, product, 1), ExpectedVersion::Exact(1));
        let err = store.commit(TenantId::new(), changes).await.unwrap_err();
        assert!(matches!(err, StoreError::TenantIsolation(_)));
    }

    #[tokio::test]
    async fn single_writes_are_checked_against_the_caller_tenant() {
        let store = InMemoryInventoryStore::new();
        let (tenant_a, tenant_b) = (TenantId::new(), TenantId::new());
        let product = ProductId::new();

        let err = store
            .upsert_with_version_check(tenant_b, stocked(tenant_a, product, 5), ExpectedVersion::Exact(0))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::TenantIsolation(_)));

        let err = store
            .append(tenant_b, entry(tenant_a, product, "Widget"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::TenantIsolation(_)));

        assert!(store.get(tenant_a, product).await.unwrap().is_none());
        assert!(store.history(tenant_a, product).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_change_set_leaves_no_partial_writes() {
        let store = InMemoryInventoryStore::new();
        let tenant = TenantId::new();
        let (a, b) = (ProductId::new(), ProductId::new());
        store
            .upsert_with_version_check(tenant, stocked(tenant, b, 1), ExpectedVersion::Exact(0))
            .await
            .unwrap();

        let mut changes = ChangeSet::new();
        changes
            .write_record(stocked(tenant, a, 10), ExpectedVersion::Exact(0))
            .write_record(stocked(tenant, b, 10), ExpectedVersion::Exact(0)) // stale
            .append(entry(tenant, a, "A"));

        assert!(matches!(
            store.commit(tenant, changes).await,
            Err(StoreError::Conflict(_))
        ));
        assert!(store.get(tenant, a).await.unwrap().is_none());
        assert!(store.history(tenant, a).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reservation_transition_requires_expected_state() {
        let store = InMemoryInventoryStore::new();
        let tenant = TenantId::new();
        let reservation = Reservation::open(
            tenant,
            NewReservation::new(ProductId::new(), 2, "order", "SO-1"),
            false,
            UserId::new(),
            Utc::now(),
        );

        let mut insert = ChangeSet::new();
        insert.insert_reservation(reservation.clone());
        store.commit(tenant, insert.clone()).await.unwrap();
        assert!(matches!(
            store.commit(tenant, insert).await,
            Err(StoreError::Conflict(_))
        ));

        let released = reservation.close(ReservationState::Released, Utc::now()).unwrap();
        let mut close = ChangeSet::new();
        close.transition_reservation(released.clone(), ReservationState::Active);
        store.commit(tenant, close.clone()).await.unwrap();
        assert!(matches!(
            store.commit(tenant, close).await,
            Err(StoreError::Conflict(_))
        ));

        let found = store
            .reservations_for_reference(tenant, "order", "SO-1")
            .await
            .unwrap();
        assert_eq!(found, vec![released]);
        assert!(store.reservation(TenantId::new(), reservation.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn query_orders_latest_first_and_paginates() {
        let store = InMemoryInventoryStore::new();
        let tenant = TenantId::new();
        let product = ProductId::new();
        let at = Utc::now();
        for _ in 0..5 {
            let mut e = entry(tenant, product, "Widget");
            e.created_at = at; // identical timestamps: ties broken by id
            store.append(tenant, e).await.unwrap();
        }
        let other = TenantId::new();
        store.append(other, entry(other, product, "Widget")).await.unwrap();

        let first = store
            .query(tenant, &LedgerFilter::default(), Page::new(Some(1), Some(2)))
            .await
            .unwrap();
        assert_eq!(first.total, 5);
        assert!(first.has_more);
        let ids: Vec<u64> = first.entries.iter().map(|e| e.id.0).collect();
        assert_eq!(ids, vec![5, 4]);

        let last = store
            .query(tenant, &LedgerFilter::default(), Page::new(Some(3), Some(2)))
            .await
            .unwrap();
        assert_eq!(last.entries.len(), 1);
        assert_eq!(last.entries[0].id, LedgerEntryId(1));
        assert!(!last.has_more);
    }

    #[tokio::test]
    async fn empty_change_set_is_rejected() {
        let store = InMemoryInventoryStore::new();
        assert!(matches!(
            store.commit(TenantId::new(), ChangeSet::new()).await,
            Err(StoreError::InvalidWrite(_))
        ));
    }
}
