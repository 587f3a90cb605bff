//! Postgres-backed inventory store.
//!
//! Every [`ChangeSet`] commits inside one transaction. Record writes are
//! version-checked with `UPDATE ... WHERE version = $expected` (or an insert
//! that must not collide for a first write), so two instances racing on the
//! same record never both succeed; the loser sees `rows_affected() == 0` and
//! the whole transaction is rolled back.
//!
//! ## Error Mapping
//!
//! | SQLSTATE | Meaning | StoreError |
//! |----------|---------|------------|
//! | `23505` | unique violation (duplicate reservation id) | `Conflict` |
//! | `40001` / `40P01` | serialization failure / deadlock | `Conflict` |
//! | `23514` | check constraint (negative stock, reserved > stock) | `InvalidWrite` |
//! | other | connection, decoding, ... | `Storage` |
//!
//! ## Thread Safety
//!
//! `PostgresInventoryStore` is `Send + Sync`; the SQLx pool handles connections.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use stockroom_core::{
    AggregateRoot, ExpectedVersion, ProductId, ReservationId, TenantId, UserId,
};
use stockroom_inventory::{
    ChangeType, InventoryKey, InventoryRecord, LedgerEntry, LedgerEntryId, NewLedgerEntry,
    Reservation, ReservationState,
};

use crate::config::StoreConfig;

use super::query::{LedgerFilter, LedgerPage, Page};
use super::r#trait::{
    ChangeSet, CommitReceipt, InventoryRecordStore, InventoryUnitOfWork, LedgerStore,
    ProductCatalog, ProductInfo, RecordWrite, ReservationStore, ReservationWrite, StoreError,
};

const SCHEMA: &str = include_str!("../../migrations/0001_inventory.sql");

const LEDGER_COLUMNS: &str = r#"
    id, tenant_id, product_id, product_name, change_type,
    quantity_before, quantity_changed, quantity_after,
    reserved_before, reserved_changed, reserved_after,
    reason, reference_id, operated_by, created_at
"#;

const RESERVATION_COLUMNS: &str = r#"
    id, tenant_id, product_id, quantity, reference_type, reference_id,
    state, tracked, created_by, created_at, closed_at
"#;

/// Postgres-backed inventory store.
///
/// Every query includes `tenant_id` in the WHERE clause or the primary key,
/// so a caller cannot read or write another tenant's rows.
#[derive(Debug, Clone)]
pub struct PostgresInventoryStore {
    pool: Arc<PgPool>,
}

impl PostgresInventoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool from configuration.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables, indexes and the ledger append-only trigger (idempotent).
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    /// Insert or rename a catalog product.
    #[instrument(skip(self, product), fields(tenant_id = %tenant_id, product_id = %product.product_id), err)]
    pub async fn upsert_product(&self, tenant_id: TenantId, product: &ProductInfo) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO products (tenant_id, product_id, name, track_inventory)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant_id, product_id)
            DO UPDATE SET name = EXCLUDED.name, track_inventory = EXCLUDED.track_inventory
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(product.product_id.as_uuid())
        .bind(&product.name)
        .bind(product.track_inventory)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_product", e))?;
        Ok(())
    }
}

#[async_trait]
impl ProductCatalog for PostgresInventoryStore {
    async fn product(&self, tenant_id: TenantId, product_id: ProductId) -> Result<Option<ProductInfo>, StoreError> {
        let row = sqlx::query(
            "SELECT product_id, name, track_inventory FROM products WHERE tenant_id = $1 AND product_id = $2",
        )
        .bind(tenant_id.as_uuid())
        .bind(product_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("product", e))?;

        row.map(|r| -> Result<ProductInfo, StoreError> {
            Ok(ProductInfo {
                product_id: ProductId::from_uuid(r.try_get("product_id").map_err(decode_error)?),
                name: r.try_get("name").map_err(decode_error)?,
                track_inventory: r.try_get("track_inventory").map_err(decode_error)?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl InventoryRecordStore for PostgresInventoryStore {
    async fn get(&self, tenant_id: TenantId, product_id: ProductId) -> Result<Option<InventoryRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT tenant_id, product_id, stock_quantity, reserved_quantity,
                   track_inventory, version, updated_at
            FROM inventory_records
            WHERE tenant_id = $1 AND product_id = $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(product_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_record", e))?;

        row.map(|r| InventoryRecord::try_from(RecordRow::from_row(&r).map_err(decode_error)?))
            .transpose()
    }

    async fn upsert_with_version_check(
        &self,
        tenant_id: TenantId,
        record: InventoryRecord,
        expected_version: ExpectedVersion,
    ) -> Result<InventoryRecord, StoreError> {
        let mut changes = ChangeSet::new();
        changes.write_record(record, expected_version);
        let receipt = self.commit(tenant_id, changes).await?;
        receipt.first_record().cloned()
    }
}

#[async_trait]
impl LedgerStore for PostgresInventoryStore {
    async fn append(&self, tenant_id: TenantId, entry: NewLedgerEntry) -> Result<LedgerEntryId, StoreError> {
        let mut changes = ChangeSet::new();
        changes.append(entry);
        let receipt = self.commit(tenant_id, changes).await?;
        Ok(receipt.first_entry()?.id)
    }

    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id, page = page.page), err)]
    async fn query(&self, tenant_id: TenantId, filter: &LedgerFilter, page: Page) -> Result<LedgerPage, StoreError> {
        let product_param = filter.product_id.map(|p| *p.as_uuid());
        let name_param = filter
            .product_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(like_pattern);
        let type_param = filter.change_type.map(ChangeType::as_str);

        let count_row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total
            FROM inventory_ledger
            WHERE tenant_id = $1
                AND ($2::uuid IS NULL OR product_id = $2)
                AND ($3::text IS NULL OR product_name ILIKE $3)
                AND ($4::text IS NULL OR change_type = $4)
                AND ($5::timestamptz IS NULL OR created_at >= $5)
                AND ($6::timestamptz IS NULL OR created_at <= $6)
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(product_param)
        .bind(name_param.as_deref())
        .bind(type_param)
        .bind(filter.from)
        .bind(filter.to)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_ledger", e))?;

        let total: i64 = count_row.try_get("total").map_err(decode_error)?;

        let sql = format!(
            r#"
            SELECT {LEDGER_COLUMNS}
            FROM inventory_ledger
            WHERE tenant_id = $1
                AND ($2::uuid IS NULL OR product_id = $2)
                AND ($3::text IS NULL OR product_name ILIKE $3)
                AND ($4::text IS NULL OR change_type = $4)
                AND ($5::timestamptz IS NULL OR created_at >= $5)
                AND ($6::timestamptz IS NULL OR created_at <= $6)
            ORDER BY created_at DESC, id DESC
            LIMIT $7 OFFSET $8
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(product_param)
            .bind(name_param.as_deref())
            .bind(type_param)
            .bind(filter.from)
            .bind(filter.to)
            .bind(page.limit() as i64)
            .bind(page.offset() as i64)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("query_ledger", e))?;

        let entries = rows
            .iter()
            .map(|r| LedgerEntry::try_from(LedgerRow::from_row(r).map_err(decode_error)?))
            .collect::<Result<Vec<LedgerEntry>, StoreError>>()?;

        Ok(LedgerPage::new(entries, total.max(0) as u64, page))
    }

    async fn history(&self, tenant_id: TenantId, product_id: ProductId) -> Result<Vec<LedgerEntry>, StoreError> {
        let sql = format!(
            "SELECT {LEDGER_COLUMNS} FROM inventory_ledger WHERE tenant_id = $1 AND product_id = $2 ORDER BY id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(product_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ledger_history", e))?;

        rows.iter()
            .map(|r| LedgerEntry::try_from(LedgerRow::from_row(r).map_err(decode_error)?))
            .collect()
    }
}

#[async_trait]
impl ReservationStore for PostgresInventoryStore {
    async fn reservation(&self, tenant_id: TenantId, id: ReservationId) -> Result<Option<Reservation>, StoreError> {
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM inventory_reservations WHERE tenant_id = $1 AND id = $2"
        );
        let row = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("reservation", e))?;

        row.map(|r| Reservation::try_from(ReservationRow::from_row(&r).map_err(decode_error)?))
            .transpose()
    }

    async fn reservations_for_reference(
        &self,
        tenant_id: TenantId,
        reference_type: &str,
        reference_id: &str,
    ) -> Result<Vec<Reservation>, StoreError> {
        let sql = format!(
            r#"
            SELECT {RESERVATION_COLUMNS}
            FROM inventory_reservations
            WHERE tenant_id = $1 AND reference_type = $2 AND reference_id = $3
            ORDER BY created_at ASC, id ASC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(reference_type)
            .bind(reference_id)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("reservations_for_reference", e))?;

        rows.iter()
            .map(|r| Reservation::try_from(ReservationRow::from_row(r).map_err(decode_error)?))
            .collect()
    }
}

#[async_trait]
impl InventoryUnitOfWork for PostgresInventoryStore {
    #[instrument(
        skip(self, changes),
        fields(
            tenant_id = %tenant_id,
            records = changes.records.len(),
            ledger_entries = changes.ledger.len(),
            reservations = changes.reservations.len()
        ),
        err
    )]
    async fn commit(&self, tenant_id: TenantId, changes: ChangeSet) -> Result<CommitReceipt, StoreError> {
        if changes.is_empty() {
            return Err(StoreError::InvalidWrite("empty change set".to_string()));
        }
        changes.check_tenant(tenant_id)?;

        // Dropping `tx` on an early return rolls everything back.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let now = Utc::now();
        let mut receipt = CommitReceipt::default();

        // Records first: a losing writer blocks on the row lock here and then
        // fails the version check before it appends anything.
        for write in changes.records {
            receipt.records.push(write_record(&mut tx, write, now).await?);
        }
        for write in changes.reservations {
            write_reservation(&mut tx, tenant_id, write).await?;
        }
        for entry in changes.ledger {
            receipt.ledger.push(insert_ledger_entry(&mut tx, entry).await?);
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(receipt)
    }
}

async fn write_record(
    tx: &mut Transaction<'_, Postgres>,
    write: RecordWrite,
    now: DateTime<Utc>,
) -> Result<InventoryRecord, StoreError> {
    let record = &write.record;
    let stock = to_i64(record.stock_quantity(), "stock_quantity")?;
    let reserved = to_i64(record.reserved_quantity(), "reserved_quantity")?;
    let product_id = record.product_id();

    let version: i64 = match write.expected_version {
        ExpectedVersion::Exact(0) => {
            let result = sqlx::query(
                r#"
                INSERT INTO inventory_records (
                    tenant_id, product_id, stock_quantity, reserved_quantity,
                    track_inventory, version, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, 1, $6)
                ON CONFLICT (tenant_id, product_id) DO NOTHING
                "#,
            )
            .bind(record.tenant_id().as_uuid())
            .bind(product_id.as_uuid())
            .bind(stock)
            .bind(reserved)
            .bind(record.track_inventory())
            .bind(now)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("insert_record", e))?;

            if result.rows_affected() == 0 {
                return Err(StoreError::Conflict(format!(
                    "record {product_id} was created concurrently"
                )));
            }
            1
        }
        ExpectedVersion::Exact(expected) => {
            let result = sqlx::query(
                r#"
                UPDATE inventory_records
                SET stock_quantity = $3,
                    reserved_quantity = $4,
                    track_inventory = $5,
                    version = version + 1,
                    updated_at = $6
                WHERE tenant_id = $1 AND product_id = $2 AND version = $7
                "#,
            )
            .bind(record.tenant_id().as_uuid())
            .bind(product_id.as_uuid())
            .bind(stock)
            .bind(reserved)
            .bind(record.track_inventory())
            .bind(now)
            .bind(to_i64(expected, "version")?)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("update_record", e))?;

            if result.rows_affected() == 0 {
                return Err(StoreError::Conflict(format!(
                    "record {product_id}: expected version {expected} is stale (current {})",
                    record.version()
                )));
            }
            to_i64(expected + 1, "version")?
        }
    };

    Ok(write.record.committed(to_u64(version, "version")?, now))
}

async fn write_reservation(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: TenantId,
    write: ReservationWrite,
) -> Result<(), StoreError> {
    match write {
        ReservationWrite::Insert(r) => {
            sqlx::query(
                r#"
                INSERT INTO inventory_reservations (
                    id, tenant_id, product_id, quantity, reference_type, reference_id,
                    state, tracked, created_by, created_at, closed_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(r.id.as_uuid())
            .bind(tenant_id.as_uuid())
            .bind(r.product_id.as_uuid())
            .bind(to_i64(r.quantity, "quantity")?)
            .bind(&r.reference_type)
            .bind(&r.reference_id)
            .bind(r.state.as_str())
            .bind(r.tracked)
            .bind(r.created_by.as_uuid())
            .bind(r.created_at)
            .bind(r.closed_at)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("insert_reservation", e))?;
        }
        ReservationWrite::Transition {
            reservation,
            expected_state,
        } => {
            let result = sqlx::query(
                r#"
                UPDATE inventory_reservations
                SET state = $3, closed_at = $4
                WHERE tenant_id = $1 AND id = $2 AND state = $5
                "#,
            )
            .bind(tenant_id.as_uuid())
            .bind(reservation.id.as_uuid())
            .bind(reservation.state.as_str())
            .bind(reservation.closed_at)
            .bind(expected_state.as_str())
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("transition_reservation", e))?;

            if result.rows_affected() == 0 {
                return Err(StoreError::Conflict(format!(
                    "reservation {} is no longer {}",
                    reservation.id,
                    expected_state.as_str()
                )));
            }
        }
    }
    Ok(())
}

async fn insert_ledger_entry(
    tx: &mut Transaction<'_, Postgres>,
    entry: NewLedgerEntry,
) -> Result<LedgerEntry, StoreError> {
    let row = sqlx::query(
        r#"
        INSERT INTO inventory_ledger (
            tenant_id, product_id, product_name, change_type,
            quantity_before, quantity_changed, quantity_after,
            reserved_before, reserved_changed, reserved_after,
            reason, reference_id, operated_by, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        RETURNING id
        "#,
    )
    .bind(entry.tenant_id.as_uuid())
    .bind(entry.product_id.as_uuid())
    .bind(&entry.product_name)
    .bind(entry.change_type.as_str())
    .bind(to_i64(entry.quantity_before, "quantity_before")?)
    .bind(entry.quantity_changed)
    .bind(to_i64(entry.quantity_after, "quantity_after")?)
    .bind(to_i64(entry.reserved_before, "reserved_before")?)
    .bind(entry.reserved_changed)
    .bind(to_i64(entry.reserved_after, "reserved_after")?)
    .bind(&entry.reason)
    .bind(entry.reference_id.as_deref())
    .bind(entry.operated_by.as_uuid())
    .bind(entry.created_at)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_ledger_entry", e))?;

    let id: i64 = row.try_get("id").map_err(decode_error)?;
    Ok(entry.into_entry(LedgerEntryId(to_u64(id, "id")?)))
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("40001") | Some("40P01") => StoreError::Conflict(msg),
                Some("23514") => StoreError::InvalidWrite(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn decode_error(err: sqlx::Error) -> StoreError {
    StoreError::Storage(format!("failed to decode row: {err}"))
}

fn to_i64(value: u64, field: &str) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::InvalidWrite(format!("{field} out of range: {value}")))
}

fn to_u64(value: i64, field: &str) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Storage(format!("negative {field} in store: {value}")))
}

/// `%name%` with LIKE metacharacters escaped.
fn like_pattern(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len() + 2);
    escaped.push('%');
    for c in name.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

// SQLx row types

#[derive(Debug)]
struct RecordRow {
    tenant_id: uuid::Uuid,
    product_id: uuid::Uuid,
    stock_quantity: i64,
    reserved_quantity: i64,
    track_inventory: bool,
    version: i64,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for RecordRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(RecordRow {
            tenant_id: row.try_get("tenant_id")?,
            product_id: row.try_get("product_id")?,
            stock_quantity: row.try_get("stock_quantity")?,
            reserved_quantity: row.try_get("reserved_quantity")?,
            track_inventory: row.try_get("track_inventory")?,
            version: row.try_get("version")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<RecordRow> for InventoryRecord {
    type Error = StoreError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        Ok(InventoryRecord::from_parts(
            InventoryKey::new(
                TenantId::from_uuid(row.tenant_id),
                ProductId::from_uuid(row.product_id),
            ),
            to_u64(row.stock_quantity, "stock_quantity")?,
            to_u64(row.reserved_quantity, "reserved_quantity")?,
            row.track_inventory,
            to_u64(row.version, "version")?,
            row.updated_at,
        ))
    }
}

#[derive(Debug)]
struct LedgerRow {
    id: i64,
    tenant_id: uuid::Uuid,
    product_id: uuid::Uuid,
    product_name: String,
    change_type: String,
    quantity_before: i64,
    quantity_changed: i64,
    quantity_after: i64,
    reserved_before: i64,
    reserved_changed: i64,
    reserved_after: i64,
    reason: String,
    reference_id: Option<String>,
    operated_by: uuid::Uuid,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for LedgerRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(LedgerRow {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            product_id: row.try_get("product_id")?,
            product_name: row.try_get("product_name")?,
            change_type: row.try_get("change_type")?,
            quantity_before: row.try_get("quantity_before")?,
            quantity_changed: row.try_get("quantity_changed")?,
            quantity_after: row.try_get("quantity_after")?,
            reserved_before: row.try_get("reserved_before")?,
            reserved_changed: row.try_get("reserved_changed")?,
            reserved_after: row.try_get("reserved_after")?,
            reason: row.try_get("reason")?,
            reference_id: row.try_get("reference_id")?,
            operated_by: row.try_get("operated_by")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = StoreError;

    fn try_from(row: LedgerRow) -> Result<Self, Self::Error> {
        let change_type = row
            .change_type
            .parse::<ChangeType>()
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(LedgerEntry {
            id: LedgerEntryId(to_u64(row.id, "id")?),
            tenant_id: TenantId::from_uuid(row.tenant_id),
            product_id: ProductId::from_uuid(row.product_id),
            product_name: row.product_name,
            change_type,
            quantity_before: to_u64(row.quantity_before, "quantity_before")?,
            quantity_changed: row.quantity_changed,
            quantity_after: to_u64(row.quantity_after, "quantity_after")?,
            reserved_before: to_u64(row.reserved_before, "reserved_before")?,
            reserved_changed: row.reserved_changed,
            reserved_after: to_u64(row.reserved_after, "reserved_after")?,
            reason: row.reason,
            reference_id: row.reference_id,
            operated_by: UserId::from_uuid(row.operated_by),
            created_at: row.created_at,
        })
    }
}

#[derive(Debug)]
struct ReservationRow {
    id: uuid::Uuid,
    tenant_id: uuid::Uuid,
    product_id: uuid::Uuid,
    quantity: i64,
    reference_type: String,
    reference_id: String,
    state: String,
    tracked: bool,
    created_by: uuid::Uuid,
    created_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for ReservationRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ReservationRow {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            product_id: row.try_get("product_id")?,
            quantity: row.try_get("quantity")?,
            reference_type: row.try_get("reference_type")?,
            reference_id: row.try_get("reference_id")?,
            state: row.try_get("state")?,
            tracked: row.try_get("tracked")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            closed_at: row.try_get("closed_at")?,
        })
    }
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = StoreError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        let state = row
            .state
            .parse::<ReservationState>()
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(Reservation {
            id: ReservationId::from_uuid(row.id),
            tenant_id: TenantId::from_uuid(row.tenant_id),
            product_id: ProductId::from_uuid(row.product_id),
            quantity: to_u64(row.quantity, "quantity")?,
            reference_type: row.reference_type,
            reference_id: row.reference_id,
            state,
            tracked: row.tracked,
            created_by: UserId::from_uuid(row.created_by),
            created_at: row.created_at,
            closed_at: row.closed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_metacharacters() {
        assert_eq!(like_pattern("widget"), "%widget%");
        assert_eq!(like_pattern("50%_off\\"), "%50\\%\\_off\\\\%");
    }

    #[test]
    fn quantity_conversions_guard_range() {
        assert_eq!(to_i64(5, "q").unwrap(), 5);
        assert!(matches!(to_i64(u64::MAX, "q"), Err(StoreError::InvalidWrite(_))));
        assert!(matches!(to_u64(-1, "q"), Err(StoreError::Storage(_))));
    }

    #[test]
    fn ledger_row_with_unknown_type_is_rejected() {
        let row = LedgerRow {
            id: 1,
            tenant_id: uuid::Uuid::now_v7(),
            product_id: uuid::Uuid::now_v7(),
            product_name: "Widget".to_string(),
            change_type: "refund".to_string(),
            quantity_before: 0,
            quantity_changed: 1,
            quantity_after: 1,
            reserved_before: 0,
            reserved_changed: 0,
            reserved_after: 0,
            reason: "r".to_string(),
            reference_id: None,
            operated_by: uuid::Uuid::now_v7(),
            created_at: Utc::now(),
        };
        assert!(matches!(LedgerEntry::try_from(row), Err(StoreError::Storage(_))));
    }

    #[test]
    fn schema_declares_all_tables() {
        for table in [
            "products",
            "inventory_records",
            "inventory_reservations",
            "inventory_ledger",
        ] {
            assert!(SCHEMA.contains(&format!("CREATE TABLE IF NOT EXISTS {table}")));
        }
    }
}
