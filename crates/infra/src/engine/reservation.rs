use chrono::Utc;
use tracing::{info, instrument};

use stockroom_core::{ExpectedVersion, RequestContext, ReservationId};
use stockroom_inventory::{
    ChangeType, InventoryError, InventoryResult, LedgerEntry, NewLedgerEntry, NewReservation,
    Reservation, ReservationState,
};

use crate::store::{ChangeSet, InventoryStore};

use super::{AttemptError, InventoryEngine, audit};

impl<S: InventoryStore> InventoryEngine<S> {
    /// Hold stock for an order line.
    ///
    /// For untracked products the reservation is recorded but no quantity
    /// moves and no ledger entry is written.
    #[instrument(
        skip(self, ctx, request),
        fields(
            tenant_id = %ctx.tenant_id(),
            actor = %ctx.actor(),
            product_id = %request.product_id,
            quantity = request.quantity,
            reference_id = %request.reference_id
        ),
        err(level = "warn")
    )]
    pub async fn reserve(&self, ctx: &RequestContext, request: NewReservation) -> InventoryResult<Reservation> {
        request.validate()?;

        let (reservation, entries) = self
            .retrying("reserve", || self.try_reserve(ctx, &request))
            .await?;

        info!(reservation_id = %reservation.id, tracked = reservation.tracked, "stock reserved");
        audit(&entries);
        Ok(reservation)
    }

    async fn try_reserve(
        &self,
        ctx: &RequestContext,
        request: &NewReservation,
    ) -> Result<(Reservation, Vec<LedgerEntry>), AttemptError> {
        let tenant_id = ctx.tenant_id();
        let (product, record) = self.load(tenant_id, request.product_id).await?;

        let now = Utc::now();
        let tracked = record.track_inventory();
        let reservation = Reservation::open(tenant_id, request.clone(), tracked, ctx.actor(), now);

        let mut changes = ChangeSet::new();
        if tracked {
            let change = record.plan_reserve(request.quantity)?;
            let entry = NewLedgerEntry::for_change(
                &record,
                product.name,
                &change,
                ChangeType::Reservation,
                format!("reserved for {} {}", request.reference_type, request.reference_id),
                Some(request.reference_id.clone()),
                ctx.actor(),
                now,
            );
            changes
                .write_record(record.with_change(&change, now), ExpectedVersion::of(&record))
                .append(entry);
        }
        changes.insert_reservation(reservation.clone());

        let receipt = self.store.commit(tenant_id, changes).await?;
        Ok((reservation, receipt.ledger))
    }

    /// Give a reservation's stock back. Idempotent: a terminal reservation is returned as is.
    #[instrument(
        skip(self, ctx),
        fields(tenant_id = %ctx.tenant_id(), actor = %ctx.actor(), reservation_id = %reservation_id),
        err(level = "warn")
    )]
    pub async fn release(&self, ctx: &RequestContext, reservation_id: ReservationId) -> InventoryResult<Reservation> {
        self.close(ctx, reservation_id, ReservationState::Released).await
    }

    /// Fulfil a reservation: stock and reserved both drop by its quantity.
    /// Idempotent like [`release`](Self::release).
    #[instrument(
        skip(self, ctx),
        fields(tenant_id = %ctx.tenant_id(), actor = %ctx.actor(), reservation_id = %reservation_id),
        err(level = "warn")
    )]
    pub async fn consume(&self, ctx: &RequestContext, reservation_id: ReservationId) -> InventoryResult<Reservation> {
        self.close(ctx, reservation_id, ReservationState::Consumed).await
    }

    pub async fn reservation(&self, ctx: &RequestContext, reservation_id: ReservationId) -> InventoryResult<Reservation> {
        self.store
            .reservation(ctx.tenant_id(), reservation_id)
            .await?
            .ok_or_else(|| InventoryError::not_found(format!("reservation {reservation_id}")))
    }

    /// All reservations of one order, in creation order.
    pub async fn reservations_for_reference(
        &self,
        ctx: &RequestContext,
        reference_type: &str,
        reference_id: &str,
    ) -> InventoryResult<Vec<Reservation>> {
        Ok(self
            .store
            .reservations_for_reference(ctx.tenant_id(), reference_type, reference_id)
            .await?)
    }

    /// Release every active reservation of one order.
    ///
    /// Each release commits on its own. On error, the ones already released
    /// stay released and calling again finishes the rest.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id(), actor = %ctx.actor()), err(level = "warn"))]
    pub async fn release_for_reference(
        &self,
        ctx: &RequestContext,
        reference_type: &str,
        reference_id: &str,
    ) -> InventoryResult<Vec<Reservation>> {
        let active: Vec<Reservation> = self
            .reservations_for_reference(ctx, reference_type, reference_id)
            .await?
            .into_iter()
            .filter(Reservation::is_active)
            .collect();

        let mut released = Vec::with_capacity(active.len());
        for reservation in active {
            released.push(self.release(ctx, reservation.id).await?);
        }
        info!(released = released.len(), "reservations released for reference");
        Ok(released)
    }

    async fn close(
        &self,
        ctx: &RequestContext,
        reservation_id: ReservationId,
        to: ReservationState,
    ) -> InventoryResult<Reservation> {
        let operation = match to {
            ReservationState::Consumed => "consume",
            _ => "release",
        };
        let (reservation, entries) = self
            .retrying(operation, || self.try_close(ctx, reservation_id, to))
            .await?;

        info!(state = reservation.state.as_str(), ledger_entries = entries.len(), "reservation closed");
        audit(&entries);
        Ok(reservation)
    }

    async fn try_close(
        &self,
        ctx: &RequestContext,
        reservation_id: ReservationId,
        to: ReservationState,
    ) -> Result<(Reservation, Vec<LedgerEntry>), AttemptError> {
        let tenant_id = ctx.tenant_id();
        let current = self
            .store
            .reservation(tenant_id, reservation_id)
            .await?
            .ok_or_else(|| InventoryError::not_found(format!("reservation {reservation_id}")))?;

        let now = Utc::now();
        let Some(closed) = current.close(to, now) else {
            return Ok((current, Vec::new()));
        };

        let mut changes = ChangeSet::new();
        if current.tracked {
            let (product, record) = self.load(tenant_id, current.product_id).await?;
            let (change, change_type, verb) = match to {
                ReservationState::Consumed => (record.plan_consume(current.quantity), ChangeType::Sale, "consumed"),
                _ => (record.plan_release(current.quantity), ChangeType::Release, "released"),
            };
            let entry = NewLedgerEntry::for_change(
                &record,
                product.name,
                &change,
                change_type,
                format!("{verb} for {} {}", current.reference_type, current.reference_id),
                Some(current.reference_id.clone()),
                ctx.actor(),
                now,
            );
            changes
                .write_record(record.with_change(&change, now), ExpectedVersion::of(&record))
                .append(entry);
        }
        changes.transition_reservation(closed.clone(), ReservationState::Active);

        let receipt = self.store.commit(tenant_id, changes).await?;
        Ok((closed, receipt.ledger))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::Fixture;
    use super::*;
    use stockroom_inventory::{Adjustment, AdjustmentKind};

    async fn stocked(fx: &Fixture, stock: u64) -> stockroom_core::ProductId {
        let product = fx.product("Widget", true);
        fx.engine
            .adjust(&fx.ctx, Adjustment::new(product, AdjustmentKind::Increase, stock, "restock"))
            .await
            .unwrap();
        product
    }

    #[tokio::test]
    async fn reserve_then_release_restores_available() {
        let fx = Fixture::new();
        let product = stocked(&fx, 10).await;

        let r = fx
            .engine
            .reserve(&fx.ctx, NewReservation::new(product, 10, "order", "SO-1"))
            .await
            .unwrap();
        assert_eq!(r.state, ReservationState::Active);
        assert_eq!(fx.engine.record(&fx.ctx, product).await.unwrap().reserved_quantity(), 10);

        let released = fx.engine.release(&fx.ctx, r.id).await.unwrap();
        assert_eq!(released.state, ReservationState::Released);
        assert!(released.closed_at.is_some());

        let record = fx.engine.record(&fx.ctx, product).await.unwrap();
        assert_eq!(record.reserved_quantity(), 0);
        assert_eq!(record.stock_quantity(), 10);

        let types: Vec<ChangeType> = fx
            .engine
            .history(&fx.ctx, product)
            .await
            .unwrap()
            .iter()
            .skip(1)
            .map(|e| e.change_type)
            .collect();
        assert_eq!(types, vec![ChangeType::Reservation, ChangeType::Release]);
        assert_eq!(
            fx.engine.reservation(&fx.ctx, r.id).await.unwrap().state,
            ReservationState::Released
        );
    }

    #[tokio::test]
    async fn reserve_more_than_available_is_rejected() {
        let fx = Fixture::new();
        let product = stocked(&fx, 10).await;
        fx.engine
            .reserve(&fx.ctx, NewReservation::new(product, 6, "order", "SO-1"))
            .await
            .unwrap();

        let err = fx
            .engine
            .reserve(&fx.ctx, NewReservation::new(product, 5, "order", "SO-2"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            InventoryError::InsufficientStock {
                reason: "requested quantity exceeds available stock",
                requested: 5,
                available: 4,
            }
        );
        assert!(
            fx.engine
                .reservations_for_reference(&fx.ctx, "order", "SO-2")
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn release_and_consume_are_idempotent() {
        let fx = Fixture::new();
        let product = stocked(&fx, 10).await;
        let r = fx
            .engine
            .reserve(&fx.ctx, NewReservation::new(product, 4, "order", "SO-1"))
            .await
            .unwrap();

        let first = fx.engine.consume(&fx.ctx, r.id).await.unwrap();
        let second = fx.engine.consume(&fx.ctx, r.id).await.unwrap();
        let late_release = fx.engine.release(&fx.ctx, r.id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(late_release.state, ReservationState::Consumed);

        let record = fx.engine.record(&fx.ctx, product).await.unwrap();
        assert_eq!(record.stock_quantity(), 6);
        assert_eq!(record.reserved_quantity(), 0);

        let history = fx.engine.history(&fx.ctx, product).await.unwrap();
        assert_eq!(history.len(), 3);
        let sale = &history[2];
        assert_eq!(sale.change_type, ChangeType::Sale);
        assert_eq!((sale.quantity_changed, sale.reserved_changed), (-4, -4));
    }

    #[tokio::test]
    async fn untracked_reservation_moves_nothing() {
        let fx = Fixture::new();
        let product = fx.product("Gift card", false);

        let r = fx
            .engine
            .reserve(&fx.ctx, NewReservation::new(product, 1_000, "order", "SO-9"))
            .await
            .unwrap();
        assert!(!r.tracked);
        fx.engine.consume(&fx.ctx, r.id).await.unwrap();

        let record = fx.engine.record(&fx.ctx, product).await.unwrap();
        assert_eq!(record.reserved_quantity(), 0);
        assert!(fx.engine.history(&fx.ctx, product).await.unwrap().is_empty());
        assert_eq!(
            fx.engine.reservation(&fx.ctx, r.id).await.unwrap().state,
            ReservationState::Consumed
        );
    }

    #[tokio::test]
    async fn release_for_reference_releases_only_active_lines() {
        let fx = Fixture::new();
        let a = stocked(&fx, 10).await;
        let b = stocked(&fx, 10).await;

        let line1 = fx
            .engine
            .reserve(&fx.ctx, NewReservation::new(a, 3, "order", "SO-5"))
            .await
            .unwrap();
        fx.engine
            .reserve(&fx.ctx, NewReservation::new(b, 2, "order", "SO-5"))
            .await
            .unwrap();
        fx.engine
            .reserve(&fx.ctx, NewReservation::new(b, 1, "order", "SO-6"))
            .await
            .unwrap();
        fx.engine.consume(&fx.ctx, line1.id).await.unwrap();

        let released = fx
            .engine
            .release_for_reference(&fx.ctx, "order", "SO-5")
            .await
            .unwrap();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].product_id, b);

        assert_eq!(fx.engine.record(&fx.ctx, b).await.unwrap().reserved_quantity(), 1);
        assert_eq!(fx.engine.record(&fx.ctx, a).await.unwrap().stock_quantity(), 7);

        // Second cancellation finds nothing left to release.
        assert!(
            fx.engine
                .release_for_reference(&fx.ctx, "order", "SO-5")
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn unknown_or_foreign_reservation_is_not_found() {
        let fx = Fixture::new();
        let other = Fixture::new();
        let product = stocked(&fx, 5).await;
        let r = fx
            .engine
            .reserve(&fx.ctx, NewReservation::new(product, 1, "order", "SO-1"))
            .await
            .unwrap();

        // Same store, different tenant.
        let foreign_ctx = other.ctx;
        assert!(matches!(
            fx.engine.release(&foreign_ctx, r.id).await,
            Err(InventoryError::NotFound(_))
        ));
        assert!(matches!(
            fx.engine.release(&fx.ctx, ReservationId::new()).await,
            Err(InventoryError::NotFound(_))
        ));
        assert!(fx.engine.reservation(&fx.ctx, r.id).await.unwrap().is_active());
    }

    #[tokio::test]
    async fn invalid_reservation_requests_are_rejected() {
        let fx = Fixture::new();
        let product = stocked(&fx, 5).await;
        for bad in [
            NewReservation::new(product, 0, "order", "SO-1"),
            NewReservation::new(product, 1, "order", ""),
        ] {
            assert!(matches!(
                fx.engine.reserve(&fx.ctx, bad).await,
                Err(InventoryError::Validation(_))
            ));
        }
    }
}
