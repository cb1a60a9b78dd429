//! Booking workflows. Creation takes the event row lock, checks capacity
//! against the authoritative sum of active bookings, and commits the new
//! booking together with the updated counters in one journal frame.
//! Cancellation additionally runs under a coordinator lock and kicks off
//! waiting-list processing once the cancellation has committed.

use std::sync::Arc;

use metrics::counter;
use tracing::{error, info};
use ulid::Ulid;

use crate::core::{BoxOffice, CoreError};
use crate::limits::MAX_USER_ID_LEN;
use crate::lock::with_lock;
use crate::model::{BookingRecord, BookingStatus, ChangeEvent, now_ms};
use crate::observability::{
    BOOKING_CONFLICTS_TOTAL, BOOKINGS_CANCELLED_TOTAL, BOOKINGS_CREATED_TOTAL,
};
use crate::retry::with_retry;

pub(crate) fn validate_user_id(user_id: &str) -> Result<(), CoreError> {
    if user_id.trim().is_empty() {
        return Err(CoreError::Validation("user id must not be empty".into()));
    }
    if user_id.len() > MAX_USER_ID_LEN {
        return Err(CoreError::Validation(format!(
            "user id must not exceed {MAX_USER_ID_LEN} bytes"
        )));
    }
    Ok(())
}

impl BoxOffice {
    /// Book tickets. Retries transient storage failures (row lock
    /// timeouts); capacity conflicts are final and returned as-is.
    pub async fn create_booking(
        &self,
        event_id: Ulid,
        user_id: &str,
        number_of_tickets: u32,
    ) -> Result<BookingRecord, CoreError> {
        with_retry(self.config.retry, || {
            self.create_booking_once(event_id, user_id, number_of_tickets)
        })
        .await
    }

    async fn create_booking_once(
        &self,
        event_id: Ulid,
        user_id: &str,
        number_of_tickets: u32,
    ) -> Result<BookingRecord, CoreError> {
        if number_of_tickets == 0 {
            return Err(CoreError::Validation(
                "number of tickets must be positive".into(),
            ));
        }
        validate_user_id(user_id)?;

        let guard = self.store.lock_event(&event_id).await?;
        let booked = self.store.sum_active_booking_tickets(&event_id);
        let available = i64::from(guard.record.total_tickets) - booked as i64;
        if available < i64::from(number_of_tickets) {
            counter!(BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(CoreError::Conflict(format!(
                "Not enough tickets available. Available: {available}, Requested: {number_of_tickets}"
            )));
        }

        let booking = BookingRecord::new(event_id, user_id.to_string(), number_of_tickets);
        let mut event = guard.record.clone();
        event.booked_tickets = (booked + u64::from(number_of_tickets)) as u32;
        event.recompute_available();
        event.version += 1;
        event.updated_at = now_ms();

        self.commit(vec![
            ChangeEvent::BookingCreated(booking.clone()),
            ChangeEvent::EventUpdated(event),
        ])
        .await?;
        drop(guard);

        self.invalidate_booking_caches(event_id, None).await;
        counter!(BOOKINGS_CREATED_TOTAL).increment(1);
        info!(
            booking_id = %booking.id,
            event_id = %event_id,
            user_id,
            number_of_tickets,
            "created booking"
        );
        Ok(booking)
    }

    /// Cancel a booking and release its tickets. Once the cancellation has
    /// committed, freed capacity is offered to the waiting list in a
    /// background task; failures there are logged, not surfaced, since the
    /// cancellation itself already succeeded.
    pub async fn cancel_booking(
        self: &Arc<Self>,
        booking_id: Ulid,
    ) -> Result<BookingRecord, CoreError> {
        let key = format!("booking:cancel:{booking_id}");
        let locks = Arc::clone(&self.locks);
        let cancelled = with_lock(locks, &key, self.lock_options(), || async {
            self.cancel_booking_locked(booking_id).await
        })
        .await?;

        let this = Arc::clone(self);
        let event_id = cancelled.event_id;
        tokio::spawn(async move {
            if let Err(e) = this.offer_freed_capacity(event_id).await {
                error!(event_id = %event_id, "waiting-list processing after cancellation failed: {e}");
            }
        });
        Ok(cancelled)
    }

    async fn cancel_booking_locked(&self, booking_id: Ulid) -> Result<BookingRecord, CoreError> {
        let booking_guard = self.store.lock_booking(&booking_id).await?;
        if booking_guard.record.status == BookingStatus::Cancelled {
            return Err(CoreError::Conflict("Booking is already cancelled".into()));
        }
        let event_id = booking_guard.record.event_id;
        // Event lock second; creation only ever locks the event, so the
        // booking-then-event order here cannot deadlock against it.
        let event_guard = self.store.lock_event(&event_id).await?;

        let now = now_ms();
        let mut booking = booking_guard.record.clone();
        booking.status = BookingStatus::Cancelled;
        booking.version += 1;
        booking.updated_at = now;

        let remaining = self
            .store
            .sum_active_booking_tickets(&event_id)
            .saturating_sub(u64::from(booking.number_of_tickets));
        let mut event = event_guard.record.clone();
        event.booked_tickets = remaining as u32;
        event.recompute_available();
        event.version += 1;
        event.updated_at = now;

        self.commit(vec![
            ChangeEvent::BookingCancelled(booking.clone()),
            ChangeEvent::EventUpdated(event),
        ])
        .await?;
        drop(event_guard);
        drop(booking_guard);

        self.invalidate_booking_caches(event_id, Some(booking_id))
            .await;
        counter!(BOOKINGS_CANCELLED_TOTAL).increment(1);
        info!(booking_id = %booking_id, event_id = %event_id, "cancelled booking");
        Ok(booking)
    }

    async fn offer_freed_capacity(&self, event_id: Ulid) -> Result<(), CoreError> {
        let notified = self.process_waiting_list(event_id).await?;
        if notified == 0 {
            return Ok(());
        }
        self.auto_fulfill_waiting_list(event_id).await?;
        Ok(())
    }

    pub(crate) async fn invalidate_booking_caches(&self, event_id: Ulid, booking_id: Option<Ulid>) {
        if let Some(id) = booking_id {
            self.cache.delete(&format!("booking:{id}")).await;
        }
        self.cache.delete(&format!("event:{event_id}")).await;
        self.cache
            .delete(&format!("event:tickets:{event_id}"))
            .await;
        self.cache.invalidate_pattern("events:*").await;
        self.cache.invalidate_pattern("bookings:*").await;
    }
}
