//! Waiting-list workflows: joining, the scheduling pass that promotes
//! pending entries to notified, fulfillment of notified entries, and
//! cancellation.
//!
//! Scheduling walks entries strictly in order (priority descending, then
//! oldest first) and stops at the first entry that does not fit the
//! remaining capacity. A large request at the head is never skipped in
//! favor of a smaller one behind it.

use metrics::counter;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::core::booking::validate_user_id;
use crate::core::{BoxOffice, CoreError};
use crate::limits::MAX_WAITLIST_TICKETS;
use crate::model::{ChangeEvent, FulfillmentReport, WaitlistEntry, WaitlistStatus, now_ms};
use crate::observability::{
    WAITLIST_ADDED_TOTAL, WAITLIST_FULFILLED_TOTAL, WAITLIST_NOTIFIED_TOTAL,
};

impl BoxOffice {
    /// Join the waiting list for an event. One pending entry per user per
    /// event; the new entry gets priority `max + 1`, so later joiners are
    /// served first. The event row lock serializes the duplicate check
    /// with the priority assignment.
    pub async fn add_to_waiting_list(
        &self,
        event_id: Ulid,
        user_id: &str,
        number_of_tickets: u32,
    ) -> Result<WaitlistEntry, CoreError> {
        if number_of_tickets == 0 || number_of_tickets > MAX_WAITLIST_TICKETS {
            return Err(CoreError::Validation(format!(
                "number of tickets must be between 1 and {MAX_WAITLIST_TICKETS}"
            )));
        }
        validate_user_id(user_id)?;

        let guard = self.store.lock_event(&event_id).await?;
        if self
            .store
            .pending_entry_for_user(&event_id, user_id)
            .is_some()
        {
            return Err(CoreError::Conflict(
                "User is already on the waiting list for this event".into(),
            ));
        }

        let priority = self.store.max_priority(&event_id) + 1;
        let entry = WaitlistEntry::new(event_id, user_id.to_string(), number_of_tickets, priority);
        self.commit(vec![ChangeEvent::WaitlistAdded(entry.clone())])
            .await?;
        drop(guard);

        self.cache.invalidate_pattern("waiting-list:*").await;
        counter!(WAITLIST_ADDED_TOTAL).increment(1);
        info!(
            entry_id = %entry.id,
            event_id = %event_id,
            user_id,
            priority,
            "added to waiting list"
        );
        Ok(entry)
    }

    /// One scheduling pass: under the event row lock, mark as many pending
    /// entries notified as the current capacity allows, in order, stopping
    /// at the first entry that does not fit. Entries locked by another
    /// task are skipped rather than waited on. Returns how many entries
    /// were notified.
    pub async fn process_waiting_list(&self, event_id: Ulid) -> Result<usize, CoreError> {
        let event_guard = self.store.lock_event(&event_id).await?;
        let booked = self.store.sum_active_booking_tickets(&event_id);
        let available = i64::from(event_guard.record.total_tickets) - booked as i64;
        if available <= 0 {
            debug!(event_id = %event_id, "no capacity for waiting list");
            return Ok(0);
        }

        let pending = self
            .store
            .dequeue_waitlist(&event_id, WaitlistStatus::Pending);
        if pending.is_empty() {
            return Ok(0);
        }

        let now = now_ms();
        let mut remaining = available;
        let mut changes = Vec::new();
        for guard in &pending {
            if i64::from(guard.record.number_of_tickets) > remaining {
                break;
            }
            let mut entry = guard.record.clone();
            entry.status = WaitlistStatus::Notified;
            entry.notified_at = Some(now);
            entry.version += 1;
            entry.updated_at = now;
            remaining -= i64::from(entry.number_of_tickets);
            info!(
                entry_id = %entry.id,
                event_id = %event_id,
                user_id = %entry.user_id,
                number_of_tickets = entry.number_of_tickets,
                "notified waiting-list entry"
            );
            changes.push(ChangeEvent::WaitlistUpdated(entry));
        }

        let notified = changes.len();
        if notified > 0 {
            self.commit(changes).await?;
            self.cache.invalidate_pattern("waiting-list:*").await;
            counter!(WAITLIST_NOTIFIED_TOTAL).increment(notified as u64);
        }
        drop(pending);
        drop(event_guard);
        Ok(notified)
    }

    /// Try to convert every notified entry into a booking. Each entry is
    /// its own unit of work: one failure does not abort the rest. An entry
    /// that loses the capacity race goes back to pending so the next
    /// scheduling pass reconsiders it.
    pub async fn auto_fulfill_waiting_list(
        &self,
        event_id: Ulid,
    ) -> Result<FulfillmentReport, CoreError> {
        let entries = self
            .store
            .waitlist_for_event(&event_id, Some(WaitlistStatus::Notified));
        if entries.is_empty() {
            return Ok(FulfillmentReport::default());
        }
        info!(
            event_id = %event_id,
            entries = entries.len(),
            "fulfilling waiting-list entries"
        );

        let mut report = FulfillmentReport::default();
        for entry in entries {
            let Some(event) = self.store.get_event(&event_id) else {
                warn!(event_id = %event_id, "event disappeared during fulfillment");
                break;
            };
            let available = i64::from(event.total_tickets)
                - self.store.sum_active_booking_tickets(&event_id) as i64;
            if available < i64::from(entry.number_of_tickets) {
                debug!(
                    entry_id = %entry.id,
                    available,
                    required = entry.number_of_tickets,
                    "insufficient capacity, leaving entry notified"
                );
                continue;
            }

            match self
                .create_booking(event_id, &entry.user_id, entry.number_of_tickets)
                .await
            {
                Ok(booking) => match self.mark_entry_fulfilled(entry.id).await {
                    Ok(true) => {
                        report.fulfilled += 1;
                        counter!(WAITLIST_FULFILLED_TOTAL).increment(1);
                        info!(
                            entry_id = %entry.id,
                            booking_id = %booking.id,
                            "fulfilled waiting-list entry"
                        );
                    }
                    Ok(false) => {
                        // Entry left the notified state (cancelled mid
                        // flight) between listing and booking. The booking
                        // stands; the entry does not count as fulfilled.
                        report.failed += 1;
                        warn!(
                            entry_id = %entry.id,
                            booking_id = %booking.id,
                            "entry changed state before fulfillment was recorded"
                        );
                    }
                    Err(e) => {
                        report.failed += 1;
                        error!(entry_id = %entry.id, "failed to mark entry fulfilled: {e}");
                    }
                },
                Err(CoreError::Conflict(_)) => {
                    // Lost the race for the capacity we were notified
                    // about. Roll the entry back so it queues again.
                    report.failed += 1;
                    if let Err(e) = self.reset_entry_to_pending(entry.id).await {
                        error!(entry_id = %entry.id, "failed to reset entry to pending: {e}");
                    } else {
                        info!(entry_id = %entry.id, "reset waiting-list entry to pending");
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    error!(entry_id = %entry.id, "failed to fulfill waiting-list entry: {e}");
                }
            }
        }

        if report.fulfilled > 0 {
            self.cache.invalidate_pattern("waiting-list:*").await;
        }
        info!(
            event_id = %event_id,
            fulfilled = report.fulfilled,
            failed = report.failed,
            "fulfillment pass complete"
        );
        Ok(report)
    }

    /// Cancel a waiting-list entry. Only an already-cancelled entry is
    /// rejected; the user may re-join afterwards.
    pub async fn cancel_waiting_list_entry(
        &self,
        entry_id: Ulid,
    ) -> Result<WaitlistEntry, CoreError> {
        let guard = self.store.lock_waitlist_entry(&entry_id).await?;
        if guard.record.status == WaitlistStatus::Cancelled {
            return Err(CoreError::Conflict(
                "Waiting list entry is already cancelled".into(),
            ));
        }

        let mut entry = guard.record.clone();
        entry.status = WaitlistStatus::Cancelled;
        entry.version += 1;
        entry.updated_at = now_ms();
        self.commit(vec![ChangeEvent::WaitlistUpdated(entry.clone())])
            .await?;
        drop(guard);

        self.cache.delete(&format!("waiting-list:{entry_id}")).await;
        self.cache.invalidate_pattern("waiting-list:*").await;
        info!(entry_id = %entry_id, "cancelled waiting-list entry");
        Ok(entry)
    }

    /// Record the fulfilled transition. Returns false without writing if
    /// the entry is no longer notified (cancelled while the booking was in
    /// flight), so the caller does not count it as fulfilled.
    async fn mark_entry_fulfilled(&self, entry_id: Ulid) -> Result<bool, CoreError> {
        let guard = self.store.lock_waitlist_entry(&entry_id).await?;
        if guard.record.status != WaitlistStatus::Notified {
            debug!(entry_id = %entry_id, status = ?guard.record.status, "skipping fulfilled mark");
            return Ok(false);
        }
        let now = now_ms();
        let mut entry = guard.record.clone();
        entry.status = WaitlistStatus::Fulfilled;
        entry.fulfilled_at = Some(now);
        entry.version += 1;
        entry.updated_at = now;
        self.commit(vec![ChangeEvent::WaitlistUpdated(entry)]).await?;
        Ok(true)
    }

    async fn reset_entry_to_pending(&self, entry_id: Ulid) -> Result<(), CoreError> {
        let guard = self.store.lock_waitlist_entry(&entry_id).await?;
        if guard.record.status != WaitlistStatus::Notified {
            return Ok(());
        }
        let mut entry = guard.record.clone();
        entry.status = WaitlistStatus::Pending;
        entry.notified_at = None;
        entry.version += 1;
        entry.updated_at = now_ms();
        self.commit(vec![ChangeEvent::WaitlistUpdated(entry)]).await
    }
}
