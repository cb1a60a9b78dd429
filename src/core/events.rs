//! Event catalog operations: create and update. Updates run under a
//! coordinator lock so concurrent capacity changes and bookings agree on
//! the counters.

use std::sync::Arc;

use tracing::info;
use ulid::Ulid;

use crate::core::{BoxOffice, CoreError};
use crate::limits::{MAX_EVENT_NAME_LEN, MAX_TOTAL_TICKETS};
use crate::lock::with_lock;
use crate::model::{ChangeEvent, EventRecord, now_ms};

/// Partial update for an event. Capacity changes are expressed as a delta
/// so two concurrent updates compose instead of clobbering each other.
#[derive(Debug, Default, Clone)]
pub struct EventPatch {
    pub name: Option<String>,
    pub total_tickets_delta: Option<i64>,
}

fn validate_name(name: &str) -> Result<(), CoreError> {
    if name.trim().is_empty() {
        return Err(CoreError::Validation("event name must not be empty".into()));
    }
    if name.len() > MAX_EVENT_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "event name must not exceed {MAX_EVENT_NAME_LEN} bytes"
        )));
    }
    Ok(())
}

impl BoxOffice {
    pub async fn create_event(
        &self,
        name: &str,
        total_tickets: u32,
    ) -> Result<EventRecord, CoreError> {
        validate_name(name)?;
        if total_tickets > MAX_TOTAL_TICKETS {
            return Err(CoreError::Validation(format!(
                "total tickets must not exceed {MAX_TOTAL_TICKETS}"
            )));
        }

        let event = EventRecord::new(name.to_string(), total_tickets);
        self.commit(vec![ChangeEvent::EventCreated(event.clone())])
            .await?;

        self.cache.invalidate_pattern("events:*").await;
        info!(event_id = %event.id, total_tickets, "created event");
        Ok(event)
    }

    /// Apply a patch under the `event:update:{id}` coordinator lock. When
    /// `expected_version` is given the update only goes through if the
    /// event is still at that version; otherwise it fails with a
    /// concurrency error the caller can surface or retry on.
    pub async fn update_event(
        &self,
        event_id: Ulid,
        patch: EventPatch,
        expected_version: Option<u64>,
    ) -> Result<EventRecord, CoreError> {
        let key = format!("event:update:{event_id}");
        let locks = Arc::clone(&self.locks);
        let updated = with_lock(locks, &key, self.lock_options(), || async {
            let guard = self.store.lock_event(&event_id).await?;
            let mut event = guard.record.clone();

            if let Some(expected) = expected_version
                && event.version != expected
            {
                return Err(CoreError::Concurrency {
                    kind: "Event",
                    id: event_id,
                });
            }

            if let Some(name) = &patch.name {
                validate_name(name)?;
                event.name = name.clone();
            }

            if let Some(delta) = patch.total_tickets_delta {
                let new_total = i64::from(event.total_tickets) + delta;
                let booked = self.store.sum_active_booking_tickets(&event_id);
                if new_total < 0 {
                    return Err(CoreError::Validation(
                        "total tickets cannot be reduced below zero".into(),
                    ));
                }
                if (new_total as u64) < booked {
                    return Err(CoreError::Validation(format!(
                        "Cannot reduce total tickets to {new_total}. There are {booked} tickets already booked."
                    )));
                }
                if new_total > i64::from(MAX_TOTAL_TICKETS) {
                    return Err(CoreError::Validation(format!(
                        "total tickets must not exceed {MAX_TOTAL_TICKETS}"
                    )));
                }
                event.total_tickets = new_total as u32;
                event.booked_tickets = booked as u32;
            }

            event.recompute_available();
            event.version += 1;
            event.updated_at = now_ms();
            self.commit(vec![ChangeEvent::EventUpdated(event.clone())])
                .await?;
            Ok(event)
        })
        .await?;

        self.cache.delete(&format!("event:{event_id}")).await;
        self.cache
            .delete(&format!("event:tickets:{event_id}"))
            .await;
        self.cache.invalidate_pattern("events:*").await;
        info!(event_id = %event_id, version = updated.version, "updated event");
        Ok(updated)
    }

    /// Delete an event under the `event:delete:{id}` coordinator lock,
    /// cascading to its bookings and waiting-list entries. Returns false
    /// if the event does not exist.
    pub async fn delete_event(&self, event_id: Ulid) -> Result<bool, CoreError> {
        let key = format!("event:delete:{event_id}");
        let locks = Arc::clone(&self.locks);
        let cascaded = with_lock(locks, &key, self.lock_options(), || async {
            let guard = match self.store.lock_event(&event_id).await {
                Ok(guard) => guard,
                Err(CoreError::NotFound { .. }) => return Ok(None),
                Err(e) => return Err(e),
            };
            // Snapshot the rows the apply will remove, so their cache
            // entries can be dropped too.
            let bookings: Vec<Ulid> = self
                .store
                .bookings_for_event(&event_id)
                .iter()
                .map(|b| b.id)
                .collect();
            let entries: Vec<Ulid> = self
                .store
                .waitlist_for_event(&event_id, None)
                .iter()
                .map(|w| w.id)
                .collect();
            self.commit(vec![ChangeEvent::EventDeleted(guard.record.clone())])
                .await?;
            drop(guard);
            Ok(Some((bookings, entries)))
        })
        .await?;

        let Some((bookings, entries)) = cascaded else {
            return Ok(false);
        };
        self.notify.remove(&event_id);
        self.cache.delete(&format!("event:{event_id}")).await;
        self.cache
            .delete(&format!("event:tickets:{event_id}"))
            .await;
        for id in bookings {
            self.cache.delete(&format!("booking:{id}")).await;
        }
        for id in entries {
            self.cache.delete(&format!("waiting-list:{id}")).await;
        }
        self.cache.invalidate_pattern("events:*").await;
        self.cache.invalidate_pattern("bookings:*").await;
        self.cache.invalidate_pattern("waiting-list:*").await;
        info!(event_id = %event_id, "deleted event");
        Ok(true)
    }
}
