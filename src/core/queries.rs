//! Cached read paths. Each getter reads through the cache: a hit
//! deserializes the cached JSON, a miss reads committed state from the
//! store and caches it with a per-key-family TTL. Writers invalidate
//! these keys right after commit, so staleness is bounded by the TTL at
//! worst.

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use ulid::Ulid;

use crate::core::{BoxOffice, CoreError};
use crate::model::{BookingRecord, EventRecord, TicketAvailability, WaitlistEntry};

impl BoxOffice {
    async fn cached<T, F>(&self, key: &str, ttl: Duration, load: F) -> Option<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Option<T>,
    {
        if let Some(value) = self.cache.get(key).await
            && let Ok(hit) = serde_json::from_value(value)
        {
            return Some(hit);
        }
        let fresh = load()?;
        if let Ok(json) = serde_json::to_value(&fresh) {
            self.cache.set(key, json, ttl).await;
        }
        Some(fresh)
    }

    pub async fn get_event(&self, event_id: Ulid) -> Option<EventRecord> {
        self.cached(
            &format!("event:{event_id}"),
            self.config.entity_cache_ttl,
            || self.store.get_event(&event_id),
        )
        .await
    }

    pub async fn get_booking(&self, booking_id: Ulid) -> Option<BookingRecord> {
        self.cached(
            &format!("booking:{booking_id}"),
            self.config.entity_cache_ttl,
            || self.store.get_booking(&booking_id),
        )
        .await
    }

    /// All bookings for an event, oldest first.
    pub async fn get_bookings_for_event(&self, event_id: Ulid) -> Vec<BookingRecord> {
        self.cached(
            &format!("bookings:event:{event_id}"),
            self.config.list_cache_ttl,
            || Some(self.store.bookings_for_event(&event_id)),
        )
        .await
        .unwrap_or_default()
    }

    pub async fn get_waiting_list_entry(&self, entry_id: Ulid) -> Option<WaitlistEntry> {
        self.cached(
            &format!("waiting-list:{entry_id}"),
            self.config.entity_cache_ttl,
            || self.store.get_waitlist_entry(&entry_id),
        )
        .await
    }

    /// The event's waiting list in scheduling order, every status.
    pub async fn get_waiting_list_for_event(&self, event_id: Ulid) -> Vec<WaitlistEntry> {
        self.cached(
            &format!("waiting-list:event:{event_id}"),
            self.config.list_cache_ttl,
            || Some(self.store.waitlist_for_event(&event_id, None)),
        )
        .await
        .unwrap_or_default()
    }

    /// Availability snapshot for an event. Cached on a short TTL; the
    /// booking path never consults it.
    pub async fn get_available_tickets(
        &self,
        event_id: Ulid,
    ) -> Result<TicketAvailability, CoreError> {
        let availability = self
            .cached(
                &format!("event:tickets:{event_id}"),
                self.config.tickets_cache_ttl,
                || {
                    let event = self.store.get_event(&event_id)?;
                    let booked = self.store.sum_active_booking_tickets(&event_id);
                    let available = i64::from(event.total_tickets) - booked as i64;
                    let available = available.max(0) as u32;
                    Some(TicketAvailability {
                        event_id: event.id,
                        event_name: event.name,
                        total_tickets: event.total_tickets,
                        booked_tickets: booked as u32,
                        available_tickets: available,
                        is_sold_out: available == 0,
                    })
                },
            )
            .await;
        availability.ok_or(CoreError::NotFound {
            kind: "Event",
            id: event_id,
        })
    }
}
