use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    /// Terminal. A cancelled booking releases its tickets and never comes back.
    Cancelled,
}

impl BookingStatus {
    /// Pending and confirmed bookings both hold tickets against the event.
    pub fn is_active(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitlistStatus {
    Pending,
    /// Admitted by a scheduling pass; tickets earmarked but not yet booked.
    Notified,
    Fulfilled,
    Cancelled,
}

/// An event with finite ticket capacity. `available_tickets` and
/// `booked_tickets` are derived from the active bookings; `version` backs the
/// optimistic concurrency check on every update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: Ulid,
    pub name: String,
    pub total_tickets: u32,
    pub available_tickets: u32,
    pub booked_tickets: u32,
    pub version: u64,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl EventRecord {
    pub fn new(name: String, total_tickets: u32) -> Self {
        let now = now_ms();
        Self {
            id: Ulid::new(),
            name,
            total_tickets,
            available_tickets: total_tickets,
            booked_tickets: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Re-derive `available_tickets` from the totals, clamped at zero.
    pub fn recompute_available(&mut self) {
        self.available_tickets = self.total_tickets.saturating_sub(self.booked_tickets);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRecord {
    pub id: Ulid,
    pub event_id: Ulid,
    pub user_id: String,
    pub number_of_tickets: u32,
    pub status: BookingStatus,
    pub version: u64,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl BookingRecord {
    pub fn new(event_id: Ulid, user_id: String, number_of_tickets: u32) -> Self {
        let now = now_ms();
        Self {
            id: Ulid::new(),
            event_id,
            user_id,
            number_of_tickets,
            // No separate confirmation step in this domain.
            status: BookingStatus::Confirmed,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A queued request for tickets that could not be satisfied immediately.
/// `priority` is a per-event counter assigned at insertion; scheduling passes
/// serve entries priority-descending, arrival-ascending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub id: Ulid,
    pub event_id: Ulid,
    pub user_id: String,
    pub number_of_tickets: u32,
    pub priority: u32,
    pub status: WaitlistStatus,
    pub notified_at: Option<Ms>,
    pub fulfilled_at: Option<Ms>,
    pub version: u64,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl WaitlistEntry {
    pub fn new(event_id: Ulid, user_id: String, number_of_tickets: u32, priority: u32) -> Self {
        let now = now_ms();
        Self {
            id: Ulid::new(),
            event_id,
            user_id,
            number_of_tickets,
            priority,
            status: WaitlistStatus::Pending,
            notified_at: None,
            fulfilled_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One state transition, carrying the full record after the change.
/// This is both the WAL record format (a commit is a `Vec<ChangeEvent>`)
/// and the payload broadcast to audit/notification subscribers.
/// Replay applies each change as an upsert (or, for deletions, a cascading
/// remove).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeEvent {
    EventCreated(EventRecord),
    EventUpdated(EventRecord),
    /// Removes the event and, cascading, its bookings and waiting-list
    /// entries. Carries the last committed record for subscribers.
    EventDeleted(EventRecord),
    BookingCreated(BookingRecord),
    BookingCancelled(BookingRecord),
    WaitlistAdded(WaitlistEntry),
    WaitlistUpdated(WaitlistEntry),
}

impl ChangeEvent {
    /// The event this change belongs to, for per-event notification routing.
    pub fn event_id(&self) -> Ulid {
        match self {
            ChangeEvent::EventCreated(e)
            | ChangeEvent::EventUpdated(e)
            | ChangeEvent::EventDeleted(e) => e.id,
            ChangeEvent::BookingCreated(b) | ChangeEvent::BookingCancelled(b) => b.event_id,
            ChangeEvent::WaitlistAdded(w) | ChangeEvent::WaitlistUpdated(w) => w.event_id,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// Live ticket availability for one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketAvailability {
    pub event_id: Ulid,
    pub event_name: String,
    pub total_tickets: u32,
    pub booked_tickets: u32,
    pub available_tickets: u32,
    pub is_sold_out: bool,
}

/// Outcome of one auto-fulfillment pass over an event's notified entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FulfillmentReport {
    pub fulfilled: usize,
    pub failed: usize,
}
