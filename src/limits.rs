//! Hard validation bounds. Violations are rejected up front as
//! `CoreError::Validation`, never retried.

/// Longest accepted event name.
pub const MAX_EVENT_NAME_LEN: usize = 256;

/// Longest accepted user identifier.
pub const MAX_USER_ID_LEN: usize = 128;

/// Cap on an event's total ticket count.
pub const MAX_TOTAL_TICKETS: u32 = 1_000_000;

/// Cap on tickets requested by a single waiting-list entry.
pub const MAX_WAITLIST_TICKETS: u32 = 100;
