use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ulid::Ulid;

use super::*;
use crate::config::CoreConfig;
use crate::model::{BookingStatus, ChangeEvent, WaitlistStatus, now_ms};

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("boxoffice_test_core");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn office(name: &str) -> Arc<BoxOffice> {
    BoxOffice::open(&test_wal_path(name), CoreConfig::default()).unwrap()
}

// ── Events ───────────────────────────────────────────────

#[tokio::test]
async fn create_event_and_read_back() {
    let office = office("create_event.wal");
    let event = office.create_event("Concert", 100).await.unwrap();

    assert_eq!(event.total_tickets, 100);
    assert_eq!(event.available_tickets, 100);
    assert_eq!(event.booked_tickets, 0);
    assert_eq!(event.version, 0);

    let read = office.get_event(event.id).await.unwrap();
    assert_eq!(read.name, "Concert");
}

#[tokio::test]
async fn create_event_rejects_empty_name() {
    let office = office("create_event_empty.wal");
    let err = office.create_event("   ", 100).await.unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
}

#[tokio::test]
async fn update_event_stale_version_is_concurrency_error() {
    let office = office("update_stale.wal");
    let event = office.create_event("Concert", 100).await.unwrap();

    let patch = EventPatch {
        name: Some("Concert (moved)".to_string()),
        total_tickets_delta: None,
    };
    office
        .update_event(event.id, patch.clone(), Some(0))
        .await
        .unwrap();

    let err = office
        .update_event(event.id, patch, Some(0))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Concurrency { .. }));
    assert_eq!(err.to_string(), "Event was modified by another operation");
}

#[tokio::test]
async fn update_event_cannot_shrink_below_booked() {
    let office = office("update_shrink.wal");
    let event = office.create_event("Concert", 10).await.unwrap();
    office.create_booking(event.id, "alice", 6).await.unwrap();

    let err = office
        .update_event(
            event.id,
            EventPatch {
                name: None,
                total_tickets_delta: Some(-5),
            },
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Cannot reduce total tickets to 5. There are 6 tickets already booked."
    );
}

#[tokio::test]
async fn update_event_grows_capacity() {
    let office = office("update_grow.wal");
    let event = office.create_event("Concert", 10).await.unwrap();
    office.create_booking(event.id, "alice", 10).await.unwrap();

    let updated = office
        .update_event(
            event.id,
            EventPatch {
                name: None,
                total_tickets_delta: Some(5),
            },
            None,
        )
        .await
        .unwrap();
    assert_eq!(updated.total_tickets, 15);
    assert_eq!(updated.available_tickets, 5);
}

#[tokio::test]
async fn delete_event_cascades_to_bookings_and_waitlist() {
    let office = office("delete_cascade.wal");
    let event = office.create_event("Concert", 5).await.unwrap();
    let booking = office.create_booking(event.id, "alice", 5).await.unwrap();
    let entry = office.add_to_waiting_list(event.id, "bob", 1).await.unwrap();

    // Warm the per-record caches so the delete has stale entries to drop.
    assert!(office.get_booking(booking.id).await.is_some());
    assert!(office.get_waiting_list_entry(entry.id).await.is_some());

    assert!(office.delete_event(event.id).await.unwrap());

    assert!(office.get_event(event.id).await.is_none());
    assert!(office.get_booking(booking.id).await.is_none());
    assert!(office.get_waiting_list_entry(entry.id).await.is_none());
    assert!(office.get_bookings_for_event(event.id).await.is_empty());
    assert!(office.get_waiting_list_for_event(event.id).await.is_empty());
}

#[tokio::test]
async fn delete_event_missing_returns_false() {
    let office = office("delete_missing.wal");
    assert!(!office.delete_event(Ulid::new()).await.unwrap());
}

#[tokio::test]
async fn delete_event_closes_subscriber_channel() {
    let office = office("delete_notify.wal");
    let event = office.create_event("Concert", 5).await.unwrap();
    let mut rx = office.notify.subscribe(event.id);

    assert!(office.delete_event(event.id).await.unwrap());

    // The deletion itself is broadcast, then the channel is torn down.
    assert!(matches!(
        rx.recv().await.unwrap(),
        ChangeEvent::EventDeleted(_)
    ));
    assert!(rx.recv().await.is_err());
}

// ── Bookings ─────────────────────────────────────────────

#[tokio::test]
async fn booking_updates_counters() {
    let office = office("booking_counters.wal");
    let event = office.create_event("Concert", 10).await.unwrap();

    let booking = office.create_booking(event.id, "alice", 3).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);

    let event = office.get_event(event.id).await.unwrap();
    assert_eq!(event.booked_tickets, 3);
    assert_eq!(event.available_tickets, 7);
    assert_eq!(event.version, 1);
}

#[tokio::test]
async fn booking_conflict_reports_exact_availability() {
    let office = office("booking_conflict.wal");
    let event = office.create_event("Concert", 5).await.unwrap();
    office.create_booking(event.id, "alice", 3).await.unwrap();

    let err = office.create_booking(event.id, "bob", 3).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Not enough tickets available. Available: 2, Requested: 3"
    );

    // The conflict is final, not retryable, and state is untouched.
    assert!(!err.is_retryable());
    let availability = office.get_available_tickets(event.id).await.unwrap();
    assert_eq!(availability.available_tickets, 2);
}

#[tokio::test]
async fn booking_unknown_event_is_not_found() {
    let office = office("booking_unknown.wal");
    let id = Ulid::new();
    let err = office.create_booking(id, "alice", 1).await.unwrap_err();
    assert_eq!(err.to_string(), format!("Event with id {id} not found"));
}

#[tokio::test]
async fn concurrent_bookings_never_oversell() {
    let office = office("concurrent_oversell.wal");
    let event = office.create_event("Concert", 5).await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..10 {
        let office = Arc::clone(&office);
        let event_id = event.id;
        tasks.push(tokio::spawn(async move {
            office.create_booking(event_id, &format!("user-{i}"), 1).await
        }));
    }

    let mut succeeded = 0;
    let mut conflicts = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(CoreError::Conflict(_)) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(succeeded, 5);
    assert_eq!(conflicts, 5);

    let event = office.get_event(event.id).await.unwrap();
    assert_eq!(event.booked_tickets, 5);
    assert_eq!(event.available_tickets, 0);
}

#[tokio::test]
async fn concurrent_equal_requests_have_exactly_one_winner() {
    let office = office("concurrent_3v3.wal");
    let event = office.create_event("Concert", 5).await.unwrap();

    let mut tasks = Vec::new();
    for user in ["alice", "bob"] {
        let office = Arc::clone(&office);
        let event_id = event.id;
        tasks.push(tokio::spawn(async move {
            office.create_booking(event_id, user, 3).await
        }));
    }

    let mut winners = Vec::new();
    let mut losers = Vec::new();
    for task in tasks {
        match task.await.unwrap() {
            Ok(booking) => winners.push(booking),
            Err(e) => losers.push(e),
        }
    }

    // Both requests fit individually but not together: one wins, the other
    // sees the post-win availability in its rejection.
    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].number_of_tickets, 3);
    assert_eq!(winners[0].status, BookingStatus::Confirmed);
    assert_eq!(losers.len(), 1);
    assert_eq!(
        losers[0].to_string(),
        "Not enough tickets available. Available: 2, Requested: 3"
    );

    let event = office.get_event(event.id).await.unwrap();
    assert_eq!(event.booked_tickets, 3);
    assert_eq!(event.available_tickets, 2);
}

#[tokio::test]
async fn cancel_booking_restores_capacity() {
    let office = office("cancel_restore.wal");
    let event = office.create_event("Concert", 5).await.unwrap();
    let booking = office.create_booking(event.id, "alice", 3).await.unwrap();

    let cancelled = office.cancel_booking(booking.id).await.unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);

    let event = office.get_event(event.id).await.unwrap();
    assert_eq!(event.booked_tickets, 0);
    assert_eq!(event.available_tickets, 5);
}

#[tokio::test]
async fn cancel_booking_twice_is_conflict() {
    let office = office("cancel_twice.wal");
    let event = office.create_event("Concert", 5).await.unwrap();
    let booking = office.create_booking(event.id, "alice", 2).await.unwrap();

    office.cancel_booking(booking.id).await.unwrap();
    let err = office.cancel_booking(booking.id).await.unwrap_err();
    assert_eq!(err.to_string(), "Booking is already cancelled");
}

// ── Waiting list ─────────────────────────────────────────

#[tokio::test]
async fn waitlist_assigns_increasing_priority() {
    let office = office("waitlist_priority.wal");
    let event = office.create_event("Concert", 1).await.unwrap();

    let first = office
        .add_to_waiting_list(event.id, "alice", 1)
        .await
        .unwrap();
    let second = office.add_to_waiting_list(event.id, "bob", 1).await.unwrap();
    assert_eq!(first.priority, 1);
    assert_eq!(second.priority, 2);
}

#[tokio::test]
async fn waitlist_rejects_duplicate_pending_entry() {
    let office = office("waitlist_dup.wal");
    let event = office.create_event("Concert", 1).await.unwrap();

    office
        .add_to_waiting_list(event.id, "alice", 1)
        .await
        .unwrap();
    let err = office
        .add_to_waiting_list(event.id, "alice", 2)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "User is already on the waiting list for this event"
    );
}

#[tokio::test]
async fn waitlist_cancel_then_rejoin() {
    let office = office("waitlist_rejoin.wal");
    let event = office.create_event("Concert", 1).await.unwrap();

    let entry = office
        .add_to_waiting_list(event.id, "alice", 1)
        .await
        .unwrap();
    office.cancel_waiting_list_entry(entry.id).await.unwrap();

    let err = office.cancel_waiting_list_entry(entry.id).await.unwrap_err();
    assert_eq!(err.to_string(), "Waiting list entry is already cancelled");

    let again = office
        .add_to_waiting_list(event.id, "alice", 1)
        .await
        .unwrap();
    assert_eq!(again.priority, 2);
}

#[tokio::test]
async fn process_stops_at_first_entry_that_does_not_fit() {
    let office = office("waitlist_no_skip.wal");
    let event = office.create_event("Concert", 2).await.unwrap();

    // alice joins first (priority 1, wants 2), bob later (priority 2,
    // wants 1). Scheduling order is priority descending, so bob is
    // considered first; after bob only 1 ticket remains, alice's 2 do not
    // fit, and the pass stops rather than looking further down.
    office
        .add_to_waiting_list(event.id, "alice", 2)
        .await
        .unwrap();
    office.add_to_waiting_list(event.id, "bob", 1).await.unwrap();

    let notified = office.process_waiting_list(event.id).await.unwrap();
    assert_eq!(notified, 1);

    let entries = office.get_waiting_list_for_event(event.id).await;
    let bob = entries.iter().find(|e| e.user_id == "bob").unwrap();
    let alice = entries.iter().find(|e| e.user_id == "alice").unwrap();
    assert_eq!(bob.status, WaitlistStatus::Notified);
    assert!(bob.notified_at.is_some());
    assert_eq!(alice.status, WaitlistStatus::Pending);
}

#[tokio::test]
async fn process_with_no_capacity_notifies_nobody() {
    let office = office("waitlist_no_capacity.wal");
    let event = office.create_event("Concert", 2).await.unwrap();
    office.create_booking(event.id, "alice", 2).await.unwrap();
    office.add_to_waiting_list(event.id, "bob", 1).await.unwrap();

    let notified = office.process_waiting_list(event.id).await.unwrap();
    assert_eq!(notified, 0);
}

#[tokio::test]
async fn fulfillment_books_and_marks_entry() {
    let office = office("fulfill_happy.wal");
    let event = office.create_event("Concert", 3).await.unwrap();
    let entry = office
        .add_to_waiting_list(event.id, "alice", 2)
        .await
        .unwrap();

    assert_eq!(office.process_waiting_list(event.id).await.unwrap(), 1);
    let report = office.auto_fulfill_waiting_list(event.id).await.unwrap();
    assert_eq!(report.fulfilled, 1);
    assert_eq!(report.failed, 0);

    let entry = office.get_waiting_list_entry(entry.id).await.unwrap();
    assert_eq!(entry.status, WaitlistStatus::Fulfilled);
    assert!(entry.fulfilled_at.is_some());

    let event = office.get_event(event.id).await.unwrap();
    assert_eq!(event.booked_tickets, 2);
}

#[tokio::test]
async fn fulfillment_conflict_rolls_entry_back_to_pending() {
    let office = office("fulfill_rollback.wal");
    let event = office.create_event("Concert", 2).await.unwrap();
    let entry = office
        .add_to_waiting_list(event.id, "alice", 2)
        .await
        .unwrap();
    assert_eq!(office.process_waiting_list(event.id).await.unwrap(), 1);

    // Hold the event row lock so fulfillment passes its capacity precheck
    // but blocks inside create_booking; meanwhile a rival booking commits
    // and takes the capacity.
    let guard = office.store.lock_event(&event.id).await.unwrap();

    let fulfiller = {
        let office = Arc::clone(&office);
        let event_id = event.id;
        tokio::spawn(async move { office.auto_fulfill_waiting_list(event_id).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let rival = crate::model::BookingRecord::new(event.id, "rival".to_string(), 2);
    let mut updated = office.store.get_event(&event.id).unwrap();
    updated.booked_tickets = 2;
    updated.recompute_available();
    updated.version += 1;
    updated.updated_at = now_ms();
    office
        .commit(vec![
            ChangeEvent::BookingCreated(rival),
            ChangeEvent::EventUpdated(updated),
        ])
        .await
        .unwrap();
    drop(guard);

    let report = fulfiller.await.unwrap().unwrap();
    assert_eq!(report.fulfilled, 0);
    assert_eq!(report.failed, 1);

    let entry = office.get_waiting_list_entry(entry.id).await.unwrap();
    assert_eq!(entry.status, WaitlistStatus::Pending);
    assert!(entry.notified_at.is_none());
}

#[tokio::test]
async fn entry_cancelled_mid_fulfillment_is_not_counted_fulfilled() {
    let office = office("fulfill_cancelled_midflight.wal");
    let event = office.create_event("Concert", 2).await.unwrap();
    let entry = office
        .add_to_waiting_list(event.id, "alice", 2)
        .await
        .unwrap();
    assert_eq!(office.process_waiting_list(event.id).await.unwrap(), 1);

    // Hold the event row lock so fulfillment blocks inside create_booking;
    // meanwhile the entry is cancelled out from under it.
    let guard = office.store.lock_event(&event.id).await.unwrap();

    let fulfiller = {
        let office = Arc::clone(&office);
        let event_id = event.id;
        tokio::spawn(async move { office.auto_fulfill_waiting_list(event_id).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    office.cancel_waiting_list_entry(entry.id).await.unwrap();
    drop(guard);

    // The booking itself went through, but the skipped mark must not be
    // reported (or counted) as a fulfillment.
    let report = fulfiller.await.unwrap().unwrap();
    assert_eq!(report.fulfilled, 0);
    assert_eq!(report.failed, 1);

    let entry = office.get_waiting_list_entry(entry.id).await.unwrap();
    assert_eq!(entry.status, WaitlistStatus::Cancelled);
    assert!(entry.fulfilled_at.is_none());

    let bookings = office.get_bookings_for_event(event.id).await;
    assert!(
        bookings
            .iter()
            .any(|b| b.user_id == "alice" && b.status == BookingStatus::Confirmed)
    );
}

#[tokio::test]
async fn cancellation_feeds_the_waiting_list() {
    let office = office("cancel_feeds_waitlist.wal");
    let event = office.create_event("Concert", 2).await.unwrap();
    let booking = office.create_booking(event.id, "alice", 2).await.unwrap();
    let entry = office.add_to_waiting_list(event.id, "bob", 1).await.unwrap();

    office.cancel_booking(booking.id).await.unwrap();

    // Fulfillment runs in a background task after the cancel commits.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let entry = office.store.get_waitlist_entry(&entry.id).unwrap();
        if entry.status == WaitlistStatus::Fulfilled {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "waiting-list entry never fulfilled, status {:?}",
            entry.status
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let event = office.get_event(event.id).await.unwrap();
    assert_eq!(event.booked_tickets, 1);
    assert_eq!(event.available_tickets, 1);
}

// ── Journal ──────────────────────────────────────────────

#[tokio::test]
async fn state_survives_reopen() {
    let path = test_wal_path("reopen.wal");
    let event_id;
    let booking_id;
    {
        let office = BoxOffice::open(&path, CoreConfig::default()).unwrap();
        let event = office.create_event("Concert", 10).await.unwrap();
        let booking = office.create_booking(event.id, "alice", 4).await.unwrap();
        event_id = event.id;
        booking_id = booking.id;
    }

    let office = BoxOffice::open(&path, CoreConfig::default()).unwrap();
    let event = office.get_event(event_id).await.unwrap();
    assert_eq!(event.booked_tickets, 4);
    assert_eq!(event.available_tickets, 6);
    let booking = office.get_booking(booking_id).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);
}

#[tokio::test]
async fn deletion_survives_reopen() {
    let path = test_wal_path("reopen_delete.wal");
    let event_id;
    let booking_id;
    {
        let office = BoxOffice::open(&path, CoreConfig::default()).unwrap();
        let event = office.create_event("Concert", 10).await.unwrap();
        let booking = office.create_booking(event.id, "alice", 4).await.unwrap();
        event_id = event.id;
        booking_id = booking.id;
        assert!(office.delete_event(event_id).await.unwrap());
    }

    let office = BoxOffice::open(&path, CoreConfig::default()).unwrap();
    assert!(office.get_event(event_id).await.is_none());
    assert!(office.get_booking(booking_id).await.is_none());
}

#[tokio::test]
async fn compaction_resets_commit_counter_and_keeps_state() {
    let path = test_wal_path("compact.wal");
    let office = BoxOffice::open(&path, CoreConfig::default()).unwrap();
    let event = office.create_event("Concert", 10).await.unwrap();
    office.create_booking(event.id, "alice", 2).await.unwrap();
    office.create_booking(event.id, "bob", 3).await.unwrap();
    assert!(office.wal_commits_since_compact().await.unwrap() >= 3);

    office.compact_wal().await.unwrap();
    assert_eq!(office.wal_commits_since_compact().await.unwrap(), 0);

    let reopened = BoxOffice::open(&path, CoreConfig::default()).unwrap();
    let event = reopened.get_event(event.id).await.unwrap();
    assert_eq!(event.booked_tickets, 5);
}
