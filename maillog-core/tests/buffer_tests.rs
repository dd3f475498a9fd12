//! Behavioural tests for `EventBuffer`: ordering, clearing, durability,
//! corruption tolerance and concurrent writers.
//!
//! Every test works in its own `TempDir`.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use chrono::Utc;
use maillog_core::{BufferError, Event, EventBuffer, Level};
use rstest::rstest;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn buffer_path(dir: &TempDir) -> PathBuf {
    dir.path().join("buffer.json")
}

fn event(message: &str) -> Event {
    Event {
        message: message.to_string(),
        level: Level::Warning,
        process_name: "tests".to_string(),
        process_id: 1234,
        timestamp: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// Ordering and clearing
// ---------------------------------------------------------------------------

#[rstest]
#[case(0)]
#[case(1)]
#[case(25)]
fn get_all_returns_inserts_in_order(#[case] count: usize) {
    let dir = TempDir::new().expect("tempdir");
    let buffer = EventBuffer::open(buffer_path(&dir));

    let expected: Vec<Event> = (0..count).map(|i| event(&format!("event-{i}"))).collect();
    for e in &expected {
        buffer.insert(e.clone()).expect("insert");
    }

    assert_eq!(buffer.get_all(), expected);
}

#[test]
fn clear_empties_buffer_regardless_of_contents() {
    let dir = TempDir::new().expect("tempdir");
    let buffer = EventBuffer::open(buffer_path(&dir));
    for i in 0..5 {
        buffer.insert(event(&format!("e{i}"))).expect("insert");
    }

    buffer.clear().expect("clear");
    assert!(buffer.get_all().is_empty());

    // Clearing an already empty buffer is fine too.
    buffer.clear().expect("clear again");
    assert!(buffer.get_all().is_empty());
}

#[test]
fn get_all_is_idempotent() {
    let dir = TempDir::new().expect("tempdir");
    let buffer = EventBuffer::open(buffer_path(&dir));
    buffer.insert(event("a")).expect("insert");
    buffer.insert(event("b")).expect("insert");

    let first = buffer.get_all();
    let second = buffer.get_all();
    assert_eq!(first, second);
}

#[test]
fn drain_keeps_events_inserted_after_snapshot() {
    let dir = TempDir::new().expect("tempdir");
    let buffer = EventBuffer::open(buffer_path(&dir));
    buffer.insert(event("delivered-1")).expect("insert");
    buffer.insert(event("delivered-2")).expect("insert");

    let snapshot = buffer.get_all();
    buffer.insert(event("late")).expect("insert");

    let remaining = buffer.drain(snapshot.len()).expect("drain");
    assert_eq!(remaining, 1);
    let left = buffer.get_all();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].message, "late");
}

// ---------------------------------------------------------------------------
// Durability and corruption
// ---------------------------------------------------------------------------

#[test]
fn inserted_event_survives_reopen() {
    let dir = TempDir::new().expect("tempdir");
    let e = event("disk full");
    {
        let buffer = EventBuffer::open(buffer_path(&dir));
        buffer.insert(e.clone()).expect("insert");
    }

    let reopened = EventBuffer::open(buffer_path(&dir));
    assert_eq!(reopened.get_all(), vec![e]);
}

#[test]
fn clear_survives_reopen() {
    let dir = TempDir::new().expect("tempdir");
    {
        let buffer = EventBuffer::open(buffer_path(&dir));
        buffer.insert(event("gone")).expect("insert");
        buffer.clear().expect("clear");
    }
    assert!(EventBuffer::open(buffer_path(&dir)).get_all().is_empty());
}

#[rstest]
#[case::garbage(b"this is not json".as_slice())]
#[case::wrong_shape(br#"{"events": []}"#.as_slice())]
#[case::truncated(br#"[{"message":"half"#.as_slice())]
#[case::empty_file(b"".as_slice())]
fn corrupt_file_reads_as_empty(#[case] contents: &[u8]) {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(buffer_path(&dir), contents).expect("write corrupt file");

    let buffer = EventBuffer::open(buffer_path(&dir));
    assert!(buffer.get_all().is_empty());
}

#[test]
fn corrupt_file_heals_on_next_insert() {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(buffer_path(&dir), b"{{{{").expect("write corrupt file");

    let buffer = EventBuffer::open(buffer_path(&dir));
    buffer.insert(event("fresh")).expect("insert");

    let reopened = EventBuffer::open(buffer_path(&dir));
    let events = reopened.get_all();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].message, "fresh");
}

#[test]
fn persist_failure_surfaces_error_and_keeps_state() {
    let dir = TempDir::new().expect("tempdir");
    // A regular file where the parent directory should be makes every write fail.
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"").expect("write blocker");
    let buffer = EventBuffer::open(blocker.join("buffer.json"));

    let err = buffer.insert(event("lost")).expect_err("insert must fail");
    assert!(matches!(err, BufferError::Persist { .. }), "got {err:?}");
    assert!(buffer.get_all().is_empty(), "failed insert must not be visible");
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[test]
fn concurrent_inserts_lose_nothing() {
    const WRITERS: usize = 16;
    const PER_WRITER: usize = 10;

    let dir = TempDir::new().expect("tempdir");
    let buffer = Arc::new(EventBuffer::open(buffer_path(&dir)));

    let handles: Vec<_> = (0..WRITERS)
        .map(|w| {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                for i in 0..PER_WRITER {
                    buffer.insert(event(&format!("w{w}-{i}"))).expect("insert");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer thread");
    }

    let events = buffer.get_all();
    assert_eq!(events.len(), WRITERS * PER_WRITER);

    let mut messages: Vec<_> = events.iter().map(|e| e.message.clone()).collect();
    messages.sort();
    messages.dedup();
    assert_eq!(messages.len(), WRITERS * PER_WRITER, "no duplicates");

    // Per-writer order is preserved.
    for w in 0..WRITERS {
        let prefix = format!("w{w}-");
        let own: Vec<_> = events
            .iter()
            .filter(|e| e.message.starts_with(&prefix))
            .map(|e| e.message.clone())
            .collect();
        let expected: Vec<_> = (0..PER_WRITER).map(|i| format!("w{w}-{i}")).collect();
        assert_eq!(own, expected);
    }

    assert_eq!(
        EventBuffer::open(buffer_path(&dir)).len(),
        WRITERS * PER_WRITER,
        "disk state matches memory"
    );
}
