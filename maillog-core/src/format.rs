//! Plain-text rendering of buffered events for the summary email and
//! `maillog status`.
//!
//! Events are grouped by `(process_name, process_id)`. Groups are ordered by
//! the timestamp of their first event; events inside a group keep buffer
//! order.

use std::fmt::Write as _;

use chrono::SecondsFormat;

use crate::types::Event;

/// Render `events` as grouped plain text.
///
/// ```text
/// backup (pid=4211):
///     2024-03-01T02:00:00Z WARNING: disk almost full
///     2024-03-01T02:05:00Z ERROR: disk full
///
/// ```
pub fn render(events: &[Event]) -> String {
    let mut out = String::new();
    for group in group_by_process(events) {
        let first = group[0];
        let _ = writeln!(out, "{} (pid={}):", first.process_name, first.process_id);
        for event in group {
            let _ = writeln!(
                out,
                "    {} {}: {}",
                event.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
                event.level,
                event.message
            );
        }
        out.push('\n');
    }
    out
}

/// Groups in output order. Every returned group is non-empty.
fn group_by_process(events: &[Event]) -> Vec<Vec<&Event>> {
    let mut groups: Vec<Vec<&Event>> = Vec::new();
    for event in events {
        let existing = groups.iter_mut().find(|group| {
            group[0].process_name == event.process_name && group[0].process_id == event.process_id
        });
        match existing {
            Some(group) => group.push(event),
            None => groups.push(vec![event]),
        }
    }
    // Stable: groups whose first events share a timestamp keep first-seen order.
    groups.sort_by_key(|group| group[0].timestamp);
    groups
}
