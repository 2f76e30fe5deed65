//! Cross-midnight program merging
//!
//! Upstream represents a program that runs across a date boundary as two
//! truncated events: one ending `00:00` on day D and one starting `00:00`
//! with the same title on day D+1. The merger recombines them into a single
//! event. It is a pure transform over one channel's document: malformed or
//! missing dates leave the affected event untouched with a diagnostic, and
//! applying the merge to its own output is a no-op.

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::models::ScheduleDocument;

/// Collapse midnight-split events in place.
///
/// For every event ending at midnight, the schedule of the immediately
/// following calendar date is searched for a same-titled event starting at
/// midnight; when found, the first event absorbs the second's end time and
/// the second is removed. A program spanning several midnights is followed
/// day by day until its real end is reached.
pub fn merge_cross_midnight(document: &mut ScheduleDocument) {
    let dates: Vec<String> = document.days.keys().cloned().collect();

    for date in dates {
        let candidate_ids: Vec<String> = match document.day(&date) {
            Some(day) => day
                .events
                .iter()
                .filter(|e| e.ends_at_midnight())
                .map(|e| e.id.clone())
                .collect(),
            None => continue,
        };

        for event_id in candidate_ids {
            merge_one_event(document, &date, &event_id);
        }
    }
}

/// Follow one midnight-ending event forward until it stops at a real time,
/// a day without a continuation, or an unparsable date.
fn merge_one_event(document: &mut ScheduleDocument, origin_date: &str, event_id: &str) {
    // The event stays on its origin date; only the scan date advances as
    // continuations are absorbed.
    let mut scan_date = origin_date.to_string();

    loop {
        let Some((title, still_at_midnight)) = document
            .day(origin_date)
            .and_then(|day| day.events.iter().find(|e| e.id == event_id))
            .map(|e| (e.title.clone(), e.ends_at_midnight()))
        else {
            return;
        };
        if !still_at_midnight {
            return;
        }

        let Some(next_date) = next_day(&scan_date) else {
            warn!(
                channel_id = %document.channel_id,
                date = %scan_date,
                event_id,
                "Cannot merge midnight-split event: unparsable date"
            );
            return;
        };

        // Find the continuation: same title, starting exactly at midnight
        let continuation = document.day(&next_date).and_then(|day| {
            day.events
                .iter()
                .find(|e| e.starts_at_midnight() && e.title == title)
                .map(|e| (e.id.clone(), e.end.clone()))
        });

        let Some((continuation_id, continuation_end)) = continuation else {
            debug!(
                channel_id = %document.channel_id,
                date = %scan_date,
                event_id,
                "Midnight-ending event has no continuation on the next day"
            );
            return;
        };

        if let Some(next_day_schedule) = document.days.get_mut(&next_date) {
            next_day_schedule.remove_event(&continuation_id);
        }
        if let Some(day) = document.days.get_mut(origin_date) {
            if let Some(event) = day.events.iter_mut().find(|e| e.id == event_id) {
                event.end = continuation_end;
            }
        }

        scan_date = next_date;
    }
}

fn next_day(date: &str) -> Option<String> {
    let parsed = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    Some(parsed.succ_opt()?.format("%Y-%m-%d").to_string())
}
