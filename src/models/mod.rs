//! Data model for the EPG mirror
//!
//! Catalog and schedule values are built once and published as immutable
//! snapshots; nothing here is mutated after publication. Event times arrive
//! from upstream as raw `HH:MM` strings and stay that way — parsing is done
//! on demand so malformed times degrade to append-order semantics instead of
//! dropping data.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opaque token marking progress against the upstream diff stream.
///
/// Only ever moves forward; held once, in memory, for the whole process.
pub type Cursor = u64;

/// A single channel from the upstream catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub logo: Option<String>,
}

/// The full channel catalog, replaced wholesale on every refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelCatalog {
    pub channels: Vec<Channel>,
    pub fetched_at: DateTime<Utc>,
}

impl ChannelCatalog {
    pub fn new(channels: Vec<Channel>) -> Self {
        Self {
            channels,
            fetched_at: Utc::now(),
        }
    }

    pub fn contains(&self, channel_id: &str) -> bool {
        self.channels.iter().any(|c| c.id == channel_id)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// One program event within a day's schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub start: String,
    pub end: String,
    pub title: String,
}

impl Event {
    /// Parse the raw start time. `None` for unparsable times.
    pub fn start_time(&self) -> Option<NaiveTime> {
        parse_clock(&self.start)
    }

    /// Parse the raw end time. `None` for unparsable times.
    pub fn end_time(&self) -> Option<NaiveTime> {
        parse_clock(&self.end)
    }

    pub fn starts_at_midnight(&self) -> bool {
        self.start_time() == Some(NaiveTime::MIN)
    }

    pub fn ends_at_midnight(&self) -> bool {
        self.end_time() == Some(NaiveTime::MIN)
    }
}

fn parse_clock(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .ok()
}

/// The schedule for one channel on one calendar date.
///
/// Events are kept strictly ascending by start time; ties and unparsable
/// times resolve to arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySchedule {
    pub date: String,
    pub events: Vec<Event>,
}

impl DaySchedule {
    pub fn new(date: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            events: Vec::new(),
        }
    }

    /// Insert an event keeping ascending start-time order.
    ///
    /// Any existing event with the same id is removed first (replace
    /// semantics). An event whose start time does not parse is appended.
    pub fn upsert_event(&mut self, event: Event) {
        self.events.retain(|e| e.id != event.id);

        let position = match event.start_time() {
            Some(start) => self
                .events
                .iter()
                .position(|e| matches!(e.start_time(), Some(other) if other > start)),
            None => None,
        };

        match position {
            Some(idx) => self.events.insert(idx, event),
            None => self.events.push(event),
        }
    }

    /// Remove the event with the given id. Returns whether one was removed.
    pub fn remove_event(&mut self, event_id: &str) -> bool {
        if let Some(idx) = self.events.iter().position(|e| e.id == event_id) {
            self.events.remove(idx);
            true
        } else {
            false
        }
    }
}

/// All cached schedule days for one channel, keyed by ISO date.
///
/// ISO `YYYY-MM-DD` keys make lexical map order chronological. Malformed
/// date keys from upstream are tolerated and retained; they simply never
/// participate in next-day lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleDocument {
    pub channel_id: String,
    pub epg_code: String,
    pub days: BTreeMap<String, DaySchedule>,
}

impl ScheduleDocument {
    pub fn new(channel_id: impl Into<String>, epg_code: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            epg_code: epg_code.into(),
            days: BTreeMap::new(),
        }
    }

    pub fn day(&self, date: &str) -> Option<&DaySchedule> {
        self.days.get(date)
    }

    pub fn day_mut_or_insert(&mut self, date: &str) -> &mut DaySchedule {
        self.days
            .entry(date.to_string())
            .or_insert_with(|| DaySchedule::new(date))
    }

    /// Remove the first event matching `event_id`, searching days in
    /// chronological order. Returns the date it was removed from.
    pub fn remove_first_event(&mut self, event_id: &str) -> Option<String> {
        for (date, day) in self.days.iter_mut() {
            if day.remove_event(event_id) {
                return Some(date.clone());
            }
        }
        None
    }

    pub fn total_events(&self) -> usize {
        self.days.values().map(|d| d.events.len()).sum()
    }
}

/// One add/delete operation from an upstream diff group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum DiffOp {
    Add { date: String, event: Event },
    Del { event_id: String },
}

/// All diff operations for one channel within a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDiff {
    pub channel_id: String,
    pub ops: Vec<DiffOp>,
}

/// One batch from the upstream update endpoint.
///
/// A batch without a next cursor ends the current polling pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateBatch {
    pub groups: Vec<ChannelDiff>,
    pub next_cursor: Option<Cursor>,
}

impl UpdateBatch {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str, start: &str, end: &str, title: &str) -> Event {
        Event {
            id: id.to_string(),
            start: start.to_string(),
            end: end.to_string(),
            title: title.to_string(),
        }
    }

    #[test]
    fn test_parse_clock_times() {
        assert_eq!(
            event("1", "18:30", "18:58", "News").start_time(),
            NaiveTime::from_hms_opt(18, 30, 0)
        );
        assert!(event("1", "00:00", "02:00", "News").starts_at_midnight());
        assert!(event("1", "23:00", "00:00", "News").ends_at_midnight());
        assert_eq!(event("1", "bogus", "18:58", "News").start_time(), None);
    }

    #[test]
    fn test_upsert_keeps_start_order() {
        let mut day = DaySchedule::new("2017-12-07");
        day.upsert_event(event("1", "00:16", "00:27", "Title1"));
        day.upsert_event(event("2", "00:27", "02:06", "Title2"));
        day.upsert_event(event("3", "00:20", "00:25", "Inserted"));

        let ids: Vec<&str> = day.events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3", "2"]);
    }

    #[test]
    fn test_upsert_replaces_same_id() {
        let mut day = DaySchedule::new("2017-12-07");
        day.upsert_event(event("1", "00:16", "00:27", "Old"));
        day.upsert_event(event("1", "01:00", "01:30", "New"));

        assert_eq!(day.events.len(), 1);
        assert_eq!(day.events[0].title, "New");
        assert_eq!(day.events[0].start, "01:00");
    }

    #[test]
    fn test_upsert_equal_start_preserves_arrival_order() {
        let mut day = DaySchedule::new("2017-12-07");
        day.upsert_event(event("1", "10:00", "11:00", "First"));
        day.upsert_event(event("2", "10:00", "11:00", "Second"));

        let ids: Vec<&str> = day.events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn test_upsert_unparsable_start_appends() {
        let mut day = DaySchedule::new("2017-12-07");
        day.upsert_event(event("1", "10:00", "11:00", "Parsed"));
        day.upsert_event(event("2", "??", "11:00", "Unparsed"));

        assert_eq!(day.events[1].id, "2");
    }

    #[test]
    fn test_remove_first_event_searches_days_in_order() {
        let mut doc = ScheduleDocument::new("CCTV1", "cctv1");
        doc.day_mut_or_insert("2017-12-08")
            .upsert_event(event("7", "09:00", "10:00", "Late"));
        doc.day_mut_or_insert("2017-12-07")
            .upsert_event(event("7", "09:00", "10:00", "Early"));

        assert_eq!(doc.remove_first_event("7").as_deref(), Some("2017-12-07"));
        assert_eq!(doc.total_events(), 1);
        assert_eq!(doc.remove_first_event("missing"), None);
    }
}
