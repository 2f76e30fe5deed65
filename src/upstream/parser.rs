//! Regex-based parsing of upstream XML documents
//!
//! The provider's documents are flat and attribute-heavy, so sections are
//! pulled out with non-greedy regexes and fields with per-attribute captures.
//! A single bad section is skipped with a diagnostic; only a document missing
//! its structural envelope is rejected outright.

use regex::Regex;
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::errors::SyncError;
use crate::models::{Channel, ChannelDiff, Cursor, DiffOp, Event, ScheduleDocument, UpdateBatch};

/// Parse a catalog document:
/// `<channels><channel id=".."><name>..</name><logo src=".."/></channel>..</channels>`
pub fn parse_catalog(content: &str) -> Result<Vec<Channel>, String> {
    if !content.contains("<channels") {
        return Err("missing <channels> envelope".to_string());
    }

    let sections = extract_sections(content, "channel")
        .ok_or_else(|| "channel section pattern failed to compile".to_string())?;

    let mut channels = Vec::new();
    let mut seen = HashSet::new();
    for xml in &sections {
        match parse_channel_xml(xml) {
            Some(channel) => {
                if seen.insert(channel.id.clone()) {
                    channels.push(channel);
                } else {
                    debug!(channel_id = %channel.id, "Duplicate channel entry in catalog, keeping first");
                }
            }
            None => warn!("Skipping malformed channel entry in catalog"),
        }
    }

    if channels.is_empty() {
        return Err("catalog document contains no parsable channels".to_string());
    }
    Ok(channels)
}

fn parse_channel_xml(xml: &str) -> Option<Channel> {
    let id = attr(open_tag(xml)?, "id")?;

    let name_re = Regex::new(r"<name[^>]*>([^<]+)</name>").ok()?;
    let name = name_re
        .captures(xml)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| id.clone());

    let logo_re = Regex::new(r#"<logo\s+src="([^"]+)""#).ok()?;
    let logo = logo_re
        .captures(xml)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    Some(Channel { id, name, logo })
}

/// Parse a schedule document:
/// `<schedule channel=".." code=".."><day date=".."><event id=".." start=".."
/// end=".."><title>..</title></event>..</day>..</schedule>`
pub fn parse_schedule_document(
    content: &str,
    requested_id: &str,
) -> Result<ScheduleDocument, String> {
    let envelope_start = content
        .find("<schedule")
        .ok_or_else(|| "missing <schedule> envelope".to_string())?;
    let envelope = open_tag(&content[envelope_start..])
        .ok_or_else(|| "unterminated <schedule> open tag".to_string())?;

    if let Some(doc_channel) = attr(envelope, "channel") {
        if doc_channel != requested_id {
            warn!(
                requested = requested_id,
                received = %doc_channel,
                "Schedule document channel attribute does not match requested id"
            );
        }
    }
    let epg_code = attr(envelope, "code").unwrap_or_else(|| requested_id.to_string());

    let day_sections = extract_sections(content, "day")
        .ok_or_else(|| "day section pattern failed to compile".to_string())?;
    if day_sections.is_empty() {
        return Err("schedule document contains no day sections".to_string());
    }

    let mut document = ScheduleDocument::new(requested_id, epg_code);
    for day_xml in &day_sections {
        let Some(date) = attr(day_xml, "date") else {
            warn!(channel_id = requested_id, "Skipping day section without a date attribute");
            continue;
        };

        let day = document.day_mut_or_insert(&date);
        for event_xml in extract_sections(day_xml, "event").unwrap_or_default() {
            match parse_event_xml(&event_xml) {
                Some(event) => day.upsert_event(event),
                None => warn!(
                    channel_id = requested_id,
                    date = %date,
                    "Skipping malformed event entry"
                ),
            }
        }
    }

    Ok(document)
}

fn parse_event_xml(xml: &str) -> Option<Event> {
    let id = attr(xml, "id")?;
    let start = attr(xml, "start")?;
    let end = attr(xml, "end")?;

    let title_re = Regex::new(r"<title[^>]*>([^<]+)</title>").ok()?;
    let title = title_re
        .captures(xml)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "Untitled".to_string());

    Some(Event { id, start, end, title })
}

/// Parse an update document:
/// `<updates next=".."><channel id=".."><add date=".." id=".." start=".."
/// end=".."><title>..</title></add><del id=".."/></channel>..</updates>`
///
/// A channel group that cannot be interpreted is dropped with a diagnostic
/// so the remaining groups still apply; `cursor` is only used for context in
/// those diagnostics.
pub fn parse_update_batch(content: &str, cursor: Cursor) -> Result<UpdateBatch, String> {
    let envelope_re = Regex::new(r"<updates(\s[^>]*)?>").map_err(|e| e.to_string())?;
    let envelope = envelope_re
        .find(content)
        .ok_or_else(|| "missing <updates> envelope".to_string())?;

    let next_cursor = match attr(envelope.as_str(), "next") {
        Some(raw) => Some(
            raw.parse::<Cursor>()
                .map_err(|_| format!("unparsable next cursor '{}'", raw))?,
        ),
        None => None,
    };

    let channel_sections = extract_sections(content, "channel")
        .ok_or_else(|| "channel section pattern failed to compile".to_string())?;

    let mut groups = Vec::new();
    for xml in &channel_sections {
        match parse_channel_diff(xml, cursor) {
            Ok(group) => groups.push(group),
            Err(e) => warn!(error = %e, "Dropping undecodable diff group"),
        }
    }

    Ok(UpdateBatch { groups, next_cursor })
}

fn parse_channel_diff(xml: &str, cursor: Cursor) -> Result<ChannelDiff, SyncError> {
    // Only the open tag may name the channel; nested op ids must not leak in
    let channel_id = open_tag(xml)
        .and_then(|tag| attr(tag, "id"))
        .ok_or_else(|| {
            SyncError::diff_parse("<unknown>", cursor, "channel group without an id attribute")
        })?;

    // One pass over the group so adds and dels keep their document order
    let op_re = Regex::new(r"(?s)<add\s[^>]*>.*?</add>|<del\s[^>]*/>")
        .map_err(|e| SyncError::diff_parse(&channel_id, cursor, e.to_string()))?;

    let mut ops = Vec::new();
    for m in op_re.find_iter(xml) {
        let op_xml = m.as_str();
        if op_xml.starts_with("<add") {
            let date = attr(op_xml, "date").ok_or_else(|| {
                SyncError::diff_parse(&channel_id, cursor, "add op without a date attribute")
            })?;
            let event = parse_event_xml(op_xml).ok_or_else(|| {
                SyncError::diff_parse(&channel_id, cursor, "add op with incomplete event fields")
            })?;
            ops.push(DiffOp::Add { date, event });
        } else {
            let event_id = attr(op_xml, "id").ok_or_else(|| {
                SyncError::diff_parse(&channel_id, cursor, "del op without an id attribute")
            })?;
            ops.push(DiffOp::Del { event_id });
        }
    }

    Ok(ChannelDiff { channel_id, ops })
}

/// Pull every `<tag ...>...</tag>` section out of a document.
///
/// `None` only when the pattern itself fails to compile.
fn extract_sections(content: &str, tag: &str) -> Option<Vec<String>> {
    let pattern = format!(r"(?s)<{tag}(?:\s[^>]*)?>.*?</{tag}>");
    let re = match Regex::new(&pattern) {
        Ok(regex) => regex,
        Err(e) => {
            warn!("Failed to compile section pattern for tag '{}': {}", tag, e);
            return None;
        }
    };

    Some(re.find_iter(content).map(|m| m.as_str().to_string()).collect())
}

fn open_tag(xml: &str) -> Option<&str> {
    xml.find('>').map(|end| &xml[..=end])
}

fn attr(xml: &str, name: &str) -> Option<String> {
    let re = Regex::new(&format!(r#"{name}="([^"]*)""#)).ok()?;
    re.captures(xml)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
        <channels>
            <channel id="CCTV1"><name>CCTV1</name><logo src="http://logo/cctv1.png"/></channel>
            <channel id="AHTV1"><name>Anhui TV</name></channel>
            <channel><name>No Id</name></channel>
        </channels>
    "#;

    const SCHEDULE: &str = r#"
        <schedule channel="CCTV1" code="cctv1">
            <day date="2017-12-07">
                <event id="2" start="00:27" end="02:06"><title>Title2</title></event>
                <event id="1" start="00:16" end="00:27"><title>Title1</title></event>
            </day>
        </schedule>
    "#;

    const UPDATES: &str = r#"
        <updates next="1512654321">
            <channel id="AHTV1">
                <add date="2017-12-07" id="819448190" start="18:30" end="18:58"><title>News</title></add>
                <del id="819448191"/>
            </channel>
            <channel>
                <del id="1"/>
            </channel>
        </updates>
    "#;

    #[test]
    fn test_parse_catalog_skips_malformed_entries() {
        let channels = parse_catalog(CATALOG).unwrap();
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].id, "CCTV1");
        assert_eq!(channels[0].logo.as_deref(), Some("http://logo/cctv1.png"));
        assert_eq!(channels[1].name, "Anhui TV");
        assert_eq!(channels[1].logo, None);
    }

    #[test]
    fn test_parse_catalog_without_envelope_is_error() {
        assert!(parse_catalog("<other></other>").is_err());
        assert!(parse_catalog("<channels></channels>").is_err());
    }

    #[test]
    fn test_parse_schedule_orders_events_by_start() {
        let doc = parse_schedule_document(SCHEDULE, "CCTV1").unwrap();
        assert_eq!(doc.epg_code, "cctv1");

        let day = doc.day("2017-12-07").unwrap();
        let starts: Vec<&str> = day.events.iter().map(|e| e.start.as_str()).collect();
        assert_eq!(starts, vec!["00:16", "00:27"]);
        assert_eq!(day.events[0].title, "Title1");
    }

    #[test]
    fn test_parse_schedule_requires_day_sections() {
        let err = parse_schedule_document("<schedule channel=\"X\"></schedule>", "X").unwrap_err();
        assert!(err.contains("no day sections"));
    }

    #[test]
    fn test_parse_update_batch_preserves_op_order() {
        let batch = parse_update_batch(UPDATES, 42).unwrap();
        assert_eq!(batch.next_cursor, Some(1512654321));
        // The id-less channel group is dropped, the good one survives
        assert_eq!(batch.groups.len(), 1);

        let group = &batch.groups[0];
        assert_eq!(group.channel_id, "AHTV1");
        assert!(matches!(&group.ops[0], DiffOp::Add { date, event }
            if date == "2017-12-07" && event.id == "819448190" && event.title == "News"));
        assert!(matches!(&group.ops[1], DiffOp::Del { event_id } if event_id == "819448191"));
    }

    #[test]
    fn test_parse_update_batch_without_next_cursor() {
        let batch = parse_update_batch("<updates></updates>", 0).unwrap();
        assert!(batch.is_empty());
        assert_eq!(batch.next_cursor, None);
    }

    #[test]
    fn test_parse_update_batch_rejects_bad_cursor() {
        assert!(parse_update_batch("<updates next=\"soon\"></updates>", 0).is_err());
    }
}
