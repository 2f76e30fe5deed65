//! Incremental update synchronization
//!
//! Polls the upstream diff stream with a monotonic cursor and patches cached
//! schedule documents. The cursor is seeded from local wall-clock time when
//! the loop first starts: diffs published while the process runs but before
//! the first full schedule refresh completes are covered by that refresh,
//! while diffs published before the process started are knowingly outside
//! the mirror's guarantee. The poll loop never dies; any failure leaves the
//! cursor where it was and the next cycle picks up from there.
//!
//! Each channel's diffs are applied to a private clone of its current
//! document, which is then published wholesale under the write guard, so a
//! reader never observes a half-applied batch.

use std::sync::Arc;
use chrono::Utc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::cache::EpgCache;
use crate::config::RefreshConfig;
use crate::errors::SyncError;
use crate::models::{ChannelDiff, Cursor, DiffOp, UpdateBatch};
use crate::upstream::UpstreamClient;

pub struct UpdateSynchronizer {
    client: Arc<UpstreamClient>,
    cache: Arc<EpgCache>,
    refresh: RefreshConfig,
}

impl UpdateSynchronizer {
    pub fn new(client: Arc<UpstreamClient>, cache: Arc<EpgCache>, refresh: RefreshConfig) -> Self {
        Self {
            client,
            cache,
            refresh,
        }
    }

    pub async fn run(self) {
        let mut cursor = initial_cursor();
        info!(cursor, "Starting update synchronizer");

        loop {
            cursor = self.poll_pass(cursor).await;
            sleep(self.refresh.update_poll()).await;
        }
    }

    /// One polling pass: follow next-cursor tokens until a batch arrives
    /// without one. Returns the cursor to resume from next cycle.
    async fn poll_pass(&self, mut cursor: Cursor) -> Cursor {
        loop {
            let batch = match self.client.fetch_updates(cursor).await {
                Ok(batch) => batch,
                Err(e) => {
                    // Fixed-delay retry via the outer poll cadence
                    warn!(cursor, error = %e, "Update fetch failed, retrying next poll cycle");
                    return cursor;
                }
            };

            if !batch.is_empty() {
                self.apply_batch(cursor, &batch).await;
            }

            match advance_cursor(cursor, batch.next_cursor) {
                Some(next) => cursor = next,
                None => {
                    debug!(cursor, "Polling pass complete");
                    return cursor;
                }
            }
        }
    }

    /// Apply one batch. A failure on one channel's diffs never aborts the
    /// others.
    async fn apply_batch(&self, cursor: Cursor, batch: &UpdateBatch) {
        for group in &batch.groups {
            match self.apply_channel_diffs(cursor, group).await {
                Ok(applied) => {
                    debug!(
                        channel_id = %group.channel_id,
                        cursor,
                        applied,
                        "Applied diff group"
                    );
                }
                Err(e) => {
                    warn!(
                        channel_id = %group.channel_id,
                        cursor,
                        error = %e,
                        "Skipping channel diffs for this cycle"
                    );
                }
            }
        }
    }

    /// Apply one channel's diff group and publish the rebuilt document.
    ///
    /// The guard is held from load to publish so a concurrent full refresh
    /// cannot be overwritten with a patch of an older snapshot.
    async fn apply_channel_diffs(
        &self,
        cursor: Cursor,
        group: &ChannelDiff,
    ) -> Result<usize, SyncError> {
        let guard = self.cache.acquire_write("diff apply").await?;

        let current =
            self.cache
                .schedule(&group.channel_id)
                .ok_or_else(|| SyncError::ScheduleUnavailable {
                    channel_id: group.channel_id.clone(),
                })?;

        let mut document = (*current).clone();
        let mut applied = 0usize;

        for op in &group.ops {
            match op {
                DiffOp::Add { date, event } => {
                    document.day_mut_or_insert(date).upsert_event(event.clone());
                    applied += 1;
                }
                DiffOp::Del { event_id } => {
                    match document.remove_first_event(event_id) {
                        Some(date) => {
                            debug!(
                                channel_id = %group.channel_id,
                                event_id = %event_id,
                                date = %date,
                                "Removed event"
                            );
                        }
                        // Absent id is a no-op by contract
                        None => debug!(
                            channel_id = %group.channel_id,
                            event_id = %event_id,
                            cursor,
                            "Delete for unknown event id, ignoring"
                        ),
                    }
                    applied += 1;
                }
            }
        }

        self.cache.store_schedule(&guard, document);
        Ok(applied)
    }
}

/// Decide whether a polling pass continues.
///
/// The cursor only ever moves forward; a batch with no next token ends the
/// pass, and a token that fails to advance is treated the same way since
/// following it would replay the batch forever.
fn advance_cursor(cursor: Cursor, next: Option<Cursor>) -> Option<Cursor> {
    match next {
        Some(next) if next > cursor => Some(next),
        Some(next) => {
            warn!(cursor, next, "Upstream cursor did not advance, ending pass");
            None
        }
        None => None,
    }
}

/// Initial-cursor policy: wall-clock Unix seconds at loop start.
///
/// See the module docs for the coverage gap this implies.
fn initial_cursor() -> Cursor {
    Utc::now().timestamp().max(0) as Cursor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::{Event, ScheduleDocument};
    use std::time::Duration;

    fn fixture() -> UpdateSynchronizer {
        let config = Config::default();
        let client = Arc::new(UpstreamClient::new(&config.upstream).unwrap());
        let cache = Arc::new(EpgCache::new(Duration::from_millis(100)));
        UpdateSynchronizer::new(client, cache, config.refresh)
    }

    fn event(id: &str, start: &str, end: &str, title: &str) -> Event {
        Event {
            id: id.to_string(),
            start: start.to_string(),
            end: end.to_string(),
            title: title.to_string(),
        }
    }

    async fn seed(sync: &UpdateSynchronizer, doc: ScheduleDocument) {
        let guard = sync.cache.acquire_write("seed").await.unwrap();
        sync.cache.store_schedule(&guard, doc);
    }

    fn ahtv1_baseline() -> ScheduleDocument {
        let mut doc = ScheduleDocument::new("AHTV1", "ahtv1");
        doc.day_mut_or_insert("2017-12-07")
            .upsert_event(event("819448100", "18:00", "18:30", "Evening Report"));
        doc.day_mut_or_insert("2017-12-07")
            .upsert_event(event("819448200", "19:00", "20:00", "Drama"));
        doc
    }

    #[tokio::test]
    async fn test_add_then_del_restores_prior_state() {
        let sync = fixture();
        seed(&sync, ahtv1_baseline()).await;
        let before = sync.cache.schedule("AHTV1").unwrap();

        let add = ChannelDiff {
            channel_id: "AHTV1".to_string(),
            ops: vec![DiffOp::Add {
                date: "2017-12-07".to_string(),
                event: event("819448190", "18:30", "18:58", "News"),
            }],
        };
        sync.apply_channel_diffs(1, &add).await.unwrap();

        let patched = sync.cache.schedule("AHTV1").unwrap();
        let day = patched.day("2017-12-07").unwrap();
        let ids: Vec<&str> = day.events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["819448100", "819448190", "819448200"]);

        let del = ChannelDiff {
            channel_id: "AHTV1".to_string(),
            ops: vec![DiffOp::Del {
                event_id: "819448190".to_string(),
            }],
        };
        sync.apply_channel_diffs(2, &del).await.unwrap();

        assert_eq!(*sync.cache.schedule("AHTV1").unwrap(), *before);
    }

    #[tokio::test]
    async fn test_add_replaces_existing_id_exactly_once() {
        let sync = fixture();
        seed(&sync, ahtv1_baseline()).await;

        let add = ChannelDiff {
            channel_id: "AHTV1".to_string(),
            ops: vec![DiffOp::Add {
                date: "2017-12-07".to_string(),
                event: event("819448100", "17:00", "17:45", "Early Report"),
            }],
        };
        sync.apply_channel_diffs(1, &add).await.unwrap();

        let doc = sync.cache.schedule("AHTV1").unwrap();
        let day = doc.day("2017-12-07").unwrap();
        let matching: Vec<_> = day.events.iter().filter(|e| e.id == "819448100").collect();
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].title, "Early Report");
        assert_eq!(day.events[0].id, "819448100");
    }

    #[tokio::test]
    async fn test_del_for_unknown_id_changes_nothing() {
        let sync = fixture();
        seed(&sync, ahtv1_baseline()).await;
        let before = sync.cache.schedule("AHTV1").unwrap();

        let del = ChannelDiff {
            channel_id: "AHTV1".to_string(),
            ops: vec![DiffOp::Del {
                event_id: "000000000".to_string(),
            }],
        };
        sync.apply_channel_diffs(1, &del).await.unwrap();

        assert_eq!(*sync.cache.schedule("AHTV1").unwrap(), *before);
    }

    #[tokio::test]
    async fn test_diffs_for_uncached_channel_are_skipped() {
        let sync = fixture();

        let add = ChannelDiff {
            channel_id: "NOPE".to_string(),
            ops: vec![DiffOp::Add {
                date: "2017-12-07".to_string(),
                event: event("1", "10:00", "11:00", "Ghost"),
            }],
        };
        let err = sync.apply_channel_diffs(1, &add).await.unwrap_err();
        assert!(matches!(err, SyncError::ScheduleUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_unparsable_add_time_appends() {
        let sync = fixture();
        seed(&sync, ahtv1_baseline()).await;

        let add = ChannelDiff {
            channel_id: "AHTV1".to_string(),
            ops: vec![DiffOp::Add {
                date: "2017-12-07".to_string(),
                event: event("819448999", "late", "later", "Unscheduled"),
            }],
        };
        sync.apply_channel_diffs(1, &add).await.unwrap();

        let doc = sync.cache.schedule("AHTV1").unwrap();
        let day = doc.day("2017-12-07").unwrap();
        assert_eq!(day.events.last().unwrap().id, "819448999");
    }

    #[tokio::test]
    async fn test_batch_continues_past_failing_channel() {
        let sync = fixture();
        seed(&sync, ahtv1_baseline()).await;

        let batch = UpdateBatch {
            groups: vec![
                ChannelDiff {
                    channel_id: "NOPE".to_string(),
                    ops: vec![DiffOp::Del {
                        event_id: "1".to_string(),
                    }],
                },
                ChannelDiff {
                    channel_id: "AHTV1".to_string(),
                    ops: vec![DiffOp::Add {
                        date: "2017-12-07".to_string(),
                        event: event("819448190", "18:30", "18:58", "News"),
                    }],
                },
            ],
            next_cursor: None,
        };
        sync.apply_batch(1, &batch).await;

        let doc = sync.cache.schedule("AHTV1").unwrap();
        assert!(doc
            .day("2017-12-07")
            .unwrap()
            .events
            .iter()
            .any(|e| e.id == "819448190"));
    }

    #[test]
    fn test_cursor_only_moves_forward() {
        assert_eq!(advance_cursor(100, Some(101)), Some(101));
        assert_eq!(advance_cursor(100, Some(100)), None);
        assert_eq!(advance_cursor(100, Some(99)), None);
        assert_eq!(advance_cursor(100, None), None);
    }

    #[test]
    fn test_initial_cursor_is_recent_wall_clock() {
        let before = Utc::now().timestamp() as Cursor;
        let cursor = initial_cursor();
        let after = Utc::now().timestamp() as Cursor;
        assert!(cursor >= before && cursor <= after);
    }
}
