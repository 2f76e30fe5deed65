//! Periodic refresh tasks
//!
//! Two fire-and-forget background loops: the catalog refresh replaces the
//! channel catalog wholesale on a long cadence, and the schedule refresh
//! rebuilds every channel's merged document on a shorter one. Both are
//! explicit loops with sleeps — a failed cycle never recurses into itself,
//! it just shortens the nap. Stale data is preferred over no data: failure
//! paths never touch what is already published.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::cache::EpgCache;
use crate::config::{RefreshConfig, UpstreamConfig};
use crate::errors::AppError;
use crate::merge::merge_cross_midnight;
use crate::upstream::{retry_with_backoff, UpstreamClient};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Replaces the channel catalog on a long interval.
pub struct CatalogRefreshTask {
    client: Arc<UpstreamClient>,
    cache: Arc<EpgCache>,
    refresh: RefreshConfig,
    fetch_attempts: u32,
}

impl CatalogRefreshTask {
    pub fn new(
        client: Arc<UpstreamClient>,
        cache: Arc<EpgCache>,
        refresh: RefreshConfig,
        upstream: &UpstreamConfig,
    ) -> Self {
        Self {
            client,
            cache,
            refresh,
            fetch_attempts: upstream.fetch_attempts,
        }
    }

    pub async fn run(self) {
        info!("Starting catalog refresh task");

        loop {
            match self.refresh_once().await {
                Ok(count) => {
                    info!(
                        channels = count,
                        next_refresh_secs = self.refresh.catalog_interval().as_secs(),
                        "Catalog refresh complete"
                    );
                    sleep(self.refresh.catalog_interval()).await;
                }
                Err(e) => {
                    // Previously published catalog stays untouched
                    warn!(
                        error = %e,
                        retry_secs = self.refresh.catalog_retry().as_secs(),
                        "Catalog refresh failed"
                    );
                    sleep(self.refresh.catalog_retry()).await;
                }
            }
        }
    }

    async fn refresh_once(&self) -> Result<usize, AppError> {
        let channels = retry_with_backoff(self.fetch_attempts, INITIAL_BACKOFF, "catalog", || {
            self.client.fetch_catalog()
        })
        .await?;

        let catalog = crate::models::ChannelCatalog::new(channels);
        let count = catalog.len();

        let guard = self.cache.acquire_write("catalog refresh").await?;
        self.cache.store_catalog(&guard, catalog);
        Ok(count)
    }
}

/// Rebuilds every channel's merged schedule document under the write guard.
pub struct ScheduleRefreshTask {
    client: Arc<UpstreamClient>,
    cache: Arc<EpgCache>,
    refresh: RefreshConfig,
    fetch_attempts: u32,
}

impl ScheduleRefreshTask {
    pub fn new(
        client: Arc<UpstreamClient>,
        cache: Arc<EpgCache>,
        refresh: RefreshConfig,
        upstream: &UpstreamConfig,
    ) -> Self {
        Self {
            client,
            cache,
            refresh,
            fetch_attempts: upstream.fetch_attempts,
        }
    }

    pub async fn run(self) {
        info!("Starting schedule refresh task");

        loop {
            match self.refresh_once().await {
                Ok((refreshed, failed)) => {
                    if failed > 0 {
                        warn!(refreshed, failed, "Schedule refresh finished with failures");
                    } else {
                        info!(refreshed, "Schedule refresh complete");
                    }
                    sleep(self.refresh.schedule_interval()).await;
                }
                Err(e) => {
                    error!(
                        error = %e,
                        retry_secs = self.refresh.schedule_retry().as_secs(),
                        "Schedule refresh cycle abandoned"
                    );
                    sleep(self.refresh.schedule_retry()).await;
                }
            }
        }
    }

    /// One full refresh pass. Gated on a published catalog; holds the write
    /// guard for the whole pass so the update synchronizer cannot interleave
    /// half-refreshed state.
    async fn refresh_once(&self) -> Result<(usize, usize), AppError> {
        let catalog = self
            .cache
            .catalog()
            .ok_or_else(|| AppError::internal("channel catalog not yet published"))?;

        let guard = self.cache.acquire_write("schedule refresh").await?;

        let mut refreshed = 0usize;
        let mut failed = 0usize;
        for channel in &catalog.channels {
            let fetch = retry_with_backoff(self.fetch_attempts, INITIAL_BACKOFF, "schedule", || {
                self.client.fetch_schedule(&channel.id)
            })
            .await;

            match fetch {
                Ok(mut document) => {
                    merge_cross_midnight(&mut document);
                    self.cache.store_schedule(&guard, document);
                    refreshed += 1;
                }
                Err(e) => {
                    // Keep this channel's previous snapshot; a partial
                    // failure never discards good data for other channels
                    warn!(channel_id = %channel.id, error = %e, "Schedule fetch failed, keeping previous snapshot");
                    failed += 1;
                }
            }
        }

        let keep: Vec<String> = catalog.channels.iter().map(|c| c.id.clone()).collect();
        self.cache.retain_channels(&guard, &keep);

        Ok((refreshed, failed))
    }
}
