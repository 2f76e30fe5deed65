use reqwest::Client;
use tracing::{debug, info};
use url::Url;

use crate::config::UpstreamConfig;
use crate::errors::{AppError, FetchError};
use crate::models::{Channel, Cursor, ScheduleDocument, UpdateBatch};

use super::parser;

/// HTTP client for the three upstream EPG calls.
///
/// Every call is one outbound GET with a bounded timeout and carries the
/// shared secret. Calls are idempotent and side-effect-free beyond I/O;
/// retry policy is the caller's concern.
pub struct UpstreamClient {
    client: Client,
    base_url: String,
    secret: String,
    min_body_bytes: usize,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self, AppError> {
        let base_url = config.base_url.trim_end_matches('/').to_string();

        // Validate the base URL once at startup instead of on every call
        Url::parse(&base_url).map_err(|e| {
            AppError::configuration(format!("invalid upstream base URL '{}': {}", base_url, e))
        })?;

        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| AppError::internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            secret: config.secret.clone(),
            min_body_bytes: config.min_body_bytes,
        })
    }

    /// Fetch the full channel catalog.
    pub async fn fetch_catalog(&self) -> Result<Vec<Channel>, FetchError> {
        let url = self.endpoint("channel", &[])?;
        let body = self.get_body(&url).await?;

        let channels = parser::parse_catalog(&body)
            .map_err(|reason| FetchError::malformed(url.as_str(), reason))?;

        info!("Fetched catalog with {} channels", channels.len());
        Ok(channels)
    }

    /// Fetch one channel's raw (unmerged) schedule document.
    pub async fn fetch_schedule(&self, channel_id: &str) -> Result<ScheduleDocument, FetchError> {
        let url = self.endpoint("schedule", &[("id", channel_id)])?;
        let body = self.get_body(&url).await?;

        let document = parser::parse_schedule_document(&body, channel_id)
            .map_err(|reason| FetchError::malformed(url.as_str(), reason))?;

        debug!(
            channel_id,
            days = document.days.len(),
            events = document.total_events(),
            "Fetched schedule document"
        );
        Ok(document)
    }

    /// Fetch the diff batch following `cursor`.
    pub async fn fetch_updates(&self, cursor: Cursor) -> Result<UpdateBatch, FetchError> {
        let url = self.endpoint("update", &[("time", &cursor.to_string())])?;
        let body = self.get_body(&url).await?;

        let batch = parser::parse_update_batch(&body, cursor)
            .map_err(|reason| FetchError::malformed(url.as_str(), reason))?;

        debug!(
            cursor,
            groups = batch.groups.len(),
            next_cursor = ?batch.next_cursor,
            "Fetched update batch"
        );
        Ok(batch)
    }

    fn endpoint(&self, path: &str, extra: &[(&str, &str)]) -> Result<Url, FetchError> {
        let raw = format!("{}/{}", self.base_url, path);
        let mut params = vec![("secret", self.secret.as_str())];
        params.extend_from_slice(extra);

        Url::parse_with_params(&raw, params)
            .map_err(|e| FetchError::malformed(raw.clone(), format!("bad endpoint URL: {}", e)))
    }

    async fn get_body(&self, url: &Url) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FetchError::transient(url.as_str(), e.to_string()))?;

        if !response.status().is_success() {
            return Err(FetchError::transient(
                url.as_str(),
                format!("HTTP {}", response.status()),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::transient(url.as_str(), e.to_string()))?;

        check_viable_size(url.as_str(), &body, self.min_body_bytes)?;
        Ok(body)
    }
}

fn check_viable_size(url: &str, body: &str, min_bytes: usize) -> Result<(), FetchError> {
    if body.len() < min_bytes {
        return Err(FetchError::malformed(
            url,
            format!("body of {} bytes is below minimum of {}", body.len(), min_bytes),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undersized_body_is_malformed() {
        let err = check_viable_size("http://example/EPG/channel", "<channels/>", 64).unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("below minimum"));
    }

    #[test]
    fn test_viable_body_passes_size_check() {
        let body = "x".repeat(64);
        assert!(check_viable_size("http://example/EPG/channel", &body, 64).is_ok());
    }

    #[test]
    fn test_invalid_base_url_fails_construction() {
        let config = UpstreamConfig {
            base_url: "not a url".to_string(),
            secret: "s".to_string(),
            request_timeout_secs: 20,
            min_body_bytes: 64,
            fetch_attempts: 3,
        };
        assert!(UpstreamClient::new(&config).is_err());
    }

    #[test]
    fn test_endpoint_carries_secret_and_params() {
        let config = UpstreamConfig {
            base_url: "http://example/EPG/".to_string(),
            secret: "VYDcCe1s".to_string(),
            request_timeout_secs: 20,
            min_body_bytes: 64,
            fetch_attempts: 3,
        };
        let client = UpstreamClient::new(&config).unwrap();

        let url = client.endpoint("schedule", &[("id", "CCTV1")]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://example/EPG/schedule?secret=VYDcCe1s&id=CCTV1"
        );
    }
}
