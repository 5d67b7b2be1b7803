//! api.weather.gov client.
//!
//! A thin GET client with the manners the NWS API requires: an identifying
//! User-Agent, `application/geo+json`, at least a second between requests,
//! and exponential backoff on 429/5xx. Transport failures are handled here
//! and never propagate past the ingest loop.

use crate::parser::AlertFeature;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::StatusCode;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

const ACCEPT_GEOJSON: &str = "application/geo+json";
const MIN_REQUEST_INTERVAL: Duration = Duration::from_secs(1);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const RETRY_BASE_DELAY: Duration = Duration::from_secs(2);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);
const MAX_ATTEMPTS: u32 = 3;

/// The error returned when a request ultimately fails.
#[derive(thiserror::Error, Debug)]
pub enum RestError {
    /// The base URL or a path segment did not form a valid URL
    #[error("invalid request URL: {0}")]
    Url(String),

    /// The transport failed after all retry attempts
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server kept answering with a retryable status
    #[error("server answered {status} after {attempts} attempts")]
    ExhaustedRetries {
        /// Last status observed
        status: StatusCode,
        /// Attempts made
        attempts: u32,
    },
}

/// Rate-limited client for the NWS REST API.
pub struct RestClient {
    client: reqwest::Client,
    base_url: Url,
    last_request: Mutex<Option<Instant>>,
}

impl RestClient {
    /// Build a client for `base_url`, identifying as `user_agent`.
    pub fn new(base_url: &str, user_agent: &str) -> Result<Self, RestError> {
        let base_url = Url::parse(base_url).map_err(|e| RestError::Url(e.to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent)
                .map_err(|_| RestError::Url("user agent is not a valid header".to_owned()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_GEOJSON));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url,
            last_request: Mutex::new(None),
        })
    }

    /// Active alerts, optionally narrowed by `area` (2-letter state) and
    /// `event` (event name).
    pub async fn list_active_alerts(
        &self,
        area: Option<&str>,
        event: Option<&str>,
    ) -> Result<Vec<AlertFeature>, RestError> {
        #[derive(serde::Deserialize)]
        struct FeatureCollection {
            #[serde(default)]
            features: Vec<AlertFeature>,
        }

        let mut url = self.join(&["alerts", "active"])?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(area) = area {
                query.append_pair("area", area);
            }
            if let Some(event) = event {
                query.append_pair("event", event);
            }
        }

        let collection: FeatureCollection = self.get_json(url).await?;
        tracing::info!(count = collection.features.len(), "fetched active alerts");
        Ok(collection.features)
    }

    /// One alert by its upstream id.
    pub async fn get_alert(&self, id: &str) -> Result<AlertFeature, RestError> {
        let id = id.rsplit(':').next().unwrap_or(id);
        let url = self.join(&["alerts", id])?;
        self.get_json(url).await
    }

    /// GeoJSON geometry of a forecast zone, `None` when the zone has none.
    pub async fn get_zone_geometry(
        &self,
        zone_id: &str,
    ) -> Result<Option<serde_json::Value>, RestError> {
        let url = self.join(&["zones", "forecast", zone_id])?;
        self.get_geometry(url).await
    }

    /// GeoJSON geometry of a county, `None` when the county has none.
    pub async fn get_county_geometry(
        &self,
        county_id: &str,
    ) -> Result<Option<serde_json::Value>, RestError> {
        let url = self.join(&["zones", "county", county_id])?;
        self.get_geometry(url).await
    }

    async fn get_geometry(&self, url: Url) -> Result<Option<serde_json::Value>, RestError> {
        #[derive(serde::Deserialize)]
        struct ZoneDocument {
            #[serde(default)]
            geometry: Option<serde_json::Value>,
        }

        let document: ZoneDocument = self.get_json(url).await?;
        Ok(document.geometry.filter(|g| !g.is_null()))
    }

    fn join(&self, segments: &[&str]) -> Result<Url, RestError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RestError::Url("base URL cannot be a base".to_owned()))?
            .extend(segments);
        Ok(url)
    }

    /// GET with rate limiting and retry. 429 and 5xx back off exponentially
    /// (2 s, 4 s, capped at 30 s) for up to three attempts; other failures
    /// surface immediately.
    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, RestError> {
        let mut delay = RETRY_BASE_DELAY;
        let mut last_status = StatusCode::OK;

        for attempt in 1..=MAX_ATTEMPTS {
            self.pace().await;

            let result = self.client.get(url.clone()).send().await;
            match result {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        tracing::warn!(%url, %status, attempt, "retryable API status");
                        last_status = status;
                    } else {
                        return Ok(response.error_for_status()?.json().await?);
                    }
                }
                Err(error) if attempt < MAX_ATTEMPTS && is_retryable(&error) => {
                    tracing::warn!(%url, %error, attempt, "retryable transport failure");
                }
                Err(error) => return Err(error.into()),
            }

            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(RETRY_MAX_DELAY);
            }
        }

        Err(RestError::ExhaustedRetries {
            status: last_status,
            attempts: MAX_ATTEMPTS,
        })
    }

    /// Enforce the minimum interval between requests.
    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < MIN_REQUEST_INTERVAL {
                tokio::time::sleep(MIN_REQUEST_INTERVAL - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

fn is_retryable(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_join_cleanly() {
        let client = RestClient::new("https://api.weather.gov", "test/1.0").unwrap();
        let url = client.join(&["zones", "forecast", "OHZ049"]).unwrap();
        assert_eq!(url.as_str(), "https://api.weather.gov/zones/forecast/OHZ049");
    }

    #[test]
    fn invalid_base_url_rejected() {
        assert!(RestClient::new("not a url", "test/1.0").is_err());
    }

    #[tokio::test]
    async fn pacing_enforces_interval() {
        tokio::time::pause();
        let client = RestClient::new("https://api.weather.gov", "test/1.0").unwrap();

        let start = Instant::now();
        client.pace().await;
        client.pace().await;
        assert!(start.elapsed() >= MIN_REQUEST_INTERVAL);
    }
}
