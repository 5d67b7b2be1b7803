//! Zone and county geometry resolution.
//!
//! Watches and advisories arrive without a storm polygon; their footprint is
//! the union of their UGC zones. This resolver fetches each zone's boundary
//! from the REST API, converts it to `[lat, lon]` rings, and caches the
//! answer, including "this zone has no geometry", for a day. A per-code
//! lock guarantees at most one in-flight fetch per UGC no matter how many
//! alerts ask at once.

use crate::alert::Alert;
use crate::geo::Polygon;
use crate::rest::RestClient;
use crate::ugc::UgcCode;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};

/// Bound on concurrent geometry fetches during a multi-zone resolve.
const DEFAULT_FETCH_CONCURRENCY: usize = 10;

/// One cached answer: the zone's rings, or `None` for "known absent".
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    geometry: Option<Polygon>,
    cached_at: DateTime<Utc>,
}

/// Wire form of the persisted cache file.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedCache {
    saved_at: DateTime<Utc>,
    entries: HashMap<String, CacheEntry>,
}

/// Fetches and caches zone/county boundary geometry.
pub struct GeometryResolver {
    rest: Arc<RestClient>,
    ttl: Duration,
    persistence_path: Option<PathBuf>,
    cache: Mutex<HashMap<UgcCode, CacheEntry>>,
    /// Per-code coalescing locks; holders of a code's lock are the only task
    /// allowed to fetch that code.
    in_flight: Mutex<HashMap<UgcCode, Arc<Mutex<()>>>>,
    fetch_permits: Semaphore,
}

impl GeometryResolver {
    /// Build a resolver over `rest` with entries valid for `ttl_hours`.
    pub fn new(rest: Arc<RestClient>, ttl_hours: u32, persistence_path: Option<PathBuf>) -> Self {
        Self {
            rest,
            ttl: Duration::hours(ttl_hours as i64),
            persistence_path,
            cache: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            fetch_permits: Semaphore::new(DEFAULT_FETCH_CONCURRENCY),
        }
    }

    /// Resolve one UGC code to its rings, or `None` when the zone has no
    /// usable geometry. Concurrent callers for the same code share a single
    /// request; results (including negatives) are cached for the TTL.
    pub async fn resolve(&self, code: &UgcCode) -> Option<Polygon> {
        if let Some(entry) = self.cached(code).await {
            return entry;
        }

        // Take the per-code lock, then re-check: whoever held it before us
        // has already filled the cache.
        let key_lock = {
            let mut in_flight = self.in_flight.lock().await;
            in_flight.entry(code.clone()).or_default().clone()
        };
        let _held = key_lock.lock().await;

        if let Some(entry) = self.cached(code).await {
            return entry;
        }

        let fetched = {
            let _permit = self.fetch_permits.acquire().await.ok()?;
            self.fetch(code).await
        };

        self.cache.lock().await.insert(
            code.clone(),
            CacheEntry {
                geometry: fetched.clone(),
                cached_at: Utc::now(),
            },
        );

        // Drop the map entry so the table does not grow without bound.
        self.in_flight.lock().await.remove(code);

        fetched
    }

    /// Cache lookup honoring the TTL. `Some(None)` means a valid negative
    /// entry; `None` means a fetch is needed.
    async fn cached(&self, code: &UgcCode) -> Option<Option<Polygon>> {
        let cache = self.cache.lock().await;
        let entry = cache.get(code)?;
        if Utc::now() - entry.cached_at < self.ttl {
            Some(entry.geometry.clone())
        } else {
            None
        }
    }

    async fn fetch(&self, code: &UgcCode) -> Option<Polygon> {
        let result = if code.is_zone() {
            self.rest.get_zone_geometry(code.as_str()).await
        } else {
            self.rest.get_county_geometry(code.as_str()).await
        };

        match result {
            Ok(Some(geometry)) => {
                let polygon = crate::geo::polygon_from_geojson(&geometry);
                if polygon.is_empty() {
                    tracing::debug!(code = code.as_str(), "zone geometry had no usable rings");
                    None
                } else {
                    tracing::debug!(
                        code = code.as_str(),
                        rings = polygon.rings().len(),
                        "fetched zone geometry"
                    );
                    Some(polygon)
                }
            }
            Ok(None) => {
                tracing::debug!(code = code.as_str(), "no geometry available");
                None
            }
            Err(error) => {
                tracing::warn!(code = code.as_str(), %error, "zone geometry fetch failed");
                None
            }
        }
    }

    /// Resolve several codes, sharing the bounded-concurrency permits.
    pub async fn resolve_many(&self, codes: &[UgcCode]) -> HashMap<UgcCode, Polygon> {
        let results = futures::future::join_all(
            codes
                .iter()
                .map(|code| async move { (code.clone(), self.resolve(code).await) }),
        )
        .await;

        results
            .into_iter()
            .filter_map(|(code, polygon)| polygon.map(|p| (code, p)))
            .collect()
    }

    /// Fill an alert's polygon from its zones. A no-op when the alert
    /// already has geometry; this resolver only ever fills an empty polygon.
    pub async fn populate(&self, alert: &mut Alert) -> bool {
        if !alert.polygon.is_empty() || alert.affected_areas.is_empty() {
            return false;
        }

        let resolved = self.resolve_many(&alert.affected_areas.clone()).await;
        if resolved.is_empty() {
            return false;
        }

        let mut combined = Polygon::empty();
        // Deterministic ring order: follow the alert's own area order.
        for code in &alert.affected_areas {
            if let Some(polygon) = resolved.get(code) {
                combined.extend(polygon.clone());
            }
        }
        tracing::debug!(
            product_id = %alert.product_id,
            rings = combined.rings().len(),
            "populated alert geometry from zones"
        );
        alert.polygon = combined;
        alert.centroid = alert.polygon.centroid();
        true
    }

    /// Number of live (unexpired) cache entries.
    pub async fn cached_entries(&self) -> usize {
        let cache = self.cache.lock().await;
        let now = Utc::now();
        cache
            .values()
            .filter(|entry| now - entry.cached_at < self.ttl)
            .count()
    }

    /// Save the cache to its configured path.
    pub async fn save(&self) {
        let Some(path) = self.persistence_path.clone() else {
            return;
        };
        let entries: HashMap<String, CacheEntry> = self
            .cache
            .lock()
            .await
            .iter()
            .map(|(code, entry)| (code.as_str().to_owned(), entry.clone()))
            .collect();

        let document = PersistedCache {
            saved_at: Utc::now(),
            entries,
        };
        if let Err(error) = write_json(&path, &document) {
            tracing::error!(%error, path = %path.display(), "failed to save geometry cache");
        } else {
            tracing::info!(
                count = document.entries.len(),
                path = %path.display(),
                "saved geometry cache"
            );
        }
    }

    /// Load the cache from its configured path, discarding expired entries.
    /// A missing or unreadable file leaves the cache empty.
    pub async fn load(&self) -> usize {
        let Some(path) = self.persistence_path.clone() else {
            return 0;
        };
        let document: PersistedCache = match read_json(&path) {
            Some(document) => document,
            None => return 0,
        };

        let now = Utc::now();
        let mut cache = self.cache.lock().await;
        let mut loaded = 0;
        for (raw, entry) in document.entries {
            if now - entry.cached_at >= self.ttl {
                continue;
            }
            if let Ok(code) = raw.parse::<UgcCode>() {
                cache.insert(code, entry);
                loaded += 1;
            }
        }
        tracing::info!(count = loaded, path = %path.display(), "loaded geometry cache");
        loaded
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_string(value)?;
    std::fs::write(path, body)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let raw = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(error) => {
            tracing::error!(%error, path = %path.display(), "unreadable state file, starting empty");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{Point, Ring};

    fn resolver(path: Option<PathBuf>) -> GeometryResolver {
        let rest = Arc::new(RestClient::new("https://api.weather.gov", "test/1.0").unwrap());
        GeometryResolver::new(rest, 24, path)
    }

    fn ring() -> Ring {
        Ring::closing(vec![
            Point::new(41.0, -83.0).unwrap(),
            Point::new(41.1, -82.9).unwrap(),
            Point::new(41.2, -82.8).unwrap(),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn populate_skips_alerts_with_geometry() {
        let resolver = resolver(None);
        let mut alert = Alert::new(crate::alert::Source::Api, Utc::now());
        alert.polygon = Polygon::from(ring());
        assert!(!resolver.populate(&mut alert).await);
    }

    #[tokio::test]
    async fn cache_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zone_geometry.json");

        let first = resolver(Some(path.clone()));
        first.cache.lock().await.insert(
            "OHZ049".parse().unwrap(),
            CacheEntry {
                geometry: Some(Polygon::from(ring())),
                cached_at: Utc::now(),
            },
        );
        // Negative entries persist too.
        first.cache.lock().await.insert(
            "OHZ050".parse().unwrap(),
            CacheEntry {
                geometry: None,
                cached_at: Utc::now(),
            },
        );
        first.save().await;

        let second = resolver(Some(path));
        assert_eq!(second.load().await, 2);
        let cached = second.cached(&"OHZ049".parse().unwrap()).await.unwrap();
        assert!(cached.is_some());
        let negative = second.cached(&"OHZ050".parse().unwrap()).await.unwrap();
        assert!(negative.is_none());
    }

    #[tokio::test]
    async fn expired_entries_dropped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zone_geometry.json");

        let first = resolver(Some(path.clone()));
        first.cache.lock().await.insert(
            "OHZ049".parse().unwrap(),
            CacheEntry {
                geometry: Some(Polygon::from(ring())),
                cached_at: Utc::now() - Duration::hours(48),
            },
        );
        first.save().await;

        let second = resolver(Some(path));
        assert_eq!(second.load().await, 0);
    }
}
