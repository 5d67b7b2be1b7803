//! The active-alert set.
//!
//! The manager is the single owner of the product_id → alert map. Every
//! mutation (add, merge, cancel, expire, remove) happens inside one
//! critical section that also emits the lifecycle event, so consumers
//! observe events for any given id in causal order: `added`, then zero or
//! more `updated`, then at most one `removed`, and a snapshot taken between
//! events is always consistent with the events around it.

use crate::alert::{Alert, AlertStatus, Source};
use crate::geo::Polygon;
use crate::vtec::ProductId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Capacity of the lifecycle event channel. A consumer that lags this far
/// behind loses events and should resynchronize from a snapshot.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default bound on the recent-products buffer.
const RECENT_PRODUCTS_CAP: usize = 50;

/// Why an alert left the active set.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoveReason {
    /// Past its expiration time
    Expired,
    /// Terminated by a cancellation product
    Cancelled,
    /// Removed by an operator or collaborator call
    Superseded,
}

impl std::fmt::Display for RemoveReason {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(match self {
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
            Self::Superseded => "superseded",
        })
    }
}

/// A lifecycle transition in the active set.
#[derive(Debug, Clone)]
pub enum AlertEvent {
    /// A new alert entered the active set.
    Added(Arc<Alert>),
    /// An existing alert absorbed a newer product or gained geometry.
    Updated(Arc<Alert>),
    /// An alert left the active set.
    Removed {
        /// The alert as it was at removal.
        alert: Arc<Alert>,
        /// Why it left.
        reason: RemoveReason,
    },
}

impl AlertEvent {
    /// The product id the event concerns.
    pub fn product_id(&self) -> &ProductId {
        match self {
            Self::Added(alert) | Self::Updated(alert) => &alert.product_id,
            Self::Removed { alert, .. } => &alert.product_id,
        }
    }
}

/// A line in the recent-products buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentProduct {
    /// Product id
    pub product_id: ProductId,
    /// Event name
    pub event_name: String,
    /// Headline
    pub headline: String,
    /// Issuance instant
    pub issued_time: Option<DateTime<Utc>>,
    /// Source feed
    pub source: Source,
}

/// Aggregate statistics over the active set.
#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    /// Total active alerts
    pub total_alerts: usize,
    /// Warnings
    pub warnings: usize,
    /// Watches
    pub watches: usize,
    /// Alerts in the life-threatening tier
    pub high_priority: usize,
    /// Counts by phenomenon code
    pub by_phenomenon: HashMap<String, usize>,
    /// Counts by source feed
    pub by_source: HashMap<String, usize>,
}

/// Wire form of the persisted active set.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedAlerts {
    saved_at: DateTime<Utc>,
    alert_count: usize,
    alerts: Vec<Alert>,
}

struct State {
    alerts: HashMap<ProductId, Alert>,
    recent: VecDeque<RecentProduct>,
    events: broadcast::Sender<AlertEvent>,
}

impl State {
    fn emit(&self, event: AlertEvent) {
        // Errors only mean no subscriber is listening right now.
        let _ = self.events.send(event);
    }
}

/// The active-set owner. Cheap to clone; clones share one set.
#[derive(Clone)]
pub struct AlertManager {
    state: Arc<Mutex<State>>,
    persistence_path: Option<PathBuf>,
}

impl AlertManager {
    /// An empty manager, persisting to `persistence_path` when given.
    pub fn new(persistence_path: Option<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(State {
                alerts: HashMap::new(),
                recent: VecDeque::with_capacity(RECENT_PRODUCTS_CAP),
                events,
            })),
            persistence_path,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.lock().events.subscribe()
    }

    /// Add a parsed alert, deduplicating by product id.
    ///
    /// * Known id + cancelled status → remove, `removed(cancelled)`.
    /// * Known id otherwise → merge non-empty fields, `updated`.
    /// * New id + cancelled status → ignored (cancellation for an unknown id).
    /// * New id otherwise → insert, `added`.
    ///
    /// Returns whether the active set changed.
    pub fn add(&self, alert: Alert) -> bool {
        if alert.product_id.as_str().is_empty() {
            tracing::warn!("refusing alert without a product id");
            return false;
        }
        let now = Utc::now();
        let mut state = self.lock();

        if state.alerts.contains_key(&alert.product_id) {
            if alert.status == AlertStatus::Cancelled {
                let mut removed = state.alerts.remove(&alert.product_id).expect("present");
                removed.mark_cancelled(now);
                tracing::info!(product_id = %removed.product_id, "alert cancelled");
                state.emit(AlertEvent::Removed {
                    alert: Arc::new(removed),
                    reason: RemoveReason::Cancelled,
                });
                return true;
            }

            let existing = state.alerts.get_mut(&alert.product_id).expect("present");
            merge(existing, alert);
            existing.mark_updated(now);
            tracing::info!(
                product_id = %existing.product_id,
                update_count = existing.update_count,
                "alert updated"
            );
            let snapshot = Arc::new(existing.clone());
            state.emit(AlertEvent::Updated(snapshot));
            return true;
        }

        if alert.status == AlertStatus::Cancelled {
            tracing::debug!(product_id = %alert.product_id, "cancellation for unknown alert");
            return false;
        }

        tracing::info!(
            product_id = %alert.product_id,
            event = %alert.event_name,
            source = %alert.source,
            "alert added"
        );
        if state.recent.len() == RECENT_PRODUCTS_CAP {
            state.recent.pop_back();
        }
        state.recent.push_front(RecentProduct {
            product_id: alert.product_id.clone(),
            event_name: alert.event_name.clone(),
            headline: alert.headline.clone(),
            issued_time: alert.issued_time,
            source: alert.source,
        });

        let shared = Arc::new(alert.clone());
        state.alerts.insert(alert.product_id.clone(), alert);
        state.emit(AlertEvent::Added(shared));
        true
    }

    /// Remove an alert by id, emitting `removed(reason)`.
    pub fn remove(&self, product_id: &ProductId, reason: RemoveReason) -> bool {
        let now = Utc::now();
        let mut state = self.lock();
        match state.alerts.remove(product_id) {
            Some(mut alert) => {
                match reason {
                    RemoveReason::Expired => alert.mark_expired(now),
                    RemoveReason::Cancelled => alert.mark_cancelled(now),
                    RemoveReason::Superseded => alert.mark_updated(now),
                }
                tracing::info!(product_id = %product_id, %reason, "alert removed");
                state.emit(AlertEvent::Removed {
                    alert: Arc::new(alert),
                    reason,
                });
                true
            }
            None => false,
        }
    }

    /// Fill an empty polygon on a live alert, emitting `updated`. Used by
    /// the geometry resolver; a no-op when the alert already has geometry.
    pub fn backfill_polygon(&self, product_id: &ProductId, polygon: Polygon) -> bool {
        if polygon.is_empty() {
            return false;
        }
        let now = Utc::now();
        let mut state = self.lock();
        let Some(alert) = state.alerts.get_mut(product_id) else {
            return false;
        };
        if !alert.polygon.is_empty() {
            return false;
        }
        alert.centroid = polygon.centroid();
        alert.polygon = polygon;
        alert.mark_updated(now);
        let snapshot = Arc::new(alert.clone());
        state.emit(AlertEvent::Updated(snapshot));
        true
    }

    /// Remove every alert whose expiration has passed. Returns the ids
    /// removed.
    pub fn sweep_expired(&self) -> Vec<ProductId> {
        let now = Utc::now();
        let mut state = self.lock();

        let expired: Vec<ProductId> = state
            .alerts
            .values()
            .filter(|alert| alert.is_expired(now))
            .map(|alert| alert.product_id.clone())
            .collect();

        for product_id in &expired {
            if let Some(mut alert) = state.alerts.remove(product_id) {
                alert.mark_expired(now);
                tracing::info!(product_id = %product_id, "alert expired");
                state.emit(AlertEvent::Removed {
                    alert: Arc::new(alert),
                    reason: RemoveReason::Expired,
                });
            }
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "expiration sweep removed alerts");
        }
        expired
    }

    /// Run the expiration sweep every `interval_seconds` until `shutdown`
    /// resolves.
    pub async fn run_sweeper(&self, interval_seconds: u32, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let period = std::time::Duration::from_secs(interval_seconds.max(1) as u64);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // immediate first tick
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_expired();
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// One alert by id.
    pub fn get(&self, product_id: &ProductId) -> Option<Alert> {
        self.lock().alerts.get(product_id).cloned()
    }

    /// Number of active alerts.
    pub fn len(&self) -> usize {
        self.lock().alerts.len()
    }

    /// Whether the active set is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().alerts.is_empty()
    }

    /// All active alerts, unsorted.
    pub fn all(&self) -> Vec<Alert> {
        self.lock().alerts.values().cloned().collect()
    }

    /// Active alerts sorted by priority ascending, then issuance descending.
    pub fn sorted(&self) -> Vec<Alert> {
        let mut alerts = self.all();
        alerts.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| b.issued_time.cmp(&a.issued_time))
        });
        alerts
    }

    /// Alerts whose phenomenon matches `phenomenon`.
    pub fn by_phenomenon(&self, phenomenon: &str) -> Vec<Alert> {
        self.lock()
            .alerts
            .values()
            .filter(|alert| alert.phenomenon.eq_ignore_ascii_case(phenomenon))
            .cloned()
            .collect()
    }

    /// Alerts covering any UGC in `state` (2-letter prefix).
    pub fn by_state(&self, state: &str) -> Vec<Alert> {
        self.lock()
            .alerts
            .values()
            .filter(|alert| {
                alert
                    .affected_areas
                    .iter()
                    .any(|code| code.state().eq_ignore_ascii_case(state))
            })
            .cloned()
            .collect()
    }

    /// Counts by phenomenon code.
    pub fn counts_by_phenomenon(&self) -> HashMap<String, usize> {
        let state = self.lock();
        let mut counts = HashMap::new();
        for alert in state.alerts.values() {
            let key = if alert.phenomenon.is_empty() {
                "UNKNOWN".to_owned()
            } else {
                alert.phenomenon.clone()
            };
            *counts.entry(key).or_insert(0) += 1;
        }
        counts
    }

    /// The most recent products, newest first, up to `limit`.
    pub fn recent_products(&self, limit: usize) -> Vec<RecentProduct> {
        self.lock().recent.iter().take(limit).cloned().collect()
    }

    /// Aggregate statistics over the active set.
    pub fn statistics(&self) -> Statistics {
        let state = self.lock();
        let alerts: Vec<&Alert> = state.alerts.values().collect();

        let mut by_phenomenon: HashMap<String, usize> = HashMap::new();
        let mut by_source: HashMap<String, usize> = HashMap::new();
        for alert in &alerts {
            let key = if alert.phenomenon.is_empty() {
                "UNKNOWN".to_owned()
            } else {
                alert.phenomenon.clone()
            };
            *by_phenomenon.entry(key).or_insert(0) += 1;
            *by_source.entry(alert.source.to_string()).or_insert(0) += 1;
        }

        Statistics {
            total_alerts: alerts.len(),
            warnings: alerts.iter().filter(|a| a.is_warning()).count(),
            watches: alerts.iter().filter(|a| a.is_watch()).count(),
            high_priority: alerts.iter().filter(|a| a.is_high_priority()).count(),
            by_phenomenon,
            by_source,
        }
    }

    /// Save the active set to the configured path.
    pub fn save(&self) {
        let Some(path) = self.persistence_path.clone() else {
            return;
        };
        let state = self.lock();
        let document = PersistedAlerts {
            saved_at: Utc::now(),
            alert_count: state.alerts.len(),
            alerts: state.alerts.values().cloned().collect(),
        };
        drop(state);

        if let Err(error) = write_json(&path, &document) {
            tracing::error!(%error, path = %path.display(), "failed to save alerts");
        } else {
            tracing::info!(
                count = document.alert_count,
                path = %path.display(),
                "saved active alerts"
            );
        }
    }

    /// Load the active set from the configured path, dropping alerts that
    /// expired while the service was down. A missing or unreadable file
    /// starts the service empty. Returns the number loaded.
    ///
    /// Intended to run before any subscriber can connect; loading does not
    /// emit events.
    pub fn load(&self) -> usize {
        let Some(path) = self.persistence_path.clone() else {
            return 0;
        };
        let document: PersistedAlerts = match read_json(&path) {
            Some(document) => document,
            None => return 0,
        };

        let now = Utc::now();
        let mut state = self.lock();
        let mut loaded = 0;
        for alert in document.alerts {
            if alert.is_expired(now) {
                tracing::debug!(product_id = %alert.product_id, "dropping expired persisted alert");
                continue;
            }
            state.alerts.insert(alert.product_id.clone(), alert);
            loaded += 1;
        }
        tracing::info!(count = loaded, path = %path.display(), "loaded persisted alerts");
        loaded
    }
}

/// Merge a newer product into the stored record: any non-empty incoming
/// field wins; empty fields leave the stored value alone.
fn merge(existing: &mut Alert, incoming: Alert) {
    if !incoming.headline.is_empty() {
        existing.headline = incoming.headline;
    }
    if !incoming.description.is_empty() {
        existing.description = incoming.description;
    }
    if !incoming.instruction.is_empty() {
        existing.instruction = incoming.instruction;
    }
    if incoming.expiration_time.is_some() {
        existing.expiration_time = incoming.expiration_time;
    }
    if incoming.message_expires.is_some() {
        existing.message_expires = incoming.message_expires;
    }
    if incoming.issued_time.is_some() {
        existing.issued_time = incoming.issued_time;
    }
    if !incoming.polygon.is_empty() {
        existing.polygon = incoming.polygon;
        existing.centroid = incoming.centroid;
    }
    if !incoming.threat.is_empty() {
        existing.threat = incoming.threat;
    }
    if !incoming.affected_areas.is_empty() {
        // A watch grows as more offices echo it.
        for code in incoming.affected_areas {
            if !existing.affected_areas.contains(&code) {
                existing.affected_areas.push(code);
            }
        }
        existing.affected_areas.sort();
    }
    if !incoming.fips_codes.is_empty() {
        for fips in incoming.fips_codes {
            if !existing.fips_codes.contains(&fips) {
                existing.fips_codes.push(fips);
            }
        }
        existing.fips_codes.sort();
    }
    if incoming.vtec.is_some() {
        existing.vtec = incoming.vtec;
    }
    if incoming.hvtec.is_some() {
        existing.hvtec = incoming.hvtec;
    }
    existing.status = AlertStatus::Updated;
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_string_pretty(value)?;
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
    use crate::alert::Source;
    use crate::vtec::Significance;

    fn alert(id: &str) -> Alert {
        let mut alert = Alert::new(Source::Nwws, Utc::now());
        alert.product_id = ProductId::new(id);
        alert.phenomenon = "TO".to_owned();
        alert.significance = Significance::Warning;
        alert.event_name = "Tornado Warning".to_owned();
        alert.priority = crate::alert::Priority::derive("TO", Significance::Warning);
        alert
    }

    #[test]
    fn add_then_update_then_cancel() {
        let manager = AlertManager::new(None);
        let mut events = manager.subscribe();

        assert!(manager.add(alert("TO.CLE.0001")));
        assert_eq!(manager.len(), 1);

        let mut update = alert("TO.CLE.0001");
        update.headline = "updated headline".to_owned();
        assert!(manager.add(update));
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.get(&"TO.CLE.0001".into()).unwrap().update_count, 1);
        assert_eq!(
            manager.get(&"TO.CLE.0001".into()).unwrap().headline,
            "updated headline"
        );

        let mut cancel = alert("TO.CLE.0001");
        cancel.status = AlertStatus::Cancelled;
        assert!(manager.add(cancel));
        assert!(manager.is_empty());

        assert!(matches!(events.try_recv().unwrap(), AlertEvent::Added(_)));
        assert!(matches!(events.try_recv().unwrap(), AlertEvent::Updated(_)));
        assert!(matches!(
            events.try_recv().unwrap(),
            AlertEvent::Removed {
                reason: RemoveReason::Cancelled,
                ..
            }
        ));
    }

    #[test]
    fn cancellation_for_unknown_id_is_noop() {
        let manager = AlertManager::new(None);
        let mut events = manager.subscribe();

        let mut cancel = alert("TO.CLE.0009");
        cancel.status = AlertStatus::Cancelled;
        assert!(!manager.add(cancel));
        assert!(manager.is_empty());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn watch_products_from_two_offices_merge() {
        let manager = AlertManager::new(None);

        let mut first = alert("TOA.0150");
        first.significance = Significance::Watch;
        first.affected_areas = vec!["OHC049".parse().unwrap()];
        manager.add(first);

        let mut second = alert("TOA.0150");
        second.significance = Significance::Watch;
        second.affected_areas = vec!["INC001".parse().unwrap()];
        manager.add(second);

        assert_eq!(manager.len(), 1);
        let merged = manager.get(&"TOA.0150".into()).unwrap();
        let areas: Vec<&str> = merged.affected_areas.iter().map(|c| c.as_str()).collect();
        assert_eq!(areas, ["INC001", "OHC049"]);
    }

    #[test]
    fn expiration_sweep() {
        let manager = AlertManager::new(None);
        let mut events = manager.subscribe();

        let mut stale = alert("TO.CLE.0002");
        stale.expiration_time = Some(Utc::now() - chrono::Duration::seconds(1));
        manager.add(stale);

        let mut fresh = alert("TO.CLE.0003");
        fresh.expiration_time = Some(Utc::now() + chrono::Duration::hours(1));
        manager.add(fresh);

        let removed = manager.sweep_expired();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].as_str(), "TO.CLE.0002");
        assert_eq!(manager.len(), 1);

        let _ = events.try_recv().unwrap(); // added
        let _ = events.try_recv().unwrap(); // added
        assert!(matches!(
            events.try_recv().unwrap(),
            AlertEvent::Removed {
                reason: RemoveReason::Expired,
                ..
            }
        ));
    }

    #[test]
    fn sorted_orders_by_priority_then_recency() {
        let manager = AlertManager::new(None);

        let mut advisory = alert("WW.CLE.0001");
        advisory.phenomenon = "WW".to_owned();
        advisory.priority = crate::alert::Priority::derive("WW", Significance::Advisory);
        advisory.issued_time = Some(Utc::now());
        manager.add(advisory);

        let mut tornado = alert("TO.CLE.0004");
        tornado.issued_time = Some(Utc::now() - chrono::Duration::minutes(10));
        manager.add(tornado);

        let sorted = manager.sorted();
        assert_eq!(sorted[0].product_id.as_str(), "TO.CLE.0004");
    }

    #[test]
    fn backfill_polygon_only_fills_empty() {
        use crate::geo::{Point, Ring};
        let manager = AlertManager::new(None);
        manager.add(alert("TO.CLE.0005"));

        let ring = Ring::closing(vec![
            Point::new(41.0, -83.0).unwrap(),
            Point::new(41.1, -82.9).unwrap(),
            Point::new(41.2, -82.8).unwrap(),
        ])
        .unwrap();

        assert!(manager.backfill_polygon(&"TO.CLE.0005".into(), Polygon::from(ring.clone())));
        // Second attempt is a no-op: the polygon is no longer empty.
        assert!(!manager.backfill_polygon(&"TO.CLE.0005".into(), Polygon::from(ring)));
    }

    #[test]
    fn persistence_round_trip_drops_expired() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("active_alerts.json");

        let manager = AlertManager::new(Some(path.clone()));
        let mut live = alert("TO.CLE.0006");
        live.expiration_time = Some(Utc::now() + chrono::Duration::hours(1));
        manager.add(live);
        let mut stale = alert("TO.CLE.0007");
        stale.expiration_time = Some(Utc::now() - chrono::Duration::hours(1));
        manager.add(stale);
        manager.save();

        let restored = AlertManager::new(Some(path));
        assert_eq!(restored.load(), 1);
        assert!(restored.get(&"TO.CLE.0006".into()).is_some());
        assert!(restored.get(&"TO.CLE.0007".into()).is_none());
    }

    #[test]
    fn recent_products_bounded() {
        let manager = AlertManager::new(None);
        for i in 0..60 {
            manager.add(alert(&format!("TO.CLE.{i:04}")));
        }
        let recent = manager.recent_products(100);
        assert_eq!(recent.len(), RECENT_PRODUCTS_CAP);
        assert_eq!(recent[0].product_id.as_str(), "TO.CLE.0059");
    }

    #[test]
    fn queries_by_state_and_phenomenon() {
        let manager = AlertManager::new(None);
        let mut ohio = alert("TO.CLE.0010");
        ohio.affected_areas = vec!["OHC049".parse().unwrap()];
        manager.add(ohio);
        let mut indiana = alert("SV.IND.0011");
        indiana.phenomenon = "SV".to_owned();
        indiana.affected_areas = vec!["INC001".parse().unwrap()];
        manager.add(indiana);

        assert_eq!(manager.by_state("OH").len(), 1);
        assert_eq!(manager.by_state("in").len(), 1);
        assert_eq!(manager.by_state("CA").len(), 0);
        assert_eq!(manager.by_phenomenon("SV").len(), 1);
        assert_eq!(manager.counts_by_phenomenon().get("TO"), Some(&1));
    }

    #[test]
    fn statistics_split() {
        let manager = AlertManager::new(None);
        manager.add(alert("TO.CLE.0008"));
        let mut watch = alert("TOA.0151");
        watch.significance = Significance::Watch;
        manager.add(watch);

        let stats = manager.statistics();
        assert_eq!(stats.total_alerts, 2);
        assert_eq!(stats.warnings, 1);
        assert_eq!(stats.watches, 1);
        assert_eq!(stats.by_phenomenon.get("TO"), Some(&2));
    }
}
