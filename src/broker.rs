//! Subscriber fan-out.
//!
//! The broker owns subscriber sessions and pushes alert lifecycle events to
//! them. A session is transport-agnostic: the embedding application (which
//! owns the actual WebSocket endpoint) registers a bounded outbound channel,
//! pumps serialized envelopes from it to the peer, and feeds inbound frames
//! to [`Broker::handle_message`]. A full channel or a dropped receiver is a
//! write failure, and write failures kill exactly that session.
//!
//! Outbound envelopes are serialized once per broadcast and shared across
//! sessions.

use crate::alert::Alert;
use crate::manager::{AlertEvent, AlertManager, RemoveReason};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Outbound envelopes queued per session before the peer counts as hung.
pub const SESSION_BUFFER: usize = 64;

/// A subscriber session id.
pub type SessionId = u64;

/// Message types pushed to subscribers.
mod outbound {
    pub const ALERT_NEW: &str = "alert_new";
    pub const ALERT_UPDATE: &str = "alert_update";
    pub const ALERT_REMOVE: &str = "alert_remove";
    pub const ALERT_BULK: &str = "alert_bulk";
    pub const SYSTEM_STATUS: &str = "system_status";
    pub const CONNECTION_ACK: &str = "connection_ack";
    pub const ERROR: &str = "error";
    pub const PONG: &str = "pong";
}

/// A custom inbound handler registered by a collaborator.
pub type MessageHandler = Arc<dyn Fn(SessionId, serde_json::Value) + Send + Sync>;

struct Session {
    outbound: mpsc::Sender<String>,
    topics: HashSet<String>,
    /// Ids this session knows about, via its snapshot or an `alert_new`.
    /// Gates updates/removals so every session sees a clean
    /// added → updated* → removed sequence.
    seen: HashSet<String>,
    last_ping: Option<chrono::DateTime<chrono::Utc>>,
}

struct BrokerState {
    sessions: HashMap<SessionId, Session>,
    handlers: HashMap<String, MessageHandler>,
}

/// The fan-out broker. Cheap to clone; clones share one session table.
#[derive(Clone)]
pub struct Broker {
    state: Arc<Mutex<BrokerState>>,
    manager: AlertManager,
    next_session_id: Arc<AtomicU64>,
}

impl Broker {
    /// Build a broker over the manager whose snapshots and statistics it
    /// serves.
    pub fn new(manager: AlertManager) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                sessions: HashMap::new(),
                handlers: HashMap::new(),
            })),
            manager,
            next_session_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a handler for a custom inbound message type.
    pub fn register_handler<F>(&self, message_type: &str, handler: F)
    where
        F: Fn(SessionId, serde_json::Value) + Send + Sync + 'static,
    {
        self.lock()
            .handlers
            .insert(message_type.to_owned(), Arc::new(handler));
    }

    /// Accept a new subscriber.
    ///
    /// Returns the assigned session id and the receiving half of the
    /// session's outbound channel. The caller pumps that receiver to the
    /// peer. The new session is immediately sent a `connection_ack` and an
    /// `alert_bulk` snapshot of the active set; it will never receive an
    /// `alert_new` for an id already included in that snapshot.
    pub fn connect(&self) -> (SessionId, mpsc::Receiver<String>) {
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SESSION_BUFFER);

        // Snapshot under the session lock so no broadcast lands between the
        // snapshot and the session becoming visible.
        let mut state = self.lock();
        let snapshot = self.manager.sorted();

        let mut session = Session {
            outbound: tx,
            topics: HashSet::new(),
            seen: snapshot
                .iter()
                .map(|alert| alert.product_id.as_str().to_owned())
                .collect(),
            last_ping: None,
        };

        let ack = envelope(
            outbound::CONNECTION_ACK,
            json!({
                "session_id": session_id,
                "server_time": Utc::now().to_rfc3339(),
            }),
        );
        let bulk = envelope(
            outbound::ALERT_BULK,
            json!({
                "count": snapshot.len(),
                "alerts": snapshot,
            }),
        );
        let alive = try_send(&mut session, session_id, &ack)
            && try_send(&mut session, session_id, &bulk);
        if alive {
            state.sessions.insert(session_id, session);
            tracing::info!(session_id, total = state.sessions.len(), "subscriber connected");
        }

        (session_id, rx)
    }

    /// Drop a session and its state.
    pub fn disconnect(&self, session_id: SessionId) {
        let mut state = self.lock();
        if state.sessions.remove(&session_id).is_some() {
            tracing::info!(
                session_id,
                total = state.sessions.len(),
                "subscriber disconnected"
            );
        }
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    /// When a session last pinged, for transport-level health checks.
    pub fn last_ping(&self, session_id: SessionId) -> Option<chrono::DateTime<Utc>> {
        self.lock().sessions.get(&session_id)?.last_ping
    }

    /// Handle one inbound frame from a session.
    pub fn handle_message(&self, session_id: SessionId, raw: &str) {
        let parsed: serde_json::Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(session_id, %error, "invalid JSON from subscriber");
                self.send_to(session_id, outbound::ERROR, json!({"error": "invalid JSON"}));
                return;
            }
        };

        let message_type = parsed
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_owned();
        let data = parsed.get("data").cloned().unwrap_or(json!({}));

        match message_type.as_str() {
            "ping" => {
                if let Some(session) = self.lock().sessions.get_mut(&session_id) {
                    session.last_ping = Some(Utc::now());
                }
                self.send_to(
                    session_id,
                    outbound::PONG,
                    json!({"timestamp": Utc::now().to_rfc3339()}),
                );
            }
            "subscribe" => self.update_topics(session_id, &data, true),
            "unsubscribe" => self.update_topics(session_id, &data, false),
            "get_alerts" => {
                let alerts = self.manager.sorted();
                self.send_to(
                    session_id,
                    outbound::ALERT_BULK,
                    json!({"count": alerts.len(), "alerts": alerts}),
                );
            }
            "get_status" => {
                let status = json!({
                    "connected_clients": self.session_count(),
                    "statistics": self.manager.statistics(),
                    "server_time": Utc::now().to_rfc3339(),
                });
                self.send_to(session_id, outbound::SYSTEM_STATUS, status);
            }
            other => {
                let handler = self.lock().handlers.get(other).cloned();
                match handler {
                    Some(handler) => handler.as_ref()(session_id, data),
                    None => {
                        tracing::debug!(session_id, message_type = other, "unknown message type");
                        self.send_to(
                            session_id,
                            outbound::ERROR,
                            json!({"error": format!("unknown message type: {other}")}),
                        );
                    }
                }
            }
        }
    }

    fn update_topics(&self, session_id: SessionId, data: &serde_json::Value, add: bool) {
        let topics: Vec<String> = data
            .get("topics")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|t| t.as_str().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default();

        if let Some(session) = self.lock().sessions.get_mut(&session_id) {
            for topic in topics {
                if add {
                    session.topics.insert(topic);
                } else {
                    session.topics.remove(&topic);
                }
            }
            tracing::debug!(session_id, add, "subscription filters changed");
        }
    }

    /// Push a system-status envelope to every session.
    pub fn broadcast_status(&self, status: serde_json::Value) {
        self.fan_out(outbound::SYSTEM_STATUS, &status, None, None);
    }

    /// Dispatch one manager event to the sessions.
    pub fn dispatch(&self, event: &AlertEvent) {
        match event {
            AlertEvent::Added(alert) => {
                self.fan_out(
                    outbound::ALERT_NEW,
                    &serde_json::to_value(alert.as_ref()).unwrap_or_default(),
                    Some(alert),
                    Some(Gate::Add),
                );
            }
            AlertEvent::Updated(alert) => {
                self.fan_out(
                    outbound::ALERT_UPDATE,
                    &serde_json::to_value(alert.as_ref()).unwrap_or_default(),
                    Some(alert),
                    Some(Gate::Update),
                );
            }
            AlertEvent::Removed { alert, reason } => {
                let payload = json!({
                    "product_id": alert.product_id,
                    "event_name": alert.event_name,
                    "reason": remove_reason(*reason),
                });
                self.fan_out(outbound::ALERT_REMOVE, &payload, Some(alert), Some(Gate::Remove));
            }
        }
    }

    /// Consume manager events until the channel closes or `shutdown` fires.
    pub async fn run(
        &self,
        mut events: tokio::sync::broadcast::Receiver<AlertEvent>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => self.dispatch(&event),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "broker lagged behind manager events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Serialize once, write to every matching session, purge the dead.
    fn fan_out(
        &self,
        message_type: &str,
        payload: &serde_json::Value,
        alert: Option<&Alert>,
        gate: Option<Gate>,
    ) {
        let message = envelope(message_type, payload.clone());
        let mut state = self.lock();
        if state.sessions.is_empty() {
            return;
        }

        let mut dead = Vec::new();
        for (&session_id, session) in state.sessions.iter_mut() {
            if let Some(alert) = alert {
                if !session.topics.is_empty() && !topics_match(&session.topics, alert) {
                    continue;
                }
                let id = alert.product_id.as_str();
                match gate {
                    Some(Gate::Add) => {
                        // Already delivered via snapshot or an earlier add.
                        if !session.seen.insert(id.to_owned()) {
                            continue;
                        }
                    }
                    Some(Gate::Update) => {
                        if !session.seen.contains(id) {
                            continue;
                        }
                    }
                    Some(Gate::Remove) => {
                        if !session.seen.remove(id) {
                            continue;
                        }
                    }
                    None => {}
                }
            }

            if !try_send(session, session_id, &message) {
                dead.push(session_id);
            }
        }

        for session_id in dead {
            state.sessions.remove(&session_id);
            tracing::warn!(session_id, "subscriber write failed, disconnecting");
        }
    }

    fn send_to(&self, session_id: SessionId, message_type: &str, payload: serde_json::Value) {
        let message = envelope(message_type, payload);
        let mut state = self.lock();
        let Some(session) = state.sessions.get_mut(&session_id) else {
            return;
        };
        if !try_send(session, session_id, &message) {
            state.sessions.remove(&session_id);
            tracing::warn!(session_id, "subscriber write failed, disconnecting");
        }
    }
}

enum Gate {
    Add,
    Update,
    Remove,
}

/// Whether an alert matches any of a session's topic filters.
/// Topics are membership-only strings: `state:OH`, `type:tornado`.
fn topics_match(topics: &HashSet<String>, alert: &Alert) -> bool {
    topics.iter().any(|topic| match topic.split_once(':') {
        Some(("state", state)) => alert
            .affected_areas
            .iter()
            .any(|code| code.state().eq_ignore_ascii_case(state)),
        Some(("type", name)) => {
            alert.phenomenon.eq_ignore_ascii_case(name)
                || alert.event_name.to_ascii_lowercase().contains(&name.to_ascii_lowercase())
        }
        _ => false,
    })
}

fn try_send(session: &mut Session, session_id: SessionId, message: &str) -> bool {
    match session.outbound.try_send(message.to_owned()) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!(session_id, "subscriber outbound buffer full");
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

fn envelope<T: Serialize>(message_type: &str, data: T) -> String {
    serde_json::to_string(&json!({
        "type": message_type,
        "data": data,
        "timestamp": Utc::now().to_rfc3339(),
    }))
    .unwrap_or_else(|_| format!(r#"{{"type":"{message_type}","data":null}}"#))
}

fn remove_reason(reason: RemoveReason) -> &'static str {
    match reason {
        RemoveReason::Expired => "expired",
        RemoveReason::Cancelled => "cancelled",
        RemoveReason::Superseded => "superseded",
    }
}
