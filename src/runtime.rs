//! Service wiring.
//!
//! [`Runtime`] owns every component and the tasks between them: the NWWS
//! drain, the REST poll loop, the manager's expiration sweeper, and the
//! broker's event pump. The embedding application builds one, calls
//! [`Runtime::start`], hands subscriber connections to [`Runtime::broker`],
//! and calls [`Runtime::stop`] on the way out.
//!
//! Startup order matters: persisted alerts load before any subscriber can
//! connect, and persisted watches get a geometry backfill pass. Shutdown
//! drains in order: NWWS client, manager (save), geometry resolver (save),
//! REST client (dropped with the runtime).

use crate::broker::Broker;
use crate::config::ConfigHandle;
use crate::geometry::GeometryResolver;
use crate::manager::AlertManager;
use crate::nwws::{NwwsClient, NwwsConfig, NwwsEvent};
use crate::parser;
use crate::rest::{RestClient, RestError};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// The error returned when the runtime cannot be built.
#[derive(thiserror::Error, Debug)]
pub enum RuntimeError {
    /// The REST client could not be constructed
    #[error(transparent)]
    Rest(#[from] RestError),

    /// The NWWS client could not be constructed
    #[error(transparent)]
    Nwws(#[from] crate::nwws::NwwsError),
}

/// The assembled service.
pub struct Runtime {
    config: ConfigHandle,
    rest: Arc<RestClient>,
    geometry: Arc<GeometryResolver>,
    manager: AlertManager,
    broker: Broker,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Runtime {
    /// Build the component graph from a configuration handle.
    pub fn new(config: ConfigHandle) -> Result<Self, RuntimeError> {
        let snapshot = config.snapshot();

        let rest = Arc::new(RestClient::new(
            &snapshot.api_base_url,
            &snapshot.api_user_agent,
        )?);
        let geometry = Arc::new(GeometryResolver::new(
            rest.clone(),
            snapshot.zone_cache_ttl_hours,
            Some(snapshot.geometry_cache_path()),
        ));
        let manager = AlertManager::new(
            snapshot
                .persist_alerts
                .then(|| snapshot.alerts_path()),
        );
        let broker = Broker::new(manager.clone());
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            rest,
            geometry,
            manager,
            broker,
            shutdown,
            tasks: Vec::new(),
        })
    }

    /// The alert manager handle.
    pub fn manager(&self) -> &AlertManager {
        &self.manager
    }

    /// The subscriber broker handle.
    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    /// The geometry resolver handle.
    pub fn geometry(&self) -> &Arc<GeometryResolver> {
        &self.geometry
    }

    /// The configuration handle.
    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    /// Load persisted state and start the background tasks.
    pub async fn start(&mut self) -> Result<(), RuntimeError> {
        let snapshot = self.config.snapshot();

        // State loads strictly before subscribers can see anything.
        self.geometry.load().await;
        let loaded = self.manager.load();

        // Watches persisted across a restart lost nothing, but their zones
        // may never have resolved; give them another pass.
        if loaded > 0 {
            for alert in self.manager.all() {
                if alert.polygon.is_empty() && !alert.affected_areas.is_empty() {
                    let resolved = self.geometry.resolve_many(&alert.affected_areas).await;
                    let mut combined = crate::geo::Polygon::empty();
                    for code in &alert.affected_areas {
                        if let Some(polygon) = resolved.get(code) {
                            combined.extend(polygon.clone());
                        }
                    }
                    self.manager.backfill_polygon(&alert.product_id, combined);
                }
            }
        }

        // Broker pump.
        let broker = self.broker.clone();
        let events = self.manager.subscribe();
        let shutdown_rx = self.shutdown.subscribe();
        self.tasks.push(tokio::spawn(async move {
            broker.run(events, shutdown_rx).await;
        }));

        // Expiration sweeper.
        let manager = self.manager.clone();
        let interval = snapshot.alert_cleanup_interval_seconds;
        let shutdown_rx = self.shutdown.subscribe();
        self.tasks.push(tokio::spawn(async move {
            manager.run_sweeper(interval, shutdown_rx).await;
        }));

        // REST poll loop.
        let poller = Ingest {
            config: self.config.clone(),
            rest: self.rest.clone(),
            geometry: self.geometry.clone(),
            manager: self.manager.clone(),
        };
        let shutdown_rx = self.shutdown.subscribe();
        self.tasks.push(tokio::spawn(async move {
            poller.poll_loop(shutdown_rx).await;
        }));

        // NWWS drain, when credentials are configured. The drain task owns
        // the client and shuts it down first when the runtime stops, so the
        // push source closes before state saves.
        if snapshot.nwws_enabled() {
            let nwws_config = NwwsConfig {
                username: snapshot.nwws_username.clone().expect("checked by nwws_enabled"),
                password: snapshot.nwws_password.clone().expect("checked by nwws_enabled"),
                server: snapshot.nwws_server.clone(),
                room: snapshot.nwws_room.clone(),
                nickname: snapshot.nwws_nickname.clone(),
            };
            let mut client = NwwsClient::spawn(nwws_config)?;
            let drain = Ingest {
                config: self.config.clone(),
                rest: self.rest.clone(),
                geometry: self.geometry.clone(),
                manager: self.manager.clone(),
            };
            let mut shutdown_rx = self.shutdown.subscribe();
            self.tasks.push(tokio::spawn(async move {
                let mut stopping = false;
                while !stopping {
                    tokio::select! {
                        event = client.recv() => match event {
                            Some(NwwsEvent::Product(product)) => {
                                drain.ingest_text(&product.text).await;
                            }
                            Some(NwwsEvent::Connected) => tracing::info!("NWWS feed connected"),
                            Some(NwwsEvent::Disconnected) => {
                                tracing::warn!("NWWS feed disconnected");
                            }
                            None => break,
                        },
                        _ = shutdown_rx.changed() => {
                            stopping = *shutdown_rx.borrow();
                        }
                    }
                }
                client.shutdown().await;
            }));
        } else {
            tracing::warn!("NWWS credentials not configured, push source disabled");
        }

        tracing::info!("runtime started");
        Ok(())
    }

    /// Stop the background tasks and persist state. The NWWS drain closes
    /// its session, then the manager and geometry resolver save.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        self.manager.save();
        self.geometry.save().await;
        tracing::info!("runtime stopped");
    }
}

/// The shared ingest path: parse, resolve geometry, hand to the manager.
#[derive(Clone)]
struct Ingest {
    config: ConfigHandle,
    rest: Arc<RestClient>,
    geometry: Arc<GeometryResolver>,
    manager: AlertManager,
}

impl Ingest {
    async fn ingest_text(&self, text: &str) {
        let config = self.config.snapshot();
        match parser::parse_text(text, &config, Utc::now()) {
            Ok(mut alert) => {
                self.geometry.populate(&mut alert).await;
                self.manager.add(alert);
            }
            Err(rejection) => {
                tracing::debug!(%rejection, "text product rejected");
            }
        }
    }

    async fn poll_once(&self) {
        let config = self.config.snapshot();
        let features = match self.rest.list_active_alerts(None, None).await {
            Ok(features) => features,
            Err(error) => {
                tracing::warn!(%error, "active-alert poll failed");
                return;
            }
        };

        let now = Utc::now();
        let mut accepted = 0usize;
        for feature in &features {
            match parser::parse_feature(feature, &config, now) {
                Ok(mut alert) => {
                    self.geometry.populate(&mut alert).await;
                    self.manager.add(alert);
                    accepted += 1;
                }
                Err(rejection) => {
                    tracing::debug!(%rejection, "API feature rejected");
                }
            }
        }
        tracing::info!(accepted, total = features.len(), "API poll complete");
    }

    async fn poll_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let period = std::time::Duration::from_secs(
            self.config.snapshot().api_poll_interval_seconds.max(1) as u64,
        );
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.poll_once().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}
