//! Real-time National Weather Service alert ingestion and distribution.
//!
//! `nwswire` consumes the two NWS alert feeds, the NWWS-OI XMPP push stream
//! of raw text products and the api.weather.gov GeoJSON poll, and maintains
//! a deduplicated, expiration-aware set of active alerts, pushed to
//! subscribers as lifecycle events.
//!
//! # Example
//!
//! Parsing a raw text product:
//!
//! ```rust
//! use nwswire::config::Config;
//!
//! let product = "\
//! WFUS53 KCLE 201530
//! TORCLE
//!
//! OHC049-201630-
//! /O.NEW.KCLE.TO.W.0001.250120T1530Z-250120T1630Z/
//!
//! TORNADO WARNING
//! TORNADO...RADAR INDICATED
//! HAIL...1.75 INCHES
//!
//! LAT...LON 4105 8310 4115 8295 4110 8280 3995 8300
//! ";
//!
//! let alert = nwswire::parser::parse_text(
//!     product,
//!     &Config::default(),
//!     chrono::Utc::now(),
//! )
//! .expect("parses");
//!
//! assert_eq!(alert.product_id.as_str(), "TO.CLE.0001");
//! assert_eq!(alert.phenomenon, "TO");
//! assert!(alert.polygon.rings()[0].is_closed());
//! ```
//!
//! Running the service:
//!
//! ```rust,no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use nwswire::config::{Config, ConfigHandle};
//! use nwswire::runtime::Runtime;
//!
//! let config = ConfigHandle::new(Config {
//!     filter_states: vec!["OH".into(), "IN".into()],
//!     ..Config::default()
//! });
//!
//! let mut runtime = Runtime::new(config)?;
//! runtime.start().await?;
//!
//! // Hand subscriber connections to runtime.broker(), serve until done...
//!
//! runtime.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Structure
//!
//! The decoders ([`vtec`], [`ugc`], [`threat`], [`geo`]) are pure functions
//! over product text. [`parser`] is the façade turning either input format
//! into one canonical [`alert::Alert`]. [`manager`] owns the active set and
//! emits lifecycle events; [`broker`] fans them out to subscribers. [`rest`],
//! [`nwws`], and [`geometry`] talk to the outside world, and [`runtime`]
//! wires the whole graph together.

#![forbid(unsafe_code)]

pub mod alert;
pub mod broker;
pub mod config;
pub mod datetime;
pub mod geo;
pub mod geometry;
pub mod manager;
pub mod nwws;
pub mod parser;
pub(crate) mod patterns;
pub mod rest;
pub mod runtime;
pub mod threat;
pub mod ugc;
pub mod vtec;

pub use alert::{Alert, AlertStatus, Priority, Source};
pub use manager::{AlertEvent, AlertManager, RemoveReason};
pub use vtec::ProductId;
