//! End-to-end scenarios: real product texts through the parser, the
//! manager, and the broker.

use chrono::{Duration, TimeZone, Utc};
use nwswire::broker::Broker;
use nwswire::config::Config;
use nwswire::manager::{AlertManager, RemoveReason};
use nwswire::parser;
use nwswire::vtec::Significance;
use nwswire::{AlertEvent, AlertStatus};

const TORNADO_WARNING: &str = include_str!("../fixtures/tornado_warning.txt");
const WINTER_STORM_WARNING: &str = include_str!("../fixtures/winter_storm_warning.txt");

const TORNADO_CANCELLATION: &str = "\
WFUS53 KCLE 201610
TORCLE

OHC049-201630-
/O.CAN.KCLE.TO.W.0001.000000T0000Z-250120T1630Z/

THE NATIONAL WEATHER SERVICE IN CLEVELAND HAS CANCELLED THE TORNADO
WARNING FOR FRANKLIN COUNTY.

$$
";

const WATCH_FROM_CLE: &str = "\
WWUS63 KCLE 201805
WCNCLE

OHC049-041-210000-
/O.NEW.KCLE.TO.A.0150.250120T1800Z-250121T0000Z/

TORNADO WATCH 150 REMAINS IN EFFECT UNTIL 7 PM EST FOR THE
FOLLOWING COUNTIES...

$$
";

const WATCH_FROM_IND: &str = "\
WWUS63 KIND 201806
WCNIND

INC001-003-210000-
/O.NEW.KIND.TO.A.0150.250120T1800Z-250121T0000Z/

TORNADO WATCH 150 REMAINS IN EFFECT UNTIL 7 PM EST FOR THE
FOLLOWING COUNTIES...

$$
";

fn received_at() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 20, 15, 35, 0).unwrap()
}

#[test]
fn tornado_warning_text_product() {
    let alert = parser::parse_text(TORNADO_WARNING, &Config::default(), received_at()).unwrap();

    assert_eq!(alert.product_id.as_str(), "TO.CLE.0001");
    assert_eq!(alert.phenomenon, "TO");
    assert_eq!(alert.significance, Significance::Warning);
    assert_eq!(
        alert.expiration_time,
        Some(Utc.with_ymd_and_hms(2025, 1, 20, 16, 30, 0).unwrap())
    );

    let ring = &alert.polygon.rings()[0];
    assert_eq!(ring.points().first(), ring.points().last());
    assert_eq!(ring.points()[0].latitude(), 41.05);
    assert_eq!(ring.points()[0].longitude(), -83.10);
    assert_eq!(ring.points()[3].latitude(), 39.95);

    assert_eq!(alert.threat.max_hail_size_inches, Some(1.0));
    let motion = alert.threat.storm_motion.as_ref().unwrap();
    assert_eq!(motion.direction_degrees, Some(225));
    assert_eq!(motion.speed_kts, Some(30));
}

#[test]
fn product_id_stable_across_sources() {
    let first = parser::parse_text(TORNADO_WARNING, &Config::default(), received_at()).unwrap();
    let second = parser::parse_text(TORNADO_WARNING, &Config::default(), received_at()).unwrap();
    assert_eq!(first.product_id, second.product_id);
}

#[test]
fn watch_products_from_two_offices_become_one_alert() {
    let config = Config::default();
    let manager = AlertManager::new(None);

    let cle = parser::parse_text(WATCH_FROM_CLE, &config, received_at()).unwrap();
    let ind = parser::parse_text(WATCH_FROM_IND, &config, received_at()).unwrap();
    assert_eq!(cle.product_id.as_str(), "TOA.0150");
    assert_eq!(cle.product_id, ind.product_id);

    manager.add(cle);
    manager.add(ind);

    assert_eq!(manager.len(), 1);
    let merged = manager.get(&"TOA.0150".into()).unwrap();
    let areas: Vec<&str> = merged.affected_areas.iter().map(|c| c.as_str()).collect();
    assert_eq!(areas, ["INC001", "INC003", "OHC041", "OHC049"]);
}

#[test]
fn cancellation_empties_the_active_set() {
    let config = Config::default();
    let manager = AlertManager::new(None);
    let mut events = manager.subscribe();

    let warning = parser::parse_text(TORNADO_WARNING, &config, received_at()).unwrap();
    manager.add(warning);

    let cancellation =
        parser::parse_text(TORNADO_CANCELLATION, &config, received_at()).unwrap();
    assert_eq!(cancellation.status, AlertStatus::Cancelled);
    manager.add(cancellation);

    assert!(manager.is_empty());
    assert!(matches!(events.try_recv().unwrap(), AlertEvent::Added(_)));
    match events.try_recv().unwrap() {
        AlertEvent::Removed { alert, reason } => {
            assert_eq!(alert.product_id.as_str(), "TO.CLE.0001");
            assert_eq!(reason, RemoveReason::Cancelled);
        }
        other => panic!("expected removal, got {other:?}"),
    }
    assert!(events.try_recv().is_err(), "no further events");
}

#[test]
fn cancellation_for_unknown_event_is_ignored() {
    let config = Config::default();
    let manager = AlertManager::new(None);

    let cancellation =
        parser::parse_text(TORNADO_CANCELLATION, &config, received_at()).unwrap();
    assert!(!manager.add(cancellation));
    assert!(manager.is_empty());
}

#[test]
fn snow_accumulation_range() {
    let alert =
        parser::parse_text(WINTER_STORM_WARNING, &Config::default(), received_at()).unwrap();

    assert_eq!(alert.product_id.as_str(), "WS.ILN.0005");
    assert_eq!(alert.threat.snow_amount_min_inches, Some(4.0));
    assert_eq!(alert.threat.snow_amount_max_inches, Some(8.0));
    assert_eq!(alert.threat.ice_accumulation_inches, Some(0.25));
    assert_eq!(
        alert.expiration_time,
        Some(Utc.with_ymd_and_hms(2025, 1, 21, 12, 0, 0).unwrap())
    );
}

#[test]
fn expiration_sweep_removes_stale_alerts() {
    let config = Config::default();
    let manager = AlertManager::new(None);

    let mut warning =
        parser::parse_text(TORNADO_WARNING, &config, received_at()).unwrap();
    warning.expiration_time = Some(Utc::now() - Duration::seconds(1));
    manager.add(warning);

    let removed = manager.sweep_expired();
    assert_eq!(removed.len(), 1);
    assert!(manager.is_empty());
}

#[tokio::test]
async fn broadcast_survives_a_dead_subscriber() {
    let config = Config::default();
    let manager = AlertManager::new(None);
    let broker = Broker::new(manager.clone());

    // Pump manager events into the broker the way the runtime does.
    let (shutdown_tx, _) = tokio::sync::watch::channel(false);
    let pump = {
        let broker = broker.clone();
        let events = manager.subscribe();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move { broker.run(events, shutdown_rx).await })
    };

    let (_, mut alive) = broker.connect();
    let (_, dead) = broker.connect();
    let _ack = alive.recv().await.unwrap();
    let _bulk = alive.recv().await.unwrap();
    drop(dead);

    let warning = parser::parse_text(TORNADO_WARNING, &config, received_at()).unwrap();
    manager.add(warning);

    let frame = tokio::time::timeout(std::time::Duration::from_secs(1), alive.recv())
        .await
        .expect("surviving subscriber gets the broadcast")
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(parsed["type"], "alert_new");
    assert_eq!(parsed["data"]["product_id"], "TO.CLE.0001");
    assert_eq!(broker.session_count(), 1);

    let _ = shutdown_tx.send(true);
    let _ = pump.await;
}

#[tokio::test]
async fn snapshot_consistency_for_late_subscribers() {
    let config = Config::default();
    let manager = AlertManager::new(None);
    let broker = Broker::new(manager.clone());

    let warning = parser::parse_text(TORNADO_WARNING, &config, received_at()).unwrap();
    manager.add(warning);

    let (_, mut rx) = broker.connect();
    let ack: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
    assert_eq!(ack["type"], "connection_ack");

    let bulk: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
    assert_eq!(bulk["type"], "alert_bulk");
    assert_eq!(bulk["data"]["count"], 1);
    assert_eq!(bulk["data"]["alerts"][0]["product_id"], "TO.CLE.0001");

    // Replaying the add must not produce an alert_new for a snapshot id.
    let alert = manager.get(&"TO.CLE.0001".into()).unwrap();
    broker.dispatch(&AlertEvent::Added(std::sync::Arc::new(alert)));
    assert!(rx.try_recv().is_err());
}

#[test]
fn active_set_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("active_alerts.json");
    let config = Config::default();

    let manager = AlertManager::new(Some(path.clone()));
    let mut warning = parser::parse_text(TORNADO_WARNING, &config, received_at()).unwrap();
    warning.expiration_time = Some(Utc::now() + Duration::hours(1));
    manager.add(warning);
    manager.save();

    let restarted = AlertManager::new(Some(path));
    assert_eq!(restarted.load(), 1);
    let restored = restarted.get(&"TO.CLE.0001".into()).unwrap();
    assert_eq!(restored.phenomenon, "TO");
    assert!(!restored.polygon.is_empty());
}
