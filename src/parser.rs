//! The alert parser.
//!
//! One façade over both inputs: GeoJSON features from the REST API and raw
//! text products from NWWS-OI. Either becomes a canonical [`Alert`] or a
//! typed [`Rejection`] explaining why the product was dropped. Rejections are
//! normal operation; the wire carries far more than this service tracks. They
//! are logged at DEBUG, never escalated.

use crate::alert::{event_name, Alert, AlertStatus, Priority, Source};
use crate::config::Config;
use crate::datetime;
use crate::geo;
use crate::patterns;
use crate::threat;
use crate::ugc::{self, UgcCode};
use crate::vtec::{self, ProductId, Significance};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use sha1::{Digest, Sha1};
use std::collections::HashMap;

/// Phenomena that receive a default lifetime when no expiration can be
/// derived. Short-fused convective products and their product-code variants.
const SHORT_LIVED_PHENOMENA: &[&str] = &[
    "TO", "SV", "FF", "SS", "SPS", "TOR", "SVR", "SVS", "FFW", "FFS", "TOA", "SVA", "FFA",
];

/// Why the parser dropped a product.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Informational product class (outlooks, forecasts, synopses)
    #[error("informational product: {0}")]
    Informational(String),

    /// Special Weather Statement without thunderstorm relevance
    #[error("special weather statement not thunderstorm-related")]
    IrrelevantStatement,

    /// No affected areas remain after the state filter
    #[error("no affected areas within the configured states")]
    OutsideStateFilter,

    /// Phenomenon not in the configured target set
    #[error("phenomenon {0:?} not in the configured target set")]
    PhenomenonFiltered(String),

    /// Nothing alert-shaped in the input
    #[error("no VTEC, UGC block, or watch header found")]
    NotRecognized,
}

/// A GeoJSON alert feature from `/alerts/active`.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertFeature {
    /// The feature's `properties` member.
    pub properties: FeatureProperties,
    /// The feature's `geometry` member, when present.
    #[serde(default)]
    pub geometry: Option<serde_json::Value>,
}

/// The `properties` member of an alert feature.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FeatureProperties {
    /// Message id.
    pub id: Option<String>,
    /// Message id under the JSON-LD key.
    #[serde(rename = "@id")]
    pub at_id: Option<String>,
    /// Event name, e.g. `Tornado Warning`.
    pub event: Option<String>,
    /// Headline.
    pub headline: Option<String>,
    /// Full description.
    pub description: Option<String>,
    /// Safety instructions.
    pub instruction: Option<String>,
    /// Issuing office name.
    #[serde(rename = "senderName")]
    pub sender_name: Option<String>,
    /// Issuance instant.
    pub sent: Option<String>,
    /// Effective instant.
    pub effective: Option<String>,
    /// Onset instant.
    pub onset: Option<String>,
    /// Event end instant.
    pub ends: Option<String>,
    /// Message expiration instant.
    pub expires: Option<String>,
    /// Area description.
    #[serde(rename = "areaDesc")]
    pub area_desc: Option<String>,
    /// Geographic codes.
    pub geocode: Geocode,
    /// Free-form parameter arrays.
    pub parameters: HashMap<String, serde_json::Value>,
}

/// The `geocode` member of an alert feature.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Geocode {
    /// UGC codes.
    #[serde(rename = "UGC")]
    pub ugc: Vec<String>,
    /// SAME (FIPS-bearing) codes.
    #[serde(rename = "SAME")]
    pub same: Vec<String>,
}

/// Parse a GeoJSON feature from the REST API.
pub fn parse_feature(
    feature: &AlertFeature,
    config: &Config,
    now: DateTime<Utc>,
) -> Result<Alert, Rejection> {
    let properties = &feature.properties;
    let mut alert = Alert::new(Source::Api, now);

    alert.message_id = properties.id.clone().or_else(|| properties.at_id.clone());
    alert.event_name = properties.event.clone().unwrap_or_default();
    alert.headline = properties.headline.clone().unwrap_or_default();
    alert.description = properties.description.clone().unwrap_or_default();
    alert.instruction = properties.instruction.clone().unwrap_or_default();
    alert.sender_name = properties.sender_name.clone().unwrap_or_default();

    if alert.event_name.eq_ignore_ascii_case("Hazardous Weather Outlook") {
        tracing::debug!(message_id = ?alert.message_id, "dropping informational product");
        return Err(Rejection::Informational(alert.event_name));
    }

    // VTEC is preferred from the parameters array, falling back to scanning
    // the description.
    let vtec_source = parameter_string(&properties.parameters, "VTEC");
    let scan = match &vtec_source {
        Some(raw) => vtec::decode(raw),
        None => vtec::decode(&alert.description),
    };
    log_scan_warnings(&scan, alert.message_id.as_deref());
    alert.vtec = scan.record;
    alert.hvtec = vtec::decode_hydro(&alert.description);

    if let Some(record) = &alert.vtec {
        alert.phenomenon = record.phenomenon.clone();
        alert.significance = record.significance;
        alert.sender_office = record.office.clone();
        if record.action.is_termination() {
            alert.status = AlertStatus::Cancelled;
        }
    }

    if alert.phenomenon.is_empty() {
        if let Some(code) = phenomenon_from_event_name(&alert.event_name) {
            alert.phenomenon = code.to_owned();
            if alert.event_name.to_ascii_uppercase().contains("WATCH") {
                alert.significance = Significance::Watch;
            } else if alert.event_name.to_ascii_uppercase().contains("ADVISORY") {
                alert.significance = Significance::Advisory;
            }
        }
    }

    // `ends` is the event end; `expires` is only message distribution.
    if let Some(ends) = properties.ends.as_deref().and_then(datetime::parse_iso_timestamp) {
        alert.expiration_time = Some(ends);
    } else if let Some(expires) = properties
        .expires
        .as_deref()
        .and_then(datetime::parse_iso_timestamp)
    {
        alert.expiration_time = Some(expires);
        alert.message_expires = Some(expires);
    }
    alert.effective_time = properties
        .effective
        .as_deref()
        .and_then(datetime::parse_iso_timestamp);
    alert.onset_time = properties
        .onset
        .as_deref()
        .and_then(datetime::parse_iso_timestamp);
    alert.issued_time = properties
        .sent
        .as_deref()
        .and_then(datetime::parse_iso_timestamp);

    alert.affected_areas = properties
        .geocode
        .ugc
        .iter()
        .filter_map(|raw| match raw.parse::<UgcCode>() {
            Ok(code) => Some(code),
            Err(_) => {
                tracing::debug!(code = raw.as_str(), "skipping malformed UGC code");
                None
            }
        })
        .collect();
    alert.fips_codes = properties
        .geocode
        .same
        .iter()
        .filter(|code| code.len() >= 5)
        .map(|code| code[code.len() - 5..].to_owned())
        .collect();
    alert.display_locations = properties.area_desc.clone().unwrap_or_default();

    if let Some(geometry) = &feature.geometry {
        alert.polygon = geo::polygon_from_geojson(geometry);
        alert.centroid = alert.polygon.centroid();
    }

    alert.threat = threat::extract(&alert.description);
    apply_threat_parameters(&properties.parameters, &mut alert);

    let description = alert.description.clone();
    alert.raw_text = description.clone();
    assign_product_id(&mut alert, &description, now);

    finish(alert, config, now)
}

/// Parse a raw text product from NWWS-OI.
pub fn parse_text(text: &str, config: &Config, now: DateTime<Utc>) -> Result<Alert, Rejection> {
    let mut alert = Alert::new(Source::Nwws, now);
    alert.raw_text = text.to_owned();

    let awips = awips_identifier(text);
    if let Some(caps) = patterns::WMO_HEADER.captures(text) {
        let designator = &caps[1];
        if patterns::INFORMATIONAL_WMO_PREFIXES
            .iter()
            .any(|prefix| designator.starts_with(prefix))
        {
            tracing::debug!(designator, "dropping informational product");
            return Err(Rejection::Informational(designator.to_owned()));
        }
        alert.sender_office = caps[2].to_owned();
        alert.issued_time = datetime::resolve_wmo_issuance(&caps[3], now);
    }
    if awips.as_deref().map_or(false, |id| id.starts_with("HWO"))
        || text.contains("HAZARDOUS WEATHER OUTLOOK")
    {
        tracing::debug!("dropping hazardous weather outlook");
        return Err(Rejection::Informational("HWO".to_owned()));
    }

    let scan = vtec::decode(text);
    log_scan_warnings(&scan, None);
    alert.hvtec = vtec::decode_hydro(text);

    if let Some(record) = scan.record {
        alert.phenomenon = record.phenomenon.clone();
        alert.significance = record.significance;
        alert.sender_office = record.office.clone();
        if let Some(end) = record.end_time {
            alert.expiration_time = Some(end);
        }
        if record.action.is_termination() {
            alert.status = AlertStatus::Cancelled;
        }
        alert.vtec = Some(record);
    } else if awips.as_deref().map_or(false, |id| id.starts_with("SPS"))
        || text.contains("SPECIAL WEATHER STATEMENT")
    {
        alert.phenomenon = "SPS".to_owned();
        alert.significance = Significance::Statement;
    }

    let block = ugc::decode(text, now);
    if block.is_valid() {
        alert.affected_areas = block.codes;
        alert.fips_codes = block.fips;
        if alert.expiration_time.is_none() {
            alert.expiration_time = block.expiration;
        }
    }

    if alert.vtec.is_none() && alert.phenomenon.is_empty() {
        // A watch redefinition product names the watch without a VTEC.
        if let Some(caps) = patterns::WATCH_HEADER.captures(text) {
            alert.phenomenon = if caps[1].to_ascii_uppercase().contains("TORNADO") {
                "TO".to_owned()
            } else {
                "SV".to_owned()
            };
            alert.significance = Significance::Watch;
        }
    }

    if alert.vtec.is_none() && alert.phenomenon.is_empty() && alert.affected_areas.is_empty() {
        tracing::debug!("product has no VTEC, UGC block, or watch header");
        return Err(Rejection::NotRecognized);
    }

    if alert.expiration_time.is_none() {
        alert.expiration_time = text_expiration(text, &alert.sender_office, now);
    }

    if let Some(ring) = text_polygon(text) {
        alert.polygon = ring.into();
        alert.centroid = alert.polygon.centroid();
    }

    alert.threat = threat::extract(text);

    assign_product_id(&mut alert, text, now);

    finish(alert, config, now)
}

/// The shared tail of both input paths: statement relevance, state and
/// phenomenon filters, the default expiration, and derived display fields.
fn finish(mut alert: Alert, config: &Config, now: DateTime<Utc>) -> Result<Alert, Rejection> {
    if alert.phenomenon == "SPS" && !relevant_statement(&alert.raw_text) {
        tracing::debug!(product_id = %alert.product_id, "dropping non-thunderstorm statement");
        return Err(Rejection::IrrelevantStatement);
    }

    if !config.filter_states.is_empty() {
        let kept = ugc::filter_by_states(&alert.affected_areas, &config.filter_states);
        if kept.is_empty() {
            tracing::debug!(
                product_id = %alert.product_id,
                states = ?config.filter_states,
                "dropping alert outside state filter"
            );
            return Err(Rejection::OutsideStateFilter);
        }
        alert.affected_areas = kept;
    }

    if !config.accepts_phenomenon(&alert.phenomenon) {
        tracing::debug!(
            product_id = %alert.product_id,
            phenomenon = %alert.phenomenon,
            "dropping alert outside phenomenon filter"
        );
        return Err(Rejection::PhenomenonFiltered(alert.phenomenon));
    }

    if alert.expiration_time.is_none()
        && SHORT_LIVED_PHENOMENA.contains(&alert.phenomenon.as_str())
    {
        let minutes = config.default_alert_lifetime_minutes as i64;
        alert.expiration_time = Some(now + Duration::minutes(minutes));
        tracing::warn!(
            product_id = %alert.product_id,
            minutes,
            "no expiration found, assigning default lifetime"
        );
    }

    if alert.display_locations.trim().is_empty() || ugc::looks_like_codes(&alert.display_locations)
    {
        alert.display_locations = ugc::location_summary(&alert.affected_areas);
    }

    if alert.event_name.is_empty() && !alert.phenomenon.is_empty() {
        alert.event_name = event_name(&alert.phenomenon, alert.significance);
    }
    alert.priority = Priority::derive(&alert.phenomenon, alert.significance);

    Ok(alert)
}

/// The id assignment ladder: VTEC, watch header, SPS stable hash, upstream
/// message id, timestamp.
fn assign_product_id(alert: &mut Alert, text: &str, now: DateTime<Utc>) {
    if let Some(record) = &alert.vtec {
        alert.product_id = record.product_id();
        return;
    }

    if let Some(caps) = patterns::WATCH_HEADER.captures(text) {
        let phenomenon = if caps[1].to_ascii_uppercase().contains("TORNADO") {
            "TO"
        } else {
            "SV"
        };
        if let Ok(number) = caps[2].parse::<u16>() {
            alert.product_id = ProductId::new(format!("{phenomenon}A.SPC.{number:04}"));
            return;
        }
    }

    if alert.phenomenon == "SPS" && alert.issued_time.is_some() && !alert.affected_areas.is_empty()
    {
        let issued = alert.issued_time.expect("checked above");
        alert.product_id = ProductId::new(format!(
            "SPS.adhoc.{}.{}",
            issued.format("%Y%m%d%H%M"),
            ugc_digest(&alert.affected_areas)
        ));
        return;
    }

    if let Some(message_id) = &alert.message_id {
        let tail = message_id.rsplit('/').next().unwrap_or(message_id);
        if !tail.is_empty() {
            alert.product_id = ProductId::new(tail);
            tracing::warn!(product_id = %alert.product_id, "id from upstream message id, merging is best-effort");
            return;
        }
    }

    alert.product_id = ProductId::new(format!("{}_{}", alert.source, now.timestamp_millis()));
    tracing::warn!(product_id = %alert.product_id, "timestamp fallback id, merging is best-effort");
}

/// First 8 hex characters of the SHA-1 of the sorted UGC codes. Two
/// independently-received copies of the same statement cover the same
/// counties and collapse to one id.
fn ugc_digest(areas: &[UgcCode]) -> String {
    let mut sorted: Vec<&str> = areas.iter().map(UgcCode::as_str).collect();
    sorted.sort_unstable();

    let mut hasher = Sha1::new();
    hasher.update(sorted.join(",").as_bytes());
    hasher
        .finalize()
        .iter()
        .take(4)
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

fn log_scan_warnings(scan: &vtec::VtecScan, message_id: Option<&str>) {
    for warning in &scan.warnings {
        tracing::warn!(?message_id, %warning, "VTEC diagnostic");
    }
    for error in &scan.errors {
        tracing::debug!(?message_id, %error, "VTEC not decoded");
    }
}

/// The AWIPS identifier line that follows the WMO heading, e.g. `TORCLE`.
fn awips_identifier(text: &str) -> Option<String> {
    let mut lines = text.lines().map(str::trim);
    lines.find(|line| patterns::WMO_HEADER.is_match(line))?;
    let candidate = lines.find(|line| !line.is_empty())?;
    let shaped = (4..=6).contains(&candidate.len())
        && candidate.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit());
    shaped.then(|| candidate.to_owned())
}

/// Whether a Special Weather Statement concerns convective weather.
fn relevant_statement(text: &str) -> bool {
    let upper = text.to_ascii_uppercase();
    if patterns::SPS_EXCLUDED.is_match(&upper) {
        return false;
    }
    patterns::SPS_THUNDERSTORM_KEYWORDS
        .iter()
        .any(|keyword| upper.contains(keyword))
}

fn phenomenon_from_event_name(event: &str) -> Option<&'static str> {
    const MAPPINGS: &[(&str, &str)] = &[
        ("TORNADO", "TO"),
        ("SEVERE THUNDERSTORM", "SV"),
        ("FLASH FLOOD", "FF"),
        ("FLOOD", "FL"),
        ("WINTER STORM", "WS"),
        ("BLIZZARD", "BZ"),
        ("ICE STORM", "IS"),
        ("WIND CHILL", "WC"),
        ("WINTER WEATHER", "WW"),
        ("SPECIAL WEATHER STATEMENT", "SPS"),
        ("HIGH WIND", "HW"),
        ("LAKE EFFECT SNOW", "LE"),
        ("SNOW SQUALL", "SQ"),
    ];
    let upper = event.to_ascii_uppercase();
    MAPPINGS
        .iter()
        .find(|(name, _)| upper.contains(name))
        .map(|(_, code)| *code)
}

/// Expiration from the prose `UNTIL 430 PM EST` phrase.
fn text_expiration(text: &str, office: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let caps = patterns::EXPIRATION_TEXT.captures(text)?;
    let abbrev = caps.get(3).map(|m| m.as_str());
    let office = (!office.is_empty()).then_some(office);
    datetime::resolve_prose_time(&caps[1], &caps[2], abbrev, office, now)
}

/// The storm polygon from the `LAT...LON` block, if one decodes cleanly.
fn text_polygon(text: &str) -> Option<geo::Ring> {
    let caps = patterns::POLYGON_TEXT.captures(text)?;
    let values: Vec<u32> = patterns::COORD_VALUE
        .find_iter(&caps[1])
        .filter_map(|m| m.as_str().parse().ok())
        .collect();
    if values.len() < 6 || values.len() % 2 != 0 {
        tracing::warn!(count = values.len(), "odd or short LAT...LON block");
        return None;
    }
    geo::ring_from_text_pairs(&values)
}

fn parameter_string(parameters: &HashMap<String, serde_json::Value>, key: &str) -> Option<String> {
    match parameters.get(key)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Array(items) => items.first().and_then(|v| match v {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }),
        other => Some(other.to_string()),
    }
}

/// Threat tags the API carries as structured parameters. They win over the
/// text extraction when stronger.
fn apply_threat_parameters(parameters: &HashMap<String, serde_json::Value>, alert: &mut Alert) {
    if let Some(raw) = parameter_string(parameters, "maxWindGust") {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        if let Ok(gust) = digits.parse::<u16>() {
            if gust > alert.threat.max_wind_gust_mph.unwrap_or(0) && (10..=300).contains(&gust) {
                alert.threat.max_wind_gust_mph = Some(gust);
                alert.threat.max_wind_gust_kts = Some((gust as f64 * 0.868976).round() as u16);
            }
        }
    }

    if let Some(raw) = parameter_string(parameters, "maxHailSize") {
        let numeric: String = raw
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        if let Ok(size) = numeric.parse::<f64>() {
            if size > alert.threat.max_hail_size_inches.unwrap_or(0.0)
                && (0.25..=6.0).contains(&size)
            {
                alert.threat.max_hail_size_inches = Some(size);
            }
        }
    }

    if let Some(raw) = parameter_string(parameters, "tornadoDetection") {
        if let Some(detection) = match raw.to_ascii_uppercase().as_str() {
            "RADAR INDICATED" => Some(threat::Detection::RadarIndicated),
            "OBSERVED" => Some(threat::Detection::Observed),
            "POSSIBLE" => Some(threat::Detection::Possible),
            _ => None,
        } {
            alert.threat.tornado_detection = Some(detection);
        }
    }
}
