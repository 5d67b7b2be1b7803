//! The canonical alert record.
//!
//! Every product, whether it arrived as raw NWWS text or as a GeoJSON
//! feature from the REST API, normalizes into one [`Alert`]. Identity is the
//! [`ProductId`] derived from VTEC fields, so successive products describing
//! the same event collapse onto one record in the manager.

use crate::geo::{Point, Polygon};
use crate::threat::Threat;
use crate::ugc::UgcCode;
use crate::vtec::{Hvtec, ProductId, Significance, Vtec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which feed a product arrived on.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// NWWS-OI push stream
    Nwws,
    /// NWS REST API poll
    Api,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(match self {
            Self::Nwws => "nwws",
            Self::Api => "api",
        })
    }
}

/// Lifecycle status of an alert.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    /// In effect
    Active,
    /// Past its expiration
    Expired,
    /// Terminated by a CAN/EXP product
    Cancelled,
    /// Superseded content merged in
    Updated,
}

/// Display priority, lower is more urgent. Derived solely from
/// (phenomenon, significance); never read from input.
///
/// # Example
///
/// ```
/// use nwswire::alert::Priority;
/// use nwswire::vtec::Significance;
///
/// let tornado = Priority::derive("TO", Significance::Warning);
/// let watch = Priority::derive("TO", Significance::Watch);
/// assert!(tornado < watch);
/// assert_eq!(tornado.value(), 1);
/// ```
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(u8);

impl Priority {
    /// Tornado warning
    pub const TORNADO_WARNING: Self = Self(1);
    /// Severe thunderstorm warning
    pub const SEVERE_THUNDERSTORM_WARNING: Self = Self(2);
    /// Tornado watch
    pub const TORNADO_WATCH: Self = Self(3);
    /// Flash flood warning
    pub const FLASH_FLOOD_WARNING: Self = Self(4);
    /// Severe thunderstorm watch
    pub const SEVERE_THUNDERSTORM_WATCH: Self = Self(5);
    /// Winter storm warning
    pub const WINTER_STORM_WARNING: Self = Self(6);
    /// Blizzard warning
    pub const BLIZZARD_WARNING: Self = Self(7);
    /// Ice storm warning
    pub const ICE_STORM_WARNING: Self = Self(8);
    /// Flash flood watch
    pub const FLASH_FLOOD_WATCH: Self = Self(9);
    /// Winter storm watch
    pub const WINTER_STORM_WATCH: Self = Self(10);
    /// Wind chill warning
    pub const WIND_CHILL_WARNING: Self = Self(11);
    /// Special weather statement
    pub const SPECIAL_WEATHER_STATEMENT: Self = Self(12);
    /// Winter weather advisory
    pub const WINTER_WEATHER_ADVISORY: Self = Self(13);
    /// Everything else
    pub const OTHER: Self = Self(99);

    /// Derive the priority for a (phenomenon, significance) pair.
    pub fn derive(phenomenon: &str, significance: Significance) -> Self {
        if significance == Significance::Watch {
            return match phenomenon {
                "TO" => Self::TORNADO_WATCH,
                "SV" => Self::SEVERE_THUNDERSTORM_WATCH,
                "FF" => Self::FLASH_FLOOD_WATCH,
                "WS" => Self::WINTER_STORM_WATCH,
                _ => Self::OTHER,
            };
        }
        match phenomenon {
            "TO" => Self::TORNADO_WARNING,
            "SV" => Self::SEVERE_THUNDERSTORM_WARNING,
            "FF" => Self::FLASH_FLOOD_WARNING,
            "WS" => Self::WINTER_STORM_WARNING,
            "BZ" => Self::BLIZZARD_WARNING,
            "IS" => Self::ICE_STORM_WARNING,
            "WC" => Self::WIND_CHILL_WARNING,
            "SPS" => Self::SPECIAL_WEATHER_STATEMENT,
            "WW" => Self::WINTER_WEATHER_ADVISORY,
            _ => Self::OTHER,
        }
    }

    /// The numeric value, for wire payloads and sorting.
    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::OTHER
    }
}

/// Phenomenon codes and their display names.
pub const PHENOMENON_NAMES: &[(&str, &str)] = &[
    ("TO", "Tornado"),
    ("SV", "Severe Thunderstorm"),
    ("FF", "Flash Flood"),
    ("FA", "Areal Flood"),
    ("FL", "Flood"),
    ("WS", "Winter Storm"),
    ("BZ", "Blizzard"),
    ("IS", "Ice Storm"),
    ("LE", "Lake Effect Snow"),
    ("WW", "Winter Weather"),
    ("WC", "Wind Chill"),
    ("EC", "Extreme Cold"),
    ("HT", "Heat"),
    ("EH", "Excessive Heat"),
    ("FG", "Dense Fog"),
    ("SM", "Dense Smoke"),
    ("HW", "High Wind"),
    ("EW", "Extreme Wind"),
    ("WI", "Wind"),
    ("DS", "Dust Storm"),
    ("FR", "Frost"),
    ("FZ", "Freeze"),
    ("HZ", "Hard Freeze"),
    ("AS", "Air Stagnation"),
    ("CF", "Coastal Flood"),
    ("LS", "Lakeshore Flood"),
    ("SU", "High Surf"),
    ("RP", "Rip Current"),
    ("GL", "Gale"),
    ("SE", "Hazardous Seas"),
    ("SR", "Storm"),
    ("HF", "Hurricane Force Wind"),
    ("TR", "Tropical Storm"),
    ("HU", "Hurricane"),
    ("TY", "Typhoon"),
    ("SS", "Storm Surge"),
    ("TS", "Tsunami"),
    ("MA", "Marine"),
    ("SQ", "Snow Squall"),
    ("AF", "Ashfall"),
    ("ZF", "Freezing Fog"),
    ("ZR", "Freezing Rain"),
    ("UP", "Ice Accretion"),
    ("FW", "Fire Weather"),
    ("RF", "Red Flag"),
    ("EQ", "Earthquake"),
    ("VO", "Volcano"),
    ("AV", "Avalanche"),
    ("SPS", "Special Weather Statement"),
];

/// The display name for a phenomenon code.
pub fn phenomenon_name(code: &str) -> Option<&'static str> {
    PHENOMENON_NAMES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
}

/// Synthesize an event name like `"Tornado Warning"`.
///
/// SPS products are statements by definition; the significance suffix is
/// skipped for them.
pub fn event_name(phenomenon: &str, significance: Significance) -> String {
    let base = phenomenon_name(phenomenon).unwrap_or("Unknown");
    if phenomenon == "SPS" {
        return base.to_owned();
    }
    format!("{} {}", base, significance.suffix())
}

/// One fully-parsed weather alert.
///
/// The serde form of this struct is the wire form everywhere: the persistence
/// file and the subscriber payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Stable identity; see [`Vtec::product_id`]
    pub product_id: ProductId,
    /// Upstream CAP/API message id, when the product had one
    #[serde(default)]
    pub message_id: Option<String>,
    /// Which feed the product arrived on
    pub source: Source,

    /// The decoded VTEC record, when the product carried one
    #[serde(default)]
    pub vtec: Option<Vtec>,
    /// The decoded H-VTEC record for flood products
    #[serde(default)]
    pub hvtec: Option<Hvtec>,

    /// 2-character phenomenon code, e.g. `TO`
    pub phenomenon: String,
    /// Significance code
    pub significance: Significance,
    /// Human-readable event name, e.g. `Tornado Warning`
    #[serde(default)]
    pub event_name: String,
    /// Alert headline
    #[serde(default)]
    pub headline: String,
    /// Full alert description
    #[serde(default)]
    pub description: String,
    /// Safety instructions
    #[serde(default)]
    pub instruction: String,

    /// When the product was issued
    #[serde(default)]
    pub issued_time: Option<DateTime<Utc>>,
    /// When the alert takes effect
    #[serde(default)]
    pub effective_time: Option<DateTime<Utc>>,
    /// When conditions are expected to begin
    #[serde(default)]
    pub onset_time: Option<DateTime<Utc>>,
    /// When the event ends
    #[serde(default)]
    pub expiration_time: Option<DateTime<Utc>>,
    /// When the message stops being distributed, where that differs
    #[serde(default)]
    pub message_expires: Option<DateTime<Utc>>,

    /// UGC codes the alert covers, state-filtered
    #[serde(default)]
    pub affected_areas: Vec<UgcCode>,
    /// 5-digit FIPS codes for the county entries
    #[serde(default)]
    pub fips_codes: Vec<String>,
    /// Human-readable location description
    #[serde(default)]
    pub display_locations: String,
    /// Alert geometry as closed rings of `[lat, lon]` pairs
    #[serde(default)]
    pub polygon: Polygon,
    /// Mean of the polygon vertices
    #[serde(default)]
    pub centroid: Option<Point>,

    /// Issuing office code, e.g. `KCLE`
    #[serde(default)]
    pub sender_office: String,
    /// Issuing office name, e.g. `NWS Cleveland OH`
    #[serde(default)]
    pub sender_name: String,

    /// Extracted threat block
    #[serde(default)]
    pub threat: Threat,

    /// Lifecycle status
    pub status: AlertStatus,
    /// Display priority
    pub priority: Priority,

    /// When this record was parsed
    pub parsed_at: DateTime<Utc>,
    /// When this record last changed
    pub last_updated: DateTime<Utc>,
    /// How many products have merged into this record
    #[serde(default)]
    pub update_count: u32,

    /// The raw product text; not persisted
    #[serde(skip)]
    pub raw_text: String,
}

impl Alert {
    /// A blank record for a product from `source`, stamped `now`.
    pub fn new(source: Source, now: DateTime<Utc>) -> Self {
        Self {
            product_id: ProductId::new(""),
            message_id: None,
            source,
            vtec: None,
            hvtec: None,
            phenomenon: String::new(),
            significance: Significance::default(),
            event_name: String::new(),
            headline: String::new(),
            description: String::new(),
            instruction: String::new(),
            issued_time: None,
            effective_time: None,
            onset_time: None,
            expiration_time: None,
            message_expires: None,
            affected_areas: Vec::new(),
            fips_codes: Vec::new(),
            display_locations: String::new(),
            polygon: Polygon::empty(),
            centroid: None,
            sender_office: String::new(),
            sender_name: String::new(),
            threat: Threat::default(),
            status: AlertStatus::Active,
            priority: Priority::OTHER,
            parsed_at: now,
            last_updated: now,
            update_count: 0,
            raw_text: String::new(),
        }
    }

    /// Whether the alert is past its expiration as of `now`. An alert with no
    /// expiration never expires on its own.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_time.map_or(false, |t| t <= now)
    }

    /// Whether the alert is in effect as of `now`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == AlertStatus::Active && !self.is_expired(now)
    }

    /// Whether this is a watch.
    pub fn is_watch(&self) -> bool {
        self.significance == Significance::Watch
    }

    /// Whether this is a warning.
    pub fn is_warning(&self) -> bool {
        self.significance == Significance::Warning
    }

    /// Whether the alert sorts among the life-threatening tier.
    pub fn is_high_priority(&self) -> bool {
        self.priority <= Priority::FLASH_FLOOD_WARNING
    }

    /// Seconds until expiration, `None` when open-ended.
    pub fn time_remaining_seconds(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expiration_time
            .map(|t| (t - now).num_seconds().max(0))
    }

    /// Record a merge from a newer product.
    pub fn mark_updated(&mut self, now: DateTime<Utc>) {
        self.last_updated = now;
        self.update_count += 1;
    }

    /// Record expiration.
    pub fn mark_expired(&mut self, now: DateTime<Utc>) {
        self.status = AlertStatus::Expired;
        self.mark_updated(now);
    }

    /// Record cancellation.
    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) {
        self.status = AlertStatus::Cancelled;
        self.mark_updated(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 20, 15, 0, 0).unwrap()
    }

    #[test]
    fn priority_is_derived_not_read() {
        assert_eq!(
            Priority::derive("TO", Significance::Warning),
            Priority::TORNADO_WARNING
        );
        assert_eq!(
            Priority::derive("TO", Significance::Watch),
            Priority::TORNADO_WATCH
        );
        assert_eq!(
            Priority::derive("SV", Significance::Watch),
            Priority::SEVERE_THUNDERSTORM_WATCH
        );
        assert_eq!(
            Priority::derive("ZZ", Significance::Warning),
            Priority::OTHER
        );
    }

    #[test]
    fn event_names() {
        assert_eq!(event_name("TO", Significance::Warning), "Tornado Warning");
        assert_eq!(event_name("SV", Significance::Watch), "Severe Thunderstorm Watch");
        assert_eq!(
            event_name("SPS", Significance::Statement),
            "Special Weather Statement"
        );
        assert_eq!(event_name("ZZ", Significance::Warning), "Unknown Warning");
    }

    #[test]
    fn expiry_predicates() {
        let mut alert = Alert::new(Source::Nwws, at());
        assert!(!alert.is_expired(at()));
        assert!(alert.is_active(at()));

        alert.expiration_time = Some(at() - chrono::Duration::seconds(1));
        assert!(alert.is_expired(at()));
        assert!(!alert.is_active(at()));

        alert.expiration_time = Some(at() + chrono::Duration::hours(1));
        assert!(alert.is_active(at()));
        assert_eq!(alert.time_remaining_seconds(at()), Some(3600));
    }

    #[test]
    fn update_counter_is_monotonic() {
        let mut alert = Alert::new(Source::Api, at());
        alert.mark_updated(at());
        alert.mark_updated(at());
        assert_eq!(alert.update_count, 2);
    }

    #[test]
    fn wire_form_round_trips() {
        let mut alert = Alert::new(Source::Nwws, at());
        alert.product_id = ProductId::new("TO.CLE.0001");
        alert.phenomenon = "TO".to_owned();
        alert.priority = Priority::derive("TO", Significance::Warning);
        alert.raw_text = "not persisted".to_owned();

        let json = serde_json::to_string(&alert).unwrap();
        assert!(json.contains("\"product_id\":\"TO.CLE.0001\""));
        assert!(json.contains("\"source\":\"nwws\""));
        assert!(json.contains("\"priority\":1"));
        assert!(!json.contains("not persisted"));

        let back: Alert = serde_json::from_str(&json).unwrap();
        assert_eq!(back.product_id, alert.product_id);
        assert_eq!(back.raw_text, "");
    }
}
