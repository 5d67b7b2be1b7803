//! Valid Time Event Code decoding.
//!
//! A P-VTEC string identifies an event inline in a text product:
//!
//! ```text
//! /O.NEW.KCLE.TO.W.0001.250120T1530Z-250120T1630Z/
//! ```
//!
//! product class, action, issuing office, phenomenon, significance, event
//! tracking number, and the event begin/end instants. Flood products add an
//! H-VTEC line with hydrologic details.

use crate::datetime;
use crate::patterns;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Deref;

/// Phenomenon codes this crate knows by name. Not exhaustive; an unknown
/// code parses with a warning diagnostic.
pub const KNOWN_PHENOMENA: &[&str] = &[
    "TO", "SV", "FF", "FA", "FL", "WS", "BZ", "IS", "LE", "WW", "WC", "EC", "HT", "EH", "FG",
    "SM", "HW", "EW", "WI", "DS", "FR", "FZ", "HZ", "AS", "CF", "LS", "SU", "RP", "BW", "SC",
    "SW", "RB", "SI", "GL", "SE", "SR", "HF", "TR", "HU", "TY", "SS", "TS", "MA", "SQ", "AF",
    "LO", "ZF", "ZR", "UP", "ZY", "FW", "RF", "EQ", "VO", "AV",
];

/// A VTEC action code.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    /// `NEW`: new event
    New,
    /// `CON`: continuing event, no changes
    Con,
    /// `EXT`: extended in time
    Ext,
    /// `EXA`: expanded in area
    Exa,
    /// `EXB`: extended and expanded
    Exb,
    /// `UPG`: upgraded, e.g. watch to warning
    Upg,
    /// `CAN`: cancelled
    Can,
    /// `EXP`: expired
    Exp,
    /// `COR`: correction
    Cor,
    /// `ROU`: routine
    Rou,
}

impl Action {
    fn from_code(code: &str) -> Option<Self> {
        Some(match code {
            "NEW" => Self::New,
            "CON" => Self::Con,
            "EXT" => Self::Ext,
            "EXA" => Self::Exa,
            "EXB" => Self::Exb,
            "UPG" => Self::Upg,
            "CAN" => Self::Can,
            "EXP" => Self::Exp,
            "COR" => Self::Cor,
            "ROU" => Self::Rou,
            _ => return None,
        })
    }

    /// Whether this action opens a new event.
    pub fn is_new(self) -> bool {
        self == Self::New
    }

    /// Whether this action updates an existing event.
    pub fn is_update(self) -> bool {
        matches!(
            self,
            Self::Con | Self::Ext | Self::Exa | Self::Exb | Self::Upg | Self::Cor
        )
    }

    /// Whether this action terminates an event.
    pub fn is_termination(self) -> bool {
        matches!(self, Self::Can | Self::Exp)
    }
}

/// A VTEC significance code.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum Significance {
    /// Warning
    #[serde(rename = "W")]
    Warning,
    /// Watch
    #[serde(rename = "A")]
    Watch,
    /// Advisory
    #[serde(rename = "Y")]
    Advisory,
    /// Statement
    #[serde(rename = "S")]
    Statement,
    /// Outlook
    #[serde(rename = "O")]
    Outlook,
    /// Synopsis
    #[serde(rename = "N")]
    Synopsis,
    /// Forecast
    #[serde(rename = "F")]
    Forecast,
}

impl Significance {
    /// Decode a one-letter significance code.
    pub fn from_code(code: &str) -> Option<Self> {
        Some(match code {
            "W" => Self::Warning,
            "A" => Self::Watch,
            "Y" => Self::Advisory,
            "S" => Self::Statement,
            "O" => Self::Outlook,
            "N" => Self::Synopsis,
            "F" => Self::Forecast,
            _ => return None,
        })
    }

    /// The event-name suffix for this significance, e.g. `"Warning"`.
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Warning => "Warning",
            Self::Watch => "Watch",
            Self::Advisory => "Advisory",
            Self::Statement => "Statement",
            Self::Outlook => "Outlook",
            Self::Synopsis => "Synopsis",
            Self::Forecast => "Forecast",
        }
    }
}

impl Default for Significance {
    fn default() -> Self {
        Self::Warning
    }
}

/// The identity of one tracked event, stable across every product that
/// describes it.
///
/// Warnings and advisories are scoped per office; watches are assigned one
/// ETN nationally by the Storm Prediction Center and echoed by every affected
/// office, so a watch id deliberately omits the office and watch products
/// from different offices collapse to one record.
///
/// # Example
///
/// ```
/// use nwswire::vtec;
///
/// let warning = vtec::decode("/O.NEW.KCLE.TO.W.0001.250120T1530Z-250120T1630Z/");
/// assert_eq!(warning.record.unwrap().product_id().as_str(), "TO.CLE.0001");
///
/// let watch = vtec::decode("/O.NEW.KWNS.TO.A.0150.250120T1800Z-250121T0000Z/");
/// assert_eq!(watch.record.unwrap().product_id().as_str(), "TOA.0150");
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    /// Instantiate from an already-formatted id.
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for ProductId {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProductId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// A decoded P-VTEC record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vtec {
    /// Product class: `O`perational, `T`est, `E`xperimental, e`X`periment-VTEC
    pub product_class: String,
    /// Action code
    pub action: Action,
    /// 4-character issuing office, e.g. `KCLE`
    pub office: String,
    /// 2-character phenomenon code, e.g. `TO`
    pub phenomenon: String,
    /// Significance code
    pub significance: Significance,
    /// Event tracking number
    pub event_tracking_number: u16,
    /// Event begin, `None` when the product leaves it undefined
    pub begin_time: Option<DateTime<Utc>>,
    /// Event end, `None` when the product leaves it undefined
    pub end_time: Option<DateTime<Utc>>,
    /// The VTEC string as it appeared in the product
    pub raw: String,
}

impl Vtec {
    /// Derive the stable product id for this event.
    ///
    /// Watches: `{PP}A.{ETN:04}`, office omitted. Everything else:
    /// `{PP}.{office}.{ETN:04}` with the ICAO `K` prefix stripped from the
    /// office.
    pub fn product_id(&self) -> ProductId {
        if self.significance == Significance::Watch {
            return ProductId(format!("{}A.{:04}", self.phenomenon, self.event_tracking_number));
        }

        let mut office = self.office.as_str();
        if office.len() == 4 && office.starts_with('K') {
            office = &office[1..];
        }
        ProductId(format!(
            "{}.{}.{:04}",
            self.phenomenon, office, self.event_tracking_number
        ))
    }
}

/// The outcome of scanning a product for a P-VTEC string.
///
/// `record` is present when a structurally-valid VTEC was found; `warnings`
/// carry recoverable oddities (unknown phenomenon, unparseable timestamps)
/// and `errors` explain why no record could be produced.
#[derive(Debug, Clone, Default)]
pub struct VtecScan {
    /// The decoded record, if any.
    pub record: Option<Vtec>,
    /// Recoverable diagnostics.
    pub warnings: Vec<String>,
    /// Fatal diagnostics; non-empty implies `record` is `None`.
    pub errors: Vec<String>,
}

/// Decode the first P-VTEC string found in `text`.
pub fn decode(text: &str) -> VtecScan {
    let mut scan = VtecScan::default();

    let caps = match patterns::VTEC.captures(text) {
        Some(caps) => caps,
        None => {
            scan.errors.push("no VTEC string found".to_owned());
            return scan;
        }
    };

    scan.record = decode_captures(&caps, &mut scan.warnings, &mut scan.errors);
    scan
}

/// Decode every P-VTEC string in `text`, in order of appearance.
///
/// Upgrade products (`UPG` + `NEW`) carry more than one.
pub fn decode_all(text: &str) -> Vec<VtecScan> {
    patterns::VTEC
        .captures_iter(text)
        .map(|caps| {
            let mut scan = VtecScan::default();
            scan.record = decode_captures(&caps, &mut scan.warnings, &mut scan.errors);
            scan
        })
        .collect()
}

fn decode_captures(
    caps: &regex::Captures,
    warnings: &mut Vec<String>,
    errors: &mut Vec<String>,
) -> Option<Vtec> {
    let raw = caps[0].to_owned();
    let product_class = &caps[1];
    let action_code = &caps[2];
    let office = &caps[3];
    let phenomenon = &caps[4];
    let significance_code = &caps[5];
    let etn = &caps[6];
    let begin_raw = &caps[7];
    let end_raw = &caps[8];

    if !matches!(product_class, "O" | "T" | "E" | "X") {
        warnings.push(format!(
            "unusual product class {product_class:?}, expected O/T/E/X"
        ));
    }

    let action = match Action::from_code(action_code) {
        Some(action) => action,
        None => {
            errors.push(format!("invalid action code {action_code:?}"));
            return None;
        }
    };

    let significance = match Significance::from_code(significance_code) {
        Some(significance) => significance,
        None => {
            errors.push(format!("invalid significance {significance_code:?}"));
            return None;
        }
    };

    if !KNOWN_PHENOMENA.contains(&phenomenon) {
        warnings.push(format!("unknown phenomenon code {phenomenon:?}"));
    }

    let event_tracking_number = match etn.parse::<u16>() {
        Ok(etn) => etn,
        Err(_) => {
            errors.push(format!("invalid event tracking number {etn:?}"));
            return None;
        }
    };
    if event_tracking_number == 0 {
        warnings.push("event tracking number 0 outside typical range".to_owned());
    }

    let begin_time = datetime::parse_vtec_timestamp(begin_raw);
    if begin_time.is_none() && !begin_raw.starts_with("0000") {
        warnings.push(format!("unparseable begin time {begin_raw:?}"));
    }
    let end_time = datetime::parse_vtec_timestamp(end_raw);
    if end_time.is_none() && !end_raw.starts_with("0000") {
        warnings.push(format!("unparseable end time {end_raw:?}"));
    }

    Some(Vtec {
        product_class: product_class.to_owned(),
        action,
        office: office.to_owned(),
        phenomenon: phenomenon.to_owned(),
        significance,
        event_tracking_number,
        begin_time,
        end_time,
        raw,
    })
}

/// A decoded H-VTEC (hydrologic) record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hvtec {
    /// Flood severity: `0`-`3`, `N`one, `U`nknown
    pub severity: String,
    /// Two-character immediate cause code, e.g. `ER` for excessive rainfall
    pub immediate_cause: String,
    /// Flood begin
    pub flood_begin: Option<DateTime<Utc>>,
    /// Flood crest
    pub flood_crest: Option<DateTime<Utc>>,
    /// Flood end
    pub flood_end: Option<DateTime<Utc>>,
    /// Flood record code, e.g. `NO`, `NR`, `UU`, `OO`
    pub flood_record: String,
    /// The H-VTEC string as it appeared in the product
    pub raw: String,
}

/// Decode the first H-VTEC string found in `text`, if any.
pub fn decode_hydro(text: &str) -> Option<Hvtec> {
    let caps = patterns::HVTEC.captures(text)?;
    Some(Hvtec {
        severity: caps[2].to_owned(),
        immediate_cause: caps[3].to_owned(),
        flood_begin: datetime::parse_vtec_timestamp(&caps[4]),
        flood_crest: datetime::parse_vtec_timestamp(&caps[5]),
        flood_end: datetime::parse_vtec_timestamp(&caps[6]),
        flood_record: caps[7].to_owned(),
        raw: caps[0].to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn tornado_warning() {
        let scan = decode("/O.NEW.KCLE.TO.W.0001.250120T1530Z-250120T1630Z/");
        let record = scan.record.expect("valid VTEC");
        assert!(scan.errors.is_empty());
        assert_eq!(record.product_class, "O");
        assert_eq!(record.action, Action::New);
        assert_eq!(record.office, "KCLE");
        assert_eq!(record.phenomenon, "TO");
        assert_eq!(record.significance, Significance::Warning);
        assert_eq!(record.event_tracking_number, 1);
        assert_eq!(
            record.begin_time,
            Some(Utc.with_ymd_and_hms(2025, 1, 20, 15, 30, 0).unwrap())
        );
        assert_eq!(
            record.end_time,
            Some(Utc.with_ymd_and_hms(2025, 1, 20, 16, 30, 0).unwrap())
        );
    }

    #[test]
    fn embedded_in_product_text() {
        let text = "WWUS53 KCLE 201530\nTORCLE\n\nOHC049-041-201630-\n/O.NEW.KCLE.TO.W.0001.250120T1530Z-250120T1630Z/\n\nBULLETIN - EAS ACTIVATION REQUESTED\n";
        let scan = decode(text);
        assert_eq!(scan.record.unwrap().office, "KCLE");
    }

    #[test]
    fn product_id_stable_across_parses() {
        let text = "/O.NEW.KCLE.TO.W.0001.250120T1530Z-250120T1630Z/";
        let first = decode(text).record.unwrap().product_id();
        let second = decode(text).record.unwrap().product_id();
        assert_eq!(first, second);
        assert_eq!(first.as_str(), "TO.CLE.0001");
    }

    #[test]
    fn watch_id_omits_office() {
        let cle = decode("/O.NEW.KCLE.TO.A.0150.250120T1800Z-250121T0000Z/");
        let iln = decode("/O.EXA.KILN.TO.A.0150.250120T1800Z-250121T0000Z/");
        let cle_id = cle.record.unwrap().product_id();
        let iln_id = iln.record.unwrap().product_id();
        assert_eq!(cle_id, iln_id);
        assert_eq!(cle_id.as_str(), "TOA.0150");
    }

    #[test]
    fn non_icao_office_kept_verbatim() {
        let scan = decode("/O.NEW.PHFO.SV.W.0012.250120T1530Z-250120T1630Z/");
        assert_eq!(scan.record.unwrap().product_id().as_str(), "SV.PHFO.0012");
    }

    #[test]
    fn undefined_begin_time() {
        let scan = decode("/O.CAN.KPBZ.TO.W.0003.000000T0000Z-250120T1630Z/");
        let record = scan.record.unwrap();
        assert_eq!(record.action, Action::Can);
        assert!(record.begin_time.is_none());
        assert!(record.end_time.is_some());
        assert!(scan.warnings.is_empty());
    }

    #[test]
    fn invalid_action_rejected() {
        let scan = decode("/O.XXX.KCLE.TO.W.0001.250120T1530Z-250120T1630Z/");
        assert!(scan.record.is_none());
        assert!(scan.errors.iter().any(|e| e.contains("action")));
    }

    #[test]
    fn invalid_significance_rejected() {
        let scan = decode("/O.NEW.KCLE.TO.Q.0001.250120T1530Z-250120T1630Z/");
        assert!(scan.record.is_none());
        assert!(scan.errors.iter().any(|e| e.contains("significance")));
    }

    #[test]
    fn unknown_phenomenon_warns_but_parses() {
        let scan = decode("/O.NEW.KCLE.QQ.W.0001.250120T1530Z-250120T1630Z/");
        assert!(scan.record.is_some());
        assert!(scan.warnings.iter().any(|w| w.contains("phenomenon")));
    }

    #[test]
    fn no_vtec_in_text() {
        let scan = decode("just some prose without an event code");
        assert!(scan.record.is_none());
        assert!(!scan.errors.is_empty());
    }

    #[test]
    fn action_classes() {
        assert!(Action::New.is_new());
        for action in [Action::Con, Action::Ext, Action::Exa, Action::Exb, Action::Upg, Action::Cor]
        {
            assert!(action.is_update(), "{action:?}");
        }
        for action in [Action::Can, Action::Exp] {
            assert!(action.is_termination(), "{action:?}");
        }
        assert!(!Action::Rou.is_update());
    }

    #[test]
    fn multiple_vtec_strings() {
        let text = "/O.UPG.KCLE.SV.A.0140.000000T0000Z-250121T0000Z/\n/O.NEW.KCLE.TO.W.0001.250120T1530Z-250120T1630Z/";
        let scans = decode_all(text);
        assert_eq!(scans.len(), 2);
        assert_eq!(scans[0].record.as_ref().unwrap().action, Action::Upg);
        assert_eq!(scans[1].record.as_ref().unwrap().action, Action::New);
    }

    #[test]
    fn hydro_record() {
        let hvtec = decode_hydro("/00000.2.ER.250120T1530Z.250120T1800Z.250121T0000Z.NO/").unwrap();
        assert_eq!(hvtec.severity, "2");
        assert_eq!(hvtec.immediate_cause, "ER");
        assert_eq!(hvtec.flood_record, "NO");
        assert!(hvtec.flood_crest.is_some());
    }
}
