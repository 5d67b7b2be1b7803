//! Precompiled regular expressions for NWS product text.
//!
//! Every pattern used by the decoders lives here, compiled once. The raw
//! products are upper-case by convention but the API echoes some of the same
//! phrases in mixed case, so the threat patterns are case-insensitive.

use once_cell::sync::Lazy;
use regex::Regex;

fn re(pattern: &str) -> Regex {
    // Patterns are string literals checked by the test below; a failure here
    // is a programming error, not input-dependent.
    Regex::new(pattern).expect("invalid built-in pattern")
}

/// P-VTEC: `/O.NEW.KCLE.TO.W.0001.250120T1530Z-250120T1630Z/`.
///
/// Deliberately permissive about the action code and significance so that the
/// decoder can distinguish "not a VTEC" from "a VTEC with an invalid field".
pub static VTEC: Lazy<Regex> = Lazy::new(|| {
    re(r"/([A-Z])\.([A-Z]{3})\.([A-Z]{4})\.([A-Z]{2})\.([A-Z])\.(\d{4})\.(\d{6}T\d{4}Z)-(\d{6}T\d{4}Z)/")
});

/// H-VTEC: `/00000.2.ER.250120T1530Z.250120T1800Z.250121T0000Z.NO/`.
pub static HVTEC: Lazy<Regex> = Lazy::new(|| {
    re(r"/([0-9A-Z]{5})\.([0-3NU])\.([A-Z]{2})\.(\d{6}T\d{4}Z)\.(\d{6}T\d{4}Z)\.(\d{6}T\d{4}Z)\.([A-Z]{2})/")
});

/// First line of a UGC block: `OHC049-041-061>065-201530-`.
pub static UGC_LINE_START: Lazy<Regex> = Lazy::new(|| re(r"^[A-Z]{2}[CZ]\d{3}"));

/// Continuation line carrying only codes and ranges: `066-070>072-`.
pub static UGC_CONTINUATION: Lazy<Regex> = Lazy::new(|| re(r"^[\d>-]+-$"));

/// A state+type prefix with optional trailing codes inside one dash-separated part.
pub static UGC_PREFIX: Lazy<Regex> = Lazy::new(|| re(r"^([A-Z]{2}[CZ])(.*)$"));

/// An inclusive range within a code part: `061>065`.
pub static UGC_RANGE: Lazy<Regex> = Lazy::new(|| re(r"(\d{3})>(\d{3})"));

/// A single 3-digit code.
pub static UGC_CODE: Lazy<Regex> = Lazy::new(|| re(r"\d{3}"));

/// Trailing UGC expiration stamp: `-201530-` at the end of the block.
pub static UGC_EXPIRATION: Lazy<Regex> = Lazy::new(|| re(r"(\d{6})-\s*$"));

/// WMO abbreviated heading: `WFUS53 KCLE 201530`.
pub static WMO_HEADER: Lazy<Regex> =
    Lazy::new(|| re(r"(?m)^([A-Z]{4}\d{2}) ([A-Z]{4}) (\d{6})"));

/// Tornado detection tag: `TORNADO...RADAR INDICATED`.
pub static TORNADO_DETECTION: Lazy<Regex> =
    Lazy::new(|| re(r"(?i)TORNADO\.\.\.\s*(RADAR INDICATED|OBSERVED|POSSIBLE)"));

/// Tornado damage tier tag.
pub static TORNADO_DAMAGE: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)TORNADO DAMAGE THREAT\.\.\.\s*(CONSIDERABLE|DESTRUCTIVE|CATASTROPHIC)")
});

/// Wind damage tier tag.
pub static WIND_DAMAGE: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)WIND DAMAGE THREAT\.\.\.\s*(CONSIDERABLE|DESTRUCTIVE|CATASTROPHIC)")
});

/// Hail damage tier tag.
pub static HAIL_DAMAGE: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)HAIL DAMAGE THREAT\.\.\.\s*(CONSIDERABLE|DESTRUCTIVE|CATASTROPHIC)")
});

/// Flash flood detection tag: `FLASH FLOODING...OBSERVED`.
pub static FLOOD_DETECTION: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)FLASH FLOOD(?:ING)?\.\.\.\s*(RADAR INDICATED|OBSERVED|POSSIBLE)")
});

/// Flash flood damage tier tag.
pub static FLOOD_DAMAGE: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)FLASH FLOOD DAMAGE THREAT\.\.\.\s*(CONSIDERABLE|DESTRUCTIVE|CATASTROPHIC)")
});

/// Wind gust mentions in any of the product formats.
///
/// Alternatives, in match-group order:
/// 1. `MAX WIND GUST...80 MPH`
/// 2. `WIND...70 MPH` / `WIND GUSTS...70 MPH`
/// 3. `GUSTS UP TO 60 MPH` / `GUSTS OF 45 TO 50 MPH` (captures the upper bound)
/// 4. `60 MPH WIND GUSTS` (hazard-line form)
///
/// The unit is recovered from the whole match text; sustained winds
/// ("winds 25 to 35 mph") intentionally do not match any alternative.
pub static WIND_GUST: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)(?:MAX WIND GUSTS?\.\.\.\s*(\d{1,3})|WIND(?: GUSTS?)?\.\.\.\s*(\d{1,3})|GUSTS?(?:\s+UP TO|\s+OF)?\s+(?:\d{1,3}\s+TO\s+)?(\d{1,3})|(\d{1,3})\s+(?:MPH|KT) WIND GUSTS?)\s*(?:MPH|KTS?)?")
});

/// Sustained wind range: `WINDS 25 TO 35 MPH`. Must not feed the gust value.
pub static SUSTAINED_WIND: Lazy<Regex> =
    Lazy::new(|| re(r"(?i)WINDS?\s+(\d{1,3})\s+TO\s+(\d{1,3})\s+MPH"));

/// Numeric hail size: `HAIL...1.75 INCHES` / `MAX HAIL SIZE...1.00 IN` /
/// `HAIL SIZE...UP TO 2 INCHES` / `1.00 INCH HAIL`.
pub static HAIL_SIZE: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)(?:HAIL(?: SIZE)?\.\.\.\s*(?:UP TO\s+)?(\d+(?:\.\d+)?)\s*IN(?:CH(?:ES)?)?\b|(\d+(?:\.\d+)?)\s*INCH(?:ES)? HAIL)")
});

/// Descriptive hail size: `GOLF BALL SIZE HAIL`, `HAIL UP TO TENNIS BALL SIZE`.
pub static HAIL_DESC: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)(?:\b(PEA|DIME|NICKEL|QUARTER|HALF DOLLAR|PING PONG BALL|GOLF BALL|TENNIS BALL|BASEBALL|SOFTBALL|GRAPEFRUIT)(?:[ -]SIZED?)?\s+HAIL\b|\bHAIL\b[^.\n]*?\b(PEA|DIME|NICKEL|QUARTER|HALF DOLLAR|PING PONG BALL|GOLF BALL|TENNIS BALL|BASEBALL|SOFTBALL|GRAPEFRUIT)\b)")
});

/// Named hail descriptors and their diameters in inches. Closed lookup: a
/// descriptor outside this table is ignored.
pub const HAIL_DESCRIPTIONS: &[(&str, f64)] = &[
    ("PEA", 0.25),
    ("DIME", 0.5),
    ("NICKEL", 0.88),
    ("QUARTER", 1.0),
    ("HALF DOLLAR", 1.25),
    ("PING PONG BALL", 1.5),
    ("GOLF BALL", 1.75),
    ("TENNIS BALL", 2.5),
    ("BASEBALL", 2.75),
    ("SOFTBALL", 4.0),
    ("GRAPEFRUIT", 4.5),
];

/// Snow accumulation amounts in the three product phrasings.
///
/// Groups: (1,2) `SNOW ACCUMULATION...4 TO 8 INCHES` / `...UP TO 6 INCHES`,
/// (3,4) `ACCUMULATIONS OF 4 TO 8 INCHES`, (5) `UP TO 6 INCHES OF SNOW`.
pub static SNOW_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)(?:SNOW(?:FALL)?(?:\s+ACCUMULATIONS?)?(?:\.\.\.| OF )\s*(?:UP TO\s+)?(\d+(?:\.\d+)?)(?:\s+TO\s+(\d+(?:\.\d+)?))?\s+INCH|ACCUMULATIONS?\s+OF\s+(\d+(?:\.\d+)?)(?:\s+TO\s+(\d+(?:\.\d+)?))?\s+INCH|UP TO\s+(\d+(?:\.\d+)?)\s+INCH(?:ES)?\s+OF\s+SNOW)")
});

/// Ice accumulation: `ICE ACCUMULATION...UP TO 0.25 INCHES`, ranges allowed.
pub static ICE_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)ICE ACCUMULATIONS?(?:\.\.\.| OF )\s*(?:UP TO\s+)?(\d+(?:\.\d+)?)(?:\s+TO\s+(\d+(?:\.\d+)?))?\s*(?:OF AN? )?INCH")
});

/// Storm motion in the tracking line: `TIME...MOT...LOC 1845Z 245DEG 35KT`.
pub static MOTION_TEXT: Lazy<Regex> =
    Lazy::new(|| re(r"TIME\.\.\.MOT\.\.\.LOC\s+\d{4}Z\s+(\d{1,3})\s*DEG\s+(\d{1,3})\s*KT"));

/// Storm motion in prose: `MOVING NORTHEAST AT 35 MPH`, `MOVING TO THE NE AT 40 MPH`.
pub static MOTION_PROSE: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)MOVING(?:\s+TO\s+THE)?\s+(NORTHEAST|NORTHWEST|SOUTHEAST|SOUTHWEST|NORTH|SOUTH|EAST|WEST|NNE|ENE|ESE|SSE|SSW|WSW|WNW|NNW|NE|SE|SW|NW|N|E|S|W)\s+AT\s+(\d{1,3})\s*(MPH|KTS?)")
});

/// Watch header without VTEC: `TORNADO WATCH NUMBER 150`.
pub static WATCH_HEADER: Lazy<Regex> =
    Lazy::new(|| re(r"(?i)(TORNADO|SEVERE THUNDERSTORM)\s+WATCH\s+(?:NUMBER\s+)?(\d{1,4})"));

/// The `LAT...LON` coordinate block: whitespace-separated integer pairs.
pub static POLYGON_TEXT: Lazy<Regex> = Lazy::new(|| re(r"LAT\.\.\.LON((?:\s+\d{3,5})+)"));

/// One coordinate value inside the `LAT...LON` block.
pub static COORD_VALUE: Lazy<Regex> = Lazy::new(|| re(r"\d{3,5}"));

/// Plain-text expiration phrase: `UNTIL 430 PM EST`.
pub static EXPIRATION_TEXT: Lazy<Regex> =
    Lazy::new(|| re(r"(?i)UNTIL\s+(\d{1,4})\s*(AM|PM)\s*([A-Z]{2,4})?"));

/// WMO data designators whose products are informational, never alerts.
pub const INFORMATIONAL_WMO_PREFIXES: &[&str] = &["FLUS", "NOUS", "FPUS"];

/// Keywords that make a Special Weather Statement relevant to this service.
pub const SPS_THUNDERSTORM_KEYWORDS: &[&str] = &[
    "THUNDERSTORM",
    "TSTM",
    "LIGHTNING",
    "GUSTY WINDS",
    "STRONG WINDS",
    "STRONG WIND",
    "HAIL",
    "FUNNEL",
    "WATERSPOUT",
];

/// Topic patterns that exclude a Special Weather Statement outright, checked
/// before the thunderstorm keywords.
pub static SPS_EXCLUDED: Lazy<Regex> = Lazy::new(|| {
    re(r"\b(FIRE WEATHER|FIRE DANGER|SMOKE|FOG|HEAT|RIP CURRENT|BEACH HAZARD|MARINE|AIR QUALITY|BLOWING DUST|DUST)\b")
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_patterns_compile() {
        // Forcing every Lazy ensures a bad pattern fails the suite, not a
        // production process.
        let _ = (
            VTEC.as_str(),
            HVTEC.as_str(),
            UGC_LINE_START.as_str(),
            UGC_CONTINUATION.as_str(),
            UGC_PREFIX.as_str(),
            UGC_RANGE.as_str(),
            UGC_CODE.as_str(),
            UGC_EXPIRATION.as_str(),
            WMO_HEADER.as_str(),
            TORNADO_DETECTION.as_str(),
            TORNADO_DAMAGE.as_str(),
            WIND_DAMAGE.as_str(),
            HAIL_DAMAGE.as_str(),
            FLOOD_DETECTION.as_str(),
            FLOOD_DAMAGE.as_str(),
            WIND_GUST.as_str(),
            SUSTAINED_WIND.as_str(),
            HAIL_SIZE.as_str(),
            HAIL_DESC.as_str(),
            SNOW_AMOUNT.as_str(),
            ICE_AMOUNT.as_str(),
            MOTION_TEXT.as_str(),
            MOTION_PROSE.as_str(),
            WATCH_HEADER.as_str(),
            POLYGON_TEXT.as_str(),
            COORD_VALUE.as_str(),
            EXPIRATION_TEXT.as_str(),
            SPS_EXCLUDED.as_str(),
        );
    }

    #[test]
    fn vtec_matches_typical_product() {
        let caps = VTEC
            .captures("/O.NEW.KCLE.TO.W.0001.250120T1530Z-250120T1630Z/")
            .unwrap();
        assert_eq!(&caps[1], "O");
        assert_eq!(&caps[2], "NEW");
        assert_eq!(&caps[3], "KCLE");
        assert_eq!(&caps[4], "TO");
        assert_eq!(&caps[5], "W");
        assert_eq!(&caps[6], "0001");
    }

    #[test]
    fn gust_pattern_skips_sustained_wind() {
        let text = "winds 25 to 35 mph with gusts up to 60 mph";
        let values: Vec<&str> = WIND_GUST
            .captures_iter(text)
            .filter_map(|c| (1..=4usize).find_map(|i| c.get(i)).map(|m| m.as_str()))
            .collect();
        assert_eq!(values, vec!["60"]);
        assert!(SUSTAINED_WIND.is_match(text));
    }

    #[test]
    fn hail_descriptor_both_orders() {
        let caps = HAIL_DESC.captures("GOLF BALL SIZE HAIL").unwrap();
        assert_eq!(caps.get(1).unwrap().as_str(), "GOLF BALL");

        let caps = HAIL_DESC.captures("HAIL UP TO TENNIS BALL SIZE").unwrap();
        assert_eq!(caps.get(2).unwrap().as_str(), "TENNIS BALL");
    }
}
