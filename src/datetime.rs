//! Timestamp handling for NWS products.
//!
//! NWS text products carry times in several reduced encodings:
//!
//! * P-VTEC event times: `yymmddThhmmZ`, where all zeros means "undefined";
//! * UGC block expirations: `DDHHMM`, day-of-month only, resolved forward;
//! * WMO abbreviated headings: `DDHHMM`, resolved backward (a product was
//!   issued at or before "now");
//! * prose expirations: `UNTIL 430 PM EST`, local time with an abbreviation.
//!
//! Everything in this module resolves to `chrono::DateTime<Utc>`. Local-time
//! inputs that name a timezone the table does not know are *not* silently
//! treated as UTC; the caller receives `None` and logs.

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

/// Fixed UTC offsets, in hours, for the timezone abbreviations that appear in
/// NWS products. US-specific: `CST` here is US Central, never China Standard.
const TIMEZONE_ABBREVIATIONS: &[(&str, i32)] = &[
    ("EST", -5),
    ("EDT", -4),
    ("ET", -5),
    ("CST", -6),
    ("CDT", -5),
    ("CT", -6),
    ("MST", -7),
    ("MDT", -6),
    ("MT", -7),
    ("PST", -8),
    ("PDT", -7),
    ("PT", -8),
    ("AKST", -9),
    ("AKDT", -8),
    ("AKT", -9),
    ("HST", -10),
    ("HDT", -9),
    ("HAST", -10),
    ("HADT", -9),
    ("AST", -4),
    ("ADT", -3),
    ("CHST", 10),
    ("SST", -11),
    ("UTC", 0),
    ("GMT", 0),
    ("Z", 0),
];

/// Weather Forecast Office → IANA timezone. Used to interpret prose times in
/// products that omit the abbreviation.
const WFO_TIMEZONES: &[(&str, Tz)] = &[
    // Eastern
    ("CLE", Tz::America__New_York),
    ("ILN", Tz::America__New_York),
    ("PBZ", Tz::America__New_York),
    ("RLX", Tz::America__New_York),
    ("BUF", Tz::America__New_York),
    ("BGM", Tz::America__New_York),
    ("ALY", Tz::America__New_York),
    ("OKX", Tz::America__New_York),
    ("PHI", Tz::America__New_York),
    ("LWX", Tz::America__New_York),
    ("RNK", Tz::America__New_York),
    ("AKQ", Tz::America__New_York),
    ("MHX", Tz::America__New_York),
    ("RAH", Tz::America__New_York),
    ("ILM", Tz::America__New_York),
    ("CAE", Tz::America__New_York),
    ("CHS", Tz::America__New_York),
    ("GSP", Tz::America__New_York),
    ("FFC", Tz::America__New_York),
    ("JAX", Tz::America__New_York),
    ("MLB", Tz::America__New_York),
    ("MFL", Tz::America__New_York),
    ("TBW", Tz::America__New_York),
    ("TAE", Tz::America__New_York),
    ("CAR", Tz::America__New_York),
    ("GYX", Tz::America__New_York),
    ("BOX", Tz::America__New_York),
    ("MRX", Tz::America__New_York),
    ("LMK", Tz::America__New_York),
    ("JKL", Tz::America__New_York),
    ("DTX", Tz::America__Detroit),
    ("GRR", Tz::America__Detroit),
    ("APX", Tz::America__Detroit),
    // Central
    ("HUN", Tz::America__Chicago),
    ("BMX", Tz::America__Chicago),
    ("MOB", Tz::America__Chicago),
    ("JAN", Tz::America__Chicago),
    ("MEG", Tz::America__Chicago),
    ("OHX", Tz::America__Chicago),
    ("PAH", Tz::America__Chicago),
    ("IWX", Tz::America__Indiana__Indianapolis),
    ("IND", Tz::America__Indiana__Indianapolis),
    ("LOT", Tz::America__Chicago),
    ("ILX", Tz::America__Chicago),
    ("DVN", Tz::America__Chicago),
    ("DMX", Tz::America__Chicago),
    ("ARX", Tz::America__Chicago),
    ("MKX", Tz::America__Chicago),
    ("GRB", Tz::America__Chicago),
    ("MPX", Tz::America__Chicago),
    ("DLH", Tz::America__Chicago),
    ("FGF", Tz::America__Chicago),
    ("BIS", Tz::America__Chicago),
    ("ABR", Tz::America__Chicago),
    ("FSD", Tz::America__Chicago),
    ("OAX", Tz::America__Chicago),
    ("GID", Tz::America__Chicago),
    ("LBF", Tz::America__Chicago),
    ("TOP", Tz::America__Chicago),
    ("ICT", Tz::America__Chicago),
    ("DDC", Tz::America__Chicago),
    ("GLD", Tz::America__Chicago),
    ("OUN", Tz::America__Chicago),
    ("TSA", Tz::America__Chicago),
    ("SHV", Tz::America__Chicago),
    ("LCH", Tz::America__Chicago),
    ("LIX", Tz::America__Chicago),
    ("FWD", Tz::America__Chicago),
    ("EWX", Tz::America__Chicago),
    ("HGX", Tz::America__Chicago),
    ("CRP", Tz::America__Chicago),
    ("BRO", Tz::America__Chicago),
    ("SJT", Tz::America__Chicago),
    ("MAF", Tz::America__Chicago),
    ("LUB", Tz::America__Chicago),
    ("AMA", Tz::America__Chicago),
    ("SGF", Tz::America__Chicago),
    ("LSX", Tz::America__Chicago),
    ("EAX", Tz::America__Chicago),
    ("LZK", Tz::America__Chicago),
    // Mountain
    ("UNR", Tz::America__Denver),
    ("CYS", Tz::America__Denver),
    ("BOU", Tz::America__Denver),
    ("GJT", Tz::America__Denver),
    ("PUB", Tz::America__Denver),
    ("ABQ", Tz::America__Denver),
    ("EPZ", Tz::America__Denver),
    ("SLC", Tz::America__Denver),
    ("RIW", Tz::America__Denver),
    ("BYZ", Tz::America__Denver),
    ("TFX", Tz::America__Denver),
    ("MSO", Tz::America__Denver),
    ("GGW", Tz::America__Denver),
    ("PHX", Tz::America__Phoenix),
    ("FGZ", Tz::America__Phoenix),
    ("TWC", Tz::America__Phoenix),
    ("PIH", Tz::America__Boise),
    ("BOI", Tz::America__Boise),
    // Pacific
    ("LKN", Tz::America__Los_Angeles),
    ("VEF", Tz::America__Los_Angeles),
    ("REV", Tz::America__Los_Angeles),
    ("SEW", Tz::America__Los_Angeles),
    ("OTX", Tz::America__Los_Angeles),
    ("PDT", Tz::America__Los_Angeles),
    ("PQR", Tz::America__Los_Angeles),
    ("MFR", Tz::America__Los_Angeles),
    ("EKA", Tz::America__Los_Angeles),
    ("STO", Tz::America__Los_Angeles),
    ("MTR", Tz::America__Los_Angeles),
    ("HNX", Tz::America__Los_Angeles),
    ("LOX", Tz::America__Los_Angeles),
    ("SGX", Tz::America__Los_Angeles),
    // Alaska, Pacific territories, Caribbean
    ("AFC", Tz::America__Anchorage),
    ("AFG", Tz::America__Anchorage),
    ("AJK", Tz::America__Juneau),
    ("HFO", Tz::Pacific__Honolulu),
    ("GUM", Tz::Pacific__Guam),
    ("PPG", Tz::Pacific__Pago_Pago),
    ("SJU", Tz::America__Puerto_Rico),
];

/// Look up a product timezone abbreviation.
///
/// Returns the fixed UTC offset, or `None` for an unrecognized abbreviation.
/// Callers must treat `None` as "unknown", never as UTC.
pub fn timezone_abbreviation(abbrev: &str) -> Option<chrono::FixedOffset> {
    let upper = abbrev.trim().to_ascii_uppercase();
    TIMEZONE_ABBREVIATIONS
        .iter()
        .find(|(name, _)| *name == upper)
        .and_then(|(_, hours)| chrono::FixedOffset::east_opt(hours * 3600))
}

/// Look up the IANA timezone for a Weather Forecast Office.
///
/// Accepts both the bare 3-letter code (`CLE`) and the 4-letter ICAO form
/// (`KCLE`).
pub fn wfo_timezone(wfo: &str) -> Option<Tz> {
    let mut code = wfo.trim().to_ascii_uppercase();
    if code.len() == 4 && code.starts_with('K') {
        code.remove(0);
    }
    WFO_TIMEZONES
        .iter()
        .find(|(name, _)| *name == code)
        .map(|(_, tz)| *tz)
}

/// Parse a P-VTEC timestamp (`yymmddThhmmZ`).
///
/// `000000T0000Z` (and any all-zero date) means "undefined" and yields
/// `None`. Two-digit years map into 2000–2099. Anything that resolves before
/// 1971 is garbage by the VTEC program's own timeline and is rejected.
///
/// ```
/// let t = nwswire::datetime::parse_vtec_timestamp("250120T1530Z").unwrap();
/// assert_eq!(t.to_rfc3339(), "2025-01-20T15:30:00+00:00");
///
/// assert!(nwswire::datetime::parse_vtec_timestamp("000000T0000Z").is_none());
/// assert!(nwswire::datetime::parse_vtec_timestamp("251320T1530Z").is_none());
/// ```
pub fn parse_vtec_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let clean = value.trim().trim_end_matches('Z');
    if clean.starts_with("0000") {
        return None;
    }
    if clean.len() != 11 || clean.as_bytes()[6] != b'T' {
        return None;
    }

    let digits = |range: std::ops::Range<usize>| clean.get(range)?.parse::<u32>().ok();
    let year = 2000 + digits(0..2)? as i32;
    let month = digits(2..4)?;
    let day = digits(4..6)?;
    let hour = digits(7..9)?;
    let minute = digits(9..11)?;

    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let when = Utc.from_utc_datetime(&date.and_hms_opt(hour, minute, 0)?);

    if when < Utc.with_ymd_and_hms(1971, 1, 1, 0, 0, 0).unwrap() {
        return None;
    }
    Some(when)
}

/// Reconstruct a UGC `DDHHMM` expiration stamp to a full instant.
///
/// The stamp carries only a day-of-month; the month and year come from `now`.
/// An instant that lands in the past is advanced to the next month, since UGC
/// expirations are always in the near future.
pub fn resolve_ugc_expiration(stamp: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (day, hour, minute) = split_ddhhmm(stamp)?;
    match with_day(now.year(), now.month(), day, hour, minute) {
        Some(t) if t >= now => Some(t),
        _ => {
            let (year, month) = next_month(now.year(), now.month());
            with_day(year, month, day, hour, minute)
        }
    }
}

/// Reconstruct a WMO-heading `DDHHMM` issuance stamp to a full instant.
///
/// Issuance is at or before "now", so an instant that lands in the future
/// (month rollover between issuance and receipt) steps back one month.
pub fn resolve_wmo_issuance(stamp: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (day, hour, minute) = split_ddhhmm(stamp)?;
    match with_day(now.year(), now.month(), day, hour, minute) {
        // An hour of tolerance for clock skew between the office and us.
        Some(t) if t <= now + Duration::hours(1) => Some(t),
        _ => {
            let (year, month) = previous_month(now.year(), now.month());
            with_day(year, month, day, hour, minute)
        }
    }
}

fn split_ddhhmm(stamp: &str) -> Option<(u32, u32, u32)> {
    if stamp.len() != 6 || !stamp.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let day = stamp[0..2].parse().ok()?;
    let hour = stamp[2..4].parse().ok()?;
    let minute = stamp[4..6].parse().ok()?;
    if !(1..=31).contains(&day) || hour > 23 || minute > 59 {
        return None;
    }
    Some((day, hour, minute))
}

fn with_day(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(hour, minute, 0)?))
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

fn previous_month(year: i32, month: u32) -> (i32, u32) {
    if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

/// Parse an RFC 3339 / ISO 8601 timestamp from the REST API to UTC.
pub fn parse_iso_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Resolve a prose expiration like `430 PM EST` to an instant near `now`.
///
/// The clock value is `h`, `hmm`, or `hhmm`. When the product names a
/// timezone abbreviation it wins; otherwise the issuing office's IANA zone is
/// consulted. With neither, the time is unusable and `None` is returned. The
/// instant is placed on the first day (today or tomorrow in the product's
/// zone) where it does not fall more than an hour in the past.
pub fn resolve_prose_time(
    clock: &str,
    meridiem: &str,
    abbrev: Option<&str>,
    office: Option<&str>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let raw: u32 = clock.parse().ok()?;
    let (mut hour, minute) = if raw >= 100 {
        (raw / 100, raw % 100)
    } else {
        (raw, 0)
    };
    if hour == 0 || hour > 12 || minute > 59 {
        return None;
    }
    match meridiem.to_ascii_uppercase().as_str() {
        "AM" => {
            if hour == 12 {
                hour = 0;
            }
        }
        "PM" => {
            if hour != 12 {
                hour += 12;
            }
        }
        _ => return None,
    }

    if let Some(offset) = abbrev.and_then(timezone_abbreviation) {
        return place_local(&offset, hour, minute, now);
    }
    if let Some(tz) = office.and_then(wfo_timezone) {
        return place_local(&tz, hour, minute, now);
    }
    None
}

fn place_local<Z: TimeZone>(
    zone: &Z,
    hour: u32,
    minute: u32,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let local_now = now.with_timezone(zone);
    for day_offset in 0..2 {
        let date = local_now.date_naive() + Duration::days(day_offset);
        let candidate = match zone.from_local_datetime(&date.and_hms_opt(hour, minute, 0)?) {
            LocalResult::Single(t) => t,
            LocalResult::Ambiguous(t, _) => t,
            LocalResult::None => continue,
        };
        let candidate = candidate.with_timezone(&Utc);
        if candidate >= now - Duration::hours(1) {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vtec_timestamp_round_trip() {
        let t = parse_vtec_timestamp("250120T1530Z").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2025, 1, 20, 15, 30, 0).unwrap());
    }

    #[test]
    fn vtec_timestamp_undefined() {
        assert!(parse_vtec_timestamp("000000T0000Z").is_none());
    }

    #[test]
    fn vtec_timestamp_without_z() {
        assert!(parse_vtec_timestamp("250120T1530").is_some());
    }

    #[test]
    fn vtec_timestamp_garbage() {
        assert!(parse_vtec_timestamp("invalid").is_none());
        assert!(parse_vtec_timestamp("251320T1530Z").is_none()); // month 13
        assert!(parse_vtec_timestamp("250120T2561Z").is_none()); // minute 61
    }

    #[test]
    fn ugc_expiration_same_month() {
        let now = Utc.with_ymd_and_hms(2025, 1, 20, 15, 0, 0).unwrap();
        let t = resolve_ugc_expiration("201630", now).unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2025, 1, 20, 16, 30, 0).unwrap());
    }

    #[test]
    fn ugc_expiration_rolls_forward() {
        // Day 01 seen on Jan 31 means Feb 1.
        let now = Utc.with_ymd_and_hms(2025, 1, 31, 23, 0, 0).unwrap();
        let t = resolve_ugc_expiration("010200", now).unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2025, 2, 1, 2, 0, 0).unwrap());
    }

    #[test]
    fn wmo_issuance_rolls_backward() {
        // Day 31 seen on Feb 1 means Jan 31.
        let now = Utc.with_ymd_and_hms(2025, 2, 1, 0, 30, 0).unwrap();
        let t = resolve_wmo_issuance("312355", now).unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2025, 1, 31, 23, 55, 0).unwrap());
    }

    #[test]
    fn prose_time_with_abbreviation() {
        let now = Utc.with_ymd_and_hms(2025, 1, 20, 20, 30, 0).unwrap(); // 3:30 PM EST
        let t = resolve_prose_time("430", "PM", Some("EST"), None, now).unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2025, 1, 20, 21, 30, 0).unwrap());
    }

    #[test]
    fn prose_time_from_office_zone() {
        let now = Utc.with_ymd_and_hms(2025, 6, 20, 20, 30, 0).unwrap(); // 4:30 PM EDT
        let t = resolve_prose_time("6", "PM", None, Some("KCLE"), now).unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2025, 6, 20, 22, 0, 0).unwrap());
    }

    #[test]
    fn prose_time_unknown_zone_is_not_utc() {
        let now = Utc::now();
        assert!(resolve_prose_time("430", "PM", Some("XYZ"), None, now).is_none());
    }

    #[test]
    fn wfo_lookup_strips_icao_prefix() {
        assert_eq!(wfo_timezone("KCLE"), Some(Tz::America__New_York));
        assert_eq!(wfo_timezone("CLE"), Some(Tz::America__New_York));
        assert_eq!(wfo_timezone("ZZZ"), None);
    }
}
