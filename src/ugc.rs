//! Universal Geographic Code decoding.
//!
//! A UGC block names the counties (`C`) or forecast zones (`Z`) a product
//! covers, as `SS T NNN` codes with inclusive ranges and a trailing `DDHHMM`
//! expiration:
//!
//! ```text
//! OHC049-041-061>065-201530-
//! ```
//!
//! Blocks may span several lines; continuation lines carry bare codes and
//! ranges that inherit the most recent state+type prefix.

use crate::datetime;
use crate::patterns;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// State → 2-digit FIPS prefix. County UGC codes convert to 5-digit FIPS by
/// prepending this; zone codes have no lossless FIPS mapping and are skipped.
const STATE_FIPS: &[(&str, &str)] = &[
    ("AL", "01"),
    ("AK", "02"),
    ("AZ", "04"),
    ("AR", "05"),
    ("CA", "06"),
    ("CO", "08"),
    ("CT", "09"),
    ("DE", "10"),
    ("DC", "11"),
    ("FL", "12"),
    ("GA", "13"),
    ("HI", "15"),
    ("ID", "16"),
    ("IL", "17"),
    ("IN", "18"),
    ("IA", "19"),
    ("KS", "20"),
    ("KY", "21"),
    ("LA", "22"),
    ("ME", "23"),
    ("MD", "24"),
    ("MA", "25"),
    ("MI", "26"),
    ("MN", "27"),
    ("MS", "28"),
    ("MO", "29"),
    ("MT", "30"),
    ("NE", "31"),
    ("NV", "32"),
    ("NH", "33"),
    ("NJ", "34"),
    ("NM", "35"),
    ("NY", "36"),
    ("NC", "37"),
    ("ND", "38"),
    ("OH", "39"),
    ("OK", "40"),
    ("OR", "41"),
    ("PA", "42"),
    ("RI", "44"),
    ("SC", "45"),
    ("SD", "46"),
    ("TN", "47"),
    ("TX", "48"),
    ("UT", "49"),
    ("VT", "50"),
    ("VA", "51"),
    ("WA", "53"),
    ("WV", "54"),
    ("WI", "55"),
    ("WY", "56"),
    ("AS", "60"),
    ("GU", "66"),
    ("MP", "69"),
    ("PR", "72"),
    ("VI", "78"),
];

/// A canonical 6-character UGC code, e.g. `OHC049` or `OHZ049`.
///
/// # Example
///
/// ```
/// use nwswire::ugc::UgcCode;
///
/// let code: UgcCode = "OHC049".parse().unwrap();
/// assert_eq!(code.state(), "OH");
/// assert!(code.is_county());
/// assert_eq!(code.to_fips(), Some("39049".to_string()));
///
/// assert!("OHX049".parse::<UgcCode>().is_err());
/// assert!("ohc049".parse::<UgcCode>().is_err());
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UgcCode(String);

impl UgcCode {
    /// Instantiate a code, validating the `SSTNNN` shape.
    pub fn new<S: Into<String>>(code: S) -> Result<Self, InvalidUgcError> {
        let code = code.into();
        let bytes = code.as_bytes();
        let well_formed = bytes.len() == 6
            && bytes[0].is_ascii_uppercase()
            && bytes[1].is_ascii_uppercase()
            && (bytes[2] == b'C' || bytes[2] == b'Z')
            && bytes[3..].iter().all(u8::is_ascii_digit);
        if well_formed {
            Ok(Self(code))
        } else {
            Err(InvalidUgcError::Malformed(code))
        }
    }

    /// The code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 2-letter state prefix.
    pub fn state(&self) -> &str {
        &self.0[..2]
    }

    /// Whether this is a county code (`C`).
    pub fn is_county(&self) -> bool {
        self.0.as_bytes()[2] == b'C'
    }

    /// Whether this is a forecast-zone code (`Z`).
    pub fn is_zone(&self) -> bool {
        self.0.as_bytes()[2] == b'Z'
    }

    /// The 5-digit FIPS code for county codes; `None` for zones.
    pub fn to_fips(&self) -> Option<String> {
        if !self.is_county() {
            return None;
        }
        let prefix = STATE_FIPS
            .iter()
            .find(|(state, _)| *state == self.state())
            .map(|(_, fips)| *fips)?;
        Some(format!("{}{}", prefix, &self.0[3..]))
    }
}

impl std::str::FromStr for UgcCode {
    type Err = InvalidUgcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.trim())
    }
}

impl TryFrom<String> for UgcCode {
    type Error = InvalidUgcError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UgcCode> for String {
    fn from(value: UgcCode) -> Self {
        value.0
    }
}

impl std::fmt::Display for UgcCode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The error returned when a UGC code would be invalid.
#[derive(thiserror::Error, Debug)]
pub enum InvalidUgcError {
    /// Not a 6-character `SSTNNN` code
    #[error("malformed UGC code: {0:?}")]
    Malformed(String),
}

/// The decoded UGC block of one product.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UgcBlock {
    /// Canonical codes, deduplicated and sorted.
    pub codes: Vec<UgcCode>,
    /// 5-digit FIPS codes for the county entries, deduplicated and sorted.
    pub fips: Vec<String>,
    /// Product expiration from the trailing `DDHHMM` stamp.
    pub expiration: Option<DateTime<Utc>>,
    /// The raw lines the block was decoded from.
    pub raw: String,
}

impl UgcBlock {
    /// Whether any code was decoded.
    pub fn is_valid(&self) -> bool {
        !self.codes.is_empty()
    }

    /// The distinct state prefixes covered by the block.
    pub fn states(&self) -> BTreeSet<&str> {
        self.codes.iter().map(|c| c.state()).collect()
    }
}

/// Decode the UGC block from raw product text.
///
/// `now` anchors the trailing day-of-month expiration stamp.
///
/// # Example
///
/// ```
/// use chrono::{TimeZone, Utc};
///
/// let block = nwswire::ugc::decode(
///     "OHC049-041-061>063-201630-\n",
///     Utc.with_ymd_and_hms(2025, 1, 20, 15, 30, 0).unwrap(),
/// );
/// let codes: Vec<&str> = block.codes.iter().map(|c| c.as_str()).collect();
/// assert_eq!(codes, ["OHC041", "OHC049", "OHC061", "OHC062", "OHC063"]);
/// ```
pub fn decode(text: &str, now: DateTime<Utc>) -> UgcBlock {
    let mut block = UgcBlock::default();
    let mut codes: BTreeSet<UgcCode> = BTreeSet::new();
    let mut prefix: Option<String> = None;
    let mut in_block = false;

    for line in text.lines() {
        let line = line.trim();

        if patterns::UGC_LINE_START.is_match(line) {
            in_block = true;
        } else if in_block && patterns::UGC_CONTINUATION.is_match(line) {
            // bare continuation: codes only, inherits the running prefix
        } else {
            if in_block && !line.is_empty() {
                break;
            }
            continue;
        }

        block.raw.push_str(line);
        block.raw.push('\n');
        decode_line(line, &mut prefix, &mut codes, &mut block.expiration, now);
    }

    block.codes = codes.into_iter().collect();
    block.fips = block
        .codes
        .iter()
        .filter_map(UgcCode::to_fips)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    block
}

fn decode_line(
    line: &str,
    prefix: &mut Option<String>,
    codes: &mut BTreeSet<UgcCode>,
    expiration: &mut Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) {
    let mut line = line.trim_end_matches('-').to_owned();
    line.push('-');

    let stamp = patterns::UGC_EXPIRATION
        .captures(&line)
        .map(|caps| (caps[1].to_owned(), caps.get(0).expect("whole match").start()));
    if let Some((stamp, cut)) = stamp {
        if let Some(when) = datetime::resolve_ugc_expiration(&stamp, now) {
            *expiration = Some(when);
        } else {
            tracing::warn!(%stamp, "unusable UGC expiration stamp");
        }
        line.truncate(cut);
    }

    for part in line.split('-') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some(caps) = patterns::UGC_PREFIX.captures(part) {
            let new_prefix = caps[1].to_owned();
            let remainder = &caps[2];
            if !remainder.is_empty() {
                expand(&new_prefix, remainder, codes);
            }
            *prefix = Some(new_prefix);
        } else if let Some(prefix) = prefix.as_deref() {
            expand(prefix, part, codes);
        } else if part.len() == 3 && part.bytes().all(|b| b.is_ascii_digit()) {
            tracing::warn!(code = part, "UGC code without prefix context");
        }
    }
}

/// Expand one dash-separated part into codes under a prefix.
///
/// Handles individual codes (`049`), concatenated codes (`049041`), and
/// inclusive ranges (`061>065`), with reversed ranges swapped silently.
fn expand(prefix: &str, part: &str, codes: &mut BTreeSet<UgcCode>) {
    if let Some(caps) = patterns::UGC_RANGE.captures(part) {
        let (mut start, mut end): (u32, u32) =
            match (caps[1].parse(), caps[2].parse()) {
                (Ok(s), Ok(e)) => (s, e),
                _ => return,
            };
        if start > end {
            tracing::warn!(start, end, "reversed UGC range, swapping");
            std::mem::swap(&mut start, &mut end);
        }
        for number in start..=end {
            push(prefix, number, codes);
        }

        let whole = caps.get(0).expect("whole match");
        let (before, after) = (&part[..whole.start()], &part[whole.end()..]);
        if !before.is_empty() {
            expand(prefix, before, codes);
        }
        if !after.is_empty() {
            expand(prefix, after, codes);
        }
    } else {
        for m in patterns::UGC_CODE.find_iter(part) {
            if let Ok(number) = m.as_str().parse() {
                push(prefix, number, codes);
            }
        }
    }
}

fn push(prefix: &str, number: u32, codes: &mut BTreeSet<UgcCode>) {
    if let Ok(code) = UgcCode::new(format!("{prefix}{number:03}")) {
        codes.insert(code);
    }
}

/// Keep only codes whose state prefix is in `states`. An empty filter keeps
/// everything.
pub fn filter_by_states(codes: &[UgcCode], states: &[String]) -> Vec<UgcCode> {
    if states.is_empty() {
        return codes.to_vec();
    }
    codes
        .iter()
        .filter(|code| states.iter().any(|s| s.eq_ignore_ascii_case(code.state())))
        .cloned()
        .collect()
}

/// Summarize codes as a human-readable location string, e.g.
/// `"OH (2 counties, 1 zone), IN (1 county)"`.
pub fn location_summary(codes: &[UgcCode]) -> String {
    if codes.is_empty() {
        return "Unknown".to_owned();
    }

    let mut by_state: Vec<(&str, usize, usize)> = Vec::new();
    for code in codes {
        match by_state.iter_mut().find(|(state, _, _)| *state == code.state()) {
            Some((_, counties, zones)) => {
                if code.is_county() {
                    *counties += 1;
                } else {
                    *zones += 1;
                }
            }
            None => by_state.push((
                code.state(),
                code.is_county() as usize,
                code.is_zone() as usize,
            )),
        }
    }
    by_state.sort_by_key(|(state, _, _)| *state);

    let mut parts = Vec::with_capacity(by_state.len());
    for (state, counties, zones) in by_state {
        let mut kinds = Vec::new();
        if counties > 0 {
            kinds.push(format!(
                "{} {}",
                counties,
                if counties == 1 { "county" } else { "counties" }
            ));
        }
        if zones > 0 {
            kinds.push(format!("{} {}", zones, if zones == 1 { "zone" } else { "zones" }));
        }
        parts.push(format!("{} ({})", state, kinds.join(", ")));
    }
    parts.join(", ")
}

/// Whether a display string looks like raw UGC codes rather than prose.
pub fn looks_like_codes(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty() && patterns::UGC_LINE_START.is_match(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 20, 15, 0, 0).unwrap()
    }

    #[test]
    fn single_line_with_ranges() {
        let block = decode("OHC049-041-061>065-201530-", at());
        let codes: Vec<&str> = block.codes.iter().map(UgcCode::as_str).collect();
        assert_eq!(
            codes,
            ["OHC041", "OHC049", "OHC061", "OHC062", "OHC063", "OHC064", "OHC065"]
        );
        assert_eq!(
            block.expiration,
            Some(Utc.with_ymd_and_hms(2025, 1, 20, 15, 30, 0).unwrap())
        );
    }

    #[test]
    fn range_round_trip_either_direction() {
        let forward = decode("OHC001>005-201530-", at());
        let reverse = decode("OHC005>001-201530-", at());
        assert_eq!(forward.codes, reverse.codes);
        assert_eq!(forward.codes.len(), 5);
    }

    #[test]
    fn multiple_prefixes_on_one_line() {
        let block = decode("OHC049-INC001-201530-", at());
        let codes: Vec<&str> = block.codes.iter().map(UgcCode::as_str).collect();
        assert_eq!(codes, ["INC001", "OHC049"]);
    }

    #[test]
    fn continuation_line_inherits_prefix() {
        let block = decode("OHZ049-050-\n051-052-201530-\n", at());
        let codes: Vec<&str> = block.codes.iter().map(UgcCode::as_str).collect();
        assert_eq!(codes, ["OHZ049", "OHZ050", "OHZ051", "OHZ052"]);
        assert!(block.expiration.is_some());
    }

    #[test]
    fn block_ends_at_prose() {
        let block = decode("OHC049-201530-\n\nBULLETIN - EAS ACTIVATION REQUESTED\n049-", at());
        assert_eq!(block.codes.len(), 1);
    }

    #[test]
    fn county_fips_inference() {
        let block = decode("OHC049-INC001-201530-", at());
        assert_eq!(block.fips, ["18001", "39049"]);
    }

    #[test]
    fn zones_produce_no_fips() {
        let block = decode("OHZ049-201530-", at());
        assert!(block.fips.is_empty());
    }

    #[test]
    fn state_filter() {
        let codes = vec![
            UgcCode::new("OHC001").unwrap(),
            UgcCode::new("INC001").unwrap(),
        ];
        let kept = filter_by_states(&codes, &["OH".to_owned()]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].state(), "OH");

        assert!(filter_by_states(&codes, &["CA".to_owned()]).is_empty());
        assert_eq!(filter_by_states(&codes, &[]).len(), 2);
    }

    #[test]
    fn summary_counts_by_state_and_kind() {
        let codes = vec![
            UgcCode::new("OHC001").unwrap(),
            UgcCode::new("OHC002").unwrap(),
            UgcCode::new("OHZ003").unwrap(),
            UgcCode::new("INC001").unwrap(),
        ];
        assert_eq!(
            location_summary(&codes),
            "IN (1 county), OH (2 counties, 1 zone)"
        );
    }
}
