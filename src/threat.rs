//! Threat-tag extraction from alert text.
//!
//! Modern warning products carry structured "threat tags" near the end of the
//! text (`TORNADO...RADAR INDICATED`, `HAIL...1.75 INCHES`, the
//! `TIME...MOT...LOC` tracking line). This module pulls them into a
//! [`Threat`] block. Quantities outside documented reasonable ranges are
//! dropped with a warning log, never truncated to fit.

use crate::patterns;
use serde::{Deserialize, Serialize};

/// How a hazard was detected.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum Detection {
    /// Inferred from radar signature
    #[serde(rename = "RADAR INDICATED")]
    RadarIndicated,
    /// Confirmed by spotters or other ground truth
    #[serde(rename = "OBSERVED")]
    Observed,
    /// Conditions favorable, not yet indicated
    #[serde(rename = "POSSIBLE")]
    Possible,
}

impl Detection {
    fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag.to_ascii_uppercase().as_str() {
            "RADAR INDICATED" => Self::RadarIndicated,
            "OBSERVED" => Self::Observed,
            "POSSIBLE" => Self::Possible,
            _ => return None,
        })
    }
}

/// Damage tier escalation carried by a threat tag.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub enum DamageTier {
    /// Considerable damage expected
    #[serde(rename = "CONSIDERABLE")]
    Considerable,
    /// Destructive damage expected
    #[serde(rename = "DESTRUCTIVE")]
    Destructive,
    /// Catastrophic damage expected
    #[serde(rename = "CATASTROPHIC")]
    Catastrophic,
}

impl DamageTier {
    fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag.to_ascii_uppercase().as_str() {
            "CONSIDERABLE" => Self::Considerable,
            "DESTRUCTIVE" => Self::Destructive,
            "CATASTROPHIC" => Self::Catastrophic,
            _ => return None,
        })
    }
}

/// Storm motion from the tracking line or prose.
///
/// `direction_degrees` is the compass direction the storm is moving *toward*;
/// `direction_from` is the opposite point, the form people say out loud
/// ("a storm out of the southwest").
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StormMotion {
    /// Degrees the storm is moving toward, 0-360
    pub direction_degrees: Option<u16>,
    /// Cardinal direction the storm is coming from
    pub direction_from: Option<String>,
    /// Speed in miles per hour
    pub speed_mph: Option<u16>,
    /// Speed in knots
    pub speed_kts: Option<u16>,
}

impl StormMotion {
    /// Whether the motion carries both a direction and a speed.
    pub fn is_valid(&self) -> bool {
        self.direction_degrees.is_some() && self.speed_mph.is_some()
    }
}

/// The threat block of one alert.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Threat {
    /// Tornado detection tag
    pub tornado_detection: Option<Detection>,
    /// Tornado damage tier
    pub tornado_damage_threat: Option<DamageTier>,
    /// Maximum wind gust over all mentions, miles per hour
    pub max_wind_gust_mph: Option<u16>,
    /// Maximum wind gust, knots
    pub max_wind_gust_kts: Option<u16>,
    /// Sustained wind range minimum, miles per hour
    pub sustained_wind_min_mph: Option<u16>,
    /// Sustained wind range maximum, miles per hour
    pub sustained_wind_max_mph: Option<u16>,
    /// Wind damage tier
    pub wind_damage_threat: Option<DamageTier>,
    /// Maximum hail size, inches
    pub max_hail_size_inches: Option<f64>,
    /// Hail damage tier
    pub hail_damage_threat: Option<DamageTier>,
    /// Snow accumulation minimum, inches
    pub snow_amount_min_inches: Option<f64>,
    /// Snow accumulation maximum, inches
    pub snow_amount_max_inches: Option<f64>,
    /// Ice accumulation, inches
    pub ice_accumulation_inches: Option<f64>,
    /// Flash flood detection tag
    pub flash_flood_detection: Option<Detection>,
    /// Flash flood damage tier
    pub flash_flood_damage_threat: Option<DamageTier>,
    /// Storm motion
    pub storm_motion: Option<StormMotion>,
}

impl Threat {
    /// Whether any tornado tag is present.
    pub fn has_tornado(&self) -> bool {
        self.tornado_detection.is_some()
    }

    /// Whether the gust maximum reaches significant severe criteria (70 mph).
    pub fn has_significant_wind(&self) -> bool {
        self.max_wind_gust_mph.map_or(false, |mph| mph >= 70)
    }

    /// Whether the hail size reaches severe criteria (1 inch).
    pub fn has_significant_hail(&self) -> bool {
        self.max_hail_size_inches.map_or(false, |size| size >= 1.0)
    }

    /// Particularly Dangerous Situation: any damage tier at CONSIDERABLE or
    /// above.
    pub fn is_pds(&self) -> bool {
        self.tornado_damage_threat.is_some()
            || self.wind_damage_threat.is_some()
            || self.hail_damage_threat.is_some()
            || self.flash_flood_damage_threat.is_some()
    }

    /// Whether any field was extracted at all.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

const MPH_PER_KNOT: f64 = 1.15078;
const KNOTS_PER_MPH: f64 = 0.868976;

fn kts_to_mph(kts: u16) -> u16 {
    (kts as f64 * MPH_PER_KNOT).round() as u16
}

fn mph_to_kts(mph: u16) -> u16 {
    (mph as f64 * KNOTS_PER_MPH).round() as u16
}

/// Extract the full threat block from alert text.
pub fn extract(text: &str) -> Threat {
    let mut threat = Threat::default();
    if text.is_empty() {
        return threat;
    }

    threat.tornado_detection = patterns::TORNADO_DETECTION
        .captures(text)
        .and_then(|c| Detection::from_tag(&c[1]));
    threat.tornado_damage_threat = patterns::TORNADO_DAMAGE
        .captures(text)
        .and_then(|c| DamageTier::from_tag(&c[1]));
    threat.wind_damage_threat = patterns::WIND_DAMAGE
        .captures(text)
        .and_then(|c| DamageTier::from_tag(&c[1]));
    threat.hail_damage_threat = patterns::HAIL_DAMAGE
        .captures(text)
        .and_then(|c| DamageTier::from_tag(&c[1]));
    threat.flash_flood_detection = patterns::FLOOD_DETECTION
        .captures(text)
        .and_then(|c| Detection::from_tag(&c[1]));
    threat.flash_flood_damage_threat = patterns::FLOOD_DAMAGE
        .captures(text)
        .and_then(|c| DamageTier::from_tag(&c[1]));

    let (sustained_min, sustained_max) = sustained_wind(text);
    threat.sustained_wind_min_mph = sustained_min;
    threat.sustained_wind_max_mph = sustained_max;

    if let Some(mph) = max_wind_gust(text) {
        threat.max_wind_gust_mph = Some(mph);
        threat.max_wind_gust_kts = Some(mph_to_kts(mph));
    }

    threat.max_hail_size_inches = hail_size(text);

    let (snow_min, snow_max) = snow_amount(text);
    threat.snow_amount_min_inches = snow_min;
    threat.snow_amount_max_inches = snow_max;
    threat.ice_accumulation_inches = ice_amount(text);

    threat.storm_motion = storm_motion(text);

    threat
}

/// The maximum wind gust over every gust-context mention, in mph.
///
/// "winds 25 to 35 mph with gusts up to 60 mph" yields 60: the sustained
/// range never enters this computation. Values outside 10-300 mph are
/// dropped with a warning.
pub fn max_wind_gust(text: &str) -> Option<u16> {
    let mut best: Option<u16> = None;

    for caps in patterns::WIND_GUST.captures_iter(text) {
        let value: u16 = match (1..=4usize).find_map(|i| caps.get(i)).map(|m| m.as_str().parse()) {
            Some(Ok(v)) => v,
            _ => continue,
        };

        if !(10..=300).contains(&value) {
            tracing::warn!(value, "wind gust outside 10-300 mph, ignoring");
            continue;
        }

        let matched = caps[0].to_ascii_uppercase();
        let mph = if matched.contains("KT") && !matched.contains("MPH") {
            kts_to_mph(value)
        } else {
            value
        };

        if best.map_or(true, |b| mph > b) {
            best = Some(mph);
        }
    }
    best
}

/// The sustained wind range `winds X to Y mph`, validated to 5-200 mph.
pub fn sustained_wind(text: &str) -> (Option<u16>, Option<u16>) {
    if let Some(caps) = patterns::SUSTAINED_WIND.captures(text) {
        if let (Ok(mut min), Ok(mut max)) = (caps[1].parse::<u16>(), caps[2].parse::<u16>()) {
            if min > max {
                std::mem::swap(&mut min, &mut max);
            }
            if (5..=200).contains(&min) && (5..=200).contains(&max) {
                return (Some(min), Some(max));
            }
            tracing::warn!(min, max, "sustained wind outside 5-200 mph, ignoring");
        }
    }
    (None, None)
}

/// Hail size in inches: numeric first, then a named descriptor through the
/// closed lookup. Values outside 0.25-6.0 inches are dropped with a warning.
pub fn hail_size(text: &str) -> Option<f64> {
    if let Some(caps) = patterns::HAIL_SIZE.captures(text) {
        let value = caps
            .get(1)
            .or_else(|| caps.get(2))
            .and_then(|m| m.as_str().parse::<f64>().ok());
        if let Some(value) = value {
            if (0.25..=6.0).contains(&value) {
                return Some(value);
            }
            tracing::warn!(value, "hail size outside 0.25-6.0 inches, ignoring");
        }
    }

    if let Some(caps) = patterns::HAIL_DESC.captures(text) {
        let description = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_ascii_uppercase())?;
        return patterns::HAIL_DESCRIPTIONS
            .iter()
            .find(|(name, _)| *name == description)
            .map(|(_, size)| *size);
    }
    None
}

/// Snow accumulation as a (min, max) range in inches.
///
/// Requires SNOW or ACCUMULATION somewhere in the text so that unrelated
/// "up to N inches" phrases (hail, rainfall) are not misread. Validated to
/// 0.1-60 inches.
pub fn snow_amount(text: &str) -> (Option<f64>, Option<f64>) {
    let upper = text.to_ascii_uppercase();
    if !upper.contains("SNOW") && !upper.contains("ACCUMULATION") {
        return (None, None);
    }

    if let Some(caps) = patterns::SNOW_AMOUNT.captures(text) {
        let pair = if let Some(min) = caps.get(1) {
            Some((min, caps.get(2)))
        } else if let Some(min) = caps.get(3) {
            Some((min, caps.get(4)))
        } else {
            caps.get(5).map(|min| (min, None))
        };

        if let Some((min, max)) = pair {
            let min: f64 = match min.as_str().parse() {
                Ok(v) => v,
                Err(_) => return (None, None),
            };
            let max: f64 = max
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(min);
            let (min, max) = if min <= max { (min, max) } else { (max, min) };

            if (0.1..=60.0).contains(&min) && (0.1..=60.0).contains(&max) {
                return (Some(min), Some(max));
            }
            tracing::warn!(min, max, "snow amount outside 0.1-60 inches, ignoring");
        }
    }
    (None, None)
}

/// Ice accumulation in inches; the maximum of a range. Validated to
/// 0.01-3.0 inches.
pub fn ice_amount(text: &str) -> Option<f64> {
    let caps = patterns::ICE_AMOUNT.captures(text)?;
    let value: f64 = caps
        .get(2)
        .or_else(|| caps.get(1))?
        .as_str()
        .parse()
        .ok()?;
    if (0.01..=3.0).contains(&value) {
        Some(value)
    } else {
        tracing::warn!(value, "ice accumulation outside 0.01-3.0 inches, ignoring");
        None
    }
}

/// Compass points in tracking order, 22.5° apart.
const CARDINALS: [&str; 16] = [
    "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW",
    "NNW",
];

fn degrees_to_cardinal(degrees: u16) -> &'static str {
    let index = ((degrees % 360) as f64 / 22.5).round() as usize % 16;
    CARDINALS[index]
}

fn cardinal_to_degrees(cardinal: &str) -> Option<u16> {
    CARDINALS
        .iter()
        .position(|c| *c == cardinal)
        .map(|i| (i as f64 * 22.5).round() as u16)
}

fn opposite_cardinal(cardinal: &str) -> Option<&'static str> {
    CARDINALS
        .iter()
        .position(|c| c.eq_ignore_ascii_case(cardinal))
        .map(|i| CARDINALS[(i + 8) % 16])
}

/// Storm motion from the `TIME...MOT...LOC` line, falling back to the prose
/// `MOVING <direction> AT <speed>` form.
pub fn storm_motion(text: &str) -> Option<StormMotion> {
    if let Some(caps) = patterns::MOTION_TEXT.captures(text) {
        if let (Ok(degrees), Ok(kts)) = (caps[1].parse::<u16>(), caps[2].parse::<u16>()) {
            let toward = degrees_to_cardinal(degrees);
            return Some(StormMotion {
                direction_degrees: Some(degrees % 360),
                direction_from: opposite_cardinal(toward).map(str::to_owned),
                speed_mph: Some(kts_to_mph(kts)),
                speed_kts: Some(kts),
            });
        }
    }

    if let Some(caps) = patterns::MOTION_PROSE.captures(text) {
        let toward = normalize_cardinal(&caps[1]);
        let speed: u16 = caps[2].parse().ok()?;
        let unit = caps[3].to_ascii_uppercase();

        let degrees = cardinal_to_degrees(&toward)?;
        let (mph, kts) = if unit.starts_with("KT") {
            (kts_to_mph(speed), speed)
        } else {
            (speed, mph_to_kts(speed))
        };

        // The prose names where the storm is headed; people track storms by
        // where they come from.
        let from = opposite_cardinal(&toward)?;
        return Some(StormMotion {
            direction_degrees: Some(degrees),
            direction_from: Some(from.to_owned()),
            speed_mph: Some(mph),
            speed_kts: Some(kts),
        });
    }
    None
}

fn normalize_cardinal(cardinal: &str) -> String {
    match cardinal.to_ascii_uppercase().as_str() {
        "NORTH" => "N".to_owned(),
        "NORTHEAST" => "NE".to_owned(),
        "EAST" => "E".to_owned(),
        "SOUTHEAST" => "SE".to_owned(),
        "SOUTH" => "S".to_owned(),
        "SOUTHWEST" => "SW".to_owned(),
        "WEST" => "W".to_owned(),
        "NORTHWEST" => "NW".to_owned(),
        other => other.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tornado_detection_tags() {
        assert_eq!(
            extract("TORNADO...RADAR INDICATED").tornado_detection,
            Some(Detection::RadarIndicated)
        );
        assert_eq!(
            extract("TORNADO...OBSERVED").tornado_detection,
            Some(Detection::Observed)
        );
        assert_eq!(
            extract("TORNADO...POSSIBLE").tornado_detection,
            Some(Detection::Possible)
        );
        assert_eq!(
            extract("A severe thunderstorm is approaching.").tornado_detection,
            None
        );
    }

    #[test]
    fn damage_tiers() {
        assert_eq!(
            extract("TORNADO DAMAGE THREAT...CONSIDERABLE").tornado_damage_threat,
            Some(DamageTier::Considerable)
        );
        assert_eq!(
            extract("WIND DAMAGE THREAT...DESTRUCTIVE").wind_damage_threat,
            Some(DamageTier::Destructive)
        );
        assert_eq!(
            extract("FLASH FLOOD DAMAGE THREAT...CATASTROPHIC").flash_flood_damage_threat,
            Some(DamageTier::Catastrophic)
        );
    }

    #[test]
    fn gust_takes_maximum_not_sustained() {
        let threat = extract("winds 25 to 35 mph with gusts up to 60 mph");
        assert_eq!(threat.max_wind_gust_mph, Some(60));
        assert_eq!(threat.sustained_wind_min_mph, Some(25));
        assert_eq!(threat.sustained_wind_max_mph, Some(35));
    }

    #[test]
    fn gust_formats() {
        assert_eq!(max_wind_gust("WIND...70 MPH"), Some(70));
        assert_eq!(max_wind_gust("MAX WIND GUST...80 MPH"), Some(80));
        assert_eq!(max_wind_gust("WIND GUSTS UP TO 65 MPH"), Some(65));
        assert_eq!(max_wind_gust("HAZARD...60 MPH WIND GUSTS."), Some(60));
    }

    #[test]
    fn gust_knots_converted() {
        let threat = extract("WIND...60 KT");
        assert_eq!(threat.max_wind_gust_kts, Some(60));
        let mph = threat.max_wind_gust_mph.unwrap();
        assert!(mph > 60, "mph {mph} should exceed the knot value");
    }

    #[test]
    fn gust_out_of_range_rejected() {
        assert_eq!(max_wind_gust("WIND...5 MPH"), None);
        assert_eq!(max_wind_gust("WIND...500 MPH"), None);
    }

    #[test]
    fn hail_numeric() {
        assert_eq!(hail_size("HAIL...1.75 INCHES"), Some(1.75));
        assert_eq!(hail_size("HAIL SIZE...UP TO 2 INCHES"), Some(2.0));
        assert_eq!(hail_size("HAIL...9 INCHES"), None);
    }

    #[test]
    fn hail_descriptors() {
        assert_eq!(hail_size("GOLF BALL SIZE HAIL"), Some(1.75));
        assert_eq!(hail_size("QUARTER SIZE HAIL POSSIBLE"), Some(1.0));
        assert_eq!(hail_size("UP TO TENNIS BALL SIZE HAIL"), Some(2.5));
    }

    #[test]
    fn snow_range() {
        let (min, max) = snow_amount("SNOW ACCUMULATION...4 TO 8 INCHES");
        assert_eq!((min, max), (Some(4.0), Some(8.0)));

        let (min, max) = snow_amount("SNOW ACCUMULATION...UP TO 6 INCHES");
        assert_eq!((min, max), (Some(6.0), Some(6.0)));

        let (min, max) = snow_amount("total accumulations of 4 to 8 inches expected");
        assert_eq!((min, max), (Some(4.0), Some(8.0)));
    }

    #[test]
    fn snow_requires_context() {
        assert_eq!(snow_amount("WIND GUSTS UP TO 6 INCHES"), (None, None));
    }

    #[test]
    fn ice_range_takes_maximum() {
        assert_eq!(ice_amount("ICE ACCUMULATION...UP TO 0.5 INCHES"), Some(0.5));
        assert_eq!(
            ice_amount("ICE ACCUMULATIONS OF 0.1 TO 0.25 INCHES"),
            Some(0.25)
        );
    }

    #[test]
    fn motion_tracking_line() {
        let motion = storm_motion("TIME...MOT...LOC 1845Z 245DEG 35KT 4105 8132").unwrap();
        assert_eq!(motion.direction_degrees, Some(245));
        assert_eq!(motion.speed_kts, Some(35));
        assert_eq!(motion.speed_mph, Some(40));
        assert!(motion.is_valid());
    }

    #[test]
    fn motion_prose_cardinal_is_toward() {
        let motion = storm_motion("MOVING NORTHEAST AT 35 MPH").unwrap();
        assert_eq!(motion.direction_degrees, Some(45));
        assert_eq!(motion.direction_from.as_deref(), Some("SW"));
        assert_eq!(motion.speed_mph, Some(35));
        assert_eq!(motion.speed_kts, Some(30));
    }

    #[test]
    fn motion_prose_to_the_form() {
        let motion = storm_motion("MOVING TO THE NE AT 40 MPH").unwrap();
        assert_eq!(motion.direction_degrees, Some(45));
        assert_eq!(motion.speed_mph, Some(40));
    }

    #[test]
    fn no_motion() {
        assert!(storm_motion("A tornado warning is in effect.").is_none());
    }

    #[test]
    fn pds_flag() {
        assert!(extract("TORNADO DAMAGE THREAT...CATASTROPHIC").is_pds());
        assert!(extract("WIND DAMAGE THREAT...DESTRUCTIVE").is_pds());
        assert!(!extract("WIND...60 MPH").is_pds());
    }

    #[test]
    fn full_severe_thunderstorm_block() {
        let text = "SEVERE THUNDERSTORM WARNING\n\nHAZARD...60 MPH WIND GUSTS AND QUARTER SIZE HAIL.\n\nSOURCE...RADAR INDICATED.\n\nTIME...MOT...LOC 1830Z 250DEG 30KT 4105 8140";
        let threat = extract(text);
        assert_eq!(threat.max_wind_gust_mph, Some(60));
        assert_eq!(threat.max_hail_size_inches, Some(1.0));
        let motion = threat.storm_motion.unwrap();
        assert_eq!(motion.direction_degrees, Some(250));
        assert_eq!(motion.speed_kts, Some(30));
    }
}
