//! Threat extraction from free-form product prose
//!
//! Extraction is two-phase: a scanner first tags each line with the threat
//! classes its tokens mention, then the numeric patterns run only against
//! lines carrying the matching tag. Numbers can never jump categories this
//! way; "up to 1 inch of quick snow" is snow because the line says SNOW,
//! and can never be read as hail.

use stormwire_common::alert::{StormMotion, ThreatData};

use super::patterns;

const CARDINALS: [&str; 16] = [
    "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW",
    "NNW",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LineTags {
    hail: bool,
    wind: bool,
    snow: bool,
    ice: bool,
    tornado: bool,
    flood: bool,
    motion: bool,
}

fn tag_line(line: &str) -> LineTags {
    let upper = line.to_ascii_uppercase();
    LineTags {
        hail: upper.contains("HAIL") || upper.contains("SIZE"),
        wind: upper.contains("WIND") || upper.contains("GUST"),
        snow: upper.contains("SNOW"),
        ice: upper.contains("ICE"),
        tornado: upper.contains("TORNADO"),
        flood: upper.contains("FLOOD"),
        motion: upper.contains("MOVING") || upper.contains("MOT..."),
    }
}

/// Extract all threat fields from a product segment.
pub fn parse(text: &str) -> ThreatData {
    let mut threat = ThreatData::default();

    for line in text.lines() {
        let tags = tag_line(line);

        if tags.tornado {
            extract_tornado(line, &mut threat);
        }
        if tags.wind {
            extract_wind(line, &mut threat);
        }
        if tags.hail {
            extract_hail(line, &mut threat);
        }
        if tags.snow {
            extract_snow(line, &mut threat);
        }
        if tags.ice {
            extract_ice(line, &mut threat);
        }
        if tags.flood {
            extract_flood(line, &mut threat);
        }
        if tags.motion && threat.storm_motion.is_none() {
            threat.storm_motion = extract_motion(line);
        }
    }

    // The TIME...MOT...LOC line spans the whole segment tail; run it once
    // over the full text so wrapped lines still decode.
    if threat.storm_motion.is_none() {
        threat.storm_motion = extract_motion(text);
    }

    threat
}

fn extract_tornado(line: &str, threat: &mut ThreatData) {
    if threat.tornado_detection.is_none() {
        if let Some(caps) = patterns::TORNADO_DETECTION.captures(line) {
            threat.tornado_detection = Some(normalize_spaces(&caps[1]));
        }
    }
    if threat.tornado_damage_threat.is_none() {
        if let Some(caps) = patterns::TORNADO_DAMAGE.captures(line) {
            threat.tornado_damage_threat = Some(caps[1].to_ascii_uppercase());
        }
    }
}

fn extract_wind(line: &str, threat: &mut ThreatData) {
    // Sustained range and peak gust are independent fields; a line like
    // "west winds 25 to 35 mph with gusts up to 55 mph" fills both.
    if threat.sustained_wind_min_mph.is_none() {
        if let Some(caps) = patterns::SUSTAINED_WIND.captures(line) {
            let min: Option<u16> = caps[1].parse().ok();
            let max: Option<u16> = caps[2].parse().ok();
            if let (Some(min), Some(max)) = (min, max) {
                let (min, max) = if min <= max { (min, max) } else { (max, min) };
                if plausible_wind(max) {
                    let (min, max) = convert_wind_pair(min, max, &caps[3]);
                    threat.sustained_wind_min_mph = Some(min);
                    threat.sustained_wind_max_mph = Some(max);
                }
            }
        }
    }

    if threat.max_wind_gust_mph.is_none() {
        let gust = patterns::WIND_GUST
            .captures(line)
            .or_else(|| patterns::WIND_TAG.captures(line))
            .or_else(|| patterns::WIND_TRAILING.captures(line));
        if let Some(caps) = gust {
            if let Ok(value) = caps[1].parse::<u16>() {
                if plausible_wind(value) {
                    if caps[2].eq_ignore_ascii_case("KT") {
                        threat.max_wind_gust_kts = Some(value);
                        threat.max_wind_gust_mph = Some(kts_to_mph(value));
                    } else {
                        threat.max_wind_gust_mph = Some(value);
                        threat.max_wind_gust_kts = Some(mph_to_kts(value));
                    }
                }
            }
        }
    }

    if threat.wind_damage_threat.is_none() {
        if let Some(caps) = patterns::WIND_DAMAGE.captures(line) {
            threat.wind_damage_threat = Some(caps[1].to_ascii_uppercase());
        }
    }
}

fn extract_hail(line: &str, threat: &mut ThreatData) {
    if threat.max_hail_size_inches.is_none() {
        let numeric = patterns::HAIL_SIZE
            .captures(line)
            .or_else(|| patterns::HAIL_SIZE_TRAILING.captures(line));
        if let Some(caps) = numeric {
            if let Ok(value) = caps[1].parse::<f64>() {
                if (0.25..=6.0).contains(&value) {
                    threat.max_hail_size_inches = Some(value);
                }
            }
        }
    }
    if threat.max_hail_size_inches.is_none() {
        if let Some(caps) = patterns::HAIL_NAMED.captures(line) {
            threat.max_hail_size_inches = patterns::named_hail_size(&caps[1]);
        }
    }
    if threat.hail_damage_threat.is_none() {
        if let Some(caps) = patterns::HAIL_DAMAGE.captures(line) {
            threat.hail_damage_threat = Some(caps[1].to_ascii_uppercase());
        }
    }
}

fn extract_snow(line: &str, threat: &mut ThreatData) {
    if threat.snow_amount_max_inches.is_some() {
        return;
    }
    if let Some(caps) = patterns::SNOW_AMOUNT.captures(line) {
        // The pattern has three phrasing branches; take whichever pair of
        // groups participated.
        let first = caps
            .get(1)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(5))
            .and_then(|m| m.as_str().parse::<f64>().ok());
        let second = caps
            .get(2)
            .or_else(|| caps.get(4))
            .and_then(|m| m.as_str().parse::<f64>().ok());

        if let Some(a) = first {
            let b = second.unwrap_or(a);
            let (min, max) = if a <= b { (a, b) } else { (b, a) };
            if (0.1..=60.0).contains(&min) && (0.1..=60.0).contains(&max) {
                threat.snow_amount_min_inches = Some(min);
                threat.snow_amount_max_inches = Some(max);
            }
        }
    }
}

fn extract_ice(line: &str, threat: &mut ThreatData) {
    if threat.ice_accumulation_inches.is_some() {
        return;
    }
    if let Some(caps) = patterns::ICE_AMOUNT.captures(line) {
        let value = caps
            .get(2)
            .or_else(|| caps.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok());
        if let Some(v) = value {
            if (0.01..=3.0).contains(&v) {
                threat.ice_accumulation_inches = Some(v);
            }
        }
    }
}

fn extract_flood(line: &str, threat: &mut ThreatData) {
    if threat.flash_flood_detection.is_none() {
        if let Some(caps) = patterns::FLOOD_DETECTION.captures(line) {
            threat.flash_flood_detection = Some(normalize_spaces(&caps[1]));
        }
    }
    if threat.flash_flood_damage_threat.is_none() {
        if let Some(caps) = patterns::FLOOD_DAMAGE.captures(line) {
            threat.flash_flood_damage_threat = Some(caps[1].to_ascii_uppercase());
        }
    }
}

fn extract_motion(text: &str) -> Option<StormMotion> {
    if let Some(caps) = patterns::MOTION_TIME_MOT_LOC.captures(text) {
        let degrees: u16 = caps[1].parse().ok()?;
        let kts: u16 = caps[2].parse().ok()?;
        return Some(StormMotion {
            direction_degrees: Some(degrees),
            direction_from: Some(degrees_to_cardinal(degrees).to_string()),
            speed_mph: Some(kts_to_mph(kts)),
            speed_kts: Some(kts),
        });
    }

    if let Some(caps) = patterns::MOTION_PROSE.captures(text) {
        let toward = caps[1].to_ascii_uppercase();
        if !CARDINALS.contains(&toward.as_str()) {
            return None;
        }
        let speed: u16 = caps[2].parse().ok()?;
        let (mph, kts) = if caps[3].eq_ignore_ascii_case("KT") {
            (kts_to_mph(speed), speed)
        } else {
            (speed, mph_to_kts(speed))
        };
        return Some(StormMotion {
            direction_degrees: Some(cardinal_to_degrees(&toward)),
            direction_from: Some(opposite_cardinal(&toward).to_string()),
            speed_mph: Some(mph),
            speed_kts: Some(kts),
        });
    }

    None
}

fn plausible_wind(mph_or_kts: u16) -> bool {
    (20..=300).contains(&mph_or_kts)
}

fn convert_wind_pair(min: u16, max: u16, unit: &str) -> (u16, u16) {
    if unit.eq_ignore_ascii_case("KT") {
        (kts_to_mph(min), kts_to_mph(max))
    } else {
        (min, max)
    }
}

fn mph_to_kts(mph: u16) -> u16 {
    (f64::from(mph) * 0.868_976).round() as u16
}

fn kts_to_mph(kts: u16) -> u16 {
    (f64::from(kts) * 1.150_78).round() as u16
}

/// Degrees the storm is coming from, as a cardinal label.
fn degrees_to_cardinal(degrees: u16) -> &'static str {
    let index = ((f64::from(degrees % 360) / 22.5).round() as usize) % 16;
    CARDINALS[index]
}

/// Motion direction in degrees for a storm moving toward `cardinal`;
/// the value is the bearing it comes from, matching TIME...MOT...LOC.
fn cardinal_to_degrees(cardinal: &str) -> u16 {
    match cardinal {
        "N" => 180,
        "NNE" => 202,
        "NE" => 225,
        "ENE" => 247,
        "E" => 270,
        "ESE" => 292,
        "SE" => 315,
        "SSE" => 337,
        "S" => 0,
        "SSW" => 22,
        "SW" => 45,
        "WSW" => 67,
        "W" => 90,
        "WNW" => 112,
        "NW" => 135,
        _ => 157, // NNW
    }
}

fn opposite_cardinal(cardinal: &str) -> &'static str {
    match cardinal {
        "N" => "S",
        "NNE" => "SSW",
        "NE" => "SW",
        "ENE" => "WSW",
        "E" => "W",
        "ESE" => "WNW",
        "SE" => "NW",
        "SSE" => "NNW",
        "S" => "N",
        "SSW" => "NNE",
        "SW" => "NE",
        "WSW" => "ENE",
        "W" => "E",
        "WNW" => "ESE",
        "NW" => "SE",
        _ => "SSE", // NNW
    }
}

fn normalize_spaces(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_uppercase()
}
