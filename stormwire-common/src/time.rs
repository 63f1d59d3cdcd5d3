//! Timestamp parsing for NWS product formats
//!
//! NWS text products carry three distinct compact timestamp shapes:
//!
//! - VTEC window stamps: `yymmddThhmmZ` (e.g. `251220T1815Z`), where the
//!   all-zero form `000000T0000Z` means "undefined"
//! - UGC expirations and WMO headers: `DDHHMM` day-of-month relative stamps
//!   that need a reference instant to resolve the month
//! - Local-time phrases like `530 PM EST` with a US timezone abbreviation
//!
//! Parsers here never silently fall back to a wrong timezone; failures
//! return `None` and the caller decides.

use chrono::{DateTime, Datelike, Duration, FixedOffset, Months, TimeZone, Utc};

/// Parse a VTEC timestamp of the form `yymmddThhmmZ`.
///
/// Returns `None` for the undefined marker (`0000`-prefixed stamps) and for
/// anything that does not decode to a valid instant.
pub fn parse_vtec_timestamp(stamp: &str) -> Option<DateTime<Utc>> {
    let clean = stamp.trim().trim_end_matches('Z');
    if clean.starts_with("0000") {
        return None;
    }
    if clean.len() != 11 || clean.as_bytes()[6] != b'T' {
        return None;
    }
    let yy: i32 = clean[0..2].parse().ok()?;
    let mm: u32 = clean[2..4].parse().ok()?;
    let dd: u32 = clean[4..6].parse().ok()?;
    let hh: u32 = clean[7..9].parse().ok()?;
    let nn: u32 = clean[9..11].parse().ok()?;

    // Two-digit years: anything >= 70 would predate the VTEC program entirely.
    let year = if yy < 70 { 2000 + yy } else { 1900 + yy };

    Utc.with_ymd_and_hms(year, mm, dd, hh, nn, 0).single()
}

/// Resolve a UGC expiration stamp (`DDHHMM`, UTC) against a reference instant.
///
/// The stamp carries only the day of month; if the resolved instant is
/// before the reference it is assumed to fall in the following month.
pub fn parse_ugc_expiration(stamp: &str, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (day, hour, minute) = split_ddhhmm(stamp)?;

    let candidate = resolve_day_in_month(reference, day, hour, minute)?;
    if candidate < reference {
        // Expirations are always in the future relative to product receipt.
        let next_month = reference.checked_add_months(Months::new(1))?;
        resolve_day_in_month(next_month, day, hour, minute)
    } else {
        Some(candidate)
    }
}

/// Resolve a WMO header issuance stamp (`DDHHMM`, UTC) against a reference
/// instant.
///
/// Issuance is always at or before product receipt; a stamp that lands in
/// the future relative to the reference belongs to the previous month
/// (products received moments after a month rollover).
pub fn parse_ddhhmm_issuance(stamp: &str, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (day, hour, minute) = split_ddhhmm(stamp)?;

    let candidate = resolve_day_in_month(reference, day, hour, minute)?;
    // Allow a little clock skew before deciding the stamp is last month's.
    if candidate > reference + Duration::hours(2) {
        let prev_month = reference.checked_sub_months(Months::new(1))?;
        resolve_day_in_month(prev_month, day, hour, minute)
    } else {
        Some(candidate)
    }
}

fn split_ddhhmm(stamp: &str) -> Option<(u32, u32, u32)> {
    let stamp = stamp.trim();
    if stamp.len() != 6 || !stamp.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let day: u32 = stamp[0..2].parse().ok()?;
    let hour: u32 = stamp[2..4].parse().ok()?;
    let minute: u32 = stamp[4..6].parse().ok()?;
    if !(1..=31).contains(&day) || hour > 23 || minute > 59 {
        return None;
    }
    Some((day, hour, minute))
}

fn resolve_day_in_month(
    anchor: DateTime<Utc>,
    day: u32,
    hour: u32,
    minute: u32,
) -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(anchor.year(), anchor.month(), day, hour, minute, 0)
        .single()
}

/// Parse an ISO 8601 timestamp as produced by the NWS API
/// (`2025-12-20T18:15:00Z` or with a numeric offset).
pub fn parse_iso_timestamp(stamp: &str) -> Option<DateTime<Utc>> {
    let stamp = stamp.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(stamp) {
        return Some(dt.with_timezone(&Utc));
    }
    // Some feeds omit the offset entirely; treat those as UTC.
    chrono::NaiveDateTime::parse_from_str(stamp, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Fixed offset for a US timezone abbreviation as used in NWS products.
///
/// The mapping is US-specific on purpose; NWS products never use the
/// ambiguous international readings of CST/IST/etc.
pub fn offset_for_abbreviation(abbrev: &str) -> Option<FixedOffset> {
    let hours = match abbrev.to_ascii_uppercase().as_str() {
        "EST" | "ET" => -5,
        "EDT" | "AST" => -4,
        "CST" | "CT" => -6,
        "CDT" => -5,
        "MST" | "MT" => -7,
        "MDT" => -6,
        "PST" | "PT" => -8,
        "PDT" => -7,
        "AKST" | "AKT" => -9,
        "AKDT" => -8,
        "HST" | "HAST" => -10,
        "HDT" | "HADT" => -9,
        "ADT" => -3,
        "SST" => -11,
        "CHST" => 10,
        "UTC" | "GMT" | "Z" => 0,
        _ => return None,
    };
    FixedOffset::east_opt(hours * 3600)
}

/// Parse a local-time expiration phrase (`530 PM EST`) against a reference
/// instant, returning the next matching instant in UTC.
pub fn parse_local_time(
    time_digits: &str,
    am_pm: Option<&str>,
    tz_abbrev: Option<&str>,
    reference: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let digits = time_digits.trim();
    if digits.is_empty() || digits.len() > 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let padded = format!("{:0>4}", digits);
    let mut hour: u32 = padded[0..2].parse().ok()?;
    let minute: u32 = padded[2..4].parse().ok()?;
    if minute > 59 {
        return None;
    }

    match am_pm.map(|s| s.to_ascii_uppercase()) {
        Some(ref m) if m == "PM" => {
            if !(1..=12).contains(&hour) {
                return None;
            }
            if hour != 12 {
                hour += 12;
            }
        }
        Some(ref m) if m == "AM" => {
            if !(1..=12).contains(&hour) {
                return None;
            }
            if hour == 12 {
                hour = 0;
            }
        }
        _ => {
            if hour > 23 {
                return None;
            }
        }
    }

    let offset = tz_abbrev
        .and_then(offset_for_abbreviation)
        .unwrap_or(FixedOffset::east_opt(0)?);

    let local_ref = reference.with_timezone(&offset);
    let mut result = offset
        .with_ymd_and_hms(local_ref.year(), local_ref.month(), local_ref.day(), hour, minute, 0)
        .single()?;
    // An expiration phrase in the apparent past refers to tomorrow.
    if result.with_timezone(&Utc) < reference {
        result += Duration::days(1);
    }
    Some(result.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, 20, 18, 0, 0).unwrap()
    }

    #[test]
    fn vtec_timestamp_round_trips() {
        let parsed = parse_vtec_timestamp("251220T1815Z").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 12, 20, 18, 15, 0).unwrap());
    }

    #[test]
    fn vtec_undefined_marker_is_none() {
        assert!(parse_vtec_timestamp("000000T0000Z").is_none());
    }

    #[test]
    fn vtec_garbage_is_none() {
        assert!(parse_vtec_timestamp("25122T1815Z").is_none());
        assert!(parse_vtec_timestamp("251320T1815Z").is_none());
        assert!(parse_vtec_timestamp("").is_none());
    }

    #[test]
    fn ugc_expiration_same_month() {
        let exp = parse_ugc_expiration("201900", reference()).unwrap();
        assert_eq!(exp, Utc.with_ymd_and_hms(2025, 12, 20, 19, 0, 0).unwrap());
    }

    #[test]
    fn ugc_expiration_rolls_into_next_month() {
        // Day 01 relative to Dec 20 must be January 1.
        let exp = parse_ugc_expiration("010330", reference()).unwrap();
        assert_eq!(exp, Utc.with_ymd_and_hms(2026, 1, 1, 3, 30, 0).unwrap());
    }

    #[test]
    fn issuance_rolls_into_previous_month() {
        // Day 30 received on Dec 1 was issued November 30.
        let received = Utc.with_ymd_and_hms(2025, 12, 1, 0, 10, 0).unwrap();
        let issued = parse_ddhhmm_issuance("302345", received).unwrap();
        assert_eq!(issued, Utc.with_ymd_and_hms(2025, 11, 30, 23, 45, 0).unwrap());
    }

    #[test]
    fn iso_timestamp_variants() {
        assert_eq!(
            parse_iso_timestamp("2025-12-20T18:15:00Z").unwrap(),
            Utc.with_ymd_and_hms(2025, 12, 20, 18, 15, 0).unwrap()
        );
        assert_eq!(
            parse_iso_timestamp("2025-12-20T13:15:00-05:00").unwrap(),
            Utc.with_ymd_and_hms(2025, 12, 20, 18, 15, 0).unwrap()
        );
        assert!(parse_iso_timestamp("not a time").is_none());
    }

    #[test]
    fn local_time_pm_with_zone() {
        let exp = parse_local_time("530", Some("PM"), Some("EST"), reference()).unwrap();
        assert_eq!(exp, Utc.with_ymd_and_hms(2025, 12, 20, 22, 30, 0).unwrap());
    }

    #[test]
    fn local_time_in_past_means_tomorrow() {
        let exp = parse_local_time("100", Some("AM"), Some("UTC"), reference()).unwrap();
        assert_eq!(exp, Utc.with_ymd_and_hms(2025, 12, 21, 1, 0, 0).unwrap());
    }

    #[test]
    fn unknown_abbreviation_is_none() {
        assert!(offset_for_abbreviation("XYZ").is_none());
        assert!(offset_for_abbreviation("CDT").is_some());
    }
}
