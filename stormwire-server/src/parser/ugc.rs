//! UGC (Universal Geographic Code) block decoding
//!
//! The first non-blank block of every product segment lists the counties or
//! forecast zones the segment covers, with range expansion (`061>065`),
//! multi-line continuations, mixed state prefixes, and a trailing `DDHHMM`
//! expiration stamp:
//!
//! ```text
//! OHC085-093-155>157-PAC003-201900-
//! ```

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use stormwire_common::time::parse_ugc_expiration;

use super::patterns;
use crate::error::ParseError;

/// Decoded UGC block.
#[derive(Debug, Clone, Default)]
pub struct UgcData {
    /// Fully expanded codes, sorted and deduplicated (e.g. `OHC085`)
    pub codes: Vec<String>,
    /// Two-letter states touched by the codes
    pub states: BTreeSet<String>,
    /// 5-digit FIPS codes derived from county codes
    pub fips_codes: Vec<String>,
    /// Expiration from the trailing `DDHHMM` stamp
    pub expiration: Option<DateTime<Utc>>,
    /// The block as received, for diagnostics
    pub raw_block: String,
}

/// Decode the UGC block of a product segment.
///
/// `received_at` anchors the month for the day-relative expiration stamp.
pub fn parse(text: &str, received_at: DateTime<Utc>) -> Result<UgcData, ParseError> {
    let mut data = UgcData::default();
    let mut codes: Vec<String> = Vec::new();
    let mut prefix: Option<String> = None;
    let mut in_block = false;

    for raw_line in text.lines() {
        let line = raw_line.trim();

        if patterns::UGC_LINE_START.is_match(line) {
            in_block = true;
            data.raw_block.push_str(line);
            data.raw_block.push('\n');
            parse_line(line, &mut codes, &mut prefix, &mut data.expiration, received_at);
        } else if in_block && patterns::UGC_CONTINUATION.is_match(line) {
            data.raw_block.push_str(line);
            data.raw_block.push('\n');
            parse_line(line, &mut codes, &mut prefix, &mut data.expiration, received_at);
        } else if in_block && !line.is_empty() {
            break;
        }
    }

    if codes.is_empty() {
        return Err(ParseError::MissingUgc);
    }

    codes.sort();
    codes.dedup();
    data.states = codes
        .iter()
        .filter(|c| c.len() >= 2)
        .map(|c| c[..2].to_string())
        .collect();
    data.fips_codes = to_fips(&codes);
    data.codes = codes;

    Ok(data)
}

fn parse_line(
    line: &str,
    codes: &mut Vec<String>,
    prefix: &mut Option<String>,
    expiration: &mut Option<DateTime<Utc>>,
    received_at: DateTime<Utc>,
) {
    let mut rest = line.trim().trim_end_matches('-').to_string();

    // The final six-digit group on a line is the expiration stamp, not a code
    // list; codes are always three digits.
    if let Some(caps) = patterns::UGC_EXPIRATION.captures(&format!("{rest}-")) {
        let stamp = caps[1].to_string();
        if let Some(exp) = parse_ugc_expiration(&stamp, received_at) {
            *expiration = Some(exp);
            if let Some(stripped) = rest.strip_suffix(&stamp) {
                rest = stripped.trim_end_matches('-').to_string();
            }
        }
    }

    for part in rest.split('-') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if part.len() >= 3 && part.as_bytes()[0].is_ascii_uppercase() {
            // New state+kind prefix, possibly followed by codes in the same part.
            let (new_prefix, remainder) = part.split_at(3);
            if new_prefix.chars().take(2).all(|c| c.is_ascii_uppercase())
                && matches!(new_prefix.as_bytes()[2], b'C' | b'Z')
            {
                *prefix = Some(new_prefix.to_string());
                if !remainder.is_empty() {
                    expand(new_prefix, remainder, codes);
                }
                continue;
            }
        }

        if let Some(p) = prefix.as_deref() {
            expand(p, part, codes);
        }
    }
}

/// Expand a code fragment against a prefix, handling ranges and
/// concatenated three-digit runs.
fn expand(prefix: &str, fragment: &str, out: &mut Vec<String>) {
    if let Some(caps) = patterns::UGC_RANGE.captures(fragment) {
        let (mut start, mut end): (u32, u32) = (
            caps[1].parse().unwrap_or(0),
            caps[2].parse().unwrap_or(0),
        );
        if start > end {
            std::mem::swap(&mut start, &mut end);
        }
        for n in start..=end {
            out.push(format!("{prefix}{n:03}"));
        }
        let whole = caps.get(0).unwrap();
        let (before, after) = (&fragment[..whole.start()], &fragment[whole.end()..]);
        if !before.is_empty() {
            expand(prefix, before, out);
        }
        if !after.is_empty() {
            expand(prefix, after, out);
        }
        return;
    }

    let digits: Vec<u8> = fragment.bytes().filter(|b| b.is_ascii_digit()).collect();
    for chunk in digits.chunks_exact(3) {
        let code = std::str::from_utf8(chunk).unwrap_or_default();
        out.push(format!("{prefix}{code}"));
    }
}

/// County UGC codes convert directly to FIPS; zone codes need a lookup
/// table this pipeline does not carry, so they are skipped.
fn to_fips(codes: &[String]) -> Vec<String> {
    let mut fips: Vec<String> = codes
        .iter()
        .filter(|c| c.len() == 6 && c.as_bytes()[2] == b'C')
        .filter_map(|c| state_fips(&c[..2]).map(|sf| format!("{sf}{}", &c[3..6])))
        .collect();
    fips.sort();
    fips.dedup();
    fips
}

fn state_fips(state: &str) -> Option<&'static str> {
    let fips = match state {
        "AL" => "01", "AK" => "02", "AZ" => "04", "AR" => "05", "CA" => "06",
        "CO" => "08", "CT" => "09", "DE" => "10", "DC" => "11", "FL" => "12",
        "GA" => "13", "HI" => "15", "ID" => "16", "IL" => "17", "IN" => "18",
        "IA" => "19", "KS" => "20", "KY" => "21", "LA" => "22", "ME" => "23",
        "MD" => "24", "MA" => "25", "MI" => "26", "MN" => "27", "MS" => "28",
        "MO" => "29", "MT" => "30", "NE" => "31", "NV" => "32", "NH" => "33",
        "NJ" => "34", "NM" => "35", "NY" => "36", "NC" => "37", "ND" => "38",
        "OH" => "39", "OK" => "40", "OR" => "41", "PA" => "42", "RI" => "44",
        "SC" => "45", "SD" => "46", "TN" => "47", "TX" => "48", "UT" => "49",
        "VT" => "50", "VA" => "51", "WA" => "53", "WV" => "54", "WI" => "55",
        "WY" => "56", "AS" => "60", "GU" => "66", "MP" => "69", "PR" => "72",
        "VI" => "78",
        _ => return None,
    };
    Some(fips)
}
