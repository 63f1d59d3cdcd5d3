//! P-VTEC decoding
//!
//! A P-VTEC line identifies the event a product belongs to and what the
//! product does to it. Most alert products carry exactly one; statements
//! legally carry none, and upgrade products carry two (the UPG for the old
//! event and the NEW for its replacement).

use stormwire_common::alert::{Significance, VtecAction, VtecInfo};
use stormwire_common::time::parse_vtec_timestamp;

use super::patterns;
use crate::error::ParseError;

/// Decode every VTEC line in a product segment, in order of appearance.
///
/// Returns `Ok(vec![])` when the segment carries no VTEC at all, and
/// `Err(InvalidVtec)` when a line clearly tried to be one but failed to
/// decode.
pub fn parse_all(text: &str) -> Result<Vec<VtecInfo>, ParseError> {
    let mut decoded = Vec::new();

    for caps in patterns::VTEC.captures_iter(text) {
        let action: VtecAction = caps[2]
            .parse()
            .map_err(|_| ParseError::InvalidVtec(caps[0].to_string()))?;
        let significance: Significance = caps[5]
            .parse()
            .map_err(|_| ParseError::InvalidVtec(caps[0].to_string()))?;
        let etn: u16 = caps[6]
            .parse()
            .map_err(|_| ParseError::InvalidVtec(caps[0].to_string()))?;

        decoded.push(VtecInfo {
            product_class: caps[1].to_string(),
            action,
            office: caps[3].to_string(),
            phenomenon: caps[4].to_string(),
            significance,
            event_tracking_number: etn,
            begin_time: parse_vtec_timestamp(&caps[7]),
            end_time: parse_vtec_timestamp(&caps[8]),
            raw: caps[0].to_string(),
        });
    }

    if decoded.is_empty() {
        // A slash-delimited line that resembles VTEC but did not decode is a
        // malformed product, not a statement.
        if let Some(m) = patterns::VTEC_CANDIDATE.find(text) {
            return Err(ParseError::InvalidVtec(m.as_str().trim().to_string()));
        }
    }

    Ok(decoded)
}

/// Decode the first VTEC line of a segment, if any.
pub fn parse_first(text: &str) -> Result<Option<VtecInfo>, ParseError> {
    Ok(parse_all(text)?.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn decodes_tornado_warning() {
        let vtec = parse_first("/O.NEW.KCLE.TO.W.0001.250120T1530Z-250120T1630Z/")
            .unwrap()
            .unwrap();
        assert_eq!(vtec.product_class, "O");
        assert_eq!(vtec.action, VtecAction::New);
        assert_eq!(vtec.office, "KCLE");
        assert_eq!(vtec.phenomenon, "TO");
        assert_eq!(vtec.significance, Significance::Warning);
        assert_eq!(vtec.event_tracking_number, 1);
        assert_eq!(
            vtec.begin_time.unwrap(),
            Utc.with_ymd_and_hms(2025, 1, 20, 15, 30, 0).unwrap()
        );
        assert_eq!(
            vtec.end_time.unwrap(),
            Utc.with_ymd_and_hms(2025, 1, 20, 16, 30, 0).unwrap()
        );
    }

    #[test]
    fn cancellation_has_undefined_begin_time() {
        let vtec = parse_first("/O.CAN.KPBZ.TO.W.0003.000000T0000Z-250120T1630Z/")
            .unwrap()
            .unwrap();
        assert_eq!(vtec.action, VtecAction::Can);
        assert!(vtec.begin_time.is_none());
        assert!(vtec.end_time.is_some());
    }

    #[test]
    fn upgrade_products_carry_two_lines() {
        let text = "/O.UPG.KILN.SV.A.0120.000000T0000Z-250120T2200Z/\n\
                    /O.NEW.KILN.SV.W.0042.250120T1800Z-250120T1900Z/";
        let all = parse_all(text).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].action, VtecAction::Upg);
        assert_eq!(all[1].action, VtecAction::New);
    }

    #[test]
    fn plain_text_has_no_vtec() {
        assert!(parse_first("just some prose about weather").unwrap().is_none());
    }

    #[test]
    fn malformed_vtec_line_is_an_error() {
        let err = parse_first("/O.NEW.KC.XX/").unwrap_err();
        assert!(matches!(err, ParseError::InvalidVtec(_)));
    }

    #[test]
    fn event_key_matches_across_actions() {
        let new = parse_first("/O.NEW.KCLE.SV.W.0042.251220T1815Z-251220T1900Z/")
            .unwrap()
            .unwrap();
        let can = parse_first("/O.CAN.KCLE.SV.W.0042.000000T0000Z-251220T1900Z/")
            .unwrap()
            .unwrap();
        assert_eq!(new.event_key(), can.event_key());
    }
}
