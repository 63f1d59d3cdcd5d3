//! Product parser
//!
//! Transforms a raw meteorological text bulletin (or an NWS API GeoJSON
//! feature) into structured [`Alert`] records. Pure and synchronous; all
//! I/O stays in the sources.
//!
//! Text products decode in stages: communication header, segmentation on
//! `$$`, UGC block, VTEC lines, polygon, key sections, threat extraction,
//! and finally assembly against the reference table.

pub mod patterns;
pub mod threat;
pub mod ugc;
pub mod vtec;

use std::collections::BTreeSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use stormwire_common::alert::{event_name, Alert, AlertSource, Significance, ThreatData, VtecInfo};
use stormwire_common::time::{parse_ddhhmm_issuance, parse_iso_timestamp, parse_local_time};

use crate::error::ParseError;
use crate::refdata::UgcTable;

/// Phenomena that receive a default lifetime when no expiration decodes.
const TARGETED_PHENOMENA: &[&str] = &["TO", "SV", "FF", "SS", "SPS"];

/// Default lifetime for targeted products without a parseable expiration.
const DEFAULT_LIFETIME_MINUTES: i64 = 60;

/// Parser configuration, fixed at startup.
#[derive(Debug, Clone, Default)]
pub struct ParserConfig {
    /// Two-letter state codes to keep; empty accepts everything.
    pub filter_states: BTreeSet<String>,
}

/// The product parser. Cheap to share; holds only the reference table and
/// the immutable config.
pub struct ProductParser {
    table: Arc<UgcTable>,
    config: ParserConfig,
}

/// Decoded communication header.
#[derive(Debug, Clone)]
struct ProductHeader {
    /// WMO heading, e.g. `WUUS53`
    wmo_id: String,
    /// Issuing office, e.g. `KCLE`
    office: String,
    /// `DDHHMM` issuance stamp as received
    stamp: String,
    issued_time: Option<DateTime<Utc>>,
    /// AWIPS product identifier, e.g. `SVRCLE`
    awips_pil: Option<String>,
}

impl ProductParser {
    pub fn new(table: Arc<UgcTable>, config: ParserConfig) -> Self {
        ProductParser { table, config }
    }

    pub fn table(&self) -> &UgcTable {
        &self.table
    }

    /// Parse a raw text product into alerts, one per segment per VTEC line.
    ///
    /// Products carrying several VTEC lines (an UPG paired with its NEW)
    /// yield one record per line so the store can apply each action in
    /// order.
    pub fn parse_product(
        &self,
        raw: &str,
        source: AlertSource,
        received_at: DateTime<Utc>,
    ) -> Result<Vec<Alert>, ParseError> {
        if raw.trim().is_empty() {
            return Err(ParseError::EmptyBody);
        }
        if is_informational(raw) {
            return Err(ParseError::Filtered("informational product"));
        }

        let header = parse_header(raw, received_at)?;

        let mut alerts = Vec::new();
        for segment in split_segments(raw) {
            match self.parse_segment(&header, segment, source, received_at) {
                Ok(mut segment_alerts) => alerts.append(&mut segment_alerts),
                Err(err) if err.is_filtered() => {
                    debug!(error = %err, "segment filtered");
                }
                Err(err) => return Err(err),
            }
        }

        if alerts.is_empty() {
            return Err(ParseError::Filtered("no relevant segments"));
        }
        Ok(alerts)
    }

    fn parse_segment(
        &self,
        header: &ProductHeader,
        segment: &str,
        source: AlertSource,
        received_at: DateTime<Utc>,
    ) -> Result<Vec<Alert>, ParseError> {
        let ugc_data = ugc::parse(segment, received_at)?;
        let vtecs = vtec::parse_all(segment)?;

        let mut areas = ugc_data.codes.clone();
        if !self.config.filter_states.is_empty() {
            areas.retain(|code| {
                code.len() >= 2 && self.config.filter_states.contains(&code[..2])
            });
            if areas.is_empty() {
                return Err(ParseError::Filtered("no areas in configured states"));
            }
        }

        let polygon = parse_polygon(segment);
        let centroid = polygon_centroid(&polygon);
        let threat = threat::parse(segment);
        let sections = split_key_sections(segment);
        let headline = parse_headline(segment);

        let issued_time = header.issued_time;

        let mut out = Vec::new();
        if vtecs.is_empty() {
            if let Some(alert) = self.assemble_no_vtec(
                header, segment, source, received_at, &ugc_data, areas.clone(), &polygon,
                centroid, &threat, &sections, &headline, issued_time,
            )? {
                out.push(alert);
            }
            return Ok(out);
        }

        for vtec_info in vtecs {
            let mut alert = Alert::new(
                build_product_id(&vtec_info, &header.stamp),
                source,
            );
            alert.phenomenon = vtec_info.phenomenon.clone();
            alert.significance = vtec_info.significance;
            alert.effective_time = vtec_info.begin_time;
            alert.expiration_time = vtec_info
                .end_time
                .or(ugc_data.expiration)
                .or_else(|| parse_prose_expiration(segment, received_at));
            alert.issued_time = issued_time;
            alert.issuing_offices.insert(header.office.clone());
            alert.issuing_offices.insert(vtec_info.office.clone());
            alert.sender_name = office_display_name(&vtec_info.office);
            alert.vtec = Some(vtec_info);

            alert.affected_areas = areas.clone();
            alert.fips_codes = ugc_data.fips_codes.clone();
            alert.display_locations = self.table.display_locations(&alert.affected_areas);
            alert.polygon = polygon.clone();
            alert.centroid = centroid;
            alert.threat = threat.clone();
            alert.headline = headline.clone().unwrap_or_default();
            alert.description = sections.description.clone();
            alert.instruction = sections.instruction.clone();

            self.finish_alert(&mut alert, received_at);
            out.push(alert);
        }
        Ok(out)
    }

    /// The no-VTEC path: Special Weather Statements and watch outlines.
    #[allow(clippy::too_many_arguments)]
    fn assemble_no_vtec(
        &self,
        header: &ProductHeader,
        segment: &str,
        source: AlertSource,
        received_at: DateTime<Utc>,
        ugc_data: &ugc::UgcData,
        areas: Vec<String>,
        polygon: &[[f64; 2]],
        centroid: Option<[f64; 2]>,
        threat: &ThreatData,
        sections: &KeySections,
        headline: &Option<String>,
        issued_time: Option<DateTime<Utc>>,
    ) -> Result<Option<Alert>, ParseError> {
        let (phenomenon, significance, product_id) =
            if let Some(caps) = patterns::WATCH_NUMBER.captures(segment) {
                let phen = if caps[1].to_ascii_uppercase().starts_with("TORNADO") {
                    "TO"
                } else {
                    "SV"
                };
                let number: u16 = caps[2].parse().unwrap_or(0);
                (
                    phen.to_string(),
                    Significance::Watch,
                    format!("{}-{phen}.A-{}-{number:04}", header.office, header.stamp),
                )
            } else if looks_like_statement(header) {
                if !is_relevant_statement(segment) {
                    return Err(ParseError::Filtered("non-thunderstorm statement"));
                }
                let id = statement_product_id(&header.office, &areas, issued_time, received_at);
                ("SPS".to_string(), Significance::Statement, id)
            } else {
                return Err(ParseError::Filtered("unclassified product without VTEC"));
            };

        let mut alert = Alert::new(product_id, source);
        alert.phenomenon = phenomenon;
        alert.significance = significance;
        alert.issued_time = issued_time;
        alert.expiration_time = ugc_data
            .expiration
            .or_else(|| parse_prose_expiration(segment, received_at));
        alert.issuing_offices.insert(header.office.clone());
        alert.sender_name = office_display_name(&header.office);
        alert.affected_areas = areas;
        alert.fips_codes = ugc_data.fips_codes.clone();
        alert.display_locations = self.table.display_locations(&alert.affected_areas);
        alert.polygon = polygon.to_vec();
        alert.centroid = centroid;
        alert.threat = threat.clone();
        alert.headline = headline.clone().unwrap_or_default();
        alert.description = sections.description.clone();
        alert.instruction = sections.instruction.clone();

        self.finish_alert(&mut alert, received_at);
        Ok(Some(alert))
    }

    fn finish_alert(&self, alert: &mut Alert, received_at: DateTime<Utc>) {
        if alert.expiration_time.is_none()
            && TARGETED_PHENOMENA.contains(&alert.phenomenon.as_str())
        {
            alert.expiration_time =
                Some(received_at + Duration::minutes(DEFAULT_LIFETIME_MINUTES));
            warn!(
                product_id = %alert.product_id,
                "no expiration found, assigning default {DEFAULT_LIFETIME_MINUTES}-minute lifetime"
            );
        }
        if alert.headline.is_empty() {
            alert.headline = event_name(&alert.phenomenon, alert.significance);
        }
        alert.parsed_at = received_at;
        alert.last_updated = received_at;
        alert.finish_classification();
    }

    /// Parse one GeoJSON feature from the NWS active-alerts endpoint.
    pub fn parse_api_feature(
        &self,
        feature: &Value,
        received_at: DateTime<Utc>,
    ) -> Result<Alert, ParseError> {
        let props = feature
            .get("properties")
            .and_then(Value::as_object)
            .ok_or(ParseError::EmptyBody)?;

        let description = props
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default();

        // VTEC rides in parameters.VTEC when present, else sometimes in the
        // description text.
        let vtec_info = props
            .get("parameters")
            .and_then(|p| p.get("VTEC"))
            .and_then(first_string)
            .and_then(|s| vtec::parse_first(&s).ok().flatten())
            .or_else(|| vtec::parse_first(description).ok().flatten());

        let event = props.get("event").and_then(Value::as_str).unwrap_or_default();

        let issued_time = props
            .get("sent")
            .and_then(Value::as_str)
            .and_then(parse_iso_timestamp);

        let mut areas = api_ugc_codes(props);
        if !self.config.filter_states.is_empty() {
            areas.retain(|code| {
                code.len() >= 2 && self.config.filter_states.contains(&code[..2])
            });
        }
        if areas.is_empty() {
            return Err(ParseError::Filtered("no areas in configured states"));
        }

        let (phenomenon, significance, product_id) = match &vtec_info {
            Some(v) => (
                v.phenomenon.clone(),
                v.significance,
                build_product_id(v, &api_id_stamp(issued_time, received_at)),
            ),
            None => {
                let phen = event_to_phenomenon(event);
                if phen.is_empty() {
                    return Err(ParseError::Filtered("unclassified API event"));
                }
                if phen == "SPS" && !is_relevant_statement(description) {
                    return Err(ParseError::Filtered("non-thunderstorm statement"));
                }
                let sig = if event.to_ascii_uppercase().contains("WATCH") {
                    Significance::Watch
                } else if event.to_ascii_uppercase().contains("WARNING") {
                    Significance::Warning
                } else if event.to_ascii_uppercase().contains("ADVISORY") {
                    Significance::Advisory
                } else {
                    Significance::Statement
                };
                let id = statement_product_id("API", &areas, issued_time, received_at);
                (phen.to_string(), sig, id)
            }
        };

        let mut alert = Alert::new(product_id, AlertSource::Pull);
        alert.phenomenon = phenomenon;
        alert.significance = significance;
        alert.event_name = event.to_string();
        alert.headline = props
            .get("headline")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        alert.description = description.to_string();
        alert.instruction = props
            .get("instruction")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        alert.issued_time = issued_time;
        alert.effective_time = props
            .get("effective")
            .and_then(Value::as_str)
            .and_then(parse_iso_timestamp);
        alert.expiration_time = props
            .get("ends")
            .and_then(Value::as_str)
            .and_then(parse_iso_timestamp)
            .or_else(|| {
                props
                    .get("expires")
                    .and_then(Value::as_str)
                    .and_then(parse_iso_timestamp)
            });

        if let Some(v) = &vtec_info {
            alert.issuing_offices.insert(v.office.clone());
            alert.sender_name = office_display_name(&v.office);
        }
        if let Some(sender) = props.get("senderName").and_then(Value::as_str) {
            if !sender.is_empty() {
                alert.sender_name = sender.to_string();
            }
        }
        alert.vtec = vtec_info;

        alert.affected_areas = areas;
        alert.fips_codes = api_fips_codes(props);
        alert.display_locations = {
            let rendered = self.table.display_locations(&alert.affected_areas);
            match props.get("areaDesc").and_then(Value::as_str) {
                // Prefer the upstream prose unless it is just raw codes.
                Some(desc) if !desc.is_empty() && !looks_like_ugc_codes(desc) => desc.to_string(),
                _ => rendered,
            }
        };

        alert.polygon = parse_geojson_polygon(feature.get("geometry"));
        if alert.polygon.is_empty() {
            alert.polygon = parse_polygon(description);
        }
        alert.centroid = polygon_centroid(&alert.polygon);

        alert.threat = threat::parse(description);
        apply_api_threat_parameters(props, &mut alert);

        self.finish_alert(&mut alert, received_at);
        Ok(alert)
    }
}

// ============================================================================
// Header and segmentation
// ============================================================================

fn parse_header(raw: &str, received_at: DateTime<Utc>) -> Result<ProductHeader, ParseError> {
    let caps = patterns::WMO_HEADER
        .captures(raw)
        .ok_or(ParseError::MalformedHeader)?;
    let header_end = caps.get(0).unwrap().end();

    let stamp = caps[3].to_string();
    let issued_time = parse_ddhhmm_issuance(&stamp, received_at)
        .or_else(|| parse_issuance_line(raw));

    // The AWIPS PIL, when present, is the first short all-caps line after
    // the WMO heading.
    let awips_pil = raw[header_end..]
        .lines()
        .find(|l| !l.trim().is_empty())
        .and_then(|l| patterns::AWIPS_PIL.captures(l.trim()))
        .map(|c| format!("{}{}", &c[1], &c[2]));

    Ok(ProductHeader {
        wmo_id: caps[1].to_string(),
        office: caps[2].to_string(),
        stamp,
        issued_time,
        awips_pil,
    })
}

/// Refine issuance from the local-time line, e.g. `339 PM CDT Mon Aug 8 2022`.
fn parse_issuance_line(raw: &str) -> Option<DateTime<Utc>> {
    let caps = patterns::ISSUANCE_LINE.captures(raw)?;
    let month = match caps[4].to_ascii_uppercase().as_str() {
        "JAN" => 1, "FEB" => 2, "MAR" => 3, "APR" => 4, "MAY" => 5, "JUN" => 6,
        "JUL" => 7, "AUG" => 8, "SEP" => 9, "OCT" => 10, "NOV" => 11, _ => 12,
    };
    let day: u32 = caps[5].parse().ok()?;
    let year: i32 = caps[6].parse().ok()?;

    use chrono::TimeZone;
    let anchor = Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).single()?;
    // parse_local_time resolves "past means tomorrow", which is wrong for an
    // issuance line carrying its own date; anchor at midnight instead.
    let midnight = anchor.date_naive().and_hms_opt(0, 0, 0)?;
    let reference = Utc.from_utc_datetime(&midnight);
    parse_local_time(&caps[1], Some(&caps[2]), Some(&caps[3]), reference)
}

/// Split the product body into segments on `$$` terminator lines.
fn split_segments(raw: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0;
    for (offset, line) in line_spans(raw) {
        if line.trim() == "$$" {
            let segment = &raw[start..offset];
            if !segment.trim().is_empty() {
                segments.push(segment);
            }
            start = offset + line.len();
        }
    }
    let tail = &raw[start..];
    if !tail.trim().is_empty() {
        segments.push(tail);
    }
    if segments.is_empty() {
        segments.push(raw);
    }
    segments
}

fn line_spans(raw: &str) -> impl Iterator<Item = (usize, &str)> {
    raw.split_inclusive('\n')
        .scan(0usize, |offset, line| {
            let start = *offset;
            *offset += line.len();
            Some((start, line))
        })
}

fn is_informational(raw: &str) -> bool {
    let head: String = raw.chars().take(200).collect::<String>().to_ascii_uppercase();
    if head.contains("FLUS") || head.contains("NOUS") || head.contains("FPUS") {
        return true;
    }
    raw.to_ascii_uppercase().contains("HAZARDOUS WEATHER OUTLOOK")
}

fn looks_like_statement(header: &ProductHeader) -> bool {
    header
        .awips_pil
        .as_deref()
        .map(|pil| pil.starts_with("SPS"))
        .unwrap_or(false)
        || header.wmo_id.starts_with("WWUS")
}

fn is_relevant_statement(text: &str) -> bool {
    if patterns::SPS_EXCLUDE.is_match(text) {
        return false;
    }
    let upper = text.to_ascii_uppercase();
    patterns::SPS_INCLUDE_KEYWORDS
        .iter()
        .any(|kw| upper.contains(kw))
}

// ============================================================================
// Identity
// ============================================================================

/// Stable product identity: office, product type, issue stamp, tracking
/// number. Follow-up products for the same event carry a different stamp,
/// so the store's event index, not the id, links an event's product chain.
fn build_product_id(vtec_info: &VtecInfo, stamp: &str) -> String {
    format!(
        "{}-{}.{}-{}-{:04}",
        vtec_info.office,
        vtec_info.phenomenon,
        vtec_info.significance.as_code(),
        stamp,
        vtec_info.event_tracking_number
    )
}

/// Deterministic identity for statements without VTEC: issue minute plus a
/// hash of the sorted area set, so the same statement from both sources
/// deduplicates.
fn statement_product_id(
    office: &str,
    areas: &[String],
    issued_time: Option<DateTime<Utc>>,
    received_at: DateTime<Utc>,
) -> String {
    let mut sorted = areas.to_vec();
    sorted.sort();
    let mut hasher = DefaultHasher::new();
    for code in &sorted {
        code.hash(&mut hasher);
    }
    let stamp = issued_time
        .unwrap_or(received_at)
        .format("%Y%m%d%H%M");
    format!("SPS-{office}-{stamp}-{:08x}", hasher.finish() as u32)
}

fn api_id_stamp(issued_time: Option<DateTime<Utc>>, received_at: DateTime<Utc>) -> String {
    issued_time
        .unwrap_or(received_at)
        .format("%d%H%M")
        .to_string()
}

fn office_display_name(office: &str) -> String {
    let short = office.strip_prefix('K').filter(|s| s.len() == 3).unwrap_or(office);
    format!("NWS {short}")
}

// ============================================================================
// Polygon
// ============================================================================

/// Decode a `LAT...LON` block. Values are hundredths of a degree; source
/// longitudes are positive but western hemisphere, so they are negated.
fn parse_polygon(text: &str) -> Vec<[f64; 2]> {
    let Some(caps) = patterns::POLYGON.captures(text) else {
        return Vec::new();
    };

    let values: Vec<f64> = patterns::COORD_VALUE
        .find_iter(&caps[1])
        .filter_map(|m| m.as_str().parse::<f64>().ok())
        .collect();
    if values.len() < 6 || values.len() % 2 != 0 {
        return Vec::new();
    }

    let mut coords: Vec<[f64; 2]> = Vec::with_capacity(values.len() / 2 + 1);
    for pair in values.chunks_exact(2) {
        let lat = pair[0] / 100.0;
        let lon = -pair[1] / 100.0;
        if (20.0..=60.0).contains(&lat) && (-130.0..=-60.0).contains(&lon) {
            coords.push([lat, lon]);
        }
    }
    close_polygon(coords)
}

fn parse_geojson_polygon(geometry: Option<&Value>) -> Vec<[f64; 2]> {
    let Some(geometry) = geometry else {
        return Vec::new();
    };
    let outer_ring = match geometry.get("type").and_then(Value::as_str) {
        Some("Polygon") => geometry.get("coordinates").and_then(|c| c.get(0)),
        Some("MultiPolygon") => geometry
            .get("coordinates")
            .and_then(|c| c.get(0))
            .and_then(|p| p.get(0)),
        _ => None,
    };
    let Some(ring) = outer_ring.and_then(Value::as_array) else {
        return Vec::new();
    };

    // GeoJSON order is [lon, lat]; the model stores [lat, lon].
    let coords: Vec<[f64; 2]> = ring
        .iter()
        .filter_map(|pair| {
            let lon = pair.get(0).and_then(Value::as_f64)?;
            let lat = pair.get(1).and_then(Value::as_f64)?;
            Some([lat, lon])
        })
        .collect();
    close_polygon(coords)
}

/// Close the ring and enforce the minimum size: a closed polygon has at
/// least 4 vertices (3 distinct plus the closing repeat).
fn close_polygon(mut coords: Vec<[f64; 2]>) -> Vec<[f64; 2]> {
    if coords.len() < 3 {
        return Vec::new();
    }
    if coords.first() != coords.last() {
        let first = coords[0];
        coords.push(first);
    }
    if coords.len() < 4 {
        return Vec::new();
    }
    coords
}

fn polygon_centroid(polygon: &[[f64; 2]]) -> Option<[f64; 2]> {
    if polygon.is_empty() {
        return None;
    }
    let n = polygon.len() as f64;
    let lat = polygon.iter().map(|p| p[0]).sum::<f64>() / n;
    let lon = polygon.iter().map(|p| p[1]).sum::<f64>() / n;
    Some([lat, lon])
}

// ============================================================================
// Sections and prose
// ============================================================================

#[derive(Debug, Clone, Default)]
struct KeySections {
    description: String,
    instruction: String,
}

/// Recognise `* WHAT...` style headings and split their bodies between
/// description (WHAT/WHERE/WHEN) and instruction (IMPACTS/ADDITIONAL
/// DETAILS). Segments without key sections keep their trimmed prose as the
/// description.
fn split_key_sections(segment: &str) -> KeySections {
    let mut matches: Vec<(usize, usize, String)> = patterns::KEY_SECTION
        .captures_iter(segment)
        .map(|caps| {
            let whole = caps.get(0).unwrap();
            (whole.start(), whole.end(), caps[1].to_ascii_uppercase())
        })
        .collect();

    if matches.is_empty() {
        return KeySections {
            description: prose_without_codes(segment),
            instruction: instruction_block(segment),
        };
    }

    matches.sort_by_key(|(start, _, _)| *start);
    let mut description = String::new();
    let mut instruction = String::new();

    for (idx, (_, body_start, name)) in matches.iter().enumerate() {
        let body_end = matches
            .get(idx + 1)
            .map(|(next_start, _, _)| *next_start)
            .unwrap_or_else(|| {
                segment[*body_start..]
                    .find("\n\n")
                    .map(|rel| body_start + rel)
                    .unwrap_or(segment.len())
            });
        let body = segment[*body_start..body_end].trim();
        let target = if name.starts_with("IMPACT") || name.starts_with("ADDITIONAL") {
            &mut instruction
        } else {
            &mut description
        };
        if !target.is_empty() {
            target.push('\n');
        }
        target.push_str(&format!("{name}: {body}"));
    }

    KeySections {
        description,
        instruction,
    }
}

/// The `...headline...` line opening most warning segments.
fn parse_headline(segment: &str) -> Option<String> {
    patterns::HEADLINE_LINE
        .captures(segment)
        .map(|caps| caps[1].trim().trim_end_matches('-').trim().to_string())
        .filter(|h| !h.starts_with("/O."))
}

/// Free prose of a segment with the structural blocks (UGC, VTEC, polygon,
/// motion) stripped.
fn prose_without_codes(segment: &str) -> String {
    let mut out = String::new();
    for line in segment.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty()
            || patterns::UGC_LINE_START.is_match(trimmed)
            || patterns::UGC_CONTINUATION.is_match(trimmed)
            || trimmed.starts_with("/O.")
            || trimmed.starts_with("LAT...LON")
            || trimmed.starts_with("TIME...MOT...LOC")
            || trimmed == "&&"
        {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(trimmed);
    }
    out
}

/// The PRECAUTIONARY/PREPAREDNESS ACTIONS block, when present.
fn instruction_block(segment: &str) -> String {
    let upper = segment.to_ascii_uppercase();
    let Some(start) = upper.find("PRECAUTIONARY/PREPAREDNESS ACTIONS") else {
        return String::new();
    };
    let body = &segment[start..];
    let end = body.find("&&").unwrap_or(body.len());
    body[..end]
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|l| !l.is_empty() && *l != "...")
        .collect::<Vec<_>>()
        .join("\n")
}

fn parse_prose_expiration(segment: &str, received_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let caps = patterns::EXPIRATION_PHRASE.captures(segment)?;
    let am_pm = caps.get(2).map(|m| m.as_str());
    let tz = caps.get(3).map(|m| m.as_str());
    parse_local_time(&caps[1], am_pm, tz, received_at)
}

// ============================================================================
// API feature helpers
// ============================================================================

fn first_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.first().and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn api_ugc_codes(props: &serde_json::Map<String, Value>) -> Vec<String> {
    let from_geocode: Vec<String> = props
        .get("geocode")
        .and_then(|g| g.get("UGC"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if !from_geocode.is_empty() {
        return from_geocode;
    }

    // Fall back to zone URLs: https://api.weather.gov/zones/forecast/OHZ011
    props
        .get("affectedZones")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .filter_map(|url| url.trim_end_matches('/').rsplit('/').next())
                .filter(|id| {
                    id.len() == 6
                        && id[..2].chars().all(|c| c.is_ascii_uppercase())
                        && matches!(id.as_bytes()[2], b'C' | b'Z')
                        && id[3..].chars().all(|c| c.is_ascii_digit())
                })
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn api_fips_codes(props: &serde_json::Map<String, Value>) -> Vec<String> {
    let mut codes: Vec<String> = props
        .get("geocode")
        .and_then(|g| g.get("SAME"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .filter(|c| c.len() >= 5)
                .map(|c| c[c.len() - 5..].to_string())
                .collect()
        })
        .unwrap_or_default();
    codes.sort();
    codes.dedup();
    codes
}

fn apply_api_threat_parameters(props: &serde_json::Map<String, Value>, alert: &mut Alert) {
    let params = props.get("parameters");

    if let Some(gust) = params
        .and_then(|p| p.get("maxWindGust"))
        .and_then(first_string)
    {
        let digits: String = gust.chars().filter(|c| c.is_ascii_digit()).collect();
        if let Ok(value) = digits.parse::<u16>() {
            if value > alert.threat.max_wind_gust_mph.unwrap_or(0) {
                alert.threat.max_wind_gust_mph = Some(value);
            }
        }
    }

    if let Some(hail) = params
        .and_then(|p| p.get("maxHailSize"))
        .and_then(first_string)
    {
        let numeric: String = hail
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        if let Ok(value) = numeric.parse::<f64>() {
            if value > alert.threat.max_hail_size_inches.unwrap_or(0.0) {
                alert.threat.max_hail_size_inches = Some(value);
            }
        }
    }

    if let Some(detection) = params
        .and_then(|p| p.get("tornadoDetection"))
        .and_then(first_string)
    {
        alert.threat.tornado_detection = Some(detection.to_ascii_uppercase());
    }
}

fn event_to_phenomenon(event: &str) -> &'static str {
    let upper = event.to_ascii_uppercase();
    match () {
        _ if upper.contains("TORNADO") => "TO",
        _ if upper.contains("SEVERE THUNDERSTORM") => "SV",
        _ if upper.contains("FLASH FLOOD") => "FF",
        _ if upper.contains("WINTER STORM") => "WS",
        _ if upper.contains("BLIZZARD") => "BZ",
        _ if upper.contains("ICE STORM") => "IS",
        _ if upper.contains("WIND CHILL") => "WC",
        _ if upper.contains("WINTER WEATHER") => "WW",
        _ if upper.contains("LAKE EFFECT SNOW") => "LE",
        _ if upper.contains("SNOW SQUALL") => "SQ",
        _ if upper.contains("HIGH WIND") => "HW",
        _ if upper.contains("SPECIAL WEATHER STATEMENT") => "SPS",
        _ if upper.contains("FLOOD") => "FL",
        _ => "",
    }
}

fn looks_like_ugc_codes(text: &str) -> bool {
    let clean = text.trim();
    if clean.len() < 6 {
        return false;
    }
    let head = &clean[..6.min(clean.len())];
    head[..2].chars().all(|c| c.is_ascii_uppercase())
        && matches!(head.as_bytes().get(2), Some(b'C') | Some(b'Z'))
        && head[3..].chars().all(|c| c.is_ascii_digit())
        && clean.len() < 50
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refdata::{UgcEntry, UgcKind};
    use chrono::TimeZone;
    use serde_json::json;

    fn received() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, 20, 18, 16, 0).unwrap()
    }

    fn parser() -> ProductParser {
        let table = UgcTable::from_entries(vec![
            UgcEntry {
                code: "OHC085".into(),
                name: "Lake County, OH".into(),
                state: "OH".into(),
                kind: UgcKind::County,
            },
            UgcEntry {
                code: "OHC093".into(),
                name: "Lorain County, OH".into(),
                state: "OH".into(),
                kind: UgcKind::County,
            },
        ]);
        ProductParser::new(Arc::new(table), ParserConfig::default())
    }

    const SVR_PRODUCT: &str = "\
WUUS53 KCLE 201815
SVRCLE
OHC085-201900-
/O.NEW.KCLE.SV.W.0042.251220T1815Z-251220T1900Z/

Severe Thunderstorm Warning

...A SEVERE THUNDERSTORM WARNING IS IN EFFECT UNTIL 200 PM EST...

HAZARD...Wind gusts up to 70 mph and quarter size hail.
HAIL...1.00 IN
WIND...70MPH

LAT...LON 4105 8145 4098 8132 4087 8145 4093 8167
TIME...MOT...LOC 1845Z 245DEG 35KT 4105 8132

$$
";

    #[test]
    fn parses_severe_thunderstorm_warning() {
        let alerts = parser()
            .parse_product(SVR_PRODUCT, AlertSource::Push, received())
            .unwrap();
        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];

        assert_eq!(alert.product_id, "KCLE-SV.W-201815-0042");
        assert_eq!(alert.event_name, "Severe Thunderstorm Warning");
        assert_eq!(alert.phenomenon, "SV");
        assert_eq!(alert.significance, Significance::Warning);
        assert_eq!(alert.threat.max_wind_gust_mph, Some(70));
        assert_eq!(alert.threat.max_hail_size_inches, Some(1.0));
        assert_eq!(alert.affected_areas, vec!["OHC085"]);
        assert_eq!(alert.display_locations, "Lake County, OH");
        assert_eq!(
            alert.expiration_time.unwrap(),
            Utc.with_ymd_and_hms(2025, 12, 20, 19, 0, 0).unwrap()
        );
        assert!(alert.issuing_offices.contains("KCLE"));
        assert!(alert.polygon.len() >= 4);
        assert_eq!(alert.polygon.first(), alert.polygon.last());
        assert!(alert.centroid.is_some());
        assert!(alert.threat.storm_motion.is_some());
    }

    #[test]
    fn polygon_longitudes_are_western() {
        let alerts = parser()
            .parse_product(SVR_PRODUCT, AlertSource::Push, received())
            .unwrap();
        for vertex in &alerts[0].polygon {
            assert!(vertex[1] < 0.0, "longitude {} should be negative", vertex[1]);
        }
    }

    #[test]
    fn empty_body_is_an_error() {
        assert!(matches!(
            parser().parse_product("   \n", AlertSource::Push, received()),
            Err(ParseError::EmptyBody)
        ));
    }

    #[test]
    fn missing_header_is_malformed() {
        assert!(matches!(
            parser().parse_product("no header here\nOHC085-201900-", AlertSource::Push, received()),
            Err(ParseError::MalformedHeader)
        ));
    }

    #[test]
    fn hazardous_weather_outlook_is_filtered() {
        let raw = "FLUS41 KCLE 201815\nHWOCLE\nHAZARDOUS WEATHER OUTLOOK\nOHC085-201900-";
        assert!(matches!(
            parser().parse_product(raw, AlertSource::Push, received()),
            Err(ParseError::Filtered(_))
        ));
    }

    #[test]
    fn multi_segment_product_yields_one_alert_per_segment() {
        let raw = "\
WWUS43 KCLE 201815
WSWCLE
OHC085-210600-
/O.NEW.KCLE.WS.W.0007.251220T1815Z-251221T0600Z/
...WINTER STORM WARNING IN EFFECT...
SNOW ACCUMULATION...4 TO 8 INCHES

$$
OHC093-210600-
/O.NEW.KCLE.WW.Y.0012.251220T1815Z-251221T0600Z/
...WINTER WEATHER ADVISORY IN EFFECT...
SNOW ACCUMULATION...2 TO 4 INCHES

$$
";
        let alerts = parser()
            .parse_product(raw, AlertSource::Push, received())
            .unwrap();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].phenomenon, "WS");
        assert_eq!(alerts[0].threat.snow_amount_max_inches, Some(8.0));
        assert_eq!(alerts[1].phenomenon, "WW");
        assert_eq!(alerts[1].significance, Significance::Advisory);
    }

    #[test]
    fn upgrade_product_yields_action_per_vtec_line() {
        let raw = "\
WUUS53 KCLE 201815
SVRCLE
OHC085-201900-
/O.UPG.KCLE.SV.A.0120.000000T0000Z-251220T2200Z/
/O.NEW.KCLE.SV.W.0042.251220T1815Z-251220T1900Z/
...SEVERE THUNDERSTORM WARNING...

$$
";
        let alerts = parser()
            .parse_product(raw, AlertSource::Push, received())
            .unwrap();
        assert_eq!(alerts.len(), 2);
        assert_eq!(
            alerts[0].vtec.as_ref().unwrap().action,
            stormwire_common::alert::VtecAction::Upg
        );
        assert_eq!(
            alerts[1].vtec.as_ref().unwrap().action,
            stormwire_common::alert::VtecAction::New
        );
    }

    #[test]
    fn state_filter_drops_foreign_alerts() {
        let table = Arc::new(UgcTable::empty());
        let mut config = ParserConfig::default();
        config.filter_states.insert("TX".to_string());
        let parser = ProductParser::new(table, config);
        assert!(matches!(
            parser.parse_product(SVR_PRODUCT, AlertSource::Push, received()),
            Err(ParseError::Filtered(_))
        ));
    }

    #[test]
    fn sps_without_thunderstorm_keywords_is_filtered() {
        let raw = "\
WWUS83 KCLE 201815
SPSCLE
OHZ011-201900-
Dense fog has reduced visibility to under a quarter mile.

$$
";
        assert!(matches!(
            parser().parse_product(raw, AlertSource::Push, received()),
            Err(ParseError::Filtered(_))
        ));
    }

    #[test]
    fn relevant_sps_gets_deterministic_id() {
        let raw = "\
WWUS83 KCLE 201815
SPSCLE
OHC085-201900-
STRONG THUNDERSTORM WITH GUSTY WINDS WILL AFFECT LAKE COUNTY.
Wind gusts up to 50 mph are possible with this storm.

$$
";
        let first = parser()
            .parse_product(raw, AlertSource::Push, received())
            .unwrap();
        let second = parser()
            .parse_product(raw, AlertSource::Push, received())
            .unwrap();
        assert_eq!(first[0].product_id, second[0].product_id);
        assert_eq!(first[0].phenomenon, "SPS");
        assert_eq!(first[0].significance, Significance::Statement);
        assert_eq!(first[0].threat.max_wind_gust_mph, Some(50));
    }

    #[test]
    fn api_feature_parses() {
        let feature = json!({
            "properties": {
                "event": "Severe Thunderstorm Warning",
                "headline": "Severe Thunderstorm Warning issued",
                "description": "At 115 PM, a severe thunderstorm was located. HAIL...1.75 IN. WIND...60 MPH.",
                "instruction": "Move to an interior room.",
                "sent": "2025-12-20T18:15:00Z",
                "effective": "2025-12-20T18:15:00Z",
                "ends": "2025-12-20T19:00:00Z",
                "senderName": "NWS Cleveland OH",
                "parameters": {
                    "VTEC": ["/O.NEW.KCLE.SV.W.0042.251220T1815Z-251220T1900Z/"],
                    "maxWindGust": ["70 MPH"],
                    "maxHailSize": ["1.75"]
                },
                "geocode": { "UGC": ["OHC085", "OHC093"], "SAME": ["039085", "039093"] },
                "areaDesc": "Lake, OH; Lorain, OH"
            },
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[-81.45, 41.05], [-81.32, 40.98], [-81.45, 40.87], [-81.45, 41.05]]]
            }
        });

        let alert = parser().parse_api_feature(&feature, received()).unwrap();
        assert_eq!(alert.source, AlertSource::Pull);
        assert_eq!(alert.phenomenon, "SV");
        assert_eq!(alert.vtec.as_ref().unwrap().event_tracking_number, 42);
        assert_eq!(alert.affected_areas, vec!["OHC085", "OHC093"]);
        assert_eq!(alert.fips_codes, vec!["39085", "39093"]);
        // API parameters beat the prose numbers when larger.
        assert_eq!(alert.threat.max_wind_gust_mph, Some(70));
        assert_eq!(alert.threat.max_hail_size_inches, Some(1.75));
        assert_eq!(alert.display_locations, "Lake, OH; Lorain, OH");
        assert_eq!(alert.polygon.len(), 4);
        assert_eq!(
            alert.expiration_time.unwrap(),
            Utc.with_ymd_and_hms(2025, 12, 20, 19, 0, 0).unwrap()
        );
    }

    #[test]
    fn api_feature_zone_url_fallback() {
        let feature = json!({
            "properties": {
                "event": "Winter Weather Advisory",
                "description": "Snow expected. SNOW ACCUMULATION...2 TO 4 INCHES.",
                "sent": "2025-12-20T18:15:00Z",
                "ends": "2025-12-21T06:00:00Z",
                "affectedZones": ["https://api.weather.gov/zones/forecast/OHZ011"]
            }
        });
        let alert = parser().parse_api_feature(&feature, received()).unwrap();
        assert_eq!(alert.affected_areas, vec!["OHZ011"]);
        assert_eq!(alert.phenomenon, "WW");
        assert_eq!(alert.threat.snow_amount_max_inches, Some(4.0));
    }

    #[test]
    fn headline_line_is_extracted() {
        let alerts = parser()
            .parse_product(SVR_PRODUCT, AlertSource::Push, received())
            .unwrap();
        assert_eq!(
            alerts[0].headline,
            "A SEVERE THUNDERSTORM WARNING IS IN EFFECT UNTIL 200 PM EST"
        );
    }
}
