//! Compiled regex patterns for NWS text products
//!
//! All patterns are compiled once via `once_cell::sync::Lazy` statics and
//! documented with the product fragment they target.

use once_cell::sync::Lazy;
use regex::Regex;

/// WMO communication header, the first line of every product.
/// Example: `WUUS53 KCLE 201815`
pub static WMO_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^([A-Z]{4}\d{2})\s+([A-Z]{4})\s+(\d{6})\s*$").unwrap());

/// AWIPS product identifier on the line after the WMO header.
/// Example: `SVRCLE`
pub static AWIPS_PIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^([A-Z]{3})([A-Z0-9]{1,3})\s*$").unwrap());

/// P-VTEC line.
/// Format: `/k.aaa.cccc.pp.s.####.yymmddThhnnZ-yymmddThhnnZ/`
/// Example: `/O.NEW.KCLE.SV.W.0042.251220T1815Z-251220T1900Z/`
pub static VTEC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"/([OTEX])\.(NEW|CON|EXT|EXA|EXB|UPG|CAN|EXP|COR|ROU)\.([A-Z]{4})\.([A-Z]{2})\.([WASFY])\.(\d{4})\.(\d{6}T\d{4}Z)-(\d{6}T\d{4}Z)/",
    )
    .unwrap()
});

/// Anything that looks like it was meant to be a VTEC line, used to
/// distinguish "no VTEC present" from "VTEC present but malformed".
pub static VTEC_CANDIDATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^/[OTEX]\.[A-Z]{2,3}\.\S+/\s*$").unwrap());

/// Start of a UGC line: state + C/Z + first code.
/// Example: `OHC085-093-201900-`
pub static UGC_LINE_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]{2}[CZ]\d{3}").unwrap());

/// UGC continuation line: only codes, ranges and dashes.
pub static UGC_CONTINUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\d>\-]+-$").unwrap());

/// A range inside a UGC code list, `061>065` meaning 061 through 065.
pub static UGC_RANGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{3})>(\d{3})").unwrap());

/// Trailing UGC expiration stamp, `DDHHMM`.
pub static UGC_EXPIRATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{6})-?\s*$").unwrap());

/// LAT...LON polygon block. Coordinates are hundredths of a degree; the
/// greedy digit/whitespace class stops on its own at `TIME...MOT...LOC`,
/// `&&` or `$$`.
pub static POLYGON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"LAT\.\.\.LON\s+([\d\s]+)").unwrap());

/// A single polygon coordinate value, 4 digits (DDMM) or 5 (DDDMM).
pub static COORD_VALUE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{4,5})").unwrap());

/// Storm motion line: `TIME...MOT...LOC 1845Z 245DEG 35KT 4105 8132`
pub static MOTION_TIME_MOT_LOC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)TIME\.\.\.MOT\.\.\.LOC\s+\d{4}Z\s+(\d{3})DEG\s+(\d+)KT").unwrap());

/// Prose storm motion: `MOVING SW AT 35 MPH`
pub static MOTION_PROSE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)MOVING\s+(?:TO\s+THE\s+)?([NSEW]{1,3})\s+AT\s+(\d+)\s*(MPH|KT)").unwrap()
});

/// Tornado detection tag: `TORNADO...RADAR INDICATED`
pub static TORNADO_DETECTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)TORNADO\.\.\.(RADAR\s+INDICATED|OBSERVED|CONFIRMED|POSSIBLE)").unwrap()
});

/// Tornado damage threat tag.
pub static TORNADO_DAMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)TORNADO\s+DAMAGE\s+THREAT\.\.\.(CONSIDERABLE|CATASTROPHIC)").unwrap()
});

/// Peak gust: `wind gusts up to 70 mph`, `GUSTS TO 60 MPH`,
/// `gusts of 45 to 50 mph` (captures the higher bound).
pub static WIND_GUST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)GUSTS?\s+(?:OF\s+)?(?:UP\s+)?(?:TO\s+)?(?:\d{2,3}\s+TO\s+)?(\d{2,3})\s*(MPH|KT)")
        .unwrap()
});

/// Bulletin threat tag form: `WIND...70MPH` / `MAX WIND GUST...80 MPH`
pub static WIND_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:MAX\s+)?(?:HAZARD\.\.\.)?WIND(?:\s+GUST)?S?\.\.\.\s*(\d{2,3})\s*(MPH|KT)")
        .unwrap()
});

/// Gust in trailing position: `60 MPH WIND GUSTS`
pub static WIND_TRAILING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d{2,3})\s*(MPH|KT)\s+WIND(?:\s+GUST)?S?").unwrap());

/// Sustained wind range: `winds 25 to 35 mph`, `winds of 25 to 35 mph`.
pub static SUSTAINED_WIND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)WINDS?\s+(?:OF\s+)?(\d{2,3})\s+TO\s+(\d{2,3})\s*(MPH|KT)").unwrap()
});

/// Wind damage threat tag.
pub static WIND_DAMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)WIND\s+DAMAGE\s+THREAT\.\.\.(CONSIDERABLE|DESTRUCTIVE|CATASTROPHIC)").unwrap()
});

/// Numeric hail size with a HAIL/SIZE token in front:
/// `HAIL...1.00 IN`, `HAIL SIZE...1.75 INCHES`, `HAIL UP TO 2 INCHES`
pub static HAIL_SIZE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:MAX\s+)?HAIL(?:\s+SIZE)?\.{0,3}\s*(?:OF\s+)?(?:UP\s+)?(?:TO\s+)?(\d+\.?\d*)\s*(?:INCH(?:ES)?|IN\b)",
    )
    .unwrap()
});

/// Numeric hail size in trailing position: `1.75 INCH HAIL`
pub static HAIL_SIZE_TRAILING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+\.?\d*)\s*(?:INCH(?:ES)?|IN\.?)\s+(?:HAIL|SIZE)").unwrap()
});

/// Named hail size: `QUARTER SIZE HAIL`, `up to golf ball sized hail`.
/// The HAIL/SIZE token requirement keeps "quarter mile" from matching.
pub static HAIL_NAMED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(PEA|MARBLE|DIME|PENNY|NICKEL|QUARTER|HALF\s+DOLLAR|PING\s+PONG(?:\s+BALL)?|GOLF\s+BALL|HEN\s+EGG|TENNIS\s+BALL|BASEBALL|APPLE|SOFTBALL|GRAPEFRUIT)(?:\s+SIZED?)?\s+HAIL",
    )
    .unwrap()
});

/// Hail damage threat tag.
pub static HAIL_DAMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)HAIL\s+DAMAGE\s+THREAT\.\.\.(CONSIDERABLE|CATASTROPHIC)").unwrap()
});

/// Snow accumulation in its common phrasings:
/// `SNOW ACCUMULATION...4 TO 8 INCHES`, `up to 1 inch of quick snow`,
/// `3 TO 5 INCHES OF SNOW`.
pub static SNOW_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:SNOW(?:\s+ACCUMULATION)?S?\.{0,3}\s*(?:OF\s+)?(?:UP\s+TO\s+)?(?:BETWEEN\s+)?(\d+\.?\d*)(?:\s*(?:TO|-|AND)\s*(\d+\.?\d*))?\s*INCH(?:ES)?|(\d+\.?\d*)(?:\s*(?:TO|-|AND)\s*(\d+\.?\d*))?\s*INCH(?:ES)?\s+OF\s+(?:\w+\s+)*?SNOW|UP\s+TO\s+(\d+\.?\d*)\s*INCH(?:ES)?\s+OF\s+(?:\w+\s+)*?SNOW)",
    )
    .unwrap()
});

/// Ice accumulation: `ICE ACCUMULATIONS OF ONE TENTH...` style numerics,
/// `ICE...0.25 INCH`.
pub static ICE_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)ICE(?:\s+ACCUMULATION)?S?\.{0,3}\s*(?:OF\s+)?(?:UP\s+TO\s+)?(\d+\.?\d*)\s*(?:TO\s+(\d+\.?\d*)\s*)?INCH(?:ES)?",
    )
    .unwrap()
});

/// Flash flood detection tag.
pub static FLOOD_DETECTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)FLASH\s+FLOOD(?:ING)?\.\.\.(RADAR\s+INDICATED|OBSERVED|POSSIBLE)").unwrap()
});

/// Flash flood damage threat tag.
pub static FLOOD_DAMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)FLASH\s+FLOOD\s+DAMAGE\s+THREAT\.\.\.(CONSIDERABLE|CATASTROPHIC)").unwrap()
});

/// The `...HEADLINE...` line that opens most warning segments.
pub static HEADLINE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\.\.\.(.+?)\.\.\.\s*$").unwrap());

/// Key-section heading: `* WHAT...`, `* IMPACTS...`
pub static KEY_SECTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\*\s+(WHAT|WHERE|WHEN|IMPACTS?|ADDITIONAL\s+DETAILS)\.{3}\s*").unwrap()
});

/// Expiration phrase in prose: `UNTIL 530 PM EST`, `THROUGH 1145 PM CDT`.
pub static EXPIRATION_PHRASE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:UNTIL|THROUGH|EXPIRES?(?:\s+AT)?)\s+(\d{3,4})\s*(AM|PM)?\s*([A-Z]{2,4})?")
        .unwrap()
});

/// Issuance line: `339 PM CDT Mon Aug 8 2022`
pub static ISSUANCE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?im)^(\d{3,4})\s+(AM|PM)\s+([A-Z]{2,4})\s+(?:Mon|Tue|Wed|Thu|Fri|Sat|Sun)\s+(Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)\s+(\d{1,2})\s+(\d{4})\s*$",
    )
    .unwrap()
});

/// Watch products without VTEC: `TORNADO WATCH NUMBER 245`
pub static WATCH_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(TORNADO|SEVERE\s+THUNDERSTORM)\s+WATCH\s+(?:NUMBER\s+)?(\d+)").unwrap()
});

/// Inches for a named hail size.
pub fn named_hail_size(name: &str) -> Option<f64> {
    let normalized = name.to_ascii_uppercase();
    let normalized = normalized.split_whitespace().collect::<Vec<_>>().join(" ");
    let size = match normalized.as_str() {
        "PEA" => 0.25,
        "MARBLE" | "DIME" => 0.5,
        "PENNY" => 0.75,
        "NICKEL" => 0.88,
        "QUARTER" => 1.0,
        "HALF DOLLAR" => 1.25,
        "PING PONG" | "PING PONG BALL" => 1.5,
        "GOLF BALL" => 1.75,
        "HEN EGG" => 2.0,
        "TENNIS BALL" => 2.5,
        "BASEBALL" => 2.75,
        "APPLE" => 3.0,
        "SOFTBALL" => 4.0,
        "GRAPEFRUIT" => 4.5,
        _ => return None,
    };
    Some(size)
}

/// SPS relevance: thunderstorm-adjacent keywords worth keeping.
pub const SPS_INCLUDE_KEYWORDS: &[&str] = &[
    "THUNDERSTORM",
    "SEVERE",
    "WIND",
    "HAIL",
    "LIGHTNING",
    "GUSTY",
    "DAMAGING",
    "STRONG STORM",
];

/// SPS exclusions: statements about hazards this pipeline does not carry.
pub static SPS_EXCLUDE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\bFIRE\b|\bSMOKE\b|\bFOG\b|\bHEAT\b|\bRIP\s*CURRENT|\bBEACH\s*HAZARD|\bMARINE\b|\bAIR\s*QUALITY|\bDUST\b",
    )
    .unwrap()
});
