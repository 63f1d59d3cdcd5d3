//! Alert data model
//!
//! The central entity of the pipeline: a fully parsed severe-weather alert
//! from either the Weather Wire (push) or the NWS API (pull), with its VTEC
//! identity, affected geography, and threat fields.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where an alert entered the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSource {
    /// NWWS-OI Weather Wire (XMPP)
    Push,
    /// NWS REST API poll
    Pull,
}

impl fmt::Display for AlertSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertSource::Push => write!(f, "push"),
            AlertSource::Pull => write!(f, "pull"),
        }
    }
}

/// Alert lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Updated,
    Cancelled,
    Expired,
}

/// VTEC significance codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Significance {
    #[serde(rename = "W")]
    Warning,
    #[serde(rename = "A")]
    Watch,
    #[serde(rename = "Y")]
    Advisory,
    #[serde(rename = "S")]
    Statement,
    #[serde(rename = "F")]
    Forecast,
}

impl Significance {
    pub fn as_code(&self) -> &'static str {
        match self {
            Significance::Warning => "W",
            Significance::Watch => "A",
            Significance::Advisory => "Y",
            Significance::Statement => "S",
            Significance::Forecast => "F",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Significance::Warning => "Warning",
            Significance::Watch => "Watch",
            Significance::Advisory => "Advisory",
            Significance::Statement => "Statement",
            Significance::Forecast => "Forecast",
        }
    }
}

impl FromStr for Significance {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "W" => Ok(Significance::Warning),
            "A" => Ok(Significance::Watch),
            "Y" => Ok(Significance::Advisory),
            "S" => Ok(Significance::Statement),
            "F" => Ok(Significance::Forecast),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown significance code {other:?}"
            ))),
        }
    }
}

/// VTEC action codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VtecAction {
    /// New event
    New,
    /// Continuing event, no changes
    Con,
    /// Extended in time
    Ext,
    /// Expanded in area
    Exa,
    /// Extended and expanded
    Exb,
    /// Upgraded (e.g. watch to warning)
    Upg,
    /// Cancelled
    Can,
    /// Expired
    Exp,
    /// Correction
    Cor,
    /// Routine
    Rou,
}

impl VtecAction {
    /// The referenced prior event must leave the active set.
    pub fn is_termination(&self) -> bool {
        matches!(self, VtecAction::Can | VtecAction::Exp | VtecAction::Upg)
    }

    /// The incoming product replaces the fields of an existing event.
    pub fn is_update(&self) -> bool {
        matches!(
            self,
            VtecAction::Con | VtecAction::Ext | VtecAction::Exa | VtecAction::Exb | VtecAction::Cor
        )
    }

    pub fn as_code(&self) -> &'static str {
        match self {
            VtecAction::New => "NEW",
            VtecAction::Con => "CON",
            VtecAction::Ext => "EXT",
            VtecAction::Exa => "EXA",
            VtecAction::Exb => "EXB",
            VtecAction::Upg => "UPG",
            VtecAction::Can => "CAN",
            VtecAction::Exp => "EXP",
            VtecAction::Cor => "COR",
            VtecAction::Rou => "ROU",
        }
    }
}

impl FromStr for VtecAction {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(VtecAction::New),
            "CON" => Ok(VtecAction::Con),
            "EXT" => Ok(VtecAction::Ext),
            "EXA" => Ok(VtecAction::Exa),
            "EXB" => Ok(VtecAction::Exb),
            "UPG" => Ok(VtecAction::Upg),
            "CAN" => Ok(VtecAction::Can),
            "EXP" => Ok(VtecAction::Exp),
            "COR" => Ok(VtecAction::Cor),
            "ROU" => Ok(VtecAction::Rou),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown VTEC action {other:?}"
            ))),
        }
    }
}

/// Alert priority, lower number = more urgent.
///
/// Watch priorities differ from warning priorities for the same phenomenon,
/// so the lookup keys on the combined `(phenomenon, significance)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AlertPriority(pub u8);

impl AlertPriority {
    pub const TORNADO_WARNING: AlertPriority = AlertPriority(1);
    pub const SEVERE_THUNDERSTORM_WARNING: AlertPriority = AlertPriority(2);
    pub const TORNADO_WATCH: AlertPriority = AlertPriority(3);
    pub const FLASH_FLOOD_WARNING: AlertPriority = AlertPriority(4);
    pub const SEVERE_THUNDERSTORM_WATCH: AlertPriority = AlertPriority(5);
    pub const WINTER_STORM_WARNING: AlertPriority = AlertPriority(6);
    pub const BLIZZARD_WARNING: AlertPriority = AlertPriority(7);
    pub const ICE_STORM_WARNING: AlertPriority = AlertPriority(8);
    pub const FLASH_FLOOD_WATCH: AlertPriority = AlertPriority(9);
    pub const WINTER_STORM_WATCH: AlertPriority = AlertPriority(10);
    pub const WIND_CHILL_WARNING: AlertPriority = AlertPriority(11);
    pub const SPECIAL_WEATHER_STATEMENT: AlertPriority = AlertPriority(12);
    pub const WINTER_WEATHER_ADVISORY: AlertPriority = AlertPriority(13);
    pub const OTHER: AlertPriority = AlertPriority(99);

    /// Priority for a `(phenomenon, significance)` pair.
    pub fn for_event(phenomenon: &str, significance: Significance) -> AlertPriority {
        use Significance::*;
        match (phenomenon, significance) {
            ("TO", Warning) => Self::TORNADO_WARNING,
            ("TO", Watch) => Self::TORNADO_WATCH,
            ("SV", Warning) => Self::SEVERE_THUNDERSTORM_WARNING,
            ("SV", Watch) => Self::SEVERE_THUNDERSTORM_WATCH,
            ("FF", Warning) => Self::FLASH_FLOOD_WARNING,
            ("FF", Watch) => Self::FLASH_FLOOD_WATCH,
            ("WS", Warning) => Self::WINTER_STORM_WARNING,
            ("WS", Watch) => Self::WINTER_STORM_WATCH,
            ("BZ", Warning) => Self::BLIZZARD_WARNING,
            ("IS", Warning) => Self::ICE_STORM_WARNING,
            ("WC", Warning) => Self::WIND_CHILL_WARNING,
            ("WW", Advisory) => Self::WINTER_WEATHER_ADVISORY,
            ("SPS", _) => Self::SPECIAL_WEATHER_STATEMENT,
            _ => Self::OTHER,
        }
    }
}

/// Human-readable name for a phenomenon code.
pub fn phenomenon_name(code: &str) -> &'static str {
    match code {
        "TO" => "Tornado",
        "SV" => "Severe Thunderstorm",
        "FF" => "Flash Flood",
        "FA" => "Areal Flood",
        "FL" => "Flood",
        "WS" => "Winter Storm",
        "BZ" => "Blizzard",
        "IS" => "Ice Storm",
        "LE" => "Lake Effect Snow",
        "WW" => "Winter Weather",
        "WC" => "Wind Chill",
        "EC" => "Extreme Cold",
        "HT" => "Heat",
        "EH" => "Excessive Heat",
        "FG" => "Dense Fog",
        "SM" => "Dense Smoke",
        "HW" => "High Wind",
        "EW" => "Extreme Wind",
        "WI" => "Wind",
        "DS" => "Dust Storm",
        "FR" => "Frost",
        "FZ" => "Freeze",
        "HZ" => "Hard Freeze",
        "AS" => "Air Stagnation",
        "CF" => "Coastal Flood",
        "LS" => "Lakeshore Flood",
        "SU" => "High Surf",
        "RP" => "Rip Current",
        "GL" => "Gale",
        "SE" => "Hazardous Seas",
        "SR" => "Storm",
        "HF" => "Hurricane Force Wind",
        "TR" => "Tropical Storm",
        "HU" => "Hurricane",
        "TY" => "Typhoon",
        "SS" => "Storm Surge",
        "TS" => "Tsunami",
        "MA" => "Marine",
        "SQ" => "Snow Squall",
        "AF" => "Ashfall",
        "ZF" => "Freezing Fog",
        "ZR" => "Freezing Rain",
        "UP" => "Ice Accretion",
        "FW" => "Fire Weather",
        "RF" => "Red Flag",
        "AV" => "Avalanche",
        "SPS" => "Special Weather Statement",
        _ => "Unknown",
    }
}

/// Event name for a `(phenomenon, significance)` pair, e.g. `TO`/`W` becomes
/// "Tornado Warning". The statement suffix is not doubled for SPS.
pub fn event_name(phenomenon: &str, significance: Significance) -> String {
    let base = phenomenon_name(phenomenon);
    let suffix = significance.label();
    if base.ends_with(suffix) {
        base.to_string()
    } else {
        format!("{base} {suffix}")
    }
}

/// Decoded P-VTEC identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VtecInfo {
    /// Product class: O=Operational, T=Test, E=Experimental, X=Experimental-in-ops
    pub product_class: String,
    pub action: VtecAction,
    /// Issuing office code, e.g. "KCLE"
    pub office: String,
    /// Two-letter phenomenon code
    pub phenomenon: String,
    pub significance: Significance,
    pub event_tracking_number: u16,
    pub begin_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// The VTEC line as received
    pub raw: String,
}

impl VtecInfo {
    /// The event identity shared by every product in this event's lifetime.
    pub fn event_key(&self) -> EventKey {
        EventKey {
            office: self.office.clone(),
            phenomenon: self.phenomenon.clone(),
            significance: self.significance,
            event_tracking_number: self.event_tracking_number,
        }
    }
}

/// Identity of a VTEC event across its NEW/CON/.../CAN product chain.
///
/// The store index maps this tuple to the currently active product_id so
/// follow-ups can locate the record they amend or terminate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventKey {
    pub office: String,
    pub phenomenon: String,
    pub significance: Significance,
    pub event_tracking_number: u16,
}

/// Storm motion extracted from a product.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StormMotion {
    /// Direction the storm is moving toward, degrees 0-360
    pub direction_degrees: Option<u16>,
    /// Cardinal direction the storm is coming from
    pub direction_from: Option<String>,
    pub speed_mph: Option<u16>,
    pub speed_kts: Option<u16>,
}

impl StormMotion {
    pub fn is_valid(&self) -> bool {
        self.direction_degrees.is_some() && self.speed_mph.is_some()
    }
}

/// Threat fields extracted from free-form product prose.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreatData {
    pub tornado_detection: Option<String>,
    pub tornado_damage_threat: Option<String>,

    /// Sustained wind range, when the product gives one ("winds 25 to 35 mph")
    pub sustained_wind_min_mph: Option<u16>,
    pub sustained_wind_max_mph: Option<u16>,
    /// Peak gust, independent of the sustained range
    pub max_wind_gust_mph: Option<u16>,
    pub max_wind_gust_kts: Option<u16>,
    pub wind_damage_threat: Option<String>,

    pub max_hail_size_inches: Option<f64>,
    pub hail_damage_threat: Option<String>,

    pub snow_amount_min_inches: Option<f64>,
    pub snow_amount_max_inches: Option<f64>,
    pub ice_accumulation_inches: Option<f64>,

    pub flash_flood_detection: Option<String>,
    pub flash_flood_damage_threat: Option<String>,

    pub storm_motion: Option<StormMotion>,
}

impl ThreatData {
    pub fn has_tornado(&self) -> bool {
        self.tornado_detection.is_some()
    }

    pub fn has_significant_wind(&self) -> bool {
        self.max_wind_gust_mph.map_or(false, |g| g >= 70)
    }

    pub fn has_significant_hail(&self) -> bool {
        self.max_hail_size_inches.map_or(false, |h| h >= 1.0)
    }

    /// Any threat field populated at all.
    pub fn is_empty(&self) -> bool {
        *self == ThreatData::default()
    }
}

/// A fully parsed severe-weather alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Stable identity: office + product type + issue stamp + tracking number
    pub product_id: String,
    pub source: AlertSource,

    pub vtec: Option<VtecInfo>,

    /// Two-letter phenomenon code (TO, SV, FF, ...)
    pub phenomenon: String,
    pub significance: Significance,
    /// Human label, e.g. "Severe Thunderstorm Warning"
    pub event_name: String,
    pub headline: String,
    pub description: String,
    pub instruction: String,

    pub issued_time: Option<DateTime<Utc>>,
    pub effective_time: Option<DateTime<Utc>>,
    pub expiration_time: Option<DateTime<Utc>>,

    /// UGC codes, fully range-expanded, never empty for a stored alert
    pub affected_areas: Vec<String>,
    /// 5-digit FIPS codes derived from county UGC codes
    pub fips_codes: Vec<String>,
    /// Human-readable rendering of affected_areas
    pub display_locations: String,
    /// Closed ring of (lat, lon) vertices when the product carries one
    pub polygon: Vec<[f64; 2]>,
    pub centroid: Option<[f64; 2]>,

    /// Offices named by the product; always contains the header office
    pub issuing_offices: BTreeSet<String>,
    pub sender_name: String,

    pub threat: ThreatData,

    pub status: AlertStatus,
    pub priority: AlertPriority,

    pub parsed_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub update_count: u32,
}

impl Alert {
    /// A mostly-empty alert with identity fields; the parser fills the rest.
    pub fn new(product_id: String, source: AlertSource) -> Self {
        let now = Utc::now();
        Alert {
            product_id,
            source,
            vtec: None,
            phenomenon: String::new(),
            significance: Significance::Warning,
            event_name: String::new(),
            headline: String::new(),
            description: String::new(),
            instruction: String::new(),
            issued_time: None,
            effective_time: None,
            expiration_time: None,
            affected_areas: Vec::new(),
            fips_codes: Vec::new(),
            display_locations: String::new(),
            polygon: Vec::new(),
            centroid: None,
            issuing_offices: BTreeSet::new(),
            sender_name: String::new(),
            threat: ThreatData::default(),
            status: AlertStatus::Active,
            priority: AlertPriority::OTHER,
            parsed_at: now,
            last_updated: now,
            update_count: 0,
        }
    }

    /// Derive event_name and priority from the classification fields.
    pub fn finish_classification(&mut self) {
        if self.event_name.is_empty() && !self.phenomenon.is_empty() {
            self.event_name = event_name(&self.phenomenon, self.significance);
        }
        if self.priority == AlertPriority::OTHER && !self.phenomenon.is_empty() {
            self.priority = AlertPriority::for_event(&self.phenomenon, self.significance);
        }
    }

    pub fn event_key(&self) -> Option<EventKey> {
        self.vtec.as_ref().map(VtecInfo::event_key)
    }

    pub fn is_warning(&self) -> bool {
        self.significance == Significance::Warning
    }

    pub fn is_watch(&self) -> bool {
        self.significance == Significance::Watch
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration_time.map_or(false, |exp| exp <= now)
    }

    /// States touched by the affected areas, from UGC prefixes.
    pub fn states(&self) -> BTreeSet<String> {
        self.affected_areas
            .iter()
            .filter(|ugc| ugc.len() >= 2)
            .map(|ugc| ugc[..2].to_string())
            .collect()
    }

    pub fn mark_updated(&mut self) {
        self.status = AlertStatus::Updated;
        self.last_updated = Utc::now();
        self.update_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn event_names_disambiguate_watch_and_warning() {
        assert_eq!(event_name("TO", Significance::Warning), "Tornado Warning");
        assert_eq!(event_name("TO", Significance::Watch), "Tornado Watch");
        assert_eq!(
            event_name("SV", Significance::Warning),
            "Severe Thunderstorm Warning"
        );
        // The statement suffix is not doubled.
        assert_eq!(
            event_name("SPS", Significance::Statement),
            "Special Weather Statement"
        );
    }

    #[test]
    fn priorities_order_tornado_first() {
        let tor_w = AlertPriority::for_event("TO", Significance::Warning);
        let svr_w = AlertPriority::for_event("SV", Significance::Warning);
        let tor_a = AlertPriority::for_event("TO", Significance::Watch);
        let ffw = AlertPriority::for_event("FF", Significance::Warning);
        assert!(tor_w < svr_w);
        assert!(svr_w < tor_a);
        assert!(tor_a < ffw);
        assert_eq!(
            AlertPriority::for_event("ZZ", Significance::Warning),
            AlertPriority::OTHER
        );
    }

    #[test]
    fn watch_priority_differs_from_warning() {
        assert_ne!(
            AlertPriority::for_event("SV", Significance::Watch),
            AlertPriority::for_event("SV", Significance::Warning)
        );
    }

    #[test]
    fn alert_serde_round_trip() {
        let mut alert = Alert::new("KCLE-SV.W-201815-0042".into(), AlertSource::Push);
        alert.phenomenon = "SV".into();
        alert.significance = Significance::Warning;
        alert.affected_areas = vec!["OHC085".into()];
        alert.expiration_time = Some(Utc.with_ymd_and_hms(2025, 12, 20, 19, 0, 0).unwrap());
        alert.threat.max_wind_gust_mph = Some(70);
        alert.threat.max_hail_size_inches = Some(1.0);
        alert.polygon = vec![[41.05, -81.45], [40.98, -81.32], [40.87, -81.45], [41.05, -81.45]];
        alert.finish_classification();

        let json = serde_json::to_string(&alert).unwrap();
        let back: Alert = serde_json::from_str(&json).unwrap();
        assert_eq!(alert, back);
        assert_eq!(back.event_name, "Severe Thunderstorm Warning");
    }

    #[test]
    fn states_come_from_ugc_prefixes() {
        let mut alert = Alert::new("x".into(), AlertSource::Pull);
        alert.affected_areas = vec!["OHC085".into(), "OHC093".into(), "PAC003".into()];
        let states = alert.states();
        assert!(states.contains("OH"));
        assert!(states.contains("PA"));
        assert_eq!(states.len(), 2);
    }

    #[test]
    fn significance_codes_round_trip() {
        for code in ["W", "A", "Y", "S", "F"] {
            let sig: Significance = code.parse().unwrap();
            assert_eq!(sig.as_code(), code);
        }
        assert!("Q".parse::<Significance>().is_err());
    }

    #[test]
    fn vtec_action_classification() {
        assert!(VtecAction::Can.is_termination());
        assert!(VtecAction::Upg.is_termination());
        assert!(VtecAction::Exp.is_termination());
        assert!(!VtecAction::Con.is_termination());
        assert!(VtecAction::Con.is_update());
        assert!(VtecAction::Cor.is_update());
        assert!(!VtecAction::New.is_update());
    }
}
