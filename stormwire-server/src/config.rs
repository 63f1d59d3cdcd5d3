//! Environment-variable configuration
//!
//! All runtime settings come from the environment at startup; missing
//! mandatory values and unparseable numbers are fatal. Command-line flags
//! may override the listener address (see `main.rs`).

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use crate::error::Error;
use crate::sources::nwws::NwwsConfig;

const DEFAULT_NWWS_HOST: &str = "nwws-oi.weather.gov";
const DEFAULT_NWWS_PORT: u16 = 5222;
const DEFAULT_NWWS_ROOM: &str = "nwws@conference.nwws-oi.weather.gov";
const DEFAULT_NWWS_NICKNAME: &str = "stormwire";
const DEFAULT_API_BASE: &str = "https://api.weather.gov";
const DEFAULT_USER_AGENT: &str = "stormwire/0.3 (+https://github.com/stormwire/stormwire)";
const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 300;
const DEFAULT_GRACE_SECONDS: i64 = 60;
const DEFAULT_UGC_TABLE: &str = "data/ugc_names.json";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;

/// Resolved service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Push source settings; `None` when `NWWS_ENABLED` is off
    pub nwws: Option<NwwsConfig>,

    pub nws_api_base: String,
    pub nws_user_agent: String,
    pub poll_interval_seconds: u64,

    /// Two-letter states to keep; empty accepts everything
    pub filter_states: BTreeSet<String>,
    pub expiration_grace_seconds: i64,

    /// Snapshot file; `None` disables persistence
    pub persist_path: Option<PathBuf>,
    pub ugc_table_path: PathBuf,

    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Config, Error> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Config::from_vars(&vars)
    }

    /// Build from an explicit variable map (tests use this directly).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Config, Error> {
        let get = |key: &str| vars.get(key).map(String::as_str).filter(|v| !v.is_empty());

        let nwws_enabled = match get("NWWS_ENABLED") {
            None => false,
            Some(raw) => parse_bool("NWWS_ENABLED", raw)?,
        };

        let nwws = if nwws_enabled {
            let username = get("NWWS_USERNAME")
                .ok_or_else(|| Error::Config("NWWS_ENABLED is set but NWWS_USERNAME is missing".into()))?;
            let password = get("NWWS_PASSWORD")
                .ok_or_else(|| Error::Config("NWWS_ENABLED is set but NWWS_PASSWORD is missing".into()))?;
            Some(NwwsConfig {
                host: get("NWWS_HOST").unwrap_or(DEFAULT_NWWS_HOST).to_string(),
                port: parse_number(get("NWWS_PORT"), "NWWS_PORT", DEFAULT_NWWS_PORT)?,
                username: username.to_string(),
                password: password.to_string(),
                room: get("NWWS_ROOM").unwrap_or(DEFAULT_NWWS_ROOM).to_string(),
                nickname: get("NWWS_NICKNAME")
                    .unwrap_or(DEFAULT_NWWS_NICKNAME)
                    .to_string(),
            })
        } else {
            None
        };

        let filter_states: BTreeSet<String> = get("FILTER_STATES")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_ascii_uppercase)
                    .collect()
            })
            .unwrap_or_default();

        for state in &filter_states {
            if state.len() != 2 || !state.chars().all(|c| c.is_ascii_uppercase()) {
                return Err(Error::Config(format!(
                    "FILTER_STATES entry {state:?} is not a two-letter state code"
                )));
            }
        }

        Ok(Config {
            nwws,
            nws_api_base: get("NWS_API_BASE").unwrap_or(DEFAULT_API_BASE).to_string(),
            nws_user_agent: get("NWS_USER_AGENT")
                .unwrap_or(DEFAULT_USER_AGENT)
                .to_string(),
            poll_interval_seconds: parse_number(
                get("POLL_INTERVAL_SECONDS"),
                "POLL_INTERVAL_SECONDS",
                DEFAULT_POLL_INTERVAL_SECONDS,
            )?,
            filter_states,
            expiration_grace_seconds: parse_number(
                get("EXPIRATION_GRACE_SECONDS"),
                "EXPIRATION_GRACE_SECONDS",
                DEFAULT_GRACE_SECONDS,
            )?,
            persist_path: get("PERSIST_PATH").map(PathBuf::from),
            ugc_table_path: get("UGC_TABLE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_UGC_TABLE)),
            host: get("HOST").unwrap_or(DEFAULT_HOST).to_string(),
            port: parse_number(get("PORT"), "PORT", DEFAULT_PORT)?,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, Error> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!("{key}={other:?} is not a boolean"))),
    }
}

fn parse_number<T: std::str::FromStr>(
    raw: Option<&str>,
    key: &str,
    default: T,
) -> Result<T, Error> {
    match raw {
        None => Ok(default),
        Some(text) => text
            .parse()
            .map_err(|_| Error::Config(format!("{key}={text:?} is not a valid number"))),
    }
}
