/// Application configuration module
use crate::clients::DEFAULT_SUN_SERVER_URL;
use crate::domain::{SunEvent, SyncTarget};
use crate::errors::{SyncError, SyncResult};
use std::env;
use std::path::Path;
use toml::{Table, Value};
use tracing::{debug, info, warn};

pub const DEFAULT_POLL_PERIOD_SECS: u64 = 3600;
pub const MIN_POLL_PERIOD_SECS: u64 = 10 * 60;
pub const DEFAULT_PHOSCON_PORT: u16 = 8080;
/// Maximum number of sunrise or sunset schedule ids
pub const MAX_SUNX_IDS: usize = 10;

#[derive(Clone, Debug)]
pub struct PhosconConfig {
    pub host: String,
    pub port: u16,
    pub api_key: String,
}

impl PhosconConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}/api/{}", self.host, self.port, self.api_key)
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub phoscon: PhosconConfig,
    pub latitude: f64,
    pub longitude: f64,
    pub sun_server_url: String,
    pub poll_period_secs: u64,
    pub sunrise_ids: Vec<i64>,
    pub sunset_ids: Vec<i64>,
}

struct GroupSpec {
    name: &'static str,
    required: bool,
}

struct FieldSpec {
    group: &'static str,
    key: &'static str,
    required: bool,
    validate: fn(&Value) -> Result<(), String>,
    descr: &'static str,
}

const GROUPS: &[GroupSpec] = &[
    GroupSpec { name: "phoscon", required: true },
    GroupSpec { name: "general", required: true },
    GroupSpec { name: "schedules", required: false },
];

#[rustfmt::skip]
const FIELDS: &[FieldSpec] = &[
    FieldSpec { group: "phoscon",   key: "hostname",     required: true,  validate: non_empty_string, descr: "Hostname of phoscon gateway" },
    FieldSpec { group: "phoscon",   key: "port",         required: false, validate: port_number,      descr: "Port of phoscon gateway" },
    FieldSpec { group: "phoscon",   key: "apiKey",       required: true,  validate: non_empty_string, descr: "Phoscon API key" },
    FieldSpec { group: "general",   key: "pollPeriod",   required: true,  validate: integer,          descr: "Sunrise/set poll period" },
    FieldSpec { group: "general",   key: "latitude",     required: true,  validate: latitude,         descr: "Location latitude" },
    FieldSpec { group: "general",   key: "longitude",    required: true,  validate: longitude,        descr: "Location longitude" },
    FieldSpec { group: "general",   key: "sunServerUrl", required: false, validate: non_empty_string, descr: "Sunrise/sunset service URL" },
    FieldSpec { group: "schedules", key: "sunsetID",     required: false, validate: id_list_shape,    descr: "Sunset schedule IDs" },
    FieldSpec { group: "schedules", key: "sunriseID",    required: false, validate: id_list_shape,    descr: "Sunrise schedule IDs" },
];

impl AppConfig {
    /// Load configuration from a TOML file, then apply environment overrides
    pub fn load(path: &Path) -> SyncResult<Self> {
        dotenvy::dotenv().ok();

        let contents = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("could not read '{}': {}", path.display(), e))
        })?;

        let mut cfg = Self::from_toml_str(&contents)?;
        cfg.apply_api_key_override(env::var("PHOSCON_API_KEY").ok());
        info!("Parsed config file '{}'", path.display());

        Ok(cfg)
    }

    pub fn from_toml_str(contents: &str) -> SyncResult<Self> {
        let table: Table = contents
            .parse()
            .map_err(|e: toml::de::Error| SyncError::Config(e.to_string()))?;

        validate(&table)?;

        let port = match int_at(&table, "phoscon", "port") {
            Some(0) | None => DEFAULT_PHOSCON_PORT,
            Some(p) => p as u16,
        };
        let phoscon = PhosconConfig {
            host: required_str(&table, "phoscon", "hostname")?,
            port,
            api_key: required_str(&table, "phoscon", "apiKey")?,
        };

        let poll_period = int_at(&table, "general", "pollPeriod").unwrap_or_default();
        let poll_period_secs = if poll_period < MIN_POLL_PERIOD_SECS as i64 {
            warn!(
                "Invalid sun service poll period {}s (minimum {}s), using default {}s",
                poll_period, MIN_POLL_PERIOD_SECS, DEFAULT_POLL_PERIOD_SECS
            );
            DEFAULT_POLL_PERIOD_SECS
        } else {
            poll_period as u64
        };

        let sunrise_ids = match value_at(&table, "schedules", "sunriseID") {
            Some(v) => parse_id_list(v, SunEvent::Sunrise)?,
            None => Vec::new(),
        };
        let sunset_ids = match value_at(&table, "schedules", "sunsetID") {
            Some(v) => parse_id_list(v, SunEvent::Sunset)?,
            None => Vec::new(),
        };

        Ok(Self {
            phoscon,
            latitude: required_float(&table, "general", "latitude")?,
            longitude: required_float(&table, "general", "longitude")?,
            sun_server_url: value_at(&table, "general", "sunServerUrl")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_SUN_SERVER_URL)
                .to_string(),
            poll_period_secs,
            sunrise_ids,
            sunset_ids,
        })
    }

    /// Replace the API key when a non-empty override is given
    pub fn apply_api_key_override(&mut self, key: Option<String>) {
        if let Some(key) = key.filter(|k| !k.is_empty()) {
            info!("Using phoscon API key from environment");
            self.phoscon.api_key = key;
        }
    }

    /// Configured targets, sunrise first
    pub fn targets(&self) -> Vec<SyncTarget> {
        let sunrise = self
            .sunrise_ids
            .iter()
            .map(|id| SyncTarget::new(*id, SunEvent::Sunrise));
        let sunset = self
            .sunset_ids
            .iter()
            .map(|id| SyncTarget::new(*id, SunEvent::Sunset));
        sunrise.chain(sunset).collect()
    }
}

fn validate(table: &Table) -> SyncResult<()> {
    for group in GROUPS {
        match table.get(group.name) {
            None if group.required => {
                return Err(SyncError::Config(format!(
                    "missing required group '{}'",
                    group.name
                )));
            }
            None => info!("No such group '{}' in config file", group.name),
            Some(v) if !v.is_table() => {
                return Err(SyncError::Config(format!(
                    "'{}' is not a group",
                    group.name
                )));
            }
            Some(_) => debug!("Processing config group '{}'", group.name),
        }
    }

    for field in FIELDS {
        let Some(group) = table.get(field.group).and_then(Value::as_table) else {
            continue;
        };

        match group.get(field.key) {
            None if field.required => {
                return Err(SyncError::Config(format!(
                    "failed to parse group '{}': missing required key '{}' ({})",
                    field.group, field.key, field.descr
                )));
            }
            None => info!("Missing config entry for key '{}'", field.key),
            Some(v) => (field.validate)(v).map_err(|msg| {
                SyncError::Config(format!(
                    "failed to parse group '{}': could not parse key '{}': {}",
                    field.group, field.key, msg
                ))
            })?,
        }
    }

    Ok(())
}

fn value_at<'a>(table: &'a Table, group: &str, key: &str) -> Option<&'a Value> {
    table.get(group).and_then(Value::as_table)?.get(key)
}

fn int_at(table: &Table, group: &str, key: &str) -> Option<i64> {
    value_at(table, group, key).and_then(Value::as_integer)
}

fn as_number(v: &Value) -> Option<f64> {
    v.as_float().or_else(|| v.as_integer().map(|i| i as f64))
}

fn required_str(table: &Table, group: &str, key: &str) -> SyncResult<String> {
    value_at(table, group, key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| SyncError::Config(format!("missing required key '{}'", key)))
}

fn required_float(table: &Table, group: &str, key: &str) -> SyncResult<f64> {
    value_at(table, group, key)
        .and_then(as_number)
        .ok_or_else(|| SyncError::Config(format!("missing required key '{}'", key)))
}

fn non_empty_string(v: &Value) -> Result<(), String> {
    match v.as_str() {
        Some(s) if !s.trim().is_empty() => Ok(()),
        Some(_) => Err("value is empty".to_string()),
        None => Err(format!("expected a string, found {}", v.type_str())),
    }
}

fn integer(v: &Value) -> Result<(), String> {
    v.as_integer()
        .map(|_| ())
        .ok_or_else(|| format!("expected an integer, found {}", v.type_str()))
}

fn port_number(v: &Value) -> Result<(), String> {
    match v.as_integer() {
        Some(p) if (0..=i64::from(u16::MAX)).contains(&p) => Ok(()),
        Some(p) => Err(format!("port {} out of range", p)),
        None => Err(format!("expected an integer, found {}", v.type_str())),
    }
}

fn coordinate(v: &Value, limit: f64) -> Result<(), String> {
    match as_number(v) {
        Some(c) if c.is_finite() && c.abs() <= limit => Ok(()),
        Some(c) => Err(format!("{} is outside -{}..{}", c, limit, limit)),
        None => Err(format!("expected a number, found {}", v.type_str())),
    }
}

fn latitude(v: &Value) -> Result<(), String> {
    coordinate(v, 90.0)
}

fn longitude(v: &Value) -> Result<(), String> {
    coordinate(v, 180.0)
}

fn id_list_shape(v: &Value) -> Result<(), String> {
    match v {
        Value::String(_) | Value::Integer(_) | Value::Array(_) => Ok(()),
        other => Err(format!(
            "expected a list of schedule IDs, found {}",
            other.type_str()
        )),
    }
}

/// Accepts `"3,5"`, `[3, 5]` or `3`. Only the first `MAX_SUNX_IDS` are used.
fn parse_id_list(value: &Value, event: SunEvent) -> SyncResult<Vec<i64>> {
    let items: Vec<String> = match value {
        Value::String(s) if s.trim().is_empty() => return Ok(Vec::new()),
        Value::String(s) => s.split(',').map(|p| p.trim().to_string()).collect(),
        Value::Integer(i) => vec![i.to_string()],
        Value::Array(a) => a
            .iter()
            .map(|v| match v {
                Value::Integer(i) => i.to_string(),
                other => other.to_string(),
            })
            .collect(),
        other => {
            return Err(SyncError::Config(format!(
                "unexpected {} ID list type {}",
                event,
                other.type_str()
            )))
        }
    };

    if items.len() > MAX_SUNX_IDS {
        warn!(
            "Too many {} IDs specified, only first {} will be used",
            event, MAX_SUNX_IDS
        );
    }

    items
        .iter()
        .take(MAX_SUNX_IDS)
        .enumerate()
        .map(|(i, item)| {
            if item.is_empty() {
                return Err(SyncError::Config(format!(
                    "empty {} ID at position #{}",
                    event,
                    i + 1
                )));
            }
            item.parse::<i64>()
                .ok()
                .filter(|id| *id >= 0)
                .ok_or_else(|| {
                    SyncError::Config(format!(
                        "unable to parse {} '{}' (ID #{} in list)",
                        event,
                        item,
                        i + 1
                    ))
                })
        })
        .collect()
}
