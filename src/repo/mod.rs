/// Phoscon schedule registry
///
/// Schedules are fetched once at startup and afterwards only patched one at
/// a time. The in-memory copy of an entry changes only after the gateway has
/// acknowledged the matching update.
use crate::clients::HttpTransport;
use crate::config::PhosconConfig;
use crate::domain::{ScheduleEntry, ScheduleRecord, ScheduleTimeUpdate};
use crate::errors::{SyncError, SyncResult};
use crate::trigger::patch_time;
use crate::utils::parse_utc_timestamp;
use chrono::{DateTime, Local, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

pub struct ScheduleRepo {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    schedules: HashMap<i64, ScheduleEntry>,
}

impl ScheduleRepo {
    /// Fetch and index every schedule known to the gateway
    pub async fn initialize(
        cfg: &PhosconConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> SyncResult<Self> {
        let base_url = cfg.base_url();
        let url = format!("{}/schedules", base_url);

        let body = transport
            .get(&url)
            .await
            .map_err(|e| e.context("connection to phoscon failed"))?;
        debug!("buffer: {}", body);

        let schedules = parse_schedules(&body)?;
        info!(
            "Phoscon simple client initialised, found {} schedules",
            schedules.len()
        );

        Ok(Self {
            transport,
            base_url,
            schedules,
        })
    }

    pub fn get(&self, id: i64) -> Option<&ScheduleEntry> {
        self.schedules.get(&id)
    }

    /// All schedules ordered by id
    pub fn list(&self) -> Vec<&ScheduleEntry> {
        let mut entries: Vec<_> = self.schedules.values().collect();
        entries.sort_by_key(|e| e.id);
        entries
    }

    pub fn len(&self) -> usize {
        self.schedules.len()
    }

    /// Point schedule `id` at the time of day of `utc`.
    ///
    /// Returns `Ok(false)` without touching the network when the UTC trigger
    /// already matches, or when the entry has no local trigger to move along
    /// with it. Returns `Ok(true)` once the gateway acknowledged the change.
    pub async fn update_schedule_time(&mut self, id: i64, utc: DateTime<Utc>) -> SyncResult<bool> {
        let entry = self.get(id).ok_or(SyncError::NotFound(id))?;

        let new_utc = patch_time(&entry.trigger_expr, utc.time())?;
        if !new_utc.changed {
            debug!("No time update ({})", new_utc.expr);
            info!("No update of schedule time for '{}'", entry.name);
            return Ok(false);
        }

        let local_expr = match entry.local_trigger_expr.as_deref() {
            Some(expr) if !expr.is_empty() => expr,
            _ => {
                info!(
                    "Schedule '{}' has no local time, not updating '{}' -> '{}'",
                    entry.name, entry.trigger_expr, new_utc.expr
                );
                return Ok(false);
            }
        };
        let new_local = patch_time(local_expr, utc.with_timezone(&Local).time())?;

        info!(
            "Updated UTC time for '{}' from '{}' -> '{}'",
            entry.name, entry.trigger_expr, new_utc.expr
        );
        info!(
            "Updated local time for '{}' from '{}' -> '{}'",
            entry.name, local_expr, new_local.expr
        );

        self.push_update(id, &new_utc.expr, Some(&new_local.expr))
            .await?;

        if let Some(entry) = self.schedules.get_mut(&id) {
            entry.trigger_expr = new_utc.expr;
            entry.local_trigger_expr = Some(new_local.expr);
        }

        Ok(true)
    }

    async fn push_update(&self, id: i64, time: &str, localtime: Option<&str>) -> SyncResult<()> {
        let url = format!("{}/schedules/{}", self.base_url, id);
        let body = serde_json::to_string_pretty(&ScheduleTimeUpdate { time, localtime })?;
        debug!("URL: {}\nData: {}", url, body);

        let resp = self.transport.put(&url, body).await?;
        debug!("response buff: {}", resp);

        check_update_ack(&resp)
    }
}

/// Parse the bulk `/schedules` object. One bad entry fails the whole set.
pub fn parse_schedules(body: &str) -> SyncResult<HashMap<i64, ScheduleEntry>> {
    let root: Map<String, Value> = serde_json::from_str(body).map_err(|e| {
        SyncError::MalformedResponse(format!("could not parse phoscon JSON response: {}", e))
    })?;

    let mut schedules = HashMap::with_capacity(root.len());
    for (key, value) in root {
        let entry =
            parse_schedule(&key, value).map_err(|e| e.context(format!("parse schedule '{}'", key)))?;
        if schedules.contains_key(&entry.id) {
            return Err(SyncError::MalformedResponse(format!(
                "parse schedule '{}': duplicate schedule ID={}",
                key, entry.id
            )));
        }
        schedules.insert(entry.id, entry);
    }

    Ok(schedules)
}

fn parse_schedule(key: &str, value: Value) -> SyncResult<ScheduleEntry> {
    let id = key
        .parse::<i64>()
        .ok()
        .filter(|id| *id >= 0)
        .ok_or_else(|| SyncError::MalformedResponse("invalid phoscon schedule id".to_string()))?;

    if !value.is_object() {
        return Err(SyncError::MalformedResponse(
            "invalid phoscon schedule".to_string(),
        ));
    }

    let record: ScheduleRecord = serde_json::from_value(value)
        .map_err(|e| SyncError::MalformedResponse(format!("invalid JSON response ({})", e)))?;

    let created_at = parse_utc_timestamp(&record.created).ok_or_else(|| {
        SyncError::MalformedResponse(format!(
            "could not parse creation timestamp '{}'",
            record.created
        ))
    })?;

    info!(
        "Schedule [{}] '{}' Created: {} Status: {} Time: {} (Local: {})",
        id,
        record.name,
        created_at.format("%Y-%m-%d  %H:%M:%S"),
        record.status,
        record.time,
        record.localtime.as_deref().unwrap_or("(null)")
    );

    Ok(ScheduleEntry {
        id,
        name: record.name,
        description: record.description,
        status: record.status,
        created_at,
        trigger_expr: record.time,
        local_trigger_expr: record.localtime,
    })
}

/// The gateway answers `[{"success": {...}}]` for an accepted update
fn check_update_ack(body: &str) -> SyncResult<()> {
    let resp: Value = serde_json::from_str(body).map_err(|_| {
        SyncError::MalformedResponse("could not parse phoscon JSON response".to_string())
    })?;

    let first = resp.as_array().and_then(|a| a.first()).ok_or_else(|| {
        SyncError::MalformedResponse("unexpected response from server: not an array".to_string())
    })?;

    if first.get("success").is_none() {
        return Err(SyncError::MalformedResponse(
            "unexpected response from server: missing success string".to_string(),
        ));
    }

    Ok(())
}
