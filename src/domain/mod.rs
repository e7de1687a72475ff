/// Domain models for the application
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Id value marking a sync target slot as unused
#[allow(dead_code)]
pub const UNSET_ID: i64 = -1;

/// Sunrise and sunset for the configured location, always from one response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SunTimes {
    pub sunrise: DateTime<Utc>,
    pub sunset: DateTime<Utc>,
}

impl SunTimes {
    pub fn get(&self, event: SunEvent) -> DateTime<Utc> {
        match event {
            SunEvent::Sunrise => self.sunrise,
            SunEvent::Sunset => self.sunset,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SunEvent {
    Sunrise,
    Sunset,
}

impl fmt::Display for SunEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SunEvent::Sunrise => write!(f, "sunrise"),
            SunEvent::Sunset => write!(f, "sunset"),
        }
    }
}

/// A schedule id driven by one sun event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTarget {
    pub id: i64,
    pub event: SunEvent,
}

impl SyncTarget {
    pub fn new(id: i64, event: SunEvent) -> Self {
        Self { id, event }
    }

    #[allow(dead_code)]
    pub fn unset(event: SunEvent) -> Self {
        Self { id: UNSET_ID, event }
    }

    pub fn is_set(&self) -> bool {
        self.id >= 0
    }
}

/// Remote schedule definition as indexed by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    /// e.g. "W127/T15:30:00"
    pub trigger_expr: String,
    pub local_trigger_expr: Option<String>,
}

/// One value of the bulk `/schedules` response
#[derive(Debug, Deserialize)]
pub struct ScheduleRecord {
    pub created: String,
    pub status: String,
    pub name: String,
    pub time: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub localtime: Option<String>,
}

/// Partial-object body for `PUT /schedules/{id}`
#[derive(Debug, Serialize)]
pub struct ScheduleTimeUpdate<'a> {
    pub time: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub localtime: Option<&'a str>,
}

/// Sun-time oracle response
#[derive(Debug, Deserialize)]
pub struct SunResponse {
    pub status: String,
    pub results: SunResults,
}

#[derive(Debug, Deserialize)]
pub struct SunResults {
    pub sunrise: String,
    pub sunset: String,
}

/// Outcome of one successful poll cycle
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
}
