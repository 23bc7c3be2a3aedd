//! Node health.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Health classification of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthType {
    Unknown,
    Healthy,
    Unhealthy,
    Exited,
    Degraded,
}

impl HealthType {
    /// Ordering used to pick the least healthy of several reports.
    fn severity(self) -> u8 {
        match self {
            HealthType::Healthy => 0,
            HealthType::Unknown => 1,
            HealthType::Degraded => 2,
            HealthType::Unhealthy => 3,
            HealthType::Exited => 4,
        }
    }

    /// Unhealthy and exited nodes are failing; their dependents degrade.
    pub fn is_failing(self) -> bool {
        matches!(self, HealthType::Unhealthy | HealthType::Exited)
    }
}

/// A health report with its reason and time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Health {
    pub health: HealthType,
    pub message: String,
    pub update_time: DateTime<Utc>,
}

impl Health {
    pub fn new(health: HealthType, message: impl Into<String>) -> Self {
        Self {
            health,
            message: message.into(),
            update_time: Utc::now(),
        }
    }

    pub fn healthy(message: impl Into<String>) -> Self {
        Self::new(HealthType::Healthy, message)
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(HealthType::Unhealthy, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(HealthType::Unknown, message)
    }

    /// Picks the least healthy report. Equal severities resolve to the most
    /// recent report.
    pub fn least_healthy<'a>(reports: impl IntoIterator<Item = &'a Health>) -> Option<&'a Health> {
        reports.into_iter().fold(None, |worst: Option<&Health>, h| match worst {
            None => Some(h),
            Some(w) => {
                let (hs, ws) = (h.health.severity(), w.health.severity());
                if hs > ws || (hs == ws && h.update_time > w.update_time) {
                    Some(h)
                } else {
                    Some(w)
                }
            }
        })
    }
}

impl Default for Health {
    fn default() -> Self {
        Self::unknown("component created")
    }
}
