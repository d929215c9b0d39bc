//! Combined dashboard state.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Why a refresh was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshReason {
    Manual,
    Poll,
    MutationFollowUp,
    SessionStarted,
}

impl RefreshReason {
    /// Whether consumers should show a busy indicator for this refresh.
    pub fn raises_updating(self) -> bool {
        matches!(self, RefreshReason::Manual | RefreshReason::SessionStarted)
    }

    /// Whether a successful, non-degraded refresh of this kind lifts a
    /// polling suspension.
    pub fn resumes_polling(self) -> bool {
        matches!(self, RefreshReason::Manual | RefreshReason::SessionStarted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RefreshReason::Manual => "manual",
            RefreshReason::Poll => "poll",
            RefreshReason::MutationFollowUp => "mutation_follow_up",
            RefreshReason::SessionStarted => "session_started",
        }
    }
}

/// When a snapshot counts as a degraded connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationPolicy {
    /// Every source failed
    #[default]
    AllSourcesFailed,
    /// At least one source failed
    AnySourceFailed,
}

impl DegradationPolicy {
    pub fn is_degraded(self, failed: usize, total: usize) -> bool {
        match self {
            DegradationPolicy::AllSourcesFailed => total > 0 && failed == total,
            DegradationPolicy::AnySourceFailed => failed > 0,
        }
    }
}

/// Result of one source in a refresh.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceValue {
    Fetched { value: Value },
    /// The fetch failed and the source's default stands in.
    Defaulted { value: Value, error: String },
}

impl SourceValue {
    pub fn value(&self) -> &Value {
        match self {
            SourceValue::Fetched { value } | SourceValue::Defaulted { value, .. } => value,
        }
    }

    pub fn is_defaulted(&self) -> bool {
        matches!(self, SourceValue::Defaulted { .. })
    }
}

/// Some sources failed while others succeeded. Reported, never raised.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{} of {total} dashboard sources failed: {}", failed.len(), failed.join(", "))]
pub struct PartialFetchFailure {
    pub failed: Vec<String>,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct DashboardSnapshot {
    pub sources: BTreeMap<String, SourceValue>,
    pub last_update: Option<DateTime<Utc>>,
    pub connection_degraded: bool,
    /// Refresh sequence that produced this snapshot; 0 before the first one.
    pub sequence: u64,
}

impl DashboardSnapshot {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn get(&self, source: &str) -> Option<&Value> {
        self.sources.get(source).map(SourceValue::value)
    }

    pub fn failed_sources(&self) -> Vec<&str> {
        self.sources
            .iter()
            .filter(|(_, value)| value.is_defaulted())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// `Some` when at least one but not every source failed.
    pub fn partial_failure(&self) -> Option<PartialFetchFailure> {
        let failed: Vec<String> = self.failed_sources().into_iter().map(String::from).collect();
        if failed.is_empty() || failed.len() == self.sources.len() {
            return None;
        }
        Some(PartialFetchFailure {
            failed,
            total: self.sources.len(),
        })
    }
}
