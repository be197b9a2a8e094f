//! Configuration loading and representation.
//!
//! Everything is read from environment variables with defaults that match
//! the documented delivery contract (3 attempts, 500ms/2s/8s backoff).

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;

use eventrail_events::Lane;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Outbox relay retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Delivery attempts before a record is dead-lettered.
    pub max_attempts: u32,
    /// Sleep after failed attempt `n` is `backoff[n - 1]` (last entry repeats).
    pub backoff: Vec<Duration>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: vec![
                Duration::from_millis(500),
                Duration::from_secs(2),
                Duration::from_secs(8),
            ],
        }
    }
}

impl RelayConfig {
    /// Backoff to sleep after the given (1-indexed) failed attempt.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 || self.backoff.is_empty() {
            return Duration::ZERO;
        }
        let idx = (attempt as usize - 1).min(self.backoff.len() - 1);
        self.backoff[idx]
    }
}

/// SAFE_AUTO replay policy (fixed backoff).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayConfig {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

/// Lane-specific processing thresholds for the projection funnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaThresholds {
    pub critical: Duration,
    pub standard: Duration,
    pub background: Duration,
}

impl Default for SlaThresholds {
    fn default() -> Self {
        Self {
            critical: Duration::from_millis(500),
            standard: Duration::from_secs(5),
            background: Duration::from_secs(60),
        }
    }
}

impl SlaThresholds {
    pub fn for_lane(&self, lane: Lane) -> Duration {
        match lane {
            Lane::Critical => self.critical,
            Lane::Standard => self.standard,
            Lane::Background => self.background,
        }
    }
}

/// Best-effort processor notification after a dead-letter write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DlqNotifyConfig {
    pub url: String,
    pub timeout: Duration,
}

/// Scheduling command gateway used by the scheduling saga.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulingCommandsConfig {
    pub url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventrailConfig {
    pub relay: RelayConfig,
    pub replay: ReplayConfig,
    pub sla: SlaThresholds,
    /// `None` disables the direct notify; the persisted entry still drives
    /// the processors.
    pub dlq_notify: Option<DlqNotifyConfig>,
    /// `None` leaves the scheduling saga unregistered.
    pub scheduling: Option<SchedulingCommandsConfig>,
    /// Remote lane endpoints. Empty means in-process routing.
    pub lane_endpoints: HashMap<Lane, String>,
}

impl EventrailConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load using an arbitrary lookup (tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(v) = lookup("EVENTRAIL_RELAY_MAX_ATTEMPTS") {
            cfg.relay.max_attempts = parse_attempts("EVENTRAIL_RELAY_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("EVENTRAIL_RELAY_BACKOFF_MS") {
            cfg.relay.backoff = parse_ms_list("EVENTRAIL_RELAY_BACKOFF_MS", &v)?;
        }
        if let Some(v) = lookup("EVENTRAIL_REPLAY_MAX_ATTEMPTS") {
            cfg.replay.max_attempts = parse_attempts("EVENTRAIL_REPLAY_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("EVENTRAIL_REPLAY_BACKOFF_MS") {
            cfg.replay.backoff = parse_ms("EVENTRAIL_REPLAY_BACKOFF_MS", &v)?;
        }
        if let Some(v) = lookup("EVENTRAIL_SLA_CRITICAL_MS") {
            cfg.sla.critical = parse_ms("EVENTRAIL_SLA_CRITICAL_MS", &v)?;
        }
        if let Some(v) = lookup("EVENTRAIL_SLA_STANDARD_MS") {
            cfg.sla.standard = parse_ms("EVENTRAIL_SLA_STANDARD_MS", &v)?;
        }
        if let Some(v) = lookup("EVENTRAIL_SLA_BACKGROUND_MS") {
            cfg.sla.background = parse_ms("EVENTRAIL_SLA_BACKGROUND_MS", &v)?;
        }

        if let Some(url) = lookup("EVENTRAIL_DLQ_NOTIFY_URL").filter(|u| !u.trim().is_empty()) {
            let timeout = match lookup("EVENTRAIL_DLQ_NOTIFY_TIMEOUT_MS") {
                Some(v) => parse_ms("EVENTRAIL_DLQ_NOTIFY_TIMEOUT_MS", &v)?,
                None => Duration::from_secs(2),
            };
            cfg.dlq_notify = Some(DlqNotifyConfig { url, timeout });
        }

        if let Some(url) = lookup("EVENTRAIL_SCHEDULING_URL").filter(|u| !u.trim().is_empty()) {
            let timeout = match lookup("EVENTRAIL_SCHEDULING_TIMEOUT_MS") {
                Some(v) => parse_ms("EVENTRAIL_SCHEDULING_TIMEOUT_MS", &v)?,
                None => Duration::from_secs(5),
            };
            cfg.scheduling = Some(SchedulingCommandsConfig { url, timeout });
        }

        for lane in Lane::ALL {
            let var = lane_url_var(lane);
            if let Some(url) = lookup(var).filter(|u| !u.trim().is_empty()) {
                cfg.lane_endpoints.insert(lane, url);
            }
        }

        Ok(cfg)
    }
}

fn lane_url_var(lane: Lane) -> &'static str {
    match lane {
        Lane::Critical => "EVENTRAIL_LANE_CRITICAL_URL",
        Lane::Standard => "EVENTRAIL_LANE_STANDARD_URL",
        Lane::Background => "EVENTRAIL_LANE_BACKGROUND_URL",
    }
}

fn invalid(var: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_attempts(var: &'static str, value: &str) -> Result<u32, ConfigError> {
    let n: u32 = value
        .trim()
        .parse()
        .map_err(|e: std::num::ParseIntError| invalid(var, value, e.to_string()))?;
    if n == 0 {
        return Err(invalid(var, value, "must be at least 1"));
    }
    Ok(n)
}

fn parse_ms(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| invalid(var, value, e.to_string()))
}

fn parse_ms_list(var: &'static str, value: &str) -> Result<Vec<Duration>, ConfigError> {
    let list = value
        .split(',')
        .map(|part| parse_ms(var, part))
        .collect::<Result<Vec<_>, _>>()?;
    if list.is_empty() {
        return Err(invalid(var, value, "empty list"));
    }
    Ok(list)
}
