//! Per-adapter connection health tracking.
//!
//! [`ConnectionHealth`] is the sole authority on whether an adapter is
//! usable: no code path may treat an adapter as usable from the connected
//! flag alone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Consecutive health-check failures that trigger reconnection.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Liveness record for one adapter instance.
#[derive(Debug, Clone)]
pub struct ConnectionHealth {
    is_connected: bool,
    last_health_check: DateTime<Utc>,
    consecutive_failures: u32,
    last_error: Option<String>,
    reconnect_attempts: u32,
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        Self {
            is_connected: false,
            last_health_check: Utc::now(),
            consecutive_failures: 0,
            last_error: None,
            reconnect_attempts: 0,
        }
    }
}

impl ConnectionHealth {
    /// Record the outcome of one liveness check.
    ///
    /// Success clears the last error, resets the failure count, and marks
    /// the connection live. Failure increments the failure count, drops the
    /// connected flag, and records the error if one was given. Both stamp
    /// the check time. Never fails.
    pub fn update(&mut self, success: bool, error: Option<&str>) {
        self.last_health_check = Utc::now();
        if success {
            self.is_connected = true;
            self.consecutive_failures = 0;
            self.last_error = None;
        } else {
            self.is_connected = false;
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            if let Some(e) = error {
                self.last_error = Some(e.to_owned());
            }
        }
    }

    /// Whether the adapter is usable.
    pub fn is_healthy(&self) -> bool {
        self.is_connected && self.consecutive_failures < MAX_CONSECUTIVE_FAILURES
    }

    /// Whether the failure threshold has been crossed.
    pub fn needs_reconnect(&self) -> bool {
        self.consecutive_failures >= MAX_CONSECUTIVE_FAILURES
    }

    /// Drop the connected flag without counting a failure. Used by
    /// teardown, where the disconnect is deliberate.
    pub fn mark_disconnected(&mut self) {
        self.is_connected = false;
    }

    /// Count one reconnection attempt.
    pub fn record_reconnect_attempt(&mut self) {
        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
    }

    /// Current connected flag (health reporting only — usability goes
    /// through [`ConnectionHealth::is_healthy`]).
    pub fn is_connected(&self) -> bool {
        self.is_connected
    }

    /// Consecutive failures since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Reconnection attempts over the adapter's lifetime.
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Point-in-time copy for external reporting.
    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            is_connected: self.is_connected,
            is_healthy: self.is_healthy(),
            last_health_check: self.last_health_check,
            consecutive_failures: self.consecutive_failures,
            last_error: self.last_error.clone(),
            reconnect_attempts: self.reconnect_attempts,
        }
    }
}

/// Serializable health snapshot for the external HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Connected flag at snapshot time.
    pub is_connected: bool,
    /// Result of [`ConnectionHealth::is_healthy`] at snapshot time.
    pub is_healthy: bool,
    /// When the last liveness check ran.
    pub last_health_check: DateTime<Utc>,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Last recorded error, if any.
    pub last_error: Option<String>,
    /// Lifetime reconnection attempts.
    pub reconnect_attempts: u32,
}
