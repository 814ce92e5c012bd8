//! Core domain types shared by every crate in this workspace: the monitored
//! `Target`, the `Notification` trail of alerts sent for it, and the small
//! set of validation rules that govern both.
//!
//! Nothing in this crate talks to a database or the network; it only
//! defines the shapes that `liveness-store`, `liveness-core` and
//! `liveness-api` pass between each other.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque positive integer identifying a [`Target`], assigned by the Store
/// on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(pub i64);

impl std::fmt::Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque positive integer identifying a [`Notification`], assigned by the
/// Store on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(pub i64);

impl std::fmt::Display for NotificationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which administrator an alert is addressed to. Stored in Postgres as a
/// plain `smallint`; `liveness-store` converts at the query boundary rather
/// than leaning on a derived `sqlx::Type`, since the mapping (`1`/`2`) is
/// part of the wire contract with the admin API's `primary_admin` hint
/// (spec.md §6.1) and is easier to keep explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum Stage {
    Primary = 1,
    Secondary = 2,
}

impl Stage {
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn from_i16(v: i16) -> Option<Stage> {
        match v {
            1 => Some(Stage::Primary),
            2 => Some(Stage::Secondary),
            _ => None,
        }
    }
}

/// A monitored HTTP(S) endpoint, with its alerting parameters and ownership.
///
/// See spec.md §3 for the field invariants: `period_ms`, `window_ms` and
/// `response_time_ms` are all positive; `shard_index` is immutable once
/// assigned; a target with `is_active = false` never has a live Prober.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    pub url: url::Url,
    pub primary_email: String,
    pub secondary_email: String,
    pub period_ms: i64,
    pub window_ms: i64,
    pub response_time_ms: i64,
    pub shard_index: i32,
    pub is_active: bool,
}

impl Target {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms as u64)
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms as u64)
    }

    pub fn response_time(&self) -> Duration {
        Duration::from_millis(self.response_time_ms as u64)
    }
}

/// Input to `Store::save_target`, before an id or shard have been assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTarget {
    pub url: url::Url,
    pub primary_email: String,
    pub secondary_email: String,
    pub period_ms: i64,
    pub window_ms: i64,
    pub response_time_ms: i64,
}

impl NewTarget {
    /// Validates the positivity invariants from spec.md §3. Does not
    /// validate email syntax: the spec only requires an address string, and
    /// the original implementation (`original_source/server/main.py`)
    /// performs no email validation either.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.period_ms <= 0 {
            return Err(ValidationError::NotPositive { field: "period" });
        }
        if self.window_ms <= 0 {
            return Err(ValidationError::NotPositive {
                field: "alerting_window",
            });
        }
        if self.response_time_ms <= 0 {
            return Err(ValidationError::NotPositive {
                field: "response_time",
            });
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} must be a positive integer")]
    NotPositive { field: &'static str },
}

/// One record of an emitted alert. See spec.md §3 for the invariants
/// governing when stage-2 rows may exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub target_id: TargetId,
    pub time_sent: DateTime<Utc>,
    pub stage: Stage,
    pub acknowledged: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_target() -> NewTarget {
        NewTarget {
            url: url::Url::parse("http://example.test/healthz").unwrap(),
            primary_email: "primary@example.test".into(),
            secondary_email: "secondary@example.test".into(),
            period_ms: 100,
            window_ms: 1000,
            response_time_ms: 5000,
        }
    }

    #[test]
    fn validate_accepts_positive_durations() {
        assert!(new_target().validate().is_ok());
    }

    #[test]
    fn validate_rejects_non_positive_durations() {
        let mut t = new_target();
        t.period_ms = 0;
        assert_eq!(
            t.validate(),
            Err(ValidationError::NotPositive { field: "period" })
        );

        let mut t = new_target();
        t.window_ms = -1;
        assert_eq!(
            t.validate(),
            Err(ValidationError::NotPositive {
                field: "alerting_window"
            })
        );

        let mut t = new_target();
        t.response_time_ms = 0;
        assert_eq!(
            t.validate(),
            Err(ValidationError::NotPositive {
                field: "response_time"
            })
        );
    }

    #[test]
    fn stage_round_trips_through_i16() {
        assert_eq!(Stage::from_i16(1), Some(Stage::Primary));
        assert_eq!(Stage::from_i16(2), Some(Stage::Secondary));
        assert_eq!(Stage::from_i16(3), None);
        assert_eq!(Stage::Primary.as_i16(), 1);
    }
}
