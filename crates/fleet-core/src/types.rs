//! Shared vocabulary used across FleetGrid crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A name that does not belong to the allowed set of an enum.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind}: {value}. Must be one of: {}", .allowed.join(", "))]
pub struct ParseVariantError {
    pub kind: &'static str,
    pub value: String,
    pub allowed: &'static [&'static str],
}

/// Coarse classification shared by every FleetGrid error type.
///
/// `NotFound`, `Conflict`, `Precondition` and `InvalidRequest` are terminal
/// and never retried. `ExternalFailure` is recorded on the affected entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Precondition,
    ExternalFailure,
    Timeout,
    /// Malformed request-level input (empty id list, threshold out of range).
    InvalidRequest,
}

/// Generates `as_str`, `Display`, `FromStr` and `ALL` for a unit enum
/// whose wire names are snake_case.
macro_rules! named_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];
            const NAMES: &'static [&'static str] = &[$($name),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ParseVariantError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok($ty::$variant),)+
                    other => Err(ParseVariantError {
                        kind: $kind,
                        value: other.to_string(),
                        allowed: $ty::NAMES,
                    }),
                }
            }
        }
    };
}

/// Whether a vehicle is parked or driving. Updates require `Parked`
/// unless forced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    Parked,
    Driving,
}

named_enum!(OperatingMode, "mode", {
    Parked => "parked",
    Driving => "driving",
});

/// Lifecycle status of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Running,
    Updating,
    Failed,
    Stopped,
}

named_enum!(EntityStatus, "status", {
    Running => "running",
    Updating => "updating",
    Failed => "failed",
    Stopped => "stopped",
});

/// Health of a supervised agent process, derived from its exit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentHealth {
    /// Process is alive.
    Running,
    /// The OS reported an error while observing the process.
    Error,
    /// Process exited with status 0.
    Stopped,
    /// Process exited non-zero or was killed by a signal.
    Failed,
}

named_enum!(AgentHealth, "health", {
    Running => "running",
    Error => "error",
    Stopped => "stopped",
    Failed => "failed",
});

/// Severity of an entity log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

named_enum!(LogLevel, "log level", {
    Debug => "debug",
    Info => "info",
    Warn => "warn",
    Error => "error",
});

/// Which flow drove a version change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    Update,
    Rollback,
}

named_enum!(UpdateKind, "update kind", {
    Update => "update",
    Rollback => "rollback",
});

/// Terminal outcome recorded in an entity's update history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateOutcome {
    Completed,
    Failed,
    RolledBack,
}

named_enum!(UpdateOutcome, "update outcome", {
    Completed => "completed",
    Failed => "failed",
    RolledBack => "rolled_back",
});
