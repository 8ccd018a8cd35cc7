use std::time::Duration;

use thiserror::Error;

use crate::model::DeviceId;

/// A device report that cannot become a `DeviceState`. Absorbed and logged by
/// the reporting pipeline, never shown to dashboard users.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MalformedReport {
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("invalid value {value:?} for `{field}`")]
    InvalidValue { field: &'static str, value: String },
    #[error("invalid device id {0:?}")]
    InvalidDeviceId(String),
    #[error("report for device {reported} delivered as device {expected}")]
    DeviceMismatch { expected: DeviceId, reported: DeviceId },
}

impl MalformedReport {
    pub(crate) fn invalid(field: &'static str, value: &str) -> Self {
        Self::InvalidValue { field, value: value.to_string() }
    }
}

/// Outcomes of `CommandGateway::submit` other than acceptance.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("{reason}")]
    Denied { reason: &'static str },
    #[error("device unknown: {0}")]
    DeviceUnknown(DeviceId),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("transport send timed out after {0:?}")]
    Timeout(Duration),
}

impl CommandError {
    /// True for failures of the outbound transport, including timeouts.
    pub fn is_transport(&self) -> bool {
        matches!(self, CommandError::Transport(_) | CommandError::Timeout(_))
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("no state for device {0}")]
    NotFound(DeviceId),
    #[error("device directory lookup failed: {0}")]
    Directory(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("unknown session")]
    UnknownSession,
}
