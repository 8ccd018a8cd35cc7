//! Mode-gated control policy.
//!
//! `ToggleMode` and the alarm actions are allowed in every mode. Window and
//! lock actions require manual mode.

use serde::Serialize;

use crate::model::{Action, Mode};

pub const AUTOMATIC_MODE_DENIAL: &str = "device is in automatic mode; switch to manual first";

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Allowed,
    Denied { reason: &'static str },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

/// Decides whether `action` may be sent to a device currently reporting `mode`.
pub fn can_execute(mode: Mode, action: Action) -> Decision {
    match (mode, action) {
        (_, Action::ToggleMode) => Decision::Allowed,
        (_, Action::ArmAlarm | Action::DisarmAlarm) => Decision::Allowed,
        (Mode::Manual, Action::Open | Action::Close | Action::ArmLock | Action::DisarmLock) => {
            Decision::Allowed
        }
        (Mode::Automatic, Action::Open | Action::Close | Action::ArmLock | Action::DisarmLock) => {
            Decision::Denied { reason: AUTOMATIC_MODE_DENIAL }
        }
    }
}
