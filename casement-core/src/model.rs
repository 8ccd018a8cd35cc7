use serde::{Deserialize, Serialize};
use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use crate::error::MalformedReport;

/// Stable external identifier of a physical device, usually derived from its MAC.
///
/// Ids are embedded in bus topics, so separator and wildcard characters are rejected.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    pub fn parse(raw: &str) -> Result<Self, MalformedReport> {
        let trimmed = raw.trim();
        let reserved = |c: char| c.is_whitespace() || matches!(c, '.' | '/' | '#' | '+' | '*');
        if trimmed.is_empty() || trimmed.contains(reserved) {
            return Err(MalformedReport::InvalidDeviceId(raw.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for DeviceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DeviceId {
    type Error = MalformedReport;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

impl FromStr for DeviceId {
    type Err = MalformedReport;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Manual,
    Automatic,
}

impl Mode {
    pub const ALL: [Mode; 2] = [Mode::Manual, Mode::Automatic];

    /// The mode a device is expected to report after it executes `ToggleMode`.
    pub fn toggled(self) -> Self {
        match self {
            Mode::Manual => Mode::Automatic,
            Mode::Automatic => Mode::Manual,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Manual => "manual",
            Mode::Automatic => "automatic",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowPosition {
    Open,
    Closed,
}

impl WindowPosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowPosition::Open => "open",
            WindowPosition::Closed => "closed",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockState {
    Engaged,
    Disengaged,
}

impl LockState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockState::Engaged => "engaged",
            LockState::Disengaged => "disengaged",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmState {
    Active,
    Inactive,
}

impl AlarmState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmState::Active => "active",
            AlarmState::Inactive => "inactive",
        }
    }
}

// Firmware builds disagree on spelling and casing, so every field accepts the
// canonical token plus the legacy ones, case-insensitively.
fn normalize(raw: &str) -> String {
    raw.trim().to_lowercase()
}

impl FromStr for Mode {
    type Err = MalformedReport;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "manual" => Ok(Mode::Manual),
            "automatic" | "auto" | "automatico" | "automático" => Ok(Mode::Automatic),
            _ => Err(MalformedReport::invalid("mode", s)),
        }
    }
}

impl FromStr for WindowPosition {
    type Err = MalformedReport;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "open" | "abierta" | "abierto" => Ok(WindowPosition::Open),
            "closed" | "cerrada" | "cerrado" => Ok(WindowPosition::Closed),
            _ => Err(MalformedReport::invalid("window", s)),
        }
    }
}

impl FromStr for LockState {
    type Err = MalformedReport;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "engaged" | "activado" | "activo" => Ok(LockState::Engaged),
            "disengaged" | "desactivado" | "inactivo" => Ok(LockState::Disengaged),
            _ => Err(MalformedReport::invalid("lock", s)),
        }
    }
}

impl FromStr for AlarmState {
    type Err = MalformedReport;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "active" | "activada" => Ok(AlarmState::Active),
            "inactive" | "desactivada" => Ok(AlarmState::Inactive),
            _ => Err(MalformedReport::invalid("alarm", s)),
        }
    }
}

/// Advisory sensor readings. Never consulted by the control policy.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ambient {
    pub temperature_celsius: f64,
    pub is_raining: bool,
    pub is_daytime: bool,
}

/// Last reported snapshot of a single device.
///
/// Instances are never mutated after construction; the store shares them as
/// `Arc<DeviceState>` and a new report installs a new instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub device_id: DeviceId,
    pub mode: Mode,
    pub window: WindowPosition,
    pub lock: LockState,
    pub alarm: AlarmState,
    pub ambient: Ambient,
    pub revision: u64,
}

impl DeviceState {
    pub(crate) fn validate(&self) -> Result<(), MalformedReport> {
        if !self.ambient.temperature_celsius.is_finite() {
            return Err(MalformedReport::invalid(
                "ambient.temperature_celsius",
                &self.ambient.temperature_celsius.to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    ToggleMode,
    Open,
    Close,
    ArmLock,
    DisarmLock,
    ArmAlarm,
    DisarmAlarm,
}

impl Action {
    pub const ALL: [Action; 7] = [
        Action::ToggleMode,
        Action::Open,
        Action::Close,
        Action::ArmLock,
        Action::DisarmLock,
        Action::ArmAlarm,
        Action::DisarmAlarm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::ToggleMode => "toggle_mode",
            Action::Open => "open",
            Action::Close => "close",
            Action::ArmLock => "arm_lock",
            Action::DisarmLock => "disarm_lock",
            Action::ArmAlarm => "arm_alarm",
            Action::DisarmAlarm => "disarm_alarm",
        }
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user request for a device. It never carries the state it hopes to produce.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub device_id: DeviceId,
    pub action: Action,
}
