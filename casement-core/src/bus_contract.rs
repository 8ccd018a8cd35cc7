use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::{
    error::MalformedReport,
    model::{Action, Ambient, Command, DeviceId, DeviceState},
};

pub const TOPIC_REPORT_PREFIX: &str = "casement.device.report.";
pub const TOPIC_COMMAND_PREFIX: &str = "casement.device.command.";
pub const TOPIC_DEVICE_DEREGISTER: &str = "casement.device.deregister";

pub fn report_topic(device_id: &DeviceId) -> String {
    format!("{TOPIC_REPORT_PREFIX}{device_id}")
}

pub fn command_topic(device_id: &DeviceId) -> String {
    format!("{TOPIC_COMMAND_PREFIX}{device_id}")
}

/// Extracts the device id suffix of a per-device topic.
pub fn device_id_from_topic(prefix: &str, topic: &str) -> Option<DeviceId> {
    topic.strip_prefix(prefix).and_then(|raw| DeviceId::parse(raw).ok())
}

/// A reading as delivered by the device reporting side.
///
/// Fields are kept as raw JSON so that missing or wrongly typed values surface
/// as `MalformedReport` at the store boundary instead of a decode failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeviceReport {
    #[serde(default, alias = "deviceId")]
    pub device_id: Option<Value>,
    #[serde(default, alias = "modo")]
    pub mode: Option<Value>,
    #[serde(default, alias = "ventana")]
    pub window: Option<Value>,
    #[serde(default, alias = "seguro")]
    pub lock: Option<Value>,
    #[serde(default, alias = "alarma")]
    pub alarm: Option<Value>,
    #[serde(default)]
    pub ambient: Option<Value>,
    #[serde(default)]
    pub revision: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AmbientReport {
    #[serde(default, alias = "temperatureCelsius", alias = "temperatura")]
    pub temperature_celsius: Option<Value>,
    #[serde(default, alias = "isRaining", alias = "lluvia")]
    pub is_raining: Option<Value>,
    #[serde(default, alias = "isDaytime", alias = "dia")]
    pub is_daytime: Option<Value>,
}

impl DeviceReport {
    /// The reporting device, validated.
    pub fn device_id(&self) -> Result<DeviceId, MalformedReport> {
        DeviceId::parse(text(self.device_id.as_ref(), "device_id")?)
    }
}

fn required<'a>(
    value: Option<&'a Value>,
    field: &'static str,
) -> Result<&'a Value, MalformedReport> {
    value.ok_or(MalformedReport::MissingField(field))
}

fn mismatch(field: &'static str, value: &Value) -> MalformedReport {
    MalformedReport::invalid(field, &value.to_string())
}

fn text<'a>(value: Option<&'a Value>, field: &'static str) -> Result<&'a str, MalformedReport> {
    let value = required(value, field)?;
    value.as_str().ok_or_else(|| mismatch(field, value))
}

fn number(value: Option<&Value>, field: &'static str) -> Result<f64, MalformedReport> {
    let value = required(value, field)?;
    value.as_f64().ok_or_else(|| mismatch(field, value))
}

fn flag(value: Option<&Value>, field: &'static str) -> Result<bool, MalformedReport> {
    let value = required(value, field)?;
    value.as_bool().ok_or_else(|| mismatch(field, value))
}

impl TryFrom<DeviceReport> for DeviceState {
    type Error = MalformedReport;

    fn try_from(report: DeviceReport) -> Result<Self, Self::Error> {
        let device_id = report.device_id()?;
        let raw_ambient = required(report.ambient.as_ref(), "ambient")?;
        let ambient = AmbientReport::deserialize(raw_ambient)
            .map_err(|_| mismatch("ambient", raw_ambient))?;
        let revision = required(report.revision.as_ref(), "revision")?;
        let state = DeviceState {
            device_id,
            mode: text(report.mode.as_ref(), "mode")?.parse()?,
            window: text(report.window.as_ref(), "window")?.parse()?,
            lock: text(report.lock.as_ref(), "lock")?.parse()?,
            alarm: text(report.alarm.as_ref(), "alarm")?.parse()?,
            ambient: Ambient {
                temperature_celsius: number(
                    ambient.temperature_celsius.as_ref(),
                    "ambient.temperature_celsius",
                )?,
                is_raining: flag(ambient.is_raining.as_ref(), "ambient.is_raining")?,
                is_daytime: flag(ambient.is_daytime.as_ref(), "ambient.is_daytime")?,
            },
            revision: revision.as_u64().ok_or_else(|| mismatch("revision", revision))?,
        };
        state.validate()?;
        Ok(state)
    }
}

impl From<&DeviceState> for DeviceReport {
    fn from(state: &DeviceState) -> Self {
        Self {
            device_id: Some(state.device_id.as_str().into()),
            mode: Some(state.mode.as_str().into()),
            window: Some(state.window.as_str().into()),
            lock: Some(state.lock.as_str().into()),
            alarm: Some(state.alarm.as_str().into()),
            ambient: Some(json!({
                "temperature_celsius": state.ambient.temperature_celsius,
                "is_raining": state.ambient.is_raining,
                "is_daytime": state.ambient.is_daytime,
            })),
            revision: Some(state.revision.into()),
        }
    }
}

/// Wire form of a `Command`. The correlation id only ties log lines together;
/// the device answers with a report, never with a reply to the envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandEnvelope {
    pub device_id: DeviceId,
    pub action: Action,
    pub correlation_id: Uuid,
    pub issued_at: DateTime<Utc>,
}

impl CommandEnvelope {
    pub fn new(command: Command) -> Self {
        Self {
            device_id: command.device_id,
            action: command.action,
            correlation_id: Uuid::new_v4(),
            issued_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deregister {
    pub device_id: DeviceId,
}
