use std::sync::{Mutex, PoisonError};

use anyhow::Result;
use async_trait::async_trait;
use casement_core::model::{Action, AlarmState, Ambient, LockState, Mode, WindowPosition};
use tracing::debug;

use crate::window::{WindowDriver, WindowReading};

/// Temperature above which an automatic window opens on a dry day.
pub const VENTILATION_THRESHOLD_CELSIUS: f64 = 24.0;

/// In-memory window that behaves like the firmware: in automatic mode it owns
/// the sash and lock, and it reacts to weather changes on its own.
pub struct SimulatedWindow {
    reading: Mutex<WindowReading>,
}

impl SimulatedWindow {
    pub fn new(reading: WindowReading) -> Self {
        Self { reading: Mutex::new(reading) }
    }

    pub fn closed_manual(ambient: Ambient) -> Self {
        Self::new(WindowReading {
            mode: Mode::Manual,
            window: WindowPosition::Closed,
            lock: LockState::Disengaged,
            alarm: AlarmState::Inactive,
            ambient,
        })
    }

    pub fn snapshot(&self) -> WindowReading {
        *self.reading.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Feeds new sensor readings. In automatic mode the window reacts to them.
    pub fn set_ambient(&self, ambient: Ambient) {
        let mut reading = self.reading.lock().unwrap_or_else(PoisonError::into_inner);
        reading.ambient = ambient;
        if reading.mode == Mode::Automatic {
            regulate(&mut reading);
        }
    }
}

fn regulate(reading: &mut WindowReading) {
    let ambient = reading.ambient;
    if ambient.is_raining || !ambient.is_daytime {
        reading.window = WindowPosition::Closed;
        reading.lock = LockState::Engaged;
    } else if ambient.temperature_celsius > VENTILATION_THRESHOLD_CELSIUS {
        reading.lock = LockState::Disengaged;
        reading.window = WindowPosition::Open;
    }
}

#[async_trait]
impl WindowDriver for SimulatedWindow {
    async fn apply(&self, action: Action) -> Result<()> {
        let mut reading = self.reading.lock().unwrap_or_else(PoisonError::into_inner);
        let automatic = reading.mode == Mode::Automatic;
        match action {
            Action::ToggleMode => {
                reading.mode = reading.mode.toggled();
                if reading.mode == Mode::Automatic {
                    regulate(&mut reading);
                }
            }
            Action::ArmAlarm => reading.alarm = AlarmState::Active,
            Action::DisarmAlarm => reading.alarm = AlarmState::Inactive,
            _ if automatic => {
                debug!(%action, "ignoring command while in automatic mode");
            }
            Action::Open => reading.window = WindowPosition::Open,
            Action::Close => reading.window = WindowPosition::Closed,
            Action::ArmLock => reading.lock = LockState::Engaged,
            Action::DisarmLock => reading.lock = LockState::Disengaged,
        }
        Ok(())
    }

    async fn read(&self) -> Result<WindowReading> {
        Ok(self.snapshot())
    }
}
