use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// Button type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ButtonType {
    A,
    B,
    X,
    Y,
    Start,
    Select,
    LeftBumper,
    RightBumper,
    LeftStick,
    RightStick,
    DPadUp,
    DPadDown,
    DPadLeft,
    DPadRight,
    Guide,
}

/// Snapshot of a controller's buttons, sticks and triggers
///
/// Stick axes use the full signed 16-bit range with 0 at rest. Triggers run
/// from 0 (released) to 255 (fully pressed).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GamepadState {
    pub buttons: HashSet<ButtonType>,
    pub left_stick_x: i16,
    pub left_stick_y: i16,
    pub right_stick_x: i16,
    pub right_stick_y: i16,
    pub left_trigger: u8,
    pub right_trigger: u8,
}

impl GamepadState {
    pub fn is_pressed(&self, button: ButtonType) -> bool {
        self.buttons.contains(&button)
    }

    pub fn press(&mut self, button: ButtonType) {
        self.buttons.insert(button);
    }

    pub fn release(&mut self, button: ButtonType) {
        self.buttons.remove(&button);
    }
}

/// Which sensor produced a motion sample
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SensorKind {
    /// Linear acceleration in m/s²
    Accelerometer,
    /// Angular velocity in rad/s
    Gyroscope,
    /// Any other sensor the capture layer reports; never fused
    Other(u32),
}

/// One raw sensor sample as delivered by the capture layer
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotionEvent {
    pub slot: u8,
    pub sensor: SensorKind,
    pub data: [f32; 3],
    /// Capture timestamp; accel and gyro samples of the same reading share it
    pub timestamp: u64,
}
