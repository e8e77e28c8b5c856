//! gilrs-backed controller collector
//!
//! Polls gilrs on its own thread, assigns connected gamepads to slots and
//! keeps the shared [`SlotTable`] current with connection, power and
//! button/axis snapshots. gilrs does not expose motion sensors, so every
//! controller is published without accelerometer or gyroscope capability.

use gilrs::{Axis, Button, Event, EventType, GamepadId, Gilrs, PowerInfo};
use std::collections::HashMap;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::slots::{Connection, ControllerInfo, PowerLevel, SlotTable};
use super::state::{ButtonType, GamepadState};
use super::MAX_GAMEPADS;

const POLL_INTERVAL: Duration = Duration::from_millis(1);

// Collector errors
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("Failed to initialize collector: {0}")]
    InitializationError(String),

    #[error("Failed to spawn collector thread: {0}")]
    ThreadError(#[from] std::io::Error),
}

struct EventCollector {
    gilrs: Gilrs,
    table: SlotTable,
    assigned: HashMap<GamepadId, u8>,
    states: HashMap<u8, GamepadState>,
}

impl EventCollector {
    fn create(table: SlotTable) -> Result<Self, CollectorError> {
        info!("Initializing gilrs controller interface");
        let gilrs = Gilrs::new().map_err(|e| {
            error!("Failed to initialize gilrs: {}", e);
            CollectorError::InitializationError(e.to_string())
        })?;

        let mut collector = Self {
            gilrs,
            table,
            assigned: HashMap::new(),
            states: HashMap::new(),
        };

        let present: Vec<GamepadId> = collector.gilrs.gamepads().map(|(id, _)| id).collect();
        if present.is_empty() {
            warn!("No gamepad connected, continuing in idle mode");
        }
        for id in present {
            collector.attach(id);
        }
        Ok(collector)
    }

    fn attach(&mut self, id: GamepadId) {
        if self.assigned.contains_key(&id) {
            return;
        }
        let free = (0..MAX_GAMEPADS as u8).find(|slot| !self.assigned.values().any(|s| s == slot));
        let Some(slot) = free else {
            warn!("All {} slots taken, ignoring gamepad {}", MAX_GAMEPADS, id);
            return;
        };

        let gamepad = self.gilrs.gamepad(id);
        let info = ControllerInfo {
            slot,
            name: gamepad.name().to_string(),
            serial: None,
            power: map_power(gamepad.power_info()),
            connection: Connection::NotApplicable,
            has_accelerometer: false,
            has_gyroscope: false,
        };
        self.assigned.insert(id, slot);
        self.states.insert(slot, GamepadState::default());
        self.table.connect(info);
    }

    fn detach(&mut self, id: GamepadId) {
        if let Some(slot) = self.assigned.remove(&id) {
            self.states.remove(&slot);
            self.table.disconnect(slot);
        }
    }

    fn collect_pending(&mut self) {
        while let Some(Event { id, event, .. }) = self.gilrs.next_event() {
            match event {
                EventType::Connected => {
                    info!("Controller connected event detected");
                    self.attach(id);
                }
                EventType::Disconnected => {
                    warn!("Controller disconnected event detected");
                    self.detach(id);
                }
                other => self.apply(id, other),
            }
        }
    }

    fn apply(&mut self, id: GamepadId, event: EventType) {
        let Some(&slot) = self.assigned.get(&id) else {
            debug!("Event from unassigned gamepad {}", id);
            return;
        };
        let Some(state) = self.states.get_mut(&slot) else {
            return;
        };

        let changed = match event {
            EventType::ButtonPressed(button, _) => match map_button(button) {
                Some(button_type) => {
                    state.press(button_type);
                    true
                }
                None => false,
            },
            EventType::ButtonReleased(button, _) => match map_button(button) {
                Some(button_type) => {
                    state.release(button_type);
                    true
                }
                None => false,
            },
            EventType::ButtonChanged(Button::LeftTrigger2, value, _) => {
                state.left_trigger = trigger_byte(value);
                true
            }
            EventType::ButtonChanged(Button::RightTrigger2, value, _) => {
                state.right_trigger = trigger_byte(value);
                true
            }
            EventType::AxisChanged(axis, value, _) => match axis {
                Axis::LeftStickX => {
                    state.left_stick_x = axis_i16(value);
                    true
                }
                Axis::LeftStickY => {
                    state.left_stick_y = axis_i16(value);
                    true
                }
                Axis::RightStickX => {
                    state.right_stick_x = axis_i16(value);
                    true
                }
                Axis::RightStickY => {
                    state.right_stick_y = axis_i16(value);
                    true
                }
                Axis::LeftZ => {
                    state.left_trigger = trigger_byte(value);
                    true
                }
                Axis::RightZ => {
                    state.right_trigger = trigger_byte(value);
                    true
                }
                _ => {
                    debug!("Ignoring unsupported axis: {:?}", axis);
                    false
                }
            },
            _ => false,
        };

        if changed {
            self.table.update_state(slot, state.clone());
        }
    }

    fn refresh_power(&self) {
        for (&id, &slot) in &self.assigned {
            let power = map_power(self.gilrs.gamepad(id).power_info());
            self.table.update_power(slot, power);
        }
    }

    fn run(mut self, token: CancellationToken) {
        info!("Starting controller collection loop");
        let mut polls: u32 = 0;
        while !token.is_cancelled() {
            self.collect_pending();

            // power info changes slowly
            polls = polls.wrapping_add(1);
            if polls % 1000 == 0 {
                self.refresh_power();
            }

            std::thread::sleep(POLL_INTERVAL);
        }
        for slot in self.assigned.values() {
            self.table.disconnect(*slot);
        }
        info!("Controller collection loop stopped");
    }
}

/// Running collector thread
pub struct CollectorHandle {
    token: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl CollectorHandle {
    /// Starts polling gilrs on a dedicated thread
    ///
    /// gilrs is initialized on the new thread; initialization failures are
    /// reported back before this returns.
    pub fn spawn(table: SlotTable) -> Result<Self, CollectorError> {
        let token = CancellationToken::new();
        let thread_token = token.clone();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        let thread = std::thread::Builder::new()
            .name("gilrs-collector".to_string())
            .spawn(move || match EventCollector::create(table) {
                Ok(collector) => {
                    if ready_tx.send(Ok(())).is_err() {
                        return;
                    }
                    collector.run(thread_token);
                }
                Err(e) => {
                    if ready_tx.send(Err(e)).is_err() {
                        error!("Collector start was abandoned");
                    }
                }
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!("Controller collector started");
                Ok(Self {
                    token,
                    thread: Some(thread),
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CollectorError::InitializationError(
                "collector thread exited during startup".to_string(),
            )),
        }
    }

    pub fn shutdown(&mut self) {
        self.token.cancel();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Controller collector thread panicked");
            }
        }
    }
}

impl Drop for CollectorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// Helper function to map gilrs Button to our ButtonType
fn map_button(button: Button) -> Option<ButtonType> {
    match button {
        Button::South => Some(ButtonType::A),
        Button::East => Some(ButtonType::B),
        Button::West => Some(ButtonType::X),
        Button::North => Some(ButtonType::Y),
        Button::Start => Some(ButtonType::Start),
        Button::Select => Some(ButtonType::Select),
        Button::LeftTrigger => Some(ButtonType::LeftBumper),
        Button::RightTrigger => Some(ButtonType::RightBumper),
        Button::LeftThumb => Some(ButtonType::LeftStick),
        Button::RightThumb => Some(ButtonType::RightStick),
        Button::DPadUp => Some(ButtonType::DPadUp),
        Button::DPadDown => Some(ButtonType::DPadDown),
        Button::DPadLeft => Some(ButtonType::DPadLeft),
        Button::DPadRight => Some(ButtonType::DPadRight),
        Button::Mode => Some(ButtonType::Guide),
        _ => None,
    }
}

fn map_power(info: PowerInfo) -> PowerLevel {
    match info {
        PowerInfo::Unknown => PowerLevel::Unknown,
        PowerInfo::Wired | PowerInfo::Charging(_) => PowerLevel::Wired,
        PowerInfo::Charged => PowerLevel::Max,
        PowerInfo::Discharging(level) => match level {
            0..=5 => PowerLevel::Empty,
            6..=20 => PowerLevel::Low,
            21..=70 => PowerLevel::Medium,
            _ => PowerLevel::Full,
        },
    }
}

fn axis_i16(value: f32) -> i16 {
    (value.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16
}

fn trigger_byte(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}
