//! Connected-controller table shared between capture code and the relays

use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

use super::state::GamepadState;
use super::MAX_GAMEPADS;

/// Native battery report of a controller
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PowerLevel {
    #[default]
    Unknown,
    Empty,
    Low,
    Medium,
    Full,
    Wired,
    Max,
}

/// Physical link of a controller
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Connection {
    #[default]
    NotApplicable,
    Usb,
    Bluetooth,
}

/// Everything the relays need to know about a connected controller
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ControllerInfo {
    pub slot: u8,
    pub name: String,
    /// Serial string, usually a MAC like `aa-bb-cc-dd-ee-ff`
    pub serial: Option<String>,
    pub power: PowerLevel,
    pub connection: Connection,
    pub has_accelerometer: bool,
    pub has_gyroscope: bool,
}

/// Read access to the controllers currently occupying slots
pub trait ControllerSource: Send + Sync {
    fn controller(&self, slot: u8) -> Option<ControllerInfo>;

    /// Latest button/axis snapshot for a slot, if the source tracks one
    fn gamepad_state(&self, _slot: u8) -> Option<GamepadState> {
        None
    }
}

#[derive(Clone, Debug, Default)]
struct SlotEntry {
    info: Option<ControllerInfo>,
    state: Option<GamepadState>,
}

/// Cloneable, lock-protected slot table
///
/// Capture code writes into it, relays read from it. Clones share the same
/// underlying table.
#[derive(Clone, Debug, Default)]
pub struct SlotTable {
    slots: Arc<RwLock<[SlotEntry; MAX_GAMEPADS]>>,
}

impl SlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places a controller in its slot, replacing whatever was there
    ///
    /// Returns `false` if the slot index is out of range.
    pub fn connect(&self, info: ControllerInfo) -> bool {
        let index = usize::from(info.slot);
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        match slots.get_mut(index) {
            Some(entry) => {
                info!("Controller '{}' connected in slot {}", info.name, info.slot);
                entry.info = Some(info);
                true
            }
            None => {
                debug!("Ignoring controller for out-of-range slot {}", info.slot);
                false
            }
        }
    }

    pub fn disconnect(&self, slot: u8) -> Option<ControllerInfo> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let entry = slots.get_mut(usize::from(slot))?;
        entry.state = None;
        let removed = entry.info.take();
        if let Some(info) = &removed {
            info!("Controller '{}' disconnected from slot {}", info.name, slot);
        }
        removed
    }

    pub fn update_power(&self, slot: u8, power: PowerLevel) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(info) = slots
            .get_mut(usize::from(slot))
            .and_then(|entry| entry.info.as_mut())
        {
            info.power = power;
        }
    }

    pub fn update_state(&self, slot: u8, state: GamepadState) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = slots.get_mut(usize::from(slot)) {
            entry.state = Some(state);
        }
    }

    pub fn connected_slots(&self) -> Vec<u8> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots
            .iter()
            .filter_map(|entry| entry.info.as_ref().map(|info| info.slot))
            .collect()
    }
}

impl ControllerSource for SlotTable {
    fn controller(&self, slot: u8) -> Option<ControllerInfo> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.get(usize::from(slot))?.info.clone()
    }

    fn gamepad_state(&self, slot: u8) -> Option<GamepadState> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.get(usize::from(slot))?.state.clone()
    }
}
