//! Controller capability consumed by the DSU relay
//!
//! The relays never enumerate or poll hardware themselves. Capture code
//! reports what it sees through three narrow types:
//!
//! 1. [`slots`] - which controllers occupy which slot, with battery and sensor capabilities
//! 2. [`state`] - button/axis snapshots and raw motion samples
//! 3. [`collector`] - optional gilrs-backed producer (feature `gilrs`)
//!
//! ```text
//! Hardware ──► Collector ──► SlotTable ──► DSU server (Info/Data responses)
//!         └──► MotionEvent ─────────────► DSU server (motion fusion)
//! ```

#[cfg(feature = "gilrs")]
pub mod collector;
pub mod slots;
pub mod state;

pub use slots::{Connection, ControllerInfo, ControllerSource, PowerLevel, SlotTable};
pub use state::{ButtonType, GamepadState, MotionEvent, SensorKind};

/// Number of controller slots tracked at once
pub const MAX_GAMEPADS: usize = 4;
