//! Cemuhook-compatible motion server (DSU protocol)
//!
//! Emulator clients send version, info and data requests over UDP. Data
//! requests subscribe the sender; from then on every fused motion sample
//! is broadcast to it until it goes quiet.
//!
//! - [`protocol`] - wire codec for requests and responses
//! - [`fuser`] - pairs accel and gyro samples into one motion record
//! - [`registry`] - subscribed clients and their timeouts
//! - [`session`] - socket-free request handling
//! - [`server`] - tokio task, bounded command queue and handle

pub mod error;
pub mod fuser;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;

pub use error::DsuError;
pub use fuser::MotionFuser;
pub use registry::{ClientRegistry, DsuClient};
pub use server::{DsuServerHandle, MotionSender};
pub use session::{ClientStatus, DsuSession};

/// Port the DSU protocol conventionally listens on
pub const DEFAULT_PORT: u16 = 26760;
