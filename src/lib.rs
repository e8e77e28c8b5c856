//! Network relays for locally captured device state
//!
//! Two independent UDP services re-expose what this machine captures to
//! software elsewhere on the network:
//!
//! 1. [`dsu`] - controller motion relay speaking the DSU ("CemuHook") protocol
//! 2. [`vban`] - system audio relay speaking the VBAN protocol
//!
//! # Architecture
//!
//! ```text
//! Motion events ──► MotionFuser ──► DSU server task ──► N registered clients
//! Audio buffers ──► Packetizer  ──► VBAN emitter task ──► 1 destination
//! ```
//!
//! Each service owns its socket and state inside a single tokio task.
//! Producers hand work over through bounded channels and never touch the
//! service internals directly.

pub mod config;
pub mod controller;
pub mod dsu;
pub mod vban;
