//! VBAN audio emitter
//!
//! Captured PCM buffers are cut into frames small enough for one UDP
//! datagram each and sent to a single receiver, e.g. VoiceMeeter.

pub mod capture;
pub mod emitter;
pub mod error;
pub mod protocol;

pub use capture::{AudioCapture, AudioSink, CaptureError, CaptureSpec, RawPcmCapture};
pub use emitter::{EmitterSettings, EmitterStats, VbanEmitter, VbanEmitterHandle};
pub use error::VbanError;
pub use protocol::{AudioFormat, SampleEncoding};

/// Default VBAN UDP port
pub const DEFAULT_PORT: u16 = 6980;
pub const DEFAULT_STREAM_NAME: &str = "streamrelay";
