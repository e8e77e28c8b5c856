//! Audio capture seam
//!
//! The emitter does not talk to audio devices. It opens an [`AudioCapture`],
//! learns the negotiated [`CaptureSpec`], and then receives raw buffers
//! through an [`AudioSink`] on whatever cadence the capture runs at.

use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use super::protocol::AudioFormat;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Capture I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Capture was not opened before start")]
    NotOpened,

    #[error("Capture is already running")]
    AlreadyStarted,

    #[error("Capture format is invalid: {0}")]
    InvalidFormat(String),
}

/// Format and buffer size obtained from the capture backend
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureSpec {
    pub format: AudioFormat,
    /// Sample frames per delivered buffer
    pub buffer_samples: u32,
    pub buffer_bytes: usize,
}

impl CaptureSpec {
    pub fn new(format: AudioFormat, buffer_samples: u32) -> Self {
        Self {
            format,
            buffer_samples,
            buffer_bytes: buffer_samples as usize * format.frame_bytes(),
        }
    }
}

/// Outcome of handing one buffer to the emitter
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Queue full; the buffer was dropped
    Dropped,
    /// The emitter is gone; capture should stop
    Closed,
}

/// Non-blocking hand-off from a capture thread into the emitter task
#[derive(Clone, Debug)]
pub struct AudioSink {
    tx: mpsc::Sender<Vec<u8>>,
}

impl AudioSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn deliver(&self, buffer: Vec<u8>) -> Delivery {
        match self.tx.try_send(buffer) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Dropped,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

/// A source of raw interleaved PCM buffers
pub trait AudioCapture: Send {
    /// Negotiates the format; called once before `start`
    fn open(&mut self) -> Result<CaptureSpec, CaptureError>;

    /// Starts delivering buffers into `sink` from the capture's own thread
    fn start(&mut self, sink: AudioSink) -> Result<(), CaptureError>;

    /// Stops delivery; must not block on the capture device
    fn stop(&mut self);
}

/// Reads fixed-size raw PCM buffers from any reader, e.g. stdin
///
/// The format cannot be discovered from a bare byte stream, so it is
/// supplied by the caller.
pub struct RawPcmCapture<R: Read + Send + 'static> {
    reader: Option<R>,
    spec: CaptureSpec,
    opened: bool,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl<R: Read + Send + 'static> RawPcmCapture<R> {
    pub fn new(reader: R, format: AudioFormat, buffer_samples: u32) -> Self {
        Self {
            reader: Some(reader),
            spec: CaptureSpec::new(format, buffer_samples),
            opened: false,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }
}

impl<R: Read + Send + 'static> AudioCapture for RawPcmCapture<R> {
    fn open(&mut self) -> Result<CaptureSpec, CaptureError> {
        if self.spec.buffer_bytes == 0 {
            return Err(CaptureError::InvalidFormat(format!(
                "{} samples of {} channel(s) make an empty buffer",
                self.spec.buffer_samples, self.spec.format.channels
            )));
        }
        info!(
            "Raw PCM capture: {}Hz {:?} x{} channel(s), {} samples ({} bytes) per buffer",
            self.spec.format.sample_rate,
            self.spec.format.encoding,
            self.spec.format.channels,
            self.spec.buffer_samples,
            self.spec.buffer_bytes
        );
        self.opened = true;
        Ok(self.spec)
    }

    fn start(&mut self, sink: AudioSink) -> Result<(), CaptureError> {
        if !self.opened {
            return Err(CaptureError::NotOpened);
        }
        let mut reader = self.reader.take().ok_or(CaptureError::AlreadyStarted)?;
        let buffer_bytes = self.spec.buffer_bytes;
        let running = Arc::clone(&self.running);
        running.store(true, Ordering::SeqCst);

        let thread = std::thread::Builder::new()
            .name("pcm-capture".to_string())
            .spawn(move || {
                let mut dropped = 0u64;
                while running.load(Ordering::SeqCst) {
                    let mut buffer = vec![0u8; buffer_bytes];
                    let filled = match fill_buffer(&mut reader, &mut buffer) {
                        Ok(0) => {
                            info!("PCM input reached end of stream");
                            break;
                        }
                        Ok(filled) => filled,
                        Err(e) => {
                            error!("PCM input read failed: {}", e);
                            break;
                        }
                    };
                    buffer.truncate(filled);

                    match sink.deliver(buffer) {
                        Delivery::Queued => trace!("Queued {} PCM bytes", filled),
                        Delivery::Dropped => {
                            dropped += 1;
                            if dropped.is_power_of_two() {
                                warn!("Emitter queue full, {} buffer(s) dropped so far", dropped);
                            }
                        }
                        Delivery::Closed => {
                            debug!("Emitter closed, stopping PCM capture");
                            break;
                        }
                    }
                }
                running.store(false, Ordering::SeqCst);
            })?;

        self.thread = Some(thread);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.is_finished() {
                if thread.join().is_err() {
                    error!("PCM capture thread panicked");
                }
            } else {
                // a blocking read cannot be interrupted; the thread exits on its next buffer
                debug!("PCM capture thread still blocked on input, detaching");
            }
        }
    }
}

impl<R: Read + Send + 'static> Drop for RawPcmCapture<R> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Reads until `buffer` is full or the stream ends; returns the bytes read
fn fill_buffer<R: Read>(reader: &mut R, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
