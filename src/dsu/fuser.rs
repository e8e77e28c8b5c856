//! Accelerometer/gyroscope fusion per controller slot
//!
//! The capture layer delivers accel and gyro readings as separate events
//! that share a capture timestamp. Samples of one timestamp form an epoch;
//! each kind keeps its own running index into a three-entry holding ring,
//! and whichever kind catches up with (or ties) the other completes the
//! ring entry it just wrote.
//!
//! Output timestamps are synthetic: a running sum of an output interval
//! that is re-measured from wall time every [`SAMPLE_WINDOW`] fused samples.

use std::time::Instant;
use tracing::{debug, trace};

use super::protocol::MotionData;
use crate::controller::{MotionEvent, SensorKind};

/// Fused samples between two output interval measurements
pub const SAMPLE_WINDOW: u32 = 1000;
/// Output interval used until the first measurement, in microseconds
pub const DEFAULT_OUTPUT_INTERVAL_US: u64 = 5000;

const RING_LEN: usize = 3;

#[derive(Clone, Debug)]
pub struct MotionFuser {
    pending: [MotionData; RING_LEN],
    input_timestamp: u64,
    accel_index: usize,
    gyro_index: usize,

    output_timestamp: u64,
    output_interval_us: u64,
    window_start: Option<Instant>,
    window_samples: u32,
}

impl Default for MotionFuser {
    fn default() -> Self {
        Self {
            pending: [MotionData::default(); RING_LEN],
            input_timestamp: 0,
            accel_index: 0,
            gyro_index: 0,
            output_timestamp: 0,
            output_interval_us: DEFAULT_OUTPUT_INTERVAL_US,
            window_start: None,
            window_samples: 0,
        }
    }
}

impl MotionFuser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output_interval_us(&self) -> u64 {
        self.output_interval_us
    }

    /// Feeds one raw sample; returns a fused sample when one completes
    pub fn feed(&mut self, event: &MotionEvent, now: Instant) -> Option<MotionData> {
        // checked before the epoch reset, unlike a reset-first ordering, so an
        // unknown sample never discards a pending accel/gyro pair
        if let SensorKind::Other(kind) = event.sensor {
            debug!("Rejecting motion sample of unknown sensor kind {}", kind);
            return None;
        }

        if event.timestamp != self.input_timestamp {
            self.accel_index = 0;
            self.gyro_index = 0;
            self.input_timestamp = event.timestamp;
        }

        let completed = match event.sensor {
            SensorKind::Accelerometer => {
                let index = self.accel_index % RING_LEN;
                self.pending[index].set_accel(event.data);
                self.accel_index += 1;
                (self.accel_index <= self.gyro_index).then_some(index)
            }
            SensorKind::Gyroscope => {
                let index = self.gyro_index % RING_LEN;
                self.pending[index].set_gyro(event.data);
                self.gyro_index += 1;
                (self.gyro_index <= self.accel_index).then_some(index)
            }
            SensorKind::Other(_) => None,
        }?;

        self.advance_clock(now);
        let sample = &mut self.pending[completed];
        sample.timestamp = self.output_timestamp;
        trace!(
            "Fused motion sample for slot {} at {}us",
            event.slot,
            sample.timestamp
        );
        Some(*sample)
    }

    fn advance_clock(&mut self, now: Instant) {
        let window_start = *self.window_start.get_or_insert(now);

        self.window_samples += 1;
        if self.window_samples >= SAMPLE_WINDOW {
            let elapsed_us = now.saturating_duration_since(window_start).as_micros();
            let measured = elapsed_us / u128::from(self.window_samples);
            // a zero interval would freeze the output clock
            if let Ok(measured) = u64::try_from(measured) {
                if measured > 0 {
                    debug!(
                        "Output interval re-measured: {}us -> {}us",
                        self.output_interval_us, measured
                    );
                    self.output_interval_us = measured;
                }
            }
            self.window_samples = 0;
            self.window_start = Some(now);
        }

        self.output_timestamp = self.output_timestamp.wrapping_add(self.output_interval_us);
    }
}
