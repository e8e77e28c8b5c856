//! VBAN audio frame layout
//!
//! ```text
//! 0      4        5        6        7         8            24        28
//! | VBAN | SR|PROT | nbs-1  | nbc-1  | BIT|CODEC | stream name | frame # | payload...
//! ```
//!
//! Everything multi-byte is little endian. A datagram never exceeds
//! [`MAX_PACKET_LEN`] bytes including the header.

use serde::{Deserialize, Serialize};

pub const MAGIC: [u8; 4] = *b"VBAN";
pub const HEADER_LEN: usize = 28;
pub const MAX_PACKET_LEN: usize = 1464;
pub const MAX_PAYLOAD_LEN: usize = MAX_PACKET_LEN - HEADER_LEN;
pub const STREAM_NAME_LEN: usize = 16;
/// The samples-per-frame field stores `n - 1` in one byte
pub const MAX_SAMPLES_PER_FRAME: u32 = 256;
pub const MAX_CHANNELS: u8 = 255;

pub const SAMPLE_RATE_MASK: u8 = 0x1F;
pub const PROTOCOL_MASK: u8 = 0xE0;
pub const BIT_RESOLUTION_MASK: u8 = 0x07;
pub const CODEC_MASK: u8 = 0xF0;

const FRAME_COUNTER_OFFSET: usize = 24;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("Sample rate {0}Hz has no VBAN code")]
    UnsupportedSampleRate(u32),

    #[error("Channel count {0} is outside 1..=255")]
    UnsupportedChannels(u8),

    #[error("No chunk size fits {samples} samples / {bytes} bytes into a VBAN frame")]
    NoChunkDivisor { samples: u32, bytes: usize },
}

/// Sample rates in VBAN code order; the index is the wire value
pub const SAMPLE_RATES: [u32; 21] = [
    6000, 12000, 24000, 48000, 96000, 192000, 384000, 8000, 16000, 32000, 64000, 128000, 256000,
    512000, 11025, 22050, 44100, 88200, 176400, 352800, 705600,
];

pub fn sample_rate_code(rate_hz: u32) -> Result<u8, FormatError> {
    SAMPLE_RATES
        .iter()
        .position(|&rate| rate == rate_hz)
        .map(|index| index as u8)
        .ok_or(FormatError::UnsupportedSampleRate(rate_hz))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum BitResolution {
    Int8 = 0,
    Int16 = 1,
    Int24 = 2,
    Int32 = 3,
    Float32 = 4,
    Float64 = 5,
    Int12 = 6,
    Int10 = 7,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Protocol {
    Audio = 0x00,
    Serial = 0x20,
    Text = 0x40,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Codec {
    Pcm = 0x00,
    Vbca = 0x10,
    Vbcv = 0x20,
    User = 0xF0,
}

/// Native sample encodings a capture source may deliver
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleEncoding {
    S8,
    #[default]
    S16,
    S32,
    F32,
}

impl SampleEncoding {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleEncoding::S8 => 1,
            SampleEncoding::S16 => 2,
            SampleEncoding::S32 | SampleEncoding::F32 => 4,
        }
    }

    pub fn bit_resolution(self) -> BitResolution {
        match self {
            SampleEncoding::S8 => BitResolution::Int8,
            SampleEncoding::S16 => BitResolution::Int16,
            SampleEncoding::S32 => BitResolution::Int32,
            SampleEncoding::F32 => BitResolution::Float32,
        }
    }
}

/// Native format of the captured audio
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub encoding: SampleEncoding,
    pub channels: u8,
}

impl AudioFormat {
    /// Bytes per sample frame (one sample for every channel)
    pub fn frame_bytes(&self) -> usize {
        self.encoding.bytes_per_sample() * usize::from(self.channels)
    }
}

/// Header fields fixed at bind time
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderTemplate {
    pub sample_rate: u8,
    pub protocol: Protocol,
    pub samples_per_frame: u32,
    pub channels: u8,
    pub bit_resolution: BitResolution,
    pub codec: Codec,
    pub stream_name: [u8; STREAM_NAME_LEN],
}

impl HeaderTemplate {
    /// Validates `format` and fixes the header for frames of `samples_per_frame` samples
    pub fn new(
        format: &AudioFormat,
        samples_per_frame: u32,
        stream_name: &str,
    ) -> Result<Self, FormatError> {
        if format.channels == 0 {
            return Err(FormatError::UnsupportedChannels(format.channels));
        }
        Ok(Self {
            sample_rate: sample_rate_code(format.sample_rate)?,
            protocol: Protocol::Audio,
            samples_per_frame,
            channels: format.channels,
            bit_resolution: format.encoding.bit_resolution(),
            codec: Codec::Pcm,
            stream_name: stream_name_bytes(stream_name),
        })
    }

    /// Writes the 28 header bytes for frame number `frame`
    pub fn write(&self, frame: u32, out: &mut Vec<u8>) {
        out.extend_from_slice(&MAGIC);
        out.push((self.sample_rate & SAMPLE_RATE_MASK) | (self.protocol as u8 & PROTOCOL_MASK));
        out.push(self.samples_per_frame.saturating_sub(1).min(255) as u8);
        out.push(self.channels.saturating_sub(1));
        out.push(
            (self.bit_resolution as u8 & BIT_RESOLUTION_MASK) | (self.codec as u8 & CODEC_MASK),
        );
        out.extend_from_slice(&self.stream_name);
        out.extend_from_slice(&frame.to_le_bytes());
    }
}

/// Zero-padded, truncated to 16 bytes
fn stream_name_bytes(name: &str) -> [u8; STREAM_NAME_LEN] {
    let mut out = [0u8; STREAM_NAME_LEN];
    let bytes = name.as_bytes();
    let len = bytes.len().min(STREAM_NAME_LEN);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

/// How a capture buffer is cut into VBAN frames
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkPlan {
    pub divisor: u32,
    pub samples_per_chunk: u32,
    pub bytes_per_chunk: usize,
}

/// Finds the smallest divisor that splits a buffer into frames VBAN can carry
///
/// Both the sample count and the byte size must divide evenly, a chunk may
/// hold at most 256 samples, and its bytes must fit [`MAX_PAYLOAD_LEN`].
pub fn negotiate_chunk(buffer_samples: u32, buffer_bytes: usize) -> Result<ChunkPlan, FormatError> {
    (1..=buffer_samples)
        .find(|&d| {
            let d_bytes = d as usize;
            buffer_samples % d == 0
                && buffer_samples / d <= MAX_SAMPLES_PER_FRAME
                && buffer_bytes % d_bytes == 0
                && buffer_bytes / d_bytes <= MAX_PAYLOAD_LEN
        })
        .map(|d| ChunkPlan {
            divisor: d,
            samples_per_chunk: buffer_samples / d,
            bytes_per_chunk: buffer_bytes / d as usize,
        })
        .ok_or(FormatError::NoChunkDivisor {
            samples: buffer_samples,
            bytes: buffer_bytes,
        })
}

/// Turns capture buffers into numbered VBAN datagrams
#[derive(Clone, Debug)]
pub struct Packetizer {
    header: HeaderTemplate,
    chunk_bytes: usize,
    frame_counter: u32,
}

impl Packetizer {
    pub fn new(header: HeaderTemplate, chunk_bytes: usize) -> Self {
        Self::with_counter(header, chunk_bytes, 0)
    }

    /// Starts numbering after `frame_counter`
    pub fn with_counter(header: HeaderTemplate, chunk_bytes: usize, frame_counter: u32) -> Self {
        Self {
            header,
            chunk_bytes: chunk_bytes.max(1),
            frame_counter,
        }
    }

    pub fn frame_counter(&self) -> u32 {
        self.frame_counter
    }

    pub fn chunk_bytes(&self) -> usize {
        self.chunk_bytes
    }

    /// One datagram per chunk; a short trailing chunk is zero-padded
    pub fn packetize(&mut self, buffer: &[u8]) -> Vec<Vec<u8>> {
        buffer
            .chunks(self.chunk_bytes)
            .map(|chunk| {
                self.frame_counter = self.frame_counter.wrapping_add(1);
                let mut packet = Vec::with_capacity(HEADER_LEN + self.chunk_bytes);
                self.header.write(self.frame_counter, &mut packet);
                packet.extend_from_slice(chunk);
                packet.resize(HEADER_LEN + self.chunk_bytes, 0);
                packet
            })
            .collect()
    }
}

/// Frame number of an encoded VBAN datagram
pub fn frame_number(packet: &[u8]) -> Option<u32> {
    let bytes = packet.get(FRAME_COUNTER_OFFSET..FRAME_COUNTER_OFFSET + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
