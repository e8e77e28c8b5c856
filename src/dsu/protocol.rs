//! DSU wire format
//!
//! All multi-byte fields are little-endian. Every packet starts with a
//! 20-byte header:
//!
//! ```text
//! offset  size  field
//!      0     4  magic        "DSUC" client→server, "DSUS" server→client
//!      4     2  version      1001
//!      6     2  length       packet length minus 16
//!      8     4  crc32        CRC32 of the whole packet with this field zeroed
//!     12     4  id           sender id, stable for the sender's lifetime
//!     16     4  event type   0x100000 version, 0x100001 info, 0x100002 data
//! ```

use crate::controller::{ButtonType, ControllerInfo, GamepadState, PowerLevel};

pub const CLIENT_MAGIC: [u8; 4] = *b"DSUC";
pub const SERVER_MAGIC: [u8; 4] = *b"DSUS";
pub const PROTOCOL_VERSION: u16 = 1001;

pub const HEADER_LEN: usize = 20;
const LENGTH_OFFSET: usize = 6;
const CRC_OFFSET: usize = 8;
/// Bytes at the start of the header that the length field does not count
const LENGTH_EXCLUDED: usize = 16;

pub const VERSION_RESPONSE_LEN: usize = HEADER_LEN + 2;
pub const INFO_RESPONSE_LEN: usize = HEADER_LEN + SHARED_RESPONSE_LEN;
pub const DATA_RESPONSE_LEN: usize = 100;
const SHARED_RESPONSE_LEN: usize = 12;
const PACKET_NUMBER_OFFSET: usize = HEADER_LEN + SHARED_RESPONSE_LEN;

/// Most slots a single info request may ask about
pub const MAX_INFO_SLOTS: usize = 4;

const GRAVITY: f32 = 9.80665;
/// rad/s per output unit
const GYRO_UNIT: f32 = 2.0 * std::f32::consts::PI / 312.0;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Packet too short: {0} bytes")]
    TooShort(usize),

    #[error("Bad magic: {0:?}")]
    BadMagic([u8; 4]),

    #[error("Unsupported protocol version {0}")]
    BadVersion(u16),

    #[error("Checksum mismatch: packet says {received:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { received: u32, computed: u32 },

    #[error("Unknown event type {0:#x}")]
    UnknownEventType(u32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum EventType {
    Version = 0x10_0000,
    Info = 0x10_0001,
    Data = 0x10_0002,
}

impl EventType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0x10_0000 => Some(Self::Version),
            0x10_0001 => Some(Self::Info),
            0x10_0002 => Some(Self::Data),
            _ => None,
        }
    }
}

/// Slot/MAC filter a client attaches to its data request
///
/// Decoded for completeness; the server streams every slot regardless.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DataFilter {
    pub flags: u8,
    pub slot: u8,
    pub mac: [u8; 6],
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    Version,
    Info { slots: Vec<u8> },
    Data(DataFilter),
}

/// A validated client request together with the id from its header
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestPacket {
    pub client_id: u32,
    pub request: Request,
}

fn read_u16(buf: &[u8], offset: usize) -> Option<u16> {
    let bytes = buf.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u32(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// CRC32 of `packet` with the checksum field treated as zero
pub fn packet_crc(packet: &[u8]) -> u32 {
    let (head, rest) = packet.split_at(CRC_OFFSET.min(packet.len()));
    let field_len = rest.len().min(4);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(head);
    hasher.update(&[0u8; 4][..field_len]);
    hasher.update(&rest[field_len..]);
    hasher.finalize()
}

/// Checksum stored in a packet's header
pub fn stored_crc(packet: &[u8]) -> Option<u32> {
    read_u32(packet, CRC_OFFSET)
}

/// Fills in the length and checksum fields of a fully built packet
fn seal(packet: &mut [u8]) {
    let length = (packet.len() - LENGTH_EXCLUDED) as u16;
    packet[LENGTH_OFFSET..LENGTH_OFFSET + 2].copy_from_slice(&length.to_le_bytes());
    packet[CRC_OFFSET..CRC_OFFSET + 4].fill(0);
    let crc = packet_crc(packet);
    packet[CRC_OFFSET..CRC_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
}

fn server_header(capacity: usize, server_id: u32, event: EventType) -> Vec<u8> {
    let mut packet = Vec::with_capacity(capacity);
    packet.extend_from_slice(&SERVER_MAGIC);
    packet.extend_from_slice(&PROTOCOL_VERSION.to_le_bytes());
    packet.extend_from_slice(&0u16.to_le_bytes());
    packet.extend_from_slice(&0u32.to_le_bytes());
    packet.extend_from_slice(&server_id.to_le_bytes());
    packet.extend_from_slice(&(event as u32).to_le_bytes());
    packet
}

/// Validates and decodes a datagram received from a client
///
/// The magic, protocol version and checksum must all match before the
/// payload is interpreted according to the header's event type.
pub fn decode_request(buf: &[u8]) -> Result<RequestPacket, ProtocolError> {
    if buf.len() < HEADER_LEN {
        return Err(ProtocolError::TooShort(buf.len()));
    }

    let magic = [buf[0], buf[1], buf[2], buf[3]];
    if magic != CLIENT_MAGIC {
        return Err(ProtocolError::BadMagic(magic));
    }

    let version = read_u16(buf, 4).ok_or(ProtocolError::TooShort(buf.len()))?;
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::BadVersion(version));
    }

    let received = stored_crc(buf).ok_or(ProtocolError::TooShort(buf.len()))?;
    let computed = packet_crc(buf);
    if received != computed {
        return Err(ProtocolError::ChecksumMismatch { received, computed });
    }

    let client_id = read_u32(buf, 12).ok_or(ProtocolError::TooShort(buf.len()))?;
    let raw_event = read_u32(buf, 16).ok_or(ProtocolError::TooShort(buf.len()))?;
    let event = EventType::from_u32(raw_event).ok_or(ProtocolError::UnknownEventType(raw_event))?;

    let payload = &buf[HEADER_LEN..];
    let request = match event {
        EventType::Version => Request::Version,
        EventType::Info => {
            // i32 count followed by up to four slot bytes
            let count = payload
                .get(..4)
                .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .unwrap_or(0);
            let count = usize::try_from(count).unwrap_or(0).min(MAX_INFO_SLOTS);
            let listed = payload.get(4..).unwrap_or(&[]);
            let slots = listed.iter().take(count).copied().collect();
            Request::Info { slots }
        }
        EventType::Data => {
            let byte = |i: usize| payload.get(i).copied().unwrap_or(0);
            Request::Data(DataFilter {
                flags: byte(0),
                slot: byte(1),
                mac: [byte(2), byte(3), byte(4), byte(5), byte(6), byte(7)],
            })
        }
    };

    Ok(RequestPacket { client_id, request })
}

/// Builds a client request; used by tests and diagnostic tools
pub fn encode_request(client_id: u32, request: &Request) -> Vec<u8> {
    let event = match request {
        Request::Version => EventType::Version,
        Request::Info { .. } => EventType::Info,
        Request::Data(_) => EventType::Data,
    };
    let mut packet = server_header(28, client_id, event);
    packet[..4].copy_from_slice(&CLIENT_MAGIC);
    match request {
        Request::Version => {}
        Request::Info { slots } => {
            let count = slots.len().min(MAX_INFO_SLOTS);
            packet.extend_from_slice(&(count as i32).to_le_bytes());
            let mut listed = [0u8; MAX_INFO_SLOTS];
            listed[..count].copy_from_slice(&slots[..count]);
            packet.extend_from_slice(&listed);
        }
        Request::Data(filter) => {
            packet.push(filter.flags);
            packet.push(filter.slot);
            packet.extend_from_slice(&filter.mac);
        }
    }
    seal(&mut packet);
    packet
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotState {
    #[default]
    NotConnected = 0,
    Reserved = 1,
    Connected = 2,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceModel {
    #[default]
    NotApplicable = 0,
    PartialGyro = 1,
    FullGyro = 2,
    DoNotUse = 3,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionType {
    #[default]
    NotApplicable = 0,
    Usb = 1,
    Bluetooth = 2,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum Battery {
    #[default]
    NotApplicable = 0x00,
    Dying = 0x01,
    Low = 0x02,
    Medium = 0x03,
    High = 0x04,
    Full = 0x05,
    Charging = 0xEE,
    Charged = 0xEF,
}

impl From<PowerLevel> for Battery {
    fn from(level: PowerLevel) -> Self {
        match level {
            PowerLevel::Unknown => Battery::NotApplicable,
            PowerLevel::Empty => Battery::Dying,
            PowerLevel::Low => Battery::Low,
            PowerLevel::Medium => Battery::Medium,
            PowerLevel::Full => Battery::High,
            PowerLevel::Wired => Battery::Charging,
            PowerLevel::Max => Battery::Full,
        }
    }
}

impl From<crate::controller::Connection> for ConnectionType {
    fn from(connection: crate::controller::Connection) -> Self {
        match connection {
            crate::controller::Connection::NotApplicable => ConnectionType::NotApplicable,
            crate::controller::Connection::Usb => ConnectionType::Usb,
            crate::controller::Connection::Bluetooth => ConnectionType::Bluetooth,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum Connected {
    #[default]
    ForInfo = 0,
    Connected = 1,
}

/// Parses `aa:bb:cc:dd:ee:ff` or `aa-bb-cc-dd-ee-ff`; anything else is all zeros
pub fn parse_mac(serial: Option<&str>) -> [u8; 6] {
    let mut mac = [0u8; 6];
    let Some(serial) = serial else {
        return mac;
    };
    let parts: Vec<&str> = serial.trim().split([':', '-']).collect();
    if parts.len() != mac.len() {
        return [0u8; 6];
    }
    for (octet, part) in mac.iter_mut().zip(&parts) {
        match u8::from_str_radix(part, 16) {
            Ok(value) if !part.is_empty() && part.len() <= 2 => *octet = value,
            _ => return [0u8; 6],
        }
    }
    mac
}

/// Model reported for a controller's sensor capabilities
pub fn device_model(info: &ControllerInfo) -> DeviceModel {
    match (info.has_accelerometer, info.has_gyroscope) {
        (true, true) => DeviceModel::FullGyro,
        (false, false) => DeviceModel::NotApplicable,
        _ => DeviceModel::PartialGyro,
    }
}

/// Slot description shared by info and data responses
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SharedResponse {
    pub slot: u8,
    pub slot_state: SlotState,
    pub device_model: DeviceModel,
    pub connection: ConnectionType,
    pub mac: [u8; 6],
    pub battery: Battery,
    pub connected: Connected,
}

impl SharedResponse {
    pub fn not_connected(slot: u8) -> Self {
        Self {
            slot,
            ..Self::default()
        }
    }

    pub fn for_controller(slot: u8, info: &ControllerInfo, connected: Connected) -> Self {
        Self {
            slot,
            slot_state: SlotState::Connected,
            device_model: device_model(info),
            connection: info.connection.into(),
            mac: parse_mac(info.serial.as_deref()),
            battery: info.power.into(),
            connected,
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.push(self.slot);
        out.push(self.slot_state as u8);
        out.push(self.device_model as u8);
        out.push(self.connection as u8);
        out.extend_from_slice(&self.mac);
        out.push(self.battery as u8);
        out.push(self.connected as u8);
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        let b = buf.get(..SHARED_RESPONSE_LEN)?;
        Some(Self {
            slot: b[0],
            slot_state: match b[1] {
                1 => SlotState::Reserved,
                2 => SlotState::Connected,
                _ => SlotState::NotConnected,
            },
            device_model: match b[2] {
                1 => DeviceModel::PartialGyro,
                2 => DeviceModel::FullGyro,
                3 => DeviceModel::DoNotUse,
                _ => DeviceModel::NotApplicable,
            },
            connection: match b[3] {
                1 => ConnectionType::Usb,
                2 => ConnectionType::Bluetooth,
                _ => ConnectionType::NotApplicable,
            },
            mac: [b[4], b[5], b[6], b[7], b[8], b[9]],
            battery: match b[10] {
                0x01 => Battery::Dying,
                0x02 => Battery::Low,
                0x03 => Battery::Medium,
                0x04 => Battery::High,
                0x05 => Battery::Full,
                0xEE => Battery::Charging,
                0xEF => Battery::Charged,
                _ => Battery::NotApplicable,
            },
            connected: if b[11] == 1 {
                Connected::Connected
            } else {
                Connected::ForInfo
            },
        })
    }
}

pub fn encode_version_response(server_id: u32) -> Vec<u8> {
    let mut packet = server_header(VERSION_RESPONSE_LEN, server_id, EventType::Version);
    packet.extend_from_slice(&PROTOCOL_VERSION.to_le_bytes());
    seal(&mut packet);
    packet
}

pub fn encode_info_response(server_id: u32, shared: &SharedResponse) -> Vec<u8> {
    let mut packet = server_header(INFO_RESPONSE_LEN, server_id, EventType::Info);
    shared.write(&mut packet);
    seal(&mut packet);
    packet
}

/// One fused motion sample in DSU units
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MotionData {
    /// Microseconds; sent twice as the low and high words of one u64
    pub timestamp: u64,
    /// g, sign-inverted from the sensor frame
    pub accel_x: f32,
    pub accel_y: f32,
    pub accel_z: f32,
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
}

impl MotionData {
    /// Stores an accelerometer reading given in m/s²
    pub fn set_accel(&mut self, data: [f32; 3]) {
        self.accel_x = -data[0] / GRAVITY;
        self.accel_y = -data[1] / GRAVITY;
        self.accel_z = -data[2] / GRAVITY;
    }

    /// Stores a gyroscope reading given in rad/s
    pub fn set_gyro(&mut self, data: [f32; 3]) {
        self.pitch = data[0] / GYRO_UNIT;
        self.yaw = -data[1] / GYRO_UNIT;
        self.roll = -data[2] / GYRO_UNIT;
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        for value in [
            self.accel_x,
            self.accel_y,
            self.accel_z,
            self.pitch,
            self.yaw,
            self.roll,
        ] {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
}

/// Touch slot; this relay never reports touches
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TouchData {
    pub active: u8,
    pub id: u8,
    pub x: u16,
    pub y: u16,
}

/// Per-button pressure bytes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AnalogButtons {
    pub dpad_left: u8,
    pub dpad_down: u8,
    pub dpad_right: u8,
    pub dpad_up: u8,
    pub y: u8,
    pub b: u8,
    pub a: u8,
    pub x: u8,
    pub r1: u8,
    pub l1: u8,
    pub r2: u8,
    pub l2: u8,
}

/// Maps a signed 16-bit axis to the unsigned byte DSU expects (center 128)
pub fn stick_byte(value: i16) -> u8 {
    ((value >> 8) + 128) as u8
}

/// Button bitmask, low bit first:
/// Select, L3, R3, Start, Up, Right, Down, Left, L2, R2, L1, R1, X, A, B, Y
pub fn button_mask(state: &GamepadState) -> u16 {
    let bits: [(bool, u16); 16] = [
        (state.is_pressed(ButtonType::Select), 0x0001),
        (state.is_pressed(ButtonType::LeftStick), 0x0002),
        (state.is_pressed(ButtonType::RightStick), 0x0004),
        (state.is_pressed(ButtonType::Start), 0x0008),
        (state.is_pressed(ButtonType::DPadUp), 0x0010),
        (state.is_pressed(ButtonType::DPadRight), 0x0020),
        (state.is_pressed(ButtonType::DPadDown), 0x0040),
        (state.is_pressed(ButtonType::DPadLeft), 0x0080),
        (state.left_trigger > 0, 0x0100),
        (state.right_trigger > 0, 0x0200),
        (state.is_pressed(ButtonType::LeftBumper), 0x0400),
        (state.is_pressed(ButtonType::RightBumper), 0x0800),
        (state.is_pressed(ButtonType::X), 0x1000),
        (state.is_pressed(ButtonType::A), 0x2000),
        (state.is_pressed(ButtonType::B), 0x4000),
        (state.is_pressed(ButtonType::Y), 0x8000),
    ];
    bits.iter()
        .filter(|(pressed, _)| *pressed)
        .fold(0, |mask, (_, bit)| mask | bit)
}

fn pressure(state: &GamepadState, button: ButtonType) -> u8 {
    if state.is_pressed(button) {
        0xFF
    } else {
        0
    }
}

/// Controller data broadcast to subscribed clients
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DataResponse {
    pub shared: SharedResponse,
    pub packet_number: u32,
    pub buttons: u16,
    pub home: u8,
    pub touch_button: u8,
    pub left_stick: [u8; 2],
    pub right_stick: [u8; 2],
    pub analog: AnalogButtons,
    pub touch: [TouchData; 2],
    pub motion: MotionData,
}

impl DataResponse {
    /// Builds a response from a button/axis snapshot, or a neutral pad when none is given
    pub fn new(shared: SharedResponse, state: Option<&GamepadState>, motion: MotionData) -> Self {
        let neutral = Self {
            shared,
            packet_number: 0,
            buttons: 0,
            home: 0,
            touch_button: 0,
            left_stick: [0x80, 0x80],
            right_stick: [0x80, 0x80],
            analog: AnalogButtons::default(),
            touch: [TouchData::default(); 2],
            motion,
        };
        let Some(state) = state else {
            return neutral;
        };

        Self {
            buttons: button_mask(state),
            home: u8::from(state.is_pressed(ButtonType::Guide)),
            left_stick: [stick_byte(state.left_stick_x), stick_byte(state.left_stick_y)],
            right_stick: [
                stick_byte(state.right_stick_x),
                stick_byte(state.right_stick_y),
            ],
            analog: AnalogButtons {
                dpad_left: pressure(state, ButtonType::DPadLeft),
                dpad_down: pressure(state, ButtonType::DPadDown),
                dpad_right: pressure(state, ButtonType::DPadRight),
                dpad_up: pressure(state, ButtonType::DPadUp),
                y: pressure(state, ButtonType::Y),
                b: pressure(state, ButtonType::B),
                a: pressure(state, ButtonType::A),
                x: pressure(state, ButtonType::X),
                r1: pressure(state, ButtonType::RightBumper),
                l1: pressure(state, ButtonType::LeftBumper),
                r2: state.right_trigger,
                l2: state.left_trigger,
            },
            ..neutral
        }
    }

    pub fn encode(&self, server_id: u32) -> Vec<u8> {
        let mut packet = server_header(DATA_RESPONSE_LEN, server_id, EventType::Data);
        self.shared.write(&mut packet);
        packet.extend_from_slice(&self.packet_number.to_le_bytes());
        packet.extend_from_slice(&self.buttons.to_le_bytes());
        packet.push(self.home);
        packet.push(self.touch_button);
        packet.extend_from_slice(&self.left_stick);
        packet.extend_from_slice(&self.right_stick);
        let a = &self.analog;
        packet.extend_from_slice(&[
            a.dpad_left,
            a.dpad_down,
            a.dpad_right,
            a.dpad_up,
            a.y,
            a.b,
            a.a,
            a.x,
            a.r1,
            a.l1,
            a.r2,
            a.l2,
        ]);
        for touch in &self.touch {
            packet.push(touch.active);
            packet.push(touch.id);
            packet.extend_from_slice(&touch.x.to_le_bytes());
            packet.extend_from_slice(&touch.y.to_le_bytes());
        }
        self.motion.write(&mut packet);
        seal(&mut packet);
        packet
    }
}

/// Rewrites the packet number of an encoded data response and reseals it
pub fn restamp_data_response(packet: &mut [u8], packet_number: u32) {
    if packet.len() != DATA_RESPONSE_LEN {
        return;
    }
    packet[PACKET_NUMBER_OFFSET..PACKET_NUMBER_OFFSET + 4]
        .copy_from_slice(&packet_number.to_le_bytes());
    seal(packet);
}

/// Packet number of an encoded data response
pub fn data_packet_number(packet: &[u8]) -> Option<u32> {
    read_u32(packet, PACKET_NUMBER_OFFSET)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pad() -> ControllerInfo {
        ControllerInfo {
            slot: 0,
            name: "pad".to_string(),
            serial: Some("a1-b2-c3-d4-e5-f6".to_string()),
            power: PowerLevel::Full,
            connection: crate::controller::Connection::Usb,
            has_accelerometer: true,
            has_gyroscope: true,
        }
    }

    fn f32_at(packet: &[u8], offset: usize) -> f32 {
        f32::from_le_bytes([
            packet[offset],
            packet[offset + 1],
            packet[offset + 2],
            packet[offset + 3],
        ])
    }

    #[test]
    fn responses_carry_valid_checksums() {
        let packets = [
            encode_version_response(7),
            encode_info_response(7, &SharedResponse::for_controller(0, &pad(), Connected::ForInfo)),
            DataResponse::new(SharedResponse::not_connected(1), None, MotionData::default())
                .encode(7),
        ];
        for packet in packets {
            assert_eq!(stored_crc(&packet), Some(packet_crc(&packet)));
            assert_eq!(&packet[..4], b"DSUS");
            assert_eq!(read_u16(&packet, 6), Some((packet.len() - 16) as u16));
        }
    }

    #[test]
    fn response_sizes() {
        assert_eq!(encode_version_response(1).len(), 22);
        assert_eq!(encode_info_response(1, &SharedResponse::not_connected(0)).len(), 32);
        let data = DataResponse::new(SharedResponse::not_connected(0), None, MotionData::default());
        assert_eq!(data.encode(1).len(), DATA_RESPONSE_LEN);
    }

    #[test]
    fn restamp_keeps_checksum_valid() {
        let data = DataResponse::new(SharedResponse::not_connected(0), None, MotionData::default());
        let mut packet = data.encode(99);
        restamp_data_response(&mut packet, 41);
        assert_eq!(data_packet_number(&packet), Some(41));
        assert_eq!(stored_crc(&packet), Some(packet_crc(&packet)));
    }

    #[test]
    fn request_validation() {
        let good = encode_request(5, &Request::Version);
        assert_eq!(
            decode_request(&good),
            Ok(RequestPacket {
                client_id: 5,
                request: Request::Version
            })
        );

        let mut bad_magic = good.clone();
        bad_magic[3] = b'S';
        assert!(matches!(decode_request(&bad_magic), Err(ProtocolError::BadMagic(_))));

        let mut bad_version = good.clone();
        bad_version[4..6].copy_from_slice(&1000u16.to_le_bytes());
        seal(&mut bad_version);
        assert_eq!(decode_request(&bad_version), Err(ProtocolError::BadVersion(1000)));

        let mut bad_crc = good.clone();
        bad_crc[12] ^= 0xFF;
        assert!(matches!(
            decode_request(&bad_crc),
            Err(ProtocolError::ChecksumMismatch { .. })
        ));

        assert_eq!(decode_request(&good[..10]), Err(ProtocolError::TooShort(10)));
    }

    #[test]
    fn info_request_is_bounded() {
        let packet = encode_request(1, &Request::Info { slots: vec![0, 2] });
        assert_eq!(
            decode_request(&packet).map(|p| p.request),
            Ok(Request::Info { slots: vec![0, 2] })
        );

        // a count larger than the slot array is clamped
        let mut packet = encode_request(1, &Request::Info { slots: vec![3, 2, 1, 0] });
        packet[20..24].copy_from_slice(&100i32.to_le_bytes());
        seal(&mut packet);
        assert_eq!(
            decode_request(&packet).map(|p| p.request),
            Ok(Request::Info { slots: vec![3, 2, 1, 0] })
        );

        let mut packet = encode_request(1, &Request::Info { slots: vec![1] });
        packet[20..24].copy_from_slice(&(-3i32).to_le_bytes());
        seal(&mut packet);
        assert_eq!(
            decode_request(&packet).map(|p| p.request),
            Ok(Request::Info { slots: vec![] })
        );
    }

    #[test]
    fn data_request_filter_is_decoded() {
        let filter = DataFilter {
            flags: 2,
            slot: 1,
            mac: [1, 2, 3, 4, 5, 6],
        };
        let packet = encode_request(9, &Request::Data(filter));
        assert_eq!(packet.len(), 28);
        assert_eq!(
            decode_request(&packet).map(|p| p.request),
            Ok(Request::Data(filter))
        );
    }

    #[test]
    fn unknown_event_type() {
        let mut packet = encode_request(1, &Request::Version);
        packet[16..20].copy_from_slice(&0x10_0003u32.to_le_bytes());
        seal(&mut packet);
        assert_eq!(
            decode_request(&packet),
            Err(ProtocolError::UnknownEventType(0x10_0003))
        );
    }

    #[test]
    fn stick_scaling() {
        assert_eq!(stick_byte(0), 128);
        assert_eq!(stick_byte(0x7F00), 255);
        assert_eq!(stick_byte(i16::MAX), 255);
        assert_eq!(stick_byte(i16::MIN), 0);
    }

    #[test]
    fn button_bits() {
        let mut state = GamepadState::default();
        assert_eq!(button_mask(&state), 0);

        state.press(ButtonType::Select);
        state.press(ButtonType::DPadLeft);
        state.press(ButtonType::Y);
        state.left_trigger = 1;
        assert_eq!(button_mask(&state), 0x0001 | 0x0080 | 0x0100 | 0x8000);
    }

    #[test]
    fn triggers_fill_distinct_bytes() {
        let mut state = GamepadState::default();
        state.left_trigger = 10;
        state.right_trigger = 200;
        state.press(ButtonType::Guide);
        state.press(ButtonType::A);

        let data = DataResponse::new(SharedResponse::not_connected(0), Some(&state), MotionData::default());
        assert_eq!(data.analog.l2, 10);
        assert_eq!(data.analog.r2, 200);
        assert_eq!(data.analog.a, 0xFF);
        assert_eq!(data.analog.b, 0);
        assert_eq!(data.home, 1);

        let packet = data.encode(0);
        assert_eq!(packet[54], 200);
        assert_eq!(packet[55], 10);
        assert_eq!(packet[38], 1);
    }

    #[test]
    fn neutral_pad_without_state() {
        let data = DataResponse::new(SharedResponse::not_connected(0), None, MotionData::default());
        assert_eq!(data.buttons, 0);
        assert_eq!(data.left_stick, [128, 128]);
        assert_eq!(data.right_stick, [128, 128]);
        assert_eq!(data.analog, AnalogButtons::default());
    }

    #[test]
    fn motion_layout() {
        let mut motion = MotionData {
            timestamp: 0x0102_0304_0506_0708,
            ..MotionData::default()
        };
        motion.set_accel([0.0, GRAVITY, 0.0]);
        let packet = DataResponse::new(SharedResponse::not_connected(0), None, motion).encode(0);

        assert_eq!(read_u32(&packet, 68), Some(0x0506_0708));
        assert_eq!(read_u32(&packet, 72), Some(0x0102_0304));
        assert!((f32_at(&packet, 80) + 1.0).abs() < 1e-6);
        assert!(f32_at(&packet, 76).abs() < 1e-6);
    }

    #[test]
    fn gyro_conversion() {
        let mut motion = MotionData::default();
        motion.set_gyro([GYRO_UNIT, GYRO_UNIT, -GYRO_UNIT]);
        assert!((motion.pitch - 1.0).abs() < 1e-5);
        assert!((motion.yaw + 1.0).abs() < 1e-5);
        assert!((motion.roll - 1.0).abs() < 1e-5);
    }

    #[test]
    fn mac_parsing() {
        assert_eq!(
            parse_mac(Some("a1-b2-c3-d4-e5-f6")),
            [0xa1, 0xb2, 0xc3, 0xd4, 0xe5, 0xf6]
        );
        assert_eq!(parse_mac(Some("01:02:03:04:05:0A")), [1, 2, 3, 4, 5, 10]);
        assert_eq!(parse_mac(Some("not a mac")), [0; 6]);
        assert_eq!(parse_mac(Some("01:02:03:04:05")), [0; 6]);
        assert_eq!(parse_mac(Some("01:02:03:04:05:zz")), [0; 6]);
        assert_eq!(parse_mac(None), [0; 6]);
    }

    #[test]
    fn shared_response_for_controller() {
        let shared = SharedResponse::for_controller(0, &pad(), Connected::Connected);
        assert_eq!(shared.slot_state, SlotState::Connected);
        assert_eq!(shared.device_model, DeviceModel::FullGyro);
        assert_eq!(shared.battery, Battery::High);
        assert_eq!(shared.connection, ConnectionType::Usb);

        let mut partial = pad();
        partial.has_gyroscope = false;
        assert_eq!(device_model(&partial), DeviceModel::PartialGyro);

        let packet = encode_info_response(0, &shared);
        assert_eq!(SharedResponse::decode(&packet[HEADER_LEN..]), Some(shared));
    }

    #[test]
    fn power_levels_map_to_battery() {
        let table = [
            (PowerLevel::Unknown, Battery::NotApplicable, 0x00),
            (PowerLevel::Empty, Battery::Dying, 0x01),
            (PowerLevel::Low, Battery::Low, 0x02),
            (PowerLevel::Medium, Battery::Medium, 0x03),
            (PowerLevel::Full, Battery::High, 0x04),
            (PowerLevel::Wired, Battery::Charging, 0xEE),
            (PowerLevel::Max, Battery::Full, 0x05),
        ];
        for (power, battery, wire) in table {
            assert_eq!(Battery::from(power), battery, "{:?}", power);

            let info = ControllerInfo { power, ..pad() };
            let shared = SharedResponse::for_controller(0, &info, Connected::ForInfo);
            let packet = encode_info_response(0, &shared);
            assert_eq!(packet[HEADER_LEN + 10], wire, "{:?}", power);
        }
    }

    #[test]
    fn device_model_follows_sensors() {
        let table = [
            (true, true, DeviceModel::FullGyro),
            (true, false, DeviceModel::PartialGyro),
            (false, true, DeviceModel::PartialGyro),
            (false, false, DeviceModel::NotApplicable),
        ];
        for (has_accelerometer, has_gyroscope, model) in table {
            let info = ControllerInfo {
                has_accelerometer,
                has_gyroscope,
                ..pad()
            };
            assert_eq!(device_model(&info), model);
        }
    }
}
