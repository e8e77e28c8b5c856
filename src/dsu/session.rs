//! Request dispatch and broadcast logic, independent of any socket
//!
//! [`DsuSession`] turns inbound datagrams, motion events and timer ticks
//! into the datagrams the server should send. The server task owns one
//! session and is the only code that touches it, so registry reads and
//! writes are serialized by construction.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::fuser::MotionFuser;
use super::protocol::{
    self, Connected, ConnectionType, DataResponse, DeviceModel, Request, SharedResponse,
    SlotState,
};
use super::registry::{ClientRegistry, Registration};
use crate::controller::{ControllerSource, GamepadState, MotionEvent, MAX_GAMEPADS};

/// A datagram the server should send
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outgoing {
    pub addr: SocketAddr,
    pub packet: Vec<u8>,
}

/// Point-in-time view of one registered client
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientStatus {
    pub id: u32,
    pub addr: SocketAddr,
    pub packets_sent: u32,
}

pub struct DsuSession {
    server_id: u32,
    source: Arc<dyn ControllerSource>,
    registry: ClientRegistry,
    fusers: [MotionFuser; MAX_GAMEPADS],
    client_timeout: Duration,
}

impl DsuSession {
    pub fn new(server_id: u32, source: Arc<dyn ControllerSource>, client_timeout: Duration) -> Self {
        Self {
            server_id,
            source,
            registry: ClientRegistry::new(),
            fusers: Default::default(),
            client_timeout,
        }
    }

    pub fn server_id(&self) -> u32 {
        self.server_id
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn clients(&self) -> Vec<ClientStatus> {
        self.registry
            .iter()
            .map(|client| ClientStatus {
                id: client.id,
                addr: client.addr,
                packets_sent: client.packet_number,
            })
            .collect()
    }

    /// Handles one inbound datagram; malformed ones produce nothing
    pub fn handle_datagram(&mut self, buf: &[u8], peer: SocketAddr, now: Instant) -> Vec<Outgoing> {
        let packet = match protocol::decode_request(buf) {
            Ok(packet) => packet,
            Err(e) => {
                trace!("Dropping datagram from {}: {}", peer, e);
                return Vec::new();
            }
        };

        match packet.request {
            Request::Version => {
                debug!("Version request from {}", peer);
                vec![Outgoing {
                    addr: peer,
                    packet: protocol::encode_version_response(self.server_id),
                }]
            }
            Request::Info { slots } => {
                debug!("Info request from {} for slots {:?}", peer, slots);
                slots
                    .into_iter()
                    .filter(|slot| usize::from(*slot) < MAX_GAMEPADS)
                    .map(|slot| Outgoing {
                        addr: peer,
                        packet: protocol::encode_info_response(self.server_id, &self.info_for(slot)),
                    })
                    .collect()
            }
            Request::Data(filter) => {
                if self.registry.register_or_refresh(peer, packet.client_id, now)
                    == Registration::Refreshed
                {
                    trace!("Data request refresh from {} ({:?})", peer, filter);
                }
                Vec::new()
            }
        }
    }

    fn info_for(&self, slot: u8) -> SharedResponse {
        match self.source.controller(slot) {
            Some(info) => SharedResponse::for_controller(slot, &info, Connected::ForInfo),
            None => SharedResponse::not_connected(slot),
        }
    }

    fn data_shared_for(&self, slot: u8) -> SharedResponse {
        match self.source.controller(slot) {
            Some(info) => SharedResponse::for_controller(slot, &info, Connected::Connected),
            None => SharedResponse {
                slot,
                slot_state: SlotState::Connected,
                device_model: DeviceModel::FullGyro,
                connection: ConnectionType::NotApplicable,
                mac: [0; 6],
                battery: protocol::Battery::NotApplicable,
                connected: Connected::Connected,
            },
        }
    }

    /// Fuses a motion sample and, once a sample completes, builds one data
    /// response per registered client
    ///
    /// The fuser is fed even when nobody is listening so its epochs and
    /// clock stay continuous.
    pub fn handle_motion(
        &mut self,
        event: &MotionEvent,
        state: Option<GamepadState>,
        now: Instant,
    ) -> Vec<Outgoing> {
        let Some(fuser) = self.fusers.get_mut(usize::from(event.slot)) else {
            debug!("Motion event for out-of-range slot {}", event.slot);
            return Vec::new();
        };
        let Some(motion) = fuser.feed(event, now) else {
            return Vec::new();
        };

        if self.registry.is_empty() {
            return Vec::new();
        }

        let state = state.or_else(|| self.source.gamepad_state(event.slot));
        let response = DataResponse::new(self.data_shared_for(event.slot), state.as_ref(), motion);
        let template = response.encode(self.server_id);

        self.registry
            .iter_mut()
            .map(|client| {
                let mut packet = template.clone();
                protocol::restamp_data_response(&mut packet, client.packet_number);
                client.packet_number = client.packet_number.wrapping_add(1);
                Outgoing {
                    addr: client.addr,
                    packet,
                }
            })
            .collect()
    }

    /// Timer tick: evicts clients that stopped requesting data
    pub fn expire_clients(&mut self, now: Instant) -> Vec<SocketAddr> {
        self.registry.evict_expired(now, self.client_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{ControllerInfo, PowerLevel, SensorKind, SlotTable};
    use crate::dsu::protocol::{
        data_packet_number, encode_request, packet_crc, stored_crc, Battery, DataFilter,
        HEADER_LEN,
    };

    const SERVER_ID: u32 = 0xABCD;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn session_with(table: &SlotTable) -> DsuSession {
        DsuSession::new(SERVER_ID, Arc::new(table.clone()), Duration::from_millis(5000))
    }

    fn full_gyro_pad(slot: u8) -> ControllerInfo {
        ControllerInfo {
            slot,
            name: "pad".to_string(),
            serial: Some("10:20:30:40:50:60".to_string()),
            power: PowerLevel::Medium,
            connection: crate::controller::Connection::Bluetooth,
            has_accelerometer: true,
            has_gyroscope: true,
        }
    }

    fn motion(slot: u8, sensor: SensorKind, timestamp: u64) -> MotionEvent {
        MotionEvent {
            slot,
            sensor,
            data: [0.0, 9.80665, 0.0],
            timestamp,
        }
    }

    fn subscribe(session: &mut DsuSession, port: u16, now: Instant) {
        let request = encode_request(port.into(), &Request::Data(DataFilter::default()));
        assert!(session.handle_datagram(&request, peer(port), now).is_empty());
    }

    #[test]
    fn version_request_gets_one_reply() {
        let mut session = session_with(&SlotTable::new());
        let out = session.handle_datagram(
            &encode_request(1, &Request::Version),
            peer(4000),
            Instant::now(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].addr, peer(4000));
        assert_eq!(stored_crc(&out[0].packet), Some(packet_crc(&out[0].packet)));
        assert_eq!(&out[0].packet[HEADER_LEN..], &1001u16.to_le_bytes());
    }

    #[test]
    fn malformed_datagrams_are_dropped_silently() {
        let mut session = session_with(&SlotTable::new());
        let now = Instant::now();

        let mut corrupted = encode_request(1, &Request::Data(DataFilter::default()));
        corrupted[25] ^= 1;
        assert!(session.handle_datagram(&corrupted, peer(1), now).is_empty());
        assert!(session.handle_datagram(b"DSUC", peer(1), now).is_empty());
        assert!(session.handle_datagram(&[0u8; 40], peer(1), now).is_empty());
        assert!(session.registry().is_empty());
    }

    #[test]
    fn info_request_answers_per_slot_in_order() {
        let table = SlotTable::new();
        table.connect(full_gyro_pad(0));
        let mut session = session_with(&table);

        let request = encode_request(1, &Request::Info { slots: vec![0, 2] });
        let out = session.handle_datagram(&request, peer(4000), Instant::now());
        assert_eq!(out.len(), 2);

        let first = SharedResponse::decode(&out[0].packet[HEADER_LEN..]).unwrap();
        assert_eq!(first.slot, 0);
        assert_eq!(first.slot_state, SlotState::Connected);
        assert_eq!(first.device_model, DeviceModel::FullGyro);
        assert_eq!(first.mac, [0x10, 0x20, 0x30, 0x40, 0x50, 0x60]);
        assert_eq!(first.battery, Battery::Medium);

        let second = SharedResponse::decode(&out[1].packet[HEADER_LEN..]).unwrap();
        assert_eq!(second.slot, 2);
        assert_eq!(second.slot_state, SlotState::NotConnected);
        assert_eq!(second.device_model, DeviceModel::NotApplicable);
        assert_eq!(second.mac, [0; 6]);

        for o in &out {
            assert_eq!(stored_crc(&o.packet), Some(packet_crc(&o.packet)));
        }
    }

    #[test]
    fn out_of_range_info_slots_are_skipped() {
        let mut session = session_with(&SlotTable::new());
        let request = encode_request(1, &Request::Info { slots: vec![9, 1] });
        let out = session.handle_datagram(&request, peer(4000), Instant::now());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].packet[HEADER_LEN], 1);
    }

    #[test]
    fn repeated_data_requests_keep_one_entry() {
        let mut session = session_with(&SlotTable::new());
        let t0 = Instant::now();
        subscribe(&mut session, 5000, t0);
        subscribe(&mut session, 5000, t0 + Duration::from_millis(10));
        assert_eq!(session.registry().len(), 1);
        assert_eq!(
            session.registry().get(&peer(5000)).map(|c| c.last_seen),
            Some(t0 + Duration::from_millis(10))
        );
    }

    #[test]
    fn motion_without_clients_sends_nothing_but_still_fuses() {
        let mut session = session_with(&SlotTable::new());
        let now = Instant::now();

        assert!(session
            .handle_motion(&motion(0, SensorKind::Accelerometer, 1), None, now)
            .is_empty());

        // a client joins between the accel and gyro halves of the same epoch
        subscribe(&mut session, 5000, now);
        let out = session.handle_motion(&motion(0, SensorKind::Gyroscope, 1), None, now);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn broadcast_stamps_per_client_counters() {
        let mut session = session_with(&SlotTable::new());
        let now = Instant::now();
        subscribe(&mut session, 5000, now);

        let broadcast = |ts: u64, session: &mut DsuSession| {
            session.handle_motion(&motion(0, SensorKind::Accelerometer, ts), None, now);
            session.handle_motion(&motion(0, SensorKind::Gyroscope, ts), None, now)
        };

        let first = broadcast(1, &mut session);
        assert_eq!(first.len(), 1);
        assert_eq!(data_packet_number(&first[0].packet), Some(0));

        subscribe(&mut session, 5001, now);
        let second = broadcast(2, &mut session);
        assert_eq!(second.len(), 2);
        let numbers: Vec<_> = second
            .iter()
            .map(|o| (o.addr, data_packet_number(&o.packet)))
            .collect();
        assert!(numbers.contains(&(peer(5000), Some(1))));
        assert!(numbers.contains(&(peer(5001), Some(0))));

        for o in &second {
            assert_eq!(stored_crc(&o.packet), Some(packet_crc(&o.packet)));
        }
    }

    #[test]
    fn data_response_uses_slot_info_and_state() {
        let table = SlotTable::new();
        table.connect(full_gyro_pad(1));
        let mut state = GamepadState::default();
        state.press(crate::controller::ButtonType::Start);
        table.update_state(1, state);

        let mut session = session_with(&table);
        let now = Instant::now();
        subscribe(&mut session, 5000, now);

        session.handle_motion(&motion(1, SensorKind::Accelerometer, 1), None, now);
        let out = session.handle_motion(&motion(1, SensorKind::Gyroscope, 1), None, now);
        let packet = &out[0].packet;

        let shared = SharedResponse::decode(&packet[HEADER_LEN..]).unwrap();
        assert_eq!(shared.slot, 1);
        assert_eq!(shared.connected, Connected::Connected);
        assert_eq!(shared.mac, [0x10, 0x20, 0x30, 0x40, 0x50, 0x60]);
        assert_eq!(u16::from_le_bytes([packet[36], packet[37]]), 0x0008);
    }

    #[test]
    fn out_of_range_motion_slot_is_ignored() {
        let mut session = session_with(&SlotTable::new());
        let event = motion(MAX_GAMEPADS as u8, SensorKind::Accelerometer, 1);
        assert!(session.handle_motion(&event, None, Instant::now()).is_empty());
    }

    #[test]
    fn silent_clients_expire_on_tick() {
        let mut session = session_with(&SlotTable::new());
        let t0 = Instant::now();
        subscribe(&mut session, 5000, t0);
        subscribe(&mut session, 5001, t0 + Duration::from_millis(3000));

        assert!(session.expire_clients(t0 + Duration::from_millis(5000)).is_empty());
        assert_eq!(
            session.expire_clients(t0 + Duration::from_millis(5001)),
            vec![peer(5000)]
        );
        assert_eq!(session.clients().len(), 1);
    }
}
