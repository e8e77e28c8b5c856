//! DSU server task and its handle
//!
//! One tokio task owns the UDP socket and the [`DsuSession`]. It multiplexes
//! inbound datagrams, motion commands from capture code, and the eviction
//! timer. Capture code talks to it only through a bounded channel, so a
//! slow network never blocks a capture thread.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::session::{ClientStatus, DsuSession, Outgoing};
use super::DsuError;
use crate::config::DsuConfig;
use crate::controller::{ControllerSource, GamepadState, MotionEvent};

const RECV_BUFFER_LEN: usize = 1024;

/// Messages the server task accepts besides network traffic
#[derive(Debug)]
pub enum DsuCommand {
    Motion {
        event: MotionEvent,
        /// Button/axis snapshot taken alongside the sample, if any
        state: Option<GamepadState>,
    },
    ListClients {
        response_tx: oneshot::Sender<Vec<ClientStatus>>,
    },
}

/// Cloneable, non-blocking entry point for motion producers
///
/// Safe to use from plain OS threads; it never awaits.
#[derive(Clone, Debug)]
pub struct MotionSender {
    tx: mpsc::Sender<DsuCommand>,
}

impl MotionSender {
    pub fn submit(&self, event: MotionEvent, state: Option<GamepadState>) -> Result<(), DsuError> {
        self.tx
            .try_send(DsuCommand::Motion { event, state })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => DsuError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => DsuError::Stopped,
            })
    }
}

/// Owns the running DSU server
///
/// Dropping the handle cancels the task; [`DsuServerHandle::shutdown`]
/// additionally waits for it to release the socket.
pub struct DsuServerHandle {
    local_addr: SocketAddr,
    sender: MotionSender,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl DsuServerHandle {
    /// Binds the socket and starts the server task on the current runtime
    pub async fn spawn(
        config: &DsuConfig,
        source: Arc<dyn ControllerSource>,
    ) -> Result<Self, DsuError> {
        let bind_addr = SocketAddr::new(config.bind_address, config.port);
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|source| DsuError::Bind {
                addr: bind_addr,
                source,
            })?;
        let local_addr = socket.local_addr().map_err(|source| DsuError::Bind {
            addr: bind_addr,
            source,
        })?;

        let server_id = generate_server_id();
        info!("DSU server {:08x} listening on {}", server_id, local_addr);

        let session = DsuSession::new(
            server_id,
            source,
            Duration::from_millis(config.client_timeout_ms),
        );
        let (tx, rx) = mpsc::channel(config.event_queue_capacity.max(1));
        let token = CancellationToken::new();
        let check_interval = Duration::from_millis(config.check_interval_ms.max(1));

        let task = tokio::spawn(run_server(socket, session, rx, check_interval, token.clone()));

        Ok(Self {
            local_addr,
            sender: MotionSender { tx },
            token,
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn motion_sender(&self) -> MotionSender {
        self.sender.clone()
    }

    pub fn submit_motion(
        &self,
        event: MotionEvent,
        state: Option<GamepadState>,
    ) -> Result<(), DsuError> {
        self.sender.submit(event, state)
    }

    /// Snapshot of the currently registered clients
    pub async fn clients(&self) -> Result<Vec<ClientStatus>, DsuError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.sender
            .tx
            .send(DsuCommand::ListClients { response_tx })
            .await
            .map_err(|_| DsuError::Stopped)?;
        response_rx.await.map_err(|_| DsuError::Stopped)
    }

    /// Stops the task and waits until the socket is released
    pub async fn shutdown(&mut self) -> Result<(), DsuError> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        info!("Shutting down DSU server on {}", self.local_addr);
        self.token.cancel();
        task.await.map_err(|e| DsuError::TaskFailed(e.to_string()))
    }
}

impl Drop for DsuServerHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            debug!("DSU server handle dropped without shutdown, cancelling task");
            self.token.cancel();
        }
    }
}

/// Id advertised in every response header; changes on each start
fn generate_server_id() -> u32 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() ^ d.as_secs() as u32)
        .unwrap_or_default();
    std::process::id().rotate_left(16) ^ nanos
}

async fn run_server(
    socket: UdpSocket,
    mut session: DsuSession,
    mut commands: mpsc::Receiver<DsuCommand>,
    check_interval: Duration,
    token: CancellationToken,
) {
    let mut buf = [0u8; RECV_BUFFER_LEN];
    let mut ticker = tokio::time::interval(check_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => break,

            recv = socket.recv_from(&mut buf) => match recv {
                Ok((len, peer)) => {
                    let outgoing = session.handle_datagram(&buf[..len], peer, Instant::now());
                    send_all(&socket, outgoing).await;
                }
                // ICMP port-unreachable from a vanished client surfaces here on some platforms
                Err(e) => warn!("DSU receive failed: {}", e),
            },

            Some(command) = commands.recv() => match command {
                DsuCommand::Motion { event, state } => {
                    let outgoing = session.handle_motion(&event, state, Instant::now());
                    send_all(&socket, outgoing).await;
                }
                DsuCommand::ListClients { response_tx } => {
                    let _ = response_tx.send(session.clients());
                }
            },

            _ = ticker.tick() => {
                let evicted = session.expire_clients(Instant::now());
                if !evicted.is_empty() {
                    debug!("Evicted {} DSU client(s)", evicted.len());
                }
            }
        }
    }

    commands.close();
    let mut discarded = 0usize;
    while commands.try_recv().is_ok() {
        discarded += 1;
    }
    if discarded > 0 {
        debug!("Discarded {} pending DSU command(s) on shutdown", discarded);
    }
    info!(
        "DSU server {:08x} stopped, {} client(s) were registered",
        session.server_id(),
        session.registry().len()
    );
}

async fn send_all(socket: &UdpSocket, outgoing: Vec<Outgoing>) {
    for Outgoing { addr, packet } in outgoing {
        match socket.send_to(&packet, addr).await {
            Ok(sent) if sent == packet.len() => trace!("Sent {} bytes to {}", sent, addr),
            Ok(sent) => error!(
                "Short DSU send to {}: {} of {} bytes",
                addr,
                sent,
                packet.len()
            ),
            Err(e) => warn!("DSU send to {} failed: {}", addr, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{SensorKind, SlotTable};

    fn loopback_config(queue: usize) -> DsuConfig {
        DsuConfig {
            port: 0,
            event_queue_capacity: queue,
            ..DsuConfig::default()
        }
    }

    fn sample(sensor: SensorKind) -> MotionEvent {
        MotionEvent {
            slot: 0,
            sensor,
            data: [0.0; 3],
            timestamp: 1,
        }
    }

    #[test]
    fn server_ids_mix_in_the_process_id() {
        assert_ne!(generate_server_id(), 0);
    }

    #[tokio::test]
    async fn spawn_binds_an_ephemeral_port() {
        let mut server = DsuServerHandle::spawn(&loopback_config(8), Arc::new(SlotTable::new()))
            .await
            .unwrap();
        assert_ne!(server.local_addr().port(), 0);
        assert!(server.clients().await.unwrap().is_empty());
        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn submit_after_shutdown_reports_stopped() {
        let mut server = DsuServerHandle::spawn(&loopback_config(8), Arc::new(SlotTable::new()))
            .await
            .unwrap();
        let sender = server.motion_sender();
        server.shutdown().await.unwrap();

        assert!(matches!(
            sender.submit(sample(SensorKind::Accelerometer), None),
            Err(DsuError::Stopped)
        ));
        // a second shutdown is a no-op
        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let occupied = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let config = DsuConfig {
            port: occupied.local_addr().unwrap().port(),
            ..loopback_config(8)
        };
        let result = DsuServerHandle::spawn(&config, Arc::new(SlotTable::new())).await;
        assert!(matches!(result, Err(DsuError::Bind { .. })));
    }
}
