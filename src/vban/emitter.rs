//! VBAN emitter with statum state machine
//!
//! Lifecycle:
//! - **Unbound**: capture and settings known, nothing negotiated yet
//! - **Bound**: format validated, chunk size fixed, socket open
//! - **Streaming**: capture running, buffers turned into datagrams
//! - **Stopping**: input closed, pending buffers discarded
//! - **Stopped**: socket released and capture stopped
//!
//! [`VbanEmitterHandle`] drives one emitter through all of it on a tokio task.

use statum::{machine, state};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::capture::{AudioCapture, AudioSink, CaptureSpec};
use super::protocol::{negotiate_chunk, ChunkPlan, HeaderTemplate, Packetizer};
use super::VbanError;
use crate::config::VbanConfig;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmitterSettings {
    /// Where frames go; audio is dropped while this is `None`
    pub destination: Option<SocketAddr>,
    pub stream_name: String,
    pub queue_capacity: usize,
}

impl EmitterSettings {
    pub fn from_config(config: &VbanConfig) -> Self {
        Self {
            destination: config
                .destination
                .map(|ip| SocketAddr::new(ip, config.port)),
            stream_name: config.stream_name.clone(),
            queue_capacity: config.queue_capacity,
        }
    }
}

/// Counters reported when the emitter stops
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EmitterStats {
    pub buffers_received: u64,
    pub packets_sent: u64,
    pub send_errors: u64,
    /// Number carried by the last frame written
    pub last_frame: u32,
    pub discarded_on_shutdown: usize,
}

#[state]
#[derive(Debug, Clone)]
pub enum EmitterState {
    Unbound,
    Bound,
    Streaming,
    Stopping,
    Stopped,
}

#[machine]
pub struct VbanEmitter<S: EmitterState> {
    settings: EmitterSettings,
    capture: Box<dyn AudioCapture>,
    spec: Option<CaptureSpec>,
    plan: Option<ChunkPlan>,
    packetizer: Option<Packetizer>,
    socket: Option<UdpSocket>,
    buffers: Option<mpsc::Receiver<Vec<u8>>>,
    stats: EmitterStats,
}

impl<S: EmitterState> VbanEmitter<S> {
    pub fn settings(&self) -> &EmitterSettings {
        &self.settings
    }

    pub fn capture_spec(&self) -> Option<CaptureSpec> {
        self.spec
    }

    pub fn chunk_plan(&self) -> Option<ChunkPlan> {
        self.plan
    }

    pub fn stats(&self) -> EmitterStats {
        self.stats
    }
}

impl VbanEmitter<Unbound> {
    pub fn create(settings: EmitterSettings, capture: Box<dyn AudioCapture>) -> Self {
        Self::new(
            settings,
            capture,
            None, // spec
            None, // plan
            None, // packetizer
            None, // socket
            None, // buffers
            EmitterStats::default(),
        )
    }

    /// Negotiates the capture format, fixes the chunk size and opens the socket
    pub async fn bind(mut self) -> Result<VbanEmitter<Bound>, VbanError> {
        let spec = self.capture.open()?;
        let plan = negotiate_chunk(spec.buffer_samples, spec.buffer_bytes)?;
        let header = HeaderTemplate::new(
            &spec.format,
            plan.samples_per_chunk,
            &self.settings.stream_name,
        )?;

        let local = match self.settings.destination {
            Some(SocketAddr::V6(_)) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
            _ => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|source| VbanError::Bind { addr: local, source })?;

        match self.settings.destination {
            Some(destination) => info!(
                "VBAN stream '{}' bound: {} x {} bytes per buffer -> {} frame(s) of {} samples / {} bytes to {}",
                self.settings.stream_name,
                spec.buffer_samples,
                spec.buffer_bytes / spec.buffer_samples.max(1) as usize,
                plan.divisor,
                plan.samples_per_chunk,
                plan.bytes_per_chunk,
                destination
            ),
            None => warn!(
                "VBAN stream '{}' bound without a destination, audio will be dropped",
                self.settings.stream_name
            ),
        }

        self.spec = Some(spec);
        self.plan = Some(plan);
        self.packetizer = Some(Packetizer::new(header, plan.bytes_per_chunk));
        self.socket = Some(socket);
        Ok(self.transition())
    }
}

impl VbanEmitter<Bound> {
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|socket| socket.local_addr().ok())
    }

    /// Starts the capture and begins accepting buffers
    pub fn start(mut self) -> Result<VbanEmitter<Streaming>, VbanError> {
        let (sink, buffers) = AudioSink::channel(self.settings.queue_capacity);
        self.capture.start(sink)?;
        debug!("VBAN capture started");
        self.buffers = Some(buffers);
        Ok(self.transition())
    }
}

impl VbanEmitter<Streaming> {
    /// Sends buffers until cancelled or the capture stops delivering
    pub async fn run(mut self, token: CancellationToken) -> VbanEmitter<Stopping> {
        let Some(mut buffers) = self.buffers.take() else {
            warn!("VBAN emitter streaming without an input queue");
            return self.transition();
        };

        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    debug!("VBAN emitter cancelled");
                    break;
                }

                buffer = buffers.recv() => match buffer {
                    Some(buffer) => self.send_buffer(&buffer).await,
                    None => {
                        info!("VBAN capture stopped delivering audio");
                        break;
                    }
                },
            }
        }

        self.buffers = Some(buffers);
        self.transition()
    }

    /// Splits one capture buffer into frames and sends them
    pub async fn send_buffer(&mut self, buffer: &[u8]) {
        self.stats.buffers_received += 1;

        let Some(destination) = self.settings.destination else {
            trace!("No VBAN destination, dropping {} bytes", buffer.len());
            return;
        };
        let (Some(packetizer), Some(socket)) = (self.packetizer.as_mut(), self.socket.as_ref())
        else {
            return;
        };

        for packet in packetizer.packetize(buffer) {
            match socket.send_to(&packet, destination).await {
                Ok(_) => self.stats.packets_sent += 1,
                Err(e) => {
                    self.stats.send_errors += 1;
                    if self.stats.send_errors.is_power_of_two() {
                        warn!("VBAN send to {} failed: {}", destination, e);
                    }
                }
            }
        }
        self.stats.last_frame = packetizer.frame_counter();
    }
}

impl VbanEmitter<Stopping> {
    /// Closes the input, discards pending buffers, releases the socket, then stops the capture
    pub fn stop(mut self) -> VbanEmitter<Stopped> {
        if let Some(mut buffers) = self.buffers.take() {
            buffers.close();
            while buffers.try_recv().is_ok() {
                self.stats.discarded_on_shutdown += 1;
            }
        }
        if self.stats.discarded_on_shutdown > 0 {
            debug!(
                "Discarded {} pending audio buffer(s)",
                self.stats.discarded_on_shutdown
            );
        }

        self.socket = None;
        self.capture.stop();

        info!(
            "VBAN stream '{}' stopped after {} packet(s)",
            self.settings.stream_name, self.stats.packets_sent
        );
        self.transition()
    }
}

/// Owns a running emitter task
pub struct VbanEmitterHandle {
    local_addr: Option<SocketAddr>,
    plan: Option<ChunkPlan>,
    token: CancellationToken,
    task: Option<JoinHandle<EmitterStats>>,
}

impl VbanEmitterHandle {
    /// Binds and starts an emitter; bind errors are returned before any task is spawned
    pub async fn spawn(
        settings: EmitterSettings,
        capture: Box<dyn AudioCapture>,
    ) -> Result<Self, VbanError> {
        let bound = VbanEmitter::create(settings, capture).bind().await?;
        let local_addr = bound.local_addr();
        let plan = bound.chunk_plan();
        let streaming = bound.start()?;

        let token = CancellationToken::new();
        let task_token = token.clone();
        let task = tokio::spawn(async move {
            let stopped = streaming.run(task_token).await.stop();
            stopped.stats()
        });

        Ok(Self {
            local_addr,
            plan,
            token,
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn chunk_plan(&self) -> Option<ChunkPlan> {
        self.plan
    }

    /// True once the task has exited on its own (e.g. the capture ended)
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }

    pub async fn shutdown(&mut self) -> Result<EmitterStats, VbanError> {
        let Some(task) = self.task.take() else {
            return Ok(EmitterStats::default());
        };
        self.token.cancel();
        task.await.map_err(|e| VbanError::TaskFailed(e.to_string()))
    }
}

impl Drop for VbanEmitterHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.token.cancel();
        }
    }
}
