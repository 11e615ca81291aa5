use super::error::{CommandError, LinkError, ReadError};
use super::vehicle::{Maneuver, RawFrame, TelemetryField, VehicleLink};
use crate::config::Config;
use crate::{event, log};
use async_trait::async_trait;
use image::ImageReader;
use std::{
    collections::HashMap,
    io::Cursor,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{
    net::UdpSocket,
    sync::{Mutex, RwLock},
    task::JoinHandle,
    time::timeout,
};

/// Most recent state datagram pushed by the vehicle, split into key/value
/// pairs and kept together with its arrival time.
struct StateCache {
    received_at: Instant,
    fields: HashMap<String, String>,
}

/// Concrete [`VehicleLink`] over the vehicle's UDP text protocol: a
/// request/response command channel, a push-only state channel and a
/// datagram video stream that is assembled into encoded stills.
pub struct UdpDroneLink {
    cmd_sock: UdpSocket,
    /// One command exchange in flight at a time, replies carry no ids.
    cmd_gate: Mutex<()>,
    state_port: u16,
    video_port: u16,
    state_cache: Arc<RwLock<Option<StateCache>>>,
    state_task: Mutex<Option<JoinHandle<()>>>,
    video_task: Mutex<Option<JoinHandle<()>>>,
    latest_frame: Arc<RwLock<Option<RawFrame>>>,
}

impl UdpDroneLink {
    /// Reply deadline for a single command exchange.
    const RESPONSE_TIMEOUT: Duration = Duration::from_secs(7);
    /// A cached state datagram older than this reads as stale.
    const STATE_TTL: Duration = Duration::from_secs(2);

    pub async fn bind(config: &Config) -> Result<Self, LinkError> {
        let cmd_sock = UdpSocket::bind("0.0.0.0:0").await?;
        cmd_sock.connect(&config.drone_addr).await?;
        Ok(Self {
            cmd_sock,
            cmd_gate: Mutex::new(()),
            state_port: config.state_port,
            video_port: config.video_port,
            state_cache: Arc::new(RwLock::new(None)),
            state_task: Mutex::new(None),
            video_task: Mutex::new(None),
            latest_frame: Arc::new(RwLock::new(None)),
        })
    }

    /// Sends one command and waits for its `ok`/`error` reply.
    async fn exchange(&self, cmd: &str) -> Result<(), LinkError> {
        let _gate = self.cmd_gate.lock().await;
        self.cmd_sock.send(cmd.as_bytes()).await?;
        let mut buf = [0u8; 1024];
        let n = match timeout(Self::RESPONSE_TIMEOUT, self.cmd_sock.recv(&mut buf)).await {
            Ok(res) => res?,
            Err(_) => return Err(LinkError::Timeout),
        };
        let reply = String::from_utf8_lossy(&buf[..n]).trim().to_string();
        event!("'{cmd}' answered with '{reply}'");
        if reply.eq_ignore_ascii_case("ok") {
            Ok(())
        } else {
            Err(LinkError::Refused(reply))
        }
    }

    /// Fire-and-forget send for the velocity channel, which has no reply.
    async fn send_unacked(&self, cmd: &str) -> Result<(), CommandError> {
        self.cmd_sock.send(cmd.as_bytes()).await?;
        Ok(())
    }

    async fn spawn_state_listener(&self) -> Result<(), LinkError> {
        let sock = UdpSocket::bind(("0.0.0.0", self.state_port)).await?;
        let cache = Arc::clone(&self.state_cache);
        let handle = tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            loop {
                match sock.recv(&mut buf).await {
                    Ok(n) => {
                        let raw = String::from_utf8_lossy(&buf[..n]);
                        let fields = parse_state_datagram(&raw);
                        if fields.is_empty() {
                            event!("Discarding unparseable state datagram");
                            continue;
                        }
                        *cache.write().await =
                            Some(StateCache { received_at: Instant::now(), fields });
                    }
                    Err(e) => {
                        log!("State channel receive failed: {e}. Retrying.");
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                }
            }
        });
        *self.state_task.lock().await = Some(handle);
        Ok(())
    }

    async fn spawn_video_listener(&self) -> Result<(), LinkError> {
        let sock = UdpSocket::bind(("0.0.0.0", self.video_port)).await?;
        let slot = Arc::clone(&self.latest_frame);
        let handle = tokio::spawn(async move {
            let mut assembly = FrameAssembly::new();
            let mut buf = [0u8; 2048];
            loop {
                let n = match sock.recv(&mut buf).await {
                    Ok(n) => n,
                    Err(e) => {
                        log!("Video channel receive failed: {e}. Retrying.");
                        tokio::time::sleep(Duration::from_millis(500)).await;
                        continue;
                    }
                };
                let Some(encoded) = assembly.push(&buf[..n]) else {
                    continue;
                };
                // Undecodable data is dropped silently, the next frame
                // supersedes it.
                match decode_still(&encoded) {
                    Some(frame) => *slot.write().await = Some(frame),
                    None => event!("Dropping undecodable frame ({} bytes)", encoded.len()),
                }
            }
        });
        *self.video_task.lock().await = Some(handle);
        Ok(())
    }
}

#[async_trait]
impl VehicleLink for UdpDroneLink {
    async fn connect(&self) -> Result<(), LinkError> {
        self.exchange("command").await?;
        self.spawn_state_listener().await
    }

    async fn takeoff(&self) -> Result<(), CommandError> {
        self.exchange("takeoff").await.map_err(CommandError::from)
    }

    async fn land(&self) -> Result<(), CommandError> {
        self.exchange("land").await.map_err(CommandError::from)
    }

    async fn set_velocity(&self, x: i8, y: i8, z: i8, yaw: i8) -> Result<(), CommandError> {
        self.send_unacked(&format!("rc {x} {y} {z} {yaw}")).await
    }

    async fn execute_maneuver(&self, kind: Maneuver) -> Result<(), CommandError> {
        let dir = match kind {
            Maneuver::FlipForward => 'f',
            Maneuver::FlipBack => 'b',
            Maneuver::FlipLeft => 'l',
            Maneuver::FlipRight => 'r',
        };
        self.exchange(&format!("flip {dir}")).await.map_err(CommandError::from)
    }

    async fn start_video(&self) -> Result<(), LinkError> {
        self.exchange("streamon").await?;
        self.spawn_video_listener().await
    }

    async fn stop_video(&self) -> Result<(), LinkError> {
        if let Some(handle) = self.video_task.lock().await.take() {
            handle.abort();
        }
        self.latest_frame.write().await.take();
        self.exchange("streamoff").await
    }

    async fn read_frame(&self) -> Option<RawFrame> {
        self.latest_frame.write().await.take()
    }

    #[allow(clippy::cast_possible_truncation)]
    async fn read_telemetry_field(&self, field: TelemetryField) -> Result<i64, ReadError> {
        let cache = self.state_cache.read().await;
        let Some(state) = cache.as_ref() else {
            return Err(ReadError::Unavailable);
        };
        if state.received_at.elapsed() > Self::STATE_TTL {
            return Err(ReadError::Stale);
        }
        let key = match field {
            TelemetryField::Battery => "bat",
            TelemetryField::Temperature => "temph",
            TelemetryField::Height => "h",
            TelemetryField::Barometer => "baro",
            TelemetryField::FlightTime => "time",
        };
        let raw = state.fields.get(key).ok_or(ReadError::Unavailable)?;
        raw.parse::<f64>()
            .map(|v| v.round() as i64)
            .map_err(|_| ReadError::Malformed(format!("{key}:{raw}")))
    }

    async fn disconnect(&self) {
        if let Some(handle) = self.video_task.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.state_task.lock().await.take() {
            handle.abort();
        }
    }
}

/// Reassembles the video datagram stream into encoded stills. A datagram
/// shorter than the chunk length terminates the current frame.
struct FrameAssembly {
    buf: Vec<u8>,
}

impl FrameAssembly {
    /// Datagrams shorter than this terminate the current frame.
    const CHUNK_LEN: usize = 1460;
    /// Upper bound on one encoded frame. A peer that never sends the
    /// terminating short datagram must not grow the buffer without limit.
    const MAX_FRAME_LEN: usize = 1 << 20;

    fn new() -> Self { Self { buf: Vec::new() } }

    /// Feeds one datagram. Returns the completed encoded frame when this
    /// datagram closed it, `None` while accumulation continues.
    fn push(&mut self, datagram: &[u8]) -> Option<Vec<u8>> {
        self.buf.extend_from_slice(datagram);
        if datagram.len() >= Self::CHUNK_LEN {
            if self.buf.len() > Self::MAX_FRAME_LEN {
                event!("Discarding runaway frame accumulation ({} bytes)", self.buf.len());
                self.buf.clear();
            }
            return None;
        }
        Some(std::mem::take(&mut self.buf))
    }
}

fn parse_state_datagram(raw: &str) -> HashMap<String, String> {
    raw.trim()
        .split(';')
        .filter_map(|pair| {
            let (key, val) = pair.split_once(':')?;
            if key.is_empty() || val.is_empty() {
                return None;
            }
            Some((key.to_string(), val.to_string()))
        })
        .collect()
}

fn decode_still(data: &[u8]) -> Option<RawFrame> {
    let decoded = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()?
        .decode()
        .ok()?
        .to_rgb8();
    Some(RawFrame(decoded))
}
