use crate::link::{TelemetryField, VehicleLink};
use crate::{event, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One whole telemetry poll cycle. Every field is independently optional
/// because any single read may fail; a failed field degrades to `None`
/// without corrupting its siblings. `flight_time_secs` is the one field
/// with stale-display semantics: it keeps the last successful value
/// instead of blanking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub battery_percent: Option<i64>,
    pub temperature: Option<i64>,
    pub height: Option<i64>,
    pub barometer: Option<i64>,
    pub flight_time_secs: Option<i64>,
}

/// Polls the vehicle's telemetry fields on a fixed cadence and publishes
/// each cycle as one atomic snapshot replace. Readers (supervisor, HUD)
/// never block the poll loop and never see a partially built snapshot.
pub struct TelemetryAcquirer {
    link: Arc<dyn VehicleLink>,
    snapshot: Arc<RwLock<TelemetrySnapshot>>,
}

impl TelemetryAcquirer {
    /// Poll cadence for the whole field set.
    pub const TELEMETRY_PERIOD: Duration = Duration::from_millis(500);

    pub fn new(link: Arc<dyn VehicleLink>) -> Self {
        Self { link, snapshot: Arc::new(RwLock::new(TelemetrySnapshot::default())) }
    }

    /// Shared handle to the latest published snapshot.
    pub fn snapshot_lock(&self) -> Arc<RwLock<TelemetrySnapshot>> {
        Arc::clone(&self.snapshot)
    }

    pub async fn snapshot(&self) -> TelemetrySnapshot { *self.snapshot.read().await }

    /// Spawns the poll loop until the token is cancelled.
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Self::TELEMETRY_PERIOD);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!("Telemetry acquirer running at {:?} period.", Self::TELEMETRY_PERIOD);
            loop {
                tokio::select! {
                    _ = tick.tick() => this.poll_once().await,
                    () = cancel.cancelled() => break,
                }
            }
            event!("Telemetry acquirer stopped.");
        })
    }

    /// Polls every field once and publishes the result as a whole snapshot.
    pub async fn poll_once(&self) {
        let read = |field| async move { self.link.read_telemetry_field(field).await.ok() };
        let next = TelemetrySnapshot {
            battery_percent: read(TelemetryField::Battery).await,
            temperature: read(TelemetryField::Temperature).await,
            height: read(TelemetryField::Height).await,
            barometer: read(TelemetryField::Barometer).await,
            flight_time_secs: match read(TelemetryField::FlightTime).await {
                Some(t) => Some(t),
                // Keep showing the last known flight time on a failed read.
                None => self.snapshot.read().await.flight_time_secs,
            },
        };
        *self.snapshot.write().await = next;
    }
}
