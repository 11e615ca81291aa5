use super::dispatcher::CommandDispatcher;
use super::intent::IntentCell;
use super::telemetry::TelemetryAcquirer;
use super::video::{StreamState, VideoAcquirer};
use crate::link::{CommandError, LinkError, Maneuver, VehicleLink};
use crate::{error, event, info, log, warn};
use std::sync::Arc;
use std::time::Duration;
use strum_macros::Display;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Vehicle lifecycle. All transitions funnel through the supervisor and
/// are serialized: the link does not tolerate concurrent lifecycle calls.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum FlightState {
    Disconnected,
    Connected,
    Grounded,
    Airborne,
    Landing,
}

/// A maneuver request refused by the hazard gate. Reported to the
/// operator, not an exceptional condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HazardRejection {
    NotAirborne(FlightState),
    BatteryUnknown,
    BatteryLow(i64),
}

impl std::fmt::Display for HazardRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HazardRejection::NotAirborne(s) => write!(f, "vehicle is {s}, not airborne"),
            HazardRejection::BatteryUnknown => write!(f, "battery level unknown"),
            HazardRejection::BatteryLow(b) => write!(
                f,
                "battery at {b}%, below the {}% threshold",
                FlightSupervisor::FLIP_BATTERY_THRESHOLD
            ),
        }
    }
}

#[derive(Debug)]
pub enum ManeuverError {
    Rejected(HazardRejection),
    Command(CommandError),
}

impl std::fmt::Display for ManeuverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManeuverError::Rejected(r) => write!(f, "rejected: {r}"),
            ManeuverError::Command(e) => write!(f, "command failed: {e}"),
        }
    }
}

impl std::error::Error for ManeuverError {}

/// Owns the flight state machine, gates hazardous actions behind the
/// battery threshold and guarantees the landing/stop sequence on every
/// termination path.
pub struct FlightSupervisor {
    link: Arc<dyn VehicleLink>,
    intent: Arc<IntentCell>,
    telemetry: Arc<TelemetryAcquirer>,
    video: Arc<VideoAcquirer>,
    state: RwLock<FlightState>,
    /// At most one lifecycle transition in flight at a time.
    transition: Mutex<()>,
    link_fault: Arc<Notify>,
    dispatcher: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    telemetry_task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl FlightSupervisor {
    /// Minimum known battery percentage for flip maneuvers. Tunable, no
    /// proof of safety (unknown battery) rejects identically.
    pub const FLIP_BATTERY_THRESHOLD: i64 = 50;
    /// Upper bound on the landing attempt during shutdown.
    pub const LAND_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(
        link: Arc<dyn VehicleLink>,
        intent: Arc<IntentCell>,
        telemetry: Arc<TelemetryAcquirer>,
        video: Arc<VideoAcquirer>,
    ) -> Self {
        Self {
            link,
            intent,
            telemetry,
            video,
            state: RwLock::new(FlightState::Disconnected),
            transition: Mutex::new(()),
            link_fault: Arc::new(Notify::new()),
            dispatcher: Mutex::new(None),
            telemetry_task: Mutex::new(None),
        }
    }

    pub async fn state(&self) -> FlightState { *self.state.read().await }

    /// Notified by the dispatcher after a streak of consecutive send
    /// failures. The host loop reacts by forcing the shutdown sequence.
    pub fn link_fault_monitor(&self) -> Arc<Notify> { Arc::clone(&self.link_fault) }

    /// Disconnected -> Connected. Starts the dispatcher and telemetry
    /// loops on success; a link failure stays Disconnected and is only
    /// retried on explicit operator action.
    pub async fn connect(&self) -> Result<(), LinkError> {
        let _t = self.transition.lock().await;
        if *self.state.read().await != FlightState::Disconnected {
            log!("Already connected. Ignoring connect.");
            return Ok(());
        }
        self.link.connect().await?;
        let cancel = CancellationToken::new();
        let handle = CommandDispatcher::spawn(
            Arc::clone(&self.link),
            Arc::clone(&self.intent),
            Arc::clone(&self.link_fault),
            cancel.clone(),
        );
        *self.dispatcher.lock().await = Some((cancel, handle));
        let tele_cancel = CancellationToken::new();
        let tele_handle = self.telemetry.spawn(tele_cancel.clone());
        *self.telemetry_task.lock().await = Some((tele_cancel, tele_handle));
        *self.state.write().await = FlightState::Connected;
        info!("Vehicle link up.");
        Ok(())
    }

    /// Connected/Grounded -> Airborne. A failed takeoff leaves the state
    /// unchanged; the operator re-triggers.
    pub async fn takeoff(&self) -> Result<(), CommandError> {
        let _t = self.transition.lock().await;
        match *self.state.read().await {
            FlightState::Connected | FlightState::Grounded => {}
            s => {
                log!("Takeoff ignored in state {s}.");
                return Ok(());
            }
        }
        self.link.takeoff().await?;
        *self.state.write().await = FlightState::Airborne;
        info!("Taking off.");
        Ok(())
    }

    /// Airborne -> Landing -> Grounded. A failed land returns to Airborne
    /// and surfaces the error; the operator re-triggers.
    pub async fn land(&self) -> Result<(), CommandError> {
        let _t = self.transition.lock().await;
        if *self.state.read().await != FlightState::Airborne {
            log!("Land ignored, not airborne.");
            return Ok(());
        }
        *self.state.write().await = FlightState::Landing;
        match self.link.land().await {
            Ok(()) => {
                *self.state.write().await = FlightState::Grounded;
                info!("Landed.");
                Ok(())
            }
            Err(e) => {
                *self.state.write().await = FlightState::Airborne;
                Err(e)
            }
        }
    }

    /// Hazard-gated flip. Permitted iff airborne and the latest snapshot
    /// has a known battery at or above the threshold.
    pub async fn maneuver(&self, kind: Maneuver) -> Result<(), ManeuverError> {
        let _t = self.transition.lock().await;
        let state = *self.state.read().await;
        if state != FlightState::Airborne {
            return Err(ManeuverError::Rejected(HazardRejection::NotAirborne(state)));
        }
        match self.telemetry.snapshot().await.battery_percent {
            None => Err(ManeuverError::Rejected(HazardRejection::BatteryUnknown)),
            Some(b) if b < Self::FLIP_BATTERY_THRESHOLD => {
                Err(ManeuverError::Rejected(HazardRejection::BatteryLow(b)))
            }
            Some(_) => {
                info!("Executing {kind}.");
                self.link.execute_maneuver(kind).await.map_err(ManeuverError::Command)
            }
        }
    }

    /// Ordered best-effort shutdown, run on every termination path:
    /// (1) halt velocity, (2) land if airborne with a bounded wait,
    /// (3) stop video, (4) close the link. Each step proceeds even if the
    /// previous one errored. Idempotent.
    pub async fn shutdown(&self) {
        let _t = self.transition.lock().await;
        if *self.state.read().await == FlightState::Disconnected {
            event!("Shutdown with link already down. Nothing to do.");
            return;
        }
        warn!("Shutdown sequence started.");

        // (1) The dispatcher sends its final zero-velocity command on
        // cancellation; joining it here guarantees the send went out.
        if let Some((cancel, handle)) = self.dispatcher.lock().await.take() {
            cancel.cancel();
            if handle.await.is_err() {
                error!("Dispatcher task failed while stopping.");
            }
        } else if let Err(e) = self.link.set_velocity(0, 0, 0, 0).await {
            error!("Halt command failed: {e}.");
        }

        // (2)
        let state = *self.state.read().await;
        if matches!(state, FlightState::Airborne | FlightState::Landing) {
            *self.state.write().await = FlightState::Landing;
            match timeout(Self::LAND_TIMEOUT, self.link.land()).await {
                Ok(Ok(())) => {
                    *self.state.write().await = FlightState::Grounded;
                    info!("Landed.");
                }
                Ok(Err(e)) => error!("Land failed during shutdown: {e}."),
                Err(_) => error!("Land timed out after {:?}.", Self::LAND_TIMEOUT),
            }
        }

        // (3)
        if self.video.state().await == StreamState::On {
            if let Err(e) = self.video.stop().await {
                error!("Stopping video failed during shutdown: {e}.");
            }
        }
        if let Some((cancel, handle)) = self.telemetry_task.lock().await.take() {
            cancel.cancel();
            handle.await.ok();
        }

        // (4)
        self.link.disconnect().await;
        *self.state.write().await = FlightState::Disconnected;
        info!("Vehicle connection closed.");
    }
}
