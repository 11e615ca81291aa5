use crate::control::{
    ControlKey, FlightState, FlightSupervisor, InputClassifier, IntentCell, KeyState,
    ManeuverError, StreamState, TelemetryAcquirer, TelemetrySnapshot, VideoAcquirer,
};
use crate::event::ControlEvent;
use crate::link::{RawFrame, VehicleLink};
use crate::{error, event, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// Explicit context owning every core component; no ambient globals. Also
/// the pull-based, read-only surface a renderer consumes at its own
/// cadence: key state, telemetry, frame buffer, flight/stream state and
/// the display-mode flags.
pub struct Cockpit {
    classifier: RwLock<InputClassifier>,
    intent: Arc<IntentCell>,
    telemetry: Arc<TelemetryAcquirer>,
    video: Arc<VideoAcquirer>,
    supervisor: Arc<FlightSupervisor>,
    show_hud: AtomicBool,
    show_controls: AtomicBool,
}

impl Cockpit {
    pub fn new(link: Arc<dyn VehicleLink>) -> Self {
        let intent = Arc::new(IntentCell::default());
        let telemetry = Arc::new(TelemetryAcquirer::new(Arc::clone(&link)));
        let video = Arc::new(VideoAcquirer::new(Arc::clone(&link)));
        let supervisor = Arc::new(FlightSupervisor::new(
            link,
            Arc::clone(&intent),
            Arc::clone(&telemetry),
            Arc::clone(&video),
        ));
        Self {
            classifier: RwLock::new(InputClassifier::new()),
            intent,
            telemetry,
            video,
            supervisor,
            show_hud: AtomicBool::new(true),
            show_controls: AtomicBool::new(false),
        }
    }

    pub fn supervisor(&self) -> &Arc<FlightSupervisor> { &self.supervisor }

    /// Samples the current hold set into an intent and publishes it for
    /// the dispatcher. Called once per host tick; logically independent of
    /// the dispatch cadence.
    pub async fn sample_keys(&self) {
        let intent = self.classifier.write().await.classify();
        self.intent.store(intent);
    }

    pub async fn handle_event(&self, ev: ControlEvent) {
        event!("Handling {ev:?}");
        match ev {
            ControlEvent::KeyDown(key) => {
                self.classifier.write().await.key_down(key);
                // Ascend doubles as the takeoff trigger while grounded.
                if key == ControlKey::Ascend {
                    let state = self.supervisor.state().await;
                    if matches!(state, FlightState::Connected | FlightState::Grounded) {
                        if let Err(e) = self.supervisor.takeoff().await {
                            error!("Takeoff failed: {e}. Re-trigger to retry.");
                        }
                    }
                }
            }
            ControlEvent::KeyUp(key) => self.classifier.write().await.key_up(key),
            ControlEvent::TakeoffRequested => {
                if let Err(e) = self.supervisor.takeoff().await {
                    error!("Takeoff failed: {e}. Re-trigger to retry.");
                }
            }
            ControlEvent::LandRequested => {
                if let Err(e) = self.supervisor.land().await {
                    error!("Land failed: {e}. Re-trigger to retry.");
                }
            }
            ControlEvent::Maneuver(kind) => match self.supervisor.maneuver(kind).await {
                Ok(()) => {}
                Err(ManeuverError::Rejected(r)) => warn!("{kind} rejected: {r}."),
                Err(ManeuverError::Command(e)) => error!("{kind} failed: {e}."),
            },
            ControlEvent::ToggleVideo => {
                let res = match self.video.state().await {
                    StreamState::Off => self.video.start().await,
                    StreamState::On => self.video.stop().await,
                    s => {
                        info!("Video toggle ignored while {s}.");
                        Ok(())
                    }
                };
                if let Err(e) = res {
                    error!("Video toggle failed: {e}. Re-toggle to retry.");
                }
            }
            ControlEvent::ToggleHud => {
                self.show_hud.fetch_xor(true, Ordering::Relaxed);
            }
            ControlEvent::ToggleControlsOverlay => {
                self.show_controls.fetch_xor(true, Ordering::Relaxed);
            }
            // Termination is driven by the host loop, which funnels every
            // exit into the supervisor's shutdown sequence.
            ControlEvent::Quit => {}
        }
    }

    pub async fn key_state(&self) -> KeyState { self.classifier.read().await.key_state().clone() }

    pub async fn telemetry(&self) -> TelemetrySnapshot { self.telemetry.snapshot().await }

    pub async fn frame(&self) -> Option<RawFrame> { self.video.frame().await }

    pub async fn flight_state(&self) -> FlightState { self.supervisor.state().await }

    pub async fn stream_state(&self) -> StreamState { self.video.state().await }

    pub fn show_hud(&self) -> bool { self.show_hud.load(Ordering::Relaxed) }

    pub fn show_controls(&self) -> bool { self.show_controls.load(Ordering::Relaxed) }
}
