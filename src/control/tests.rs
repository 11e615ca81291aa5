use super::classifier::{ControlKey, InputClassifier};
use super::dispatcher::CommandDispatcher;
use super::intent::{IntentCell, VelocityIntent};
use super::supervisor::{FlightState, FlightSupervisor, HazardRejection, ManeuverError};
use super::telemetry::TelemetryAcquirer;
use super::video::{StreamState, VideoAcquirer};
use crate::link::{
    CommandError, LinkError, Maneuver, RawFrame, ReadError, TelemetryField, VehicleLink,
};
use async_trait::async_trait;
use image::RgbImage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Connect,
    Takeoff,
    Land,
    SetVelocity(i8, i8, i8, i8),
    Maneuver(Maneuver),
    StartVideo,
    StopVideo,
    ReadFrame,
    Disconnect,
}

/// Scriptable link that records every capability call in order.
#[derive(Default)]
struct MockLink {
    calls: Mutex<Vec<Call>>,
    telemetry: Mutex<HashMap<TelemetryField, Result<i64, ReadError>>>,
    frame: Mutex<Option<RawFrame>>,
    fail_takeoff: AtomicBool,
    fail_land: AtomicBool,
    fail_velocity: AtomicBool,
}

impl MockLink {
    fn record(&self, call: Call) { self.calls.lock().unwrap().push(call); }

    fn calls(&self) -> Vec<Call> { self.calls.lock().unwrap().clone() }

    fn set_field(&self, field: TelemetryField, value: Result<i64, ReadError>) {
        self.telemetry.lock().unwrap().insert(field, value);
    }

    fn set_frame(&self, frame: RawFrame) { *self.frame.lock().unwrap() = Some(frame); }
}

#[async_trait]
impl VehicleLink for MockLink {
    async fn connect(&self) -> Result<(), LinkError> {
        self.record(Call::Connect);
        Ok(())
    }

    async fn takeoff(&self) -> Result<(), CommandError> {
        self.record(Call::Takeoff);
        if self.fail_takeoff.load(Ordering::Relaxed) {
            return Err(CommandError::Timeout);
        }
        Ok(())
    }

    async fn land(&self) -> Result<(), CommandError> {
        self.record(Call::Land);
        if self.fail_land.load(Ordering::Relaxed) {
            return Err(CommandError::Timeout);
        }
        Ok(())
    }

    async fn set_velocity(&self, x: i8, y: i8, z: i8, yaw: i8) -> Result<(), CommandError> {
        self.record(Call::SetVelocity(x, y, z, yaw));
        if self.fail_velocity.load(Ordering::Relaxed) {
            return Err(CommandError::Timeout);
        }
        Ok(())
    }

    async fn execute_maneuver(&self, kind: Maneuver) -> Result<(), CommandError> {
        self.record(Call::Maneuver(kind));
        Ok(())
    }

    async fn start_video(&self) -> Result<(), LinkError> {
        self.record(Call::StartVideo);
        Ok(())
    }

    async fn stop_video(&self) -> Result<(), LinkError> {
        self.record(Call::StopVideo);
        Ok(())
    }

    async fn read_frame(&self) -> Option<RawFrame> {
        self.record(Call::ReadFrame);
        self.frame.lock().unwrap().take()
    }

    async fn read_telemetry_field(&self, field: TelemetryField) -> Result<i64, ReadError> {
        self.telemetry.lock().unwrap().get(&field).cloned().unwrap_or(Err(ReadError::Unavailable))
    }

    async fn disconnect(&self) { self.record(Call::Disconnect); }
}

struct Rig {
    link: Arc<MockLink>,
    intent: Arc<IntentCell>,
    telemetry: Arc<TelemetryAcquirer>,
    video: Arc<VideoAcquirer>,
    supervisor: FlightSupervisor,
}

fn rig() -> Rig {
    let link = Arc::new(MockLink::default());
    let dyn_link: Arc<dyn VehicleLink> = Arc::clone(&link) as Arc<dyn VehicleLink>;
    let intent = Arc::new(IntentCell::default());
    let telemetry = Arc::new(TelemetryAcquirer::new(Arc::clone(&dyn_link)));
    let video = Arc::new(VideoAcquirer::new(Arc::clone(&dyn_link)));
    let supervisor = FlightSupervisor::new(
        dyn_link,
        Arc::clone(&intent),
        Arc::clone(&telemetry),
        Arc::clone(&video),
    );
    Rig { link, intent, telemetry, video, supervisor }
}

fn two_pixel_frame() -> RawFrame {
    RawFrame(RgbImage::from_raw(2, 1, vec![255, 0, 0, 0, 0, 255]).unwrap())
}

#[test]
fn opposing_keys_cancel_per_axis() {
    let mut classifier = InputClassifier::new();
    let pairs = [
        (ControlKey::Right, ControlKey::Left),
        (ControlKey::Forward, ControlKey::Backward),
        (ControlKey::Ascend, ControlKey::Descend),
        (ControlKey::YawRight, ControlKey::YawLeft),
    ];
    for (pos, neg) in pairs {
        classifier.key_down(pos);
        classifier.key_down(neg);
    }
    assert_eq!(classifier.classify(), VelocityIntent::ZERO);

    // Order of presses must not matter.
    let mut reversed = InputClassifier::new();
    for (pos, neg) in pairs {
        reversed.key_down(neg);
        reversed.key_down(pos);
    }
    assert_eq!(reversed.classify(), VelocityIntent::ZERO);
}

#[test]
fn single_keys_give_full_magnitude() {
    let mut classifier = InputClassifier::new();
    classifier.key_down(ControlKey::Forward);
    classifier.key_down(ControlKey::Right);
    let intent = classifier.classify();
    assert_eq!(intent, VelocityIntent { x: 100, y: 100, z: 0, yaw: 0 });

    classifier.key_down(ControlKey::Backward);
    let intent = classifier.classify();
    assert_eq!(intent.y, 0);
    assert_eq!(intent.x, 100);

    classifier.key_up(ControlKey::Right);
    classifier.key_down(ControlKey::Left);
    assert_eq!(classifier.classify().x, -100);
}

#[test]
fn key_state_tracks_intent_in_lockstep() {
    let mut classifier = InputClassifier::new();
    classifier.key_down(ControlKey::Forward);
    classifier.classify();
    assert_eq!(classifier.key_state().get(&ControlKey::Forward), Some(&true));
    classifier.key_up(ControlKey::Forward);
    // Not re-classified yet, the display state must not run ahead.
    assert_eq!(classifier.key_state().get(&ControlKey::Forward), Some(&true));
    classifier.classify();
    assert_eq!(classifier.key_state().get(&ControlKey::Forward), Some(&false));
}

#[tokio::test]
async fn dispatcher_sends_latest_intent_then_final_halt() {
    let link = Arc::new(MockLink::default());
    let dyn_link: Arc<dyn VehicleLink> = Arc::clone(&link) as Arc<dyn VehicleLink>;
    let intent = Arc::new(IntentCell::default());
    intent.store(VelocityIntent { x: 10, y: -20, z: 30, yaw: -40 });

    let cancel = CancellationToken::new();
    let handle = CommandDispatcher::spawn(
        dyn_link,
        Arc::clone(&intent),
        Arc::new(Notify::new()),
        cancel.clone(),
    );
    sleep(Duration::from_millis(120)).await;
    intent.store(VelocityIntent { x: 0, y: 100, z: 0, yaw: 0 });
    sleep(Duration::from_millis(120)).await;
    cancel.cancel();
    handle.await.unwrap();

    let calls = link.calls();
    let velocities: Vec<&Call> =
        calls.iter().filter(|c| matches!(c, Call::SetVelocity(..))).collect();
    assert!(velocities.contains(&&Call::SetVelocity(10, -20, 30, -40)));
    assert!(velocities.contains(&&Call::SetVelocity(0, 100, 0, 0)));
    // The written order is preserved and the halt command is last.
    let first_new = velocities
        .iter()
        .position(|c| matches!(c, Call::SetVelocity(0, 100, 0, 0)))
        .unwrap();
    assert!(velocities[..first_new]
        .iter()
        .all(|c| matches!(c, Call::SetVelocity(10, -20, 30, -40))));
    assert_eq!(velocities.last().unwrap(), &&Call::SetVelocity(0, 0, 0, 0));
}

#[tokio::test]
async fn dispatcher_keeps_cadence_across_send_failures() {
    let link = Arc::new(MockLink::default());
    link.fail_velocity.store(true, Ordering::Relaxed);
    let dyn_link: Arc<dyn VehicleLink> = Arc::clone(&link) as Arc<dyn VehicleLink>;
    let intent = Arc::new(IntentCell::default());
    intent.store(VelocityIntent { x: 50, y: 0, z: 0, yaw: 0 });

    let cancel = CancellationToken::new();
    let handle = CommandDispatcher::spawn(
        dyn_link,
        Arc::clone(&intent),
        Arc::new(Notify::new()),
        cancel.clone(),
    );
    sleep(Duration::from_millis(180)).await;
    // A failed send is logged and superseded, never fatal to the loop.
    let failed_sends = link
        .calls()
        .iter()
        .filter(|c| matches!(c, Call::SetVelocity(50, 0, 0, 0)))
        .count();
    assert!(failed_sends >= 2, "loop stalled after a send failure");

    // The link recovers and the loop picks up fresh intents.
    link.fail_velocity.store(false, Ordering::Relaxed);
    intent.store(VelocityIntent { x: 0, y: -50, z: 0, yaw: 0 });
    sleep(Duration::from_millis(180)).await;
    cancel.cancel();
    handle.await.unwrap();
    assert!(link.calls().contains(&Call::SetVelocity(0, -50, 0, 0)));
}

#[tokio::test]
async fn maneuver_rejected_below_battery_threshold() {
    let r = rig();
    r.link.set_field(TelemetryField::Battery, Ok(40));
    r.supervisor.connect().await.unwrap();
    r.supervisor.takeoff().await.unwrap();
    r.telemetry.poll_once().await;

    let res = r.supervisor.maneuver(Maneuver::FlipForward).await;
    assert!(matches!(
        res,
        Err(ManeuverError::Rejected(HazardRejection::BatteryLow(40)))
    ));
    assert!(!r.link.calls().contains(&Call::Maneuver(Maneuver::FlipForward)));
    r.supervisor.shutdown().await;
}

#[tokio::test]
async fn maneuver_rejected_on_unknown_battery() {
    let r = rig();
    r.link.set_field(TelemetryField::Battery, Err(ReadError::Unavailable));
    r.supervisor.connect().await.unwrap();
    r.supervisor.takeoff().await.unwrap();
    r.telemetry.poll_once().await;

    let res = r.supervisor.maneuver(Maneuver::FlipBack).await;
    assert!(matches!(
        res,
        Err(ManeuverError::Rejected(HazardRejection::BatteryUnknown))
    ));
    r.supervisor.shutdown().await;
}

#[tokio::test]
async fn maneuver_rejected_when_not_airborne() {
    let r = rig();
    r.link.set_field(TelemetryField::Battery, Ok(80));
    r.supervisor.connect().await.unwrap();
    r.telemetry.poll_once().await;

    let res = r.supervisor.maneuver(Maneuver::FlipForward).await;
    assert!(matches!(
        res,
        Err(ManeuverError::Rejected(HazardRejection::NotAirborne(FlightState::Connected)))
    ));
    r.supervisor.shutdown().await;
}

#[tokio::test]
async fn maneuver_allowed_airborne_with_healthy_battery() {
    let r = rig();
    r.link.set_field(TelemetryField::Battery, Ok(80));
    r.supervisor.connect().await.unwrap();
    r.supervisor.takeoff().await.unwrap();
    r.telemetry.poll_once().await;

    r.supervisor.maneuver(Maneuver::FlipRight).await.unwrap();
    assert!(r.link.calls().contains(&Call::Maneuver(Maneuver::FlipRight)));
    r.supervisor.shutdown().await;
}

#[tokio::test]
async fn failed_takeoff_leaves_state_unchanged() {
    let r = rig();
    r.supervisor.connect().await.unwrap();
    r.link.fail_takeoff.store(true, Ordering::Relaxed);
    assert!(r.supervisor.takeoff().await.is_err());
    assert_eq!(r.supervisor.state().await, FlightState::Connected);

    r.link.fail_takeoff.store(false, Ordering::Relaxed);
    r.supervisor.takeoff().await.unwrap();
    assert_eq!(r.supervisor.state().await, FlightState::Airborne);
    r.supervisor.shutdown().await;
}

#[tokio::test]
async fn shutdown_orders_halt_land_stop_disconnect() {
    let r = rig();
    r.supervisor.connect().await.unwrap();
    r.supervisor.takeoff().await.unwrap();
    r.video.start().await.unwrap();
    sleep(Duration::from_millis(80)).await;

    r.supervisor.shutdown().await;
    assert_eq!(r.supervisor.state().await, FlightState::Disconnected);

    let calls = r.link.calls();
    let last_velocity = calls
        .iter()
        .rposition(|c| matches!(c, Call::SetVelocity(..)))
        .expect("no velocity sent");
    assert_eq!(calls[last_velocity], Call::SetVelocity(0, 0, 0, 0));
    let land = calls.iter().position(|c| *c == Call::Land).expect("no land");
    let stop = calls.iter().position(|c| *c == Call::StopVideo).expect("no streamoff");
    let disconnect = calls.iter().position(|c| *c == Call::Disconnect).expect("no disconnect");
    assert!(last_velocity < land);
    assert!(land < stop);
    assert!(stop < disconnect);

    // Second shutdown is a no-op.
    let n = r.link.calls().len();
    r.supervisor.shutdown().await;
    assert_eq!(r.link.calls().len(), n);
}

#[tokio::test]
async fn shutdown_proceeds_past_failed_land() {
    let r = rig();
    r.supervisor.connect().await.unwrap();
    r.supervisor.takeoff().await.unwrap();
    r.video.start().await.unwrap();
    r.link.fail_land.store(true, Ordering::Relaxed);

    r.supervisor.shutdown().await;

    let calls = r.link.calls();
    assert!(calls.contains(&Call::Land));
    assert!(calls.contains(&Call::StopVideo));
    assert!(calls.contains(&Call::Disconnect));
    assert_eq!(r.supervisor.state().await, FlightState::Disconnected);
}

#[tokio::test]
async fn shutdown_ordering_holds_when_halt_send_errors() {
    let r = rig();
    r.supervisor.connect().await.unwrap();
    r.supervisor.takeoff().await.unwrap();
    r.video.start().await.unwrap();
    // Every velocity send errors from here on, including the final halt.
    r.link.fail_velocity.store(true, Ordering::Relaxed);

    r.supervisor.shutdown().await;
    assert_eq!(r.supervisor.state().await, FlightState::Disconnected);

    let calls = r.link.calls();
    let last_velocity = calls
        .iter()
        .rposition(|c| matches!(c, Call::SetVelocity(..)))
        .expect("halt was not attempted");
    assert_eq!(calls[last_velocity], Call::SetVelocity(0, 0, 0, 0));
    let land = calls.iter().position(|c| *c == Call::Land).expect("no land");
    let stop = calls.iter().position(|c| *c == Call::StopVideo).expect("no streamoff");
    let disconnect = calls.iter().position(|c| *c == Call::Disconnect).expect("no disconnect");
    assert!(last_velocity < land);
    assert!(land < stop);
    assert!(stop < disconnect);
}

#[tokio::test]
async fn stream_toggles_converge_and_join_before_streamoff() {
    let r = rig();
    assert_eq!(r.video.state().await, StreamState::Off);

    r.video.start().await.unwrap();
    assert_eq!(r.video.state().await, StreamState::On);
    // Redundant start is a no-op.
    r.video.start().await.unwrap();
    assert_eq!(r.link.calls().iter().filter(|c| **c == Call::StartVideo).count(), 1);

    sleep(Duration::from_millis(80)).await;
    r.video.stop().await.unwrap();
    assert_eq!(r.video.state().await, StreamState::Off);
    assert!(r.video.frame().await.is_none());

    // The pull loop was joined first: no frame read after streamoff.
    let calls = r.link.calls();
    let stop = calls.iter().position(|c| *c == Call::StopVideo).unwrap();
    assert!(calls.iter().skip(stop).all(|c| *c != Call::ReadFrame));

    r.video.start().await.unwrap();
    assert_eq!(r.video.state().await, StreamState::On);
    r.video.stop().await.unwrap();
    assert_eq!(r.video.state().await, StreamState::Off);
}

#[tokio::test]
async fn frames_are_mirrored_and_retained_on_empty_reads() {
    let r = rig();
    r.link.set_frame(two_pixel_frame());
    r.video.start().await.unwrap();
    sleep(Duration::from_millis(80)).await;

    let frame = r.video.frame().await.expect("no frame published");
    // Red/blue pixels swapped by the horizontal mirror.
    assert_eq!(frame.0.get_pixel(0, 0).0, [0, 0, 255]);
    assert_eq!(frame.0.get_pixel(1, 0).0, [255, 0, 0]);

    // The mock's frame was taken; subsequent reads are empty and must not
    // clear the slot.
    sleep(Duration::from_millis(80)).await;
    assert!(r.video.frame().await.is_some());
    r.video.stop().await.unwrap();
}

#[tokio::test]
async fn telemetry_fields_degrade_independently() {
    let r = rig();
    r.link.set_field(TelemetryField::Battery, Ok(87));
    r.link.set_field(TelemetryField::Temperature, Err(ReadError::Unavailable));
    r.link.set_field(TelemetryField::Height, Ok(10));
    r.link.set_field(TelemetryField::Barometer, Ok(123));
    r.link.set_field(TelemetryField::FlightTime, Ok(5));

    r.telemetry.poll_once().await;
    let snap = r.telemetry.snapshot().await;
    assert_eq!(snap.battery_percent, Some(87));
    assert_eq!(snap.temperature, None);
    assert_eq!(snap.height, Some(10));
    assert_eq!(snap.barometer, Some(123));
    assert_eq!(snap.flight_time_secs, Some(5));
}

#[tokio::test]
async fn flight_time_retains_last_known_value() {
    let r = rig();
    r.link.set_field(TelemetryField::Battery, Ok(87));
    r.link.set_field(TelemetryField::FlightTime, Ok(5));
    r.telemetry.poll_once().await;

    r.link.set_field(TelemetryField::FlightTime, Err(ReadError::Stale));
    r.link.set_field(TelemetryField::Battery, Err(ReadError::Stale));
    r.telemetry.poll_once().await;

    let snap = r.telemetry.snapshot().await;
    assert_eq!(snap.flight_time_secs, Some(5));
    // Every other field blanks normally.
    assert_eq!(snap.battery_percent, None);
}
