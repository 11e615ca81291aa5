use crate::link::{LinkError, RawFrame, VehicleLink};
use crate::{event, info, log};
use std::sync::Arc;
use std::time::Duration;
use strum_macros::Display;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lifecycle of the video pull loop. Guards against toggling racing a
/// still-running loop against a fresh start.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Off,
    Starting,
    On,
    Stopping,
}

/// Pulls the latest frame from the link while streaming is on, applies the
/// display's horizontal mirror and publishes it into a single overwrite
/// slot. No backlog: a slow consumer sees an older frame, never blocks the
/// producer.
pub struct VideoAcquirer {
    link: Arc<dyn VehicleLink>,
    state: Arc<RwLock<StreamState>>,
    frame: Arc<RwLock<Option<RawFrame>>>,
    /// Serializes start/stop transitions and owns the running loop.
    worker: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl VideoAcquirer {
    /// Pull cadence of the frame loop.
    pub const VIDEO_PULL_PERIOD: Duration = Duration::from_millis(33);

    pub fn new(link: Arc<dyn VehicleLink>) -> Self {
        Self {
            link,
            state: Arc::new(RwLock::new(StreamState::Off)),
            frame: Arc::new(RwLock::new(None)),
            worker: Mutex::new(None),
        }
    }

    pub async fn state(&self) -> StreamState { *self.state.read().await }

    /// Latest mirrored frame, or `None` while streaming is off or before
    /// the first frame arrived.
    pub async fn frame(&self) -> Option<RawFrame> { self.frame.read().await.clone() }

    /// Off -> Starting -> On. No-op unless the stream is fully off, so
    /// sequential toggles converge instead of racing.
    pub async fn start(&self) -> Result<(), LinkError> {
        let mut worker = self.worker.lock().await;
        if *self.state.read().await != StreamState::Off {
            log!("Video stream already active. Ignoring start.");
            return Ok(());
        }
        *self.state.write().await = StreamState::Starting;
        if let Err(e) = self.link.start_video().await {
            *self.state.write().await = StreamState::Off;
            return Err(e);
        }
        let cancel = CancellationToken::new();
        let handle = Self::spawn_pull_loop(
            Arc::clone(&self.link),
            Arc::clone(&self.frame),
            cancel.clone(),
        );
        *worker = Some((cancel, handle));
        *self.state.write().await = StreamState::On;
        info!("Video stream on.");
        Ok(())
    }

    /// On -> Stopping -> Off. The pull loop is joined before `stop_video`
    /// goes out, so no frame read can race the torn-down stream.
    pub async fn stop(&self) -> Result<(), LinkError> {
        let mut worker = self.worker.lock().await;
        if *self.state.read().await != StreamState::On {
            log!("Video stream not on. Ignoring stop.");
            return Ok(());
        }
        *self.state.write().await = StreamState::Stopping;
        if let Some((cancel, handle)) = worker.take() {
            cancel.cancel();
            handle.await.ok();
        }
        let res = self.link.stop_video().await;
        self.frame.write().await.take();
        *self.state.write().await = StreamState::Off;
        info!("Video stream off.");
        res
    }

    fn spawn_pull_loop(
        link: Arc<dyn VehicleLink>,
        frame: Arc<RwLock<Option<RawFrame>>>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Self::VIDEO_PULL_PERIOD);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        // An empty read is "no new frame", the slot keeps
                        // the previous one.
                        if let Some(raw) = link.read_frame().await {
                            *frame.write().await = Some(raw.into_mirrored());
                        }
                    }
                    () = cancel.cancelled() => break,
                }
            }
            event!("Video pull loop stopped.");
        })
    }
}
