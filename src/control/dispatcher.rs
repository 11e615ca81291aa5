use super::intent::{IntentCell, VelocityIntent};
use crate::link::VehicleLink;
use crate::{error, event, info, log};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Periodic velocity uplink. Runs on its own fixed-period timer, reads the
/// latest intent and transmits it, independent of input sampling and render
/// cadence. Send failures are logged and never retried: a stale velocity
/// command is worse than a dropped one, the next tick supersedes it.
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Fixed control period of the velocity uplink.
    pub const COMMAND_PERIOD: Duration = Duration::from_millis(50);
    /// Consecutive send failures before the link is reported as lost.
    const LINK_FAULT_STREAK: u32 = 20;

    /// Spawns the dispatch loop. Cancelling the token makes the loop send
    /// one final awaited zero-velocity command before the task finishes;
    /// callers must join the handle before releasing the link.
    pub fn spawn(
        link: Arc<dyn VehicleLink>,
        intent: Arc<IntentCell>,
        link_fault: Arc<Notify>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(Self::run(link, intent, link_fault, cancel))
    }

    async fn run(
        link: Arc<dyn VehicleLink>,
        intent: Arc<IntentCell>,
        link_fault: Arc<Notify>,
        cancel: CancellationToken,
    ) {
        let mut tick = tokio::time::interval(Self::COMMAND_PERIOD);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut fault_streak: u32 = 0;
        info!("Command dispatcher running at {:?} period.", Self::COMMAND_PERIOD);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let v = intent.load();
                    match link.set_velocity(v.x, v.y, v.z, v.yaw).await {
                        Ok(()) => fault_streak = 0,
                        Err(e) => {
                            log!("Velocity send failed: {e}. Next tick supersedes.");
                            fault_streak += 1;
                            if fault_streak == Self::LINK_FAULT_STREAK {
                                error!("{fault_streak} consecutive send failures. Reporting link loss.");
                                link_fault.notify_one();
                            }
                        }
                    }
                }
                () = cancel.cancelled() => break,
            }
        }
        // Final halt command. Awaited here so the join in the shutdown
        // sequence guarantees it went out before the link closes.
        let halt = VelocityIntent::ZERO;
        if let Err(e) = link.set_velocity(halt.x, halt.y, halt.z, halt.yaw).await {
            error!("Final zero-velocity send failed: {e}.");
        }
        event!("Command dispatcher stopped.");
    }
}
