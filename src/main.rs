#![allow(dead_code, clippy::similar_names)]
#![warn(clippy::shadow_reuse, clippy::shadow_same, clippy::builtin_type_shadow)]
mod cockpit;
mod config;
mod control;
mod event;
mod link;
mod logger;

use crate::cockpit::Cockpit;
use crate::config::Config;
use crate::control::ControlKey;
use crate::event::ControlEvent;
use crate::link::{Maneuver, VehicleLink, udp::UdpDroneLink};
use std::{sync::Arc, time::Duration};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Input sample / render tick of the host loop. Independent of the
/// dispatcher's control period.
const HOST_TICK: Duration = Duration::from_millis(33);

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() {
    let config = Config::from_env();
    info!("Connecting to vehicle at {}.", config.drone_addr);
    let link: Arc<dyn VehicleLink> = match UdpDroneLink::bind(&config).await {
        Ok(l) => Arc::new(l),
        Err(e) => fatal!("Could not bind vehicle link: {e}"),
    };
    let cockpit = Arc::new(Cockpit::new(link));
    if let Err(e) = cockpit.supervisor().connect().await {
        fatal!("Could not reach the vehicle: {e}");
    }
    if let Some(batt) = cockpit.telemetry().await.battery_percent {
        info!("Battery at {batt}%.");
    }

    let mut events = spawn_stdin_driver();
    let link_fault = cockpit.supervisor().link_fault_monitor();
    let mut tick = tokio::time::interval(HOST_TICK);
    loop {
        tokio::select! {
            _ = tick.tick() => cockpit.sample_keys().await,
            ev = events.recv() => match ev {
                Some(ControlEvent::Quit) | None => {
                    info!("Quit requested.");
                    break;
                }
                Some(ev) => cockpit.handle_event(ev).await,
            },
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupt received.");
                break;
            }
            () = link_fault.notified() => {
                error!("Vehicle link lost. Forcing shutdown.");
                break;
            }
        }
    }
    cockpit.supervisor().shutdown().await;
}

/// Thin line-oriented input driver so the core is operable headless; a
/// graphical front-end replaces this by feeding the same channel.
fn spawn_stdin_driver() -> mpsc::Receiver<ControlEvent> {
    let (tx, rx) = mpsc::channel(32);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            for tok in line.split_whitespace() {
                let Some(ev) = parse_token(tok) else {
                    log!("Unknown input token '{tok}'.");
                    continue;
                };
                if tx.send(ev).await.is_err() {
                    return;
                }
            }
        }
        tx.send(ControlEvent::Quit).await.ok();
    });
    rx
}

/// `+w`/`-w` hold and release a control key; bare tokens are one-shot
/// actions (t)akeoff, (l)and, (v)ideo, (h)ud, (c)ontrols, (q)uit and the
/// four flips `ff fb fl fr`.
fn parse_token(tok: &str) -> Option<ControlEvent> {
    match tok {
        "t" => Some(ControlEvent::TakeoffRequested),
        "l" => Some(ControlEvent::LandRequested),
        "v" => Some(ControlEvent::ToggleVideo),
        "h" => Some(ControlEvent::ToggleHud),
        "c" => Some(ControlEvent::ToggleControlsOverlay),
        "q" => Some(ControlEvent::Quit),
        "ff" => Some(ControlEvent::Maneuver(Maneuver::FlipForward)),
        "fb" => Some(ControlEvent::Maneuver(Maneuver::FlipBack)),
        "fl" => Some(ControlEvent::Maneuver(Maneuver::FlipLeft)),
        "fr" => Some(ControlEvent::Maneuver(Maneuver::FlipRight)),
        _ => {
            if let Some(key) = tok.strip_prefix('+') {
                key_for(key).map(ControlEvent::KeyDown)
            } else if let Some(key) = tok.strip_prefix('-') {
                key_for(key).map(ControlEvent::KeyUp)
            } else {
                None
            }
        }
    }
}

fn key_for(name: &str) -> Option<ControlKey> {
    match name {
        "w" => Some(ControlKey::Forward),
        "s" => Some(ControlKey::Backward),
        "a" => Some(ControlKey::Left),
        "d" => Some(ControlKey::Right),
        "q" => Some(ControlKey::YawLeft),
        "e" => Some(ControlKey::YawRight),
        "sp" => Some(ControlKey::Ascend),
        "ct" => Some(ControlKey::Descend),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_map_to_events() {
        assert_eq!(parse_token("+w"), Some(ControlEvent::KeyDown(ControlKey::Forward)));
        assert_eq!(parse_token("-sp"), Some(ControlEvent::KeyUp(ControlKey::Ascend)));
        assert_eq!(parse_token("ff"), Some(ControlEvent::Maneuver(Maneuver::FlipForward)));
        assert_eq!(parse_token("q"), Some(ControlEvent::Quit));
        assert_eq!(parse_token("+q"), Some(ControlEvent::KeyDown(ControlKey::YawLeft)));
        assert_eq!(parse_token("x"), None);
    }
}
