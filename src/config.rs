use std::env;

/// Link endpoints, overridable through the environment. Defaults match the
/// vehicle's factory network setup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address of the vehicle's command port.
    pub drone_addr: String,
    /// Local port the vehicle pushes its state datagrams to.
    pub state_port: u16,
    /// Local port the vehicle streams video datagrams to.
    pub video_port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        let drone_addr = env::var("HR_DRONE_ADDR")
            .unwrap_or_else(|_| "192.168.10.1:8889".to_string());
        let state_port =
            env::var("HR_STATE_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8890);
        let video_port =
            env::var("HR_VIDEO_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(11111);
        Self { drone_addr, state_port, video_port }
    }
}
