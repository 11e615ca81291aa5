use strum_macros::Display;

/// Connection-level failure of the vehicle link itself. Surfaced to the
/// operator and only ever retried on an explicit re-trigger.
#[derive(Debug, Display)]
pub enum LinkError {
    NoConnection,
    Timeout,
    Refused(String),
    Io(std::io::Error),
}

impl std::error::Error for LinkError {}
impl From<std::io::Error> for LinkError {
    fn from(value: std::io::Error) -> Self { LinkError::Io(value) }
}

/// A single command (velocity/takeoff/land/maneuver) failed to transmit or
/// was rejected by the vehicle. Velocity commands are perishable and never
/// retried, the next tick supersedes them.
#[derive(Debug, Display)]
pub enum CommandError {
    Timeout,
    Rejected(String),
    Io(std::io::Error),
}

impl std::error::Error for CommandError {}
impl From<std::io::Error> for CommandError {
    fn from(value: std::io::Error) -> Self { CommandError::Io(value) }
}

impl From<LinkError> for CommandError {
    fn from(value: LinkError) -> Self {
        match value {
            LinkError::Timeout => CommandError::Timeout,
            LinkError::Refused(msg) => CommandError::Rejected(msg),
            LinkError::Io(e) => CommandError::Io(e),
            LinkError::NoConnection => {
                CommandError::Rejected("link not connected".to_string())
            }
        }
    }
}

/// A telemetry field read failed. Degrades that single field to
/// "unavailable" without affecting its siblings.
#[derive(Debug, Display, PartialEq, Eq, Clone)]
pub enum ReadError {
    Unavailable,
    Stale,
    Malformed(String),
}

impl std::error::Error for ReadError {}
