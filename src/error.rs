use thiserror::Error;

use crate::{channel::ChannelMode, drone::DroneId, kernel::Time, metrics::MetricsReport};

/// Everything that can go wrong while building or running a simulation.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("negative delay {0}us requested from the scheduler")]
    InvalidDelay(i64),
    #[error("event requested at {requested}us, before the current time {now}us")]
    TimeTravel { requested: Time, now: Time },
    #[error("channel resource for drone {0} already exists")]
    DuplicateResource(DroneId),
    #[error("no channel resource registered for drone {0}")]
    UnknownResource(DroneId),
    #[error("no process with id {0}")]
    UnknownProcess(usize),
    #[error("channel mode {0} is not supported")]
    UnsupportedMode(ChannelMode),
    #[error("{metric} is undefined (zero denominator)")]
    DivisionUndefined { metric: &'static str },
    #[error("packet {0} was never generated")]
    UnknownPacket(u64),
    #[error("packet {0} never reached its destination")]
    PacketNotArrived(u64),
    #[error("metrics were already summarized")]
    AlreadySummarized,
    #[error("invalid configuration: {0}")]
    ConfigError(String),
    #[error("process panicked: {0}")]
    ProcessPanicked(String),
    #[error("process {pid} ({kind}, drone {owner:?}) failed at t={time}us")]
    ProcessFailed {
        time: Time,
        pid: usize,
        kind: &'static str,
        owner: Option<DroneId>,
        #[source]
        source: Box<SimError>,
    },
}

/// A run that stopped on a fatal error, with the metrics gathered up to that point.
#[derive(Debug, Error)]
#[error("simulation aborted: {error}")]
pub struct RunFailure {
    #[source]
    pub error: SimError,
    pub partial: MetricsReport,
}
