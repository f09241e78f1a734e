//! Discrete-event simulation of drone ad hoc networks.
//!
//! A single-threaded kernel drives cooperative processes over a shared radio
//! medium. Drones move under a 3-D Gauss-Markov model, pick 802.11b sub-channels
//! and feed a metrics accumulator that is summarized once, at the horizon.

pub mod channel;
pub mod config;
pub mod drone;
pub mod error;
pub mod kernel;
pub mod medium;
pub mod metrics;
pub mod mobility;
pub mod process;
pub mod rng;
pub mod simulator;
pub mod trace;

pub use error::{RunFailure, SimError};

pub mod prelude {
    pub use crate::{
        channel::{ChannelAssigner, ChannelId, ChannelMode},
        config::{MapBounds, MobilityConfig, SimConfig},
        drone::{Drone, DroneId, DroneSnapshot},
        kernel::{Continuation, EventHandle, Kernel, RunSummary, Time, MICROS_PER_SECOND},
        medium::{FixedRange, LinkBudget, Medium, ScopedHold},
        metrics::{Metric, Metrics, MetricsReport},
        mobility::{EnergyModel, GaussMarkov3D, MobilityState, Vec3},
        process::{Action, Context, Process, ProcessId, ProcessState, Wake},
        rng::{derive_stream, RngState, StreamPurpose},
        simulator::{new_simulator, LogReporter, NullReporter, Reporter, Simulator, World},
        trace::{CommunicationEvent, CommunicationLog, PacketKind, PositionTrack, TrackPoint},
        RunFailure, SimError,
    };
}
