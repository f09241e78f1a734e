use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    channel::ChannelId,
    config::SimConfig,
    mobility::{MobilityState, Vec3},
};

/// Index of a drone, `0..drone_count`.
pub type DroneId = usize;

/// One aerial node.
#[derive(Debug, Clone, PartialEq)]
pub struct Drone {
    pub id: DroneId,
    pub mobility: MobilityState,
    /// Speed the drone was launched with.
    pub initial_speed: f64,
    pub channel: ChannelId,
    /// Joules left. Drained by the energy model, if one is installed.
    pub residual_energy: f64,
}

impl Drone {
    pub fn new(
        id: DroneId,
        mobility: MobilityState,
        initial_speed: f64,
        channel: ChannelId,
        residual_energy: f64,
    ) -> Self {
        Self {
            id,
            initial_speed,
            mobility,
            channel,
            residual_energy,
        }
    }

    pub fn position(&self) -> Vec3 {
        self.mobility.position
    }

    pub fn snapshot(&self) -> DroneSnapshot {
        let Vec3 { x, y, z } = self.mobility.position;
        DroneSnapshot {
            id: self.id,
            x,
            y,
            z,
            speed: self.initial_speed,
        }
    }
}

/// What presentation layers see of a drone at construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DroneSnapshot {
    pub id: DroneId,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub speed: f64,
}

/// Uniform position inside the flyable interior of the map.
pub fn random_position<R: Rng + ?Sized>(config: &SimConfig, rng: &mut R) -> Vec3 {
    let (lo, hi) = config.interior();
    let mut axis = |i: usize| {
        if lo[i] < hi[i] {
            rng.random_range(lo[i]..=hi[i])
        } else {
            lo[i]
        }
    };
    let x = axis(0);
    let y = axis(1);
    let z = axis(2);
    Vec3::new(x, y, z)
}

/// Launch speed: the configured default, or a uniform integer from the speed range
/// when speeds are heterogeneous.
pub fn initial_speed<R: Rng + ?Sized>(config: &SimConfig, rng: &mut R) -> f64 {
    if config.heterogeneous_speed {
        let (min, max) = config.speed_range;
        f64::from(rng.random_range(min..=max))
    } else {
        config.default_speed
    }
}
