//! 3-D Gauss-Markov mobility.
//!
//! Speed, heading and pitch follow a memoried process: each resample blends the
//! previous value, a long-run mean and fresh Gaussian noise, weighted by the memory
//! coefficient `alpha`. Positions are integrated every tick; kinematics are
//! resampled on a coarser, aligned period. Drones bounce off a buffer zone kept
//! along every wall.

use std::ops::{Add, Mul, Sub};

use bytemuck::{Pod, Zeroable};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::{
    config::SimConfig,
    drone::DroneId,
    kernel::{Time, MICROS_PER_SECOND},
    process::{Action, Context, Process, Wake},
    rng::RngState,
    simulator::World,
    SimError,
};

#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
#[repr(C)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

unsafe impl Zeroable for Vec3 {}
unsafe impl Pod for Vec3 {}

impl Vec3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn from_array(v: [f64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    pub fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn distance(&self, other: &Vec3) -> f64 {
        (*self - *other).norm()
    }

    /// Velocity of the given speed along a heading and pitch (radians).
    pub fn from_spherical(speed: f64, heading: f64, pitch: f64) -> Self {
        Self::new(
            speed * heading.cos() * pitch.cos(),
            speed * heading.sin() * pitch.cos(),
            speed * pitch.sin(),
        )
    }
}

impl Add for Vec3 {
    type Output = Vec3;
    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;
    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vec3 {
    type Output = Vec3;
    fn mul(self, rhs: f64) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// Kinematic state of one drone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MobilityState {
    pub position: Vec3,
    pub velocity: Vec3,
    /// Heading in the XY plane, radians.
    pub direction: f64,
    /// Elevation above the XY plane, radians.
    pub pitch: f64,
    pub direction_mean: f64,
    pub pitch_mean: f64,
    pub velocity_mean: f64,
}

impl MobilityState {
    /// A drone at `position` flying at `speed` along `direction` and `pitch`, with
    /// the long-run means equal to the starting values.
    pub fn new(position: Vec3, speed: f64, direction: f64, pitch: f64) -> Self {
        Self {
            position,
            velocity: Vec3::from_spherical(speed, direction, pitch),
            direction,
            pitch,
            direction_mean: direction,
            pitch_mean: pitch,
            velocity_mean: speed,
        }
    }

    pub fn speed(&self) -> f64 {
        self.velocity.norm()
    }
}

/// The Gauss-Markov update rule. Holds only parameters; the state lives on the drone.
#[derive(Debug, Clone, Copy)]
pub struct GaussMarkov3D {
    position_update_interval: Time,
    direction_update_interval: Time,
    alpha: f64,
    lower: [f64; 3],
    upper: [f64; 3],
    static_case: bool,
}

impl GaussMarkov3D {
    pub fn new(config: &SimConfig) -> Self {
        let (lower, upper) = config.interior();
        Self {
            position_update_interval: config.mobility.position_update_interval,
            direction_update_interval: config.mobility.direction_update_interval,
            alpha: config.mobility.alpha,
            lower,
            upper,
            static_case: config.static_case,
        }
    }

    pub fn tick(&self) -> Time {
        self.position_update_interval
    }

    /// Advance `state` by one tick ending at `now`.
    pub fn step<R: Rng + ?Sized>(&self, state: &mut MobilityState, now: Time, rng: &mut R) {
        let dt = self.position_update_interval as f64 / MICROS_PER_SECOND as f64;
        let proposed = if self.static_case {
            state.position
        } else {
            state.position + state.velocity * dt
        };

        if now % self.direction_update_interval == 0 {
            let alpha = self.alpha;
            let keep = 1.0 - alpha;
            let noise = (1.0 - alpha * alpha).sqrt();
            let mut blend = |previous: f64, mean: f64| {
                let n: f64 = rng.sample(StandardNormal);
                alpha * previous + keep * mean + noise * n
            };
            // A negative speed is kept: it flips the direction through the projection.
            let speed = blend(state.speed(), state.velocity_mean);
            let direction = blend(state.direction, state.direction_mean);
            let pitch = blend(state.pitch, state.pitch_mean);
            state.direction = direction;
            state.pitch = pitch;
            state.velocity = Vec3::from_spherical(speed, direction, pitch);
        }

        self.rebound(state, proposed);
    }

    /// Reflect off any wall the proposed position reaches, then clamp into the interior.
    pub fn rebound(&self, state: &mut MobilityState, proposed: Vec3) {
        let p = proposed.to_array();
        let outside = |axis: usize| p[axis] < self.lower[axis] || p[axis] > self.upper[axis];

        if outside(0) {
            state.velocity.x = -state.velocity.x;
            state.direction_mean = std::f64::consts::PI - state.direction_mean;
            state.direction = std::f64::consts::PI - state.direction;
        }
        if outside(1) {
            state.velocity.y = -state.velocity.y;
            state.direction_mean = -state.direction_mean;
            state.direction = -state.direction;
        }
        if outside(2) {
            state.velocity.z = -state.velocity.z;
            state.pitch_mean = -state.pitch_mean;
            state.pitch = -state.pitch;
        }

        state.position = Vec3::new(
            p[0].clamp(self.lower[0], self.upper[0]),
            p[1].clamp(self.lower[1], self.upper[1]),
            p[2].clamp(self.lower[2], self.upper[2]),
        );
    }
}

/// Power drawn by a drone flying at a given speed, in watts.
pub trait EnergyModel {
    fn power(&self, speed: f64) -> f64;
}

/// Per-drone process advancing the drone once per tick.
pub struct MobilityProcess {
    drone: DroneId,
    model: GaussMarkov3D,
    rng: RngState,
}

impl MobilityProcess {
    pub fn new(drone: DroneId, model: GaussMarkov3D, rng: RngState) -> Self {
        Self { drone, model, rng }
    }
}

impl Process<World> for MobilityProcess {
    fn resume(&mut self, ctx: &mut Context<'_, World>, wake: Wake) -> Result<Action, SimError> {
        let now = ctx.now();
        let world = &mut *ctx.world;
        let drone = world
            .drones
            .get_mut(self.drone)
            .ok_or(SimError::UnknownResource(self.drone))?;

        if !matches!(wake, Wake::Start) {
            if let Some(energy) = &world.energy_model {
                let seconds = self.model.tick() as f64 / MICROS_PER_SECOND as f64;
                drone.residual_energy -= seconds * energy.power(drone.mobility.speed());
            }
        }
        self.model.step(&mut drone.mobility, now, &mut self.rng);
        Ok(Action::Timeout(self.model.tick()))
    }

    fn kind(&self) -> &'static str {
        "mobility"
    }

    fn owner(&self) -> Option<DroneId> {
        Some(self.drone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{MapBounds, MobilityConfig},
        rng::{derive_stream, StreamPurpose},
    };

    fn model() -> GaussMarkov3D {
        GaussMarkov3D::new(&SimConfig::new(2025, 1, 1_000_000).with_map(MapBounds {
            length: 100.0,
            width: 100.0,
            height: 50.0,
        }))
    }

    #[test]
    fn x_wall_rebound_flips_velocity_and_clamps() {
        let model = model();
        let mut state = MobilityState::new(Vec3::new(1.0, 50.0, 25.0), 10.0, std::f64::consts::PI, 0.0);
        let mean_before = state.direction_mean;
        assert!(state.velocity.x < 0.0);
        let mut rng = derive_stream(1, 0, StreamPurpose::Mobility);

        // 100 ms is not on a direction boundary, so velocity is not resampled.
        model.step(&mut state, 100_000, &mut rng);

        assert!(state.velocity.x > 0.0);
        assert_eq!(state.position.x, 1.0);
        assert_eq!(state.position.y, 50.0);
        assert!((state.direction_mean - (std::f64::consts::PI - mean_before)).abs() < 1e-12);
    }

    #[test]
    fn velocity_held_between_resamples() {
        let model = model();
        let mut state = MobilityState::new(Vec3::new(50.0, 50.0, 25.0), 10.0, 0.3, 0.1);
        let before = state;
        let mut rng = derive_stream(1, 0, StreamPurpose::Mobility);
        model.step(&mut state, 200_000, &mut rng);
        assert_eq!(state.velocity, before.velocity);
        assert_eq!(state.direction, before.direction);
        let expected = before.position + before.velocity * 0.1;
        assert!(state.position.distance(&expected) < 1e-9);
    }

    #[test]
    fn resample_fires_on_aligned_ticks() {
        let model = model();
        let mut state = MobilityState::new(Vec3::new(50.0, 50.0, 25.0), 10.0, 0.3, 0.1);
        let before = state;
        let mut rng = derive_stream(1, 0, StreamPurpose::Mobility);
        model.step(&mut state, 500_000, &mut rng);
        assert_ne!(state.velocity, before.velocity);
        assert_ne!(state.direction, before.direction);
    }

    #[test]
    fn negative_speed_is_not_clamped() {
        let model = model();
        let mut state = MobilityState::new(Vec3::new(50.0, 50.0, 25.0), 0.0, 0.0, 0.0);
        state.velocity_mean = -100.0;
        let mut rng = derive_stream(3, 0, StreamPurpose::Mobility);
        model.step(&mut state, 0, &mut rng);
        let heading = Vec3::from_spherical(1.0, state.direction, state.pitch);
        let along = state.velocity.x * heading.x + state.velocity.y * heading.y + state.velocity.z * heading.z;
        assert!(along < 0.0);
    }

    #[test]
    fn static_case_keeps_position() {
        let config = SimConfig::new(2025, 1, 1_000_000).with_static_case(true);
        let model = GaussMarkov3D::new(&config);
        let mut state = MobilityState::new(Vec3::new(300.0, 300.0, 60.0), 10.0, 1.0, 0.0);
        let mut rng = derive_stream(1, 0, StreamPurpose::Mobility);
        for tick in 0..20u64 {
            model.step(&mut state, tick * 100_000, &mut rng);
        }
        assert_eq!(state.position, Vec3::new(300.0, 300.0, 60.0));
    }

    #[test]
    fn positions_stay_inside_buffered_map() {
        let config = SimConfig::new(9, 1, 1_000_000)
            .with_map(MapBounds {
                length: 40.0,
                width: 40.0,
                height: 10.0,
            })
            .with_mobility(MobilityConfig {
                buffer: [2.0, 2.0, 1.0],
                ..MobilityConfig::default()
            });
        let model = GaussMarkov3D::new(&config);
        let (lo, hi) = config.interior();
        let mut state = MobilityState::new(Vec3::new(20.0, 20.0, 5.0), 60.0, 0.7, 0.4);
        let mut rng = derive_stream(9, 0, StreamPurpose::Mobility);
        for tick in 0..5_000u64 {
            model.step(&mut state, tick * 100_000, &mut rng);
            let p = state.position.to_array();
            for axis in 0..3 {
                assert!(p[axis] >= lo[axis] && p[axis] <= hi[axis]);
            }
        }
    }
}
