use serde::{Deserialize, Serialize};

use crate::{channel::ChannelMode, kernel::Time, SimError};

/// Extent of the simulated airspace. Every axis starts at zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapBounds {
    pub length: f64,
    pub width: f64,
    pub height: f64,
}

impl Default for MapBounds {
    fn default() -> Self {
        Self {
            length: 600.0,
            width: 600.0,
            height: 120.0,
        }
    }
}

impl MapBounds {
    pub fn max(&self) -> [f64; 3] {
        [self.length, self.width, self.height]
    }
}

/// Parameters of the 3-D Gauss-Markov process.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MobilityConfig {
    /// How often positions are integrated (us).
    pub position_update_interval: Time,
    /// How often speed, heading and pitch are resampled (us).
    pub direction_update_interval: Time,
    /// Memory coefficient of the process.
    pub alpha: f64,
    /// Distance kept from each wall, per axis.
    pub buffer: [f64; 3],
}

impl Default for MobilityConfig {
    fn default() -> Self {
        Self {
            position_update_interval: 100_000,
            direction_update_interval: 500_000,
            alpha: 0.85,
            buffer: [1.0, 1.0, 1.0],
        }
    }
}

/// Configuration of a single simulation run. Built once, then handed by reference
/// to every component that needs it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub seed: u64,
    pub drone_count: u32,
    pub horizon: Time,
    pub heterogeneous_speed: bool,
    pub default_speed: f64,
    /// Inclusive integer speed range used when `heterogeneous_speed` is set.
    pub speed_range: (u32, u32),
    pub map: MapBounds,
    pub mobility: MobilityConfig,
    pub static_case: bool,
    pub max_range: f64,
    pub progress_interval: Time,
    pub track_interval: Option<Time>,
    pub channel_mode: ChannelMode,
    pub initial_energy: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 2025,
            drone_count: 10,
            horizon: 10_000_000,
            heterogeneous_speed: false,
            default_speed: 10.0,
            speed_range: (5, 60),
            map: MapBounds::default(),
            mobility: MobilityConfig::default(),
            static_case: false,
            max_range: 250.0,
            progress_interval: 500_000,
            track_interval: Some(20_000),
            channel_mode: ChannelMode::Ieee80211b,
            initial_energy: 20_000.0,
        }
    }
}

impl SimConfig {
    /// Create a new configuration with default physical parameters.
    pub fn new(seed: u64, drone_count: u32, horizon: Time) -> Self {
        Self {
            seed,
            drone_count,
            horizon,
            ..Self::default()
        }
    }

    pub fn with_heterogeneous_speed(mut self, heterogeneous: bool) -> Self {
        self.heterogeneous_speed = heterogeneous;
        self
    }

    pub fn with_map(mut self, map: MapBounds) -> Self {
        self.map = map;
        self
    }

    pub fn with_mobility(mut self, mobility: MobilityConfig) -> Self {
        self.mobility = mobility;
        self
    }

    /// Freeze every drone in place. Kinematics are still sampled.
    pub fn with_static_case(mut self, static_case: bool) -> Self {
        self.static_case = static_case;
        self
    }

    pub fn with_max_range(mut self, max_range: f64) -> Self {
        self.max_range = max_range;
        self
    }

    pub fn with_progress_interval(mut self, interval: Time) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Sampling period of the position history, `None` disables it.
    pub fn with_track_interval(mut self, interval: Option<Time>) -> Self {
        self.track_interval = interval;
        self
    }

    pub fn with_channel_mode(mut self, mode: ChannelMode) -> Self {
        self.channel_mode = mode;
        self
    }

    pub fn with_initial_energy(mut self, joules: f64) -> Self {
        self.initial_energy = joules;
        self
    }

    /// Lower and upper reachable coordinate on each axis once the wall buffer is applied.
    pub fn interior(&self) -> ([f64; 3], [f64; 3]) {
        let max = self.map.max();
        let b = self.mobility.buffer;
        (
            [b[0], b[1], b[2]],
            [max[0] - b[0], max[1] - b[1], max[2] - b[2]],
        )
    }

    /// Validate that all fields describe a runnable simulation
    pub fn validate(&self) -> Result<(), SimError> {
        if self.drone_count == 0 {
            return Err(SimError::ConfigError(
                "Drone count must be positive".to_string(),
            ));
        }
        if self.horizon == 0 {
            return Err(SimError::ConfigError(
                "Horizon must be positive".to_string(),
            ));
        }
        if self.map.max().iter().any(|&extent| !(extent > 0.0)) {
            return Err(SimError::ConfigError(format!(
                "Map extents must be positive, got {:?}",
                self.map.max()
            )));
        }
        let (lo, hi) = self.interior();
        for axis in 0..3 {
            if !(self.mobility.buffer[axis] >= 0.0 && lo[axis] <= hi[axis]) {
                return Err(SimError::ConfigError(format!(
                    "Buffer on axis {axis} leaves no interior to fly in"
                )));
            }
        }
        if !(self.mobility.alpha > 0.0 && self.mobility.alpha < 1.0) {
            return Err(SimError::ConfigError(format!(
                "Memory coefficient must lie in (0, 1), got {}",
                self.mobility.alpha
            )));
        }
        let step = self.mobility.position_update_interval;
        if step == 0 {
            return Err(SimError::ConfigError(
                "Position update interval must be positive".to_string(),
            ));
        }
        let turn = self.mobility.direction_update_interval;
        if turn == 0 || turn % step != 0 {
            return Err(SimError::ConfigError(format!(
                "Direction update interval {turn}us is not a multiple of the position update interval {step}us"
            )));
        }
        if !(self.max_range > 0.0) {
            return Err(SimError::ConfigError(
                "Maximum communication range must be positive".to_string(),
            ));
        }
        if self.progress_interval == 0 {
            return Err(SimError::ConfigError(
                "Progress interval must be positive".to_string(),
            ));
        }
        if self.track_interval == Some(0) {
            return Err(SimError::ConfigError(
                "Track interval must be positive".to_string(),
            ));
        }
        if self.speed_range.0 > self.speed_range.1 {
            return Err(SimError::ConfigError(format!(
                "Speed range [{}, {}] is empty",
                self.speed_range.0, self.speed_range.1
            )));
        }
        Ok(())
    }
}
