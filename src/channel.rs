//! IEEE 802.11 sub-channel assignment.

use std::fmt;

use rand::{seq::IndexedRandom, Rng};
use serde::{Deserialize, Serialize};

use crate::SimError;

pub type ChannelId = u8;

/// Non-overlapping 802.11b channels in the 2.4 GHz band.
pub const NON_OVERLAPPING_80211B: [ChannelId; 3] = [1, 6, 11];

/// Channels closer than this overlap in 802.11b (22 MHz wide, 5 MHz spacing).
const OVERLAP_SPACING: u8 = 5;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelMode {
    #[default]
    #[serde(rename = "IEEE_802_11b")]
    Ieee80211b,
    #[serde(rename = "IEEE_802_11g")]
    Ieee80211g,
    #[serde(rename = "IEEE_802_11n")]
    Ieee80211n,
}

impl fmt::Display for ChannelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelMode::Ieee80211b => "IEEE 802.11b",
            ChannelMode::Ieee80211g => "IEEE 802.11g",
            ChannelMode::Ieee80211n => "IEEE 802.11n",
        };
        f.write_str(name)
    }
}

/// Stateless sub-channel policy for one radio mode. Randomness comes from the
/// caller's stream, so the assigner itself can be shared.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelAssigner {
    mode: ChannelMode,
}

impl ChannelAssigner {
    pub fn new(mode: ChannelMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ChannelMode {
        self.mode
    }

    fn supported(&self) -> Result<(), SimError> {
        match self.mode {
            ChannelMode::Ieee80211b => Ok(()),
            other => Err(SimError::UnsupportedMode(other)),
        }
    }

    /// Baseline: every drone transmits on channel 1.
    pub fn assign_without_coordination(&self) -> Result<ChannelId, SimError> {
        self.supported()?;
        Ok(1)
    }

    /// Pick one of the non-overlapping channels uniformly.
    pub fn assign_random_on_demand<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
    ) -> Result<ChannelId, SimError> {
        self.supported()?;
        NON_OVERLAPPING_80211B
            .choose(rng)
            .copied()
            .ok_or(SimError::UnsupportedMode(self.mode))
    }

    pub fn interferes(&self, a: ChannelId, b: ChannelId) -> Result<bool, SimError> {
        self.supported()?;
        Ok(a.abs_diff(b) < OVERLAP_SPACING)
    }

    /// The policy the simulator applies at construction.
    pub fn channel_assign(&self) -> Result<ChannelId, SimError> {
        self.assign_without_coordination()
    }
}
