//! Append-only histories read by presentation layers.

use std::collections::VecDeque;

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::{drone::DroneId, kernel::Time, mobility::Vec3};

/// One position sample.
#[derive(Debug, Copy, Clone, PartialEq)]
#[repr(C)]
pub struct TrackPoint {
    pub time: Time,
    pub drone: u64,
    pub position: Vec3,
}

unsafe impl Zeroable for TrackPoint {}
unsafe impl Pod for TrackPoint {}

/// Time-stamped position history of every drone, in sampling order.
#[derive(Debug, Default, Clone)]
pub struct PositionTrack {
    points: Vec<TrackPoint>,
}

impl PositionTrack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, time: Time, drone: DroneId, position: Vec3) {
        debug_assert!(
            self.points.last().map_or(true, |p| p.time <= time),
            "position samples out of order"
        );
        self.points.push(TrackPoint {
            time,
            drone: drone as u64,
            position,
        });
    }

    pub fn points(&self) -> &[TrackPoint] {
        &self.points
    }

    /// The history as raw bytes, for zero-copy export.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.points)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn trajectory(&self, drone: DroneId) -> impl Iterator<Item = &TrackPoint> + '_ {
        self.points.iter().filter(move |p| p.drone == drone as u64)
    }

    /// Last sample of `drone` taken at or before `time`.
    pub fn position_at(&self, drone: DroneId, time: Time) -> Option<Vec3> {
        let end = self.points.partition_point(|p| p.time <= time);
        self.points[..end]
            .iter()
            .rev()
            .find(|p| p.drone == drone as u64)
            .map(|p| p.position)
    }
}

/// Control packets carry ids from reserved ranges.
const HELLO_ID_BASE: u64 = 10_000;
const ACK_ID_BASE: u64 = 20_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketKind {
    Data,
    Hello,
    Ack,
}

impl PacketKind {
    pub fn classify(packet_id: u64) -> Self {
        if packet_id >= ACK_ID_BASE {
            PacketKind::Ack
        } else if packet_id >= HELLO_ID_BASE {
            PacketKind::Hello
        } else {
            PacketKind::Data
        }
    }
}

/// An observed unicast delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CommunicationEvent {
    pub src: DroneId,
    pub dst: DroneId,
    pub packet_id: u64,
    pub kind: PacketKind,
    pub time: Time,
}

#[derive(Debug, Default, Clone)]
pub struct CommunicationLog {
    events: VecDeque<CommunicationEvent>,
}

impl CommunicationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, src: DroneId, dst: DroneId, packet_id: u64, time: Time) {
        self.events.push_back(CommunicationEvent {
            src,
            dst,
            packet_id,
            kind: PacketKind::classify(packet_id),
            time,
        });
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommunicationEvent> + '_ {
        self.events.iter()
    }

    /// Events with `from <= time < to`.
    pub fn window(&self, from: Time, to: Time) -> impl Iterator<Item = &CommunicationEvent> + '_ {
        self.events
            .iter()
            .skip_while(move |e| e.time < from)
            .take_while(move |e| e.time < to)
    }

    /// Drop every event older than `time`. Returns how many were removed.
    pub fn prune_before(&mut self, time: Time) -> usize {
        let stale = self.events.partition_point(|e| e.time < time);
        self.events.drain(..stale);
        stale
    }
}
