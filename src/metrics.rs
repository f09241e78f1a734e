//! Network performance accounting.
//!
//! Traffic collaborators record raw observations while the run is in progress; the
//! summary statistics are computed once, at finalization. Nothing recorded after
//! that point is counted.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use serde::{Deserialize, Serialize};

use crate::{kernel::Time, SimError};

/// A summary statistic that has a denominator and may therefore be undefined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    E2eDelay,
    Throughput,
    HopCount,
    RoutingLoad,
    MacDelay,
}

impl Metric {
    pub fn name(&self) -> &'static str {
        match self {
            Metric::E2eDelay => "mean end-to-end delay",
            Metric::Throughput => "mean throughput",
            Metric::HopCount => "mean hop count",
            Metric::RoutingLoad => "routing load",
            Metric::MacDelay => "mean MAC delay",
        }
    }
}

/// Final statistics of a run. Undefined ratios are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub generated: u64,
    pub arrived: u64,
    /// Percentage of generated data packets that reached their destination.
    pub delivery_ratio: f64,
    /// Microseconds.
    pub mean_e2e_delay: Option<f64>,
    /// Bytes per second.
    pub mean_throughput: Option<f64>,
    pub mean_hop_count: Option<f64>,
    /// Control packets sent per delivered data packet.
    pub routing_load: Option<f64>,
    /// Microseconds.
    pub mean_mac_delay: Option<f64>,
    pub control_packets: u64,
    pub collisions: u64,
}

impl MetricsReport {
    pub fn get(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::E2eDelay => self.mean_e2e_delay,
            Metric::Throughput => self.mean_throughput,
            Metric::HopCount => self.mean_hop_count,
            Metric::RoutingLoad => self.routing_load,
            Metric::MacDelay => self.mean_mac_delay,
        }
    }

    /// The value of `metric`, or `DivisionUndefined` when it has no samples.
    pub fn require(&self, metric: Metric) -> Result<f64, SimError> {
        self.get(metric).ok_or(SimError::DivisionUndefined {
            metric: metric.name(),
        })
    }
}

fn show(f: &mut fmt::Formatter<'_>, label: &str, value: Option<f64>, unit: &str) -> fmt::Result {
    match value {
        Some(v) => writeln!(f, "{label}: {v:.2}{unit}"),
        None => writeln!(f, "{label}: undefined"),
    }
}

impl fmt::Display for MetricsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "data packets generated: {}", self.generated)?;
        writeln!(f, "packet delivery ratio: {:.2} %", self.delivery_ratio)?;
        show(f, "average end-to-end delay", self.mean_e2e_delay.map(|us| us / 1e3), " ms")?;
        show(f, "routing load", self.routing_load, "")?;
        show(f, "average throughput", self.mean_throughput.map(|bps| bps / 1e3), " kB/s")?;
        show(f, "average hop count", self.mean_hop_count, "")?;
        writeln!(f, "collisions: {}", self.collisions)?;
        show(f, "average MAC delay", self.mean_mac_delay.map(|us| us / 1e3), " ms")
    }
}

fn mean<I: IntoIterator<Item = f64>>(values: I) -> Option<f64> {
    let (sum, n) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// Run-long accumulator. Ordered collections keep the report independent of
/// insertion history.
#[derive(Debug, Default, Clone)]
pub struct Metrics {
    generated: BTreeSet<u64>,
    arrived: BTreeSet<u64>,
    control_packets: u64,
    collisions: u64,
    delivery_times: BTreeMap<u64, Time>,
    throughput: BTreeMap<u64, f64>,
    hop_counts: BTreeMap<u64, u32>,
    mac_delays: Vec<Time>,
    sealed: bool,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn accepting(&self, what: &str) -> bool {
        if self.sealed {
            log::warn!("ignoring {what} recorded after the metrics were summarized");
        }
        !self.sealed
    }

    fn require_arrived(&self, packet_id: u64) -> Result<(), SimError> {
        if self.arrived.contains(&packet_id) {
            Ok(())
        } else {
            Err(SimError::PacketNotArrived(packet_id))
        }
    }

    pub fn record_generated(&mut self, packet_id: u64) {
        if self.accepting("generated packet") && !self.generated.insert(packet_id) {
            log::debug!("packet {packet_id} generated twice");
        }
    }

    /// Mark a data packet delivered, `delivery_time` after it was generated. A second
    /// arrival of the same packet replaces the first delay.
    pub fn record_arrived(&mut self, packet_id: u64, delivery_time: Time) -> Result<(), SimError> {
        if !self.accepting("arrival") {
            return Ok(());
        }
        if !self.generated.contains(&packet_id) {
            return Err(SimError::UnknownPacket(packet_id));
        }
        self.arrived.insert(packet_id);
        self.delivery_times.insert(packet_id, delivery_time);
        Ok(())
    }

    pub fn record_control_packet(&mut self) {
        if self.accepting("control packet") {
            self.control_packets += 1;
        }
    }

    pub fn record_collision(&mut self) {
        if self.accepting("collision") {
            self.collisions += 1;
        }
    }

    pub fn record_throughput_sample(
        &mut self,
        packet_id: u64,
        bytes_per_second: f64,
    ) -> Result<(), SimError> {
        if !self.accepting("throughput sample") {
            return Ok(());
        }
        self.require_arrived(packet_id)?;
        self.throughput.insert(packet_id, bytes_per_second);
        Ok(())
    }

    pub fn record_hop_count(&mut self, packet_id: u64, hops: u32) -> Result<(), SimError> {
        if !self.accepting("hop count") {
            return Ok(());
        }
        self.require_arrived(packet_id)?;
        self.hop_counts.insert(packet_id, hops);
        Ok(())
    }

    pub fn record_mac_delay(&mut self, delay: Time) {
        if self.accepting("MAC delay") {
            self.mac_delays.push(delay);
        }
    }

    pub fn generated_count(&self) -> u64 {
        self.generated.len() as u64
    }

    pub fn arrived_count(&self) -> u64 {
        self.arrived.len() as u64
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Statistics over everything recorded so far, without finalizing.
    pub fn snapshot(&self) -> MetricsReport {
        let generated = self.generated_count();
        let arrived = self.arrived_count();
        let delivery_ratio = if generated == 0 {
            0.0
        } else {
            arrived as f64 / generated as f64 * 100.0
        };
        MetricsReport {
            generated,
            arrived,
            delivery_ratio,
            mean_e2e_delay: mean(self.delivery_times.values().map(|&t| t as f64)),
            mean_throughput: mean(self.throughput.values().copied()),
            mean_hop_count: mean(self.hop_counts.values().map(|&h| f64::from(h))),
            routing_load: (arrived > 0).then(|| self.control_packets as f64 / arrived as f64),
            mean_mac_delay: mean(self.mac_delays.iter().map(|&t| t as f64)),
            control_packets: self.control_packets,
            collisions: self.collisions,
        }
    }

    /// Compute the final report and stop accepting records. Only succeeds once.
    pub fn summarize(&mut self) -> Result<MetricsReport, SimError> {
        if self.sealed {
            return Err(SimError::AlreadySummarized);
        }
        self.sealed = true;
        Ok(self.snapshot())
    }
}
