//! Composition root: builds the drones, the medium and the kernel, and drives the
//! periodic bookkeeping processes.

use std::f64::consts::TAU;

use rand::Rng;

use crate::{
    channel::{ChannelAssigner, ChannelId},
    config::SimConfig,
    drone::{initial_speed, random_position, Drone, DroneId, DroneSnapshot},
    error::RunFailure,
    kernel::{Kernel, Time, MICROS_PER_SECOND},
    medium::{FixedRange, Medium},
    metrics::{Metrics, MetricsReport},
    mobility::{EnergyModel, GaussMarkov3D, MobilityProcess, MobilityState},
    process::{Action, Context, Process, ProcessId, Wake},
    rng::{derive_stream, RngState, StreamPurpose},
    trace::{CommunicationLog, PositionTrack},
    SimError,
};

/// Outward interface to presentation layers. Every method defaults to doing nothing.
pub trait Reporter {
    /// Human-readable progress, roughly every half second of virtual time.
    fn on_progress(&mut self, _message: &str) {}

    /// Called once, at construction.
    fn on_drones_initialized(&mut self, _drones: &[DroneSnapshot]) {}

    /// Called once, when the run completes.
    fn on_metrics_ready(&mut self, _report: &MetricsReport) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {}

/// Routes every callback to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn on_progress(&mut self, message: &str) {
        log::info!("{message}");
    }

    fn on_drones_initialized(&mut self, drones: &[DroneSnapshot]) {
        for d in drones {
            log::info!(
                "drone {}: initial position ({:.1}, {:.1}, {:.1}), speed {}",
                d.id,
                d.x,
                d.y,
                d.z,
                d.speed
            );
        }
    }

    fn on_metrics_ready(&mut self, report: &MetricsReport) {
        for line in report.to_string().lines() {
            log::info!("{line}");
        }
    }
}

/// Everything processes can see and mutate.
pub struct World {
    pub config: SimConfig,
    pub drones: Vec<Drone>,
    pub metrics: Metrics,
    pub tracks: PositionTrack,
    pub comms: CommunicationLog,
    pub channel_assigner: ChannelAssigner,
    pub energy_model: Option<Box<dyn EnergyModel>>,
    channel_streams: Vec<RngState>,
    reporter: Box<dyn Reporter>,
}

impl World {
    pub fn drone(&self, id: DroneId) -> Option<&Drone> {
        self.drones.get(id)
    }

    /// Move `drone` to a random non-overlapping channel, drawn from its own stream.
    pub fn reassign_channel_random(&mut self, drone: DroneId) -> Result<ChannelId, SimError> {
        let rng = self
            .channel_streams
            .get_mut(drone)
            .ok_or(SimError::UnknownResource(drone))?;
        let channel = self.channel_assigner.assign_random_on_demand(rng)?;
        if let Some(d) = self.drones.get_mut(drone) {
            d.channel = channel;
        }
        log::debug!("drone {drone} moved to channel {channel}");
        Ok(channel)
    }

    /// Whether the channels currently used by two drones overlap.
    pub fn channels_interfere(&self, a: DroneId, b: DroneId) -> Result<bool, SimError> {
        let ca = self.drone(a).ok_or(SimError::UnknownResource(a))?.channel;
        let cb = self.drone(b).ok_or(SimError::UnknownResource(b))?.channel;
        self.channel_assigner.interferes(ca, cb)
    }
}

fn seconds(t: Time) -> f64 {
    t as f64 / MICROS_PER_SECOND as f64
}

struct ProgressReporter {
    interval: Time,
    horizon: Time,
}

impl Process<World> for ProgressReporter {
    fn resume(&mut self, ctx: &mut Context<'_, World>, _wake: Wake) -> Result<Action, SimError> {
        let message = format!(
            "progress: {:.1}s / {:.1}s",
            seconds(ctx.now()),
            seconds(self.horizon)
        );
        ctx.world.reporter.on_progress(&message);
        Ok(Action::Timeout(self.interval))
    }

    fn kind(&self) -> &'static str {
        "progress"
    }
}

struct PositionTracker {
    interval: Time,
}

impl Process<World> for PositionTracker {
    fn resume(&mut self, ctx: &mut Context<'_, World>, _wake: Wake) -> Result<Action, SimError> {
        let now = ctx.now();
        let world = &mut *ctx.world;
        for drone in &world.drones {
            world.tracks.record(now, drone.id, drone.position());
        }
        Ok(Action::Timeout(self.interval))
    }

    fn kind(&self) -> &'static str {
        "tracker"
    }
}

pub struct Simulator {
    kernel: Kernel<World>,
    finished: bool,
}

impl Simulator {
    /// Build a simulation: place the drones, allocate one receive path each and
    /// schedule mobility, tracking and progress.
    pub fn new(config: SimConfig, mut reporter: Box<dyn Reporter>) -> Result<Self, SimError> {
        config.validate()?;
        let seed = config.seed;
        let count = config.drone_count as usize;
        let assigner = ChannelAssigner::new(config.channel_mode);
        let model = GaussMarkov3D::new(&config);
        let mut medium = Medium::new(Box::new(FixedRange(config.max_range)));
        let mut placement = derive_stream(seed, 0, StreamPurpose::Placement);

        let mut drones = Vec::with_capacity(count);
        let mut mobility_streams = Vec::with_capacity(count);
        let mut channel_streams = Vec::with_capacity(count);
        for id in 0..count {
            medium.create_resource_for(id)?;
            let entity = id as u64;
            let position = random_position(&config, &mut placement);
            let speed = initial_speed(&config, &mut derive_stream(seed, entity, StreamPurpose::Speed));
            let mut mobility_rng = derive_stream(seed, entity, StreamPurpose::Mobility);
            let heading = mobility_rng.random_range(0.0..TAU);
            let channel = assigner.channel_assign().unwrap_or_else(|err| {
                log::warn!("drone {id}: {err}, falling back to channel 1");
                1
            });
            log::debug!("drone {id} assigned channel {channel}");

            let state = MobilityState::new(position, speed, heading, 0.0);
            drones.push(Drone::new(id, state, speed, channel, config.initial_energy));
            mobility_streams.push(mobility_rng);
            channel_streams.push(derive_stream(seed, entity, StreamPurpose::ChannelAssignment));
        }
        log::info!(
            "created {count} drones (seed {seed}, horizon {:.1}s)",
            seconds(config.horizon)
        );
        let snapshots: Vec<DroneSnapshot> = drones.iter().map(Drone::snapshot).collect();
        reporter.on_drones_initialized(&snapshots);

        let horizon = config.horizon;
        let progress_interval = config.progress_interval;
        let track_interval = config.track_interval;
        let world = World {
            config,
            drones,
            metrics: Metrics::new(),
            tracks: PositionTrack::new(),
            comms: CommunicationLog::new(),
            channel_assigner: assigner,
            energy_model: None,
            channel_streams,
            reporter,
        };

        let mut kernel = Kernel::new(world, medium);
        for (id, rng) in mobility_streams.into_iter().enumerate() {
            kernel.spawn(Box::new(MobilityProcess::new(id, model, rng)));
        }
        if let Some(interval) = track_interval {
            kernel.spawn(Box::new(PositionTracker { interval }));
        }
        kernel.spawn(Box::new(ProgressReporter {
            interval: progress_interval,
            horizon,
        }));

        Ok(Self {
            kernel,
            finished: false,
        })
    }

    /// Record the kernel's event order, see [`Kernel::event_trace`].
    pub fn with_event_trace(mut self) -> Self {
        self.kernel = self.kernel.with_event_trace();
        self
    }

    /// Drain residual energy through `model` on every mobility tick.
    pub fn with_energy_model(mut self, model: Box<dyn EnergyModel>) -> Self {
        self.kernel.world.energy_model = Some(model);
        self
    }

    /// Attach a collaborator process, such as a traffic generator or MAC.
    pub fn spawn(&mut self, process: Box<dyn Process<World>>) -> ProcessId {
        self.kernel.spawn(process)
    }

    pub fn now(&self) -> Time {
        self.kernel.now()
    }

    pub fn world(&self) -> &World {
        &self.kernel.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.kernel.world
    }

    pub fn kernel(&self) -> &Kernel<World> {
        &self.kernel
    }

    fn failure(&self, error: SimError) -> RunFailure {
        RunFailure {
            error,
            partial: self.kernel.world.metrics.snapshot(),
        }
    }

    /// Run to the horizon in the configuration and return the final metrics.
    /// Shorthand for `run_until(config.horizon)`.
    pub fn run(&mut self) -> Result<MetricsReport, RunFailure> {
        let horizon = self.kernel.world.config.horizon;
        self.run_until(horizon)
    }

    /// Fire every event due at or before `horizon`, then seal the metrics and hand
    /// the report to the reporter.
    ///
    /// A collaborator returning [`Action::Halt`] ends the run early; the report then
    /// covers everything up to that instant. A fatal error stops the clock and the
    /// metrics gathered so far come back with it, without a metrics callback. A
    /// simulator runs once.
    pub fn run_until(&mut self, horizon: Time) -> Result<MetricsReport, RunFailure> {
        if self.finished {
            return Err(self.failure(SimError::AlreadySummarized));
        }
        self.finished = true;
        let summary = self
            .kernel
            .run_until(horizon)
            .map_err(|error| self.failure(error))?;
        log::info!(
            "run finished at {:.1}s after {} events{}",
            seconds(summary.end_time),
            summary.events_processed,
            if summary.halted { " (halted)" } else { "" }
        );

        let report = self
            .kernel
            .world
            .metrics
            .summarize()
            .map_err(|error| self.failure(error))?;
        self.kernel.world.reporter.on_metrics_ready(&report);
        Ok(report)
    }
}

/// Build a simulator with default physical parameters, reporting through the log.
pub fn new_simulator(
    seed: u64,
    drone_count: u32,
    horizon: Time,
    heterogeneous_speed: bool,
) -> Result<Simulator, SimError> {
    let config =
        SimConfig::new(seed, drone_count, horizon).with_heterogeneous_speed(heterogeneous_speed);
    Simulator::new(config, Box::new(LogReporter))
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::{channel::ChannelMode, trace::TrackPoint};

    #[derive(Default)]
    struct Recorded {
        progress: Vec<String>,
        drones: Vec<DroneSnapshot>,
        reports: Vec<MetricsReport>,
    }

    #[derive(Clone, Default)]
    struct Recorder(Rc<RefCell<Recorded>>);

    impl Reporter for Recorder {
        fn on_progress(&mut self, message: &str) {
            self.0.borrow_mut().progress.push(message.to_string());
        }

        fn on_drones_initialized(&mut self, drones: &[DroneSnapshot]) {
            self.0.borrow_mut().drones.extend_from_slice(drones);
        }

        fn on_metrics_ready(&mut self, report: &MetricsReport) {
            self.0.borrow_mut().reports.push(report.clone());
        }
    }

    fn recorded(config: SimConfig) -> (Simulator, Recorder) {
        let recorder = Recorder::default();
        let sim = Simulator::new(config, Box::new(recorder.clone())).unwrap();
        (sim, recorder)
    }

    #[test]
    fn three_drone_scenario() {
        let config = SimConfig::new(2025, 3, 1_000_000);
        let (lo, hi) = config.interior();
        let (mut sim, recorder) = recorded(config);
        {
            let rec = recorder.0.borrow();
            assert_eq!(rec.drones.len(), 3);
            for d in &rec.drones {
                assert_eq!(d.speed, 10.0);
                assert!(d.x >= 0.0 && d.x <= 600.0);
                assert!(d.y >= 0.0 && d.y <= 600.0);
                assert!(d.z >= 0.0 && d.z <= 120.0);
            }
        }

        let report = sim.run().unwrap();
        assert_eq!(sim.now(), 1_000_000);

        let rec = recorder.0.borrow();
        assert_eq!(rec.reports, vec![report]);
        assert_eq!(
            rec.progress,
            vec![
                "progress: 0.0s / 1.0s",
                "progress: 0.5s / 1.0s",
                "progress: 1.0s / 1.0s"
            ]
        );

        let points = sim.world().tracks.points();
        // Samples at 0, 20 ms, ..., 1 s inclusive.
        assert_eq!(points.len(), 51 * 3);
        for p in points {
            let pos = p.position.to_array();
            for axis in 0..3 {
                assert!(pos[axis] >= lo[axis] && pos[axis] <= hi[axis]);
            }
        }
        assert!(sim.world().drones.iter().all(|d| d.channel == 1));
    }

    fn trajectory_run(seed: u64) -> (Vec<TrackPoint>, Vec<(Time, u64)>, MetricsReport) {
        let mut sim = Simulator::new(SimConfig::new(seed, 5, 3_000_000), Box::new(NullReporter))
            .unwrap()
            .with_event_trace();
        let report = sim.run().unwrap();
        let trace = sim.kernel().event_trace().unwrap().to_vec();
        (sim.world().tracks.points().to_vec(), trace, report)
    }

    #[test]
    fn runs_are_reproducible() {
        let a = trajectory_run(77);
        let b = trajectory_run(77);
        assert_eq!(a.0, b.0);
        assert_eq!(a.1, b.1);
        assert_eq!(a.2, b.2);

        let c = trajectory_run(78);
        assert_ne!(a.0, c.0);
    }

    #[test]
    fn quiet_run_reports_zero_delivery() {
        let mut sim = new_simulator(1, 2, 500_000, false).unwrap();
        let report = sim.run().unwrap();
        assert_eq!(report.generated, 0);
        assert_eq!(report.delivery_ratio, 0.0);
        assert_eq!(report.routing_load, None);
    }

    #[test]
    fn heterogeneous_speeds_are_drawn_from_range() {
        let (_sim, recorder) = recorded(SimConfig::new(5, 40, 1_000_000).with_heterogeneous_speed(true));
        let rec = recorder.0.borrow();
        assert!(rec
            .drones
            .iter()
            .all(|d| d.speed.fract() == 0.0 && (5.0..=60.0).contains(&d.speed)));
        assert!(rec.drones.iter().any(|d| d.speed != rec.drones[0].speed));
    }

    struct Saboteur;

    impl Process<World> for Saboteur {
        fn resume(&mut self, ctx: &mut Context<'_, World>, wake: Wake) -> Result<Action, SimError> {
            match wake {
                Wake::Start => {
                    let metrics = &mut ctx.world.metrics;
                    metrics.record_generated(1);
                    metrics.record_generated(2);
                    metrics.record_arrived(1, 1_500)?;
                    Ok(Action::Timeout(200_000))
                }
                _ => Err(SimError::UnknownPacket(99)),
            }
        }

        fn kind(&self) -> &'static str {
            "saboteur"
        }

        fn owner(&self) -> Option<DroneId> {
            Some(1)
        }
    }

    #[test]
    fn fatal_error_surfaces_partial_metrics() {
        let (mut sim, recorder) = recorded(SimConfig::new(3, 2, 1_000_000));
        sim.spawn(Box::new(Saboteur));
        let failure = sim.run().unwrap_err();
        match &failure.error {
            SimError::ProcessFailed {
                time, kind, owner, ..
            } => {
                assert_eq!(*time, 200_000);
                assert_eq!(*kind, "saboteur");
                assert_eq!(*owner, Some(1));
            }
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(failure.partial.generated, 2);
        assert_eq!(failure.partial.delivery_ratio, 50.0);
        assert_eq!(sim.now(), 200_000);
        assert!(recorder.0.borrow().reports.is_empty());
    }

    #[test]
    fn second_run_is_rejected() {
        let mut sim = new_simulator(4, 1, 100_000, false).unwrap();
        sim.run().unwrap();
        let failure = sim.run().unwrap_err();
        assert!(matches!(failure.error, SimError::AlreadySummarized));
    }

    #[test]
    fn invalid_config_prevents_construction() {
        let config = SimConfig::new(1, 0, 1_000_000);
        assert!(matches!(
            Simulator::new(config, Box::new(NullReporter)),
            Err(SimError::ConfigError(_))
        ));
    }

    #[test]
    fn unsupported_mode_falls_back_to_baseline_channel() {
        let config = SimConfig::new(1, 3, 100_000).with_channel_mode(ChannelMode::Ieee80211g);
        let sim = Simulator::new(config, Box::new(NullReporter)).unwrap();
        assert!(sim.world().drones.iter().all(|d| d.channel == 1));
    }

    #[test]
    fn random_reassignment_uses_non_overlapping_channels() {
        let mut sim = new_simulator(12, 4, 100_000, false).unwrap();
        let world = sim.world_mut();
        for id in 0..4 {
            let channel = world.reassign_channel_random(id).unwrap();
            assert!([1, 6, 11].contains(&channel));
            assert_eq!(world.drones[id].channel, channel);
        }
        assert!(world.channels_interfere(0, 0).unwrap());
        assert!(matches!(
            world.reassign_channel_random(9),
            Err(SimError::UnknownResource(9))
        ));
    }

    struct Hover;

    impl EnergyModel for Hover {
        fn power(&self, _speed: f64) -> f64 {
            10.0
        }
    }

    #[test]
    fn energy_model_drains_every_tick() {
        let mut sim = Simulator::new(SimConfig::new(8, 1, 1_000_000), Box::new(NullReporter))
            .unwrap()
            .with_energy_model(Box::new(Hover));
        sim.run().unwrap();
        // Ten ticks up to and including the horizon, one joule each.
        let left = sim.world().drones[0].residual_energy;
        assert!((left - 19_990.0).abs() < 1e-9);
    }

    struct Unicast {
        src: DroneId,
        dst: DroneId,
        packet: u64,
        hold: Option<crate::medium::ScopedHold>,
    }

    impl Process<World> for Unicast {
        fn resume(&mut self, ctx: &mut Context<'_, World>, wake: Wake) -> Result<Action, SimError> {
            match wake {
                Wake::Start => {
                    ctx.world.metrics.record_generated(self.packet);
                    Ok(Action::Acquire(self.dst))
                }
                Wake::Granted(hold) => {
                    self.hold = Some(hold);
                    Ok(Action::Timeout(1_000))
                }
                _ => {
                    let now = ctx.now();
                    ctx.world.comms.record(self.src, self.dst, self.packet, now);
                    ctx.world.metrics.record_arrived(self.packet, now)?;
                    self.hold = None;
                    Ok(Action::Complete)
                }
            }
        }

        fn kind(&self) -> &'static str {
            "unicast"
        }

        fn owner(&self) -> Option<DroneId> {
            Some(self.src)
        }
    }

    #[test]
    fn contending_senders_are_serialized_by_receiver() {
        let mut sim = new_simulator(6, 3, 100_000, false).unwrap();
        for (src, packet) in [(1, 10), (2, 11)] {
            sim.spawn(Box::new(Unicast {
                src,
                dst: 0,
                packet,
                hold: None,
            }));
        }
        let report = sim.run().unwrap();
        let times: Vec<Time> = sim.world().comms.iter().map(|e| e.time).collect();
        assert_eq!(times, vec![1_000, 2_000]);
        assert_eq!(report.delivery_ratio, 100.0);
        assert_eq!(report.mean_e2e_delay, Some(1_500.0));
    }

    /// Generates a packet and delivers it exactly at `at`.
    struct LateDelivery {
        at: Time,
    }

    impl Process<World> for LateDelivery {
        fn resume(&mut self, ctx: &mut Context<'_, World>, wake: Wake) -> Result<Action, SimError> {
            match wake {
                Wake::Start => Ok(Action::Timeout(self.at)),
                _ => {
                    let now = ctx.now();
                    let metrics = &mut ctx.world.metrics;
                    metrics.record_generated(1);
                    metrics.record_arrived(1, now)?;
                    Ok(Action::Complete)
                }
            }
        }

        fn kind(&self) -> &'static str {
            "late-delivery"
        }
    }

    #[test]
    fn events_at_the_horizon_are_counted() {
        let (mut sim, recorder) = recorded(SimConfig::new(1, 2, 1_000_000));
        sim.spawn(Box::new(LateDelivery { at: 1_000_000 }));
        let report = sim.run().unwrap();
        assert_eq!(report.generated, 1);
        assert_eq!(report.arrived, 1);
        assert_eq!(report.delivery_ratio, 100.0);
        assert_eq!(report.mean_e2e_delay, Some(1_000_000.0));
        assert_eq!(recorder.0.borrow().reports, vec![report]);
    }

    struct Halter {
        at: Time,
    }

    impl Process<World> for Halter {
        fn resume(&mut self, ctx: &mut Context<'_, World>, wake: Wake) -> Result<Action, SimError> {
            match wake {
                Wake::Start => {
                    ctx.world.metrics.record_generated(7);
                    Ok(Action::Timeout(self.at))
                }
                _ => Ok(Action::Halt),
            }
        }

        fn kind(&self) -> &'static str {
            "halter"
        }
    }

    #[test]
    fn collaborator_halt_ends_run_with_a_report() {
        let (mut sim, recorder) = recorded(SimConfig::new(2, 2, 1_000_000));
        sim.spawn(Box::new(Halter { at: 300_000 }));
        let report = sim.run().unwrap();
        assert_eq!(sim.now(), 300_000);
        assert!(sim.kernel().is_halted());
        assert_eq!(report.generated, 1);
        assert_eq!(report.arrived, 0);

        let rec = recorder.0.borrow();
        assert_eq!(rec.reports, vec![report]);
        assert_eq!(rec.progress, vec!["progress: 0.0s / 1.0s"]);
    }

    #[test]
    fn explicit_horizon_overrides_configuration() {
        let (mut sim, recorder) = recorded(SimConfig::new(9, 2, 1_000_000));
        sim.run_until(500_000).unwrap();
        assert_eq!(sim.now(), 500_000);
        assert_eq!(
            recorder.0.borrow().progress,
            vec!["progress: 0.0s / 1.0s", "progress: 0.5s / 1.0s"]
        );
        assert!(matches!(
            sim.run_until(1_000_000).unwrap_err().error,
            SimError::AlreadySummarized
        ));
    }
}
