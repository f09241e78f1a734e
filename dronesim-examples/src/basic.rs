use std::{cell::Cell, env, error::Error, fs, rc::Rc, time::Instant};

use dronesim::prelude::*;
use rand::Rng;
use rand_distr::{Distribution, Exp};

/// Data packet ids live below the control ranges.
const MAX_DATA_PACKETS: u64 = 10_000;
const HELLO_BASE: u64 = 10_000;
const PACKET_BYTES: f64 = 1_024.0;
/// Airtime of one data packet at 2 Mbps.
const AIRTIME: Time = 4_096;
/// Give up on a busy receiver after this long.
const ACCESS_TIMEOUT: Time = 20_000;

enum Phase {
    Idle,
    Contending { dst: DroneId, packet: u64, since: Time },
    Sending {
        dst: DroneId,
        packet: u64,
        since: Time,
        hold: ScopedHold,
    },
}

/// Direct single-hop unicast to random neighbours, with a HELLO once per second.
/// Only here to exercise the medium and the metrics; no routing happens.
struct Traffic {
    id: DroneId,
    rng: RngState,
    arrivals: Exp<f64>,
    next_packet: Rc<Cell<u64>>,
    next_hello: Time,
    phase: Phase,
}

impl Traffic {
    fn pick_neighbour(&mut self, world: &World, medium: &Medium) -> Option<DroneId> {
        let me = world.drone(self.id)?.position();
        let candidates: Vec<DroneId> = world
            .drones
            .iter()
            .filter(|d| d.id != self.id && medium.link_feasible(&me, &d.position()))
            .map(|d| d.id)
            .collect();
        if candidates.is_empty() {
            return None;
        }
        Some(candidates[self.rng.random_range(0..candidates.len())])
    }

    fn idle(&mut self) -> Action {
        self.phase = Phase::Idle;
        let gap = self.arrivals.sample(&mut self.rng) * MICROS_PER_SECOND as f64;
        Action::Timeout(gap as Time)
    }
}

impl Process<World> for Traffic {
    fn resume(&mut self, ctx: &mut Context<'_, World>, wake: Wake) -> Result<Action, SimError> {
        let now = ctx.now();
        if now >= self.next_hello {
            ctx.world.metrics.record_control_packet();
            ctx.world.comms.record(self.id, self.id, HELLO_BASE + self.id as u64, now);
            self.next_hello += MICROS_PER_SECOND;
        }

        match (std::mem::replace(&mut self.phase, Phase::Idle), wake) {
            (Phase::Idle, Wake::Start | Wake::Timer) => {
                let packet = self.next_packet.get();
                if packet >= MAX_DATA_PACKETS {
                    return Ok(self.idle());
                }
                let Some(dst) = self.pick_neighbour(&*ctx.world, ctx.medium()) else {
                    return Ok(self.idle());
                };
                self.next_packet.set(packet + 1);
                ctx.world.metrics.record_generated(packet);
                self.phase = Phase::Contending {
                    dst,
                    packet,
                    since: now,
                };
                Ok(Action::AcquireWithin {
                    resource: dst,
                    timeout: ACCESS_TIMEOUT,
                })
            }
            (Phase::Contending { dst, packet, since }, Wake::Granted(hold)) => {
                ctx.world.metrics.record_mac_delay(now - since);
                self.phase = Phase::Sending {
                    dst,
                    packet,
                    since,
                    hold,
                };
                Ok(Action::Timeout(AIRTIME))
            }
            (Phase::Contending { .. }, Wake::TimedOut(_)) => {
                ctx.world.metrics.record_collision();
                Ok(self.idle())
            }
            (
                Phase::Sending {
                    dst,
                    packet,
                    since,
                    hold,
                },
                Wake::Timer,
            ) => {
                ctx.release(hold);
                let elapsed = AIRTIME as f64 / MICROS_PER_SECOND as f64;
                let world = &mut *ctx.world;
                world.comms.record(self.id, dst, packet, now);
                world.metrics.record_arrived(packet, now - since)?;
                world.metrics.record_hop_count(packet, 1)?;
                world.metrics.record_throughput_sample(packet, PACKET_BYTES / elapsed)?;
                Ok(self.idle())
            }
            (_, wake) => Err(SimError::ProcessPanicked(format!(
                "drone {} traffic woken out of turn: {wake:?}",
                self.id
            ))),
        }
    }

    fn kind(&self) -> &'static str {
        "traffic"
    }

    fn owner(&self) -> Option<DroneId> {
        Some(self.id)
    }
}

fn load_config() -> Result<SimConfig, Box<dyn Error>> {
    match env::args().nth(1) {
        Some(path) => Ok(serde_json::from_str(&fs::read_to_string(path)?)?),
        None => Ok(SimConfig::new(2025, 10, 10 * MICROS_PER_SECOND)),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let config = load_config()?;
    let seed = config.seed;
    let drones = config.drone_count as usize;
    let mut sim = Simulator::new(config, Box::new(LogReporter))?;

    let next_packet = Rc::new(Cell::new(0));
    for id in 0..drones {
        sim.spawn(Box::new(Traffic {
            id,
            rng: derive_stream(seed, id as u64, StreamPurpose::Traffic),
            arrivals: Exp::new(5.0)?,
            next_packet: Rc::clone(&next_packet),
            next_hello: 0,
            phase: Phase::Idle,
        }));
    }

    let start = Instant::now();
    let report = match sim.run() {
        Ok(report) => report,
        Err(failure) => {
            log::error!("{failure}");
            println!("{}", serde_json::to_string_pretty(&failure.partial)?);
            return Err(failure.into());
        }
    };
    let elapsed = start.elapsed();

    println!("{}", serde_json::to_string_pretty(&report)?);
    println!("Total time: {:.2?}", elapsed);
    println!("Total events processed: {}", sim.kernel().events_processed());
    println!(
        "Events per second: {:.2}",
        sim.kernel().events_processed() as f64 / elapsed.as_secs_f64()
    );
    println!(
        "Position samples: {} ({} bytes)",
        sim.world().tracks.len(),
        sim.world().tracks.as_bytes().len()
    );
    Ok(())
}
