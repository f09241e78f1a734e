use dronesim::prelude::*;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

// Minimal process that just sleeps one tick at a time
struct Ticker {
    remaining_steps: usize,
}

impl Process<()> for Ticker {
    fn resume(&mut self, _ctx: &mut Context<'_, ()>, _wake: Wake) -> Result<Action, SimError> {
        if self.remaining_steps == 0 {
            return Ok(Action::Complete);
        }
        self.remaining_steps -= 1;
        Ok(Action::Timeout(1))
    }

    fn kind(&self) -> &'static str {
        "ticker"
    }
}

// Hammers one receive path from many senders
struct Sender {
    remaining: usize,
    hold: Option<ScopedHold>,
}

impl Process<()> for Sender {
    fn resume(&mut self, _ctx: &mut Context<'_, ()>, wake: Wake) -> Result<Action, SimError> {
        match wake {
            Wake::Granted(hold) => {
                self.hold = Some(hold);
                Ok(Action::Timeout(1))
            }
            _ => {
                self.hold = None;
                if self.remaining == 0 {
                    return Ok(Action::Complete);
                }
                self.remaining -= 1;
                Ok(Action::Acquire(0))
            }
        }
    }

    fn kind(&self) -> &'static str {
        "sender"
    }
}

fn kernel() -> Kernel<()> {
    let mut medium = Medium::new(Box::new(FixedRange(250.0)));
    medium.create_resource_for(0).unwrap();
    Kernel::new((), medium)
}

fn bench_events_per_second(c: &mut Criterion) {
    let mut group = c.benchmark_group("events_per_second");
    let steps = 10_000;

    for &num_processes in [1, 10, 100, 1000].iter() {
        group.throughput(Throughput::Elements((steps * num_processes) as u64));
        group.bench_with_input(
            BenchmarkId::new("processes", num_processes),
            &num_processes,
            |b, &num_processes| {
                b.iter_with_setup(
                    || {
                        let mut kernel = kernel();
                        for _ in 0..num_processes {
                            kernel.spawn(Box::new(Ticker {
                                remaining_steps: steps,
                            }));
                        }
                        kernel
                    },
                    |mut kernel| {
                        black_box(kernel.run_until(Time::MAX).unwrap());
                    },
                );
            },
        );
    }

    group.finish();
}

fn bench_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("receive_path_contention");
    group.sample_size(20);

    for &senders in [2, 16, 128].iter() {
        group.bench_with_input(BenchmarkId::new("senders", senders), &senders, |b, &senders| {
            b.iter_with_setup(
                || {
                    let mut kernel = kernel();
                    for _ in 0..senders {
                        kernel.spawn(Box::new(Sender {
                            remaining: 200,
                            hold: None,
                        }));
                    }
                    kernel
                },
                |mut kernel| {
                    black_box(kernel.run_until(Time::MAX).unwrap());
                },
            );
        });
    }

    group.finish();
}

fn bench_full_simulation(c: &mut Criterion) {
    let mut group = c.benchmark_group("simulator");
    group.sample_size(10);

    for &drones in [10, 50].iter() {
        group.bench_with_input(BenchmarkId::new("drones", drones), &drones, |b, &drones| {
            b.iter_with_setup(
                || {
                    let config = SimConfig::new(2025, drones, 10 * MICROS_PER_SECOND);
                    Simulator::new(config, Box::new(NullReporter)).unwrap()
                },
                |mut sim| {
                    black_box(sim.run().unwrap());
                },
            );
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_events_per_second,
    bench_contention,
    bench_full_simulation
);
criterion_main!(benches);
