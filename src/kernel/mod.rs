//! The single-threaded discrete-event kernel.
//!
//! Pending events sit in one heap ordered by `(time, sequence)`. The kernel pops the
//! earliest, moves the clock to it and runs its continuation: either a process
//! resumption or a plain callback. Processes suspend only on a timeout or on a busy
//! receive path.

use std::{
    any::Any,
    cmp::Reverse,
    collections::{BinaryHeap, HashSet},
    panic::{self, AssertUnwindSafe},
};

use crate::{
    drone::DroneId,
    medium::{Acquisition, Medium, ScopedHold},
    process::{Action, Context, Process, ProcessId, ProcessState, WaitingOn, Wake},
    SimError,
};

pub mod event;

pub use event::{Callback, Continuation, EventHandle, ScheduledEvent};

/// Virtual time in microseconds.
pub type Time = u64;

pub const MICROS_PER_SECOND: Time = 1_000_000;

struct ProcessSlot<W> {
    process: Option<Box<dyn Process<W>>>,
    state: ProcessState,
    timer: Option<EventHandle>,
    kind: &'static str,
    owner: Option<DroneId>,
}

/// Kernel state reachable from a running process.
pub(crate) struct Core<W> {
    pub(crate) now: Time,
    next_seq: u64,
    queue: BinaryHeap<Reverse<ScheduledEvent<W>>>,
    pending: HashSet<u64>,
    cancelled: HashSet<u64>,
    pub(crate) medium: Medium,
    slots: Vec<ProcessSlot<W>>,
    halted: bool,
}

impl<W: 'static> Core<W> {
    fn commit(&mut self, time: Time, continuation: Continuation<W>) -> EventHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.insert(seq);
        self.queue
            .push(Reverse(ScheduledEvent::new(time, seq, continuation)));
        EventHandle(seq)
    }

    pub(crate) fn schedule_after(
        &mut self,
        delay: i64,
        continuation: Continuation<W>,
    ) -> Result<EventHandle, SimError> {
        if delay < 0 {
            return Err(SimError::InvalidDelay(delay));
        }
        let time = self.now.saturating_add(delay as Time);
        Ok(self.commit(time, continuation))
    }

    pub(crate) fn cancel(&mut self, handle: EventHandle) -> bool {
        if self.pending.remove(&handle.0) {
            self.cancelled.insert(handle.0);
            true
        } else {
            false
        }
    }

    pub(crate) fn spawn(&mut self, process: Box<dyn Process<W>>) -> ProcessId {
        let pid = ProcessId(self.slots.len());
        self.slots.push(ProcessSlot {
            kind: process.kind(),
            owner: process.owner(),
            process: Some(process),
            state: ProcessState::Runnable,
            timer: None,
        });
        self.commit(
            self.now,
            Continuation::Resume {
                pid,
                wake: Wake::Start,
            },
        );
        pid
    }

    /// Hand every returned receive path to its next waiter.
    pub(crate) fn settle_releases(&mut self) {
        loop {
            let releases = self.medium.take_releases();
            if releases.is_empty() {
                break;
            }
            for release in releases {
                if let Some(hold) = self.medium.release(release) {
                    self.grant(hold);
                }
            }
        }
    }

    fn grant(&mut self, hold: ScopedHold) {
        let pid = hold.holder();
        log::debug!(
            "t={}us: drone {} receive path granted to process {}",
            self.now,
            hold.resource(),
            pid
        );
        let timer = self.slots.get_mut(pid.0).and_then(|slot| slot.timer.take());
        if let Some(timer) = timer {
            self.cancel(timer);
        }
        self.commit(
            self.now,
            Continuation::Resume {
                pid,
                wake: Wake::Granted(hold),
            },
        );
    }
}

/// Outcome of [`Kernel::run_until`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub end_time: Time,
    pub events_processed: u64,
    /// A process asked the run to stop.
    pub halted: bool,
    /// No events are left at all, including beyond the horizon.
    pub queue_exhausted: bool,
}

/// Discrete-event kernel over a world of type `W`.
pub struct Kernel<W> {
    core: Core<W>,
    pub world: W,
    processed: u64,
    trace: Option<Vec<(Time, u64)>>,
}

impl<W: 'static> Kernel<W> {
    pub fn new(world: W, medium: Medium) -> Self {
        Self {
            core: Core {
                now: 0,
                next_seq: 0,
                queue: BinaryHeap::new(),
                pending: HashSet::new(),
                cancelled: HashSet::new(),
                medium,
                slots: Vec::new(),
                halted: false,
            },
            world,
            processed: 0,
            trace: None,
        }
    }

    /// Record `(time, sequence)` of every event the kernel fires.
    pub fn with_event_trace(mut self) -> Self {
        self.trace = Some(Vec::new());
        self
    }

    /// Get the current time of the simulation.
    #[inline(always)]
    pub fn now(&self) -> Time {
        self.core.now
    }

    pub fn medium(&self) -> &Medium {
        &self.core.medium
    }

    pub fn medium_mut(&mut self) -> &mut Medium {
        &mut self.core.medium
    }

    pub fn spawn(&mut self, process: Box<dyn Process<W>>) -> ProcessId {
        self.core.spawn(process)
    }

    /// Register a continuation to fire `delay` microseconds from now.
    pub fn schedule_after(
        &mut self,
        delay: i64,
        continuation: Continuation<W>,
    ) -> Result<EventHandle, SimError> {
        self.core.schedule_after(delay, continuation)
    }

    /// Register a continuation at an absolute time.
    pub fn schedule_at(
        &mut self,
        time: Time,
        continuation: Continuation<W>,
    ) -> Result<EventHandle, SimError> {
        if time < self.now() {
            return Err(SimError::TimeTravel {
                requested: time,
                now: self.now(),
            });
        }
        Ok(self.core.commit(time, continuation))
    }

    /// Cancel a pending event. Returns false if it already fired or was cancelled.
    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        self.core.cancel(handle)
    }

    pub fn process_state(&self, pid: ProcessId) -> Option<ProcessState> {
        self.core.slots.get(pid.0).map(|slot| slot.state)
    }

    pub fn pending_events(&self) -> usize {
        self.core.pending.len()
    }

    pub fn events_processed(&self) -> u64 {
        self.processed
    }

    pub fn is_halted(&self) -> bool {
        self.core.halted
    }

    pub fn event_trace(&self) -> Option<&[(Time, u64)]> {
        self.trace.as_deref()
    }

    /// Fire every event due at or before `horizon`, in `(time, sequence)` order.
    /// Later events stay queued. Stops early if a process halts the run, and aborts on
    /// the first failing process.
    pub fn run_until(&mut self, horizon: Time) -> Result<RunSummary, SimError> {
        while !self.core.halted {
            match self.core.queue.peek() {
                Some(Reverse(next)) if next.time <= horizon => {}
                _ => break,
            }
            let Some(Reverse(event)) = self.core.queue.pop() else {
                break;
            };
            self.core.pending.remove(&event.seq);
            if self.core.cancelled.remove(&event.seq) {
                continue;
            }
            debug_assert!(event.time >= self.core.now, "virtual time went backwards");
            self.core.now = event.time;
            self.processed += 1;
            if let Some(trace) = &mut self.trace {
                trace.push((event.time, event.seq));
            }

            match event.continuation {
                Continuation::Resume { pid, wake } => self.resume(pid, wake)?,
                Continuation::Call(callback) => self.call(callback)?,
            }
            self.core.settle_releases();
        }
        if !self.core.halted && self.core.now < horizon {
            self.core.now = horizon;
        }
        Ok(RunSummary {
            end_time: self.core.now,
            events_processed: self.processed,
            halted: self.core.halted,
            queue_exhausted: self.core.pending.is_empty(),
        })
    }

    fn call(&mut self, callback: Callback<W>) -> Result<(), SimError> {
        let mut ctx = Context {
            world: &mut self.world,
            core: &mut self.core,
            current: None,
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(move || callback(&mut ctx)));
        let result = match outcome {
            Ok(result) => result,
            Err(payload) => Err(SimError::ProcessPanicked(panic_message(payload))),
        };
        if let Err(err) = &result {
            log::error!("callback failed at t={}us: {}", self.core.now, err);
            self.core.halted = true;
        }
        result
    }

    fn resume(&mut self, pid: ProcessId, wake: Wake) -> Result<(), SimError> {
        let slot = self
            .core
            .slots
            .get_mut(pid.0)
            .ok_or(SimError::UnknownProcess(pid.0))?;
        if slot.state == ProcessState::Completed {
            return Ok(());
        }
        let mut process = slot
            .process
            .take()
            .ok_or(SimError::UnknownProcess(pid.0))?;
        slot.state = ProcessState::Runnable;
        slot.timer = None;
        if let Wake::TimedOut(resource) = &wake {
            self.core.medium.cancel_request(*resource, pid);
        }

        let outcome = {
            let mut ctx = Context {
                world: &mut self.world,
                core: &mut self.core,
                current: Some(pid),
            };
            panic::catch_unwind(AssertUnwindSafe(|| process.resume(&mut ctx, wake)))
        };
        let action = match outcome {
            Ok(Ok(action)) => action,
            Ok(Err(err)) => return Err(self.fail(pid, process, err)),
            Err(payload) => {
                let err = SimError::ProcessPanicked(panic_message(payload));
                return Err(self.fail(pid, process, err));
            }
        };
        self.apply(pid, process, action)
    }

    fn apply(
        &mut self,
        pid: ProcessId,
        process: Box<dyn Process<W>>,
        action: Action,
    ) -> Result<(), SimError> {
        let now = self.core.now;
        match action {
            Action::Timeout(delay) => {
                self.core.commit(
                    now.saturating_add(delay),
                    Continuation::Resume {
                        pid,
                        wake: Wake::Timer,
                    },
                );
                self.park(pid, process, WaitingOn::Timer, None);
            }
            Action::Acquire(resource) => self.acquire(pid, process, resource, None)?,
            Action::AcquireWithin { resource, timeout } => {
                self.acquire(pid, process, resource, Some(timeout))?
            }
            Action::Complete | Action::Halt => {
                if let Some(slot) = self.core.slots.get_mut(pid.0) {
                    slot.state = ProcessState::Completed;
                }
                // Any hold still owned by the process goes back here.
                drop(process);
                if action == Action::Halt {
                    log::info!("t={now}us: run halted by process {pid}");
                    self.core.halted = true;
                }
            }
        }
        Ok(())
    }

    fn acquire(
        &mut self,
        pid: ProcessId,
        process: Box<dyn Process<W>>,
        resource: DroneId,
        timeout: Option<Time>,
    ) -> Result<(), SimError> {
        let now = self.core.now;
        match self.core.medium.request(resource, pid) {
            Ok(Acquisition::Granted(hold)) => {
                self.core.commit(
                    now,
                    Continuation::Resume {
                        pid,
                        wake: Wake::Granted(hold),
                    },
                );
                self.park(pid, process, WaitingOn::Resource(resource), None);
            }
            Ok(Acquisition::Queued { position }) => {
                log::debug!(
                    "t={now}us: process {pid} queued at position {position} for drone {resource}"
                );
                let timer = timeout.map(|timeout| {
                    self.core.commit(
                        now.saturating_add(timeout),
                        Continuation::Resume {
                            pid,
                            wake: Wake::TimedOut(resource),
                        },
                    )
                });
                self.park(pid, process, WaitingOn::Resource(resource), timer);
            }
            Err(err) => return Err(self.fail(pid, process, err)),
        }
        Ok(())
    }

    fn park(
        &mut self,
        pid: ProcessId,
        process: Box<dyn Process<W>>,
        waiting: WaitingOn,
        timer: Option<EventHandle>,
    ) {
        if let Some(slot) = self.core.slots.get_mut(pid.0) {
            slot.process = Some(process);
            slot.state = ProcessState::Suspended(waiting);
            slot.timer = timer;
        }
    }

    fn fail(&mut self, pid: ProcessId, process: Box<dyn Process<W>>, source: SimError) -> SimError {
        let now = self.core.now;
        drop(process);
        let (kind, owner) = match self.core.slots.get_mut(pid.0) {
            Some(slot) => {
                slot.state = ProcessState::Completed;
                (slot.kind, slot.owner)
            }
            None => ("unknown", None),
        };
        log::error!("t={now}us: process {pid} ({kind}) of drone {owner:?} failed: {source}");
        self.core.halted = true;
        SimError::ProcessFailed {
            time: now,
            pid: pid.0,
            kind,
            owner,
            source: Box::new(source),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
