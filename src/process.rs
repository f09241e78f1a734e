//! Cooperative processes and the context they run in.
//!
//! A process is an explicit state machine. The kernel calls [`Process::resume`]
//! whenever the process is woken; the process does its work for that instant and
//! hands back an [`Action`] naming how it suspends. Nothing runs in parallel: a
//! process has the whole world to itself until it returns.

use std::fmt;

use crate::{
    drone::DroneId,
    kernel::{Core, Continuation, EventHandle, Time},
    medium::{Medium, ScopedHold},
    mobility::Vec3,
    SimError,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub usize);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why a process was resumed.
#[derive(Debug)]
pub enum Wake {
    /// First activation after spawning.
    Start,
    /// A timeout elapsed.
    Timer,
    /// The requested receive path is now held by this process.
    Granted(ScopedHold),
    /// A bounded acquisition gave up; the request has already been withdrawn.
    TimedOut(DroneId),
}

/// A suspension request handed back to the kernel.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Sleep for the given number of microseconds.
    Timeout(Time),
    /// Wait, without bound, for a drone's receive path.
    Acquire(DroneId),
    /// Wait for a drone's receive path, giving up after `timeout` microseconds.
    AcquireWithin { resource: DroneId, timeout: Time },
    /// The process is done.
    Complete,
    /// The process is done and the whole run stops.
    Halt,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WaitingOn {
    Timer,
    Resource(DroneId),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProcessState {
    Runnable,
    Suspended(WaitingOn),
    Completed,
}

/// A cooperatively scheduled unit of simulated behaviour.
pub trait Process<W> {
    fn resume(&mut self, ctx: &mut Context<'_, W>, wake: Wake) -> Result<Action, SimError>;

    /// Short label used when reporting failures.
    fn kind(&self) -> &'static str;

    /// The drone this process acts for, if any.
    fn owner(&self) -> Option<DroneId> {
        None
    }
}

/// The view a running process or callback gets of the simulation.
pub struct Context<'a, W> {
    pub world: &'a mut W,
    pub(crate) core: &'a mut Core<W>,
    pub(crate) current: Option<ProcessId>,
}

impl<'a, W: 'static> Context<'a, W> {
    /// Current virtual time.
    #[inline(always)]
    pub fn now(&self) -> Time {
        self.core.now
    }

    /// The process being resumed, `None` inside a plain callback.
    pub fn current(&self) -> Option<ProcessId> {
        self.current
    }

    pub fn medium(&self) -> &Medium {
        &self.core.medium
    }

    pub fn link_feasible(&self, a: &Vec3, b: &Vec3) -> bool {
        self.core.medium.link_feasible(a, b)
    }

    /// Spawn a new process; it starts at the current time, after everything already
    /// scheduled for this instant.
    pub fn spawn(&mut self, process: Box<dyn Process<W>>) -> ProcessId {
        self.core.spawn(process)
    }

    pub fn schedule_after(
        &mut self,
        delay: i64,
        continuation: Continuation<W>,
    ) -> Result<EventHandle, SimError> {
        self.core.schedule_after(delay, continuation)
    }

    /// Run `f` after `delay` microseconds.
    pub fn call_after<F>(&mut self, delay: i64, f: F) -> Result<EventHandle, SimError>
    where
        F: FnOnce(&mut Context<'_, W>) -> Result<(), SimError> + 'static,
    {
        self.core.schedule_after(delay, Continuation::call(f))
    }

    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        self.core.cancel(handle)
    }

    /// Give a receive path back now, rather than when the hold goes out of scope.
    pub fn release(&mut self, hold: ScopedHold) {
        drop(hold);
        self.core.settle_releases();
    }
}
