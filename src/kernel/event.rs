use std::cmp::Ordering;

use crate::{
    kernel::Time,
    process::{Context, ProcessId, Wake},
    SimError,
};

/// A one-shot callback run by the kernel at its scheduled time.
pub type Callback<W> = Box<dyn FnOnce(&mut Context<'_, W>) -> Result<(), SimError>>;

/// What happens when an event fires.
pub enum Continuation<W> {
    /// Resume a suspended process with the reason it was woken.
    Resume { pid: ProcessId, wake: Wake },
    /// Run a callback outside of any process.
    Call(Callback<W>),
}

impl<W> Continuation<W> {
    /// Wrap a closure as a continuation.
    pub fn call<F>(f: F) -> Self
    where
        F: FnOnce(&mut Context<'_, W>) -> Result<(), SimError> + 'static,
    {
        Continuation::Call(Box::new(f))
    }
}

/// Handle to a pending event, used for cancellation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct EventHandle(pub(crate) u64);

impl EventHandle {
    pub fn sequence(&self) -> u64 {
        self.0
    }
}

/// An event keyed by `(time, seq)`. The sequence number is handed out in scheduling
/// order, so events at equal time fire first-in first-out.
pub struct ScheduledEvent<W> {
    pub time: Time,
    pub seq: u64,
    pub continuation: Continuation<W>,
}

impl<W> ScheduledEvent<W> {
    pub fn new(time: Time, seq: u64, continuation: Continuation<W>) -> Self {
        Self {
            time,
            seq,
            continuation,
        }
    }

    pub fn handle(&self) -> EventHandle {
        EventHandle(self.seq)
    }
}

impl<W> PartialEq for ScheduledEvent<W> {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}
impl<W> Eq for ScheduledEvent<W> {}

impl<W> PartialOrd for ScheduledEvent<W> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl<W> Ord for ScheduledEvent<W> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}
