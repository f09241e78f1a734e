//! The shared wireless medium.
//!
//! Every drone owns one receive path with room for a single holder, modelling a
//! half-duplex radio. Transmitters contend for the receiver's path; contenders are
//! served strictly first-come first-served. The medium also answers whether two
//! positions are close enough to talk at all.

use std::{
    cell::RefCell,
    collections::{BTreeMap, VecDeque},
    fmt,
    rc::Rc,
};

use crate::{drone::DroneId, mobility::Vec3, process::ProcessId, SimError};

/// Source of the maximum communication range. The link budget behind it belongs to
/// the physical layer.
pub trait LinkBudget {
    fn max_range(&self) -> f64;
}

/// A link budget with a constant range.
#[derive(Debug, Clone, Copy)]
pub struct FixedRange(pub f64);

impl LinkBudget for FixedRange {
    fn max_range(&self) -> f64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Release {
    pub resource: DroneId,
    pub ticket: u64,
}

type ReleaseInbox = Rc<RefCell<Vec<Release>>>;

/// Exclusive access to one drone's receive path.
///
/// Dropping the hold gives the resource back; the kernel then grants it to the next
/// waiter at the current virtual time. This holds on every exit path, including a
/// process that completes, fails or unwinds while still holding it.
pub struct ScopedHold {
    resource: DroneId,
    holder: ProcessId,
    ticket: u64,
    inbox: ReleaseInbox,
}

impl ScopedHold {
    pub fn resource(&self) -> DroneId {
        self.resource
    }

    pub fn holder(&self) -> ProcessId {
        self.holder
    }
}

impl fmt::Debug for ScopedHold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedHold")
            .field("resource", &self.resource)
            .field("holder", &self.holder)
            .field("ticket", &self.ticket)
            .finish()
    }
}

impl Drop for ScopedHold {
    fn drop(&mut self) {
        self.inbox.borrow_mut().push(Release {
            resource: self.resource,
            ticket: self.ticket,
        });
    }
}

/// Outcome of an acquisition request.
#[derive(Debug)]
pub enum Acquisition {
    Granted(ScopedHold),
    Queued { position: usize },
}

/// One drone's receive path. Capacity one, FIFO wait list.
#[derive(Debug, Default)]
pub struct ChannelResource {
    holder: Option<(ProcessId, u64)>,
    waiters: VecDeque<ProcessId>,
}

impl ChannelResource {
    pub fn is_busy(&self) -> bool {
        self.holder.is_some()
    }

    pub fn holder(&self) -> Option<ProcessId> {
        self.holder.map(|(pid, _)| pid)
    }

    pub fn queue_len(&self) -> usize {
        self.waiters.len()
    }
}

/// The contention domain: every drone's receive path plus the range predicate.
pub struct Medium {
    resources: BTreeMap<DroneId, ChannelResource>,
    link_budget: Box<dyn LinkBudget>,
    next_ticket: u64,
    inbox: ReleaseInbox,
}

impl Medium {
    pub fn new(link_budget: Box<dyn LinkBudget>) -> Self {
        Self {
            resources: BTreeMap::new(),
            link_budget,
            next_ticket: 0,
            inbox: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Allocate the receive path of `drone`. Each drone gets exactly one.
    pub fn create_resource_for(&mut self, drone: DroneId) -> Result<(), SimError> {
        if self.resources.contains_key(&drone) {
            return Err(SimError::DuplicateResource(drone));
        }
        self.resources.insert(drone, ChannelResource::default());
        Ok(())
    }

    pub fn resource(&self, drone: DroneId) -> Option<&ChannelResource> {
        self.resources.get(&drone)
    }

    pub fn is_busy(&self, drone: DroneId) -> bool {
        self.resources.get(&drone).is_some_and(|r| r.is_busy())
    }

    pub fn queue_len(&self, drone: DroneId) -> usize {
        self.resources.get(&drone).map_or(0, |r| r.queue_len())
    }

    pub fn holder(&self, drone: DroneId) -> Option<ProcessId> {
        self.resources.get(&drone).and_then(|r| r.holder())
    }

    /// True iff the two points are within the maximum communication range.
    pub fn link_feasible(&self, a: &Vec3, b: &Vec3) -> bool {
        a.distance(b) <= self.link_budget.max_range()
    }

    pub fn max_range(&self) -> f64 {
        self.link_budget.max_range()
    }

    fn issue(&mut self, drone: DroneId, pid: ProcessId) -> ScopedHold {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        ScopedHold {
            resource: drone,
            holder: pid,
            ticket,
            inbox: Rc::clone(&self.inbox),
        }
    }

    /// Request `drone`'s receive path for `pid`. Never fails on a busy resource, the
    /// caller is queued instead.
    pub fn request(&mut self, drone: DroneId, pid: ProcessId) -> Result<Acquisition, SimError> {
        let resource = self
            .resources
            .get_mut(&drone)
            .ok_or(SimError::UnknownResource(drone))?;
        if resource.holder.is_some() {
            resource.waiters.push_back(pid);
            return Ok(Acquisition::Queued {
                position: resource.waiters.len() - 1,
            });
        }
        let hold = self.issue(drone, pid);
        if let Some(resource) = self.resources.get_mut(&drone) {
            resource.holder = Some((pid, hold.ticket));
        }
        Ok(Acquisition::Granted(hold))
    }

    /// Withdraw a queued request. Cancelling a request that is no longer queued does
    /// nothing.
    pub fn cancel_request(&mut self, drone: DroneId, pid: ProcessId) -> bool {
        let Some(resource) = self.resources.get_mut(&drone) else {
            return false;
        };
        match resource.waiters.iter().position(|&w| w == pid) {
            Some(idx) => {
                resource.waiters.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Take every release recorded since the last call.
    pub(crate) fn take_releases(&self) -> Vec<Release> {
        std::mem::take(&mut *self.inbox.borrow_mut())
    }

    /// Return a resource. Hands it straight to the next waiter, if any.
    pub(crate) fn release(&mut self, release: Release) -> Option<ScopedHold> {
        let resource = self.resources.get_mut(&release.resource)?;
        match resource.holder {
            Some((_, ticket)) if ticket == release.ticket => {}
            _ => {
                log::warn!(
                    "ignoring stale release of drone {} receive path (ticket {})",
                    release.resource,
                    release.ticket
                );
                return None;
            }
        }
        resource.holder = None;
        let next = resource.waiters.pop_front()?;
        let hold = self.issue(release.resource, next);
        if let Some(resource) = self.resources.get_mut(&release.resource) {
            resource.holder = Some((next, hold.ticket));
        }
        Some(hold)
    }
}
