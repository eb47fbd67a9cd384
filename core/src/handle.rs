//! Generational handle table.
//!
//! # Design
//! Handles are `u64` values encoding `(generation << 32) | (index + 1)`, so
//! `0` is never issued. A slot moves through three states:
//!
//! - `Vacant`: free for reuse.
//! - `Live`: reachable through its handle; in-flight operations hold leases.
//! - `Zombie`: destroyed while leased. New lookups fail, existing leases keep
//!   the session alive, and the last lease to drop returns the slot to the
//!   free list.
//!
//! Every insert stamps its slot with a generation drawn from one
//! process-wide counter, so a handle value is never issued twice, not even
//! by a table created after an earlier one was torn down. A stale handle
//! therefore never resolves to a later occupant of the same slot. All
//! transitions happen under one short lock; no I/O ever runs while it is
//! held.

use std::ops::Deref;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{NetError, NetResult};

pub type Handle = u64;

pub const INVALID_HANDLE: Handle = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    HttpClient,
    WebRtcSession,
}

enum SlotState<T> {
    Vacant,
    Live { kind: HandleKind, value: Arc<T>, leases: usize },
    Zombie { leases: usize },
}

struct Slot<T> {
    generation: u32,
    state: SlotState<T>,
}

struct Slots<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    live: usize,
    capacity: usize,
}

impl<T> Slots<T> {
    /// Retire a live slot. Returns the value so the caller can tear it down
    /// outside the lock.
    fn retire(&mut self, index: usize) -> Option<Arc<T>> {
        let slot = &mut self.slots[index];
        let (value, leases) = match std::mem::replace(&mut slot.state, SlotState::Vacant) {
            SlotState::Live { value, leases, .. } => (value, leases),
            other => {
                slot.state = other;
                return None;
            }
        };
        self.live -= 1;
        if leases > 0 {
            slot.state = SlotState::Zombie { leases };
        } else {
            self.free.push(index);
        }
        Some(value)
    }
}

static NEXT_GENERATION: AtomicU32 = AtomicU32::new(1);

fn next_generation() -> u32 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

fn encode(index: usize, generation: u32) -> Handle {
    ((generation as u64) << 32) | (index as u64 + 1)
}

fn decode(handle: Handle) -> Option<(usize, u32)> {
    let low = handle & 0xFFFF_FFFF;
    if low == 0 {
        return None;
    }
    Some(((low - 1) as usize, (handle >> 32) as u32))
}

pub struct HandleTable<T> {
    inner: Arc<Mutex<Slots<T>>>,
}

impl<T> HandleTable<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Slots {
                slots: Vec::new(),
                free: Vec::new(),
                live: 0,
                capacity,
            })),
        }
    }

    pub fn insert(&self, kind: HandleKind, value: T) -> NetResult<Handle> {
        let mut slots = self.inner.lock();
        if slots.live >= slots.capacity {
            return Err(NetError::param("handle table is full"));
        }
        let value = Arc::new(value);
        let index = match slots.free.pop() {
            Some(index) => index,
            None => {
                if slots.slots.len() >= u32::MAX as usize {
                    return Err(NetError::param("handle table is full"));
                }
                slots.slots.push(Slot { generation: 0, state: SlotState::Vacant });
                slots.slots.len() - 1
            }
        };
        slots.live += 1;
        let slot = &mut slots.slots[index];
        slot.generation = next_generation();
        slot.state = SlotState::Live { kind, value, leases: 0 };
        Ok(encode(index, slot.generation))
    }

    /// Resolve a live handle of the given kind and pin it for an operation.
    pub fn acquire(&self, handle: Handle, kind: HandleKind) -> NetResult<Lease<T>> {
        let (index, generation) = decode(handle).ok_or(NetError::InvalidHandle)?;
        let mut slots = self.inner.lock();
        let slot = slots.slots.get_mut(index).ok_or(NetError::InvalidHandle)?;
        if slot.generation != generation {
            return Err(NetError::InvalidHandle);
        }
        match &mut slot.state {
            SlotState::Live { kind: k, value, leases } if *k == kind => {
                *leases += 1;
                Ok(Lease {
                    table: Arc::clone(&self.inner),
                    index,
                    value: Arc::clone(value),
                })
            }
            _ => Err(NetError::InvalidHandle),
        }
    }

    /// Retire a handle. Never blocks on in-flight operations.
    pub fn remove(&self, handle: Handle, kind: HandleKind) -> NetResult<Arc<T>> {
        let (index, generation) = decode(handle).ok_or(NetError::InvalidHandle)?;
        let mut slots = self.inner.lock();
        match slots.slots.get(index) {
            Some(Slot { generation: g, state: SlotState::Live { kind: k, .. } })
                if *g == generation && *k == kind => {}
            _ => return Err(NetError::InvalidHandle),
        }
        slots.retire(index).ok_or(NetError::InvalidHandle)
    }

    /// Retire every live handle, returning the detached values.
    pub fn invalidate_all(&self) -> Vec<Arc<T>> {
        let mut slots = self.inner.lock();
        (0..slots.slots.len()).filter_map(|index| slots.retire(index)).collect()
    }

    pub fn live_count(&self) -> usize {
        self.inner.lock().live
    }

    /// Slots still pinned by leases after their handle was retired.
    pub fn zombie_count(&self) -> usize {
        let slots = self.inner.lock();
        slots
            .slots
            .iter()
            .filter(|s| matches!(s.state, SlotState::Zombie { .. }))
            .count()
    }
}

/// Pins a slot for the duration of one operation.
pub struct Lease<T> {
    table: Arc<Mutex<Slots<T>>>,
    index: usize,
    value: Arc<T>,
}

impl<T> Lease<T> {
    pub fn value(&self) -> &Arc<T> {
        &self.value
    }
}

impl<T> Deref for Lease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> Drop for Lease<T> {
    fn drop(&mut self) {
        let mut slots = self.table.lock();
        let mut reclaim = false;
        match &mut slots.slots[self.index].state {
            SlotState::Live { leases, .. } => *leases -= 1,
            SlotState::Zombie { leases, .. } => {
                *leases -= 1;
                reclaim = *leases == 0;
            }
            SlotState::Vacant => {}
        }
        if reclaim {
            slots.slots[self.index].state = SlotState::Vacant;
            slots.free.push(self.index);
        }
    }
}
