//! Scan-out buffer slots
//!
//! Every framebuffer buffer moves through `Available -> Submitted ->
//! Referenced -> Available`. The producer moves a slot to `Submitted` when it
//! posts the buffer; the consumer thread owns every other transition.
//! A slot is only submitted from `Available`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError, TryLockError};

use hwc_api::{Error, Result};
use log::{trace, warn};
use static_assertions::assert_impl_all;

/// Ownership of one framebuffer buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Free for the producer to draw into
    Available,
    /// Posted and waiting in the queue
    Submitted,
    /// Being scanned out
    Referenced,
}

struct Slot {
    state: Mutex<SlotState>,
    released: Condvar,
}

/// The ring of buffer slots shared by the producer and the consumer thread
pub struct BufferSlots {
    slots: Vec<Slot>,
    closed: AtomicBool,
}

assert_impl_all!(BufferSlots: Send, Sync);

fn lock(slot: &Slot) -> MutexGuard<'_, SlotState> {
    slot.state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BufferSlots {
    /// `count` slots, all available
    pub fn new(count: usize) -> Self {
        let slots = (0..count)
            .map(|_| Slot { state: Mutex::new(SlotState::Available), released: Condvar::new() })
            .collect();
        Self { slots, closed: AtomicBool::new(false) }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, index: usize) -> Result<&Slot> {
        self.slots
            .get(index)
            .ok_or_else(|| Error::InvalidArgument(format!("buffer slot {} of {}", index, self.slots.len())))
    }

    pub fn state(&self, index: usize) -> Option<SlotState> {
        self.slots.get(index).map(|slot| *lock(slot))
    }

    /// Whether `index` can be claimed without waiting
    ///
    /// A slot whose lock is held elsewhere counts as claimed.
    pub fn is_free(&self, index: usize) -> bool {
        let Some(slot) = self.slots.get(index) else {
            return false;
        };
        match slot.state.try_lock() {
            Ok(state) => *state == SlotState::Available,
            Err(TryLockError::Poisoned(e)) => *e.into_inner() == SlotState::Available,
            Err(TryLockError::WouldBlock) => false,
        }
    }

    /// Hand the slot to the post queue
    pub fn submit(&self, index: usize) -> Result<()> {
        let slot = self.slot(index)?;
        let mut state = lock(slot);
        if *state != SlotState::Available {
            return Err(Error::InvalidState(format!("slot {} submitted while {:?}", index, *state)));
        }
        *state = SlotState::Submitted;
        Ok(())
    }

    /// Mark the slot as being scanned out
    pub fn reference(&self, index: usize) -> Result<()> {
        let slot = self.slot(index)?;
        let mut state = lock(slot);
        if *state != SlotState::Submitted {
            warn!("slot {} referenced while {:?}", index, *state);
        }
        *state = SlotState::Referenced;
        Ok(())
    }

    /// Give the slot back to the producer and wake its waiters
    pub fn release(&self, index: usize) -> Result<()> {
        let slot = self.slot(index)?;
        *lock(slot) = SlotState::Available;
        slot.released.notify_all();
        trace!("slot {} available", index);
        Ok(())
    }

    /// Block until the slot is available
    ///
    /// Fails once the ring is shut down and the slot is still claimed.
    pub fn wait_available(&self, index: usize) -> Result<()> {
        let slot = self.slot(index)?;
        let state = lock(slot);
        let state = slot
            .released
            .wait_while(state, |s| *s != SlotState::Available && !self.closed.load(Ordering::Acquire))
            .unwrap_or_else(PoisonError::into_inner);
        if *state != SlotState::Available {
            return Err(Error::InvalidState(format!("framebuffer closed while waiting for slot {}", index)));
        }
        Ok(())
    }

    /// Wake every waiter; later waits on claimed slots fail
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        for slot in &self.slots {
            let _state = lock(slot);
            slot.released.notify_all();
        }
    }
}
