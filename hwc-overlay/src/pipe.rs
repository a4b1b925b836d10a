//! Pipe allocator
//!
//! Every display owns a bank of hardware pipe slots. The external and
//! virtual displays share one bank because they hang off the same mixer.
//! A single lock serializes every acquire and release across all banks.

use std::sync::Arc;

use hwc_api::{DisplayId, Error, PipeIndex, Result};
use log::{debug, error};
use spin::Mutex;
use static_assertions::const_assert;

use crate::config::{MAX_BANK_PIPES, PipeConfig};

const_assert!(MAX_BANK_PIPES <= u32::BITS);

const BANK_COUNT: usize = 2;

#[derive(Debug, Clone, Copy)]
struct Bank {
    capacity: u32,
    in_use: u32,
}

impl Bank {
    fn first_free(&self) -> Option<u32> {
        (0..self.capacity).find(|&i| self.in_use & (1u32 << i) == 0)
    }
}

#[derive(Debug)]
struct Banks {
    banks: [Bank; BANK_COUNT],
    total: u32,
    max_total: u32,
}

/// Grants pipe slots per display
#[derive(Debug)]
pub struct PipeAllocator {
    inner: Mutex<Banks>,
}

const fn bank_of(display: DisplayId) -> usize {
    match display {
        DisplayId::Primary => 0,
        DisplayId::External | DisplayId::Virtual => 1,
    }
}

impl PipeAllocator {
    /// Create an allocator with the given bank sizes
    pub fn new(config: &PipeConfig) -> Self {
        let bank = |capacity: u32| Bank { capacity: capacity.min(MAX_BANK_PIPES), in_use: 0 };
        Self {
            inner: Mutex::new(Banks {
                banks: [bank(config.primary), bank(config.external)],
                total: 0,
                max_total: config.max_total,
            }),
        }
    }

    /// Take the lowest free slot of the display's bank
    ///
    /// `None` means the bank (or the whole mixer) is exhausted.
    pub fn acquire(&self, display: DisplayId) -> Option<PipeIndex> {
        let mut banks = self.inner.lock();
        if banks.total >= banks.max_total {
            debug!("no free pipes, {} in use", banks.total);
            return None;
        }
        let bank = &mut banks.banks[bank_of(display)];
        let index = bank.first_free()?;
        bank.in_use |= 1 << index;
        banks.total += 1;
        debug!("pipe {} acquired for {:?}, {} in use", index, display, banks.total);
        Some(PipeIndex(index))
    }

    /// Return a slot to the display's bank
    pub fn release(&self, display: DisplayId, index: PipeIndex) -> Result<()> {
        let mut banks = self.inner.lock();
        let bank = &mut banks.banks[bank_of(display)];
        let mask = 1u32.checked_shl(index.0).unwrap_or(0);
        if index.0 >= bank.capacity || bank.in_use & mask == 0 {
            error!("release of pipe {} on {:?} which is not held", index.0, display);
            return Err(Error::InvalidState(format!("pipe {} on {:?} is not held", index.0, display)));
        }
        bank.in_use &= !mask;
        banks.total -= 1;
        debug!("pipe {} released for {:?}, {} in use", index.0, display, banks.total);
        Ok(())
    }

    /// Acquire a slot wrapped in a lease that releases it when dropped
    pub fn lease(self: &Arc<Self>, display: DisplayId) -> Result<PipeLease> {
        let index = self
            .acquire(display)
            .ok_or_else(|| Error::ResourceExhausted(format!("no free pipe for {:?}", display)))?;
        Ok(PipeLease { allocator: Arc::clone(self), display, index })
    }

    /// Slots in use in the display's bank
    pub fn in_use(&self, display: DisplayId) -> u32 {
        self.inner.lock().banks[bank_of(display)].in_use.count_ones()
    }

    /// Slots in use across every bank
    pub fn total_in_use(&self) -> u32 {
        self.inner.lock().total
    }
}

/// A held pipe slot
#[derive(Debug)]
pub struct PipeLease {
    allocator: Arc<PipeAllocator>,
    display: DisplayId,
    index: PipeIndex,
}

impl PipeLease {
    pub fn index(&self) -> PipeIndex {
        self.index
    }

    pub fn display(&self) -> DisplayId {
        self.display
    }
}

impl Drop for PipeLease {
    fn drop(&mut self) {
        // Errors are already logged by release
        let _ = self.allocator.release(self.display, self.index);
    }
}
