//! Per-task thunk pools.
//!
//! A thunk binds an opaque context value to an indirect call target so that
//! higher layers can hand legacy code a single callable entry point. Thunks
//! are fixed-size, so a pool is a list of equally sized blocks whose vacant
//! slots are threaded into one intrusive free list:
//!
//! - `alloc` pops the free-list head, growing the pool by one block when the
//!   list is empty
//! - `free` pushes the slot back; O(1), no coalescing
//! - every operation validates the owner and slot state, so double frees and
//!   foreign thunks are reported instead of corrupting the list
//!
//! Binding stores a function pointer plus context in the slot (a closure
//! table) rather than generating code.

use crate::error::{Error, Result, ThunkFault};
use crate::tracing_compat::{trace, warn};
use crate::types::TaskHandle;
use core::fmt;

/// Nominal size of one thunk slot, used to derive its address.
pub const THUNK_SIZE: u32 = 8;

/// Call target of a bound thunk: receives the bound context and the caller's argument.
pub type ThunkTarget = fn(context: u64, arg: u32) -> u32;

/// A slot handed out by a [`ThunkPool`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Thunk {
    owner: TaskHandle,
    block: u16,
    slot: u16,
}

impl Thunk {
    /// Creates a thunk value from raw parts, for tests.
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(owner: TaskHandle, block: u16, slot: u16) -> Self {
        Self { owner, block, slot }
    }

    /// Task whose pool issued this thunk.
    #[must_use]
    pub const fn owner(&self) -> TaskHandle {
        self.owner
    }

    /// Block number inside the pool.
    #[must_use]
    pub const fn block(&self) -> u16 {
        self.block
    }

    /// Slot number inside the block.
    #[must_use]
    pub const fn slot(&self) -> u16 {
        self.slot
    }

    /// Block-relative address: block in the high half, byte offset in the low half.
    #[must_use]
    pub const fn address(&self) -> u32 {
        ((self.block as u32) << 16) | (self.slot as u32 * THUNK_SIZE)
    }
}

impl fmt::Debug for Thunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Thunk({}:{}.{})", self.owner, self.block, self.slot)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct SlotRef {
    block: u16,
    slot: u16,
}

#[derive(Clone, Copy, Debug)]
enum ThunkSlot {
    Free { next: Option<SlotRef> },
    Allocated,
    Bound { target: ThunkTarget, context: u64 },
}

/// Usage counters of a pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ThunkStats {
    /// Slots currently handed out.
    pub in_use: usize,
    /// Total slots across all blocks.
    pub capacity: usize,
    /// Number of blocks allocated so far.
    pub blocks: usize,
}

/// Pool of thunk slots scoped to one task.
#[derive(Debug)]
pub struct ThunkPool {
    owner: TaskHandle,
    blocks: Vec<Box<[ThunkSlot]>>,
    free_head: Option<SlotRef>,
    slots_per_block: u16,
    max_blocks: usize,
    in_use: usize,
}

impl ThunkPool {
    /// Creates an empty pool. No block is allocated until the first `alloc`.
    #[must_use]
    pub fn new(owner: TaskHandle, slots_per_block: usize, max_blocks: usize) -> Self {
        let slots_per_block = u16::try_from(slots_per_block.max(1)).unwrap_or(u16::MAX);
        Self {
            owner,
            blocks: Vec::new(),
            free_head: None,
            slots_per_block,
            max_blocks: max_blocks.clamp(1, usize::from(u16::MAX)),
            in_use: 0,
        }
    }

    /// Returns the usage counters.
    #[must_use]
    pub fn stats(&self) -> ThunkStats {
        ThunkStats {
            in_use: self.in_use,
            capacity: self.blocks.len() * usize::from(self.slots_per_block),
            blocks: self.blocks.len(),
        }
    }

    /// Hands out a free slot, growing the pool by one block if necessary.
    pub fn alloc(&mut self) -> Result<Thunk> {
        if self.free_head.is_none() {
            self.grow()?;
        }
        let Some(head) = self.free_head else {
            unreachable!("grow left the free list empty");
        };
        let slot = &mut self.blocks[usize::from(head.block)][usize::from(head.slot)];
        let ThunkSlot::Free { next } = *slot else {
            unreachable!("free list head {head:?} is not free");
        };
        *slot = ThunkSlot::Allocated;
        self.free_head = next;
        self.in_use += 1;

        let thunk = Thunk {
            owner: self.owner,
            block: head.block,
            slot: head.slot,
        };
        trace!(thunk = ?thunk, in_use = self.in_use, "thunk allocated");
        Ok(thunk)
    }

    /// Returns a slot to the free list.
    pub fn free(&mut self, thunk: Thunk) -> Result<()> {
        let free_head = self.free_head;
        let slot = self.slot_mut(thunk)?;
        if matches!(slot, ThunkSlot::Free { .. }) {
            return Err(self.reject(thunk, ThunkFault::AlreadyFree));
        }
        *slot = ThunkSlot::Free { next: free_head };
        self.free_head = Some(SlotRef {
            block: thunk.block,
            slot: thunk.slot,
        });
        self.in_use -= 1;
        trace!(thunk = ?thunk, in_use = self.in_use, "thunk freed");
        Ok(())
    }

    /// Binds an allocated slot to a call target and context value.
    ///
    /// Rebinding an already bound slot replaces the previous pair.
    pub fn bind(&mut self, thunk: Thunk, target: ThunkTarget, context: u64) -> Result<()> {
        let slot = self.slot_mut(thunk)?;
        if matches!(slot, ThunkSlot::Free { .. }) {
            return Err(self.reject(thunk, ThunkFault::AlreadyFree));
        }
        *slot = ThunkSlot::Bound { target, context };
        Ok(())
    }

    /// Looks up the `(target, context)` pair bound to `thunk`.
    pub fn resolve(&self, thunk: Thunk) -> Result<(ThunkTarget, u64)> {
        match self.slot(thunk)? {
            ThunkSlot::Bound { target, context } => Ok((*target, *context)),
            ThunkSlot::Allocated => Err(self.reject(thunk, ThunkFault::Unbound)),
            ThunkSlot::Free { .. } => Err(self.reject(thunk, ThunkFault::AlreadyFree)),
        }
    }

    fn grow(&mut self) -> Result<()> {
        if self.blocks.len() >= self.max_blocks {
            return Err(Error::OutOfResources {
                resource: "thunk blocks",
                requested: self.blocks.len() + 1,
                limit: self.max_blocks,
            });
        }
        let block = u16::try_from(self.blocks.len()).map_err(|_| Error::OutOfResources {
            resource: "thunk blocks",
            requested: self.blocks.len() + 1,
            limit: self.max_blocks,
        })?;

        let count = self.slots_per_block;
        let slots: Box<[ThunkSlot]> = (0..count)
            .map(|slot| {
                let next = if slot + 1 < count {
                    Some(SlotRef {
                        block,
                        slot: slot + 1,
                    })
                } else {
                    self.free_head
                };
                ThunkSlot::Free { next }
            })
            .collect();
        self.blocks.push(slots);
        self.free_head = Some(SlotRef { block, slot: 0 });
        trace!(owner = ?self.owner, block, slots = count, "thunk pool grown");
        Ok(())
    }

    fn check(&self, thunk: Thunk) -> Result<(usize, usize)> {
        if thunk.owner != self.owner {
            return Err(self.reject(thunk, ThunkFault::ForeignOwner));
        }
        let (block, slot) = (usize::from(thunk.block), usize::from(thunk.slot));
        if block >= self.blocks.len() || slot >= usize::from(self.slots_per_block) {
            return Err(self.reject(thunk, ThunkFault::OutOfRange));
        }
        Ok((block, slot))
    }

    fn slot(&self, thunk: Thunk) -> Result<&ThunkSlot> {
        let (block, slot) = self.check(thunk)?;
        Ok(&self.blocks[block][slot])
    }

    fn slot_mut(&mut self, thunk: Thunk) -> Result<&mut ThunkSlot> {
        let (block, slot) = self.check(thunk)?;
        Ok(&mut self.blocks[block][slot])
    }

    fn reject(&self, thunk: Thunk, fault: ThunkFault) -> Error {
        warn!(owner = ?self.owner, thunk = ?thunk, %fault, "thunk rejected");
        Error::InvalidThunk {
            handle: self.owner,
            thunk,
            fault,
        }
    }
}
