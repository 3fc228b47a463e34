//! Generational arena backing the task descriptor store.
//!
//! Descriptors live in a `Vec` of slots. A slot carries a generation counter
//! that is bumped every time its occupant is removed, so an index that
//! outlives its descriptor (a handle held across a physical delete) can never
//! resolve to the task that later reuses the slot.
//!
//! # Design
//!
//! - Vacant slots are threaded into an intrusive free list (`next_free`)
//! - `try_insert` enforces a slot cap so the store can report exhaustion
//!   instead of growing without bound
//! - No unsafe code; relies on bounds checking and generation validation

use core::fmt;
use core::hash::{Hash, Hasher};

/// An index into an [`Arena`] with a generation counter for ABA safety.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ArenaIndex {
    index: u32,
    generation: u32,
}

impl ArenaIndex {
    /// Creates an arena index from raw parts.
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Returns the slot number.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Returns the generation the slot had when this index was issued.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for ArenaIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArenaIndex({}:{})", self.index, self.generation)
    }
}

impl Hash for ArenaIndex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let packed = (u64::from(self.index) << 32) | u64::from(self.generation);
        state.write_u64(packed);
    }
}

#[derive(Debug)]
enum Slot<T> {
    Occupied { value: T, generation: u32 },
    Vacant { next_free: Option<u32>, generation: u32 },
}

/// Generational arena with an optional cap on occupied slots.
#[derive(Debug)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
    limit: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Creates an empty, uncapped arena.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_limit(usize::MAX)
    }

    /// Creates an empty arena that holds at most `limit` live values.
    #[must_use]
    pub const fn with_limit(limit: usize) -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            len: 0,
            limit,
        }
    }

    /// Returns the number of occupied slots.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no slot is occupied.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the maximum number of live values.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Returns true if another insert would exceed the cap.
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.len >= self.limit
    }

    /// Inserts a value built from its own index.
    ///
    /// The closure receives the index the value will live at, so records can
    /// embed their handle. Returns `None` (and does not call `f`) when the
    /// arena is at its cap or the slot space is exhausted.
    pub fn try_insert_with<F>(&mut self, f: F) -> Option<ArenaIndex>
    where
        F: FnOnce(ArenaIndex) -> T,
    {
        if self.is_full() {
            return None;
        }

        let idx = if let Some(free_index) = self.free_head {
            let slot = &mut self.slots[free_index as usize];
            let Slot::Vacant {
                next_free,
                generation,
            } = *slot
            else {
                unreachable!("free list pointed to occupied slot {free_index}");
            };
            self.free_head = next_free;
            let idx = ArenaIndex::new(free_index, generation);
            *slot = Slot::Occupied {
                value: f(idx),
                generation,
            };
            idx
        } else {
            let index = u32::try_from(self.slots.len()).ok()?;
            let idx = ArenaIndex::new(index, 0);
            self.slots.push(Slot::Occupied {
                value: f(idx),
                generation: 0,
            });
            idx
        };

        self.len += 1;
        Some(idx)
    }

    /// Inserts a value, returning `None` when the arena is full.
    #[cfg(test)]
    pub fn try_insert(&mut self, value: T) -> Option<ArenaIndex> {
        self.try_insert_with(|_| value)
    }

    /// Removes and returns the value at `index`.
    ///
    /// Returns `None` for stale or vacant indices.
    pub fn remove(&mut self, index: ArenaIndex) -> Option<T> {
        let slot = self.slots.get_mut(index.index as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == index.generation => {
                let vacant = Slot::Vacant {
                    next_free: self.free_head,
                    generation: generation.wrapping_add(1),
                };
                let Slot::Occupied { value, .. } = core::mem::replace(slot, vacant) else {
                    unreachable!("slot checked occupied above");
                };
                self.free_head = Some(index.index);
                self.len -= 1;
                Some(value)
            }
            _ => None,
        }
    }

    /// Returns a reference to the value at `index`.
    #[must_use]
    pub fn get(&self, index: ArenaIndex) -> Option<&T> {
        match self.slots.get(index.index as usize)? {
            Slot::Occupied { value, generation } if *generation == index.generation => Some(value),
            _ => None,
        }
    }

    /// Returns a mutable reference to the value at `index`.
    pub fn get_mut(&mut self, index: ArenaIndex) -> Option<&mut T> {
        match self.slots.get_mut(index.index as usize)? {
            Slot::Occupied { value, generation } if *generation == index.generation => Some(value),
            _ => None,
        }
    }

    /// Returns true if `index` refers to a live value.
    #[must_use]
    pub fn contains(&self, index: ArenaIndex) -> bool {
        self.get(index).is_some()
    }

    /// Iterates over all live values in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (ArenaIndex, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| match slot {
                Slot::Occupied { value, generation } => {
                    let index = u32::try_from(i).ok()?;
                    Some((ArenaIndex::new(index, *generation), value))
                }
                Slot::Vacant { .. } => None,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get() {
        let mut arena = Arena::new();
        let idx = arena.try_insert(42).unwrap();
        assert_eq!(arena.get(idx), Some(&42));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn removed_slot_is_reused_with_new_generation() {
        let mut arena = Arena::new();
        let first = arena.try_insert("a").unwrap();
        let second = arena.try_insert("b").unwrap();

        assert_eq!(arena.remove(first), Some("a"));
        assert_eq!(arena.get(first), None);

        let third = arena.try_insert("c").unwrap();
        assert_eq!(third.index(), first.index());
        assert_ne!(third.generation(), first.generation());
        assert_eq!(arena.get(second), Some(&"b"));
        assert_eq!(arena.get(third), Some(&"c"));

        // The stale index cannot remove the new occupant.
        assert_eq!(arena.remove(first), None);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn limit_rejects_without_calling_constructor() {
        let mut arena = Arena::with_limit(2);
        arena.try_insert(1).unwrap();
        arena.try_insert(2).unwrap();
        assert!(arena.is_full());

        let mut called = false;
        let rejected = arena.try_insert_with(|_| {
            called = true;
            3
        });
        assert!(rejected.is_none());
        assert!(!called);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn insert_with_sees_final_index() {
        let mut arena = Arena::new();
        arena.try_insert(0_u32).unwrap();
        let idx = arena.try_insert_with(ArenaIndex::index).unwrap();
        assert_eq!(arena.get(idx), Some(&1));
    }

    #[test]
    fn iter_skips_vacant_slots() {
        let mut arena = Arena::new();
        let a = arena.try_insert('a').unwrap();
        let b = arena.try_insert('b').unwrap();
        let c = arena.try_insert('c').unwrap();
        arena.remove(b);

        let seen: Vec<_> = arena.iter().map(|(idx, v)| (idx, *v)).collect();
        assert_eq!(seen, vec![(a, 'a'), (c, 'c')]);
    }
}
