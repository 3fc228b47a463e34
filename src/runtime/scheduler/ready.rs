//! Intrusive priority-ordered ready list.
//!
//! The list stores only its head; the `next` links live in the
//! [`TaskDescriptor`]s themselves, addressed by generational handle.
//!
//! # Invariants
//!
//! - Priorities are non-increasing from head to tail
//! - Within a priority band, tasks appear in the order they were linked
//! - A descriptor is in the list iff its `linked` flag is set
//! - `len` equals the number of linked descriptors
//!
//! Linking walks past every task whose priority is `>=` the new one, so a
//! re-linked task lands at the tail of its band. Re-linking after each
//! dispatch is what gives round-robin service inside a band.

use crate::record::TaskDescriptor;
use crate::tracing_compat::trace;
use crate::types::TaskHandle;
use crate::util::Arena;

/// Head of the intrusive ready list.
#[derive(Debug, Default)]
pub struct ReadyList {
    head: Option<TaskHandle>,
    len: usize,
}

impl ReadyList {
    /// Creates an empty list.
    #[must_use]
    pub const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    /// Number of linked tasks.
    #[must_use]
    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if nothing is linked.
    #[must_use]
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// First linked task.
    #[must_use]
    #[inline]
    pub const fn head(&self) -> Option<TaskHandle> {
        self.head
    }

    /// Links `handle` at the tail of its priority band.
    ///
    /// Returns false if the task is unknown or already linked.
    ///
    /// # Complexity
    ///
    /// O(n) in the number of linked tasks.
    pub fn link(&mut self, handle: TaskHandle, arena: &mut Arena<TaskDescriptor>) -> bool {
        let priority = match arena.get(handle.arena_index()) {
            Some(desc) if !desc.linked => desc.priority,
            _ => return false,
        };

        let mut prev: Option<TaskHandle> = None;
        let mut cursor = self.head;
        while let Some(at) = cursor {
            let Some(desc) = arena.get(at.arena_index()) else {
                break;
            };
            if desc.priority < priority {
                break;
            }
            prev = Some(at);
            cursor = desc.next;
        }

        if let Some(desc) = arena.get_mut(handle.arena_index()) {
            desc.next = cursor;
            desc.linked = true;
        }
        match prev {
            None => self.head = Some(handle),
            Some(prev) => {
                if let Some(desc) = arena.get_mut(prev.arena_index()) {
                    desc.next = Some(handle);
                }
            }
        }
        self.len += 1;
        trace!(task = ?handle, priority, after = ?prev, "ready list link");
        true
    }

    /// Removes `handle` from the list. No-op if it is not linked.
    ///
    /// # Complexity
    ///
    /// O(n) scan; ready lists are short.
    pub fn unlink(&mut self, handle: TaskHandle, arena: &mut Arena<TaskDescriptor>) -> bool {
        let next = match arena.get(handle.arena_index()) {
            Some(desc) if desc.linked => desc.next,
            _ => return false,
        };

        if self.head == Some(handle) {
            self.head = next;
        } else {
            let mut cursor = self.head;
            while let Some(at) = cursor {
                let Some(desc) = arena.get_mut(at.arena_index()) else {
                    break;
                };
                if desc.next == Some(handle) {
                    desc.next = next;
                    break;
                }
                cursor = desc.next;
            }
        }

        if let Some(desc) = arena.get_mut(handle.arena_index()) {
            desc.next = None;
            desc.linked = false;
        }
        self.len -= 1;
        trace!(task = ?handle, "ready list unlink");
        true
    }

    /// Walks the list from the head.
    pub fn iter<'a>(&self, arena: &'a Arena<TaskDescriptor>) -> ReadyIter<'a> {
        ReadyIter {
            arena,
            cursor: self.head,
        }
    }

    /// First linked task with a pending event.
    #[must_use]
    pub fn first_ready(&self, arena: &Arena<TaskDescriptor>) -> Option<TaskHandle> {
        self.iter(arena)
            .find(|desc| desc.is_ready())
            .map(|desc| desc.handle)
    }
}

/// Iterator over linked descriptors in dispatch order.
#[derive(Debug)]
pub struct ReadyIter<'a> {
    arena: &'a Arena<TaskDescriptor>,
    cursor: Option<TaskHandle>,
}

impl<'a> Iterator for ReadyIter<'a> {
    type Item = &'a TaskDescriptor;

    fn next(&mut self) -> Option<Self::Item> {
        let at = self.cursor?;
        let desc = self.arena.get(at.arena_index())?;
        self.cursor = desc.next;
        Some(desc)
    }
}
