/*!
 * Page Arena
 *
 * Fixed-capacity pool of page-sized slots addressed by a simulated linear
 * address range. Every thread control block lives in exactly one slot, and
 * the slot's base address doubles as the thread's stack page: masking any
 * stack address down to a page boundary recovers the owning slot in O(1).
 *
 * Slot 0 begins at `PAGE_SIZE`, not at address zero, so a masked null
 * pointer never resolves to a live thread.
 */

use crate::core::limits::PAGE_SIZE;
use crate::core::types::Addr;
use std::ops::{Index, IndexMut};

const ARENA_BASE: Addr = PAGE_SIZE;

/// Handle to one occupied or vacant page slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageIndex(usize);

impl PageIndex {
    #[inline]
    pub(crate) const fn new(slot: usize) -> Self {
        PageIndex(slot)
    }

    /// Slot position within the arena
    #[inline]
    #[must_use]
    pub const fn slot(self) -> usize {
        self.0
    }

    /// Simulated base address of this slot's page
    #[inline]
    #[must_use]
    pub const fn page_base(self) -> Addr {
        ARENA_BASE + self.0 * PAGE_SIZE
    }

    /// One past the highest address of this slot's page
    #[inline]
    #[must_use]
    pub const fn stack_top(self) -> Addr {
        self.page_base() + PAGE_SIZE
    }
}

/// Fixed-capacity slab of page slots with a LIFO free list
pub struct PageArena<T> {
    slots: Vec<Option<T>>,
    free: Vec<usize>,
}

impl<T> PageArena<T> {
    /// Create an arena with `pages` vacant slots
    #[must_use]
    pub fn new(pages: usize) -> Self {
        let mut slots = Vec::with_capacity(pages);
        slots.resize_with(pages, || None);
        // Reverse order so the first allocations pop slots 0, 1, 2, ...
        let free: Vec<usize> = (0..pages).rev().collect();
        Self { slots, free }
    }

    /// Claim a slot and initialize it with a value built from its own index.
    ///
    /// Returns `None` when every slot is occupied.
    pub fn alloc_with(&mut self, init: impl FnOnce(PageIndex) -> T) -> Option<PageIndex> {
        let slot = self.free.pop()?;
        let index = PageIndex(slot);
        self.slots[slot] = Some(init(index));
        Some(index)
    }

    /// Release an occupied slot, returning its value.
    ///
    /// # Panics
    /// Panics if the slot is vacant. Freeing twice is a lifecycle bug in the
    /// caller, never a recoverable condition.
    pub fn free(&mut self, index: PageIndex) -> T {
        let value = self.slots[index.0]
            .take()
            .unwrap_or_else(|| panic!("free of vacant page slot {}", index.0));
        self.free.push(index.0);
        value
    }

    #[inline]
    #[must_use]
    pub fn get(&self, index: PageIndex) -> Option<&T> {
        self.slots.get(index.0).and_then(Option::as_ref)
    }

    #[inline]
    #[must_use]
    pub fn get_mut(&mut self, index: PageIndex) -> Option<&mut T> {
        self.slots.get_mut(index.0).and_then(Option::as_mut)
    }

    /// Resolve an address anywhere inside an occupied page back to its slot.
    ///
    /// Masks the low bits, so any stack address within the page works, not
    /// just the base.
    #[must_use]
    pub fn index_of(&self, addr: Addr) -> Option<PageIndex> {
        let base = addr & !(PAGE_SIZE - 1);
        if base < ARENA_BASE {
            return None;
        }
        let slot = (base - ARENA_BASE) / PAGE_SIZE;
        if slot >= self.slots.len() || self.slots[slot].is_none() {
            return None;
        }
        Some(PageIndex(slot))
    }

    /// Number of occupied slots
    #[inline]
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Total slot count
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Iterate over occupied slots
    pub fn iter(&self) -> impl Iterator<Item = (PageIndex, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|value| (PageIndex(i), value)))
    }

    /// Iterate mutably over occupied slots
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (PageIndex, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_mut().map(|value| (PageIndex(i), value)))
    }
}

impl<T> Index<PageIndex> for PageArena<T> {
    type Output = T;

    fn index(&self, index: PageIndex) -> &T {
        match self.slots[index.0].as_ref() {
            Some(value) => value,
            None => panic!("access to vacant page slot {}", index.0),
        }
    }
}

impl<T> IndexMut<PageIndex> for PageArena<T> {
    fn index_mut(&mut self, index: PageIndex) -> &mut T {
        match self.slots[index.0].as_mut() {
            Some(value) => value,
            None => panic!("access to vacant page slot {}", index.0),
        }
    }
}
