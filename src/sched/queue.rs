/*!
 * Scheduler Queues
 * Ready queue (priority descending, FIFO among equals) and sleep queue
 * (wakeup tick ascending, FIFO among equals)
 */

use crate::core::types::{Priority, Tick};
use crate::mem::PageIndex;
use std::collections::VecDeque;

/// Ready queue, kept sorted so the head is always the next thread to run.
///
/// Priorities live in the TCBs, not here, so every ordering operation takes
/// a key closure. Insertion goes after the last entry of equal priority,
/// which gives round-robin rotation among peers.
#[derive(Default)]
pub struct ReadyQueue {
    items: VecDeque<PageIndex>,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert in priority order, after all entries of equal or higher priority
    pub fn push(&mut self, index: PageIndex, key: impl Fn(PageIndex) -> Priority) {
        let priority = key(index);
        let pos = self
            .items
            .iter()
            .position(|&e| key(e) < priority)
            .unwrap_or(self.items.len());
        self.items.insert(pos, index);
    }

    /// Remove and return the highest-priority entry
    #[inline]
    pub fn pop_front(&mut self) -> Option<PageIndex> {
        self.items.pop_front()
    }

    /// Highest-priority entry without removing it
    #[inline]
    #[must_use]
    pub fn head(&self) -> Option<PageIndex> {
        self.items.front().copied()
    }

    /// Remove a specific entry; false if it was not queued
    pub fn remove(&mut self, index: PageIndex) -> bool {
        match self.items.iter().position(|&e| e == index) {
            Some(pos) => {
                self.items.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Move an entry to the slot matching its current priority.
    ///
    /// Used when a donation changes the priority of a READY thread.
    pub fn reposition(&mut self, index: PageIndex, key: impl Fn(PageIndex) -> Priority) {
        if self.remove(index) {
            self.push(index, key);
        }
    }

    /// Stable re-sort of the whole queue after a bulk priority recompute
    pub fn resort(&mut self, key: impl Fn(PageIndex) -> Priority) {
        let mut entries: Vec<PageIndex> = self.items.drain(..).collect();
        entries.sort_by_key(|&e| std::cmp::Reverse(key(e)));
        self.items.extend(entries);
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, index: PageIndex) -> bool {
        self.items.contains(&index)
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = PageIndex> + '_ {
        self.items.iter().copied()
    }
}

/// Sleep queue ordered by wakeup tick so the timer scan stops at the first
/// entry that is not yet due.
#[derive(Default)]
pub struct SleepQueue {
    items: VecDeque<(Tick, PageIndex)>,
}

impl SleepQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert in deadline order, after all entries due at the same tick
    pub fn push(&mut self, index: PageIndex, wake_at: Tick) {
        let pos = self
            .items
            .iter()
            .position(|&(t, _)| t > wake_at)
            .unwrap_or(self.items.len());
        self.items.insert(pos, (wake_at, index));
    }

    /// Remove and return the earliest sleeper if its deadline has arrived
    pub fn pop_due(&mut self, now: Tick) -> Option<PageIndex> {
        match self.items.front() {
            Some(&(wake_at, _)) if wake_at <= now => self.items.pop_front().map(|(_, i)| i),
            _ => None,
        }
    }

    /// Deadline of the earliest sleeper
    #[inline]
    #[must_use]
    pub fn next_wakeup(&self) -> Option<Tick> {
        self.items.front().map(|&(t, _)| t)
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
