/*!
 * Priority Donation
 * Single-hop donation through lock ownership, plus direct priority control
 */

use super::operations::yield_locked;
use super::tcb::ThreadState;
use super::{CpuState, Kernel, SchedPolicy};
use crate::core::limits::valid_priority;
use crate::core::types::{LockId, Priority};
use crate::mem::PageIndex;
use log::debug;

impl CpuState {
    /// Record a newly acquired lock, ordered by max-waiter priority
    /// descending so the top entry is the strongest donation source.
    pub(crate) fn hold_lock(&mut self, holder: PageIndex, lock: LockId) {
        let CpuState { arena, locks, .. } = self;
        let priority = locks[&lock].max_waiter;
        let held = &mut arena[holder].held_locks;
        let pos = held
            .iter()
            .position(|l| locks[l].max_waiter < priority)
            .unwrap_or(held.len());
        held.insert(pos, lock);
    }

    /// Drop a released lock and revert to the strongest remaining donation,
    /// or exactly the base priority when none remains.
    pub(crate) fn remove_lock(&mut self, holder: PageIndex, lock: LockId) {
        let CpuState { arena, locks, .. } = self;
        let tcb = &mut arena[holder];
        tcb.held_locks.retain(|&l| l != lock);
        tcb.priority = match tcb.held_locks.first() {
            Some(top) => tcb.base_priority.max(locks[top].max_waiter),
            None => tcb.base_priority,
        };
    }

    /// Restore the descending max-waiter order of a holder's held list after
    /// a donation raised one lock's ceiling.
    pub(crate) fn reorder_held(&mut self, holder: PageIndex) {
        let CpuState { arena, locks, .. } = self;
        arena[holder]
            .held_locks
            .sort_by_key(|&l| std::cmp::Reverse(locks[&l].max_waiter));
    }

    /// Raise the holder to the donor's priority. One hop only: a holder that
    /// is itself blocked on another lock is not chased; deeper propagation
    /// happens through that thread's own pending acquire.
    pub(crate) fn donate(&mut self, holder: PageIndex, priority: Priority) {
        let needs_requeue = {
            let tcb = &mut self.arena[holder];
            if priority <= tcb.priority {
                return;
            }
            debug!(
                "Priority donation: tid {} raised {} -> {priority}",
                tcb.tid, tcb.priority
            );
            tcb.priority = priority;
            tcb.state == ThreadState::Ready
        };
        if needs_requeue {
            let CpuState { ready, arena, .. } = self;
            ready.reposition(holder, |i| arena[i].priority);
        }
    }
}

impl Kernel {
    /// Set the calling thread's base priority.
    ///
    /// The base is always recorded. The effective priority changes
    /// immediately only when no donation is masking it (no locks held) or
    /// when the new value exceeds the current effective value; either way
    /// a recorded-only change surfaces once donations unwind. When the
    /// effective priority changes, the caller yields.
    ///
    /// Ignored under the MLFQS policy, where priorities are computed.
    pub fn set_priority(&self, new_priority: Priority) {
        assert!(valid_priority(new_priority), "priority {new_priority} out of range");
        let inner = &*self.inner;
        let mut cpu = inner.cpu.lock();
        assert!(!cpu.in_interrupt, "blocking operation in interrupt context");
        let cur = cpu.assert_current();

        if cpu.policy == SchedPolicy::Mlfqs {
            debug!("set_priority ignored under mlfqs policy");
            return;
        }

        let tcb = &mut cpu.arena[cur];
        tcb.base_priority = new_priority;
        if tcb.held_locks.is_empty() || new_priority > tcb.priority {
            tcb.priority = new_priority;
            yield_locked(inner, cpu);
        }
    }

    /// Effective priority of the current thread, donations included
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.inner.cpu.lock().current().priority
    }

    /// Base priority of the current thread, donations excluded
    #[must_use]
    pub fn base_priority(&self) -> Priority {
        self.inner.cpu.lock().current().base_priority
    }
}
