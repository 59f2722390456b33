/*!
 * Lock
 * Mutual exclusion built on a binary semaphore, with priority donation
 */

use super::semaphore::{down_guarded, up_locked};
use crate::core::limits::PRI_MIN;
use crate::core::types::{LockId, Priority, SemaId, Tid};
use crate::mem::PageIndex;
use crate::sched::operations::cond_yield_locked;
use crate::sched::{CpuState, Kernel, SchedPolicy};
use std::sync::Arc;
use std::thread;

/// Backing state of one lock, stored in the CPU critical section
pub(crate) struct LockRec {
    pub holder: Option<PageIndex>,
    /// Donation ceiling: the strongest priority among threads currently
    /// waiting on the backing semaphore
    pub max_waiter: Priority,
    pub sema: SemaId,
}

fn rec_mut(cpu: &mut CpuState, id: LockId) -> &mut LockRec {
    match cpu.locks.get_mut(&id) {
        Some(rec) => rec,
        None => panic!("unknown lock id {id}"),
    }
}

impl CpuState {
    /// Remove a lock's record together with its backing semaphore.
    pub(crate) fn lock_destroy(&mut self, id: LockId) {
        if let Some(rec) = self.locks.remove(&id) {
            debug_assert!(rec.holder.is_none(), "lock {id} destroyed while held");
            self.sema_destroy(rec.sema);
        }
    }
}

/// Mutual exclusion lock.
///
/// Not recursive, and only the holder may release. Under the priority policy
/// a blocked acquirer donates its effective priority to a weaker holder for
/// the duration of the wait. Clones share the same lock; the last clone to
/// drop releases the kernel-side records.
#[derive(Clone)]
pub struct Lock {
    core: Arc<LockCore>,
}

struct LockCore {
    kernel: Kernel,
    id: LockId,
}

impl Drop for LockCore {
    fn drop(&mut self) {
        self.kernel.inner.cpu.lock().lock_destroy(self.id);
    }
}

impl Lock {
    #[must_use]
    pub fn new(kernel: &Kernel) -> Self {
        let id = {
            let mut cpu = kernel.inner.cpu.lock();
            let sema = cpu.sema_create(1);
            let id = cpu.next_lock;
            cpu.next_lock += 1;
            cpu.locks.insert(
                id,
                LockRec {
                    holder: None,
                    max_waiter: PRI_MIN,
                    sema,
                },
            );
            id
        };
        Self {
            core: Arc::new(LockCore {
                kernel: kernel.clone(),
                id,
            }),
        }
    }

    /// Acquire, blocking while another thread holds the lock.
    ///
    /// Before waiting, the caller donates its effective priority to a weaker
    /// holder (priority policy only). The donation is one hop: a holder that
    /// is itself waiting propagates through its own pending acquire.
    pub fn acquire(&self) {
        let id = self.core.id;
        let inner = &*self.core.kernel.inner;
        let mut cpu = inner.cpu.lock();
        assert!(!cpu.in_interrupt, "blocking operation in interrupt context");
        let cur = cpu.assert_current();

        let (holder, sema) = {
            let rec = rec_mut(&mut cpu, id);
            (rec.holder, rec.sema)
        };
        assert_ne!(
            holder,
            Some(cur),
            "lock already held by the caller (tid {})",
            cpu.arena[cur].tid
        );

        let donation = cpu.policy != SchedPolicy::Mlfqs;
        if donation {
            if let Some(holder) = holder {
                cpu.arena[cur].waiting_on = Some(id);
                let my_priority = cpu.arena[cur].priority;
                let raised = {
                    let rec = rec_mut(&mut cpu, id);
                    if my_priority > rec.max_waiter {
                        rec.max_waiter = my_priority;
                        true
                    } else {
                        false
                    }
                };
                if raised {
                    cpu.reorder_held(holder);
                    cpu.donate(holder, my_priority);
                }
            }
        }

        let mut cpu = down_guarded(inner, cpu, sema);
        cpu.arena[cur].waiting_on = None;
        {
            let CpuState { locks, semas, arena, .. } = &mut *cpu;
            let rec = match locks.get_mut(&id) {
                Some(rec) => rec,
                None => panic!("unknown lock id {id}"),
            };
            rec.holder = Some(cur);
            // The ceiling drops to the strongest residual waiter; the old
            // value followed the previous holder out through its release
            let residual = match semas.get(&sema) {
                Some(s) => s.waiters.iter().map(|&w| arena[w].priority).max(),
                None => panic!("unknown semaphore id {sema}"),
            };
            rec.max_waiter = residual.unwrap_or(PRI_MIN);
        }
        if donation {
            cpu.hold_lock(cur, id);
        }
    }

    /// Acquire without blocking; false if another thread holds the lock.
    /// Never donates.
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        let id = self.core.id;
        let mut cpu = self.core.kernel.inner.cpu.lock();
        let cur = cpu.assert_current();

        let (holder, sema) = {
            let rec = rec_mut(&mut cpu, id);
            (rec.holder, rec.sema)
        };
        assert_ne!(
            holder,
            Some(cur),
            "lock already held by the caller (tid {})",
            cpu.arena[cur].tid
        );

        let taken = {
            let rec = match cpu.semas.get_mut(&sema) {
                Some(rec) => rec,
                None => panic!("unknown semaphore id {sema}"),
            };
            if rec.value > 0 {
                rec.value -= 1;
                true
            } else {
                false
            }
        };
        if !taken {
            return false;
        }
        rec_mut(&mut cpu, id).holder = Some(cur);
        if cpu.policy != SchedPolicy::Mlfqs {
            cpu.hold_lock(cur, id);
        }
        true
    }

    /// Release and wake the strongest waiter, FIFO among equals. Holder only.
    ///
    /// The caller's priority reverts to its strongest remaining donation, or
    /// to its base priority when none remains. A woken waiter that outranks
    /// the caller gets the CPU before this returns.
    pub fn release(&self) {
        let id = self.core.id;
        let inner = &*self.core.kernel.inner;
        let mut cpu = inner.cpu.lock();
        assert!(!cpu.in_interrupt, "blocking operation in interrupt context");
        let cur = cpu.assert_current();

        let (holder, sema) = {
            let rec = rec_mut(&mut cpu, id);
            (rec.holder, rec.sema)
        };
        assert_eq!(
            holder,
            Some(cur),
            "lock released by a thread that does not hold it (tid {})",
            cpu.arena[cur].tid
        );

        rec_mut(&mut cpu, id).holder = None;
        if cpu.policy != SchedPolicy::Mlfqs {
            cpu.remove_lock(cur, id);
        }
        let woken = up_locked(inner, &mut cpu, sema);
        if woken.is_some() {
            cond_yield_locked(inner, cpu);
        }
    }

    /// Tid of the holding thread, if any
    #[must_use]
    pub fn holder(&self) -> Option<Tid> {
        let cpu = self.core.kernel.inner.cpu.lock();
        let rec = match cpu.locks.get(&self.core.id) {
            Some(rec) => rec,
            None => panic!("unknown lock id {}", self.core.id),
        };
        rec.holder.map(|index| cpu.arena[index].tid)
    }

    /// Whether the calling thread holds this lock
    #[must_use]
    pub fn held_by_current(&self) -> bool {
        let cpu = self.core.kernel.inner.cpu.lock();
        let rec = match cpu.locks.get(&self.core.id) {
            Some(rec) => rec,
            None => panic!("unknown lock id {}", self.core.id),
        };
        rec.holder
            .is_some_and(|index| cpu.arena[index].host == Some(thread::current().id()))
    }
}
