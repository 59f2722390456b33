/*!
 * Semaphore
 * Counting semaphore integrated with the scheduler critical section
 */

use crate::core::types::SemaId;
use crate::mem::{PageArena, PageIndex};
use crate::sched::operations::{cond_yield_locked, dispatch_relock, unblock_locked};
use crate::sched::tcb::{Tcb, ThreadState};
use crate::sched::{CpuState, Kernel, KernelInner};
use parking_lot::MutexGuard;
use std::sync::Arc;

/// Backing state of one semaphore, stored in the CPU critical section
pub(crate) struct SemaRec {
    pub value: usize,
    /// Blocked downers; the wake path removes the strongest, FIFO among
    /// equals, scanning priorities live so donations are honored
    pub waiters: Vec<PageIndex>,
}

impl CpuState {
    pub(crate) fn sema_create(&mut self, value: usize) -> SemaId {
        let id = self.next_sema;
        self.next_sema += 1;
        self.semas.insert(
            id,
            SemaRec {
                value,
                waiters: Vec::new(),
            },
        );
        id
    }

    /// Remove a semaphore's record. Every id is destroyed exactly once, by
    /// whichever side owns the teardown; a waiter still parked on it would
    /// never wake.
    pub(crate) fn sema_destroy(&mut self, id: SemaId) {
        if let Some(rec) = self.semas.remove(&id) {
            debug_assert!(
                rec.waiters.is_empty(),
                "semaphore {id} destroyed with blocked waiters"
            );
        }
    }
}

fn rec_mut(cpu: &mut CpuState, id: SemaId) -> &mut SemaRec {
    match cpu.semas.get_mut(&id) {
        Some(rec) => rec,
        None => panic!("unknown semaphore id {id}"),
    }
}

fn take_best_waiter(rec: &mut SemaRec, arena: &PageArena<Tcb>) -> Option<PageIndex> {
    if rec.waiters.is_empty() {
        return None;
    }
    let mut best = 0;
    for i in 1..rec.waiters.len() {
        if arena[rec.waiters[i]].priority > arena[rec.waiters[best]].priority {
            best = i;
        }
    }
    Some(rec.waiters.remove(best))
}

/// Increment and wake the strongest waiter. Never yields; the caller decides
/// what the wakeup means for preemption.
pub(crate) fn up_locked(
    inner: &KernelInner,
    cpu: &mut CpuState,
    id: SemaId,
) -> Option<PageIndex> {
    let woken = {
        let CpuState { semas, arena, .. } = cpu;
        let rec = match semas.get_mut(&id) {
            Some(rec) => rec,
            None => panic!("unknown semaphore id {id}"),
        };
        rec.value += 1;
        take_best_waiter(rec, arena)
    };
    if let Some(index) = woken {
        unblock_locked(inner, cpu, index);
    }
    woken
}

/// The blocking half of `down`, entered with the critical section held and
/// returning with it held once the decrement succeeds.
pub(crate) fn down_guarded<'a>(
    inner: &'a KernelInner,
    mut cpu: MutexGuard<'a, CpuState>,
    id: SemaId,
) -> MutexGuard<'a, CpuState> {
    assert!(!cpu.in_interrupt, "blocking operation in interrupt context");
    let cur = cpu.assert_current();
    loop {
        let rec = rec_mut(&mut cpu, id);
        if rec.value > 0 {
            rec.value -= 1;
            return cpu;
        }
        rec.waiters.push(cur);
        cpu.transition(cur, ThreadState::Blocked);
        cpu = dispatch_relock(inner, cpu);
    }
}

pub(crate) fn down_raw(kernel: &Kernel, id: SemaId) {
    let inner = &*kernel.inner;
    let cpu = inner.cpu.lock();
    drop(down_guarded(inner, cpu, id));
}

pub(crate) fn up_raw(kernel: &Kernel, id: SemaId) {
    let inner = &*kernel.inner;
    let mut cpu = inner.cpu.lock();
    up_locked(inner, &mut cpu, id);
}

/// Counting semaphore.
///
/// Clones share the same counter; thread bodies capture a clone. The last
/// clone to drop releases the kernel-side record. A waiter always holds a
/// clone, so a live waiter keeps the record alive.
#[derive(Clone)]
pub struct Semaphore {
    core: Arc<SemaCore>,
}

struct SemaCore {
    kernel: Kernel,
    id: SemaId,
}

impl Drop for SemaCore {
    fn drop(&mut self) {
        self.kernel.inner.cpu.lock().sema_destroy(self.id);
    }
}

impl Semaphore {
    /// Create with an initial value
    #[must_use]
    pub fn new(kernel: &Kernel, value: usize) -> Self {
        let id = kernel.inner.cpu.lock().sema_create(value);
        Self {
            core: Arc::new(SemaCore {
                kernel: kernel.clone(),
                id,
            }),
        }
    }

    /// Decrement, blocking the calling thread while the value is zero
    pub fn down(&self) {
        down_raw(&self.core.kernel, self.core.id);
    }

    /// Decrement without blocking; false if the value was zero
    #[must_use]
    pub fn try_down(&self) -> bool {
        let mut cpu = self.core.kernel.inner.cpu.lock();
        let rec = rec_mut(&mut cpu, self.core.id);
        if rec.value > 0 {
            rec.value -= 1;
            true
        } else {
            false
        }
    }

    /// Increment and wake the strongest waiter, FIFO among equals.
    ///
    /// Legal from interrupt context. A caller that owns the CPU yields to a
    /// woken thread that outranks it; any other caller leaves the preemption
    /// pending for the current thread's next interrupt return.
    pub fn up(&self) {
        let inner = &*self.core.kernel.inner;
        let mut cpu = inner.cpu.lock();
        let woken = up_locked(inner, &mut cpu, self.core.id);
        if let Some(index) = woken {
            if !cpu.in_interrupt && cpu.caller_is_current() {
                cond_yield_locked(inner, cpu);
            } else {
                let cur = cpu.current_index();
                if cpu.arena[index].priority > cpu.arena[cur].priority {
                    cpu.yield_pending = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::{KernelConfig, ThreadState};

    #[test]
    fn test_counting_without_blocking() {
        let kernel = Kernel::boot(KernelConfig::default()).unwrap();
        let sema = Semaphore::new(&kernel, 2);

        assert!(sema.try_down());
        assert!(sema.try_down());
        assert!(!sema.try_down());

        sema.up();
        assert!(sema.try_down());
    }

    #[test]
    fn test_down_blocks_until_up() {
        let kernel = Kernel::boot(KernelConfig::default()).unwrap();
        let sema = Semaphore::new(&kernel, 0);

        let (k, s) = (kernel.clone(), sema.clone());
        let tid = kernel
            .spawn("waiter", 40, move || {
                s.down();
                k.exit(9);
            })
            .unwrap();

        // The spawn preempted us and the child is parked in down()
        assert_eq!(kernel.thread_state(tid), Some(ThreadState::Blocked));

        sema.up();
        assert_eq!(kernel.wait_child(tid).unwrap(), 9);
    }

    #[test]
    fn test_collection_releases_handshake_records() {
        let kernel = Kernel::boot(KernelConfig::default()).unwrap();
        let baseline = kernel.inner.cpu.lock().semas.len();

        for round in 0..10 {
            let k = kernel.clone();
            let tid = kernel.spawn("job", 40, move || k.exit(round)).unwrap();
            assert_eq!(kernel.wait_child(tid).unwrap(), round);
        }
        // Every collected child returned the start/finish pair its spawn
        // registered
        assert_eq!(kernel.inner.cpu.lock().semas.len(), baseline);
    }

    #[test]
    fn test_dropped_semaphore_releases_its_record() {
        let kernel = Kernel::boot(KernelConfig::default()).unwrap();
        let baseline = kernel.inner.cpu.lock().semas.len();

        let sema = Semaphore::new(&kernel, 1);
        let extra = sema.clone();
        assert_eq!(kernel.inner.cpu.lock().semas.len(), baseline + 1);

        // A surviving clone keeps the record alive
        drop(sema);
        assert_eq!(kernel.inner.cpu.lock().semas.len(), baseline + 1);

        drop(extra);
        assert_eq!(kernel.inner.cpu.lock().semas.len(), baseline);
    }
}
