/*!
 * Scheduler Core Operations
 * Create, block, unblock, yield, sleep, tick, exit, and the dispatch path
 */

use super::context::RunGate;
use super::mlfqs::mlfqs_priority;
use super::tcb::{AddressSpace, DirHandle, Tcb, ThreadState};
use super::{CpuState, Kernel, KernelInner, SchedPolicy, STACK_RESERVE};
use crate::core::errors::{BootError, CreateError};
use crate::core::limits::{valid_priority, PRI_MIN};
use crate::core::types::{Priority, SemaId, Tick, Tid};
use crate::mem::PageIndex;
use crate::process::child::ChildRecord;
use crate::sync::semaphore;
use log::{debug, error, warn};
use parking_lot::MutexGuard;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

/// Unwind payload carrying an exit status through `Kernel::exit`
pub(crate) struct ExitToken(pub i32);

/// Optional collaborators attached to a thread at create time
pub(crate) struct ThreadSetup {
    pub aspace: Option<Box<dyn AddressSpace>>,
    pub dir: Option<Arc<dyn DirHandle>>,
    pub exit_hooks: Vec<Box<dyn FnOnce() + Send>>,
    pub loader: Option<Box<dyn FnOnce() -> bool + Send>>,
    pub register_child: bool,
}

impl Default for ThreadSetup {
    fn default() -> Self {
        Self {
            aspace: None,
            dir: None,
            exit_hooks: Vec::new(),
            loader: None,
            register_child: true,
        }
    }
}

impl Kernel {
    /// Create a kernel thread and make it runnable.
    ///
    /// The new thread inherits the creator's nice and recent CPU; under the
    /// MLFQS policy its priority is derived from those instead of the
    /// requested value. Preempts the caller iff the new thread outranks it.
    pub fn spawn(
        &self,
        name: impl Into<String>,
        priority: Priority,
        body: impl FnOnce() + Send + 'static,
    ) -> Result<Tid, CreateError> {
        self.spawn_internal(name.into(), priority, ThreadSetup::default(), Box::new(body))
    }

    pub(crate) fn spawn_internal(
        &self,
        name: String,
        priority: Priority,
        setup: ThreadSetup,
        body: Box<dyn FnOnce() + Send>,
    ) -> Result<Tid, CreateError> {
        assert!(valid_priority(priority), "priority {priority} out of range");
        let inner = &*self.inner;
        let mut cpu = inner.cpu.lock();

        let creator = cpu.current_index();
        let (nice, recent_cpu, creator_dir) = {
            let c = &cpu.arena[creator];
            (c.nice, c.recent_cpu, c.dir.clone())
        };
        let effective = match cpu.policy {
            SchedPolicy::Mlfqs => mlfqs_priority(recent_cpu, nice),
            SchedPolicy::Priority => priority,
        };

        let tid = cpu.next_tid;
        let index = cpu
            .arena
            .alloc_with(|idx| {
                Tcb::new(
                    tid,
                    name.clone(),
                    effective,
                    nice,
                    recent_cpu,
                    idx.stack_top() - STACK_RESERVE,
                )
            })
            .ok_or(CreateError::OutOfPages {
                pages: cpu.arena.capacity(),
            })?;
        cpu.next_tid += 1;

        {
            let tcb = &mut cpu.arena[index];
            tcb.aspace = setup.aspace;
            // An explicit handle wins; otherwise the creator's is duplicated
            tcb.dir = setup.dir.or(creator_dir);
            tcb.exit_hooks = setup.exit_hooks;
        }
        cpu.registry.insert(tid, index);

        let record = if setup.register_child {
            let start = cpu.sema_create(0);
            let finish = cpu.sema_create(0);
            let record = Arc::new(ChildRecord::new(tid, start, finish));
            cpu.arena[creator].children.push(Arc::clone(&record));
            cpu.arena[index].parent_slot = Some(Arc::clone(&record));
            inner.children.insert(tid, Arc::clone(&record));
            Some(record)
        } else {
            None
        };

        let gate = Arc::clone(&cpu.arena[index].gate);
        let kernel = self.clone();
        let loader = setup.loader;
        let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
            thread_main(kernel, gate, record, loader, body);
        });
        if let Err(e) = spawned {
            if setup.register_child {
                if let Some(rec) = cpu.arena[creator].children.pop() {
                    cpu.sema_destroy(rec.start);
                    cpu.sema_destroy(rec.finish);
                }
                inner.children.remove(&tid);
            }
            cpu.registry.remove(&tid);
            cpu.arena.free(index);
            return Err(CreateError::HostSpawn(e.to_string()));
        }

        debug!("Thread created: tid={tid} name={name:?} priority={effective}");
        unblock_locked(inner, &mut cpu, index);
        if !cpu.in_interrupt && cpu.caller_is_current() {
            cond_yield_locked(inner, cpu);
        } else if cpu.arena[index].priority > cpu.arena[cpu.current_index()].priority {
            // A foreign host cannot yield on the current thread's behalf;
            // the preemption is applied at its next safe point
            cpu.yield_pending = true;
        }
        Ok(tid)
    }

    /// Give up the CPU but stay runnable.
    pub fn yield_now(&self) {
        let inner = &*self.inner;
        let cpu = inner.cpu.lock();
        assert!(!cpu.in_interrupt, "blocking operation in interrupt context");
        cpu.assert_current();
        yield_locked(inner, cpu);
    }

    /// Block the calling thread until another thread unblocks it.
    pub fn block(&self) {
        let inner = &*self.inner;
        let mut cpu = inner.cpu.lock();
        assert!(!cpu.in_interrupt, "blocking operation in interrupt context");
        let cur = cpu.assert_current();
        cpu.transition(cur, ThreadState::Blocked);
        dispatch(inner, cpu);
    }

    /// Make a blocked thread runnable.
    ///
    /// Never preempts the caller; preemption near an unblock is the wake
    /// path's decision, or deferred to interrupt return. The thread must be
    /// blocked and not owned by a sleep or wait queue.
    pub fn unblock(&self, tid: Tid) {
        let inner = &*self.inner;
        let mut cpu = inner.cpu.lock();
        let index = match cpu.registry.get(&tid) {
            Some(&i) => i,
            None => panic!("unblock of unknown tid {tid}"),
        };
        unblock_locked(inner, &mut cpu, index);
    }

    /// Sleep for `ticks` timer ticks. Zero returns immediately.
    pub fn sleep(&self, ticks: Tick) {
        let inner = &*self.inner;
        let mut cpu = inner.cpu.lock();
        assert!(!cpu.in_interrupt, "blocking operation in interrupt context");
        let cur = cpu.assert_current();
        if ticks == 0 {
            return;
        }
        let wake_at = cpu.ticks + ticks;
        cpu.arena[cur].wakeup_at = wake_at;
        cpu.sleepers.push(cur, wake_at);
        cpu.transition(cur, ThreadState::Blocked);
        dispatch(inner, cpu);
    }

    /// Timer interrupt entry point: advance time by one tick.
    ///
    /// Runs in interrupt context. When the caller is the current thread,
    /// any preemption this tick requires is applied on the way out; a
    /// non-current caller (a "hardware" host thread) leaves it pending for
    /// the current thread's next safe point.
    pub fn tick(&self) {
        let inner = &*self.inner;
        let mut cpu = inner.cpu.lock();
        cpu.in_interrupt = true;
        cpu.ticks += 1;

        let cur = cpu.current_index();
        if Some(cur) == cpu.idle {
            cpu.counters.idle_ticks += 1;
        } else if cpu.arena[cur].aspace.is_some() {
            cpu.counters.user_ticks += 1;
        } else {
            cpu.counters.kernel_ticks += 1;
        }

        if cpu.policy == SchedPolicy::Mlfqs {
            if Some(cur) != cpu.idle {
                let running = &mut cpu.arena[cur];
                running.recent_cpu = running.recent_cpu + 1;
            }
            if cpu.ticks % cpu.timer_freq == 0 {
                cpu.update_load_avg();
                cpu.decay_recent_cpu();
            }
            if cpu.ticks % u64::from(cpu.slice_len) == 0 {
                cpu.refresh_priorities();
            }
        }

        let now = cpu.ticks;
        while let Some(woken) = cpu.sleepers.pop_due(now) {
            unblock_locked(inner, &mut cpu, woken);
            if cpu.arena[woken].priority > cpu.arena[cur].priority {
                cpu.yield_pending = true;
            }
        }

        cpu.slice += 1;
        if cpu.slice >= cpu.slice_len {
            cpu.yield_pending = true;
        }

        cpu.in_interrupt = false;
        if cpu.yield_pending && cpu.caller_is_current() {
            cpu.yield_pending = false;
            yield_locked(inner, cpu);
        }
    }

    /// Terminate the calling thread with an exit status. Never returns.
    ///
    /// The bootstrap thread cannot exit; it owns the kernel's lifetime.
    pub fn exit(&self, status: i32) -> ! {
        {
            let cpu = self.inner.cpu.lock();
            assert!(!cpu.in_interrupt, "blocking operation in interrupt context");
            let cur = cpu.assert_current();
            assert_ne!(cur, cpu.bootstrap, "bootstrap thread cannot exit");
        }
        panic::resume_unwind(Box::new(ExitToken(status)));
    }

    pub(crate) fn start_idle(&self) -> Result<(), BootError> {
        let started = self.inner.cpu.lock().sema_create(0);
        let kernel = self.clone();
        let setup = ThreadSetup {
            register_child: false,
            ..ThreadSetup::default()
        };
        let tid = self
            .spawn_internal(
                "idle".to_string(),
                PRI_MIN,
                setup,
                Box::new(move || kernel.idle_loop(started)),
            )
            .map_err(|e| BootError::IdleSpawn(e.to_string()))?;

        {
            let mut cpu = self.inner.cpu.lock();
            cpu.idle = cpu.registry.get(&tid).copied();
        }
        semaphore::down_raw(self, started);
        self.inner.cpu.lock().sema_destroy(started);
        Ok(())
    }

    /// Body of the idle thread: signal startup once, then park whenever the
    /// ready queue is empty and give the CPU away as soon as it is not.
    fn idle_loop(&self, started: SemaId) {
        semaphore::up_raw(self, started);
        let inner = &*self.inner;
        loop {
            let mut cpu = inner.cpu.lock();
            while cpu.ready.is_empty() {
                inner.cpu_event.wait(&mut cpu);
            }
            let me = cpu.current_index();
            debug_assert_eq!(Some(me), cpu.idle);
            cpu.transition(me, ThreadState::Blocked);
            dispatch(inner, cpu);
        }
    }
}

/// First frame of every spawned host thread.
fn thread_main(
    kernel: Kernel,
    gate: Arc<RunGate>,
    record: Option<Arc<ChildRecord>>,
    loader: Option<Box<dyn FnOnce() -> bool + Send>>,
    body: Box<dyn FnOnce() + Send>,
) {
    gate.wait();
    {
        let mut cpu = kernel.inner.cpu.lock();
        complete_switch(&mut cpu);
    }

    let loaded = match loader {
        Some(load) => load(),
        None => true,
    };
    if let Some(record) = record.as_ref() {
        record.load_failed.store(!loaded, Ordering::Release);
        let inner = &*kernel.inner;
        let mut cpu = inner.cpu.lock();
        let woken = semaphore::up_locked(inner, &mut cpu, record.start);
        if woken.is_some() {
            cond_yield_locked(inner, cpu);
        }
    }
    if !loaded {
        warn!("Load failed, thread exiting with -1");
        do_exit(&kernel, -1);
        return;
    }

    let status = match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(()) => 0,
        Err(payload) => match payload.downcast::<ExitToken>() {
            Ok(token) => token.0,
            Err(payload) => {
                error!("Thread body panicked: {}", panic_message(&payload));
                -1
            }
        },
    };
    do_exit(&kernel, status);
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

/// Teardown and final dispatch of the calling thread.
fn do_exit(kernel: &Kernel, status: i32) {
    let inner = &*kernel.inner;

    let (hooks, aspace, tid) = {
        let mut cpu = inner.cpu.lock();
        let cur = cpu.current_index();
        let tcb = &mut cpu.arena[cur];
        (std::mem::take(&mut tcb.exit_hooks), tcb.aspace.take(), tcb.tid)
    };

    // Collaborator teardown runs outside the critical section, newest first
    for hook in hooks.into_iter().rev() {
        hook();
    }
    drop(aspace);

    let mut cpu = inner.cpu.lock();
    let cur = cpu.current_index();
    assert!(
        cpu.arena[cur].held_locks.is_empty(),
        "thread exited holding locks (tid {tid})"
    );

    // Uncollected children: a dead one's slot goes away now, a live one is
    // marked orphaned and tears its own slot down when it exits
    let children = std::mem::take(&mut cpu.arena[cur].children);
    for record in children {
        if record.collected.load(Ordering::Acquire) {
            continue;
        }
        if record.exited.load(Ordering::Acquire) {
            cpu.sema_destroy(record.start);
            cpu.sema_destroy(record.finish);
            inner.children.remove(&record.tid);
        } else {
            record.orphaned.store(true, Ordering::Release);
        }
    }

    if let Some(record) = cpu.arena[cur].parent_slot.clone() {
        if record.orphaned.load(Ordering::Acquire) {
            // The parent died first; nobody is left to signal
            cpu.sema_destroy(record.start);
            cpu.sema_destroy(record.finish);
            inner.children.remove(&record.tid);
        } else {
            record.ret_value.store(status, Ordering::Release);
            record.exited.store(true, Ordering::Release);
            semaphore::up_locked(inner, &mut cpu, record.finish);
        }
    }
    cpu.registry.remove(&tid);
    cpu.transition(cur, ThreadState::Dying);
    debug!("Thread exiting: tid={tid} status={status}");
    dispatch(inner, cpu);
}

/// Hand the CPU to the next thread. The caller must already have moved the
/// current thread out of RUNNING. Returns after this thread is dispatched
/// again, or immediately (without parking) when it is dying.
pub(crate) fn dispatch(inner: &KernelInner, cpu: MutexGuard<'_, CpuState>) {
    if let Some(relocked) = transfer(inner, cpu) {
        drop(relocked);
    }
}

/// `dispatch`, but hands the critical section back to the caller when the
/// thread resumes. For wait loops that re-examine state after waking.
pub(crate) fn dispatch_relock<'a>(
    inner: &'a KernelInner,
    cpu: MutexGuard<'a, CpuState>,
) -> MutexGuard<'a, CpuState> {
    match transfer(inner, cpu) {
        Some(relocked) => relocked,
        None => unreachable!("dying thread resumed"),
    }
}

fn transfer<'a>(
    inner: &'a KernelInner,
    mut cpu: MutexGuard<'a, CpuState>,
) -> Option<MutexGuard<'a, CpuState>> {
    let cur = cpu.current_index();
    debug_assert_ne!(
        cpu.arena[cur].state,
        ThreadState::Running,
        "dispatch from a thread still marked running"
    );

    let next = match cpu.ready.pop_front() {
        Some(n) => n,
        None => match cpu.idle {
            Some(i) => i,
            None => panic!("nothing to run: ready queue empty and no idle thread"),
        },
    };

    if next == cur {
        // Reselected: no transfer, but the completion step still applies
        cpu.switched_from = None;
        complete_switch(&mut cpu);
        return Some(cpu);
    }

    let dying = cpu.arena[cur].state == ThreadState::Dying;
    cpu.counters.context_switches += 1;
    cpu.switched_from = Some(cur);
    cpu.current_sp = cpu.arena[next].sp;
    debug!(
        "Context switch: tid {} -> tid {}",
        cpu.arena[cur].tid, cpu.arena[next].tid
    );
    let next_gate = Arc::clone(&cpu.arena[next].gate);
    let own_gate = Arc::clone(&cpu.arena[cur].gate);
    drop(cpu);

    next_gate.open();
    if dying {
        // The host thread unwinds from here; the page is reclaimed by the
        // next completion step
        return None;
    }
    own_gate.wait();

    let mut cpu = inner.cpu.lock();
    complete_switch(&mut cpu);
    Some(cpu)
}

/// Completion step of a dispatch, run on the resuming side with the critical
/// section held.
pub(crate) fn complete_switch(cpu: &mut CpuState) {
    let cur = cpu.current_index();
    cpu.transition(cur, ThreadState::Running);
    cpu.slice = 0;
    cpu.yield_pending = false;

    let host = thread::current().id();
    let tcb = &mut cpu.arena[cur];
    tcb.host = Some(host);
    if let Some(aspace) = tcb.aspace.as_ref() {
        aspace.activate();
    }

    if let Some(prev) = cpu.switched_from.take() {
        if cpu.arena[prev].state == ThreadState::Dying && prev != cpu.bootstrap {
            let dead = cpu.arena.free(prev);
            debug!("Reclaimed page of tid {}", dead.tid);
        }
    }
}

/// Move the current thread to the ready queue and dispatch.
pub(crate) fn yield_locked(inner: &KernelInner, mut cpu: MutexGuard<'_, CpuState>) {
    let cur = cpu.current_index();
    debug_assert_ne!(Some(cur), cpu.idle, "idle thread cannot enter the ready queue");
    cpu.transition(cur, ThreadState::Ready);
    let CpuState { ready, arena, .. } = &mut *cpu;
    ready.push(cur, |i| arena[i].priority);
    dispatch(inner, cpu);
}

/// Yield iff the head of the ready queue outranks the current thread.
pub(crate) fn cond_yield_locked(inner: &KernelInner, cpu: MutexGuard<'_, CpuState>) {
    let cur = cpu.current_index();
    let outranked = cpu
        .ready
        .head()
        .is_some_and(|head| cpu.arena[head].priority > cpu.arena[cur].priority);
    if outranked {
        yield_locked(inner, cpu);
    }
}

/// Transition a blocked thread to ready and enqueue it. Wakes the idle
/// thread's ready-queue wait. Never yields.
pub(crate) fn unblock_locked(inner: &KernelInner, cpu: &mut CpuState, index: PageIndex) {
    cpu.transition(index, ThreadState::Ready);
    let CpuState { ready, arena, .. } = &mut *cpu;
    ready.push(index, |i| arena[i].priority);
    inner.cpu_event.notify_one();
}
