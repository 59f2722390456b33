/*!
 * Scheduler Module
 * Virtual CPU ownership, thread lifecycle, and dispatch
 *
 * The kernel is a passive handle: simulated threads drive it by calling in.
 * Exactly one host thread owns the virtual CPU at any instant; the rest are
 * parked on per-thread gates. All scheduler state sits behind one mutex, and
 * holding that guard is the crate's notion of "interrupts masked".
 */

use crate::core::errors::BootError;
use crate::core::fixed::Fixed;
use crate::core::limits::{NICE_DEFAULT, PRI_DEFAULT};
use crate::core::types::{Addr, LockId, SemaId, Tick, Tid};
use crate::mem::{PageArena, PageIndex};
use crate::process::child::ChildRecord;
use crate::sync::lock::LockRec;
use crate::sync::semaphore::SemaRec;
use dashmap::DashMap;
use log::info;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::thread;

pub mod builder;
pub mod policy;
pub mod stats;

pub(crate) mod context;
pub(crate) mod operations;
pub(crate) mod queue;
pub(crate) mod tcb;

mod donation;
mod mlfqs;

// Re-export public API
pub use builder::ThreadBuilder;
pub use policy::{KernelConfig, SchedPolicy};
pub use stats::{KernelStats, ThreadSnapshot};
pub use tcb::{AddressSpace, DirHandle, ThreadState};

use queue::{ReadyQueue, SleepQueue};
use stats::Counters;
use tcb::Tcb;

/// Bytes reserved at the top of a thread's page, standing in for the frame
/// a real context switch would push. Keeps the stack pointer strictly inside
/// the page so masking it recovers the descriptor.
pub(crate) const STACK_RESERVE: Addr = 8;

/// Everything the scheduler mutates, behind the one CPU mutex.
pub(crate) struct CpuState {
    pub arena: PageArena<Tcb>,
    pub ready: ReadyQueue,
    pub sleepers: SleepQueue,
    /// All live threads by tid; entered at create, drained at exit
    pub registry: BTreeMap<Tid, PageIndex>,

    /// Stack pointer of the thread that owns the CPU
    pub current_sp: Addr,
    pub idle: Option<PageIndex>,
    /// The adopted initial thread; its page is never reclaimed
    pub bootstrap: PageIndex,
    /// Previous thread of an in-flight switch, consumed exactly once by
    /// the completion step
    pub switched_from: Option<PageIndex>,

    pub in_interrupt: bool,
    pub yield_pending: bool,
    pub ticks: Tick,
    /// Ticks the current thread has held the CPU since last dispatch
    pub slice: u32,

    pub next_tid: Tid,
    pub load_avg: Fixed,
    pub counters: Counters,

    pub semas: HashMap<SemaId, SemaRec, ahash::RandomState>,
    pub locks: HashMap<LockId, LockRec, ahash::RandomState>,
    pub next_sema: SemaId,
    pub next_lock: LockId,

    pub policy: SchedPolicy,
    pub slice_len: u32,
    pub timer_freq: u64,
}

impl CpuState {
    /// Resolve the current thread by masking its stack pointer to the page
    /// base. O(1), no allocation, and verifies the descriptor guard word.
    pub fn current_index(&self) -> PageIndex {
        match self.arena.index_of(self.current_sp) {
            Some(index) => {
                self.arena[index].check_magic();
                index
            }
            None => panic!(
                "current stack pointer {:#x} resolves to no live thread",
                self.current_sp
            ),
        }
    }

    #[inline]
    pub fn current(&self) -> &Tcb {
        &self.arena[self.current_index()]
    }

    /// Verify the calling host thread is the one bound to the current TCB
    pub fn assert_current(&self) -> PageIndex {
        let index = self.current_index();
        let tcb = &self.arena[index];
        assert_eq!(
            tcb.host,
            Some(thread::current().id()),
            "operation requires the running thread (current tid {})",
            tcb.tid
        );
        index
    }

    #[inline]
    pub fn caller_is_current(&self) -> bool {
        self.arena[self.current_index()].host == Some(thread::current().id())
    }

    /// Apply a state transition, rejecting anything outside the legal set.
    ///
    /// BLOCKED -> RUNNING is allowed for the idle thread only: it parks as
    /// BLOCKED without sitting in any queue and is resumed directly by
    /// dispatch when the ready queue is empty.
    pub fn transition(&mut self, index: PageIndex, to: ThreadState) {
        let is_idle = self.idle == Some(index);
        let tcb = &mut self.arena[index];
        let from = tcb.state;
        let legal = matches!(
            (from, to),
            (ThreadState::Blocked, ThreadState::Ready)
                | (ThreadState::Ready, ThreadState::Running)
                | (ThreadState::Running, ThreadState::Ready)
                | (ThreadState::Running, ThreadState::Blocked)
                | (ThreadState::Running, ThreadState::Dying)
        ) || (is_idle && from == ThreadState::Blocked && to == ThreadState::Running);
        assert!(
            legal,
            "illegal thread state transition {from} -> {to} (tid {})",
            tcb.tid
        );
        tcb.state = to;
    }
}

/// Shared kernel context behind the `Kernel` handle.
pub(crate) struct KernelInner {
    pub cpu: Mutex<CpuState>,
    /// Signaled whenever a thread enters the ready queue; the idle thread
    /// waits here when there is nothing to run
    pub cpu_event: Condvar,
    /// Child records by tid, readable without the CPU mutex
    pub children: DashMap<Tid, Arc<ChildRecord>, ahash::RandomState>,
    pub config: KernelConfig,
}

/// Handle to a booted kernel.
///
/// Cloning is cheap and every clone drives the same kernel; thread bodies
/// capture a clone to call back in.
#[derive(Clone)]
pub struct Kernel {
    pub(crate) inner: Arc<KernelInner>,
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Kernel {
    /// Boot a kernel: adopt the calling host thread as the bootstrap thread
    /// (tid 1) and start the idle thread (tid 2).
    ///
    /// Returns once the idle thread has signaled its startup handshake, at
    /// which point the caller is the running thread of a fully formed kernel.
    pub fn boot(config: KernelConfig) -> Result<Self, BootError> {
        config.validate()?;

        let mut arena = PageArena::new(config.pages);
        let boot_index = arena
            .alloc_with(|index| {
                Tcb::new(
                    1,
                    "main".to_string(),
                    PRI_DEFAULT,
                    NICE_DEFAULT,
                    Fixed::ZERO,
                    index.stack_top() - STACK_RESERVE,
                )
            })
            .ok_or(BootError::TooFewPages { pages: config.pages })?;

        {
            let tcb = &mut arena[boot_index];
            tcb.state = ThreadState::Running;
            tcb.host = Some(thread::current().id());
        }
        let current_sp = arena[boot_index].sp;

        let mut registry = BTreeMap::new();
        registry.insert(1, boot_index);

        let cpu = CpuState {
            arena,
            ready: ReadyQueue::new(),
            sleepers: SleepQueue::new(),
            registry,
            current_sp,
            idle: None,
            bootstrap: boot_index,
            switched_from: None,
            in_interrupt: false,
            yield_pending: false,
            ticks: 0,
            slice: 0,
            next_tid: 2,
            load_avg: Fixed::ZERO,
            counters: Counters::default(),
            semas: HashMap::default(),
            locks: HashMap::default(),
            next_sema: 1,
            next_lock: 1,
            policy: config.policy,
            slice_len: config.time_slice,
            timer_freq: config.timer_freq,
        };

        let kernel = Self {
            inner: Arc::new(KernelInner {
                cpu: Mutex::new(cpu),
                cpu_event: Condvar::new(),
                children: DashMap::default(),
                config,
            }),
        };

        info!(
            "Kernel booted: policy={}, pages={}, time_slice={}, timer_freq={}",
            config.policy.as_str(),
            config.pages,
            config.time_slice,
            config.timer_freq
        );

        kernel.start_idle()?;
        Ok(kernel)
    }

    /// Boot configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> KernelConfig {
        self.inner.config
    }

    /// Active scheduling policy
    #[inline]
    #[must_use]
    pub fn policy(&self) -> SchedPolicy {
        self.inner.config.policy
    }

    /// Ticks elapsed since boot
    #[must_use]
    pub fn ticks(&self) -> Tick {
        self.inner.cpu.lock().ticks
    }

    /// Tid of the thread that owns the CPU
    #[must_use]
    pub fn current_tid(&self) -> Tid {
        self.inner.cpu.lock().current().tid
    }

    /// Name of the thread that owns the CPU
    #[must_use]
    pub fn current_name(&self) -> String {
        self.inner.cpu.lock().current().name.clone()
    }

    /// Working-directory handle of the thread that owns the CPU. Set through
    /// the builder or duplicated from the creator at spawn.
    #[must_use]
    pub fn current_dir(&self) -> Option<Arc<dyn DirHandle>> {
        self.inner.cpu.lock().current().dir.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boot_adopts_caller() {
        let kernel = Kernel::boot(KernelConfig::default()).unwrap();
        assert_eq!(kernel.current_tid(), 1);
        assert_eq!(kernel.current_name(), "main");
        assert_eq!(kernel.ticks(), 0);
    }

    #[test]
    fn test_boot_parks_idle() {
        let kernel = Kernel::boot(KernelConfig::default()).unwrap();
        let cpu = kernel.inner.cpu.lock();
        let idle = cpu.idle.unwrap();
        assert_eq!(cpu.arena[idle].tid, 2);
        assert_eq!(cpu.arena[idle].state, ThreadState::Blocked);
        assert!(!cpu.ready.contains(idle));
    }

    #[test]
    fn test_boot_rejects_invalid_config() {
        assert_eq!(
            Kernel::boot(KernelConfig::default().with_pages(0)).unwrap_err(),
            BootError::TooFewPages { pages: 0 }
        );
    }

    #[test]
    fn test_minimal_pool_boots() {
        let kernel = Kernel::boot(KernelConfig::default().with_pages(2)).unwrap();
        let cpu = kernel.inner.cpu.lock();
        assert_eq!(cpu.arena.in_use(), 2);
        assert_eq!(cpu.arena.capacity(), 2);
    }
}
