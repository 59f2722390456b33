/*!
 * Thread Control Block
 * Per-thread descriptor occupying the thread's own stack page
 */

use crate::core::fixed::Fixed;
use crate::core::limits::TCB_MAGIC;
use crate::core::types::{Addr, LockId, Nice, Priority, Tick, Tid};
use crate::process::child::ChildRecord;
use crate::sched::context::RunGate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::thread::ThreadId;

/// Lifecycle state of a thread
///
/// The state machine is closed: every transition goes through
/// `CpuState::transition`, which rejects anything outside the legal set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadState {
    /// Owns the CPU
    Running,
    /// In the ready queue, eligible for dispatch
    Ready,
    /// Waiting for an event; not schedulable until unblocked
    Blocked,
    /// Finished; page reclaimed after the next dispatch completes
    Dying,
}

impl ThreadState {
    /// Convert to string representation
    #[inline(always)]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Ready => "ready",
            Self::Blocked => "blocked",
            Self::Dying => "dying",
        }
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-thread address space hook.
///
/// `activate` runs during dispatch completion with the scheduler critical
/// section held, so implementations must not call back into the kernel.
pub trait AddressSpace: Send {
    fn activate(&self);
}

/// Opaque working-directory handle, duplicated into children at create.
pub trait DirHandle: Send + Sync {}

/// Thread control block.
///
/// Lives in a `PageArena` slot whose base address doubles as the thread's
/// stack page, so `sp & !(PAGE_SIZE - 1)` recovers the descriptor. The magic
/// word sits here as the stack-overflow tripwire: a stack that grows down
/// into the descriptor shreds it first.
pub struct Tcb {
    magic: u32,
    pub tid: Tid,
    pub name: String,
    pub state: ThreadState,
    /// Simulated stack pointer, always within this TCB's page
    pub sp: Addr,

    pub priority: Priority,
    /// Priority before any donation; `set_priority` writes here first
    pub base_priority: Priority,
    pub nice: Nice,
    pub recent_cpu: Fixed,

    /// Absolute tick at which a sleeping thread becomes due
    pub wakeup_at: Tick,

    /// Locks held, ordered by max-waiter priority descending
    pub held_locks: Vec<LockId>,
    /// Lock this thread is currently blocked on, for donation chaining
    pub waiting_on: Option<LockId>,

    /// Host thread bound to this TCB; rebound on every dispatch completion
    pub host: Option<ThreadId>,
    pub gate: Arc<RunGate>,

    pub aspace: Option<Box<dyn AddressSpace>>,
    pub dir: Option<Arc<dyn DirHandle>>,
    pub exit_hooks: Vec<Box<dyn FnOnce() + Send>>,

    /// Records of children this thread spawned
    pub children: Vec<Arc<ChildRecord>>,
    /// This thread's own record in its parent's child list
    pub parent_slot: Option<Arc<ChildRecord>>,
}

impl Tcb {
    pub fn new(
        tid: Tid,
        name: String,
        priority: Priority,
        nice: Nice,
        recent_cpu: Fixed,
        sp: Addr,
    ) -> Self {
        Self {
            magic: TCB_MAGIC,
            tid,
            name,
            state: ThreadState::Blocked,
            sp,
            priority,
            base_priority: priority,
            nice,
            recent_cpu,
            wakeup_at: 0,
            held_locks: Vec::new(),
            waiting_on: None,
            host: None,
            gate: Arc::new(RunGate::new()),
            aspace: None,
            dir: None,
            exit_hooks: Vec::new(),
            children: Vec::new(),
            parent_slot: None,
        }
    }

    /// Verify the guard word. A mismatch means the descriptor was overwritten,
    /// almost always by stack overflow.
    #[inline]
    pub fn check_magic(&self) {
        assert_eq!(
            self.magic, TCB_MAGIC,
            "thread control block corrupted (tid {}, likely stack overflow)",
            self.tid
        );
    }
}

impl fmt::Debug for Tcb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tcb")
            .field("tid", &self.tid)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("priority", &self.priority)
            .field("base_priority", &self.base_priority)
            .field("nice", &self.nice)
            .finish_non_exhaustive()
    }
}
