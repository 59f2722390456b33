/*!
 * Child Records
 * Parent-visible lifecycle slots for spawned threads
 */

use crate::core::types::{SemaId, Tid};
use std::sync::atomic::{AtomicBool, AtomicI32};

/// One child's lifecycle slot, shared by parent and child.
///
/// The two semaphores carry the ordering: `start` is upped once the child's
/// loader has run, `finish` once its exit status is in place. The flags let
/// readers short-circuit without touching the CPU critical section.
///
/// The slot's kernel-side state (both semaphores and the index entry) is
/// released exactly once: by the collecting `wait_child`, by the parent's
/// exit when the child is already dead, or by the child's own exit once
/// `orphaned` is set.
pub(crate) struct ChildRecord {
    pub tid: Tid,
    pub exited: AtomicBool,
    pub load_failed: AtomicBool,
    /// Set by the first `wait_child`; later calls fail instead of blocking
    pub collected: AtomicBool,
    /// Set by the first `wait_start` and at collection; later calls read
    /// the flags instead of the semaphore
    pub started_seen: AtomicBool,
    /// Set by the exiting parent on a still-live child; the child then owns
    /// the slot's teardown
    pub orphaned: AtomicBool,
    pub ret_value: AtomicI32,
    pub start: SemaId,
    pub finish: SemaId,
}

impl ChildRecord {
    pub fn new(tid: Tid, start: SemaId, finish: SemaId) -> Self {
        Self {
            tid,
            exited: AtomicBool::new(false),
            load_failed: AtomicBool::new(false),
            collected: AtomicBool::new(false),
            started_seen: AtomicBool::new(false),
            orphaned: AtomicBool::new(false),
            ret_value: AtomicI32::new(0),
            start,
            finish,
        }
    }
}
