/*!
 * Process Module
 * Parent/child thread relationships: exec, startup waits, and exit collection
 */

pub(crate) mod child;

use crate::core::errors::{CreateError, ExecError, WaitError};
use crate::core::types::{Priority, Tid};
use crate::sched::operations::ThreadSetup;
use crate::sched::Kernel;
use crate::sync::semaphore;
use std::sync::atomic::Ordering;

impl Kernel {
    /// Spawn a thread whose startup runs a loader before its body.
    ///
    /// The loader models program load: the parent observes its outcome
    /// through [`Kernel::wait_start`]. A false return makes the thread exit
    /// with status -1 without running the body.
    pub fn exec(
        &self,
        name: impl Into<String>,
        priority: Priority,
        loader: impl FnOnce() -> bool + Send + 'static,
        body: impl FnOnce() + Send + 'static,
    ) -> Result<Tid, CreateError> {
        let setup = ThreadSetup {
            loader: Some(Box::new(loader)),
            ..ThreadSetup::default()
        };
        self.spawn_internal(name.into(), priority, setup, Box::new(body))
    }

    /// Block until a child's loader has run, reporting its outcome.
    ///
    /// Idempotent: later calls return the recorded outcome without waiting.
    /// Only the thread's creator has a claim on it.
    pub fn wait_start(&self, tid: Tid) -> Result<(), ExecError> {
        let record = {
            let cpu = self.inner.cpu.lock();
            let cur = cpu.assert_current();
            cpu.arena[cur]
                .children
                .iter()
                .find(|r| r.tid == tid)
                .cloned()
                .ok_or(ExecError::NotChild(tid))?
        };
        if !record.started_seen.swap(true, Ordering::AcqRel) {
            semaphore::down_raw(self, record.start);
        }
        if record.load_failed.load(Ordering::Acquire) {
            Err(ExecError::LoadFailed(tid))
        } else {
            Ok(())
        }
    }

    /// Block until a child exits, then collect its status. One shot: the
    /// record is gone once collected.
    pub fn wait_child(&self, tid: Tid) -> Result<i32, WaitError> {
        let record = {
            let cpu = self.inner.cpu.lock();
            let cur = cpu.assert_current();
            cpu.arena[cur]
                .children
                .iter()
                .find(|r| r.tid == tid)
                .cloned()
                .ok_or(WaitError::NotChild(tid))?
        };
        if record.collected.swap(true, Ordering::AcqRel) {
            return Err(WaitError::AlreadyCollected(tid));
        }
        semaphore::down_raw(self, record.finish);
        // The slot is spent: a later wait_start must read the recorded
        // outcome rather than touch the reclaimed semaphore
        record.started_seen.store(true, Ordering::Release);
        {
            let mut cpu = self.inner.cpu.lock();
            cpu.sema_destroy(record.start);
            cpu.sema_destroy(record.finish);
        }
        self.inner.children.remove(&tid);
        Ok(record.ret_value.load(Ordering::Acquire))
    }

    /// Exit status of a spawned thread, if it has exited and its slot is
    /// still live. Readable by anyone, without blocking. Collection and
    /// parent exit both retire the slot.
    #[must_use]
    pub fn exit_status(&self, tid: Tid) -> Option<i32> {
        let record = self.inner.children.get(&tid)?;
        if record.exited.load(Ordering::Acquire) {
            Some(record.ret_value.load(Ordering::Acquire))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::KernelConfig;

    #[test]
    fn test_exit_status_visible_after_exit() {
        let kernel = Kernel::boot(KernelConfig::default()).unwrap();
        let k = kernel.clone();
        let tid = kernel.spawn("child", 40, move || k.exit(5)).unwrap();

        // The child outranked us at spawn, so it has already run to completion
        assert_eq!(kernel.exit_status(tid), Some(5));
        assert_eq!(kernel.wait_child(tid).unwrap(), 5);
        assert_eq!(kernel.exit_status(tid), None);
    }

    #[test]
    fn test_orphaned_children_release_their_slots() {
        let kernel = Kernel::boot(KernelConfig::default()).unwrap();
        let baseline = kernel.inner.cpu.lock().semas.len();

        // The parent exits without collecting; the orphan runs afterwards
        let k = kernel.clone();
        let parent = kernel
            .spawn("parent", 40, move || {
                let k2 = k.clone();
                k.spawn("orphan", 35, move || k2.exit(7)).unwrap();
                k.exit(0);
            })
            .unwrap();
        assert_eq!(kernel.wait_child(parent).unwrap(), 0);

        // The orphan (tid 4) exited into a dead parent's slot and tore the
        // slot down itself; its status is gone along with the records
        assert_eq!(kernel.exit_status(4), None);
        assert_eq!(kernel.inner.cpu.lock().semas.len(), baseline);
    }

    #[test]
    fn test_dead_children_reclaimed_at_parent_exit() {
        let kernel = Kernel::boot(KernelConfig::default()).unwrap();
        let baseline = kernel.inner.cpu.lock().semas.len();

        // The parent outlives the child but never collects it
        let k = kernel.clone();
        let parent = kernel
            .spawn("parent", 40, move || {
                let k2 = k.clone();
                let child = k.spawn("short-lived", 45, move || k2.exit(3)).unwrap();
                assert_eq!(k.exit_status(child), Some(3));
                k.exit(0);
            })
            .unwrap();
        assert_eq!(kernel.wait_child(parent).unwrap(), 0);

        assert_eq!(kernel.inner.cpu.lock().semas.len(), baseline);
    }
}
