/*!
 * Thread Builder
 * Create threads with optional collaborators attached
 */

use super::operations::ThreadSetup;
use super::tcb::{AddressSpace, DirHandle};
use super::Kernel;
use crate::core::errors::CreateError;
use crate::core::limits::PRI_DEFAULT;
use crate::core::types::{Priority, Tid};
use std::sync::Arc;

/// Builder for threads that carry an address space, a working-directory
/// handle, or teardown hooks.
///
/// ```
/// use chalkos_kernel::{Kernel, KernelConfig, ThreadBuilder};
///
/// let kernel = Kernel::boot(KernelConfig::default())?;
/// let tid = ThreadBuilder::new(&kernel, "worker")
///     .priority(40)
///     .exit_hook(|| log::debug!("worker done"))
///     .spawn({
///         let k = kernel.clone();
///         move || k.exit(3)
///     })?;
/// assert_eq!(kernel.wait_child(tid)?, 3);
/// # Ok::<(), chalkos_kernel::KernelError>(())
/// ```
pub struct ThreadBuilder<'a> {
    kernel: &'a Kernel,
    name: String,
    priority: Priority,
    setup: ThreadSetup,
}

impl<'a> ThreadBuilder<'a> {
    pub fn new(kernel: &'a Kernel, name: impl Into<String>) -> Self {
        Self {
            kernel,
            name: name.into(),
            priority: PRI_DEFAULT,
            setup: ThreadSetup::default(),
        }
    }

    #[must_use]
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Attach an address space, activated on every dispatch to this thread.
    /// Its presence also classifies the thread's ticks as user ticks.
    #[must_use]
    pub fn address_space(mut self, aspace: impl AddressSpace + 'static) -> Self {
        self.setup.aspace = Some(Box::new(aspace));
        self
    }

    /// Attach a working-directory handle
    #[must_use]
    pub fn dir(mut self, dir: Arc<dyn DirHandle>) -> Self {
        self.setup.dir = Some(dir);
        self
    }

    /// Add a teardown hook. Hooks run at exit outside the critical section,
    /// newest first.
    #[must_use]
    pub fn exit_hook(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.setup.exit_hooks.push(Box::new(hook));
        self
    }

    /// Create the thread and make it runnable
    pub fn spawn(self, body: impl FnOnce() + Send + 'static) -> Result<Tid, CreateError> {
        self.kernel
            .spawn_internal(self.name, self.priority, self.setup, Box::new(body))
    }
}
