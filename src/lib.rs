/*!
 * ChalkOS Kernel Library
 * Preemptive thread scheduling and synchronization, simulated in userspace
 *
 * Boot a kernel and the calling thread becomes its first thread; everything
 * else is spawned from there. Each simulated thread runs on its own host
 * thread, but only one owns the virtual CPU at a time, so the scheduler's
 * decisions, priority donation, and the MLFQS feedback loop behave exactly
 * as they would on real hardware driven by a timer interrupt.
 *
 * ```
 * use chalkos_kernel::{Kernel, KernelConfig};
 *
 * let kernel = Kernel::boot(KernelConfig::default())?;
 * let k = kernel.clone();
 * let tid = kernel.spawn("worker", 40, move || k.exit(7))?;
 * assert_eq!(kernel.wait_child(tid)?, 7);
 * # Ok::<(), chalkos_kernel::KernelError>(())
 * ```
 */

pub mod core;
pub mod mem;
pub mod process;
pub mod sched;
pub mod sync;

// Re-exports
pub use crate::core::errors::{BootError, CreateError, ExecError, KernelError, WaitError};
pub use crate::core::fixed::Fixed;
pub use crate::core::types::{Nice, Priority, Tick, Tid};
pub use sched::{
    AddressSpace, DirHandle, Kernel, KernelConfig, KernelStats, SchedPolicy, ThreadBuilder,
    ThreadSnapshot, ThreadState,
};
pub use sync::{Lock, Semaphore};
