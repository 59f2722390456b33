/*!
 * Core Types
 * Common types used across the kernel
 */

/// Thread ID type, monotonically assigned starting at 1
pub type Tid = u64;

/// Scheduling priority (PRI_MIN..=PRI_MAX, higher is more important)
pub type Priority = i32;

/// MLFQS niceness bias (NICE_MIN..=NICE_MAX, higher is nicer)
pub type Nice = i32;

/// Virtual timer tick count since boot
pub type Tick = u64;

/// Address within the simulated page arena
pub type Addr = usize;

/// Common result type for kernel operations
pub type KernelResult<T> = Result<T, super::errors::KernelError>;

/// Handle id for a registered semaphore
pub(crate) type SemaId = u64;

/// Handle id for a registered lock
pub(crate) type LockId = u64;
