/*!
 * System Limits and Constants
 *
 * Centralized location for all scheduler-wide limits and magic numbers.
 * Organized by domain for maintainability and discoverability.
 */

use super::types::{Nice, Priority};

// =============================================================================
// PRIORITY RANGE
// =============================================================================

/// Lowest scheduling priority; the idle thread runs here
pub const PRI_MIN: Priority = 0;

/// Default priority for new threads when none is inherited
pub const PRI_DEFAULT: Priority = 31;

/// Highest scheduling priority
pub const PRI_MAX: Priority = 63;

// =============================================================================
// MLFQS INPUTS
// =============================================================================

/// Most favorable niceness (takes CPU from other threads)
pub const NICE_MIN: Nice = -20;

/// Neutral niceness for new threads with no creator to inherit from
pub const NICE_DEFAULT: Nice = 0;

/// Least favorable niceness (gives CPU to other threads)
pub const NICE_MAX: Nice = 20;

// =============================================================================
// TIMING
// =============================================================================

/// Preemption quota: a thread yields after running this many ticks
pub const TIME_SLICE: u32 = 4;

/// Timer ticks per simulated second
/// Drives the once-per-second MLFQS load/recent-cpu refresh
pub const TIMER_FREQ: u64 = 100;

// =============================================================================
// THREAD PAGES
// =============================================================================

/// Size of one thread page: descriptor plus downward-growing stack
/// Must be a power of two so the current-thread lookup is a single mask
pub const PAGE_SIZE: usize = 4096;

/// Default capacity of the thread page pool
pub const DEFAULT_PAGES: usize = 64;

/// Guard word embedded in every thread descriptor
/// A mismatch on access means the stack overflowed into the descriptor
/// or the descriptor was freed while still referenced
pub const TCB_MAGIC: u32 = 0xcd6a_bf4b;

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Check that a priority lies within the scheduling range
#[inline]
pub const fn valid_priority(priority: Priority) -> bool {
    PRI_MIN <= priority && priority <= PRI_MAX
}

/// Check that a niceness lies within the MLFQS range
#[inline]
pub const fn valid_nice(nice: Nice) -> bool {
    NICE_MIN <= nice && nice <= NICE_MAX
}

/// Clamp a computed priority into the scheduling range
#[inline]
pub const fn clamp_priority(priority: Priority) -> Priority {
    if priority < PRI_MIN {
        PRI_MIN
    } else if priority > PRI_MAX {
        PRI_MAX
    } else {
        priority
    }
}
