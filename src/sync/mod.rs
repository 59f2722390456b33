/*!
 * Synchronization Module
 * Semaphores and donation-aware locks over the scheduler core
 */

pub mod lock;
pub mod semaphore;

// Re-export public API
pub use lock::Lock;
pub use semaphore::Semaphore;
