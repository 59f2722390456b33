/*!
 * Memory Module
 * Page-granular arena backing thread control blocks
 */

pub mod arena;

// Re-export for convenience
pub use arena::{PageArena, PageIndex};
