/*!
 * Core Module
 * Fundamental kernel types, limits, and error handling
 */

pub mod errors;
pub mod fixed;
pub mod limits;
pub mod types;

// Re-export for convenience
pub use errors::*;
pub use fixed::Fixed;
pub use types::*;
