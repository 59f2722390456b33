/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 *
 * Only recoverable conditions are represented here. Precondition and
 * invariant violations (blocking from interrupt context, operating on a
 * corrupted descriptor, releasing a lock the caller does not hold) are
 * kernel bugs and panic with a diagnostic instead of returning.
 */

use crate::core::types::Tid;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Thread creation errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum CreateError {
    #[error("thread page pool exhausted ({pages} pages in use)")]
    #[diagnostic(
        code(sched::create::out_of_pages),
        help("Every live thread holds one page. Wait for threads to exit or boot with a larger pool.")
    )]
    OutOfPages { pages: usize },

    #[error("host thread could not be spawned: {0}")]
    #[diagnostic(
        code(sched::create::host_spawn),
        help("The host OS refused a new thread. The reserved page was returned to the pool.")
    )]
    HostSpawn(String),
}

/// Kernel boot errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum BootError {
    #[error("page pool of {pages} pages cannot hold the bootstrap and idle threads")]
    #[diagnostic(
        code(sched::boot::too_few_pages),
        help("Configure at least 2 pages.")
    )]
    TooFewPages { pages: usize },

    #[error("time slice must be at least one tick")]
    #[diagnostic(code(sched::boot::zero_time_slice))]
    ZeroTimeSlice,

    #[error("timer frequency must be at least one tick per second")]
    #[diagnostic(code(sched::boot::zero_timer_freq))]
    ZeroTimerFreq,

    #[error("idle thread could not be started: {0}")]
    #[diagnostic(
        code(sched::boot::idle_spawn),
        help("Boot creates one host thread for the idle unit; the host OS refused it.")
    )]
    IdleSpawn(String),
}

/// Process start-handshake errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum ExecError {
    #[error("thread {0} is not a child of the calling thread")]
    #[diagnostic(
        code(process::exec::not_child),
        help("Only the creating thread may wait for a child's start handshake.")
    )]
    NotChild(Tid),

    #[error("program load failed in child {0}")]
    #[diagnostic(
        code(process::exec::load_failed),
        help("The child's loader reported failure; the child exited with status -1.")
    )]
    LoadFailed(Tid),
}

/// Exit-status collection errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum WaitError {
    #[error("thread {0} is not a child of the calling thread")]
    #[diagnostic(
        code(process::wait::not_child),
        help("Only the creating thread may collect a child's exit status.")
    )]
    NotChild(Tid),

    #[error("exit status of child {0} was already collected")]
    #[diagnostic(
        code(process::wait::already_collected),
        help("An exit status is delivered exactly once.")
    )]
    AlreadyCollected(Tid),
}

/// Unified kernel error type with miette diagnostics
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum KernelError {
    #[error("create error: {0}")]
    #[diagnostic(transparent)]
    Create(#[from] CreateError),

    #[error("boot error: {0}")]
    #[diagnostic(transparent)]
    Boot(#[from] BootError),

    #[error("exec error: {0}")]
    #[diagnostic(transparent)]
    Exec(#[from] ExecError),

    #[error("wait error: {0}")]
    #[diagnostic(transparent)]
    Wait(#[from] WaitError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CreateError::OutOfPages { pages: 64 };
        assert_eq!(
            err.to_string(),
            "thread page pool exhausted (64 pages in use)"
        );

        let err = WaitError::AlreadyCollected(7);
        assert_eq!(err.to_string(), "exit status of child 7 was already collected");
    }

    #[test]
    fn test_kernel_error_from() {
        let err: KernelError = CreateError::OutOfPages { pages: 2 }.into();
        assert!(matches!(err, KernelError::Create(_)));

        let err: KernelError = WaitError::NotChild(3).into();
        assert!(matches!(err, KernelError::Wait(_)));
    }
}
