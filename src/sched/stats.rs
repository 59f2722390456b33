/*!
 * Scheduler Statistics
 * Tick accounting and serializable snapshots
 */

use super::tcb::{Tcb, ThreadState};
use super::Kernel;
use crate::core::types::{Nice, Priority, Tick, Tid};
use log::info;
use serde::Serialize;

/// Raw tick counters, maintained inside the CPU critical section
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Counters {
    pub idle_ticks: u64,
    pub kernel_ticks: u64,
    pub user_ticks: u64,
    pub context_switches: u64,
}

/// Point-in-time view of the whole kernel
#[derive(Debug, Clone, Serialize)]
pub struct KernelStats {
    pub ticks: Tick,
    pub idle_ticks: u64,
    pub kernel_ticks: u64,
    pub user_ticks: u64,
    pub context_switches: u64,
    /// Live threads, idle and bootstrap included
    pub threads: usize,
    pub load_avg_x100: i32,
}

/// Point-in-time view of one thread
#[derive(Debug, Clone, Serialize)]
pub struct ThreadSnapshot {
    pub tid: Tid,
    pub name: String,
    pub state: ThreadState,
    pub priority: Priority,
    pub base_priority: Priority,
    pub nice: Nice,
    pub recent_cpu_x100: i32,
}

impl ThreadSnapshot {
    fn capture(tcb: &Tcb) -> Self {
        Self {
            tid: tcb.tid,
            name: tcb.name.clone(),
            state: tcb.state,
            priority: tcb.priority,
            base_priority: tcb.base_priority,
            nice: tcb.nice,
            recent_cpu_x100: (tcb.recent_cpu * 100).round(),
        }
    }
}

impl Kernel {
    /// Snapshot the kernel-wide counters
    #[must_use]
    pub fn stats(&self) -> KernelStats {
        let cpu = self.inner.cpu.lock();
        KernelStats {
            ticks: cpu.ticks,
            idle_ticks: cpu.counters.idle_ticks,
            kernel_ticks: cpu.counters.kernel_ticks,
            user_ticks: cpu.counters.user_ticks,
            context_switches: cpu.counters.context_switches,
            threads: cpu.registry.len(),
            load_avg_x100: (cpu.load_avg * 100).round(),
        }
    }

    /// Snapshot every live thread, ordered by tid
    #[must_use]
    pub fn threads(&self) -> Vec<ThreadSnapshot> {
        let cpu = self.inner.cpu.lock();
        cpu.registry
            .values()
            .map(|&index| ThreadSnapshot::capture(&cpu.arena[index]))
            .collect()
    }

    /// Snapshot one thread by tid
    #[must_use]
    pub fn thread_info(&self, tid: Tid) -> Option<ThreadSnapshot> {
        let cpu = self.inner.cpu.lock();
        let index = cpu.registry.get(&tid)?;
        Some(ThreadSnapshot::capture(&cpu.arena[*index]))
    }

    /// State of one thread by tid; `None` once it has exited
    #[must_use]
    pub fn thread_state(&self, tid: Tid) -> Option<ThreadState> {
        let cpu = self.inner.cpu.lock();
        let index = cpu.registry.get(&tid)?;
        Some(cpu.arena[*index].state)
    }

    /// Log the tick accounting, the shutdown summary line
    pub fn log_stats(&self) {
        let stats = self.stats();
        info!(
            "Kernel stats: {} idle ticks, {} kernel ticks, {} user ticks, {} context switches",
            stats.idle_ticks, stats.kernel_ticks, stats.user_ticks, stats.context_switches
        );
    }
}
