/*!
 * MLFQS Engine
 * 4.4BSD-style multi-level feedback queue statistics and recompute schedule
 */

use super::operations::cond_yield_locked;
use super::{CpuState, Kernel, SchedPolicy};
use crate::core::fixed::Fixed;
use crate::core::limits::{clamp_priority, valid_nice, PRI_MAX};
use crate::core::types::{Nice, Priority};

/// priority = PRI_MAX - recent_cpu/4 - nice*2, rounded and clamped
pub(crate) fn mlfqs_priority(recent_cpu: Fixed, nice: Nice) -> Priority {
    clamp_priority(PRI_MAX - (recent_cpu / 4).round() - nice * 2)
}

impl CpuState {
    /// load_avg = (59/60)*load_avg + (1/60)*ready_threads, where
    /// ready_threads counts ready plus running threads, idle excluded.
    pub(crate) fn update_load_avg(&mut self) {
        let running = if Some(self.current_index()) == self.idle { 0 } else { 1 };
        let ready_threads = self.ready.len() as i32 + running;
        self.load_avg =
            Fixed::frac(59, 60) * self.load_avg + Fixed::frac(1, 60) * ready_threads;
    }

    /// recent_cpu = (2*load_avg)/(2*load_avg + 1) * recent_cpu + nice,
    /// applied to every live thread.
    pub(crate) fn decay_recent_cpu(&mut self) {
        let twice_load = self.load_avg * 2;
        let coeff = twice_load / (twice_load + 1);
        let CpuState { registry, arena, .. } = self;
        for &index in registry.values() {
            let tcb = &mut arena[index];
            tcb.recent_cpu = coeff * tcb.recent_cpu + tcb.nice;
        }
    }

    /// Recompute every thread's priority from its statistics (idle excluded),
    /// then stably re-sort the ready queue.
    pub(crate) fn refresh_priorities(&mut self) {
        let idle = self.idle;
        let CpuState { registry, arena, ready, .. } = self;
        for &index in registry.values() {
            if Some(index) == idle {
                continue;
            }
            let tcb = &mut arena[index];
            let priority = mlfqs_priority(tcb.recent_cpu, tcb.nice);
            tcb.priority = priority;
            tcb.base_priority = priority;
        }
        ready.resort(|i| arena[i].priority);
    }
}

impl Kernel {
    /// Set the calling thread's nice value. Under MLFQS this recomputes the
    /// caller's priority at once and yields if it is no longer the highest.
    pub fn set_nice(&self, nice: Nice) {
        assert!(valid_nice(nice), "nice {nice} out of range");
        let inner = &*self.inner;
        let mut cpu = inner.cpu.lock();
        assert!(!cpu.in_interrupt, "blocking operation in interrupt context");
        let cur = cpu.assert_current();

        cpu.arena[cur].nice = nice;
        if cpu.policy == SchedPolicy::Mlfqs {
            let tcb = &mut cpu.arena[cur];
            let priority = mlfqs_priority(tcb.recent_cpu, tcb.nice);
            tcb.priority = priority;
            tcb.base_priority = priority;
            cond_yield_locked(inner, cpu);
        }
    }

    /// Nice value of the current thread
    #[must_use]
    pub fn nice(&self) -> Nice {
        self.inner.cpu.lock().current().nice
    }

    /// System load average times 100, rounded to nearest
    #[must_use]
    pub fn load_avg(&self) -> i32 {
        (self.inner.cpu.lock().load_avg * 100).round()
    }

    /// Current thread's recent CPU times 100, rounded to nearest
    #[must_use]
    pub fn recent_cpu(&self) -> i32 {
        (self.inner.cpu.lock().current().recent_cpu * 100).round()
    }
}
