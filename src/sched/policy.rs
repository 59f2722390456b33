/*!
 * Scheduling Policy and Kernel Configuration
 * Boot-time knobs for the scheduler core
 */

use crate::core::errors::BootError;
use crate::core::limits::{DEFAULT_PAGES, TIMER_FREQ, TIME_SLICE};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Scheduler policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedPolicy {
    /// Strict priority scheduling with donation through locks
    Priority,
    /// Multi-level feedback queue: priorities derived from nice and
    /// recent CPU, donation disabled
    Mlfqs,
}

impl SchedPolicy {
    /// Parse from string representation
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "priority" | "prio" => Ok(Self::Priority),
            "mlfqs" | "bsd" => Ok(Self::Mlfqs),
            _ => Err(format!("Invalid policy '{}'. Valid: priority, mlfqs", s)),
        }
    }

    /// Convert to string representation
    #[inline(always)]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Priority => "priority",
            Self::Mlfqs => "mlfqs",
        }
    }
}

impl Default for SchedPolicy {
    fn default() -> Self {
        Self::Priority
    }
}

impl Serialize for SchedPolicy {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SchedPolicy {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Kernel boot configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Scheduling policy
    pub policy: SchedPolicy,
    /// Capacity of the thread page pool
    pub pages: usize,
    /// Preemption quota in ticks
    pub time_slice: u32,
    /// Ticks per second, the cadence of the once-per-second statistics
    pub timer_freq: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            policy: SchedPolicy::default(),
            pages: DEFAULT_PAGES,
            time_slice: TIME_SLICE,
            timer_freq: TIMER_FREQ,
        }
    }
}

impl KernelConfig {
    #[must_use]
    pub fn with_policy(mut self, policy: SchedPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_pages(mut self, pages: usize) -> Self {
        self.pages = pages;
        self
    }

    #[must_use]
    pub fn with_time_slice(mut self, time_slice: u32) -> Self {
        self.time_slice = time_slice;
        self
    }

    #[must_use]
    pub fn with_timer_freq(mut self, timer_freq: u64) -> Self {
        self.timer_freq = timer_freq;
        self
    }

    /// Validate the configuration.
    ///
    /// Two pages is the floor: the bootstrap and idle threads each need one.
    pub fn validate(&self) -> Result<(), BootError> {
        if self.pages < 2 {
            return Err(BootError::TooFewPages { pages: self.pages });
        }
        if self.time_slice == 0 {
            return Err(BootError::ZeroTimeSlice);
        }
        if self.timer_freq == 0 {
            return Err(BootError::ZeroTimerFreq);
        }
        Ok(())
    }
}
