/*!
 * Context Transfer Gate
 * Parks each thread's host until the scheduler hands it the CPU
 */

use parking_lot::{Condvar, Mutex};

/// One-permit gate backing a single simulated thread.
///
/// Handing over the CPU is `open` on the next thread's gate followed by
/// `wait` on your own. The permit flag makes the pair order-insensitive:
/// an `open` that lands before the owner reaches `wait` is not lost.
pub struct RunGate {
    permit: Mutex<bool>,
    condvar: Condvar,
}

impl RunGate {
    pub fn new() -> Self {
        Self {
            permit: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Grant the permit and wake the owner if it is already parked
    pub fn open(&self) {
        let mut permit = self.permit.lock();
        *permit = true;
        self.condvar.notify_one();
    }

    /// Park until the permit is granted, then consume it
    pub fn wait(&self) {
        let mut permit = self.permit.lock();
        while !*permit {
            self.condvar.wait(&mut permit);
        }
        *permit = false;
    }
}

impl Default for RunGate {
    fn default() -> Self {
        Self::new()
    }
}
