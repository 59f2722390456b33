/*!
 * Sleep Tests
 * Timed blocking against the virtual clock
 */

use chalkos_kernel::{Kernel, KernelConfig, ThreadState, Tid};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_sleep_wakes_at_exact_tick() {
    init_logging();
    let kernel = Kernel::boot(KernelConfig::default()).unwrap();

    let k = kernel.clone();
    let tid = kernel
        .spawn("sleeper", 40, move || {
            k.sleep(3);
            k.exit(7);
        })
        .unwrap();
    assert_eq!(kernel.thread_state(tid), Some(ThreadState::Blocked));

    kernel.tick();
    kernel.tick();
    // One tick short of the deadline
    assert_eq!(kernel.thread_state(tid), Some(ThreadState::Blocked));

    kernel.tick();
    // The wake outranked us, so the sleeper already ran to completion
    assert_eq!(kernel.thread_state(tid), None);
    assert_eq!(kernel.ticks(), 3);
    assert_eq!(kernel.wait_child(tid).unwrap(), 7);
}

#[test]
fn test_sleepers_wake_in_deadline_then_fifo_order() {
    init_logging();
    let kernel = Kernel::boot(KernelConfig::default()).unwrap();
    let order: Arc<Mutex<Vec<Tid>>> = Arc::new(Mutex::new(Vec::new()));

    let spawn_sleeper = |name: &str, ticks: u64| {
        let (k, o) = (kernel.clone(), Arc::clone(&order));
        kernel
            .spawn(name.to_string(), 40, move || {
                k.sleep(ticks);
                o.lock().push(k.current_tid());
                k.exit(0);
            })
            .unwrap()
    };
    let late = spawn_sleeper("late", 4);
    let a = spawn_sleeper("early-a", 2);
    let b = spawn_sleeper("early-b", 2);

    kernel.tick();
    assert_eq!(order.lock().len(), 0);
    kernel.tick();
    // Same deadline wakes in the order the sleeps were issued
    assert_eq!(*order.lock(), vec![a, b]);

    kernel.tick();
    kernel.tick();
    assert_eq!(*order.lock(), vec![a, b, late]);

    for tid in [late, a, b] {
        assert_eq!(kernel.wait_child(tid).unwrap(), 0);
    }
}

#[test]
fn test_sleep_zero_returns_immediately() {
    init_logging();
    let kernel = Kernel::boot(KernelConfig::default()).unwrap();
    kernel.sleep(0);
    assert_eq!(kernel.ticks(), 0);
    assert_eq!(kernel.current_tid(), 1);
}

#[test]
fn test_sleeper_woken_by_peer_ticks() {
    init_logging();
    let kernel = Kernel::boot(KernelConfig::default()).unwrap();
    let done = Arc::new(AtomicBool::new(false));

    let (k, d) = (kernel.clone(), Arc::clone(&done));
    let tid = kernel
        .spawn("ticker", 20, move || loop {
            k.tick();
            if d.load(Ordering::Relaxed) {
                k.exit(0);
            }
        })
        .unwrap();

    // Blocking hands the CPU to the ticker, whose ticks wake us back up
    kernel.sleep(2);
    assert!(kernel.ticks() >= 2);

    done.store(true, Ordering::Relaxed);
    assert_eq!(kernel.wait_child(tid).unwrap(), 0);
}
