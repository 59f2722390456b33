/*!
 * Scheduler Tests
 * Thread creation, priority preemption, yield, time slices, and idle time
 */

use chalkos_kernel::{
    AddressSpace, CreateError, DirHandle, Kernel, KernelConfig, ThreadBuilder, ThreadState,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_spawn_preempts_iff_higher_priority() {
    init_logging();
    let kernel = Kernel::boot(KernelConfig::default()).unwrap();
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let (k, o) = (kernel.clone(), Arc::clone(&order));
    let eq = kernel
        .spawn("equal", 31, move || {
            o.lock().push("equal");
            k.exit(0);
        })
        .unwrap();
    // Equal priority never preempts the creator
    assert_eq!(order.lock().len(), 0);

    let (k, o) = (kernel.clone(), Arc::clone(&order));
    let hi = kernel
        .spawn("high", 40, move || {
            o.lock().push("high");
            k.exit(0);
        })
        .unwrap();
    // A higher-priority thread runs before spawn returns
    assert_eq!(*order.lock(), vec!["high"]);

    kernel.yield_now();
    assert_eq!(*order.lock(), vec!["high", "equal"]);

    assert_eq!(kernel.wait_child(hi).unwrap(), 0);
    assert_eq!(kernel.wait_child(eq).unwrap(), 0);
}

#[test]
fn test_priority_order_beats_spawn_order() {
    init_logging();
    let kernel = Kernel::boot(KernelConfig::default()).unwrap();
    let order: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));

    let (k, o) = (kernel.clone(), Arc::clone(&order));
    let lo = kernel
        .spawn("low", 20, move || {
            o.lock().push(k.current_tid());
            k.exit(0);
        })
        .unwrap();
    let (k, o) = (kernel.clone(), Arc::clone(&order));
    let hi = kernel
        .spawn("high", 40, move || {
            o.lock().push(k.current_tid());
            k.exit(0);
        })
        .unwrap();

    // The high spawn ran immediately; the low one waits until we block
    assert_eq!(*order.lock(), vec![hi]);
    assert_eq!(kernel.wait_child(lo).unwrap(), 0);
    assert_eq!(*order.lock(), vec![hi, lo]);
    assert_eq!(kernel.wait_child(hi).unwrap(), 0);
}

#[test]
fn test_time_slice_rotates_equal_priorities() {
    init_logging();
    let kernel = Kernel::boot(KernelConfig::default()).unwrap();
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let (k, o) = (kernel.clone(), Arc::clone(&order));
    let peer = kernel
        .spawn("peer", 31, move || {
            o.lock().push("peer");
            k.exit(0);
        })
        .unwrap();

    for _ in 0..3 {
        kernel.tick();
    }
    // Quota not yet exhausted
    assert_eq!(order.lock().len(), 0);

    kernel.tick();
    // The fourth tick expired the slice and rotated to the equal peer
    assert_eq!(*order.lock(), vec!["peer"]);
    assert_eq!(kernel.ticks(), 4);
    assert_eq!(kernel.wait_child(peer).unwrap(), 0);
}

#[test]
fn test_block_and_unblock() {
    init_logging();
    let kernel = Kernel::boot(KernelConfig::default()).unwrap();
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let (k, o) = (kernel.clone(), Arc::clone(&order));
    let tid = kernel
        .spawn("parker", 40, move || {
            k.block();
            o.lock().push("woken");
            k.exit(0);
        })
        .unwrap();
    assert_eq!(kernel.thread_state(tid), Some(ThreadState::Blocked));

    kernel.unblock(tid);
    // unblock never preempts, even when the woken thread outranks us
    assert_eq!(kernel.thread_state(tid), Some(ThreadState::Ready));
    assert_eq!(order.lock().len(), 0);

    kernel.yield_now();
    assert_eq!(*order.lock(), vec!["woken"]);
    assert_eq!(kernel.wait_child(tid).unwrap(), 0);
}

#[test]
fn test_idle_runs_when_nothing_is_ready() {
    init_logging();
    let kernel = Kernel::boot(KernelConfig::default()).unwrap();
    let stop = Arc::new(AtomicBool::new(false));

    let (k, s) = (kernel.clone(), Arc::clone(&stop));
    let ticker = thread::spawn(move || {
        while !s.load(Ordering::Relaxed) {
            k.tick();
            thread::sleep(Duration::from_millis(1));
        }
    });

    // Nothing else is runnable, so the CPU goes to idle until the ticker
    // has advanced time past the deadline
    kernel.sleep(3);
    stop.store(true, Ordering::Relaxed);
    ticker.join().unwrap();

    let stats = kernel.stats();
    assert!(stats.ticks >= 3);
    assert!(stats.idle_ticks >= 3);
    assert!(stats.context_switches >= 4);
    kernel.log_stats();
}

#[test]
fn test_thread_listing() {
    init_logging();
    let kernel = Kernel::boot(KernelConfig::default()).unwrap();
    let k = kernel.clone();
    let tid = kernel.spawn("worker", 20, move || k.exit(0)).unwrap();

    let summary: Vec<(u64, String, ThreadState)> = kernel
        .threads()
        .into_iter()
        .map(|t| (t.tid, t.name, t.state))
        .collect();
    assert_eq!(
        summary,
        vec![
            (1, "main".to_string(), ThreadState::Running),
            (2, "idle".to_string(), ThreadState::Blocked),
            (tid, "worker".to_string(), ThreadState::Ready),
        ]
    );
    assert_eq!(kernel.thread_info(tid).unwrap().priority, 20);
    assert_eq!(kernel.thread_state(99), None);

    assert_eq!(kernel.wait_child(tid).unwrap(), 0);
    assert_eq!(kernel.thread_state(tid), None);
}

struct CountingSpace(Arc<AtomicUsize>);

impl AddressSpace for CountingSpace {
    fn activate(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn test_builder_hooks_and_address_space() {
    init_logging();
    let kernel = Kernel::boot(KernelConfig::default()).unwrap();
    let activations = Arc::new(AtomicUsize::new(0));
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let k = kernel.clone();
    let (o1, o2) = (Arc::clone(&order), Arc::clone(&order));
    let tid = ThreadBuilder::new(&kernel, "user")
        .priority(40)
        .address_space(CountingSpace(Arc::clone(&activations)))
        .exit_hook(move || o1.lock().push("registered first"))
        .exit_hook(move || o2.lock().push("registered second"))
        .spawn(move || {
            k.tick();
            k.exit(0);
        })
        .unwrap();

    assert_eq!(kernel.wait_child(tid).unwrap(), 0);
    // Hooks run newest-first, after the thread's last dispatch
    assert_eq!(*order.lock(), vec!["registered second", "registered first"]);
    assert_eq!(activations.load(Ordering::Relaxed), 1);
    assert!(kernel.stats().user_ticks >= 1);
}

struct RootDir;

impl DirHandle for RootDir {}

#[test]
fn test_dir_handle_flows_to_children() {
    init_logging();
    let kernel = Kernel::boot(KernelConfig::default()).unwrap();
    assert!(kernel.current_dir().is_none());

    let inherited = Arc::new(AtomicBool::new(false));
    let (k, flag) = (kernel.clone(), Arc::clone(&inherited));
    let tid = ThreadBuilder::new(&kernel, "worker")
        .priority(40)
        .dir(Arc::new(RootDir))
        .spawn(move || {
            // A child spawned without a handle duplicates its creator's
            let (k2, flag2) = (k.clone(), Arc::clone(&flag));
            let grand = k
                .spawn("grand", 40, move || {
                    flag2.store(k2.current_dir().is_some(), Ordering::Relaxed);
                    k2.exit(0);
                })
                .unwrap();
            assert_eq!(k.wait_child(grand).unwrap(), 0);
            k.exit(0);
        })
        .unwrap();

    assert_eq!(kernel.wait_child(tid).unwrap(), 0);
    assert!(inherited.load(Ordering::Relaxed));
    // Nothing flowed back up to the creator
    assert!(kernel.current_dir().is_none());
}

#[test]
fn test_spawn_fails_when_pages_exhausted() {
    init_logging();
    let kernel = Kernel::boot(KernelConfig::default().with_pages(3)).unwrap();

    let k = kernel.clone();
    kernel.spawn("fits", 20, move || k.exit(0)).unwrap();
    let k = kernel.clone();
    let err = kernel.spawn("overflow", 20, move || k.exit(0)).unwrap_err();
    assert_eq!(err, CreateError::OutOfPages { pages: 3 });
}

#[test]
#[should_panic(expected = "out of range")]
fn test_spawn_rejects_out_of_range_priority() {
    let kernel = Kernel::boot(KernelConfig::default()).unwrap();
    let k = kernel.clone();
    let _ = kernel.spawn("bad", 64, move || k.exit(0));
}

#[test]
#[should_panic(expected = "bootstrap thread cannot exit")]
fn test_bootstrap_cannot_exit() {
    let kernel = Kernel::boot(KernelConfig::default()).unwrap();
    kernel.exit(0);
}

#[test]
#[should_panic(expected = "unblock of unknown tid")]
fn test_unblock_unknown_tid() {
    let kernel = Kernel::boot(KernelConfig::default()).unwrap();
    kernel.unblock(42);
}
