//! Cross-thread stress tests for shared wrapper-record lifetime.
//!
//! An application being captured may release different interface pointers to
//! the same native object from different threads at once; these tests drive
//! that pattern hard and check that teardown still happens exactly once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use capture_core::registry::WrapperRegistry;
use capture_core::resources::SharedWrapperResources;

const THREADS: usize = 8;
const ROUNDS: usize = 1_000;

/// Increments a shared counter when destroyed during record teardown.
struct TeardownProbe(Arc<AtomicUsize>);

impl Drop for TeardownProbe {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn acquire_release_storm_tears_down_once() {
    let teardowns = Arc::new(AtomicUsize::new(0));

    let shared = SharedWrapperResources::new();
    shared.add_entry(TeardownProbe(Arc::clone(&teardowns)));

    let barrier = Arc::new(Barrier::new(THREADS));
    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let handle = shared.acquire();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..ROUNDS {
                    let extra = handle.acquire();
                    extra.release();
                }
                handle.release();
            })
        })
        .collect();

    shared.release();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(
        teardowns.load(Ordering::SeqCst),
        1,
        "net-zero acquire/release must produce exactly one teardown"
    );
}

#[test]
fn concurrent_insertion_keeps_every_entry_retrievable() {
    let shared = SharedWrapperResources::new();

    let barrier = Arc::new(Barrier::new(THREADS));
    let workers: Vec<_> = (0..THREADS as u64)
        .map(|worker| {
            let handle = shared.acquire();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let ids: Vec<_> = (0..64u64)
                    .map(|n| {
                        let value = worker << 32 | n;
                        (handle.add_entry(value), value)
                    })
                    .collect();
                // Read back under contention from the other writers.
                for (id, value) in &ids {
                    assert_eq!(*handle.get_entry::<u64>(*id).unwrap(), *value);
                }
                ids
            })
        })
        .collect();

    let mut total = 0;
    for worker in workers {
        let ids = worker.join().unwrap();
        total += ids.len();
        for (id, value) in ids {
            assert_eq!(*shared.get_entry::<u64>(id).unwrap(), value);
        }
    }
    assert_eq!(shared.entry_count(), total);
}

#[test]
fn registry_hands_out_one_record_per_native_object() {
    let registry = Arc::new(WrapperRegistry::new());
    let teardowns = Arc::new(AtomicUsize::new(0));

    let (origin, fresh) = registry.get_or_create(0xF00D);
    assert!(fresh);
    origin.add_entry(TeardownProbe(Arc::clone(&teardowns)));

    let barrier = Arc::new(Barrier::new(THREADS));
    let handles = Arc::new(Mutex::new(Vec::new()));
    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            let handles = Arc::clone(&handles);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..ROUNDS {
                    let (handle, fresh) = registry.get_or_create(0xF00D);
                    assert!(!fresh, "the record stays alive throughout");
                    handle.release();
                }
                let (keep, _) = registry.get_or_create(0xF00D);
                handles.lock().unwrap().push(keep);
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    let kept = handles.lock().unwrap();
    assert!(kept.iter().all(|handle| handle.same_record(&origin)));
    assert_eq!(origin.share_count(), 1 + kept.len());
    assert_eq!(teardowns.load(Ordering::SeqCst), 0);

    drop(kept);
    handles.lock().unwrap().clear();
    origin.release();
    assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    assert_eq!(registry.len(), 0);
}
