use core::sync::atomic::{AtomicUsize, Ordering};
use crossbeam_utils::CachePadded;
use derive_more::Debug;
use std::sync::{Condvar, Mutex, PoisonError};

/// In-flight accounting for one executor.
///
/// Every top-level submission increments the counter before its node can
/// run, and every top-level teardown decrements it. Tasks spawned through a
/// [`Runtime`](crate::executor::Runtime) are accounted on their parent
/// instead.
#[derive(Debug)]
pub(crate) struct Topology {
    num_inflight: CachePadded<AtomicUsize>,
    #[debug(skip)]
    lock: Mutex<()>,
    #[debug(skip)]
    quiescent: Condvar,
}

impl Topology {
    pub(crate) fn new() -> Self {
        Self {
            num_inflight: CachePadded::new(AtomicUsize::new(0)),
            lock: Mutex::new(()),
            quiescent: Condvar::new(),
        }
    }

    pub(crate) fn num_inflight(&self) -> usize {
        self.num_inflight.load(Ordering::Acquire)
    }

    pub(crate) fn increment(&self) {
        self.num_inflight.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn decrement(&self) {
        let prev = self.num_inflight.fetch_sub(1, Ordering::AcqRel);
        assert_ne!(prev, 0, "Topology::decrement: [1]");
        if prev == 1 {
            // Taking the lock orders this notification after any waiter's
            // check of the counter.
            let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.quiescent.notify_all();
        }
    }

    /// Blocks until no task is in flight.
    pub(crate) fn wait_for_quiescence(&self) {
        let guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _guard = self
            .quiescent
            .wait_while(guard, |_| self.num_inflight() != 0)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use std::{sync::Arc, thread, time::Duration};

    #[test]
    fn returns_immediately_when_idle() {
        let topology = Topology::new();
        topology.wait_for_quiescence();
        assert_eq!(topology.num_inflight(), 0);
    }

    #[test]
    fn waits_for_last_decrement() {
        let topology = Arc::new(Topology::new());
        for _ in 0..3 {
            topology.increment();
        }
        let releaser = {
            let topology = Arc::clone(&topology);
            thread::spawn(move || {
                for _ in 0..3 {
                    thread::sleep(Duration::from_millis(5));
                    topology.decrement();
                }
            })
        };
        topology.wait_for_quiescence();
        assert_eq!(topology.num_inflight(), 0);
        releaser.join().unwrap();
    }
}
