#[cfg(feature = "loom")]
mod imp {
    use crossbeam_utils::Backoff;
    pub(crate) use loom::{
        cell::UnsafeCell,
        sync::atomic::{AtomicU8, AtomicUsize, Ordering},
    };

    /// Loom must observe every spin iteration as a yield point, otherwise it
    /// reports the loop as a livelock.
    pub(crate) fn spin(_backoff: &Backoff) {
        loom::thread::yield_now();
    }
}

#[cfg(not(feature = "loom"))]
mod imp {
    use crossbeam_utils::Backoff;
    pub(crate) use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

    pub(crate) fn spin(backoff: &Backoff) {
        backoff.snooze();
    }

    /// `core::cell::UnsafeCell` with the closure-based accessors of
    /// `loom::cell::UnsafeCell`, so the same call sites compile under both.
    #[repr(transparent)]
    pub(crate) struct UnsafeCell<T>(core::cell::UnsafeCell<T>);

    impl<T> UnsafeCell<T> {
        pub(crate) const fn new(val: T) -> Self {
            Self(core::cell::UnsafeCell::new(val))
        }

        #[inline]
        pub(crate) fn with<R>(&self, f: impl FnOnce(*const T) -> R) -> R {
            f(self.0.get())
        }

        #[inline]
        pub(crate) fn with_mut<R>(&self, f: impl FnOnce(*mut T) -> R) -> R {
            f(self.0.get())
        }
    }
}

pub(crate) use imp::*;
