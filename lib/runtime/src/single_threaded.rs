// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Process-wide serialization of calls into numeric libraries that must not
//! be entered concurrently from several threads.
//!
//! ```ignore
//! let _region = single_threaded_region();
//! unsafe { vendor_kernel(a.ptr_mut(0, 0), a.ld()) };
//! ```
//!
//! The region is reentrant on the owning thread, so a guarded kernel may
//! call other guarded kernels. It is released on drop, including during
//! unwinding. GPU-backend code does not need it; stream ordering already
//! serializes the vendor calls.

use std::cell::Cell;
use std::sync::LazyLock;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

static REGION: LazyLock<ReentrantMutex<()>> = LazyLock::new(|| ReentrantMutex::new(()));

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Held while inside the single-threaded region. Not `Send`: it must be
/// dropped on the thread that acquired it.
#[must_use = "the region is released as soon as the guard is dropped"]
pub struct SingleThreadedRegion {
    _guard: ReentrantMutexGuard<'static, ()>,
}

impl std::fmt::Debug for SingleThreadedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleThreadedRegion")
            .field("depth", &depth())
            .finish()
    }
}

/// Enter the region, blocking while another thread is inside.
pub fn single_threaded_region() -> SingleThreadedRegion {
    let guard = REGION.lock();
    DEPTH.with(|d| d.set(d.get() + 1));
    SingleThreadedRegion {
        _guard: guard,
    }
}

/// Nesting depth of the region on the calling thread, 0 when outside.
pub fn depth() -> usize {
    DEPTH.with(Cell::get)
}

impl Drop for SingleThreadedRegion {
    fn drop(&mut self) {
        DEPTH.with(|d| d.set(d.get() - 1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_reentrant_on_same_thread() {
        assert_eq!(depth(), 0);
        let outer = single_threaded_region();
        {
            let _inner = single_threaded_region();
            assert_eq!(depth(), 2);
        }
        assert_eq!(depth(), 1);
        drop(outer);
        assert_eq!(depth(), 0);
    }

    #[test]
    fn test_excludes_other_threads() {
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let inside = inside.clone();
                let max_inside = max_inside.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        let _region = single_threaded_region();
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_micros(200));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_released_on_panic() {
        let result = std::thread::spawn(|| {
            let _region = single_threaded_region();
            panic!("inside region");
        })
        .join();
        assert!(result.is_err());

        // a poisoned or leaked region would block here
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let _region = single_threaded_region();
            tx.send(depth()).unwrap();
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
    }
}
