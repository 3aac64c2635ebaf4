//! GC / pin coordination.
//!
//! Writers hold a shared pin lock for the duration of a put batch plus
//! pinning; the garbage collector holds the exclusive GC lock for a whole
//! mark and sweep. While a GC is waiting for the exclusive lock,
//! [`GcLocker::gc_requested`] reports `true` so long-running writers can
//! yield early.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::debug;

#[derive(Clone, Default)]
pub struct GcLocker {
    lock: Arc<RwLock<()>>,
    waiting_gcs: Arc<AtomicUsize>,
}

/// Exclusive guard held by a GC run.
pub struct GcGuard {
    _guard: OwnedRwLockWriteGuard<()>,
}

/// Shared guard held by writers.
pub struct PinGuard {
    _guard: OwnedRwLockReadGuard<()>,
}

/// Marks a GC as waiting; undone on drop so an abandoned wait is not
/// counted forever.
struct WaitTicket<'a>(&'a AtomicUsize);

impl<'a> WaitTicket<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaitTicket<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl GcLocker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the exclusive lock, waiting for every pin guard to drop.
    pub async fn gc_lock(&self) -> GcGuard {
        let ticket = WaitTicket::new(&self.waiting_gcs);
        let guard = Arc::clone(&self.lock).write_owned().await;
        drop(ticket);
        debug!("[gc] exclusive lock acquired");
        GcGuard { _guard: guard }
    }

    /// Take a shared lock that blocks GC until dropped.
    pub async fn pin_lock(&self) -> PinGuard {
        PinGuard {
            _guard: Arc::clone(&self.lock).read_owned().await,
        }
    }

    /// Whether a GC is currently waiting for the exclusive lock.
    pub fn gc_requested(&self) -> bool {
        self.waiting_gcs.load(Ordering::SeqCst) > 0
    }
}
