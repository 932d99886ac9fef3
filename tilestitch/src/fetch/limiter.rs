//! Concurrency limiter for outbound tile requests.
//!
//! Caps the number of simultaneous requests against the tile source so a
//! large plan cannot flood the server. Permits are handed out by a
//! semaphore and returned automatically on drop, which keeps the limit
//! honest across early returns and cancelled tasks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounds in-flight tile requests and tracks utilisation.
pub struct FetchLimiter {
    semaphore: Arc<Semaphore>,
    max_permits: usize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl FetchLimiter {
    /// Creates a limiter allowing `max_concurrent` simultaneous requests.
    ///
    /// # Panics
    ///
    /// Panics if `max_concurrent` is zero.
    pub fn new(max_concurrent: usize) -> Self {
        assert!(max_concurrent > 0, "fetch concurrency must be at least 1");
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_permits: max_concurrent,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Waits for a free slot and returns a permit for one request.
    ///
    /// The permit releases its slot when dropped.
    pub async fn acquire(&self) -> FetchPermit<'_> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("fetch limiter semaphore closed");

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.update_peak(current);

        FetchPermit {
            _permit: permit,
            in_flight: &self.in_flight,
        }
    }

    fn update_peak(&self, current: usize) {
        let mut peak = self.peak_in_flight.load(Ordering::SeqCst);
        while current > peak {
            match self.peak_in_flight.compare_exchange_weak(
                peak,
                current,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => peak = actual,
            }
        }
    }

    /// Configured maximum number of concurrent requests.
    pub fn max_concurrent(&self) -> usize {
        self.max_permits
    }

    /// Number of requests currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous requests observed so far.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

/// Permit for a single in-flight request.
///
/// Dropping the permit frees the slot and decrements the in-flight count.
pub struct FetchPermit<'a> {
    _permit: OwnedSemaphorePermit,
    in_flight: &'a AtomicUsize,
}

impl Drop for FetchPermit<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
