//! System-wide admission control.
//!
//! The rate limiter bounds request rate per identity; this bounds how many
//! requests the process is willing to work on at once, and how long any
//! single one may run.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Suggested client back-off when the relay is at capacity.
pub const OVERLOAD_RETRY_AFTER: Duration = Duration::from_secs(5);

pub struct AdmissionControl {
    in_flight: AtomicUsize,
    max_concurrent: usize,
    request_timeout: Duration,
    throttle_delay: Option<Duration>,
}

impl AdmissionControl {
    pub fn new(
        max_concurrent: usize,
        request_timeout: Duration,
        throttle_delay: Option<Duration>,
    ) -> Self {
        Self { in_flight: AtomicUsize::new(0), max_concurrent, request_timeout, throttle_delay }
    }

    /// Try to claim an in-flight slot.
    ///
    /// Returns `None` when the process is already at `max_concurrent`.
    /// The check and the increment are a single atomic update, so two
    /// racing requests cannot both squeeze past the cap.
    pub fn try_acquire(&self) -> Option<AdmissionPermit<'_>> {
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |in_flight| {
                if in_flight < self.max_concurrent {
                    Some(in_flight + 1)
                } else {
                    None
                }
            })
            .ok()
            .map(|_| AdmissionPermit { control: self })
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn throttle_delay(&self) -> Option<Duration> {
        self.throttle_delay
    }
}

/// One admitted request's claim on the in-flight counter.
///
/// The slot is released on drop, which is what makes the decrement happen
/// exactly once whether the request succeeds, fails or times out.
pub struct AdmissionPermit<'a> {
    control: &'a AdmissionControl,
}

impl Drop for AdmissionPermit<'_> {
    fn drop(&mut self) {
        self.control.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
