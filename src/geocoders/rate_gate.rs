//! Minimum spacing between outbound requests.

use std::time::Duration;

use tokio::{
    sync::Mutex,
    time::{sleep_until, Instant},
};
use tracing::trace;

/// Lets at most one request through per `interval`, measured from the start
/// of the previous request.
///
/// The slot is claimed before the request is sent, so slow or failing
/// requests still count against the limit. Callers are served one at a time.
#[derive(Debug)]
pub struct RateGate {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateGate {
    pub fn new(interval: Duration) -> RateGate {
        RateGate {
            interval,
            last: Mutex::new(None),
        }
    }

    /// The minimum time between two requests.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until we may send another request, and claim the slot. Returns the
    /// time at which the slot was claimed.
    pub async fn acquire(&self) -> Instant {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let next = prev + self.interval;
            if next > Instant::now() {
                trace!("waiting {:?} for rate limit", next - Instant::now());
                sleep_until(next).await;
            }
        }
        let now = Instant::now();
        *last = Some(now);
        now
    }
}
