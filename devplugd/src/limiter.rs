//! The Rate Limiter (§4.4): a token-bucket gate shared across the read
//! and write paths. `rate == 0` is a sentinel for unlimited and must
//! short-circuit `acquire` without touching the governor state (§9).

use governor::{clock::DefaultClock, Quota, RateLimiter as Governor};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

type DirectGovernor = Governor<governor::state::NotKeyed, governor::state::InMemoryState, DefaultClock>;

enum Gate {
    Unlimited,
    Bounded(Arc<DirectGovernor>),
}

/// A token-bucket gate. `rate` and `burst` are in events/second and
/// bucket capacity respectively; `burst == 0` defaults to `rate`.
#[derive(Clone)]
pub struct RateLimiter {
    gate: Arc<Gate>,
}

impl RateLimiter {
    pub fn new(rate: u32, burst: u32) -> Self {
        if rate == 0 {
            return RateLimiter {
                gate: Arc::new(Gate::Unlimited),
            };
        }

        let burst = if burst == 0 { rate } else { burst };
        let rate = NonZeroU32::new(rate).expect("rate checked nonzero above");
        let burst = NonZeroU32::new(burst).expect("burst defaults to nonzero rate");
        let quota = Quota::per_second(rate).allow_burst(burst);

        RateLimiter {
            gate: Arc::new(Gate::Bounded(Arc::new(Governor::direct(quota)))),
        }
    }

    /// Blocks until a token is available, or returns `false` if
    /// `timeout` elapses first. Unlimited gates always return `true`
    /// immediately.
    pub async fn acquire(&self, timeout: Duration) -> bool {
        match self.gate.as_ref() {
            Gate::Unlimited => true,
            Gate::Bounded(limiter) => {
                let limiter = limiter.clone();

                tokio::time::timeout(timeout, async move {
                    loop {
                        match limiter.check() {
                            Ok(()) => return,
                            Err(not_until) => {
                                let wait = not_until.wait_time_from(governor::clock::DefaultClock::default().now());
                                tokio::time::sleep(wait).await;
                            }
                        }
                    }
                })
                .await
                .map_err(|_| debug!("rate limiter acquire timed out"))
                .is_ok()
            }
        }
    }
}
