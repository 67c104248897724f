/*!
 * Per-provider sliding-window rate limiter.
 *
 * Each provider id gets an independent bucket of request timestamps. The
 * limiter is an explicit instance owned by the dispatcher rather than
 * process-wide state, so tests can construct fresh, isolated limiters.
 */

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use log::debug;
use parking_lot::Mutex;
use tokio::time::Instant;

/// Width of the sliding window
const WINDOW: Duration = Duration::from_millis(60_000);

/// Sliding-window throttle, safe to share between workers.
///
/// Two different providers never contend for the same bucket; within one
/// bucket, racing callers re-evaluate after every sleep so the window never
/// holds more than `rpm` timestamps younger than 60 seconds.
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    /// Create a limiter with no recorded history
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until a request to `provider_id` fits under its rpm cap, then
    /// record the actual send time.
    ///
    /// `rpm = None` means unlimited and returns immediately. The timestamp is
    /// appended only after the bucket has room, so bursts are never recorded
    /// optimistically.
    pub async fn acquire(&self, provider_id: &str, rpm: Option<u32>) {
        let Some(rpm) = rpm.filter(|r| *r > 0) else {
            return;
        };

        loop {
            let wait = {
                let mut buckets = self.buckets.lock();
                let bucket = buckets.entry(provider_id.to_string()).or_default();
                let now = Instant::now();

                while let Some(oldest) = bucket.front() {
                    if now.duration_since(*oldest) >= WINDOW {
                        bucket.pop_front();
                    } else {
                        break;
                    }
                }

                if (bucket.len() as u32) < rpm {
                    bucket.push_back(now);
                    None
                } else {
                    // Oldest entry is guaranteed present when the bucket is full
                    let oldest = *bucket.front().expect("full bucket has a front entry");
                    Some(WINDOW - now.duration_since(oldest))
                }
            };

            match wait {
                None => return,
                Some(delay) => {
                    debug!("Rate limit for '{}' reached, sleeping {:?}", provider_id, delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Number of timestamps currently inside the 60s window for a provider
    pub fn window_len(&self, provider_id: &str) -> usize {
        let buckets = self.buckets.lock();
        let Some(bucket) = buckets.get(provider_id) else {
            return 0;
        };
        let now = Instant::now();
        bucket.iter().filter(|stamp| now.duration_since(**stamp) < WINDOW).count()
    }
}
