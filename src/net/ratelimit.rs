//! A single configurable token bucket per [`super::Scraper`] instance (spec
//! §4.B). Generalizes the teacher's own `tokio::sync::Semaphore`-based
//! concurrency limiting (`staples::get_cached`'s `CONCURRENCY` semaphore)
//! from a fixed permit count to a bucket that refills over time.

use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use crate::context::OpContext;
use crate::error::ScrapeError;

struct State {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<State>,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        let capacity = requests_per_minute.max(1) as f64;
        RateLimiter {
            capacity,
            refill_per_sec: capacity / 60.0,
            state: Mutex::new(State {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Acquire one permit, waiting (cancellably) for the bucket to refill if
    /// empty. The wait is the rate limiter's only serialisation point; every
    /// other `Scraper` operation is concurrency-safe.
    pub async fn acquire(&self, ctx: &OpContext) -> Result<(), ScrapeError> {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - state.tokens;
                    Some(Duration::from_secs_f64(deficit / self.refill_per_sec))
                }
            };

            match wait {
                None => return Ok(()),
                Some(duration) => {
                    if ctx.race(tokio::time::sleep(duration)).await.is_none() {
                        return Err(ScrapeError::Cancelled);
                    }
                }
            }
        }
    }
}
