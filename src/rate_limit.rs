#![forbid(unsafe_code)]

//! Request pacing shared by every call issued through one API client.
//!
//! The limiter keeps the instant of the last permitted request behind a
//! mutex. The lock is held across the pacing sleep, so concurrent workers
//! queue up on it and no two permitted requests ever land closer together than
//! `min_delay`. A random jitter is added on top so parallel workers do not fall
//! into lockstep.

use anyhow::{Result, bail};
use parking_lot::Mutex;
use rand::Rng;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Extra random delay added when a caller arrives before `min_delay` passed.
pub const MAX_JITTER: Duration = Duration::from_millis(500);

#[derive(Debug)]
pub struct RateLimiter {
    min_delay: Duration,
    max_delay: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Builds a limiter from delays expressed in seconds.
    pub fn new(min_delay_secs: f64, max_delay_secs: f64) -> Result<Self> {
        let min_delay = seconds_to_duration("request_delay_min", min_delay_secs)?;
        let max_delay = seconds_to_duration("request_delay_max", max_delay_secs)?;
        if max_delay < min_delay {
            bail!(
                "request_delay_max ({max_delay_secs}s) must not be lower than request_delay_min ({min_delay_secs}s)"
            );
        }
        Ok(Self {
            min_delay,
            max_delay,
            last_call: Mutex::new(None),
        })
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Blocks the calling thread until the next request may go out, then
    /// records the new last-call instant.
    pub fn acquire(&self) {
        let mut last_call = self.last_call.lock();
        let pause = self.pause_for(*last_call, Instant::now(), &mut rand::rng());
        if !pause.is_zero() {
            debug!(pause_ms = pause.as_millis() as u64, "pacing outbound request");
            thread::sleep(pause);
        }
        *last_call = Some(Instant::now());
    }

    fn pause_for(&self, last_call: Option<Instant>, now: Instant, rng: &mut impl Rng) -> Duration {
        match last_call.map(|last| now.saturating_duration_since(last)) {
            Some(elapsed) if elapsed < self.min_delay => {
                (self.min_delay - elapsed) + jitter(rng, MAX_JITTER)
            }
            _ => jitter(rng, self.min_delay),
        }
    }
}

fn jitter(rng: &mut impl Rng, ceiling: Duration) -> Duration {
    if ceiling.is_zero() {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(rng.random_range(0.0..ceiling.as_secs_f64()))
}

fn seconds_to_duration(name: &str, seconds: f64) -> Result<Duration> {
    match Duration::try_from_secs_f64(seconds) {
        Ok(duration) => Ok(duration),
        Err(_) => bail!("{name} must be a non-negative number of seconds, got {seconds}"),
    }
}
