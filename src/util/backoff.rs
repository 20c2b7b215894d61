use std::time::Duration;

use rand::Rng;

use crate::error::{unavailable, WatchResult};
use crate::platform::runtime;
use crate::settings::BackoffSettings;

/// Exponential backoff with jitter for stream reconnects.
///
/// The first attempt after construction or [`reset`](Self::reset) is not
/// delayed. Each further attempt grows the base delay by the multiplier,
/// clamped to `[initial_delay, max_delay]`.
#[derive(Debug)]
pub struct ExponentialBackoff {
    settings: BackoffSettings,
    current_base: Duration,
    attempts: u32,
}

impl ExponentialBackoff {
    pub fn new(settings: BackoffSettings) -> Self {
        Self {
            settings,
            current_base: Duration::ZERO,
            attempts: 0,
        }
    }

    pub fn reset(&mut self) {
        self.current_base = Duration::ZERO;
        self.attempts = 0;
    }

    /// Forces the next delay to the configured maximum.
    pub fn reset_to_max(&mut self) {
        self.current_base = self.settings.max_delay;
    }

    pub fn current_base(&self) -> Duration {
        self.current_base
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn next_delay(&mut self) -> WatchResult<Duration> {
        self.next_delay_with_rng(&mut rand::thread_rng())
    }

    fn next_delay_with_rng<R: Rng + ?Sized>(&mut self, rng: &mut R) -> WatchResult<Duration> {
        if let Some(max_attempts) = self.settings.max_attempts {
            if self.attempts > max_attempts {
                return Err(unavailable("Exceeded maximum number of retries allowed."));
            }
        }

        let base = self.current_base.as_secs_f64();
        let jitter = (rng.gen::<f64>() - 0.5) * self.settings.jitter_factor * base;
        let delay = Duration::from_secs_f64((base + jitter).max(0.0));

        self.attempts += 1;
        let next_base = self.current_base.mul_f64(self.settings.multiplier.max(1.0));
        self.current_base = next_base
            .max(self.settings.initial_delay)
            .min(self.settings.max_delay);
        Ok(delay)
    }

    /// Waits out the next delay.
    pub async fn back_off(&mut self) -> WatchResult<()> {
        let delay = self.next_delay()?;
        if !delay.is_zero() {
            log::debug!("backing off for {delay:?} (attempt {})", self.attempts);
        }
        runtime::sleep(delay).await;
        Ok(())
    }
}
