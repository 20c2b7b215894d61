use std::time::Duration;

use crate::model::DatabaseId;

pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(1_000);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(60_000);
pub const DEFAULT_BACKOFF_FACTOR: f64 = 1.5;
pub const DEFAULT_JITTER_FACTOR: f64 = 1.0;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Reconnect policy of a watch stream.
#[derive(Clone, Debug, PartialEq)]
pub struct BackoffSettings {
    /// Delay applied after the first failed attempt.
    pub initial_delay: Duration,
    /// Upper bound for the delay; also the delay forced after
    /// `RESOURCE_EXHAUSTED`.
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the current delay used as random jitter (`0.0` disables it).
    pub jitter_factor: f64,
    /// Consecutive attempts allowed without progress; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            multiplier: DEFAULT_BACKOFF_FACTOR,
            jitter_factor: DEFAULT_JITTER_FACTOR,
            max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
        }
    }
}

impl BackoffSettings {
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_jitter_factor(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct WatchSettings {
    database_id: DatabaseId,
    backoff: BackoffSettings,
}

impl WatchSettings {
    pub fn new(database_id: DatabaseId) -> Self {
        Self {
            database_id,
            backoff: BackoffSettings::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffSettings) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn database_id(&self) -> &DatabaseId {
        &self.database_id
    }

    pub fn backoff(&self) -> &BackoffSettings {
        &self.backoff
    }
}
