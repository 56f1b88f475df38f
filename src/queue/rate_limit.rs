// Per-task-name throughput limits, expressed as "<count>/<period>"

use governor::{DefaultDirectRateLimiter, Jitter, Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RatePeriod {
    Second,
    Minute,
    Hour,
}

impl RatePeriod {
    fn suffix(self) -> &'static str {
        match self {
            RatePeriod::Second => "s",
            RatePeriod::Minute => "m",
            RatePeriod::Hour => "h",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid rate limit `{0}`: expected <count>/<s|m|h> with a positive count")]
pub struct InvalidRateLimit(pub String);

/// At most `count` executions of one task name per `per`, across all
/// workers. A bare number means per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RateLimit {
    pub count: NonZeroU32,
    pub per: RatePeriod,
}

impl RateLimit {
    pub fn new(count: NonZeroU32, per: RatePeriod) -> Self {
        Self { count, per }
    }

    pub fn quota(&self) -> Quota {
        match self.per {
            RatePeriod::Second => Quota::per_second(self.count),
            RatePeriod::Minute => Quota::per_minute(self.count),
            RatePeriod::Hour => Quota::per_hour(self.count),
        }
    }
}

impl FromStr for RateLimit {
    type Err = InvalidRateLimit;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidRateLimit(s.to_string());
        let trimmed = s.trim();
        let (count, period) = match trimmed.split_once('/') {
            Some((count, unit)) => {
                let per = match unit.trim() {
                    "s" | "sec" | "second" => RatePeriod::Second,
                    "m" | "min" | "minute" => RatePeriod::Minute,
                    "h" | "hour" => RatePeriod::Hour,
                    _ => return Err(invalid()),
                };
                (count.trim(), per)
            }
            None => (trimmed, RatePeriod::Second),
        };
        let count = count
            .parse::<u32>()
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or_else(invalid)?;
        Ok(RateLimit::new(count, period))
    }
}

impl TryFrom<String> for RateLimit {
    type Error = InvalidRateLimit;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RateLimit> for String {
    fn from(limit: RateLimit) -> Self {
        limit.to_string()
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.count, self.per.suffix())
    }
}

/// Lazily built limiters shared by every worker of a pool.
#[derive(Default)]
pub struct RateLimiters {
    limiters: Mutex<HashMap<(&'static str, RateLimit), Arc<DefaultDirectRateLimiter>>>,
}

impl RateLimiters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `task_name` may run again under `limit`.
    pub async fn acquire(&self, task_name: &'static str, limit: RateLimit) {
        let limiter = {
            let mut limiters = self.limiters.lock().await;
            limiters
                .entry((task_name, limit))
                .or_insert_with(|| Arc::new(RateLimiter::direct(limit.quota())))
                .clone()
        };
        trace!(task.name = task_name, %limit, "waiting for rate limit slot");
        limiter
            .until_ready_with_jitter(Jitter::up_to(Duration::from_millis(25)))
            .await;
    }
}
