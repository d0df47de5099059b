use crate::{
    admission::Limit,
    error::{Error, Result},
};
use rand::Rng;
use std::{future::Future, time::Duration};
use tokio::time::sleep;

/// Tunables for the voting engine and season manager.
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    pub retry: RetryPolicy,

    /// Admission limit for vote submission, per client.
    pub vote_limit: Limit,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: Default::default(),
            vote_limit: Limit::new(10, Duration::from_secs(10)),
        }
    }
}

/// How often to re-run a transaction that lost a race with a concurrent one.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Always at least one.
    pub max_attempts: u32,

    /// Pause before the second attempt; each later attempt waits one step longer. Every pause also
    /// gets up to one more step of random jitter, so racing transactions do not retry in lockstep.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            backoff: Duration::from_millis(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    fn pause(&self, attempt: u32) -> Duration {
        let jitter = self.backoff.mul_f64(rand::thread_rng().gen());
        self.backoff * attempt + jitter
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or runs out of attempts.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    tracing::debug!(what, attempt, "transient conflict, retrying");
                    sleep(self.pause(attempt)).await;
                    attempt += 1;
                }
                Err(Error::TransientConflict) => {
                    tracing::warn!(what, attempt, "giving up after repeated conflicts");
                    return Err(Error::TransientConflict);
                }
                res => return res,
            }
        }
    }
}
