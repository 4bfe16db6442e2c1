// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Retry Engine
//!
//! Bounded exponential-backoff loop with an explicit recoverable /
//! non-recoverable split. The supplier decides the classification per
//! error; the engine decides pacing, attempt budget and cancellation.
//!
//! Suppliers are mutable across attempts so that a recovery action
//! (refreshing a stale nonce, reopening a connection) is visible to the
//! next attempt.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio_util::sync::CancellationToken;

/// Retry pacing and budget.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Apply uniform jitter to each backoff interval.
    pub random: bool,
    /// Ignore `attempts` and retry until success or a fatal error.
    pub unlimited: bool,
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Backoff growth factor per attempt.
    pub base_exp: f64,
    /// Backoff before the second attempt.
    pub base_timeout: Duration,
    /// Ceiling for any single backoff interval.
    pub max_timeout: Duration,
}

impl Default for RetryConfig {
    /// The transaction-submission policy: two attempts, constant one
    /// second of backoff, five second ceiling.
    fn default() -> Self {
        Self {
            random: false,
            unlimited: false,
            attempts: 2,
            base_exp: 1.0,
            base_timeout: Duration::from_secs(1),
            max_timeout: Duration::from_secs(5),
        }
    }
}

/// Classification returned by a supplier for a failed attempt.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Worth retrying after backoff.
    Recoverable(E),
    /// Retrying cannot help; the cause is surfaced immediately.
    NonRecoverable(E),
}

/// Terminal outcome of a retry loop that never succeeded.
#[derive(Debug)]
pub enum RetryFailure<E> {
    /// A supplier attempt was classified non-recoverable.
    Fatal(E),
    /// The attempt budget was spent; carries the last recoverable cause.
    Exhausted(E),
    /// The cancellation token fired between attempts.
    Cancelled,
}

impl<E> RetryFailure<E> {
    /// The unwrapped cause, when one exists.
    pub fn into_cause(self) -> Option<E> {
        match self {
            RetryFailure::Fatal(cause) | RetryFailure::Exhausted(cause) => Some(cause),
            RetryFailure::Cancelled => None,
        }
    }
}

/// One retriable operation. Implementations hold whatever mutable state a
/// recovery between attempts needs.
#[async_trait]
pub trait Supplier: Send {
    type Output;
    type Error;

    async fn attempt(&mut self) -> Result<Self::Output, RetryError<Self::Error>>;
}

/// Run the supplier until it succeeds, fails fatally, runs out of
/// attempts or the token is cancelled. The backoff before retry `k` is
/// `min(base_timeout * base_exp^k, max_timeout)`.
pub async fn retry_with_config<S: Supplier>(
    shutdown: &CancellationToken,
    config: &RetryConfig,
    supplier: &mut S,
) -> Result<S::Output, RetryFailure<S::Error>> {
    let mut attempt: u32 = 0;

    loop {
        if shutdown.is_cancelled() {
            return Err(RetryFailure::Cancelled);
        }

        let cause = match supplier.attempt().await {
            Ok(value) => return Ok(value),
            Err(RetryError::NonRecoverable(cause)) => return Err(RetryFailure::Fatal(cause)),
            Err(RetryError::Recoverable(cause)) => cause,
        };

        attempt += 1;
        if !config.unlimited && attempt >= config.attempts {
            return Err(RetryFailure::Exhausted(cause));
        }

        let backoff = backoff_interval(config, attempt - 1);
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown.cancelled() => return Err(RetryFailure::Cancelled),
        }
    }
}

fn backoff_interval(config: &RetryConfig, retry_index: u32) -> Duration {
    let scaled = config
        .base_timeout
        .mul_f64(config.base_exp.powi(retry_index as i32));
    let capped = scaled.min(config.max_timeout);

    if config.random {
        capped.mul_f64(rand::thread_rng().gen_range(0.5..1.5))
    } else {
        capped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn fast_config(attempts: u32) -> RetryConfig {
        RetryConfig {
            attempts,
            base_timeout: Duration::from_millis(10),
            max_timeout: Duration::from_millis(20),
            ..RetryConfig::default()
        }
    }

    /// Supplier that fails `failures` times before succeeding, optionally
    /// fatally on the first failure.
    struct Scripted {
        calls: u32,
        failures: u32,
        fatal: bool,
    }

    #[async_trait]
    impl Supplier for Scripted {
        type Output = u32;
        type Error = &'static str;

        async fn attempt(&mut self) -> Result<u32, RetryError<&'static str>> {
            self.calls += 1;
            if self.calls <= self.failures {
                if self.fatal {
                    Err(RetryError::NonRecoverable("fatal"))
                } else {
                    Err(RetryError::Recoverable("busy"))
                }
            } else {
                Ok(self.calls)
            }
        }
    }

    #[tokio::test]
    async fn returns_first_success() {
        let shutdown = CancellationToken::new();
        let mut supplier = Scripted { calls: 0, failures: 0, fatal: false };

        let result = retry_with_config(&shutdown, &fast_config(2), &mut supplier).await;
        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test]
    async fn non_recoverable_returns_immediately_with_cause() {
        let shutdown = CancellationToken::new();
        let mut supplier = Scripted { calls: 0, failures: 5, fatal: true };
        let started = Instant::now();

        let result = retry_with_config(&shutdown, &fast_config(5), &mut supplier).await;

        assert!(matches!(result, Err(RetryFailure::Fatal("fatal"))));
        assert_eq!(supplier.calls, 1);
        // No backoff was taken.
        assert!(started.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn recoverable_retries_until_budget_is_spent() {
        let shutdown = CancellationToken::new();
        let mut supplier = Scripted { calls: 0, failures: 10, fatal: false };

        let result = retry_with_config(&shutdown, &fast_config(3), &mut supplier).await;

        assert!(matches!(result, Err(RetryFailure::Exhausted("busy"))));
        assert_eq!(supplier.calls, 3);
    }

    #[tokio::test]
    async fn recoverable_failure_then_success_within_budget() {
        let shutdown = CancellationToken::new();
        let mut supplier = Scripted { calls: 0, failures: 1, fatal: false };

        let result = retry_with_config(&shutdown, &fast_config(2), &mut supplier).await;
        assert_eq!(result.unwrap(), 2);
    }

    /// Supplier recovering shared state between attempts, as the wallet
    /// owner does on a stale-nonce rejection.
    struct NonceRecovery {
        nonce: u64,
    }

    #[async_trait]
    impl Supplier for NonceRecovery {
        type Output = u64;
        type Error = &'static str;

        async fn attempt(&mut self) -> Result<u64, RetryError<&'static str>> {
            if self.nonce < 9 {
                self.nonce = 9;
                Err(RetryError::Recoverable("stale nonce"))
            } else {
                Ok(self.nonce)
            }
        }
    }

    #[tokio::test]
    async fn recovery_state_is_visible_to_the_next_attempt() {
        let shutdown = CancellationToken::new();
        let mut supplier = NonceRecovery { nonce: 7 };

        let result = retry_with_config(&shutdown, &fast_config(2), &mut supplier).await;
        assert_eq!(result.unwrap(), 9);
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_backoff_sleep() {
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            token.cancel();
        });

        let config = RetryConfig {
            attempts: 2,
            base_timeout: Duration::from_secs(60),
            max_timeout: Duration::from_secs(60),
            ..RetryConfig::default()
        };

        let mut supplier = Scripted { calls: 0, failures: 10, fatal: false };
        let started = Instant::now();

        let result = retry_with_config(&shutdown, &config, &mut supplier).await;

        assert!(matches!(result, Err(RetryFailure::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn backoff_is_capped_at_max_timeout() {
        let config = RetryConfig {
            base_exp: 10.0,
            base_timeout: Duration::from_secs(1),
            max_timeout: Duration::from_secs(5),
            ..RetryConfig::default()
        };
        assert_eq!(backoff_interval(&config, 0), Duration::from_secs(1));
        assert_eq!(backoff_interval(&config, 3), Duration::from_secs(5));
    }
}
