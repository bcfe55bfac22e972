/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{anyhow, Result};
use rand::{thread_rng, Rng};
use reqwest::{RequestBuilder, Response, StatusCode};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Exponential backoff with jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    /// Policy for idempotent fetches issued while a request is in flight.
    pub const FETCH: RetryPolicy = RetryPolicy {
        attempts: 3,
        base: Duration::from_millis(200),
        max: Duration::from_secs(2),
    };

    pub fn with_attempts(attempts: u32) -> Self {
        RetryPolicy {
            attempts: attempts.max(1),
            base: Duration::from_millis(500),
            max: Duration::from_secs(60),
        }
    }

    /// Delay before retry number `attempt` (1-based), jitter excluded.
    pub fn delay(&self, attempt: u32) -> Duration {
        let pow = attempt.saturating_sub(1).min(20);
        self.base.saturating_mul(1u32 << pow).min(self.max)
    }
}

pub async fn send_with_retry<F>(mut build: F, policy: RetryPolicy) -> Result<Response>
where
    F: FnMut() -> RequestBuilder,
{
    let max_attempts = policy.attempts.clamp(1, 5);
    for attempt in 1..=max_attempts {
        match build().send().await {
            Ok(resp) => {
                if should_retry_status(resp.status()) && attempt < max_attempts {
                    sleep_with_jitter(policy.delay(attempt)).await;
                    continue;
                }
                return Ok(resp);
            }
            Err(e) => {
                if attempt >= max_attempts {
                    return Err(e.into());
                }
                sleep_with_jitter(policy.delay(attempt)).await;
            }
        }
    }
    Err(anyhow!("retry loop exhausted"))
}

/// Runs `op` until it succeeds or the policy's attempts are used up,
/// returning the last error.
pub async fn retry_async<T, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < max_attempts => {
                debug!("{what}: attempt {attempt}/{max_attempts} failed: {e:#}");
                sleep_with_jitter(policy.delay(attempt)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn should_retry_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

async fn sleep_with_jitter(base: Duration) {
    let jitter_ms: u64 = thread_rng().gen_range(0..=200);
    tokio::time::sleep(base + Duration::from_millis(jitter_ms)).await;
}
