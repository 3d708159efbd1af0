//! Exponential retry backoff for consumer loops
//!
//! Transient failures on the ingest/reflect paths are retried by simply not
//! acknowledging the message; this type paces those retries so a poisoned
//! dependency does not turn the loop hot. Capped at 30 s.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

const INITIAL_DELAY: Duration = Duration::from_millis(200);
const MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct Backoff {
    next: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            next: INITIAL_DELAY,
        }
    }

    /// Sleep for the current delay (doubling it for next time), or return
    /// early when the shutdown token fires.
    pub async fn wait(&mut self, shutdown: &CancellationToken) {
        let delay = self.next;
        self.next = (self.next * 2).min(MAX_DELAY);
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }

    /// Reset after a successful operation
    pub fn reset(&mut self) {
        self.next = INITIAL_DELAY;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delay_doubles_up_to_the_cap() {
        let mut backoff = Backoff::new();
        assert_eq!(backoff.next, INITIAL_DELAY);
        backoff.next = Duration::from_secs(20);
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        backoff.wait(&shutdown).await;
        assert_eq!(backoff.next, MAX_DELAY);
        backoff.reset();
        assert_eq!(backoff.next, INITIAL_DELAY);
    }

    #[tokio::test]
    async fn cancelled_token_returns_immediately() {
        let mut backoff = Backoff::new();
        backoff.next = MAX_DELAY;
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let start = std::time::Instant::now();
        backoff.wait(&shutdown).await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
