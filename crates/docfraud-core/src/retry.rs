use std::time::Duration;

use tokio::time::sleep;

const INITIAL_BACKOFF: Duration = Duration::from_millis(200);
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Exponential backoff shared by the wire clients.
#[derive(Debug)]
pub(crate) struct Backoff {
    attempt: u32,
    max_retries: u32,
    delay: Duration,
}

impl Backoff {
    pub(crate) fn new(max_retries: u32) -> Self {
        Self {
            attempt: 0,
            max_retries,
            delay: INITIAL_BACKOFF,
        }
    }

    /// Sleep before the next attempt, or return `false` once the budget is spent.
    pub(crate) async fn wait(&mut self) -> bool {
        if self.attempt >= self.max_retries {
            return false;
        }
        sleep(self.delay).await;
        self.delay = (self.delay * 2).min(MAX_BACKOFF);
        self.attempt += 1;
        true
    }

    pub(crate) fn attempt(&self) -> u32 {
        self.attempt
    }
}
