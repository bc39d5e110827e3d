use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Instant, Sleep, sleep_until};

/// Single-shot, cancelable deadline.
///
/// `expired` never resolves while the timer is disarmed, so it can sit in a
/// `select!` next to the event channels without special casing.
#[derive(Debug, Default)]
pub struct DeadlineTimer {
    sleep: Option<Pin<Box<Sleep>>>,
}

impl DeadlineTimer {
    pub fn new() -> Self {
        Self { sleep: None }
    }

    /// Arms the timer, replacing any previous deadline.
    pub fn arm(&mut self, after: Duration) {
        let deadline = Instant::now() + after;
        log::trace!("deadline armed for {:?}", after);
        self.sleep = Some(Box::pin(sleep_until(deadline)));
    }

    /// Returns true if a pending deadline was dropped.
    pub fn cancel(&mut self) -> bool {
        let was_armed = self.sleep.take().is_some();
        if was_armed {
            log::trace!("deadline cancelled");
        }
        was_armed
    }

    pub fn is_armed(&self) -> bool {
        self.sleep.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.sleep.as_ref().map(|s| s.deadline())
    }

    /// Waits for the deadline and disarms the timer. Pends forever when
    /// disarmed.
    pub async fn expired(&mut self) {
        match self.sleep.as_mut() {
            Some(sleep) => {
                sleep.await;
                self.sleep = None;
            }
            None => std::future::pending().await,
        }
    }
}
