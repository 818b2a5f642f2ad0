use std::{future::Future, time::Duration};
use tokio::time::{self, Instant};

/// Polls a condition until it holds or a deadline passes.
///
/// The delay between attempts starts at `delay` and is multiplied by `backoff` after each
/// failed attempt. The condition is always checked once more at the deadline.
#[derive(Copy, Clone, Debug)]
pub struct Retry {
    pub timeout: Duration,
    pub delay: Duration,
    pub backoff: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("condition not satisfied within {0:?}")]
pub struct Timeout(pub Duration);

impl Default for Retry {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            delay: Duration::from_millis(10),
            backoff: 2.0,
        }
    }
}

impl Retry {
    pub async fn until<T, F, Fut>(&self, mut attempt: F) -> Result<T, Timeout>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        let deadline = Instant::now() + self.timeout;
        let mut delay = self.delay;
        loop {
            if let Some(value) = attempt().await {
                return Ok(value);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Timeout(self.timeout));
            }
            time::sleep(delay.min(deadline - now)).await;
            // Saturates at the timeout rather than overflowing `Duration`.
            delay = Duration::try_from_secs_f64(delay.as_secs_f64() * self.backoff.max(1.0))
                .unwrap_or(self.timeout)
                .min(self.timeout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test(start_paused = true)]
    async fn returns_once_satisfied() {
        let attempts = Cell::new(0);
        let res = Retry::default()
            .until(|| {
                attempts.set(attempts.get() + 1);
                let n = attempts.get();
                async move { (n == 3).then_some(n) }
            })
            .await;
        assert_eq!(res, Ok(3));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_with_backoff() {
        let retry = Retry {
            timeout: Duration::from_secs(1),
            delay: Duration::from_millis(100),
            backoff: 2.0,
        };
        let attempts = Cell::new(0);
        let start = Instant::now();
        let res = retry
            .until(|| {
                attempts.set(attempts.get() + 1);
                async { None::<()> }
            })
            .await;

        assert_eq!(res, Err(Timeout(Duration::from_secs(1))));
        assert!(start.elapsed() >= Duration::from_secs(1));
        // Attempts at 0, 100, 300, 700, and at the deadline.
        assert!((4..=5).contains(&attempts.get()), "{}", attempts.get());
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_backoff_saturates() {
        for backoff in [f64::INFINITY, f64::MAX, 1e300, f64::NAN] {
            let retry = Retry {
                timeout: Duration::from_secs(3),
                delay: Duration::from_millis(10),
                backoff,
            };
            let attempts = Cell::new(0);
            let res = retry
                .until(|| {
                    attempts.set(attempts.get() + 1);
                    async { None::<()> }
                })
                .await;

            assert_eq!(res, Err(Timeout(Duration::from_secs(3))), "{backoff}");
            assert!(attempts.get() >= 2, "{backoff}: {}", attempts.get());
        }
    }
}
