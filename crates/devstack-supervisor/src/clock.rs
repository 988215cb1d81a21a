use std::{
    future::Future,
    ops::ControlFlow,
    time::{Duration, Instant},
};

use async_trait::async_trait;

/// Time source for every wait the supervisor performs.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Runs `check` every `interval` until it breaks or `timeout` elapses.
///
/// The check runs once immediately and once more when the deadline is reached, so a
/// zero timeout still observes the current state. Sleeps are clipped to the deadline.
/// Returns `None` on timeout.
pub async fn poll_until<T, F, Fut>(
    clock: &dyn Clock,
    interval: Duration,
    timeout: Duration,
    mut check: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ControlFlow<T>>,
{
    let deadline = clock.now() + timeout;
    loop {
        if let ControlFlow::Break(v) = check().await {
            return Some(v);
        }

        let now = clock.now();
        if now >= deadline {
            return None;
        }
        let step = interval.min(deadline - now).max(Duration::from_millis(1));
        clock.sleep(step).await;
    }
}
