use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};

/// Poll `check` with exponential backoff until it returns `true` or `timeout`
/// elapses. Returns whether the condition was met.
///
/// The first check runs immediately, so an already-satisfied condition
/// costs no delay.
pub async fn wait_until<F, Fut>(what: &str, timeout: Duration, check: F) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let attempt = || async {
        if check().await {
            Ok(())
        } else {
            Err(anyhow::anyhow!("{} not ready", what))
        }
    };

    let result = tokio::time::timeout(
        timeout,
        attempt
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_millis(250))
                    .with_max_delay(Duration::from_secs(2))
                    .with_max_times(usize::MAX),
            )
            .notify(|err: &anyhow::Error, dur: Duration| {
                tracing::debug!("{}, retrying in {:?}", err, dur);
            }),
    )
    .await;

    match result {
        Ok(Ok(())) => true,
        Ok(Err(_)) => false,
        Err(_) => {
            tracing::debug!(
                "{} still not ready after {}",
                what,
                humantime::format_duration(timeout)
            );
            false
        }
    }
}
