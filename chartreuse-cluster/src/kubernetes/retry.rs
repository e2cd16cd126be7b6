//! Single retry of transient API failures

use crate::kubernetes::error::KubeError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Delay before the one retry of a failed request
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Run `request`, and run it once more after `delay` if it failed transiently
pub async fn retry_once<T, F, Fut>(operation: &str, delay: Duration, mut request: F) -> Result<T, KubeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, KubeError>>,
{
    match request().await {
        Err(e) if e.is_transient() => {
            warn!(
                operation = %operation,
                error = %e,
                retry_in_secs = delay.as_secs(),
                "Kubernetes request failed, retrying once"
            );
            sleep(delay).await;
            request().await
        }
        result => result,
    }
}
