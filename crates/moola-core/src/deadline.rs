use crate::error::MoolaError;
use std::future::Future;
use std::time::Duration;

/// Run an external call under `limit`, mapping expiry to `MoolaError::Timeout`.
pub(crate) async fn bounded<T, F>(limit: Duration, call: &str, fut: F) -> Result<T, MoolaError>
where
    F: Future<Output = Result<T, MoolaError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(MoolaError::Timeout(format!(
            "{call} exceeded {}ms",
            limit.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn slow_call_times_out() {
        let result: Result<(), MoolaError> = bounded(Duration::from_millis(50), "grant", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(MoolaError::Timeout(_))));
    }

    #[tokio::test]
    async fn fast_call_passes_through() {
        let result = bounded(Duration::from_secs(1), "lookup", async { Ok(7_u64) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
