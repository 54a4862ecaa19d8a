use crate::error::StorageError;
use std::future::Future;
use std::time::Duration;
use tokio::time;
use tracing::warn;

/// Runs a database future with an upper bound on its duration.
pub async fn storage_call<T, F>(limit: Duration, operation: &str, fut: F) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match time::timeout(limit, fut).await {
        Ok(result) => result.map_err(StorageError::from),
        Err(_) => {
            warn!("Storage operation '{}' timed out after {:?}", operation, limit);
            Err(StorageError::Timeout(limit))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_storage_call_times_out() {
        let slow = async {
            time::sleep(Duration::from_secs(60)).await;
            Ok::<_, sqlx::Error>(1)
        };

        let result = storage_call(Duration::from_secs(5), "slow_query", slow).await;
        assert!(matches!(result, Err(StorageError::Timeout(d)) if d == Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_storage_call_passes_result_through() {
        let fast = async { Ok::<_, sqlx::Error>(42) };
        let result = storage_call(Duration::from_secs(5), "fast_query", fast).await;
        assert_eq!(result.ok(), Some(42));
    }
}
