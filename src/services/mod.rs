//! Business operations behind the HTTP routes.
//!
//! Services receive an already resolved `Principal`, perform the
//! authorization step, and bound every store call with a timeout.

pub mod tasks;
pub mod users;

use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;

use crate::error::AppError;
use crate::store::StoreResult;

pub use tasks::TaskService;
pub use users::UserService;

/// Runs a read against the store. A timeout is retryable.
pub async fn read<T, F>(limit: Duration, operation: F) -> Result<T, AppError>
where
    F: Future<Output = StoreResult<T>>,
{
    match timeout(limit, operation).await {
        Ok(result) => result.map_err(AppError::from),
        Err(_) => {
            log::error!("Store read exceeded {:?}", limit);
            Err(AppError::Unavailable("The data store did not respond in time".into()))
        }
    }
}

/// Runs a write against the store. A timed-out write may still commit, so it is
/// reported as aborted rather than retried.
pub async fn write<T, F>(limit: Duration, operation: F) -> Result<T, AppError>
where
    F: Future<Output = StoreResult<T>>,
{
    match timeout(limit, operation).await {
        Ok(result) => result.map_err(AppError::from),
        Err(_) => {
            log::error!("Store write exceeded {:?}; outcome unknown", limit);
            Err(AppError::Aborted(
                "The write did not complete in time; resubmit with the same Idempotency-Key".into(),
            ))
        }
    }
}
