//! Panic isolation around plugin calls.
//!
//! Provider code is third-party; a panic inside it must surface as a
//! [`ProviderError`] instead of unwinding through the runtime.

use futures::FutureExt;
use marquee_core::{ProviderError, ProviderResult};
use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};

/// Awaits a plugin future, converting a panic into `ProviderError::Other`.
pub async fn guarded<T, F>(operation: &str, call: F) -> ProviderResult<T>
where
    F: Future<Output = ProviderResult<T>>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(panicked(operation, payload.as_ref())),
    }
}

/// Synchronous counterpart of [`guarded`] for property accessors.
pub fn guarded_sync<T>(operation: &str, call: impl FnOnce() -> ProviderResult<T>) -> ProviderResult<T> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result,
        Err(payload) => Err(panicked(operation, payload.as_ref())),
    }
}

fn panicked(operation: &str, payload: &(dyn Any + Send)) -> ProviderError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    tracing::error!(operation, panic = %message, "provider panicked");
    ProviderError::other(format!("provider panicked during {operation}: {message}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn async_panic_becomes_error() {
        let result: ProviderResult<()> = guarded("search", async { panic!("boom") }).await;
        match result {
            Err(ProviderError::Other { message }) => assert!(message.contains("boom")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn sync_result_passes_through() {
        assert_eq!(guarded_sync("catalogs", || Ok(3)), Ok(3));
        let err = guarded_sync::<()>("filters", || Err(ProviderError::not_implemented("filters")));
        assert!(err.unwrap_err().is_not_implemented());
    }

    #[test]
    fn sync_panic_with_owned_message() {
        let err = guarded_sync::<()>("test_film", || panic!("{}", String::from("owned"))).unwrap_err();
        assert_eq!(
            err,
            ProviderError::other("provider panicked during test_film: owned")
        );
    }
}
