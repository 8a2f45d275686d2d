use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::api::middleware::AppError;

/// Cancellation token plus optional deadline carried by every SQL call.
///
/// Clones share the same token, so cancelling any clone cancels every branch
/// that is still running. Branches that already finished keep their results.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl QueryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fail fast when the context is already cancelled or past its deadline
    pub fn check(&self) -> Result<(), AppError> {
        if self.token.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(AppError::Timeout),
            _ => Ok(()),
        }
    }

    /// Drive `fut` until it completes, the token is cancelled or the deadline passes
    pub async fn run<T, F>(&self, fut: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        self.check()?;

        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(AppError::Cancelled),
            _ = deadline => Err(AppError::Timeout),
            result = fut => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_passes_result_through() {
        let ctx = QueryContext::new();
        let value = ctx.run(async { Ok::<_, AppError>(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_cancelled_context_fails_immediately() {
        let ctx = QueryContext::new();
        ctx.clone().cancel();
        assert!(ctx.is_cancelled());
        let result = ctx.run(async { Ok::<_, AppError>(()) }).await;
        assert!(matches!(result, Err(AppError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_work() {
        let ctx = QueryContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, AppError>(())
            })
            .await;
        assert!(matches!(result, Err(AppError::Cancelled)));
    }

    #[tokio::test]
    async fn test_deadline_times_out() {
        let ctx = QueryContext::with_timeout(Duration::from_millis(10));
        let result = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, AppError>(())
            })
            .await;
        assert!(matches!(result, Err(AppError::Timeout)));
        assert!(matches!(ctx.check(), Err(AppError::Timeout)));
    }
}
