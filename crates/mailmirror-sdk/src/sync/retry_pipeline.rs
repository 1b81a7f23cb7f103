//! 同步重试管线
//!
//! 用 Provider 提供的 `preprocess_error` 对每个错误分类：
//! - 账号尚未完成引导：任何错误都直接抛出
//! - 重试次数用尽：可跳过的错误放弃本轮同步（返回 `Skipped`），否则抛出
//! - 可重试错误：固定延迟后重试
//! - 其余错误立即抛出，不消耗重试次数

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::config::RetryConfig;
use crate::error::{MirrorError, Result};
use crate::sync::provider::ProviderApi;

/// 管线执行结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    Completed(T),
    /// 放弃本轮，调用方视为无变更，下个周期再试
    Skipped,
}

impl<T> RetryOutcome<T> {
    pub fn is_skipped(&self) -> bool {
        matches!(self, RetryOutcome::Skipped)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPipeline {
    pub retries_limit: u32,
    pub retries_delay: Duration,
}

impl Default for RetryPipeline {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPipeline {
    pub fn new(retries_limit: u32, retries_delay: Duration) -> Self {
        Self {
            retries_limit,
            retries_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.retries_limit, config.retries_delay())
    }

    /// 执行操作，按分类重试/跳过/抛出
    pub async fn run<T, F, Fut>(
        &self,
        bootstrapped: bool,
        provider: &dyn ProviderApi,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<RetryOutcome<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retry_index = 0u32;

        loop {
            let error = match operation().await {
                Ok(value) => return Ok(RetryOutcome::Completed(value)),
                Err(e) => e,
            };

            if !bootstrapped || error.is_cancelled() {
                return Err(error);
            }

            let class = provider.preprocess_error(&error);

            if retry_index >= self.retries_limit {
                if class.skippable {
                    warn!(
                        "⏭️ 重试 {} 次后仍失败，跳过本轮同步: {}",
                        retry_index, error
                    );
                    return Ok(RetryOutcome::Skipped);
                }
                error!("❌ 重试 {} 次后仍失败: {}", retry_index, error);
                return Err(error);
            }

            if !class.retriable {
                return Err(error);
            }

            retry_index += 1;
            warn!(
                "🔄 同步失败，{:?} 后进行第 {}/{} 次重试: {}",
                self.retries_delay, retry_index, self.retries_limit, error
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(MirrorError::Cancelled),
                _ = tokio::time::sleep(self.retries_delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::error::ProviderError;
    use crate::testing::MockProvider;

    fn pipeline() -> RetryPipeline {
        RetryPipeline::new(3, Duration::from_millis(5))
    }

    fn offline() -> MirrorError {
        MirrorError::Provider(ProviderError::new(0, "offline"))
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let provider = MockProvider::new();
        let attempts = &AtomicU32::new(0);
        let outcome = pipeline()
            .run(true, &provider, &CancellationToken::new(), move || async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(offline())
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(tokio_test::assert_ok!(outcome), RetryOutcome::Completed(42));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_skippable_error_is_skipped() {
        let provider = MockProvider::new();
        let attempts = &AtomicU32::new(0);
        let outcome: Result<RetryOutcome<()>> = pipeline()
            .run(true, &provider, &CancellationToken::new(), move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(offline())
            })
            .await;
        assert!(tokio_test::assert_ok!(outcome).is_skipped());
        // 首次 + 3 次重试
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn non_retriable_error_propagates_immediately() {
        let provider = MockProvider::new();
        let attempts = &AtomicU32::new(0);
        let outcome: Result<RetryOutcome<()>> = pipeline()
            .run(true, &provider, &CancellationToken::new(), move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(MirrorError::Provider(ProviderError::new(500, "boom")))
            })
            .await;
        tokio_test::assert_err!(outcome);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn not_bootstrapped_never_retries() {
        let provider = MockProvider::new();
        let attempts = &AtomicU32::new(0);
        let outcome: Result<RetryOutcome<()>> = pipeline()
            .run(false, &provider, &CancellationToken::new(), move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(offline())
            })
            .await;
        assert!(matches!(outcome, Err(MirrorError::Provider(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_interrupts_delay() {
        let provider = MockProvider::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let pipeline = RetryPipeline::new(3, Duration::from_secs(3600));
        let outcome: Result<RetryOutcome<()>> = pipeline
            .run(true, &provider, &cancel, || async { Err(offline()) })
            .await;
        assert!(matches!(outcome, Err(MirrorError::Cancelled)));
    }
}
