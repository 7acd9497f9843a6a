use std::{future::Future, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::sleep;
use tracing::debug;
#[cfg(test)]
use unimock::unimock;
use url::Url;

use crate::{
    ByteStream,
    error::NetError,
    traits::Net,
    types::{Headers, RangeSpec, RetryPolicy},
};

#[cfg_attr(test, unimock(api = RetryPolicyMock))]
pub trait RetryPolicyTrait: Send + Sync {
    fn should_retry(&self, error: &NetError, attempt: u32) -> bool;
    fn delay_for_attempt(&self, attempt: u32) -> Duration;
    fn max_attempts(&self) -> u32;
}

pub struct DefaultRetryPolicy {
    policy: RetryPolicy,
}

impl DefaultRetryPolicy {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

impl RetryPolicyTrait for DefaultRetryPolicy {
    fn should_retry(&self, error: &NetError, attempt: u32) -> bool {
        attempt < self.policy.max_retries && error.is_retryable()
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.policy.delay_for_attempt(attempt)
    }

    fn max_attempts(&self) -> u32 {
        self.policy.max_retries
    }
}

/// Retry decorator for Net implementations.
///
/// Only the request start is retried; a body stream that fails midway is
/// reported to the caller as-is.
pub struct RetryNet<N, P> {
    inner: N,
    retry_policy: P,
}

impl<N: Net, P: RetryPolicyTrait> RetryNet<N, P> {
    pub fn new(inner: N, retry_policy: P) -> Self {
        Self {
            inner,
            retry_policy,
        }
    }

    async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, NetError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, NetError>> + Send,
        T: Send,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(out) => return Ok(out),
                Err(error) => {
                    if !self.retry_policy.should_retry(&error, attempt) {
                        if attempt > 0 && error.is_retryable() {
                            return Err(NetError::RetryExhausted {
                                max_retries: self.retry_policy.max_attempts(),
                                source: Box::new(error),
                            });
                        }
                        return Err(error);
                    }
                    attempt += 1;
                    let delay = self.retry_policy.delay_for_attempt(attempt);
                    debug!(attempt, ?delay, %error, "retrying request");
                    sleep(delay).await;
                }
            }
        }
    }
}

#[async_trait]
impl<N: Net, P: RetryPolicyTrait> Net for RetryNet<N, P> {
    async fn get_bytes(&self, url: Url, headers: Option<Headers>) -> Result<Bytes, NetError> {
        self.run(|| self.inner.get_bytes(url.clone(), headers.clone()))
            .await
    }

    async fn get_range(
        &self,
        url: Url,
        range: RangeSpec,
        headers: Option<Headers>,
    ) -> Result<ByteStream, NetError> {
        self.run(|| {
            self.inner
                .get_range(url.clone(), range.clone(), headers.clone())
        })
        .await
    }

    async fn head(&self, url: Url, headers: Option<Headers>) -> Result<Headers, NetError> {
        self.run(|| self.inner.head(url.clone(), headers.clone()))
            .await
    }

    async fn head_range(
        &self,
        url: Url,
        range: RangeSpec,
        headers: Option<Headers>,
    ) -> Result<Headers, NetError> {
        self.run(|| {
            self.inner
                .head_range(url.clone(), range.clone(), headers.clone())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use futures::stream;
    use rstest::*;
    use unimock::{MockFn, Unimock, matching};

    use super::*;
    use crate::traits::NetMock;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(1), Duration::from_millis(5))
    }

    fn url() -> Url {
        Url::parse("http://test.invalid/video.mp4").unwrap()
    }

    // DefaultRetryPolicy Tests

    #[rstest]
    #[case(0, true, "first attempt should retry")]
    #[case(2, true, "third attempt should retry")]
    #[case(3, false, "fourth attempt should not retry (max=3)")]
    fn test_default_retry_policy_should_retry_max_retries(
        #[case] attempt: u32,
        #[case] expected: bool,
        #[case] _desc: &str,
    ) {
        let retry_policy = DefaultRetryPolicy::new(RetryPolicy::default());
        assert_eq!(retry_policy.should_retry(&NetError::Timeout, attempt), expected);
    }

    #[test]
    fn test_default_retry_policy_should_not_retry_non_retryable() {
        let retry_policy = DefaultRetryPolicy::new(RetryPolicy::default());
        let error = NetError::http_status(404, "http://x".into());
        assert!(!retry_policy.should_retry(&error, 0));
    }

    // RetryNet Tests - head

    #[rstest]
    #[timeout(Duration::from_secs(5))]
    #[tokio::test]
    async fn test_retry_then_success() {
        let mock = Unimock::new((
            NetMock::head
                .next_call(matching!(_, _))
                .returns(Err(NetError::Timeout)),
            NetMock::head
                .next_call(matching!(_, _))
                .returns(Err(NetError::http_status(503, "u".into()))),
            NetMock::head
                .next_call(matching!(_, _))
                .returns(Ok(Headers::new())),
        ));
        let retry = RetryNet::new(mock, DefaultRetryPolicy::new(fast_policy(3)));

        let result = retry.head(url(), None).await;

        assert!(result.is_ok());
    }

    #[rstest]
    #[timeout(Duration::from_secs(5))]
    #[tokio::test]
    async fn test_retries_exhausted() {
        let mock = Unimock::new((
            NetMock::head
                .next_call(matching!(_, _))
                .returns(Err(NetError::Timeout)),
            NetMock::head
                .next_call(matching!(_, _))
                .returns(Err(NetError::Timeout)),
            NetMock::head
                .next_call(matching!(_, _))
                .returns(Err(NetError::Timeout)),
        ));
        let retry = RetryNet::new(mock, DefaultRetryPolicy::new(fast_policy(2)));

        let result = retry.head(url(), None).await;

        assert!(matches!(
            result,
            Err(NetError::RetryExhausted { max_retries: 2, .. })
        ));
    }

    #[rstest]
    #[timeout(Duration::from_secs(5))]
    #[tokio::test]
    async fn test_non_retryable_returns_immediately() {
        let mock = Unimock::new(
            NetMock::head
                .next_call(matching!(_, _))
                .returns(Err(NetError::http_status(404, "u".into()))),
        );
        let retry = RetryNet::new(mock, DefaultRetryPolicy::new(fast_policy(3)));

        let result = retry.head(url(), None).await;

        assert_eq!(result.unwrap_err().status_code(), Some(404));
    }

    #[rstest]
    #[timeout(Duration::from_secs(5))]
    #[tokio::test]
    async fn test_zero_retries_passes_error_through() {
        let mock = Unimock::new(
            NetMock::head
                .next_call(matching!(_, _))
                .returns(Err(NetError::Timeout)),
        );
        let retry = RetryNet::new(mock, DefaultRetryPolicy::new(RetryPolicy::none()));

        let result = retry.head(url(), None).await;

        assert!(matches!(result, Err(NetError::Timeout)));
    }

    // RetryNet Tests - get_range

    #[rstest]
    #[timeout(Duration::from_secs(5))]
    #[tokio::test]
    async fn test_get_range_retry_then_success() {
        let mock = Unimock::new((
            NetMock::get_range
                .next_call(matching!(_, _, _))
                .answers(&|_, _, _, _| Err(NetError::Timeout)),
            NetMock::get_range
                .next_call(matching!(_, RangeSpec { start: 0, end: Some(99) }, _))
                .answers(&|_, _, _, _| Ok(Box::pin(stream::empty()) as ByteStream)),
        ));
        let retry = RetryNet::new(mock, DefaultRetryPolicy::new(fast_policy(3)));

        let result = retry
            .get_range(url(), RangeSpec::new(0, Some(99)), None)
            .await;

        assert!(result.is_ok());
    }

    // RetryNet Tests - custom policy

    #[rstest]
    #[timeout(Duration::from_secs(5))]
    #[tokio::test]
    async fn test_policy_decides_each_attempt() {
        let policy = Unimock::new((
            RetryPolicyMock::should_retry
                .next_call(matching!(_, 0))
                .returns(true),
            RetryPolicyMock::delay_for_attempt
                .next_call(matching!(1))
                .returns(Duration::ZERO),
            RetryPolicyMock::should_retry
                .next_call(matching!(_, 1))
                .returns(false),
            RetryPolicyMock::max_attempts
                .next_call(matching!())
                .returns(1_u32),
        ));
        let mock = Unimock::new(
            NetMock::head
                .each_call(matching!(_, _))
                .returns(Err(NetError::Timeout)),
        );
        let retry = RetryNet::new(mock, policy);

        let result = retry.head(url(), None).await;

        assert!(matches!(
            result,
            Err(NetError::RetryExhausted { max_retries: 1, .. })
        ));
    }
}
