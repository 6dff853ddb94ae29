//! Rate limiting and retry-with-backoff around any [`LlmBackend`].
//!
//! Grounded on `elevatelaw-prompt-scaler/src/queues/chat.rs`'s
//! `ExponentialJitter::FromBackoffRange` retry loop and
//! `rate_limit.rs`'s leaky-bucket rate limiter; `SPEC_FULL.md` §4.5 specifies
//! the same shape (token bucket + exponential backoff with jitter, capped
//! retries) independent of which concrete backend is wrapped.

use async_openai::error::OpenAIError;
use keen_retry::{ExponentialJitter, ResolvedResult, RetryResult};
use leaky_bucket::RateLimiter;

use crate::prelude::*;
use crate::prompt::{ChatPrompt, JsonObject};
use crate::rate_limit::RateLimit;
use crate::retry::IsKnownTransient;

use super::{ContentResponse, LlmBackend, LlmOpts};

/// How many times to retry a transient failure before giving up, and over
/// what backoff range.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub backoff_range_millis: std::ops::RangeInclusive<u64>,
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_range_millis: 1_000..=30_000,
            jitter_ratio: 0.2,
        }
    }
}

/// Wraps an [`LlmBackend`] with a token-bucket rate limiter and
/// exponential-backoff-with-jitter retries on transient errors.
pub struct RateLimitedLlm<B: LlmBackend> {
    inner: B,
    limiter: RateLimiter,
    retry_policy: RetryPolicy,
}

impl<B: LlmBackend> RateLimitedLlm<B> {
    pub fn new(inner: B, rate_limit: &RateLimit) -> Self {
        Self::with_retry_policy(inner, rate_limit, RetryPolicy::default())
    }

    pub fn with_retry_policy(inner: B, rate_limit: &RateLimit, retry_policy: RetryPolicy) -> Self {
        Self {
            inner,
            limiter: rate_limit.to_rate_limiter(),
            retry_policy,
        }
    }
}

#[async_trait]
impl<B: LlmBackend> LlmBackend for RateLimitedLlm<B> {
    async fn generate(
        &self,
        prompt: &ChatPrompt,
        bindings: &JsonObject,
        schema: Value,
        opts: &LlmOpts,
    ) -> Result<ContentResponse> {
        let jitter = ExponentialJitter::FromBackoffRange {
            backoff_range_millis: self.retry_policy.backoff_range_millis.clone(),
            re_attempts: self.retry_policy.max_attempts as u32,
            jitter_ratio: self.retry_policy.jitter_ratio,
        };

        let attempt = || async {
            self.limiter.acquire_one().await;
            let result = self
                .inner
                .generate(prompt, bindings, schema.clone(), opts)
                .await;
            to_retry_result(result)
        };

        let result = attempt()
            .await
            .retry_with_async(|_| attempt())
            .with_exponential_jitter(|| jitter)
            .await
            .inspect_fatal(|_, error| error!(%error, "LLM call failed"))
            .inspect_recovered(|_, _, errors| {
                warn!(
                    "LLM call succeeded after retrying {} time(s)",
                    errors.len()
                )
            })
            .inspect_given_up(|_, errors, error| {
                error!(
                    %error,
                    "LLM call failed after exhausting {} retr(y/ies)",
                    errors.len()
                )
            });

        match result {
            ResolvedResult::Ok { output, .. } => Ok(output),
            ResolvedResult::Recovered { output, .. } => Ok(output),
            ResolvedResult::Fatal { error, .. } => Err(error),
            ResolvedResult::GivenUp { fatal_error, .. }
            | ResolvedResult::Unrecoverable { fatal_error, .. } => Err(fatal_error),
        }
    }
}

/// Classify `result` as a known-transient `RetryResult::Transient` or an
/// unclassified-but-possibly-permanent `RetryResult::Fatal`.
fn to_retry_result(result: Result<ContentResponse>) -> RetryResult<(), (), ContentResponse, anyhow::Error> {
    match result {
        Ok(response) => RetryResult::Ok {
            reported_input: (),
            output: response,
        },
        Err(error) if is_known_transient(&error) => {
            debug!(%error, "transient LLM error, will retry");
            RetryResult::Transient { input: (), error }
        }
        Err(error) => RetryResult::Fatal { input: (), error },
    }
}

fn is_known_transient(error: &anyhow::Error) -> bool {
    if let Some(error) = error.downcast_ref::<OpenAIError>() {
        return error.is_known_transient();
    }
    if let Some(error) = error.downcast_ref::<reqwest::Error>() {
        return error.is_known_transient();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::fake::FakeLlmBackend;
    use crate::prompt::parse_prompt;
    use crate::rate_limit::RateLimitPeriod;

    #[tokio::test]
    async fn passes_through_successful_calls() {
        let backend = RateLimitedLlm::new(
            FakeLlmBackend::new(),
            &RateLimit::new(100, RateLimitPeriod::Second),
        );
        let prompt = parse_prompt("[[messages]]\nuser = \"hi\"\n").unwrap();
        let response = backend
            .generate(&prompt, &JsonObject::new(), json!({}), &LlmOpts::default())
            .await
            .unwrap();
        assert_eq!(response.content, json!({ "echo": "hi" }));
    }
}
