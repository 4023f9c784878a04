//! 重试建议引擎
//!
//! 根据 HarnessError 类型与已重试次数返回 RetryDecision；退避参数来自配置 [dispatch.retry]。
//! Dispatcher 本身从不重试，避免重复副作用（如重复发送短信）。

use std::time::Duration;

use serde::Deserialize;

use crate::core::{HarnessError, RetryDecision};

/// [dispatch.retry] 段：默认 max_retries = 0，即调用方不重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_backoff_ms: 500,
            backoff_multiplier: 2.0,
            max_backoff_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryAdvisor {
    policy: RetryPolicy,
}

impl RetryAdvisor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// `retries_done` 为已经执行过的重试次数（首次失败时为 0）
    pub fn advise(&self, err: &HarnessError, retries_done: u32) -> RetryDecision {
        if !err.is_retryable() || retries_done >= self.policy.max_retries {
            return RetryDecision::GiveUp;
        }
        let factor = self.policy.backoff_multiplier.max(1.0).powi(retries_done as i32);
        let delay_ms = (self.policy.initial_backoff_ms as f64 * factor)
            .min(self.policy.max_backoff_ms as f64)
            .round() as u64;
        RetryDecision::RetryAfter(Duration::from_millis(delay_ms))
    }
}
