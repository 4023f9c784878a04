//! 调度错误分类与重试建议
//!
//! 与 RetryAdvisor 配合：Dispatcher 只负责分类并返回 HarnessError，是否重试由调用方依据 RetryDecision 决定。

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// 预算维度：工具调用次数或输入规模
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetResource {
    ToolCalls,
    InputTokens,
}

impl std::fmt::Display for BudgetResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BudgetResource::ToolCalls => f.write_str("tool_calls"),
            BudgetResource::InputTokens => f.write_str("input_tokens"),
        }
    }
}

/// 一次能力调用在治理流水线中可能出现的失败
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HarnessError {
    #[error("Budget exceeded: {resource} {used}/{limit}")]
    BudgetExceeded {
        resource: BudgetResource,
        used: u32,
        limit: u32,
    },

    #[error("Policy violation{}", message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    PolicyViolation {
        rule_id: Option<String>,
        message: Option<String>,
    },

    #[error("Capability not found: {0}")]
    CapabilityNotFound(String),

    #[error("Consent required for capability: {capability}")]
    ConsentRequired { capability: String },

    /// 可恢复的下游失败；Dispatcher 不自动重试，仅标记为可重试
    #[error("Transient failure in {capability}: {reason}")]
    TransientToolError { capability: String, reason: String },

    /// 入参不符合 Schema，属于调用方缺陷
    #[error("Invalid input for {capability}: {reason}")]
    InvalidInput { capability: String, reason: String },

    /// 未分类的致命错误，原因原样透出
    #[error("Capability {capability} failed: {reason}")]
    ToolFailed { capability: String, reason: String },

    #[error("Duplicate capability: {0}")]
    DuplicateCapability(String),
}

/// 错误种类（写入 trace 与审计日志）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BudgetExceeded,
    PolicyViolation,
    CapabilityNotFound,
    ConsentRequired,
    TransientToolError,
    InvalidInput,
    ToolFailed,
    DuplicateCapability,
}

impl HarnessError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HarnessError::BudgetExceeded { .. } => ErrorKind::BudgetExceeded,
            HarnessError::PolicyViolation { .. } => ErrorKind::PolicyViolation,
            HarnessError::CapabilityNotFound(_) => ErrorKind::CapabilityNotFound,
            HarnessError::ConsentRequired { .. } => ErrorKind::ConsentRequired,
            HarnessError::TransientToolError { .. } => ErrorKind::TransientToolError,
            HarnessError::InvalidInput { .. } => ErrorKind::InvalidInput,
            HarnessError::ToolFailed { .. } => ErrorKind::ToolFailed,
            HarnessError::DuplicateCapability(_) => ErrorKind::DuplicateCapability,
        }
    }

    /// 只有 TransientToolError 允许调用方重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, HarnessError::TransientToolError { .. })
    }
}

/// 重试建议：由调用方（消息入口 / 轮询器）决定是否照做
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// 等待指定时长后重试
    RetryAfter(Duration),
    /// 不再重试
    GiveUp,
}
