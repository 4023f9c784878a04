//! 预算解析与本轮工具调用计数
//!
//! 每类 Agent 有固定的资源上限（输入/输出 token、工具调用次数）；请求上下文中显式给出的预算总是优先。
//! 计数器由调用方按「一轮对话」创建并传入，不能跨轮、跨用户复用。

use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::capabilities::TurnContext;

/// 单轮资源上限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Budget {
    pub max_input_tokens: u32,
    pub max_output_tokens: u32,
    pub max_tools: u32,
}

/// 内置 Agent 类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentKind {
    /// 通用对话，额度最大
    Main,
    /// 评估流程
    Assessment,
    /// 危机流程：额度最小、只允许一次工具调用，缩短延迟与攻击面
    Crisis,
}

impl AgentKind {
    pub const DEFAULT: AgentKind = AgentKind::Main;

    pub fn from_id(agent_id: &str) -> Option<Self> {
        match agent_id {
            "main" => Some(AgentKind::Main),
            "assessment" => Some(AgentKind::Assessment),
            "crisis" => Some(AgentKind::Crisis),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Main => "main",
            AgentKind::Assessment => "assessment",
            AgentKind::Crisis => "crisis",
        }
    }

    pub const fn budget(&self) -> Budget {
        match self {
            AgentKind::Main => Budget {
                max_input_tokens: 4000,
                max_output_tokens: 1500,
                max_tools: 4,
            },
            AgentKind::Assessment => Budget {
                max_input_tokens: 2500,
                max_output_tokens: 1000,
                max_tools: 3,
            },
            AgentKind::Crisis => Budget {
                max_input_tokens: 1200,
                max_output_tokens: 600,
                max_tools: 1,
            },
        }
    }
}

/// 解析本次调度适用的预算；纯函数，无 I/O、无失败
pub fn resolve_budget(agent_id: &str, turn: &TurnContext) -> Budget {
    if let Some(budget) = turn.budget {
        return budget;
    }
    AgentKind::from_id(agent_id)
        .unwrap_or(AgentKind::DEFAULT)
        .budget()
}

/// Token 估算器（简单的字符计数近似）
pub struct TokenEstimator;

impl TokenEstimator {
    /// 英文约 4 字符/token，非 ASCII 约 1.5 字符/token，最少 1
    pub fn estimate(text: &str) -> usize {
        let mut ascii_chars = 0usize;
        let mut non_ascii_chars = 0usize;

        for c in text.chars() {
            if c.is_ascii() {
                ascii_chars += 1;
            } else {
                non_ascii_chars += 1;
            }
        }

        let tokens = ascii_chars / 4 + (non_ascii_chars as f64 / 1.5).ceil() as usize;
        tokens.max(1)
    }

    pub fn estimate_json(value: &serde_json::Value) -> usize {
        Self::estimate(&value.to_string())
    }
}

/// 本轮已发出的能力调用次数
#[derive(Debug, Default)]
pub struct ToolCallCounter {
    issued: AtomicU32,
}

impl ToolCallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issued(&self) -> u32 {
        self.issued.load(Ordering::SeqCst)
    }

    /// 未达上限时占用一次调用额度；达到上限返回 Err(当前已用次数)
    pub(crate) fn try_acquire(&self, max_tools: u32) -> Result<u32, u32> {
        self.issued
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used < max_tools).then_some(used + 1)
            })
            .map(|prev| prev + 1)
    }
}
