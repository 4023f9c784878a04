//! 请求上下文与执行上下文
//!
//! TurnContext 描述一轮入站对话（由调用方水合）；ExecutionContext 每次 dispatch 新建，
//! 把存储、领域服务、任务队列、传输、追踪作为窄接口注入处理函数，不跨请求共享。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::{Budget, TraceRecorder};
use crate::ports::{Store, Transport};
use crate::scheduler::JobQueue;
use crate::services::Services;

/// 入站渠道
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    #[default]
    Sms,
    Web,
    Email,
    /// 调度器到期任务产生的合成轮次
    Scheduled,
}

/// 用户同意记录
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsentFlags {
    /// 一般同意（数据处理、主动联系）；requires_consent 的能力检查此项
    pub recorded: bool,
    pub emergency: bool,
    pub marketing: bool,
}

/// 一轮入站对话的上下文
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TurnContext {
    pub user_id: String,
    pub channel: Channel,
    pub text: String,
    /// 显式预算，优先于 Agent 默认预算
    pub budget: Option<Budget>,
    pub consent: ConsentFlags,
    /// 上游已判定危机
    pub crisis_flagged: bool,
    /// 本轮适用的策略包；为空时用配置中的 active_bundles
    pub policy_bundles: Vec<String>,
    pub metadata: Map<String, Value>,
}

impl TurnContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_budget(mut self, budget: Budget) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn with_consent(mut self, consent: ConsentFlags) -> Self {
        self.consent = consent;
        self
    }

    /// 仅设置一般同意
    pub fn consented(mut self) -> Self {
        self.consent.recorded = true;
        self
    }

    pub fn flag_crisis(mut self) -> Self {
        self.crisis_flagged = true;
        self
    }

    pub fn with_policy_bundle(mut self, name: impl Into<String>) -> Self {
        self.policy_bundles.push(name.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// 随访默认值（[scheduler] 段）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckInDefaults {
    pub hour: u32,
    pub timezone: String,
}

impl Default for CheckInDefaults {
    fn default() -> Self {
        Self {
            hour: crate::scheduler::schedule::DEFAULT_HOUR,
            timezone: crate::scheduler::schedule::DEFAULT_TIMEZONE.to_string(),
        }
    }
}

/// 单次 dispatch 的执行上下文
pub struct ExecutionContext {
    pub user_id: String,
    pub turn: TurnContext,
    pub budget: Budget,
    pub store: Arc<dyn Store>,
    pub services: Arc<Services>,
    pub scheduler: Arc<dyn JobQueue>,
    pub transport: Arc<dyn Transport>,
    pub trace: Arc<TraceRecorder>,
    pub now: DateTime<Utc>,
    pub check_in: CheckInDefaults,
}

impl ExecutionContext {
    pub fn trace_id(&self) -> &str {
        self.trace.id()
    }
}
