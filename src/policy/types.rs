//! 策略类型定义
//!
//! 规则条件是可序列化的谓词树（All / Any / Not + 原子谓词），从 TOML/JSON 加载，
//! 不嵌入任何脚本语言，便于审计。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::capabilities::{Channel, ConsentFlags, TurnContext};
use crate::policy::signals::CrisisSignals;

/// 策略包：一组按声明顺序求值的规则
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyBundle {
    pub name: String,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

/// 单条规则：when 条件命中后产生 action 标签
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub id: String,
    pub when: Condition,
    pub action: String,
}

/// 同意范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentScope {
    /// 用户对数据处理/主动联系的一般同意
    Recorded,
    Emergency,
    Marketing,
}

/// 条件谓词树
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Always,
    Never,
    /// 全部满足；空列表为真
    All(Vec<Condition>),
    /// 任一满足；空列表为假
    Any(Vec<Condition>),
    Not(Box<Condition>),
    Agent(String),
    Capability(String),
    CapabilityPrefix(String),
    Channel(Channel),
    /// 入站文本包含任一词（忽略大小写）
    TextContains(Vec<String>),
    CrisisSignal(bool),
    Consent { scope: ConsentScope, granted: bool },
    Metadata { key: String, equals: Value },
}

impl Condition {
    pub fn matches(&self, ctx: &PolicyContext<'_>) -> bool {
        match self {
            Condition::Always => true,
            Condition::Never => false,
            Condition::All(conds) => conds.iter().all(|c| c.matches(ctx)),
            Condition::Any(conds) => conds.iter().any(|c| c.matches(ctx)),
            Condition::Not(inner) => !inner.matches(ctx),
            Condition::Agent(agent) => ctx.agent == agent,
            Condition::Capability(name) => ctx.capability == name,
            Condition::CapabilityPrefix(prefix) => ctx.capability.starts_with(prefix.as_str()),
            Condition::Channel(channel) => ctx.channel == *channel,
            Condition::TextContains(terms) => {
                let text = ctx.text.to_lowercase();
                terms
                    .iter()
                    .any(|term| !term.is_empty() && text.contains(&term.to_lowercase()))
            }
            Condition::CrisisSignal(expected) => ctx.crisis.active == *expected,
            Condition::Consent { scope, granted } => {
                let actual = match scope {
                    ConsentScope::Recorded => ctx.consent.recorded,
                    ConsentScope::Emergency => ctx.consent.emergency,
                    ConsentScope::Marketing => ctx.consent.marketing,
                };
                actual == *granted
            }
            Condition::Metadata { key, equals } => ctx.metadata.get(key) == Some(equals),
        }
    }
}

/// 策略强制改道的目标流程
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteOverride {
    Crisis,
    Assessment,
}

impl RouteOverride {
    pub fn parse(target: &str) -> Option<Self> {
        match target {
            "crisis" => Some(RouteOverride::Crisis),
            "assessment" => Some(RouteOverride::Assessment),
            _ => None,
        }
    }

    /// 改道后实际执行的能力
    pub fn capability(&self) -> &'static str {
        match self {
            RouteOverride::Crisis => "crisis.escalate",
            RouteOverride::Assessment => "assessment.start",
        }
    }

    /// 改道目标的入参：原请求的入参属于另一个能力，不沿用
    pub fn redirect_input(&self, inbound_text: &str) -> serde_json::Value {
        match self {
            RouteOverride::Crisis if !inbound_text.trim().is_empty() => {
                serde_json::json!({ "text": inbound_text })
            }
            _ => serde_json::json!({}),
        }
    }
}

/// action 标签解析后的效果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleEffect {
    Deny { message: Option<String> },
    Route(RouteOverride),
    /// 仅记录（log:* / tone:* / flag:* 等）
    Note,
}

pub const CRISIS_RESOURCES: &str =
    "If you are in immediate danger call 911, or call or text 988 for the Suicide & Crisis Lifeline.";

/// 消息 token → 面向用户的文本
fn message_for_token(token: &str) -> String {
    match token {
        "medical_disclaimer" => {
            "I can share general support but not medical diagnoses. Please consult a clinician.".to_string()
        }
        "consent_needed" => {
            "We need your permission before we can do that. Reply YES to opt in.".to_string()
        }
        "crisis_resources" => CRISIS_RESOURCES.to_string(),
        other => other.to_string(),
    }
}

impl RuleEffect {
    pub fn from_action(action: &str) -> Option<Self> {
        let action = action.trim();
        if action == "deny" || action == "block" {
            return Some(RuleEffect::Deny { message: None });
        }
        if let Some(token) = action.strip_prefix("block_with_message:") {
            if token.is_empty() {
                return None;
            }
            return Some(RuleEffect::Deny {
                message: Some(message_for_token(token)),
            });
        }
        if let Some(target) = action.strip_prefix("route:") {
            return RouteOverride::parse(target).map(RuleEffect::Route);
        }
        if action.is_empty() {
            return None;
        }
        Some(RuleEffect::Note)
    }
}

/// 命中的规则与其 action
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleHit {
    pub rule_id: String,
    pub action: String,
}

/// 策略求值结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDecision {
    pub allow: bool,
    pub actions: Vec<RuleHit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_override: Option<RouteOverride>,
    /// 第一条 deny 规则
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denied_by: Option<String>,
}

impl Default for PolicyDecision {
    fn default() -> Self {
        Self {
            allow: true,
            actions: Vec::new(),
            message: None,
            route_override: None,
            denied_by: None,
        }
    }
}

/// 规则求值所见的上下文（只读）
#[derive(Debug, Clone)]
pub struct PolicyContext<'a> {
    pub agent: &'a str,
    pub capability: &'a str,
    pub user_id: &'a str,
    pub channel: Channel,
    pub text: &'a str,
    pub crisis: CrisisSignals,
    pub consent: ConsentFlags,
    pub metadata: &'a Map<String, Value>,
}

impl<'a> PolicyContext<'a> {
    pub fn from_turn(agent: &'a str, capability: &'a str, turn: &'a TurnContext) -> Self {
        Self {
            agent,
            capability,
            user_id: &turn.user_id,
            channel: turn.channel,
            text: &turn.text,
            crisis: CrisisSignals::for_turn(turn),
            consent: turn.consent,
            metadata: &turn.metadata,
        }
    }
}
