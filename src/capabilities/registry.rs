//! 能力注册表
//!
//! 所有能力实现 Capability trait（name / description / 类型化入参与出参 / run），
//! 注册时擦除为 CapabilityHandler 并生成入参 Schema；Dispatcher 只通过 CapabilityRegistry 按名查找。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::capabilities::context::ExecutionContext;
use crate::capabilities::schema::{check_empty_input, InputSchema};
use crate::core::HarnessError;
use crate::ports::{StoreError, TransportError};
use crate::scheduler::{ScheduleError, SchedulerError};
use crate::services::AssessmentError;

/// 成本 / 延迟提示
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hint {
    #[default]
    Low,
    Medium,
    High,
}

/// 处理函数返回的错误；Dispatcher 负责映射到 HarnessError
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CapabilityError {
    /// 可恢复（下游暂时不可用）
    #[error("{0}")]
    Transient(String),

    /// 入参语义不合法（Schema 无法表达的约束，如未知时区）
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Failed(String),
}

impl CapabilityError {
    pub fn into_harness(self, capability: &str) -> HarnessError {
        let capability = capability.to_string();
        match self {
            CapabilityError::Transient(reason) => HarnessError::TransientToolError { capability, reason },
            CapabilityError::InvalidArgument(reason) => HarnessError::InvalidInput { capability, reason },
            CapabilityError::Failed(reason) => HarnessError::ToolFailed { capability, reason },
        }
    }
}

impl From<StoreError> for CapabilityError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(_) => CapabilityError::Transient(e.to_string()),
            _ => CapabilityError::Failed(e.to_string()),
        }
    }
}

impl From<TransportError> for CapabilityError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Unavailable(_) => CapabilityError::Transient(e.to_string()),
            TransportError::Rejected(_) => CapabilityError::Failed(e.to_string()),
        }
    }
}

impl From<SchedulerError> for CapabilityError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::Unavailable(_) => CapabilityError::Transient(e.to_string()),
            SchedulerError::UnknownJob(_) => CapabilityError::Failed(e.to_string()),
        }
    }
}

impl From<ScheduleError> for CapabilityError {
    fn from(e: ScheduleError) -> Self {
        CapabilityError::InvalidArgument(e.to_string())
    }
}

impl From<AssessmentError> for CapabilityError {
    fn from(e: AssessmentError) -> Self {
        CapabilityError::InvalidArgument(e.to_string())
    }
}

/// 无参能力的入参类型
#[derive(Debug, Clone, Copy, Default, Deserialize, JsonSchema)]
pub struct NoInput {}

/// 能力 trait：名称为稳定的线上契约（如 "assessment.recordAnswer"）
#[async_trait]
pub trait Capability: Send + Sync + 'static {
    type Input: DeserializeOwned + JsonSchema + Send + 'static;
    type Output: Serialize + Send;

    fn name(&self) -> &'static str;

    /// 能力描述（供 Agent 层选择工具）
    fn description(&self) -> &'static str;

    fn cost_hint(&self) -> Hint {
        Hint::Low
    }

    fn latency_hint(&self) -> Hint {
        Hint::Low
    }

    fn requires_consent(&self) -> bool {
        false
    }

    /// false 表示无参能力：不生成 Schema，入参只能是 null 或 {}
    fn takes_input(&self) -> bool {
        true
    }

    async fn run(&self, input: Self::Input, ctx: &ExecutionContext) -> Result<Self::Output, CapabilityError>;
}

/// 类型擦除后的处理函数
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    /// 入参能否反序列化为处理函数期望的类型
    fn check(&self, input: &Value) -> Result<(), String>;

    async fn call(&self, input: Value, ctx: &ExecutionContext) -> Result<Value, CapabilityError>;
}

struct TypedHandler<C>(C);

#[async_trait]
impl<C: Capability> CapabilityHandler for TypedHandler<C> {
    fn check(&self, input: &Value) -> Result<(), String> {
        C::Input::deserialize(input).map(drop).map_err(|e| e.to_string())
    }

    async fn call(&self, input: Value, ctx: &ExecutionContext) -> Result<Value, CapabilityError> {
        let input: C::Input =
            serde_json::from_value(input).map_err(|e| CapabilityError::InvalidArgument(e.to_string()))?;
        let output = self.0.run(input, ctx).await?;
        serde_json::to_value(output).map_err(|e| CapabilityError::Failed(format!("output serialization: {e}")))
    }
}

/// 注册后不可变的能力描述
pub struct CapabilityDescriptor {
    pub name: String,
    pub description: String,
    pub cost_hint: Hint,
    pub latency_hint: Hint,
    pub input_schema: Option<InputSchema>,
    pub requires_consent: bool,
    handler: Arc<dyn CapabilityHandler>,
}

impl std::fmt::Debug for CapabilityDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityDescriptor")
            .field("name", &self.name)
            .field("requires_consent", &self.requires_consent)
            .finish_non_exhaustive()
    }
}

impl CapabilityDescriptor {
    pub fn from_capability<C: Capability>(capability: C) -> Self {
        let input_schema = capability.takes_input().then(InputSchema::of::<C::Input>);
        Self {
            name: capability.name().to_string(),
            description: capability.description().to_string(),
            cost_hint: capability.cost_hint(),
            latency_hint: capability.latency_hint(),
            input_schema,
            requires_consent: capability.requires_consent(),
            handler: Arc::new(TypedHandler(capability)),
        }
    }

    /// 校验原始入参并归一化（无参能力统一为 {}）
    pub fn validate(&self, input: &Value) -> Result<Value, String> {
        let normalized = match &self.input_schema {
            Some(schema) => {
                schema.validate(input)?;
                input.clone()
            }
            None => {
                check_empty_input(input)?;
                Value::Object(Default::default())
            }
        };
        self.handler.check(&normalized)?;
        Ok(normalized)
    }

    pub async fn invoke(&self, input: Value, ctx: &ExecutionContext) -> Result<Value, CapabilityError> {
        self.handler.call(input, ctx).await
    }

    fn parameters_schema(&self) -> Value {
        match &self.input_schema {
            Some(schema) => schema.as_json().clone(),
            None => serde_json::json!({ "type": "object", "properties": {}, "additionalProperties": false }),
        }
    }
}

/// 能力注册表：按名称存储 Arc<CapabilityDescriptor>，名称唯一
#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Arc<CapabilityDescriptor>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册全部内置能力
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for descriptor in crate::capabilities::builtin_descriptors() {
            // 内置名称互不相同
            if let Err(e) = registry.insert(descriptor) {
                tracing::error!(error = %e, "builtin capability skipped");
            }
        }
        registry
    }

    pub fn register(&mut self, capability: impl Capability) -> Result<(), HarnessError> {
        self.insert(CapabilityDescriptor::from_capability(capability))
    }

    pub fn insert(&mut self, descriptor: CapabilityDescriptor) -> Result<(), HarnessError> {
        if self.capabilities.contains_key(&descriptor.name) {
            return Err(HarnessError::DuplicateCapability(descriptor.name));
        }
        tracing::debug!(capability = %descriptor.name, "capability registered");
        self.capabilities
            .insert(descriptor.name.clone(), Arc::new(descriptor));
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<CapabilityDescriptor>, HarnessError> {
        self.capabilities
            .get(name)
            .cloned()
            .ok_or_else(|| HarnessError::CapabilityNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.capabilities.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn descriptors(&self) -> Vec<Arc<CapabilityDescriptor>> {
        let mut descriptors: Vec<_> = self.capabilities.values().cloned().collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    /// 工具清单 JSON（Agent 层用于生成工具描述）
    pub fn to_schema_json(&self) -> String {
        let tools: Vec<Value> = self
            .descriptors()
            .iter()
            .map(|d| {
                serde_json::json!({
                    "name": d.name,
                    "description": d.description,
                    "costHint": d.cost_hint,
                    "latencyHint": d.latency_hint,
                    "requiresConsent": d.requires_consent,
                    "parameters": d.parameters_schema(),
                })
            })
            .collect();
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
    }
}
