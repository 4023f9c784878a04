//! 能力调度器
//!
//! 每次 dispatch 单向经过：RECEIVED → BUDGET_CHECKED → POLICY_CHECKED → CONSENT_CHECKED
//! → VALIDATED → EXECUTING → COMPLETED | FAILED。任一步失败即终止，后续步骤不再执行；
//! 每一步写入 trace，结束时输出一条 JSON 审计日志。Dispatcher 从不自动重试。

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};

use crate::capabilities::{CapabilityDescriptor, CapabilityRegistry, CheckInDefaults, ExecutionContext, TurnContext};
use crate::config::AppConfig;
use crate::core::{
    resolve_budget, Budget, BudgetResource, DispatchState, HarnessError, TokenEstimator, ToolCallCounter,
    TraceEvent, TraceRecorder, TraceSink,
};
use crate::policy::{builtin_bundles, evaluate, loader::select, PolicyContext, PolicyDecision, PolicyStore};
use crate::ports::{Clock, InMemoryStore, RecordingTransport, Store, SystemClock, Transport};
use crate::scheduler::{InMemoryJobQueue, JobQueue};
use crate::services::Services;

/// 一次能力调用请求
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub capability: String,
    pub input: Value,
    /// 预算类别；缺省为配置中的 default_agent
    pub agent: Option<String>,
}

impl DispatchRequest {
    pub fn new(capability: impl Into<String>, input: Value) -> Self {
        Self {
            capability: capability.into(),
            input,
            agent: None,
        }
    }

    pub fn for_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }
}

/// 调度结果：无论成功与否都带完整 trace
#[derive(Debug)]
pub struct DispatchReport {
    pub trace_id: String,
    pub requested: String,
    /// 实际进入 EXECUTING 的能力（可能因策略改道而不同于 requested）
    pub executed: Option<String>,
    pub state: DispatchState,
    pub result: Result<Value, HarnessError>,
    pub decision: Option<PolicyDecision>,
    pub events: Vec<TraceEvent>,
}

impl DispatchReport {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn retryable(&self) -> bool {
        self.result.as_ref().err().is_some_and(HarnessError::is_retryable)
    }

    pub fn event_names(&self) -> Vec<&str> {
        self.events.iter().map(|e| e.name.as_str()).collect()
    }

    /// 以 JSON 形式输出（CLI 打印用）
    pub fn to_json(&self) -> Value {
        let (ok, output, error) = match &self.result {
            Ok(value) => (true, value.clone(), Value::Null),
            Err(e) => (
                false,
                Value::Null,
                json!({ "kind": e.kind(), "message": e.to_string(), "retryable": e.is_retryable() }),
            ),
        };
        json!({
            "traceId": self.trace_id,
            "requested": self.requested,
            "executed": self.executed,
            "state": self.state,
            "ok": ok,
            "output": output,
            "error": error,
            "decision": self.decision,
            "events": self.events,
        })
    }
}

/// 单次调度的可变进度
struct Pass {
    state: DispatchState,
    target: String,
    executed: Option<String>,
    decision: Option<PolicyDecision>,
}

impl Pass {
    fn advance(&mut self) {
        if let Some(next) = self.state.next() {
            self.state = next;
        }
    }
}

pub struct Dispatcher {
    registry: Arc<CapabilityRegistry>,
    policies: Arc<PolicyStore>,
    active_bundles: Vec<String>,
    store: Arc<dyn Store>,
    services: Arc<Services>,
    scheduler: Arc<dyn JobQueue>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    trace_sink: Option<Arc<dyn TraceSink>>,
    default_agent: String,
    check_in: CheckInDefaults,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// 调度一次能力调用；counter 由调用方按轮创建，跨同一轮的多次调用共享
    pub async fn dispatch(&self, request: DispatchRequest, turn: TurnContext, counter: &ToolCallCounter) -> DispatchReport {
        let started = Instant::now();
        let trace = Arc::new(TraceRecorder::new(self.trace_sink.clone()));
        let agent = request
            .agent
            .clone()
            .unwrap_or_else(|| self.default_agent.clone());
        let mut pass = Pass {
            state: DispatchState::Received,
            target: request.capability.clone(),
            executed: None,
            decision: None,
        };

        let result = self
            .run(&mut pass, &request, &agent, turn, counter, &trace)
            .await;

        match &result {
            Ok(_) => {
                pass.state = DispatchState::Completed;
                trace.push(
                    "dispatch.completed",
                    json!({ "capability": pass.target, "durationMs": started.elapsed().as_millis() as u64 }),
                );
            }
            Err(e) => {
                trace.push(
                    "dispatch.failed",
                    json!({
                        "capability": pass.target,
                        "stage": pass.state,
                        "kind": e.kind(),
                        "retryable": e.is_retryable(),
                        "error": e.to_string(),
                    }),
                );
                pass.state = DispatchState::Failed;
            }
        }

        let audit = json!({
            "event": "capability_audit",
            "trace_id": trace.id(),
            "agent": agent,
            "requested": request.capability,
            "executed": pass.executed,
            "ok": result.is_ok(),
            "outcome": result.as_ref().err().map(|e| json!(e.kind())).unwrap_or_else(|| json!("ok")),
            "duration_ms": started.elapsed().as_millis() as u64,
            "args_preview": args_preview(&request.input),
        });
        tracing::info!(audit = %audit.to_string(), "capability");

        DispatchReport {
            trace_id: trace.id().to_string(),
            requested: request.capability,
            executed: pass.executed,
            state: pass.state,
            result,
            decision: pass.decision,
            events: trace.events(),
        }
    }

    async fn run(
        &self,
        pass: &mut Pass,
        request: &DispatchRequest,
        agent: &str,
        turn: TurnContext,
        counter: &ToolCallCounter,
        trace: &Arc<TraceRecorder>,
    ) -> Result<Value, HarnessError> {
        let descriptor = self.receive(request, agent, &turn, trace)?;
        pass.advance();

        let budget = self.check_budget(agent, &turn, &request.input, counter, trace)?;
        pass.advance();

        let (descriptor, input) = self.check_policy(pass, descriptor, request, agent, &turn, trace).await?;
        pass.advance();

        self.check_consent(&descriptor, &turn, trace)?;
        pass.advance();

        let input = self.validate(&descriptor, &input, trace)?;
        pass.advance();

        pass.executed = Some(descriptor.name.clone());
        self.execute(&descriptor, input, budget, turn, counter, trace).await
    }

    /// RECEIVED：登记请求并解析能力；未知能力在任何副作用之前失败
    fn receive(
        &self,
        request: &DispatchRequest,
        agent: &str,
        turn: &TurnContext,
        trace: &TraceRecorder,
    ) -> Result<Arc<CapabilityDescriptor>, HarnessError> {
        trace.push(
            "dispatch.received",
            json!({
                "capability": request.capability,
                "agent": agent,
                "userId": turn.user_id,
                "channel": turn.channel,
            }),
        );
        self.registry.resolve(&request.capability)
    }

    /// BUDGET_CHECKED：工具调用次数与输入规模
    fn check_budget(
        &self,
        agent: &str,
        turn: &TurnContext,
        input: &Value,
        counter: &ToolCallCounter,
        trace: &TraceRecorder,
    ) -> Result<Budget, HarnessError> {
        let budget = resolve_budget(agent, turn);
        let used = counter.issued();
        let input_tokens = TokenEstimator::estimate_json(input) as u32;
        trace.push(
            "budget.checked",
            json!({
                "budget": budget,
                "toolCallsUsed": used,
                "estimatedInputTokens": input_tokens,
            }),
        );

        if used >= budget.max_tools {
            return Err(HarnessError::BudgetExceeded {
                resource: BudgetResource::ToolCalls,
                used,
                limit: budget.max_tools,
            });
        }
        if input_tokens > budget.max_input_tokens {
            return Err(HarnessError::BudgetExceeded {
                resource: BudgetResource::InputTokens,
                used: input_tokens,
                limit: budget.max_input_tokens,
            });
        }
        Ok(budget)
    }

    /// POLICY_CHECKED：deny 优先；改道时替换目标能力与入参
    async fn check_policy(
        &self,
        pass: &mut Pass,
        descriptor: Arc<CapabilityDescriptor>,
        request: &DispatchRequest,
        agent: &str,
        turn: &TurnContext,
        trace: &TraceRecorder,
    ) -> Result<(Arc<CapabilityDescriptor>, Value), HarnessError> {
        let snapshot = self.policies.snapshot().await;
        let bundles = if turn.policy_bundles.is_empty() {
            select(&snapshot, &self.active_bundles)
        } else {
            select(&snapshot, &turn.policy_bundles).or_else(|e| {
                tracing::warn!(
                    trace_id = %trace.id(),
                    requested = ?turn.policy_bundles,
                    error = %e,
                    "unknown policy bundle on turn, using configured bundles"
                );
                trace.push(
                    "policy.bundles_fallback",
                    json!({ "requested": turn.policy_bundles, "error": e.to_string() }),
                );
                select(&snapshot, &self.active_bundles)
            })
        }
        .map_err(|e| HarnessError::PolicyViolation {
            rule_id: None,
            message: Some(e.to_string()),
        })?;
        let decision = evaluate(
            bundles.iter().copied(),
            &PolicyContext::from_turn(agent, &request.capability, turn),
        );
        trace.push(
            "policy.evaluated",
            json!({
                "bundles": bundles.iter().map(|b| b.name.as_str()).collect::<Vec<_>>(),
                "allow": decision.allow,
                "actions": decision.actions,
                "routeOverride": decision.route_override,
            }),
        );
        pass.decision = Some(decision.clone());

        if !decision.allow {
            return Err(HarnessError::PolicyViolation {
                rule_id: decision.denied_by,
                message: decision.message,
            });
        }

        match decision.route_override {
            Some(route) if route.capability() != descriptor.name => {
                let redirected = self.registry.resolve(route.capability())?;
                trace.push(
                    "policy.redirected",
                    json!({ "from": descriptor.name, "to": redirected.name, "route": route }),
                );
                tracing::warn!(
                    trace_id = %trace.id(),
                    from = %descriptor.name,
                    to = %redirected.name,
                    "capability redirected by policy"
                );
                pass.target = redirected.name.clone();
                Ok((redirected, route.redirect_input(&turn.text)))
            }
            _ => Ok((descriptor, request.input.clone())),
        }
    }

    /// CONSENT_CHECKED
    fn check_consent(
        &self,
        descriptor: &CapabilityDescriptor,
        turn: &TurnContext,
        trace: &TraceRecorder,
    ) -> Result<(), HarnessError> {
        let granted = turn.consent.recorded;
        trace.push(
            "consent.checked",
            json!({ "required": descriptor.requires_consent, "granted": granted }),
        );
        if descriptor.requires_consent && !granted {
            return Err(HarnessError::ConsentRequired {
                capability: descriptor.name.clone(),
            });
        }
        Ok(())
    }

    /// VALIDATED：Schema 校验，被拒绝的入参到不了处理函数
    fn validate(
        &self,
        descriptor: &CapabilityDescriptor,
        input: &Value,
        trace: &TraceRecorder,
    ) -> Result<Value, HarnessError> {
        let validated = descriptor
            .validate(input)
            .map_err(|reason| HarnessError::InvalidInput {
                capability: descriptor.name.clone(),
                reason,
            });
        trace.push(
            "input.validated",
            json!({ "capability": descriptor.name, "valid": validated.is_ok() }),
        );
        validated
    }

    /// EXECUTING：占用一次调用额度后调用处理函数
    async fn execute(
        &self,
        descriptor: &CapabilityDescriptor,
        input: Value,
        budget: Budget,
        turn: TurnContext,
        counter: &ToolCallCounter,
        trace: &Arc<TraceRecorder>,
    ) -> Result<Value, HarnessError> {
        let call = counter
            .try_acquire(budget.max_tools)
            .map_err(|used| HarnessError::BudgetExceeded {
                resource: BudgetResource::ToolCalls,
                used,
                limit: budget.max_tools,
            })?;
        trace.push(
            "capability.invoke",
            json!({ "capability": descriptor.name, "call": call, "maxTools": budget.max_tools }),
        );

        let ctx = ExecutionContext {
            user_id: turn.user_id.clone(),
            turn,
            budget,
            store: self.store.clone(),
            services: self.services.clone(),
            scheduler: self.scheduler.clone(),
            transport: self.transport.clone(),
            trace: trace.clone(),
            now: self.clock.now(),
            check_in: self.check_in.clone(),
        };
        descriptor
            .invoke(input, &ctx)
            .await
            .map_err(|e| e.into_harness(&descriptor.name))
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

/// Dispatcher 构建器：未指定的协作方使用内存实现
#[derive(Default)]
pub struct DispatcherBuilder {
    registry: Option<Arc<CapabilityRegistry>>,
    policies: Option<Arc<PolicyStore>>,
    active_bundles: Vec<String>,
    store: Option<Arc<dyn Store>>,
    services: Option<Arc<Services>>,
    scheduler: Option<Arc<dyn JobQueue>>,
    transport: Option<Arc<dyn Transport>>,
    clock: Option<Arc<dyn Clock>>,
    trace_sink: Option<Arc<dyn TraceSink>>,
    default_agent: Option<String>,
    check_in: Option<CheckInDefaults>,
}

impl DispatcherBuilder {
    /// 采用配置中的 default_agent、active_bundles 与随访默认值
    pub fn config(mut self, config: &AppConfig) -> Self {
        self.default_agent = Some(config.dispatch.default_agent.clone());
        self.active_bundles = config.policy.active_bundles.clone();
        self.check_in = Some(config.scheduler.check_in_defaults());
        self
    }

    pub fn registry(mut self, registry: CapabilityRegistry) -> Self {
        self.registry = Some(Arc::new(registry));
        self
    }

    pub fn policies(mut self, policies: Arc<PolicyStore>) -> Self {
        self.policies = Some(policies);
        self
    }

    pub fn active_bundles(mut self, names: Vec<String>) -> Self {
        self.active_bundles = names;
        self
    }

    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn services(mut self, services: Services) -> Self {
        self.services = Some(Arc::new(services));
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn JobQueue>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace_sink = Some(sink);
        self
    }

    pub fn default_agent(mut self, agent: impl Into<String>) -> Self {
        self.default_agent = Some(agent.into());
        self
    }

    pub fn build(self) -> Dispatcher {
        let services = self
            .services
            .unwrap_or_else(|| Arc::new(Services::builtin()));
        let policies = self.policies.unwrap_or_else(|| {
            let bundles = builtin_bundles().unwrap_or_else(|e| {
                tracing::error!(error = %e, "builtin policy bundles failed to load");
                Vec::new()
            });
            Arc::new(PolicyStore::new(bundles))
        });
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStore::new(services.assessment.clone())));

        Dispatcher {
            registry: self
                .registry
                .unwrap_or_else(|| Arc::new(CapabilityRegistry::with_builtins())),
            policies,
            active_bundles: self.active_bundles,
            store,
            services,
            scheduler: self
                .scheduler
                .unwrap_or_else(|| Arc::new(InMemoryJobQueue::new())),
            transport: self
                .transport
                .unwrap_or_else(|| Arc::new(RecordingTransport::new())),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            trace_sink: self.trace_sink,
            default_agent: self.default_agent.unwrap_or_else(|| "main".to_string()),
            check_in: self.check_in.unwrap_or_default(),
        }
    }
}
