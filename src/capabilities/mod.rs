//! 能力层：契约、注册表、入参校验、执行上下文，以及内置能力
//!
//! 能力名是稳定的线上契约（"assessment.recordAnswer" 等）；Agent 层只按名称调用。

pub mod admin;
pub mod alerts;
pub mod assessment;
pub mod context;
pub mod crisis;
pub mod email;
pub mod interventions;
pub mod memory;
pub mod registry;
pub mod schema;
pub mod scheduling;

pub use context::{Channel, CheckInDefaults, ConsentFlags, ExecutionContext, TurnContext};
pub use registry::{
    Capability, CapabilityDescriptor, CapabilityError, CapabilityHandler, CapabilityRegistry, Hint,
    NoInput,
};
pub use schema::InputSchema;

/// 内置能力集合
pub fn builtin_descriptors() -> Vec<CapabilityDescriptor> {
    vec![
        CapabilityDescriptor::from_capability(assessment::StartAssessment),
        CapabilityDescriptor::from_capability(assessment::RecordAnswer),
        CapabilityDescriptor::from_capability(assessment::ScoreAssessment),
        CapabilityDescriptor::from_capability(interventions::SuggestInterventions),
        CapabilityDescriptor::from_capability(memory::RecordMemory),
        CapabilityDescriptor::from_capability(scheduling::ScheduleCheckIn),
        CapabilityDescriptor::from_capability(scheduling::DeliverCheckIn),
        CapabilityDescriptor::from_capability(email::SendEmail),
        CapabilityDescriptor::from_capability(alerts::ProcessPendingAlerts),
        CapabilityDescriptor::from_capability(admin::AdminMetricsCapability),
        CapabilityDescriptor::from_capability(admin::RefreshEntitlements),
        CapabilityDescriptor::from_capability(crisis::CrisisEscalate),
    ]
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use chrono::{DateTime, Utc};

    use super::{CheckInDefaults, ExecutionContext, TurnContext};
    use crate::core::{resolve_budget, TraceRecorder};
    use crate::ports::{InMemoryStore, RecordingTransport};
    use crate::scheduler::InMemoryJobQueue;
    use crate::services::{AssessmentService, Services};

    /// 直接调用处理函数时使用的内存协作方
    pub struct Fixture {
        pub store: Arc<InMemoryStore>,
        pub transport: Arc<RecordingTransport>,
        pub queue: Arc<InMemoryJobQueue>,
        pub now: DateTime<Utc>,
    }

    impl Fixture {
        pub fn new() -> Self {
            Self {
                store: Arc::new(InMemoryStore::new(AssessmentService::with_builtin())),
                transport: Arc::new(RecordingTransport::new()),
                queue: Arc::new(InMemoryJobQueue::new()),
                now: Utc::now(),
            }
        }

        pub fn context(&self, turn: TurnContext) -> ExecutionContext {
            ExecutionContext {
                user_id: turn.user_id.clone(),
                budget: resolve_budget("main", &turn),
                turn,
                store: self.store.clone(),
                services: Arc::new(Services::builtin()),
                scheduler: self.queue.clone(),
                transport: self.transport.clone(),
                trace: Arc::new(TraceRecorder::new(None)),
                now: self.now,
                check_in: CheckInDefaults::default(),
            }
        }
    }
}
