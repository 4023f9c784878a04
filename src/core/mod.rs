//! 核心治理层：错误分类与重试建议、调度状态、预算、追踪、调度器

pub mod budget;
pub mod dispatcher;
pub mod error;
pub mod recovery;
pub mod state;
pub mod trace;

pub use budget::{resolve_budget, AgentKind, Budget, TokenEstimator, ToolCallCounter};
pub use dispatcher::{DispatchReport, DispatchRequest, Dispatcher, DispatcherBuilder};
pub use error::{BudgetResource, ErrorKind, HarnessError, RetryDecision};
pub use recovery::{RetryAdvisor, RetryPolicy};
pub use state::DispatchState;
pub use trace::{MemoryTraceSink, TraceEvent, TraceRecorder, TraceSink, TracingSink};
