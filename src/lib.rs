//! care-harness - 照护者支持服务的能力调度与治理层
//!
//! 模块划分：
//! - **capabilities**: 能力契约、注册表、入参 Schema 校验、执行上下文与内置能力
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、重试建议、调度状态、预算、追踪、Dispatcher
//! - **observability**: 日志初始化
//! - **policy**: 策略包加载与规则求值、危机信号检测
//! - **ports**: 存储 / 出站传输 / 时钟端口及内存实现
//! - **scheduler**: 随访时间计算、延迟任务队列、到期任务轮询
//! - **services**: 评估计分、干预排序等纯领域计算

pub mod capabilities;
pub mod config;
pub mod core;
pub mod observability;
pub mod policy;
pub mod ports;
pub mod scheduler;
pub mod services;

pub use capabilities::{CapabilityRegistry, TurnContext};
pub use core::{DispatchReport, DispatchRequest, Dispatcher, HarnessError, ToolCallCounter};
