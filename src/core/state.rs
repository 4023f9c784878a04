//! 调度状态机：每次 dispatch 单向经过一次，不回退、不循环

use serde::Serialize;

/// 调度阶段（按流水线顺序）
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchState {
    Received,
    BudgetChecked,
    PolicyChecked,
    ConsentChecked,
    Validated,
    Executing,
    Completed,
    Failed,
}

impl DispatchState {
    /// 下一阶段；终态与 Executing 之后的分支由调用结果决定，返回 None
    pub fn next(&self) -> Option<DispatchState> {
        match self {
            DispatchState::Received => Some(DispatchState::BudgetChecked),
            DispatchState::BudgetChecked => Some(DispatchState::PolicyChecked),
            DispatchState::PolicyChecked => Some(DispatchState::ConsentChecked),
            DispatchState::ConsentChecked => Some(DispatchState::Validated),
            DispatchState::Validated => Some(DispatchState::Executing),
            DispatchState::Executing | DispatchState::Completed | DispatchState::Failed => None,
        }
    }
}
