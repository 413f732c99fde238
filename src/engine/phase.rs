//! 推理阶段与纯转移函数
//!
//! plan -> act -> (reflect <-> act 循环) -> validate -> converge。
//! 转移逻辑与 I/O 完全分离，可独立测试；act 每进入一次步数 +1，
//! 步数达到上限后强制进入 validate，保证循环有界。

use serde::Serialize;

use crate::engine::state::RunState;

/// 推理阶段（converge 为唯一终止态）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Plan,
    Act,
    Reflect,
    Validate,
    Converge,
}

impl Phase {
    pub fn tag(&self) -> &'static str {
        match self {
            Phase::Plan => "plan",
            Phase::Act => "act",
            Phase::Reflect => "reflect",
            Phase::Validate => "validate",
            Phase::Converge => "converge",
        }
    }
}

/// 纯转移函数：根据当前阶段与运行状态给出下一阶段；Converge 后返回 None
pub fn next_phase(current: Phase, state: &RunState) -> Option<Phase> {
    match current {
        Phase::Plan => Some(Phase::Act),
        Phase::Act => {
            if state.step >= state.max_steps {
                Some(Phase::Validate)
            } else {
                Some(Phase::Reflect)
            }
        }
        Phase::Reflect => {
            if state.step >= state.max_steps.saturating_sub(1) {
                Some(Phase::Validate)
            } else {
                Some(Phase::Act)
            }
        }
        Phase::Validate => {
            if state.valid || state.step >= state.max_steps {
                Some(Phase::Converge)
            } else {
                Some(Phase::Act)
            }
        }
        Phase::Converge => None,
    }
}
