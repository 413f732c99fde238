//! 推理引擎：阶段机、运行状态、策略化调用与主循环

pub mod phase;
pub mod state;

pub(crate) mod invoke;
pub(crate) mod loop_;

pub use phase::{next_phase, Phase};
pub use state::{RetryPolicy, RunMeta, RunOutcome, RunState, TaskInput};
