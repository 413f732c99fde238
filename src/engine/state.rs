//! 运行状态与结果类型
//!
//! RunState 由状态机独占推进：阶段产物单调累积，后续阶段只读不改前面的产物。
//! 状态随 facade 返回而销毁，除注入的记忆适配器外不跨调用持久化。

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::core::new_run_id;
use crate::events::Event;

/// 一次调用的输入：任务文本，可选输出 schema 与补充上下文
#[derive(Debug, Clone)]
pub struct TaskInput {
    pub task: String,
    pub schema: Option<Value>,
    pub context: Option<String>,
}

impl TaskInput {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            schema: None,
            context: None,
        }
    }

    /// 声明输出 schema：结果将是符合该 schema 的对象而非自由文本
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

impl From<&str> for TaskInput {
    fn from(task: &str) -> Self {
        Self::new(task)
    }
}

impl From<String> for TaskInput {
    fn from(task: String) -> Self {
        Self::new(task)
    }
}

/// 重试策略（从配置解析为 Duration）
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
}

/// 本次运行解析后的模型/策略参数
#[derive(Debug, Clone)]
pub(crate) struct RunParams {
    pub temperature: f32,
    pub system_prompt: String,
    pub step_timeout: Option<Duration>,
    pub total_timeout: Option<Duration>,
    pub tool_timeout: Duration,
    pub retry: RetryPolicy,
}

/// 单次运行的可变记录
#[derive(Debug)]
pub struct RunState {
    pub run_id: String,
    pub input: TaskInput,
    /// act 阶段已进入的次数
    pub step: u32,
    pub max_steps: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// 实际调用过的工具名（保序，meta 输出时去重）
    pub used_tools: Vec<String>,
    pub step_errors: Vec<String>,
    pub cache_hit: bool,
    // 阶段产物（单调累积）
    pub plan: Option<String>,
    pub reflection: Option<String>,
    pub candidate: Option<String>,
    pub valid: bool,
    pub final_text: Option<String>,
    pub final_object: Option<Value>,
}

impl RunState {
    pub fn new(input: TaskInput, max_steps: u32) -> Self {
        Self {
            run_id: new_run_id(),
            input,
            step: 0,
            max_steps,
            started_at: Utc::now(),
            ended_at: None,
            used_tools: Vec::new(),
            step_errors: Vec::new(),
            cache_hit: false,
            plan: None,
            reflection: None,
            candidate: None,
            valid: false,
            final_text: None,
            final_object: None,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds().max(0) as u64
    }
}

/// 运行元数据：跨边界暴露的唯一过程信息（内部规划/反思文本不出境）
#[derive(Debug, Clone, Serialize)]
pub struct RunMeta {
    pub run_id: String,
    pub steps: u32,
    pub duration_ms: u64,
    pub model: String,
    /// 去重后的已用工具名（保留首次使用顺序）
    pub used_tools: Vec<String>,
    pub cache_hit: bool,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<Event>>,
}

impl RunMeta {
    pub(crate) fn from_state(
        state: &RunState,
        model: &str,
        token_usage: (u64, u64, u64),
        events: Option<Vec<Event>>,
    ) -> Self {
        let mut seen = std::collections::HashSet::new();
        let used_tools = state
            .used_tools
            .iter()
            .filter(|name| seen.insert(name.as_str()))
            .cloned()
            .collect();
        Self {
            run_id: state.run_id.clone(),
            steps: state.step,
            duration_ms: state.duration_ms(),
            model: model.to_string(),
            used_tools,
            cache_hit: state.cache_hit,
            prompt_tokens: token_usage.0,
            completion_tokens: token_usage.1,
            errors: state.step_errors.clone(),
            events,
        }
    }
}

/// run() 的结果：结构化对象（声明了 schema 时）或文本，外加元数据
#[derive(Debug)]
pub struct RunOutcome {
    pub text: Option<String>,
    pub object: Option<Value>,
    pub meta: RunMeta,
}
