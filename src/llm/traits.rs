//! 模型客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 ModelClient：complete（非流式）、
//! complete_stream（流式 Token）、complete_structured（schema 约束输出）、
//! decide_tool_calls（工具调用决策）。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::memory::Message;
use crate::tools::ToolDecl;

/// 流式完成返回的 Token 流
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, String>> + Send>>;

/// 模型返回的单个工具调用请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

/// 模型客户端 trait
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// 模型标识（用于缓存键与运行元数据）
    fn model_id(&self) -> &str;

    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;

    /// 流式完成，返回 Token 流
    async fn complete_stream(&self, messages: &[Message]) -> Result<TextStream, String>;

    /// 结构化完成：返回符合 schema 的 JSON 对象
    async fn complete_structured(&self, messages: &[Message], schema: &Value)
        -> Result<Value, String>;

    /// 工具调用决策：给定声明列表，返回要调用的工具与参数（可为空）
    async fn decide_tool_calls(
        &self,
        messages: &[Message],
        tools: &[ToolDecl],
    ) -> Result<Vec<ToolCallRequest>, String>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
