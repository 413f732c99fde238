//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）。
//! 结构化输出与工具决策走「schema 注入 prompt + JSON 解析」路径，
//! 对端点能力无额外要求。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;

use crate::llm::{extract_json, ModelClient, TextStream, ToolCallRequest};
use crate::memory::{Message, Role};
use crate::tools::ToolDecl;

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端：持有 Client、model 名与采样温度
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    /// 创建客户端；api_key 未给定且环境变量 OPENAI_API_KEY 缺失时报错（构造期凭证检查）
    pub fn new(
        base_url: Option<&str>,
        model: &str,
        api_key: Option<&str>,
        temperature: f32,
    ) -> Result<Self, String> {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| {
                "missing API key: set model.api_key or the OPENAI_API_KEY env var".to_string()
            })?;

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Ok(Self {
            client: Client::with_config(config),
            model: model.to_string(),
            temperature,
            usage: TokenUsage::new(),
        })
    }

    fn to_openai_messages(&self, messages: &[Message]) -> Vec<ChatCompletionRequestMessage> {
        messages
            .iter()
            .map(|m| match m.role {
                Role::System => ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .unwrap(),
                ),
                // 工具结果以 user 消息回灌，无需端点侧 tool_call_id 配对
                Role::User | Role::Tool => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .unwrap(),
                ),
                Role::Assistant => ChatCompletionRequestMessage::Assistant(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .unwrap(),
                ),
            })
            .collect()
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(self.temperature)
            .messages(self.to_openai_messages(messages))
            .build()
            .map_err(|e| e.to_string())?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| e.to_string())?;

        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(content)
    }

    async fn complete_stream(&self, messages: &[Message]) -> Result<TextStream, String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(self.temperature)
            .messages(self.to_openai_messages(messages))
            .build()
            .map_err(|e| e.to_string())?;

        let stream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(|e| e.to_string())?;

        let mapped = stream.map(|chunk| {
            chunk
                .map(|c| {
                    c.choices
                        .first()
                        .and_then(|choice| choice.delta.content.clone())
                        .unwrap_or_default()
                })
                .map_err(|e| e.to_string())
        });
        Ok(Box::pin(mapped))
    }

    async fn complete_structured(
        &self,
        messages: &[Message],
        schema: &Value,
    ) -> Result<Value, String> {
        let schema_text =
            serde_json::to_string_pretty(schema).map_err(|e| e.to_string())?;
        let mut full = messages.to_vec();
        full.push(Message::user(format!(
            "Respond with a single JSON object that strictly conforms to this JSON Schema:\n\
             ```json\n{}\n```\nOutput only the JSON object, nothing else.",
            schema_text
        )));

        let output = self.complete(&full).await?;
        let json_text = extract_json(&output)
            .ok_or_else(|| format!("no JSON object in model output: {}", output))?;
        serde_json::from_str(&json_text).map_err(|e| format!("{}: {}", e, json_text))
    }

    async fn decide_tool_calls(
        &self,
        messages: &[Message],
        tools: &[ToolDecl],
    ) -> Result<Vec<ToolCallRequest>, String> {
        let decls = serde_json::to_string_pretty(tools).map_err(|e| e.to_string())?;
        let mut full = messages.to_vec();
        full.push(Message::user(format!(
            "Available tools:\n```json\n{}\n```\n\
             Decide which tools (if any) to call next for the task. Respond with a single \
             JSON object: {{\"calls\": [{{\"tool\": \"<name>\", \"args\": {{...}}}}]}}. \
             Use an empty list when no tool is needed. Output only the JSON object.",
            decls
        )));

        let output = self.complete(&full).await?;
        let json_text = match extract_json(&output) {
            Some(t) => t,
            // 无 JSON 视为「不调用工具」
            None => return Ok(Vec::new()),
        };

        #[derive(Deserialize)]
        struct DecideOut {
            #[serde(default)]
            calls: Vec<ToolCallRequest>,
        }

        let parsed: DecideOut =
            serde_json::from_str(&json_text).map_err(|e| format!("{}: {}", e, json_text))?;
        Ok(parsed.calls)
    }
}
