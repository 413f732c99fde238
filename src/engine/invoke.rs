//! 策略化模型调用：所有文本/结构化/工具决策调用的唯一通道
//!
//! 顺序固定：缓存查找 -> rpm 间隔（含并发许可）-> 超时+取消包装 ->
//! 指数退避重试 -> 缓存写入。命中缓存时直接返回，跳过后续策略。

use std::sync::Arc;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::core::{backoff_delay, cache_key, with_deadline, OrchestratorError, RateLimiter,
    ResponseCache, Result};
use crate::engine::phase::Phase;
use crate::engine::state::{RunParams, RunState};
use crate::events::{Event, EventBus, EventKind};
use crate::llm::{ModelClient, ToolCallRequest};
use crate::memory::{MemoryAdapter, Message};
use crate::tools::{ToolDecl, ToolRegistry};

/// 一次运行共享的调用上下文：进程级资源（缓存/总线/限流器）+ 本次运行的参数与取消令牌
pub(crate) struct RunContext {
    pub client: Arc<dyn ModelClient>,
    pub memory: Arc<dyn MemoryAdapter>,
    pub tools: Arc<ToolRegistry>,
    pub cache: Arc<ResponseCache<ModelResponse>>,
    pub limiter: Arc<RateLimiter>,
    pub bus: Arc<EventBus>,
    pub cancel: CancellationToken,
    pub params: RunParams,
}

impl RunContext {
    pub fn emit(&self, run_id: &str, kind: EventKind, data: Value) {
        self.bus.emit(&Event::new(run_id, kind, data));
    }
}

/// 单次模型调用的请求形态
#[derive(Clone, Copy)]
pub(crate) enum ModelRequest<'a> {
    Text,
    Structured(&'a Value),
    ToolDecision(&'a [ToolDecl]),
}

impl ModelRequest<'_> {
    fn kind(&self) -> &'static str {
        match self {
            ModelRequest::Text => "text",
            ModelRequest::Structured(_) => "structured",
            ModelRequest::ToolDecision(_) => "tool_decision",
        }
    }
}

/// 模型响应（缓存值类型）
#[derive(Debug, Clone)]
pub(crate) enum ModelResponse {
    Text(String),
    Object(Value),
    ToolCalls(Vec<ToolCallRequest>),
}

impl ModelResponse {
    pub fn into_text(self) -> String {
        match self {
            ModelResponse::Text(t) => t,
            _ => String::new(),
        }
    }

    pub fn into_object(self) -> Value {
        match self {
            ModelResponse::Object(o) => o,
            _ => Value::Null,
        }
    }

    pub fn into_tool_calls(self) -> Vec<ToolCallRequest> {
        match self {
            ModelResponse::ToolCalls(c) => c,
            _ => Vec::new(),
        }
    }
}

/// 策略化调用入口
pub(crate) async fn invoke_model(
    ctx: &RunContext,
    state: &mut RunState,
    phase: Phase,
    messages: &[Message],
    request: ModelRequest<'_>,
) -> Result<ModelResponse> {
    // 同一阶段内可能出现请求形态不同但消息相同的调用，键里带上形态避免互串
    let phase_tag = format!("{}/{}", phase.tag(), request.kind());
    let key = cache_key(
        &phase_tag,
        ctx.client.model_id(),
        ctx.params.temperature,
        messages,
    );

    if let Some(hit) = ctx.cache.get(&key) {
        state.cache_hit = true;
        ctx.emit(
            &state.run_id,
            EventKind::CacheHit,
            json!({ "phase": phase.tag(), "kind": request.kind() }),
        );
        return Ok(hit);
    }

    if let Some(waited) = ctx.limiter.pace().await {
        ctx.emit(
            &state.run_id,
            EventKind::RateLimitDelay,
            json!({ "wait_ms": waited.as_millis() as u64 }),
        );
    }
    let _permit = ctx.limiter.acquire().await;

    ctx.emit(
        &state.run_id,
        EventKind::ModelCallStart,
        json!({ "phase": phase.tag(), "kind": request.kind() }),
    );

    let retry = ctx.params.retry;
    let mut attempt: u32 = 1;
    loop {
        let call = async {
            match request {
                ModelRequest::Text => ctx
                    .client
                    .complete(messages)
                    .await
                    .map(ModelResponse::Text)
                    .map_err(OrchestratorError::Model),
                ModelRequest::Structured(schema) => ctx
                    .client
                    .complete_structured(messages, schema)
                    .await
                    .map(ModelResponse::Object)
                    .map_err(OrchestratorError::StructuredParse),
                ModelRequest::ToolDecision(decls) => ctx
                    .client
                    .decide_tool_calls(messages, decls)
                    .await
                    .map(ModelResponse::ToolCalls)
                    .map_err(OrchestratorError::Model),
            }
        };

        match with_deadline(ctx.params.step_timeout, &ctx.cancel, "model call", call).await {
            Ok(response) => {
                ctx.cache.put(key, response.clone());
                if ctx.cache.enabled() {
                    ctx.emit(
                        &state.run_id,
                        EventKind::CacheSet,
                        json!({ "phase": phase.tag(), "kind": request.kind() }),
                    );
                }
                ctx.emit(
                    &state.run_id,
                    EventKind::ModelCallEnd,
                    json!({ "phase": phase.tag(), "kind": request.kind(), "attempts": attempt }),
                );
                return Ok(response);
            }
            Err(err) if err.is_retryable() && attempt < retry.max_attempts => {
                ctx.emit(
                    &state.run_id,
                    EventKind::Retry,
                    json!({ "attempt": attempt, "error": err.to_string() }),
                );
                let delay =
                    backoff_delay(attempt, retry.initial_delay, retry.factor, retry.max_delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::engine::state::{RetryPolicy, TaskInput};
    use crate::llm::MockModel;
    use crate::memory::VolatileMemory;

    fn test_ctx(client: Arc<dyn ModelClient>) -> RunContext {
        RunContext {
            client,
            memory: Arc::new(VolatileMemory::default()),
            tools: Arc::new(ToolRegistry::new()),
            cache: Arc::new(ResponseCache::new(false, Duration::from_secs(60), 8)),
            limiter: Arc::new(RateLimiter::new(false, None, 2)),
            bus: Arc::new(EventBus::new()),
            cancel: CancellationToken::new(),
            params: RunParams {
                temperature: 0.0,
                system_prompt: "s".to_string(),
                step_timeout: None,
                total_timeout: None,
                tool_timeout: Duration::from_secs(1),
                retry: RetryPolicy {
                    max_attempts: 1,
                    initial_delay: Duration::from_millis(1),
                    factor: 2.0,
                    max_delay: Duration::from_millis(2),
                },
            },
        }
    }

    #[tokio::test]
    async fn test_structured_failure_surfaces_as_structured_error() {
        let ctx = test_ctx(Arc::new(MockModel::new().with_failures(1)));
        let mut state = RunState::new(TaskInput::from("t"), 1);
        let schema = json!({ "type": "object" });
        let out = invoke_model(
            &ctx,
            &mut state,
            Phase::Validate,
            &[],
            ModelRequest::Structured(&schema),
        )
        .await;
        assert!(matches!(out, Err(OrchestratorError::StructuredParse(_))));
    }

    #[tokio::test]
    async fn test_text_failure_surfaces_as_model_error() {
        let ctx = test_ctx(Arc::new(MockModel::new().with_failures(1)));
        let mut state = RunState::new(TaskInput::from("t"), 1);
        let out = invoke_model(&ctx, &mut state, Phase::Plan, &[], ModelRequest::Text).await;
        assert!(matches!(out, Err(OrchestratorError::Model(_))));
    }
}
