//! Mock 模型客户端（用于测试，无需 API）
//!
//! 各方法从预置队列出队响应；队列耗尽时回退到固定文本。
//! fail_times 可注入瞬时失败，calls 记录 complete 类调用次数，便于断言重试与缓存行为。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use serde_json::Value;

use crate::llm::{ModelClient, TextStream, ToolCallRequest};
use crate::memory::Message;
use crate::tools::ToolDecl;

/// 脚本化 Mock 客户端
#[derive(Default)]
pub struct MockModel {
    completions: Mutex<VecDeque<String>>,
    decisions: Mutex<VecDeque<Vec<ToolCallRequest>>>,
    objects: Mutex<VecDeque<Value>>,
    stream_chunks: Mutex<Vec<String>>,
    /// 每次 complete 类调用前的人为延迟（模拟慢端点）
    latency: Mutex<Option<Duration>>,
    /// 流式输出每个增量前的人为延迟
    chunk_delay: Mutex<Option<Duration>>,
    /// 接下来 N 次 complete 类调用直接失败（模拟瞬时错误）
    fail_times: AtomicU32,
    /// complete / complete_structured / decide_tool_calls 的累计调用次数
    pub calls: AtomicU32,
}

impl MockModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_completion(self, text: impl Into<String>) -> Self {
        self.completions
            .lock()
            .expect("mock lock poisoned")
            .push_back(text.into());
        self
    }

    pub fn with_decision(self, calls: Vec<ToolCallRequest>) -> Self {
        self.decisions
            .lock()
            .expect("mock lock poisoned")
            .push_back(calls);
        self
    }

    pub fn with_object(self, object: Value) -> Self {
        self.objects
            .lock()
            .expect("mock lock poisoned")
            .push_back(object);
        self
    }

    pub fn with_stream(self, chunks: Vec<&str>) -> Self {
        *self.stream_chunks.lock().expect("mock lock poisoned") =
            chunks.into_iter().map(String::from).collect();
        self
    }

    pub fn with_failures(self, n: u32) -> Self {
        self.fail_times.store(n, Ordering::SeqCst);
        self
    }

    pub fn with_latency(self, delay: Duration) -> Self {
        *self.latency.lock().expect("mock lock poisoned") = Some(delay);
        self
    }

    pub fn with_chunk_delay(self, delay: Duration) -> Self {
        *self.chunk_delay.lock().expect("mock lock poisoned") = Some(delay);
        self
    }

    async fn pause(&self) {
        let delay = *self.latency.lock().expect("mock lock poisoned");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn count_and_maybe_fail(&self) -> Result<(), String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fail_times.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_times.store(remaining - 1, Ordering::SeqCst);
            return Err("simulated transient failure".to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl ModelClient for MockModel {
    fn model_id(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, _messages: &[Message]) -> Result<String, String> {
        self.pause().await;
        self.count_and_maybe_fail()?;
        Ok(self
            .completions
            .lock()
            .expect("mock lock poisoned")
            .pop_front()
            .unwrap_or_else(|| "mock answer".to_string()))
    }

    async fn complete_stream(&self, _messages: &[Message]) -> Result<TextStream, String> {
        let chunks = self.stream_chunks.lock().expect("mock lock poisoned").clone();
        let items: Vec<Result<String, String>> = if chunks.is_empty() {
            vec![Ok("mock answer".to_string())]
        } else {
            chunks.into_iter().map(Ok).collect()
        };
        let delay = *self.chunk_delay.lock().expect("mock lock poisoned");
        match delay {
            Some(delay) => Ok(Box::pin(stream::iter(items).then(move |item| async move {
                tokio::time::sleep(delay).await;
                item
            }))),
            None => Ok(Box::pin(stream::iter(items))),
        }
    }

    async fn complete_structured(
        &self,
        _messages: &[Message],
        _schema: &Value,
    ) -> Result<Value, String> {
        self.pause().await;
        self.count_and_maybe_fail()?;
        Ok(self
            .objects
            .lock()
            .expect("mock lock poisoned")
            .pop_front()
            .unwrap_or_else(|| serde_json::json!({})))
    }

    async fn decide_tool_calls(
        &self,
        _messages: &[Message],
        _tools: &[ToolDecl],
    ) -> Result<Vec<ToolCallRequest>, String> {
        self.pause().await;
        self.count_and_maybe_fail()?;
        Ok(self
            .decisions
            .lock()
            .expect("mock lock poisoned")
            .pop_front()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_completions_in_order() {
        let mock = MockModel::new().with_completion("one").with_completion("two");
        assert_eq!(mock.complete(&[]).await.unwrap(), "one");
        assert_eq!(mock.complete(&[]).await.unwrap(), "two");
        // 队列耗尽后回退
        assert_eq!(mock.complete(&[]).await.unwrap(), "mock answer");
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_failure_injection_then_success() {
        let mock = MockModel::new().with_failures(2).with_completion("ok");
        assert!(mock.complete(&[]).await.is_err());
        assert!(mock.complete(&[]).await.is_err());
        assert_eq!(mock.complete(&[]).await.unwrap(), "ok");
    }
}
