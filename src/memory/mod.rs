//! 对话记忆：消息类型与按 run 分键的记忆适配器
//!
//! 适配器契约：run 内只追加、不重排；保留条数有界（丢最旧）。
//! 默认实现为进程内易失存储，持久化实现可由调用方注入。

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致；Tool 表示工具结果回写）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
        }
    }
}

/// 记忆适配器：按 run id 维护有序消息序列
#[async_trait]
pub trait MemoryAdapter: Send + Sync {
    /// 读取该 run 的全部（有界）历史
    async fn history(&self, run_id: &str) -> Vec<Message>;

    /// 追加消息；实现负责有界裁剪，但不得重排
    async fn append(&self, run_id: &str, messages: Vec<Message>);

    /// 可选：生成历史摘要
    async fn summarize(&self, _run_id: &str, _max_chars: usize) -> Option<String> {
        None
    }

    /// 可选：清空该 run 的历史
    async fn clear(&self, _run_id: &str) {}
}

/// 默认易失记忆：HashMap<run_id, Vec<Message>>，超出上限时丢最旧
pub struct VolatileMemory {
    inner: Mutex<HashMap<String, Vec<Message>>>,
    max_messages: usize,
}

impl VolatileMemory {
    pub fn new(max_messages: usize) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            max_messages: max_messages.max(2),
        }
    }
}

impl Default for VolatileMemory {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl MemoryAdapter for VolatileMemory {
    async fn history(&self, run_id: &str) -> Vec<Message> {
        self.inner
            .lock()
            .expect("memory lock poisoned")
            .get(run_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn append(&self, run_id: &str, messages: Vec<Message>) {
        let mut map = self.inner.lock().expect("memory lock poisoned");
        let history = map.entry(run_id.to_string()).or_default();
        history.extend(messages);
        if history.len() > self.max_messages {
            let drop_n = history.len() - self.max_messages;
            history.drain(..drop_n);
        }
    }

    async fn clear(&self, run_id: &str) {
        self.inner
            .lock()
            .expect("memory lock poisoned")
            .remove(run_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_preserves_order() {
        let mem = VolatileMemory::new(16);
        mem.append("r1", vec![Message::user("a")]).await;
        mem.append("r1", vec![Message::assistant("b"), Message::tool("c")])
            .await;
        let hist = mem.history("r1").await;
        let contents: Vec<&str> = hist.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_bounded_drops_oldest() {
        let mem = VolatileMemory::new(3);
        for i in 0..5 {
            mem.append("r1", vec![Message::user(format!("m{}", i))]).await;
        }
        let hist = mem.history("r1").await;
        let contents: Vec<&str> = hist.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_runs_are_isolated() {
        let mem = VolatileMemory::default();
        mem.append("r1", vec![Message::user("one")]).await;
        mem.append("r2", vec![Message::user("two")]).await;
        assert_eq!(mem.history("r1").await.len(), 1);
        assert_eq!(mem.history("r2").await.len(), 1);
        mem.clear("r1").await;
        assert!(mem.history("r1").await.is_empty());
        assert_eq!(mem.history("r2").await.len(), 1);
    }
}
