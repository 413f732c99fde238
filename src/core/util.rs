//! 执行工具集：run id、缓存键、退避延迟、超时+取消包装

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::{OrchestratorError, Result};
use crate::memory::Message;

/// 生成运行标识（uuid v4）
pub fn new_run_id() -> String {
    format!("run-{}", Uuid::new_v4())
}

/// 缓存键：{phase, model, temperature, messages} 的确定性序列化。
/// 字段顺序固定、消息顺序保留，相同语义请求得到相同键。
pub fn cache_key(phase: &str, model: &str, temperature: f32, messages: &[Message]) -> String {
    #[derive(serde::Serialize)]
    struct KeyParts<'a> {
        phase: &'a str,
        model: &'a str,
        temperature: String,
        messages: &'a [Message],
    }
    let parts = KeyParts {
        phase,
        model,
        // 固定精度，避免浮点展示差异产生不同键
        temperature: format!("{:.4}", temperature),
        messages,
    };
    serde_json::to_string(&parts)
        .unwrap_or_else(|_| format!("{}:{}:{}:{}", phase, model, temperature, messages.len()))
}

/// 第 attempt 次失败后的退避时长：initial * factor^(attempt-1)，封顶 max
pub fn backoff_delay(attempt: u32, initial: Duration, factor: f64, max: Duration) -> Duration {
    let exp = factor.powi(attempt.saturating_sub(1) as i32);
    let millis = (initial.as_millis() as f64 * exp).round() as u64;
    Duration::from_millis(millis).min(max)
}

/// 超时 + 取消包装：先到者生效；deadline 为 None 时仅监听取消
pub async fn with_deadline<F, T>(
    deadline: Option<Duration>,
    cancel: &CancellationToken,
    label: &str,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        // 先查取消：已取消的令牌必须在调用就绪前生效
        biased;
        _ = cancel.cancelled() => Err(OrchestratorError::Cancelled),
        out = async {
            match deadline {
                Some(d) => tokio::time::timeout(d, fut)
                    .await
                    .map_err(|_| OrchestratorError::Timeout(label.to_string()))?,
                None => fut.await,
            }
        } => out,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_ids_unique() {
        assert_ne!(new_run_id(), new_run_id());
    }

    #[test]
    fn test_cache_key_stable_and_sensitive() {
        let msgs = vec![Message::system("s"), Message::user("hello")];
        let a = cache_key("plan", "m1", 0.2, &msgs);
        let b = cache_key("plan", "m1", 0.2, &msgs);
        assert_eq!(a, b);

        // 任一维度变化都必须产生不同键
        assert_ne!(a, cache_key("act", "m1", 0.2, &msgs));
        assert_ne!(a, cache_key("plan", "m2", 0.2, &msgs));
        assert_ne!(a, cache_key("plan", "m1", 0.7, &msgs));
        assert_ne!(a, cache_key("plan", "m1", 0.2, &[Message::user("hello")]));
    }

    #[test]
    fn test_cache_key_message_order_matters() {
        let ab = vec![Message::user("a"), Message::user("b")];
        let ba = vec![Message::user("b"), Message::user("a")];
        assert_ne!(cache_key("plan", "m", 0.0, &ab), cache_key("plan", "m", 0.0, &ba));
    }

    #[test]
    fn test_backoff_series() {
        let initial = Duration::from_millis(200);
        let max = Duration::from_millis(5_000);
        assert_eq!(backoff_delay(1, initial, 2.0, max), Duration::from_millis(200));
        assert_eq!(backoff_delay(2, initial, 2.0, max), Duration::from_millis(400));
        assert_eq!(backoff_delay(3, initial, 2.0, max), Duration::from_millis(800));
        // 封顶
        assert_eq!(backoff_delay(10, initial, 2.0, max), max);
    }

    #[tokio::test]
    async fn test_with_deadline_timeout() {
        let cancel = CancellationToken::new();
        let out: Result<()> = with_deadline(
            Some(Duration::from_millis(10)),
            &cancel,
            "slow op",
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        )
        .await;
        assert!(matches!(out, Err(OrchestratorError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_with_deadline_cancel() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out: Result<()> = with_deadline(None, &cancel, "op", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(out, Err(OrchestratorError::Cancelled)));
    }
}
