//! 速率限制：全局 rpm 间隔 + 模型调用并发上限
//!
//! 「上次调用时刻」是实例级共享值：共享同一实例的并发 run 会串行化
//! 彼此的调用间距，以遵守外部端点的全局速率上限。并发上限用 Semaphore。

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// 速率限制器：pace 负责 rpm 间隔等待，acquire 负责并发许可
pub struct RateLimiter {
    /// 两次调用间的最小间隔（60000 / rpm 毫秒）；未启用时为 None
    min_interval: Option<Duration>,
    last_call: Mutex<Option<Instant>>,
    permits: Arc<Semaphore>,
}

impl RateLimiter {
    pub fn new(enabled: bool, requests_per_minute: Option<u32>, max_concurrent: usize) -> Self {
        let min_interval = if enabled {
            requests_per_minute
                .filter(|rpm| *rpm > 0)
                .map(|rpm| Duration::from_millis(60_000 / rpm as u64))
        } else {
            None
        };
        Self {
            min_interval,
            last_call: Mutex::new(None),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// 距上次调用不足最小间隔时补足等待，返回实际等待时长（供事件上报）。
    /// 槽位（now + wait）在睡眠前锁内预约，避免并发 run 重复占用同一间隙。
    pub async fn pace(&self) -> Option<Duration> {
        let interval = self.min_interval?;
        let wait = {
            let mut last = self.last_call.lock().expect("rate limiter lock poisoned");
            let now = Instant::now();
            let wait = match *last {
                Some(prev) => interval.saturating_sub(now.duration_since(prev)),
                None => Duration::ZERO,
            };
            *last = Some(now + wait);
            wait
        };
        if wait.is_zero() {
            None
        } else {
            tokio::time::sleep(wait).await;
            Some(wait)
        }
    }

    /// 获取模型调用并发许可
    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        self.permits
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore closed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_never_waits() {
        let limiter = RateLimiter::new(false, Some(1), 2);
        assert!(limiter.pace().await.is_none());
        assert!(limiter.pace().await.is_none());
    }

    #[tokio::test]
    async fn test_back_to_back_calls_are_spaced() {
        // 600 rpm = 最小间隔 100ms
        let limiter = RateLimiter::new(true, Some(600), 2);
        let start = Instant::now();
        assert!(limiter.pace().await.is_none());
        let waited = limiter.pace().await;
        assert!(waited.is_some(), "second call must be delayed");
        assert!(
            start.elapsed() >= Duration::from_millis(95),
            "inter-call gap must be >= min interval, got {:?}",
            start.elapsed()
        );
    }

    #[tokio::test]
    async fn test_concurrency_permits() {
        let limiter = RateLimiter::new(true, None, 1);
        let p1 = limiter.acquire().await;
        // 第二个许可在 p1 释放前不可得
        let second = tokio::time::timeout(Duration::from_millis(20), limiter.acquire()).await;
        assert!(second.is_err());
        drop(p1);
        let p2 = tokio::time::timeout(Duration::from_millis(100), limiter.acquire()).await;
        assert!(p2.is_ok());
    }
}
