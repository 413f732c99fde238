//! 过程事件：运行生命周期的发布/订阅
//!
//! 事件为不可变记录 {run_id, kind, timestamp, data}，广播即弃，核心不持久化。
//! EventBus 为进程级共享；订阅者 panic 被捕获并记录日志，不影响其他订阅者。

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// 事件种类（可序列化为 JSON 供外部展示）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RunStart,
    RunEnd,
    NodeEnter,
    NodeExit,
    ModelCallStart,
    ModelCallEnd,
    ToolCallStart,
    ToolCallEnd,
    Retry,
    RateLimitDelay,
    CacheHit,
    CacheSet,
    Error,
}

/// 单条事件
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub run_id: String,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl Event {
    pub fn new(run_id: impl Into<String>, kind: EventKind, data: serde_json::Value) -> Self {
        Self {
            run_id: run_id.into(),
            kind,
            timestamp: Utc::now(),
            data,
        }
    }
}

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;
type SubscriberMap = Mutex<HashMap<u64, Handler>>;

/// 进程内发布/订阅总线
#[derive(Default)]
pub struct EventBus {
    subscribers: Arc<SubscriberMap>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册订阅者，返回可显式退订的句柄
    pub fn subscribe(&self, handler: impl Fn(&Event) + Send + Sync + 'static) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .expect("event bus lock poisoned")
            .insert(id, Arc::new(handler));
        Subscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    /// 广播事件；单个订阅者 panic 不中断对其余订阅者的投递
    pub fn emit(&self, event: &Event) {
        let handlers: Vec<Handler> = self
            .subscribers
            .lock()
            .expect("event bus lock poisoned")
            .values()
            .cloned()
            .collect();
        for handler in handlers {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| handler(event)));
            if outcome.is_err() {
                tracing::warn!(kind = ?event.kind, run_id = %event.run_id, "event subscriber panicked");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .expect("event bus lock poisoned")
            .len()
    }
}

/// 订阅句柄：unsubscribe 后不再收到事件；总线先于句柄销毁时退订为空操作
pub struct Subscription {
    id: u64,
    subscribers: Weak<SubscriberMap>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(subs) = self.subscribers.upgrade() {
            subs.lock().expect("event bus lock poisoned").remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_subscribe_emit_unsubscribe() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = bus.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&Event::new("r1", EventKind::RunStart, serde_json::json!({})));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        sub.unsubscribe();
        bus.emit(&Event::new("r1", EventKind::RunEnd, serde_json::json!({})));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_panicking_subscriber_does_not_break_delivery() {
        let bus = EventBus::new();
        let _bad = bus.subscribe(|_| panic!("boom"));
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let _good = bus.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&Event::new("r1", EventKind::NodeEnter, serde_json::json!({})));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_event_serializes_with_snake_case_kind() {
        let ev = Event::new("r1", EventKind::RateLimitDelay, serde_json::json!({"wait_ms": 50}));
        let s = serde_json::to_string(&ev).expect("serialize");
        assert!(s.contains("rate_limit_delay"));
        assert!(s.contains("wait_ms"));
    }
}
