//! 响应缓存：TTL 过期 + LRU 淘汰
//!
//! 进程级共享，多个并发 run 共用同一实例；所有变更都是单键原子操作，
//! 由内部 Mutex 保证，调用方无需额外加锁。

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// 有界缓存：键为请求的确定性序列化，值在 TTL 内有效，超容量时淘汰最久未用
pub struct ResponseCache<V> {
    inner: Mutex<CacheState<V>>,
    ttl: Duration,
    capacity: usize,
    enabled: bool,
}

struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// 访问顺序，队首最旧
    order: VecDeque<String>,
}

struct CacheEntry<V> {
    value: V,
    created: Instant,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(enabled: bool, ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheState {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            ttl,
            capacity: capacity.max(1),
            enabled,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// 命中则晋升为最近使用并返回克隆；过期条目在读取时剔除
    pub fn get(&self, key: &str) -> Option<V> {
        if !self.enabled {
            return None;
        }
        let mut state = self.inner.lock().expect("cache lock poisoned");
        let expired = match state.entries.get(key) {
            Some(entry) => entry.created.elapsed() > self.ttl,
            None => return None,
        };
        if expired {
            state.entries.remove(key);
            if let Some(pos) = state.order.iter().position(|k| k == key) {
                state.order.remove(pos);
            }
            return None;
        }
        if let Some(pos) = state.order.iter().position(|k| k == key) {
            state.order.remove(pos);
        }
        state.order.push_back(key.to_string());
        state.entries.get(key).map(|e| e.value.clone())
    }

    /// 写入（或刷新）条目；超出容量时从队首淘汰最久未用
    pub fn put(&self, key: String, value: V) {
        if !self.enabled {
            return;
        }
        let mut state = self.inner.lock().expect("cache lock poisoned");
        if let Some(pos) = state.order.iter().position(|k| k == &key) {
            state.order.remove(pos);
        }
        state.order.push_back(key.clone());
        state.entries.insert(
            key,
            CacheEntry {
                value,
                created: Instant::now(),
            },
        );
        while state.entries.len() > self.capacity {
            match state.order.pop_front() {
                Some(oldest) => {
                    state.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_and_miss() {
        let cache: ResponseCache<String> =
            ResponseCache::new(true, Duration::from_secs(60), 8);
        assert!(cache.get("k").is_none());
        cache.put("k".to_string(), "v".to_string());
        assert_eq!(cache.get("k").as_deref(), Some("v"));
    }

    #[test]
    fn test_disabled_cache_never_stores() {
        let cache: ResponseCache<String> =
            ResponseCache::new(false, Duration::from_secs(60), 8);
        cache.put("k".to_string(), "v".to_string());
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_ttl_expiry() {
        let cache: ResponseCache<String> =
            ResponseCache::new(true, Duration::from_millis(10), 8);
        cache.put("k".to_string(), "v".to_string());
        std::thread::sleep(Duration::from_millis(25));
        assert!(cache.get("k").is_none());
        // 过期条目已被剔除
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lru_eviction() {
        let cache: ResponseCache<u32> = ResponseCache::new(true, Duration::from_secs(60), 2);
        cache.put("a".to_string(), 1);
        cache.put("b".to_string(), 2);
        // 访问 a，使 b 成为最久未用
        assert_eq!(cache.get("a"), Some(1));
        cache.put("c".to_string(), 3);
        assert_eq!(cache.len(), 2);
        assert!(cache.get("b").is_none());
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("c"), Some(3));
    }
}
