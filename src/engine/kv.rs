// src/engine/kv.rs

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::expire;

/// 字符串键值表 + 过期索引
///
/// 本身不加锁，由 `Database` 的互斥锁保证 map 与过期索引的一致性。
/// 没有记录过期时间的 key 永不过期。
#[derive(Debug, Default)]
pub struct KvStore {
    values: HashMap<String, String>,
    expiries: HashMap<String, Instant>,
}

impl KvStore {
    pub fn new() -> Self {
        KvStore::default()
    }

    /// 写入一个不过期的值；覆盖时清掉旧的过期时间
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.expiries.remove(&key);
        self.values.insert(key, value.into());
    }

    /// 写入并记录绝对过期时刻 now + ttl
    pub fn set_with_ttl(&mut self, key: impl Into<String>, value: impl Into<String>, ttl: Duration) {
        let key = key.into();
        self.expiries.insert(key.clone(), expire::deadline_after(ttl));
        self.values.insert(key, value.into());
    }

    /// 读取；惰性过期，发现已过期就删除后返回 None
    pub fn get(&mut self, key: &str) -> Option<String> {
        self.get_at(key, Instant::now())
    }

    fn get_at(&mut self, key: &str, now: Instant) -> Option<String> {
        if let Some(deadline) = self.expiries.get(key) {
            if expire::is_expired(*deadline, now) {
                self.values.remove(key);
                self.expiries.remove(key);
                return None;
            }
        }
        self.values.get(key).cloned()
    }

    /// 存在且未过期；不做删除
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.values.contains_key(key)
            && !self
                .expiries
                .get(key)
                .is_some_and(|deadline| expire::is_expired(*deadline, now))
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.values.len()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
