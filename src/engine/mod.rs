// src/engine/mod.rs

//! # 引擎模块
//!
//! `engine` 模块是存储核心：
//! - `kv`：带惰性过期的字符串键值表
//! - `stream`：只追加的 stream 日志
//! - `Database`：用一把互斥锁同时保护两者，所有连接共享同一个实例。
//!   任何一次调用都能看到此前已完整生效的状态，不会观察到写了一半的数据。
pub mod kv;
pub mod stream;

pub use kv::KvStore;
pub use stream::{Entry, IdSpec, StreamError, StreamId, StreamStore};

use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::{Notify, futures::Notified};

/// TYPE 命令的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    String,
    Stream,
    None,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::String => "string",
            KeyType::Stream => "stream",
            KeyType::None => "none",
        }
    }
}

#[derive(Debug, Default)]
struct Keyspace {
    kv: KvStore,
    streams: StreamStore,
}

/// 进程内共享的数据库
#[derive(Debug, Default)]
pub struct Database {
    inner: Mutex<Keyspace>,
    // 每次 XADD 成功后唤醒阻塞中的 XREAD
    appended: Notify,
}

impl Database {
    pub fn new() -> Self {
        Database::default()
    }

    pub fn set(&self, key: &str, value: &str) {
        self.inner.lock().kv.set(key, value);
    }

    pub fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) {
        self.inner.lock().kv.set_with_ttl(key, value, ttl);
    }

    /// SET key value [PX ms]，leader 执行与 follower 回放共用
    pub fn apply_set(&self, key: &str, value: &str, px: Option<u64>) {
        match px {
            Some(ms) => self.set_with_ttl(key, value, Duration::from_millis(ms)),
            None => self.set(key, value),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.lock().kv.get(key)
    }

    pub fn xadd(
        &self,
        key: &str,
        id_spec: &str,
        fields: Vec<(String, String)>,
    ) -> Result<StreamId, StreamError> {
        let id = self.inner.lock().streams.append(key, id_spec, fields)?;
        self.appended.notify_waiters();
        Ok(id)
    }

    pub fn xrange(&self, key: &str, start: &str, end: &str) -> Result<Vec<Entry>, StreamError> {
        self.inner.lock().streams.range(key, start, end)
    }

    /// 在同一次加锁内解析所有 XREAD 的起始 id（`$` 取当前栈顶）
    pub fn resolve_read_ids(
        &self,
        requests: &[(String, String)],
    ) -> Result<Vec<(String, StreamId)>, StreamError> {
        let keyspace = self.inner.lock();
        requests
            .iter()
            .map(|(key, raw)| {
                keyspace
                    .streams
                    .resolve_read_id(key, raw)
                    .map(|id| (key.clone(), id))
            })
            .collect()
    }

    pub fn xread(&self, requests: &[(String, StreamId)]) -> Vec<(String, Vec<Entry>)> {
        self.inner.lock().streams.read_after(requests)
    }

    /// 下一次 XADD 成功时完成的通知；调用方需在查询前 `enable()` 以免丢失唤醒
    pub fn appended(&self) -> Notified<'_> {
        self.appended.notified()
    }

    /// 先查 KV（只看是否过期，不删除），再查 stream
    pub fn type_of(&self, key: &str) -> KeyType {
        let keyspace = self.inner.lock();
        if keyspace.kv.contains(key) {
            KeyType::String
        } else if keyspace.streams.exists(key) {
            KeyType::Stream
        } else {
            KeyType::None
        }
    }
}
