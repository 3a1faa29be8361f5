// src/expire.rs
//! 过期时间相关的时钟工具
//!
//! KV 的过期采用惰性策略：只有 `get` 时才检查并删除，没有后台清理任务。

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// 返回当前的 UNIX 毫秒
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// 从现在起 ttl 之后的绝对过期时刻
pub fn deadline_after(ttl: Duration) -> Instant {
    Instant::now() + ttl
}

/// `now` 严格晚于过期时刻才算过期
pub fn is_expired(deadline: Instant, now: Instant) -> bool {
    now > deadline
}
