// src/replication/registry.rs
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{self, Instant};
use tracing::{debug, info};

use crate::protocol::Command;
use crate::server::{ConnectionId, Outbound};

#[derive(Debug)]
struct Replica {
    outbound: Outbound,
    /// REPLCONF ACK 上报值的累加
    acked: u64,
}

/// leader 侧的 replica 表
///
/// - connection id → (出站通道, 已确认偏移量)，PSYNC 时登记，连接断开时移除
/// - `offset`：写入复制流的总字节数，每传播一条命令推进一次
/// - `acked`：收到 ACK 时唤醒 WAIT
/// - `order`：写入本地存储与写入复制流在同一临界区内完成，
///   两者的顺序因此一致
#[derive(Debug, Default)]
pub struct ReplicaRegistry {
    replicas: DashMap<ConnectionId, Replica>,
    offset: AtomicU64,
    acked: Notify,
    order: Mutex<()>,
}

impl ReplicaRegistry {
    pub fn new() -> Self {
        ReplicaRegistry::default()
    }

    /// PSYNC 完成后登记，初始确认偏移量为 0
    pub fn register(&self, id: ConnectionId, outbound: Outbound) {
        self.replicas.insert(id, Replica { outbound, acked: 0 });
        info!(connection = id, replicas = self.replicas.len(), "replica registered");
    }

    /// 连接关闭时调用；返回该连接是否是 replica
    pub fn remove(&self, id: ConnectionId) -> bool {
        self.replicas.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::SeqCst)
    }

    pub fn acked_offset(&self, id: ConnectionId) -> Option<u64> {
        self.replicas.get(&id).map(|r| r.acked)
    }

    /// REPLCONF ACK <bytes>：累加到该 replica 的确认偏移量
    pub fn acknowledge(&self, id: ConnectionId, bytes: u64) {
        if let Some(mut replica) = self.replicas.get_mut(&id) {
            replica.acked = replica.acked.saturating_add(bytes);
            debug!(connection = id, acked = replica.acked, "replica ack");
        }
        self.acked.notify_waiters();
    }

    /// 确认偏移量 >= min_offset 的 replica 数
    pub fn in_sync(&self, min_offset: u64) -> usize {
        self.replicas.iter().filter(|r| r.acked >= min_offset).count()
    }

    /// 把命令编码后发给每个 replica，并按编码长度推进复制偏移量。
    /// 写通道已关闭的 replica 直接移除。返回成功发送的个数。
    pub fn propagate(&self, command: &Command) -> usize {
        let _order = self.order.lock();
        self.fan_out(command)
    }

    /// 在持有顺序锁时执行 `apply`（写本地存储），然后传播 `command`；
    /// 并发写入在 leader 上生效的顺序就是 replica 收到的顺序
    pub fn apply_and_propagate<T>(&self, command: &Command, apply: impl FnOnce() -> T) -> T {
        let _order = self.order.lock();
        let out = apply();
        self.fan_out(command);
        out
    }

    fn fan_out(&self, command: &Command) -> usize {
        let frame = command.encode();
        self.offset.fetch_add(frame.len() as u64, Ordering::SeqCst);

        let mut dead = Vec::new();
        let mut sent = 0;
        for replica in self.replicas.iter() {
            match replica.outbound.send(frame.clone()) {
                Ok(()) => sent += 1,
                Err(_) => dead.push(*replica.key()),
            }
        }
        // 遍历结束后再删除，避免持有分片读锁时写入
        for id in dead {
            self.replicas.remove(&id);
            info!(connection = id, "dropped unreachable replica");
        }
        sent
    }

    /// 等到至少 `target` 个 replica 确认了 `min_offset`，或超时；
    /// 返回此时同步的 replica 数。超时不是错误。
    pub async fn wait_for_acks(&self, target: usize, min_offset: u64, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        loop {
            // 先注册通知再检查，避免检查与等待之间到达的 ACK 被错过
            let notified = self.acked.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let in_sync = self.in_sync(min_offset);
            if in_sync >= target {
                return in_sync;
            }
            if time::timeout_at(deadline, notified).await.is_err() {
                return self.in_sync(min_offset);
            }
        }
    }
}
