// src/replication/mod.rs
//! 主从复制
//!
//! - `leader`：执行客户端命令，把 SET 传播给所有 replica，实现 WAIT
//! - `follower`：向 leader 握手，回放复制流，只读地服务 INFO / GET
//! - `registry`：leader 侧的 replica 表与复制偏移量
//! - `info`：INFO replication 的内容

pub mod follower;
pub mod info;
pub mod leader;
pub mod registry;

pub use follower::Follower;
pub use leader::Leader;
pub use registry::ReplicaRegistry;

use anyhow::{Context, Result};

/// 固定的复制 id，FULLRESYNC 与 INFO 中使用
pub const REPLICATION_ID: &str = "8371b4fb1155b71f4a04d3e1bc3e18c4a990aeeb";

/// 空数据库快照（RDB 格式），全量同步时原样发送
const EMPTY_SNAPSHOT_HEX: &str = "524544495330303131fa0972656469732d76657205372e322e30fa0a72656469732d62697473c040fa056374696d65c26d08bc65fa08757365642d6d656dc2b0c41000fa08616f662d62617365c000fff06e3bfec0ff5aa2";

pub fn empty_snapshot() -> Result<Vec<u8>> {
    hex::decode(EMPTY_SNAPSHOT_HEX).context("embedded snapshot is not valid hex")
}
