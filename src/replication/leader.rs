// src/replication/leader.rs
//! leader（master）角色
//!
//! 每个连接：CONNECTED → 普通客户端 | replica（PSYNC 之后）。
//! 连接断开是唯一的清理路径：关闭 socket 并从 replica 表中移除。

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{debug, info};

use super::info::{RoleInfo, build_info_response};
use super::{REPLICATION_ID, ReplicaRegistry, empty_snapshot};
use crate::config::Config;
use crate::engine::{Database, Entry, StreamId};
use crate::protocol::{Command, encoder};
use crate::server::{Connection, ConnectionHandler};

pub struct Leader {
    config: Arc<Config>,
    db: Arc<Database>,
    replicas: ReplicaRegistry,
}

impl Leader {
    pub fn new(config: Arc<Config>, db: Arc<Database>) -> Self {
        Leader { config, db, replicas: ReplicaRegistry::new() }
    }

    pub fn replicas(&self) -> &ReplicaRegistry {
        &self.replicas
    }

    async fn serve_commands(&self, conn: &mut Connection) -> Result<()> {
        while let Some(command) = conn.read_command().await? {
            self.execute(conn, command).await?;
        }
        Ok(())
    }

    /// 执行一条命令并写回复
    async fn execute(&self, conn: &Connection, command: Command) -> Result<()> {
        match command {
            Command::Ping => conn.reply(encoder::simple_string("PONG")),
            Command::Echo(arg) => conn.reply(encoder::bulk_string(&arg)),
            Command::Get(key) => {
                let value = self.db.get(&key);
                conn.reply(encoder::optional_bulk_string(value.as_deref()))
            }
            Command::Set { ref key, ref value, px } => self.replicas.apply_and_propagate(&command, || {
                self.db.apply_set(key, value, px);
                conn.reply(encoder::simple_string("OK"))
            }),
            Command::Info(section) => {
                let lines = build_info_response(
                    section.as_deref(),
                    RoleInfo::Leader { offset: self.replicas.offset() },
                );
                conn.reply(encoder::bulk_lines(&lines))
            }
            Command::Replconf { key, value } => self.replconf(conn, &key, &value),
            Command::Psync { .. } => self.full_resync(conn),
            Command::Wait { replicas, timeout_ms } => {
                let in_sync = self.wait(replicas as usize, Duration::from_millis(timeout_ms)).await;
                conn.reply(encoder::integer(in_sync as i64))
            }
            Command::Config(param) => {
                let reply = match self.config.get(&param) {
                    Some(value) => encoder::array(&[param.as_str(), value]),
                    None => encoder::array::<&str>(&[]),
                };
                conn.reply(reply)
            }
            Command::Type(key) => conn.reply(encoder::simple_string(self.db.type_of(&key).as_str())),
            Command::Xadd { key, id, fields } => {
                let reply = match self.db.xadd(&key, &id, fields) {
                    Ok(id) => encoder::bulk_string(&id.to_string()),
                    Err(err) => encoder::error(&err.to_string()),
                };
                conn.reply(reply)
            }
            Command::Xrange { key, start, end } => {
                let reply = match self.db.xrange(&key, &start, &end) {
                    Ok(entries) => encode_entries(&entries),
                    Err(err) => encoder::error(&err.to_string()),
                };
                conn.reply(reply)
            }
            Command::Xread { block_ms, streams } => {
                let reply = match self.db.resolve_read_ids(&streams) {
                    Ok(ids) => self.xread(&ids, block_ms).await,
                    Err(err) => encoder::error(&err.to_string()),
                };
                conn.reply(reply)
            }
        }
    }

    fn replconf(&self, conn: &Connection, key: &str, value: &str) -> Result<()> {
        if key.eq_ignore_ascii_case("ack") {
            // ACK 不回复
            let bytes = value
                .parse::<u64>()
                .with_context(|| format!("invalid REPLCONF ACK offset '{}'", value))?;
            self.replicas.acknowledge(conn.id(), bytes);
            return Ok(());
        }
        if key.eq_ignore_ascii_case("listening-port") {
            info!(peer = %conn.peer(), port = value, "replica announced listening port");
        }
        conn.reply(encoder::simple_string("OK"))
    }

    /// +FULLRESYNC <replid> 0，随后发送空快照，再把连接登记为 replica
    fn full_resync(&self, conn: &Connection) -> Result<()> {
        conn.reply(encoder::simple_string(&format!("FULLRESYNC {} 0", REPLICATION_ID)))?;
        conn.reply(encoder::raw_payload(&empty_snapshot()?))?;
        self.replicas.register(conn.id(), conn.outbound().clone());
        Ok(())
    }

    /// WAIT：偏移量为 0 时所有 replica 都算同步；没有 replica 时直接返回 0；
    /// 否则发 GETACK 并等待确认
    async fn wait(&self, target: usize, timeout: Duration) -> usize {
        let current = self.replicas.offset();
        if current == 0 || self.replicas.is_empty() {
            return self.replicas.len();
        }
        let getack = Command::Replconf { key: "GETACK".to_string(), value: "*".to_string() };
        self.replicas.propagate(&getack);
        let in_sync = self.replicas.wait_for_acks(target, current, timeout).await;
        debug!(target, in_sync, offset = current, "WAIT finished");
        in_sync
    }

    /// XREAD [BLOCK ms]：没有新条目时等待 XADD 通知，超时回 null array
    async fn xread(&self, ids: &[(String, StreamId)], block_ms: Option<u64>) -> String {
        let mut result = self.db.xread(ids);
        let Some(ms) = block_ms else {
            return encode_streams(&result);
        };

        // BLOCK 0 表示一直等
        let deadline = (ms > 0).then(|| Instant::now() + Duration::from_millis(ms));
        while !has_entries(&result) {
            let notified = self.db.appended();
            tokio::pin!(notified);
            notified.as_mut().enable();

            result = self.db.xread(ids);
            if has_entries(&result) {
                break;
            }
            match deadline {
                Some(deadline) => {
                    if time::timeout_at(deadline, notified).await.is_err() {
                        result = self.db.xread(ids);
                        break;
                    }
                }
                None => notified.await,
            }
            result = self.db.xread(ids);
        }

        if has_entries(&result) {
            encode_streams(&result)
        } else {
            encoder::null_array()
        }
    }
}

impl ConnectionHandler for Leader {
    async fn handle(self: Arc<Self>, mut conn: Connection) -> Result<()> {
        let result = self.serve_commands(&mut conn).await;
        if let Some(acked) = self.replicas.acked_offset(conn.id()) {
            self.replicas.remove(conn.id());
            info!(peer = %conn.peer(), acked, "replica disconnected");
        }
        conn.close().await;
        result
    }
}

fn has_entries(result: &[(String, Vec<Entry>)]) -> bool {
    result.iter().any(|(_, entries)| !entries.is_empty())
}

/// [[id, [field, value, ...]], ...]
fn encode_entries(entries: &[Entry]) -> String {
    let encoded: Vec<String> = entries
        .iter()
        .map(|entry| {
            let flat: Vec<&str> = entry
                .fields
                .iter()
                .flat_map(|(field, value)| [field.as_str(), value.as_str()])
                .collect();
            encoder::nested_array(&[encoder::bulk_string(&entry.id.to_string()), encoder::array(&flat)])
        })
        .collect();
    encoder::nested_array(&encoded)
}

/// [[key, [entries...]], ...]
fn encode_streams(result: &[(String, Vec<Entry>)]) -> String {
    let encoded: Vec<String> = result
        .iter()
        .map(|(key, entries)| encoder::nested_array(&[encoder::bulk_string(key), encode_entries(entries)]))
        .collect();
    encoder::nested_array(&encoded)
}
