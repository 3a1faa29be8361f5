// src/replication/follower.rs
//! follower（replica）角色
//!
//! 上游：握手 → 接收快照 → 回放复制流（SET / PING / REPLCONF GETACK）。
//! 下游：只读，INFO 与 GET。

use anyhow::{Context, Result, bail};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::{
    io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
};
use tracing::{debug, info, warn};

use super::info::{RoleInfo, build_info_response};
use crate::config::{Config, ReplicaOf};
use crate::engine::Database;
use crate::protocol::{Command, decoder, encoder};
use crate::server::{Connection, ConnectionHandler};

pub struct Follower {
    config: Arc<Config>,
    db: Arc<Database>,
    upstream: ReplicaOf,
    /// 握手之后从复制流中消费的字节数
    processed: AtomicU64,
}

impl Follower {
    pub fn new(config: Arc<Config>, db: Arc<Database>, upstream: ReplicaOf) -> Self {
        Follower { config, db, upstream, processed: AtomicU64::new(0) }
    }

    pub fn processed_bytes(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }

    /// 连接 leader 并一直回放复制流，直到上游断开或出错
    pub async fn replicate(self: Arc<Self>) -> Result<()> {
        let addr = format!("{}:{}", self.upstream.host, self.upstream.port);
        let stream = TcpStream::connect(&addr)
            .await
            .with_context(|| format!("failed to connect to leader {}", addr))?;
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        self.handshake(&mut reader, &mut writer)
            .await
            .with_context(|| format!("handshake with {}", addr))?;
        info!(leader = %addr, "full resync complete, streaming commands");

        self.apply_stream(&mut reader, &mut writer).await?;
        info!(leader = %addr, processed = self.processed_bytes(), "leader closed the replication stream");
        Ok(())
    }

    async fn handshake<R, W>(&self, reader: &mut R, writer: &mut W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        request(reader, writer, &Command::Ping, "PONG").await?;
        let listening_port = Command::Replconf {
            key: "listening-port".to_string(),
            value: self.config.port.to_string(),
        };
        request(reader, writer, &listening_port, "OK").await?;
        let capa = Command::Replconf { key: "capa".to_string(), value: "psync2".to_string() };
        request(reader, writer, &capa, "OK").await?;
        let psync = Command::Psync { repl_id: "?".to_string(), offset: "-1".to_string() };
        let reply = request(reader, writer, &psync, "FULLRESYNC").await?;
        debug!(reply = %reply, "psync accepted");

        // 快照内容直接丢弃
        let snapshot = decoder::read_snapshot(reader).await?;
        debug!(bytes = snapshot.len(), "received snapshot");
        Ok(())
    }

    /// 回放复制流；每条命令按线上实际读到的字节数计入 processed，GETACK 自身也算在内
    async fn apply_stream<R, W>(&self, reader: &mut R, writer: &mut W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        while let Some((command, consumed)) = decoder::decode_command_with_len(reader).await? {
            let len = consumed as u64;
            match command {
                Command::Set { key, value, px } => {
                    self.db.apply_set(&key, &value, px);
                    self.processed.fetch_add(len, Ordering::SeqCst);
                }
                Command::Ping => {
                    self.processed.fetch_add(len, Ordering::SeqCst);
                }
                Command::Replconf { key, .. } if key.eq_ignore_ascii_case("getack") => {
                    let total = self.processed.fetch_add(len, Ordering::SeqCst) + len;
                    let ack = Command::Replconf { key: "ACK".to_string(), value: total.to_string() };
                    writer.write_all(ack.encode().as_bytes()).await?;
                    writer.flush().await?;
                    debug!(offset = total, "sent ack");
                }
                other => bail!("unexpected command '{}' in replication stream", other.name()),
            }
        }
        Ok(())
    }
}

/// 发送一条命令并读取单行回复；回复必须是 `+<expected> ...`
async fn request<R, W>(reader: &mut R, writer: &mut W, command: &Command, expected: &str) -> Result<String>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    writer.write_all(command.encode().as_bytes()).await?;
    writer.flush().await?;

    let Some(line) = decoder::read_line(reader).await? else {
        bail!("leader closed the connection during {}", command.name());
    };
    let Some(text) = line.strip_prefix('+') else {
        bail!("unexpected reply to {}: {}", command.name(), line);
    };
    let matches = text
        .split_whitespace()
        .next()
        .is_some_and(|word| word.eq_ignore_ascii_case(expected));
    if !matches {
        bail!("expected +{} in reply to {}, got {}", expected, command.name(), line);
    }
    Ok(text.to_string())
}

impl ConnectionHandler for Follower {
    async fn handle(self: Arc<Self>, mut conn: Connection) -> Result<()> {
        let result = self.serve_clients(&mut conn).await;
        conn.close().await;
        result
    }
}

impl Follower {
    async fn serve_clients(&self, conn: &mut Connection) -> Result<()> {
        while let Some(command) = conn.read_command().await? {
            match command {
                Command::Info(section) => {
                    let lines = build_info_response(section.as_deref(), RoleInfo::Follower);
                    conn.reply(encoder::bulk_lines(&lines))?;
                }
                Command::Get(key) => {
                    let value = self.db.get(&key);
                    conn.reply(encoder::optional_bulk_string(value.as_deref()))?;
                }
                other => {
                    warn!(peer = %conn.peer(), command = other.name(), "rejected on replica");
                    conn.reply(encoder::error(&format!(
                        "ERR '{}' is not supported on a replica",
                        other.name()
                    )))?;
                    bail!("unsupported command '{}' on replica", other.name());
                }
            }
        }
        Ok(())
    }
}
