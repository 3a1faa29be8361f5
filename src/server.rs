// src/server.rs
//! 网络层：
//! - 监听 TCP 连接，按配置的上限限制同时处理的连接数
//! - 每个连接一个任务：解码请求、交给角色（leader / follower）执行
//! - 每个连接一个写任务，所有回复与复制流都经由同一个通道按序写出
use anyhow::{Context, Result, anyhow};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::{
    io::{AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream, tcp::OwnedReadHalf},
    sync::{Semaphore, mpsc},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::engine::Database;
use crate::protocol::{Command, decode_command, encoder};
use crate::replication::{Follower, Leader};

pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// 一个连接的出站通道；可以被克隆给别的任务（例如传播到 replica）
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl Outbound {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Outbound { tx }, rx)
    }

    /// 入队一帧；写任务已经退出（对端断开）时报错
    pub fn send(&self, frame: impl Into<Vec<u8>>) -> Result<()> {
        self.tx
            .send(frame.into())
            .map_err(|_| anyhow!("connection writer is closed"))
    }
}

/// 把通道里的帧依次写到 socket，所有 Outbound 都被丢弃后退出
pub fn spawn_writer<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) -> JoinHandle<Result<()>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            writer.write_all(&frame).await?;
        }
        writer.shutdown().await.ok();
        Ok(())
    })
}

/// 一个已接受的客户端连接
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    reader: BufReader<OwnedReadHalf>,
    outbound: Outbound,
    writer: JoinHandle<Result<()>>,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        let (reader, writer) = stream.into_split();
        let (outbound, rx) = Outbound::channel();
        Connection {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::SeqCst),
            peer,
            reader: BufReader::new(reader),
            outbound,
            writer: spawn_writer(writer, rx),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn outbound(&self) -> &Outbound {
        &self.outbound
    }

    pub fn reply(&self, frame: impl Into<Vec<u8>>) -> Result<()> {
        self.outbound.send(frame)
    }

    /// 读取下一条命令；对端正常关闭返回 None。
    /// 协议错误对连接是致命的，返回前尽量把错误回给客户端。
    pub async fn read_command(&mut self) -> Result<Option<Command>> {
        match decode_command(&mut self.reader).await {
            Ok(command) => {
                if let Some(c) = &command {
                    debug!(peer = %self.peer, command = c.name(), "received");
                }
                Ok(command)
            }
            Err(err) => {
                if !err.is_disconnect() {
                    let _ = self.outbound.send(encoder::error(&format!("ERR {}", err)));
                }
                Err(err).with_context(|| format!("reading from {}", self.peer))
            }
        }
    }

    /// 关闭写通道并等待剩余的帧写完
    pub async fn close(self) {
        let Connection { peer, outbound, writer, .. } = self;
        drop(outbound);
        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(%peer, "writer stopped: {}", err),
            Err(err) => warn!(%peer, "writer task failed: {}", err),
        }
    }
}

/// leader 与 follower 各自实现，决定一个连接上的命令如何执行
pub trait ConnectionHandler: Send + Sync + 'static {
    fn handle(self: Arc<Self>, conn: Connection) -> impl Future<Output = Result<()>> + Send;
}

/// 按角色启动服务
/// 默认入口: 监听 config.bind:config.port
pub async fn start(config: Config) -> Result<()> {
    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    start_with_listener(listener, config).await
}

/// 在已经绑定好的 listener 上运行（测试里用 127.0.0.1:0）
pub async fn start_with_listener(listener: TcpListener, config: Config) -> Result<()> {
    let addr = listener.local_addr()?;
    let max_connections = config.max_connections;
    let config = Arc::new(config);
    let db = Arc::new(Database::new());

    match config.replicaof.clone() {
        None => {
            info!(%addr, "listening as master");
            let leader = Arc::new(Leader::new(config, db));
            serve(listener, leader, max_connections).await
        }
        Some(upstream) => {
            info!(%addr, leader = %format!("{}:{}", upstream.host, upstream.port), "listening as replica");
            let follower = Arc::new(Follower::new(config, db, upstream));
            // 上游复制失败只结束这个任务，不影响对客户端的监听
            let replication = follower.clone();
            tokio::spawn(async move {
                if let Err(err) = replication.replicate().await {
                    error!("replication from leader stopped: {:#}", err);
                }
            });
            serve(listener, follower, max_connections).await
        }
    }
}

/// 核心循环: 不断 accept 新连接，每个连接 spawn 一个任务；
/// 信号量限制同时存活的连接数
pub async fn serve<H: ConnectionHandler>(
    listener: TcpListener,
    handler: Arc<H>,
    max_connections: usize,
) -> Result<()> {
    let permits = Arc::new(Semaphore::new(max_connections.max(1)));
    loop {
        let permit = permits.clone().acquire_owned().await?;
        let (stream, peer) = listener.accept().await?;
        info!(%peer, "accepted connection");

        let handler = handler.clone();
        tokio::spawn(async move {
            let _permit = permit;
            match handler.handle(Connection::new(stream, peer)).await {
                Ok(()) => info!(%peer, "disconnected"),
                Err(err) => warn!(%peer, "connection closed: {:#}", err),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_writer_preserves_frame_order() -> Result<()> {
        let (client, mut server) = tokio::io::duplex(1024);
        let (outbound, rx) = Outbound::channel();
        let writer = spawn_writer(client, rx);

        let clone = outbound.clone();
        outbound.send("+OK\r\n")?;
        clone.send(b":1\r\n".to_vec())?;
        drop(outbound);
        drop(clone);
        writer.await??;

        let mut received = String::new();
        server.read_to_string(&mut received).await?;
        assert_eq!(received, "+OK\r\n:1\r\n");
        Ok(())
    }

    #[tokio::test]
    async fn test_send_after_writer_exit_fails() {
        let (outbound, rx) = Outbound::channel();
        drop(rx);
        assert!(outbound.send("+OK\r\n").is_err());
    }
}
