// tests/common/mod.rs
#![allow(dead_code)]

use anyhow::{Context, Result, bail};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};

use crab_relay::config::{Config, ReplicaOf};
use crab_relay::protocol::encoder;
use crab_relay::server::start_with_listener;

const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// 在 127.0.0.1 的随机端口上启动一个 leader
pub async fn start_leader() -> Result<SocketAddr> {
    start_node(None).await
}

/// 启动一个指向 `leader` 的 follower
pub async fn start_follower(leader: SocketAddr) -> Result<SocketAddr> {
    let upstream = ReplicaOf { host: leader.ip().to_string(), port: leader.port() };
    start_node(Some(upstream)).await
}

async fn start_node(replicaof: Option<ReplicaOf>) -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let config = Config {
        bind: "127.0.0.1".to_string(),
        port: addr.port(),
        replicaof,
        ..Config::default()
    };
    tokio::spawn(start_with_listener(listener, config));
    Ok(addr)
}

/// 直接读写原始字节的测试客户端
pub struct Client {
    stream: BufReader<TcpStream>,
}

impl Client {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Client { stream: BufReader::new(stream) })
    }

    /// 以 bulk 数组发送一条命令
    pub async fn send(&mut self, parts: &[&str]) -> Result<()> {
        self.stream.get_mut().write_all(encoder::array(parts).as_bytes()).await?;
        Ok(())
    }

    /// 读取恰好 `len` 字节
    pub async fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        timeout(READ_TIMEOUT, self.stream.read_exact(&mut buf))
            .await
            .context("timed out waiting for reply")??;
        Ok(buf)
    }

    pub async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        timeout(READ_TIMEOUT, self.stream.read_line(&mut line))
            .await
            .context("timed out waiting for line")??;
        Ok(line)
    }

    /// 读取一个完整的回复帧（含嵌套数组），原样返回
    pub async fn read_reply(&mut self) -> Result<String> {
        let mut out = String::new();
        let mut pending = 1usize;
        while pending > 0 {
            pending -= 1;
            let line = self.read_line().await?;
            if line.is_empty() {
                bail!("connection closed mid-reply");
            }
            out.push_str(&line);
            let header = line.trim_end();
            match header.chars().next() {
                Some('$') => {
                    let len: i64 = header[1..].parse()?;
                    if len >= 0 {
                        let body = self.read_bytes(len as usize + 2).await?;
                        out.push_str(&String::from_utf8(body)?);
                    }
                }
                Some('*') => {
                    let count: i64 = header[1..].parse()?;
                    if count > 0 {
                        pending += count as usize;
                    }
                }
                _ => {}
            }
        }
        Ok(out)
    }

    /// 发送命令并读取一个回复帧
    pub async fn call(&mut self, parts: &[&str]) -> Result<String> {
        self.send(parts).await?;
        self.read_reply().await
    }

    /// 发送命令并断言回复恰好是 `expected`
    pub async fn request(&mut self, parts: &[&str], expected: &str) -> Result<()> {
        let reply = self.call(parts).await?;
        assert_eq!(reply, expected, "reply to {:?}", parts);
        Ok(())
    }

    /// 对端是否已关闭连接
    pub async fn is_closed(&mut self) -> Result<bool> {
        let mut buf = [0u8; 1];
        let n = timeout(READ_TIMEOUT, self.stream.read(&mut buf))
            .await
            .context("timed out waiting for close")??;
        Ok(n == 0)
    }
}

/// 反复发送同一条命令，直到回复等于 `expected`
pub async fn poll_until(client: &mut Client, parts: &[&str], expected: &str) -> Result<()> {
    let mut last = String::new();
    for _ in 0..100 {
        last = client.call(parts).await?;
        if last == expected {
            return Ok(());
        }
        sleep(Duration::from_millis(20)).await;
    }
    bail!("{:?} never replied {:?}, last reply {:?}", parts, expected, last)
}

/// 连接 leader（先等它开始监听）
pub async fn connect_with_retry(addr: SocketAddr) -> Result<Client> {
    for _ in 0..50 {
        if let Ok(client) = Client::connect(addr).await {
            return Ok(client);
        }
        sleep(Duration::from_millis(20)).await;
    }
    bail!("could not connect to {}", addr)
}
