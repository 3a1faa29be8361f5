// src/config.rs
//! 启动配置：命令行参数（clap）+ 可选的 JSON 配置文件（serde_json）
//!
//! 命令行里显式给出的参数覆盖 JSON 文件中的同名字段。

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::{fs, path::{Path, PathBuf}};

pub const DEFAULT_PORT: u16 = 6379;

#[derive(Parser, Debug)]
#[command(name = "crab-relay", version, about = "In-memory key-value server with leader/follower replication")]
pub struct Cli {
    /// 监听端口，默认 6379
    #[arg(long)]
    pub port: Option<u16>,

    /// 作为 follower 启动：`--replicaof <host> <port>` 或 `--replicaof "<host> <port>"`
    #[arg(long, num_args = 1..=2, value_names = ["HOST", "PORT"])]
    pub replicaof: Option<Vec<String>>,

    /// CONFIG GET dir 返回的目录
    #[arg(long)]
    pub dir: Option<String>,

    /// CONFIG GET dbfilename 返回的文件名
    #[arg(long)]
    pub dbfilename: Option<String>,

    /// 监听地址
    #[arg(long)]
    pub bind: Option<String>,

    /// 同时处理的最大连接数
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// JSON 配置文件路径
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// 进程启动后使用的全局配置
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    /// 为 None 时以 leader 身份运行
    pub replicaof: Option<ReplicaOf>,
    pub dir: String,
    pub dbfilename: String,
    pub max_connections: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            replicaof: None,
            dir: ".".to_string(),
            dbfilename: "dump.rdb".to_string(),
            max_connections: 16,
        }
    }
}

/// 上游 leader 的地址
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ReplicaOf {
    pub host: String,
    pub port: u16,
}

impl ReplicaOf {
    /// 接受 `["host", "port"]` 或 `["host port"]` 两种写法
    pub fn parse(parts: &[String]) -> Result<Self> {
        let tokens: Vec<&str> = parts.iter().flat_map(|p| p.split_whitespace()).collect();
        let [host, port] = tokens.as_slice() else {
            bail!("--replicaof expects <host> <port>, got {:?}", parts);
        };
        let port = port
            .parse::<u16>()
            .with_context(|| format!("invalid leader port '{}'", port))?;
        Ok(ReplicaOf { host: host.to_string(), port })
    }
}

impl Config {
    /// CONFIG GET 支持的参数
    pub fn get(&self, param: &str) -> Option<&str> {
        match param.to_ascii_lowercase().as_str() {
            "dir" => Some(&self.dir),
            "dbfilename" => Some(&self.dbfilename),
            _ => None,
        }
    }
}

impl Cli {
    /// 合并 JSON 文件与命令行参数
    pub fn into_config(self) -> Result<Config> {
        let mut cfg = match &self.config {
            Some(path) => load(path)?,
            None => Config::default(),
        };
        if let Some(port) = self.port {
            cfg.port = port;
        }
        if let Some(parts) = &self.replicaof {
            cfg.replicaof = Some(ReplicaOf::parse(parts)?);
        }
        if let Some(dir) = self.dir {
            cfg.dir = dir;
        }
        if let Some(name) = self.dbfilename {
            cfg.dbfilename = name;
        }
        if let Some(bind) = self.bind {
            cfg.bind = bind;
        }
        if let Some(n) = self.max_connections {
            cfg.max_connections = n;
        }
        Ok(cfg)
    }
}

/// 从指定路径读取并反序列化 JSON 配置，缺省字段取默认值
pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {:?}", path))?;
    let cfg: Config = serde_json::from_str(&data)
        .with_context(|| format!("Failed to parse config file {:?}", path))?;
    Ok(cfg)
}
