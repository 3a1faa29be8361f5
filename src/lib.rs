// src/lib.rs
//! crab-relay 库：protocol / engine / expire / replication / server / config

pub mod config;      // 命令行 & JSON 配置
pub mod engine;      // 内存存储：KV + Stream
pub mod expire;      // 过期时间 & 时钟
pub mod protocol;    // 协议编解码
pub mod replication; // leader / follower 角色
pub mod server;      // 网络层：监听、连接池、写通道
