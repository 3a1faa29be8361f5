// src/protocol/mod.rs
//! 协议编解码
//!
//! - `command`：一个请求对应的 `Command` 枚举，每个动词一个变体
//! - `decoder`：从字节流读取 `*N` 数组并构造 `Command`
//! - `encoder`：各种回复格式（简单字符串、bulk、数组、整数……）

pub mod command;
pub mod decoder;
pub mod encoder;
mod error;

pub use command::Command;
pub use decoder::decode_command;
pub use error::ProtocolError;
