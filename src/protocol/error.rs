// src/protocol/error.rs

use thiserror::Error;

/// 解码阶段的错误，全部对连接是致命的
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: expected '{expected}', got {found:?}")]
    UnexpectedByte { expected: char, found: String },

    #[error("Protocol error: invalid length in {0:?}")]
    InvalidLength(String),

    #[error("Protocol error: empty command array")]
    EmptyArray,

    #[error("Protocol error: connection closed in the middle of a command")]
    Truncated,

    #[error("Protocol error: bulk string is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("invalid argument for '{command}': {reason}")]
    InvalidArgument { command: String, reason: String },
}

impl ProtocolError {
    /// 对端已经断开时不必再尝试回写错误
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ProtocolError::Io(_) | ProtocolError::Truncated)
    }
}
