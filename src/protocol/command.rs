// src/protocol/command.rs
//! 一条已解码的客户端请求
//!
//! 只由解码器（或角色自己发起的 PING / REPLCONF / PSYNC）构造，构造后不可变。
//! `elements()` 还原出线上的元素序列，leader 向 replica 传播时原样重新编码。

use super::{encoder, ProtocolError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    Echo(String),
    /// SET key value [PX ms]
    Set { key: String, value: String, px: Option<u64> },
    Get(String),
    /// INFO [section]
    Info(Option<String>),
    Replconf { key: String, value: String },
    Psync { repl_id: String, offset: String },
    Wait { replicas: u64, timeout_ms: u64 },
    /// CONFIG GET <param>
    Config(String),
    Type(String),
    /// XADD key id field value [field value ...]，字段保持插入顺序
    Xadd { key: String, id: String, fields: Vec<(String, String)> },
    Xrange { key: String, start: String, end: String },
    /// XREAD [BLOCK ms] STREAMS key... id...，按请求顺序保存 key → id
    Xread { block_ms: Option<u64>, streams: Vec<(String, String)> },
}

impl Command {
    /// 由解码得到的元素数组构造命令；元素 0 为动词（大小写不敏感）
    pub fn from_elements(elements: Vec<String>) -> Result<Self, ProtocolError> {
        let Some((verb, args)) = elements.split_first() else {
            return Err(ProtocolError::EmptyArray);
        };
        let name = verb.to_ascii_uppercase();

        let cmd = match name.as_str() {
            // PING 的参数直接忽略
            "PING" => Command::Ping,
            "ECHO" => {
                let [arg] = exact::<1>(&name, args)?;
                Command::Echo(arg)
            }
            "SET" => match args {
                [key, value] => Command::Set { key: key.clone(), value: value.clone(), px: None },
                [key, value, flag, ms] if flag.eq_ignore_ascii_case("px") => Command::Set {
                    key: key.clone(),
                    value: value.clone(),
                    px: Some(parse_u64(&name, ms)?),
                },
                [_, _, flag, _] => {
                    return Err(ProtocolError::InvalidArgument {
                        command: name,
                        reason: format!("unsupported option '{}'", flag),
                    });
                }
                _ => return Err(ProtocolError::WrongArity(name)),
            },
            "GET" => {
                let [key] = exact::<1>(&name, args)?;
                Command::Get(key)
            }
            "INFO" => match args {
                [] => Command::Info(None),
                [section] => Command::Info(Some(section.clone())),
                _ => return Err(ProtocolError::WrongArity(name)),
            },
            "REPLCONF" => {
                let [key, value] = exact::<2>(&name, args)?;
                Command::Replconf { key, value }
            }
            "PSYNC" => {
                let [repl_id, offset] = exact::<2>(&name, args)?;
                Command::Psync { repl_id, offset }
            }
            "WAIT" => {
                let [replicas, timeout] = exact::<2>(&name, args)?;
                Command::Wait {
                    replicas: parse_u64(&name, &replicas)?,
                    timeout_ms: parse_u64(&name, &timeout)?,
                }
            }
            "CONFIG" => {
                let [action, param] = exact::<2>(&name, args)?;
                if !action.eq_ignore_ascii_case("get") {
                    return Err(ProtocolError::UnknownCommand(format!("CONFIG {}", action)));
                }
                Command::Config(param)
            }
            "TYPE" => {
                let [key] = exact::<1>(&name, args)?;
                Command::Type(key)
            }
            "XADD" => {
                let [key, id, rest @ ..] = args else {
                    return Err(ProtocolError::WrongArity(name));
                };
                if rest.is_empty() || rest.len() % 2 != 0 {
                    return Err(ProtocolError::WrongArity(name));
                }
                let fields = rest
                    .chunks_exact(2)
                    .map(|pair| (pair[0].clone(), pair[1].clone()))
                    .collect();
                Command::Xadd { key: key.clone(), id: id.clone(), fields }
            }
            "XRANGE" => {
                let [key, start, end] = exact::<3>(&name, args)?;
                Command::Xrange { key, start, end }
            }
            "XREAD" => parse_xread(&name, args)?,
            _ => return Err(ProtocolError::UnknownCommand(verb.clone())),
        };
        Ok(cmd)
    }

    /// 规范化（大写）的动词名，用于日志
    pub fn name(&self) -> &'static str {
        match self {
            Command::Ping => "PING",
            Command::Echo(_) => "ECHO",
            Command::Set { .. } => "SET",
            Command::Get(_) => "GET",
            Command::Info(_) => "INFO",
            Command::Replconf { .. } => "REPLCONF",
            Command::Psync { .. } => "PSYNC",
            Command::Wait { .. } => "WAIT",
            Command::Config(_) => "CONFIG",
            Command::Type(_) => "TYPE",
            Command::Xadd { .. } => "XADD",
            Command::Xrange { .. } => "XRANGE",
            Command::Xread { .. } => "XREAD",
        }
    }

    /// 线上元素序列，`from_elements(cmd.elements()) == cmd`
    pub fn elements(&self) -> Vec<String> {
        let mut out = vec![self.name().to_string()];
        match self {
            Command::Ping => {}
            Command::Echo(arg) => out.push(arg.clone()),
            Command::Set { key, value, px } => {
                out.push(key.clone());
                out.push(value.clone());
                if let Some(ms) = px {
                    out.push("PX".to_string());
                    out.push(ms.to_string());
                }
            }
            Command::Get(key) | Command::Type(key) => out.push(key.clone()),
            Command::Info(section) => out.extend(section.iter().cloned()),
            Command::Replconf { key, value } => {
                out.push(key.clone());
                out.push(value.clone());
            }
            Command::Psync { repl_id, offset } => {
                out.push(repl_id.clone());
                out.push(offset.clone());
            }
            Command::Wait { replicas, timeout_ms } => {
                out.push(replicas.to_string());
                out.push(timeout_ms.to_string());
            }
            Command::Config(param) => {
                out.push("GET".to_string());
                out.push(param.clone());
            }
            Command::Xadd { key, id, fields } => {
                out.push(key.clone());
                out.push(id.clone());
                for (field, value) in fields {
                    out.push(field.clone());
                    out.push(value.clone());
                }
            }
            Command::Xrange { key, start, end } => {
                out.push(key.clone());
                out.push(start.clone());
                out.push(end.clone());
            }
            Command::Xread { block_ms, streams } => {
                if let Some(ms) = block_ms {
                    out.push("BLOCK".to_string());
                    out.push(ms.to_string());
                }
                out.push("STREAMS".to_string());
                out.extend(streams.iter().map(|(key, _)| key.clone()));
                out.extend(streams.iter().map(|(_, id)| id.clone()));
            }
        }
        out
    }

    /// 编码为 bulk string 数组，即传播到复制流里的字节
    pub fn encode(&self) -> String {
        encoder::array(&self.elements())
    }

    /// 复制偏移量按这个长度推进
    pub fn encoded_len(&self) -> u64 {
        self.encode().len() as u64
    }
}

fn exact<const N: usize>(name: &str, args: &[String]) -> Result<[String; N], ProtocolError> {
    <[String; N]>::try_from(args.to_vec()).map_err(|_| ProtocolError::WrongArity(name.to_string()))
}

fn parse_u64(name: &str, raw: &str) -> Result<u64, ProtocolError> {
    raw.parse::<u64>().map_err(|_| ProtocolError::InvalidArgument {
        command: name.to_string(),
        reason: format!("value '{}' is not an integer or out of range", raw),
    })
}

fn parse_xread(name: &str, args: &[String]) -> Result<Command, ProtocolError> {
    let (block_ms, rest) = match args {
        [flag, ms, rest @ ..] if flag.eq_ignore_ascii_case("block") => {
            (Some(parse_u64(name, ms)?), rest)
        }
        _ => (None, args),
    };
    let [marker, pairs @ ..] = rest else {
        return Err(ProtocolError::WrongArity(name.to_string()));
    };
    if !marker.eq_ignore_ascii_case("streams") {
        return Err(ProtocolError::InvalidArgument {
            command: name.to_string(),
            reason: format!("expected STREAMS, got '{}'", marker),
        });
    }
    if pairs.is_empty() || pairs.len() % 2 != 0 {
        return Err(ProtocolError::WrongArity(name.to_string()));
    }
    // 前一半是 key，后一半是对应的 id
    let (keys, ids) = pairs.split_at(pairs.len() / 2);
    let streams = keys.iter().cloned().zip(ids.iter().cloned()).collect();
    Ok(Command::Xread { block_ms, streams })
}
