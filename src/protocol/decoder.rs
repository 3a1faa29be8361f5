// src/protocol/decoder.rs
//! 解码器：从带缓冲的异步字节流读取一个完整的请求
//!
//! 请求总是 bulk string 数组：
//!   *2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n
//!
//! 连接空闲时只是在 `read_line` 上 await，不会占住线程；
//! 在命令边界遇到 EOF 返回 `Ok(None)`。

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use super::{Command, ProtocolError};

/// 单个 bulk string 的上限（512 MiB），超过即视为非法长度，不做分配
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;
/// 一条命令最多的元素个数
pub const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// 读取并解析一个命令
pub async fn decode_command<R>(reader: &mut R) -> Result<Option<Command>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    Ok(decode_command_with_len(reader).await?.map(|(command, _)| command))
}

/// 同 `decode_command`，另外返回这条命令在线上实际占用的字节数
pub async fn decode_command_with_len<R>(
    reader: &mut R,
) -> Result<Option<(Command, usize)>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    match read_frame(reader).await? {
        Some((elements, consumed)) => Ok(Some((Command::from_elements(elements)?, consumed))),
        None => Ok(None),
    }
}

/// 读取 `*N` 头以及后续 N 个 bulk string
pub async fn read_elements<R>(reader: &mut R) -> Result<Option<Vec<String>>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    Ok(read_frame(reader).await?.map(|(elements, _)| elements))
}

async fn read_frame<R>(reader: &mut R) -> Result<Option<(Vec<String>, usize)>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    // 1) "*<N>\r\n"
    let mut line = String::new();
    let mut consumed = reader.read_line(&mut line).await?;
    if consumed == 0 {
        return Ok(None);
    }
    let count = parse_header(&line, '*', MAX_ARRAY_LEN)?;
    if count == 0 {
        return Err(ProtocolError::EmptyArray);
    }

    let mut elements = Vec::with_capacity(count.min(16));
    for _ in 0..count {
        // 2) "$<len>\r\n"
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(ProtocolError::Truncated);
        }
        let len = parse_header(&line, '$', MAX_BULK_LEN)?;

        // 3) payload + "\r\n"；len 已有上限，加 2 不会溢出
        let mut buf = vec![0u8; len + 2];
        read_exact(reader, &mut buf).await?;
        if !buf.ends_with(b"\r\n") {
            return Err(ProtocolError::UnexpectedByte {
                expected: '\r',
                found: String::from_utf8_lossy(&buf[len..]).into_owned(),
            });
        }
        consumed += n + buf.len();
        buf.truncate(len);
        elements.push(String::from_utf8(buf)?);
    }
    Ok(Some((elements, consumed)))
}

/// 读取一行回复（握手阶段的 `+PONG` / `+OK` / `+FULLRESYNC ...`），去掉 CRLF
pub async fn read_line<R>(reader: &mut R) -> Result<Option<String>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

/// 读取 `$<len>\r\n` 加 len 个原始字节（快照，末尾没有 CRLF）
pub async fn read_snapshot<R>(reader: &mut R) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(ProtocolError::Truncated);
    }
    let len = parse_header(&line, '$', MAX_BULK_LEN)?;
    let mut payload = vec![0u8; len];
    read_exact(reader, &mut payload).await?;
    Ok(payload)
}

/// 解析 `<marker><n>`；n 不能超过 `max`
fn parse_header(line: &str, marker: char, max: usize) -> Result<usize, ProtocolError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(rest) = line.strip_prefix(marker) else {
        return Err(ProtocolError::UnexpectedByte { expected: marker, found: line.to_string() });
    };
    match rest.parse::<usize>() {
        Ok(n) if n <= max => Ok(n),
        _ => Err(ProtocolError::InvalidLength(line.to_string())),
    }
}

async fn read_exact<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(ProtocolError::Truncated),
        Err(e) => Err(e.into()),
    }
}
