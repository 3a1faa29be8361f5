// src/engine/stream.rs
//! Stream 类型：每个 key 一条只追加的有序日志
//!
//! - XADD  → `append`，服务端分配/校验单调递增的 id
//! - XRANGE → `range`，闭区间查询
//! - XREAD → `read_after`，返回严格大于给定 id 的条目

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::expire;

/// `<millis>-<sequence>`，先比较 millis 再比较 sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    pub const ZERO: StreamId = StreamId { ms: 0, seq: 0 };
    pub const MAX: StreamId = StreamId { ms: u64::MAX, seq: u64::MAX };

    pub fn new(ms: u64, seq: u64) -> Self {
        StreamId { ms, seq }
    }

    /// 解析 `ms-seq` 或只有 `ms`（此时 sequence 取 `default_seq`）
    fn parse_with_default(raw: &str, default_seq: u64) -> Result<Self, StreamError> {
        let invalid = || StreamError::InvalidId(raw.to_string());
        match raw.split_once('-') {
            Some((ms, seq)) => Ok(StreamId::new(
                ms.parse().map_err(|_| invalid())?,
                seq.parse().map_err(|_| invalid())?,
            )),
            None => Ok(StreamId::new(raw.parse().map_err(|_| invalid())?, default_seq)),
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for StreamId {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StreamId::parse_with_default(s, 0)
    }
}

/// XADD 的 id 参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSpec {
    /// `*`
    Auto,
    /// `<ms>-*`
    AutoSequence(u64),
    /// `<ms>-<seq>`
    Explicit(StreamId),
}

impl FromStr for IdSpec {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "*" {
            return Ok(IdSpec::Auto);
        }
        if let Some(ms) = s.strip_suffix("-*") {
            let ms = ms.parse().map_err(|_| StreamError::InvalidId(s.to_string()))?;
            return Ok(IdSpec::AutoSequence(ms));
        }
        s.parse().map(IdSpec::Explicit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: StreamId,
    /// 保持插入顺序
    pub fields: Vec<(String, String)>,
}

/// XADD 被拒绝的原因；文本就是回给客户端的错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("ERR The ID specified in XADD must be greater than 0-0")]
    ZeroId,
    #[error("ERR The ID specified in XADD is equal or smaller than the target stream top item")]
    NotIncreasing,
    #[error("ERR Invalid stream ID specified as stream command argument")]
    InvalidId(String),
}

#[derive(Debug, Default)]
pub struct StreamStore {
    streams: HashMap<String, Vec<Entry>>,
}

impl StreamStore {
    pub fn new() -> Self {
        StreamStore::default()
    }

    /// 追加一条记录，返回分配的 id
    pub fn append(
        &mut self,
        key: &str,
        id_spec: &str,
        fields: Vec<(String, String)>,
    ) -> Result<StreamId, StreamError> {
        self.append_at(key, id_spec, fields, expire::now_ms())
    }

    fn append_at(
        &mut self,
        key: &str,
        id_spec: &str,
        fields: Vec<(String, String)>,
        now_ms: u64,
    ) -> Result<StreamId, StreamError> {
        let spec: IdSpec = id_spec.parse()?;
        let top = self.last_id(key);

        let id = match spec {
            // 时钟回拨或同一毫秒内多次写入时沿用栈顶的 millis
            IdSpec::Auto => match top {
                Some(top) if top.ms >= now_ms => StreamId::new(top.ms, top.seq.saturating_add(1)),
                _ => StreamId::new(now_ms, 0),
            },
            IdSpec::AutoSequence(ms) => self.next_sequence(key, ms),
            IdSpec::Explicit(id) => id,
        };

        if id == StreamId::ZERO {
            return Err(StreamError::ZeroId);
        }
        if let Some(top) = top {
            if id <= top {
                return Err(StreamError::NotIncreasing);
            }
        }

        self.streams
            .entry(key.to_string())
            .or_default()
            .push(Entry { id, fields });
        Ok(id)
    }

    fn next_sequence(&self, key: &str, ms: u64) -> StreamId {
        let entries = self.entries(key);
        if ms == 0 && entries.is_empty() {
            return StreamId::new(0, 1);
        }
        match entries.iter().rev().find(|e| e.id.ms == ms) {
            Some(e) => StreamId::new(ms, e.id.seq.saturating_add(1)),
            None => StreamId::new(ms, 0),
        }
    }

    /// 闭区间 [start, end]；`-` 最小，`+` 最大；不带 sequence 的 end 取该毫秒内最大值
    pub fn range(&self, key: &str, start: &str, end: &str) -> Result<Vec<Entry>, StreamError> {
        let start = match start {
            "-" => StreamId::ZERO,
            raw => StreamId::parse_with_default(raw, 0)?,
        };
        let end = match end {
            "+" => StreamId::MAX,
            raw => StreamId::parse_with_default(raw, u64::MAX)?,
        };
        Ok(self
            .entries(key)
            .iter()
            .filter(|e| e.id >= start && e.id <= end)
            .cloned()
            .collect())
    }

    /// 把 XREAD 的 id 参数解析成 StreamId；`$` 表示当前栈顶
    pub fn resolve_read_id(&self, key: &str, raw: &str) -> Result<StreamId, StreamError> {
        if raw == "$" {
            return Ok(self.last_id(key).unwrap_or(StreamId::ZERO));
        }
        raw.parse()
    }

    /// 每个 key 返回严格大于对应 id 的条目，保持请求顺序
    pub fn read_after(&self, requests: &[(String, StreamId)]) -> Vec<(String, Vec<Entry>)> {
        requests
            .iter()
            .map(|(key, after)| {
                let entries = self
                    .entries(key)
                    .iter()
                    .filter(|e| e.id > *after)
                    .cloned()
                    .collect();
                (key.clone(), entries)
            })
            .collect()
    }

    pub fn exists(&self, key: &str) -> bool {
        self.streams.contains_key(key)
    }

    pub fn last_id(&self, key: &str) -> Option<StreamId> {
        self.entries(key).last().map(|e| e.id)
    }

    fn entries(&self, key: &str) -> &[Entry] {
        self.streams.get(key).map(Vec::as_slice).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(entries: &[Entry]) -> Vec<String> {
        entries.iter().map(|e| e.id.to_string()).collect()
    }

    fn fields(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(f, v)| (f.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_explicit_ids_must_increase() {
        let mut s = StreamStore::new();
        assert_eq!(s.append("s", "5-5", vec![]), Ok(StreamId::new(5, 5)));
        assert_eq!(s.append("s", "5-5", vec![]), Err(StreamError::NotIncreasing));
        assert_eq!(s.append("s", "4-9", vec![]), Err(StreamError::NotIncreasing));
        assert_eq!(s.append("s", "5-6", vec![]), Ok(StreamId::new(5, 6)));
        // 更大的 millis 可以从更小的 sequence 开始
        assert_eq!(s.append("s", "6-0", vec![]), Ok(StreamId::new(6, 0)));
    }

    #[test]
    fn test_zero_id_rejected() {
        let mut s = StreamStore::new();
        let err = s.append("s", "0-0", vec![]).unwrap_err();
        assert_eq!(err, StreamError::ZeroId);
        assert!(err.to_string().contains("must be greater than 0-0"));
        assert!(!s.exists("s"));

        s.append("s", "1-1", vec![]).unwrap();
        assert_eq!(s.append("s", "0-0", vec![]), Err(StreamError::ZeroId));
    }

    #[test]
    fn test_auto_sequence() {
        let mut s = StreamStore::new();
        assert_eq!(s.append("s", "0-*", vec![]), Ok(StreamId::new(0, 1)));
        assert_eq!(s.append("s", "0-*", vec![]), Ok(StreamId::new(0, 2)));
        assert_eq!(s.append("s", "5-*", vec![]), Ok(StreamId::new(5, 0)));
        assert_eq!(s.append("s", "5-*", vec![]), Ok(StreamId::new(5, 1)));
        // 之前的条目都保留在同一个 stream 里
        assert_eq!(ids(&s.range("s", "-", "+").unwrap()), vec!["0-1", "0-2", "5-0", "5-1"]);
        assert_eq!(s.append("s", "3-*", vec![]), Err(StreamError::NotIncreasing));
    }

    #[test]
    fn test_full_auto_appends_to_existing_stream() {
        let mut s = StreamStore::new();
        s.append_at("s", "1-1", vec![], 1_000).unwrap();
        assert_eq!(s.append_at("s", "*", vec![], 1_000), Ok(StreamId::new(1_000, 0)));
        assert_eq!(s.append_at("s", "*", vec![], 1_000), Ok(StreamId::new(1_000, 1)));
        // 时钟回拨
        assert_eq!(s.append_at("s", "*", vec![], 900), Ok(StreamId::new(1_000, 2)));
        assert_eq!(s.append_at("s", "*", vec![], 2_000), Ok(StreamId::new(2_000, 0)));
        assert_eq!(s.range("s", "-", "+").unwrap().len(), 5);
    }

    #[test]
    fn test_invalid_id_spec() {
        let mut s = StreamStore::new();
        assert!(matches!(s.append("s", "abc", vec![]), Err(StreamError::InvalidId(_))));
        assert!(matches!(s.append("s", "1-x", vec![]), Err(StreamError::InvalidId(_))));
        assert!(matches!(s.append("s", "-1-1", vec![]), Err(StreamError::InvalidId(_))));
        // 只有 millis 视为 sequence 0
        assert_eq!(s.append("s", "7", vec![]), Ok(StreamId::new(7, 0)));
    }

    #[test]
    fn test_range_inclusive() {
        let mut s = StreamStore::new();
        s.append("s", "1-1", fields(&[("a", "1")])).unwrap();
        s.append("s", "1-2", fields(&[("b", "2")])).unwrap();
        s.append("s", "2-1", fields(&[("c", "3")])).unwrap();

        let r = s.range("s", "1-1", "1-2").unwrap();
        assert_eq!(ids(&r), vec!["1-1", "1-2"]);
        assert_eq!(r[1].fields, fields(&[("b", "2")]));

        assert_eq!(ids(&s.range("s", "-", "1-1").unwrap()), vec!["1-1"]);
        assert_eq!(ids(&s.range("s", "1-2", "+").unwrap()), vec!["1-2", "2-1"]);
        // 跨越多个 millis
        assert_eq!(ids(&s.range("s", "1-2", "2-1").unwrap()), vec!["1-2", "2-1"]);
        // 不带 sequence
        assert_eq!(ids(&s.range("s", "1", "1").unwrap()), vec!["1-1", "1-2"]);
        assert!(s.range("missing", "-", "+").unwrap().is_empty());
    }

    #[test]
    fn test_read_after_keeps_request_order() {
        let mut s = StreamStore::new();
        s.append("a", "1-1", fields(&[("x", "1")])).unwrap();
        s.append("a", "2-0", fields(&[("x", "2")])).unwrap();
        s.append("b", "3-3", fields(&[("y", "1")])).unwrap();

        let out = s.read_after(&[
            ("b".to_string(), StreamId::ZERO),
            ("a".to_string(), StreamId::new(1, 1)),
            ("c".to_string(), StreamId::ZERO),
        ]);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].0, "b");
        assert_eq!(ids(&out[0].1), vec!["3-3"]);
        assert_eq!(out[1].0, "a");
        // 2-0 的 sequence 更小，但整体 id 更大
        assert_eq!(ids(&out[1].1), vec!["2-0"]);
        assert!(out[2].1.is_empty());
    }

    #[test]
    fn test_resolve_dollar() {
        let mut s = StreamStore::new();
        assert_eq!(s.resolve_read_id("a", "$"), Ok(StreamId::ZERO));
        s.append("a", "4-2", vec![]).unwrap();
        assert_eq!(s.resolve_read_id("a", "$"), Ok(StreamId::new(4, 2)));
        assert_eq!(s.resolve_read_id("a", "1-0"), Ok(StreamId::new(1, 0)));
        assert!(s.resolve_read_id("a", "nope").is_err());
    }
}
