// src/protocol/encoder.rs
//! 回复编码，leader 与 follower 共用
//!
//! 所有长度都是字节长度。

/// +<text>\r\n
pub fn simple_string(text: &str) -> String {
    format!("+{}\r\n", text)
}

/// -<text>\r\n
pub fn error(text: &str) -> String {
    format!("-{}\r\n", text)
}

/// $<len>\r\n<text>\r\n
pub fn bulk_string(text: &str) -> String {
    format!("${}\r\n{}\r\n", text.len(), text)
}

/// $-1\r\n
pub fn nil_bulk_string() -> String {
    "$-1\r\n".to_string()
}

pub fn optional_bulk_string(value: Option<&str>) -> String {
    value.map(bulk_string).unwrap_or_else(nil_bulk_string)
}

/// 多行负载（INFO）：每行带 CRLF，长度为所有行加 CRLF 的总和，末尾再追加一个 CRLF
pub fn bulk_lines<S: AsRef<str>>(lines: &[S]) -> String {
    let data: String = lines
        .iter()
        .map(|line| format!("{}\r\n", line.as_ref()))
        .collect();
    format!("${}\r\n{}\r\n", data.len(), data)
}

/// *<n>\r\n 后跟 n 个 bulk string
pub fn array<S: AsRef<str>>(items: &[S]) -> String {
    let mut out = format!("*{}\r\n", items.len());
    for item in items {
        out.push_str(&bulk_string(item.as_ref()));
    }
    out
}

/// *<n>\r\n 后跟 n 个已经编码好的元素（嵌套数组）
pub fn nested_array<S: AsRef<str>>(encoded: &[S]) -> String {
    let mut out = format!("*{}\r\n", encoded.len());
    for item in encoded {
        out.push_str(item.as_ref());
    }
    out
}

/// *-1\r\n
pub fn null_array() -> String {
    "*-1\r\n".to_string()
}

/// :<value>\r\n
pub fn integer(value: i64) -> String {
    format!(":{}\r\n", value)
}

/// $<len>\r\n<raw bytes>，没有结尾 CRLF（全量同步的快照）
pub fn raw_payload(payload: &[u8]) -> Vec<u8> {
    let mut out = format!("${}\r\n", payload.len()).into_bytes();
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars() {
        assert_eq!(simple_string("PONG"), "+PONG\r\n");
        assert_eq!(error("ERR boom"), "-ERR boom\r\n");
        assert_eq!(integer(2), ":2\r\n");
        assert_eq!(integer(-7), ":-7\r\n");
    }

    #[test]
    fn test_bulk_strings() {
        assert_eq!(bulk_string("hey"), "$3\r\nhey\r\n");
        assert_eq!(bulk_string(""), "$0\r\n\r\n");
        assert_eq!(optional_bulk_string(None), "$-1\r\n");
        assert_eq!(optional_bulk_string(Some("v")), "$1\r\nv\r\n");
        // 字节长度，而不是字符数
        assert_eq!(bulk_string("é"), "$2\r\né\r\n");
    }

    #[test]
    fn test_bulk_lines() {
        assert_eq!(
            bulk_lines(&["role:master", "x:1"]),
            "$18\r\nrole:master\r\nx:1\r\n\r\n"
        );
    }

    #[test]
    fn test_arrays() {
        assert_eq!(array(&["PING"]), "*1\r\n$4\r\nPING\r\n");
        assert_eq!(array::<&str>(&[]), "*0\r\n");
        assert_eq!(
            nested_array(&[bulk_string("1-1"), array(&["a", "b"])]),
            "*2\r\n$3\r\n1-1\r\n*2\r\n$1\r\na\r\n$1\r\nb\r\n"
        );
        assert_eq!(null_array(), "*-1\r\n");
    }

    #[test]
    fn test_raw_payload_has_no_trailing_crlf() {
        assert_eq!(raw_payload(b"ab"), b"$2\r\nab".to_vec());
    }
}
