// src/replication/info.rs

use super::REPLICATION_ID;

/// 生成 INFO 所需信息的角色快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleInfo {
    Leader { offset: u64 },
    Follower,
}

/// INFO [section] 的内容，每个元素是一行。
/// 只有 replication 一个 section；未知 section 返回空。
pub fn build_info_response(section: Option<&str>, role: RoleInfo) -> Vec<String> {
    let wanted = section.map(|s| s.to_lowercase());
    match wanted.as_deref() {
        None | Some("replication") => {}
        Some(_) => return Vec::new(),
    }

    let mut lines = vec!["# Replication".to_string()];
    match role {
        RoleInfo::Leader { offset } => {
            lines.push("role:master".to_string());
            lines.push(format!("master_replid:{}", REPLICATION_ID));
            lines.push(format!("master_repl_offset:{}", offset));
        }
        RoleInfo::Follower => {
            lines.push("role:slave".to_string());
            lines.push("master_repl_offset:0".to_string());
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leader_info() {
        let lines = build_info_response(Some("Replication"), RoleInfo::Leader { offset: 31 });
        assert_eq!(
            lines,
            vec![
                "# Replication".to_string(),
                "role:master".to_string(),
                format!("master_replid:{}", REPLICATION_ID),
                "master_repl_offset:31".to_string(),
            ]
        );
    }

    #[test]
    fn test_follower_info() {
        let lines = build_info_response(None, RoleInfo::Follower);
        assert!(lines.contains(&"role:slave".to_string()));
        assert!(lines.contains(&"master_repl_offset:0".to_string()));
    }

    #[test]
    fn test_unknown_section_is_empty() {
        assert!(build_info_response(Some("memory"), RoleInfo::Follower).is_empty());
        assert!(build_info_response(Some("all"), RoleInfo::Leader { offset: 0 }).is_empty());
    }
}
