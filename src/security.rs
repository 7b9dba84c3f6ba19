//! # 凭据校验模块
//!
//! 登录处理依赖的身份校验能力。核心只关心"用户名加口令是否匹配"，
//! 口令的存储与散列方案由 [`CredentialVerifier`] 的实现决定。
//!
//! 用户不存在与口令错误合并为同一种校验失败，客户端无法区分两者；
//! 需要区分时只在服务端日志中体现，绝不泄露给响应。

use std::collections::HashMap;
use std::path::Path;

use log::warn;

use crate::exception::HttpException;

/// 身份校验能力。用户名在调用前统一转为小写。
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, user: &str, password: &str) -> bool;
}

/// 基于凭据文件的校验器。
///
/// 文件为 CSV 格式，首行是列头，之后每行 `user,password`；
/// 用户名按小写存储。
#[derive(Debug, Default)]
pub struct PasswordStore {
    entries: HashMap<String, String>,
}

impl PasswordStore {
    /// 解析 CSV 文本。格式不完整的行记录警告后跳过。
    pub fn from_csv(text: &str) -> Self {
        let mut entries = HashMap::new();
        for line in text.lines().skip(1) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match line.split_once(',') {
                Some((user, password)) => {
                    entries.insert(user.trim().to_lowercase(), password.trim().to_string());
                }
                None => warn!("skipping malformed credential line"),
            }
        }
        PasswordStore { entries }
    }

    /// 从磁盘加载凭据文件。
    pub fn load(path: &Path) -> Result<Self, HttpException> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| HttpException::server("failed to read the credentials file", e))?;
        Ok(Self::from_csv(&text))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CredentialVerifier for PasswordStore {
    /// 用户不存在与口令不匹配返回同一个 `false`。
    fn verify(&self, user: &str, password: &str) -> bool {
        match self.entries.get(&user.to_lowercase()) {
            Some(stored) => stored == password,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "user,password\nalice,wonderland\nBob,builder\n";

    #[test]
    fn test_verify_success() {
        let store = PasswordStore::from_csv(CSV);
        assert!(store.verify("alice", "wonderland"));
    }

    /// 用户名大小写不敏感
    #[test]
    fn test_verify_case_insensitive_user() {
        let store = PasswordStore::from_csv(CSV);
        assert!(store.verify("BOB", "builder"));
        assert!(store.verify("bob", "builder"));
    }

    /// 用户不存在与口令错误是同一种失败
    #[test]
    fn test_verify_failures_merged() {
        let store = PasswordStore::from_csv(CSV);
        assert!(!store.verify("alice", "wrong"));
        assert!(!store.verify("nobody", "wonderland"));
    }

    /// 首行列头与空行被跳过
    #[test]
    fn test_header_and_blank_lines_skipped() {
        let store = PasswordStore::from_csv("user,password\n\nalice,pw\n");
        assert_eq!(store.len(), 1);
        assert!(!store.verify("user", "password"));
    }

    /// 格式不完整的行被跳过，不影响其余条目
    #[test]
    fn test_malformed_line_skipped() {
        let store = PasswordStore::from_csv("user,password\ngarbage\nalice,pw\n");
        assert_eq!(store.len(), 1);
        assert!(store.verify("alice", "pw"));
    }
}
