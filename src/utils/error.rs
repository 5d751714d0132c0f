/*!
 * 错误处理模块
 *
 * 基于 anyhow 的统一错误处理系统。服务层统一使用 AppResult，
 * 通过 context 提供丰富的错误信息；需要类型化错误分类的边界
 * （embedding客户端、HTTP接口层）各自定义 thiserror 枚举。
 */

use anyhow::{anyhow, Result as AnyhowResult};

/// 统一的应用程序结果类型
pub type AppResult<T> = AnyhowResult<T>;

/// 统一的应用程序错误类型
pub type AppError = anyhow::Error;

/// 创建简单的应用程序错误
pub fn app_error(msg: impl Into<String>) -> AppError {
    anyhow!(msg.into())
}

/// 参数验证器
pub struct Validator;

impl Validator {
    /// 验证字符串不为空
    pub fn validate_not_empty(value: &str, name: &str) -> Result<(), String> {
        if value.trim().is_empty() {
            Err(format!("{}不能为空", name))
        } else {
            Ok(())
        }
    }

    /// 验证GMID格式（32位十六进制）
    pub fn validate_gmid(value: &str) -> Result<(), String> {
        if value.len() == 32 && value.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(())
        } else {
            Err(format!("无效的媒体ID: {}", value))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_gmid() {
        assert!(Validator::validate_gmid("0123456789abcdef0123456789abcdef").is_ok());
        assert!(Validator::validate_gmid("0123").is_err());
        assert!(Validator::validate_gmid("zzzz456789abcdef0123456789abcdef").is_err());
    }
}
