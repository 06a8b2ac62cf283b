//! 配置层错误类型定义

use crate::params::ParamKind;
use std::fmt;
use thiserror::Error;

/// 单个参数的校验问题
#[derive(Debug, Clone, PartialEq)]
pub enum ParamIssue {
    /// 缺少必需参数
    Missing { key: String },

    /// 数值类型不匹配（如整数参数给了浮点数）
    WrongKind { key: String, expected: ParamKind },

    /// 超出允许范围
    OutOfRange {
        key: String,
        value: f64,
        min: f64,
        max: f64,
    },

    /// 跨字段约束不满足
    Inconsistent { keys: String, reason: String },
}

impl ParamIssue {
    /// 涉及的参数名
    pub fn key(&self) -> &str {
        match self {
            ParamIssue::Missing { key }
            | ParamIssue::WrongKind { key, .. }
            | ParamIssue::OutOfRange { key, .. } => key,
            ParamIssue::Inconsistent { keys, .. } => keys,
        }
    }
}

impl fmt::Display for ParamIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamIssue::Missing { key } => write!(f, "{key}: missing"),
            ParamIssue::WrongKind { key, expected } => {
                write!(f, "{key}: expected {expected} value")
            },
            ParamIssue::OutOfRange {
                key,
                value,
                min,
                max,
            } => write!(f, "{key}: {value} outside [{min}, {max}]"),
            ParamIssue::Inconsistent { keys, reason } => write!(f, "{keys}: {reason}"),
        }
    }
}

/// 配置层错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 参数缺失、类型错误或越界（一次性列出全部问题）
    #[error("Configuration mismatch: {}", format_issues(.0))]
    Mismatch(Vec<ParamIssue>),

    /// 配置文件读写错误
    #[error("Config file IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML 解析错误
    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML 序列化错误
    #[error("Config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl ConfigError {
    /// 返回校验问题列表（非校验错误返回空切片）
    pub fn issues(&self) -> &[ParamIssue] {
        match self {
            ConfigError::Mismatch(issues) => issues,
            _ => &[],
        }
    }
}

fn format_issues(issues: &[ParamIssue]) -> String {
    issues.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mismatch_display_lists_every_issue() {
        let err = ConfigError::Mismatch(vec![
            ParamIssue::Missing {
                key: "kp".to_string(),
            },
            ParamIssue::OutOfRange {
                key: "speed_cruise".to_string(),
                value: 300.0,
                min: 0.0,
                max: 255.0,
            },
        ]);
        let msg = format!("{}", err);
        assert!(msg.contains("kp: missing"), "message: {}", msg);
        assert!(msg.contains("speed_cruise: 300 outside [0, 255]"), "message: {}", msg);
        assert_eq!(err.issues().len(), 2);
    }

    #[test]
    fn test_wrong_kind_display() {
        let issue = ParamIssue::WrongKind {
            key: "sensor_count".to_string(),
            expected: ParamKind::Integer,
        };
        assert_eq!(issue.to_string(), "sensor_count: expected integer value");
        assert_eq!(issue.key(), "sensor_count");
    }

    #[test]
    fn test_io_error_has_no_issues() {
        let err = ConfigError::Io(std::io::Error::other("disk"));
        assert!(err.issues().is_empty());
        assert!(err.to_string().contains("disk"));
    }
}
