//! 控制核心错误类型定义

use linebot_config::ConfigError;
use thiserror::Error;

/// 控制核心错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControlError {
    /// 配置与硬件/组件不一致（致命，启动期或配置替换时）
    #[error("Configuration mismatch: {0}")]
    ConfigurationMismatch(String),

    /// 传感器返回的读数数量与配置不符（瞬态，单周期）
    #[error("Sensor count mismatch: expected {expected}, got {actual}")]
    SensorCountMismatch { expected: usize, actual: usize },

    /// 传感器读取失败（瞬态，单周期）
    #[error("Sensor fault: {0}")]
    SensorFault(String),

    /// 时间步长非正（调用方错误）
    #[error("Invalid timestep: {0} s (must be > 0)")]
    InvalidTimestep(f64),

    /// 连续跳过周期过多，失效保护停机
    #[error("Too many consecutive skipped cycles: {skipped}")]
    TooManySkippedCycles { skipped: u32 },

    /// 控制循环已停机
    #[error("Control loop halted")]
    Halted,
}

impl ControlError {
    /// 是否为可跳过的单周期错误
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ControlError::SensorCountMismatch { .. }
                | ControlError::SensorFault(_)
                | ControlError::InvalidTimestep(_)
        )
    }
}

impl From<ConfigError> for ControlError {
    fn from(e: ConfigError) -> Self {
        let text = e.to_string();
        // 避免 "Configuration mismatch" 前缀重复
        let detail = match e {
            ConfigError::Mismatch(_) => {
                text.strip_prefix("Configuration mismatch: ").unwrap_or(&text)
            },
            _ => &text,
        };
        ControlError::ConfigurationMismatch(detail.to_string())
    }
}
