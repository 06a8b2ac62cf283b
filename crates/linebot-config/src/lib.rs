//! # linebot-config - 巡线机器人参数层
//!
//! 所有可调参数的唯一来源：参数表、类型化 `Configuration`、
//! 键值映射校验、TOML 持久化，以及用于热切换的 `ConfigHandle`。
//!
//! ## 包含模块
//!
//! - `params` - 参数表（键、分组、类型、范围、默认值）
//! - `configuration` - 类型化配置及其校验/持久化
//! - `handle` - 基于 `ArcSwap` 的原子配置替换
//! - `error` - 配置错误类型
//!
//! ## 使用示例
//!
//! ```rust
//! use linebot_config::{Configuration, ParamValue};
//!
//! let mut map = Configuration::default().to_map();
//! map.insert("kp".to_string(), ParamValue::Float(2.5));
//!
//! let config = Configuration::from_map(&map).unwrap();
//! assert_eq!(config.kp, 2.5);
//! ```

pub mod configuration;
pub mod error;
pub mod handle;
pub mod params;

// 重新导出常用类型
pub use configuration::Configuration;
pub use error::{ConfigError, ParamIssue};
pub use handle::ConfigHandle;
pub use params::{PARAMS, ParamGroup, ParamKind, ParamSpec, ParamValue};
