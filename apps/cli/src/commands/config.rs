//! 配置管理命令
//!
//! 生成、校验、查看控制参数文件。

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use linebot_config::{ConfigError, Configuration, ParamGroup, ParamKind};
use std::path::{Path, PathBuf};

/// 默认配置文件路径：`<config_dir>/linebot/config.toml`
pub fn default_config_path() -> Result<PathBuf> {
    let mut path = dirs::config_dir().context("Unable to determine config directory")?;
    path.push("linebot");
    path.push("config.toml");
    Ok(path)
}

/// 解析配置来源
///
/// 显式路径优先；否则使用默认路径（若存在）；再否则使用内置默认值。
pub fn resolve_config(path: Option<&Path>) -> Result<(Configuration, String)> {
    if let Some(path) = path {
        let config = Configuration::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
        return Ok((config, path.display().to_string()));
    }

    if let Ok(default) = default_config_path()
        && default.exists()
    {
        let config = Configuration::load(&default)
            .with_context(|| format!("Failed to load configuration from {}", default.display()))?;
        return Ok((config, default.display().to_string()));
    }

    Ok((Configuration::default(), "built-in defaults".to_string()))
}

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 输出默认配置
    Defaults {
        /// 写入文件而不是标准输出
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// 校验配置文件，列出全部问题
    Check {
        /// 配置文件路径
        path: PathBuf,
    },

    /// 按分组显示参数
    Show {
        /// 配置文件路径（缺省时使用默认位置或内置默认值）
        path: Option<PathBuf>,

        /// 以 JSON 输出
        #[arg(long)]
        json: bool,
    },

    /// 显示默认配置文件路径
    Path,
}

impl ConfigCommand {
    pub fn execute(self) -> Result<()> {
        match self {
            ConfigCommand::Defaults { output } => Self::defaults_(output.as_deref()),
            ConfigCommand::Check { path } => Self::check_(&path),
            ConfigCommand::Show { path, json } => Self::show_(path.as_deref(), json),
            ConfigCommand::Path => {
                println!("{}", default_config_path()?.display());
                Ok(())
            },
        }
    }

    fn defaults_(output: Option<&Path>) -> Result<()> {
        let config = Configuration::default();

        match output {
            Some(path) => {
                if let Some(parent) = path.parent()
                    && !parent.as_os_str().is_empty()
                {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("Failed to create {}", parent.display()))?;
                }
                config
                    .save(path)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("✅ Default configuration written to {}", path.display());
            },
            None => print!("{}", config.to_toml_string()?),
        }

        Ok(())
    }

    fn check_(path: &Path) -> Result<()> {
        match Configuration::load(path) {
            Ok(config) => {
                println!(
                    "✅ {}: valid ({} parameters, {} sensors)",
                    path.display(),
                    config.params().len(),
                    config.sensor_count()
                );
                Ok(())
            },
            Err(ConfigError::Mismatch(issues)) => {
                println!("❌ {}: {} issue(s)", path.display(), issues.len());
                for issue in &issues {
                    println!("  - {}", issue);
                }
                bail!("configuration check failed with {} issue(s)", issues.len())
            },
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    fn show_(path: Option<&Path>, json: bool) -> Result<()> {
        let (config, source) = resolve_config(path)?;

        if json {
            println!("{}", serde_json::to_string_pretty(&config)?);
            return Ok(());
        }

        println!("Configuration ({})", source);
        let entries = config.params();
        for group in ParamGroup::ALL {
            let mut rows = entries.iter().filter(|e| e.spec.group == group).peekable();
            if rows.peek().is_none() {
                continue;
            }

            println!();
            println!("[{}]", group.title());
            for entry in rows {
                let spec = &entry.spec;
                let open = if spec.min_exclusive { "(" } else { "[" };
                let range = match spec.kind {
                    ParamKind::Integer => format!("{}{}, {}]", open, spec.min, spec.max),
                    ParamKind::Float => format!("{}{:.3}, {:.3}]", open, spec.min, spec.max),
                };
                println!("  {:<30} {:>10}  {}", entry.key, entry.value.to_string(), range);
            }
        }

        Ok(())
    }
}
