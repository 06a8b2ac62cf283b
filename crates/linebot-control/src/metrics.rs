//! 控制循环运行指标
//!
//! 原子计数器，控制线程写入，任意线程读取快照，不引入锁竞争。

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// 控制循环实时指标
///
/// # 使用示例
///
/// ```rust
/// use linebot_control::LoopMetrics;
/// use std::sync::Arc;
/// use std::sync::atomic::Ordering;
///
/// let metrics = Arc::new(LoopMetrics::default());
/// metrics.cycles.fetch_add(1, Ordering::Relaxed);
///
/// let snapshot = metrics.snapshot();
/// assert_eq!(snapshot.cycles, 1);
/// ```
#[derive(Debug, Default)]
pub struct LoopMetrics {
    /// 执行的周期总数（含跳过的周期）
    pub cycles: AtomicU64,

    /// 因瞬态错误跳过的周期数
    pub skipped_cycles: AtomicU64,

    /// 超出控制周期的次数
    ///
    /// 持续增长说明控制周期设置过短，或者运行环境负载过高。
    pub overruns: AtomicU64,

    /// 在周期边界生效的配置替换次数
    pub config_reloads: AtomicU64,

    /// 完成的圈数
    pub laps: AtomicU64,

    /// 速度状态转换次数
    pub state_transitions: AtomicU64,
}

impl LoopMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 读取所有计数器（`Ordering::Relaxed`，计数器之间可能有微小时间差）
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            skipped_cycles: self.skipped_cycles.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            config_reloads: self.config_reloads.load(Ordering::Relaxed),
            laps: self.laps.load(Ordering::Relaxed),
            state_transitions: self.state_transitions.load(Ordering::Relaxed),
        }
    }

    /// 重置所有计数器
    pub fn reset(&self) {
        self.cycles.store(0, Ordering::Relaxed);
        self.skipped_cycles.store(0, Ordering::Relaxed);
        self.overruns.store(0, Ordering::Relaxed);
        self.config_reloads.store(0, Ordering::Relaxed);
        self.laps.store(0, Ordering::Relaxed);
        self.state_transitions.store(0, Ordering::Relaxed);
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MetricsSnapshot {
    pub cycles: u64,
    pub skipped_cycles: u64,
    pub overruns: u64,
    pub config_reloads: u64,
    pub laps: u64,
    pub state_transitions: u64,
}

impl MetricsSnapshot {
    /// 跳过周期占比（百分比），`cycles` 为 0 时返回 0.0
    pub fn skip_rate(&self) -> f64 {
        if self.cycles == 0 {
            return 0.0;
        }
        (self.skipped_cycles as f64 / self.cycles as f64) * 100.0
    }

    /// 超时周期占比（百分比），`cycles` 为 0 时返回 0.0
    pub fn overrun_rate(&self) -> f64 {
        if self.cycles == 0 {
            return 0.0;
        }
        (self.overruns as f64 / self.cycles as f64) * 100.0
    }
}
