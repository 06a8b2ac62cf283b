//! PD Controller - 带误差平滑的比例-微分控制器
//!
//! # 算法
//!
//! ```text
//! filtered = α * e + (1 - α) * filtered_prev
//! deriv    = (filtered - filtered_prev) / dt
//! output   = clamp(Kp * filtered + Kd * deriv, -limit, +limit)
//! ```
//!
//! 其中：
//! - `e` = 位置误差（正值表示黑线在右侧）
//! - `α` = 滤波系数，范围 `(0, 1]`；`α = 1` 时退化为无平滑的 PD 控制
//! - `limit` = 电机输出上限
//!
//! # 特性
//!
//! - **无积分项**: 巡线场景只需要 P 和 D
//! - **失败不改状态**: `dt <= 0` 返回 `InvalidTimestep`，`filtered_prev` 保持不变，
//!   跳过或迟到的周期不会污染微分项
//!
//! # 示例
//!
//! ```rust
//! use linebot_control::PidController;
//!
//! let mut pid = PidController::default()
//!     .with_gains(2.0, 0.05)
//!     .with_filter(0.8)
//!     .with_output_limit(255.0);
//!
//! let correction = pid.correct(30.0, 0.002).unwrap();
//! assert!(correction > 0.0);
//! ```

use crate::error::ControlError;
use linebot_config::Configuration;

/// PD 控制参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PdGains {
    /// 比例增益 (Kp)
    pub kp: f64,

    /// 微分增益 (Kd)
    pub kd: f64,

    /// 误差平滑系数 (α)
    pub alpha: f64,

    /// 输出绝对值上限
    pub output_limit: f64,
}

impl PdGains {
    pub fn from_config(config: &Configuration) -> Self {
        PdGains {
            kp: config.kp,
            kd: config.kd,
            alpha: config.filter_coefficient,
            output_limit: f64::from(config.motor_output_max),
        }
    }
}

impl Default for PdGains {
    fn default() -> Self {
        PdGains {
            kp: 0.0,
            kd: 0.0,
            alpha: 1.0,
            output_limit: 255.0,
        }
    }
}

/// PD 控制器
///
/// 状态只有上一周期的平滑误差，启动时为 0。
#[derive(Debug, Clone, Default)]
pub struct PidController {
    gains: PdGains,

    /// 上一周期的平滑误差
    filtered_prev: f64,
}

impl PidController {
    pub fn new(gains: PdGains) -> Self {
        PidController {
            gains,
            filtered_prev: 0.0,
        }
    }

    pub fn from_config(config: &Configuration) -> Self {
        Self::new(PdGains::from_config(config))
    }

    /// 设置比例/微分增益
    pub fn with_gains(mut self, kp: f64, kd: f64) -> Self {
        self.gains.kp = kp;
        self.gains.kd = kd;
        self
    }

    /// 设置平滑系数
    pub fn with_filter(mut self, alpha: f64) -> Self {
        self.gains.alpha = alpha;
        self
    }

    /// 设置输出上限
    pub fn with_output_limit(mut self, limit: f64) -> Self {
        self.gains.output_limit = limit;
        self
    }

    /// 计算一步修正量
    ///
    /// # 参数
    ///
    /// - `error`: 位置误差
    /// - `dt`: 时间步长（秒），必须大于 0
    pub fn correct(&mut self, error: f64, dt: f64) -> Result<f64, ControlError> {
        // 同时拦截 NaN
        if !(dt > 0.0) {
            tracing::warn!("PD controller received non-positive dt: {} s", dt);
            return Err(ControlError::InvalidTimestep(dt));
        }

        let PdGains {
            kp,
            kd,
            alpha,
            output_limit,
        } = self.gains;

        let filtered = alpha * error + (1.0 - alpha) * self.filtered_prev;
        let deriv = (filtered - self.filtered_prev) / dt;
        let output = (kp * filtered + kd * deriv).clamp(-output_limit, output_limit);

        self.filtered_prev = filtered;
        Ok(output)
    }

    /// 上一周期的平滑误差
    pub fn filtered(&self) -> f64 {
        self.filtered_prev
    }

    pub fn gains(&self) -> PdGains {
        self.gains
    }

    /// 更新参数，保留平滑状态
    pub fn reconfigure(&mut self, gains: PdGains) {
        self.gains = gains;
    }

    pub fn reset(&mut self) {
        self.filtered_prev = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pd_new() {
        let pid = PidController::default();
        assert_eq!(pid.gains(), PdGains::default());
        assert_eq!(pid.filtered(), 0.0);
    }

    #[test]
    fn test_pd_builder() {
        let pid = PidController::default()
            .with_gains(7.5, 0.9)
            .with_filter(0.8)
            .with_output_limit(200.0);

        let gains = pid.gains();
        assert_eq!(gains.kp, 7.5);
        assert_eq!(gains.kd, 0.9);
        assert_eq!(gains.alpha, 0.8);
        assert_eq!(gains.output_limit, 200.0);
    }

    #[test]
    fn test_from_config() {
        let config = Configuration::default();
        let gains = PdGains::from_config(&config);
        assert_eq!(gains.kp, config.kp);
        assert_eq!(gains.kd, config.kd);
        assert_eq!(gains.alpha, config.filter_coefficient);
        assert_eq!(gains.output_limit, 255.0);
    }

    #[test]
    fn test_proportional_only() {
        let mut pid = PidController::default().with_gains(2.0, 0.0);
        let out = pid.correct(10.0, 0.01).unwrap();
        assert!((out - 20.0).abs() < 1e-10);
    }

    #[test]
    fn test_unsmoothed_matches_direct_formula() {
        let (kp, kd, dt) = (1.5, 0.02, 0.002);
        let mut pid = PidController::default().with_gains(kp, kd).with_filter(1.0);

        let errors = [0.0, 12.0, 30.0, 25.0, -40.0, -40.0, 5.0];
        let mut prev = 0.0;
        for e in errors {
            let expected = (kp * e + kd * (e - prev) / dt).clamp(-255.0, 255.0);
            let out = pid.correct(e, dt).unwrap();
            assert!((out - expected).abs() < 1e-9, "e={}: {} vs {}", e, out, expected);
            prev = e;
        }
    }

    #[test]
    fn test_smoothing() {
        let mut pid = PidController::default().with_gains(1.0, 0.0).with_filter(0.5);

        // filtered = 0.5 * 100 + 0.5 * 0 = 50
        assert!((pid.correct(100.0, 0.01).unwrap() - 50.0).abs() < 1e-10);
        // filtered = 0.5 * 100 + 0.5 * 50 = 75
        assert!((pid.correct(100.0, 0.01).unwrap() - 75.0).abs() < 1e-10);
        assert!((pid.filtered() - 75.0).abs() < 1e-10);
    }

    #[test]
    fn test_derivative_uses_smoothed_error() {
        let mut pid = PidController::default().with_gains(0.0, 1.0).with_filter(0.5);

        // filtered 0 → 5，deriv = 5 / 0.1 = 50
        let out = pid.correct(10.0, 0.1).unwrap();
        assert!((out - 50.0).abs() < 1e-10);
    }

    #[test]
    fn test_output_clamping() {
        let mut pid = PidController::default().with_gains(100.0, 0.0).with_output_limit(255.0);
        assert_eq!(pid.correct(300.0, 0.01).unwrap(), 255.0);
        assert_eq!(pid.correct(-300.0, 0.01).unwrap(), -255.0);
    }

    #[test]
    fn test_invalid_dt_leaves_state_unchanged() {
        let mut pid = PidController::default().with_gains(1.0, 1.0).with_filter(0.8);
        pid.correct(20.0, 0.01).unwrap();
        let before = pid.filtered();

        for dt in [0.0, -0.01, f64::NAN] {
            let err = pid.correct(50.0, dt).unwrap_err();
            assert!(matches!(err, ControlError::InvalidTimestep(_)));
            assert_eq!(pid.filtered(), before);
        }
    }

    #[test]
    fn test_reconfigure_keeps_state() {
        let mut pid = PidController::default().with_gains(1.0, 0.0).with_filter(1.0);
        pid.correct(40.0, 0.01).unwrap();

        pid.reconfigure(PdGains {
            kp: 2.0,
            ..pid.gains()
        });
        assert_eq!(pid.filtered(), 40.0);
        assert_eq!(pid.gains().kp, 2.0);
    }

    #[test]
    fn test_reset() {
        let mut pid = PidController::default().with_gains(1.0, 1.0);
        pid.correct(10.0, 0.01).unwrap();
        assert!(pid.filtered() != 0.0);

        pid.reset();
        assert_eq!(pid.filtered(), 0.0);
    }
}
