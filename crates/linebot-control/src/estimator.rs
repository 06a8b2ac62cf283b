//! # 位置估计
//!
//! 将归一化读数按权重加权平均，得到带符号的横向偏差：
//!
//! ```text
//! error = scale * Σ(w_i * n_i) / Σ|n_i|   （仅计入在线传感器）
//! ```
//!
//! 正值表示黑线在右侧，0 表示居中。没有任何传感器在线时（丢线）
//! 保持上一次的误差，保留最后已知方向，而不是输出"居中"。

use crate::error::ControlError;
use crate::sensor::SensorReading;
use linebot_config::Configuration;
use smallvec::SmallVec;

#[derive(Debug, Clone)]
pub struct PositionEstimator {
    weights: SmallVec<[f64; 8]>,
    active_threshold: f64,
    scale: f64,
    previous: f64,
    line_detected: bool,
}

impl PositionEstimator {
    pub fn from_config(config: &Configuration) -> Self {
        PositionEstimator {
            weights: SmallVec::from_slice(&config.sensor_weights),
            active_threshold: config.sensor_active_threshold,
            scale: config.position_scale,
            previous: 0.0,
            line_detected: false,
        }
    }

    /// 由读数计算位置误差
    ///
    /// 结果为 `position_scale * Σ(w·n) / Σ|n|`，只统计不低于 `sensor_active_threshold`
    /// 的读数，取值落在 [`bounds`](Self::bounds) 之内。`position_scale = 1` 时即原始加权平均。
    ///
    /// 读数长度与权重数量不一致时返回 `ConfigurationMismatch`。
    pub fn estimate(&mut self, reading: &SensorReading) -> Result<f64, ControlError> {
        let values = reading.values();
        if values.len() != self.weights.len() {
            return Err(ControlError::ConfigurationMismatch(format!(
                "{} sensor weights configured but reading has {} values",
                self.weights.len(),
                values.len()
            )));
        }

        let (weighted, total) = values
            .iter()
            .zip(&self.weights)
            .filter(|(n, _)| **n >= self.active_threshold)
            .fold((0.0, 0.0), |(weighted, total), (n, w)| (weighted + w * n, total + n.abs()));

        if total <= 0.0 {
            if self.line_detected {
                tracing::debug!("Line lost, holding last position {:.2}", self.previous);
            }
            self.line_detected = false;
            return Ok(self.previous);
        }

        let error = self.scale * weighted / total;
        self.previous = error;
        self.line_detected = true;
        Ok(error)
    }

    /// 最近一次成功估计的误差
    pub fn previous(&self) -> f64 {
        self.previous
    }

    /// 上一次估计时是否检测到黑线
    pub fn line_detected(&self) -> bool {
        self.line_detected
    }

    /// 位置误差的理论范围 `(min, max)`
    pub fn bounds(&self) -> (f64, f64) {
        let lo = self.weights.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = self.weights.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        (self.scale * lo, self.scale * hi)
    }

    pub fn reconfigure(&mut self, config: &Configuration) {
        self.weights = SmallVec::from_slice(&config.sensor_weights);
        self.active_threshold = config.sensor_active_threshold;
        self.scale = config.position_scale;
    }

    pub fn reset(&mut self) {
        self.previous = 0.0;
        self.line_detected = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> PositionEstimator {
        // 默认权重 [-3, -1.5, -0.8, 0.8, 1.5, 3]，scale = 100，阈值 15
        PositionEstimator::from_config(&Configuration::default())
    }

    #[test]
    fn test_centered_line() {
        let mut est = estimator();
        let r = SensorReading::from_normalized(&[0.0, 0.0, 80.0, 80.0, 0.0, 0.0]);
        assert!(est.estimate(&r).unwrap().abs() < 1e-9);
        assert!(est.line_detected());
    }

    #[test]
    fn test_line_to_the_right_is_positive() {
        let mut est = estimator();
        let r = SensorReading::from_normalized(&[0.0, 0.0, 0.0, 0.0, 100.0, 0.0]);
        assert!((est.estimate(&r).unwrap() - 150.0).abs() < 1e-9);

        let r = SensorReading::from_normalized(&[100.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert!((est.estimate(&r).unwrap() + 300.0).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_average() {
        let mut est = estimator();
        // (0.8*50 + 1.5*50) / 100 * 100 = 115
        let r = SensorReading::from_normalized(&[0.0, 0.0, 0.0, 50.0, 50.0, 0.0]);
        assert!((est.estimate(&r).unwrap() - 115.0).abs() < 1e-9);
    }

    #[test]
    fn test_inactive_sensors_ignored() {
        let mut est = estimator();
        // 10 < 15，最左侧传感器的噪声不参与计算
        let r = SensorReading::from_normalized(&[10.0, 0.0, 0.0, 0.0, 60.0, 0.0]);
        assert!((est.estimate(&r).unwrap() - 150.0).abs() < 1e-9);
    }

    #[test]
    fn test_line_loss_holds_previous() {
        let mut est = estimator();
        let r = SensorReading::from_normalized(&[0.0, 0.0, 0.0, 0.0, 0.0, 90.0]);
        let last = est.estimate(&r).unwrap();
        assert!((last - 300.0).abs() < 1e-9);

        let lost = SensorReading::from_normalized(&[0.0; 6]);
        assert_eq!(est.estimate(&lost).unwrap(), last);
        assert!(!est.line_detected());
        assert_eq!(est.previous(), last);
    }

    #[test]
    fn test_line_loss_before_any_detection_is_zero() {
        let mut est = estimator();
        let lost = SensorReading::from_normalized(&[0.0; 6]);
        assert_eq!(est.estimate(&lost).unwrap(), 0.0);
    }

    #[test]
    fn test_length_mismatch() {
        let mut est = estimator();
        let r = SensorReading::from_normalized(&[50.0; 5]);
        assert!(matches!(
            est.estimate(&r),
            Err(ControlError::ConfigurationMismatch(_))
        ));
        // 失败不影响已有状态
        assert_eq!(est.previous(), 0.0);
    }

    #[test]
    fn test_unit_scale_is_plain_weighted_mean() {
        let config = Configuration::default()
            .with_overrides([
                ("position_scale", linebot_config::ParamValue::Float(1.0)),
                ("sensor_active_threshold", linebot_config::ParamValue::Float(0.0)),
            ])
            .unwrap();
        let mut est = PositionEstimator::from_config(&config);
        let n = [10.0, 20.0, 30.0, 40.0, 50.0, 60.0];
        let w = [-3.0, -1.5, -0.8, 0.8, 1.5, 3.0];

        let expected: f64 = n.iter().zip(w).map(|(n, w)| w * n).sum::<f64>()
            / n.iter().map(|n: &f64| n.abs()).sum::<f64>();
        let error = est.estimate(&SensorReading::from_normalized(&n)).unwrap();
        assert!((error - expected).abs() < 1e-12);
        assert!((error - 203.0 / 210.0).abs() < 1e-12);
        assert_eq!(est.bounds(), (-3.0, 3.0));
    }

    #[test]
    fn test_bounds() {
        assert_eq!(estimator().bounds(), (-300.0, 300.0));
    }
}
