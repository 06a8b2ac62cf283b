//! # 电机混合
//!
//! 基础速度与 PD 修正量合成左右轮指令：
//!
//! ```text
//! left  = clamp(base - correction, 0, max)
//! right = clamp(base + correction, 0, max)
//! ```
//!
//! 正误差表示黑线在右侧，修正量为正，右轮加速、左轮减速。
//! 饱和是预期的边界情况，静默截断，不返回错误。

use crate::speed::SpeedProfile;
use linebot_config::Configuration;
use serde::Serialize;

/// 左右电机指令
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct MotorCommand {
    pub left: i16,
    pub right: i16,
}

impl MotorCommand {
    /// 双轮停止
    pub const STOP: MotorCommand = MotorCommand { left: 0, right: 0 };

    pub fn new(left: i16, right: i16) -> Self {
        MotorCommand { left, right }
    }
}

/// 以 0..=255 输出范围混合
pub fn mix(base_speed: f64, correction: f64) -> MotorCommand {
    mix_within(base_speed, correction, 255.0)
}

/// 以 0..=`output_max` 输出范围混合
pub fn mix_within(base_speed: f64, correction: f64, output_max: f64) -> MotorCommand {
    let clamp = |v: f64| -> i16 {
        if v.is_nan() {
            return 0;
        }
        v.clamp(0.0, output_max).round() as i16
    };

    MotorCommand {
        left: clamp(base_speed - correction),
        right: clamp(base_speed + correction),
    }
}

/// 带速度斜坡的电机混合器
///
/// 基础速度每周期最多变化 `accel_step`（加速）或 `brake_step`（减速），
/// 超过 `high_speed_threshold` 时修正量按 `high_speed_correction_scale` 缩小。
#[derive(Debug, Clone)]
pub struct MotorMixer {
    current_base: f64,
    high_speed_threshold: f64,
    high_speed_scale: f64,
    output_max: f64,
}

impl MotorMixer {
    pub fn from_config(config: &Configuration) -> Self {
        MotorMixer {
            current_base: 0.0,
            high_speed_threshold: f64::from(config.high_speed_threshold),
            high_speed_scale: config.high_speed_correction_scale,
            output_max: f64::from(config.motor_output_max),
        }
    }

    /// 将基础速度向目标推进一步，返回新的基础速度
    pub fn ramp(&mut self, profile: &SpeedProfile) -> f64 {
        let target = profile.base_speed.clamp(0.0, self.output_max);
        self.current_base = if self.current_base < target {
            (self.current_base + profile.accel_step).min(target)
        } else {
            (self.current_base - profile.brake_step).max(target)
        };
        self.current_base
    }

    /// 斜坡 + 高速修正缩放 + 混合
    pub fn drive(&mut self, profile: &SpeedProfile, correction: f64) -> MotorCommand {
        let base = self.ramp(profile);
        let correction = if base > self.high_speed_threshold {
            correction * self.high_speed_scale
        } else {
            correction
        };
        mix_within(base, correction, self.output_max)
    }

    /// 当前（已斜坡处理的）基础速度
    pub fn current_base(&self) -> f64 {
        self.current_base
    }

    /// 更新参数，保留当前基础速度
    pub fn reconfigure(&mut self, config: &Configuration) {
        let base = self.current_base;
        *self = Self::from_config(config);
        self.current_base = base.min(self.output_max);
    }

    pub fn reset(&mut self) {
        self.current_base = 0.0;
    }
}
