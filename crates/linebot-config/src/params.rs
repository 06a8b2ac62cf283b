//! # 参数表
//!
//! 每个可调参数一行：键、分组、数值类型、允许范围、默认值。
//! 传感器权重按 `sensor_count` 动态展开为 `sensor_weight_1..=N`，
//! 单独由 [`WEIGHT_SPEC`] 描述。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 参数数值类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    /// 整数
    Integer,
    /// 浮点数
    Float,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKind::Integer => write!(f, "integer"),
            ParamKind::Float => write!(f, "float"),
        }
    }
}

/// 参数分组（用于展示）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ParamGroup {
    Speed,
    Control,
    Sensor,
    Timing,
    Loop,
}

impl ParamGroup {
    pub const ALL: [ParamGroup; 5] = [
        ParamGroup::Speed,
        ParamGroup::Control,
        ParamGroup::Sensor,
        ParamGroup::Timing,
        ParamGroup::Loop,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            ParamGroup::Speed => "Speed Parameters",
            ParamGroup::Control => "Control Parameters",
            ParamGroup::Sensor => "Sensor Parameters",
            ParamGroup::Timing => "Timing Parameters",
            ParamGroup::Loop => "Loop Parameters",
        }
    }
}

/// 参数值
///
/// 保留原始数值类型，便于在构造时区分整数与浮点数。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
}

impl ParamValue {
    pub fn kind(&self) -> ParamKind {
        match self {
            ParamValue::Int(_) => ParamKind::Integer,
            ParamValue::Float(_) => ParamKind::Float,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            ParamValue::Int(v) => v as f64,
            ParamValue::Float(v) => v,
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v:.3}"),
        }
    }
}

/// 单个参数的描述
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    pub key: &'static str,
    pub group: ParamGroup,
    pub kind: ParamKind,
    pub min: f64,
    pub max: f64,
    /// 下界是否为开区间（如滤波系数 `(0, 1]`）
    pub min_exclusive: bool,
    pub default: f64,
}

impl ParamSpec {
    const fn int(key: &'static str, group: ParamGroup, min: f64, max: f64, default: f64) -> Self {
        ParamSpec {
            key,
            group,
            kind: ParamKind::Integer,
            min,
            max,
            min_exclusive: false,
            default,
        }
    }

    const fn float(key: &'static str, group: ParamGroup, min: f64, max: f64, default: f64) -> Self {
        ParamSpec {
            key,
            group,
            kind: ParamKind::Float,
            min,
            max,
            min_exclusive: false,
            default,
        }
    }

    const fn open_min(mut self) -> Self {
        self.min_exclusive = true;
        self
    }

    /// 检查数值是否在范围内
    pub fn contains(&self, value: f64) -> bool {
        let above_min = if self.min_exclusive {
            value > self.min
        } else {
            value >= self.min
        };
        value.is_finite() && above_min && value <= self.max
    }

    /// 默认值（按参数类型包装）
    pub fn default_value(&self) -> ParamValue {
        match self.kind {
            ParamKind::Integer => ParamValue::Int(self.default as i64),
            ParamKind::Float => ParamValue::Float(self.default),
        }
    }

    /// 按参数名查找
    pub fn find(key: &str) -> Option<&'static ParamSpec> {
        PARAMS.iter().find(|spec| spec.key == key)
    }
}

/// 传感器权重键前缀
pub const WEIGHT_PREFIX: &str = "sensor_weight_";

/// 传感器权重参数描述（`key` 字段仅为前缀）
pub const WEIGHT_SPEC: ParamSpec =
    ParamSpec::float(WEIGHT_PREFIX, ParamGroup::Sensor, -10.0, 10.0, 0.0);

/// 六路传感器阵列的出厂权重（左 → 右）
pub const DEFAULT_WEIGHTS: [f64; 6] = [-3.0, -1.5, -0.8, 0.8, 1.5, 3.0];

/// 第 `index` 路（从 1 开始）传感器的权重键
pub fn weight_key(index: usize) -> String {
    format!("{WEIGHT_PREFIX}{index}")
}

/// `count` 路传感器的默认权重
///
/// 六路时使用出厂权重，其他数量在 `[-3, 3]` 上等距分布。
pub fn default_weights(count: usize) -> Vec<f64> {
    if count == DEFAULT_WEIGHTS.len() {
        return DEFAULT_WEIGHTS.to_vec();
    }
    if count == 1 {
        return vec![0.0];
    }
    let step = 6.0 / (count - 1) as f64;
    (0..count).map(|i| -3.0 + step * i as f64).collect()
}

use ParamGroup::{Control, Loop, Sensor, Speed, Timing};

/// 全部固定参数（不含按传感器展开的权重）
pub static PARAMS: &[ParamSpec] = &[
    // 速度档位
    ParamSpec::int("speed_startup", Speed, 0.0, 255.0, 140.0),
    ParamSpec::int("speed_cruise", Speed, 0.0, 255.0, 200.0),
    ParamSpec::int("speed_turn", Speed, 0.0, 255.0, 160.0),
    ParamSpec::int("speed_brake", Speed, 0.0, 255.0, 120.0),
    ParamSpec::int("speed_slow", Speed, 0.0, 255.0, 160.0),
    ParamSpec::int("speed_fast", Speed, 0.0, 255.0, 235.0),
    ParamSpec::int("acceleration_step", Speed, 1.0, 255.0, 45.0),
    ParamSpec::int("brake_step", Speed, 1.0, 255.0, 90.0),
    ParamSpec::int("boost_duration", Speed, 0.0, 255.0, 15.0),
    ParamSpec::int("boost_increment", Speed, 0.0, 255.0, 35.0),
    // PD 控制与弯道检测
    ParamSpec::float("kp", Control, 0.0, 20.0, 1.2),
    ParamSpec::float("kd", Control, 0.0, 100.0, 0.02),
    ParamSpec::float("filter_coefficient", Control, 0.0, 1.0, 0.8).open_min(),
    ParamSpec::int("high_speed_threshold", Control, 0.0, 255.0, 200.0),
    ParamSpec::float("high_speed_correction_scale", Control, 0.0, 1.0, 0.85),
    ParamSpec::float("turn_threshold", Control, 0.0, 1000.0, 35.0),
    ParamSpec::float("curve_threshold", Control, 0.0, 1000.0, 70.0),
    ParamSpec::float("straight_threshold", Control, 0.0, 1000.0, 12.0),
    ParamSpec::int("curve_debounce_cycles", Control, 1.0, 100.0, 2.0),
    ParamSpec::int("straight_hysteresis_cycles", Control, 0.0, 100.0, 2.0),
    // 传感器
    ParamSpec::int("sensor_count", Sensor, 1.0, 16.0, 6.0),
    ParamSpec::int("sensor_max_value", Sensor, 1.0, 65535.0, 1023.0),
    ParamSpec::float("sensor_active_threshold", Sensor, 0.0, 100.0, 15.0),
    ParamSpec::float("position_scale", Sensor, 0.001, 1000.0, 100.0),
    ParamSpec::int("calibration_min_span", Sensor, 0.0, 65535.0, 100.0),
    // 时序
    ParamSpec::int("control_period_ms", Timing, 1.0, 1000.0, 2.0),
    ParamSpec::int("startup_delay_ms", Timing, 0.0, 10000.0, 400.0),
    ParamSpec::int("marker_hold_ms", Timing, 0.0, 60000.0, 1500.0),
    ParamSpec::int("stop_delay_ms", Timing, 0.0, 10000.0, 200.0),
    ParamSpec::int("calibration_samples", Timing, 1.0, 10000.0, 300.0),
    ParamSpec::int("calibration_delay_ms", Timing, 0.0, 100.0, 20.0),
    // 控制循环
    ParamSpec::int("max_skipped_cycles", Loop, 0.0, 1000.0, 5.0),
    ParamSpec::int("lap_limit", Loop, 0.0, 255.0, 2.0),
    ParamSpec::int("motor_output_max", Loop, 1.0, 255.0, 255.0),
];
