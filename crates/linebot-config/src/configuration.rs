//! # 类型化配置
//!
//! `Configuration` 是控制核心全部可调参数的不可变快照。
//! 唯一的构造入口是 [`Configuration::from_map`]（TOML 加载也经由它），
//! 因此每个实例都已通过完整校验。

use crate::error::{ConfigError, ParamIssue};
use crate::params::{
    PARAMS, ParamGroup, ParamKind, ParamSpec, ParamValue, WEIGHT_PREFIX, WEIGHT_SPEC,
    default_weights, weight_key,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// 巡线控制参数快照
///
/// 参数变更时整体替换（见 [`ConfigHandle`](crate::ConfigHandle)），从不原地修改。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Configuration {
    pub speed_startup: u8,
    pub speed_cruise: u8,
    pub speed_turn: u8,
    pub speed_brake: u8,
    pub speed_slow: u8,
    pub speed_fast: u8,
    /// 每周期最大加速量
    pub acceleration_step: u8,
    /// 每周期最大减速量
    pub brake_step: u8,
    /// 出弯加速持续周期数
    pub boost_duration: u8,
    /// 出弯加速增量
    pub boost_increment: u8,

    pub kp: f64,
    pub kd: f64,
    /// 误差指数平滑系数，范围 `(0, 1]`
    pub filter_coefficient: f64,
    /// 基础速度超过此值时缩小修正量
    pub high_speed_threshold: u8,
    pub high_speed_correction_scale: f64,

    pub turn_threshold: f64,
    pub curve_threshold: f64,
    pub straight_threshold: f64,
    pub curve_debounce_cycles: u32,
    pub straight_hysteresis_cycles: u32,

    /// 传感器权重（左 → 右），长度即传感器数量
    pub sensor_weights: Vec<f64>,
    pub sensor_max_value: u16,
    /// 归一化值不低于此阈值的传感器视为"在线上"
    pub sensor_active_threshold: f64,
    /// 位置误差缩放系数
    pub position_scale: f64,
    /// 标定批次跨度低于此值时视为离线采样（只有背景）
    pub calibration_min_span: u16,

    pub control_period_ms: u32,
    pub startup_delay_ms: u32,
    /// SLOW / FAST 状态保持时长
    pub marker_hold_ms: u32,
    /// 最后一次越过终点线后，先刹车再切断电机的时长
    pub stop_delay_ms: u32,
    pub calibration_samples: u32,
    pub calibration_delay_ms: u32,

    /// 允许的最大连续跳过周期数，超过后停机
    pub max_skipped_cycles: u32,
    /// 完成圈数后停车（0 表示不限）
    pub lap_limit: u32,
    pub motor_output_max: u8,
}

/// 参数展示条目
#[derive(Debug, Clone, PartialEq)]
pub struct ParamEntry {
    pub key: String,
    pub spec: ParamSpec,
    pub value: ParamValue,
}

impl Default for Configuration {
    fn default() -> Self {
        let mut map: BTreeMap<String, ParamValue> = PARAMS
            .iter()
            .map(|spec| (spec.key.to_string(), spec.default_value()))
            .collect();
        let count = map.get("sensor_count").map_or(6, |v| v.as_f64() as usize);
        for (i, w) in default_weights(count).into_iter().enumerate() {
            map.insert(weight_key(i + 1), ParamValue::Float(w));
        }

        match Self::from_map(&map) {
            Ok(config) => config,
            // 参数表默认值由单元测试保证合法
            Err(e) => unreachable!("built-in defaults are invalid: {e}"),
        }
    }
}

impl Configuration {
    /// 从键值映射构造并校验
    ///
    /// 一次性收集全部问题（缺失、类型错误、越界、跨字段约束），
    /// 任一问题都会导致 `ConfigError::Mismatch`。未知键仅记录警告。
    pub fn from_map(map: &BTreeMap<String, ParamValue>) -> Result<Self, ConfigError> {
        Self::build(map, Vec::new())
    }

    /// 在当前配置上覆盖若干参数并重新校验
    pub fn with_overrides<I, K>(&self, overrides: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, ParamValue)>,
        K: Into<String>,
    {
        let mut map = self.to_map();
        for (key, value) in overrides {
            map.insert(key.into(), value);
        }
        Self::from_map(&map)
    }

    fn build(
        map: &BTreeMap<String, ParamValue>,
        issues: Vec<ParamIssue>,
    ) -> Result<Self, ConfigError> {
        let mut r = MapReader { map, issues };

        let sensor_count = r.get("sensor_count") as usize;
        let sensor_weights: Vec<f64> =
            (1..=sensor_count).map(|i| r.get_weight(&weight_key(i))).collect();

        let config = Configuration {
            speed_startup: r.get("speed_startup") as u8,
            speed_cruise: r.get("speed_cruise") as u8,
            speed_turn: r.get("speed_turn") as u8,
            speed_brake: r.get("speed_brake") as u8,
            speed_slow: r.get("speed_slow") as u8,
            speed_fast: r.get("speed_fast") as u8,
            acceleration_step: r.get("acceleration_step") as u8,
            brake_step: r.get("brake_step") as u8,
            boost_duration: r.get("boost_duration") as u8,
            boost_increment: r.get("boost_increment") as u8,
            kp: r.get("kp"),
            kd: r.get("kd"),
            filter_coefficient: r.get("filter_coefficient"),
            high_speed_threshold: r.get("high_speed_threshold") as u8,
            high_speed_correction_scale: r.get("high_speed_correction_scale"),
            turn_threshold: r.get("turn_threshold"),
            curve_threshold: r.get("curve_threshold"),
            straight_threshold: r.get("straight_threshold"),
            curve_debounce_cycles: r.get("curve_debounce_cycles") as u32,
            straight_hysteresis_cycles: r.get("straight_hysteresis_cycles") as u32,
            sensor_weights,
            sensor_max_value: r.get("sensor_max_value") as u16,
            sensor_active_threshold: r.get("sensor_active_threshold"),
            position_scale: r.get("position_scale"),
            calibration_min_span: r.get("calibration_min_span") as u16,
            control_period_ms: r.get("control_period_ms") as u32,
            startup_delay_ms: r.get("startup_delay_ms") as u32,
            marker_hold_ms: r.get("marker_hold_ms") as u32,
            stop_delay_ms: r.get("stop_delay_ms") as u32,
            calibration_samples: r.get("calibration_samples") as u32,
            calibration_delay_ms: r.get("calibration_delay_ms") as u32,
            max_skipped_cycles: r.get("max_skipped_cycles") as u32,
            lap_limit: r.get("lap_limit") as u32,
            motor_output_max: r.get("motor_output_max") as u8,
        };

        for key in map.keys() {
            if !is_known_key(key, sensor_count) {
                tracing::warn!("Ignoring unknown configuration key: {}", key);
            }
        }

        let mut issues = r.issues;
        config.check_consistency(&mut issues);

        if issues.is_empty() {
            Ok(config)
        } else {
            Err(ConfigError::Mismatch(issues))
        }
    }

    fn check_consistency(&self, issues: &mut Vec<ParamIssue>) {
        if self.straight_threshold >= self.turn_threshold {
            issues.push(ParamIssue::Inconsistent {
                keys: "straight_threshold/turn_threshold".to_string(),
                reason: format!(
                    "straight threshold {} must be below turn threshold {}",
                    self.straight_threshold, self.turn_threshold
                ),
            });
        }
        if self.turn_threshold > self.curve_threshold {
            issues.push(ParamIssue::Inconsistent {
                keys: "turn_threshold/curve_threshold".to_string(),
                reason: format!(
                    "turn threshold {} must not exceed curve threshold {}",
                    self.turn_threshold, self.curve_threshold
                ),
            });
        }
    }

    /// 转换为键值映射（`from_map` 的逆操作）
    pub fn to_map(&self) -> BTreeMap<String, ParamValue> {
        self.params().into_iter().map(|entry| (entry.key, entry.value)).collect()
    }

    /// 按参数表顺序列出全部参数（权重紧跟在 `sensor_count` 之后）
    pub fn params(&self) -> Vec<ParamEntry> {
        let mut entries = Vec::with_capacity(PARAMS.len() + self.sensor_weights.len());
        for spec in PARAMS {
            let value = match spec.kind {
                ParamKind::Integer => ParamValue::Int(self.integer_field(spec.key)),
                ParamKind::Float => ParamValue::Float(self.float_field(spec.key)),
            };
            entries.push(ParamEntry {
                key: spec.key.to_string(),
                spec: *spec,
                value,
            });

            if spec.key == "sensor_count" {
                for (i, w) in self.sensor_weights.iter().enumerate() {
                    entries.push(ParamEntry {
                        key: weight_key(i + 1),
                        spec: WEIGHT_SPEC,
                        value: ParamValue::Float(*w),
                    });
                }
            }
        }
        entries
    }

    fn integer_field(&self, key: &str) -> i64 {
        match key {
            "speed_startup" => self.speed_startup.into(),
            "speed_cruise" => self.speed_cruise.into(),
            "speed_turn" => self.speed_turn.into(),
            "speed_brake" => self.speed_brake.into(),
            "speed_slow" => self.speed_slow.into(),
            "speed_fast" => self.speed_fast.into(),
            "acceleration_step" => self.acceleration_step.into(),
            "brake_step" => self.brake_step.into(),
            "boost_duration" => self.boost_duration.into(),
            "boost_increment" => self.boost_increment.into(),
            "high_speed_threshold" => self.high_speed_threshold.into(),
            "curve_debounce_cycles" => self.curve_debounce_cycles.into(),
            "straight_hysteresis_cycles" => self.straight_hysteresis_cycles.into(),
            "sensor_count" => self.sensor_weights.len() as i64,
            "sensor_max_value" => self.sensor_max_value.into(),
            "control_period_ms" => self.control_period_ms.into(),
            "startup_delay_ms" => self.startup_delay_ms.into(),
            "marker_hold_ms" => self.marker_hold_ms.into(),
            "stop_delay_ms" => self.stop_delay_ms.into(),
            "calibration_min_span" => self.calibration_min_span.into(),
            "calibration_samples" => self.calibration_samples.into(),
            "calibration_delay_ms" => self.calibration_delay_ms.into(),
            "max_skipped_cycles" => self.max_skipped_cycles.into(),
            "lap_limit" => self.lap_limit.into(),
            "motor_output_max" => self.motor_output_max.into(),
            other => unreachable!("not an integer parameter: {other}"),
        }
    }

    fn float_field(&self, key: &str) -> f64 {
        match key {
            "kp" => self.kp,
            "kd" => self.kd,
            "filter_coefficient" => self.filter_coefficient,
            "high_speed_correction_scale" => self.high_speed_correction_scale,
            "turn_threshold" => self.turn_threshold,
            "curve_threshold" => self.curve_threshold,
            "straight_threshold" => self.straight_threshold,
            "sensor_active_threshold" => self.sensor_active_threshold,
            "position_scale" => self.position_scale,
            other => unreachable!("not a float parameter: {other}"),
        }
    }

    /// 传感器数量
    pub fn sensor_count(&self) -> usize {
        self.sensor_weights.len()
    }

    pub fn control_period(&self) -> Duration {
        Duration::from_millis(self.control_period_ms.into())
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms.into())
    }

    pub fn marker_hold(&self) -> Duration {
        Duration::from_millis(self.marker_hold_ms.into())
    }

    pub fn stop_delay(&self) -> Duration {
        Duration::from_millis(self.stop_delay_ms.into())
    }

    pub fn calibration_delay(&self) -> Duration {
        Duration::from_millis(self.calibration_delay_ms.into())
    }

    // ==================== TOML 持久化 ====================

    /// 从 TOML 文本解析
    ///
    /// 文件是一张扁平表，键与参数表一致；非数值条目记为类型错误。
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let table: toml::Table = toml::from_str(content)?;
        let mut map = BTreeMap::new();
        let mut issues = Vec::new();

        for (key, value) in table {
            match value {
                toml::Value::Integer(v) => {
                    map.insert(key, ParamValue::Int(v));
                },
                toml::Value::Float(v) => {
                    map.insert(key, ParamValue::Float(v));
                },
                _ => {
                    let expected = expected_kind(&key);
                    issues.push(ParamIssue::WrongKind { key, expected });
                },
            }
        }

        // 非数值条目已记录为类型错误，不再重复报告缺失
        let reported: Vec<String> = issues.iter().map(|i| i.key().to_string()).collect();
        match Self::build(&map, issues) {
            Err(ConfigError::Mismatch(all)) => Err(ConfigError::Mismatch(
                all.into_iter()
                    .filter(|issue| {
                        !matches!(issue, ParamIssue::Missing { key } if reported.contains(key))
                    })
                    .collect(),
            )),
            other => other,
        }
    }

    /// 序列化为分组的 TOML 文本
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        let entries = self.params();
        let mut out = String::from("# Line follower configuration\n");

        for group in ParamGroup::ALL {
            let mut table = toml::Table::new();
            for entry in entries.iter().filter(|e| e.spec.group == group) {
                let value = match entry.value {
                    ParamValue::Int(v) => toml::Value::Integer(v),
                    ParamValue::Float(v) => toml::Value::Float(v),
                };
                table.insert(entry.key.clone(), value);
            }
            if table.is_empty() {
                continue;
            }
            out.push_str(&format!("\n# {}\n", group.title()));
            out.push_str(&toml::to_string(&table)?);
        }

        Ok(out)
    }

    /// 从文件加载
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// 保存到文件
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        fs::write(path, self.to_toml_string()?)?;
        tracing::info!("Saved configuration to {}", path.display());
        Ok(())
    }
}

fn is_known_key(key: &str, sensor_count: usize) -> bool {
    if ParamSpec::find(key).is_some() {
        return true;
    }
    key.strip_prefix(WEIGHT_PREFIX)
        .and_then(|idx| idx.parse::<usize>().ok())
        .is_some_and(|idx| (1..=sensor_count).contains(&idx))
}

fn expected_kind(key: &str) -> ParamKind {
    ParamSpec::find(key).map_or(ParamKind::Float, |spec| spec.kind)
}

/// 逐项读取并记录问题；出问题时返回默认值，保证能继续收集后续问题
struct MapReader<'a> {
    map: &'a BTreeMap<String, ParamValue>,
    issues: Vec<ParamIssue>,
}

impl MapReader<'_> {
    fn get(&mut self, key: &'static str) -> f64 {
        match ParamSpec::find(key) {
            Some(spec) => self.read(key, spec),
            None => unreachable!("parameter missing from table: {key}"),
        }
    }

    fn get_weight(&mut self, key: &str) -> f64 {
        self.read(key, &WEIGHT_SPEC)
    }

    fn read(&mut self, key: &str, spec: &ParamSpec) -> f64 {
        let Some(value) = self.map.get(key) else {
            self.issues.push(ParamIssue::Missing {
                key: key.to_string(),
            });
            return spec.default;
        };

        if spec.kind == ParamKind::Integer && value.kind() == ParamKind::Float {
            self.issues.push(ParamIssue::WrongKind {
                key: key.to_string(),
                expected: spec.kind,
            });
            return spec.default;
        }

        let v = value.as_f64();
        if !spec.contains(v) {
            self.issues.push(ParamIssue::OutOfRange {
                key: key.to_string(),
                value: v,
                min: spec.min,
                max: spec.max,
            });
            return spec.default;
        }
        v
    }
}
