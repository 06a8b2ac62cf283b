//! 周期遥测：最近若干周期的记录、每圈统计 + 整个会话的汇总
//!
//! 圈以终点线为界：`start_lap` 开始累计，`finish_lap` 结束并归档。

use crate::speed::SpeedState;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Instant;

/// 默认保留的周期记录数
pub const DEFAULT_CAPACITY: usize = 256;

/// 单个周期的记录
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CycleRecord {
    pub cycle: u64,
    /// 位置估计输出
    pub position: f64,
    /// 平滑后的误差
    pub error: f64,
    pub correction: f64,
    pub base_speed: f64,
    pub left: i16,
    pub right: i16,
    pub state: SpeedState,
}

/// 单圈统计
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LapStats {
    /// 圈序号（从 1 开始）
    pub lap: u32,
    pub duration_s: f64,
    pub cycles: u64,
    /// 本圈进入 TURN 的次数
    pub curves: u64,
    /// 最大 |位置误差|
    pub max_deviation: f64,
    /// 平均 |位置误差|
    pub mean_deviation: f64,
    pub max_speed: f64,
}

/// 进行中的一圈
#[derive(Debug, Clone)]
struct LapAccumulator {
    started_at: Instant,
    cycles: u64,
    curves: u64,
    abs_error_sum: f64,
    max_abs_error: f64,
    max_speed: f64,
}

impl LapAccumulator {
    fn new(started_at: Instant) -> Self {
        LapAccumulator {
            started_at,
            cycles: 0,
            curves: 0,
            abs_error_sum: 0.0,
            max_abs_error: 0.0,
            max_speed: 0.0,
        }
    }

    fn finish(&self, lap: u32, now: Instant) -> LapStats {
        LapStats {
            lap,
            duration_s: now.saturating_duration_since(self.started_at).as_secs_f64(),
            cycles: self.cycles,
            curves: self.curves,
            max_deviation: self.max_abs_error,
            mean_deviation: mean(self.abs_error_sum, self.cycles),
            max_speed: self.max_speed,
        }
    }
}

/// 会话汇总
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub cycles: u64,
    /// 进入 TURN 的次数
    pub curve_entries: u64,
    pub mean_abs_error: f64,
    pub max_abs_error: f64,
    pub max_base_speed: f64,
    pub final_state: Option<SpeedState>,
    /// 已完成的整圈
    pub laps: Vec<LapStats>,
}

#[derive(Debug, Clone)]
pub struct Telemetry {
    records: VecDeque<CycleRecord>,
    capacity: usize,
    cycles: u64,
    curve_entries: u64,
    abs_error_sum: f64,
    max_abs_error: f64,
    max_base_speed: f64,
    last_state: Option<SpeedState>,
    lap: Option<LapAccumulator>,
    laps: Vec<LapStats>,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Telemetry {
            records: VecDeque::with_capacity(capacity),
            capacity,
            cycles: 0,
            curve_entries: 0,
            abs_error_sum: 0.0,
            max_abs_error: 0.0,
            max_base_speed: 0.0,
            last_state: None,
            lap: None,
            laps: Vec::new(),
        }
    }

    pub fn record(&mut self, record: CycleRecord) {
        let deviation = record.position.abs();
        let curve_entry =
            record.state == SpeedState::Turn && self.last_state != Some(SpeedState::Turn);

        self.cycles += 1;
        self.abs_error_sum += deviation;
        self.max_abs_error = self.max_abs_error.max(deviation);
        self.max_base_speed = self.max_base_speed.max(record.base_speed);
        if curve_entry {
            self.curve_entries += 1;
        }
        self.last_state = Some(record.state);

        if let Some(lap) = self.lap.as_mut() {
            lap.cycles += 1;
            lap.abs_error_sum += deviation;
            lap.max_abs_error = lap.max_abs_error.max(deviation);
            lap.max_speed = lap.max_speed.max(record.base_speed);
            if curve_entry {
                lap.curves += 1;
            }
        }

        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// 开始累计新的一圈（覆盖进行中的圈）
    pub fn start_lap(&mut self, now: Instant) {
        self.lap = Some(LapAccumulator::new(now));
    }

    /// 结束进行中的一圈并归档；没有进行中的圈时返回 `None`
    pub fn finish_lap(&mut self, now: Instant) -> Option<LapStats> {
        let lap = self.lap.take()?;
        let stats = lap.finish(self.laps.len() as u32 + 1, now);
        self.laps.push(stats.clone());
        Some(stats)
    }

    /// 丢弃进行中的一圈
    pub fn discard_lap(&mut self) {
        self.lap = None;
    }

    /// 已完成的整圈
    pub fn lap_stats(&self) -> &[LapStats] {
        &self.laps
    }

    /// 最近的记录，按时间顺序
    pub fn recent(&self) -> impl Iterator<Item = &CycleRecord> {
        self.records.iter()
    }

    pub fn last(&self) -> Option<&CycleRecord> {
        self.records.back()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            cycles: self.cycles,
            curve_entries: self.curve_entries,
            mean_abs_error: mean(self.abs_error_sum, self.cycles),
            max_abs_error: self.max_abs_error,
            max_base_speed: self.max_base_speed,
            final_state: self.last_state,
            laps: self.laps.clone(),
        }
    }

    pub fn clear(&mut self) {
        *self = Self::with_capacity(self.capacity);
    }
}

fn mean(sum: f64, count: u64) -> f64 {
    if count == 0 { 0.0 } else { sum / count as f64 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(cycle: u64, position: f64, state: SpeedState) -> CycleRecord {
        CycleRecord {
            cycle,
            position,
            error: position,
            correction: 0.0,
            base_speed: 100.0 + cycle as f64,
            left: 0,
            right: 0,
            state,
        }
    }

    #[test]
    fn test_ring_keeps_latest() {
        let mut t = Telemetry::with_capacity(4);
        for i in 0..10 {
            t.record(record(i, 0.0, SpeedState::Cruise));
        }

        assert_eq!(t.len(), 4);
        let cycles: Vec<u64> = t.recent().map(|r| r.cycle).collect();
        assert_eq!(cycles, vec![6, 7, 8, 9]);
        assert_eq!(t.summary().cycles, 10);
    }

    #[test]
    fn test_summary() {
        use SpeedState::*;
        let mut t = Telemetry::new();
        let trace = [(10.0, Cruise), (-50.0, Turn), (60.0, Turn), (5.0, Cruise), (-45.0, Turn)];
        for (i, (pos, state)) in trace.into_iter().enumerate() {
            t.record(record(i as u64, pos, state));
        }

        let s = t.summary();
        assert_eq!(s.cycles, 5);
        assert_eq!(s.curve_entries, 2);
        assert!((s.mean_abs_error - 34.0).abs() < 1e-10);
        assert_eq!(s.max_abs_error, 60.0);
        assert_eq!(s.max_base_speed, 104.0);
        assert_eq!(s.final_state, Some(Turn));
    }

    #[test]
    fn test_empty_summary() {
        let s = Telemetry::new().summary();
        assert_eq!(s.cycles, 0);
        assert_eq!(s.mean_abs_error, 0.0);
        assert_eq!(s.final_state, None);
    }

    #[test]
    fn test_summary_serializes() {
        let mut t = Telemetry::new();
        t.record(record(0, 1.0, SpeedState::Startup));
        let json = serde_json::to_value(t.summary()).unwrap();
        assert_eq!(json["final_state"], "STARTUP");
        assert_eq!(json["cycles"], 1);
    }

    #[test]
    fn test_lap_stats() {
        use SpeedState::*;
        use std::time::Duration;

        let mut t = Telemetry::new();
        let t0 = Instant::now();

        // 第一次越过终点线之前不计圈
        t.record(record(0, 90.0, Cruise));
        assert_eq!(t.finish_lap(t0), None);

        t.start_lap(t0);
        let trace = [(10.0, Cruise), (-50.0, Turn), (70.0, Turn), (5.0, Cruise), (-45.0, Turn)];
        for (i, (pos, state)) in trace.into_iter().enumerate() {
            t.record(record(i as u64 + 1, pos, state));
        }

        let lap = t.finish_lap(t0 + Duration::from_millis(1500)).unwrap();
        assert_eq!(lap.lap, 1);
        assert!((lap.duration_s - 1.5).abs() < 1e-9);
        assert_eq!(lap.cycles, 5);
        assert_eq!(lap.curves, 2);
        assert_eq!(lap.max_deviation, 70.0);
        assert!((lap.mean_deviation - 36.0).abs() < 1e-10);
        assert_eq!(lap.max_speed, 105.0);

        // 结束后不再累计，直到开始新的一圈
        t.record(record(6, 200.0, Cruise));
        assert_eq!(t.lap_stats().len(), 1);
        assert_eq!(t.summary().laps, vec![lap]);
        assert_eq!(t.summary().max_abs_error, 200.0);
    }

    #[test]
    fn test_lap_stats_serialize() {
        let mut t = Telemetry::new();
        let t0 = Instant::now();
        t.start_lap(t0);
        t.record(record(1, 3.0, SpeedState::Cruise));
        t.finish_lap(t0).unwrap();

        let json = serde_json::to_value(t.summary()).unwrap();
        assert_eq!(json["laps"][0]["lap"], 1);
        assert_eq!(json["laps"][0]["max_deviation"], 3.0);
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut t = Telemetry::with_capacity(8);
        t.record(record(0, 1.0, SpeedState::Cruise));
        t.clear();
        assert!(t.is_empty());
        assert_eq!(t.capacity(), 8);
    }
}
