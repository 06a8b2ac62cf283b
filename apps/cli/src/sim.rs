//! # 赛道仿真
//!
//! 用 Frenet 坐标描述机器人相对黑线的位置：
//!
//! - `s`: 沿线行驶距离（mm），按赛道长度循环
//! - `d`: 横向偏移（mm），向左为正
//! - `psi`: 航向相对切线的夹角（rad），逆时针为正
//!
//! ```text
//! ds/dt   = v * cos(psi)
//! dd/dt   = v * sin(psi)
//! dpsi/dt = omega - kappa(s) * v
//! ```
//!
//! 传感器横向位置向左递增，索引 0 在最右侧。

use crossbeam_channel::Sender;
use linebot_control::{ControlError, MarkerDecoder, MotorActuator, MotorCommand, SensorDevice};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use std::sync::Arc;

/// 传感器间距（mm）
const SENSOR_PITCH: f64 = 12.0;
/// 黑线半宽（mm）
const LINE_HALF_WIDTH: f64 = 9.5;
/// 背景/黑线原始读数
const RAW_BACKGROUND: f64 = 920.0;
const RAW_LINE: f64 = 80.0;
/// 原始读数噪声幅度
const RAW_NOISE: f64 = 15.0;
/// 指令 255 对应的轮速（mm/s）
const MAX_WHEEL_SPEED: f64 = 1500.0;
/// 轮距（mm）
const WHEEL_BASE: f64 = 120.0;
/// 标记长度（mm）
const MARKER_LENGTH: f64 = 20.0;
/// 标定时左右扫动幅度（mm）
const CALIBRATION_SWEEP: f64 = 40.0;

#[derive(Debug, Clone, Copy)]
enum Segment {
    Straight { length: f64 },
    /// 正角度为左转
    Arc { radius: f64, angle: f64 },
}

impl Segment {
    fn length(&self) -> f64 {
        match *self {
            Segment::Straight { length } => length,
            Segment::Arc { radius, angle } => radius * angle.abs(),
        }
    }

    fn curvature(&self) -> f64 {
        match *self {
            Segment::Straight { .. } => 0.0,
            Segment::Arc { radius, angle } => angle.signum() / radius,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy)]
struct Marker {
    side: Side,
    at: f64,
}

/// 闭环赛道
#[derive(Debug, Clone)]
pub struct Track {
    segments: Vec<Segment>,
    markers: Vec<Marker>,
    length: f64,
}

impl Track {
    /// 椭圆赛道，中间带一段 S 弯慢速区
    ///
    /// 起点处左侧为终点线标记；S 弯前后各有一个右侧标记切换速度模式。
    pub fn standard() -> Self {
        let segments = vec![
            Segment::Straight { length: 1200.0 },
            Segment::Arc {
                radius: 300.0,
                angle: PI,
            },
            Segment::Straight { length: 400.0 },
            Segment::Arc {
                radius: 200.0,
                angle: -PI / 2.0,
            },
            Segment::Arc {
                radius: 200.0,
                angle: PI / 2.0,
            },
            Segment::Straight { length: 400.0 },
            Segment::Arc {
                radius: 300.0,
                angle: PI,
            },
        ];
        let length = segments.iter().map(Segment::length).sum();

        // S 弯起点/终点
        let s_bend_start = 1200.0 + 300.0 * PI + 400.0;
        let s_bend_end = s_bend_start + 200.0 * PI;

        Track {
            segments,
            markers: vec![
                Marker {
                    side: Side::Left,
                    at: 0.0,
                },
                Marker {
                    side: Side::Right,
                    at: s_bend_start - 150.0,
                },
                Marker {
                    side: Side::Right,
                    at: s_bend_end + 50.0,
                },
            ],
            length,
        }
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    /// 位置 `s` 处的曲率（1/mm）
    fn curvature_at(&self, s: f64) -> f64 {
        let mut s = s.rem_euclid(self.length);
        for segment in &self.segments {
            let len = segment.length();
            if s < len {
                return segment.curvature();
            }
            s -= len;
        }
        0.0
    }

    /// 位置 `s` 处两侧标记传感器的状态 `(left, right)`
    fn markers_at(&self, s: f64) -> (bool, bool) {
        let s = s.rem_euclid(self.length);
        let mut state = (false, false);
        for marker in &self.markers {
            if s >= marker.at && s < marker.at + MARKER_LENGTH {
                match marker.side {
                    Side::Left => state.0 = true,
                    Side::Right => state.1 = true,
                }
            }
        }
        state
    }
}

/// 仿真世界：赛道 + 机器人 + 噪声源
pub struct SimWorld {
    track: Track,
    sensor_count: usize,
    rng: StdRng,
    fault_rate: f64,

    s: f64,
    d: f64,
    psi: f64,
    calibration_step: Option<u32>,

    decoder: MarkerDecoder,
    events: Sender<String>,

    distance: f64,
    max_offset: f64,
    elapsed: f64,
    halted: bool,
}

impl SimWorld {
    pub fn new(track: Track, sensor_count: usize, seed: u64, events: Sender<String>) -> Self {
        SimWorld {
            track,
            sensor_count,
            rng: StdRng::seed_from_u64(seed),
            fault_rate: 0.0,
            s: 0.0,
            d: 0.0,
            psi: 0.0,
            calibration_step: None,
            decoder: MarkerDecoder::new(),
            events,
            distance: 0.0,
            max_offset: 0.0,
            elapsed: 0.0,
            halted: false,
        }
    }

    /// 每次读数失败的概率
    pub fn set_fault_rate(&mut self, rate: f64) {
        self.fault_rate = rate.clamp(0.0, 1.0);
    }

    pub fn into_shared(self) -> Arc<Mutex<SimWorld>> {
        Arc::new(Mutex::new(self))
    }

    /// 进入标定模式：每次读数时左右扫过黑线
    pub fn begin_calibration(&mut self) {
        self.calibration_step = Some(0);
    }

    /// 结束标定，机器人回到线中央，略微偏出起点线之前
    pub fn end_calibration(&mut self) {
        self.calibration_step = None;
        self.d = 0.0;
        self.psi = 0.0;
        self.s = -(MARKER_LENGTH * 2.0);
    }

    /// 第 `i` 路传感器相对车体中心的横向位置（向左为正）
    fn sensor_offset(&self, i: usize) -> f64 {
        (i as f64 - (self.sensor_count as f64 - 1.0) / 2.0) * SENSOR_PITCH
    }

    fn sense(&mut self) -> Result<Vec<u16>, ControlError> {
        if self.fault_rate > 0.0 && self.rng.gen_bool(self.fault_rate) {
            return Err(ControlError::SensorFault("simulated dropout".to_string()));
        }

        let d = match self.calibration_step.as_mut() {
            Some(step) => {
                *step += 1;
                CALIBRATION_SWEEP * (f64::from(*step) * 0.15).sin()
            },
            None => self.d,
        };

        // 黑线相对车体的横向位置
        let line = -d;
        let offsets: Vec<f64> = (0..self.sensor_count).map(|i| self.sensor_offset(i)).collect();
        let raw = offsets
            .into_iter()
            .map(|offset| {
                let distance = (offset - line).abs();
                // 黑线边缘 3mm 内线性过渡
                let coverage = ((LINE_HALF_WIDTH + 3.0 - distance) / 6.0).clamp(0.0, 1.0);
                let value = RAW_BACKGROUND - (RAW_BACKGROUND - RAW_LINE) * coverage
                    + self.rng.gen_range(-RAW_NOISE..RAW_NOISE);
                value.clamp(0.0, 1023.0) as u16
            })
            .collect();

        if self.calibration_step.is_none() {
            let (left, right) = self.track.markers_at(self.s);
            if let Some(event) = self.decoder.update(left, right) {
                // 接收端已退出时事件无处可送
                let _ = self.events.send(event.code().to_string());
            }
        }

        Ok(raw)
    }

    fn drive(&mut self, command: MotorCommand, dt: f64) {
        let scale = MAX_WHEEL_SPEED / 255.0;
        let vl = f64::from(command.left) * scale;
        let vr = f64::from(command.right) * scale;
        let v = (vl + vr) / 2.0;
        let omega = (vr - vl) / WHEEL_BASE;
        let kappa = self.track.curvature_at(self.s);

        let ds = v * self.psi.cos() * dt;
        self.s += ds;
        self.d += v * self.psi.sin() * dt;
        self.psi += (omega - kappa * v) * dt;
        self.psi = (self.psi + PI).rem_euclid(2.0 * PI) - PI;

        self.distance += ds.max(0.0);
        self.max_offset = self.max_offset.max(self.d.abs());
        self.elapsed += dt;
    }

    /// 行驶距离（m）
    pub fn distance_m(&self) -> f64 {
        self.distance / 1000.0
    }

    /// 最大横向偏移（mm）
    pub fn max_offset_mm(&self) -> f64 {
        self.max_offset
    }

    /// 仿真时间（s）
    pub fn elapsed_s(&self) -> f64 {
        self.elapsed
    }

    pub fn halted(&self) -> bool {
        self.halted
    }
}

/// 仿真传感器（共享世界）
pub struct SimSensors(pub Arc<Mutex<SimWorld>>);

impl SensorDevice for SimSensors {
    fn read_raw(&mut self) -> Result<Vec<u16>, ControlError> {
        self.0.lock().sense()
    }
}

/// 仿真电机：每条指令推进一个控制周期
pub struct SimMotors {
    pub world: Arc<Mutex<SimWorld>>,
    pub dt: f64,
}

impl MotorActuator for SimMotors {
    fn apply(&mut self, command: MotorCommand) {
        self.world.lock().drive(command, self.dt);
    }

    fn halt(&mut self, reason: &ControlError) {
        tracing::error!("Simulated motors halted: {}", reason);
        self.world.lock().halted = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world(sensor_count: usize) -> (SimWorld, crossbeam_channel::Receiver<String>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (SimWorld::new(Track::standard(), sensor_count, 1, tx), rx)
    }

    #[test]
    fn test_track_curvature() {
        let track = Track::standard();
        assert_eq!(track.curvature_at(100.0), 0.0);
        assert!((track.curvature_at(1300.0) - 1.0 / 300.0).abs() < 1e-12);
        // 循环
        assert_eq!(track.curvature_at(track.length() + 100.0), 0.0);
    }

    #[test]
    fn test_centered_robot_sees_middle_sensors() {
        let (mut w, _rx) = world(6);
        let raw = w.sense().unwrap();
        assert!(raw[2] < 500 && raw[3] < 500, "{:?}", raw);
        assert!(raw[0] > 800 && raw[5] > 800, "{:?}", raw);
    }

    #[test]
    fn test_line_to_the_right_hits_low_index() {
        let (mut w, _rx) = world(6);
        // 机器人偏到黑线左侧
        w.d = 24.0;
        let raw = w.sense().unwrap();
        assert!(raw[0] < 500, "{:?}", raw);
        assert!(raw[5] > 800, "{:?}", raw);
    }

    #[test]
    fn test_straight_drive() {
        let (mut w, _rx) = world(6);
        // 750mm，仍在第一段直道上
        for _ in 0..50 {
            w.drive(MotorCommand::new(255, 255), 0.01);
        }
        assert!((w.distance_m() - 0.75).abs() < 1e-9);
        assert_eq!(w.d, 0.0);
        assert!((w.elapsed_s() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_finish_marker_emits_event() {
        let (mut w, rx) = world(6);
        w.end_calibration();

        for _ in 0..200 {
            w.sense().unwrap();
            w.drive(MotorCommand::new(100, 100), 0.002);
        }
        assert_eq!(rx.try_recv().as_deref(), Ok("finish"));
    }

    #[test]
    fn test_dropout() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let mut w = SimWorld::new(Track::standard(), 6, 3, tx);
        w.set_fault_rate(1.0);
        assert!(matches!(w.sense(), Err(ControlError::SensorFault(_))));
    }
}
