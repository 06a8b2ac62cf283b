//! # 速度状态机
//!
//! 根据 `|error|` 及其近期趋势选择基础速度档位：
//!
//! ```text
//! STARTUP ──(启动延时)──▶ CRUISE ──(|e| > turn, 去抖)──▶ TURN ──(|e| > curve, 去抖)──▶ BRAKE
//!                          ▲  │                          │                            │
//!                          │  └─(slow/fast 事件)─▶ SLOW / FAST ──(保持时长到期)──┐      │
//!                          │                                                    │      │
//!                          └────────────(|e| < straight 持续, 迟滞)─────────────┴──────┘
//! ```
//!
//! - 进入 TURN/BRAKE 需要连续 `curve_debounce_cycles` 个周期超过阈值，单个噪声样本不会触发
//! - 回到 CRUISE 需要误差先跌破 `straight_threshold`，再保持 `straight_hysteresis_cycles` 个周期
//! - 出弯回到 CRUISE 后，`boost_duration` 个周期内基础速度增加 `boost_increment`
//! - STARTUP 只在启动或显式 `reset` 时进入

use linebot_config::Configuration;
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

/// 速度状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpeedState {
    Startup,
    Cruise,
    Turn,
    Brake,
    Slow,
    Fast,
}

impl fmt::Display for SpeedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SpeedState::Startup => "STARTUP",
            SpeedState::Cruise => "CRUISE",
            SpeedState::Turn => "TURN",
            SpeedState::Brake => "BRAKE",
            SpeedState::Slow => "SLOW",
            SpeedState::Fast => "FAST",
        };
        f.write_str(name)
    }
}

/// 外部赛道事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackEvent {
    /// 进入精确（慢速）段
    Slow,
    /// 进入高速段
    Fast,
    /// 越过终点线
    Finish,
}

impl TrackEvent {
    /// 解析事件名（大小写不敏感），未知名称返回 `None`
    pub fn parse(code: &str) -> Option<Self> {
        match code.trim().to_ascii_lowercase().as_str() {
            "slow" => Some(TrackEvent::Slow),
            "fast" => Some(TrackEvent::Fast),
            "finish" => Some(TrackEvent::Finish),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            TrackEvent::Slow => "slow",
            TrackEvent::Fast => "fast",
            TrackEvent::Finish => "finish",
        }
    }
}

/// 某一状态下的速度参数，供电机混合器使用
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedProfile {
    /// 目标基础速度
    pub base_speed: f64,
    /// 每周期最大加速量
    pub accel_step: f64,
    /// 每周期最大减速量
    pub brake_step: f64,
}

/// 状态转换阈值与时序
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedThresholds {
    pub turn: f64,
    pub curve: f64,
    pub straight: f64,
    pub debounce_cycles: u32,
    pub hysteresis_cycles: u32,
    pub startup_delay: Duration,
    pub marker_hold: Duration,
    pub boost_duration: u8,
}

impl SpeedThresholds {
    pub fn from_config(config: &Configuration) -> Self {
        SpeedThresholds {
            turn: config.turn_threshold,
            curve: config.curve_threshold,
            straight: config.straight_threshold,
            debounce_cycles: config.curve_debounce_cycles,
            hysteresis_cycles: config.straight_hysteresis_cycles,
            startup_delay: config.startup_delay(),
            marker_hold: config.marker_hold(),
            boost_duration: config.boost_duration,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct SpeedLevels {
    startup: u8,
    cruise: u8,
    turn: u8,
    brake: u8,
    slow: u8,
    fast: u8,
    accel_step: u8,
    brake_step: u8,
    boost_increment: u8,
}

impl SpeedLevels {
    fn from_config(config: &Configuration) -> Self {
        SpeedLevels {
            startup: config.speed_startup,
            cruise: config.speed_cruise,
            turn: config.speed_turn,
            brake: config.speed_brake,
            slow: config.speed_slow,
            fast: config.speed_fast,
            accel_step: config.acceleration_step,
            brake_step: config.brake_step,
            boost_increment: config.boost_increment,
        }
    }
}

/// 速度状态机
#[derive(Debug, Clone)]
pub struct SpeedStateMachine {
    thresholds: SpeedThresholds,
    levels: SpeedLevels,
    state: SpeedState,
    /// 最近一次状态转换的时间
    entered_at: Instant,
    over_turn: u32,
    over_curve: u32,
    under_straight: u32,
    boost_remaining: u8,
    transitions: u64,
}

impl SpeedStateMachine {
    pub fn new(config: &Configuration, now: Instant) -> Self {
        SpeedStateMachine {
            thresholds: SpeedThresholds::from_config(config),
            levels: SpeedLevels::from_config(config),
            state: SpeedState::Startup,
            entered_at: now,
            over_turn: 0,
            over_curve: 0,
            under_straight: 0,
            boost_remaining: 0,
            transitions: 0,
        }
    }

    pub fn state(&self) -> SpeedState {
        self.state
    }

    /// 最近一次状态转换的时间
    pub fn entered_at(&self) -> Instant {
        self.entered_at
    }

    /// 累计状态转换次数
    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    pub fn thresholds(&self) -> &SpeedThresholds {
        &self.thresholds
    }

    /// 推进一个周期
    ///
    /// 每个周期最多发生一次状态转换。`Finish` 事件与当前状态无关的事件被忽略。
    pub fn update(&mut self, error: f64, event: Option<TrackEvent>, now: Instant) -> SpeedState {
        let magnitude = error.abs();
        let t = self.thresholds;

        if self.state == SpeedState::Cruise {
            self.boost_remaining = self.boost_remaining.saturating_sub(1);
        }

        let next = match self.state {
            SpeedState::Startup => {
                (now.saturating_duration_since(self.entered_at) >= t.startup_delay)
                    .then_some(SpeedState::Cruise)
            },
            SpeedState::Cruise => match event {
                Some(TrackEvent::Slow) => Some(SpeedState::Slow),
                Some(TrackEvent::Fast) => Some(SpeedState::Fast),
                _ => {
                    self.over_turn = count_if(magnitude > t.turn, self.over_turn);
                    (self.over_turn >= t.debounce_cycles).then_some(SpeedState::Turn)
                },
            },
            SpeedState::Turn => {
                self.over_curve = count_if(magnitude > t.curve, self.over_curve);
                if self.over_curve >= t.debounce_cycles {
                    Some(SpeedState::Brake)
                } else {
                    self.straightened(magnitude)
                }
            },
            SpeedState::Brake => self.straightened(magnitude),
            SpeedState::Slow | SpeedState::Fast => match event {
                Some(TrackEvent::Slow) => Some(SpeedState::Slow),
                Some(TrackEvent::Fast) => Some(SpeedState::Fast),
                _ => (now.saturating_duration_since(self.entered_at) >= t.marker_hold)
                    .then_some(SpeedState::Cruise),
            },
        };

        match next {
            Some(state) => self.transition(state, now),
            None => {
                if let Some(event) = event {
                    tracing::debug!("Ignoring {:?} event in {} state", event, self.state);
                }
            },
        }

        self.state
    }

    /// 按事件名推进；未知事件名被忽略
    pub fn update_named(&mut self, error: f64, event: Option<&str>, now: Instant) -> SpeedState {
        let parsed = event.and_then(|code| {
            let parsed = TrackEvent::parse(code);
            if parsed.is_none() {
                tracing::warn!("Ignoring unknown track event: {:?}", code);
            }
            parsed
        });
        self.update(error, parsed, now)
    }

    fn straightened(&mut self, magnitude: f64) -> Option<SpeedState> {
        self.under_straight = count_if(magnitude < self.thresholds.straight, self.under_straight);
        (self.under_straight > self.thresholds.hysteresis_cycles).then_some(SpeedState::Cruise)
    }

    fn transition(&mut self, next: SpeedState, now: Instant) {
        let previous = self.state;

        // 同一标记状态再次触发：只重新计时
        if previous != next {
            tracing::info!("Speed state {} -> {}", previous, next);
            self.transitions += 1;
        }

        self.boost_remaining = match (previous, next) {
            (SpeedState::Turn | SpeedState::Brake, SpeedState::Cruise) => {
                self.thresholds.boost_duration
            },
            _ => 0,
        };

        self.state = next;
        self.entered_at = now;
        self.over_turn = 0;
        self.over_curve = 0;
        self.under_straight = 0;
    }

    /// 进入停车刹车阶段：直接切到 BRAKE
    ///
    /// 之后由调用方停止推进状态机，直到切断电机。
    pub fn brake(&mut self, now: Instant) {
        if self.state != SpeedState::Brake {
            self.transition(SpeedState::Brake, now);
        }
    }

    /// 当前状态的速度参数
    pub fn profile(&self) -> SpeedProfile {
        let l = self.levels;
        let base = match self.state {
            SpeedState::Startup => l.startup,
            SpeedState::Cruise if self.boost_remaining > 0 => {
                l.cruise.saturating_add(l.boost_increment)
            },
            SpeedState::Cruise => l.cruise,
            SpeedState::Turn => l.turn,
            SpeedState::Brake => l.brake,
            SpeedState::Slow => l.slow,
            SpeedState::Fast => l.fast,
        };

        SpeedProfile {
            base_speed: f64::from(base),
            accel_step: f64::from(l.accel_step),
            brake_step: f64::from(l.brake_step),
        }
    }

    /// 更新参数，保留当前状态和计数
    pub fn reconfigure(&mut self, config: &Configuration) {
        self.thresholds = SpeedThresholds::from_config(config);
        self.levels = SpeedLevels::from_config(config);
    }

    /// 显式复位，重新进入 STARTUP
    pub fn reset(&mut self, now: Instant) {
        self.state = SpeedState::Startup;
        self.entered_at = now;
        self.over_turn = 0;
        self.over_curve = 0;
        self.under_straight = 0;
        self.boost_remaining = 0;
    }
}

fn count_if(condition: bool, count: u32) -> u32 {
    if condition { count.saturating_add(1) } else { 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linebot_config::ParamValue;

    const PERIOD: Duration = Duration::from_millis(10);

    fn config() -> Configuration {
        Configuration::default()
            .with_overrides([
                ("turn_threshold", ParamValue::Float(40.0)),
                ("curve_threshold", ParamValue::Float(70.0)),
                ("straight_threshold", ParamValue::Float(10.0)),
                ("curve_debounce_cycles", ParamValue::Int(2)),
                ("straight_hysteresis_cycles", ParamValue::Int(2)),
                ("startup_delay_ms", ParamValue::Int(10)),
                ("marker_hold_ms", ParamValue::Int(50)),
                ("boost_duration", ParamValue::Int(3)),
                ("boost_increment", ParamValue::Int(20)),
            ])
            .unwrap()
    }

    /// 按固定周期喂入误差序列，返回每周期的状态
    fn run(machine: &mut SpeedStateMachine, t0: Instant, errors: &[f64]) -> Vec<SpeedState> {
        errors
            .iter()
            .enumerate()
            .map(|(i, &e)| machine.update(e, None, t0 + PERIOD * i as u32))
            .collect()
    }

    #[test]
    fn test_reference_trace() {
        use SpeedState::*;
        let t0 = Instant::now();
        let mut machine = SpeedStateMachine::new(&config(), t0);

        let trace = run(&mut machine, t0, &[0.0, 0.0, 50.0, 50.0, 80.0, 80.0, 5.0, 5.0, 5.0]);
        assert_eq!(
            trace,
            vec![Startup, Cruise, Cruise, Turn, Turn, Brake, Brake, Brake, Cruise]
        );
        assert_eq!(machine.transitions(), 4);
    }

    #[test]
    fn test_negative_errors_use_magnitude() {
        use SpeedState::*;
        let t0 = Instant::now();
        let mut machine = SpeedStateMachine::new(&config(), t0);

        let trace = run(&mut machine, t0, &[0.0, 0.0, -50.0, -50.0, -80.0, -80.0]);
        assert_eq!(trace, vec![Startup, Cruise, Cruise, Turn, Turn, Brake]);
    }

    #[test]
    fn test_single_noisy_sample_does_not_turn() {
        let t0 = Instant::now();
        let mut machine = SpeedStateMachine::new(&config(), t0);

        let trace = run(&mut machine, t0, &[0.0, 0.0, 50.0, 0.0, 50.0, 0.0]);
        assert!(trace[1..].iter().all(|s| *s == SpeedState::Cruise));
    }

    #[test]
    fn test_single_over_curve_sample_stays_in_turn() {
        use SpeedState::*;
        let t0 = Instant::now();
        let mut machine = SpeedStateMachine::new(&config(), t0);

        let trace = run(&mut machine, t0, &[0.0, 0.0, 50.0, 50.0, 50.0, 80.0, 50.0, 50.0]);
        assert_eq!(trace, vec![Startup, Cruise, Cruise, Turn, Turn, Turn, Turn, Turn]);
        assert_eq!(machine.profile().base_speed, f64::from(config().speed_turn));
    }

    #[test]
    fn test_brake_for_stop() {
        let config = config();
        let t0 = Instant::now();
        let mut machine = SpeedStateMachine::new(&config, t0);
        machine.update(0.0, None, t0 + PERIOD);
        assert_eq!(machine.state(), SpeedState::Cruise);

        machine.brake(t0 + PERIOD * 2);
        assert_eq!(machine.state(), SpeedState::Brake);
        assert_eq!(machine.entered_at(), t0 + PERIOD * 2);
        assert_eq!(machine.profile().base_speed, f64::from(config.speed_brake));
        assert_eq!(machine.transitions(), 2);

        // 已在 BRAKE 时不重复计数
        machine.brake(t0 + PERIOD * 3);
        assert_eq!(machine.transitions(), 2);
        assert_eq!(machine.entered_at(), t0 + PERIOD * 2);
    }

    #[test]
    fn test_hysteresis_resets_on_rebound() {
        use SpeedState::*;
        let t0 = Instant::now();
        let mut machine = SpeedStateMachine::new(&config(), t0);

        // 进入 TURN 后误差在阈值附近来回，迟滞计数被打断
        let trace = run(
            &mut machine,
            t0,
            &[0.0, 0.0, 50.0, 50.0, 5.0, 5.0, 20.0, 5.0, 5.0, 5.0],
        );
        assert_eq!(
            trace,
            vec![Startup, Cruise, Cruise, Turn, Turn, Turn, Turn, Turn, Turn, Cruise]
        );
    }

    #[test]
    fn test_startup_waits_for_delay() {
        let t0 = Instant::now();
        let mut machine = SpeedStateMachine::new(
            &config().with_overrides([("startup_delay_ms", ParamValue::Int(100))]).unwrap(),
            t0,
        );

        // 启动期间的大误差不触发转弯
        let trace = run(&mut machine, t0, &[90.0; 10]);
        assert!(trace.iter().all(|s| *s == SpeedState::Startup));
        assert_eq!(machine.update(0.0, None, t0 + Duration::from_millis(100)), SpeedState::Cruise);
    }

    #[test]
    fn test_marker_event_held_then_reverts() {
        let t0 = Instant::now();
        let mut machine = SpeedStateMachine::new(&config(), t0);
        machine.update(0.0, None, t0 + PERIOD);
        assert_eq!(machine.state(), SpeedState::Cruise);

        let t1 = t0 + PERIOD * 2;
        assert_eq!(machine.update(0.0, Some(TrackEvent::Slow), t1), SpeedState::Slow);

        // 保持期间即使误差很大也不转弯
        assert_eq!(machine.update(90.0, None, t1 + Duration::from_millis(20)), SpeedState::Slow);
        assert_eq!(machine.update(90.0, None, t1 + Duration::from_millis(40)), SpeedState::Slow);
        assert_eq!(machine.update(0.0, None, t1 + Duration::from_millis(50)), SpeedState::Cruise);
    }

    #[test]
    fn test_marker_event_rearms() {
        let t0 = Instant::now();
        let mut machine = SpeedStateMachine::new(&config(), t0);
        machine.update(0.0, None, t0 + PERIOD);

        let t1 = t0 + PERIOD * 2;
        machine.update(0.0, Some(TrackEvent::Fast), t1);
        let t2 = t1 + Duration::from_millis(40);
        assert_eq!(machine.update(0.0, Some(TrackEvent::Slow), t2), SpeedState::Slow);
        assert_eq!(machine.entered_at(), t2);

        // 从 t2 重新计时
        assert_eq!(machine.update(0.0, None, t1 + Duration::from_millis(60)), SpeedState::Slow);
        assert_eq!(machine.update(0.0, None, t2 + Duration::from_millis(50)), SpeedState::Cruise);
    }

    #[test]
    fn test_events_ignored_outside_cruise() {
        let t0 = Instant::now();
        let mut machine = SpeedStateMachine::new(&config(), t0);

        assert_eq!(machine.update(0.0, Some(TrackEvent::Fast), t0), SpeedState::Startup);

        run(&mut machine, t0, &[0.0, 0.0, 50.0, 50.0]);
        assert_eq!(machine.state(), SpeedState::Turn);
        assert_eq!(
            machine.update(50.0, Some(TrackEvent::Slow), t0 + PERIOD * 4),
            SpeedState::Turn
        );
        assert_eq!(
            machine.update(50.0, Some(TrackEvent::Finish), t0 + PERIOD * 5),
            SpeedState::Turn
        );
    }

    #[test]
    fn test_unknown_event_name_ignored() {
        let t0 = Instant::now();
        let mut machine = SpeedStateMachine::new(&config(), t0);
        machine.update(0.0, None, t0 + PERIOD);

        assert_eq!(
            machine.update_named(0.0, Some("warp"), t0 + PERIOD * 2),
            SpeedState::Cruise
        );
        assert_eq!(
            machine.update_named(0.0, Some(" FAST "), t0 + PERIOD * 3),
            SpeedState::Fast
        );
    }

    #[test]
    fn test_profiles() {
        let config = config();
        let t0 = Instant::now();
        let mut machine = SpeedStateMachine::new(&config, t0);

        let p = machine.profile();
        assert_eq!(p.base_speed, f64::from(config.speed_startup));
        assert_eq!(p.accel_step, f64::from(config.acceleration_step));
        assert_eq!(p.brake_step, f64::from(config.brake_step));

        run(&mut machine, t0, &[0.0, 0.0, 50.0, 50.0]);
        assert_eq!(machine.profile().base_speed, f64::from(config.speed_turn));

        machine.update(80.0, None, t0 + PERIOD * 4);
        machine.update(80.0, None, t0 + PERIOD * 5);
        assert_eq!(machine.profile().base_speed, f64::from(config.speed_brake));
    }

    #[test]
    fn test_boost_after_curve_exit() {
        let config = config();
        let cruise = f64::from(config.speed_cruise);
        let boosted = cruise + 20.0;

        let t0 = Instant::now();
        let mut machine = SpeedStateMachine::new(&config, t0);
        run(&mut machine, t0, &[0.0, 0.0, 50.0, 50.0, 5.0, 5.0, 5.0]);
        assert_eq!(machine.state(), SpeedState::Cruise);

        let mut speeds = vec![machine.profile().base_speed];
        for i in 7..11 {
            machine.update(0.0, None, t0 + PERIOD * i);
            speeds.push(machine.profile().base_speed);
        }
        // boost_duration = 3
        assert_eq!(speeds, vec![boosted, boosted, boosted, cruise, cruise]);
    }

    #[test]
    fn test_no_boost_after_startup() {
        let config = config();
        let t0 = Instant::now();
        let mut machine = SpeedStateMachine::new(&config, t0);
        run(&mut machine, t0, &[0.0, 0.0]);
        assert_eq!(machine.profile().base_speed, f64::from(config.speed_cruise));
    }

    #[test]
    fn test_reset_reenters_startup() {
        let t0 = Instant::now();
        let mut machine = SpeedStateMachine::new(&config(), t0);
        run(&mut machine, t0, &[0.0, 0.0, 50.0, 50.0]);
        assert_eq!(machine.state(), SpeedState::Turn);

        let t1 = t0 + Duration::from_secs(1);
        machine.reset(t1);
        assert_eq!(machine.state(), SpeedState::Startup);
        assert_eq!(machine.update(0.0, None, t1), SpeedState::Startup);
        assert_eq!(machine.update(0.0, None, t1 + PERIOD), SpeedState::Cruise);
    }

    #[test]
    fn test_track_event_parse() {
        assert_eq!(TrackEvent::parse("slow"), Some(TrackEvent::Slow));
        assert_eq!(TrackEvent::parse("Finish"), Some(TrackEvent::Finish));
        assert_eq!(TrackEvent::parse("boost"), None);
        assert_eq!(TrackEvent::Fast.code(), "fast");
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SpeedState::Brake.to_string(), "BRAKE");
    }
}
