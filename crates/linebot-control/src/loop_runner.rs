//! Loop Runner - 巡线控制循环
//!
//! 每个周期严格按顺序执行，不交错：
//!
//! ```text
//! 配置同步 → 读取传感器 → 估计位置 → PD 修正 → 推进速度状态 → 混合 → 下发
//! ```
//!
//! # 错误处理
//!
//! - **瞬态错误**（`SensorCountMismatch` / `SensorFault` / `InvalidTimestep`）：跳过本周期，
//!   重发上一条电机指令，累计连续跳过次数
//! - **连续跳过超过 `max_skipped_cycles`**：升级为 `TooManySkippedCycles`，失效保护停机
//! - **非瞬态错误**（`ConfigurationMismatch`）：立即停机
//!
//! 停机时 `MotorActuator::halt` 只调用一次，之后的 `step` 均返回 `Err(Halted)`。
//!
//! # 停车
//!
//! 越过终点线的次数达到 `lap_limit` 后进入停车阶段：切到 BRAKE 档位继续循线，
//! `stop_delay_ms` 之后下发 `MotorCommand::STOP` 并返回 `Finished`。
//!
//! STARTUP 的启动延时从第一个周期开始计时，构造后的标定时间不计入。
//!
//! # 配置替换
//!
//! 通过 [`ConfigHandle::generation`] 检测替换，只在周期开始时生效，
//! 同一周期内所有组件看到的是同一份配置。

use crate::error::ControlError;
use crate::estimator::PositionEstimator;
use crate::metrics::{LoopMetrics, MetricsSnapshot};
use crate::mixer::{MotorCommand, MotorMixer};
use crate::pid::{PdGains, PidController};
use crate::sensor::{SensorArray, SensorDevice};
use crate::speed::{SpeedState, SpeedStateMachine, TrackEvent};
use crate::telemetry::{CycleRecord, SessionSummary, Telemetry};
use linebot_config::{ConfigHandle, Configuration};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// 电机执行端
pub trait MotorActuator {
    /// 下发一条指令
    fn apply(&mut self, command: MotorCommand);

    /// 失效保护停机（每次停机只调用一次）
    fn halt(&mut self, reason: &ControlError);
}

/// 外部事件源（赛道标记等），每周期最多取一个事件
pub trait EventSource {
    fn poll_event(&mut self) -> Option<String>;
}

/// 无事件
impl EventSource for () {
    fn poll_event(&mut self) -> Option<String> {
        None
    }
}

impl EventSource for crossbeam_channel::Receiver<String> {
    fn poll_event(&mut self) -> Option<String> {
        self.try_recv().ok()
    }
}

/// 停止请求句柄
///
/// 请求在下一个周期边界生效，不会中断进行中的周期。
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// 单个周期的结果
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// 正常完成并下发指令
    Applied(MotorCommand),

    /// 瞬态错误，重发上一条指令
    Skipped {
        reused: MotorCommand,
        consecutive: u32,
        error: ControlError,
    },

    /// 达到圈数上限，已下发停止指令
    Finished { laps: u32 },
}

/// 正常结束的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// 外部停止请求
    Requested,
    /// 达到圈数上限
    LapLimit,
}

/// 运行报告
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoopReport {
    pub reason: StopReason,
    pub laps: u32,
    pub last_command: MotorCommand,
    pub metrics: MetricsSnapshot,
    pub summary: SessionSummary,
}

/// 巡线控制循环
pub struct ControlLoop<D, A, E> {
    config: ConfigHandle,
    generation: u64,
    period: Duration,
    max_skipped_cycles: u32,
    lap_limit: u32,
    stop_delay: Duration,

    sensors: SensorArray<D>,
    estimator: PositionEstimator,
    pid: PidController,
    speed: SpeedStateMachine,
    mixer: MotorMixer,
    actuator: A,
    events: E,

    cycle: u64,
    started: bool,
    last_tick: Option<Instant>,
    last_command: MotorCommand,
    consecutive_skips: u32,
    laps: u32,
    stopping_since: Option<Instant>,
    finished: bool,
    halted: bool,

    metrics: Arc<LoopMetrics>,
    telemetry: Telemetry,
}

impl<D, A, E> ControlLoop<D, A, E>
where
    D: SensorDevice,
    A: MotorActuator,
    E: EventSource,
{
    /// 以未标定的传感器阵列创建控制循环
    pub fn new(config: ConfigHandle, device: D, actuator: A, events: E) -> Result<Self, ControlError> {
        let sensors = SensorArray::new(device, &config.load());
        Self::with_sensors(config, sensors, actuator, events)
    }

    /// 以已构造（通常已标定）的传感器阵列创建控制循环
    ///
    /// 配置中的传感器数量或权重数量与阵列不一致时返回 `ConfigurationMismatch`。
    pub fn with_sensors(
        config: ConfigHandle,
        sensors: SensorArray<D>,
        actuator: A,
        events: E,
    ) -> Result<Self, ControlError> {
        let generation = config.generation();
        let snapshot = config.load();
        validate(&snapshot, &sensors)?;

        tracing::info!(
            "Control loop created: {} sensors, period {:?}",
            sensors.raw_count(),
            snapshot.control_period()
        );

        Ok(ControlLoop {
            generation,
            period: snapshot.control_period(),
            max_skipped_cycles: snapshot.max_skipped_cycles,
            lap_limit: snapshot.lap_limit,
            stop_delay: snapshot.stop_delay(),
            estimator: PositionEstimator::from_config(&snapshot),
            pid: PidController::from_config(&snapshot),
            speed: SpeedStateMachine::new(&snapshot, Instant::now()),
            mixer: MotorMixer::from_config(&snapshot),
            config,
            sensors,
            actuator,
            events,
            cycle: 0,
            started: false,
            last_tick: None,
            last_command: MotorCommand::STOP,
            consecutive_skips: 0,
            laps: 0,
            stopping_since: None,
            finished: false,
            halted: false,
            metrics: Arc::new(LoopMetrics::new()),
            telemetry: Telemetry::new(),
        })
    }

    /// 执行一个周期
    ///
    /// `now` 是本周期的时间戳，用于计算 `dt` 和状态机计时。
    pub fn step(&mut self, now: Instant) -> Result<CycleOutcome, ControlError> {
        if self.halted {
            return Err(ControlError::Halted);
        }
        if self.finished {
            return Ok(CycleOutcome::Finished { laps: self.laps });
        }

        self.cycle += 1;
        self.metrics.cycles.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = self.sync_config() {
            return Err(self.halt(e));
        }

        if !self.started {
            self.started = true;
            self.speed.reset(now);
        }

        match self.compute(now) {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_transient() => self.skip(e),
            Err(e) => Err(self.halt(e)),
        }
    }

    /// 以固定周期运行，直到停止请求、达到圈数上限或致命错误
    ///
    /// 超时周期记录为 overrun，不会阻塞下一周期的调度。
    pub fn run(&mut self, stop: &StopHandle) -> Result<LoopReport, ControlError> {
        use spin_sleep::SpinSleeper;

        if self.halted {
            return Err(ControlError::Halted);
        }

        let sleeper = SpinSleeper::default();
        let mut deadline = Instant::now();

        loop {
            if stop.is_stopped() {
                tracing::info!("Stop requested after {} cycles", self.cycle);
                return Ok(self.report(StopReason::Requested));
            }

            if let CycleOutcome::Finished { .. } = self.step(Instant::now())? {
                return Ok(self.report(StopReason::LapLimit));
            }

            deadline += self.period;
            let now = Instant::now();
            if now > deadline {
                self.metrics.overruns.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "Control cycle {} overran its period by {:?}",
                    self.cycle,
                    now - deadline
                );
                deadline = now;
            } else {
                sleeper.sleep(deadline - now);
            }
        }
    }

    fn compute(&mut self, now: Instant) -> Result<CycleOutcome, ControlError> {
        if self.stop_due(now) {
            return Ok(self.finish());
        }

        let dt = match self.last_tick {
            Some(last) => now.saturating_duration_since(last).as_secs_f64(),
            None => self.period.as_secs_f64(),
        };

        let reading = self.sensors.read()?;
        let position = self.estimator.estimate(&reading)?;
        let correction = self.pid.correct(position, dt)?;
        self.last_tick = Some(now);

        let event = self.poll_event();
        let transitions = self.speed.transitions();
        let state = if self.stopping_since.is_some() {
            // 停车阶段保持 BRAKE，不再响应事件
            self.speed.state()
        } else if event == Some(TrackEvent::Finish) && self.count_lap(now) {
            self.stopping_since = Some(now);
            self.speed.brake(now);
            self.speed.state()
        } else {
            self.speed.update(position, event, now)
        };
        if self.speed.transitions() != transitions {
            self.metrics.state_transitions.fetch_add(1, Ordering::Relaxed);
        }

        if self.stop_due(now) {
            return Ok(self.finish());
        }

        let profile = self.speed.profile();
        let command = self.mixer.drive(&profile, correction);
        self.actuator.apply(command);

        tracing::debug!(
            "cycle {}: position {:.2}, correction {:.2}, state {}, command {:?}",
            self.cycle,
            position,
            correction,
            state,
            command
        );

        self.telemetry.record(CycleRecord {
            cycle: self.cycle,
            position,
            error: self.pid.filtered(),
            correction,
            base_speed: self.mixer.current_base(),
            left: command.left,
            right: command.right,
            state,
        });

        self.last_command = command;
        self.consecutive_skips = 0;
        Ok(CycleOutcome::Applied(command))
    }

    fn poll_event(&mut self) -> Option<TrackEvent> {
        let code = self.events.poll_event()?;
        let event = TrackEvent::parse(&code);
        if event.is_none() {
            tracing::warn!("Ignoring unknown track event: {:?}", code);
        }
        event
    }

    /// 记录一次越过终点线，返回是否达到上限
    fn count_lap(&mut self, now: Instant) -> bool {
        self.laps += 1;
        self.metrics.laps.fetch_add(1, Ordering::Relaxed);

        match self.telemetry.finish_lap(now) {
            Some(lap) => tracing::info!(
                "Lap {} completed in {:.2}s: {} curves, max deviation {:.1}, max speed {:.0}",
                lap.lap,
                lap.duration_s,
                lap.curves,
                lap.max_deviation,
                lap.max_speed
            ),
            None => tracing::info!("Finish line crossed, lap timing started"),
        }

        if self.lap_limit > 0 && self.laps >= self.lap_limit {
            tracing::info!(
                "Lap limit {} reached, braking for {:?} before stop",
                self.lap_limit,
                self.stop_delay
            );
            return true;
        }

        self.telemetry.start_lap(now);
        false
    }

    fn stop_due(&self, now: Instant) -> bool {
        self.stopping_since
            .is_some_and(|since| now.saturating_duration_since(since) >= self.stop_delay)
    }

    fn finish(&mut self) -> CycleOutcome {
        self.finished = true;
        self.last_command = MotorCommand::STOP;
        self.actuator.apply(MotorCommand::STOP);
        tracing::info!("Robot stopped after {} laps", self.laps);
        CycleOutcome::Finished { laps: self.laps }
    }

    fn skip(&mut self, error: ControlError) -> Result<CycleOutcome, ControlError> {
        self.consecutive_skips += 1;
        self.metrics.skipped_cycles.fetch_add(1, Ordering::Relaxed);

        if self.consecutive_skips > self.max_skipped_cycles {
            return Err(self.halt(ControlError::TooManySkippedCycles {
                skipped: self.consecutive_skips,
            }));
        }

        tracing::warn!(
            "Skipping cycle {} ({}/{} consecutive): {}",
            self.cycle,
            self.consecutive_skips,
            self.max_skipped_cycles,
            error
        );
        self.actuator.apply(self.last_command);

        Ok(CycleOutcome::Skipped {
            reused: self.last_command,
            consecutive: self.consecutive_skips,
            error,
        })
    }

    fn halt(&mut self, error: ControlError) -> ControlError {
        self.halted = true;
        self.last_command = MotorCommand::STOP;
        tracing::error!("Control loop halted at cycle {}: {}", self.cycle, error);
        self.actuator.halt(&error);
        error
    }

    /// 在周期边界应用新配置
    fn sync_config(&mut self) -> Result<(), ControlError> {
        let generation = self.config.generation();
        if generation == self.generation {
            return Ok(());
        }

        let config = self.config.load();
        validate(&config, &self.sensors)?;

        self.estimator.reconfigure(&config);
        self.pid.reconfigure(PdGains::from_config(&config));
        self.speed.reconfigure(&config);
        self.mixer.reconfigure(&config);
        self.period = config.control_period();
        self.max_skipped_cycles = config.max_skipped_cycles;
        self.lap_limit = config.lap_limit;
        self.stop_delay = config.stop_delay();
        self.generation = generation;

        self.metrics.config_reloads.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            "Configuration generation {} applied at cycle {}",
            generation,
            self.cycle
        );
        Ok(())
    }

    /// 复位控制状态，重新进入 STARTUP（不清除停机状态）
    ///
    /// 启动延时从复位后的第一个周期开始计时。
    pub fn reset(&mut self, now: Instant) {
        self.estimator.reset();
        self.pid.reset();
        self.speed.reset(now);
        self.mixer.reset();
        self.last_tick = None;
        self.last_command = MotorCommand::STOP;
        self.consecutive_skips = 0;
        self.laps = 0;
        self.telemetry.discard_lap();
        self.stopping_since = None;
        self.finished = false;
        self.started = false;
    }

    fn report(&self, reason: StopReason) -> LoopReport {
        LoopReport {
            reason,
            laps: self.laps,
            last_command: self.last_command,
            metrics: self.metrics.snapshot(),
            summary: self.telemetry.summary(),
        }
    }

    pub fn metrics(&self) -> Arc<LoopMetrics> {
        self.metrics.clone()
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn speed_state(&self) -> SpeedState {
        self.speed.state()
    }

    pub fn last_command(&self) -> MotorCommand {
        self.last_command
    }

    pub fn consecutive_skips(&self) -> u32 {
        self.consecutive_skips
    }

    pub fn laps(&self) -> u32 {
        self.laps
    }

    /// 是否处于到达圈数上限后的停车阶段
    pub fn is_stopping(&self) -> bool {
        self.stopping_since.is_some() && !self.finished
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn sensors_mut(&mut self) -> &mut SensorArray<D> {
        &mut self.sensors
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub fn actuator_mut(&mut self) -> &mut A {
        &mut self.actuator
    }
}

fn validate<D: SensorDevice>(
    config: &Configuration,
    sensors: &SensorArray<D>,
) -> Result<(), ControlError> {
    sensors.check_config(config)?;
    if config.sensor_weights.len() != sensors.raw_count() {
        return Err(ControlError::ConfigurationMismatch(format!(
            "{} sensor weights configured for {} sensors",
            config.sensor_weights.len(),
            sensors.raw_count()
        )));
    }
    Ok(())
}
