//! simulate 命令
//!
//! 在仿真赛道上运行完整的控制循环：标定 → 固定周期控制 → 汇总。

use crate::commands::config::resolve_config;
use crate::sim::{SimMotors, SimSensors, SimWorld, Track};
use anyhow::{Context, Result, bail};
use clap::Args;
use linebot_config::ConfigHandle;
use linebot_control::{
    ControlLoop, CycleOutcome, EventSource, MetricsSnapshot, MotorActuator, SensorArray,
    SensorDevice, SessionSummary, StopHandle, StopReason,
};
use serde::Serialize;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

/// 仿真命令参数
#[derive(Args, Debug)]
pub struct SimulateCommand {
    /// 配置文件路径（缺省时使用默认位置或内置默认值）
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 最多运行的控制周期数
    #[arg(short = 'n', long, default_value_t = 20_000)]
    pub cycles: u64,

    /// 噪声随机种子
    #[arg(short, long, default_value_t = 42)]
    pub seed: u64,

    /// 每周期传感器读取失败的概率
    #[arg(long, default_value_t = 0.0)]
    pub dropout: f64,

    /// 按真实时间运行（默认使用虚拟时钟，尽快完成）
    #[arg(long)]
    pub realtime: bool,

    /// 以 JSON 输出结果
    #[arg(long)]
    pub json: bool,
}

/// 仿真结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SimEnd {
    LapLimit,
    CycleLimit,
    Interrupted,
    Fault,
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    outcome: SimEnd,
    error: Option<String>,
    config_source: String,
    seed: u64,
    laps: u32,
    simulated_seconds: f64,
    distance_m: f64,
    max_offset_mm: f64,
    motors_halted: bool,
    metrics: MetricsSnapshot,
    summary: SessionSummary,
}

impl SimulateCommand {
    pub fn execute(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.dropout) {
            bail!("--dropout must be within [0, 1], got {}", self.dropout);
        }

        let (config, source) = resolve_config(self.config.as_deref())?;
        tracing::info!("Simulating with configuration from {}", source);

        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let world =
            SimWorld::new(Track::standard(), config.sensor_count(), self.seed, events_tx)
                .into_shared();

        // 1. 标定：机器人在线上左右扫动
        let mut sensors = SensorArray::new(SimSensors(world.clone()), &config);
        let delay = if self.realtime {
            config.calibration_delay()
        } else {
            Duration::ZERO
        };
        world.lock().begin_calibration();
        sensors
            .calibrate_from_device(config.calibration_samples, delay)
            .context("Sensor calibration failed")?;
        {
            let mut w = world.lock();
            w.end_calibration();
            w.set_fault_rate(self.dropout);
        }

        // 2. 控制循环
        let motors = SimMotors {
            world: world.clone(),
            dt: config.control_period().as_secs_f64(),
        };
        let handle = ConfigHandle::new(config);
        let mut control = ControlLoop::with_sensors(handle, sensors, motors, events_rx)
            .context("Failed to create control loop")?;

        let stop = StopHandle::new();
        let interrupt = StopHandle::new();
        {
            let stop = stop.clone();
            let interrupt = interrupt.clone();
            ctrlc::set_handler(move || {
                interrupt.stop();
                stop.stop();
            })
            .context("Failed to install Ctrl+C handler")?;
        }

        let (outcome, error) = if self.realtime {
            self.run_realtime(&mut control, &stop, &interrupt)
        } else {
            self.run_virtual(&mut control, &stop)
        };

        // 3. 汇总
        let report = {
            let w = world.lock();
            SimulationReport {
                outcome,
                error,
                config_source: source,
                seed: self.seed,
                laps: control.laps(),
                simulated_seconds: w.elapsed_s(),
                distance_m: w.distance_m(),
                max_offset_mm: w.max_offset_mm(),
                motors_halted: w.halted(),
                metrics: control.metrics().snapshot(),
                summary: control.telemetry().summary(),
            }
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_report(&report);
        }

        match report.error {
            Some(error) => bail!("control loop halted: {}", error),
            None => Ok(()),
        }
    }

    /// 虚拟时钟：每周期时间戳前进一个控制周期
    fn run_virtual<D, A, E>(
        &self,
        control: &mut ControlLoop<D, A, E>,
        stop: &StopHandle,
    ) -> (SimEnd, Option<String>)
    where
        D: SensorDevice,
        A: MotorActuator,
        E: EventSource,
    {
        let mut now = Instant::now();
        for _ in 0..self.cycles {
            if stop.is_stopped() {
                return (SimEnd::Interrupted, None);
            }

            now += control.period();
            match control.step(now) {
                Ok(CycleOutcome::Finished { .. }) => return (SimEnd::LapLimit, None),
                Ok(_) => {},
                Err(e) => return (SimEnd::Fault, Some(e.to_string())),
            }
        }
        (SimEnd::CycleLimit, None)
    }

    /// 真实时钟：由控制循环自身按周期调度
    fn run_realtime<D, A, E>(
        &self,
        control: &mut ControlLoop<D, A, E>,
        stop: &StopHandle,
        interrupt: &StopHandle,
    ) -> (SimEnd, Option<String>)
    where
        D: SensorDevice,
        A: MotorActuator,
        E: EventSource,
    {
        let limit = control.period().mul_f64(self.cycles as f64);
        {
            let stop = stop.clone();
            thread::spawn(move || {
                thread::sleep(limit);
                stop.stop();
            });
        }

        match control.run(stop) {
            Ok(report) => match report.reason {
                StopReason::LapLimit => (SimEnd::LapLimit, None),
                StopReason::Requested if interrupt.is_stopped() => (SimEnd::Interrupted, None),
                StopReason::Requested => (SimEnd::CycleLimit, None),
            },
            Err(e) => (SimEnd::Fault, Some(e.to_string())),
        }
    }
}

fn print_report(report: &SimulationReport) {
    let outcome = match report.outcome {
        SimEnd::LapLimit => "🏁 Lap limit reached",
        SimEnd::CycleLimit => "⏱️  Cycle limit reached",
        SimEnd::Interrupted => "🛑 Interrupted",
        SimEnd::Fault => "❌ Control loop halted",
    };
    let m = &report.metrics;
    let s = &report.summary;

    println!("{}", outcome);
    if let Some(ref error) = report.error {
        println!("  Error: {}", error);
    }
    println!("  Configuration: {}", report.config_source);
    println!("  Seed: {}", report.seed);
    println!();
    println!("📊 Session:");
    println!("  Laps: {}", report.laps);
    println!("  Simulated time: {:.2} s", report.simulated_seconds);
    println!("  Distance: {:.2} m", report.distance_m);
    println!("  Max lateral offset: {:.1} mm", report.max_offset_mm);
    println!("  Curve entries: {}", s.curve_entries);
    println!("  Mean |error|: {:.2}", s.mean_abs_error);
    println!("  Max |error|: {:.2}", s.max_abs_error);
    println!("  Max base speed: {:.0}", s.max_base_speed);
    if let Some(state) = s.final_state {
        println!("  Final state: {}", state);
    }
    for lap in &s.laps {
        println!(
            "  🏁 Lap {}: {:.2} s, {} curves, deviation max {:.1} / mean {:.1}, max speed {:.0}",
            lap.lap,
            lap.duration_s,
            lap.curves,
            lap.max_deviation,
            lap.mean_deviation,
            lap.max_speed
        );
    }
    println!();
    println!("⚙️  Loop:");
    println!("  Cycles: {}", m.cycles);
    println!("  Skipped: {} ({:.2}%)", m.skipped_cycles, m.skip_rate());
    println!("  Overruns: {}", m.overruns);
    println!("  State transitions: {}", m.state_transitions);
}
