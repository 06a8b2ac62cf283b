//! # linebot-control - 巡线控制核心
//!
//! 固定周期、单线程的控制循环，每个周期严格按顺序执行：
//!
//! ```text
//! 读取传感器 → 估计位置 → PD 修正 → 推进速度状态 → 混合电机输出 → 下发
//! ```
//!
//! ## 包含模块
//!
//! - `sensor` - 传感器阵列（标定、归一化、单槽邮箱）
//! - `estimator` - 加权位置估计
//! - `pid` - 带指数平滑的 PD 控制器
//! - `speed` - 速度状态机（直道/弯道/刹车/标记事件）
//! - `mixer` - 差速混合与速度斜坡
//! - `markers` - 赛道标记解码
//! - `loop_runner` - 控制循环编排
//! - `metrics` / `telemetry` - 运行指标与周期记录
//!
//! ## 使用示例
//!
//! ```rust,no_run
//! use linebot_config::ConfigHandle;
//! use linebot_control::{ControlLoop, MotorActuator, MotorCommand, ReadingMailbox, StopHandle};
//! # use linebot_control::ControlError;
//! # struct Motors;
//! # impl MotorActuator for Motors {
//! #     fn apply(&mut self, _: MotorCommand) {}
//! #     fn halt(&mut self, _: &ControlError) {}
//! # }
//!
//! let config = ConfigHandle::default();
//! let mailbox = ReadingMailbox::new();
//! // 采集线程调用 mailbox.publish(raw)
//! let mut control = ControlLoop::new(config, mailbox.clone(), Motors, ()).unwrap();
//!
//! let stop = StopHandle::new();
//! let report = control.run(&stop);
//! ```

pub mod error;
pub mod estimator;
pub mod loop_runner;
pub mod markers;
pub mod metrics;
pub mod mixer;
pub mod pid;
pub mod sensor;
pub mod speed;
pub mod telemetry;

// 重新导出常用类型
pub use error::ControlError;
pub use estimator::PositionEstimator;
pub use loop_runner::{
    ControlLoop, CycleOutcome, EventSource, LoopReport, MotorActuator, StopHandle, StopReason,
};
pub use markers::{MarkerDecoder, MarkerEvent};
pub use metrics::{LoopMetrics, MetricsSnapshot};
pub use mixer::{MotorCommand, MotorMixer, mix};
pub use pid::{PdGains, PidController};
pub use sensor::{Calibration, ReadingMailbox, SensorArray, SensorDevice, SensorReading};
pub use speed::{SpeedProfile, SpeedState, SpeedStateMachine, SpeedThresholds, TrackEvent};
pub use telemetry::{CycleRecord, LapStats, SessionSummary, Telemetry};
