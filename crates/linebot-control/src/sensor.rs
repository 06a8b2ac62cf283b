//! # 传感器阵列
//!
//! 从硬件读取 N 路原始反射强度，按标定结果归一化到 `0..=100`：
//! 100 表示传感器正对黑线，0 表示背景。
//!
//! 硬件访问由 [`SensorDevice`] 抽象。若采集是异步的（DMA/中断），
//! 采集端通过 [`ReadingMailbox`] 发布最新一帧，控制循环在周期边界取走，
//! 单写单读，读取过程中不会看到写入。

use crate::error::ControlError;
use linebot_config::Configuration;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// 归一化上限
pub const NORMALIZED_MAX: f64 = 100.0;

/// 传感器硬件接口
pub trait SensorDevice {
    /// 读取一帧原始值（非阻塞）
    fn read_raw(&mut self) -> Result<Vec<u16>, ControlError>;
}

impl<F> SensorDevice for F
where
    F: FnMut() -> Result<Vec<u16>, ControlError>,
{
    fn read_raw(&mut self) -> Result<Vec<u16>, ControlError> {
        self()
    }
}

/// 一帧传感器读数
///
/// 原始值与归一化值按索引与权重向量对齐。
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    raw: SmallVec<[u16; 8]>,
    normalized: SmallVec<[f64; 8]>,
}

impl SensorReading {
    /// 直接由归一化值构造（无原始值）
    pub fn from_normalized(values: &[f64]) -> Self {
        SensorReading {
            raw: SmallVec::new(),
            normalized: SmallVec::from_slice(values),
        }
    }

    pub fn raw(&self) -> &[u16] {
        &self.raw
    }

    /// 归一化值（`0..=100`）
    pub fn values(&self) -> &[f64] {
        &self.normalized
    }

    pub fn len(&self) -> usize {
        self.normalized.len()
    }

    pub fn is_empty(&self) -> bool {
        self.normalized.is_empty()
    }
}

/// 每路传感器的标定区间
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Calibration {
    min: Vec<u16>,
    max: Vec<u16>,
}

impl Calibration {
    /// 未标定：使用设备满量程
    pub fn uncalibrated(count: usize, device_max: u16) -> Self {
        Calibration {
            min: vec![0; count],
            max: vec![device_max; count],
        }
    }

    /// 由一批样本计算每路的最小/最大值
    ///
    /// 某一路样本跨度小于 `min_span`（机器人停在线外，只有背景和噪声）时，
    /// 观测到的最大值作为背景基线，0 作为黑线端；否则按扫线结果拉伸。
    pub fn from_samples<S: AsRef<[u16]>>(
        count: usize,
        samples: &[S],
        min_span: u16,
    ) -> Result<Self, ControlError> {
        let mut min = vec![u16::MAX; count];
        let mut max = vec![u16::MIN; count];

        for sample in samples {
            let sample = sample.as_ref();
            if sample.len() != count {
                return Err(ControlError::SensorCountMismatch {
                    expected: count,
                    actual: sample.len(),
                });
            }
            for (i, &v) in sample.iter().enumerate() {
                min[i] = min[i].min(v);
                max[i] = max[i].max(v);
            }
        }

        for i in 0..count {
            if min[i] >= max[i] || max[i] - min[i] < min_span {
                tracing::debug!(
                    "Sensor {} span {}..{} treated as off-line background",
                    i,
                    min[i],
                    max[i]
                );
                min[i] = 0;
            }
        }

        Ok(Calibration { min, max })
    }

    pub fn len(&self) -> usize {
        self.min.len()
    }

    pub fn is_empty(&self) -> bool {
        self.min.is_empty()
    }

    pub fn bounds(&self, index: usize) -> (u16, u16) {
        (self.min[index], self.max[index])
    }

    /// 将第 `index` 路原始值映射到 `0..=100`（越暗越大）
    pub fn normalize(&self, index: usize, raw: u16) -> f64 {
        let (lo, hi) = self.bounds(index);
        if hi <= lo {
            return 0.0;
        }
        let v = raw.clamp(lo, hi);
        f64::from(hi - v) * NORMALIZED_MAX / f64::from(hi - lo)
    }
}

/// 传感器阵列
pub struct SensorArray<D> {
    device: D,
    raw_count: usize,
    min_span: u16,
    calibration: Calibration,
}

impl<D: SensorDevice> SensorArray<D> {
    pub fn new(device: D, config: &Configuration) -> Self {
        let raw_count = config.sensor_count();
        SensorArray {
            device,
            raw_count,
            min_span: config.calibration_min_span,
            calibration: Calibration::uncalibrated(raw_count, config.sensor_max_value),
        }
    }

    /// 期望的读数数量
    pub fn raw_count(&self) -> usize {
        self.raw_count
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// 读取最新一帧并归一化
    pub fn read(&mut self) -> Result<SensorReading, ControlError> {
        let raw = self.device.read_raw()?;
        if raw.len() != self.raw_count {
            return Err(ControlError::SensorCountMismatch {
                expected: self.raw_count,
                actual: raw.len(),
            });
        }

        let normalized = raw
            .iter()
            .enumerate()
            .map(|(i, &v)| self.calibration.normalize(i, v))
            .collect();

        Ok(SensorReading {
            raw: SmallVec::from_vec(raw),
            normalized,
        })
    }

    /// 用一批样本标定
    ///
    /// 空批次不改变现有标定。
    pub fn calibrate<S: AsRef<[u16]>>(&mut self, samples: &[S]) -> Result<(), ControlError> {
        if samples.is_empty() {
            tracing::warn!("Calibration called with no samples, keeping previous calibration");
            return Ok(());
        }

        self.calibration = Calibration::from_samples(self.raw_count, samples, self.min_span)?;
        tracing::info!(
            "Sensor calibration updated from {} samples: {:?}",
            samples.len(),
            self.calibration
        );
        Ok(())
    }

    /// 直接从设备采集 `samples` 帧并标定
    pub fn calibrate_from_device(
        &mut self,
        samples: u32,
        delay: Duration,
    ) -> Result<(), ControlError> {
        let mut batch = Vec::with_capacity(samples as usize);
        for _ in 0..samples {
            batch.push(self.device.read_raw()?);
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
        }
        self.calibrate(&batch)
    }

    /// 检查配置与阵列是否一致
    ///
    /// 传感器数量由硬件决定，配置中的数量改变视为致命不一致。
    pub fn check_config(&self, config: &Configuration) -> Result<(), ControlError> {
        if config.sensor_count() != self.raw_count {
            return Err(ControlError::ConfigurationMismatch(format!(
                "sensor_count changed from {} to {}",
                self.raw_count,
                config.sensor_count()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MailboxInner {
    slot: Mutex<Option<Vec<u16>>>,
    overwrites: AtomicU64,
}

/// 单槽读数邮箱
///
/// 采集端 `publish` 覆盖旧帧，控制循环 `read_raw` 取走最新帧。
/// 空槽（本周期没有新数据）返回 `SensorFault`。
#[derive(Debug, Clone, Default)]
pub struct ReadingMailbox {
    inner: Arc<MailboxInner>,
}

impl ReadingMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// 发布最新一帧
    pub fn publish(&self, raw: Vec<u16>) {
        let previous = self.inner.slot.lock().replace(raw);
        if previous.is_some() {
            self.inner.overwrites.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// 未被读取就被覆盖的帧数
    pub fn overwrites(&self) -> u64 {
        self.inner.overwrites.load(Ordering::Relaxed)
    }
}

impl SensorDevice for ReadingMailbox {
    fn read_raw(&mut self) -> Result<Vec<u16>, ControlError> {
        self.inner
            .slot
            .lock()
            .take()
            .ok_or_else(|| ControlError::SensorFault("no fresh sample in mailbox".to_string()))
    }
}
