//! 原子配置句柄
//!
//! 控制循环在周期边界读取配置；调参端随时整体替换。
//! 读取是无锁的（`ArcSwap::load_full`），不会看到半更新的配置。

use crate::configuration::Configuration;
use arc_swap::ArcSwap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
struct Shared {
    current: ArcSwap<Configuration>,
    generation: AtomicU64,
}

/// 可跨线程共享的配置句柄
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    shared: Arc<Shared>,
}

impl ConfigHandle {
    pub fn new(config: Configuration) -> Self {
        ConfigHandle {
            shared: Arc::new(Shared {
                current: ArcSwap::from_pointee(config),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// 当前配置快照
    pub fn load(&self) -> Arc<Configuration> {
        self.shared.current.load_full()
    }

    /// 替换配置，返回新的代数
    pub fn store(&self, config: Configuration) -> u64 {
        self.shared.current.store(Arc::new(config));
        // Release: 看到新代数的读者必然能看到新配置
        let generation = self.shared.generation.fetch_add(1, Ordering::Release) + 1;
        tracing::info!("Configuration replaced (generation {})", generation);
        generation
    }

    /// 配置代数（每次 `store` 加一）
    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::Acquire)
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new(Configuration::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamValue;
    use std::thread;

    #[test]
    fn test_store_bumps_generation() {
        let handle = ConfigHandle::default();
        assert_eq!(handle.generation(), 0);

        let updated = handle
            .load()
            .with_overrides([("kp", ParamValue::Float(4.0))])
            .unwrap();
        assert_eq!(handle.store(updated), 1);
        assert_eq!(handle.generation(), 1);
        assert_eq!(handle.load().kp, 4.0);
    }

    #[test]
    fn test_old_snapshot_unchanged() {
        let handle = ConfigHandle::default();
        let before = handle.load();

        handle.store(before.with_overrides([("kd", ParamValue::Float(9.0))]).unwrap());

        assert_eq!(before.kd, Configuration::default().kd);
        assert_eq!(handle.load().kd, 9.0);
    }

    #[test]
    fn test_concurrent_readers_see_whole_configs() {
        let handle = ConfigHandle::default();
        let a = Configuration::default();
        let b = a
            .with_overrides([
                ("kp", ParamValue::Float(5.0)),
                ("kd", ParamValue::Float(5.0)),
            ])
            .unwrap();

        let reader = {
            let handle = handle.clone();
            thread::spawn(move || {
                for _ in 0..10_000 {
                    let c = handle.load();
                    // kp 与 kd 总是成对变化
                    assert!(c.kp == 5.0 && c.kd == 5.0 || c.kp != 5.0 && c.kd != 5.0);
                }
            })
        };

        for i in 0..1_000 {
            handle.store(if i % 2 == 0 { b.clone() } else { a.clone() });
        }
        reader.join().unwrap();
    }
}
