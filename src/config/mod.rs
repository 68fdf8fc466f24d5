use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 句柄缓存的调优参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// 条目空闲多久视为过期
    pub idle_timeout: Duration,
    /// 周期回收的间隔
    pub sweep_interval: Duration,
    /// 最大缓存条目数，超出时淘汰最旧的空闲条目
    pub max_entries: usize,
}

impl CacheConfig {
    pub fn new(idle_timeout: Duration, sweep_interval: Duration, max_entries: usize) -> Self {
        Self {
            idle_timeout,
            sweep_interval,
            max_entries,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(7),
            sweep_interval: Duration::from_secs(60),
            max_entries: 64,
        }
    }
}
