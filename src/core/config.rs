use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 运行配置（TOML，所有字段都有默认值）
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub data_dir: PathBuf,
    /// 不落盘：使用内存 gateway（进程退出即丢失）
    pub memory_only: bool,
    pub full_sync_interval_ms: u64,
    pub dirty_sync_interval_ms: u64,
    pub full_sync_top_n: usize,
    pub warm_top_k: usize,
    pub recent_capacity: usize,
    pub default_limit: usize,
    /// 0 = 关闭周期统计报告
    pub stats_interval_secs: u64,
    pub flush_on_shutdown: bool,
    /// dirty resync 失败时把取走的 key 放回 DirtyKeySet
    pub requeue_dirty_on_failure: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 6060,
            data_dir: default_data_dir(),
            memory_only: false,
            full_sync_interval_ms: 10_000,
            dirty_sync_interval_ms: 60_000,
            full_sync_top_n: 100,
            warm_top_k: 100,
            recent_capacity: 10,
            default_limit: 10,
            stats_interval_secs: 0,
            flush_on_shutdown: true,
            requeue_dirty_on_failure: false,
        }
    }
}

impl Config {
    /// 文件不存在时返回默认配置；存在但解析失败则报错（不静默回退）
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::info!("Config {:?} not found, using defaults", path);
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {:?}", path))?;
        Self::from_toml(&text).with_context(|| format!("invalid config {:?}", path))
    }

    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        let cfg: Self = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.full_sync_interval_ms == 0 || self.dirty_sync_interval_ms == 0 {
            anyhow::bail!("sync intervals must be > 0");
        }
        if self.recent_capacity == 0 {
            anyhow::bail!("recent_capacity must be > 0");
        }
        if self.full_sync_top_n == 0 {
            anyhow::bail!("full_sync_top_n must be > 0");
        }
        Ok(())
    }

    pub fn full_sync_interval(&self) -> Duration {
        Duration::from_millis(self.full_sync_interval_ms)
    }

    pub fn dirty_sync_interval(&self) -> Duration {
        Duration::from_millis(self.dirty_sync_interval_ms)
    }

    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_secs > 0).then(|| Duration::from_secs(self.stats_interval_secs))
    }

    pub fn table_path(&self) -> PathBuf {
        self.data_dir.join("keywords.db")
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("search-rank"))
        .unwrap_or_else(|| PathBuf::from("./data"))
}
