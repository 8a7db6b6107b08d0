use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// durable 表中的一行：每个检索词一条，由 Reconciler 独占写入。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeywordRecord {
    pub term: String,
    pub count: u64,
    /// 历史数据可能缺失；dirty resync 只在为空时补写
    pub first_seen_at: Option<SystemTime>,
    pub last_seen_at: Option<SystemTime>,
}

impl KeywordRecord {
    /// 首次落盘的新记录：first/last 都取 `now`
    pub fn fresh(term: impl Into<String>, count: u64, now: SystemTime) -> Self {
        Self {
            term: term.into(),
            count,
            first_seen_at: Some(now),
            last_seen_at: Some(now),
        }
    }
}

/// 热榜条目（仅存在于 RankingStore）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub term: String,
    pub score: f64,
}

impl RankingEntry {
    pub fn new(term: impl Into<String>, score: f64) -> Self {
        Self {
            term: term.into(),
            score,
        }
    }

    /// live 分数落到 durable `count`：截断小数，负数/NaN 归零
    pub fn count(&self) -> u64 {
        score_to_count(self.score)
    }
}

pub fn score_to_count(score: f64) -> u64 {
    if score.is_finite() && score > 0.0 {
        score as u64
    } else {
        0
    }
}

/// live 缓存的整体视图
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatus {
    pub popular: Vec<RankingEntry>,
    pub recent: Vec<String>,
    pub popular_count: usize,
    pub recent_count: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchStatistics {
    /// durable 表总行数
    pub total_keywords: u64,
    /// live 热榜中的词数
    pub realtime_keyword_count: usize,
    pub last_updated: SystemTime,
}

/// live 与 durable 的 top-10 对照（附各自耗时）
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreComparison {
    pub live_result: Vec<String>,
    pub storage_result: Vec<String>,
    pub live_micros: u64,
    pub storage_micros: u64,
    pub speedup: f64,
}
