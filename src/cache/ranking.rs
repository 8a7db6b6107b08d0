use dashmap::DashMap;

use crate::cache::LiveStoreError;
use crate::core::RankingEntry;

/// 实时热榜：term → 累计分数。
///
/// `increment` 通过 DashMap 的 entry API 在分片写锁内完成读改写，
/// 同一个 key 的并发自增不会丢失更新。
pub struct RankingStore {
    scores: DashMap<String, f64>,
}

impl RankingStore {
    pub fn new() -> Self {
        Self {
            scores: DashMap::new(),
        }
    }

    /// 空白 term 静默忽略（调用方负责校验）
    pub fn increment(&self, term: &str, delta: f64) {
        if term.trim().is_empty() {
            return;
        }
        match self.scores.get_mut(term) {
            Some(mut score) => *score += delta,
            None => {
                *self.scores.entry(term.to_string()).or_insert(0.0) += delta;
            }
        }
    }

    /// 直接覆盖分数（预热用，重复调用幂等）
    pub fn set_score(&self, term: &str, score: f64) {
        if term.trim().is_empty() {
            return;
        }
        self.scores.insert(term.to_string(), score);
    }

    pub fn score_of(&self, term: &str) -> Option<f64> {
        self.scores.get(term).map(|s| *s)
    }

    pub fn cardinality(&self) -> usize {
        self.scores.len()
    }

    pub fn clear(&self) {
        self.scores.clear();
    }

    /// 调用时刻的快照，按分数降序；同分按 term 升序，保证单次调用内确定
    pub fn top_n(&self, n: usize) -> Vec<RankingEntry> {
        if n == 0 {
            return Vec::new();
        }
        let mut entries: Vec<RankingEntry> = self
            .scores
            .iter()
            .map(|e| RankingEntry::new(e.key().clone(), *e.value()))
            .collect();
        sort_desc(&mut entries);
        entries.truncate(n);
        entries
    }

    /// 带完整性校验的 top_n：任何非有限分数都视为 live store 损坏
    pub fn try_top_n(&self, n: usize) -> Result<Vec<RankingEntry>, LiveStoreError> {
        if let Some(bad) = self.scores.iter().find(|e| !e.value().is_finite()) {
            return Err(LiveStoreError::Corrupted {
                term: bad.key().clone(),
            });
        }
        Ok(self.top_n(n))
    }
}

impl Default for RankingStore {
    fn default() -> Self {
        Self::new()
    }
}

fn sort_desc(entries: &mut [RankingEntry]) {
    entries.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.term.cmp(&b.term))
    });
}
