use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::Mutex;

use crate::cache::LiveCache;
use crate::core::{score_to_count, KeywordRecord};
use crate::stats::SyncStats;
use crate::storage::{PersistenceGateway, StorageError};

pub const DEFAULT_FULL_SYNC_TOP_N: usize = 100;

/// 单轮同步的结果
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    /// 参与比较的 term 数
    pub examined: usize,
    /// 实际写入 durable 的行数（新建 + 变更）
    pub written: usize,
}

/// live → durable 回写引擎。
///
/// 两种模式：
/// - full：取 live top-N，与 durable 做单调取大合并（durable count 永不回退）
/// - dirty：取走 DirtyKeySet，按当前 live 分数覆盖 durable count
///
/// 两种模式的“读 durable → 计算 → 写 durable”在 `write_gate` 下串行，
/// Reconciler 是 durable 表的唯一写者，因此不存在写写竞争。
pub struct Reconciler<G: PersistenceGateway> {
    live: Arc<LiveCache>,
    gateway: Arc<G>,
    stats: Arc<SyncStats>,
    full_top_n: usize,
    requeue_dirty_on_failure: bool,
    write_gate: Mutex<()>,
}

impl<G: PersistenceGateway> Reconciler<G> {
    pub fn new(live: Arc<LiveCache>, gateway: Arc<G>) -> Self {
        Self {
            live,
            gateway,
            stats: Arc::new(SyncStats::new()),
            full_top_n: DEFAULT_FULL_SYNC_TOP_N,
            requeue_dirty_on_failure: false,
            write_gate: Mutex::new(()),
        }
    }

    pub fn with_full_top_n(mut self, n: usize) -> Self {
        self.full_top_n = n.max(1);
        self
    }

    /// dirty resync 失败时把本轮取走的 key 放回 DirtyKeySet（默认关闭，
    /// 失败的 key 只能等 full resync 顺带覆盖）
    pub fn with_requeue_dirty_on_failure(mut self, enabled: bool) -> Self {
        self.requeue_dirty_on_failure = enabled;
        self
    }

    pub fn live(&self) -> &Arc<LiveCache> {
        &self.live
    }

    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    pub fn stats(&self) -> &Arc<SyncStats> {
        &self.stats
    }

    pub async fn full_resync(&self) -> Result<SyncOutcome, StorageError> {
        let _gate = self.write_gate.lock().await;
        let result = self.full_resync_locked().await;
        match &result {
            Ok(o) => self.stats.record_full(o.written),
            Err(e) => self.stats.record_failure(e),
        }
        result
    }

    async fn full_resync_locked(&self) -> Result<SyncOutcome, StorageError> {
        let snapshot = self.live.ranking.top_n(self.full_top_n);
        if snapshot.is_empty() {
            return Ok(SyncOutcome::default());
        }

        let terms: Vec<String> = snapshot.iter().map(|e| e.term.clone()).collect();
        let mut existing = index_by_term(self.gateway.find_by_terms(&terms).await?);

        let now = SystemTime::now();
        let mut to_save = Vec::new();
        for entry in &snapshot {
            let live_count = entry.count();
            match existing.remove(&entry.term) {
                None => to_save.push(KeywordRecord::fresh(entry.term.clone(), live_count, now)),
                Some(mut rec) => {
                    // 单调取大：冷启动或滞后的 live 快照不能把 durable 拉低
                    if live_count > rec.count {
                        rec.count = live_count;
                        rec.last_seen_at = Some(now);
                        to_save.push(rec);
                    }
                }
            }
        }

        let written = to_save.len();
        if !to_save.is_empty() {
            self.gateway.upsert_all(to_save).await?;
        }
        tracing::debug!(
            "Full resync: examined={}, written={}",
            snapshot.len(),
            written
        );
        Ok(SyncOutcome {
            examined: snapshot.len(),
            written,
        })
    }

    pub async fn dirty_resync(&self) -> Result<SyncOutcome, StorageError> {
        let _gate = self.write_gate.lock().await;

        let drained = self.live.dirty.drain_all();
        if drained.is_empty() {
            return Ok(SyncOutcome::default());
        }
        let mut terms: Vec<String> = drained.into_iter().collect();
        terms.sort();

        match self.dirty_resync_terms(&terms).await {
            Ok(o) => {
                self.stats.record_dirty(o.written);
                Ok(o)
            }
            Err(e) => {
                self.stats.record_failure(&e);
                if self.requeue_dirty_on_failure {
                    self.live.dirty.mark_all(&terms);
                }
                Err(e)
            }
        }
    }

    async fn dirty_resync_terms(&self, terms: &[String]) -> Result<SyncOutcome, StorageError> {
        let mut existing = index_by_term(self.gateway.find_by_terms(terms).await?);

        let now = SystemTime::now();
        let mut to_save = Vec::with_capacity(terms.len());
        for term in terms {
            // 重新读取当前 live 分数，而不是 drain 时刻的值
            let live_count = self
                .live
                .ranking
                .score_of(term)
                .map(score_to_count)
                .unwrap_or(0);
            let rec = match existing.remove(term) {
                None => KeywordRecord::fresh(term.clone(), live_count, now),
                Some(mut rec) => {
                    rec.count = live_count;
                    rec.last_seen_at = Some(now);
                    if rec.first_seen_at.is_none() {
                        rec.first_seen_at = Some(now);
                    }
                    rec
                }
            };
            to_save.push(rec);
        }

        let written = to_save.len();
        self.gateway.upsert_all(to_save).await?;
        tracing::debug!("Dirty resync: written={}", written);
        Ok(SyncOutcome {
            examined: terms.len(),
            written,
        })
    }

    /// 管理入口：在 `write_gate` 下清空 live 与 durable，再写入 `records` 并载入热榜。
    /// 进行中的 resync 先跑完，之后的 resync 只能看到新数据。
    pub async fn reset_and_seed(&self, records: Vec<KeywordRecord>) -> Result<(), StorageError> {
        let _gate = self.write_gate.lock().await;
        self.live.clear();
        self.live.dirty.drain_all();
        self.gateway.delete_all().await?;

        for r in &records {
            self.live.ranking.set_score(&r.term, r.count as f64);
        }
        let rows = records.len();
        self.gateway.upsert_all(records).await?;
        tracing::info!("Durable table reset: {} rows seeded", rows);
        Ok(())
    }

    /// 停机前的最后一次回写：先 dirty（精确覆盖），再 full（兜底）
    pub async fn flush(&self) -> Result<(), StorageError> {
        self.dirty_resync().await?;
        self.full_resync().await?;
        Ok(())
    }
}

fn index_by_term(records: Vec<KeywordRecord>) -> HashMap<String, KeywordRecord> {
    records.into_iter().map(|r| (r.term.clone(), r)).collect()
}
