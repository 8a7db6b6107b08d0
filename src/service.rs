use std::sync::Arc;
use std::time::{Instant, SystemTime};

use xxhash_rust::xxh3::xxh3_64_with_seed;

use crate::cache::LiveCache;
use crate::core::{
    normalize_term, CacheStatus, KeywordRecord, RankingEntry, SearchStatistics, StoreComparison,
};
use crate::stats::SyncReport;
use crate::storage::{PersistenceGateway, StorageError};
use crate::sync::{CacheWarmer, Reconciler};

const BULK_SEED: u64 = 0x5EED_5EA2_C4A7_0001;
const COMPARE_LIMIT: usize = 10;

/// 对外门面：检索事件写入 live，读请求只查 live；durable 由后台 Reconciler 回写。
pub struct SearchService<G: PersistenceGateway> {
    live: Arc<LiveCache>,
    gateway: Arc<G>,
    reconciler: Arc<Reconciler<G>>,
}

impl<G: PersistenceGateway> SearchService<G> {
    pub fn new(reconciler: Arc<Reconciler<G>>) -> Self {
        Self {
            live: reconciler.live().clone(),
            gateway: reconciler.gateway().clone(),
            reconciler,
        }
    }

    pub fn live(&self) -> &Arc<LiveCache> {
        &self.live
    }

    pub fn reconciler(&self) -> &Arc<Reconciler<G>> {
        &self.reconciler
    }

    pub async fn warm(&self, top_k: usize) -> usize {
        CacheWarmer::new(self.live.clone(), self.gateway.clone())
            .warm_or_log(top_k)
            .await
    }

    /// 单次检索事件：热榜 +1、提升到最近列表、标记 dirty。
    /// 空白词直接忽略，返回 false。
    pub fn process_search(&self, raw: &str) -> bool {
        let Some(term) = normalize_term(raw) else {
            return false;
        };
        self.live.ranking.increment(&term, 1.0);
        self.live.recent.push_recent(&term);
        self.live.dirty.mark(&term);
        true
    }

    /// 批量事件：按 delta 自增，recent 按顺序提升后统一截断，自增过的词全部标记 dirty
    pub fn process_search_bulk(&self, increments: &[(String, u64)], recent: &[String]) {
        let mut touched = Vec::with_capacity(increments.len());
        for (raw, delta) in increments {
            if let Some(term) = normalize_term(raw) {
                self.live.ranking.increment(&term, *delta as f64);
                touched.push(term);
            }
        }
        let recent: Vec<String> = recent.iter().filter_map(|r| normalize_term(r)).collect();
        self.live.recent.push_many(&recent);
        self.live.dirty.mark_all(&touched);
    }

    pub fn get_popular(&self, n: usize) -> Vec<String> {
        self.get_popular_with_scores(n)
            .into_iter()
            .map(|e| e.term)
            .collect()
    }

    /// live 读失败时清空 live 并返回空结果，错误不向调用方传播
    pub fn get_popular_with_scores(&self, n: usize) -> Vec<RankingEntry> {
        match self.live.ranking.try_top_n(n) {
            Ok(entries) => entries,
            Err(e) => {
                self.live.safe_purge(&e);
                Vec::new()
            }
        }
    }

    pub fn get_recent(&self, n: usize) -> Vec<String> {
        self.live.recent.range(n)
    }

    pub fn get_status(&self) -> CacheStatus {
        let popular = self.get_popular_with_scores(usize::MAX);
        let recent = self.live.recent.range(usize::MAX);
        CacheStatus {
            popular_count: popular.len(),
            recent_count: recent.len(),
            popular,
            recent,
        }
    }

    pub async fn search_statistics(&self) -> Result<SearchStatistics, StorageError> {
        Ok(SearchStatistics {
            total_keywords: self.gateway.count_all().await?,
            realtime_keyword_count: self.live.ranking.cardinality(),
            last_updated: SystemTime::now(),
        })
    }

    pub fn sync_report(&self) -> SyncReport {
        self.reconciler
            .stats()
            .report(self.live.ranking.cardinality(), self.live.dirty.len())
    }

    pub async fn popular_from_storage(&self, n: usize) -> Result<Vec<String>, StorageError> {
        let records = self.gateway.find_top_n_by_count_desc(n).await?;
        Ok(records.into_iter().map(|r| r.term).collect())
    }

    pub async fn recent_from_storage(&self, n: usize) -> Result<Vec<String>, StorageError> {
        let records = self.gateway.find_top_n_by_last_seen_desc(n).await?;
        Ok(records.into_iter().map(|r| r.term).collect())
    }

    /// 自动补全走 durable 表（live 只保留热词，不适合前缀检索）
    pub async fn autocomplete(&self, prefix: &str, n: usize) -> Result<Vec<String>, StorageError> {
        let Some(prefix) = normalize_term(prefix) else {
            return Ok(Vec::new());
        };
        let records = self.gateway.find_by_prefix(&prefix, n).await?;
        Ok(records.into_iter().map(|r| r.term).collect())
    }

    pub async fn compare_live_vs_storage(&self) -> Result<StoreComparison, StorageError> {
        let started = Instant::now();
        let live_result = self.get_popular(COMPARE_LIMIT);
        let live_micros = started.elapsed().as_micros() as u64;

        let started = Instant::now();
        let storage_result = self.popular_from_storage(COMPARE_LIMIT).await?;
        let storage_micros = started.elapsed().as_micros() as u64;

        Ok(StoreComparison {
            live_result,
            storage_result,
            live_micros,
            storage_micros,
            speedup: storage_micros as f64 / live_micros.max(1) as f64,
        })
    }

    /// 只清 live（热榜 + 最近列表）；durable 与 DirtyKeySet 由调用方自行协调
    pub fn clear_cache(&self) {
        self.live.clear();
        tracing::info!("Live cache cleared");
    }

    /// 管理/测试入口：直接灌入 live，然后同步跑一轮 full resync，
    /// 返回时 durable 已反映这批数据。
    pub async fn bulk_load(
        &self,
        entries: &[(String, u64)],
        recent_seed: &[String],
    ) -> Result<CacheStatus, StorageError> {
        self.process_search_bulk(entries, recent_seed);
        let outcome = self.reconciler.full_resync().await?;
        tracing::info!(
            "Bulk load: {} entries seeded, {} records persisted",
            entries.len(),
            outcome.written
        );
        Ok(self.get_status())
    }

    /// 重置并生成 `count` 条测试数据：前 1% 为高频词，其余为长尾。
    /// 分数由 xxh3(index) 推导，同一 count 下结果可复现。
    pub async fn generate_bulk_data(&self, count: usize) -> Result<usize, StorageError> {
        tracing::info!("Generating {} synthetic keywords", count);

        let now = SystemTime::now();
        let popular_cutoff = count / 100;
        let records: Vec<KeywordRecord> = (1..=count)
            .map(|i| {
                let h = xxh3_64_with_seed(&(i as u64).to_le_bytes(), BULK_SEED);
                if i <= popular_cutoff {
                    KeywordRecord::fresh(format!("popular_{}", i), 1_000 + h % 100_000, now)
                } else {
                    KeywordRecord::fresh(format!("test_{}", i), 1 + h % 100, now)
                }
            })
            .collect();

        self.reconciler.reset_and_seed(records).await?;
        self.live
            .recent
            .push_many((0..count.min(10)).map(|i| format!("test_{}", i)));

        tracing::info!("Synthetic data ready: {} keywords", count);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileGateway, MemoryGateway};
    use std::path::PathBuf;

    fn service() -> (SearchService<MemoryGateway>, Arc<MemoryGateway>) {
        let live = Arc::new(LiveCache::default());
        let gw = Arc::new(MemoryGateway::new());
        let rec = Arc::new(Reconciler::new(live, gw.clone()));
        (SearchService::new(rec), gw)
    }

    #[test]
    fn search_updates_ranking_recent_and_dirty() {
        let (svc, _) = service();
        for _ in 0..3 {
            assert!(svc.process_search("apple"));
        }
        assert!(svc.process_search(" banana "));
        assert!(!svc.process_search("   "));

        assert_eq!(svc.get_popular(2), vec!["apple", "banana"]);
        assert_eq!(
            svc.get_popular_with_scores(1),
            vec![RankingEntry::new("apple", 3.0)]
        );
        assert_eq!(svc.get_recent(10), vec!["banana", "apple"]);
        assert!(svc.live().dirty.contains("banana"));
        assert_eq!(svc.live().dirty.len(), 2);
    }

    #[test]
    fn status_reports_everything() {
        let (svc, _) = service();
        svc.process_search("a");
        svc.process_search("b");
        svc.process_search("a");
        let st = svc.get_status();
        assert_eq!(st.popular_count, 2);
        assert_eq!(st.recent_count, 2);
        assert_eq!(st.recent, vec!["a", "b"]);
        assert_eq!(st.popular[0], RankingEntry::new("a", 2.0));
    }

    #[test]
    fn corrupted_ranking_is_purged_on_read() {
        let (svc, _) = service();
        svc.process_search("fine");
        svc.live().ranking.set_score("broken", f64::INFINITY);

        assert!(svc.get_popular(10).is_empty());
        assert_eq!(svc.live().ranking.cardinality(), 0);
        assert_eq!(svc.get_recent(10).len(), 0);
    }

    #[tokio::test]
    async fn bulk_load_persists_before_returning() {
        let (svc, gw) = service();
        let status = svc
            .bulk_load(
                &[("x".to_string(), 5), ("y".to_string(), 2), ("".to_string(), 9)],
                &["y".to_string(), "x".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(status.popular_count, 2);
        assert_eq!(status.recent, vec!["x", "y"]);
        assert_eq!(gw.get("x").unwrap().count, 5);
        assert_eq!(gw.get("y").unwrap().count, 2);
    }

    #[tokio::test]
    async fn clear_cache_leaves_durable_storage() {
        let (svc, gw) = service();
        svc.bulk_load(&[("keep".to_string(), 3)], &[]).await.unwrap();
        svc.clear_cache();
        assert!(svc.get_popular(10).is_empty());
        assert!(svc.get_recent(10).is_empty());
        assert_eq!(gw.count_all().await.unwrap(), 1);
        assert_eq!(svc.popular_from_storage(10).await.unwrap(), vec!["keep"]);
    }

    #[tokio::test]
    async fn storage_queries_and_statistics() {
        let (svc, _) = service();
        svc.bulk_load(&[("apple".to_string(), 3), ("apricot".to_string(), 7), ("kiwi".to_string(), 1)], &[])
            .await
            .unwrap();
        svc.process_search("fresh");

        assert_eq!(
            svc.autocomplete("ap", 10).await.unwrap(),
            vec!["apricot", "apple"]
        );
        assert!(svc.autocomplete("  ", 10).await.unwrap().is_empty());
        assert_eq!(svc.recent_from_storage(10).await.unwrap().len(), 3);

        let stats = svc.search_statistics().await.unwrap();
        assert_eq!(stats.total_keywords, 3);
        assert_eq!(stats.realtime_keyword_count, 4);

        let cmp = svc.compare_live_vs_storage().await.unwrap();
        assert_eq!(cmp.live_result[0], "apricot");
        assert_eq!(cmp.storage_result[0], "apricot");
    }

    #[tokio::test]
    async fn generate_bulk_data_resets_and_reseeds() {
        let (svc, gw) = service();
        svc.process_search("stale");
        svc.bulk_load(&[("stale".to_string(), 1)], &[]).await.unwrap();

        assert_eq!(svc.generate_bulk_data(200).await.unwrap(), 200);
        assert_eq!(gw.count_all().await.unwrap(), 200);
        assert!(gw.get("stale").is_none());
        assert_eq!(svc.live().ranking.cardinality(), 200);
        assert!(svc.live().dirty.is_empty());

        let top = svc.get_popular(2);
        assert!(top.iter().all(|t| t.starts_with("popular_")));
        assert_eq!(svc.get_recent(1), vec!["test_9"]);

        // 可复现
        let first = gw.get("test_50").unwrap().count;
        svc.generate_bulk_data(200).await.unwrap();
        assert_eq!(gw.get("test_50").unwrap().count, first);
    }

    fn unique_tmp_dir(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("search-rank-service-{}-{}", tag, nanos))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn generate_during_full_resync_leaves_no_stale_rows() {
        let dir = unique_tmp_dir("reset-race");
        let path = dir.join("keywords.db");
        let gw = Arc::new(FileGateway::open(path.clone()).await.unwrap());
        let live = Arc::new(LiveCache::default());
        let rec = Arc::new(Reconciler::new(live, gw.clone()));
        let svc = SearchService::new(rec.clone());

        for i in 0..50 {
            for _ in 0..=i % 5 {
                svc.process_search(&format!("stale_{}", i));
            }
        }

        for _ in 0..5 {
            let resync = {
                let rec = rec.clone();
                tokio::spawn(async move { rec.full_resync().await })
            };
            let (generated, resynced) = tokio::join!(svc.generate_bulk_data(100), resync);
            assert_eq!(generated.unwrap(), 100);
            resynced.unwrap().unwrap();

            let rows = gw.find_top_n_by_count_desc(usize::MAX).await.unwrap();
            assert_eq!(rows.len(), 100);
            assert!(rows.iter().all(|r| !r.term.starts_with("stale_")));
            assert!(svc.get_popular(usize::MAX).iter().all(|t| !t.starts_with("stale_")));

            for i in 0..50 {
                svc.process_search(&format!("stale_{}", i));
            }
        }

        // 结束状态同样落在文件上
        svc.generate_bulk_data(100).await.unwrap();
        drop(svc);
        drop(rec);
        drop(gw);
        let reopened = FileGateway::open(path).await.unwrap();
        let rows = reopened.find_top_n_by_count_desc(usize::MAX).await.unwrap();
        assert!(rows.iter().all(|r| !r.term.starts_with("stale_")));
        let _ = std::fs::remove_dir_all(dir);
    }
}
