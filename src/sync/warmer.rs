use std::sync::Arc;

use crate::cache::LiveCache;
use crate::storage::{PersistenceGateway, StorageError};

pub const DEFAULT_WARM_TOP_K: usize = 100;

/// 启动预热：durable top-K → RankingStore。
///
/// 用 set 而不是 increment，重复预热不会重复计数。
pub struct CacheWarmer<G: PersistenceGateway> {
    live: Arc<LiveCache>,
    gateway: Arc<G>,
}

impl<G: PersistenceGateway> CacheWarmer<G> {
    pub fn new(live: Arc<LiveCache>, gateway: Arc<G>) -> Self {
        Self { live, gateway }
    }

    /// 返回载入的条数
    pub async fn warm(&self, top_k: usize) -> Result<usize, StorageError> {
        let records = self.gateway.find_top_n_by_count_desc(top_k).await?;
        for r in &records {
            self.live.ranking.set_score(&r.term, r.count as f64);
        }
        Ok(records.len())
    }

    /// 失败只记录日志：宁可空榜启动，也不拒绝启动
    pub async fn warm_or_log(&self, top_k: usize) -> usize {
        match self.warm(top_k).await {
            Ok(n) => {
                tracing::info!("Cache warming complete: {} keywords loaded", n);
                n
            }
            Err(e) => {
                tracing::warn!("Cache warming failed, starting with empty ranking: {}", e);
                0
            }
        }
    }
}
