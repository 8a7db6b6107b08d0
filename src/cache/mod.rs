pub mod dirty;
pub mod ranking;
pub mod recent;

pub use dirty::DirtyKeySet;
pub use ranking::RankingStore;
pub use recent::{RecentList, DEFAULT_RECENT_CAPACITY};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LiveStoreError {
    #[error("live ranking corrupted at term {term:?}")]
    Corrupted { term: String },
}

/// 进程级 live 状态：热榜 + 最近检索 + 待同步集合。
///
/// 由 `SearchService` 与两个后台同步循环通过 `Arc` 共享，进程内只此一份。
pub struct LiveCache {
    pub ranking: RankingStore,
    pub recent: RecentList,
    pub dirty: DirtyKeySet,
}

impl LiveCache {
    pub fn new(recent_capacity: usize) -> Self {
        Self {
            ranking: RankingStore::new(),
            recent: RecentList::with_capacity(recent_capacity),
            dirty: DirtyKeySet::new(),
        }
    }

    /// 清空热榜与最近检索；DirtyKeySet 与 durable 存储不受影响
    pub fn clear(&self) {
        self.ranking.clear();
        self.recent.clear();
    }

    /// 读路径发现损坏时的兜底：直接清空，由预热/后续流量重建
    pub fn safe_purge(&self, err: &LiveStoreError) {
        tracing::warn!("Live cache unreadable ({}), purging ranking and recent list", err);
        self.clear();
    }
}

impl Default for LiveCache {
    fn default() -> Self {
        Self::new(DEFAULT_RECENT_CAPACITY)
    }
}
