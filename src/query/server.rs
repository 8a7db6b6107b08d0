use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

use crate::core::{CacheStatus, RankingEntry, SearchStatistics, StoreComparison};
use crate::service::SearchService;
use crate::stats::SyncReport;
use crate::storage::{PersistenceGateway, StorageError};

#[derive(Deserialize)]
pub struct SearchRequest {
    pub keyword: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct SearchResponse {
    pub message: String,
    pub keyword: String,
    pub popular: Vec<RankingEntry>,
    pub recent: Vec<String>,
}

#[derive(Deserialize)]
pub struct LimitParams {
    pub limit: Option<usize>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopularResponse {
    pub keywords: Vec<String>,
    pub scores: Vec<RankingEntry>,
    pub total_count: usize,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentResponse {
    pub keywords: Vec<String>,
    pub total_count: usize,
}

#[derive(Deserialize)]
pub struct AutocompleteParams {
    pub prefix: String,
    pub limit: Option<usize>,
}

#[derive(Serialize, Deserialize)]
pub struct BulkEntry {
    pub keyword: String,
    pub count: u64,
}

#[derive(Serialize, Deserialize)]
pub struct BulkLoadRequest {
    pub entries: Vec<BulkEntry>,
    #[serde(default)]
    pub recent: Vec<String>,
}

#[derive(Deserialize)]
pub struct GenerateParams {
    pub count: usize,
}

#[derive(Serialize, Deserialize)]
pub struct GenerateResponse {
    pub generated: usize,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

struct AppState<G: PersistenceGateway> {
    service: Arc<SearchService<G>>,
    default_limit: usize,
}

impl<G: PersistenceGateway> Clone for AppState<G> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            default_limit: self.default_limit,
        }
    }
}

impl<G: PersistenceGateway> AppState<G> {
    fn limit(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.default_limit)
    }
}

/// HTTP 查询/管理接口
pub struct QueryServer<G: PersistenceGateway> {
    pub service: Arc<SearchService<G>>,
    pub default_limit: usize,
}

impl<G: PersistenceGateway> QueryServer<G> {
    pub fn new(service: Arc<SearchService<G>>, default_limit: usize) -> Self {
        Self {
            service,
            default_limit: default_limit.max(1),
        }
    }

    pub fn router(self) -> Router {
        let state = AppState {
            service: self.service,
            default_limit: self.default_limit,
        };
        Router::new()
            .route("/api/search", post(search_handler::<G>))
            .route("/api/search/popular", get(popular_handler::<G>))
            .route("/api/search/recent", get(recent_handler::<G>))
            .route("/api/search/popular/storage", get(popular_storage_handler::<G>))
            .route("/api/search/recent/storage", get(recent_storage_handler::<G>))
            .route("/api/search/status", get(status_handler::<G>))
            .route("/api/search/statistics", get(statistics_handler::<G>))
            .route("/api/search/autocomplete", get(autocomplete_handler::<G>))
            .route("/api/search/compare", get(compare_handler::<G>))
            .route("/api/search/sync", get(sync_handler::<G>))
            .route("/api/admin/clear", post(clear_handler::<G>))
            .route("/api/admin/bulk-load", post(bulk_load_handler::<G>))
            .route("/api/admin/generate", post(generate_handler::<G>))
            .with_state(state)
    }

    /// 监听直到 `shutdown` 完成（优雅退出：不再接新连接，等待进行中的请求）
    pub async fn run_until(
        self,
        port: u16,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
        self.serve(listener, shutdown).await
    }

    pub async fn serve(
        self,
        listener: tokio::net::TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        tracing::info!("HTTP Query Server listening on {}", listener.local_addr()?);
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

async fn search_handler<G: PersistenceGateway>(
    State(state): State<AppState<G>>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let keyword = req.keyword.unwrap_or_default();
    if !state.service.process_search(&keyword) {
        return Err(ApiError::BadRequest("keyword must not be blank".into()));
    }
    let status = state.service.get_status();
    Ok(Json(SearchResponse {
        message: "search recorded".into(),
        keyword: keyword.trim().to_string(),
        popular: status.popular,
        recent: status.recent,
    }))
}

async fn popular_handler<G: PersistenceGateway>(
    Query(params): Query<LimitParams>,
    State(state): State<AppState<G>>,
) -> Json<PopularResponse> {
    let scores = state.service.get_popular_with_scores(state.limit(params.limit));
    Json(PopularResponse {
        keywords: scores.iter().map(|e| e.term.clone()).collect(),
        scores,
        total_count: state.service.live().ranking.cardinality(),
    })
}

async fn recent_handler<G: PersistenceGateway>(
    Query(params): Query<LimitParams>,
    State(state): State<AppState<G>>,
) -> Json<RecentResponse> {
    Json(RecentResponse {
        keywords: state.service.get_recent(state.limit(params.limit)),
        total_count: state.service.live().recent.size(),
    })
}

/// durable 表视图（用于核对回写结果）
async fn popular_storage_handler<G: PersistenceGateway>(
    Query(params): Query<LimitParams>,
    State(state): State<AppState<G>>,
) -> Result<Json<Vec<String>>, ApiError> {
    let limit = state.limit(params.limit);
    Ok(Json(state.service.popular_from_storage(limit).await?))
}

async fn recent_storage_handler<G: PersistenceGateway>(
    Query(params): Query<LimitParams>,
    State(state): State<AppState<G>>,
) -> Result<Json<Vec<String>>, ApiError> {
    let limit = state.limit(params.limit);
    Ok(Json(state.service.recent_from_storage(limit).await?))
}

async fn status_handler<G: PersistenceGateway>(
    State(state): State<AppState<G>>,
) -> Json<CacheStatus> {
    Json(state.service.get_status())
}

async fn statistics_handler<G: PersistenceGateway>(
    State(state): State<AppState<G>>,
) -> Result<Json<SearchStatistics>, ApiError> {
    Ok(Json(state.service.search_statistics().await?))
}

async fn autocomplete_handler<G: PersistenceGateway>(
    Query(params): Query<AutocompleteParams>,
    State(state): State<AppState<G>>,
) -> Result<Json<Vec<String>>, ApiError> {
    let limit = state.limit(params.limit);
    Ok(Json(state.service.autocomplete(&params.prefix, limit).await?))
}

async fn compare_handler<G: PersistenceGateway>(
    State(state): State<AppState<G>>,
) -> Result<Json<StoreComparison>, ApiError> {
    Ok(Json(state.service.compare_live_vs_storage().await?))
}

async fn sync_handler<G: PersistenceGateway>(State(state): State<AppState<G>>) -> Json<SyncReport> {
    Json(state.service.sync_report())
}

async fn clear_handler<G: PersistenceGateway>(State(state): State<AppState<G>>) -> StatusCode {
    state.service.clear_cache();
    StatusCode::NO_CONTENT
}

async fn bulk_load_handler<G: PersistenceGateway>(
    State(state): State<AppState<G>>,
    Json(req): Json<BulkLoadRequest>,
) -> Result<Json<CacheStatus>, ApiError> {
    let entries: Vec<(String, u64)> = req
        .entries
        .into_iter()
        .map(|e| (e.keyword, e.count))
        .collect();
    Ok(Json(state.service.bulk_load(&entries, &req.recent).await?))
}

async fn generate_handler<G: PersistenceGateway>(
    Query(params): Query<GenerateParams>,
    State(state): State<AppState<G>>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let generated = state.service.generate_bulk_data(params.count).await?;
    Ok(Json(GenerateResponse { generated }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LiveCache;
    use crate::storage::MemoryGateway;
    use crate::sync::Reconciler;

    async fn spawn_server() -> (String, Arc<MemoryGateway>, tokio::sync::oneshot::Sender<()>) {
        let live = Arc::new(LiveCache::default());
        let gw = Arc::new(MemoryGateway::new());
        let rec = Arc::new(Reconciler::new(live, gw.clone()));
        let service = Arc::new(SearchService::new(rec));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            let shutdown = async {
                let _ = rx.await;
            };
            QueryServer::new(service, 10)
                .serve(listener, shutdown)
                .await
                .unwrap();
        });
        (base, gw, tx)
    }

    #[tokio::test]
    async fn search_then_read_popular_and_recent() {
        let (base, _gw, stop) = spawn_server().await;
        let client = reqwest::Client::new();

        for kw in ["rust", "tokio", "rust", "  rust  "] {
            let resp = client
                .post(format!("{}/api/search", base))
                .json(&serde_json::json!({ "keyword": kw }))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), 200);
        }

        let popular: PopularResponse = client
            .get(format!("{}/api/search/popular?limit=5", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(popular.keywords, vec!["rust", "tokio"]);
        assert_eq!(popular.scores[0].count(), 3);
        assert_eq!(popular.total_count, 2);

        let recent: RecentResponse = client
            .get(format!("{}/api/search/recent", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(recent.keywords, vec!["rust", "tokio"]);

        let _ = stop.send(());
    }

    #[tokio::test]
    async fn blank_keyword_is_bad_request() {
        let (base, _gw, stop) = spawn_server().await;
        let client = reqwest::Client::new();

        for body in [serde_json::json!({ "keyword": "   " }), serde_json::json!({})] {
            let resp = client
                .post(format!("{}/api/search", base))
                .json(&body)
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), 400);
        }

        let status: CacheStatus = client
            .get(format!("{}/api/search/status", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status.popular_count, 0);
        assert_eq!(status.recent_count, 0);

        let _ = stop.send(());
    }

    #[tokio::test]
    async fn bulk_load_reaches_durable_storage() {
        let (base, gw, stop) = spawn_server().await;
        let client = reqwest::Client::new();

        let req = BulkLoadRequest {
            entries: vec![
                BulkEntry { keyword: "alpha".into(), count: 7 },
                BulkEntry { keyword: "beta".into(), count: 2 },
            ],
            recent: vec!["beta".into(), "alpha".into()],
        };
        let status: CacheStatus = client
            .post(format!("{}/api/admin/bulk-load", base))
            .json(&req)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status.popular_count, 2);
        assert_eq!(status.popular[0].term, "alpha");
        assert_eq!(gw.get("alpha").unwrap().count, 7);
        assert_eq!(gw.get("beta").unwrap().count, 2);

        let stored: Vec<String> = client
            .get(format!("{}/api/search/popular/storage?limit=1", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(stored, vec!["alpha"]);

        let completions: Vec<String> = client
            .get(format!("{}/api/search/autocomplete?prefix=al", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(completions, vec!["alpha"]);

        let _ = stop.send(());
    }

    #[tokio::test]
    async fn storage_outage_maps_to_503() {
        let (base, gw, stop) = spawn_server().await;
        gw.set_fail_reads(true);

        let resp = reqwest::get(format!("{}/api/search/statistics", base))
            .await
            .unwrap();
        assert_eq!(resp.status(), 503);

        let _ = stop.send(());
    }
}
