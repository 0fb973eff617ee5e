use axum::async_trait;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use super::SharedState;
use crate::comparison::ComparisonRequest;
use crate::error::{ApiError, ApiResult, InsightError, InsightResult};
use crate::pipeline::AnalysisRequest;
use crate::scope::OrgScope;
use crate::storage::{
    Analysis, AnalysisSummary, Comparison, ComparisonFilter, ComparisonSummary, PageRequest,
    Winner,
};

/// Header carrying the caller's organization.
pub const ORGANIZATION_HEADER: &str = "x-organization-id";

/// Header carrying the caller's user id.
pub const USER_HEADER: &str = "x-user-id";

#[async_trait]
impl<S> FromRequestParts<S> for OrgScope
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        scope_from_headers(&parts.headers)
    }
}

/// Read the organization scope from request headers.
pub fn scope_from_headers(headers: &HeaderMap) -> ApiResult<OrgScope> {
    let header = |name: &str| -> ApiResult<Option<String>> {
        match headers.get(name) {
            None => Ok(None),
            Some(value) => value
                .to_str()
                .map(|v| Some(v.trim().to_string()).filter(|v| !v.is_empty()))
                .map_err(|_| ApiError::Unauthorized {
                    message: format!("{} is not valid ASCII", name),
                }),
        }
    };

    let organization_id = header(ORGANIZATION_HEADER)?.ok_or_else(|| ApiError::Unauthorized {
        message: format!("{} header is required", ORGANIZATION_HEADER),
    })?;
    let user_id = header(USER_HEADER)?.unwrap_or_else(|| OrgScope::ANONYMOUS_USER.to_string());

    Ok(OrgScope::new(organization_id, user_id))
}

/// Query parameters for list endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    pub skip: Option<u32>,
    pub limit: Option<u32>,
    pub judge_model: Option<String>,
    pub overall_winner: Option<Winner>,
    pub analysis_id: Option<String>,
}

impl ListParams {
    /// Validated pagination window.
    pub fn page_request(&self) -> InsightResult<PageRequest> {
        let limit = self.limit.unwrap_or(PageRequest::DEFAULT_LIMIT);
        if limit == 0 || limit > PageRequest::MAX_LIMIT {
            return Err(InsightError::validation(
                "limit",
                format!("must be between 1 and {}", PageRequest::MAX_LIMIT),
            ));
        }
        Ok(PageRequest {
            skip: self.skip.unwrap_or(0),
            limit,
        })
    }

    /// Comparison filters; blank strings are ignored.
    pub fn comparison_filter(&self) -> ComparisonFilter {
        let non_blank = |v: &Option<String>| {
            v.as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        ComparisonFilter {
            judge_model: non_blank(&self.judge_model),
            overall_winner: self.overall_winner,
            analysis_id: non_blank(&self.analysis_id),
        }
    }
}

/// Pagination block of list responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
    pub total_count: i64,
    pub total_pages: i64,
}

impl Pagination {
    pub fn new(request: PageRequest, total_count: i64) -> Self {
        Self {
            page: request.page(),
            page_size: request.limit,
            total_count,
            total_pages: request.total_pages(total_count),
        }
    }
}

/// Response of `GET /insights/comparisons`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonListResponse {
    pub comparisons: Vec<ComparisonSummary>,
    pub pagination: Pagination,
}

/// Response of `GET /insights/analyses`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisListResponse {
    pub analyses: Vec<AnalysisSummary>,
    pub pagination: Pagination,
}

/// Response of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// POST /insights/analyses
pub async fn create_analysis(
    State(state): State<SharedState>,
    scope: OrgScope,
    body: Result<Json<AnalysisRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Analysis>)> {
    let Json(request) = body.map_err(json_rejection)?;
    let timeout_ms = state.config.insights.operation_timeout_ms;

    let analysis = with_deadline(timeout_ms, state.pipeline.run(&scope, request)).await?;
    Ok((StatusCode::CREATED, Json(analysis)))
}

/// GET /insights/analyses
pub async fn list_analyses(
    State(state): State<SharedState>,
    scope: OrgScope,
    params: Result<Query<ListParams>, QueryRejection>,
) -> ApiResult<Json<AnalysisListResponse>> {
    let Query(params) = params.map_err(query_rejection)?;
    let page = params.page_request()?;

    let result = state.pipeline.list(&scope, page).await?;
    Ok(Json(AnalysisListResponse {
        analyses: result.items,
        pagination: Pagination::new(page, result.total_count),
    }))
}

/// GET /insights/analyses/:id
pub async fn get_analysis(
    State(state): State<SharedState>,
    scope: OrgScope,
    Path(id): Path<String>,
) -> ApiResult<Json<Analysis>> {
    Ok(Json(state.pipeline.get(&scope, &id).await?))
}

/// POST /insights/comparisons
pub async fn create_comparison(
    State(state): State<SharedState>,
    scope: OrgScope,
    body: Result<Json<ComparisonRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Comparison>)> {
    let Json(request) = body.map_err(json_rejection)?;
    let timeout_ms = state.config.insights.operation_timeout_ms;

    let comparison = with_deadline(timeout_ms, state.comparisons.create(&scope, request)).await?;
    Ok((StatusCode::CREATED, Json(comparison)))
}

/// GET /insights/comparisons
pub async fn list_comparisons(
    State(state): State<SharedState>,
    scope: OrgScope,
    params: Result<Query<ListParams>, QueryRejection>,
) -> ApiResult<Json<ComparisonListResponse>> {
    let Query(params) = params.map_err(query_rejection)?;
    let page = params.page_request()?;
    let filter = params.comparison_filter();

    let result = state.comparisons.list(&scope, &filter, page).await?;
    Ok(Json(ComparisonListResponse {
        comparisons: result.items,
        pagination: Pagination::new(page, result.total_count),
    }))
}

/// GET /insights/comparisons/:id
pub async fn get_comparison(
    State(state): State<SharedState>,
    scope: OrgScope,
    Path(id): Path<String>,
) -> ApiResult<Json<Comparison>> {
    Ok(Json(state.comparisons.get(&scope, &id).await?))
}

/// DELETE /insights/comparisons/:id
pub async fn delete_comparison(
    State(state): State<SharedState>,
    scope: OrgScope,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.comparisons.delete(&scope, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Run `operation` under the per-operation deadline.
///
/// On expiry the future is dropped before it reaches its single write, so
/// nothing is persisted.
async fn with_deadline<T>(
    timeout_ms: u64,
    operation: impl Future<Output = InsightResult<T>>,
) -> InsightResult<T> {
    match tokio::time::timeout(Duration::from_millis(timeout_ms), operation).await {
        Ok(result) => result,
        Err(_) => {
            debug!(timeout_ms, "Operation deadline exceeded");
            Err(InsightError::Timeout { timeout_ms })
        }
    }
}

fn json_rejection(rejection: JsonRejection) -> ApiError {
    InsightError::validation("body", rejection.body_text()).into()
}

fn query_rejection(rejection: QueryRejection) -> ApiError {
    InsightError::validation("query", rejection.body_text()).into()
}
