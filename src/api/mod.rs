//! JSON HTTP surface over the application context.

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::context::AppContext;
use crate::db::collection_log::CollectionLog;
use crate::db::feedback::{Feedback, FeedbackSummary, NewFeedback};
use crate::db::report::{DailyReport, PaperCluster};
use crate::db::source::SourceEntry;
use crate::db::{PaperFilter, PaperStats};
use crate::error::FlywheelError;
use crate::flywheel::SchedulerStatus;
use crate::paper::Paper;
use crate::report::SynthesizedReport;
use crate::vector::{SearchResponse, Where};
use crate::TARGET_API;

const DEFAULT_RESULTS: usize = 10;
const MAX_RESULTS: usize = 100;
const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 500;

/// A service error rendered as `{"error": ...}` with the status from [`FlywheelError::status_code`].
#[derive(Debug)]
pub struct ApiError(FlywheelError);

impl<E> From<E> for ApiError
where
    E: Into<FlywheelError>,
{
    fn from(err: E) -> Self {
        ApiError(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(target: TARGET_API, "Request failed: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

fn results_limit(requested: Option<usize>) -> usize {
    requested.unwrap_or(DEFAULT_RESULTS).clamp(1, MAX_RESULTS)
}

fn parse_date(raw: &str) -> Result<NaiveDate, FlywheelError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| FlywheelError::Validation(format!("invalid date '{}', expected YYYY-MM-DD", raw)))
}

pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/api/status", get(status))
        .route("/api/papers", get(list_papers))
        .route("/api/papers/{id}", get(get_paper))
        .route("/api/papers/{id}/similar", get(similar_papers))
        .route("/api/papers/{id}/feedback", get(paper_feedback))
        .route("/api/search/semantic", post(semantic_search))
        .route("/api/search/hybrid", post(hybrid_search))
        .route("/api/reports", get(list_reports))
        .route("/api/reports/latest", get(latest_report))
        .route("/api/reports/generate", post(generate_report))
        .route("/api/reports/date/{date}", get(report_for_date))
        .route("/api/reports/{id}", get(get_report))
        .route("/api/feedback", post(add_feedback))
        .route("/api/sources", get(list_sources))
        .route("/api/sources/{id}/enabled", post(set_source_enabled))
        .route("/api/flywheel/run", post(run_flywheel))
        .route("/api/scheduler/status", get(scheduler_status))
        .route("/api/scheduler/start", post(start_scheduler))
        .route("/api/scheduler/stop", post(stop_scheduler))
        .with_state(ctx)
}

/// Binds the API port and serves until the process exits.
pub async fn serve(ctx: AppContext) -> crate::error::Result<()> {
    let addr = format!("0.0.0.0:{}", ctx.settings.api_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(target: TARGET_API, "API listening on {}", addr);
    axum::serve(listener, router(ctx).into_make_service()).await?;
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub papers: PaperStats,
    pub vectors: usize,
    pub latest_collection: Option<CollectionLog>,
    pub scheduler: SchedulerStatus,
}

async fn status(State(ctx): State<AppContext>) -> ApiResult<StatusResponse> {
    Ok(Json(StatusResponse {
        papers: ctx.db.paper_stats().await?,
        vectors: ctx.vectors.count().await?,
        latest_collection: ctx.db.latest_collection_log().await?,
        scheduler: ctx.scheduler.status(),
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct PapersQuery {
    pub taxa: Option<String>,
    pub min_score: Option<i64>,
    pub journal: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    #[serde(default)]
    pub analyzed_only: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl PapersQuery {
    fn filter(&self) -> PaperFilter {
        PaperFilter {
            taxa: self.taxa.clone(),
            min_score: self.min_score,
            journal: self.journal.clone(),
            date_from: self.date_from.clone(),
            date_to: self.date_to.clone(),
            analyzed_only: self.analyzed_only,
        }
    }
}

async fn list_papers(
    State(ctx): State<AppContext>,
    Query(query): Query<PapersQuery>,
) -> ApiResult<Vec<Paper>> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0).max(0);
    Ok(Json(ctx.db.list_papers(&query.filter(), limit, offset).await?))
}

async fn get_paper(State(ctx): State<AppContext>, Path(id): Path<i64>) -> ApiResult<Paper> {
    ctx.db
        .get_paper(id)
        .await?
        .map(Json)
        .ok_or_else(|| FlywheelError::NotFound(format!("paper {}", id)).into())
}

#[derive(Debug, Default, Deserialize)]
pub struct SimilarQuery {
    pub n_results: Option<usize>,
}

async fn similar_papers(
    State(ctx): State<AppContext>,
    Path(id): Path<i64>,
    Query(query): Query<SimilarQuery>,
) -> ApiResult<SearchResponse> {
    let k = results_limit(query.n_results);
    Ok(Json(ctx.search.find_similar_by_paper_id(id, k).await?))
}

#[derive(Debug, Serialize)]
pub struct PaperFeedback {
    pub summary: FeedbackSummary,
    pub feedback: Vec<Feedback>,
}

async fn paper_feedback(State(ctx): State<AppContext>, Path(id): Path<i64>) -> ApiResult<PaperFeedback> {
    Ok(Json(PaperFeedback {
        summary: ctx.db.feedback_summary(id).await?,
        feedback: ctx.db.feedback_for_paper(id).await?,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SemanticSearchRequest {
    pub query: String,
    pub n_results: Option<usize>,
    #[serde(rename = "where")]
    pub where_clause: Option<Value>,
    pub min_score: Option<i64>,
}

async fn semantic_search(
    State(ctx): State<AppContext>,
    Json(request): Json<SemanticSearchRequest>,
) -> ApiResult<SearchResponse> {
    let filter = request.where_clause.as_ref().map(Where::from_json).transpose()?;
    let response = ctx
        .search
        .semantic_search_by_text(&request.query, results_limit(request.n_results), filter, request.min_score)
        .await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct HybridSearchRequest {
    pub query: String,
    pub n_results: Option<usize>,
    #[serde(default)]
    pub filter: PaperFilter,
}

async fn hybrid_search(
    State(ctx): State<AppContext>,
    Json(request): Json<HybridSearchRequest>,
) -> ApiResult<SearchResponse> {
    let response = ctx
        .search
        .hybrid_search_by_text(&request.query, &request.filter, results_limit(request.n_results))
        .await?;
    Ok(Json(response))
}

#[derive(Debug, Serialize)]
pub struct ReportWithClusters {
    pub report: DailyReport,
    pub clusters: Vec<PaperCluster>,
}

async fn with_clusters(ctx: &AppContext, report: Option<DailyReport>, what: &str) -> ApiResult<ReportWithClusters> {
    let Some(report) = report else {
        return Err(FlywheelError::NotFound(what.to_string()).into());
    };
    let clusters = ctx.db.clusters_for_report(report.id).await?;
    Ok(Json(ReportWithClusters { report, clusters }))
}

#[derive(Debug, Default, Deserialize)]
pub struct ReportsQuery {
    pub limit: Option<i64>,
}

async fn list_reports(
    State(ctx): State<AppContext>,
    Query(query): Query<ReportsQuery>,
) -> ApiResult<Vec<DailyReport>> {
    let limit = query.limit.unwrap_or(30).clamp(1, MAX_PAGE_SIZE);
    Ok(Json(ctx.db.list_reports(limit).await?))
}

async fn latest_report(State(ctx): State<AppContext>) -> ApiResult<ReportWithClusters> {
    let report = ctx.db.latest_report().await?;
    with_clusters(&ctx, report, "no reports yet").await
}

async fn report_for_date(
    State(ctx): State<AppContext>,
    Path(date): Path<String>,
) -> ApiResult<ReportWithClusters> {
    let date = parse_date(&date)?.format("%Y-%m-%d").to_string();
    let report = ctx.db.latest_report_for(&date).await?;
    with_clusters(&ctx, report, &format!("no report for {}", date)).await
}

async fn get_report(State(ctx): State<AppContext>, Path(id): Path<i64>) -> ApiResult<ReportWithClusters> {
    let report = ctx.db.get_report(id).await?;
    with_clusters(&ctx, report, &format!("report {}", id)).await
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateReportRequest {
    pub date: Option<String>,
}

async fn generate_report(
    State(ctx): State<AppContext>,
    Json(request): Json<GenerateReportRequest>,
) -> ApiResult<SynthesizedReport> {
    let report = match request.date.as_deref() {
        Some(raw) => ctx.reports.synthesize(parse_date(raw)?).await?,
        None => ctx.reports.synthesize_today().await?,
    };
    Ok(Json(report))
}

async fn add_feedback(
    State(ctx): State<AppContext>,
    Json(feedback): Json<NewFeedback>,
) -> std::result::Result<(StatusCode, Json<Value>), ApiError> {
    let id = ctx.db.add_feedback(&feedback).await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

async fn list_sources(State(ctx): State<AppContext>) -> ApiResult<Vec<SourceEntry>> {
    Ok(Json(ctx.db.list_sources(false).await?))
}

#[derive(Debug, Deserialize)]
pub struct EnabledRequest {
    pub enabled: bool,
}

async fn set_source_enabled(
    State(ctx): State<AppContext>,
    Path(id): Path<i64>,
    Json(request): Json<EnabledRequest>,
) -> ApiResult<Value> {
    if !ctx.db.set_source_enabled(id, request.enabled).await? {
        return Err(FlywheelError::NotFound(format!("source {}", id)).into());
    }
    info!(target: TARGET_API, "Source {} enabled={}", id, request.enabled);
    Ok(Json(json!({ "id": id, "enabled": request.enabled })))
}

async fn run_flywheel(
    State(ctx): State<AppContext>,
) -> std::result::Result<(StatusCode, Json<Value>), ApiError> {
    ctx.scheduler.trigger_in_background()?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "started" }))))
}

async fn scheduler_status(State(ctx): State<AppContext>) -> Json<SchedulerStatus> {
    Json(ctx.scheduler.status())
}

async fn start_scheduler(State(ctx): State<AppContext>) -> ApiResult<SchedulerStatus> {
    ctx.scheduler.start()?;
    Ok(Json(ctx.scheduler.status()))
}

async fn stop_scheduler(State(ctx): State<AppContext>) -> ApiResult<SchedulerStatus> {
    ctx.scheduler.stop()?;
    Ok(Json(ctx.scheduler.status()))
}
