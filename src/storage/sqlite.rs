use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use std::str::FromStr;
use tracing::{debug, info};

use super::{
    Analysis, AnalysisSummary, Comparison, ComparisonFilter, ComparisonSummary, JudgeTrace, Page,
    PageRequest, StageTrace, Storage, Winner, summarize_models,
};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};
use crate::pipeline::Stage;

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                    message: format!("Failed to create database directory: {}", e),
                })?;
            }
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create an in-memory database (one shared connection), for tests.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .foreign_keys(true);

        // Every in-memory connection is its own database; pin a single one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn load_traces(&self, analysis_id: &str) -> StorageResult<Vec<StageTrace>> {
        let rows: Vec<TraceRow> = sqlx::query_as(
            r#"
            SELECT trace_id, stage_index, model, temperature, top_p, max_tokens, system_prompt,
                   input_tokens, output_tokens, total_tokens, duration_ms, cost
            FROM stage_traces
            WHERE analysis_id = ?
            ORDER BY stage_index ASC
            "#,
        )
        .bind(analysis_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| row.into_trace(analysis_id))
            .collect()
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn create_analysis(&self, analysis: &Analysis) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO analyses (id, organization_id, created_by, title, source_text, pii_redacted,
                                  facts, insights, summary, total_input_tokens, total_output_tokens,
                                  total_tokens, total_cost, total_duration_ms, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&analysis.id)
        .bind(&analysis.organization_id)
        .bind(&analysis.created_by)
        .bind(&analysis.title)
        .bind(&analysis.source_text)
        .bind(analysis.pii_redacted)
        .bind(&analysis.facts)
        .bind(&analysis.insights)
        .bind(&analysis.summary)
        .bind(analysis.total_input_tokens)
        .bind(analysis.total_output_tokens)
        .bind(analysis.total_tokens)
        .bind(analysis.total_cost)
        .bind(analysis.total_duration_ms)
        .bind(format_timestamp(&analysis.created_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_insert_error(e, "analysis id already exists"))?;

        for trace in &analysis.stage_traces {
            sqlx::query(
                r#"
                INSERT INTO stage_traces (trace_id, analysis_id, stage_index, stage, model,
                                          temperature, top_p, max_tokens, system_prompt,
                                          input_tokens, output_tokens, total_tokens,
                                          duration_ms, cost)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&trace.trace_id)
            .bind(&analysis.id)
            .bind(trace.stage.index() as i64)
            .bind(trace.stage.label())
            .bind(&trace.model)
            .bind(trace.temperature)
            .bind(trace.top_p)
            .bind(i64::from(trace.max_tokens))
            .bind(&trace.system_prompt)
            .bind(trace.input_tokens)
            .bind(trace.output_tokens)
            .bind(trace.total_tokens)
            .bind(trace.duration_ms)
            .bind(trace.cost)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_insert_error(e, "stage trace already exists"))?;
        }

        tx.commit().await?;

        debug!(analysis_id = %analysis.id, "Analysis persisted");
        Ok(())
    }

    async fn get_analysis(
        &self,
        organization_id: &str,
        id: &str,
    ) -> StorageResult<Option<Analysis>> {
        let row: Option<AnalysisRow> = sqlx::query_as(
            r#"
            SELECT id, organization_id, created_by, title, source_text, pii_redacted, facts,
                   insights, summary, total_input_tokens, total_output_tokens, total_tokens,
                   total_cost, total_duration_ms, created_at
            FROM analyses
            WHERE organization_id = ? AND id = ?
            "#,
        )
        .bind(organization_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let traces = self.load_traces(&row.id).await?;
                Ok(Some(row.into_analysis(traces)?))
            }
            None => Ok(None),
        }
    }

    async fn list_analyses(
        &self,
        organization_id: &str,
        page: PageRequest,
    ) -> StorageResult<Page<AnalysisSummary>> {
        let total_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM analyses WHERE organization_id = ?")
                .bind(organization_id)
                .fetch_one(&self.pool)
                .await?;

        let rows: Vec<AnalysisSummaryRow> = sqlx::query_as(
            r#"
            SELECT a.id, a.title, a.total_tokens, a.total_cost, a.created_at,
                   (SELECT GROUP_CONCAT(t.stage_index || char(30) || t.model, char(31))
                    FROM stage_traces t
                    WHERE t.analysis_id = a.id) AS stage_models
            FROM analyses a
            WHERE a.organization_id = ?
            ORDER BY a.created_at DESC, a.id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(organization_id)
        .bind(i64::from(page.limit))
        .bind(i64::from(page.skip))
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .into_iter()
            .map(AnalysisSummary::try_from)
            .collect::<StorageResult<Vec<_>>>()?;

        Ok(Page { items, total_count })
    }

    async fn find_comparison_for_pair(
        &self,
        organization_id: &str,
        analysis_a_id: &str,
        analysis_b_id: &str,
    ) -> StorageResult<Option<String>> {
        let (low, high) = super::pair_key(analysis_a_id, analysis_b_id);
        let id: Option<String> = sqlx::query_scalar(
            r#"
            SELECT id FROM comparisons
            WHERE organization_id = ? AND pair_low = ? AND pair_high = ?
            "#,
        )
        .bind(organization_id)
        .bind(low)
        .bind(high)
        .fetch_optional(&self.pool)
        .await?;

        Ok(id)
    }

    async fn create_comparison(&self, comparison: &Comparison) -> StorageResult<()> {
        let (low, high) = comparison.pair_key();
        let criteria = to_json(&comparison.id, &comparison.evaluation_criteria)?;
        let stage_results = to_json(&comparison.id, &comparison.stage_results)?;

        sqlx::query(
            r#"
            INSERT INTO comparisons (id, organization_id, created_by, analysis_a_id, analysis_b_id,
                                     pair_low, pair_high, judge_model, evaluation_criteria,
                                     overall_winner, overall_reasoning, stage_results,
                                     judge_model_used, judge_total_tokens, judge_cost,
                                     judge_duration_ms, model_a_summary, model_b_summary,
                                     cost_difference, quality_improvement, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&comparison.id)
        .bind(&comparison.organization_id)
        .bind(&comparison.created_by)
        .bind(&comparison.analysis_a_id)
        .bind(&comparison.analysis_b_id)
        .bind(low)
        .bind(high)
        .bind(&comparison.judge_model)
        .bind(criteria)
        .bind(comparison.overall_winner.to_string())
        .bind(&comparison.overall_reasoning)
        .bind(stage_results)
        .bind(&comparison.judge_trace.model)
        .bind(comparison.judge_trace.total_tokens)
        .bind(comparison.judge_trace.cost)
        .bind(comparison.judge_trace.duration_ms)
        .bind(&comparison.model_a_summary)
        .bind(&comparison.model_b_summary)
        .bind(comparison.cost_difference)
        .bind(comparison.quality_improvement)
        .bind(format_timestamp(&comparison.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, "these analyses have already been compared"))?;

        debug!(comparison_id = %comparison.id, "Comparison persisted");
        Ok(())
    }

    async fn get_comparison(
        &self,
        organization_id: &str,
        id: &str,
    ) -> StorageResult<Option<Comparison>> {
        let row: Option<ComparisonRow> = sqlx::query_as(
            r#"
            SELECT id, organization_id, created_by, analysis_a_id, analysis_b_id, judge_model,
                   evaluation_criteria, overall_winner, overall_reasoning, stage_results,
                   judge_model_used, judge_total_tokens, judge_cost, judge_duration_ms,
                   model_a_summary, model_b_summary, cost_difference, quality_improvement,
                   created_at
            FROM comparisons
            WHERE organization_id = ? AND id = ?
            "#,
        )
        .bind(organization_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Comparison::try_from).transpose()
    }

    async fn list_comparisons(
        &self,
        organization_id: &str,
        filter: &ComparisonFilter,
        page: PageRequest,
    ) -> StorageResult<Page<ComparisonSummary>> {
        let mut count =
            QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM comparisons WHERE organization_id = ");
        count.push_bind(organization_id.to_string());
        push_comparison_filters(&mut count, filter);
        let total_count: i64 = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Sqlite>::new(
            r#"SELECT id, analysis_a_id, analysis_b_id, model_a_summary, model_b_summary,
                      judge_model, overall_winner, cost_difference, quality_improvement, created_at
               FROM comparisons WHERE organization_id = "#,
        );
        select.push_bind(organization_id.to_string());
        push_comparison_filters(&mut select, filter);
        select.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        select.push_bind(i64::from(page.limit));
        select.push(" OFFSET ");
        select.push_bind(i64::from(page.skip));

        let rows = select
            .build_query_as::<ComparisonSummaryRow>()
            .fetch_all(&self.pool)
            .await?;

        let items = rows
            .into_iter()
            .map(ComparisonSummary::try_from)
            .collect::<StorageResult<Vec<_>>>()?;

        Ok(Page { items, total_count })
    }

    async fn delete_comparison(&self, organization_id: &str, id: &str) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM comparisons WHERE organization_id = ? AND id = ?")
            .bind(organization_id)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn push_comparison_filters(builder: &mut QueryBuilder<'_, Sqlite>, filter: &ComparisonFilter) {
    if let Some(judge_model) = &filter.judge_model {
        builder.push(" AND judge_model = ");
        builder.push_bind(judge_model.clone());
    }
    if let Some(winner) = filter.overall_winner {
        builder.push(" AND overall_winner = ");
        builder.push_bind(winner.to_string());
    }
    if let Some(analysis_id) = &filter.analysis_id {
        builder.push(" AND (analysis_a_id = ");
        builder.push_bind(analysis_id.clone());
        builder.push(" OR analysis_b_id = ");
        builder.push_bind(analysis_id.clone());
        builder.push(")");
    }
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(id: &str, value: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt {
            id: id.to_string(),
            message: format!("invalid timestamp '{}': {}", value, e),
        })
}

fn parse_winner(id: &str, value: &str) -> StorageResult<Winner> {
    value.parse().map_err(|message| StorageError::Corrupt {
        id: id.to_string(),
        message,
    })
}

fn to_json<T: serde::Serialize>(id: &str, value: &T) -> StorageResult<String> {
    serde_json::to_string(value).map_err(|e| StorageError::Corrupt {
        id: id.to_string(),
        message: format!("serialization failed: {}", e),
    })
}

fn from_json<T: serde::de::DeserializeOwned>(id: &str, value: &str) -> StorageResult<T> {
    serde_json::from_str(value).map_err(|e| StorageError::Corrupt {
        id: id.to_string(),
        message: format!("invalid JSON column: {}", e),
    })
}

fn map_insert_error(err: sqlx::Error, duplicate_message: &str) -> StorageError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::Duplicate {
            message: duplicate_message.to_string(),
        },
        _ => StorageError::Sqlx(err),
    }
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct AnalysisRow {
    id: String,
    organization_id: String,
    created_by: String,
    title: String,
    source_text: String,
    pii_redacted: bool,
    facts: String,
    insights: String,
    summary: String,
    total_input_tokens: i64,
    total_output_tokens: i64,
    total_tokens: i64,
    total_cost: f64,
    total_duration_ms: i64,
    created_at: String,
}

impl AnalysisRow {
    fn into_analysis(self, stage_traces: Vec<StageTrace>) -> StorageResult<Analysis> {
        let created_at = parse_timestamp(&self.id, &self.created_at)?;
        Ok(Analysis {
            id: self.id,
            organization_id: self.organization_id,
            created_by: self.created_by,
            title: self.title,
            source_text: self.source_text,
            pii_redacted: self.pii_redacted,
            facts: self.facts,
            insights: self.insights,
            summary: self.summary,
            stage_traces,
            total_input_tokens: self.total_input_tokens,
            total_output_tokens: self.total_output_tokens,
            total_tokens: self.total_tokens,
            total_cost: self.total_cost,
            total_duration_ms: self.total_duration_ms,
            created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TraceRow {
    trace_id: String,
    stage_index: i64,
    model: String,
    temperature: f64,
    top_p: f64,
    max_tokens: i64,
    system_prompt: Option<String>,
    input_tokens: i64,
    output_tokens: i64,
    total_tokens: i64,
    duration_ms: i64,
    cost: f64,
}

impl TraceRow {
    fn into_trace(self, analysis_id: &str) -> StorageResult<StageTrace> {
        let stage = usize::try_from(self.stage_index)
            .ok()
            .and_then(Stage::from_index)
            .ok_or_else(|| StorageError::Corrupt {
                id: analysis_id.to_string(),
                message: format!("invalid stage index {}", self.stage_index),
            })?;
        let max_tokens = u32::try_from(self.max_tokens).map_err(|_| StorageError::Corrupt {
            id: analysis_id.to_string(),
            message: format!("invalid max_tokens {}", self.max_tokens),
        })?;

        Ok(StageTrace {
            trace_id: self.trace_id,
            stage,
            model: self.model,
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            total_tokens: self.total_tokens,
            duration_ms: self.duration_ms,
            cost: self.cost,
            system_prompt: self.system_prompt,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ComparisonRow {
    id: String,
    organization_id: String,
    created_by: String,
    analysis_a_id: String,
    analysis_b_id: String,
    judge_model: String,
    evaluation_criteria: String,
    overall_winner: String,
    overall_reasoning: String,
    stage_results: String,
    judge_model_used: String,
    judge_total_tokens: i64,
    judge_cost: f64,
    judge_duration_ms: i64,
    model_a_summary: String,
    model_b_summary: String,
    cost_difference: f64,
    quality_improvement: Option<f64>,
    created_at: String,
}

impl TryFrom<ComparisonRow> for Comparison {
    type Error = StorageError;

    fn try_from(row: ComparisonRow) -> StorageResult<Self> {
        Ok(Self {
            evaluation_criteria: from_json(&row.id, &row.evaluation_criteria)?,
            overall_winner: parse_winner(&row.id, &row.overall_winner)?,
            stage_results: from_json(&row.id, &row.stage_results)?,
            created_at: parse_timestamp(&row.id, &row.created_at)?,
            judge_trace: JudgeTrace {
                model: row.judge_model_used,
                total_tokens: row.judge_total_tokens,
                cost: row.judge_cost,
                duration_ms: row.judge_duration_ms,
            },
            id: row.id,
            organization_id: row.organization_id,
            created_by: row.created_by,
            analysis_a_id: row.analysis_a_id,
            analysis_b_id: row.analysis_b_id,
            judge_model: row.judge_model,
            overall_reasoning: row.overall_reasoning,
            model_a_summary: row.model_a_summary,
            model_b_summary: row.model_b_summary,
            cost_difference: row.cost_difference,
            quality_improvement: row.quality_improvement,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AnalysisSummaryRow {
    id: String,
    title: String,
    total_tokens: i64,
    total_cost: f64,
    created_at: String,
    stage_models: Option<String>,
}

impl TryFrom<AnalysisSummaryRow> for AnalysisSummary {
    type Error = StorageError;

    fn try_from(row: AnalysisSummaryRow) -> StorageResult<Self> {
        let mut stages = Vec::new();
        for entry in row.stage_models.as_deref().unwrap_or_default().split('\u{1f}') {
            if entry.is_empty() {
                continue;
            }
            let parsed = entry
                .split_once('\u{1e}')
                .and_then(|(index, model)| index.parse::<i64>().ok().map(|i| (i, model)));
            match parsed {
                Some(stage) => stages.push(stage),
                None => {
                    return Err(StorageError::Corrupt {
                        id: row.id,
                        message: format!("invalid stage model entry {:?}", entry),
                    })
                }
            }
        }
        stages.sort_by_key(|(index, _)| *index);
        let models: Vec<&str> = stages.iter().map(|(_, model)| *model).collect();

        Ok(Self {
            model_summary: summarize_models(&models),
            created_at: parse_timestamp(&row.id, &row.created_at)?,
            id: row.id,
            title: row.title,
            total_tokens: row.total_tokens,
            total_cost: row.total_cost,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ComparisonSummaryRow {
    id: String,
    analysis_a_id: String,
    analysis_b_id: String,
    model_a_summary: String,
    model_b_summary: String,
    judge_model: String,
    overall_winner: String,
    cost_difference: f64,
    quality_improvement: Option<f64>,
    created_at: String,
}

impl TryFrom<ComparisonSummaryRow> for ComparisonSummary {
    type Error = StorageError;

    fn try_from(row: ComparisonSummaryRow) -> StorageResult<Self> {
        Ok(Self {
            overall_winner: parse_winner(&row.id, &row.overall_winner)?,
            created_at: parse_timestamp(&row.id, &row.created_at)?,
            id: row.id,
            analysis_a_id: row.analysis_a_id,
            analysis_b_id: row.analysis_b_id,
            model_a_summary: row.model_a_summary,
            model_b_summary: row.model_b_summary,
            judge_model: row.judge_model,
            cost_difference: row.cost_difference,
            quality_improvement: row.quality_improvement,
        })
    }
}
