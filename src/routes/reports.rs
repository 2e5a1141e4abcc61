use axum::{
    extract::{Query, State},
    Json,
};
use chrono::NaiveDate;
use serde_json::{json, Value};

use crate::{
    error::{AppError, AppResult},
    repository::rent_roll_repository::PgRentRollRepository,
    schemas::{validate_input, RentRollQuery},
    services::rent_roll::{
        assemble::Page, build_rent_roll, period::Period, source::RentRollSources,
        RentRollOptions, RentRollReport, RentRollRequest,
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route(
        "/reports/rent-roll",
        axum::routing::get(rent_roll_report),
    )
}

async fn rent_roll_report(
    State(state): State<AppState>,
    Query(query): Query<RentRollQuery>,
) -> AppResult<Json<Value>> {
    validate_input(&query)?;
    let window = parse_window(
        &query.from_date,
        &query.to_date,
        state.config.rent_roll_max_days,
    )?;

    let cache_key = query.cache_key();
    if let Some(cached) = state.report_response_cache.get(&cache_key).await {
        return Ok(Json(cached));
    }

    let pool = db_pool(&state)?;
    let repository = PgRentRollRepository::new(pool.clone(), state.balance_cache.clone());
    let options = RentRollOptions {
        workers: state.config.rent_roll_workers(),
        sqft_attribute: state.config.rent_roll_sqft_attribute.clone(),
    };
    let request = RentRollRequest {
        business_id: query.business_id,
        window,
        page: Page {
            offset: query.offset,
            limit: query.limit,
        },
    };

    let report = build_rent_roll(RentRollSources::from_single(&repository), request, &options).await?;
    tracing::info!(
        business_id = query.business_id,
        rows = report.rows.len(),
        total_rows = report.total_rows,
        diagnostics = report.diagnostics.len(),
        "Rent roll generated"
    );

    let payload = rent_roll_payload(&query, window, &report)?;
    state
        .report_response_cache
        .insert(cache_key, payload.clone())
        .await;
    Ok(Json(payload))
}

fn rent_roll_payload(
    query: &RentRollQuery,
    window: Period,
    report: &RentRollReport,
) -> AppResult<Value> {
    let rows = serde_json::to_value(&report.rows)
        .map_err(|error| AppError::Internal(format!("Could not encode rent roll rows: {error}")))?;
    let diagnostics = serde_json::to_value(&report.diagnostics).map_err(|error| {
        AppError::Internal(format!("Could not encode rent roll diagnostics: {error}"))
    })?;
    Ok(json!({
        "business_id": query.business_id,
        "from": window.start.to_string(),
        "to": window.stop.to_string(),
        "offset": query.offset,
        "limit": query.limit,
        "total_rows": report.total_rows,
        "total_main_rows": report.total_main_rows,
        "rows": rows,
        "diagnostics": diagnostics,
    }))
}

fn parse_window(from: &str, to: &str, max_days: i64) -> AppResult<Period> {
    let window = Period::new(parse_date(from)?, parse_date(to)?);
    if window.is_empty() {
        return Err(AppError::BadRequest(
            "Report end date must be after the start date.".to_string(),
        ));
    }
    if window.days() > max_days {
        return Err(AppError::BadRequest(format!(
            "Report window cannot exceed {max_days} days."
        )));
    }
    Ok(window)
}

fn parse_date(value: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest("Invalid ISO date.".to_string()))
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::ServiceUnavailable(
            "Rent roll database is not configured. Set RENTROLL_DB_URL or DATABASE_URL."
                .to_string(),
        )
    })
}
