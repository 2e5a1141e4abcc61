//! Rent roll engine: collects rentable and agreement rows for a business over
//! a date window, fills vacancy gaps, computes period metrics, formats each
//! group for display and closes it with subtotals and balances.

pub mod assemble;
pub mod collector;
pub mod cycle;
pub mod enrich;
pub mod format;
pub mod gaps;
pub mod period;
pub mod row;
pub mod source;
pub mod totals;

#[cfg(test)]
pub mod testing;

use serde::Serialize;

use self::{
    assemble::{assemble_rows, Page},
    period::{IntervalError, Period},
    row::{Diagnostic, ReportRow},
    source::RentRollSources,
};

#[derive(Debug, thiserror::Error)]
pub enum RentRollError {
    #[error("rent roll query failed: {0}")]
    Query(String),
    #[error(transparent)]
    Interval(#[from] IntervalError),
    #[error("gross scheduled rent lookup failed: {0}")]
    Gsr(String),
    #[error("{0}")]
    Lookup(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RentRollRequest {
    pub business_id: i64,
    pub window: Period,
    pub page: Page,
}

#[derive(Debug, Clone)]
pub struct RentRollOptions {
    pub workers: usize,
    pub sqft_attribute: String,
}

impl Default for RentRollOptions {
    fn default() -> Self {
        Self {
            workers: 8,
            sqft_attribute: "Square Feet".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RentRollReport {
    pub rows: Vec<ReportRow>,
    /// Rows across every group of the report, not only the returned page.
    /// The grand total is not counted.
    pub total_rows: usize,
    pub total_main_rows: usize,
    pub diagnostics: Vec<Diagnostic>,
}

/// Builds one page of the rent roll.
///
/// Fails without partial output when the windowed query, an interval
/// containment check or a GSR lookup fails. Every other collaborator failure
/// is returned in `diagnostics` with the affected figure left blank or zero.
pub async fn build_rent_roll(
    sources: RentRollSources<'_>,
    request: RentRollRequest,
    options: &RentRollOptions,
) -> Result<RentRollReport, RentRollError> {
    let RentRollRequest {
        business_id,
        window,
        page,
    } = request;
    let workers = options.workers.max(1);

    let mut groups = collector::collect_static_rows(sources.store, business_id, window).await?;
    tracing::debug!(
        business_id,
        rentables = groups.rentables.len(),
        agreements = groups.agreements.len(),
        "Collected rent roll groups"
    );

    let mut diagnostics =
        gaps::synthesize_vacancies(sources.store, window, &mut groups.rentables, workers).await;

    diagnostics.extend(
        enrich::enrich_period_metrics(
            &sources,
            business_id,
            window,
            &mut groups.rentables,
            &options.sqft_attribute,
            workers,
        )
        .await?,
    );

    format::sort_and_format_groups(&mut groups.rentables);
    format::sort_and_format_groups(&mut groups.agreements);

    let (grand_total, balance_diagnostics) =
        totals::close_groups(sources.balances, business_id, window, &mut groups, workers).await;
    diagnostics.extend(balance_diagnostics);

    let total_rows = groups.row_count();
    let total_main_rows = groups.group_count();
    if !diagnostics.is_empty() {
        tracing::warn!(
            business_id,
            count = diagnostics.len(),
            "Rent roll built with recoverable failures"
        );
    }

    Ok(RentRollReport {
        rows: assemble_rows(groups, grand_total, page),
        total_rows,
        total_main_rows,
        diagnostics,
    })
}
