use std::collections::{BTreeMap, HashMap};

use futures::{stream, StreamExt};

use super::{
    period::{contain_date_range, Period},
    row::{Diagnostic, DiagnosticStage, ReportRow},
    source::{PeriodMetrics, RentCalculator, RentRollSources, RentRollStore},
    RentRollError,
};

/// Computes period GSR and the market-rate figure once per agreement segment
/// of every rentable group, then attaches the square-footage attribute.
///
/// GSR failures and possession intervals outside the window abort the run;
/// square-footage failures are returned as diagnostics.
pub async fn enrich_period_metrics(
    sources: &RentRollSources<'_>,
    business_id: i64,
    window: Period,
    rentables: &mut BTreeMap<i64, Vec<ReportRow>>,
    sqft_attribute: &str,
    workers: usize,
) -> Result<Vec<Diagnostic>, RentRollError> {
    tracing::debug!(business_id, groups = rentables.len(), "Enriching period metrics");
    let store = sources.store;
    let rent = sources.rent;
    let pending = std::mem::take(rentables);
    let mut completed = stream::iter(pending)
        .map(|(rentable_id, mut rows)| async move {
            let mut diagnostics = Vec::new();
            let outcome =
                apply_period_gsr(rent, business_id, window, rentable_id, &mut rows).await;
            if outcome.is_ok() {
                apply_square_footage(
                    store,
                    business_id,
                    rentable_id,
                    &mut rows,
                    sqft_attribute,
                    &mut diagnostics,
                )
                .await;
            }
            (rentable_id, outcome.map(|()| rows), diagnostics)
        })
        .buffer_unordered(workers.max(1))
        .collect::<Vec<_>>()
        .await;
    completed.sort_by_key(|(rentable_id, _, _)| *rentable_id);

    let mut diagnostics = Vec::new();
    for (rentable_id, outcome, group_diagnostics) in completed {
        rentables.insert(rentable_id, outcome?);
        diagnostics.extend(group_diagnostics);
    }
    Ok(diagnostics)
}

/// Metrics are computed once per agreement and stored on every row of it, so
/// whichever row sorts first still carries them; the formatter keeps them on
/// that row only.
async fn apply_period_gsr(
    rent: &dyn RentCalculator,
    business_id: i64,
    window: Period,
    rentable_id: i64,
    rows: &mut [ReportRow],
) -> Result<(), RentRollError> {
    let mut computed: HashMap<i64, PeriodMetrics> = HashMap::new();
    for row in rows.iter_mut() {
        let Some(agreement_id) = row.valid_agreement_id() else {
            continue;
        };
        let metrics = match computed.get(&agreement_id) {
            Some(metrics) => *metrics,
            None => {
                let possession = Period::new(
                    row.possession_start.unwrap_or(window.start),
                    row.possession_stop.unwrap_or(window.stop),
                );
                let period = contain_date_range(window, possession).map_err(|error| {
                    tracing::error!(rentable_id, agreement_id, error = %error, "Possession outside report window");
                    RentRollError::Interval(error)
                })?;
                let metrics = rent.period_metrics(business_id, rentable_id, period).await?;
                computed.insert(agreement_id, metrics);
                metrics
            }
        };
        row.period_gsr = Some(metrics.period_gsr);
        row.gsr_rate = Some(metrics.market_rate);
    }
    Ok(())
}

/// The attribute is stored on every row of the group so that the row which
/// sorts first still carries it; the formatter blanks it on the others.
async fn apply_square_footage(
    store: &dyn RentRollStore,
    business_id: i64,
    rentable_id: i64,
    rows: &mut [ReportRow],
    attribute: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let Some(rentable_type_id) = rows
        .first()
        .and_then(|row| row.rentable_type_id)
        .filter(|id| *id > 0)
    else {
        return;
    };

    let raw = match store
        .get_custom_attribute(business_id, rentable_type_id, attribute)
        .await
    {
        Ok(Some(raw)) => raw,
        Ok(None) => return,
        Err(error) => {
            record_sqft_failure(rentable_id, rentable_type_id, error.to_string(), diagnostics);
            return;
        }
    };

    match parse_sqft(&raw) {
        Some(sqft) => {
            for row in rows.iter_mut() {
                row.sqft = Some(sqft);
            }
        }
        None => record_sqft_failure(
            rentable_id,
            rentable_type_id,
            format!("invalid {attribute} value {raw:?}"),
            diagnostics,
        ),
    }
}

fn record_sqft_failure(
    rentable_id: i64,
    rentable_type_id: i64,
    message: String,
    diagnostics: &mut Vec<Diagnostic>,
) {
    tracing::warn!(rentable_id, rentable_type_id, error = %message, "Square footage lookup failed");
    diagnostics.push(Diagnostic {
        stage: DiagnosticStage::SquareFootage,
        rentable_id: Some(rentable_id),
        agreement_id: None,
        message,
    });
}

fn parse_sqft(raw: &str) -> Option<i64> {
    let cleaned = raw.trim().replace(',', "");
    cleaned
        .parse::<i64>()
        .ok()
        .or_else(|| cleaned.parse::<f64>().ok().map(|value| value.round() as i64))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{enrich_period_metrics, parse_sqft};
    use crate::services::rent_roll::{
        period::Period,
        row::{DiagnosticStage, ReportRow},
        source::RentRollSources,
        testing::{day, january, FakeSources},
        RentRollError,
    };

    fn agreement_row(agreement_id: i64, start: u32, stop: u32, amount_due: f64) -> ReportRow {
        ReportRow {
            rentable_id: Some(1),
            rentable_type_id: Some(10),
            agreement_id: Some(agreement_id),
            possession_start: Some(day(1, start)),
            possession_stop: Some(day(1, stop)),
            amount_due: Some(amount_due),
            ..ReportRow::default()
        }
    }

    #[tokio::test]
    async fn computes_metrics_once_per_agreement() {
        let fake = FakeSources::default()
            .with_rentable(1, "101", Some((10, "Studio")))
            .with_daily_gsr(1, 10.0)
            .with_sqft(10, "850");
        let mut rentables = BTreeMap::from([(
            1,
            vec![
                agreement_row(5, 10, 20, 300.0),
                agreement_row(5, 10, 20, 50.0),
            ],
        )]);

        let diagnostics = enrich_period_metrics(
            &RentRollSources::from_single(&fake),
            1,
            january(),
            &mut rentables,
            "Square Feet",
            4,
        )
        .await
        .expect("enrichment succeeds");

        assert!(diagnostics.is_empty());
        let rows = &rentables[&1];
        assert!(rows
            .iter()
            .all(|row| row.period_gsr == Some(100.0) && row.gsr_rate == Some(10.0)));
        assert!(rows.iter().all(|row| row.sqft == Some(850)));
        assert_eq!(
            fake.gsr_periods(),
            vec![(1, Period::new(day(1, 10), day(1, 20)))]
        );
    }

    #[tokio::test]
    async fn possession_outside_window_is_fatal() {
        let fake = FakeSources::default().with_daily_gsr(1, 10.0);
        let mut outside = agreement_row(5, 1, 1, 0.0);
        outside.possession_start = Some(day(3, 1));
        outside.possession_stop = Some(day(3, 15));
        let mut rentables = BTreeMap::from([(1, vec![outside])]);

        let error = enrich_period_metrics(
            &RentRollSources::from_single(&fake),
            1,
            january(),
            &mut rentables,
            "Square Feet",
            1,
        )
        .await
        .expect_err("interval outside window");

        assert!(matches!(error, RentRollError::Interval(_)));
    }

    #[tokio::test]
    async fn invalid_sqft_is_a_diagnostic() {
        let fake = FakeSources::default().with_sqft(10, "large");
        let mut rentables = BTreeMap::from([(1, vec![agreement_row(5, 10, 20, 0.0)])]);

        let diagnostics = enrich_period_metrics(
            &RentRollSources::from_single(&fake),
            1,
            january(),
            &mut rentables,
            "Square Feet",
            1,
        )
        .await
        .expect("enrichment succeeds");

        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].stage, DiagnosticStage::SquareFootage);
        assert_eq!(rentables[&1][0].sqft, None);
    }

    #[test]
    fn parses_sqft_values() {
        assert_eq!(parse_sqft(" 1,200 "), Some(1200));
        assert_eq!(parse_sqft("850.4"), Some(850));
        assert_eq!(parse_sqft("n/a"), None);
    }
}
