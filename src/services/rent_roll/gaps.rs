use std::collections::BTreeMap;

use futures::{stream, StreamExt};

use super::{
    period::{find_gaps, Period},
    row::{Diagnostic, DiagnosticStage, ReportRow, VACANCY_DESCRIPTION},
    source::{RentRollStore, RentableTypeRef},
};

/// Adds an `Unrented` row for every stretch of the window in which a rentable
/// has no possession interval. Lookup failures only blank the descriptive
/// columns and are returned as diagnostics.
pub async fn synthesize_vacancies(
    store: &dyn RentRollStore,
    window: Period,
    rentables: &mut BTreeMap<i64, Vec<ReportRow>>,
    workers: usize,
) -> Vec<Diagnostic> {
    tracing::debug!(
        groups = rentables.len(),
        start = %window.start,
        stop = %window.stop,
        "Synthesizing vacancy gaps"
    );
    let pending = std::mem::take(rentables);
    let mut completed = stream::iter(pending)
        .map(|(rentable_id, rows)| async move {
            let mut diagnostics = Vec::new();
            let rows = fill_vacancy_gaps(store, window, rentable_id, rows, &mut diagnostics).await;
            (rentable_id, rows, diagnostics)
        })
        .buffer_unordered(workers.max(1))
        .collect::<Vec<_>>()
        .await;
    completed.sort_by_key(|(rentable_id, _, _)| *rentable_id);

    let mut diagnostics = Vec::new();
    for (rentable_id, rows, group_diagnostics) in completed {
        rentables.insert(rentable_id, rows);
        diagnostics.extend(group_diagnostics);
    }
    diagnostics
}

async fn fill_vacancy_gaps(
    store: &dyn RentRollStore,
    window: Period,
    rentable_id: i64,
    mut rows: Vec<ReportRow>,
    diagnostics: &mut Vec<Diagnostic>,
) -> Vec<ReportRow> {
    let occupied = rows
        .iter()
        .filter_map(ReportRow::possession)
        .collect::<Vec<_>>();
    let gaps = find_gaps(window, &occupied);
    if gaps.is_empty() {
        return rows;
    }

    let (name, type_ref) = describe_rentable(store, window, rentable_id, &rows, diagnostics).await;
    let rentable_type = type_ref.as_ref().map(|type_ref| type_ref.name.clone());
    let rentable_type_id = type_ref.map(|type_ref| type_ref.rentable_type_id);

    for gap in gaps {
        // Vacant for the whole window: reuse the existing row.
        if gap == window {
            if let Some(first) = rows.first_mut() {
                first.rentable_id = Some(rentable_id);
                if name.is_some() {
                    first.rentable_name = name.clone();
                }
                if rentable_type.is_some() {
                    first.rentable_type = rentable_type.clone();
                }
                if first.rentable_type_id.is_none() {
                    first.rentable_type_id = rentable_type_id;
                }
                first.possession_start = Some(gap.start);
                first.possession_stop = Some(gap.stop);
                first.description = Some(VACANCY_DESCRIPTION.to_string());
                continue;
            }
        }
        let mut vacancy = ReportRow::vacancy(rentable_id, name.clone(), rentable_type.clone(), gap);
        vacancy.rentable_type_id = rentable_type_id;
        rows.push(vacancy);
    }
    rows
}

/// Current name and type of the rentable. The live record wins over the
/// query rows, which may carry nulls for unrented units; a record for some
/// other rentable is ignored.
async fn describe_rentable(
    store: &dyn RentRollStore,
    window: Period,
    rentable_id: i64,
    rows: &[ReportRow],
    diagnostics: &mut Vec<Diagnostic>,
) -> (Option<String>, Option<RentableTypeRef>) {
    let fallback_name = rows.iter().find_map(|row| row.rentable_name.clone());

    let name = match store.get_rentable(rentable_id).await {
        Ok(Some(record)) if record.id == rentable_id => Some(record.name),
        Ok(Some(record)) => {
            tracing::warn!(rentable_id, record_id = record.id, "Rentable lookup returned another record");
            fallback_name
        }
        Ok(None) => fallback_name,
        Err(error) => {
            tracing::warn!(rentable_id, error = %error, "Could not load rentable for vacancy row");
            diagnostics.push(Diagnostic {
                stage: DiagnosticStage::VacancyGaps,
                rentable_id: Some(rentable_id),
                agreement_id: None,
                message: format!("rentable lookup failed: {error}"),
            });
            fallback_name
        }
    };

    // A rentable may change type inside the window; the earliest one is shown.
    let rentable_type = match store
        .get_rentable_type_refs_for_range(rentable_id, window)
        .await
    {
        Ok(refs) => refs
            .into_iter()
            .min_by_key(|type_ref| type_ref.period.start),
        Err(error) => {
            tracing::warn!(rentable_id, error = %error, "Could not load rentable type for vacancy row");
            diagnostics.push(Diagnostic {
                stage: DiagnosticStage::VacancyGaps,
                rentable_id: Some(rentable_id),
                agreement_id: None,
                message: format!("rentable type lookup failed: {error}"),
            });
            None
        }
    };

    (name, rentable_type)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::synthesize_vacancies;
    use crate::services::rent_roll::{
        period::Period,
        row::{DiagnosticStage, ReportRow, VACANCY_DESCRIPTION},
        testing::{day, january, FakeSources},
    };

    #[tokio::test]
    async fn whole_window_vacancy_reuses_first_row() {
        let fake = FakeSources::default().with_rentable(1, "101", Some((10, "Studio")));
        let mut rentables = BTreeMap::from([(
            1,
            vec![ReportRow {
                rentable_id: Some(1),
                ..ReportRow::default()
            }],
        )]);

        let diagnostics = synthesize_vacancies(&fake, january(), &mut rentables, 4).await;

        assert!(diagnostics.is_empty());
        let rows = &rentables[&1];
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].possession(), Some(january()));
        assert_eq!(rows[0].description.as_deref(), Some(VACANCY_DESCRIPTION));
        assert_eq!(rows[0].rentable_name.as_deref(), Some("101"));
        assert_eq!(rows[0].rentable_type.as_deref(), Some("Studio"));
        assert_eq!(rows[0].rentable_type_id, Some(10));
    }

    #[tokio::test]
    async fn partial_occupancy_appends_gap_rows() {
        let fake = FakeSources::default().with_rentable(1, "101", Some((10, "Studio")));
        let occupied = ReportRow {
            rentable_id: Some(1),
            agreement_id: Some(5),
            possession_start: Some(day(1, 10)),
            possession_stop: Some(day(1, 20)),
            ..ReportRow::default()
        };
        let mut rentables = BTreeMap::from([(1, vec![occupied])]);

        synthesize_vacancies(&fake, january(), &mut rentables, 1).await;

        let gaps = rentables[&1]
            .iter()
            .skip(1)
            .map(|row| row.possession().expect("gap period"))
            .collect::<Vec<_>>();
        assert_eq!(
            gaps,
            vec![
                Period::new(day(1, 1), day(1, 10)),
                Period::new(day(1, 20), day(2, 1)),
            ]
        );
        assert!(rentables[&1][1..]
            .iter()
            .all(|row| row.agreement_id.is_none() && row.rentable_type.as_deref() == Some("Studio")));
        assert!(rentables[&1][1..]
            .iter()
            .all(|row| row.rentable_type_id == Some(10)));
    }

    #[tokio::test]
    async fn type_lookup_failure_is_recorded() {
        let fake = FakeSources::default()
            .with_rentable(2, "202", None)
            .failing_type_lookup();
        let mut rentables = BTreeMap::from([(
            2,
            vec![ReportRow {
                rentable_id: Some(2),
                ..ReportRow::default()
            }],
        )]);

        let diagnostics = synthesize_vacancies(&fake, january(), &mut rentables, 2).await;

        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].stage, DiagnosticStage::VacancyGaps);
        assert_eq!(rentables[&2][0].rentable_type, None);
        assert_eq!(rentables[&2][0].rentable_name.as_deref(), Some("202"));
    }
}
