use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashSet},
};

use super::{cycle::rent_cycle_label, row::ReportRow};

/// Sorts and formats every group of the map in place.
pub fn sort_and_format_groups(groups: &mut BTreeMap<i64, Vec<ReportRow>>) {
    for rows in groups.values_mut() {
        sort_group_rows(rows);
        format_group_rows(rows);
    }
}

/// Possession start ascending, then larger amounts first. Rows of the same
/// assessment with equal amounts order by payments applied, descending.
pub fn sort_group_rows(rows: &mut [ReportRow]) {
    rows.sort_by(compare_rows);
}

fn compare_rows(left: &ReportRow, right: &ReportRow) -> Ordering {
    left.possession_start
        .cmp(&right.possession_start)
        .then_with(|| amount(right.amount_due).total_cmp(&amount(left.amount_due)))
        .then_with(|| {
            left.assessment_id
                .unwrap_or(0)
                .cmp(&right.assessment_id.unwrap_or(0))
        })
        .then_with(|| amount(right.payments_applied).total_cmp(&amount(left.payments_applied)))
}

fn amount(value: Option<f64>) -> f64 {
    value.unwrap_or(0.0)
}

/// Blanks columns that are implied by an earlier row of the group and labels
/// the first row of every agreement segment. Period GSR stays on the first
/// row of each agreement only, so it is counted once by the subtotal.
pub fn format_group_rows(rows: &mut [ReportRow]) {
    let Some((first, rest)) = rows.split_first_mut() else {
        return;
    };
    let mut metered = HashSet::new();
    if let Some(agreement_id) = first.valid_agreement_id() {
        label_agreement_row(first);
        metered.insert(agreement_id);
    }

    let mut previous_agreement = first.agreement_id;
    let mut previous_users = first.users.clone();
    let mut previous_payors = first.payors.clone();

    for row in rest {
        let agreement = row.agreement_id;
        let users = row.users.clone();
        let payors = row.payors.clone();

        row.rentable_name = None;
        row.rentable_type = None;
        row.sqft = None;
        row.gsr_rate = None;

        let continues_segment = agreement.is_some() && agreement == previous_agreement;
        if continues_segment {
            row.period_gsr = None;
            row.rent_cycle = None;
            row.agreement_start = None;
            row.agreement_stop = None;
            row.possession_start = None;
            row.possession_stop = None;
            row.rent_start = None;
            row.rent_stop = None;
            // Occupants or payors may change within one agreement.
            if same_text(&payors, &previous_payors) {
                row.payors = None;
            }
            if same_text(&users, &previous_users) {
                row.users = None;
            }
        } else if row.valid_agreement_id().is_some() {
            label_agreement_row(row);
        }
        if let Some(agreement_id) = row.valid_agreement_id() {
            if !metered.insert(agreement_id) {
                row.period_gsr = None;
            }
        }

        previous_agreement = agreement;
        previous_users = users;
        previous_payors = payors;
    }
}

fn label_agreement_row(row: &mut ReportRow) {
    row.rent_cycle_label = rent_cycle_label(row.rent_cycle);
    row.agreement_label = row.agreement_id.map(agreement_label);
}

pub fn agreement_label(agreement_id: i64) -> String {
    format!("RA-{agreement_id}")
}

fn same_text(left: &Option<String>, right: &Option<String>) -> bool {
    left.as_deref().unwrap_or_default() == right.as_deref().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::{format_group_rows, sort_group_rows};
    use crate::services::rent_roll::{row::ReportRow, testing::day};

    fn row(start: u32, agreement_id: Option<i64>, amount_due: f64) -> ReportRow {
        ReportRow {
            rentable_id: Some(1),
            rentable_name: Some("101".to_string()),
            rentable_type: Some("Studio".to_string()),
            sqft: Some(850),
            rent_cycle: Some(6),
            agreement_id,
            possession_start: Some(day(1, start)),
            possession_stop: Some(day(1, 28)),
            amount_due: Some(amount_due),
            users: Some("Ann Lee".to_string()),
            payors: Some("Ann Lee".to_string()),
            period_gsr: Some(500.0),
            gsr_rate: Some(1000.0),
            ..ReportRow::default()
        }
    }

    #[test]
    fn sorts_by_possession_then_amount_descending() {
        let mut rows = vec![row(10, Some(2), 50.0), row(10, Some(2), 700.0), row(1, None, 0.0)];
        sort_group_rows(&mut rows);
        let amounts = rows
            .iter()
            .map(|row| row.amount_due.unwrap_or_default())
            .collect::<Vec<_>>();
        assert_eq!(amounts, vec![0.0, 700.0, 50.0]);
    }

    #[test]
    fn equal_assessment_rows_order_by_payments() {
        let mut low = row(10, Some(2), 100.0);
        low.assessment_id = Some(4);
        low.payments_applied = Some(10.0);
        let mut high = low.clone();
        high.payments_applied = Some(90.0);
        let mut rows = vec![low, high];
        sort_group_rows(&mut rows);
        assert_eq!(rows[0].payments_applied, Some(90.0));
    }

    #[test]
    fn sort_is_stable_for_identical_keys() {
        let mut first = row(10, Some(2), 100.0);
        first.description = Some("first".to_string());
        let mut second = first.clone();
        second.description = Some("second".to_string());
        let mut rows = vec![first, second];
        sort_group_rows(&mut rows);
        assert_eq!(rows[0].description.as_deref(), Some("first"));
    }

    #[test]
    fn formats_continuation_and_new_segment_rows() {
        let mut continuation = row(10, Some(2), 50.0);
        continuation.users = Some("Ann Lee, Bo Park".to_string());
        let mut rows = vec![row(10, Some(2), 700.0), continuation, row(20, Some(3), 300.0)];

        format_group_rows(&mut rows);

        assert_eq!(rows[0].agreement_label.as_deref(), Some("RA-2"));
        assert_eq!(rows[0].rent_cycle_label.as_deref(), Some("Monthly"));
        assert_eq!(rows[0].rentable_name.as_deref(), Some("101"));
        assert_eq!(rows[0].gsr_rate, Some(1000.0));

        let continuation = &rows[1];
        assert_eq!(continuation.rentable_name, None);
        assert_eq!(continuation.sqft, None);
        assert_eq!(continuation.gsr_rate, None);
        assert_eq!(continuation.period_gsr, None);
        assert_eq!(continuation.possession_start, None);
        assert_eq!(continuation.payors, None);
        assert_eq!(continuation.users.as_deref(), Some("Ann Lee, Bo Park"));
        assert_eq!(continuation.agreement_label, None);

        let next_segment = &rows[2];
        assert_eq!(next_segment.agreement_label.as_deref(), Some("RA-3"));
        assert_eq!(next_segment.period_gsr, Some(500.0));
        assert_eq!(next_segment.possession_start, Some(day(1, 20)));
        assert_eq!(next_segment.rentable_type, None);
    }

    #[test]
    fn changed_payors_stay_visible_on_continuation_rows() {
        let mut continuation = row(10, Some(2), 50.0);
        continuation.payors = Some("Lee Holdings".to_string());
        let mut repeat = row(10, Some(2), 20.0);
        repeat.payors = Some("Lee Holdings".to_string());
        let mut rows = vec![row(10, Some(2), 700.0), continuation, repeat];

        format_group_rows(&mut rows);

        assert_eq!(rows[0].payors.as_deref(), Some("Ann Lee"));
        assert_eq!(rows[1].payors.as_deref(), Some("Lee Holdings"));
        assert_eq!(rows[1].users, None);
        assert_eq!(rows[2].payors, None);
    }

    #[test]
    fn interleaved_agreement_keeps_gsr_on_its_first_row() {
        let mut rows = vec![
            row(10, Some(2), 600.0),
            row(10, Some(3), 300.0),
            row(10, Some(2), 25.0),
        ];
        sort_group_rows(&mut rows);
        format_group_rows(&mut rows);

        let gsr = rows.iter().map(|row| row.period_gsr).collect::<Vec<_>>();
        assert_eq!(gsr, vec![Some(500.0), Some(500.0), None]);
        assert_eq!(rows[2].agreement_label.as_deref(), Some("RA-2"));
    }

    #[test]
    fn vacancy_first_row_gets_no_labels() {
        let mut rows = vec![row(1, None, 0.0), row(10, Some(2), 100.0)];
        format_group_rows(&mut rows);
        assert_eq!(rows[0].agreement_label, None);
        assert_eq!(rows[0].rent_cycle_label, None);
        assert_eq!(rows[1].agreement_label.as_deref(), Some("RA-2"));
    }
}
