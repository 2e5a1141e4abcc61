use std::collections::BTreeMap;

use chrono::NaiveDate;
use futures::{stream, StreamExt};

use super::{
    period::Period,
    row::{Diagnostic, DiagnosticStage, EntityGroups, ReportRow, RowKind},
    source::BalanceCalculator,
};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Balances {
    begin_receivable: f64,
    end_receivable: f64,
    begin_security_deposit: f64,
    delta_security_deposit: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupKey {
    Rentable(i64),
    Agreement(i64),
}

/// Closes every group with a subtotal and a separator row and returns the
/// grand total of all subtotals. Balance lookups that fail count as zero and
/// are reported as diagnostics.
pub async fn close_groups(
    balances: &dyn BalanceCalculator,
    business_id: i64,
    window: Period,
    groups: &mut EntityGroups,
    workers: usize,
) -> (ReportRow, Vec<Diagnostic>) {
    tracing::debug!(business_id, groups = groups.group_count(), "Closing rent roll groups");
    let rentables = std::mem::take(&mut groups.rentables)
        .into_iter()
        .map(|(id, rows)| (GroupKey::Rentable(id), rows));
    let agreements = std::mem::take(&mut groups.agreements)
        .into_iter()
        .map(|(id, rows)| (GroupKey::Agreement(id), rows));

    let completed = stream::iter(rentables.chain(agreements).enumerate())
        .map(|(position, (key, rows))| async move {
            let mut diagnostics = Vec::new();
            let rows =
                close_group(balances, business_id, window, key, rows, &mut diagnostics).await;
            (position, key, rows, diagnostics)
        })
        .buffer_unordered(workers.max(1))
        .collect::<Vec<_>>();
    let mut completed = completed.await;
    // Rentable groups first, each map in ascending id order.
    completed.sort_by_key(|(position, ..)| *position);

    let mut grand_total = ReportRow::grand_total();
    let mut diagnostics = Vec::new();
    for (_, key, rows, group_diagnostics) in completed {
        if let Some(subtotal) = rows.iter().rev().find(|row| row.kind == RowKind::Subtotal) {
            fold_into_grand_total(&mut grand_total, subtotal);
        }
        match key {
            GroupKey::Rentable(id) => groups.rentables.insert(id, rows),
            GroupKey::Agreement(id) => groups.agreements.insert(id, rows),
        };
        diagnostics.extend(group_diagnostics);
    }
    (grand_total, diagnostics)
}

async fn close_group(
    balances: &dyn BalanceCalculator,
    business_id: i64,
    window: Period,
    key: GroupKey,
    mut rows: Vec<ReportRow>,
    diagnostics: &mut Vec<Diagnostic>,
) -> Vec<ReportRow> {
    let mut subtotal = sum_group(&rows);
    for (agreement_id, rentable_id) in balance_pairs(key, &rows) {
        if agreement_id <= 0 || rentable_id <= 0 {
            continue;
        }
        let found = fetch_balances(
            balances,
            business_id,
            window,
            agreement_id,
            rentable_id,
            diagnostics,
        )
        .await;
        add_balances(&mut subtotal, found);
    }

    rows.push(subtotal);
    rows.push(ReportRow::blank());
    if let Some(first) = rows.first_mut() {
        first.kind = RowKind::Main;
    }
    rows
}

/// Sums the per-row figures of a group; absent values contribute zero.
pub fn sum_group(rows: &[ReportRow]) -> ReportRow {
    let mut subtotal = ReportRow::subtotal();
    for row in rows {
        add(&mut subtotal.period_gsr, row.period_gsr);
        add(&mut subtotal.income_offsets, row.income_offsets);
        add(&mut subtotal.amount_due, row.amount_due);
        add(&mut subtotal.payments_applied, row.payments_applied);
    }
    subtotal
}

/// Agreement id to rentable id for every agreement seen in the group. An
/// agreement-only group maps its agreement to rentable 0.
fn balance_pairs(key: GroupKey, rows: &[ReportRow]) -> BTreeMap<i64, i64> {
    match key {
        GroupKey::Agreement(agreement_id) => BTreeMap::from([(agreement_id, 0)]),
        GroupKey::Rentable(_) => {
            let mut pairs = BTreeMap::new();
            for row in rows {
                if let Some(agreement_id) = row.valid_agreement_id() {
                    pairs
                        .entry(agreement_id)
                        .or_insert_with(|| row.rentable_id.unwrap_or(0));
                }
            }
            pairs
        }
    }
}

async fn fetch_balances(
    balances: &dyn BalanceCalculator,
    business_id: i64,
    window: Period,
    agreement_id: i64,
    rentable_id: i64,
    diagnostics: &mut Vec<Diagnostic>,
) -> Balances {
    let mut found = Balances::default();
    let mut record = |what: &str, message: String| {
        tracing::warn!(agreement_id, rentable_id, error = %message, "{what} lookup failed");
        diagnostics.push(Diagnostic {
            stage: DiagnosticStage::Balances,
            rentable_id: Some(rentable_id),
            agreement_id: Some(agreement_id),
            message: format!("{what}: {message}"),
        });
    };

    match balances
        .agreement_begin_end_balance(business_id, rentable_id, agreement_id, window)
        .await
    {
        Ok((begin, end)) => {
            found.begin_receivable = begin;
            found.end_receivable = end;
        }
        Err(error) => record("receivable balance", error.to_string()),
    }

    // Opening deposit: everything recorded since 1970-01-01.
    let before_window = Period::new(NaiveDate::default(), window.start);
    match balances
        .security_deposit_balance(business_id, agreement_id, rentable_id, before_window)
        .await
    {
        Ok(amount) => found.begin_security_deposit = amount,
        Err(error) => record("opening security deposit", error.to_string()),
    }

    match balances
        .security_deposit_balance(business_id, agreement_id, rentable_id, window)
        .await
    {
        Ok(amount) => found.delta_security_deposit = amount,
        Err(error) => record("security deposit change", error.to_string()),
    }

    found
}

fn add_balances(subtotal: &mut ReportRow, found: Balances) {
    add(&mut subtotal.begin_receivable, Some(found.begin_receivable));
    add(
        &mut subtotal.delta_receivable,
        Some(found.end_receivable - found.begin_receivable),
    );
    add(&mut subtotal.end_receivable, Some(found.end_receivable));
    add(
        &mut subtotal.begin_security_deposit,
        Some(found.begin_security_deposit),
    );
    add(
        &mut subtotal.delta_security_deposit,
        Some(found.delta_security_deposit),
    );
    add(
        &mut subtotal.end_security_deposit,
        Some(found.begin_security_deposit + found.delta_security_deposit),
    );
}

fn fold_into_grand_total(grand_total: &mut ReportRow, subtotal: &ReportRow) {
    add(&mut grand_total.period_gsr, subtotal.period_gsr);
    add(&mut grand_total.income_offsets, subtotal.income_offsets);
    add(&mut grand_total.amount_due, subtotal.amount_due);
    add(&mut grand_total.payments_applied, subtotal.payments_applied);
    add(&mut grand_total.begin_receivable, subtotal.begin_receivable);
    add(&mut grand_total.delta_receivable, subtotal.delta_receivable);
    add(&mut grand_total.end_receivable, subtotal.end_receivable);
    add(
        &mut grand_total.begin_security_deposit,
        subtotal.begin_security_deposit,
    );
    add(
        &mut grand_total.delta_security_deposit,
        subtotal.delta_security_deposit,
    );
    add(
        &mut grand_total.end_security_deposit,
        subtotal.end_security_deposit,
    );
}

fn add(total: &mut Option<f64>, value: Option<f64>) {
    *total = Some(total.unwrap_or(0.0) + value.unwrap_or(0.0));
}
