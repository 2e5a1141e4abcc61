use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use super::period::Period;

/// Description placed on synthesized vacancy rows.
pub const VACANCY_DESCRIPTION: &str = "Unrented";
pub const SUBTOTAL_DESCRIPTION: &str = "Subtotal";
pub const GRAND_TOTAL_DESCRIPTION: &str = "Grand Total";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowKind {
    Main,
    #[default]
    Detail,
    Subtotal,
    Blank,
    GrandTotal,
}

/// One displayable line of the rent roll. Every column is optional so that
/// "absent" and "present but zero" stay distinguishable for display.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReportRow {
    pub recid: Option<u64>,
    pub kind: RowKind,
    pub rentable_id: Option<i64>,
    pub rentable_name: Option<String>,
    pub rentable_type_id: Option<i64>,
    pub rentable_type: Option<String>,
    pub sqft: Option<i64>,
    pub rent_cycle: Option<i64>,
    pub rent_cycle_label: Option<String>,
    pub use_status: Option<i64>,
    pub users: Option<String>,
    pub payors: Option<String>,
    pub agreement_rentable_id: Option<i64>,
    pub agreement_id: Option<i64>,
    pub agreement_label: Option<String>,
    pub agreement_start: Option<NaiveDate>,
    pub agreement_stop: Option<NaiveDate>,
    pub possession_start: Option<NaiveDate>,
    pub possession_stop: Option<NaiveDate>,
    pub rent_start: Option<NaiveDate>,
    pub rent_stop: Option<NaiveDate>,
    pub assessment_id: Option<i64>,
    pub amount_due: Option<f64>,
    pub payments_applied: Option<f64>,
    pub description: Option<String>,
    pub gsr_rate: Option<f64>,
    pub period_gsr: Option<f64>,
    pub income_offsets: Option<f64>,
    pub begin_receivable: Option<f64>,
    pub delta_receivable: Option<f64>,
    pub end_receivable: Option<f64>,
    pub begin_security_deposit: Option<f64>,
    pub delta_security_deposit: Option<f64>,
    pub end_security_deposit: Option<f64>,
}

impl ReportRow {
    pub fn vacancy(
        rentable_id: i64,
        rentable_name: Option<String>,
        rentable_type: Option<String>,
        gap: Period,
    ) -> Self {
        Self {
            rentable_id: Some(rentable_id),
            rentable_name,
            rentable_type,
            possession_start: Some(gap.start),
            possession_stop: Some(gap.stop),
            description: Some(VACANCY_DESCRIPTION.to_string()),
            ..Self::default()
        }
    }

    pub fn subtotal() -> Self {
        Self {
            kind: RowKind::Subtotal,
            description: Some(SUBTOTAL_DESCRIPTION.to_string()),
            ..Self::zeroed_totals()
        }
    }

    pub fn grand_total() -> Self {
        Self {
            kind: RowKind::GrandTotal,
            description: Some(GRAND_TOTAL_DESCRIPTION.to_string()),
            ..Self::zeroed_totals()
        }
    }

    pub fn blank() -> Self {
        Self {
            kind: RowKind::Blank,
            ..Self::default()
        }
    }

    fn zeroed_totals() -> Self {
        Self {
            period_gsr: Some(0.0),
            income_offsets: Some(0.0),
            amount_due: Some(0.0),
            payments_applied: Some(0.0),
            begin_receivable: Some(0.0),
            delta_receivable: Some(0.0),
            end_receivable: Some(0.0),
            begin_security_deposit: Some(0.0),
            delta_security_deposit: Some(0.0),
            end_security_deposit: Some(0.0),
            ..Self::default()
        }
    }

    /// Possession interval when both ends are present.
    pub fn possession(&self) -> Option<Period> {
        self.possession_start
            .zip(self.possession_stop)
            .map(|(start, stop)| Period::new(start, stop))
    }

    /// Agreement id when it refers to a real agreement.
    pub fn valid_agreement_id(&self) -> Option<i64> {
        self.agreement_id.filter(|id| *id > 0)
    }

    pub fn valid_rentable_id(&self) -> Option<i64> {
        self.rentable_id.filter(|id| *id > 0)
    }
}

/// The two disjoint per-entity row maps of one report. Keys iterate in
/// ascending id order, which is the emission order of the report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityGroups {
    pub rentables: BTreeMap<i64, Vec<ReportRow>>,
    pub agreements: BTreeMap<i64, Vec<ReportRow>>,
}

impl EntityGroups {
    pub fn group_count(&self) -> usize {
        self.rentables.len() + self.agreements.len()
    }

    pub fn row_count(&self) -> usize {
        self.rentables
            .values()
            .chain(self.agreements.values())
            .map(Vec::len)
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticStage {
    VacancyGaps,
    SquareFootage,
    Balances,
}

/// A recoverable failure; the affected figure was reported as zero or blank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub stage: DiagnosticStage,
    pub rentable_id: Option<i64>,
    pub agreement_id: Option<i64>,
    pub message: String,
}
