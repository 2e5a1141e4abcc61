use super::row::{EntityGroups, ReportRow};

/// Page over entity groups. A negative offset or a non-positive limit means
/// the whole report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: i64,
    pub limit: i64,
}

impl Page {
    pub const ALL: Page = Page {
        offset: -1,
        limit: 0,
    };

    pub fn is_paged(&self) -> bool {
        self.offset >= 0 && self.limit > 0
    }

    fn selects(&self, group_index: usize) -> bool {
        if !self.is_paged() {
            return true;
        }
        let index = group_index as i64;
        index >= self.offset && index < self.offset.saturating_add(self.limit)
    }
}

/// Flattens the rentable groups, then the agreement-only groups, each in
/// ascending id order. Every selected group is emitted whole. The grand total
/// closes the first page only.
pub fn assemble_rows(groups: EntityGroups, grand_total: ReportRow, page: Page) -> Vec<ReportRow> {
    let mut rows = groups
        .rentables
        .into_values()
        .chain(groups.agreements.into_values())
        .enumerate()
        .filter(|(group_index, _)| page.selects(*group_index))
        .flat_map(|(_, group)| group)
        .collect::<Vec<_>>();

    if page.offset <= 0 {
        rows.push(grand_total);
    }
    for (index, row) in rows.iter_mut().enumerate() {
        row.recid = Some(index as u64 + 1);
    }
    rows
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{assemble_rows, Page};
    use crate::services::rent_roll::row::{EntityGroups, ReportRow, RowKind};

    fn group(id: i64, len: usize) -> Vec<ReportRow> {
        (0..len)
            .map(|_| ReportRow {
                rentable_id: Some(id),
                ..ReportRow::default()
            })
            .collect()
    }

    fn groups() -> EntityGroups {
        EntityGroups {
            rentables: BTreeMap::from([(7, group(7, 3)), (2, group(2, 4))]),
            agreements: BTreeMap::from([(40, group(40, 2))]),
        }
    }

    fn ids(rows: &[ReportRow]) -> Vec<Option<i64>> {
        rows.iter().map(|row| row.rentable_id).collect()
    }

    #[test]
    fn emits_rentables_then_agreements_then_grand_total() {
        let rows = assemble_rows(groups(), ReportRow::grand_total(), Page::ALL);

        assert_eq!(rows.len(), 10);
        assert_eq!(rows[0].rentable_id, Some(2));
        assert_eq!(rows[4].rentable_id, Some(7));
        assert_eq!(rows[7].rentable_id, Some(40));
        assert_eq!(rows[9].kind, RowKind::GrandTotal);
        assert_eq!(rows[9].recid, Some(10));
    }

    #[test]
    fn later_pages_omit_grand_total() {
        let rows = assemble_rows(groups(), ReportRow::grand_total(), Page { offset: 1, limit: 1 });

        assert_eq!(ids(&rows), vec![Some(7); 3]);
        assert!(rows.iter().all(|row| row.kind != RowKind::GrandTotal));
        assert_eq!(rows[0].recid, Some(1));
    }

    #[test]
    fn pages_concatenate_to_full_report() {
        let full = assemble_rows(groups(), ReportRow::grand_total(), Page::ALL);

        let mut paged = Vec::new();
        for offset in 0..4 {
            let page = Page { offset, limit: 1 };
            paged.extend(assemble_rows(groups(), ReportRow::grand_total(), page));
        }

        let without_total = |rows: &[ReportRow]| {
            rows.iter()
                .filter(|row| row.kind != RowKind::GrandTotal)
                .cloned()
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&without_total(&paged)), ids(&without_total(&full)));
        assert_eq!(
            paged.iter().filter(|row| row.kind == RowKind::GrandTotal).count(),
            1
        );
        assert_eq!(paged[4].kind, RowKind::GrandTotal);
    }
}
