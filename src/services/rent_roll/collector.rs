use super::{
    period::Period,
    row::{EntityGroups, ReportRow},
    source::RentRollStore,
    RentRollError,
};

/// Runs the windowed query and buckets its rows by entity.
pub async fn collect_static_rows(
    store: &dyn RentRollStore,
    business_id: i64,
    window: Period,
) -> Result<EntityGroups, RentRollError> {
    tracing::debug!(
        business_id,
        start = %window.start,
        stop = %window.stop,
        "Collecting rent roll rows"
    );
    let rows = store.run_windowed_query(business_id, window).await?;
    Ok(bucket_rows(rows))
}

/// Rows with a rentable go to the rentable map; rows without one but with an
/// agreement go to the agreement map. Rows with neither are dropped.
pub fn bucket_rows(rows: Vec<ReportRow>) -> EntityGroups {
    let mut groups = EntityGroups::default();
    for row in rows {
        if let Some(rentable_id) = row.valid_rentable_id() {
            groups.rentables.entry(rentable_id).or_default().push(row);
        } else if let Some(agreement_id) = row.valid_agreement_id() {
            groups.agreements.entry(agreement_id).or_default().push(row);
        }
    }
    groups
}
