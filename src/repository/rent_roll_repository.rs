use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::NaiveDate;
use moka::future::Cache;
use sqlx::{postgres::PgRow, PgPool, Row};

use crate::{
    config::AppConfig,
    services::rent_roll::{
        cycle::RentCycle,
        period::Period,
        row::ReportRow,
        source::{
            BalanceCalculator, PeriodMetrics, RentCalculator, RentRollStore, RentableRecord,
            RentableTypeRef,
        },
        RentRollError,
    },
};

/// Element type code of rentable types in `custom_attr_ref`.
const RENTABLE_TYPE_ELEMENT: i64 = 5;

const SECURITY_DEPOSIT_ACCOUNT: &str = "security_deposit";
const RECEIVABLE_ACCOUNT: &str = "receivable";

/// Every rentable crossed with the agreements holding it in the window, plus
/// agreements without a rentable, joined to the assessment and receipt
/// activity of each agreement. `$1` business, `$2`..`$3` the window.
pub const WINDOWED_ROWS_SQL: &str = r#"
WITH occupancy AS (
    SELECT
        r.rid,
        r.rentable_name,
        rar.rarid,
        ra.raid,
        ra.agreement_start,
        ra.agreement_stop,
        ra.possession_start,
        ra.possession_stop,
        ra.rent_start,
        ra.rent_stop
    FROM rentable r
    LEFT JOIN rental_agreement_rentables rar
        ON rar.bid = r.bid
        AND rar.rid = r.rid
        AND $2 <= rar.rar_dt_stop
        AND $3 > rar.rar_dt_start
    LEFT JOIN rental_agreement ra
        ON ra.bid = rar.bid
        AND ra.raid = rar.raid
        AND $2 <= ra.agreement_stop
        AND $3 > ra.agreement_start
    WHERE r.bid = $1

    UNION ALL

    SELECT
        NULL::bigint,
        NULL::text,
        NULL::bigint,
        ra.raid,
        ra.agreement_start,
        ra.agreement_stop,
        ra.possession_start,
        ra.possession_stop,
        ra.rent_start,
        ra.rent_stop
    FROM rental_agreement ra
    WHERE ra.bid = $1
        AND $2 <= ra.agreement_stop
        AND $3 > ra.agreement_start
        AND NOT EXISTS (
            SELECT 1
            FROM rental_agreement_rentables rar
            WHERE rar.bid = ra.bid
                AND rar.raid = ra.raid
                AND $2 <= rar.rar_dt_stop
                AND $3 > rar.rar_dt_start
        )
),
payment_info AS (
    SELECT
        a.asmid,
        a.raid,
        a.rid,
        a.amount::float8 AS amount_due,
        SUM(alloc.amount)::float8 AS payments_applied,
        asm_ar.name AS description
    FROM assessments a
    LEFT JOIN receipt_allocation alloc
        ON alloc.bid = a.bid
        AND alloc.raid = a.raid
        AND alloc.asmid = a.asmid
        AND $2 <= alloc.dt
        AND alloc.dt < $3
    LEFT JOIN ar asm_ar
        ON asm_ar.bid = a.bid
        AND asm_ar.arid = a.arid
    WHERE a.bid = $1
        AND (a.rent_cycle = 0 OR a.pasmid <> 0)
        AND (a.flags & 4) = 0
        AND $2 <= a.stop_date
        AND $3 > a.start_date
    GROUP BY a.asmid, a.raid, a.rid, a.amount, asm_ar.name

    UNION ALL

    SELECT
        NULL::bigint,
        alloc.raid,
        NULL::bigint,
        NULL::float8,
        alloc.amount::float8,
        rcpt_ar.name
    FROM receipt rcpt
    JOIN receipt_allocation alloc
        ON alloc.bid = rcpt.bid
        AND alloc.rcptid = rcpt.rcptid
        AND alloc.asmid > 0
    LEFT JOIN assessments a
        ON a.bid = alloc.bid
        AND a.raid = alloc.raid
        AND a.asmid = alloc.asmid
        AND (a.rent_cycle = 0 OR a.pasmid <> 0)
        AND (a.flags & 4) = 0
        AND $2 <= a.stop_date
        AND $3 > a.start_date
    LEFT JOIN ar rcpt_ar
        ON rcpt_ar.bid = rcpt.bid
        AND rcpt_ar.arid = rcpt.arid
    WHERE rcpt.bid = $1
        AND a.asmid IS NULL
        AND (rcpt.flags & 4) = 0
        AND $2 <= rcpt.dt
        AND rcpt.dt < $3
)
SELECT
    o.rid,
    o.rentable_name,
    type_ref.rtid,
    rt.name AS rentable_type,
    rt.rent_cycle,
    status.use_status,
    users.names AS users,
    payors.names AS payors,
    o.rarid,
    o.raid,
    o.agreement_start,
    o.agreement_stop,
    o.possession_start,
    o.possession_stop,
    o.rent_start,
    o.rent_stop,
    pi.asmid,
    pi.amount_due,
    pi.payments_applied,
    pi.description
FROM occupancy o
LEFT JOIN LATERAL (
    SELECT rtr.rtid
    FROM rentable_type_ref rtr
    WHERE rtr.bid = $1
        AND rtr.rid = o.rid
        AND $2 <= rtr.dt_stop
        AND $3 > rtr.dt_start
    ORDER BY rtr.dt_start
    LIMIT 1
) type_ref ON TRUE
LEFT JOIN rentable_types rt
    ON rt.bid = $1
    AND rt.rtid = type_ref.rtid
LEFT JOIN LATERAL (
    SELECT rs.use_status
    FROM rentable_status rs
    WHERE rs.bid = $1
        AND rs.rid = o.rid
        AND $2 <= rs.dt_stop
        AND $3 > rs.dt_start
    ORDER BY rs.dt_start
    LIMIT 1
) status ON TRUE
LEFT JOIN LATERAL (
    SELECT string_agg(
        CASE WHEN t.is_company THEN t.company_name ELSE concat_ws(' ', t.first_name, t.last_name) END,
        ', '
        ORDER BY t.last_name, t.first_name, t.company_name
    ) AS names
    FROM rentable_users ru
    JOIN transactant t
        ON t.bid = ru.bid
        AND t.tcid = ru.tcid
    WHERE ru.bid = $1
        AND ru.rid = o.rid
        AND $2 <= ru.dt_stop
        AND $3 > ru.dt_start
        AND ru.dt_start >= o.agreement_start
        AND ru.dt_stop <= o.agreement_stop
) users ON TRUE
LEFT JOIN LATERAL (
    SELECT string_agg(
        CASE WHEN t.is_company THEN t.company_name ELSE concat_ws(' ', t.first_name, t.last_name) END,
        ', '
        ORDER BY t.last_name, t.first_name, t.company_name
    ) AS names
    FROM rental_agreement_payors rap
    JOIN transactant t
        ON t.bid = rap.bid
        AND t.tcid = rap.tcid
    WHERE rap.bid = $1
        AND rap.raid = o.raid
        AND $2 <= rap.dt_stop
        AND $3 > rap.dt_start
) payors ON TRUE
LEFT JOIN payment_info pi
    ON pi.raid = o.raid
    AND (pi.rid IS NULL OR pi.rid <= 0 OR pi.rid = o.rid)
ORDER BY o.rid NULLS LAST, o.raid, pi.asmid
"#;

const RENTABLE_SQL: &str = "SELECT rid, rentable_name FROM rentable WHERE rid = $1";

const RENTABLE_TYPE_REFS_SQL: &str = r#"
SELECT rtr.rtid, rt.name, rtr.dt_start, rtr.dt_stop
FROM rentable_type_ref rtr
JOIN rentable_types rt
    ON rt.bid = rtr.bid
    AND rt.rtid = rtr.rtid
WHERE rtr.rid = $1
    AND $2 < rtr.dt_stop
    AND $3 > rtr.dt_start
ORDER BY rtr.dt_start
"#;

const CUSTOM_ATTRIBUTE_SQL: &str = r#"
SELECT ca.value
FROM custom_attr_ref car
JOIN custom_attr ca
    ON ca.bid = car.bid
    AND ca.cid = car.cid
WHERE car.bid = $1
    AND car.elem_type = $2
    AND car.id = $3
    AND ca.name = $4
ORDER BY ca.cid
LIMIT 1
"#;

/// Market-rate segments for every type the rentable held during the period,
/// each already narrowed to the type assignment.
const MARKET_RATE_SQL: &str = r#"
SELECT
    GREATEST(rtr.dt_start, mr.dt_start) AS segment_start,
    LEAST(rtr.dt_stop, mr.dt_stop) AS segment_stop,
    rt.rent_cycle,
    mr.market_rate::float8 AS market_rate
FROM rentable_type_ref rtr
JOIN rentable_types rt
    ON rt.bid = rtr.bid
    AND rt.rtid = rtr.rtid
JOIN rentable_market_rate mr
    ON mr.bid = rt.bid
    AND mr.rtid = rt.rtid
    AND mr.dt_start < $4
    AND mr.dt_stop > $3
WHERE rtr.bid = $1
    AND rtr.rid = $2
    AND rtr.dt_start < $4
    AND rtr.dt_stop > $3
ORDER BY segment_start
"#;

/// Net ledger activity of one account of an agreement dated inside `[$5, $6)`.
const LEDGER_SUM_SQL: &str = r#"
SELECT COALESCE(SUM(le.amount), 0)::float8 AS total
FROM ledger_entry le
WHERE le.bid = $1
    AND le.raid = $2
    AND le.rid = $3
    AND le.account_kind = $4
    AND le.dt >= $5
    AND le.dt < $6
"#;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LedgerKey {
    business_id: i64,
    agreement_id: i64,
    rentable_id: i64,
    account: &'static str,
    period: Period,
}

/// Ledger sums keyed by account and period, shared by every report built
/// from the same state.
#[derive(Clone)]
pub struct BalanceCache {
    sums: Cache<LedgerKey, f64>,
}

impl BalanceCache {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            sums: Cache::builder()
                .max_capacity(config.balance_cache_max_entries.max(1))
                .time_to_live(Duration::from_secs(config.balance_cache_ttl_seconds.max(1)))
                .build(),
        }
    }
}

/// A market rate in force over `period` for a rentable type with `cycle`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateSegment {
    pub period: Period,
    pub cycle: Option<RentCycle>,
    pub rate: f64,
}

pub struct PgRentRollRepository {
    pool: PgPool,
    balances: BalanceCache,
}

impl PgRentRollRepository {
    pub fn new(pool: PgPool, balances: BalanceCache) -> Self {
        Self { pool, balances }
    }

    async fn rate_segments(
        &self,
        business_id: i64,
        rentable_id: i64,
        period: Period,
    ) -> Result<Vec<RateSegment>, sqlx::Error> {
        let rows = sqlx::query(MARKET_RATE_SQL)
            .bind(business_id)
            .bind(rentable_id)
            .bind(period.start)
            .bind(period.stop)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(read_rate_segment).collect()
    }

    async fn ledger_sum(&self, key: LedgerKey) -> Result<f64, RentRollError> {
        let pool = self.pool.clone();
        let lookup = key.clone();
        self.balances
            .sums
            .try_get_with(key, async move {
                let row = sqlx::query(LEDGER_SUM_SQL)
                    .bind(lookup.business_id)
                    .bind(lookup.agreement_id)
                    .bind(lookup.rentable_id)
                    .bind(lookup.account)
                    .bind(lookup.period.start)
                    .bind(lookup.period.stop)
                    .fetch_one(&pool)
                    .await?;
                row.try_get::<f64, _>("total")
            })
            .await
            .map_err(|error: Arc<sqlx::Error>| {
                tracing::error!(db_error = %error, "Ledger balance query failed");
                RentRollError::Lookup(format!("ledger balance unavailable: {error}"))
            })
    }
}

#[async_trait]
impl RentRollStore for PgRentRollRepository {
    async fn run_windowed_query(
        &self,
        business_id: i64,
        window: Period,
    ) -> Result<Vec<ReportRow>, RentRollError> {
        let mut tx = self.pool.begin().await.map_err(map_query_error)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(map_query_error)?;
        let rows = sqlx::query(WINDOWED_ROWS_SQL)
            .bind(business_id)
            .bind(window.start)
            .bind(window.stop)
            .fetch_all(&mut *tx)
            .await
            .map_err(map_query_error)?;
        tx.commit().await.map_err(map_query_error)?;

        rows.iter()
            .map(read_report_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_query_error)
    }

    async fn get_rentable(&self, rentable_id: i64) -> Result<Option<RentableRecord>, RentRollError> {
        let row = sqlx::query(RENTABLE_SQL)
            .bind(rentable_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_lookup_error)?;
        row.map(|row| -> Result<RentableRecord, sqlx::Error> {
            Ok(RentableRecord {
                id: row.try_get("rid")?,
                name: row.try_get::<Option<String>, _>("rentable_name")?.unwrap_or_default(),
            })
        })
        .transpose()
        .map_err(map_lookup_error)
    }

    async fn get_rentable_type_refs_for_range(
        &self,
        rentable_id: i64,
        window: Period,
    ) -> Result<Vec<RentableTypeRef>, RentRollError> {
        let rows = sqlx::query(RENTABLE_TYPE_REFS_SQL)
            .bind(rentable_id)
            .bind(window.start)
            .bind(window.stop)
            .fetch_all(&self.pool)
            .await
            .map_err(map_lookup_error)?;
        rows.iter()
            .map(|row| {
                Ok(RentableTypeRef {
                    rentable_type_id: row.try_get("rtid")?,
                    name: row.try_get::<Option<String>, _>("name")?.unwrap_or_default(),
                    period: Period::new(row.try_get("dt_start")?, row.try_get("dt_stop")?),
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(map_lookup_error)
    }

    async fn get_custom_attribute(
        &self,
        business_id: i64,
        rentable_type_id: i64,
        name: &str,
    ) -> Result<Option<String>, RentRollError> {
        let row = sqlx::query(CUSTOM_ATTRIBUTE_SQL)
            .bind(business_id)
            .bind(RENTABLE_TYPE_ELEMENT)
            .bind(rentable_type_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_lookup_error)?;
        row.map(|row| row.try_get::<String, _>("value"))
            .transpose()
            .map_err(map_lookup_error)
    }
}

#[async_trait]
impl RentCalculator for PgRentRollRepository {
    async fn period_gsr(
        &self,
        business_id: i64,
        rentable_id: i64,
        period: Period,
    ) -> Result<f64, RentRollError> {
        let segments = self
            .rate_segments(business_id, rentable_id, period)
            .await
            .map_err(map_gsr_error)?;
        Ok(prorate_gsr(period, &segments))
    }

    async fn market_rate(
        &self,
        business_id: i64,
        rentable_id: i64,
        period: Period,
    ) -> Result<f64, RentRollError> {
        let segments = self
            .rate_segments(business_id, rentable_id, period)
            .await
            .map_err(map_gsr_error)?;
        Ok(rate_in_force(period, &segments))
    }

    async fn period_metrics(
        &self,
        business_id: i64,
        rentable_id: i64,
        period: Period,
    ) -> Result<PeriodMetrics, RentRollError> {
        let segments = self
            .rate_segments(business_id, rentable_id, period)
            .await
            .map_err(map_gsr_error)?;
        Ok(metrics_from_segments(period, &segments))
    }
}

#[async_trait]
impl BalanceCalculator for PgRentRollRepository {
    async fn agreement_begin_end_balance(
        &self,
        business_id: i64,
        rentable_id: i64,
        agreement_id: i64,
        period: Period,
    ) -> Result<(f64, f64), RentRollError> {
        let key = |stop| LedgerKey {
            business_id,
            agreement_id,
            rentable_id,
            account: RECEIVABLE_ACCOUNT,
            period: Period::new(NaiveDate::default(), stop),
        };
        let begin = self.ledger_sum(key(period.start)).await?;
        let end = self.ledger_sum(key(period.stop)).await?;
        Ok((begin, end))
    }

    async fn security_deposit_balance(
        &self,
        business_id: i64,
        agreement_id: i64,
        rentable_id: i64,
        period: Period,
    ) -> Result<f64, RentRollError> {
        let held = self
            .ledger_sum(LedgerKey {
                business_id,
                agreement_id,
                rentable_id,
                account: SECURITY_DEPOSIT_ACCOUNT,
                period,
            })
            .await?;
        // Deposits are credits to a liability account.
        Ok(-held)
    }
}

/// Gross scheduled rent over `period`: each segment's rate spread over the
/// calendar length of every cycle it touches.
pub fn prorate_gsr(period: Period, segments: &[RateSegment]) -> f64 {
    segments
        .iter()
        .filter_map(|segment| {
            let span = segment.period.intersect(&period)?;
            let cycle = segment.cycle?;
            Some(prorate_segment(span, cycle, segment.rate))
        })
        .sum()
}

fn prorate_segment(span: Period, cycle: RentCycle, rate: f64) -> f64 {
    let mut total = 0.0;
    let mut cursor = span.start;
    while cursor < span.stop {
        let Some(length) = cycle.duration_days(cursor) else {
            return total;
        };
        if length < 1.0 {
            // Sub-daily cycles repeat many times a day.
            let days = (span.stop - cursor).num_days() as f64;
            return total + rate * days / length;
        }
        let cycle_stop = cursor + chrono::Duration::days(length as i64);
        let piece_stop = cycle_stop.min(span.stop);
        total += rate * (piece_stop - cursor).num_days() as f64 / length;
        cursor = piece_stop;
    }
    total
}

pub fn metrics_from_segments(period: Period, segments: &[RateSegment]) -> PeriodMetrics {
    PeriodMetrics {
        period_gsr: prorate_gsr(period, segments),
        market_rate: rate_in_force(period, segments),
    }
}

/// Rate of the segment covering the first day of `period`, else the first
/// segment that starts inside it.
pub fn rate_in_force(period: Period, segments: &[RateSegment]) -> f64 {
    segments
        .iter()
        .find(|segment| segment.period.start <= period.start && period.start < segment.period.stop)
        .or_else(|| segments.iter().find(|segment| segment.period.overlaps(&period)))
        .map(|segment| segment.rate)
        .unwrap_or(0.0)
}

fn read_rate_segment(row: &PgRow) -> Result<RateSegment, sqlx::Error> {
    Ok(RateSegment {
        period: Period::new(row.try_get("segment_start")?, row.try_get("segment_stop")?),
        cycle: row
            .try_get::<Option<i64>, _>("rent_cycle")?
            .and_then(RentCycle::from_code),
        rate: row.try_get::<Option<f64>, _>("market_rate")?.unwrap_or(0.0),
    })
}

fn read_report_row(row: &PgRow) -> Result<ReportRow, sqlx::Error> {
    Ok(ReportRow {
        rentable_id: row.try_get("rid")?,
        rentable_name: row.try_get("rentable_name")?,
        rentable_type_id: row.try_get("rtid")?,
        rentable_type: row.try_get("rentable_type")?,
        rent_cycle: row.try_get("rent_cycle")?,
        use_status: row.try_get("use_status")?,
        users: row.try_get("users")?,
        payors: row.try_get("payors")?,
        agreement_rentable_id: row.try_get("rarid")?,
        agreement_id: row.try_get("raid")?,
        agreement_start: row.try_get("agreement_start")?,
        agreement_stop: row.try_get("agreement_stop")?,
        possession_start: row.try_get("possession_start")?,
        possession_stop: row.try_get("possession_stop")?,
        rent_start: row.try_get("rent_start")?,
        rent_stop: row.try_get("rent_stop")?,
        assessment_id: row.try_get("asmid")?,
        amount_due: row.try_get("amount_due")?,
        payments_applied: row.try_get("payments_applied")?,
        description: row.try_get("description")?,
        ..ReportRow::default()
    })
}

fn map_query_error(error: sqlx::Error) -> RentRollError {
    tracing::error!(db_error = %error, "Rent roll query failed");
    RentRollError::Query(error.to_string())
}

fn map_gsr_error(error: sqlx::Error) -> RentRollError {
    tracing::error!(db_error = %error, "Market rate query failed");
    RentRollError::Gsr(error.to_string())
}

fn map_lookup_error(error: sqlx::Error) -> RentRollError {
    tracing::error!(db_error = %error, "Rent roll lookup failed");
    RentRollError::Lookup(error.to_string())
}
