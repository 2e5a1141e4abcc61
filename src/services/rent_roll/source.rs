use async_trait::async_trait;

use super::{period::Period, row::ReportRow, RentRollError};

#[derive(Debug, Clone, PartialEq)]
pub struct RentableRecord {
    pub id: i64,
    pub name: String,
}

/// A rentable's type assignment over `period`.
#[derive(Debug, Clone, PartialEq)]
pub struct RentableTypeRef {
    pub rentable_type_id: i64,
    pub name: String,
    pub period: Period,
}

/// Read access to rentables, agreements and payment detail.
#[async_trait]
pub trait RentRollStore: Send + Sync {
    /// Every rentable crossed with each agreement segment active in `window`,
    /// plus every agreement active in `window` with no rentable, one row per
    /// assessment or receipt allocation.
    async fn run_windowed_query(
        &self,
        business_id: i64,
        window: Period,
    ) -> Result<Vec<ReportRow>, RentRollError>;

    async fn get_rentable(&self, rentable_id: i64) -> Result<Option<RentableRecord>, RentRollError>;

    async fn get_rentable_type_refs_for_range(
        &self,
        rentable_id: i64,
        window: Period,
    ) -> Result<Vec<RentableTypeRef>, RentRollError>;

    /// Raw value of a custom attribute configured on a rentable type.
    async fn get_custom_attribute(
        &self,
        business_id: i64,
        rentable_type_id: i64,
        name: &str,
    ) -> Result<Option<String>, RentRollError>;
}

/// Both figures the enricher needs for one agreement segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeriodMetrics {
    pub period_gsr: f64,
    pub market_rate: f64,
}

/// Gross scheduled rent and market rate for a rentable over a period.
#[async_trait]
pub trait RentCalculator: Send + Sync {
    async fn period_gsr(
        &self,
        business_id: i64,
        rentable_id: i64,
        period: Period,
    ) -> Result<f64, RentRollError>;

    async fn market_rate(
        &self,
        business_id: i64,
        rentable_id: i64,
        period: Period,
    ) -> Result<f64, RentRollError>;

    /// Implementations that derive both figures from the same data should
    /// override this to fetch it once.
    async fn period_metrics(
        &self,
        business_id: i64,
        rentable_id: i64,
        period: Period,
    ) -> Result<PeriodMetrics, RentRollError> {
        Ok(PeriodMetrics {
            period_gsr: self.period_gsr(business_id, rentable_id, period).await?,
            market_rate: self.market_rate(business_id, rentable_id, period).await?,
        })
    }
}

/// Receivable and security-deposit balances for an agreement on a rentable.
#[async_trait]
pub trait BalanceCalculator: Send + Sync {
    /// Receivable balance at `period.start` and at `period.stop`.
    async fn agreement_begin_end_balance(
        &self,
        business_id: i64,
        rentable_id: i64,
        agreement_id: i64,
        period: Period,
    ) -> Result<(f64, f64), RentRollError>;

    /// Net security-deposit activity within `period`.
    async fn security_deposit_balance(
        &self,
        business_id: i64,
        agreement_id: i64,
        rentable_id: i64,
        period: Period,
    ) -> Result<f64, RentRollError>;
}

/// Collaborators one pipeline run reads from.
#[derive(Clone, Copy)]
pub struct RentRollSources<'a> {
    pub store: &'a dyn RentRollStore,
    pub rent: &'a dyn RentCalculator,
    pub balances: &'a dyn BalanceCalculator,
}

impl<'a> RentRollSources<'a> {
    /// All three collaborators served by one value.
    pub fn from_single<T>(source: &'a T) -> Self
    where
        T: RentRollStore + RentCalculator + BalanceCalculator,
    {
        Self {
            store: source,
            rent: source,
            balances: source,
        }
    }
}
