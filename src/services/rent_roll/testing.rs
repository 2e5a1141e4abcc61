//! In-memory collaborators for engine tests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use chrono::NaiveDate;

use super::{
    period::Period,
    row::ReportRow,
    source::{BalanceCalculator, RentCalculator, RentRollStore, RentableRecord, RentableTypeRef},
    RentRollError,
};

pub fn day(month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, month, day).expect("valid test date")
}

/// `[Jan 1, Feb 1)` of the test year.
pub fn january() -> Period {
    Period::new(day(1, 1), day(2, 1))
}

#[derive(Default)]
pub struct FakeSources {
    rows: Vec<ReportRow>,
    rentables: HashMap<i64, (String, Option<(i64, String)>)>,
    daily_gsr: HashMap<i64, f64>,
    sqft: HashMap<i64, String>,
    receivables: HashMap<(i64, i64), (f64, f64)>,
    deposits: HashMap<(i64, i64), (f64, f64)>,
    fail_query: bool,
    fail_type_lookup: bool,
    fail_gsr: bool,
    fail_receivables: bool,
    gsr_calls: Mutex<Vec<(i64, Period)>>,
    balance_calls: AtomicUsize,
}

impl FakeSources {
    pub fn with_rows(mut self, rows: Vec<ReportRow>) -> Self {
        self.rows = rows;
        self
    }

    pub fn with_rentable(mut self, id: i64, name: &str, rentable_type: Option<(i64, &str)>) -> Self {
        self.rentables.insert(
            id,
            (
                name.to_string(),
                rentable_type.map(|(type_id, type_name)| (type_id, type_name.to_string())),
            ),
        );
        self
    }

    /// Period GSR is `rate` per day; the market rate is `rate` itself.
    pub fn with_daily_gsr(mut self, rentable_id: i64, rate: f64) -> Self {
        self.daily_gsr.insert(rentable_id, rate);
        self
    }

    pub fn with_sqft(mut self, rentable_type_id: i64, raw: &str) -> Self {
        self.sqft.insert(rentable_type_id, raw.to_string());
        self
    }

    pub fn with_receivable(mut self, agreement_id: i64, rentable_id: i64, begin: f64, end: f64) -> Self {
        self.receivables.insert((agreement_id, rentable_id), (begin, end));
        self
    }

    /// `opening` is returned for periods ending by the start of the test
    /// window, `change` for any other period.
    pub fn with_security_deposit(
        mut self,
        agreement_id: i64,
        rentable_id: i64,
        opening: f64,
        change: f64,
    ) -> Self {
        self.deposits.insert((agreement_id, rentable_id), (opening, change));
        self
    }

    pub fn failing_query(mut self) -> Self {
        self.fail_query = true;
        self
    }

    pub fn failing_type_lookup(mut self) -> Self {
        self.fail_type_lookup = true;
        self
    }

    pub fn failing_gsr(mut self) -> Self {
        self.fail_gsr = true;
        self
    }

    pub fn failing_receivables(mut self) -> Self {
        self.fail_receivables = true;
        self
    }

    pub fn gsr_periods(&self) -> Vec<(i64, Period)> {
        self.gsr_calls.lock().expect("gsr calls lock").clone()
    }

    pub fn balance_calls(&self) -> usize {
        self.balance_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RentRollStore for FakeSources {
    async fn run_windowed_query(
        &self,
        _business_id: i64,
        _window: Period,
    ) -> Result<Vec<ReportRow>, RentRollError> {
        if self.fail_query {
            return Err(RentRollError::Query("connection reset".to_string()));
        }
        Ok(self.rows.clone())
    }

    async fn get_rentable(&self, rentable_id: i64) -> Result<Option<RentableRecord>, RentRollError> {
        Ok(self.rentables.get(&rentable_id).map(|(name, _)| RentableRecord {
            id: rentable_id,
            name: name.clone(),
        }))
    }

    async fn get_rentable_type_refs_for_range(
        &self,
        rentable_id: i64,
        window: Period,
    ) -> Result<Vec<RentableTypeRef>, RentRollError> {
        if self.fail_type_lookup {
            return Err(RentRollError::Lookup("rentable type unavailable".to_string()));
        }
        Ok(self
            .rentables
            .get(&rentable_id)
            .and_then(|(_, rentable_type)| rentable_type.clone())
            .map(|(rentable_type_id, name)| RentableTypeRef {
                rentable_type_id,
                name,
                period: window,
            })
            .into_iter()
            .collect())
    }

    async fn get_custom_attribute(
        &self,
        _business_id: i64,
        rentable_type_id: i64,
        _name: &str,
    ) -> Result<Option<String>, RentRollError> {
        Ok(self.sqft.get(&rentable_type_id).cloned())
    }
}

#[async_trait]
impl RentCalculator for FakeSources {
    async fn period_gsr(
        &self,
        _business_id: i64,
        rentable_id: i64,
        period: Period,
    ) -> Result<f64, RentRollError> {
        if self.fail_gsr {
            return Err(RentRollError::Gsr("no market rate".to_string()));
        }
        self.gsr_calls
            .lock()
            .expect("gsr calls lock")
            .push((rentable_id, period));
        let rate = self.daily_gsr.get(&rentable_id).copied().unwrap_or(0.0);
        Ok(rate * period.days() as f64)
    }

    async fn market_rate(
        &self,
        _business_id: i64,
        rentable_id: i64,
        _period: Period,
    ) -> Result<f64, RentRollError> {
        Ok(self.daily_gsr.get(&rentable_id).copied().unwrap_or(0.0))
    }
}

#[async_trait]
impl BalanceCalculator for FakeSources {
    async fn agreement_begin_end_balance(
        &self,
        _business_id: i64,
        rentable_id: i64,
        agreement_id: i64,
        _period: Period,
    ) -> Result<(f64, f64), RentRollError> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_receivables {
            return Err(RentRollError::Lookup("ledger unavailable".to_string()));
        }
        Ok(self
            .receivables
            .get(&(agreement_id, rentable_id))
            .copied()
            .unwrap_or_default())
    }

    async fn security_deposit_balance(
        &self,
        _business_id: i64,
        agreement_id: i64,
        rentable_id: i64,
        period: Period,
    ) -> Result<f64, RentRollError> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        let (opening, change) = self
            .deposits
            .get(&(agreement_id, rentable_id))
            .copied()
            .unwrap_or_default();
        if period.stop <= january().start {
            Ok(opening)
        } else {
            Ok(change)
        }
    }
}
