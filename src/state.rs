use std::{sync::Arc, time::Duration};

use moka::future::Cache;
use serde_json::Value;
use sqlx::PgPool;

use crate::{config::AppConfig, db::build_pool, repository::rent_roll_repository::BalanceCache};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db_pool: Option<PgPool>,
    pub report_response_cache: Cache<String, Value>,
    pub balance_cache: BalanceCache,
}

impl AppState {
    pub fn build(config: AppConfig) -> Result<Self, sqlx::Error> {
        let db_pool = build_pool(&config)?;
        let report_response_cache = Cache::builder()
            .max_capacity(config.report_response_cache_max_entries.max(1))
            .time_to_live(Duration::from_secs(
                config.report_response_cache_ttl_seconds.max(1),
            ))
            .build();
        let balance_cache = BalanceCache::new(&config);

        Ok(Self {
            config: Arc::new(config),
            db_pool,
            report_response_cache,
            balance_cache,
        })
    }
}
