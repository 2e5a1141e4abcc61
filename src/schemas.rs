use serde::Deserialize;
use validator::Validate;

use crate::error::AppError;

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

fn default_offset() -> i64 {
    -1
}
fn default_limit() -> i64 {
    0
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct RentRollQuery {
    #[validate(range(min = 1))]
    pub business_id: i64,
    #[serde(rename = "from")]
    pub from_date: String,
    #[serde(rename = "to")]
    pub to_date: String,
    /// Index of the first entity group; negative returns every group.
    #[serde(default = "default_offset")]
    pub offset: i64,
    /// Entity groups per page; zero or negative returns every group.
    #[serde(default = "default_limit")]
    #[validate(range(max = 1000))]
    pub limit: i64,
}

impl RentRollQuery {
    pub fn cache_key(&self) -> String {
        format!(
            "rent-roll:{}:{}:{}:{}:{}",
            self.business_id,
            self.from_date.trim(),
            self.to_date.trim(),
            self.offset,
            self.limit
        )
    }
}

#[cfg(test)]
mod tests {
    use validator::Validate;

    use super::RentRollQuery;

    fn query(business_id: i64, limit: i64) -> RentRollQuery {
        RentRollQuery {
            business_id,
            from_date: "2026-01-01".to_string(),
            to_date: "2026-02-01".to_string(),
            offset: -1,
            limit,
        }
    }

    #[test]
    fn rejects_missing_business_and_oversized_pages() {
        assert!(query(1, 0).validate().is_ok());
        assert!(query(0, 0).validate().is_err());
        assert!(query(1, 5000).validate().is_err());
    }

    #[test]
    fn negative_limit_means_no_paging() {
        let parsed: RentRollQuery = serde_json::from_str(
            r#"{"business_id": 1, "from": "2026-01-01", "to": "2026-02-01", "limit": -1}"#,
        )
        .expect("query parses");
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn paging_defaults_to_everything() {
        let parsed: RentRollQuery =
            serde_json::from_str(r#"{"business_id": 3, "from": "2026-01-01", "to": "2026-02-01"}"#)
                .expect("query parses");
        assert_eq!(parsed.offset, -1);
        assert_eq!(parsed.limit, 0);
        assert_eq!(parsed.cache_key(), "rent-roll:3:2026-01-01:2026-02-01:-1:0");
    }
}
