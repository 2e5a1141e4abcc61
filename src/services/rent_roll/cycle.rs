use chrono::{Months, NaiveDate};

/// Recurrence frequency stored on rentable types as an integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RentCycle {
    Norecur,
    Secondly,
    Minutely,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl RentCycle {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Norecur),
            1 => Some(Self::Secondly),
            2 => Some(Self::Minutely),
            3 => Some(Self::Hourly),
            4 => Some(Self::Daily),
            5 => Some(Self::Weekly),
            6 => Some(Self::Monthly),
            7 => Some(Self::Quarterly),
            8 => Some(Self::Yearly),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Norecur => "Norecur",
            Self::Secondly => "Secondly",
            Self::Minutely => "Minutely",
            Self::Hourly => "Hourly",
            Self::Daily => "Daily",
            Self::Weekly => "Weekly",
            Self::Monthly => "Monthly",
            Self::Quarterly => "Quarterly",
            Self::Yearly => "Yearly",
        }
    }

    /// Length in days of the cycle beginning on `from`. Calendar cycles follow
    /// the calendar, so February is shorter than March. `Norecur` has no
    /// length and returns `None`.
    pub fn duration_days(self, from: NaiveDate) -> Option<f64> {
        let calendar = |months: u32| {
            from.checked_add_months(Months::new(months))
                .map(|next| (next - from).num_days() as f64)
        };
        match self {
            Self::Norecur => None,
            Self::Secondly => Some(1.0 / 86_400.0),
            Self::Minutely => Some(1.0 / 1_440.0),
            Self::Hourly => Some(1.0 / 24.0),
            Self::Daily => Some(1.0),
            Self::Weekly => Some(7.0),
            Self::Monthly => calendar(1),
            Self::Quarterly => calendar(3),
            Self::Yearly => calendar(12),
        }
    }
}

/// Display label for a raw rent-cycle code; unknown codes have no label.
pub fn rent_cycle_label(code: Option<i64>) -> Option<String> {
    code.and_then(RentCycle::from_code)
        .map(|cycle| cycle.as_str().to_string())
}
