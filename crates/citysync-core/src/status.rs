use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillStatus {
    Unpaid,
    Paid,
}

impl BillStatus {
    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value {
            "UNPAID" => Ok(Self::Unpaid),
            "PAID" => Ok(Self::Paid),
            _ => anyhow::bail!("bill_status must be UNPAID or PAID, got {value}"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unpaid => "UNPAID",
            Self::Paid => "PAID",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisplayStatus {
    Paid,
    Pending,
    Overdue,
}

impl DisplayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paid => "Paid",
            Self::Pending => "Pending",
            Self::Overdue => "Overdue",
        }
    }
}

// Overdue is never stored; it only exists relative to the date of the read.
pub fn display_status(
    bill_status: BillStatus,
    due_date: Option<NaiveDate>,
    today: NaiveDate,
) -> DisplayStatus {
    match bill_status {
        BillStatus::Paid => DisplayStatus::Paid,
        BillStatus::Unpaid => match due_date {
            Some(due) if due < today => DisplayStatus::Overdue,
            _ => DisplayStatus::Pending,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn paid_wins_regardless_of_due_date() {
        let today = date(2026, 8, 4);
        for due in [
            None,
            Some(date(2026, 8, 3)),
            Some(today),
            Some(date(2026, 9, 1)),
        ] {
            assert_eq!(
                display_status(BillStatus::Paid, due, today),
                DisplayStatus::Paid
            );
        }
    }

    #[test]
    fn unpaid_before_due_date_is_pending() {
        let today = date(2026, 8, 4);
        assert_eq!(
            display_status(BillStatus::Unpaid, Some(date(2026, 8, 20)), today),
            DisplayStatus::Pending
        );
    }

    #[test]
    fn unpaid_due_today_is_still_pending() {
        let today = date(2026, 8, 4);
        assert_eq!(
            display_status(BillStatus::Unpaid, Some(today), today),
            DisplayStatus::Pending
        );
    }

    #[test]
    fn unpaid_past_due_date_is_overdue() {
        let today = date(2026, 8, 4);
        assert_eq!(
            display_status(BillStatus::Unpaid, Some(date(2026, 8, 3)), today),
            DisplayStatus::Overdue
        );
    }

    #[test]
    fn unpaid_without_billing_period_is_pending() {
        let today = date(2026, 8, 4);
        assert_eq!(
            display_status(BillStatus::Unpaid, None, today),
            DisplayStatus::Pending
        );
    }

    #[test]
    fn bill_status_round_trips_through_storage_form() {
        assert_eq!(BillStatus::parse("UNPAID").unwrap(), BillStatus::Unpaid);
        assert_eq!(BillStatus::parse("PAID").unwrap(), BillStatus::Paid);
        assert_eq!(BillStatus::Unpaid.as_str(), "UNPAID");
        assert_eq!(BillStatus::Paid.as_str(), "PAID");
        assert!(BillStatus::parse("OVERDUE").is_err());
        assert!(BillStatus::parse("paid").is_err());
    }
}
