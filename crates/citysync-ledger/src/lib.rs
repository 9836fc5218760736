use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use thiserror::Error;
use uuid::Uuid;

use citysync_core::{BillStatus, PaymentChannel};

const PAYMENT_COMPLETED: &str = "Completed";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("bill not found")]
    BillNotFound,
    #[error("payment method not found")]
    MethodNotFound,
    #[error("bill already paid")]
    AlreadyPaid,
    #[error("{0}")]
    Validation(String),
    #[error("store failure: {0}")]
    Store(#[from] sqlx::Error),
}

#[derive(Debug, Clone)]
pub struct AppliedPayment {
    pub payment_id: Uuid,
    pub bill_document_id: Uuid,
    pub method_id: Uuid,
    pub amount: Decimal,
    pub paid_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPaymentMethod {
    pub channel: PaymentChannel,
    pub set_default: bool,
    pub bank_name: Option<String>,
    pub account_num: Option<String>,
    pub provider_name: Option<String>,
    pub phone_num: Option<String>,
    pub wallet_email: Option<String>,
}

pub async fn apply_payment(
    pool: &PgPool,
    consumer_id: Uuid,
    bill_document_id: Uuid,
    method_id: Uuid,
    amount: Decimal,
) -> Result<AppliedPayment, LedgerError> {
    let amount = validate_amount(amount)?;

    let mut tx = pool.begin().await?;

    let bill_row = sqlx::query(
        r#"
        SELECT bd.bill_status
        FROM bill_document bd
        JOIN utility_connection uc ON bd.connection_id = uc.connection_id
        WHERE bd.bill_document_id = $1
          AND uc.consumer_id = $2
        "#,
    )
    .bind(bill_document_id)
    .bind(consumer_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(bill_row) = bill_row else {
        return Err(LedgerError::BillNotFound);
    };

    let stored_status: String = bill_row.try_get("bill_status")?;
    if stored_status == BillStatus::Paid.as_str() {
        return Err(LedgerError::AlreadyPaid);
    }

    let method_row = sqlx::query(
        "SELECT method_id FROM payment_method WHERE method_id = $1 AND consumer_id = $2",
    )
    .bind(method_id)
    .bind(consumer_id)
    .fetch_optional(&mut *tx)
    .await?;

    if method_row.is_none() {
        return Err(LedgerError::MethodNotFound);
    }

    // The affected-row count is the concurrency guard: a concurrent payment that
    // already flipped the bill leaves nothing to update here.
    let flipped = sqlx::query(
        "UPDATE bill_document SET bill_status = 'PAID' WHERE bill_document_id = $1 AND bill_status = 'UNPAID'",
    )
    .bind(bill_document_id)
    .execute(&mut *tx)
    .await?;

    if flipped.rows_affected() == 0 {
        return Err(LedgerError::AlreadyPaid);
    }

    let payment_id = Uuid::new_v4();
    let paid_at = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO payment (payment_id, bill_document_id, method_id, payment_amount, payment_date, status)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(payment_id)
    .bind(bill_document_id)
    .bind(method_id)
    .bind(amount)
    .bind(paid_at)
    .bind(PAYMENT_COMPLETED)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(AppliedPayment {
        payment_id,
        bill_document_id,
        method_id,
        amount,
        paid_at,
    })
}

pub async fn set_default_method(
    pool: &PgPool,
    consumer_id: Uuid,
    method_id: Uuid,
) -> Result<(), LedgerError> {
    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE payment_method SET is_default = FALSE WHERE consumer_id = $1")
        .bind(consumer_id)
        .execute(&mut *tx)
        .await?;

    let updated = sqlx::query(
        "UPDATE payment_method SET is_default = TRUE WHERE method_id = $1 AND consumer_id = $2",
    )
    .bind(method_id)
    .bind(consumer_id)
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 0 {
        // rollback keeps whichever default was set before the clear
        return Err(LedgerError::MethodNotFound);
    }

    tx.commit().await?;

    Ok(())
}

pub async fn add_payment_method(
    pool: &PgPool,
    consumer_id: Uuid,
    method: NewPaymentMethod,
) -> Result<Uuid, LedgerError> {
    validate_new_method(&method)?;

    let mut tx = pool.begin().await?;

    if method.set_default {
        sqlx::query("UPDATE payment_method SET is_default = FALSE WHERE consumer_id = $1")
            .bind(consumer_id)
            .execute(&mut *tx)
            .await?;
    }

    let method_id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO payment_method (method_id, consumer_id, channel, is_default)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(method_id)
    .bind(consumer_id)
    .bind(method.channel.as_str())
    .bind(method.set_default)
    .execute(&mut *tx)
    .await?;

    match method.channel {
        PaymentChannel::Bank => {
            sqlx::query("INSERT INTO bank (method_id, bank_name, account_num) VALUES ($1, $2, $3)")
                .bind(method_id)
                .bind(trimmed(&method.bank_name))
                .bind(trimmed(&method.account_num))
                .execute(&mut *tx)
                .await?;
        }
        PaymentChannel::MobileBanking => {
            sqlx::query(
                "INSERT INTO mobile_banking (method_id, provider_name, phone_num) VALUES ($1, $2, $3)",
            )
            .bind(method_id)
            .bind(trimmed(&method.provider_name))
            .bind(trimmed(&method.phone_num))
            .execute(&mut *tx)
            .await?;
        }
        PaymentChannel::Wallet => {
            sqlx::query(
                "INSERT INTO wallet (method_id, wallet_email, phone_num) VALUES ($1, $2, $3)",
            )
            .bind(method_id)
            .bind(trimmed(&method.wallet_email))
            .bind(trimmed(&method.phone_num))
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;

    Ok(method_id)
}

fn validate_amount(amount: Decimal) -> Result<Decimal, LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::Validation(
            "amount must be positive".to_string(),
        ));
    }

    Ok(amount.round_dp(2))
}

fn validate_new_method(method: &NewPaymentMethod) -> Result<(), LedgerError> {
    match method.channel {
        PaymentChannel::Bank => {
            require_field(&method.bank_name, "bank_name")?;
            require_field(&method.account_num, "account_num")?;
        }
        PaymentChannel::MobileBanking => {
            require_field(&method.provider_name, "provider_name")?;
            require_field(&method.phone_num, "phone_num")?;
        }
        PaymentChannel::Wallet => {
            require_field(&method.wallet_email, "wallet_email")?;
        }
    }

    Ok(())
}

fn require_field(value: &Option<String>, field: &str) -> Result<(), LedgerError> {
    match value.as_deref().map(str::trim) {
        Some(trimmed_value) if !trimmed_value.is_empty() => Ok(()),
        _ => Err(LedgerError::Validation(format!("{field} is required"))),
    }
}

fn trimmed(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|trimmed_value| !trimmed_value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet_method(email: Option<&str>) -> NewPaymentMethod {
        NewPaymentMethod {
            channel: PaymentChannel::Wallet,
            set_default: false,
            bank_name: None,
            account_num: None,
            provider_name: None,
            phone_num: None,
            wallet_email: email.map(str::to_string),
        }
    }

    #[test]
    fn rejects_non_positive_amounts() {
        assert!(matches!(
            validate_amount(Decimal::ZERO),
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            validate_amount(Decimal::new(-1500, 2)),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn rounds_amounts_to_two_decimal_places() {
        assert_eq!(
            validate_amount(Decimal::new(1500, 0)).unwrap(),
            Decimal::new(150000, 2)
        );
        assert_eq!(
            validate_amount(Decimal::new(12349, 3)).unwrap(),
            Decimal::new(1235, 2)
        );
        assert_eq!(
            validate_amount(Decimal::new(12341, 3)).unwrap(),
            Decimal::new(1234, 2)
        );
    }

    #[test]
    fn bank_methods_need_bank_name_and_account() {
        let mut method = NewPaymentMethod {
            channel: PaymentChannel::Bank,
            set_default: false,
            bank_name: Some("City Bank".to_string()),
            account_num: None,
            provider_name: None,
            phone_num: None,
            wallet_email: None,
        };
        assert!(matches!(
            validate_new_method(&method),
            Err(LedgerError::Validation(_))
        ));

        method.account_num = Some("0012345678".to_string());
        assert!(validate_new_method(&method).is_ok());
    }

    #[test]
    fn mobile_banking_methods_need_provider_and_phone() {
        let method = NewPaymentMethod {
            channel: PaymentChannel::MobileBanking,
            set_default: true,
            bank_name: None,
            account_num: None,
            provider_name: Some("bKash".to_string()),
            phone_num: Some("01700000000".to_string()),
            wallet_email: None,
        };
        assert!(validate_new_method(&method).is_ok());

        let missing_phone = NewPaymentMethod {
            phone_num: None,
            ..method
        };
        assert!(matches!(
            validate_new_method(&missing_phone),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn wallet_methods_need_an_email_and_ignore_phone() {
        assert!(validate_new_method(&wallet_method(Some("a@b.example"))).is_ok());
        assert!(matches!(
            validate_new_method(&wallet_method(None)),
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            validate_new_method(&wallet_method(Some("   "))),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn error_messages_stay_short_and_human_readable() {
        assert_eq!(LedgerError::BillNotFound.to_string(), "bill not found");
        assert_eq!(
            LedgerError::MethodNotFound.to_string(),
            "payment method not found"
        );
        assert_eq!(LedgerError::AlreadyPaid.to_string(), "bill already paid");
    }
}
