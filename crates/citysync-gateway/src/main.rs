use std::{
    cmp::{max, min},
    net::SocketAddr,
};

use anyhow::Result as AnyResult;
use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, Query, State},
    http::{StatusCode, request::Parts},
    routing::{delete, get, post, put},
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use citysync_core::{BillStatus, ComplaintStatus, PaymentChannel, display_status};
use citysync_ledger::{LedgerError, NewPaymentMethod};
use citysync_platform::{ServiceConfig, connect_database};

const CURRENCY: &str = "BDT";
const CONSUMER_ROLE: &str = "consumer";
const USAGE_LIMIT: i64 = 60;
const PAYMENT_HISTORY_LIMIT: i64 = 50;

#[derive(Clone)]
struct AppState {
    pool: PgPool,
}

// Identity is established by the upstream auth layer; the gateway trusts the
// forwarded headers and never inspects credentials itself.
#[derive(Debug, Clone, Copy)]
struct ConsumerIdentity {
    consumer_id: Uuid,
}

impl<S> FromRequestParts<S> for ConsumerIdentity
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        authenticate_consumer(
            header_str(parts, "x-user-id"),
            header_str(parts, "x-user-role"),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConnectionView {
    connection_id: Uuid,
    connection_status: String,
    connection_date: NaiveDate,
    payment_type: String,
    connection_type: String,
    utility_name: String,
    unit_of_measurement: String,
    tariff_name: String,
    billing_method: String,
    house_num: String,
    street_name: String,
    region_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConnectionListResponse {
    items: Vec<ConnectionView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ListBillsQuery {
    limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BillView {
    bill_document_id: Uuid,
    connection_id: Uuid,
    bill_type: String,
    bill_generation_date: DateTime<Utc>,
    unit_consumed: Decimal,
    total_amount: Decimal,
    currency: String,
    status: String,
    bill_period_start: Option<NaiveDate>,
    bill_period_end: Option<NaiveDate>,
    due_date: Option<NaiveDate>,
    remarks: Option<String>,
    utility_name: String,
    unit_of_measurement: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BillListResponse {
    items: Vec<BillView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BillDetailView {
    bill_document_id: Uuid,
    connection_id: Uuid,
    bill_type: String,
    bill_generation_date: DateTime<Utc>,
    unit_consumed: Decimal,
    total_amount: Decimal,
    currency: String,
    status: String,
    bill_period_start: Option<NaiveDate>,
    bill_period_end: Option<NaiveDate>,
    due_date: Option<NaiveDate>,
    remarks: Option<String>,
    utility_name: String,
    unit_of_measurement: String,
    tariff_name: String,
    billing_method: String,
    payment_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UsageView {
    usage_id: Uuid,
    meter_id: Uuid,
    units_logged: Decimal,
    time_from: DateTime<Utc>,
    time_to: DateTime<Utc>,
    slab_num: i32,
    rate_per_unit: Decimal,
    cost: Decimal,
    currency: String,
    utility_name: String,
    unit_of_measurement: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UsageListResponse {
    items: Vec<UsageView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ComplaintView {
    complaint_id: Uuid,
    description: String,
    status: String,
    complaint_date: DateTime<Utc>,
    assignment_date: Option<DateTime<Utc>>,
    resolution_date: Option<DateTime<Utc>>,
    remarks: Option<String>,
    connection_id: Option<Uuid>,
    utility_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ComplaintListResponse {
    items: Vec<ComplaintView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CreateComplaintRequest {
    connection_id: Option<Uuid>,
    description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CreateComplaintResponse {
    complaint_id: Uuid,
    status: String,
    complaint_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PaymentMethodView {
    method_id: Uuid,
    channel: String,
    is_default: bool,
    bank_name: Option<String>,
    account_num: Option<String>,
    provider_name: Option<String>,
    mobile_phone: Option<String>,
    wallet_email: Option<String>,
    wallet_phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PaymentMethodListResponse {
    items: Vec<PaymentMethodView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CreatePaymentMethodRequest {
    channel: String,
    set_default: Option<bool>,
    bank_name: Option<String>,
    account_num: Option<String>,
    provider_name: Option<String>,
    phone_num: Option<String>,
    wallet_email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CreatePaymentMethodResponse {
    method_id: Uuid,
    channel: String,
    is_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SetDefaultResponse {
    method_id: Uuid,
    is_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DeleteMethodResponse {
    method_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CreatePaymentRequest {
    bill_document_id: Uuid,
    method_id: Uuid,
    amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CreatePaymentResponse {
    payment_id: Uuid,
    bill_document_id: Uuid,
    method_id: Uuid,
    amount: Decimal,
    currency: String,
    status: String,
    paid_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PaymentHistoryView {
    payment_id: Uuid,
    payment_amount: Decimal,
    currency: String,
    payment_date: DateTime<Utc>,
    status: String,
    channel: String,
    is_default: bool,
    bank_name: Option<String>,
    account_num: Option<String>,
    provider_name: Option<String>,
    mobile_phone: Option<String>,
    wallet_email: Option<String>,
    bill_document_id: Uuid,
    total_amount: Decimal,
    bill_generation_date: DateTime<Utc>,
    utility_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PaymentHistoryResponse {
    items: Vec<PaymentHistoryView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApplicationView {
    application_id: Uuid,
    utility_type: String,
    application_date: NaiveDate,
    status: String,
    requested_connection_type: String,
    address: String,
    priority: String,
    review_date: Option<NaiveDate>,
    approval_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApplicationListResponse {
    items: Vec<ApplicationView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CreateApplicationRequest {
    utility_type: String,
    requested_connection_type: String,
    address: String,
    priority: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CreateApplicationResponse {
    application_id: Uuid,
    utility_type: String,
    status: String,
    priority: String,
    application_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProfileView {
    person_id: Uuid,
    first_name: String,
    last_name: String,
    phone_number: String,
    national_id: Option<String>,
    date_of_birth: Option<NaiveDate>,
    gender: Option<String>,
    email: String,
    consumer_type: String,
    registration_date: NaiveDate,
    house_num: String,
    street_name: String,
    landmark: Option<String>,
    region_name: String,
    postal_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UpdateProfileRequest {
    first_name: String,
    last_name: String,
    phone_number: String,
    gender: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UpdateProfileResponse {
    person_id: Uuid,
    first_name: String,
    last_name: String,
    phone_number: String,
    gender: Option<String>,
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "citysync_gateway=info".to_string()),
        )
        .init();

    let config = ServiceConfig::from_env("0.0.0.0:8080")?;
    let pool = connect_database(&config.database_url).await?;

    let state = AppState { pool };
    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/consumer/connections", get(list_connections))
        .route("/consumer/bills", get(list_bills))
        .route("/consumer/bills/{bill_id}", get(get_bill))
        .route("/consumer/usage", get(list_usage))
        .route(
            "/consumer/complaints",
            get(list_complaints).post(create_complaint),
        )
        .route(
            "/consumer/payment-methods",
            get(list_payment_methods).post(create_payment_method),
        )
        .route(
            "/consumer/payment-methods/{method_id}/default",
            put(set_default_payment_method),
        )
        .route(
            "/consumer/payment-methods/{method_id}",
            delete(delete_payment_method),
        )
        .route("/consumer/payments", post(create_payment))
        .route("/consumer/payment-history", get(list_payment_history))
        .route(
            "/consumer/applications",
            get(list_applications).post(create_application),
        )
        .route("/consumer/profile", get(get_profile).put(update_profile))
        .with_state(state);

    let addr: SocketAddr = config.http_addr.parse()?;
    info!("gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn list_connections(
    State(state): State<AppState>,
    identity: ConsumerIdentity,
) -> Result<Json<ConnectionListResponse>, (StatusCode, String)> {
    let rows = sqlx::query(
        r#"
        SELECT
            uc.connection_id,
            uc.connection_status,
            uc.connection_date,
            uc.payment_type,
            uc.connection_type,
            u.utility_name,
            u.unit_of_measurement,
            t.tariff_name,
            t.billing_method,
            a.house_num,
            a.street_name,
            r.region_name
        FROM utility_connection uc
        JOIN tariff t ON uc.tariff_id = t.tariff_id
        JOIN utility u ON t.utility_id = u.utility_id
        JOIN meter m ON uc.meter_id = m.meter_id
        JOIN address a ON m.address_id = a.address_id
        JOIN region r ON a.region_id = r.region_id
        WHERE uc.consumer_id = $1
        ORDER BY uc.connection_date DESC
        "#,
    )
    .bind(identity.consumer_id)
    .fetch_all(&state.pool)
    .await
    .map_err(internal_error)?;

    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        items.push(ConnectionView {
            connection_id: row.try_get("connection_id").map_err(internal_error)?,
            connection_status: row.try_get("connection_status").map_err(internal_error)?,
            connection_date: row.try_get("connection_date").map_err(internal_error)?,
            payment_type: row.try_get("payment_type").map_err(internal_error)?,
            connection_type: row.try_get("connection_type").map_err(internal_error)?,
            utility_name: row.try_get("utility_name").map_err(internal_error)?,
            unit_of_measurement: row.try_get("unit_of_measurement").map_err(internal_error)?,
            tariff_name: row.try_get("tariff_name").map_err(internal_error)?,
            billing_method: row.try_get("billing_method").map_err(internal_error)?,
            house_num: row.try_get("house_num").map_err(internal_error)?,
            street_name: row.try_get("street_name").map_err(internal_error)?,
            region_name: row.try_get("region_name").map_err(internal_error)?,
        });
    }

    Ok(Json(ConnectionListResponse { items }))
}

async fn list_bills(
    State(state): State<AppState>,
    identity: ConsumerIdentity,
    Query(query): Query<ListBillsQuery>,
) -> Result<Json<BillListResponse>, (StatusCode, String)> {
    let limit = bill_list_limit(query.limit);

    let rows = sqlx::query(
        r#"
        SELECT
            bd.bill_document_id,
            bd.bill_type,
            bd.bill_generation_date,
            bd.unit_consumed,
            bd.total_amount,
            bd.bill_status,
            bp.bill_period_start,
            bp.bill_period_end,
            bp.due_date,
            bp.remarks,
            u.utility_name,
            u.unit_of_measurement,
            uc.connection_id
        FROM bill_document bd
        JOIN utility_connection uc ON bd.connection_id = uc.connection_id
        JOIN tariff t ON uc.tariff_id = t.tariff_id
        JOIN utility u ON t.utility_id = u.utility_id
        LEFT JOIN bill_postpaid bp ON bd.bill_document_id = bp.bill_document_id
        WHERE uc.consumer_id = $1
        ORDER BY bd.bill_generation_date DESC
        LIMIT $2
        "#,
    )
    .bind(identity.consumer_id)
    .bind(limit)
    .fetch_all(&state.pool)
    .await
    .map_err(internal_error)?;

    let today = Utc::now().date_naive();
    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        let stored_status: String = row.try_get("bill_status").map_err(internal_error)?;
        let bill_status = BillStatus::parse(&stored_status).map_err(internal_error)?;
        let due_date: Option<NaiveDate> = row.try_get("due_date").map_err(internal_error)?;

        items.push(BillView {
            bill_document_id: row.try_get("bill_document_id").map_err(internal_error)?,
            connection_id: row.try_get("connection_id").map_err(internal_error)?,
            bill_type: row.try_get("bill_type").map_err(internal_error)?,
            bill_generation_date: row
                .try_get("bill_generation_date")
                .map_err(internal_error)?,
            unit_consumed: row.try_get("unit_consumed").map_err(internal_error)?,
            total_amount: row.try_get("total_amount").map_err(internal_error)?,
            currency: CURRENCY.to_string(),
            status: display_status(bill_status, due_date, today).as_str().to_string(),
            bill_period_start: row.try_get("bill_period_start").map_err(internal_error)?,
            bill_period_end: row.try_get("bill_period_end").map_err(internal_error)?,
            due_date,
            remarks: row.try_get("remarks").map_err(internal_error)?,
            utility_name: row.try_get("utility_name").map_err(internal_error)?,
            unit_of_measurement: row.try_get("unit_of_measurement").map_err(internal_error)?,
        });
    }

    Ok(Json(BillListResponse { items }))
}

async fn get_bill(
    State(state): State<AppState>,
    identity: ConsumerIdentity,
    Path(bill_id): Path<Uuid>,
) -> Result<Json<BillDetailView>, (StatusCode, String)> {
    let row = sqlx::query(
        r#"
        SELECT
            bd.bill_document_id,
            bd.bill_type,
            bd.bill_generation_date,
            bd.unit_consumed,
            bd.total_amount,
            bd.bill_status,
            bp.bill_period_start,
            bp.bill_period_end,
            bp.due_date,
            bp.remarks,
            u.utility_name,
            u.unit_of_measurement,
            t.tariff_name,
            t.billing_method,
            uc.connection_id,
            uc.payment_type
        FROM bill_document bd
        JOIN utility_connection uc ON bd.connection_id = uc.connection_id
        JOIN tariff t ON uc.tariff_id = t.tariff_id
        JOIN utility u ON t.utility_id = u.utility_id
        LEFT JOIN bill_postpaid bp ON bd.bill_document_id = bp.bill_document_id
        WHERE bd.bill_document_id = $1
          AND uc.consumer_id = $2
        "#,
    )
    .bind(bill_id)
    .bind(identity.consumer_id)
    .fetch_optional(&state.pool)
    .await
    .map_err(internal_error)?;

    let Some(row) = row else {
        return Err((StatusCode::NOT_FOUND, "bill not found".to_string()));
    };

    let stored_status: String = row.try_get("bill_status").map_err(internal_error)?;
    let bill_status = BillStatus::parse(&stored_status).map_err(internal_error)?;
    let due_date: Option<NaiveDate> = row.try_get("due_date").map_err(internal_error)?;
    let today = Utc::now().date_naive();

    Ok(Json(BillDetailView {
        bill_document_id: row.try_get("bill_document_id").map_err(internal_error)?,
        connection_id: row.try_get("connection_id").map_err(internal_error)?,
        bill_type: row.try_get("bill_type").map_err(internal_error)?,
        bill_generation_date: row
            .try_get("bill_generation_date")
            .map_err(internal_error)?,
        unit_consumed: row.try_get("unit_consumed").map_err(internal_error)?,
        total_amount: row.try_get("total_amount").map_err(internal_error)?,
        currency: CURRENCY.to_string(),
        status: display_status(bill_status, due_date, today).as_str().to_string(),
        bill_period_start: row.try_get("bill_period_start").map_err(internal_error)?,
        bill_period_end: row.try_get("bill_period_end").map_err(internal_error)?,
        due_date,
        remarks: row.try_get("remarks").map_err(internal_error)?,
        utility_name: row.try_get("utility_name").map_err(internal_error)?,
        unit_of_measurement: row.try_get("unit_of_measurement").map_err(internal_error)?,
        tariff_name: row.try_get("tariff_name").map_err(internal_error)?,
        billing_method: row.try_get("billing_method").map_err(internal_error)?,
        payment_type: row.try_get("payment_type").map_err(internal_error)?,
    }))
}

async fn list_usage(
    State(state): State<AppState>,
    identity: ConsumerIdentity,
) -> Result<Json<UsageListResponse>, (StatusCode, String)> {
    let rows = sqlx::query(
        r#"
        SELECT
            us.usage_id,
            us.meter_id,
            us.unit_used,
            us.time_from,
            us.time_to,
            us.slab_num,
            ts.rate_per_unit,
            u.utility_name,
            u.unit_of_measurement
        FROM usage us
        JOIN utility_connection uc ON us.meter_id = uc.meter_id
        JOIN tariff t ON uc.tariff_id = t.tariff_id
        JOIN utility u ON t.utility_id = u.utility_id
        JOIN tariff_slab ts ON us.tariff_id = ts.tariff_id AND us.slab_num = ts.slab_num
        WHERE uc.consumer_id = $1
        ORDER BY us.time_to DESC
        LIMIT $2
        "#,
    )
    .bind(identity.consumer_id)
    .bind(USAGE_LIMIT)
    .fetch_all(&state.pool)
    .await
    .map_err(internal_error)?;

    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        let units_logged: Decimal = row.try_get("unit_used").map_err(internal_error)?;
        let rate_per_unit: Decimal = row.try_get("rate_per_unit").map_err(internal_error)?;

        items.push(UsageView {
            usage_id: row.try_get("usage_id").map_err(internal_error)?,
            meter_id: row.try_get("meter_id").map_err(internal_error)?,
            units_logged,
            time_from: row.try_get("time_from").map_err(internal_error)?,
            time_to: row.try_get("time_to").map_err(internal_error)?,
            slab_num: row.try_get("slab_num").map_err(internal_error)?,
            rate_per_unit,
            cost: (units_logged * rate_per_unit).round_dp(2),
            currency: CURRENCY.to_string(),
            utility_name: row.try_get("utility_name").map_err(internal_error)?,
            unit_of_measurement: row.try_get("unit_of_measurement").map_err(internal_error)?,
        });
    }

    Ok(Json(UsageListResponse { items }))
}

async fn list_complaints(
    State(state): State<AppState>,
    identity: ConsumerIdentity,
) -> Result<Json<ComplaintListResponse>, (StatusCode, String)> {
    let rows = sqlx::query(
        r#"
        SELECT
            c.complaint_id,
            c.description,
            c.status,
            c.complaint_date,
            c.assignment_date,
            c.resolution_date,
            c.remarks,
            c.connection_id,
            u.utility_name
        FROM complaint c
        LEFT JOIN utility_connection uc ON c.connection_id = uc.connection_id
        LEFT JOIN tariff t ON uc.tariff_id = t.tariff_id
        LEFT JOIN utility u ON t.utility_id = u.utility_id
        WHERE c.consumer_id = $1
        ORDER BY c.complaint_date DESC
        "#,
    )
    .bind(identity.consumer_id)
    .fetch_all(&state.pool)
    .await
    .map_err(internal_error)?;

    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        items.push(ComplaintView {
            complaint_id: row.try_get("complaint_id").map_err(internal_error)?,
            description: row.try_get("description").map_err(internal_error)?,
            status: row.try_get("status").map_err(internal_error)?,
            complaint_date: row.try_get("complaint_date").map_err(internal_error)?,
            assignment_date: row.try_get("assignment_date").map_err(internal_error)?,
            resolution_date: row.try_get("resolution_date").map_err(internal_error)?,
            remarks: row.try_get("remarks").map_err(internal_error)?,
            connection_id: row.try_get("connection_id").map_err(internal_error)?,
            utility_name: row.try_get("utility_name").map_err(internal_error)?,
        });
    }

    Ok(Json(ComplaintListResponse { items }))
}

async fn create_complaint(
    State(state): State<AppState>,
    identity: ConsumerIdentity,
    Json(payload): Json<CreateComplaintRequest>,
) -> Result<(StatusCode, Json<CreateComplaintResponse>), (StatusCode, String)> {
    let description = require_text(&payload.description, "description").map_err(invalid_request)?;

    let complaint_id = Uuid::new_v4();
    let complaint_date = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO complaint (complaint_id, consumer_id, connection_id, description, status, complaint_date)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(complaint_id)
    .bind(identity.consumer_id)
    .bind(payload.connection_id)
    .bind(&description)
    .bind(ComplaintStatus::Pending.as_str())
    .bind(complaint_date)
    .execute(&state.pool)
    .await
    .map_err(internal_error)?;

    Ok((
        StatusCode::CREATED,
        Json(CreateComplaintResponse {
            complaint_id,
            status: ComplaintStatus::Pending.as_str().to_string(),
            complaint_date,
        }),
    ))
}

async fn list_payment_methods(
    State(state): State<AppState>,
    identity: ConsumerIdentity,
) -> Result<Json<PaymentMethodListResponse>, (StatusCode, String)> {
    let rows = sqlx::query(
        r#"
        SELECT
            pm.method_id,
            pm.channel,
            pm.is_default,
            b.bank_name,
            b.account_num,
            mb.provider_name,
            mb.phone_num AS mobile_phone,
            w.wallet_email,
            w.phone_num AS wallet_phone
        FROM payment_method pm
        LEFT JOIN bank b ON pm.method_id = b.method_id
        LEFT JOIN mobile_banking mb ON pm.method_id = mb.method_id
        LEFT JOIN wallet w ON pm.method_id = w.method_id
        WHERE pm.consumer_id = $1
        ORDER BY pm.is_default DESC, pm.created_at ASC
        "#,
    )
    .bind(identity.consumer_id)
    .fetch_all(&state.pool)
    .await
    .map_err(internal_error)?;

    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        items.push(PaymentMethodView {
            method_id: row.try_get("method_id").map_err(internal_error)?,
            channel: row.try_get("channel").map_err(internal_error)?,
            is_default: row.try_get("is_default").map_err(internal_error)?,
            bank_name: row.try_get("bank_name").map_err(internal_error)?,
            account_num: row.try_get("account_num").map_err(internal_error)?,
            provider_name: row.try_get("provider_name").map_err(internal_error)?,
            mobile_phone: row.try_get("mobile_phone").map_err(internal_error)?,
            wallet_email: row.try_get("wallet_email").map_err(internal_error)?,
            wallet_phone: row.try_get("wallet_phone").map_err(internal_error)?,
        });
    }

    Ok(Json(PaymentMethodListResponse { items }))
}

async fn create_payment_method(
    State(state): State<AppState>,
    identity: ConsumerIdentity,
    Json(payload): Json<CreatePaymentMethodRequest>,
) -> Result<(StatusCode, Json<CreatePaymentMethodResponse>), (StatusCode, String)> {
    let channel = PaymentChannel::parse(payload.channel.trim()).map_err(invalid_request)?;
    let set_default = payload.set_default.unwrap_or(false);

    let method = NewPaymentMethod {
        channel,
        set_default,
        bank_name: payload.bank_name,
        account_num: payload.account_num,
        provider_name: payload.provider_name,
        phone_num: payload.phone_num,
        wallet_email: payload.wallet_email,
    };

    let method_id = citysync_ledger::add_payment_method(&state.pool, identity.consumer_id, method)
        .await
        .map_err(ledger_error)?;

    Ok((
        StatusCode::CREATED,
        Json(CreatePaymentMethodResponse {
            method_id,
            channel: channel.as_str().to_string(),
            is_default: set_default,
        }),
    ))
}

async fn set_default_payment_method(
    State(state): State<AppState>,
    identity: ConsumerIdentity,
    Path(method_id): Path<Uuid>,
) -> Result<Json<SetDefaultResponse>, (StatusCode, String)> {
    citysync_ledger::set_default_method(&state.pool, identity.consumer_id, method_id)
        .await
        .map_err(ledger_error)?;

    Ok(Json(SetDefaultResponse {
        method_id,
        is_default: true,
    }))
}

async fn delete_payment_method(
    State(state): State<AppState>,
    identity: ConsumerIdentity,
    Path(method_id): Path<Uuid>,
) -> Result<Json<DeleteMethodResponse>, (StatusCode, String)> {
    let deleted = sqlx::query(
        "DELETE FROM payment_method WHERE method_id = $1 AND consumer_id = $2",
    )
    .bind(method_id)
    .bind(identity.consumer_id)
    .execute(&state.pool)
    .await
    .map_err(internal_error)?;

    if deleted.rows_affected() == 0 {
        return Err((
            StatusCode::NOT_FOUND,
            "payment method not found".to_string(),
        ));
    }

    Ok(Json(DeleteMethodResponse { method_id }))
}

async fn create_payment(
    State(state): State<AppState>,
    identity: ConsumerIdentity,
    Json(payload): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<CreatePaymentResponse>), (StatusCode, String)> {
    let applied = citysync_ledger::apply_payment(
        &state.pool,
        identity.consumer_id,
        payload.bill_document_id,
        payload.method_id,
        payload.amount,
    )
    .await
    .map_err(ledger_error)?;

    info!(
        "payment {} applied to bill {}",
        applied.payment_id, applied.bill_document_id
    );

    Ok((
        StatusCode::CREATED,
        Json(CreatePaymentResponse {
            payment_id: applied.payment_id,
            bill_document_id: applied.bill_document_id,
            method_id: applied.method_id,
            amount: applied.amount,
            currency: CURRENCY.to_string(),
            status: "Completed".to_string(),
            paid_at: applied.paid_at,
        }),
    ))
}

async fn list_payment_history(
    State(state): State<AppState>,
    identity: ConsumerIdentity,
) -> Result<Json<PaymentHistoryResponse>, (StatusCode, String)> {
    let rows = sqlx::query(
        r#"
        SELECT
            p.payment_id,
            p.payment_amount,
            p.payment_date,
            p.status,
            pm.channel,
            pm.is_default,
            b.bank_name,
            b.account_num,
            mb.provider_name,
            mb.phone_num AS mobile_phone,
            w.wallet_email,
            bd.bill_document_id,
            bd.total_amount,
            bd.bill_generation_date,
            u.utility_name
        FROM payment p
        JOIN payment_method pm ON p.method_id = pm.method_id
        JOIN bill_document bd ON p.bill_document_id = bd.bill_document_id
        JOIN utility_connection uc ON bd.connection_id = uc.connection_id
        JOIN tariff t ON uc.tariff_id = t.tariff_id
        JOIN utility u ON t.utility_id = u.utility_id
        LEFT JOIN bank b ON pm.method_id = b.method_id
        LEFT JOIN mobile_banking mb ON pm.method_id = mb.method_id
        LEFT JOIN wallet w ON pm.method_id = w.method_id
        WHERE uc.consumer_id = $1
        ORDER BY p.payment_date DESC
        LIMIT $2
        "#,
    )
    .bind(identity.consumer_id)
    .bind(PAYMENT_HISTORY_LIMIT)
    .fetch_all(&state.pool)
    .await
    .map_err(internal_error)?;

    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        items.push(PaymentHistoryView {
            payment_id: row.try_get("payment_id").map_err(internal_error)?,
            payment_amount: row.try_get("payment_amount").map_err(internal_error)?,
            currency: CURRENCY.to_string(),
            payment_date: row.try_get("payment_date").map_err(internal_error)?,
            status: row.try_get("status").map_err(internal_error)?,
            channel: row.try_get("channel").map_err(internal_error)?,
            is_default: row.try_get("is_default").map_err(internal_error)?,
            bank_name: row.try_get("bank_name").map_err(internal_error)?,
            account_num: row.try_get("account_num").map_err(internal_error)?,
            provider_name: row.try_get("provider_name").map_err(internal_error)?,
            mobile_phone: row.try_get("mobile_phone").map_err(internal_error)?,
            wallet_email: row.try_get("wallet_email").map_err(internal_error)?,
            bill_document_id: row.try_get("bill_document_id").map_err(internal_error)?,
            total_amount: row.try_get("total_amount").map_err(internal_error)?,
            bill_generation_date: row
                .try_get("bill_generation_date")
                .map_err(internal_error)?,
            utility_name: row.try_get("utility_name").map_err(internal_error)?,
        });
    }

    Ok(Json(PaymentHistoryResponse { items }))
}

async fn list_applications(
    State(state): State<AppState>,
    identity: ConsumerIdentity,
) -> Result<Json<ApplicationListResponse>, (StatusCode, String)> {
    let rows = sqlx::query(
        r#"
        SELECT
            application_id,
            utility_type,
            application_date,
            status,
            requested_connection_type,
            address,
            priority,
            review_date,
            approval_date
        FROM connection_application
        WHERE consumer_id = $1
        ORDER BY application_date DESC
        "#,
    )
    .bind(identity.consumer_id)
    .fetch_all(&state.pool)
    .await
    .map_err(internal_error)?;

    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        items.push(ApplicationView {
            application_id: row.try_get("application_id").map_err(internal_error)?,
            utility_type: row.try_get("utility_type").map_err(internal_error)?,
            application_date: row.try_get("application_date").map_err(internal_error)?,
            status: row.try_get("status").map_err(internal_error)?,
            requested_connection_type: row
                .try_get("requested_connection_type")
                .map_err(internal_error)?,
            address: row.try_get("address").map_err(internal_error)?,
            priority: row.try_get("priority").map_err(internal_error)?,
            review_date: row.try_get("review_date").map_err(internal_error)?,
            approval_date: row.try_get("approval_date").map_err(internal_error)?,
        });
    }

    Ok(Json(ApplicationListResponse { items }))
}

async fn create_application(
    State(state): State<AppState>,
    identity: ConsumerIdentity,
    Json(payload): Json<CreateApplicationRequest>,
) -> Result<(StatusCode, Json<CreateApplicationResponse>), (StatusCode, String)> {
    let utility_type = normalize_utility_type(&payload.utility_type).map_err(invalid_request)?;
    let requested_connection_type =
        require_text(&payload.requested_connection_type, "requested_connection_type")
            .map_err(invalid_request)?;
    let address = require_text(&payload.address, "address").map_err(invalid_request)?;
    let priority = normalize_priority(payload.priority.as_deref());

    let application_id = Uuid::new_v4();
    let application_date = Utc::now().date_naive();

    sqlx::query(
        r#"
        INSERT INTO connection_application (
            application_id, consumer_id, utility_type, requested_connection_type,
            address, priority, status, application_date
        )
        VALUES ($1, $2, $3, $4, $5, $6, 'Pending', $7)
        "#,
    )
    .bind(application_id)
    .bind(identity.consumer_id)
    .bind(&utility_type)
    .bind(&requested_connection_type)
    .bind(&address)
    .bind(&priority)
    .bind(application_date)
    .execute(&state.pool)
    .await
    .map_err(internal_error)?;

    Ok((
        StatusCode::CREATED,
        Json(CreateApplicationResponse {
            application_id,
            utility_type,
            status: "Pending".to_string(),
            priority,
            application_date,
        }),
    ))
}

async fn get_profile(
    State(state): State<AppState>,
    identity: ConsumerIdentity,
) -> Result<Json<ProfileView>, (StatusCode, String)> {
    let row = sqlx::query(
        r#"
        SELECT
            p.person_id,
            p.first_name,
            p.last_name,
            p.phone_number,
            p.national_id,
            p.date_of_birth,
            p.gender,
            a.email,
            c.consumer_type,
            c.registration_date,
            addr.house_num,
            addr.street_name,
            addr.landmark,
            r.region_name,
            r.postal_code
        FROM person p
        JOIN account a ON a.person_id = p.person_id
        JOIN consumer c ON c.person_id = p.person_id
        JOIN address addr ON p.address_id = addr.address_id
        JOIN region r ON addr.region_id = r.region_id
        WHERE p.person_id = $1
        "#,
    )
    .bind(identity.consumer_id)
    .fetch_optional(&state.pool)
    .await
    .map_err(internal_error)?;

    let Some(row) = row else {
        return Err((StatusCode::NOT_FOUND, "profile not found".to_string()));
    };

    Ok(Json(ProfileView {
        person_id: row.try_get("person_id").map_err(internal_error)?,
        first_name: row.try_get("first_name").map_err(internal_error)?,
        last_name: row.try_get("last_name").map_err(internal_error)?,
        phone_number: row.try_get("phone_number").map_err(internal_error)?,
        national_id: row.try_get("national_id").map_err(internal_error)?,
        date_of_birth: row.try_get("date_of_birth").map_err(internal_error)?,
        gender: row.try_get("gender").map_err(internal_error)?,
        email: row.try_get("email").map_err(internal_error)?,
        consumer_type: row.try_get("consumer_type").map_err(internal_error)?,
        registration_date: row.try_get("registration_date").map_err(internal_error)?,
        house_num: row.try_get("house_num").map_err(internal_error)?,
        street_name: row.try_get("street_name").map_err(internal_error)?,
        landmark: row.try_get("landmark").map_err(internal_error)?,
        region_name: row.try_get("region_name").map_err(internal_error)?,
        postal_code: row.try_get("postal_code").map_err(internal_error)?,
    }))
}

async fn update_profile(
    State(state): State<AppState>,
    identity: ConsumerIdentity,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Json<UpdateProfileResponse>, (StatusCode, String)> {
    let first_name = require_text(&payload.first_name, "first_name").map_err(invalid_request)?;
    let last_name = require_text(&payload.last_name, "last_name").map_err(invalid_request)?;
    let phone_number =
        require_text(&payload.phone_number, "phone_number").map_err(invalid_request)?;
    let gender = payload
        .gender
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);

    let updated = sqlx::query(
        "UPDATE person SET first_name = $2, last_name = $3, phone_number = $4, gender = $5 WHERE person_id = $1",
    )
    .bind(identity.consumer_id)
    .bind(&first_name)
    .bind(&last_name)
    .bind(&phone_number)
    .bind(gender.as_deref())
    .execute(&state.pool)
    .await
    .map_err(internal_error)?;

    if updated.rows_affected() == 0 {
        return Err((StatusCode::NOT_FOUND, "profile not found".to_string()));
    }

    Ok(Json(UpdateProfileResponse {
        person_id: identity.consumer_id,
        first_name,
        last_name,
        phone_number,
        gender,
    }))
}

fn header_str<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|value| value.to_str().ok())
}

fn authenticate_consumer(
    user_id: Option<&str>,
    role: Option<&str>,
) -> Result<ConsumerIdentity, (StatusCode, String)> {
    let Some(user_id) = user_id else {
        return Err((
            StatusCode::UNAUTHORIZED,
            "authentication required".to_string(),
        ));
    };

    let consumer_id = Uuid::parse_str(user_id.trim()).map_err(|_| {
        (
            StatusCode::UNAUTHORIZED,
            "authentication required".to_string(),
        )
    })?;

    match role.map(str::trim) {
        Some(CONSUMER_ROLE) => Ok(ConsumerIdentity { consumer_id }),
        _ => Err((
            StatusCode::FORBIDDEN,
            "consumer role required".to_string(),
        )),
    }
}

fn bill_list_limit(requested: Option<i64>) -> i64 {
    min(max(requested.unwrap_or(20), 1), 100)
}

fn require_text(value: &str, field_name: &str) -> AnyResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        anyhow::bail!("{field_name} is required");
    }

    Ok(trimmed.to_string())
}

fn normalize_utility_type(value: &str) -> AnyResult<String> {
    let normalized = value.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "electricity" | "water" | "gas" => Ok(normalized),
        _ => anyhow::bail!("utility_type must be electricity, water, or gas"),
    }
}

fn normalize_priority(value: Option<&str>) -> String {
    match value.map(str::trim).filter(|trimmed| !trimmed.is_empty()) {
        Some(priority) => priority.to_string(),
        None => "Normal".to_string(),
    }
}

fn ledger_error(err: LedgerError) -> (StatusCode, String) {
    let status = match err {
        LedgerError::BillNotFound | LedgerError::MethodNotFound => StatusCode::NOT_FOUND,
        LedgerError::AlreadyPaid | LedgerError::Validation(_) => StatusCode::BAD_REQUEST,
        LedgerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (status, err.to_string())
}

fn invalid_request(err: anyhow::Error) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, err.to_string())
}

fn internal_error<E: std::fmt::Display>(err: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_requires_a_valid_uuid_header() {
        let id = Uuid::new_v4();
        let binding = id.to_string();

        let identity = authenticate_consumer(Some(binding.as_str()), Some("consumer")).unwrap();
        assert_eq!(identity.consumer_id, id);

        assert_eq!(
            authenticate_consumer(None, Some("consumer")).unwrap_err().0,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            authenticate_consumer(Some("not-a-uuid"), Some("consumer"))
                .unwrap_err()
                .0,
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn authentication_rejects_non_consumer_roles() {
        let binding = Uuid::new_v4().to_string();
        let user_id = binding.as_str();

        assert_eq!(
            authenticate_consumer(Some(user_id), Some("employee"))
                .unwrap_err()
                .0,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            authenticate_consumer(Some(user_id), None).unwrap_err().0,
            StatusCode::FORBIDDEN
        );
        assert!(authenticate_consumer(Some(user_id), Some(" consumer ")).is_ok());
    }

    #[test]
    fn bill_list_limit_defaults_and_clamps() {
        assert_eq!(bill_list_limit(None), 20);
        assert_eq!(bill_list_limit(Some(5)), 5);
        assert_eq!(bill_list_limit(Some(0)), 1);
        assert_eq!(bill_list_limit(Some(-3)), 1);
        assert_eq!(bill_list_limit(Some(5000)), 100);
    }

    #[test]
    fn ledger_errors_map_to_expected_statuses() {
        assert_eq!(
            ledger_error(LedgerError::BillNotFound).0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ledger_error(LedgerError::MethodNotFound).0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ledger_error(LedgerError::AlreadyPaid),
            (StatusCode::BAD_REQUEST, "bill already paid".to_string())
        );
        assert_eq!(
            ledger_error(LedgerError::Validation("amount must be positive".to_string())).0,
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn utility_type_is_normalized_to_known_utilities() {
        assert_eq!(normalize_utility_type(" Electricity ").unwrap(), "electricity");
        assert_eq!(normalize_utility_type("GAS").unwrap(), "gas");
        assert!(normalize_utility_type("internet").is_err());
        assert!(normalize_utility_type("").is_err());
    }

    #[test]
    fn priority_defaults_to_normal() {
        assert_eq!(normalize_priority(None), "Normal");
        assert_eq!(normalize_priority(Some("  ")), "Normal");
        assert_eq!(normalize_priority(Some("High")), "High");
    }

    #[test]
    fn required_text_fields_reject_blank_input() {
        assert_eq!(require_text("  Meter box damaged ", "description").unwrap(),
            "Meter box damaged");
        assert!(require_text("   ", "description").is_err());
    }
}
