//! Online payment endpoints backed by the configured gateway.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{extract::State, routing::{get, post}, Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;
use validator::Validate;

use super::extract::{AuthUser, ValidatedJson};
use super::orders::{lock_order, save_progress};
use super::AppState;
use crate::domain::aggregates::Order;
use crate::error::{ApiError, ApiResult};
use crate::payment::{CreateGatewayOrder, PaymentGateway, CURRENCY};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/key", get(key))
        .route("/create-order", post(create_order))
        .route("/verify", post(verify))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub order_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyRequest {
    pub razorpay_order_id: Option<String>,
    pub razorpay_payment_id: Option<String>,
    pub razorpay_signature: Option<String>,
    #[serde(rename = "orderId")]
    pub order_id: Option<Uuid>,
}

/// All four proof fields, each present and non-blank.
pub struct PaymentProof {
    pub gateway_order_id: String,
    pub payment_id: String,
    pub signature: String,
    pub order_id: Uuid,
}

impl VerifyRequest {
    pub fn into_proof(self) -> Option<PaymentProof> {
        let present = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        Some(PaymentProof {
            gateway_order_id: present(self.razorpay_order_id)?,
            payment_id: present(self.razorpay_payment_id)?,
            signature: present(self.razorpay_signature)?,
            order_id: self.order_id?,
        })
    }
}

pub fn gateway(state: &AppState) -> ApiResult<Arc<dyn PaymentGateway>> {
    state
        .payments
        .clone()
        .ok_or_else(|| ApiError::Unavailable("Online payments are not configured.".to_string()))
}

async fn key(State(state): State<AppState>, _auth: AuthUser) -> ApiResult<Json<Value>> {
    let gateway = gateway(&state)?;
    Ok(Json(json!({ "keyId": gateway.key_id() })))
}

async fn create_order(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ValidatedJson(req): ValidatedJson<CreateOrderRequest>,
) -> ApiResult<Json<Value>> {
    let gateway = gateway(&state)?;
    let order_id = req.order_id.ok_or_else(|| ApiError::BadRequest("orderId is required".to_string()))?;

    let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
        .bind(order_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Order"))?;
    if order.customer_id != user.id {
        return Err(ApiError::not_authorized());
    }
    order.ensure_payable()?;
    let amount = order
        .total()
        .to_paise()
        .ok_or_else(|| ApiError::Internal(format!("order {} total out of range", order.id)))?;

    let notes = HashMap::from([
        ("orderId".to_string(), order.id.to_string()),
        ("customerEmail".to_string(), user.email.clone()),
    ]);
    let gateway_order = gateway
        .create_order(CreateGatewayOrder {
            amount,
            currency: CURRENCY.to_string(),
            receipt: order.order_number.clone(),
            notes,
        })
        .await
        .map_err(|e| ApiError::Gateway(e.to_string()))?;

    let mut tx = state.db.begin().await?;
    let mut locked = lock_order(&mut tx, order.id).await?;
    locked.attach_gateway_order(gateway_order.id.clone(), Utc::now())?;
    save_progress(&mut tx, &locked).await?;
    tx.commit().await?;

    tracing::info!(order_id = %order.id, gateway_order_id = %gateway_order.id, amount, "gateway order created");
    Ok(Json(json!({
        "razorpayOrderId": gateway_order.id,
        "amount": gateway_order.amount,
        "currency": gateway_order.currency,
        "keyId": gateway.key_id(),
    })))
}

async fn verify(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ValidatedJson(req): ValidatedJson<VerifyRequest>,
) -> ApiResult<Json<Value>> {
    let gateway = gateway(&state)?;
    let proof = req
        .into_proof()
        .ok_or_else(|| ApiError::BadRequest("Missing payment verification fields".to_string()))?;
    if !gateway.verify_signature(&proof.gateway_order_id, &proof.payment_id, &proof.signature) {
        tracing::warn!(order_id = %proof.order_id, "payment signature mismatch");
        return Err(ApiError::BadRequest("Payment verification failed".to_string()));
    }

    let mut tx = state.db.begin().await?;
    let mut order = lock_order(&mut tx, proof.order_id).await?;
    if order.customer_id != user.id {
        return Err(ApiError::not_authorized());
    }
    order.mark_paid(&proof.gateway_order_id, proof.payment_id, proof.signature, Utc::now())?;
    save_progress(&mut tx, &order).await?;
    tx.commit().await?;

    tracing::info!(order_id = %order.id, "payment verified");
    state.publish(order.take_events(), None).await;
    Ok(Json(json!({ "message": "Payment verified successfully", "order": order })))
}
