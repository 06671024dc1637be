//! Razorpay payment gateway
//!
//! Online checkout runs in two steps. The server first creates a gateway
//! order for the marketplace order's total, in paise. The client then pays
//! through Razorpay's widget and posts back `(order_id, payment_id, signature)`.
//! The signature is `hex(HMAC-SHA256(key_secret, "{order_id}|{payment_id}"))`
//! and is checked in constant time before the order is marked paid.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::config::RazorpayConfig;

type HmacSha256 = Hmac<Sha256>;

pub const CURRENCY: &str = "INR";

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("gateway rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateGatewayOrder {
    pub amount: i64,
    pub currency: String,
    pub receipt: String,
    pub notes: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct GatewayOrder {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub receipt: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Public key handed to the browser checkout widget.
    fn key_id(&self) -> &str;

    async fn create_order(&self, request: CreateGatewayOrder) -> Result<GatewayOrder, PaymentError>;

    fn verify_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> bool;
}

pub struct RazorpayGateway {
    http: reqwest::Client,
    config: RazorpayConfig,
}

impl RazorpayGateway {
    pub fn new(config: RazorpayConfig) -> Result<Self, PaymentError> {
        let http = reqwest::Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self { http, config })
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    fn key_id(&self) -> &str { &self.config.key_id }

    async fn create_order(&self, request: CreateGatewayOrder) -> Result<GatewayOrder, PaymentError> {
        let url = format!("{}/v1/orders", self.config.api_url.trim_end_matches('/'));
        tracing::debug!(receipt = %request.receipt, amount = request.amount, "creating razorpay order");
        let resp = self.http
            .post(&url)
            .basic_auth(&self.config.key_id, Some(&self.config.key_secret))
            .json(&request)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PaymentError::Rejected { status: status.as_u16(), body });
        }
        Ok(resp.json::<GatewayOrder>().await?)
    }

    fn verify_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> bool {
        verify_signature(&self.config.key_secret, order_id, payment_id, signature)
    }
}

pub fn verify_signature(secret: &str, order_id: &str, payment_id: &str, signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else { return false };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else { return false };
    mac.update(format!("{order_id}|{payment_id}").as_bytes());
    mac.verify_slice(&expected).is_ok()
}
