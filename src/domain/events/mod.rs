//! Domain events
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::{ComplaintStatus, OrderStatus, PaymentMethod};

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "aggregate", content = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    Product(ProductEvent),
    Order(OrderEvent),
    Complaint(ComplaintEvent),
}

impl DomainEvent {
    /// Subject suffix, e.g. `order.placed`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Product(ProductEvent::Created { .. }) => "product.created",
            Self::Order(OrderEvent::Placed { .. }) => "order.placed",
            Self::Order(OrderEvent::StatusChanged { .. }) => "order.status_changed",
            Self::Order(OrderEvent::Paid { .. }) => "order.paid",
            Self::Complaint(ComplaintEvent::Responded { .. }) => "complaint.responded",
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProductEvent {
    Created { product_id: Uuid, wholesaler_id: Uuid, name: String },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EventLine { pub name: String, pub quantity: u32, pub line_total: Decimal }

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Placed {
        order_id: Uuid,
        order_number: String,
        customer_id: Uuid,
        lines: Vec<EventLine>,
        total_amount: Decimal,
        payment_method: PaymentMethod,
    },
    StatusChanged {
        order_id: Uuid,
        order_number: String,
        customer_id: Uuid,
        status: OrderStatus,
        tracking_number: Option<String>,
    },
    Paid { order_id: Uuid, order_number: String, payment_id: String },
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ComplaintEvent {
    Responded {
        complaint_id: Uuid,
        customer_id: Uuid,
        subject: String,
        responder_name: String,
        message: String,
        status: ComplaintStatus,
    },
}
