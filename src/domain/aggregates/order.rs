//! Order Aggregate: placement, pricing and the fulfilment workflow
//!
//! Status moves forward along
//! `placed -> confirmed -> packed -> shipped -> out_for_delivery -> delivered`
//! (steps may be skipped). Cancellation branches off before shipping.
//! `delivered` and `cancelled` are terminal.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use std::fmt;
use uuid::Uuid;
use validator::Validate;

use crate::domain::events::{DomainEvent, EventLine, OrderEvent};
use crate::domain::value_objects::{Money, OrderNumber};
use crate::MarketError;

/// Orders above this items total ship free.
pub const FREE_SHIPPING_THRESHOLD: i64 = 2000;
pub const SHIPPING_FEE: i64 = 99;
/// GST percentage applied to the items total.
pub const GST_PERCENT: u32 = 18;
pub const DELIVERY_ESTIMATE_DAYS: i64 = 5;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Placed,
    Confirmed,
    Packed,
    Shipped,
    OutForDelivery,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        Self::Placed, Self::Confirmed, Self::Packed, Self::Shipped, Self::OutForDelivery, Self::Delivered, Self::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Placed => "placed",
            Self::Confirmed => "confirmed",
            Self::Packed => "packed",
            Self::Shipped => "shipped",
            Self::OutForDelivery => "out_for_delivery",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    /// Position on the fulfilment path; cancelled is off-path.
    fn step(&self) -> Option<u8> {
        match self {
            Self::Placed => Some(0),
            Self::Confirmed => Some(1),
            Self::Packed => Some(2),
            Self::Shipped => Some(3),
            Self::OutForDelivery => Some(4),
            Self::Delivered => Some(5),
            Self::Cancelled => None,
        }
    }

    pub fn is_terminal(&self) -> bool { matches!(self, Self::Delivered | Self::Cancelled) }

    pub fn is_cancellable(&self) -> bool { matches!(self, Self::Placed | Self::Confirmed | Self::Packed) }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        if self.is_terminal() { return false; }
        match (self.step(), next.step()) {
            (_, None) => self.is_cancellable(),
            (Some(from), Some(to)) => to > from,
            (None, Some(_)) => false,
        }
    }

    /// Customer-facing line recorded in the tracking history.
    pub fn tracking_description(&self) -> &'static str {
        match self {
            Self::Placed => "Order has been placed successfully",
            Self::Confirmed => "Order has been confirmed by the dealer",
            Self::Packed => "Order has been packed and is ready for shipping",
            Self::Shipped => "Order has been shipped and is on the way",
            Self::OutForDelivery => "Order is out for delivery to your address",
            Self::Delivered => "Order has been delivered successfully",
            Self::Cancelled => "Order has been cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_method", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    Cod,
    Online,
}

impl PaymentMethod {
    pub fn label(&self) -> &'static str {
        match self { Self::Cod => "Cash on Delivery", Self::Online => "Online" }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product: Uuid,
    pub name: String,
    pub price: Decimal,
    pub quantity: u32,
    pub wholesaler: Uuid,
    #[serde(default)]
    pub image: String,
}

impl OrderItem {
    pub fn line_total(&self) -> Money { Money::inr(self.price).multiply(self.quantity) }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddress {
    #[validate(length(min = 1, max = 200, message = "street is required"))]
    pub street: String,
    #[validate(length(min = 1, max = 100, message = "city is required"))]
    pub city: String,
    #[validate(length(min = 1, max = 100, message = "state is required"))]
    pub state: String,
    #[validate(custom = "crate::api::validation::valid_pin_code")]
    pub pin_code: String,
    #[serde(default = "super::user::default_country")]
    pub country: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackingEntry {
    pub status: String,
    pub description: String,
    #[serde(default)]
    pub note: String,
    pub timestamp: DateTime<Utc>,
}

/// Charges derived from the items total.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pricing {
    pub items_total: Money,
    pub shipping_cost: Money,
    pub tax: Money,
    pub total_amount: Money,
}

impl Pricing {
    pub fn for_items_total(items_total: Money) -> Self {
        let shipping_cost = if items_total.amount() > Decimal::from(FREE_SHIPPING_THRESHOLD) {
            Money::zero()
        } else {
            Money::inr(Decimal::from(SHIPPING_FEE))
        };
        let tax = items_total.percent_rounded(GST_PERCENT);
        Self { items_total, shipping_cost, tax, total_amount: items_total.add(shipping_cost).add(tax) }
    }

    pub fn for_items(items: &[OrderItem]) -> Self {
        Self::for_items_total(items.iter().fold(Money::zero(), |acc, i| acc.add(i.line_total())))
    }
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub customer_id: Uuid,
    pub items: Json<Vec<OrderItem>>,
    pub wholesaler_ids: Vec<Uuid>,
    pub shipping_address: Json<ShippingAddress>,
    pub payment_method: PaymentMethod,
    pub items_total: Decimal,
    pub shipping_cost: Decimal,
    pub tax: Decimal,
    pub total_amount: Decimal,
    pub status: OrderStatus,
    pub tracking: Json<Vec<TrackingEntry>>,
    pub is_paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub estimated_delivery: Option<DateTime<Utc>>,
    pub tracking_number: Option<String>,
    pub razorpay_order_id: Option<String>,
    pub razorpay_payment_id: Option<String>,
    #[serde(skip_serializing)]
    pub razorpay_signature: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[sqlx(skip)]
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

impl Order {
    pub fn place(
        customer_id: Uuid,
        items: Vec<OrderItem>,
        shipping_address: ShippingAddress,
        payment_method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> Result<Self, MarketError> {
        if items.is_empty() { return Err(MarketError::EmptyCart); }
        let pricing = Pricing::for_items(&items);
        let mut wholesaler_ids: Vec<Uuid> = items.iter().map(|i| i.wholesaler).collect();
        wholesaler_ids.sort();
        wholesaler_ids.dedup();

        let mut order = Self {
            id: Uuid::now_v7(),
            order_number: OrderNumber::generate(now).into_inner(),
            customer_id,
            items: Json(items),
            wholesaler_ids,
            shipping_address: Json(shipping_address),
            payment_method,
            items_total: pricing.items_total.amount(),
            shipping_cost: pricing.shipping_cost.amount(),
            tax: pricing.tax.amount(),
            total_amount: pricing.total_amount.amount(),
            status: OrderStatus::Placed,
            tracking: Json(vec![TrackingEntry {
                status: OrderStatus::Placed.as_str().to_string(),
                description: OrderStatus::Placed.tracking_description().to_string(),
                note: "Order placed by customer".to_string(),
                timestamp: now,
            }]),
            is_paid: false,
            paid_at: None,
            delivered_at: None,
            estimated_delivery: Some(now + Duration::days(DELIVERY_ESTIMATE_DAYS)),
            tracking_number: None,
            razorpay_order_id: None,
            razorpay_payment_id: None,
            razorpay_signature: None,
            created_at: now,
            updated_at: now,
            events: vec![],
        };
        order.raise_event(DomainEvent::Order(OrderEvent::Placed {
            order_id: order.id,
            order_number: order.order_number.clone(),
            customer_id,
            lines: order.items.iter().map(|i| EventLine { name: i.name.clone(), quantity: i.quantity, line_total: i.line_total().amount() }).collect(),
            total_amount: order.total_amount,
            payment_method,
        }));
        Ok(order)
    }

    pub fn total(&self) -> Money { Money::inr(self.total_amount) }

    pub fn involves_wholesaler(&self, wholesaler_id: Uuid) -> bool {
        self.items.iter().any(|i| i.wholesaler == wholesaler_id)
    }

    /// Moves the order along the workflow and records a tracking entry.
    pub fn apply_status(
        &mut self,
        next: OrderStatus,
        note: Option<String>,
        tracking_number: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), MarketError> {
        if !self.status.can_transition_to(next) {
            if next == OrderStatus::Cancelled { return Err(MarketError::NotCancellable(self.status)); }
            return Err(MarketError::InvalidTransition { from: self.status, to: next });
        }
        self.status = next;
        self.tracking.push(TrackingEntry {
            status: next.as_str().to_string(),
            description: next.tracking_description().to_string(),
            note: note.unwrap_or_default(),
            timestamp: now,
        });
        if let Some(number) = tracking_number.filter(|t| !t.trim().is_empty()) {
            self.tracking_number = Some(number.trim().to_string());
        }
        if next == OrderStatus::Delivered {
            self.delivered_at = Some(now);
            // cash is collected on delivery
            if self.payment_method == PaymentMethod::Cod && !self.is_paid {
                self.is_paid = true;
                self.paid_at = Some(now);
            }
        }
        self.updated_at = now;
        self.raise_event(DomainEvent::Order(OrderEvent::StatusChanged {
            order_id: self.id,
            order_number: self.order_number.clone(),
            customer_id: self.customer_id,
            status: next,
            tracking_number: self.tracking_number.clone(),
        }));
        Ok(())
    }

    pub fn cancel(&mut self, note: impl Into<String>, now: DateTime<Utc>) -> Result<(), MarketError> {
        self.apply_status(OrderStatus::Cancelled, Some(note.into()), None, now)
    }

    /// Guards creating a gateway order for this order.
    pub fn ensure_payable(&self) -> Result<(), MarketError> {
        if self.is_paid { return Err(MarketError::AlreadyPaid); }
        if self.status == OrderStatus::Cancelled { return Err(MarketError::OrderCancelled); }
        Ok(())
    }

    pub fn attach_gateway_order(&mut self, gateway_order_id: String, now: DateTime<Utc>) -> Result<(), MarketError> {
        self.ensure_payable()?;
        self.razorpay_order_id = Some(gateway_order_id);
        self.updated_at = now;
        Ok(())
    }

    /// Records a verified gateway payment.
    pub fn mark_paid(
        &mut self,
        gateway_order_id: &str,
        payment_id: String,
        signature: String,
        now: DateTime<Utc>,
    ) -> Result<(), MarketError> {
        self.ensure_payable()?;
        if self.razorpay_order_id.as_deref() != Some(gateway_order_id) { return Err(MarketError::PaymentMismatch); }
        self.is_paid = true;
        self.paid_at = Some(now);
        self.tracking.push(TrackingEntry {
            status: "paid".to_string(),
            description: "Payment received".to_string(),
            note: format!("Payment received via {} (Razorpay)", self.payment_method.label().to_uppercase()),
            timestamp: now,
        });
        self.raise_event(DomainEvent::Order(OrderEvent::Paid {
            order_id: self.id,
            order_number: self.order_number.clone(),
            payment_id: payment_id.clone(),
        }));
        self.razorpay_payment_id = Some(payment_id);
        self.razorpay_signature = Some(signature);
        self.updated_at = now;
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
}

#[cfg(test)]
pub(crate) fn sample_address() -> ShippingAddress {
    ShippingAddress {
        street: "42, MG Road".into(), city: "Bengaluru".into(), state: "Karnataka".into(),
        pin_code: "560001".into(), country: "India".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(price: i64, quantity: u32, wholesaler: Uuid) -> OrderItem {
        OrderItem { product: Uuid::now_v7(), name: "Clutch Plate".into(), price: Decimal::from(price), quantity, wholesaler, image: String::new() }
    }

    fn placed(price: i64, qty: u32) -> Order {
        Order::place(Uuid::now_v7(), vec![item(price, qty, Uuid::now_v7())], sample_address(), PaymentMethod::Cod, Utc::now()).unwrap()
    }

    #[test]
    fn test_pricing_small_order_pays_shipping() {
        let p = Pricing::for_items_total(Money::inr(Decimal::from(500)));
        assert_eq!(p.shipping_cost.amount(), Decimal::from(99));
        assert_eq!(p.tax.amount(), Decimal::from(90));
        assert_eq!(p.total_amount.amount(), Decimal::from(689));
    }

    #[test]
    fn test_pricing_free_shipping_above_threshold() {
        assert_eq!(Pricing::for_items_total(Money::inr(Decimal::from(2000))).shipping_cost.amount(), Decimal::from(99));
        let p = Pricing::for_items_total(Money::inr(Decimal::from(2001)));
        assert_eq!(p.shipping_cost, Money::zero());
        assert_eq!(p.tax.amount(), Decimal::from(360)); // 360.18
        assert_eq!(p.total_amount.amount(), Decimal::from(2361));
    }

    #[test]
    fn test_place_computes_totals_and_tracking() {
        let dealer = Uuid::now_v7();
        let mut order = Order::place(
            Uuid::now_v7(),
            vec![item(450, 2, dealer), item(1200, 1, dealer)],
            sample_address(),
            PaymentMethod::Cod,
            Utc::now(),
        ).unwrap();
        assert_eq!(order.items_total, Decimal::from(2100));
        assert_eq!(order.shipping_cost, Decimal::ZERO);
        assert_eq!(order.tax, Decimal::from(378));
        assert_eq!(order.total_amount, Decimal::from(2478));
        assert_eq!(order.status, OrderStatus::Placed);
        assert_eq!(order.tracking.len(), 1);
        assert_eq!(order.wholesaler_ids, vec![dealer]);
        assert!(order.order_number.starts_with("SPH-"));
        assert!(order.estimated_delivery.unwrap() > order.created_at);
        assert_eq!(order.take_events().len(), 1);
        assert!(order.take_events().is_empty());
    }

    #[test]
    fn test_place_rejects_empty() {
        let r = Order::place(Uuid::now_v7(), vec![], sample_address(), PaymentMethod::Cod, Utc::now());
        assert_eq!(r.unwrap_err(), MarketError::EmptyCart);
    }

    #[test]
    fn test_forward_transitions() {
        use OrderStatus::*;
        assert!(Placed.can_transition_to(Confirmed));
        assert!(Placed.can_transition_to(Shipped));
        assert!(Shipped.can_transition_to(OutForDelivery));
        assert!(!Shipped.can_transition_to(Packed));
        assert!(!Confirmed.can_transition_to(Confirmed));
        assert!(!Confirmed.can_transition_to(Placed));
        assert!(!Delivered.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Confirmed));
    }

    #[test]
    fn test_cancellation_branch() {
        use OrderStatus::*;
        assert!(Placed.can_transition_to(Cancelled));
        assert!(Packed.can_transition_to(Cancelled));
        assert!(!Shipped.can_transition_to(Cancelled));
        assert!(!OutForDelivery.can_transition_to(Cancelled));
    }

    #[test]
    fn test_apply_status_records_history() {
        let mut order = placed(300, 1);
        order.take_events();
        order.apply_status(OrderStatus::Shipped, Some("via BlueDart".into()), Some(" BD123 ".into()), Utc::now()).unwrap();
        assert_eq!(order.status, OrderStatus::Shipped);
        assert_eq!(order.tracking_number.as_deref(), Some("BD123"));
        let last = order.tracking.last().unwrap();
        assert_eq!(last.status, "shipped");
        assert_eq!(last.description, "Order has been shipped and is on the way");
        assert_eq!(last.note, "via BlueDart");
        assert_eq!(order.take_events().len(), 1);
    }

    #[test]
    fn test_delivery_marks_cod_paid() {
        let mut order = placed(300, 1);
        order.apply_status(OrderStatus::Delivered, None, None, Utc::now()).unwrap();
        assert!(order.is_paid);
        assert!(order.paid_at.is_some());
        assert!(order.delivered_at.is_some());
        assert_eq!(
            order.apply_status(OrderStatus::Cancelled, None, None, Utc::now()),
            Err(MarketError::NotCancellable(OrderStatus::Delivered))
        );
    }

    #[test]
    fn test_delivery_leaves_online_order_unpaid() {
        let mut order = Order::place(
            Uuid::now_v7(),
            vec![item(300, 1, Uuid::now_v7())],
            sample_address(),
            PaymentMethod::Online,
            Utc::now(),
        )
        .unwrap();
        order.apply_status(OrderStatus::Delivered, None, None, Utc::now()).unwrap();
        assert!(order.delivered_at.is_some());
        assert!(!order.is_paid);
        assert!(order.paid_at.is_none());
    }

    #[test]
    fn test_invalid_transition_error() {
        let mut order = placed(300, 1);
        order.apply_status(OrderStatus::Packed, None, None, Utc::now()).unwrap();
        assert_eq!(
            order.apply_status(OrderStatus::Confirmed, None, None, Utc::now()),
            Err(MarketError::InvalidTransition { from: OrderStatus::Packed, to: OrderStatus::Confirmed })
        );
    }

    #[test]
    fn test_gateway_payment_flow() {
        let mut order = placed(300, 1);
        assert_eq!(order.mark_paid("order_X", "pay_1".into(), "sig".into(), Utc::now()), Err(MarketError::PaymentMismatch));
        order.attach_gateway_order("order_X".into(), Utc::now()).unwrap();
        order.mark_paid("order_X", "pay_1".into(), "sig".into(), Utc::now()).unwrap();
        assert!(order.is_paid);
        assert_eq!(order.tracking.last().unwrap().status, "paid");
        assert_eq!(order.razorpay_payment_id.as_deref(), Some("pay_1"));
        assert_eq!(order.attach_gateway_order("order_Y".into(), Utc::now()), Err(MarketError::AlreadyPaid));
    }

    #[test]
    fn test_cancelled_order_not_payable() {
        let mut order = placed(300, 1);
        order.cancel("changed my mind", Utc::now()).unwrap();
        assert_eq!(order.ensure_payable(), Err(MarketError::OrderCancelled));
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(serde_json::to_value(OrderStatus::OutForDelivery).unwrap(), "out_for_delivery");
        let s: OrderStatus = serde_json::from_str("\"packed\"").unwrap();
        assert_eq!(s, OrderStatus::Packed);
    }
}
