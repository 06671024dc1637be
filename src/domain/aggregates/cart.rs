//! Cart Aggregate: one server-side cart per customer

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use super::order::{OrderItem, Pricing};
use crate::domain::value_objects::{Money, Quantity};
use crate::MarketError;

/// A cart row joined with the product's current state.
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub image: String,
    pub stock: i32,
    pub is_active: bool,
    pub wholesaler_id: Uuid,
    pub quantity: i32,
}

impl CartLine {
    pub fn line_total(&self) -> Money { Money::inr(self.price).multiply(self.quantity.max(0) as u32) }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    pub items: Vec<CartLine>,
    pub item_count: u32,
    pub pricing: Pricing,
}

impl Cart {
    pub fn new(items: Vec<CartLine>) -> Self {
        let item_count = items.iter().map(|l| l.quantity.max(0) as u32).sum();
        let total = items.iter().fold(Money::zero(), |acc, l| acc.add(l.line_total()));
        Self { items, item_count, pricing: Pricing::for_items_total(total) }
    }

    pub fn is_empty(&self) -> bool { self.items.is_empty() }

    /// Snapshot of the lines as order items; fails for an empty cart.
    pub fn to_order_items(&self) -> Result<Vec<(OrderItem, Quantity)>, MarketError> {
        if self.is_empty() { return Err(MarketError::EmptyCart); }
        self.items.iter().map(|l| {
            let qty = Quantity::new(l.quantity).ok_or(MarketError::InvalidQuantity)?;
            Ok((OrderItem {
                product: l.product_id,
                name: l.name.clone(),
                price: l.price,
                quantity: qty.value(),
                wholesaler: l.wholesaler_id,
                image: l.image.clone(),
            }, qty))
        }).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(price: i64, quantity: i32) -> CartLine {
        CartLine {
            product_id: Uuid::now_v7(), name: "Air Filter".into(), price: Decimal::from(price), image: String::new(),
            stock: 10, is_active: true, wholesaler_id: Uuid::now_v7(), quantity,
        }
    }

    #[test]
    fn test_cart_totals() {
        let cart = Cart::new(vec![line(250, 2), line(120, 1)]);
        assert_eq!(cart.item_count, 3);
        assert_eq!(cart.pricing.items_total.amount(), Decimal::from(620));
        assert_eq!(cart.pricing.shipping_cost.amount(), Decimal::from(99));
    }

    #[test]
    fn test_empty_cart_has_no_order_items() {
        assert_eq!(Cart::new(vec![]).to_order_items().unwrap_err(), MarketError::EmptyCart);
        let items = Cart::new(vec![line(250, 2)]).to_order_items().unwrap();
        assert_eq!(items[0].0.quantity, 2);
    }
}
