//! Product Aggregate: spare parts listed by wholesalers

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

use crate::domain::value_objects::{Money, Quantity};
use crate::MarketError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "vehicle_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum VehicleType { Bike, Car, Tractor }

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub price: Decimal,
    pub compare_price: Option<Decimal>,
    pub category_id: Uuid,
    pub wholesaler_id: Uuid,
    pub brand: String,
    pub vehicle_type: VehicleType,
    pub vehicle_make: Option<String>,
    pub vehicle_model: Option<String>,
    pub part_number: Option<String>,
    pub images: Vec<String>,
    pub stock: i32,
    pub is_active: bool,
    pub rating: Decimal,
    pub num_reviews: i32,
    pub tags: Vec<String>,
    pub dealer_state: Option<String>,
    pub dealer_city: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Category fields embedded in product responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CategoryRef { pub id: Uuid, pub name: String, pub slug: String }

/// Dealer fields embedded in product responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealerRef {
    pub id: Uuid,
    pub name: String,
    pub business_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whatsapp_number: Option<String>,
}

/// A product joined with its category and dealer.
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct ProductListing {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub product: Product,
    pub category: Json<CategoryRef>,
    pub wholesaler: Json<DealerRef>,
}

impl Product {
    pub fn unit_price(&self) -> Money { Money::inr(self.price) }
    pub fn is_in_stock(&self) -> bool { self.stock > 0 }
    pub fn primary_image(&self) -> String { self.images.first().cloned().unwrap_or_default() }

    /// Checks that `qty` units can be sold right now.
    pub fn check_orderable(&self, qty: Quantity) -> Result<(), MarketError> {
        if !self.is_active { return Err(MarketError::ProductUnavailable(self.name.clone())); }
        if !qty.fits_within(self.stock) {
            return Err(MarketError::InsufficientStock { name: self.name.clone(), available: self.stock });
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn sample_product(price: i64, stock: i32) -> Product {
    let now = Utc::now();
    Product {
        id: Uuid::now_v7(), name: "Brake Pad Set".into(), slug: "brake-pad-set-abc".into(),
        description: "Ceramic front brake pads".into(), price: Decimal::from(price), compare_price: None,
        category_id: Uuid::now_v7(), wholesaler_id: Uuid::now_v7(), brand: "Bosch".into(),
        vehicle_type: VehicleType::Bike, vehicle_make: Some("Honda".into()), vehicle_model: None, part_number: None,
        images: vec!["/uploads/pad.jpg".into()], stock, is_active: true, rating: Decimal::ZERO, num_reviews: 0,
        tags: vec![], dealer_state: Some("Punjab".into()), dealer_city: Some("Ludhiana".into()),
        created_at: now, updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_orderable() {
        let mut p = sample_product(450, 3);
        assert!(p.check_orderable(Quantity::new(3).unwrap()).is_ok());
        assert_eq!(
            p.check_orderable(Quantity::new(4).unwrap()),
            Err(MarketError::InsufficientStock { name: "Brake Pad Set".into(), available: 3 })
        );
        p.is_active = false;
        assert_eq!(p.check_orderable(Quantity::new(1).unwrap()), Err(MarketError::ProductUnavailable("Brake Pad Set".into())));
    }

    #[test]
    fn test_primary_image() {
        let mut p = sample_product(10, 1);
        assert_eq!(p.primary_image(), "/uploads/pad.jpg");
        p.images.clear();
        assert_eq!(p.primary_image(), "");
    }

    #[test]
    fn test_insufficient_stock_message() {
        let err = sample_product(10, 2).check_orderable(Quantity::new(5).unwrap()).unwrap_err();
        assert_eq!(err.to_string(), "Insufficient stock for Brake Pad Set. Available: 2");
    }
}
