//! SparePartsHub Marketplace
//!
//! Multi-vendor marketplace for bike, car and tractor spare parts.
//!
//! ## Features
//! - Customer / wholesaler / admin accounts with JWT access + refresh tokens
//! - Product catalog with full-text search and dealer location filters
//! - Server-side shopping cart and checkout (COD or Razorpay)
//! - Order status workflow with tracking history
//! - Complaints with responses from dealers and admins
//! - Admin analytics dashboard
//! - Rule-based support chatbot

pub mod api;
pub mod auth;
pub mod chat;
pub mod config;
pub mod domain;
pub mod error;
pub mod notify;
pub mod payment;
pub mod seed;

use domain::aggregates::OrderStatus;
use domain::value_objects::SlugError;
use thiserror::Error;
use uuid::Uuid;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarketError {
    #[error("Product {0} not found.")]
    ProductNotFound(Uuid),

    #[error("{0} is no longer available.")]
    ProductUnavailable(String),

    #[error("Insufficient stock for {name}. Available: {available}")]
    InsufficientStock { name: String, available: i32 },

    #[error("Quantity must be at least 1.")]
    InvalidQuantity,

    #[error("Your cart is empty.")]
    EmptyCart,

    #[error("Item is not in the cart.")]
    CartItemNotFound,

    #[error("Cannot move order from {from} to {to}.")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Order can no longer be cancelled (status: {0}).")]
    NotCancellable(OrderStatus),

    #[error("Order is already paid")]
    AlreadyPaid,

    #[error("Order has been cancelled")]
    OrderCancelled,

    #[error("Payment does not belong to this order")]
    PaymentMismatch,

    #[error(transparent)]
    Slug(#[from] SlugError),
}

pub type Result<T> = std::result::Result<T, MarketError>;
