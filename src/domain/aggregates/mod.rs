//! Aggregates module
pub mod cart;
pub mod category;
pub mod chat;
pub mod complaint;
pub mod order;
pub mod product;
pub mod user;

pub use cart::{Cart, CartLine};
pub use category::{Category, CategoryVehicleType};
pub use chat::{ChatMessage, ChatRole, ChatSession};
pub use complaint::{Complaint, ComplaintResponse, ComplaintStatus, ComplaintType, NewComplaint, Priority};
pub use order::{Order, OrderItem, OrderStatus, PaymentMethod, Pricing, ShippingAddress, TrackingEntry};
pub use product::{CategoryRef, DealerRef, Product, ProductListing, VehicleType};
pub use user::{Address, LoginBlock, Role, User};
