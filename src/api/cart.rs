//! Server-side cart for customers, and checkout from it.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;
use validator::Validate;

use super::extract::{AuthUser, Path, ValidatedJson};
use super::orders::place_order;
use super::AppState;
use crate::domain::aggregates::{Cart, CartLine, Order, PaymentMethod, Product, Role, ShippingAddress};
use crate::domain::value_objects::Quantity;
use crate::error::ApiResult;
use crate::MarketError;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(show).delete(clear))
        .route("/items", post(add_item))
        .route("/items/:product_id", put(set_quantity).delete(remove_item))
        .route("/checkout", post(checkout))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddItemRequest {
    pub product_id: Uuid,
    #[serde(default = "one")]
    #[validate(range(min = 1, max = 1000, message = "quantity must be 1-1000"))]
    pub quantity: i32,
}

fn one() -> i32 { 1 }

#[derive(Debug, Deserialize, Validate)]
pub struct SetQuantityRequest {
    #[validate(range(min = 0, max = 1000, message = "quantity must be 0-1000"))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[validate]
    pub shipping_address: ShippingAddress,
    #[serde(default)]
    pub payment_method: PaymentMethod,
}

const CART_SELECT: &str = "SELECT ci.product_id, p.name, p.price, COALESCE(p.images[1], '') AS image, p.stock, p.is_active, \
     p.wholesaler_id, ci.quantity \
     FROM cart_items ci JOIN products p ON p.id = ci.product_id \
     WHERE ci.user_id = $1 ORDER BY ci.created_at, ci.id";

async fn load_cart(db: &PgPool, user_id: Uuid) -> ApiResult<Cart> {
    let lines = sqlx::query_as::<_, CartLine>(CART_SELECT).bind(user_id).fetch_all(db).await?;
    Ok(Cart::new(lines))
}

async fn fetch_product(db: &PgPool, id: Uuid) -> ApiResult<Product> {
    sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| MarketError::ProductNotFound(id).into())
}

async fn show(State(state): State<AppState>, auth: AuthUser) -> ApiResult<Json<Value>> {
    let user = auth.require(&[Role::Customer])?;
    let cart = load_cart(&state.db, user.id).await?;
    Ok(Json(json!({ "cart": cart })))
}

/// Adds `add` units to the customer's line in one statement.
/// Returns the stored quantity, or `None` when the merged line would exceed stock.
async fn merge_line(db: &PgPool, user_id: Uuid, product_id: Uuid, add: Quantity) -> ApiResult<Option<i32>> {
    let add = i32::try_from(add.value()).map_err(|_| MarketError::InvalidQuantity)?;
    let stored: Option<i32> = sqlx::query_scalar(
        "INSERT INTO cart_items (id, user_id, product_id, quantity) VALUES ($1, $2, $3, $4) \
         ON CONFLICT (user_id, product_id) DO UPDATE SET quantity = cart_items.quantity + EXCLUDED.quantity, updated_at = NOW() \
         WHERE cart_items.quantity + EXCLUDED.quantity <= (SELECT stock FROM products WHERE id = EXCLUDED.product_id) \
         RETURNING quantity",
    )
    .bind(Uuid::now_v7())
    .bind(user_id)
    .bind(product_id)
    .bind(add)
    .fetch_optional(db)
    .await?;
    Ok(stored)
}

async fn add_item(
    State(state): State<AppState>,
    auth: AuthUser,
    ValidatedJson(req): ValidatedJson<AddItemRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let user = auth.require(&[Role::Customer])?;
    let add = Quantity::new(req.quantity).ok_or(MarketError::InvalidQuantity)?;
    let product = fetch_product(&state.db, req.product_id).await?;
    product.check_orderable(add)?;

    if merge_line(&state.db, user.id, product.id, add).await?.is_none() {
        return Err(MarketError::InsufficientStock { name: product.name, available: product.stock }.into());
    }

    let cart = load_cart(&state.db, user.id).await?;
    Ok((StatusCode::CREATED, Json(json!({ "message": "Item added to cart.", "cart": cart }))))
}

async fn set_quantity(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(product_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<SetQuantityRequest>,
) -> ApiResult<Json<Value>> {
    let user = auth.require(&[Role::Customer])?;

    match Quantity::new(req.quantity) {
        None => delete_line(&state.db, user.id, product_id).await?,
        Some(qty) => {
            let product = fetch_product(&state.db, product_id).await?;
            product.check_orderable(qty)?;
            let updated = sqlx::query("UPDATE cart_items SET quantity = $3, updated_at = NOW() WHERE user_id = $1 AND product_id = $2")
                .bind(user.id)
                .bind(product_id)
                .bind(req.quantity)
                .execute(&state.db)
                .await?;
            if updated.rows_affected() == 0 {
                return Err(MarketError::CartItemNotFound.into());
            }
        }
    }

    let cart = load_cart(&state.db, user.id).await?;
    Ok(Json(json!({ "message": "Cart updated.", "cart": cart })))
}

async fn delete_line(db: &PgPool, user_id: Uuid, product_id: Uuid) -> ApiResult<()> {
    let deleted = sqlx::query("DELETE FROM cart_items WHERE user_id = $1 AND product_id = $2")
        .bind(user_id)
        .bind(product_id)
        .execute(db)
        .await?;
    if deleted.rows_affected() == 0 {
        return Err(MarketError::CartItemNotFound.into());
    }
    Ok(())
}

async fn remove_item(State(state): State<AppState>, auth: AuthUser, Path(product_id): Path<Uuid>) -> ApiResult<Json<Value>> {
    let user = auth.require(&[Role::Customer])?;
    delete_line(&state.db, user.id, product_id).await?;
    let cart = load_cart(&state.db, user.id).await?;
    Ok(Json(json!({ "message": "Item removed from cart.", "cart": cart })))
}

async fn clear(State(state): State<AppState>, auth: AuthUser) -> ApiResult<Json<Value>> {
    let user = auth.require(&[Role::Customer])?;
    sqlx::query("DELETE FROM cart_items WHERE user_id = $1").bind(user.id).execute(&state.db).await?;
    Ok(Json(json!({ "message": "Cart cleared." })))
}

/// Orders the customer's cart inside `tx` and removes exactly the lines it ordered.
pub async fn checkout_cart(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    address: ShippingAddress,
    method: PaymentMethod,
) -> ApiResult<Order> {
    let locked = sqlx::query_as::<_, CartLine>(&format!("{CART_SELECT} FOR UPDATE OF ci"))
        .bind(user_id)
        .fetch_all(&mut **tx)
        .await?;
    let lines: Vec<(Uuid, Quantity)> = Cart::new(locked)
        .to_order_items()?
        .into_iter()
        .map(|(item, qty)| (item.product, qty))
        .collect();

    let order = place_order(tx, user_id, &lines, address, method).await?;
    let ordered: Vec<Uuid> = lines.iter().map(|(id, _)| *id).collect();
    sqlx::query("DELETE FROM cart_items WHERE user_id = $1 AND product_id = ANY($2)")
        .bind(user_id)
        .bind(&ordered)
        .execute(&mut **tx)
        .await?;
    Ok(order)
}

async fn checkout(
    State(state): State<AppState>,
    auth: AuthUser,
    ValidatedJson(req): ValidatedJson<CheckoutRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let user = auth.require(&[Role::Customer])?;

    let mut tx = state.db.begin().await?;
    let mut order = checkout_cart(&mut tx, user.id, req.shipping_address, req.payment_method).await?;
    tx.commit().await?;

    state.publish(order.take_events(), Some(user.id)).await;
    Ok((StatusCode::CREATED, Json(json!({ "message": "Order placed successfully!", "order": order }))))
}
