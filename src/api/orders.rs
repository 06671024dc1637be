//! Order placement, listings and the fulfilment workflow.

use std::collections::BTreeMap;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;
use validator::Validate;

use super::extract::{AuthUser, Path, Query, ValidatedJson};
use super::{AppState, Page, PageParams};
use crate::domain::aggregates::{Order, OrderItem, OrderStatus, PaymentMethod, Product, Role, ShippingAddress, User};
use crate::domain::value_objects::Quantity;
use crate::error::{ApiError, ApiResult};
use crate::MarketError;

pub const DEFAULT_LIMIT: i64 = 10;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create))
        .route("/my", get(my_orders))
        .route("/wholesaler/my", get(wholesaler_orders))
        .route("/all", get(all_orders))
        .route("/:id", get(show))
        .route("/:id/tracking", get(tracking))
        .route("/:id/status", put(update_status))
        .route("/:id/cancel", post(cancel))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderLineRequest {
    #[serde(alias = "productId")]
    pub product: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    #[validate(length(min = 1, message = "Order must have at least one item"))]
    pub items: Vec<OrderLineRequest>,
    #[validate]
    pub shipping_address: ShippingAddress,
    #[serde(default)]
    pub payment_method: PaymentMethod,
}

impl PlaceOrderRequest {
    pub fn lines(&self) -> Result<Vec<(Uuid, Quantity)>, MarketError> {
        self.items
            .iter()
            .map(|l| Quantity::new(l.quantity).map(|q| (l.product, q)).ok_or(MarketError::InvalidQuantity))
            .collect()
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StatusRequest {
    pub status: OrderStatus,
    #[validate(length(max = 500))]
    pub note: Option<String>,
    #[validate(length(max = 100))]
    pub tracking_number: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OrderFilter {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<OrderStatus>,
}

impl OrderFilter {
    fn page(&self) -> Page { Page::new(&PageParams { page: self.page, limit: self.limit }, DEFAULT_LIMIT) }
}

/// Sums repeated products and orders the lines by id so row locks are taken in a stable order.
pub fn merge_lines(lines: &[(Uuid, Quantity)]) -> Vec<(Uuid, Quantity)> {
    let mut merged: BTreeMap<Uuid, Quantity> = BTreeMap::new();
    for (id, qty) in lines {
        merged.entry(*id).and_modify(|q| *q = q.add(*qty)).or_insert(*qty);
    }
    merged.into_iter().collect()
}

/// Locks the products, checks and deducts stock and inserts the order.
/// Events stay on the returned order until the caller has committed.
pub async fn place_order(
    tx: &mut Transaction<'_, Postgres>,
    customer_id: Uuid,
    lines: &[(Uuid, Quantity)],
    shipping_address: ShippingAddress,
    payment_method: PaymentMethod,
) -> ApiResult<Order> {
    let mut items = Vec::with_capacity(lines.len());
    for (product_id, qty) in merge_lines(lines) {
        let product = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1 FOR UPDATE")
            .bind(product_id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(MarketError::ProductNotFound(product_id))?;
        product.check_orderable(qty)?;
        let deduct = i32::try_from(qty.value()).map_err(|_| MarketError::InvalidQuantity)?;
        sqlx::query("UPDATE products SET stock = stock - $2, updated_at = NOW() WHERE id = $1")
            .bind(product_id)
            .bind(deduct)
            .execute(&mut **tx)
            .await?;
        items.push(OrderItem {
            product: product.id,
            name: product.name.clone(),
            price: product.price,
            quantity: qty.value(),
            wholesaler: product.wholesaler_id,
            image: product.primary_image(),
        });
    }

    let order = Order::place(customer_id, items, shipping_address, payment_method, Utc::now())?;
    sqlx::query(
        "INSERT INTO orders (id, order_number, customer_id, items, wholesaler_ids, shipping_address, payment_method, \
         items_total, shipping_cost, tax, total_amount, status, tracking, estimated_delivery, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
    )
    .bind(order.id)
    .bind(&order.order_number)
    .bind(order.customer_id)
    .bind(&order.items)
    .bind(&order.wholesaler_ids)
    .bind(&order.shipping_address)
    .bind(order.payment_method)
    .bind(order.items_total)
    .bind(order.shipping_cost)
    .bind(order.tax)
    .bind(order.total_amount)
    .bind(order.status)
    .bind(&order.tracking)
    .bind(order.estimated_delivery)
    .bind(order.created_at)
    .bind(order.updated_at)
    .execute(&mut **tx)
    .await?;

    tracing::info!(order_id = %order.id, order_number = %order.order_number, total = %order.total_amount, "order placed");
    Ok(order)
}

/// Puts cancelled items back on the shelf. Deleted products are skipped.
pub async fn restock(tx: &mut Transaction<'_, Postgres>, items: &[OrderItem]) -> ApiResult<()> {
    for item in items {
        let qty = i32::try_from(item.quantity).map_err(|_| MarketError::InvalidQuantity)?;
        sqlx::query("UPDATE products SET stock = stock + $2, updated_at = NOW() WHERE id = $1")
            .bind(item.product)
            .bind(qty)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

/// Writes back the mutable workflow and payment columns.
pub async fn save_progress(tx: &mut Transaction<'_, Postgres>, order: &Order) -> ApiResult<()> {
    sqlx::query(
        "UPDATE orders SET status = $2, tracking = $3, tracking_number = $4, is_paid = $5, paid_at = $6, \
         delivered_at = $7, razorpay_order_id = $8, razorpay_payment_id = $9, razorpay_signature = $10, updated_at = $11 \
         WHERE id = $1",
    )
    .bind(order.id)
    .bind(order.status)
    .bind(&order.tracking)
    .bind(&order.tracking_number)
    .bind(order.is_paid)
    .bind(order.paid_at)
    .bind(order.delivered_at)
    .bind(&order.razorpay_order_id)
    .bind(&order.razorpay_payment_id)
    .bind(&order.razorpay_signature)
    .bind(order.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn lock_order(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> ApiResult<Order> {
    sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| ApiError::not_found("Order"))
}

async fn fetch_order(db: &PgPool, id: Uuid) -> ApiResult<Order> {
    sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Order"))
}

/// The buyer, a dealer with items in it, or an admin.
pub fn can_view(order: &Order, user: &User) -> bool {
    match user.role {
        Role::Admin => true,
        Role::Wholesaler => order.involves_wholesaler(user.id),
        Role::Customer => order.customer_id == user.id,
    }
}

/// Admins move any order; dealers only orders containing their items.
pub fn can_update_status(order: &Order, user: &User) -> bool {
    match user.role {
        Role::Admin => true,
        Role::Wholesaler => order.involves_wholesaler(user.id),
        Role::Customer => false,
    }
}

async fn create(
    State(state): State<AppState>,
    auth: AuthUser,
    ValidatedJson(req): ValidatedJson<PlaceOrderRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let user = auth.require(&[Role::Customer])?;
    let lines = req.lines()?;

    let mut tx = state.db.begin().await?;
    let mut order = place_order(&mut tx, user.id, &lines, req.shipping_address, req.payment_method).await?;
    tx.commit().await?;

    state.publish(order.take_events(), Some(user.id)).await;
    Ok((StatusCode::CREATED, Json(json!({ "message": "Order placed successfully!", "order": order }))))
}

/// `SELECT` over orders matching `scope` plus the optional status filter.
async fn list_where(db: &PgPool, scope: &str, owner: Option<Uuid>, filter: &OrderFilter) -> ApiResult<Json<Value>> {
    let page = filter.page();
    let orders = sqlx::query_as::<_, Order>(&format!(
        "SELECT * FROM orders WHERE {scope} AND ($2::order_status IS NULL OR status = $2) \
         ORDER BY created_at DESC, id DESC LIMIT $3 OFFSET $4"
    ))
    .bind(owner)
    .bind(filter.status)
    .bind(page.limit)
    .bind(page.offset())
    .fetch_all(db)
    .await?;
    let total: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM orders WHERE {scope} AND ($2::order_status IS NULL OR status = $2)"
    ))
    .bind(owner)
    .bind(filter.status)
    .fetch_one(db)
    .await?;
    Ok(page.wrap("orders", orders, total))
}

async fn my_orders(State(state): State<AppState>, auth: AuthUser, Query(filter): Query<OrderFilter>) -> ApiResult<Json<Value>> {
    let user = auth.require(&[Role::Customer])?;
    list_where(&state.db, "customer_id = $1", Some(user.id), &filter).await
}

async fn wholesaler_orders(State(state): State<AppState>, auth: AuthUser, Query(filter): Query<OrderFilter>) -> ApiResult<Json<Value>> {
    let user = auth.require(&[Role::Wholesaler])?;
    list_where(&state.db, "$1 = ANY(wholesaler_ids)", Some(user.id), &filter).await
}

async fn all_orders(State(state): State<AppState>, auth: AuthUser, Query(filter): Query<OrderFilter>) -> ApiResult<Json<Value>> {
    auth.require(&[Role::Admin])?;
    list_where(&state.db, "($1::uuid IS NULL OR customer_id = $1)", None, &filter).await
}

async fn show(State(state): State<AppState>, AuthUser(user): AuthUser, Path(id): Path<Uuid>) -> ApiResult<Json<Value>> {
    let order = fetch_order(&state.db, id).await?;
    if !can_view(&order, &user) {
        return Err(ApiError::not_authorized());
    }
    Ok(Json(json!({ "order": order })))
}

async fn tracking(State(state): State<AppState>, AuthUser(user): AuthUser, Path(id): Path<Uuid>) -> ApiResult<Json<Value>> {
    let order = fetch_order(&state.db, id).await?;
    if !can_view(&order, &user) {
        return Err(ApiError::not_authorized());
    }
    Ok(Json(json!({
        "orderNumber": order.order_number,
        "status": order.status,
        "tracking": order.tracking,
        "estimatedDelivery": order.estimated_delivery,
        "trackingNumber": order.tracking_number,
    })))
}

/// Applies a workflow move for `user` inside `tx`, restocking on cancellation.
pub async fn change_status(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    user: &User,
    req: StatusRequest,
) -> ApiResult<Order> {
    let mut order = lock_order(tx, id).await?;
    if !can_update_status(&order, user) {
        return Err(ApiError::not_authorized());
    }
    order.apply_status(req.status, req.note, req.tracking_number, Utc::now())?;
    if order.status == OrderStatus::Cancelled {
        restock(tx, &order.items).await?;
    }
    save_progress(tx, &order).await?;
    Ok(order)
}

/// The buyer's own cancellation; stock goes back on the shelf.
pub async fn cancel_for_customer(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    user: &User,
    reason: String,
) -> ApiResult<Order> {
    let mut order = lock_order(tx, id).await?;
    if order.customer_id != user.id {
        return Err(ApiError::not_authorized());
    }
    order.cancel(reason, Utc::now())?;
    restock(tx, &order.items).await?;
    save_progress(tx, &order).await?;
    Ok(order)
}

async fn update_status(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<StatusRequest>,
) -> ApiResult<Json<Value>> {
    let user = auth.require(&[Role::Admin, Role::Wholesaler])?;

    let mut tx = state.db.begin().await?;
    let mut order = change_status(&mut tx, id, &user, req).await?;
    tx.commit().await?;

    tracing::info!(order_id = %order.id, status = %order.status, by = %user.id, "order status updated");
    state.publish(order.take_events(), Some(order.customer_id)).await;
    Ok(Json(json!({ "message": format!("Order status updated to {}.", order.status), "order": order })))
}

async fn cancel(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    body: Option<Json<CancelRequest>>,
) -> ApiResult<Json<Value>> {
    let user = auth.require(&[Role::Customer])?;
    let reason = body
        .and_then(|Json(b)| b.reason)
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| "Cancelled by customer".to_string());

    let mut tx = state.db.begin().await?;
    let mut order = cancel_for_customer(&mut tx, id, &user, reason).await?;
    tx.commit().await?;

    tracing::info!(order_id = %order.id, "order cancelled by customer");
    state.publish(order.take_events(), Some(user.id)).await;
    Ok(Json(json!({ "message": "Order cancelled successfully.", "order": order })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::{insert_product, insert_user, stock_of};
    use crate::domain::aggregates::order::sample_address;
    use crate::domain::aggregates::user::sample_user;
    use rust_decimal::Decimal;

    fn order_for(customer: Uuid, wholesaler: Uuid) -> Order {
        let item = OrderItem {
            product: Uuid::now_v7(),
            name: "Clutch Cable".into(),
            price: Decimal::from(180),
            quantity: 2,
            wholesaler,
            image: String::new(),
        };
        Order::place(customer, vec![item], sample_address(), PaymentMethod::Cod, Utc::now()).unwrap()
    }

    #[test]
    fn test_merge_lines() {
        let a = Uuid::from_u128(2);
        let b = Uuid::from_u128(1);
        let q = |n| Quantity::new(n).unwrap();
        let merged = merge_lines(&[(a, q(1)), (b, q(2)), (a, q(3))]);
        assert_eq!(merged, vec![(b, q(2)), (a, q(4))]);
    }

    #[test]
    fn test_order_access() {
        let customer = sample_user(Role::Customer);
        let dealer = sample_user(Role::Wholesaler);
        let stranger = sample_user(Role::Wholesaler);
        let admin = sample_user(Role::Admin);
        let order = order_for(customer.id, dealer.id);

        assert!(can_view(&order, &customer));
        assert!(can_view(&order, &dealer));
        assert!(can_view(&order, &admin));
        assert!(!can_view(&order, &stranger));
        assert!(!can_view(&order, &sample_user(Role::Customer)));

        assert!(can_update_status(&order, &dealer));
        assert!(can_update_status(&order, &admin));
        assert!(!can_update_status(&order, &customer));
        assert!(!can_update_status(&order, &stranger));
    }

    #[test]
    fn test_place_request_rules() {
        let req: PlaceOrderRequest = serde_json::from_value(json!({
            "items": [],
            "shippingAddress": { "street": "1 Mall Rd", "city": "Shimla", "state": "HP", "pinCode": "17100" }
        }))
        .unwrap();
        let err = req.validate().unwrap_err();
        let fields: Vec<_> = err.errors().keys().copied().collect();
        assert!(fields.contains(&"items"));
        assert!(fields.contains(&"shipping_address"));
        assert_eq!(req.payment_method, PaymentMethod::Cod);
    }

    #[test]
    fn test_place_request_lines() {
        let id = Uuid::now_v7();
        let req: PlaceOrderRequest = serde_json::from_value(json!({
            "items": [{ "productId": id, "quantity": 3 }],
            "shippingAddress": { "street": "1 Mall Rd", "city": "Shimla", "state": "HP", "pinCode": "171001" },
            "paymentMethod": "online"
        }))
        .unwrap();
        assert!(req.validate().is_ok());
        assert_eq!(req.lines().unwrap(), vec![(id, Quantity::new(3).unwrap())]);
        assert_eq!(req.shipping_address.country, "India");

        let empty: PlaceOrderRequest = serde_json::from_value(json!({
            "items": [],
            "shippingAddress": { "street": "1 Mall Rd", "city": "Shimla", "state": "HP", "pinCode": "171001" }
        }))
        .unwrap();
        let err = empty.validate().unwrap_err();
        assert!(err.field_errors().contains_key("items"));
    }

    #[test]
    fn test_filter_status() {
        let filter: OrderFilter = serde_json::from_value(json!({ "status": "out_for_delivery" })).unwrap();
        assert_eq!(filter.status, Some(OrderStatus::OutForDelivery));
        assert_eq!(filter.page(), Page { page: 1, limit: DEFAULT_LIMIT });
    }

    fn qty(n: i32) -> Quantity { Quantity::new(n).unwrap() }

    async fn place(db: &PgPool, customer: Uuid, lines: &[(Uuid, Quantity)]) -> ApiResult<Order> {
        let mut tx = db.begin().await?;
        let order = place_order(&mut tx, customer, lines, sample_address(), PaymentMethod::Cod).await?;
        tx.commit().await?;
        Ok(order)
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL pointing at Postgres"]
    async fn test_place_order_deducts_stock(db: PgPool) {
        let dealer = insert_user(&db, Role::Wholesaler).await;
        let customer = insert_user(&db, Role::Customer).await;
        let pads = insert_product(&db, dealer.id, "Brake Pad Set", 5, &[]).await;

        let order = place(&db, customer.id, &[(pads, qty(2)), (pads, qty(1))]).await.unwrap();
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].quantity, 3);
        assert_eq!(stock_of(&db, pads).await, 2);

        let stored = fetch_order(&db, order.id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Placed);
        assert_eq!(stored.wholesaler_ids, vec![dealer.id]);
        assert_eq!(stored.tracking.len(), 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL pointing at Postgres"]
    async fn test_insufficient_stock_rolls_back(db: PgPool) {
        let dealer = insert_user(&db, Role::Wholesaler).await;
        let customer = insert_user(&db, Role::Customer).await;
        let filter = insert_product(&db, dealer.id, "Air Filter", 10, &[]).await;
        let pads = insert_product(&db, dealer.id, "Brake Pad Set", 1, &[]).await;

        let err = place(&db, customer.id, &[(filter, qty(4)), (pads, qty(2))]).await.unwrap_err();
        assert_eq!(err.to_string(), "Insufficient stock for Brake Pad Set. Available: 1");
        assert_eq!(stock_of(&db, filter).await, 10);
        let orders: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders").fetch_one(&db).await.unwrap();
        assert_eq!(orders, 0);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL pointing at Postgres"]
    async fn test_cancellations_restock(db: PgPool) {
        let dealer = insert_user(&db, Role::Wholesaler).await;
        let customer = insert_user(&db, Role::Customer).await;
        let admin = insert_user(&db, Role::Admin).await;
        let clutch = insert_product(&db, dealer.id, "Clutch Plate", 6, &[]).await;

        let first = place(&db, customer.id, &[(clutch, qty(2))]).await.unwrap();
        let second = place(&db, customer.id, &[(clutch, qty(3))]).await.unwrap();
        assert_eq!(stock_of(&db, clutch).await, 1);

        let mut tx = db.begin().await.unwrap();
        let cancelled = cancel_for_customer(&mut tx, first.id, &customer, "Ordered twice".into()).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(stock_of(&db, clutch).await, 3);

        let mut tx = db.begin().await.unwrap();
        let req = StatusRequest { status: OrderStatus::Cancelled, note: Some("Dealer out of stock".into()), tracking_number: None };
        change_status(&mut tx, second.id, &admin, req).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(stock_of(&db, clutch).await, 6);

        let mut tx = db.begin().await.unwrap();
        let err = cancel_for_customer(&mut tx, second.id, &customer, "again".into()).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
        tx.rollback().await.unwrap();
        assert_eq!(stock_of(&db, clutch).await, 6);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL pointing at Postgres"]
    async fn test_status_change_needs_involved_dealer(db: PgPool) {
        let dealer = insert_user(&db, Role::Wholesaler).await;
        let other_dealer = insert_user(&db, Role::Wholesaler).await;
        let customer = insert_user(&db, Role::Customer).await;
        let horn = insert_product(&db, dealer.id, "Electric Horn", 4, &[]).await;
        let order = place(&db, customer.id, &[(horn, qty(1))]).await.unwrap();

        let confirm = || StatusRequest { status: OrderStatus::Confirmed, note: None, tracking_number: None };
        let mut tx = db.begin().await.unwrap();
        let err = change_status(&mut tx, order.id, &other_dealer, confirm()).await.unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
        tx.rollback().await.unwrap();

        let mut tx = db.begin().await.unwrap();
        let confirmed = change_status(&mut tx, order.id, &dealer, confirm()).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(confirmed.status, OrderStatus::Confirmed);
        assert_eq!(fetch_order(&db, order.id).await.unwrap().status, OrderStatus::Confirmed);
    }
}
