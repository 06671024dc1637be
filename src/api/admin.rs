//! Admin analytics and account management.

use axum::{
    extract::State,
    routing::{get, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{types::Json as DbJson, Postgres, QueryBuilder};
use uuid::Uuid;
use validator::Validate;

use super::extract::{AuthUser, Path, Query, ValidatedJson};
use super::products::escape_like;
use super::{AppState, Page, PageParams};
use crate::domain::aggregates::{OrderStatus, PaymentMethod, Role, User};
use crate::error::{ApiError, ApiResult};

pub const USERS_DEFAULT_LIMIT: i64 = 20;
const TOP_PRODUCTS: i64 = 5;
const RECENT_ORDERS: i64 = 5;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/dashboard", get(dashboard))
        .route("/users", get(list_users))
        .route("/users/:id", put(update_user).delete(deactivate_user))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_users: i64,
    pub total_customers: i64,
    pub total_wholesalers: i64,
    pub total_products: i64,
    pub total_orders: i64,
    pub total_complaints: i64,
    pub open_complaints: i64,
    pub total_sales: Decimal,
    pub avg_order_value: Decimal,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct StatusCount {
    pub status: OrderStatus,
    pub count: i64,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TopProduct {
    pub name: String,
    pub total_qty: i64,
    pub total_revenue: Decimal,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RecentOrder {
    pub id: Uuid,
    pub order_number: String,
    pub total_amount: Decimal,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub is_paid: bool,
    pub created_at: DateTime<Utc>,
    pub customer: DbJson<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserFilter {
    pub role: Option<Role>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub is_active: Option<bool>,
    pub is_approved: Option<bool>,
    pub role: Option<Role>,
}

/// Admins may not lock themselves out.
pub fn check_self_update(admin: &User, target: Uuid, req: &UpdateUserRequest) -> ApiResult<()> {
    let demotes = req.role.is_some_and(|r| r != Role::Admin);
    if admin.id == target && (req.is_active == Some(false) || demotes) {
        return Err(ApiError::BadRequest("You cannot deactivate or demote your own account.".to_string()));
    }
    Ok(())
}

async fn dashboard(State(state): State<AppState>, auth: AuthUser) -> ApiResult<Json<Value>> {
    auth.require(&[Role::Admin])?;

    let stats = sqlx::query_as::<_, DashboardStats>(
        "SELECT \
         (SELECT COUNT(*) FROM users) AS total_users, \
         (SELECT COUNT(*) FROM users WHERE role = 'customer') AS total_customers, \
         (SELECT COUNT(*) FROM users WHERE role = 'wholesaler') AS total_wholesalers, \
         (SELECT COUNT(*) FROM products) AS total_products, \
         (SELECT COUNT(*) FROM orders) AS total_orders, \
         (SELECT COUNT(*) FROM complaints) AS total_complaints, \
         (SELECT COUNT(*) FROM complaints WHERE status = 'open') AS open_complaints, \
         (SELECT ROUND(COALESCE(SUM(total_amount), 0)) FROM orders WHERE status <> 'cancelled') AS total_sales, \
         (SELECT ROUND(COALESCE(AVG(total_amount), 0)) FROM orders WHERE status <> 'cancelled') AS avg_order_value",
    )
    .fetch_one(&state.db)
    .await?;

    let orders_by_status = sqlx::query_as::<_, StatusCount>(
        "SELECT status, COUNT(*) AS count FROM orders GROUP BY status ORDER BY status",
    )
    .fetch_all(&state.db)
    .await?;

    let top_products = sqlx::query_as::<_, TopProduct>(
        "SELECT item->>'name' AS name, \
         SUM((item->>'quantity')::BIGINT)::BIGINT AS total_qty, \
         SUM((item->>'price')::NUMERIC * (item->>'quantity')::NUMERIC) AS total_revenue \
         FROM orders, jsonb_array_elements(items) AS item \
         GROUP BY item->>'name' ORDER BY total_qty DESC, name LIMIT $1",
    )
    .bind(TOP_PRODUCTS)
    .fetch_all(&state.db)
    .await?;

    let recent_orders = sqlx::query_as::<_, RecentOrder>(
        "SELECT o.id, o.order_number, o.total_amount, o.status, o.payment_method, o.is_paid, o.created_at, \
         jsonb_build_object('id', u.id, 'name', u.name) AS customer \
         FROM orders o JOIN users u ON u.id = o.customer_id \
         ORDER BY o.created_at DESC, o.id DESC LIMIT $1",
    )
    .bind(RECENT_ORDERS)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(json!({
        "stats": stats,
        "ordersByStatus": orders_by_status,
        "topProducts": top_products,
        "recentOrders": recent_orders,
    })))
}

fn push_user_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &UserFilter) {
    qb.push(" WHERE TRUE");
    if let Some(role) = filter.role {
        qb.push(" AND role = ").push_bind(role);
    }
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", escape_like(search));
        qb.push(" AND (name ILIKE ").push_bind(pattern.clone()).push(" OR email ILIKE ").push_bind(pattern).push(")");
    }
}

async fn list_users(State(state): State<AppState>, auth: AuthUser, Query(filter): Query<UserFilter>) -> ApiResult<Json<Value>> {
    auth.require(&[Role::Admin])?;
    let page = Page::new(&PageParams { page: filter.page, limit: filter.limit }, USERS_DEFAULT_LIMIT);

    let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM users");
    push_user_filters(&mut qb, &filter);
    qb.push(" ORDER BY created_at DESC, id DESC LIMIT ").push_bind(page.limit).push(" OFFSET ").push_bind(page.offset());
    let users = qb.build_query_as::<User>().fetch_all(&state.db).await?;

    let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users");
    push_user_filters(&mut count, &filter);
    let total: i64 = count.build_query_scalar().fetch_one(&state.db).await?;

    Ok(page.wrap("users", users, total))
}

async fn update_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateUserRequest>,
) -> ApiResult<Json<Value>> {
    let admin = auth.require(&[Role::Admin])?;
    check_self_update(&admin, id, &req)?;

    let user = sqlx::query_as::<_, User>(
        "UPDATE users SET is_active = COALESCE($2, is_active), is_approved = COALESCE($3, is_approved), \
         role = COALESCE($4, role), \
         refresh_token_digest = CASE WHEN $2 = FALSE THEN NULL ELSE refresh_token_digest END, \
         updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(req.is_active)
    .bind(req.is_approved)
    .bind(req.role)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("User"))?;

    tracing::info!(user_id = %user.id, by = %admin.id, active = user.is_active, approved = user.is_approved, "user updated");
    Ok(Json(json!({ "message": "User updated.", "user": user })))
}

async fn deactivate_user(State(state): State<AppState>, auth: AuthUser, Path(id): Path<Uuid>) -> ApiResult<Json<Value>> {
    let admin = auth.require(&[Role::Admin])?;
    check_self_update(&admin, id, &UpdateUserRequest { is_active: Some(false), is_approved: None, role: None })?;

    let user = sqlx::query_as::<_, User>(
        "UPDATE users SET is_active = FALSE, refresh_token_digest = NULL, updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("User"))?;

    tracing::info!(user_id = %user.id, by = %admin.id, "user deactivated");
    Ok(Json(json!({ "message": "User deactivated.", "user": user })))
}
