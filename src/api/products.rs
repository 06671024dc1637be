//! Product catalog: public search and listing, dealer-owned writes.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;
use validator::Validate;

use super::extract::{AuthUser, Path, Query, ValidatedJson};
use super::validation::positive_amount;
use super::{AppState, Page, PageParams};
use crate::chat::or_tsquery;
use crate::domain::aggregates::{Product, ProductListing, Role, User, VehicleType};
use crate::domain::events::{DomainEvent, ProductEvent};
use crate::domain::value_objects::Slug;
use crate::error::{ApiError, ApiResult};
use crate::MarketError;

pub const DEFAULT_LIMIT: i64 = 12;
pub const DEALER_DEFAULT_LIMIT: i64 = 20;

const LISTING_SELECT: &str = "SELECT p.*, \
     jsonb_build_object('id', c.id, 'name', c.name, 'slug', c.slug) AS category, \
     jsonb_build_object('id', u.id, 'name', u.name, 'businessName', u.business_name) AS wholesaler \
     FROM products p JOIN categories c ON c.id = p.category_id JOIN users u ON u.id = p.wholesaler_id";

const DETAIL_SELECT: &str = "SELECT p.*, \
     jsonb_build_object('id', c.id, 'name', c.name, 'slug', c.slug) AS category, \
     jsonb_build_object('id', u.id, 'name', u.name, 'businessName', u.business_name, \
         'email', u.email, 'phone', u.phone, 'whatsappNumber', u.whatsapp_number) AS wholesaler \
     FROM products p JOIN categories c ON c.id = p.category_id JOIN users u ON u.id = p.wholesaler_id";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/detail/:id", get(detail))
        .route("/wholesaler/my", get(my_products))
        .route("/:id", put(update).delete(remove))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductFilter {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    pub category: Option<Uuid>,
    pub vehicle_type: Option<VehicleType>,
    pub brand: Option<String>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub wholesaler: Option<Uuid>,
    pub dealer_state: Option<String>,
    pub dealer_city: Option<String>,
    pub sort: Option<String>,
}

/// Body for both create and partial update; create checks the required fields.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProductRequest {
    #[validate(length(min = 2, max = 200, message = "name must be 2-200 characters"))]
    pub name: Option<String>,
    #[validate(length(min = 10, max = 2000, message = "description must be 10-2000 characters"))]
    pub description: Option<String>,
    #[validate(custom = "positive_amount")]
    pub price: Option<Decimal>,
    #[validate(custom = "positive_amount")]
    pub compare_price: Option<Decimal>,
    pub category: Option<Uuid>,
    #[validate(length(min = 1, max = 100, message = "brand must be 1-100 characters"))]
    pub brand: Option<String>,
    pub vehicle_type: Option<VehicleType>,
    #[validate(length(max = 100))]
    pub vehicle_make: Option<String>,
    #[validate(length(max = 100))]
    pub vehicle_model: Option<String>,
    #[validate(length(max = 100))]
    pub part_number: Option<String>,
    #[validate(length(max = 5, message = "at most 5 images"))]
    pub images: Option<Vec<String>>,
    #[validate(range(min = 0, message = "stock cannot be negative"))]
    pub stock: Option<i32>,
    #[validate(length(max = 10, message = "at most 10 tags"))]
    pub tags: Option<Vec<String>>,
    #[validate(length(max = 100))]
    pub dealer_state: Option<String>,
    #[validate(length(max = 100))]
    pub dealer_city: Option<String>,
    pub is_active: Option<bool>,
}

impl ProductRequest {
    /// Names of required fields absent from a create request.
    pub fn missing_for_create(&self) -> Vec<String> {
        [
            ("name", self.name.is_none()),
            ("description", self.description.is_none()),
            ("price", self.price.is_none()),
            ("category", self.category.is_none()),
            ("brand", self.brand.is_none()),
            ("vehicleType", self.vehicle_type.is_none()),
            ("stock", self.stock.is_none()),
        ]
        .into_iter()
        .filter(|(_, missing)| *missing)
        .map(|(field, _)| format!("{field} is required"))
        .collect()
    }
}

/// `ORDER BY` for a client sort key; unknown keys fall back to newest first.
pub fn order_clause(sort: Option<&str>) -> &'static str {
    match sort {
        Some("createdAt") => "p.created_at ASC, p.id ASC",
        Some("price") => "p.price ASC, p.id ASC",
        Some("-price") => "p.price DESC, p.id DESC",
        Some("-rating") => "p.rating DESC, p.id DESC",
        Some("name") => "p.name ASC, p.id ASC",
        _ => "p.created_at DESC, p.id DESC",
    }
}

/// Escapes `%`, `_` and `\` for use inside an `ILIKE` pattern.
pub fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') { out.push('\\'); }
        out.push(c);
    }
    out
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &ProductFilter) {
    if let Some(query) = filter.search.as_deref().and_then(or_tsquery) {
        qb.push(" AND p.search_vector @@ to_tsquery('english', ").push_bind(query).push(")");
    }
    if let Some(category) = filter.category {
        qb.push(" AND p.category_id = ").push_bind(category);
    }
    if let Some(vehicle) = filter.vehicle_type {
        qb.push(" AND p.vehicle_type = ").push_bind(vehicle);
    }
    if let Some(brand) = non_blank(&filter.brand) {
        qb.push(" AND p.brand ILIKE ").push_bind(format!("%{}%", escape_like(&brand)));
    }
    if let Some(min) = filter.min_price {
        qb.push(" AND p.price >= ").push_bind(min);
    }
    if let Some(max) = filter.max_price {
        qb.push(" AND p.price <= ").push_bind(max);
    }
    if let Some(wholesaler) = filter.wholesaler {
        qb.push(" AND p.wholesaler_id = ").push_bind(wholesaler);
    }
    if let Some(state) = non_blank(&filter.dealer_state) {
        qb.push(" AND lower(p.dealer_state) = lower(").push_bind(state).push(")");
    }
    if let Some(city) = non_blank(&filter.dealer_city) {
        qb.push(" AND lower(p.dealer_city) = lower(").push_bind(city).push(")");
    }
}

async fn list(State(state): State<AppState>, Query(filter): Query<ProductFilter>) -> ApiResult<Json<Value>> {
    let page = Page::new(&PageParams { page: filter.page, limit: filter.limit }, DEFAULT_LIMIT);

    let mut qb = QueryBuilder::<Postgres>::new(LISTING_SELECT);
    qb.push(" WHERE p.is_active");
    push_filters(&mut qb, &filter);
    qb.push(" ORDER BY ").push(order_clause(filter.sort.as_deref()));
    qb.push(" LIMIT ").push_bind(page.limit).push(" OFFSET ").push_bind(page.offset());
    let products = qb.build_query_as::<ProductListing>().fetch_all(&state.db).await?;

    let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM products p WHERE p.is_active");
    push_filters(&mut count, &filter);
    let total: i64 = count.build_query_scalar().fetch_one(&state.db).await?;

    Ok(page.wrap("products", products, total))
}

async fn fetch_detail(db: &PgPool, id: Uuid) -> ApiResult<ProductListing> {
    sqlx::query_as::<_, ProductListing>(&format!("{DETAIL_SELECT} WHERE p.id = $1"))
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Product"))
}

async fn fetch_owned(db: &PgPool, id: Uuid, user: &User) -> ApiResult<Product> {
    let product = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Product"))?;
    if !user.may_manage(product.wholesaler_id) {
        return Err(ApiError::not_authorized());
    }
    Ok(product)
}

async fn ensure_category(db: &PgPool, id: Uuid) -> ApiResult<()> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM categories WHERE id = $1)")
        .bind(id)
        .fetch_one(db)
        .await?;
    if !exists {
        return Err(ApiError::BadRequest("Category does not exist.".to_string()));
    }
    Ok(())
}

async fn detail(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Value>> {
    let product = fetch_detail(&state.db, id).await?;
    Ok(Json(json!({ "product": product })))
}

async fn my_products(State(state): State<AppState>, auth: AuthUser, Query(params): Query<PageParams>) -> ApiResult<Json<Value>> {
    let user = auth.require(&[Role::Wholesaler])?;
    let page = Page::new(&params, DEALER_DEFAULT_LIMIT);

    let products = sqlx::query_as::<_, ProductListing>(&format!(
        "{LISTING_SELECT} WHERE p.wholesaler_id = $1 ORDER BY p.created_at DESC, p.id DESC LIMIT $2 OFFSET $3"
    ))
    .bind(user.id)
    .bind(page.limit)
    .bind(page.offset())
    .fetch_all(&state.db)
    .await?;
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE wholesaler_id = $1")
        .bind(user.id)
        .fetch_one(&state.db)
        .await?;
    Ok(page.wrap("products", products, total))
}

async fn create(
    State(state): State<AppState>,
    auth: AuthUser,
    ValidatedJson(req): ValidatedJson<ProductRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let user = auth.require(&[Role::Wholesaler, Role::Admin])?;
    let missing = req.missing_for_create();
    if !missing.is_empty() {
        return Err(ApiError::Validation(missing));
    }
    let (Some(name), Some(description), Some(price), Some(category), Some(brand), Some(vehicle_type), Some(stock)) =
        (req.name, req.description, req.price, req.category, req.brand, req.vehicle_type, req.stock)
    else {
        return Err(ApiError::BadRequest("Missing required product fields.".to_string()));
    };
    ensure_category(&state.db, category).await?;

    let name = name.trim().to_string();
    let slug = Slug::unique(&name, chrono::Utc::now()).map_err(MarketError::from)?;
    let address = user.address.as_ref().map(|a| &a.0);
    let dealer_state = non_blank(&req.dealer_state).or_else(|| address.map(|a| a.state.clone()).filter(|s| !s.is_empty()));
    let dealer_city = non_blank(&req.dealer_city).or_else(|| address.map(|a| a.city.clone()).filter(|s| !s.is_empty()));

    let id = Uuid::now_v7();
    sqlx::query(
        "INSERT INTO products (id, name, slug, description, price, compare_price, category_id, wholesaler_id, brand, \
         vehicle_type, vehicle_make, vehicle_model, part_number, images, stock, is_active, tags, dealer_state, dealer_city) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)",
    )
    .bind(id)
    .bind(&name)
    .bind(slug.as_str())
    .bind(description)
    .bind(price)
    .bind(req.compare_price)
    .bind(category)
    .bind(user.id)
    .bind(brand.trim())
    .bind(vehicle_type)
    .bind(non_blank(&req.vehicle_make))
    .bind(non_blank(&req.vehicle_model))
    .bind(non_blank(&req.part_number))
    .bind(req.images.unwrap_or_default())
    .bind(stock)
    .bind(req.is_active.unwrap_or(true))
    .bind(clean_tags(req.tags.unwrap_or_default()))
    .bind(dealer_state)
    .bind(dealer_city)
    .execute(&state.db)
    .await?;

    tracing::info!(product_id = %id, wholesaler_id = %user.id, "product created");
    state
        .notifier
        .dispatch(&DomainEvent::Product(ProductEvent::Created { product_id: id, wholesaler_id: user.id, name }), None)
        .await;

    let product = fetch_detail(&state.db, id).await?;
    Ok((StatusCode::CREATED, Json(json!({ "message": "Product created.", "product": product }))))
}

fn clean_tags(tags: Vec<String>) -> Vec<String> {
    tags.into_iter().map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect()
}

async fn update(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<ProductRequest>,
) -> ApiResult<Json<Value>> {
    let user = auth.require(&[Role::Wholesaler, Role::Admin])?;
    fetch_owned(&state.db, id, &user).await?;
    if let Some(category) = req.category {
        ensure_category(&state.db, category).await?;
    }

    sqlx::query(
        "UPDATE products SET name = COALESCE($2, name), description = COALESCE($3, description), \
         price = COALESCE($4, price), compare_price = COALESCE($5, compare_price), category_id = COALESCE($6, category_id), \
         brand = COALESCE($7, brand), vehicle_type = COALESCE($8, vehicle_type), vehicle_make = COALESCE($9, vehicle_make), \
         vehicle_model = COALESCE($10, vehicle_model), part_number = COALESCE($11, part_number), images = COALESCE($12, images), \
         stock = COALESCE($13, stock), tags = COALESCE($14, tags), dealer_state = COALESCE($15, dealer_state), \
         dealer_city = COALESCE($16, dealer_city), is_active = COALESCE($17, is_active), updated_at = NOW() \
         WHERE id = $1",
    )
    .bind(id)
    .bind(req.name.map(|n| n.trim().to_string()))
    .bind(req.description)
    .bind(req.price)
    .bind(req.compare_price)
    .bind(req.category)
    .bind(req.brand.map(|b| b.trim().to_string()))
    .bind(req.vehicle_type)
    .bind(req.vehicle_make)
    .bind(req.vehicle_model)
    .bind(req.part_number)
    .bind(req.images)
    .bind(req.stock)
    .bind(req.tags.map(clean_tags))
    .bind(req.dealer_state)
    .bind(req.dealer_city)
    .bind(req.is_active)
    .execute(&state.db)
    .await?;

    let product = fetch_detail(&state.db, id).await?;
    Ok(Json(json!({ "message": "Product updated.", "product": product })))
}

async fn remove(State(state): State<AppState>, auth: AuthUser, Path(id): Path<Uuid>) -> ApiResult<Json<Value>> {
    let user = auth.require(&[Role::Wholesaler, Role::Admin])?;
    fetch_owned(&state.db, id, &user).await?;
    sqlx::query("DELETE FROM products WHERE id = $1").bind(id).execute(&state.db).await?;
    tracing::info!(product_id = %id, by = %user.id, "product deleted");
    Ok(Json(json!({ "message": "Product deleted." })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_clause_whitelist() {
        assert_eq!(order_clause(None), "p.created_at DESC, p.id DESC");
        assert_eq!(order_clause(Some("-price")), "p.price DESC, p.id DESC");
        assert_eq!(order_clause(Some("name")), "p.name ASC, p.id ASC");
        assert_eq!(order_clause(Some("price; DROP TABLE products")), "p.created_at DESC, p.id DESC");
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("100%_Bosch\\"), "100\\%\\_Bosch\\\\");
        assert_eq!(escape_like("Minda"), "Minda");
    }

    #[test]
    fn test_create_requires_fields() {
        let req: ProductRequest = serde_json::from_value(json!({ "name": "Clutch Plate", "price": 450 })).unwrap();
        assert_eq!(
            req.missing_for_create(),
            ["description is required", "category is required", "brand is required", "vehicleType is required", "stock is required"]
        );
    }

    #[test]
    fn test_product_rules() {
        let req: ProductRequest = serde_json::from_value(json!({
            "name": "Clutch Plate",
            "description": "Genuine clutch plate for Splendor",
            "price": 0,
            "stock": -1,
            "tags": ["a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k"]
        }))
        .unwrap();
        let errors = req.validate().unwrap_err();
        let fields: Vec<_> = errors.field_errors().into_keys().collect();
        assert!(fields.contains(&"price"));
        assert!(fields.contains(&"stock"));
        assert!(fields.contains(&"tags"));
    }

    #[test]
    fn test_filter_from_query() {
        let uri: axum::http::Uri = "/api/products?search=brake&vehicleType=tractor&minPrice=100&sort=-price&dealerState=Punjab"
            .parse()
            .unwrap();
        let axum::extract::Query(filter) = axum::extract::Query::<ProductFilter>::try_from_uri(&uri).unwrap();
        assert_eq!(filter.vehicle_type, Some(VehicleType::Tractor));
        assert_eq!(filter.min_price, Some(Decimal::from(100)));
        assert_eq!(filter.dealer_state.as_deref(), Some("Punjab"));
    }
}
