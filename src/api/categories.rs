//! Category catalog; writes are admin only.

use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;
use validator::Validate;

use super::extract::{AuthUser, Path, Query, ValidatedJson};
use super::AppState;
use crate::domain::aggregates::{Category, CategoryVehicleType, Role, VehicleType};
use crate::domain::value_objects::Slug;
use crate::error::{ApiError, ApiResult};
use crate::MarketError;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/:id", get(show).put(update).delete(remove))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryFilter {
    pub vehicle_type: Option<VehicleType>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CategoryRequest {
    #[validate(length(min = 2, max = 100, message = "name must be 2-100 characters"))]
    pub name: Option<String>,
    #[validate(length(max = 500, message = "description must be at most 500 characters"))]
    pub description: Option<String>,
    pub vehicle_type: Option<CategoryVehicleType>,
    #[validate(length(max = 500))]
    pub image: Option<String>,
}

async fn list(State(state): State<AppState>, Query(filter): Query<CategoryFilter>) -> ApiResult<Json<Value>> {
    let categories = match filter.vehicle_type {
        Some(vehicle) => {
            let [own, both] = CategoryVehicleType::matching(vehicle);
            sqlx::query_as::<_, Category>("SELECT * FROM categories WHERE is_active AND vehicle_type IN ($1, $2) ORDER BY name")
                .bind(own)
                .bind(both)
                .fetch_all(&state.db)
                .await?
        }
        None => {
            sqlx::query_as::<_, Category>("SELECT * FROM categories WHERE is_active ORDER BY name")
                .fetch_all(&state.db)
                .await?
        }
    };
    Ok(Json(json!({ "categories": categories })))
}

async fn show(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Value>> {
    let category = sqlx::query_as::<_, Category>("SELECT * FROM categories WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Category"))?;
    Ok(Json(json!({ "category": category })))
}

async fn create(
    State(state): State<AppState>,
    auth: AuthUser,
    ValidatedJson(req): ValidatedJson<CategoryRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    auth.require(&[Role::Admin])?;
    let name = req
        .name
        .map(|n| n.trim().to_string())
        .ok_or_else(|| ApiError::Validation(vec!["name is required".to_string()]))?;
    let slug = Slug::new(&name).map_err(MarketError::from)?;

    let category = sqlx::query_as::<_, Category>(
        "INSERT INTO categories (id, name, slug, description, vehicle_type, image) \
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(&name)
    .bind(slug.as_str())
    .bind(req.description.unwrap_or_default())
    .bind(req.vehicle_type.unwrap_or_default())
    .bind(req.image.unwrap_or_default())
    .fetch_one(&state.db)
    .await?;

    tracing::info!(category_id = %category.id, name = %category.name, "category created");
    Ok((StatusCode::CREATED, Json(json!({ "message": "Category created.", "category": category }))))
}

async fn update(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<CategoryRequest>,
) -> ApiResult<Json<Value>> {
    auth.require(&[Role::Admin])?;
    let name = req.name.map(|n| n.trim().to_string());
    let slug = name.as_deref().map(Slug::new).transpose().map_err(MarketError::from)?;

    let category = sqlx::query_as::<_, Category>(
        "UPDATE categories SET name = COALESCE($2, name), slug = COALESCE($3, slug), \
         description = COALESCE($4, description), vehicle_type = COALESCE($5, vehicle_type), \
         image = COALESCE($6, image), updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(name)
    .bind(slug.map(Slug::into_inner))
    .bind(req.description)
    .bind(req.vehicle_type)
    .bind(req.image)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Category"))?;
    Ok(Json(json!({ "message": "Category updated.", "category": category })))
}

async fn remove(State(state): State<AppState>, auth: AuthUser, Path(id): Path<Uuid>) -> ApiResult<Json<Value>> {
    auth.require(&[Role::Admin])?;
    let result = sqlx::query("DELETE FROM categories WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await
        .map_err(|e| {
            let referenced = matches!(&e, sqlx::Error::Database(db) if db.code().as_deref() == Some("23503"));
            if referenced { ApiError::Conflict("Category still has products.".to_string()) } else { ApiError::from(e) }
        })?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Category"));
    }
    Ok(Json(json!({ "message": "Category deleted." })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_request_rules() {
        let req: CategoryRequest = serde_json::from_value(json!({ "name": "Tractor Hydraulics", "vehicleType": "tractor" })).unwrap();
        assert!(req.validate().is_ok());
        assert_eq!(req.vehicle_type, Some(CategoryVehicleType::Tractor));

        let req: CategoryRequest = serde_json::from_value(json!({ "name": "X", "description": "d".repeat(501) })).unwrap();
        assert_eq!(req.validate().unwrap_err().errors().len(), 2);
    }

    #[test]
    fn test_filter_parses_vehicle() {
        let filter: CategoryFilter = serde_json::from_value(json!({ "vehicleType": "bike" })).unwrap();
        assert_eq!(filter.vehicle_type, Some(VehicleType::Bike));
    }
}
