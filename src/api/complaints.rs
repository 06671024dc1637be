//! Customer complaints and the replies from dealers and admins.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{types::Json as DbJson, PgPool, Postgres, Transaction};
use uuid::Uuid;
use validator::Validate;

use super::extract::{AuthUser, Path, Query, ValidatedJson};
use super::AppState;
use crate::domain::aggregates::{Complaint, ComplaintStatus, ComplaintType, NewComplaint, Priority, Role};
use crate::error::{ApiError, ApiResult};

const LISTING_SELECT: &str = "SELECT cp.*, \
     jsonb_build_object('id', cu.id, 'name', cu.name, 'email', cu.email) AS customer, \
     CASE WHEN w.id IS NULL THEN NULL ELSE jsonb_build_object('id', w.id, 'name', w.name, 'businessName', w.business_name) END AS wholesaler, \
     CASE WHEN o.id IS NULL THEN NULL ELSE jsonb_build_object('id', o.id, 'orderNumber', o.order_number) END AS order_ref \
     FROM complaints cp JOIN users cu ON cu.id = cp.customer_id \
     LEFT JOIN users w ON w.id = cp.wholesaler_id LEFT JOIN orders o ON o.id = cp.order_id";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create))
        .route("/my", get(my_complaints))
        .route("/wholesaler/my", get(wholesaler_complaints))
        .route("/all", get(all_complaints))
        .route("/:id", get(show))
        .route("/:id/respond", post(respond))
        .route("/:id/status", put(update_status))
}

/// A complaint with the people and order it refers to.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ComplaintListing {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub complaint: Complaint,
    pub customer: DbJson<Value>,
    pub wholesaler: Option<DbJson<Value>>,
    #[serde(rename = "order")]
    pub order_ref: Option<DbJson<Value>>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateComplaintRequest {
    #[serde(alias = "order")]
    pub order_id: Option<Uuid>,
    #[serde(alias = "wholesaler")]
    pub wholesaler_id: Option<Uuid>,
    #[validate(length(min = 5, max = 200, message = "subject must be 5-200 characters"))]
    pub subject: String,
    #[validate(length(min = 10, max = 2000, message = "description must be 10-2000 characters"))]
    pub description: String,
    #[serde(default, rename = "type")]
    pub complaint_type: ComplaintType,
    #[serde(default)]
    pub priority: Priority,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RespondRequest {
    #[validate(length(min = 2, max = 2000, message = "message must be 2-2000 characters"))]
    pub message: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct StatusRequest {
    pub status: ComplaintStatus,
}

#[derive(Debug, Deserialize)]
pub struct ComplaintFilter {
    pub status: Option<ComplaintStatus>,
    pub priority: Option<Priority>,
}

async fn fetch_listing(db: &PgPool, id: Uuid) -> ApiResult<ComplaintListing> {
    sqlx::query_as::<_, ComplaintListing>(&format!("{LISTING_SELECT} WHERE cp.id = $1"))
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Complaint"))
}

async fn lock_complaint(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> ApiResult<Complaint> {
    sqlx::query_as::<_, Complaint>("SELECT * FROM complaints WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| ApiError::not_found("Complaint"))
}

async fn save(tx: &mut Transaction<'_, Postgres>, complaint: &Complaint) -> ApiResult<()> {
    sqlx::query("UPDATE complaints SET status = $2, responses = $3, resolved_at = $4, updated_at = $5 WHERE id = $1")
        .bind(complaint.id)
        .bind(complaint.status)
        .bind(&complaint.responses)
        .bind(complaint.resolved_at)
        .bind(complaint.updated_at)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Rejects references to someone else's order or to a user who is not a dealer.
async fn check_references(db: &PgPool, customer_id: Uuid, order_id: Option<Uuid>, wholesaler_id: Option<Uuid>) -> ApiResult<()> {
    if let Some(order_id) = order_id {
        let owned: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM orders WHERE id = $1 AND customer_id = $2)")
            .bind(order_id)
            .bind(customer_id)
            .fetch_one(db)
            .await?;
        if !owned {
            return Err(ApiError::BadRequest("Order not found for this account.".to_string()));
        }
    }
    if let Some(wholesaler_id) = wholesaler_id {
        let dealer: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1 AND role = 'wholesaler')")
            .bind(wholesaler_id)
            .fetch_one(db)
            .await?;
        if !dealer {
            return Err(ApiError::BadRequest("Wholesaler not found.".to_string()));
        }
    }
    Ok(())
}

async fn file_complaint(db: &PgPool, customer_id: Uuid, req: CreateComplaintRequest) -> ApiResult<Complaint> {
    check_references(db, customer_id, req.order_id, req.wholesaler_id).await?;

    let complaint = Complaint::file(
        customer_id,
        NewComplaint {
            order_id: req.order_id,
            wholesaler_id: req.wholesaler_id,
            subject: req.subject,
            description: req.description,
            complaint_type: req.complaint_type,
            priority: req.priority,
        },
        Utc::now(),
    );
    sqlx::query(
        "INSERT INTO complaints (id, customer_id, order_id, wholesaler_id, subject, description, complaint_type, \
         status, priority, responses, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
    )
    .bind(complaint.id)
    .bind(complaint.customer_id)
    .bind(complaint.order_id)
    .bind(complaint.wholesaler_id)
    .bind(&complaint.subject)
    .bind(&complaint.description)
    .bind(complaint.complaint_type)
    .bind(complaint.status)
    .bind(complaint.priority)
    .bind(&complaint.responses)
    .bind(complaint.created_at)
    .bind(complaint.updated_at)
    .execute(db)
    .await?;
    Ok(complaint)
}

async fn create(
    State(state): State<AppState>,
    auth: AuthUser,
    ValidatedJson(req): ValidatedJson<CreateComplaintRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let user = auth.require(&[Role::Customer])?;
    let complaint = file_complaint(&state.db, user.id, req).await?;

    tracing::info!(complaint_id = %complaint.id, customer_id = %user.id, "complaint filed");
    Ok((StatusCode::CREATED, Json(json!({ "message": "Complaint filed successfully.", "complaint": complaint }))))
}

async fn list_where(db: &PgPool, scope: &str, owner: Uuid) -> ApiResult<Json<Value>> {
    let complaints = sqlx::query_as::<_, ComplaintListing>(&format!(
        "{LISTING_SELECT} WHERE {scope} = $1 ORDER BY cp.created_at DESC, cp.id DESC"
    ))
    .bind(owner)
    .fetch_all(db)
    .await?;
    Ok(Json(json!({ "complaints": complaints })))
}

async fn my_complaints(State(state): State<AppState>, auth: AuthUser) -> ApiResult<Json<Value>> {
    let user = auth.require(&[Role::Customer])?;
    list_where(&state.db, "cp.customer_id", user.id).await
}

async fn wholesaler_complaints(State(state): State<AppState>, auth: AuthUser) -> ApiResult<Json<Value>> {
    let user = auth.require(&[Role::Wholesaler])?;
    list_where(&state.db, "cp.wholesaler_id", user.id).await
}

async fn all_complaints(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(filter): Query<ComplaintFilter>,
) -> ApiResult<Json<Value>> {
    auth.require(&[Role::Admin])?;
    let complaints = sqlx::query_as::<_, ComplaintListing>(&format!(
        "{LISTING_SELECT} WHERE ($1::complaint_status IS NULL OR cp.status = $1) \
         AND ($2::complaint_priority IS NULL OR cp.priority = $2) \
         ORDER BY cp.created_at DESC, cp.id DESC"
    ))
    .bind(filter.status)
    .bind(filter.priority)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(json!({ "complaints": complaints })))
}

async fn show(State(state): State<AppState>, AuthUser(user): AuthUser, Path(id): Path<Uuid>) -> ApiResult<Json<Value>> {
    let listing = fetch_listing(&state.db, id).await?;
    if !listing.complaint.visible_to(&user) {
        return Err(ApiError::not_authorized());
    }
    Ok(Json(json!({ "complaint": listing })))
}

async fn respond(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<RespondRequest>,
) -> ApiResult<Json<Value>> {
    let user = auth.require(&[Role::Admin, Role::Wholesaler])?;

    let mut tx = state.db.begin().await?;
    let mut complaint = lock_complaint(&mut tx, id).await?;
    if !complaint.may_respond(&user) {
        return Err(ApiError::not_authorized());
    }
    complaint.respond(&user, req.message.trim().to_string(), Utc::now());
    save(&mut tx, &complaint).await?;
    tx.commit().await?;

    tracing::info!(complaint_id = %complaint.id, by = %user.id, "complaint response added");
    state.publish(complaint.take_events(), Some(complaint.customer_id)).await;
    let listing = fetch_listing(&state.db, id).await?;
    Ok(Json(json!({ "message": "Response added.", "complaint": listing })))
}

async fn update_status(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<StatusRequest>,
) -> ApiResult<Json<Value>> {
    auth.require(&[Role::Admin])?;

    let mut tx = state.db.begin().await?;
    let mut complaint = lock_complaint(&mut tx, id).await?;
    complaint.set_status(req.status, Utc::now());
    save(&mut tx, &complaint).await?;
    tx.commit().await?;

    Ok(Json(json!({ "message": "Complaint status updated.", "complaint": complaint })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::orders::place_order;
    use crate::api::test_support::{insert_product, insert_user};
    use crate::domain::aggregates::order::sample_address;
    use crate::domain::aggregates::PaymentMethod;
    use crate::domain::value_objects::Quantity;

    #[test]
    fn test_create_rules() {
        let req: CreateComplaintRequest = serde_json::from_value(json!({
            "subject": "Late",
            "description": "too short",
        }))
        .unwrap();
        let err = req.validate().unwrap_err();
        assert_eq!(err.field_errors().len(), 2);
        assert_eq!(req.complaint_type, ComplaintType::Other);
        assert_eq!(req.priority, Priority::Medium);
    }

    #[test]
    fn test_create_accepts_type_and_refs() {
        let order = Uuid::now_v7();
        let req: CreateComplaintRequest = serde_json::from_value(json!({
            "order": order,
            "subject": "Wrong brake pads",
            "description": "Received pads for a different model",
            "type": "wrong_item",
            "priority": "high"
        }))
        .unwrap();
        assert!(req.validate().is_ok());
        assert_eq!(req.order_id, Some(order));
        assert_eq!(req.complaint_type, ComplaintType::WrongItem);
    }

    #[test]
    fn test_respond_rules() {
        let req: RespondRequest = serde_json::from_value(json!({ "message": "k" })).unwrap();
        assert!(req.validate().is_err());
        let req: RespondRequest = serde_json::from_value(json!({ "message": "Replacement dispatched" })).unwrap();
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_filter_parses() {
        let filter: ComplaintFilter = serde_json::from_value(json!({ "status": "in_progress", "priority": "low" })).unwrap();
        assert_eq!(filter.status, Some(ComplaintStatus::InProgress));
        assert_eq!(filter.priority, Some(Priority::Low));
    }

    fn request(order_id: Option<Uuid>, wholesaler_id: Option<Uuid>) -> CreateComplaintRequest {
        CreateComplaintRequest {
            order_id,
            wholesaler_id,
            subject: "Damaged radiator".to_string(),
            description: "Radiator arrived with a cracked tank".to_string(),
            complaint_type: ComplaintType::ProductQuality,
            priority: Priority::High,
        }
    }

    fn ids_in(listing: Json<Value>) -> Vec<String> {
        listing.0["complaints"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["id"].as_str().unwrap().to_string())
            .collect()
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL pointing at Postgres"]
    async fn test_references_must_belong_to_customer(db: PgPool) {
        let dealer = insert_user(&db, Role::Wholesaler).await;
        let buyer = insert_user(&db, Role::Customer).await;
        let stranger = insert_user(&db, Role::Customer).await;
        let radiator = insert_product(&db, dealer.id, "Radiator", 4, &[]).await;
        let mut tx = db.begin().await.unwrap();
        let order = place_order(&mut tx, buyer.id, &[(radiator, Quantity::new(1).unwrap())], sample_address(), PaymentMethod::Cod)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let err = check_references(&db, stranger.id, Some(order.id), None).await.unwrap_err();
        assert_eq!(err.to_string(), "Order not found for this account.");
        let err = check_references(&db, buyer.id, None, Some(stranger.id)).await.unwrap_err();
        assert_eq!(err.to_string(), "Wholesaler not found.");
        assert!(check_references(&db, buyer.id, Some(order.id), Some(dealer.id)).await.is_ok());
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL pointing at Postgres"]
    async fn test_listings_are_scoped_to_owner(db: PgPool) {
        let dealer = insert_user(&db, Role::Wholesaler).await;
        let other_dealer = insert_user(&db, Role::Wholesaler).await;
        let buyer = insert_user(&db, Role::Customer).await;
        let other_buyer = insert_user(&db, Role::Customer).await;

        let mine = file_complaint(&db, buyer.id, request(None, Some(dealer.id))).await.unwrap();
        let theirs = file_complaint(&db, other_buyer.id, request(None, Some(other_dealer.id))).await.unwrap();

        let listed = ids_in(list_where(&db, "cp.customer_id", buyer.id).await.unwrap());
        assert_eq!(listed, vec![mine.id.to_string()]);
        let listed = ids_in(list_where(&db, "cp.wholesaler_id", other_dealer.id).await.unwrap());
        assert_eq!(listed, vec![theirs.id.to_string()]);
        assert!(ids_in(list_where(&db, "cp.wholesaler_id", buyer.id).await.unwrap()).is_empty());
    }
}
