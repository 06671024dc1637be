//! Complaint Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

use super::user::{Role, User};
use crate::domain::events::{ComplaintEvent, DomainEvent};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "complaint_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ComplaintType {
    ProductQuality,
    Delivery,
    WrongItem,
    Refund,
    #[default]
    Other,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "complaint_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ComplaintStatus {
    #[default]
    Open,
    InProgress,
    Resolved,
    Closed,
}

impl ComplaintStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Open => "open", Self::InProgress => "in_progress", Self::Resolved => "resolved", Self::Closed => "closed" }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "complaint_priority", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplaintResponse {
    pub user: Uuid,
    pub user_name: String,
    pub role: Role,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Complaint {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub order_id: Option<Uuid>,
    pub wholesaler_id: Option<Uuid>,
    pub subject: String,
    pub description: String,
    #[serde(rename = "type")]
    pub complaint_type: ComplaintType,
    pub status: ComplaintStatus,
    pub priority: Priority,
    pub responses: Json<Vec<ComplaintResponse>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[sqlx(skip)]
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

/// Fields a customer supplies when filing.
#[derive(Clone, Debug)]
pub struct NewComplaint {
    pub order_id: Option<Uuid>,
    pub wholesaler_id: Option<Uuid>,
    pub subject: String,
    pub description: String,
    pub complaint_type: ComplaintType,
    pub priority: Priority,
}

impl Complaint {
    pub fn file(customer_id: Uuid, new: NewComplaint, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            customer_id,
            order_id: new.order_id,
            wholesaler_id: new.wholesaler_id,
            subject: new.subject.trim().to_string(),
            description: new.description,
            complaint_type: new.complaint_type,
            status: ComplaintStatus::Open,
            priority: new.priority,
            responses: Json(vec![]),
            resolved_at: None,
            created_at: now,
            updated_at: now,
            events: vec![],
        }
    }

    /// Customer who filed it, the dealer it names, or an admin.
    pub fn visible_to(&self, user: &User) -> bool {
        user.is(Role::Admin) || user.id == self.customer_id || Some(user.id) == self.wholesaler_id
    }

    /// Admins answer anything; dealers only complaints naming them.
    pub fn may_respond(&self, user: &User) -> bool {
        match user.role {
            Role::Admin => true,
            Role::Wholesaler => Some(user.id) == self.wholesaler_id,
            Role::Customer => false,
        }
    }

    pub fn respond(&mut self, responder: &User, message: String, now: DateTime<Utc>) {
        self.responses.push(ComplaintResponse {
            user: responder.id,
            user_name: responder.name.clone(),
            role: responder.role,
            message: message.clone(),
            created_at: now,
        });
        if self.status == ComplaintStatus::Open { self.status = ComplaintStatus::InProgress; }
        self.updated_at = now;
        self.raise_event(DomainEvent::Complaint(ComplaintEvent::Responded {
            complaint_id: self.id,
            customer_id: self.customer_id,
            subject: self.subject.clone(),
            responder_name: responder.name.clone(),
            message,
            status: self.status,
        }));
    }

    pub fn set_status(&mut self, status: ComplaintStatus, now: DateTime<Utc>) {
        self.status = status;
        if status == ComplaintStatus::Resolved { self.resolved_at = Some(now); }
        self.updated_at = now;
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
}
