//! User Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use std::fmt;
use uuid::Uuid;
use validator::Validate;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Wholesaler,
    #[default]
    Customer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Admin => "admin", Self::Wholesaler => "wholesaler", Self::Customer => "customer" }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[serde(default)]
    #[validate(length(max = 200))]
    pub street: String,
    #[serde(default)]
    #[validate(length(max = 100))]
    pub city: String,
    #[serde(default)]
    #[validate(length(max = 100))]
    pub state: String,
    #[serde(default)]
    #[validate(length(max = 10))]
    pub pin_code: String,
    #[serde(default = "default_country")]
    pub country: String,
}

pub fn default_country() -> String { "India".to_string() }

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub phone: Option<String>,
    pub whatsapp_number: Option<String>,
    pub address: Option<Json<Address>>,
    pub business_name: Option<String>,
    pub business_license: Option<String>,
    pub is_approved: bool,
    pub is_active: bool,
    #[serde(skip_serializing)]
    pub refresh_token_digest: Option<String>,
    pub avatar: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Why an otherwise valid credential may not sign in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginBlock { Deactivated, PendingApproval }

impl User {
    pub fn is(&self, role: Role) -> bool { self.role == role }

    pub fn login_block(&self) -> Option<LoginBlock> {
        if !self.is_active { return Some(LoginBlock::Deactivated); }
        if self.role == Role::Wholesaler && !self.is_approved { return Some(LoginBlock::PendingApproval); }
        None
    }

    /// Owner of a resource, or an admin.
    pub fn may_manage(&self, owner_id: Uuid) -> bool { self.role == Role::Admin || self.id == owner_id }
}

/// Normalizes an email the way the unique index expects it.
pub fn normalize_email(email: &str) -> String { email.trim().to_lowercase() }

#[cfg(test)]
pub(crate) fn sample_user(role: Role) -> User {
    let now = Utc::now();
    User {
        id: Uuid::now_v7(), name: "Ravi Kumar".into(), email: "ravi@example.in".into(),
        password_hash: "$argon2id$stub".into(), role, phone: Some("+919812345678".into()), whatsapp_number: None,
        address: None, business_name: None, business_license: None, is_approved: role != Role::Wholesaler,
        is_active: true, refresh_token_digest: Some("digest".into()), avatar: String::new(),
        created_at: now, updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialization_hides_secrets() {
        let json = serde_json::to_value(sample_user(Role::Customer)).unwrap();
        assert!(json.get("passwordHash").is_none());
        assert!(json.get("refreshTokenDigest").is_none());
        assert_eq!(json["role"], "customer");
        assert_eq!(json["isActive"], true);
    }

    #[test]
    fn test_login_blocks() {
        let mut dealer = sample_user(Role::Wholesaler);
        assert_eq!(dealer.login_block(), Some(LoginBlock::PendingApproval));
        dealer.is_approved = true;
        assert_eq!(dealer.login_block(), None);
        dealer.is_active = false;
        assert_eq!(dealer.login_block(), Some(LoginBlock::Deactivated));
    }

    #[test]
    fn test_may_manage() {
        let dealer = sample_user(Role::Wholesaler);
        let admin = sample_user(Role::Admin);
        assert!(dealer.may_manage(dealer.id));
        assert!(!dealer.may_manage(Uuid::now_v7()));
        assert!(admin.may_manage(dealer.id));
    }

    #[test]
    fn test_address_country_default() {
        let a: Address = serde_json::from_str(r#"{"city":"Pune"}"#).unwrap();
        assert_eq!(a.country, "India");
        assert_eq!(a.city, "Pune");
    }

    #[test]
    fn test_normalize_email() { assert_eq!(normalize_email("  Ravi@Example.IN "), "ravi@example.in"); }
}
