//! Category Aggregate: groups spare parts (Engine, Brakes, Electrical, ...)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::product::VehicleType;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "category_vehicle_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CategoryVehicleType {
    Bike,
    Car,
    Tractor,
    #[default]
    Both,
}

impl CategoryVehicleType {
    /// Values a listing filtered by `vehicle` should match.
    pub fn matching(vehicle: VehicleType) -> [CategoryVehicleType; 2] {
        let own = match vehicle {
            VehicleType::Bike => Self::Bike,
            VehicleType::Car => Self::Car,
            VehicleType::Tractor => Self::Tractor,
        };
        [own, Self::Both]
    }
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub vehicle_type: CategoryVehicleType,
    pub image: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
