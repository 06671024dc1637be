//! Bootstrap data: the first admin account and the standard category tree.
//!
//! Safe to re-run; existing rows are left untouched.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::hash_password;
use crate::domain::aggregates::CategoryVehicleType;

pub const ADMIN_EMAIL: &str = "admin@sparepartshub.com";
pub const DEFAULT_ADMIN_PASSWORD: &str = "admin123";

pub struct SeedCategory {
    pub name: &'static str,
    pub slug: &'static str,
    pub vehicle_type: CategoryVehicleType,
    pub description: &'static str,
}

const fn category(name: &'static str, slug: &'static str, vehicle_type: CategoryVehicleType, description: &'static str) -> SeedCategory {
    SeedCategory { name, slug, vehicle_type, description }
}

pub const CATEGORIES: &[SeedCategory] = &[
    category("Engine Parts", "engine-parts", CategoryVehicleType::Both, "Pistons, gaskets, valves, timing belts and more"),
    category("Brake System", "brake-system", CategoryVehicleType::Both, "Brake pads, rotors, calipers, brake fluid"),
    category("Electrical", "electrical", CategoryVehicleType::Both, "Batteries, alternators, starters, spark plugs"),
    category("Suspension", "suspension", CategoryVehicleType::Both, "Shock absorbers, struts, springs, bushings"),
    category("Body Parts", "body-parts", CategoryVehicleType::Both, "Mirrors, bumpers, fenders, lights"),
    category("Filters & Fluids", "filters-fluids", CategoryVehicleType::Both, "Oil filters, air filters, coolant, lubricants"),
    category("Transmission", "transmission", CategoryVehicleType::Both, "Clutch plates, gear cables, bearings"),
    category("Exhaust System", "exhaust-system", CategoryVehicleType::Both, "Silencers, catalytic converters, exhaust pipes"),
    category("Tractor Hydraulics", "tractor-hydraulics", CategoryVehicleType::Tractor, "Hydraulic pumps, cylinders, hoses, valves for tractors"),
    category("Tractor PTO & Implements", "tractor-pto-implements", CategoryVehicleType::Tractor, "PTO shafts, couplings, implement parts"),
    category("Tractor Steering", "tractor-steering", CategoryVehicleType::Tractor, "Power steering pumps, steering columns, tie rods"),
    category("Tractor Tyres & Wheels", "tractor-tyres-wheels", CategoryVehicleType::Tractor, "Front & rear tractor tyres, rims, tubes"),
];

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub admin_created: bool,
    pub categories_created: u64,
}

pub async fn run(db: &PgPool, admin_password: &str) -> Result<SeedReport> {
    let mut report = SeedReport::default();
    let password_hash = hash_password(admin_password).map_err(|e| anyhow::anyhow!("hashing admin password: {e}"))?;

    let mut tx = db.begin().await?;
    let inserted = sqlx::query(
        "INSERT INTO users (id, name, email, password_hash, role, phone, address, is_approved) \
         VALUES ($1, 'Admin', $2, $3, 'admin', '+919999999999', $4, TRUE) \
         ON CONFLICT (email) DO NOTHING",
    )
    .bind(Uuid::now_v7())
    .bind(ADMIN_EMAIL)
    .bind(&password_hash)
    .bind(serde_json::json!({
        "street": "42, MG Road, Connaught Place",
        "city": "New Delhi",
        "state": "Delhi",
        "pinCode": "110001",
        "country": "India"
    }))
    .execute(&mut *tx)
    .await
    .context("inserting admin")?;
    report.admin_created = inserted.rows_affected() == 1;

    for c in CATEGORIES {
        let inserted = sqlx::query(
            "INSERT INTO categories (id, name, slug, description, vehicle_type) VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT DO NOTHING",
        )
        .bind(Uuid::now_v7())
        .bind(c.name)
        .bind(c.slug)
        .bind(c.description)
        .bind(c.vehicle_type)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("inserting category {}", c.name))?;
        report.categories_created += inserted.rows_affected();
    }
    tx.commit().await?;

    tracing::info!(admin_created = report.admin_created, categories = report.categories_created, "seed complete");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::Slug;
    use std::collections::HashSet;

    #[test]
    fn test_categories_are_unique() {
        let names: HashSet<_> = CATEGORIES.iter().map(|c| c.name).collect();
        let slugs: HashSet<_> = CATEGORIES.iter().map(|c| c.slug).collect();
        assert_eq!(names.len(), CATEGORIES.len());
        assert_eq!(slugs.len(), CATEGORIES.len());
        assert_eq!(CATEGORIES.iter().filter(|c| c.vehicle_type == CategoryVehicleType::Tractor).count(), 4);
    }

    #[test]
    fn test_slugs_are_canonical() {
        for c in CATEGORIES {
            assert_eq!(Slug::new(c.slug).unwrap().as_str(), c.slug);
        }
    }
}
