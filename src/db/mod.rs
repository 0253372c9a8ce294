//! PostGIS persistence. Geometry is stored in EPSG:3067 and handed out as
//! GeoJSON in EPSG:4326.

pub mod forest_area;
pub mod forest_layer;
pub mod picture;
pub mod storage_jobs;
pub mod views;

use crate::config::Settings;
use crate::utils::error::Result;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use uuid::Uuid;

/// Postgres truncates identifiers longer than this.
pub const MAX_IDENTIFIER_LEN: usize = 63;

pub async fn connect(settings: &Settings) -> Result<PgPool> {
    let db = settings.database();
    tracing::info!("🔌 Connecting to database {} at {}:{}", db.db, db.host, db.port);
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&db.url())
        .await?;
    Ok(pool)
}

/// A pool that only connects when first used.
pub fn connect_lazy(url: &str) -> Result<PgPool> {
    Ok(PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect_lazy(url)?)
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    tracing::info!("🗄️ Running database migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("✅ Migrations applied");
    Ok(())
}

/// Layer id as 32 hex digits, the form used in index and view names.
pub fn layer_hex(id: Uuid) -> String {
    id.simple().to_string()
}

pub fn truncate_identifier(name: &str) -> String {
    name.chars().take(MAX_IDENTIFIER_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_hex() {
        let id = Uuid::parse_str("0b6c2f0e-4a57-4d0e-9c59-0f0d6b3e2a11").unwrap();
        assert_eq!(layer_hex(id), "0b6c2f0e4a574d0e9c590f0d6b3e2a11");
    }

    #[test]
    fn test_truncate_identifier() {
        let long = format!("idx_forest_area_name_municipality_layer_{}", "a".repeat(32));
        assert_eq!(truncate_identifier(&long).len(), MAX_IDENTIFIER_LEN);
        assert_eq!(truncate_identifier("short"), "short");
    }
}
