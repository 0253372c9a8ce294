//! Per-layer views that GeoServer publishes as feature types.

use crate::db::layer_hex;
use crate::utils::error::Result;
use sqlx::PgConnection;
use uuid::Uuid;

pub fn area_view_name(layer_id: Uuid) -> String {
    format!("forest_areas_{}", layer_hex(layer_id))
}

pub fn centroid_view_name(layer_id: Uuid) -> String {
    format!("{}_centroid", area_view_name(layer_id))
}

fn area_view_sql(layer_id: Uuid) -> String {
    format!(
        r#"CREATE OR REPLACE VIEW "{}" AS
        SELECT id, name, geometry
        FROM forest_area
        WHERE layer_id = '{layer_id}'"#,
        area_view_name(layer_id)
    )
}

fn centroid_view_sql(layer_id: Uuid) -> String {
    format!(
        r#"CREATE OR REPLACE VIEW "{}" AS
        SELECT
            fa.id,
            fa.name,
            fa.created_ts,
            fa.updated_ts,
            fa.description,
            fa.municipality,
            fa.region,
            fa.area_ha,
            fa.date,
            fa.centroid AS geometry,
            jsonb_agg(p.bucket_url ORDER BY p.date_added)
                FILTER (WHERE p.id IS NOT NULL AND p.is_visible) AS pictures
        FROM forest_area fa
        LEFT JOIN picture p ON fa.id = p.forest_area_id
        WHERE fa.layer_id = '{layer_id}' AND fa.centroid IS NOT NULL
        GROUP BY fa.id"#,
        centroid_view_name(layer_id)
    )
}

pub async fn create_layer_views(conn: &mut PgConnection, layer_id: Uuid) -> Result<()> {
    sqlx::query(&area_view_sql(layer_id))
        .execute(&mut *conn)
        .await?;
    sqlx::query(&centroid_view_sql(layer_id))
        .execute(&mut *conn)
        .await?;
    tracing::debug!("Created views for layer {}", layer_id);
    Ok(())
}

pub async fn drop_layer_views(conn: &mut PgConnection, layer_id: Uuid) -> Result<()> {
    for name in [centroid_view_name(layer_id), area_view_name(layer_id)] {
        sqlx::query(&format!(r#"DROP VIEW IF EXISTS "{name}" CASCADE"#))
            .execute(&mut *conn)
            .await?;
    }
    tracing::debug!("Dropped views for layer {}", layer_id);
    Ok(())
}
