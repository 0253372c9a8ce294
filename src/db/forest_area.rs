use crate::db::forest_layer::key_expression;
use crate::domain::model::{AreaKey, AreaUpdate, ForestArea, IndexingStrategy, NewArea};
use crate::geo::crs::BBox;
use crate::geo::wkt::to_wkt;
use crate::utils::error::Result;
use sqlx::types::Json;
use sqlx::{PgConnection, PgExecutor, Postgres, QueryBuilder, Row};
use std::collections::HashMap;
use uuid::Uuid;

/// Rows per INSERT statement; keeps the bind count well below the protocol limit.
const INSERT_CHUNK_SIZE: usize = 500;

const AREA_ATTRIBUTES: &str = "id, layer_id, created_ts, updated_ts, name, description, \
     municipality, region, area_ha::float8 AS area_ha, date, owner, person_responsible, \
     ST_AsGeoJSON(ST_Transform(centroid, 4326))::jsonb AS centroid, \
     original_id, original_properties";

const GEOMETRY_COLUMN: &str = "ST_AsGeoJSON(ST_Transform(geometry, 4326))::jsonb AS geometry";

fn select_areas(with_geometry: bool) -> String {
    let geometry = if with_geometry {
        GEOMETRY_COLUMN
    } else {
        "NULL::jsonb AS geometry"
    };
    format!("SELECT {AREA_ATTRIBUTES}, {geometry} FROM forest_area")
}

pub async fn get_forest_area_by_id<'e, E: PgExecutor<'e>>(
    executor: E,
    id: Uuid,
) -> Result<Option<ForestArea>> {
    let sql = format!("{} WHERE id = $1", select_areas(true));
    Ok(sqlx::query_as::<_, ForestArea>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await?)
}

pub async fn get_all_forest_areas<'e, E: PgExecutor<'e>>(executor: E) -> Result<Vec<ForestArea>> {
    let sql = format!("{} ORDER BY layer_id, name", select_areas(true));
    Ok(sqlx::query_as::<_, ForestArea>(&sql)
        .fetch_all(executor)
        .await?)
}

pub async fn get_forest_areas_by_layer_id<'e, E: PgExecutor<'e>>(
    executor: E,
    layer_id: Uuid,
) -> Result<Vec<ForestArea>> {
    let sql = format!("{} WHERE layer_id = $1 ORDER BY name", select_areas(true));
    Ok(sqlx::query_as::<_, ForestArea>(&sql)
        .bind(layer_id)
        .fetch_all(executor)
        .await?)
}

/// Like [`get_forest_areas_by_layer_id`] but without the full geometry.
pub async fn get_forest_areas_centroids_by_layer_id<'e, E: PgExecutor<'e>>(
    executor: E,
    layer_id: Uuid,
) -> Result<Vec<ForestArea>> {
    let sql = format!("{} WHERE layer_id = $1 ORDER BY name", select_areas(false));
    Ok(sqlx::query_as::<_, ForestArea>(&sql)
        .bind(layer_id)
        .fetch_all(executor)
        .await?)
}

pub async fn get_forest_area_by_name<'e, E: PgExecutor<'e>>(
    executor: E,
    name: &str,
) -> Result<Option<ForestArea>> {
    let sql = format!("{} WHERE name ILIKE $1 LIMIT 1", select_areas(true));
    Ok(sqlx::query_as::<_, ForestArea>(&sql)
        .bind(name)
        .fetch_optional(executor)
        .await?)
}

pub async fn get_forest_areas_by_municipality<'e, E: PgExecutor<'e>>(
    executor: E,
    municipality: &str,
) -> Result<Vec<ForestArea>> {
    let sql = format!("{} WHERE municipality ILIKE $1 ORDER BY name", select_areas(true));
    Ok(sqlx::query_as::<_, ForestArea>(&sql)
        .bind(municipality)
        .fetch_all(executor)
        .await?)
}

pub async fn create_forest_area(
    conn: &mut PgConnection,
    layer_id: Uuid,
    area: &NewArea,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO forest_area (id, layer_id, name, description, municipality, region, \
         area_ha, date, owner, person_responsible, geometry, original_id, original_properties) \
         VALUES ($1, $2, $3, $4, $5, $6, $7::numeric, $8, $9, $10, \
         ST_GeomFromText($11, 3067), $12, $13)",
    )
    .bind(id)
    .bind(layer_id)
    .bind(&area.name)
    .bind(&area.description)
    .bind(&area.municipality)
    .bind(&area.region)
    .bind(area.area_ha)
    .bind(area.date)
    .bind(&area.owner)
    .bind(&area.person_responsible)
    .bind(to_wkt(&area.geometry))
    .bind(&area.original_id)
    .bind(Json(&area.original_properties))
    .execute(&mut *conn)
    .await?;
    Ok(id)
}

/// Bulk insert in chunks. Returns the number of rows written.
pub async fn insert_forest_areas(
    conn: &mut PgConnection,
    layer_id: Uuid,
    areas: &[NewArea],
) -> Result<usize> {
    let mut written = 0;
    for chunk in areas.chunks(INSERT_CHUNK_SIZE) {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO forest_area (id, layer_id, name, description, municipality, region, \
             area_ha, date, owner, person_responsible, geometry, original_id, original_properties) ",
        );
        builder.push_values(chunk, |mut row, area| {
            row.push_bind(Uuid::new_v4())
                .push_bind(layer_id)
                .push_bind(area.name.clone())
                .push_bind(area.description.clone())
                .push_bind(area.municipality.clone())
                .push_bind(area.region.clone())
                .push_bind(area.area_ha)
                .push_unseparated("::numeric")
                .push_bind(area.date)
                .push_bind(area.owner.clone())
                .push_bind(area.person_responsible.clone())
                .push("ST_GeomFromText(")
                .push_bind_unseparated(to_wkt(&area.geometry))
                .push_unseparated(", 3067)")
                .push_bind(area.original_id.clone())
                .push_bind(Json(area.original_properties.clone()));
        });
        let result = builder.build().execute(&mut *conn).await?;
        written += result.rows_affected() as usize;
        tracing::debug!("Inserted {} areas ({} so far)", chunk.len(), written);
    }
    Ok(written)
}

/// Applies the set fields of `update`. `None` when the area does not exist.
pub async fn update_forest_area(
    conn: &mut PgConnection,
    id: Uuid,
    update: &AreaUpdate,
) -> Result<Option<ForestArea>> {
    let updated: Option<Uuid> = sqlx::query_scalar(
        "UPDATE forest_area SET \
           name = COALESCE($2, name), \
           description = COALESCE($3, description), \
           municipality = COALESCE($4, municipality), \
           region = COALESCE($5, region), \
           area_ha = COALESCE($6::numeric, area_ha), \
           date = COALESCE($7, date), \
           owner = COALESCE($8, owner), \
           person_responsible = COALESCE($9, person_responsible), \
           updated_ts = now() \
         WHERE id = $1 RETURNING id",
    )
    .bind(id)
    .bind(&update.name)
    .bind(&update.description)
    .bind(&update.municipality)
    .bind(&update.region)
    .bind(update.area_ha)
    .bind(update.date)
    .bind(&update.owner)
    .bind(&update.person_responsible)
    .fetch_optional(&mut *conn)
    .await?;

    match updated {
        Some(id) => get_forest_area_by_id(&mut *conn, id).await,
        None => Ok(None),
    }
}

/// Overwrites an existing area with re-imported data. Owner and person
/// responsible are kept since imports do not carry them.
pub async fn replace_forest_area(conn: &mut PgConnection, id: Uuid, area: &NewArea) -> Result<()> {
    sqlx::query(
        "UPDATE forest_area SET name = $2, description = $3, municipality = $4, region = $5, \
         area_ha = $6::numeric, date = $7, geometry = ST_GeomFromText($8, 3067), \
         original_id = $9, original_properties = $10, updated_ts = now() \
         WHERE id = $1",
    )
    .bind(id)
    .bind(&area.name)
    .bind(&area.description)
    .bind(&area.municipality)
    .bind(&area.region)
    .bind(area.area_ha)
    .bind(area.date)
    .bind(to_wkt(&area.geometry))
    .bind(&area.original_id)
    .bind(Json(&area.original_properties))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn delete_forest_area_by_id<'e, E: PgExecutor<'e>>(executor: E, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM forest_area WHERE id = $1")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_forest_area_by_layer_id<'e, E: PgExecutor<'e>>(
    executor: E,
    layer_id: Uuid,
) -> Result<u64> {
    let result = sqlx::query("DELETE FROM forest_area WHERE layer_id = $1")
        .bind(layer_id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

/// Deletes the layer's areas whose id is not in `keep`, returning the
/// deleted ids.
pub async fn delete_forest_areas_except<'e, E: PgExecutor<'e>>(
    executor: E,
    layer_id: Uuid,
    keep: &[Uuid],
) -> Result<Vec<Uuid>> {
    Ok(sqlx::query_scalar(
        "DELETE FROM forest_area WHERE layer_id = $1 AND NOT (id = ANY($2)) RETURNING id",
    )
    .bind(layer_id)
    .bind(keep)
    .fetch_all(executor)
    .await?)
}

/// Existing area ids of a layer keyed the way the indexing strategy keys
/// imported records. Rows without a key (no original id) are left out.
pub async fn find_area_ids_by_key<'e, E: PgExecutor<'e>>(
    executor: E,
    layer_id: Uuid,
    strategy: IndexingStrategy,
) -> Result<HashMap<AreaKey, Uuid>> {
    let sql = format!(
        "SELECT id, {} FROM forest_area WHERE layer_id = $1 ORDER BY created_ts",
        key_expression(strategy)
    );
    let rows = sqlx::query(&sql).bind(layer_id).fetch_all(executor).await?;

    let mut keys = HashMap::with_capacity(rows.len());
    for row in rows {
        let id: Uuid = row.try_get(0)?;
        let key = match strategy {
            IndexingStrategy::NameMunicipality => Some(AreaKey::NameMunicipality {
                name: row.try_get(1)?,
                municipality: row.try_get(2)?,
            }),
            IndexingStrategy::Id => row
                .try_get::<Option<String>, _>(1)?
                .filter(|id| !id.is_empty())
                .map(AreaKey::Id),
        };
        if let Some(key) = key {
            // the oldest row wins on duplicate keys
            keys.entry(key).or_insert(id);
        }
    }
    Ok(keys)
}

/// Bounding box of the given areas in EPSG:3067.
pub async fn area_extent_by_ids<'e, E: PgExecutor<'e>>(
    executor: E,
    ids: &[Uuid],
) -> Result<Option<BBox>> {
    if ids.is_empty() {
        return Ok(None);
    }
    let row = sqlx::query(
        "SELECT ST_XMin(e)::float8, ST_YMin(e)::float8, ST_XMax(e)::float8, ST_YMax(e)::float8 \
         FROM (SELECT ST_Extent(geometry) AS e FROM forest_area WHERE id = ANY($1)) s",
    )
    .bind(ids)
    .fetch_one(executor)
    .await?;
    extent_from_row(&row)
}

pub async fn area_extent_by_layer_id<'e, E: PgExecutor<'e>>(
    executor: E,
    layer_id: Uuid,
) -> Result<Option<BBox>> {
    let row = sqlx::query(
        "SELECT ST_XMin(e)::float8, ST_YMin(e)::float8, ST_XMax(e)::float8, ST_YMax(e)::float8 \
         FROM (SELECT ST_Extent(geometry) AS e FROM forest_area WHERE layer_id = $1) s",
    )
    .bind(layer_id)
    .fetch_one(executor)
    .await?;
    extent_from_row(&row)
}

fn extent_from_row(row: &sqlx::postgres::PgRow) -> Result<Option<BBox>> {
    let min_x: Option<f64> = row.try_get(0)?;
    let min_y: Option<f64> = row.try_get(1)?;
    let max_x: Option<f64> = row.try_get(2)?;
    let max_y: Option<f64> = row.try_get(3)?;
    Ok(match (min_x, min_y, max_x, max_y) {
        (Some(a), Some(b), Some(c), Some(d)) => Some(BBox::new(a, b, c, d)),
        _ => None,
    })
}
