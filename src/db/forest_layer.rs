use crate::db::{layer_hex, truncate_identifier};
use crate::domain::model::{ForestLayer, IndexingStrategy, LayerUpdate, NewLayer};
use crate::utils::error::Result;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{PgConnection, PgExecutor, PgPool};
use uuid::Uuid;

const LAYER_COLUMNS: &str = "id, created_ts, updated_ts, is_hidden, col_options, name, \
                             color_code, symbol, description, original_properties";

pub fn get_index_name_for_id(id: Uuid) -> String {
    truncate_identifier(&format!("idx_forest_area_geom_layer_{}", layer_hex(id)))
}

pub fn get_attribute_index_name(id: Uuid, strategy: IndexingStrategy) -> String {
    let prefix = match strategy {
        IndexingStrategy::NameMunicipality => "idx_forest_area_name_municipality_layer",
        IndexingStrategy::Id => "idx_forest_area_original_id_layer",
    };
    truncate_identifier(&format!("{prefix}_{}", layer_hex(id)))
}

/// Key expressions shared by the attribute index and the key lookups so
/// the planner can use the index.
pub(crate) fn key_expression(strategy: IndexingStrategy) -> &'static str {
    match strategy {
        IndexingStrategy::NameMunicipality => {
            "lower(btrim(name)), lower(btrim(coalesce(municipality, '')))"
        }
        IndexingStrategy::Id => "btrim(original_id)",
    }
}

pub async fn get_forest_layer_by_id<'e, E: PgExecutor<'e>>(
    executor: E,
    id: Uuid,
) -> Result<Option<ForestLayer>> {
    let sql = format!("SELECT {LAYER_COLUMNS} FROM forest_layer WHERE id = $1");
    Ok(sqlx::query_as::<_, ForestLayer>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await?)
}

pub async fn get_all_forest_layers<'e, E: PgExecutor<'e>>(executor: E) -> Result<Vec<ForestLayer>> {
    let sql = format!("SELECT {LAYER_COLUMNS} FROM forest_layer ORDER BY created_ts, name");
    Ok(sqlx::query_as::<_, ForestLayer>(&sql)
        .fetch_all(executor)
        .await?)
}

pub async fn get_forest_layer_by_name<'e, E: PgExecutor<'e>>(
    executor: E,
    name: &str,
) -> Result<Option<ForestLayer>> {
    let sql = format!(
        "SELECT {LAYER_COLUMNS} FROM forest_layer WHERE name ILIKE $1 ORDER BY created_ts LIMIT 1"
    );
    Ok(sqlx::query_as::<_, ForestLayer>(&sql)
        .bind(name)
        .fetch_optional(executor)
        .await?)
}

pub async fn get_forest_layers_by_symbol<'e, E: PgExecutor<'e>>(
    executor: E,
    symbol: &str,
) -> Result<Vec<ForestLayer>> {
    let sql = format!(
        "SELECT {LAYER_COLUMNS} FROM forest_layer WHERE symbol ILIKE $1 ORDER BY created_ts"
    );
    Ok(sqlx::query_as::<_, ForestLayer>(&sql)
        .bind(symbol)
        .fetch_all(executor)
        .await?)
}

/// Inserts the layer and its partial spatial and attribute indexes.
pub async fn create_forest_layer(pool: &PgPool, layer: &NewLayer) -> Result<ForestLayer> {
    let id = Uuid::new_v4();
    let mut tx = pool.begin().await?;

    let sql = format!(
        "INSERT INTO forest_layer \
         (id, is_hidden, col_options, name, color_code, symbol, description, original_properties) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING {LAYER_COLUMNS}"
    );
    let created = sqlx::query_as::<_, ForestLayer>(&sql)
        .bind(id)
        .bind(layer.is_hidden)
        .bind(Json(&layer.col_options))
        .bind(&layer.name)
        .bind(&layer.color_code)
        .bind(&layer.symbol)
        .bind(&layer.description)
        .bind(&layer.original_properties)
        .fetch_one(&mut *tx)
        .await?;

    create_layer_indexes(&mut tx, id, layer.col_options.indexing_strategy).await?;
    tx.commit().await?;

    tracing::info!("🗂️ Created forest layer {} ({})", created.name, created.id);
    Ok(created)
}

async fn create_layer_indexes(
    conn: &mut PgConnection,
    id: Uuid,
    strategy: IndexingStrategy,
) -> Result<()> {
    // DDL can't take bind parameters; the id is a formatted Uuid.
    let spatial = format!(
        "CREATE INDEX IF NOT EXISTS {} ON forest_area USING GIST (geometry) WHERE layer_id = '{id}'",
        get_index_name_for_id(id)
    );
    sqlx::query(&spatial).execute(&mut *conn).await?;

    let attribute = format!(
        "CREATE INDEX IF NOT EXISTS {} ON forest_area ({}) WHERE layer_id = '{id}'",
        get_attribute_index_name(id, strategy),
        key_expression(strategy)
    );
    sqlx::query(&attribute).execute(&mut *conn).await?;
    Ok(())
}

async fn drop_layer_indexes(conn: &mut PgConnection, id: Uuid) -> Result<()> {
    let names = [
        get_index_name_for_id(id),
        get_attribute_index_name(id, IndexingStrategy::NameMunicipality),
        get_attribute_index_name(id, IndexingStrategy::Id),
    ];
    for name in names {
        sqlx::query(&format!("DROP INDEX IF EXISTS {name}"))
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Applies the set fields of `update`. `None` when the layer does not exist.
pub async fn update_forest_layer<'e, E: PgExecutor<'e>>(
    executor: E,
    id: Uuid,
    update: &LayerUpdate,
) -> Result<Option<ForestLayer>> {
    let sql = format!(
        "UPDATE forest_layer SET \
           name = COALESCE($2, name), \
           description = COALESCE($3, description), \
           is_hidden = COALESCE($4, is_hidden), \
           color_code = COALESCE($5, color_code), \
           symbol = COALESCE($6, symbol), \
           updated_ts = now() \
         WHERE id = $1 \
         RETURNING {LAYER_COLUMNS}"
    );
    Ok(sqlx::query_as::<_, ForestLayer>(&sql)
        .bind(id)
        .bind(&update.name)
        .bind(&update.description)
        .bind(update.is_hidden)
        .bind(&update.color_code)
        .bind(&update.symbol)
        .fetch_optional(executor)
        .await?)
}

pub async fn set_original_properties<'e, E: PgExecutor<'e>>(
    executor: E,
    id: Uuid,
    properties: &Value,
) -> Result<()> {
    sqlx::query(
        "UPDATE forest_layer SET original_properties = $2, updated_ts = now() WHERE id = $1",
    )
    .bind(id)
    .bind(properties)
    .execute(executor)
    .await?;
    Ok(())
}

/// Deletes the layer's areas, indexes and row. False when there was no
/// such layer.
pub async fn delete_forest_layer_by_id(pool: &PgPool, id: Uuid) -> Result<bool> {
    let mut tx = pool.begin().await?;

    let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM forest_layer WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
    if exists.is_none() {
        return Ok(false);
    }

    crate::db::forest_area::delete_forest_area_by_layer_id(&mut *tx, id).await?;
    drop_layer_indexes(&mut tx, id).await?;
    sqlx::query("DELETE FROM forest_layer WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    tracing::info!("🗑️ Deleted forest layer {}", id);
    Ok(true)
}
