use crate::domain::model::Picture;
use crate::utils::error::Result;
use sqlx::PgExecutor;
use uuid::Uuid;

const PICTURE_COLUMNS: &str =
    "id, forest_area_id, bucket_url, object_path, is_visible, date_added, name";

pub struct NewPicture<'a> {
    pub id: Uuid,
    pub forest_area_id: Uuid,
    pub bucket_url: &'a str,
    pub object_path: &'a str,
    pub name: Option<&'a str>,
}

pub async fn add_picture<'e, E: PgExecutor<'e>>(
    executor: E,
    picture: &NewPicture<'_>,
) -> Result<Picture> {
    let sql = format!(
        "INSERT INTO picture (id, forest_area_id, bucket_url, object_path, name) \
         VALUES ($1, $2, $3, $4, $5) RETURNING {PICTURE_COLUMNS}"
    );
    Ok(sqlx::query_as::<_, Picture>(&sql)
        .bind(picture.id)
        .bind(picture.forest_area_id)
        .bind(picture.bucket_url)
        .bind(picture.object_path)
        .bind(picture.name)
        .fetch_one(executor)
        .await?)
}

pub async fn get_picture_by_id<'e, E: PgExecutor<'e>>(executor: E, id: Uuid) -> Result<Option<Picture>> {
    let sql = format!("SELECT {PICTURE_COLUMNS} FROM picture WHERE id = $1");
    Ok(sqlx::query_as::<_, Picture>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await?)
}

pub async fn get_pictures_by_area_id<'e, E: PgExecutor<'e>>(
    executor: E,
    forest_area_id: Uuid,
) -> Result<Vec<Picture>> {
    let sql = format!(
        "SELECT {PICTURE_COLUMNS} FROM picture WHERE forest_area_id = $1 ORDER BY date_added"
    );
    Ok(sqlx::query_as::<_, Picture>(&sql)
        .bind(forest_area_id)
        .fetch_all(executor)
        .await?)
}

/// Visible pictures of every area in a layer, for feature collections.
pub async fn get_visible_pictures_by_layer_id<'e, E: PgExecutor<'e>>(
    executor: E,
    layer_id: Uuid,
) -> Result<Vec<Picture>> {
    Ok(sqlx::query_as::<_, Picture>(
        "SELECT p.id, p.forest_area_id, p.bucket_url, p.object_path, p.is_visible, \
         p.date_added, p.name \
         FROM picture p JOIN forest_area fa ON fa.id = p.forest_area_id \
         WHERE fa.layer_id = $1 AND p.is_visible \
         ORDER BY p.date_added",
    )
    .bind(layer_id)
    .fetch_all(executor)
    .await?)
}

pub async fn delete_picture<'e, E: PgExecutor<'e>>(executor: E, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM picture WHERE id = $1")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}
