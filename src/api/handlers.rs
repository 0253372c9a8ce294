use crate::api::auth::{Editor, OptionalEditor};
use crate::api::forms::{FormData, LayerUpdatePayload};
use crate::api::geojson::{area_detail_feature, area_feature, centroid_feature, feature_collection};
use crate::api::AppState;
use crate::db::{forest_area, forest_layer, picture};
use crate::domain::model::{AreaUpdate, ForestLayer, Picture, ReplaceSummary};
use crate::utils::error::{AppError, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, Path, State};
use axum::Json;
use serde_json::{json, Value};
use std::collections::HashMap;
use uuid::Uuid;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Layer as JSON. `is_hidden` is only shown to editors.
fn layer_json(layer: &ForestLayer, is_editor: bool) -> Result<Value> {
    let mut value = serde_json::to_value(layer)?;
    if !is_editor {
        if let Some(object) = value.as_object_mut() {
            object.remove("is_hidden");
        }
    }
    Ok(value)
}

fn urls_by_area(pictures: &[Picture]) -> HashMap<Uuid, Vec<&str>> {
    let mut urls: HashMap<Uuid, Vec<&str>> = HashMap::new();
    for picture in pictures {
        urls.entry(picture.forest_area_id)
            .or_default()
            .push(picture.bucket_url.as_str());
    }
    urls
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn list_layers(
    State(state): State<AppState>,
    editor: OptionalEditor,
) -> Result<Json<Vec<Value>>> {
    let layers = forest_layer::get_all_forest_layers(state.pool()).await?;
    let layers = layers
        .iter()
        .filter(|layer| editor.is_editor || !layer.is_hidden)
        .map(|layer| layer_json(layer, editor.is_editor))
        .collect::<Result<Vec<_>>>()?;
    Ok(Json(layers))
}

pub async fn get_layer(
    State(state): State<AppState>,
    editor: OptionalEditor,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>> {
    let layer = state.layers.visible_layer(id, editor.is_editor).await?;
    Ok(Json(layer_json(&layer, editor.is_editor)?))
}

pub async fn create_layer(
    State(state): State<AppState>,
    _editor: Editor,
    multipart: Multipart,
) -> Result<Json<Value>> {
    let mut form = FormData::read(multipart).await?;
    let zip_file = form.take_file("zip_file")?;
    let new_layer = form.new_layer()?;

    tracing::info!(
        "📥 Creating layer '{}' from {}",
        new_layer.name,
        zip_file.filename.as_deref().unwrap_or("upload")
    );
    let layer = state
        .layers
        .create_layer_from_shapefile(&new_layer, zip_file.data.to_vec())
        .await?;
    Ok(Json(layer_json(&layer, true)?))
}

pub async fn update_layer(
    State(state): State<AppState>,
    _editor: Editor,
    Path(id): Path<Uuid>,
    LayerUpdatePayload(update): LayerUpdatePayload,
) -> Result<Json<Value>> {
    let layer = state.layers.update_layer(id, &update).await?;
    Ok(Json(layer_json(&layer, true)?))
}

pub async fn replace_layer_areas(
    State(state): State<AppState>,
    _editor: Editor,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> Result<Json<ReplaceSummary>> {
    let mut form = FormData::read(multipart).await?;
    let zip_file = form.take_file("zip_file")?;
    let summary = state
        .layers
        .replace_layer_areas(id, zip_file.data.to_vec())
        .await?;
    Ok(Json(summary))
}

pub async fn delete_layer(
    State(state): State<AppState>,
    _editor: Editor,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>> {
    state.layers.delete_layer(id).await?;
    Ok(Json(json!({ "deleted": true })))
}

pub async fn get_layer_areas(
    State(state): State<AppState>,
    editor: OptionalEditor,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>> {
    state.layers.visible_layer(id, editor.is_editor).await?;
    let areas = forest_area::get_forest_areas_by_layer_id(state.pool(), id).await?;
    let pictures = picture::get_visible_pictures_by_layer_id(state.pool(), id).await?;
    let urls = urls_by_area(&pictures);

    let features = areas
        .iter()
        .map(|area| area_feature(area, urls.get(&area.id).map_or(&[][..], Vec::as_slice)))
        .collect();
    Ok(Json(feature_collection(features)))
}

pub async fn get_layer_centroids(
    State(state): State<AppState>,
    editor: OptionalEditor,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>> {
    state.layers.visible_layer(id, editor.is_editor).await?;
    let areas = forest_area::get_forest_areas_centroids_by_layer_id(state.pool(), id).await?;
    let pictures = picture::get_visible_pictures_by_layer_id(state.pool(), id).await?;
    let urls = urls_by_area(&pictures);

    let features = areas
        .iter()
        .map(|area| centroid_feature(area, urls.get(&area.id).map_or(&[][..], Vec::as_slice)))
        .collect();
    Ok(Json(feature_collection(features)))
}

pub async fn get_area(
    State(state): State<AppState>,
    editor: OptionalEditor,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>> {
    let area = state.layers.visible_area(id, editor.is_editor).await?;
    let mut pictures = picture::get_pictures_by_area_id(state.pool(), id).await?;
    if !editor.is_editor {
        pictures.retain(|p| p.is_visible);
    }
    Ok(Json(area_detail_feature(&area, &pictures)))
}

pub async fn update_area(
    State(state): State<AppState>,
    _editor: Editor,
    Path(id): Path<Uuid>,
    payload: std::result::Result<Json<AreaUpdate>, JsonRejection>,
) -> Result<Json<Value>> {
    let Json(update) = payload.map_err(|e| AppError::unprocessable(e.body_text()))?;
    let area = state.layers.update_area(id, &update).await?;
    let pictures = picture::get_pictures_by_area_id(state.pool(), id).await?;
    Ok(Json(area_detail_feature(&area, &pictures)))
}

pub async fn delete_area(
    State(state): State<AppState>,
    _editor: Editor,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>> {
    state.layers.delete_area(id).await?;
    Ok(Json(json!({ "deleted": true })))
}

pub async fn add_picture(
    State(state): State<AppState>,
    _editor: Editor,
    Path(area_id): Path<Uuid>,
    multipart: Multipart,
) -> Result<Json<Picture>> {
    let mut form = FormData::read(multipart).await?;
    let file = form.take_file("file")?;
    let name = form.text("name");
    let content_type = file
        .content_type
        .clone()
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

    let picture = state
        .layers
        .add_picture(
            area_id,
            file.filename.as_deref(),
            &content_type,
            file.data.to_vec(),
            name.as_deref(),
        )
        .await?;
    Ok(Json(picture))
}

pub async fn delete_picture(
    State(state): State<AppState>,
    _editor: Editor,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>> {
    state.layers.delete_picture(id).await?;
    Ok(Json(json!({ "deleted": true })))
}
