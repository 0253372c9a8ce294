//! Layer, area and picture workflows spanning PostGIS, GeoServer and the
//! object storage.

use crate::adapters::bucket::picture_object_path;
use crate::core::import::{DbAreaSink, ImportEngine, ImportReport, ShapefilePipeline};
use crate::db::{forest_area, forest_layer, picture, storage_jobs, views};
use crate::domain::model::{
    AreaKey, AreaUpdate, ColOptions, ForestArea, ForestLayer, IndexingStrategy, LayerUpdate,
    NewArea, NewLayer, Picture, ReplaceSummary,
};
use crate::domain::ports::{MapPublisher, ObjectStorage};
use crate::geo::crs::BBox;
use crate::utils::error::{AppError, Result};
use crate::utils::validation::Validate;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Storage prefix holding every picture of a layer.
pub fn layer_storage_prefix(layer_id: Uuid) -> String {
    format!("{layer_id}/")
}

pub fn area_storage_prefix(layer_id: Uuid, area_id: Uuid) -> String {
    format!("{layer_id}/{area_id}/")
}

/// How re-imported areas map onto the rows already in a layer.
#[derive(Debug, Default)]
pub struct ReplacePlan {
    pub updates: Vec<(Uuid, NewArea)>,
    pub inserts: Vec<NewArea>,
}

impl ReplacePlan {
    pub fn kept_ids(&self) -> Vec<Uuid> {
        self.updates.iter().map(|(id, _)| *id).collect()
    }
}

/// Matches `areas` against `existing` keys. Each existing row is matched at
/// most once; areas without a key are always inserted.
pub fn plan_replacement(
    mut existing: HashMap<AreaKey, Uuid>,
    areas: Vec<NewArea>,
    strategy: IndexingStrategy,
) -> ReplacePlan {
    let mut plan = ReplacePlan::default();
    for area in areas {
        match area.key(strategy).and_then(|key| existing.remove(&key)) {
            Some(id) => plan.updates.push((id, area)),
            None => plan.inserts.push(area),
        }
    }
    plan
}

#[derive(Clone)]
pub struct LayerService {
    pool: PgPool,
    publisher: Arc<dyn MapPublisher>,
    storage: Arc<dyn ObjectStorage>,
}

impl LayerService {
    pub fn new(
        pool: PgPool,
        publisher: Arc<dyn MapPublisher>,
        storage: Arc<dyn ObjectStorage>,
    ) -> Self {
        Self {
            pool,
            publisher,
            storage,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn require_layer(&self, id: Uuid) -> Result<ForestLayer> {
        forest_layer::get_forest_layer_by_id(&self.pool, id)
            .await?
            .ok_or_else(|| AppError::not_found("Layer not found"))
    }

    async fn require_area(&self, id: Uuid) -> Result<ForestArea> {
        forest_area::get_forest_area_by_id(&self.pool, id)
            .await?
            .ok_or_else(|| AppError::not_found("Forest area not found"))
    }

    /// The layer when the caller may see it: hidden layers are for editors.
    pub async fn visible_layer(&self, id: Uuid, is_editor: bool) -> Result<ForestLayer> {
        let layer = self.require_layer(id).await?;
        if layer.is_hidden && !is_editor {
            return Err(AppError::Forbidden {
                message: "Layer is hidden".to_string(),
            });
        }
        Ok(layer)
    }

    /// The area when its layer is visible to the caller.
    pub async fn visible_area(&self, id: Uuid, is_editor: bool) -> Result<ForestArea> {
        let area = self.require_area(id).await?;
        self.visible_layer(area.layer_id, is_editor).await?;
        Ok(area)
    }

    /// Creates the layer row and imports the archive into it, without
    /// publishing. A failed import removes the layer again.
    pub async fn import_layer(
        &self,
        layer: &NewLayer,
        archive: Vec<u8>,
    ) -> Result<(ForestLayer, ImportReport)> {
        layer.validate()?;
        let created = forest_layer::create_forest_layer(&self.pool, layer).await?;

        let pipeline = ShapefilePipeline::new(
            archive,
            created.id,
            layer.col_options.clone(),
            DbAreaSink::new(self.pool.clone()),
        );
        let report = match ImportEngine::new(pipeline).run().await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("❌ Import into layer {} failed: {}", created.id, e);
                self.rollback_layer(created.id).await;
                return Err(e);
            }
        };

        match self.finish_import(created.id, &report).await {
            Ok(layer) => Ok((layer, report)),
            Err(e) => {
                tracing::error!("❌ Finishing import of layer {} failed: {}", created.id, e);
                self.rollback_layer(created.id).await;
                Err(e)
            }
        }
    }

    async fn finish_import(&self, id: Uuid, report: &ImportReport) -> Result<ForestLayer> {
        forest_layer::set_original_properties(&self.pool, id, &report.layer_properties()).await?;
        let mut conn = self.pool.acquire().await?;
        views::create_layer_views(&mut conn, id).await?;
        drop(conn);
        self.require_layer(id).await
    }

    /// Imports the archive as a new layer and publishes it on GeoServer with
    /// the requested visibility.
    pub async fn create_layer_from_shapefile(
        &self,
        layer: &NewLayer,
        archive: Vec<u8>,
    ) -> Result<ForestLayer> {
        let (created, report) = self.import_layer(layer, archive).await?;

        if let Err(e) = self
            .publisher
            .publish_layer(created.id, &created.name, created.is_hidden)
            .await
        {
            tracing::error!("❌ Publishing layer {} failed: {}", created.id, e);
            self.rollback_layer(created.id).await;
            return Err(e);
        }

        tracing::info!(
            "✅ Layer '{}' created with {} areas",
            created.name,
            report.written
        );
        Ok(created)
    }

    async fn rollback_layer(&self, id: Uuid) {
        if let Err(e) = self.drop_db_layer(id).await {
            tracing::error!("❌ Rolling back layer {} failed: {}", id, e);
        }
    }

    async fn drop_db_layer(&self, id: Uuid) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        views::drop_layer_views(&mut conn, id).await?;
        drop(conn);
        forest_layer::delete_forest_layer_by_id(&self.pool, id).await
    }

    pub async fn update_layer(&self, id: Uuid, update: &LayerUpdate) -> Result<ForestLayer> {
        update.validate()?;
        let existing = self.require_layer(id).await?;
        if update.is_empty() {
            return Ok(existing);
        }

        // the row change is only committed once GeoServer agrees
        let mut tx = self.pool.begin().await?;
        let updated = forest_layer::update_forest_layer(&mut *tx, id, update)
            .await?
            .ok_or_else(|| AppError::not_found("Layer not found"))?;

        if updated.is_hidden != existing.is_hidden {
            if let Err(e) = self
                .publisher
                .set_layer_visibility(id, updated.is_hidden)
                .await
            {
                tracing::error!("❌ Changing visibility of layer {} failed: {}", id, e);
                // one of the two rules may already have changed
                if let Err(restore) = self
                    .publisher
                    .set_layer_visibility(id, existing.is_hidden)
                    .await
                {
                    tracing::warn!("⚠️ Restoring visibility of layer {} failed: {}", id, restore);
                }
                return Err(e);
            }
            tracing::info!(
                "👁️ Layer {} is now {}",
                id,
                if updated.is_hidden { "hidden" } else { "public" }
            );
        }
        tx.commit().await?;
        Ok(updated)
    }

    /// Re-imports an archive into an existing layer. Matching areas are
    /// updated, new ones inserted and the rest deleted.
    pub async fn replace_layer_areas(&self, id: Uuid, archive: Vec<u8>) -> Result<ReplaceSummary> {
        let layer = self.require_layer(id).await?;
        let options: ColOptions = layer.column_options();
        let strategy = options.indexing_strategy;

        let pipeline =
            ShapefilePipeline::new(archive, id, options, DbAreaSink::new(self.pool.clone()));
        let (report, areas) = ImportEngine::new(pipeline).prepare().await?;

        let mut tx = self.pool.begin().await?;
        let old_extent = forest_area::area_extent_by_layer_id(&mut *tx, id).await?;
        let existing = forest_area::find_area_ids_by_key(&mut *tx, id, strategy).await?;

        let plan = plan_replacement(existing, areas, strategy);
        for (area_id, area) in &plan.updates {
            forest_area::replace_forest_area(&mut tx, *area_id, area).await?;
        }
        let deleted = forest_area::delete_forest_areas_except(&mut *tx, id, &plan.kept_ids()).await?;
        let inserted = forest_area::insert_forest_areas(&mut tx, id, &plan.inserts).await?;
        for area_id in &deleted {
            storage_jobs::enqueue_deletion(&mut *tx, &area_storage_prefix(id, *area_id)).await?;
        }
        forest_layer::set_original_properties(&mut *tx, id, &report.layer_properties()).await?;
        tx.commit().await?;

        let new_extent = forest_area::area_extent_by_layer_id(&self.pool, id).await?;
        self.invalidate(id, union_extent(old_extent, new_extent)).await;

        let summary = ReplaceSummary {
            updated: plan.updates.len(),
            inserted,
            deleted: deleted.len(),
        };
        tracing::info!(
            "🔁 Replaced areas of layer {}: {} updated, {} inserted, {} deleted",
            id,
            summary.updated,
            summary.inserted,
            summary.deleted
        );
        Ok(summary)
    }

    /// Unpublishes and deletes the layer and queues its pictures for
    /// deletion. GeoServer failures are logged and do not block the delete.
    pub async fn delete_layer(&self, id: Uuid) -> Result<()> {
        self.require_layer(id).await?;

        if let Err(e) = self.publisher.unpublish_layer(id).await {
            tracing::warn!("⚠️ Unpublishing layer {} failed: {}", id, e);
        }
        if !self.drop_db_layer(id).await? {
            return Err(AppError::not_found("Layer not found"));
        }
        storage_jobs::enqueue_deletion(&self.pool, &layer_storage_prefix(id)).await?;
        Ok(())
    }

    pub async fn update_area(&self, id: Uuid, update: &AreaUpdate) -> Result<ForestArea> {
        update.validate()?;
        let mut conn = self.pool.acquire().await?;
        let area = forest_area::update_forest_area(&mut conn, id, update)
            .await?
            .ok_or_else(|| AppError::not_found("Forest area not found"))?;
        drop(conn);

        let extent = forest_area::area_extent_by_ids(&self.pool, &[id]).await?;
        self.invalidate(area.layer_id, extent).await;
        Ok(area)
    }

    pub async fn delete_area(&self, id: Uuid) -> Result<()> {
        let area = self.require_area(id).await?;
        let extent = forest_area::area_extent_by_ids(&self.pool, &[id]).await?;

        let mut tx = self.pool.begin().await?;
        if !forest_area::delete_forest_area_by_id(&mut *tx, id).await? {
            return Err(AppError::not_found("Forest area not found"));
        }
        storage_jobs::enqueue_deletion(&mut *tx, &area_storage_prefix(area.layer_id, id)).await?;
        tx.commit().await?;

        self.invalidate(area.layer_id, extent).await;
        tracing::info!("🗑️ Deleted forest area {}", id);
        Ok(())
    }

    /// Uploads the picture and records it. The upload is removed again when
    /// the database insert fails.
    pub async fn add_picture(
        &self,
        area_id: Uuid,
        filename: Option<&str>,
        content_type: &str,
        data: Vec<u8>,
        name: Option<&str>,
    ) -> Result<Picture> {
        let area = self.require_area(area_id).await?;
        let picture_id = Uuid::new_v4();
        let object_path = picture_object_path(area.layer_id, area_id, picture_id, filename)?;

        let bucket_url = self.storage.upload(&object_path, data, content_type).await?;
        let new_picture = picture::NewPicture {
            id: picture_id,
            forest_area_id: area_id,
            bucket_url: &bucket_url,
            object_path: &object_path,
            name,
        };
        let created = match picture::add_picture(&self.pool, &new_picture).await {
            Ok(created) => created,
            Err(e) => {
                if let Err(cleanup) = self.storage.delete_object(&object_path).await {
                    tracing::warn!("⚠️ Removing orphaned upload {} failed: {}", object_path, cleanup);
                }
                return Err(e);
            }
        };

        let extent = forest_area::area_extent_by_ids(&self.pool, &[area_id]).await?;
        self.invalidate(area.layer_id, extent).await;
        Ok(created)
    }

    pub async fn delete_picture(&self, id: Uuid) -> Result<()> {
        let existing = picture::get_picture_by_id(&self.pool, id)
            .await?
            .ok_or_else(|| AppError::not_found("Picture not found"))?;
        let area = self.require_area(existing.forest_area_id).await?;

        picture::delete_picture(&self.pool, id).await?;
        if let Err(e) = self.storage.delete_object(&existing.object_path).await {
            tracing::warn!("⚠️ Deleting object {} failed: {}", existing.object_path, e);
        }

        let extent = forest_area::area_extent_by_ids(&self.pool, &[area.id]).await?;
        self.invalidate(area.layer_id, extent).await;
        Ok(())
    }

    async fn invalidate(&self, layer_id: Uuid, extent: Option<BBox>) {
        let Some(bbox) = extent else {
            return;
        };
        if let Err(e) = self.publisher.invalidate_cache(layer_id, bbox).await {
            tracing::warn!("⚠️ Cache invalidation for layer {} failed: {}", layer_id, e);
        }
    }
}

fn union_extent(a: Option<BBox>, b: Option<BBox>) -> Option<BBox> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.union(&b)),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;
    use serde_json::Map;

    fn area(name: &str, municipality: Option<&str>, original_id: Option<&str>) -> NewArea {
        NewArea {
            name: name.to_string(),
            description: None,
            municipality: municipality.map(str::to_string),
            region: None,
            area_ha: None,
            date: None,
            owner: None,
            person_responsible: None,
            geometry: polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0)].into(),
            original_id: original_id.map(str::to_string),
            original_properties: Map::new(),
        }
    }

    #[test]
    fn test_storage_prefixes() {
        let id = Uuid::nil();
        assert_eq!(layer_storage_prefix(id), format!("{id}/"));
        assert_eq!(area_storage_prefix(id, id), format!("{id}/{id}/"));
    }

    #[test]
    fn test_plan_replacement_by_name_and_municipality() {
        let kept = Uuid::new_v4();
        let mut existing = HashMap::new();
        existing.insert(
            AreaKey::NameMunicipality {
                name: "kuusikko".to_string(),
                municipality: "hämeenlinna".to_string(),
            },
            kept,
        );
        existing.insert(
            AreaKey::NameMunicipality {
                name: "vanha".to_string(),
                municipality: String::new(),
            },
            Uuid::new_v4(),
        );

        let plan = plan_replacement(
            existing,
            vec![
                area(" Kuusikko ", Some("HÄMEENLINNA"), None),
                area("Lehto", Some("Hattula"), None),
            ],
            IndexingStrategy::NameMunicipality,
        );
        assert_eq!(plan.kept_ids(), vec![kept]);
        assert_eq!(plan.inserts.len(), 1);
        assert_eq!(plan.inserts[0].name, "Lehto");
    }

    #[test]
    fn test_plan_replacement_by_id() {
        let kept = Uuid::new_v4();
        let mut existing = HashMap::new();
        existing.insert(AreaKey::Id("42".to_string()), kept);

        let plan = plan_replacement(
            existing,
            vec![
                area("A", None, Some(" 42 ")),
                area("B", None, Some("42")),
                area("C", None, None),
            ],
            IndexingStrategy::Id,
        );
        // an existing row is matched once, the duplicate and keyless go in as new
        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].1.name, "A");
        assert_eq!(plan.inserts.len(), 2);
    }

    #[test]
    fn test_union_extent() {
        let a = BBox::new(0.0, 0.0, 1.0, 1.0);
        let b = BBox::new(2.0, -1.0, 3.0, 0.5);
        assert_eq!(
            union_extent(Some(a), Some(b)).unwrap().as_array(),
            [0.0, -1.0, 3.0, 1.0]
        );
        assert_eq!(union_extent(None, Some(b)).unwrap().as_array(), b.as_array());
        assert!(union_extent(None, None).is_none());
    }
}
