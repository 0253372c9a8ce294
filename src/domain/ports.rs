use crate::domain::model::{ColOptions, NewArea};
use crate::geo::crs::BBox;
use crate::geo::shapefile::Shapefile;
use crate::utils::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

/// Destination of imported areas.
pub trait AreaSink: Send + Sync {
    fn write_areas(
        &self,
        layer_id: Uuid,
        options: &ColOptions,
        areas: Vec<NewArea>,
    ) -> impl std::future::Future<Output = Result<usize>> + Send;
}

/// Publishes layers as map services.
#[async_trait]
pub trait MapPublisher: Send + Sync {
    async fn publish_layer(&self, layer_id: Uuid, name: &str, is_hidden: bool) -> Result<()>;
    async fn unpublish_layer(&self, layer_id: Uuid) -> Result<()>;
    async fn set_layer_visibility(&self, layer_id: Uuid, is_hidden: bool) -> Result<()>;
    /// `bbox` is in EPSG:3067.
    async fn invalidate_cache(&self, layer_id: Uuid, bbox: BBox) -> Result<()>;
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Stores the object and returns its public URL.
    async fn upload(&self, object_path: &str, data: Vec<u8>, content_type: &str)
        -> Result<String>;
    async fn delete_object(&self, object_path: &str) -> Result<()>;
    /// Deletes every object under `prefix` and returns how many went.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize>;
}

#[async_trait]
pub trait TokenIntrospector: Send + Sync {
    /// Raw introspection claims for an access token.
    async fn introspect(&self, token: &str) -> Result<Value>;
}

#[async_trait]
pub trait ImportPipeline: Send + Sync {
    async fn extract(&self) -> Result<Shapefile>;
    async fn transform(&self, data: Shapefile) -> Result<Vec<NewArea>>;
    async fn load(&self, areas: Vec<NewArea>) -> Result<usize>;
}
