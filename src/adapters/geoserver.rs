//! GeoServer REST and GeoWebCache client.

use crate::config::GeoServerConfig;
use crate::db::views::{area_view_name, centroid_view_name};
use crate::domain::ports::MapPublisher;
use crate::geo::crs::{reproject_bbox, BBox, Crs};
use crate::utils::error::{AppError, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use std::collections::HashMap;
use uuid::Uuid;

pub const PUBLIC_ROLES: &str = "ROLE_ANONYMOUS,ROLE_AUTHENTICATED";
pub const HIDDEN_ROLES: &str = "ADMIN";

pub const VECTOR_TILE_FORMAT: &str = "application/vnd.mapbox-vector-tile";
pub const PNG_FORMAT: &str = "image/png";

/// Gridsets cached for each layer and the CRS their bounds are given in.
const CACHED_GRIDSETS: [(&str, Crs); 2] = [("EPSG:900913", Crs::WebMercator), ("EPSG:3067", Crs::Tm35Fin)];
const CACHED_FORMATS: [&str; 2] = [VECTOR_TILE_FORMAT, PNG_FORMAT];

/// Metres added around an extent before truncating, so point layers get a
/// non-empty box.
const TRUNCATE_MARGIN: f64 = 10.0;

pub fn get_layer_name_for_id(layer_id: Uuid) -> String {
    area_view_name(layer_id)
}

pub fn get_layer_centroid_name_for_id(layer_id: Uuid) -> String {
    centroid_view_name(layer_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Area,
    Centroid,
}

impl LayerKind {
    pub fn layer_name(&self, layer_id: Uuid) -> String {
        match self {
            LayerKind::Area => get_layer_name_for_id(layer_id),
            LayerKind::Centroid => get_layer_centroid_name_for_id(layer_id),
        }
    }

    fn title(&self, name: &str) -> String {
        match self {
            LayerKind::Area => name.to_string(),
            LayerKind::Centroid => format!("{name} (centroids)"),
        }
    }
}

#[derive(Debug, Default)]
pub struct LayerCreationReport {
    pub area_layer: Option<String>,
    pub centroid_layer: Option<String>,
}

impl LayerCreationReport {
    /// `None` entries mean success, `Some` holds the failure message.
    pub fn is_success(&self) -> bool {
        self.area_layer.is_none() && self.centroid_layer.is_none()
    }
}

#[derive(Clone)]
pub struct GeoServerClient {
    client: Client,
    config: GeoServerConfig,
}

impl GeoServerClient {
    pub fn new(config: GeoServerConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .basic_auth(&self.config.user, Some(&self.config.password))
    }

    fn featuretypes_url(&self) -> String {
        format!(
            "{}/rest/workspaces/{}/datastores/{}/featuretypes",
            self.config.url, self.config.workspace, self.config.store
        )
    }

    fn acl_url(&self) -> String {
        format!("{}/rest/security/acl/layers", self.config.url)
    }

    fn read_rule(&self, layer_name: &str) -> String {
        format!("{}.{}.r", self.config.workspace, layer_name)
    }

    /// Publishes one DB view as a feature type and applies its read rule.
    pub async fn create_geoserver_layer(
        &self,
        layer_id: Uuid,
        name: &str,
        is_hidden: bool,
        kind: LayerKind,
    ) -> Result<()> {
        let layer_name = kind.layer_name(layer_id);
        let body = json!({
            "featureType": {
                "name": layer_name,
                "nativeName": layer_name,
                "title": kind.title(name),
                "abstract": format!("Forest areas of layer {layer_id}"),
                "srs": "EPSG:3067",
                "projectionPolicy": "FORCE_DECLARED",
                "enabled": true,
                "store": {
                    "@class": "dataStore",
                    "name": format!("{}:{}", self.config.workspace, self.config.store),
                },
            }
        });

        let response = self
            .request(Method::POST, &self.featuretypes_url())
            .json(&body)
            .send()
            .await?;
        if response.status() != StatusCode::CREATED {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::geoserver(format!(
                "Failed to create layer {layer_name} ({status}): {text}"
            )));
        }
        tracing::info!("🗺️ Created GeoServer layer {}", layer_name);

        self.apply_read_rule(&layer_name, is_hidden, true).await
    }

    /// Creates both the area and the centroid layer.
    pub async fn create_geoserver_layers(
        &self,
        layer_id: Uuid,
        name: &str,
        is_hidden: bool,
    ) -> LayerCreationReport {
        let mut report = LayerCreationReport::default();
        for kind in [LayerKind::Area, LayerKind::Centroid] {
            if let Err(e) = self.create_geoserver_layer(layer_id, name, is_hidden, kind).await {
                tracing::error!("❌ {}", e);
                let slot = match kind {
                    LayerKind::Area => &mut report.area_layer,
                    LayerKind::Centroid => &mut report.centroid_layer,
                };
                *slot = Some(e.to_string());
            }
        }
        report
    }

    /// Removes both feature types and their read rules. Missing ones count
    /// as already deleted.
    pub async fn delete_geoserver_layer(&self, layer_id: Uuid) -> Result<()> {
        for kind in [LayerKind::Centroid, LayerKind::Area] {
            let layer_name = kind.layer_name(layer_id);
            let url = format!("{}/{}", self.featuretypes_url(), layer_name);
            let response = self
                .request(Method::DELETE, &url)
                .query(&[("recurse", "true")])
                .send()
                .await?;

            match response.status() {
                s if s.is_success() => tracing::info!("🗑️ Deleted GeoServer layer {}", layer_name),
                StatusCode::NOT_FOUND => {
                    tracing::debug!("GeoServer layer {} was already gone", layer_name)
                }
                status => {
                    let text = response.text().await.unwrap_or_default();
                    return Err(AppError::geoserver(format!(
                        "Failed to delete layer {layer_name} ({status}): {text}"
                    )));
                }
            }

            self.delete_read_rule(&layer_name).await?;
        }
        Ok(())
    }

    async fn delete_read_rule(&self, layer_name: &str) -> Result<()> {
        let url = format!("{}/{}", self.acl_url(), self.read_rule(layer_name));
        let response = self.request(Method::DELETE, &url).send().await?;
        match response.status() {
            s if s.is_success() || s == StatusCode::NOT_FOUND => Ok(()),
            status => Err(AppError::geoserver(format!(
                "Failed to delete access rule for {layer_name} ({status})"
            ))),
        }
    }

    /// Read rules of the layer's area and centroid feature types.
    pub async fn get_layer_permissions(&self, layer_id: Uuid) -> Result<HashMap<String, String>> {
        let response = self
            .request(Method::GET, &self.acl_url())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::geoserver(format!(
                "Failed to read access rules ({})",
                response.status()
            )));
        }

        let rules: HashMap<String, Value> = response.json().await?;
        let wanted = [
            self.read_rule(&get_layer_name_for_id(layer_id)),
            self.read_rule(&get_layer_centroid_name_for_id(layer_id)),
        ];
        Ok(rules
            .into_iter()
            .filter(|(rule, _)| wanted.contains(rule))
            .map(|(rule, roles)| {
                let roles = match roles {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (rule, roles)
            })
            .collect())
    }

    /// Makes both of the layer's feature types public or admin-only.
    pub async fn set_layer_visibility(
        &self,
        layer_id: Uuid,
        is_hidden: bool,
        is_initial_rule: bool,
    ) -> Result<()> {
        for kind in [LayerKind::Area, LayerKind::Centroid] {
            self.apply_read_rule(&kind.layer_name(layer_id), is_hidden, is_initial_rule)
                .await?;
        }
        Ok(())
    }

    async fn apply_read_rule(&self, layer_name: &str, is_hidden: bool, is_initial_rule: bool) -> Result<()> {
        let roles = if is_hidden { HIDDEN_ROLES } else { PUBLIC_ROLES };
        let body = json!({ self.read_rule(layer_name): roles });

        // POST creates a rule and PUT modifies one; retry with the other
        // when GeoServer disagrees about whether the rule exists.
        let (first, fallback, retry_on) = if is_initial_rule {
            (Method::POST, Method::PUT, StatusCode::CONFLICT)
        } else {
            (Method::PUT, Method::POST, StatusCode::NOT_FOUND)
        };
        let mut status = self.send_rule(first, &body).await?;
        if status == retry_on {
            status = self.send_rule(fallback, &body).await?;
        }

        if !status.is_success() {
            return Err(AppError::geoserver(format!(
                "Failed to set access rule for {layer_name} ({status})"
            )));
        }
        tracing::info!(
            "🔒 {} is now {}",
            layer_name,
            if is_hidden { "hidden" } else { "public" }
        );
        Ok(())
    }

    async fn send_rule(&self, method: Method, body: &Value) -> Result<StatusCode> {
        let response = self
            .request(method, &self.acl_url())
            .json(body)
            .send()
            .await?;
        Ok(response.status())
    }

    /// Asks GeoWebCache to drop cached tiles of one gridset and format
    /// inside `bounds` (given in `srs`).
    pub async fn truncate_gwc_tiles_for_gridset(
        &self,
        layer_name: &str,
        bounds: &BBox,
        srs: Crs,
        gridset: &str,
        format: &str,
    ) -> Result<()> {
        let qualified = format!("{}:{}", self.config.workspace, layer_name);
        let url = format!("{}/gwc/rest/seed/{}.json", self.config.url, qualified);
        let body = json!({
            "seedRequest": {
                "name": qualified,
                "bounds": { "coords": { "double": bounds.as_array() } },
                "srs": { "number": srs.epsg() },
                "gridSetId": gridset,
                "zoomStart": 0,
                "zoomStop": 30,
                "format": format,
                "type": "truncate",
                "threadCount": 1,
            }
        });

        let response = self.request(Method::POST, &url).json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::geoserver(format!(
                "Tile truncation failed for {qualified} on {gridset} ({status}): {text}"
            )));
        }
        tracing::debug!("Truncated {} tiles of {} on {}", format, qualified, gridset);
        Ok(())
    }

    /// Truncates cached tiles of both layers over `bbox` (EPSG:3067). Errors
    /// are logged and skipped.
    pub async fn invalidate_cache_for_bounds(&self, layer_id: Uuid, bbox: &BBox) {
        let padded = bbox.buffered(TRUNCATE_MARGIN);
        for kind in [LayerKind::Area, LayerKind::Centroid] {
            let layer_name = kind.layer_name(layer_id);
            for (gridset, crs) in CACHED_GRIDSETS {
                let bounds = reproject_bbox(&padded, Crs::Tm35Fin, crs);
                for format in CACHED_FORMATS {
                    if let Err(e) = self
                        .truncate_gwc_tiles_for_gridset(&layer_name, &bounds, crs, gridset, format)
                        .await
                    {
                        tracing::warn!("⚠️ {}", e);
                    }
                }
            }
        }
    }
}

#[async_trait]
impl MapPublisher for GeoServerClient {
    async fn publish_layer(&self, layer_id: Uuid, name: &str, is_hidden: bool) -> Result<()> {
        let report = self.create_geoserver_layers(layer_id, name, is_hidden).await;
        if report.is_success() {
            return Ok(());
        }
        // leave nothing half-published behind
        if let Err(e) = self.delete_geoserver_layer(layer_id).await {
            tracing::warn!("⚠️ Cleanup after failed publish also failed: {}", e);
        }
        let message = [report.area_layer, report.centroid_layer]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join("; ");
        Err(AppError::geoserver(message))
    }

    async fn unpublish_layer(&self, layer_id: Uuid) -> Result<()> {
        self.delete_geoserver_layer(layer_id).await
    }

    async fn set_layer_visibility(&self, layer_id: Uuid, is_hidden: bool) -> Result<()> {
        GeoServerClient::set_layer_visibility(self, layer_id, is_hidden, false).await
    }

    async fn invalidate_cache(&self, layer_id: Uuid, bbox: BBox) -> Result<()> {
        self.invalidate_cache_for_bounds(layer_id, &bbox).await;
        Ok(())
    }
}
