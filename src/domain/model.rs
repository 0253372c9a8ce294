use crate::utils::error::{AppError, Result};
use crate::utils::validation::{self, Validate};
use chrono::{DateTime, NaiveDate, Utc};
use geo::Geometry;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ForestLayer {
    pub id: Uuid,
    pub created_ts: DateTime<Utc>,
    pub updated_ts: DateTime<Utc>,
    pub is_hidden: bool,
    pub col_options: Value,
    pub name: String,
    pub color_code: Option<String>,
    pub symbol: Option<String>,
    pub description: Option<String>,
    pub original_properties: Value,
}

impl ForestLayer {
    /// Stored column options, falling back to defaults for rows written
    /// before the options were recorded.
    pub fn column_options(&self) -> ColOptions {
        serde_json::from_value(self.col_options.clone()).unwrap_or_default()
    }
}

/// A forest area row. `geometry` and `centroid` are GeoJSON in EPSG:4326.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ForestArea {
    pub id: Uuid,
    pub layer_id: Uuid,
    pub created_ts: DateTime<Utc>,
    pub updated_ts: DateTime<Utc>,
    pub name: String,
    pub description: Option<String>,
    pub municipality: Option<String>,
    pub region: Option<String>,
    pub area_ha: Option<f64>,
    pub date: Option<NaiveDate>,
    pub owner: Option<String>,
    pub person_responsible: Option<String>,
    pub geometry: Option<Value>,
    pub centroid: Option<Value>,
    pub original_id: Option<String>,
    pub original_properties: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Picture {
    pub id: Uuid,
    pub forest_area_id: Uuid,
    pub bucket_url: String,
    pub object_path: String,
    pub is_visible: bool,
    pub date_added: DateTime<Utc>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexingStrategy {
    #[default]
    NameMunicipality,
    Id,
}

/// How shapefile attribute columns map onto forest area fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColOptions {
    #[serde(alias = "indexingStrategy")]
    pub indexing_strategy: IndexingStrategy,
    #[serde(alias = "idCol")]
    pub id_col: Option<String>,
    #[serde(alias = "nameCol")]
    pub name_col: String,
    #[serde(alias = "municipalityCol")]
    pub municipality_col: Option<String>,
    #[serde(alias = "regionCol")]
    pub region_col: Option<String>,
    #[serde(alias = "descriptionCol")]
    pub description_col: Option<String>,
    #[serde(alias = "areaCol")]
    pub area_col: Option<String>,
    #[serde(alias = "dateCol")]
    pub date_col: Option<String>,
}

impl Default for ColOptions {
    fn default() -> Self {
        Self {
            indexing_strategy: IndexingStrategy::NameMunicipality,
            id_col: None,
            name_col: "nimi".to_string(),
            municipality_col: Some("kunta".to_string()),
            region_col: Some("maakunta".to_string()),
            description_col: None,
            area_col: Some("ala_ha".to_string()),
            date_col: Some("paiva".to_string()),
        }
    }
}

impl ColOptions {
    /// Every column the options claim, so the rest can be kept as original
    /// properties.
    pub fn mapped_columns(&self) -> Vec<&str> {
        let mut columns = vec![self.name_col.as_str()];
        for col in [
            &self.id_col,
            &self.municipality_col,
            &self.region_col,
            &self.description_col,
            &self.area_col,
            &self.date_col,
        ]
        .into_iter()
        .flatten()
        {
            columns.push(col.as_str());
        }
        columns
    }
}

impl Validate for ColOptions {
    fn validate(&self) -> Result<()> {
        validation::validate_non_empty_string("col_options.name_col", &self.name_col)?;
        if self.indexing_strategy == IndexingStrategy::Id {
            let id_col = self.id_col.as_deref().ok_or_else(|| {
                AppError::unprocessable("col_options.id_col is required for the id strategy")
            })?;
            validation::validate_non_empty_string("col_options.id_col", id_col)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct NewLayer {
    pub name: String,
    pub description: Option<String>,
    pub is_hidden: bool,
    pub color_code: Option<String>,
    pub symbol: Option<String>,
    pub col_options: ColOptions,
    pub original_properties: Value,
}

impl Validate for NewLayer {
    fn validate(&self) -> Result<()> {
        validation::validate_non_empty_string("name", &self.name)?;
        if let Some(color) = &self.color_code {
            validation::validate_color_code("color_code", color)?;
        }
        self.col_options.validate()
    }
}

/// An area ready to be written, geometry in EPSG:3067.
#[derive(Debug, Clone)]
pub struct NewArea {
    pub name: String,
    pub description: Option<String>,
    pub municipality: Option<String>,
    pub region: Option<String>,
    pub area_ha: Option<f64>,
    pub date: Option<NaiveDate>,
    pub owner: Option<String>,
    pub person_responsible: Option<String>,
    pub geometry: Geometry<f64>,
    pub original_id: Option<String>,
    pub original_properties: Map<String, Value>,
}

impl NewArea {
    /// Lookup key under the given strategy; `None` when the area has no
    /// usable key.
    pub fn key(&self, strategy: IndexingStrategy) -> Option<AreaKey> {
        match strategy {
            IndexingStrategy::NameMunicipality => Some(AreaKey::NameMunicipality {
                name: normalize_key_part(&self.name),
                municipality: self
                    .municipality
                    .as_deref()
                    .map(normalize_key_part)
                    .unwrap_or_default(),
            }),
            IndexingStrategy::Id => self
                .original_id
                .as_deref()
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(|id| AreaKey::Id(id.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AreaKey {
    NameMunicipality { name: String, municipality: String },
    Id(String),
}

pub fn normalize_key_part(value: &str) -> String {
    value.trim().to_lowercase()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LayerUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_hidden: Option<bool>,
    pub color_code: Option<String>,
    pub symbol: Option<String>,
}

impl LayerUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.is_hidden.is_none()
            && self.color_code.is_none()
            && self.symbol.is_none()
    }
}

impl Validate for LayerUpdate {
    fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            validation::validate_non_empty_string("name", name)?;
        }
        if let Some(color) = &self.color_code {
            validation::validate_color_code("color_code", color)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AreaUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub municipality: Option<String>,
    pub region: Option<String>,
    pub area_ha: Option<f64>,
    pub date: Option<NaiveDate>,
    pub owner: Option<String>,
    pub person_responsible: Option<String>,
}

impl Validate for AreaUpdate {
    fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            validation::validate_non_empty_string("name", name)?;
        }
        if let Some(area) = self.area_ha {
            if !area.is_finite() || area < 0.0 {
                return Err(AppError::unprocessable("area_ha must be a non-negative number"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplaceSummary {
    pub updated: usize,
    pub inserted: usize,
    pub deleted: usize,
}

/// A storage prefix waiting to be emptied.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StorageDeletionJob {
    pub object_prefix: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub next_attempt_ts: DateTime<Utc>,
}
