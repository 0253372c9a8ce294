use crate::db;
use crate::domain::model::{AreaKey, ColOptions, IndexingStrategy, NewArea};
use crate::domain::ports::{AreaSink, ImportPipeline};
use crate::geo::crs::{reproject_geometry, Crs};
use crate::geo::shapefile::{read_zip, Feature, Shapefile};
use crate::utils::error::Result;
use chrono::NaiveDate;
use geo::{BooleanOps, Geometry, GeometryCollection, MultiPolygon};
use serde_json::{json, Map, Value};
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

/// Areas are stored in TM35FIN.
pub const STORAGE_CRS: Crs = Crs::Tm35Fin;

pub struct ShapefilePipeline<S: AreaSink> {
    archive: Vec<u8>,
    layer_id: Uuid,
    options: ColOptions,
    sink: S,
}

impl<S: AreaSink> ShapefilePipeline<S> {
    pub fn new(archive: Vec<u8>, layer_id: Uuid, options: ColOptions, sink: S) -> Self {
        Self {
            archive,
            layer_id,
            options,
            sink,
        }
    }
}

#[async_trait::async_trait]
impl<S: AreaSink> ImportPipeline for ShapefilePipeline<S> {
    async fn extract(&self) -> Result<Shapefile> {
        tracing::debug!("Reading {} byte shapefile archive", self.archive.len());
        read_zip(&self.archive)
    }

    async fn transform(&self, data: Shapefile) -> Result<Vec<NewArea>> {
        let crs = data.crs;
        let mut areas = Vec::with_capacity(data.features.len());
        let mut skipped = 0;

        for (idx, feature) in data.features.into_iter().enumerate() {
            match map_feature(idx + 1, feature, crs, &self.options) {
                Some(area) => areas.push(area),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::warn!("⚠️ Skipped {} records without geometry", skipped);
        }

        let total = areas.len();
        let areas = deduplicate(areas, self.options.indexing_strategy);
        if areas.len() < total {
            tracing::info!("🔗 Merged {} duplicate records", total - areas.len());
        }
        Ok(areas)
    }

    async fn load(&self, areas: Vec<NewArea>) -> Result<usize> {
        self.sink
            .write_areas(self.layer_id, &self.options, areas)
            .await
    }
}

#[derive(Debug, Clone)]
pub struct ImportReport {
    pub features_read: usize,
    pub areas: usize,
    pub written: usize,
    pub crs: Crs,
    pub columns: Vec<String>,
}

impl ImportReport {
    /// What the layer keeps about its source file.
    pub fn layer_properties(&self) -> Value {
        json!({
            "crs": self.crs.to_string(),
            "columns": self.columns,
        })
    }
}

pub struct ImportEngine<P: ImportPipeline> {
    pipeline: P,
}

impl<P: ImportPipeline> ImportEngine<P> {
    pub fn new(pipeline: P) -> Self {
        Self { pipeline }
    }

    /// Extract and transform, without loading.
    pub async fn prepare(&self) -> Result<(ImportReport, Vec<NewArea>)> {
        tracing::info!("📦 Extracting shapefile...");
        let shapefile = self.pipeline.extract().await?;
        let features_read = shapefile.features.len();
        let crs = shapefile.crs;
        let columns = shapefile.columns.clone();
        tracing::info!("Extracted {} features in {}", features_read, crs);

        tracing::info!("🔄 Transforming features...");
        let areas = self.pipeline.transform(shapefile).await?;
        tracing::info!("Transformed into {} areas", areas.len());

        let report = ImportReport {
            features_read,
            areas: areas.len(),
            written: 0,
            crs,
            columns,
        };
        Ok((report, areas))
    }

    pub async fn run(&self) -> Result<ImportReport> {
        let (mut report, areas) = self.prepare().await?;

        tracing::info!("💾 Loading areas...");
        report.written = self.pipeline.load(areas).await?;
        tracing::info!("✅ Import finished, {} areas written", report.written);

        Ok(report)
    }
}

/// Writes areas to PostGIS in a single transaction.
#[derive(Clone)]
pub struct DbAreaSink {
    pool: PgPool,
}

impl DbAreaSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl AreaSink for DbAreaSink {
    async fn write_areas(
        &self,
        layer_id: Uuid,
        _options: &ColOptions,
        areas: Vec<NewArea>,
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let written = db::forest_area::insert_forest_areas(&mut tx, layer_id, &areas).await?;
        tx.commit().await?;
        Ok(written)
    }
}

fn map_feature(
    number: usize,
    feature: Feature,
    crs: Crs,
    options: &ColOptions,
) -> Option<NewArea> {
    let geometry = reproject_geometry(&feature.geometry?, crs, STORAGE_CRS);
    let props = feature.properties;
    let text = |col: &Option<String>| col.as_ref().and_then(|c| props.get(c)).and_then(value_to_text);

    let name = props
        .get(&options.name_col)
        .and_then(value_to_text)
        .unwrap_or_else(|| format!("Area {number}"));

    let mapped = options.mapped_columns();
    let original_properties: Map<String, Value> = props
        .iter()
        .filter(|(key, _)| !mapped.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), clean_value(value.clone())))
        .collect();

    Some(NewArea {
        name,
        description: text(&options.description_col),
        municipality: text(&options.municipality_col),
        region: text(&options.region_col),
        area_ha: options
            .area_col
            .as_ref()
            .and_then(|c| props.get(c))
            .and_then(value_to_number),
        date: options
            .date_col
            .as_ref()
            .and_then(|c| props.get(c))
            .and_then(value_to_text)
            .and_then(|s| parse_date(&s)),
        owner: None,
        person_responsible: None,
        geometry,
        original_id: text(&options.id_col),
        original_properties,
    })
}

fn value_to_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    if text.is_empty() || text.eq_ignore_ascii_case("nan") {
        None
    } else {
        Some(text)
    }
}

fn value_to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', ".").parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

/// Text `NaN`s left over from spreadsheet exports become `null`.
fn clean_value(value: Value) -> Value {
    match value {
        Value::String(s) if s.trim().eq_ignore_ascii_case("nan") => Value::Null,
        other => other,
    }
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    ["%Y-%m-%d", "%d.%m.%Y", "%Y%m%d", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
}

fn is_polygonal(geometry: &Geometry<f64>) -> bool {
    matches!(geometry, Geometry::Polygon(_) | Geometry::MultiPolygon(_))
}

fn multi_polygon(geometry: Geometry<f64>) -> MultiPolygon<f64> {
    match geometry {
        Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
        Geometry::MultiPolygon(mp) => mp,
        _ => MultiPolygon::new(Vec::new()),
    }
}

fn merge_into(target: &mut NewArea, other: NewArea) {
    let current = std::mem::replace(
        &mut target.geometry,
        Geometry::GeometryCollection(GeometryCollection::default()),
    );
    target.geometry = if is_polygonal(&current) && is_polygonal(&other.geometry) {
        // overlapping parts are dissolved
        let merged = multi_polygon(current).union(&multi_polygon(other.geometry));
        Geometry::MultiPolygon(merged)
    } else {
        let mut members = match current {
            Geometry::GeometryCollection(gc) => gc.0,
            single => vec![single],
        };
        members.push(other.geometry);
        Geometry::GeometryCollection(GeometryCollection::new_from(members))
    };

    target.area_ha = match (target.area_ha, other.area_ha) {
        (Some(a), Some(b)) => Some(a + b),
        (a, b) => a.or(b),
    };
}

/// Merges records that share a key. Order follows each key's first record.
pub fn deduplicate(areas: Vec<NewArea>, strategy: IndexingStrategy) -> Vec<NewArea> {
    let mut result: Vec<NewArea> = Vec::with_capacity(areas.len());
    let mut seen: HashMap<AreaKey, usize> = HashMap::new();

    for area in areas {
        let Some(key) = area.key(strategy) else {
            result.push(area);
            continue;
        };
        match seen.get(&key) {
            Some(&idx) => merge_into(&mut result[idx], area),
            None => {
                seen.insert(key, result.len());
                result.push(area);
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::shapefile::fixtures::forest_zip;
    use geo::Area;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemorySink {
        written: Mutex<Vec<NewArea>>,
    }

    impl AreaSink for &MemorySink {
        async fn write_areas(
            &self,
            _layer_id: Uuid,
            _options: &ColOptions,
            areas: Vec<NewArea>,
        ) -> Result<usize> {
            let count = areas.len();
            self.written.lock().unwrap().extend(areas);
            Ok(count)
        }
    }

    fn feature(props: Value) -> Feature {
        Feature {
            geometry: Some(geo::point!(x: 385_000.0, y: 6_672_000.0).into()),
            properties: props.as_object().cloned().unwrap_or_default(),
        }
    }

    #[tokio::test]
    async fn test_engine_imports_and_merges_duplicates() {
        let sink = MemorySink::default();
        let pipeline =
            ShapefilePipeline::new(forest_zip(), Uuid::new_v4(), ColOptions::default(), &sink);
        let report = ImportEngine::new(pipeline).run().await.unwrap();

        assert_eq!(report.features_read, 3);
        assert_eq!(report.areas, 2);
        assert_eq!(report.written, 2);
        assert_eq!(report.crs, Crs::Tm35Fin);
        assert_eq!(report.layer_properties()["crs"], "EPSG:3067");

        let written = sink.written.lock().unwrap();
        let merged = &written[0];
        assert_eq!(merged.name, "Kuusikko");
        assert_eq!(merged.municipality.as_deref(), Some("Hämeenlinna"));
        assert_eq!(merged.area_ha, Some(2.0));
        match &merged.geometry {
            Geometry::MultiPolygon(mp) => assert_eq!(mp.0.len(), 2),
            other => panic!("expected a multipolygon, got {other:?}"),
        }
        // first record's properties win
        assert_eq!(merged.original_properties["omistaja"], "Metsahallitus");
        assert!(!merged.original_properties.contains_key("nimi"));

        assert_eq!(written[1].name, "Lehto");
        assert_eq!(written[1].region, None);
    }

    fn square_area(name: &str, x: f64, size: f64) -> NewArea {
        NewArea {
            name: name.to_string(),
            description: None,
            municipality: Some("Hattula".to_string()),
            region: None,
            area_ha: Some(1.0),
            date: None,
            owner: None,
            person_responsible: None,
            geometry: geo::Rect::new(
                geo::coord! { x: x, y: 6_760_000.0 },
                geo::coord! { x: x + size, y: 6_760_000.0 + size },
            )
            .to_polygon()
            .into(),
            original_id: None,
            original_properties: Map::new(),
        }
    }

    fn merged_area_m2(areas: Vec<NewArea>) -> (usize, f64) {
        let merged = deduplicate(areas, IndexingStrategy::NameMunicipality);
        assert_eq!(merged.len(), 1);
        match &merged[0].geometry {
            Geometry::MultiPolygon(mp) => (mp.0.len(), mp.unsigned_area()),
            other => panic!("expected a multipolygon, got {other:?}"),
        }
    }

    #[test]
    fn test_identical_duplicates_are_dissolved() {
        let (parts, area) = merged_area_m2(vec![
            square_area("Kuusikko", 350_000.0, 100.0),
            square_area("Kuusikko", 350_000.0, 100.0),
        ]);
        assert_eq!(parts, 1);
        assert!((area - 10_000.0).abs() < 0.01);
    }

    #[test]
    fn test_overlapping_duplicates_are_dissolved() {
        // 100 x 100 squares overlapping by half
        let (parts, area) = merged_area_m2(vec![
            square_area("Kuusikko", 350_000.0, 100.0),
            square_area(" KUUSIKKO", 350_050.0, 100.0),
        ]);
        assert_eq!(parts, 1);
        assert!((area - 15_000.0).abs() < 0.01);
    }

    #[test]
    fn test_disjoint_duplicates_stay_separate_parts() {
        let (parts, area) = merged_area_m2(vec![
            square_area("Kuusikko", 350_000.0, 100.0),
            square_area("Kuusikko", 350_500.0, 100.0),
        ]);
        assert_eq!(parts, 2);
        assert!((area - 20_000.0).abs() < 0.01);
    }

    #[test]
    fn test_map_feature_fallbacks() {
        let options = ColOptions::default();
        let area = map_feature(
            7,
            feature(json!({"kunta": "Inari", "ala_ha": "3,25", "paiva": "01.06.2023", "huom": "NaN"})),
            Crs::Tm35Fin,
            &options,
        )
        .unwrap();
        assert_eq!(area.name, "Area 7");
        assert_eq!(area.area_ha, Some(3.25));
        assert_eq!(area.date, NaiveDate::from_ymd_opt(2023, 6, 1));
        assert_eq!(area.original_properties["huom"], Value::Null);
    }

    #[test]
    fn test_map_feature_reprojects_to_tm35fin() {
        let wgs84 = Feature {
            geometry: Some(geo::point!(x: 27.0, y: 60.0).into()),
            properties: Map::new(),
        };
        let area = map_feature(1, wgs84, Crs::Wgs84, &ColOptions::default()).unwrap();
        match area.geometry {
            Geometry::Point(p) => {
                assert!((p.x() - 500_000.0).abs() < 0.01);
                assert!((p.y() - 6_651_411.19).abs() < 0.5);
            }
            other => panic!("expected a point, got {other:?}"),
        }
    }

    #[test]
    fn test_records_without_geometry_are_skipped() {
        let empty = Feature {
            geometry: None,
            properties: Map::new(),
        };
        assert!(map_feature(1, empty, Crs::Tm35Fin, &ColOptions::default()).is_none());
    }

    #[test]
    fn test_id_strategy_keeps_keyless_records() {
        let options = ColOptions {
            indexing_strategy: IndexingStrategy::Id,
            id_col: Some("tunnus".to_string()),
            ..Default::default()
        };
        let areas: Vec<NewArea> = [
            json!({"tunnus": 1, "nimi": "A", "ala_ha": 1.5}),
            json!({"tunnus": "1", "nimi": "B", "ala_ha": 0.5}),
            json!({"nimi": "C"}),
            json!({"nimi": "C"}),
        ]
        .into_iter()
        .enumerate()
        .filter_map(|(i, props)| map_feature(i + 1, feature(props), Crs::Tm35Fin, &options))
        .collect();

        let deduped = deduplicate(areas, IndexingStrategy::Id);
        assert_eq!(deduped.len(), 3);
        assert_eq!(deduped[0].name, "A");
        assert_eq!(deduped[0].area_ha, Some(2.0));
        assert_eq!(deduped[0].original_id.as_deref(), Some("1"));
    }
}
