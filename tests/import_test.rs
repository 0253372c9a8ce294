mod common;

use common::{areas_zip, square, zip_archive, TM35FIN_PRJ, WGS84_PRJ};
use geo::{BoundingRect, Geometry};
use luonnonmetsakartta::domain::model::{ColOptions, IndexingStrategy, NewArea};
use luonnonmetsakartta::domain::ports::AreaSink;
use luonnonmetsakartta::geo::crs::Crs;
use luonnonmetsakartta::{ImportEngine, Result, ShapefilePipeline};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct MemorySink {
    written: Mutex<Vec<(Uuid, NewArea)>>,
}

impl AreaSink for &MemorySink {
    async fn write_areas(
        &self,
        layer_id: Uuid,
        _options: &ColOptions,
        areas: Vec<NewArea>,
    ) -> Result<usize> {
        let count = areas.len();
        let mut written = self.written.lock().unwrap();
        written.extend(areas.into_iter().map(|area| (layer_id, area)));
        Ok(count)
    }
}

#[tokio::test]
async fn test_wgs84_archive_is_stored_in_tm35fin() {
    let archive = areas_zip(
        WGS84_PRJ,
        &[square(24.0, 61.0, 0.01), square(25.0, 62.0, 0.01)],
        &[vec!["Kangas", "Hattula", "1"], vec!["Suo", "Jamsa", "2"]],
    );
    let layer_id = Uuid::new_v4();
    let sink = MemorySink::default();
    let pipeline = ShapefilePipeline::new(archive, layer_id, ColOptions::default(), &sink);

    let report = ImportEngine::new(pipeline).run().await.unwrap();
    assert_eq!(report.crs, Crs::Wgs84);
    assert_eq!(report.written, 2);
    assert_eq!(report.layer_properties()["crs"], "EPSG:4326");

    let written = sink.written.lock().unwrap();
    assert!(written.iter().all(|(id, _)| *id == layer_id));
    let (_, first) = &written[0];
    assert_eq!(first.name, "Kangas");
    assert_eq!(first.municipality.as_deref(), Some("Hattula"));

    // 24°E 61°N lies west of the TM35FIN central meridian
    let bounds = first.geometry.bounding_rect().unwrap();
    assert!(bounds.min().x > 300_000.0 && bounds.max().x < 500_000.0);
    assert!(bounds.min().y > 6_700_000.0 && bounds.max().y < 6_800_000.0);
}

#[tokio::test]
async fn test_id_strategy_reads_original_ids() {
    let archive = areas_zip(
        TM35FIN_PRJ,
        &[
            square(350_000.0, 6_760_000.0, 50.0),
            square(350_100.0, 6_760_000.0, 50.0),
            square(350_200.0, 6_760_000.0, 50.0),
        ],
        &[
            vec!["A", "Hattula", "K-1"],
            vec!["B", "Hattula", "K-1"],
            vec!["C", "Hattula", "K-2"],
        ],
    );
    let options = ColOptions {
        indexing_strategy: IndexingStrategy::Id,
        id_col: Some("tunnus".to_string()),
        ..Default::default()
    };
    let sink = MemorySink::default();
    let pipeline = ShapefilePipeline::new(archive, Uuid::new_v4(), options, &sink);

    let report = ImportEngine::new(pipeline).run().await.unwrap();
    assert_eq!(report.features_read, 3);
    assert_eq!(report.written, 2);

    let written = sink.written.lock().unwrap();
    let merged = &written[0].1;
    assert_eq!(merged.original_id.as_deref(), Some("K-1"));
    assert!(matches!(merged.geometry, Geometry::MultiPolygon(_)));
    assert_eq!(written[1].1.original_id.as_deref(), Some("K-2"));
}

#[tokio::test]
async fn test_prepare_does_not_write() {
    let archive = areas_zip(
        TM35FIN_PRJ,
        &[square(350_000.0, 6_760_000.0, 50.0)],
        &[vec!["A", "Hattula", "1"]],
    );
    let sink = MemorySink::default();
    let pipeline = ShapefilePipeline::new(archive, Uuid::new_v4(), ColOptions::default(), &sink);

    let (report, areas) = ImportEngine::new(pipeline).prepare().await.unwrap();
    assert_eq!(report.written, 0);
    assert_eq!(areas.len(), 1);
    assert!(sink.written.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_archive_without_shp_is_rejected() {
    let archive = zip_archive(&[("readme.txt", b"no shapes here")]);
    let sink = MemorySink::default();
    let pipeline = ShapefilePipeline::new(archive, Uuid::new_v4(), ColOptions::default(), &sink);

    let err = ImportEngine::new(pipeline).run().await.unwrap_err();
    assert_eq!(err.status_code(), 422);
    assert!(sink.written.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_garbage_upload_is_rejected() {
    let sink = MemorySink::default();
    let pipeline = ShapefilePipeline::new(
        b"definitely not a zip".to_vec(),
        Uuid::new_v4(),
        ColOptions::default(),
        &sink,
    );
    let err = ImportEngine::new(pipeline).run().await.unwrap_err();
    assert_eq!(err.status_code(), 422);
}
