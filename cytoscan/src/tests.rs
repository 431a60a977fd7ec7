//! End-to-end runs from TIFF files to stored well statistics.

use std::path::PathBuf;
use std::sync::Arc;

use common::test_utils::unique_test_dir;

use crate::config::{ProjectConfig, WellConfig};
use crate::testing::{init_tracing, two_cell_raster, uneven_cell_raster, write_gray16_tiff};
use crate::*;

fn write_two_cell_field(dir: &std::path::Path, prefix: &str) -> Vec<PathBuf> {
    let raster = two_cell_raster();
    ["dapi", "gfp"]
        .iter()
        .enumerate()
        .map(|(channel, name)| {
            let path = dir.join(format!("{prefix}_{name}.tif"));
            write_gray16_tiff(&path, raster.plane(channel).unwrap());
            path
        })
        .collect()
}

fn project(dir: &std::path::Path) -> ProjectConfig {
    ProjectConfig {
        project_dir: dir.to_path_buf(),
        channel_names: vec!["DAPI".into(), "GFP".into()],
        defaults: ParameterSet {
            threshold_nucleus: 500.0,
            threshold_cell: 200.0,
            threshold_background: 100.0,
            nuclear_channel: Some(ChannelBinding::new(0, "DAPI")),
            cytoplasm_channel: Some(ChannelBinding::new(1, "GFP")),
            ..Default::default()
        },
        wells: vec![
            WellConfig {
                name: "A01".into(),
                parameters: None,
                selected: true,
                fields: vec![write_two_cell_field(dir, "a01_f0")],
            },
            WellConfig {
                name: "A02".into(),
                parameters: None,
                selected: true,
                fields: Vec::new(),
            },
        ],
        ..Default::default()
    }
}

#[test]
fn test_two_blob_field_end_to_end() {
    init_tracing();
    let dir = unique_test_dir("end_to_end");
    let config = project(&dir);
    let plate = config.build_plate().unwrap();

    let engine = Arc::new(FeatureEngine::with_default_features(
        config.channel_names.clone(),
    ));
    let store = Arc::new(ProjectStore::new(&config.project_dir));
    let batch = BatchProcessor::new(
        store.clone(),
        engine.clone(),
        Arc::new(ThresholdSegmentor::new(config.segmentation.clone()).unwrap()),
        config.batch.clone(),
        CheckoutRegistry::new(),
    );

    batch.start(plate.selected_wells(WellOrder::Horizontal)).unwrap();
    let report = batch.wait();
    assert_eq!(report.state, BatchState::Completed);
    assert_eq!(report.status_of("A01"), Some(&WellStatus::Segmented { cells: 2 }));
    assert_eq!(report.status_of("A02"), Some(&WellStatus::SkippedNoImage));

    {
        let well = plate.well_by_name("A01").unwrap().lock();
        let cells = &well.fields()[0].cells().unwrap().cells;
        assert_eq!(cells.len(), 2);
        for cell in cells {
            assert_eq!(cell.pixel_count(NUCLEUS), 25);
            assert_eq!(cell.pixel_count(WHOLE_CELL), 81);
            assert_eq!(cell.pixel_count(CYTOPLASM), 56);
        }

        let stats = well.summary().unwrap().get("Size_nucleus").unwrap();
        assert_eq!(stats.mean, 25.0);
        assert_eq!(stats.stdev, 0.0);
    }

    // A fresh plate reads the same statistics back from disk.
    let reopened = config.build_plate().unwrap();
    let names = engine.feature_names();
    let disk = ProjectStore::new(&config.project_dir);
    assert_eq!(reopened.load_summaries(&disk, &names).unwrap(), 1);

    let well = reopened.well_by_name("A01").unwrap().clone();
    let stats = well.lock().summary().unwrap().get("Size_whole").unwrap();
    assert_eq!(stats.mean, 81.0);

    let loader = CellLoader::new(Arc::new(disk), engine, CheckoutRegistry::new());
    let reports = loader.spawn(vec![well.clone()]).unwrap().join();
    assert_eq!(
        reports[0].status,
        LoadStatus::Loaded {
            fields: 1,
            cells: 2,
            missing: Vec::new(),
            unexpected: Vec::new(),
        }
    );
    assert_eq!(well.lock().cell_count(), 2);
}

#[test]
fn test_missing_image_marks_well_error() {
    let dir = unique_test_dir("end_to_end_missing");
    let mut config = project(&dir);
    std::fs::remove_file(&config.wells[0].fields[0][1]).unwrap();
    config.wells[1].fields = vec![write_two_cell_field(&dir, "a02_f0")];

    let plate = config.build_plate().unwrap();
    let batch = BatchProcessor::new(
        Arc::new(MemoryStore::new()),
        Arc::new(FeatureEngine::with_default_features(
            config.channel_names.clone(),
        )),
        Arc::new(ThresholdSegmentor::default()),
        config.batch.clone(),
        CheckoutRegistry::new(),
    );
    batch.start(plate.selected_wells(WellOrder::Horizontal)).unwrap();
    let report = batch.wait();

    assert_eq!(report.state, BatchState::Completed);
    assert!(
        matches!(report.status_of("A01"), Some(WellStatus::Error(msg)) if msg.contains("a01_f0_gfp.tif"))
    );
    assert_eq!(report.status_of("A02"), Some(&WellStatus::Segmented { cells: 2 }));
}

#[test]
fn test_uneven_nuclei_give_spread_in_well_statistics() {
    let raster = uneven_cell_raster();
    let params = ParameterSet {
        threshold_nucleus: 500.0,
        threshold_cell: 200.0,
        threshold_background: 100.0,
        nuclear_channel: Some(ChannelBinding::new(0, "DAPI")),
        cytoplasm_channel: Some(ChannelBinding::new(1, "GFP")),
        ..Default::default()
    };

    let sets = ThresholdSegmentor::default().extract(&raster, &params).unwrap();
    let cells = CellAssembler::new().assemble(sets);
    let mut sizes: Vec<usize> = cells.iter().map(|c| c.pixel_count(NUCLEUS)).collect();
    sizes.sort_unstable();
    assert_eq!(sizes, [9, 25]);

    let engine = FeatureEngine::with_default_features(vec!["DAPI".into(), "GFP".into()]);
    let values: Vec<Vec<f32>> = cells.iter().map(|c| engine.compute_all(c, &raster)).collect();
    let summary = WellAggregator::new(&engine, IntensityMode::Mean)
        .aggregate(&cells, &values)
        .unwrap();

    let size = summary.get("Size_nucleus").unwrap();
    assert_eq!(size.mean, 17.0);
    // Sample stdev of {9, 25}.
    assert!((size.stdev - 128f32.sqrt()).abs() < 1e-4);
    assert!(size.cv() > 0.0);
}
