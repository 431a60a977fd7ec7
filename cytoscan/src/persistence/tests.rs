use std::sync::Arc;

use common::test_utils::unique_test_dir;

use super::*;
use crate::cell::{CellAssembler, CellCompartment, NUCLEUS, Point};
use crate::error::Error;

fn sample_field() -> StoredField {
    let cells = CellAssembler::new().assemble(vec![
        vec![CellCompartment::new(NUCLEUS, vec![Point::new(1, 2), Point::new(2, 2)])],
        vec![CellCompartment::new(NUCLEUS, vec![Point::new(9, 9)])],
    ]);
    StoredField {
        feature_names: vec!["Size_nucleus".into()],
        cells,
        values: vec![vec![2.0], vec![1.0]],
    }
}

fn check_round_trip(store: &dyn PersistenceGateway) {
    let key = WellKey::new(0, 13);
    let other = WellKey::new(1, 13);

    assert_eq!(store.read_well_means(key).unwrap(), None);
    assert_eq!(store.read_well_stdevs(key).unwrap(), None);
    assert_eq!(store.read_mean_feature_names(0).unwrap(), None);
    assert_eq!(store.read_field_cells(key, 0).unwrap(), None);

    store.write_well_means(key, &[1.5, 2.5]).unwrap();
    store.write_well_stdevs(key, &[0.5, 0.0]).unwrap();
    store
        .write_mean_feature_names(0, &["A".to_string(), "B".to_string()])
        .unwrap();
    store.write_field_cells(key, 3, &sample_field()).unwrap();

    assert_eq!(store.read_well_means(key).unwrap(), Some(vec![1.5, 2.5]));
    assert_eq!(store.read_well_stdevs(key).unwrap(), Some(vec![0.5, 0.0]));
    assert_eq!(
        store.read_mean_feature_names(0).unwrap(),
        Some(vec!["A".to_string(), "B".to_string()])
    );
    assert_eq!(store.read_field_cells(key, 3).unwrap(), Some(sample_field()));

    // Other keys stay untouched.
    assert_eq!(store.read_well_means(other).unwrap(), None);
    assert_eq!(store.read_field_cells(key, 0).unwrap(), None);
    assert_eq!(store.read_mean_feature_names(1).unwrap(), None);

    // Overwrite replaces.
    store.write_well_means(key, &[7.0]).unwrap();
    assert_eq!(store.read_well_means(key).unwrap(), Some(vec![7.0]));

    // Clearing drops the well's records but keeps plate names and other wells.
    store.write_well_means(other, &[4.0]).unwrap();
    store.clear_well(key).unwrap();
    assert_eq!(store.read_well_means(key).unwrap(), None);
    assert_eq!(store.read_well_stdevs(key).unwrap(), None);
    assert_eq!(store.read_field_cells(key, 3).unwrap(), None);
    assert!(store.read_mean_feature_names(0).unwrap().is_some());
    assert_eq!(store.read_well_means(other).unwrap(), Some(vec![4.0]));
    store.clear_well(key).unwrap();
}

#[test]
fn test_memory_store_round_trip() {
    let store = MemoryStore::new();
    check_round_trip(&store);
    assert_eq!(store.field_count(), 0);
}

#[test]
fn test_project_store_round_trip() {
    let dir = unique_test_dir("project_store");
    let store = ProjectStore::new(&dir);
    check_round_trip(&store);

    assert!(!dir.join("Data/plate_0/well_13").exists());
    assert!(dir.join("Data/plate_1/well_13/means.bin").exists());
    assert!(dir.join("Data/plate_0/feature_names.bin").exists());
    assert_eq!(tmp_files(&dir.join("Data")), 0);
}

fn tmp_files(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .map(|path| {
            if path.is_dir() {
                tmp_files(&path)
            } else {
                path.extension().is_some_and(|e| e == "tmp") as usize
            }
        })
        .sum()
}

#[test]
fn test_concurrent_writes_to_plate_names() {
    let dir = unique_test_dir("project_store_concurrent");
    let store = Arc::new(ProjectStore::new(&dir));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let store = store.clone();
            std::thread::spawn(move || {
                let names = vec![format!("Feature_{t}")];
                (0..50)
                    .map(|_| store.write_mean_feature_names(0, &names))
                    .filter(|r| r.is_err())
                    .count()
            })
        })
        .collect();
    let failures: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(failures, 0);

    let names = store.read_mean_feature_names(0).unwrap().unwrap();
    assert_eq!(names.len(), 1);
    assert!(names[0].starts_with("Feature_"));
    assert_eq!(tmp_files(&dir.join("Data")), 0);
}

#[test]
fn test_project_store_survives_reopen() {
    let dir = unique_test_dir("project_store_reopen");
    let key = WellKey::new(2, 0);
    ProjectStore::new(&dir).write_well_stdevs(key, &[3.0]).unwrap();

    let reopened = ProjectStore::new(&dir);
    assert_eq!(reopened.read_well_stdevs(key).unwrap(), Some(vec![3.0]));
}

#[test]
fn test_corrupt_file_is_connector_error() {
    let dir = unique_test_dir("project_store_corrupt");
    let store = ProjectStore::new(&dir);
    let key = WellKey::new(0, 0);
    store.write_well_means(key, &[1.0, 2.0, 3.0]).unwrap();

    let path = store.data_dir().join("plate_0/well_0/means.bin");
    // Claims 8 bytes but the block is truncated.
    std::fs::write(&path, [8u8, 0, 0, 0, 0xF0]).unwrap();

    let err = store.read_well_means(key).unwrap_err();
    assert!(matches!(err, Error::Connector { path: p, .. } if p == path));
}

#[test]
fn test_unwritable_location_is_connector_error() {
    let dir = unique_test_dir("project_store_blocked");
    // A regular file where the Data directory should be.
    std::fs::write(dir.join("Data"), b"").unwrap();
    let store = ProjectStore::new(&dir);

    let err = store.write_well_means(WellKey::new(0, 0), &[1.0]).unwrap_err();
    assert!(matches!(err, Error::Connector { .. }));
}
