//! File-backed store under `<project>/Data`.
//!
//! Layout:
//! ```text
//! Data/plate_<p>/feature_names.bin
//! Data/plate_<p>/well_<w>/means.bin
//! Data/plate_<p>/well_<w>/stdevs.bin
//! Data/plate_<p>/well_<w>/field_<f>.bin
//! ```
//! Files are bincode + lz4. Writes go to a per-write temporary file that is
//! renamed over the target, so readers never see a partial file.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use common::SerdeFormat;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{PersistenceGateway, StoredField, WellKey};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct ProjectStore {
    data_dir: PathBuf,
}

impl ProjectStore {
    pub fn new(project_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: project_dir.as_ref().join("Data"),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn plate_dir(&self, plate_index: usize) -> PathBuf {
        self.data_dir.join(format!("plate_{plate_index}"))
    }

    fn well_dir(&self, key: WellKey) -> PathBuf {
        self.plate_dir(key.plate_index)
            .join(format!("well_{}", key.well_index))
    }

    fn write<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<()> {
        let bytes = common::serde::serialize(&value, SerdeFormat::Bin)
            .map_err(|e| Error::connector(path, e))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::connector(parent, e))?;
        }
        let tmp = unique_tmp_path(path);
        fs::write(&tmp, &bytes).map_err(|e| Error::connector(&tmp, e))?;
        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(Error::connector(path, e));
        }

        tracing::trace!(bytes = bytes.len(), "Wrote {}", path.display());
        Ok(())
    }

    fn read<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::connector(path, e)),
        };
        common::serde::deserialize(&bytes, SerdeFormat::Bin)
            .map(Some)
            .map_err(|e| Error::connector(path, e))
    }
}

/// Sibling temporary file, distinct for every write so concurrent writers of
/// the same target never share one.
fn unique_tmp_path(path: &Path) -> PathBuf {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    let n = NEXT.fetch_add(1, Ordering::Relaxed);
    path.with_extension(format!("bin.{}.{n}.tmp", std::process::id()))
}

impl PersistenceGateway for ProjectStore {
    fn write_well_means(&self, key: WellKey, means: &[f32]) -> Result<()> {
        self.write(&self.well_dir(key).join("means.bin"), means)
    }

    fn read_well_means(&self, key: WellKey) -> Result<Option<Vec<f32>>> {
        self.read(&self.well_dir(key).join("means.bin"))
    }

    fn write_well_stdevs(&self, key: WellKey, stdevs: &[f32]) -> Result<()> {
        self.write(&self.well_dir(key).join("stdevs.bin"), stdevs)
    }

    fn read_well_stdevs(&self, key: WellKey) -> Result<Option<Vec<f32>>> {
        self.read(&self.well_dir(key).join("stdevs.bin"))
    }

    fn write_mean_feature_names(&self, plate_index: usize, names: &[String]) -> Result<()> {
        self.write(&self.plate_dir(plate_index).join("feature_names.bin"), names)
    }

    fn read_mean_feature_names(&self, plate_index: usize) -> Result<Option<Vec<String>>> {
        self.read(&self.plate_dir(plate_index).join("feature_names.bin"))
    }

    fn write_field_cells(&self, key: WellKey, field: usize, data: &StoredField) -> Result<()> {
        self.write(&self.well_dir(key).join(format!("field_{field}.bin")), data)
    }

    fn read_field_cells(&self, key: WellKey, field: usize) -> Result<Option<StoredField>> {
        self.read(&self.well_dir(key).join(format!("field_{field}.bin")))
    }

    fn clear_well(&self, key: WellKey) -> Result<()> {
        let dir = self.well_dir(key);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::connector(dir, e)),
        }
    }
}
