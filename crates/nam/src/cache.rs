//! Zarr persistence of assembled datasets.
//!
//! Layout of one cache entry:
//!
//! ```text
//! <entry>.zarr/
//!   zarr.json              group; attributes hold the manifest
//!   lat/, lon/             Float64 [y, x]
//!   variables/<name>/      Float32 [forecast, level, y, x]
//! ```
//!
//! Entries are written to a staging directory first and renamed into place,
//! so an interrupted save never leaves a readable but incomplete entry.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ndarray::{Array2, Array4};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};
use zarrs::array::{Array, ArrayBuilder, DataType, Element, ElementOwned, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs::group::{Group, GroupBuilder};
use zarrs_filesystem::FilesystemStore;

use crate::config::ProjectionConfig;
use crate::dataset::{Dataset, LevelAxis, Variable};
use crate::error::{NamError, Result};

const MANIFEST_KEY: &str = "nam_manifest";
const FORMAT_VERSION: u32 = 1;

/// Everything but the arrays.
#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    format_version: u32,
    reftime: DateTime<Utc>,
    forecast: Vec<u32>,
    levels: BTreeMap<String, LevelAxis>,
    y: Vec<f64>,
    x: Vec<f64>,
    projection: ProjectionConfig,
    variables: Vec<VariableEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct VariableEntry {
    name: String,
    feature: String,
    layer: String,
    long_name: String,
    units: String,
}

impl Manifest {
    fn of(dataset: &Dataset) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            reftime: dataset.reftime,
            forecast: dataset.forecast.clone(),
            levels: dataset.levels.clone(),
            y: dataset.y.clone(),
            x: dataset.x.clone(),
            projection: dataset.projection.clone(),
            variables: dataset
                .variables
                .values()
                .map(|v| VariableEntry {
                    name: v.name.clone(),
                    feature: v.feature.clone(),
                    layer: v.layer.clone(),
                    long_name: v.long_name.clone(),
                    units: v.units.clone(),
                })
                .collect(),
        }
    }
}

/// True when `path` holds a cache entry (readable or not).
pub fn exists(path: &Path) -> bool {
    path.join("zarr.json").is_file()
}

/// Write `dataset` to `path`, replacing any previous entry.
pub fn save(dataset: &Dataset, path: &Path) -> Result<()> {
    let staging = staging_path(path);
    if staging.exists() {
        std::fs::remove_dir_all(&staging)?;
    }
    std::fs::create_dir_all(&staging)?;
    let store = Arc::new(FilesystemStore::new(&staging).map_err(cache_err)?);

    let manifest = serde_json::to_value(Manifest::of(dataset)).map_err(cache_err)?;
    let mut attrs = Map::new();
    attrs.insert(MANIFEST_KEY.to_string(), manifest);
    attrs.insert("grid_mapping".to_string(), Value::Object(dataset.grid_mapping()));
    attrs.insert("features".to_string(), json!(dataset.features()));
    attrs.insert(
        "reftime_local".to_string(),
        json!(dataset.reftime_local().to_rfc3339()),
    );

    GroupBuilder::new()
        .attributes(attrs)
        .build(store.clone(), "/")
        .map_err(cache_err)?
        .store_metadata()
        .map_err(cache_err)?;
    GroupBuilder::new()
        .build(store.clone(), "/variables")
        .map_err(cache_err)?
        .store_metadata()
        .map_err(cache_err)?;

    let (ny, nx) = dataset.lat.dim();
    for (name, grid) in [("lat", &dataset.lat), ("lon", &dataset.lon)] {
        let values: Vec<f64> = grid.iter().copied().collect();
        write_array(
            &store,
            &format!("/{}", name),
            &[ny, nx],
            &values,
            DataType::Float64,
            FillValue::from(f64::NAN),
            Map::new(),
        )?;
    }

    for variable in dataset.variables.values() {
        let (nf, nl, ny, nx) = variable.shape();
        let values: Vec<f32> = variable.data.iter().copied().collect();
        write_array(
            &store,
            &format!("/variables/{}", variable.name),
            &[nf, nl, ny, nx],
            &values,
            DataType::Float32,
            FillValue::from(f32::NAN),
            variable.attributes(),
        )?;
    }

    if path.exists() {
        std::fs::remove_dir_all(path)?;
    }
    std::fs::rename(&staging, path)?;

    info!(
        path = %path.display(),
        variables = dataset.variables.len(),
        "Saved dataset to cache"
    );
    Ok(())
}

/// Read the entry at `path`.
pub fn load(path: &Path) -> Result<Dataset> {
    let store = Arc::new(FilesystemStore::new(path).map_err(cache_err)?);
    let group = Group::open(store.clone(), "/").map_err(cache_err)?;

    let manifest = group
        .attributes()
        .get(MANIFEST_KEY)
        .cloned()
        .ok_or_else(|| NamError::cache(format!("{} has no manifest", path.display())))?;
    let manifest: Manifest = serde_json::from_value(manifest).map_err(cache_err)?;
    if manifest.format_version != FORMAT_VERSION {
        return Err(NamError::cache(format!(
            "unsupported cache format version {}",
            manifest.format_version
        )));
    }

    let (ny, nx) = (manifest.y.len(), manifest.x.len());
    let lat = read_array::<f64>(&store, "/lat", &[ny, nx])?;
    let lon = read_array::<f64>(&store, "/lon", &[ny, nx])?;
    let lat = Array2::from_shape_vec((ny, nx), lat).map_err(cache_err)?;
    let lon = Array2::from_shape_vec((ny, nx), lon).map_err(cache_err)?;

    let nf = manifest.forecast.len();
    let mut variables = BTreeMap::new();
    for entry in manifest.variables {
        let levels = manifest.levels.get(&entry.layer).cloned().ok_or_else(|| {
            NamError::cache(format!("{}: unknown level axis {}", entry.name, entry.layer))
        })?;
        let nl = levels.values.len();
        let values = read_array::<f32>(
            &store,
            &format!("/variables/{}", entry.name),
            &[nf, nl, ny, nx],
        )?;
        let data = Array4::from_shape_vec((nf, nl, ny, nx), values).map_err(cache_err)?;

        variables.insert(
            entry.name.clone(),
            Variable {
                name: entry.name,
                feature: entry.feature,
                layer: entry.layer,
                long_name: entry.long_name,
                units: entry.units,
                forecast: manifest.forecast.clone(),
                levels,
                y: manifest.y.clone(),
                x: manifest.x.clone(),
                data,
            },
        );
    }

    debug!(path = %path.display(), variables = variables.len(), "Loaded cached dataset");
    Ok(Dataset {
        reftime: manifest.reftime,
        forecast: manifest.forecast,
        levels: manifest.levels,
        y: manifest.y,
        x: manifest.x,
        lat,
        lon,
        projection: manifest.projection,
        variables,
    })
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    path.with_file_name(name)
}

fn write_array<T: Element>(
    store: &Arc<FilesystemStore>,
    path: &str,
    shape: &[usize],
    values: &[T],
    data_type: DataType,
    fill_value: FillValue,
    attrs: Map<String, Value>,
) -> Result<()> {
    let array_shape: Vec<u64> = shape.iter().map(|&d| d as u64).collect();
    let chunk_shape: Vec<u64> = shape.iter().map(|&d| d.max(1) as u64).collect();

    let array = ArrayBuilder::new(
        array_shape.clone(),
        data_type,
        chunk_shape.try_into().map_err(cache_err)?,
        fill_value,
    )
    .attributes(attrs)
    .build(store.clone(), path)
    .map_err(cache_err)?;
    array.store_metadata().map_err(cache_err)?;

    if shape.contains(&0) {
        return Ok(());
    }
    let subset = ArraySubset::new_with_shape(array_shape);
    array
        .store_array_subset_elements(&subset, values)
        .map_err(cache_err)?;
    Ok(())
}

fn read_array<T: ElementOwned>(
    store: &Arc<FilesystemStore>,
    path: &str,
    shape: &[usize],
) -> Result<Vec<T>> {
    let array = Array::open(store.clone(), path).map_err(cache_err)?;
    let expected: Vec<u64> = shape.iter().map(|&d| d as u64).collect();
    if array.shape() != expected.as_slice() {
        return Err(NamError::cache(format!(
            "{} has shape {:?}, expected {:?}",
            path,
            array.shape(),
            expected
        )));
    }
    if shape.contains(&0) {
        return Ok(Vec::new());
    }
    array
        .retrieve_array_subset_elements::<T>(&ArraySubset::new_with_shape(expected))
        .map_err(cache_err)
}

fn cache_err(e: impl std::fmt::Display) -> NamError {
    NamError::cache(e.to_string())
}
