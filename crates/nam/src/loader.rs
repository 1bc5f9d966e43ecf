//! The end-to-end pipeline for one model run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::cache;
use crate::config::{GeoSubset, NamConfig, ProjectionConfig};
use crate::dataset::Dataset;
use crate::decode::{GridRecord, RecordDecoder};
use crate::download::{remove_partial, DownloadOutcome, Downloader};
use crate::error::{NamError, Result};
use crate::projector::Projector;
use crate::reassemble::reassemble;
use crate::reftime::ReferenceTime;
use crate::subset::Subsetter;

/// Per-call options of [`NamLoader::load`].
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Feature allow-list; `None` uses the configured defaults
    pub features: Option<Vec<String>>,
    /// Geographic subset; `None` uses the configured default
    pub geo: Option<GeoSubset>,
    /// Keep the full grid even when a default subset is configured
    pub full_grid: bool,
    pub save_output: bool,
    pub keep_raw_files: bool,
    /// Ignore an existing cache entry and re-download raw files
    pub force_refresh: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            features: None,
            geo: None,
            full_grid: false,
            save_output: true,
            keep_raw_files: false,
            force_refresh: false,
        }
    }
}

/// Loads NAM runs for one reference time.
///
/// The stages are exposed separately so that callers can build their own
/// pipeline: [`download`](Self::download) fetches raw files,
/// [`unpack`](Self::unpack) decodes them into records and
/// [`repack`](Self::repack) assembles the records into a dataset.
pub struct NamLoader {
    config: Arc<NamConfig>,
    reftime: ReferenceTime,
    data_dir: PathBuf,
    url_template: Option<String>,
    cancel: CancellationToken,
}

impl NamLoader {
    pub fn new(config: Arc<NamConfig>, reftime: ReferenceTime, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            reftime,
            data_dir: data_dir.into(),
            url_template: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Fetch every file from `template` instead of the selected source.
    pub fn with_url_template(mut self, template: impl Into<String>) -> Self {
        self.url_template = Some(template.into());
        self
    }

    /// Abort downloads when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn reftime(&self) -> ReferenceTime {
        self.reftime
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// The remote URL template in effect.
    pub fn url_template(&self) -> &str {
        match &self.url_template {
            Some(template) => template,
            None => self.reftime.url_template(&self.config.source, Utc::now()),
        }
    }

    /// Local raw file paths, one per forecast hour.
    pub fn local_gribs(&self) -> Vec<PathBuf> {
        self.config
            .forecast_hours
            .iter()
            .map(|&f| {
                self.data_dir
                    .join(self.reftime.format(&self.config.local.grib_template, f))
            })
            .collect()
    }

    /// Remote URLs, one per forecast hour.
    pub fn remote_gribs(&self) -> Vec<String> {
        let template = self.url_template();
        self.config
            .forecast_hours
            .iter()
            .map(|&f| self.reftime.format(template, f))
            .collect()
    }

    /// Path of the cache entry of this run.
    pub fn local_cache(&self) -> PathBuf {
        self.data_dir
            .join(self.reftime.format(&self.config.local.cache_template, 0))
    }

    /// Make sure every raw file exists locally.
    ///
    /// Stops at the first file that cannot be fetched. Runs whose only
    /// source is the GRIB1 archive fail before any request is made.
    #[instrument(skip(self), fields(reftime = %self.reftime))]
    pub async fn download(&self, force: bool) -> Result<Vec<PathBuf>> {
        self.check_source()?;
        let downloader = Downloader::new(self.config.download.clone())?;
        let paths = self.local_gribs();
        let mut fetched = 0usize;

        for (url, path) in self.remote_gribs().iter().zip(&paths) {
            if let DownloadOutcome::Fetched(_) =
                downloader.fetch(url, path, force, &self.cancel).await?
            {
                fetched += 1;
            }
        }

        info!(files = paths.len(), fetched = fetched, "Raw files ready");
        Ok(paths)
    }

    /// Decode raw files into subsetted records.
    pub fn unpack(&self, paths: &[PathBuf], options: &LoadOptions) -> Result<Vec<GridRecord>> {
        unpack_files(paths, &self.features(options), self.subset(options))
    }

    /// Assemble records into a dataset.
    pub fn repack(&self, records: Vec<GridRecord>) -> Result<Dataset> {
        repack_records(records, self.reftime, &self.config.projection)
    }

    /// Return the dataset of this run, from cache when possible.
    ///
    /// Decoding, assembly and cache I/O run on the blocking thread pool.
    #[instrument(skip(self, options), fields(reftime = %self.reftime))]
    pub async fn load(&self, options: &LoadOptions) -> Result<Dataset> {
        let cache_path = self.local_cache();

        if !options.force_refresh && cache::exists(&cache_path) {
            let path = cache_path.clone();
            match blocking(move || cache::load(&path)).await {
                Ok(dataset) => {
                    counter!("nam_cache_hits_total").increment(1);
                    info!(path = %cache_path.display(), "Loaded dataset from cache");
                    return Ok(dataset);
                }
                Err(e) => {
                    counter!("nam_cache_corrupt_total").increment(1);
                    warn!(
                        path = %cache_path.display(),
                        error = %e,
                        "Cache entry unreadable, rebuilding"
                    );
                }
            }
        }
        counter!("nam_cache_misses_total").increment(1);

        let paths = self.download(options.force_refresh).await?;

        let features = self.features(options);
        let subset = self.subset(options);
        let reftime = self.reftime;
        let projection = self.config.projection.clone();
        let save_to = options.save_output.then(|| cache_path.clone());
        let raw = paths.clone();
        let dataset = blocking(move || {
            let records = unpack_files(&raw, &features, subset)?;
            let dataset = repack_records(records, reftime, &projection)?;
            if let Some(path) = save_to {
                cache::save(&dataset, &path)?;
            }
            Ok(dataset)
        })
        .await?;

        if !options.keep_raw_files {
            for path in &paths {
                remove_partial(path).await?;
            }
        }

        info!(
            variables = dataset.variables.len(),
            forecasts = dataset.forecast.len(),
            "Dataset ready"
        );
        Ok(dataset)
    }

    fn check_source(&self) -> Result<()> {
        if self.url_template.is_some() {
            return Ok(());
        }
        let source = self.reftime.source(&self.config.source, Utc::now());
        if source.is_grib2() {
            return Ok(());
        }
        Err(NamError::UndecodableSource {
            reftime: self.reftime.to_string(),
            url: self.reftime.format(source.template(&self.config.source), 0),
        })
    }

    fn features(&self, options: &LoadOptions) -> Vec<String> {
        options
            .features
            .clone()
            .unwrap_or_else(|| self.config.default_features.clone())
    }

    fn subset(&self, options: &LoadOptions) -> Option<GeoSubset> {
        if options.full_grid {
            None
        } else {
            options.geo.or(self.config.default_subset)
        }
    }
}

fn unpack_files(
    paths: &[PathBuf],
    features: &[String],
    subset: Option<GeoSubset>,
) -> Result<Vec<GridRecord>> {
    let mut subsetter = subset.map(Subsetter::new);
    let mut records = Vec::new();

    for path in paths {
        let before = records.len();
        for record in RecordDecoder::open(path, Some(features))? {
            let record = record?;
            let record = match subsetter.as_mut() {
                Some(subsetter) => subsetter.apply(record)?,
                None => record,
            };
            records.push(record);
        }
        info!(
            path = %path.display(),
            records = records.len() - before,
            "Unpacked raw file"
        );
    }
    Ok(records)
}

fn repack_records(
    records: Vec<GridRecord>,
    reftime: ReferenceTime,
    projection: &ProjectionConfig,
) -> Result<Dataset> {
    let mut projector = Projector::new(projection)?;
    reassemble(records, reftime.datetime(), &mut projector)
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| NamError::Task(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loader(dir: &Path) -> NamLoader {
        let reftime = ReferenceTime::parse("20200301 1200").unwrap();
        NamLoader::new(Arc::new(NamConfig::default()), reftime, dir)
    }

    #[test]
    fn test_local_paths() {
        let dir = tempfile::tempdir().unwrap();
        let loader = loader(dir.path());

        let gribs = loader.local_gribs();
        assert_eq!(gribs.len(), 53);
        assert_eq!(
            gribs[0],
            dir.path().join("nam.20200301/nam.t12z.awphys00.tm00.grib2")
        );
        assert_eq!(
            gribs[52],
            dir.path().join("nam.20200301/nam.t12z.awphys84.tm00.grib2")
        );
        assert_eq!(
            loader.local_cache(),
            dir.path().join("nam.20200301/nam.t12z.awphys.tm00.zarr")
        );
    }

    #[test]
    fn test_remote_urls_follow_override() {
        let dir = tempfile::tempdir().unwrap();
        let loader = loader(dir.path())
            .with_url_template("http://localhost:9/{date}/{cycle:02}/{forecast:03}.grib2");

        let urls = loader.remote_gribs();
        assert_eq!(urls[1], "http://localhost:9/20200301/12/001.grib2");
        assert_eq!(urls[52], "http://localhost:9/20200301/12/084.grib2");
    }

    #[test]
    fn test_archive_source_for_old_runs() {
        let dir = tempfile::tempdir().unwrap();
        let loader = loader(dir.path());
        assert!(loader.url_template().ends_with(".grb2"));
        assert!(loader.remote_gribs()[0].starts_with("https://nomads.ncdc.noaa.gov/"));
    }

    #[tokio::test]
    async fn test_grib1_archive_fails_before_downloading() {
        let dir = tempfile::tempdir().unwrap();
        let reftime = ReferenceTime::parse("20170301 0000").unwrap();
        let loader = NamLoader::new(Arc::new(NamConfig::default()), reftime, dir.path());

        let err = loader.load(&LoadOptions::default()).await.unwrap_err();
        match err {
            NamError::UndecodableSource { url, .. } => {
                assert!(url.ends_with("nam_218_20170301_0000_000.grb"))
            }
            other => panic!("expected an undecodable source, got {:?}", other),
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        // An explicit template bypasses the archive selection
        let overridden = NamLoader::new(Arc::new(NamConfig::default()), reftime, dir.path())
            .with_url_template("http://localhost:9/{forecast:03}.grib2");
        assert!(overridden.check_source().is_ok());
    }

    #[tokio::test]
    async fn test_blocking_work_runs_off_the_runtime() {
        let runtime_thread = std::thread::current().id();
        let worker = blocking(|| Ok(std::thread::current().id())).await.unwrap();
        assert_ne!(worker, runtime_thread);

        let err = blocking(|| -> Result<()> { panic!("decoder crashed") })
            .await
            .unwrap_err();
        assert!(matches!(err, NamError::Task(_)));
    }

    #[test]
    fn test_option_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loader = loader(dir.path());
        let options = LoadOptions::default();

        assert_eq!(loader.features(&options).len(), 10);
        assert_eq!(loader.subset(&options), Some(GeoSubset::default()));

        let full = LoadOptions {
            full_grid: true,
            ..LoadOptions::default()
        };
        assert_eq!(loader.subset(&full), None);
    }
}
