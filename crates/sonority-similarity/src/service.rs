//! The operations offered to callers: similarity queries, paths and the
//! administrative jobs that keep vectors, stats and indexes up to date.

use serde::Serialize;
use sonority_core::model::Recording;
use sonority_core::schema::{Database, MetricMeta};
use sonority_core::FeatureAccessor;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{SimilarityError, SimilarityResult};
use crate::index::{self, ApproximateIndex, DistanceType, IndexConfig, IndexRegistry};
use crate::metrics::{MetricCatalog, MetricDefinition};
use crate::path::{resolve, PathFinder, PathStep};
use crate::stats::{NormalizationStatsStore, StatsReport};
use crate::vectors::{builders_for, AddMetricsReport, SimilarityVectorStore};

/// Result of a successful index rebuild.
#[derive(Debug, Clone, Serialize)]
pub struct IndexSummary {
    pub key: String,
    pub items: usize,
    pub path: Option<PathBuf>,
}

/// Stored data for one metric.
#[derive(Debug, Clone, Serialize)]
pub struct MetricStatus {
    pub name: String,
    pub category: String,
    pub visible: bool,
    pub length: usize,
    pub vectors: u64,
    pub pending: u64,
    pub failures: usize,
    pub needs_stats: bool,
    pub has_stats: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub recordings: u64,
    pub documents: u64,
    pub metrics: Vec<MetricStatus>,
    pub indexes: Vec<String>,
}

/// What [`SimilarityService::remove_metric`] deleted.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RemovedMetric {
    pub vectors: usize,
    pub stats: bool,
}

/// Entry point tying the database, metric catalog, stats and indexes
/// together.
#[derive(Debug)]
pub struct SimilarityService {
    db: Database,
    config: Config,
    catalog: MetricCatalog,
    stats: NormalizationStatsStore,
    registry: IndexRegistry,
    path_finder: PathFinder,
}

impl SimilarityService {
    /// Open the database named in `config` and load catalog and stats.
    pub fn open(config: Config) -> SimilarityResult<Self> {
        if let Some(parent) = config.database_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::open(&config.database_path)?;
        Self::with_database(db, config)
    }

    /// Build a service over an already opened database.
    pub fn with_database(db: Database, config: Config) -> SimilarityResult<Self> {
        let mut catalog = match &config.catalog_path {
            Some(path) => MetricCatalog::load(path)?,
            None => MetricCatalog::builtin(),
        };
        apply_metric_meta(&db, &mut catalog)?;
        let stats = NormalizationStatsStore::load(&db)?;
        let registry = IndexRegistry::new(config.index_dir.clone());
        let path_finder = PathFinder::new(config.path.clone())?;
        log::debug!(
            "Similarity service ready: {} metrics, {} with stats",
            catalog.len(),
            stats.metrics().len()
        );
        Ok(Self {
            db,
            config,
            catalog,
            stats,
            registry,
            path_finder,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn catalog(&self) -> &MetricCatalog {
        &self.catalog
    }

    pub fn stats(&self) -> &NormalizationStatsStore {
        &self.stats
    }

    pub fn registry(&self) -> &IndexRegistry {
        &self.registry
    }

    /// Index identity for a catalog metric, filling in configured defaults.
    pub fn index_config(
        &self,
        metric: &str,
        distance: Option<DistanceType>,
        trees: Option<u32>,
    ) -> SimilarityResult<IndexConfig> {
        self.catalog.require(metric)?;
        IndexConfig::new(
            metric,
            distance.unwrap_or(self.config.index.default_distance),
            trees.unwrap_or(self.config.index.default_trees),
        )
    }

    fn index(
        &self,
        metric: &str,
        distance: Option<DistanceType>,
        trees: Option<u32>,
    ) -> SimilarityResult<Arc<ApproximateIndex>> {
        let config = self.index_config(metric, distance, trees)?;
        self.registry.get(&config)
    }

    /// The `k` recordings most similar to `recording`, nearest first.
    pub fn get_similar(
        &self,
        metric: &str,
        recording: &Recording,
        k: usize,
        distance: Option<DistanceType>,
        trees: Option<u32>,
    ) -> SimilarityResult<Vec<(Recording, f64)>> {
        let index = self.index(metric, distance, trees)?;
        let id = resolve(&self.db, recording)?;
        index.similar(&self.db, id, k)
    }

    /// [`get_similar`](Self::get_similar) for many recordings. Unknown or
    /// unindexed recordings are missing from the result.
    pub fn get_similar_bulk(
        &self,
        metric: &str,
        recordings: &[Recording],
        k: usize,
        distance: Option<DistanceType>,
        trees: Option<u32>,
    ) -> SimilarityResult<BTreeMap<Recording, Vec<(Recording, f64)>>> {
        let index = self.index(metric, distance, trees)?;
        index.query_many(&self.db, recordings, k)
    }

    /// Distance between two recordings under the default index for
    /// `metric`, or `None` if either is not indexed.
    pub fn get_distance(
        &self,
        metric: &str,
        a: &Recording,
        b: &Recording,
    ) -> SimilarityResult<Option<f64>> {
        let index = self.index(metric, None, None)?;
        let a = resolve(&self.db, a)?;
        let b = resolve(&self.db, b)?;
        Ok(index.distance_between(a, b))
    }

    /// A path of at most `max_length` recordings from `start` to `end`
    /// under the default index for `metric`.
    pub fn get_path(
        &self,
        start: &Recording,
        end: &Recording,
        metric: &str,
        max_length: usize,
    ) -> SimilarityResult<Vec<PathStep>> {
        let index = self.index(metric, None, None)?;
        self.path_finder
            .find(&index, &self.db, start, end, max_length)
    }

    /// Build an index from the stored vectors and publish it, replacing any
    /// previous artifact for the same config.
    pub fn rebuild_index(
        &self,
        metric: &str,
        distance: Option<DistanceType>,
        trees: Option<u32>,
    ) -> SimilarityResult<IndexSummary> {
        let config = self.index_config(metric, distance, trees)?;
        let length = self.catalog.require(metric)?.length();
        let built = index::build_from_store(&self.db, config, length, &self.config.index)?;
        let published = self.registry.publish(built)?;
        Ok(IndexSummary {
            key: published.config().key(),
            items: published.len(),
            path: published.path().map(PathBuf::from),
        })
    }

    /// Delete the index artifact for a config. Returns whether one existed.
    pub fn remove_index(
        &self,
        metric: &str,
        distance: Option<DistanceType>,
        trees: Option<u32>,
    ) -> SimilarityResult<bool> {
        let config = self.index_config(metric, distance, trees)?;
        self.registry.remove(&config)
    }

    /// Sample documents and store normalization stats. Uses the configured
    /// sample size when `sample_size` is `None`.
    pub fn compute_normalization_stats(
        &self,
        sample_size: Option<u64>,
        force: bool,
    ) -> SimilarityResult<StatsReport> {
        self.stats.compute(
            &self.db,
            &self.catalog,
            &self.config.stats,
            sample_size.unwrap_or(self.config.stats.sample_size),
            force,
        )
    }

    /// Compute every missing metric vector, or every vector when `force`
    /// is set. Uses the configured batch size when `batch_size` is `None`.
    pub fn add_metrics(
        &self,
        batch_size: Option<usize>,
        force: bool,
    ) -> SimilarityResult<AddMetricsReport> {
        SimilarityVectorStore::new(&self.db).add_metrics(
            &self.catalog,
            &self.stats,
            batch_size.unwrap_or(self.config.batch_size),
            force,
        )
    }

    /// Register the hybrid named after its parts (e.g. `mfccs_bpm`) and
    /// remember it across restarts. Its vectors are computed by the next
    /// [`add_metrics`](Self::add_metrics).
    pub fn add_hybrid(
        &mut self,
        name: &str,
        category: &str,
        description: &str,
    ) -> SimilarityResult<MetricDefinition> {
        let hybrid = self.catalog.add_hybrid(name, category, description)?.clone();
        self.db.upsert_metric_meta(&meta_of(&hybrid))?;
        log::info!("Added hybrid metric {} ({} dimensions)", name, hybrid.length());
        Ok(hybrid)
    }

    /// Show or hide a metric in listings. Hidden metrics keep their
    /// vectors and indexes and can still be queried.
    pub fn set_metric_visibility(&mut self, metric: &str, visible: bool) -> SimilarityResult<()> {
        self.catalog.set_visible(metric, visible)?;
        let definition = self.catalog.require(metric)?;
        self.db.upsert_metric_meta(&meta_of(definition))?;
        log::info!(
            "Metric {} is now {}",
            metric,
            if visible { "visible" } else { "hidden" }
        );
        Ok(())
    }

    /// Compute all metric vectors for one recording. Returns the metrics
    /// that failed with their reasons.
    pub fn submit_recording(&self, recording: &Recording) -> SimilarityResult<Vec<(String, String)>> {
        let id = resolve(&self.db, recording)?;
        let builders = builders_for(&self.catalog, &self.stats)?;
        SimilarityVectorStore::new(&self.db).add_recording(id, &builders)
    }

    /// Delete stored vectors for `metric`, and its stats unless
    /// `keep_stats` is set.
    pub fn remove_metric(&self, metric: &str, keep_stats: bool) -> SimilarityResult<RemovedMetric> {
        self.catalog.require(metric)?;
        let vectors = SimilarityVectorStore::new(&self.db).remove_metric(metric)?;
        let stats = if keep_stats {
            false
        } else {
            self.stats.delete(&self.db, metric)?
        };
        Ok(RemovedMetric { vectors, stats })
    }

    pub fn status(&self) -> SimilarityResult<Status> {
        let store = SimilarityVectorStore::new(&self.db);
        let mut metrics = Vec::with_capacity(self.catalog.len());
        for definition in self.catalog.iter() {
            metrics.push(MetricStatus {
                name: definition.name.clone(),
                category: definition.category.clone(),
                visible: definition.visible,
                length: definition.length(),
                vectors: store.count(&definition.name)?,
                pending: store.pending(&definition.name)?,
                failures: store.failures(&definition.name)?.len(),
                needs_stats: definition.normalize,
                has_stats: self.stats.get(&definition.name).is_some(),
            });
        }
        Ok(Status {
            recordings: self.db.count_recordings()?,
            documents: self.db.count_feature_documents()?,
            metrics,
            indexes: self
                .registry
                .available()?
                .iter()
                .map(IndexConfig::key)
                .collect(),
        })
    }
}

fn meta_of(definition: &MetricDefinition) -> MetricMeta {
    MetricMeta {
        metric: definition.name.clone(),
        is_hybrid: definition.is_hybrid(),
        category: definition.category.clone(),
        description: definition.description.clone(),
        visible: definition.visible,
    }
}

/// Re-register stored hybrids and restore visibility. Rows naming metrics
/// the catalog can no longer build are skipped.
fn apply_metric_meta(db: &Database, catalog: &mut MetricCatalog) -> SimilarityResult<()> {
    for meta in db.list_metric_meta()? {
        if meta.is_hybrid {
            if let Err(e) = catalog.add_hybrid(&meta.metric, &meta.category, &meta.description) {
                log::warn!("Skipping stored hybrid {}: {}", meta.metric, e);
                continue;
            }
        }
        if let Err(e) = catalog.set_visible(&meta.metric, meta.visible) {
            log::warn!("Skipping stored visibility of {}: {}", meta.metric, e);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sonority_core::model::Mbid;

    fn service(dir: &std::path::Path) -> SimilarityService {
        let mut config = Config::default();
        config.index_dir = dir.to_path_buf();
        config.index.seed = Some(1);
        config.path.seed = Some(1);
        SimilarityService::with_database(Database::open_in_memory().unwrap(), config).unwrap()
    }

    fn submit(service: &SimilarityService, n: u128, bpm: f64) -> Recording {
        let mbid = Mbid::from_uuid(uuid::Uuid::from_u128(n));
        service
            .database()
            .submit(mbid, &json!({"rhythm": {"bpm": bpm, "onset_rate": 4.0}}))
            .unwrap()
            .1
    }

    #[test]
    fn test_index_config_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let config = service.index_config("bpm", None, None).unwrap();
        assert_eq!(config.key(), "bpm_angular_10");
        assert!(matches!(
            service.index_config("nope", None, None),
            Err(SimilarityError::Configuration(_))
        ));
        assert!(service
            .index_config("bpm", Some(DistanceType::Manhattan), Some(0))
            .is_err());
    }

    #[test]
    fn test_query_without_index() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let recording = submit(&service, 1, 120.0);
        assert!(matches!(
            service.get_similar("bpm", &recording, 5, None, None),
            Err(SimilarityError::IndexNotAvailable { .. })
        ));
    }

    #[test]
    fn test_status_counts() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        submit(&service, 1, 120.0);
        submit(&service, 2, 90.0);

        let status = service.status().unwrap();
        assert_eq!(status.recordings, 2);
        assert_eq!(status.documents, 2);
        let bpm = status.metrics.iter().find(|m| m.name == "bpm").unwrap();
        assert_eq!(bpm.pending, 2);
        assert!(!bpm.needs_stats);
        let mfccs = status.metrics.iter().find(|m| m.name == "mfccs").unwrap();
        assert!(mfccs.needs_stats && !mfccs.has_stats);
        assert!(status.indexes.is_empty());
    }

    #[test]
    fn test_remove_metric_keeps_stats_on_request() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let removed = service.remove_metric("bpm", true).unwrap();
        assert_eq!(removed.vectors, 0);
        assert!(!removed.stats);
        assert!(service.remove_metric("", false).is_err());
        assert!(matches!(
            service.remove_metric("tempo", false),
            Err(SimilarityError::Configuration(_))
        ));
    }

    #[test]
    fn test_hybrid_and_visibility_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("sonority.db");
        let mut config = Config::default();
        config.index_dir = dir.path().join("indices");
        config.database_path = db_path;

        let mut first = SimilarityService::open(config.clone()).unwrap();
        let hybrid = first.add_hybrid("bpm_onsetrate", "rhythm", "BPM and onset rate").unwrap();
        assert_eq!(hybrid.length(), 4);
        first.set_metric_visibility("key", false).unwrap();
        assert!(first.set_metric_visibility("tempo", false).is_err());
        drop(first);

        let reopened = SimilarityService::open(config).unwrap();
        let catalog = reopened.catalog();
        assert!(catalog.require("bpm_onsetrate").unwrap().is_hybrid());
        assert!(!catalog.require("key").unwrap().visible);
        // Key is the only harmonic metric.
        assert!(!catalog.by_category().contains_key("harmonic"));
        let status = reopened.status().unwrap();
        let key = status.metrics.iter().find(|m| m.name == "key").unwrap();
        assert!(!key.visible);
    }

    #[test]
    fn test_hybrid_is_indexed_and_queried() {
        let dir = tempfile::tempdir().unwrap();
        let mut service = service(dir.path());
        let a = submit(&service, 1, 120.0);
        let b = submit(&service, 2, 121.0);
        submit(&service, 3, 85.0);
        service.add_hybrid("bpm_onsetrate", "rhythm", "").unwrap();

        let catalog = MetricCatalog::from_definitions(
            ["bpm", "onsetrate", "bpm_onsetrate"]
                .iter()
                .map(|name| service.catalog().require(name).unwrap().clone())
                .collect(),
        )
        .unwrap();
        SimilarityVectorStore::new(service.database())
            .add_metrics(&catalog, service.stats(), 10, false)
            .unwrap();

        let summary = service
            .rebuild_index("bpm_onsetrate", Some(DistanceType::Euclidean), Some(2))
            .unwrap();
        assert_eq!(summary.key, "bpm_onsetrate_euclidean_2");
        assert_eq!(summary.items, 3);
        let similar = service
            .get_similar("bpm_onsetrate", &a, 1, Some(DistanceType::Euclidean), Some(2))
            .unwrap();
        assert_eq!(similar[0].0, b);
    }
}
