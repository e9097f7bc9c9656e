//! Per-metric normalization statistics.
//!
//! Stats are sampled once from the document population and persisted in
//! `similarity_stats`. The store keeps an in-memory copy that is loaded at
//! startup and refreshed after every compute or delete.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sonority_core::schema::{Database, StoredStats};
use sonority_core::FeatureAccessor;
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use crate::config::StatsConfig;
use crate::error::{SimilarityError, SimilarityResult};
use crate::metrics::{self, MetricCatalog, MetricDefinition};

/// Mean and population standard deviation per dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationStats {
    pub means: Vec<f64>,
    pub stddevs: Vec<f64>,
}

impl NormalizationStats {
    /// Compute stats over equally sized rows. Returns `None` for no rows.
    pub fn from_samples(rows: &[Vec<f64>]) -> Option<Self> {
        let first = rows.first()?;
        let n = rows.len() as f64;
        let width = first.len();

        let mut means = vec![0.0; width];
        for row in rows {
            for (mean, value) in means.iter_mut().zip(row) {
                *mean += value;
            }
        }
        for mean in &mut means {
            *mean /= n;
        }

        let mut stddevs = vec![0.0; width];
        for row in rows {
            for ((var, value), mean) in stddevs.iter_mut().zip(row).zip(&means) {
                *var += (value - mean).powi(2);
            }
        }
        for var in &mut stddevs {
            *var = (*var / n).sqrt();
        }

        Some(Self { means, stddevs })
    }
}

impl From<StoredStats> for NormalizationStats {
    fn from(stored: StoredStats) -> Self {
        Self {
            means: stored.means,
            stddevs: stored.stddevs,
        }
    }
}

/// Outcome of [`NormalizationStatsStore::compute`].
#[derive(Debug, Clone, Default)]
pub struct StatsReport {
    /// Documents in the population when sampling started.
    pub population: u64,
    /// Documents actually sampled.
    pub sampled: u64,
    /// Metrics whose stats were written by this call.
    pub computed: Vec<String>,
    /// Metrics that already had stats and were left alone.
    pub existing: Vec<String>,
    /// Metrics for which no sampled document had usable data.
    pub unusable: Vec<String>,
}

/// Persisted normalization stats with an in-memory cache.
#[derive(Debug, Default)]
pub struct NormalizationStatsStore {
    cache: RwLock<HashMap<String, NormalizationStats>>,
}

impl NormalizationStatsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store populated from the database.
    pub fn load(db: &Database) -> SimilarityResult<Self> {
        let store = Self::new();
        store.refresh(db)?;
        Ok(store)
    }

    /// Replace the cached stats with what is stored. Returns the number of
    /// metrics that have stats.
    pub fn refresh(&self, db: &Database) -> SimilarityResult<usize> {
        let loaded: HashMap<_, _> = db
            .list_stats()?
            .into_iter()
            .map(|stored| (stored.metric.clone(), NormalizationStats::from(stored)))
            .collect();
        let count = loaded.len();
        *self.cache.write().unwrap_or_else(PoisonError::into_inner) = loaded;
        log::debug!("Loaded normalization stats for {} metrics", count);
        Ok(count)
    }

    pub fn get(&self, metric: &str) -> Option<NormalizationStats> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(metric)
            .cloned()
    }

    /// Stats for `metric`, or [`SimilarityError::StatsNotComputed`].
    pub fn assign(&self, metric: &str) -> SimilarityResult<NormalizationStats> {
        self.get(metric)
            .ok_or_else(|| SimilarityError::StatsNotComputed {
                metric: metric.to_string(),
            })
    }

    /// Stats for a definition if it needs them.
    pub fn for_definition(
        &self,
        definition: &MetricDefinition,
    ) -> SimilarityResult<Option<NormalizationStats>> {
        if definition.normalize {
            self.assign(&definition.name).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Metric names with cached stats, sorted.
    pub fn metrics(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Sample documents and compute stats for every normalized metric in
    /// the catalog.
    ///
    /// Metrics that already have stats are skipped unless `force` is set,
    /// in which case their stats are replaced in the same transaction that
    /// writes the new ones. A metric without usable samples keeps whatever
    /// stats it had. Fails with
    /// [`SimilarityError::InsufficientData`] when the sample would cover
    /// less than `config.min_sample_fraction` of the population.
    pub fn compute(
        &self,
        db: &Database,
        catalog: &MetricCatalog,
        config: &StatsConfig,
        sample_size: u64,
        force: bool,
    ) -> SimilarityResult<StatsReport> {
        let mut report = StatsReport::default();

        let mut pending = Vec::new();
        for definition in catalog.normalized() {
            if !force && db.get_stats(&definition.name)?.is_some() {
                report.existing.push(definition.name.clone());
            } else {
                pending.push(definition);
            }
        }

        if pending.is_empty() {
            log::info!("Normalization stats already present, nothing to compute");
            self.refresh(db)?;
            return Ok(report);
        }

        let population = db.count_feature_documents()?;
        if population == 0 {
            return Err(SimilarityError::InsufficientData(
                "no feature documents have been submitted".to_string(),
            ));
        }
        let sample_size = sample_size.min(population);
        let minimum = ((population as f64 * config.min_sample_fraction).ceil() as u64).max(1);
        if sample_size < minimum {
            return Err(SimilarityError::InsufficientData(format!(
                "sample of {sample_size} is below the minimum of {minimum} ({:.1}% of {population} documents)",
                config.min_sample_fraction * 100.0
            )));
        }

        log::info!(
            "Sampling {} of {} documents for {} metrics",
            sample_size,
            population,
            pending.len()
        );
        report.population = population;

        let ids = db.sample_document_ids(sample_size)?;
        report.sampled = ids.len() as u64;

        let mut rows: BTreeMap<&str, Vec<Vec<f64>>> = BTreeMap::new();
        for doc in db.get_feature_documents(&ids)? {
            for definition in &pending {
                match metrics::extract(definition, &doc) {
                    Ok(values) => rows.entry(definition.name.as_str()).or_default().push(values),
                    Err(e) => log::debug!("Skipping document in stats sample: {}", e),
                }
            }
        }

        let computed_at = Utc::now();
        let fresh: Vec<StoredStats> = pending
            .iter()
            .filter_map(|definition| {
                let samples = rows.get(definition.name.as_str())?;
                let stats = NormalizationStats::from_samples(samples)?;
                Some(StoredStats {
                    metric: definition.name.clone(),
                    means: stats.means,
                    stddevs: stats.stddevs,
                    sample_size: samples.len() as u64,
                    computed_at,
                })
            })
            .collect();

        // Old stats are only replaced by new ones, never just dropped.
        let computed = db.in_transaction(|db| {
            let mut computed = Vec::new();
            for stored in &fresh {
                if force {
                    db.delete_stats(Some(&stored.metric))?;
                }
                if db.insert_stats(stored)? {
                    computed.push(stored.metric.clone());
                } else {
                    log::info!("Stats for {} were written concurrently, keeping them", stored.metric);
                }
            }
            Ok(computed)
        })?;

        for definition in &pending {
            if !rows.contains_key(definition.name.as_str()) {
                log::warn!("No usable documents in the sample for metric {}", definition.name);
                report.unusable.push(definition.name.clone());
            }
        }
        report.computed = computed;

        self.refresh(db)?;
        log::info!("Computed normalization stats for {} metrics", report.computed.len());
        Ok(report)
    }

    /// Delete stats for one metric. Returns whether anything was removed.
    pub fn delete(&self, db: &Database, metric: &str) -> SimilarityResult<bool> {
        let removed = db.delete_stats(Some(metric))? > 0;
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(metric);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sonority_core::model::Mbid;

    fn mbid(n: u128) -> Mbid {
        Mbid::from_uuid(uuid::Uuid::from_u128(n))
    }

    fn submit_mfcc(db: &Database, n: u128, value: f64) {
        let mean: Vec<f64> = (0..13).map(|i| value + f64::from(i)).collect();
        db.submit(mbid(n), &json!({"lowlevel": {"mfcc": {"mean": mean}}}))
            .unwrap();
    }

    fn mfcc_catalog() -> MetricCatalog {
        let builtin = MetricCatalog::builtin();
        MetricCatalog::from_definitions(vec![builtin.require("mfccs").unwrap().clone()]).unwrap()
    }

    #[test]
    fn test_from_samples_population_stddev() {
        let stats = NormalizationStats::from_samples(&[vec![1.0, 5.0], vec![3.0, 5.0]]).unwrap();
        assert_eq!(stats.means, vec![2.0, 5.0]);
        assert_eq!(stats.stddevs, vec![1.0, 0.0]);
        assert!(NormalizationStats::from_samples(&[]).is_none());
    }

    #[test]
    fn test_assign_without_stats() {
        let store = NormalizationStatsStore::new();
        assert!(matches!(
            store.assign("mfccs"),
            Err(SimilarityError::StatsNotComputed { .. })
        ));
    }

    #[test]
    fn test_compute_full_population() {
        let db = Database::open_in_memory().unwrap();
        for (n, value) in [1.0, 2.0, 6.0].into_iter().enumerate() {
            submit_mfcc(&db, n as u128, value);
        }
        let store = NormalizationStatsStore::new();
        let report = store
            .compute(&db, &mfcc_catalog(), &StatsConfig::default(), 100, false)
            .unwrap();

        assert_eq!(report.population, 3);
        assert_eq!(report.sampled, 3);
        assert_eq!(report.computed, vec!["mfccs".to_string()]);

        let stats = store.assign("mfccs").unwrap();
        assert_eq!(stats.means.len(), 12);
        // Index 1 of the mean vectors: values + 1.
        assert!((stats.means[0] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_compute_is_idempotent_unless_forced() {
        let db = Database::open_in_memory().unwrap();
        submit_mfcc(&db, 1, 1.0);
        let store = NormalizationStatsStore::new();
        let catalog = mfcc_catalog();
        let config = StatsConfig::default();

        store.compute(&db, &catalog, &config, 10, false).unwrap();
        let before = db.get_stats("mfccs").unwrap().unwrap();

        submit_mfcc(&db, 2, 10.0);
        let again = store.compute(&db, &catalog, &config, 10, false).unwrap();
        assert!(again.computed.is_empty());
        assert_eq!(again.existing, vec!["mfccs".to_string()]);
        assert_eq!(db.get_stats("mfccs").unwrap().unwrap().means, before.means);

        let forced = store.compute(&db, &catalog, &config, 10, true).unwrap();
        assert_eq!(forced.computed, vec!["mfccs".to_string()]);
        assert_ne!(store.assign("mfccs").unwrap().means, before.means);
    }

    #[test]
    fn test_compute_rejects_small_sample() {
        let db = Database::open_in_memory().unwrap();
        for n in 0..10 {
            submit_mfcc(&db, n, 1.0);
        }
        let config = StatsConfig {
            sample_size: 10,
            min_sample_fraction: 0.5,
        };
        let err = NormalizationStatsStore::new()
            .compute(&db, &mfcc_catalog(), &config, 4, false)
            .unwrap_err();
        assert!(matches!(err, SimilarityError::InsufficientData(_)));
    }

    #[test]
    fn test_compute_empty_population() {
        let db = Database::open_in_memory().unwrap();
        let err = NormalizationStatsStore::new()
            .compute(&db, &mfcc_catalog(), &StatsConfig::default(), 10, false)
            .unwrap_err();
        assert!(matches!(err, SimilarityError::InsufficientData(_)));
    }

    #[test]
    fn test_compute_skips_unusable_documents() {
        let db = Database::open_in_memory().unwrap();
        db.submit(mbid(1), &json!({"rhythm": {"bpm": 120.0}})).unwrap();
        let report = NormalizationStatsStore::new()
            .compute(&db, &mfcc_catalog(), &StatsConfig::default(), 10, false)
            .unwrap();
        assert!(report.computed.is_empty());
        assert_eq!(report.unusable, vec!["mfccs".to_string()]);
    }

    #[test]
    fn test_forced_compute_keeps_stats_without_usable_sample() {
        let db = Database::open_in_memory().unwrap();
        submit_mfcc(&db, 1, 1.0);
        let store = NormalizationStatsStore::new();
        let catalog = mfcc_catalog();
        let config = StatsConfig::default();
        store.compute(&db, &catalog, &config, 10, false).unwrap();
        let before = db.get_stats("mfccs").unwrap().unwrap();

        db.conn()
            .execute("UPDATE feature_documents SET data = '{\"rhythm\": {}}'", [])
            .unwrap();
        let report = store.compute(&db, &catalog, &config, 10, true).unwrap();

        assert!(report.computed.is_empty());
        assert_eq!(report.unusable, vec!["mfccs".to_string()]);
        assert_eq!(db.get_stats("mfccs").unwrap().unwrap().means, before.means);
        assert!(store.assign("mfccs").is_ok());
    }

    #[test]
    fn test_load_and_delete() {
        let db = Database::open_in_memory().unwrap();
        submit_mfcc(&db, 1, 1.0);
        NormalizationStatsStore::new()
            .compute(&db, &mfcc_catalog(), &StatsConfig::default(), 10, false)
            .unwrap();

        let store = NormalizationStatsStore::load(&db).unwrap();
        assert_eq!(store.metrics(), vec!["mfccs".to_string()]);
        assert!(store.delete(&db, "mfccs").unwrap());
        assert!(store.get("mfccs").is_none());
        assert!(db.get_stats("mfccs").unwrap().is_none());
        assert!(!store.delete(&db, "mfccs").unwrap());
    }
}
