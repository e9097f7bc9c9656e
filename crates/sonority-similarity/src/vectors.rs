//! Persisted per-recording metric vectors.

use sonority_core::model::InternalId;
use sonority_core::schema::Database;
use sonority_core::FeatureAccessor;

use crate::error::{SimilarityError, SimilarityResult};
use crate::metrics::{MetricCatalog, MetricDefinition, MetricSource, VectorBuilder};
use crate::stats::NormalizationStatsStore;

/// Counts from one [`SimilarityVectorStore::add_metrics`] run. Each count is
/// over `(recording, metric)` pairs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddMetricsReport {
    pub processed: u64,
    pub inserted: u64,
    pub failures: u64,
}

impl AddMetricsReport {
    fn absorb(&mut self, other: Self) {
        self.processed += other.processed;
        self.inserted += other.inserted;
        self.failures += other.failures;
    }
}

/// Prepare the builder for one metric. A hybrid gets the builders of its
/// parts, each with the part's own stats.
pub fn builder_for(
    definition: &MetricDefinition,
    stats: &NormalizationStatsStore,
) -> SimilarityResult<VectorBuilder> {
    match &definition.source {
        MetricSource::Hybrid { parts } => {
            let parts = parts
                .iter()
                .map(|part| builder_for(part, stats))
                .collect::<SimilarityResult<Vec<_>>>()?;
            VectorBuilder::hybrid(definition, parts)
        }
        _ => {
            let stats = stats.for_definition(definition)?;
            VectorBuilder::new(definition, stats.as_ref())
        }
    }
}

/// Prepare a builder for every metric in the catalog.
///
/// Fails with [`SimilarityError::StatsNotComputed`] if a normalized metric
/// has no stats yet.
pub fn builders_for(
    catalog: &MetricCatalog,
    stats: &NormalizationStatsStore,
) -> SimilarityResult<Vec<VectorBuilder>> {
    catalog
        .iter()
        .map(|definition| builder_for(definition, stats))
        .collect()
}

/// Read and write access to `similarity_vectors`.
#[derive(Debug, Clone, Copy)]
pub struct SimilarityVectorStore<'db> {
    db: &'db Database,
}

impl<'db> SimilarityVectorStore<'db> {
    pub fn new(db: &'db Database) -> Self {
        Self { db }
    }

    /// Compute every missing vector for every metric in the catalog.
    ///
    /// Work is committed in batches of `batch_size` recordings per metric,
    /// so an interrupted run loses at most one batch and can simply be
    /// repeated. Documents a transform rejects are recorded as failures and
    /// are not retried.
    ///
    /// With `force`, each metric's stored vectors and failures are cleared
    /// before it is computed, so every document goes through the current
    /// transform again.
    pub fn add_metrics(
        &self,
        catalog: &MetricCatalog,
        stats: &NormalizationStatsStore,
        batch_size: usize,
        force: bool,
    ) -> SimilarityResult<AddMetricsReport> {
        if batch_size == 0 {
            return Err(SimilarityError::Configuration(
                "batch size must be at least 1".to_string(),
            ));
        }
        let builders = builders_for(catalog, stats)?;

        let mut report = AddMetricsReport::default();
        for builder in &builders {
            if force {
                let cleared = self.db.delete_metric_vectors(builder.name())?;
                log::info!("Cleared {} {} vectors for recompute", cleared, builder.name());
            }
            report.absorb(self.add_metric(builder, batch_size)?);
        }
        log::info!(
            "Processed {} vectors: {} inserted, {} failed",
            report.processed,
            report.inserted,
            report.failures
        );
        Ok(report)
    }

    fn add_metric(&self, builder: &VectorBuilder, batch_size: usize) -> SimilarityResult<AddMetricsReport> {
        let metric = builder.name();
        let total = self.db.count_missing_vectors(metric)?;
        let mut report = AddMetricsReport::default();
        if total == 0 {
            log::debug!("No missing vectors for {}", metric);
            return Ok(report);
        }
        log::info!("Computing {} vectors for {}", total, metric);

        loop {
            let ids = self.db.ids_missing_vector(metric, batch_size)?;
            if ids.is_empty() {
                break;
            }

            let mut computed = Vec::with_capacity(ids.len());
            for doc in self.db.get_feature_documents(&ids)? {
                let id = doc.id;
                match builder.transform(&doc) {
                    Ok(vector) => computed.push((id, Ok(vector))),
                    Err(e @ SimilarityError::InvalidFeatureData { .. }) => {
                        log::warn!("{}", e);
                        computed.push((id, Err(e.to_string())));
                    }
                    Err(e) => return Err(e),
                }
            }

            let batch = self.db.in_transaction(|db| {
                let mut batch = AddMetricsReport::default();
                for (id, outcome) in &computed {
                    match outcome {
                        Ok(vector) => {
                            db.upsert_vector(*id, metric, vector)?;
                            batch.inserted += 1;
                        }
                        Err(reason) => {
                            db.record_vector_failure(*id, metric, reason)?;
                            batch.failures += 1;
                        }
                    }
                    batch.processed += 1;
                }
                Ok(batch)
            })?;
            report.absorb(batch);

            log::info!(
                "{}: {} / {} ({:.1}%)",
                metric,
                report.processed,
                total,
                report.processed as f64 * 100.0 / total as f64
            );
        }
        Ok(report)
    }

    /// Compute and store every metric vector for one recording. Transform
    /// failures are recorded and returned as `(metric, reason)` pairs.
    pub fn add_recording(
        &self,
        id: InternalId,
        builders: &[VectorBuilder],
    ) -> SimilarityResult<Vec<(String, String)>> {
        let doc = self.db.get_feature_document(id)?;
        let mut failures = Vec::new();
        let mut vectors = Vec::new();
        for builder in builders {
            match builder.transform(&doc) {
                Ok(vector) => vectors.push((builder.name(), vector)),
                Err(e @ SimilarityError::InvalidFeatureData { .. }) => {
                    failures.push((builder.name().to_string(), e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }

        self.db.in_transaction(|db| {
            for (metric, vector) in &vectors {
                db.upsert_vector(id, metric, vector)?;
            }
            for (metric, reason) in &failures {
                db.record_vector_failure(id, metric, reason)?;
            }
            Ok(())
        })?;
        Ok(failures)
    }

    pub fn get_vector(&self, id: InternalId, metric: &str) -> SimilarityResult<Option<Vec<f64>>> {
        Ok(self.db.get_vector(id, metric)?)
    }

    pub fn count(&self, metric: &str) -> SimilarityResult<u64> {
        Ok(self.db.count_vectors(metric)?)
    }

    /// Recordings that still need a vector for `metric`.
    pub fn pending(&self, metric: &str) -> SimilarityResult<u64> {
        Ok(self.db.count_missing_vectors(metric)?)
    }

    pub fn failures(&self, metric: &str) -> SimilarityResult<Vec<(InternalId, String)>> {
        Ok(self.db.list_vector_failures(metric)?)
    }

    /// Delete all vectors and failure records for `metric`.
    pub fn remove_metric(&self, metric: &str) -> SimilarityResult<usize> {
        let removed = self.db.delete_metric_vectors(metric)?;
        log::info!("Removed {} vectors for {}", removed, metric);
        Ok(removed)
    }
}
