//! Approximate nearest-neighbour indexes over stored metric vectors.
//!
//! An index moves through four states. It starts `Empty`, becomes
//! `Populating` with the first [`ApproximateIndex::add_item`], turns
//! `Built` on [`ApproximateIndex::build`] and `Persisted` once saved or
//! loaded from disk. Only `Empty` and `Populating` accept items; only
//! `Built` and `Persisted` answer queries.

pub mod config;
pub mod distance;
pub mod forest;
pub mod persist;
pub mod registry;

use rand::prelude::*;
use sonority_core::model::{InternalId, Recording};
use sonority_core::schema::Database;
use sonority_core::IdentifierTranslator;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::error::{SimilarityError, SimilarityResult};

pub use config::{IndexConfig, IndexSettings, MAX_TREES};
pub use distance::DistanceType;
pub use forest::Forest;
pub use registry::IndexRegistry;

/// Vectors read from the store per page while populating.
const POPULATE_PAGE: usize = 10_000;

#[derive(Debug)]
enum IndexState {
    Empty,
    Populating { items: BTreeMap<usize, Vec<f32>> },
    Built { forest: Forest },
    Persisted { forest: Forest, path: PathBuf },
}

impl IndexState {
    const fn name(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Populating { .. } => "populating",
            Self::Built { .. } => "built",
            Self::Persisted { .. } => "persisted",
        }
    }
}

/// One index over a single metric, distance function and tree count.
#[derive(Debug)]
pub struct ApproximateIndex {
    config: IndexConfig,
    dimension: usize,
    leaf_size: usize,
    seed: Option<u64>,
    state: IndexState,
}

impl ApproximateIndex {
    /// Create an empty index for vectors of length `dimension`.
    pub fn new(config: IndexConfig, dimension: usize, settings: &IndexSettings) -> SimilarityResult<Self> {
        if dimension == 0 {
            return Err(SimilarityError::Configuration(format!(
                "index {config} needs a positive dimension"
            )));
        }
        Ok(Self {
            config,
            dimension,
            leaf_size: settings.leaf_size,
            seed: settings.seed,
            state: IndexState::Empty,
        })
    }

    /// Load a persisted index from `dir`.
    pub fn load(config: IndexConfig, dir: &Path) -> SimilarityResult<Self> {
        let started = Instant::now();
        let (forest, path) = persist::read(dir, &config)?;
        log::info!(
            "Loaded index {} ({} items) in {:?}",
            config,
            forest.indexed_count(),
            started.elapsed()
        );
        let settings = IndexSettings::default();
        Ok(Self {
            config,
            dimension: forest.dimension(),
            leaf_size: settings.leaf_size,
            seed: None,
            state: IndexState::Persisted { forest, path },
        })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// `empty`, `populating`, `built` or `persisted`.
    pub fn state_name(&self) -> &'static str {
        self.state.name()
    }

    pub fn is_built(&self) -> bool {
        matches!(
            self.state,
            IndexState::Built { .. } | IndexState::Persisted { .. }
        )
    }

    /// Where the index was saved, once persisted.
    pub fn path(&self) -> Option<&Path> {
        match &self.state {
            IndexState::Persisted { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Number of items added, placeholders excluded.
    pub fn len(&self) -> usize {
        match &self.state {
            IndexState::Empty => 0,
            IndexState::Populating { items } => items.len(),
            IndexState::Built { forest } | IndexState::Persisted { forest, .. } => {
                forest.indexed_count()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn immutable(&self) -> SimilarityError {
        SimilarityError::ImmutableState {
            key: self.config.key(),
            state: self.state.name(),
        }
    }

    fn slot(&self, id: InternalId) -> SimilarityResult<usize> {
        id.as_index().ok_or_else(|| {
            SimilarityError::Configuration(format!("negative id {id} cannot be indexed"))
        })
    }

    /// Add a vector under `id`. Returns `false` when `id` was already added,
    /// in which case the first vector is kept.
    pub fn add_item(&mut self, id: InternalId, vector: &[f64]) -> SimilarityResult<bool> {
        if vector.len() != self.dimension {
            return Err(SimilarityError::Configuration(format!(
                "vector of length {} for index {} of dimension {}",
                vector.len(),
                self.config,
                self.dimension
            )));
        }
        let slot = self.slot(id)?;

        if matches!(self.state, IndexState::Empty) {
            self.state = IndexState::Populating {
                items: BTreeMap::new(),
            };
        }
        match &mut self.state {
            IndexState::Populating { items } => {
                if items.contains_key(&slot) {
                    return Ok(false);
                }
                items.insert(slot, vector.iter().map(|v| *v as f32).collect());
                Ok(true)
            }
            _ => Err(self.immutable()),
        }
    }

    /// Build the trees. Ids below the highest added id that were never added
    /// are filled with zero vectors.
    pub fn build(&mut self) -> SimilarityResult<()> {
        let items = match &mut self.state {
            IndexState::Populating { items } => std::mem::take(items),
            IndexState::Empty => {
                return Err(SimilarityError::InsufficientData(format!(
                    "index {} has no items to build from",
                    self.config
                )));
            }
            _ => return Err(self.immutable()),
        };

        let started = Instant::now();
        let slots = items.keys().next_back().map_or(0, |max| max + 1);
        let mut vectors = vec![vec![0.0f32; self.dimension]; slots];
        let mut indexed = vec![false; slots];
        let added = items.len();
        for (slot, vector) in items {
            vectors[slot] = vector;
            indexed[slot] = true;
        }

        let mut rng = StdRng::seed_from_u64(self.seed.unwrap_or_else(rand::random));
        let forest = Forest::build(
            self.config.distance(),
            self.dimension,
            vectors,
            indexed,
            self.config.trees(),
            self.leaf_size,
            &mut rng,
        );
        log::info!(
            "Built index {} over {} items ({} placeholders) in {:?}",
            self.config,
            added,
            slots - added,
            started.elapsed()
        );
        self.state = IndexState::Built { forest };
        Ok(())
    }

    fn forest(&self) -> SimilarityResult<&Forest> {
        match &self.state {
            IndexState::Built { forest } | IndexState::Persisted { forest, .. } => Ok(forest),
            other => Err(SimilarityError::IndexNotAvailable {
                key: self.config.key(),
                reason: format!("index is {}", other.name()),
            }),
        }
    }

    /// Whether `id` was explicitly added before the build.
    pub fn contains(&self, id: InternalId) -> bool {
        match (self.forest(), id.as_index()) {
            (Ok(forest), Some(slot)) => forest.is_indexed(slot),
            _ => false,
        }
    }

    /// The `k` approximate nearest neighbours of `id`, nearest first.
    ///
    /// The result includes `id` itself and may include zero placeholders.
    pub fn query(&self, id: InternalId, k: usize) -> SimilarityResult<Vec<(InternalId, f64)>> {
        let (forest, vector) = self.indexed_item(id)?;
        let neighbours = to_ids(forest.search(vector, k, self.search_k(k)));
        log::debug!("Queried {} for {} (k={})", self.config, id, k);
        Ok(neighbours)
    }

    /// The `k` approximate nearest added items to `id`, nearest first.
    ///
    /// Unlike [`ApproximateIndex::query`] placeholders never take up a
    /// place in the result. `id` itself is included.
    pub fn neighbours(&self, id: InternalId, k: usize) -> SimilarityResult<Vec<(InternalId, f64)>> {
        let (forest, vector) = self.indexed_item(id)?;
        let neighbours = to_ids(forest.search_indexed(vector, k, self.search_k(k)));
        log::debug!("Queried {} for {} added neighbours (k={})", self.config, id, k);
        Ok(neighbours)
    }

    fn search_k(&self, k: usize) -> usize {
        k.saturating_mul(self.config.trees() as usize)
    }

    fn indexed_item(&self, id: InternalId) -> SimilarityResult<(&Forest, &[f32])> {
        let forest = self.forest()?;
        let slot = self.slot(id)?;
        match forest.item(slot) {
            Some(vector) if forest.is_indexed(slot) => Ok((forest, vector)),
            _ => Err(SimilarityError::ItemNotIndexed {
                key: self.config.key(),
                id,
            }),
        }
    }

    /// Neighbours of `id` as public recordings, excluding `id` itself and
    /// any id that was not added.
    pub fn similar<T: IdentifierTranslator>(
        &self,
        translator: &T,
        id: InternalId,
        k: usize,
    ) -> SimilarityResult<Vec<(Recording, f64)>> {
        let neighbours: Vec<_> = self
            .neighbours(id, k.saturating_add(1))?
            .into_iter()
            .filter(|(other, _)| *other != id)
            .collect();

        let ids: Vec<_> = neighbours.iter().map(|(other, _)| *other).collect();
        let recordings = translator.to_public_bulk(&ids)?;
        Ok(recordings
            .into_iter()
            .zip(neighbours)
            .filter_map(|(recording, (_, distance))| recording.map(|r| (r, distance)))
            .take(k)
            .collect())
    }

    /// Query several recordings at once.
    ///
    /// Recordings that are unknown or not in the index are left out of the
    /// result rather than failing the batch.
    pub fn query_many<T: IdentifierTranslator>(
        &self,
        translator: &T,
        recordings: &[Recording],
        k: usize,
    ) -> SimilarityResult<BTreeMap<Recording, Vec<(Recording, f64)>>> {
        let mut results = BTreeMap::new();
        for recording in recordings {
            let id = match translator.to_internal(recording) {
                Ok(id) => id,
                Err(e) if e.is_not_found() => {
                    log::debug!("Skipping unknown recording {}", recording);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            match self.similar(translator, id, k) {
                Ok(neighbours) => {
                    results.insert(*recording, neighbours);
                }
                Err(SimilarityError::ItemNotIndexed { .. }) => {
                    log::debug!("Skipping unindexed recording {}", recording);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(results)
    }

    /// Distance between two added items, or `None` if either was not added
    /// or the index is not built.
    pub fn distance_between(&self, a: InternalId, b: InternalId) -> Option<f64> {
        let forest = self.forest().ok()?;
        let (a, b) = (a.as_index()?, b.as_index()?);
        if !(forest.is_indexed(a) && forest.is_indexed(b)) {
            return None;
        }
        Some(forest.distance().distance(forest.item(a)?, forest.item(b)?))
    }

    /// Write the built index to `dir` and mark it persisted.
    pub fn save(&mut self, dir: &Path) -> SimilarityResult<PathBuf> {
        let path = persist::write(dir, &self.config, self.forest()?)?;
        self.state = match std::mem::replace(&mut self.state, IndexState::Empty) {
            IndexState::Built { forest } | IndexState::Persisted { forest, .. } => {
                IndexState::Persisted {
                    forest,
                    path: path.clone(),
                }
            }
            other => other,
        };
        Ok(path)
    }
}

fn to_ids(ranked: Vec<(usize, f64)>) -> Vec<(InternalId, f64)> {
    ranked
        .into_iter()
        .map(|(slot, distance)| (InternalId::new(slot as i64), distance))
        .collect()
}

/// Populate and build an index from every vector stored for the config's
/// metric.
pub fn build_from_store(
    db: &Database,
    config: IndexConfig,
    dimension: usize,
    settings: &IndexSettings,
) -> SimilarityResult<ApproximateIndex> {
    let mut index = ApproximateIndex::new(config, dimension, settings)?;
    let metric = index.config().metric().to_string();
    let total = db.count_vectors(&metric)?;
    if total == 0 {
        return Err(SimilarityError::InsufficientData(format!(
            "no vectors stored for metric {metric}"
        )));
    }
    log::info!("Populating index {} from {} vectors", index.config(), total);

    let mut seen = HashSet::new();
    let mut after = None;
    loop {
        let page = db.vectors_after(&metric, after, POPULATE_PAGE)?;
        let Some((last, _)) = page.last() else {
            break;
        };
        after = Some(*last);
        for (id, vector) in page {
            if vector.len() != dimension {
                return Err(SimilarityError::Configuration(format!(
                    "stored {metric} vector for {id} has length {}, expected {dimension}",
                    vector.len()
                )));
            }
            index.add_item(id, &vector)?;
            seen.insert(id);
        }
        log::debug!("Added {} / {} items to {}", seen.len(), total, index.config());
    }

    index.build()?;
    Ok(index)
}
