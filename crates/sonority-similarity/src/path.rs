//! Paths between two recordings through successively closer neighbours.
//!
//! The walk starts at `start` and repeatedly looks at the neighbourhood of
//! the current pivot. Neighbours closer to the target than the pivot
//! qualify; the closest becomes the next pivot and a random share of the
//! rest is kept along the way. A step without any qualifying neighbour
//! widens the neighbourhood; too many of those in a row end the walk.

use rand::prelude::*;
use rand::seq::index::sample as sample_indices;
use serde::{Deserialize, Serialize};
use sonority_core::model::{InternalId, Recording};
use sonority_core::IdentifierTranslator;
use std::collections::HashSet;

use crate::error::{SimilarityError, SimilarityResult};
use crate::index::ApproximateIndex;

/// Tuning for [`PathFinder`], from the `[path]` config section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathFinderConfig {
    /// Neighbourhood size for a fresh pivot.
    pub initial_neighbours: usize,
    /// Neighbourhood multiplier after a step without progress.
    pub growth_factor: f64,
    /// Consecutive steps without progress before the walk gives up.
    pub max_stall_steps: u32,
    /// Share of the non-pivot qualifying neighbours added to the path.
    pub sample_fraction: f64,
    /// Seed for candidate sampling. Random per request when unset.
    pub seed: Option<u64>,
}

impl Default for PathFinderConfig {
    fn default() -> Self {
        Self {
            initial_neighbours: 55,
            growth_factor: 2.0,
            max_stall_steps: 3,
            sample_fraction: 0.7,
            seed: None,
        }
    }
}

impl PathFinderConfig {
    pub fn validate(&self) -> SimilarityResult<()> {
        let fail = |reason: &str| Err(SimilarityError::Configuration(format!("path: {reason}")));
        if self.initial_neighbours == 0 {
            return fail("initial_neighbours must be at least 1");
        }
        if !(self.growth_factor.is_finite() && self.growth_factor > 1.0) {
            return fail("growth_factor must be greater than 1");
        }
        if self.max_stall_steps == 0 {
            return fail("max_stall_steps must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.sample_fraction) {
            return fail("sample_fraction must lie between 0 and 1");
        }
        Ok(())
    }
}

/// One recording on a path and its distance to the target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathStep {
    pub recording: Recording,
    pub distance: f64,
}

/// Resolve a public recording, reporting unknown ones as
/// [`SimilarityError::NotFound`].
pub(crate) fn resolve<T: IdentifierTranslator>(
    translator: &T,
    recording: &Recording,
) -> SimilarityResult<InternalId> {
    translator.to_internal(recording).map_err(|e| {
        if e.is_not_found() {
            SimilarityError::NotFound {
                entity: "recording",
                id: recording.to_string(),
            }
        } else {
            e.into()
        }
    })
}

struct Candidate {
    id: InternalId,
    recording: Recording,
    distance: f64,
}

#[derive(Debug, Clone)]
pub struct PathFinder {
    config: PathFinderConfig,
}

impl PathFinder {
    pub fn new(config: PathFinderConfig) -> SimilarityResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PathFinderConfig {
        &self.config
    }

    /// Build a path of at most `max_length` steps from `start` to `target`.
    ///
    /// The first step is `start`, the last is always `target`.
    pub fn find<T: IdentifierTranslator>(
        &self,
        index: &ApproximateIndex,
        translator: &T,
        start: &Recording,
        target: &Recording,
        max_length: usize,
    ) -> SimilarityResult<Vec<PathStep>> {
        if max_length < 2 {
            return Err(SimilarityError::Configuration(format!(
                "path length must be at least 2, got {max_length}"
            )));
        }
        let start_id = resolve(translator, start)?;
        let target_id = resolve(translator, target)?;
        let finish = PathStep {
            recording: *target,
            distance: 0.0,
        };
        if start_id == target_id {
            return Ok(vec![finish]);
        }

        let distance_to_target = |id: InternalId| {
            index
                .distance_between(id, target_id)
                .ok_or_else(|| SimilarityError::DistanceUnavailable {
                    key: index.config().key(),
                    a: id,
                    b: target_id,
                })
        };

        let mut rng = StdRng::seed_from_u64(self.config.seed.unwrap_or_else(rand::random));
        let mut best = distance_to_target(start_id)?;
        let mut path = vec![PathStep {
            recording: *start,
            distance: best,
        }];
        let mut visited = HashSet::from([start_id]);
        let mut current = start_id;
        let mut neighbours = self.config.initial_neighbours;
        let mut stalls = 0;

        log::debug!("Finding path {} -> {} (max {})", start, target, max_length);

        while path.len() + 1 < max_length && stalls < self.config.max_stall_steps {
            let found = index.neighbours(current, neighbours)?;
            let ids: Vec<_> = found.iter().map(|(id, _)| *id).collect();
            let recordings = translator.to_public_bulk(&ids)?;

            let mut reached = false;
            let mut qualifying = Vec::new();
            for (id, recording) in ids.into_iter().zip(recordings) {
                if id == target_id {
                    reached = true;
                    break;
                }
                let Some(recording) = recording else {
                    continue;
                };
                if recording == *target || visited.contains(&id) || !index.contains(id) {
                    continue;
                }
                let distance = distance_to_target(id)?;
                if distance < best {
                    qualifying.push(Candidate {
                        id,
                        recording,
                        distance,
                    });
                }
            }
            if reached {
                log::debug!("Target is a neighbour of {}", current);
                break;
            }

            let Some(pivot_at) = qualifying
                .iter()
                .enumerate()
                .min_by(|a, b| a.1.distance.total_cmp(&b.1.distance))
                .map(|(i, _)| i)
            else {
                stalls += 1;
                neighbours = ((neighbours as f64) * self.config.growth_factor).ceil() as usize;
                log::debug!("No progress from {}, widening to {}", current, neighbours);
                continue;
            };
            stalls = 0;
            neighbours = self.config.initial_neighbours;

            let pivot = qualifying.remove(pivot_at);
            let keep = ((qualifying.len() as f64) * self.config.sample_fraction).round() as usize;
            let mut picked = sample_indices(&mut rng, qualifying.len(), keep).into_vec();
            picked.sort_unstable();
            for i in picked {
                let candidate = &qualifying[i];
                if visited.insert(candidate.id) {
                    path.push(PathStep {
                        recording: candidate.recording,
                        distance: candidate.distance,
                    });
                }
            }
            visited.insert(pivot.id);
            path.push(PathStep {
                recording: pivot.recording,
                distance: pivot.distance,
            });
            best = pivot.distance;
            current = pivot.id;
        }

        if path.len() >= max_length {
            path.truncate(max_length - 1);
        }
        path.push(finish);
        Ok(path)
    }
}
