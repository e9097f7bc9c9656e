//! Random-projection forest.
//!
//! Each tree splits its items recursively by the hyperplane between two
//! randomly chosen items until a node holds at most `leaf_size` items.
//! Search walks all trees at once through a priority queue ordered by the
//! margin to each split, collects candidates from the leaves it reaches and
//! ranks them by exact distance.

use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::index::distance::DistanceType;

/// Attempts at a useful hyperplane before splitting a node at random.
const SPLIT_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf(Vec<u32>),
    Split {
        normal: Vec<f32>,
        offset: f32,
        left: usize,
        right: usize,
    },
}

/// Items stored densely by slot, plus the trees over them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Forest {
    distance: DistanceType,
    dimension: usize,
    items: Vec<Vec<f32>>,
    /// `false` for zero placeholders standing in for ids never added.
    indexed: Vec<bool>,
    nodes: Vec<Node>,
    roots: Vec<usize>,
}

fn margin(normal: &[f32], offset: f32, x: &[f32]) -> f64 {
    normal
        .iter()
        .zip(x)
        .map(|(n, v)| f64::from(*n) * f64::from(*v))
        .sum::<f64>()
        + f64::from(offset)
}

fn unit(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| (f64::from(*x) / norm) as f32).collect()
    } else {
        v.to_vec()
    }
}

#[derive(Debug, PartialEq)]
struct Pending {
    priority: f64,
    node: usize,
}

impl Eq for Pending {}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Forest {
    /// Build `trees` trees over `items`. `items[i]` is slot `i`.
    pub fn build(
        distance: DistanceType,
        dimension: usize,
        items: Vec<Vec<f32>>,
        indexed: Vec<bool>,
        trees: u32,
        leaf_size: usize,
        rng: &mut StdRng,
    ) -> Self {
        let mut forest = Self {
            distance,
            dimension,
            items,
            indexed,
            nodes: Vec::new(),
            roots: Vec::with_capacity(trees as usize),
        };
        let all: Vec<u32> = (0..forest.items.len() as u32).collect();
        let leaf_size = leaf_size.max(1);
        for _ in 0..trees {
            let root = forest.build_node(all.clone(), leaf_size, rng);
            forest.roots.push(root);
        }
        forest
    }

    fn build_node(&mut self, slots: Vec<u32>, leaf_size: usize, rng: &mut StdRng) -> usize {
        if slots.len() <= leaf_size {
            self.nodes.push(Node::Leaf(slots));
            return self.nodes.len() - 1;
        }
        let (normal, offset, left, right) = self.split(&slots, rng);
        let left = self.build_node(left, leaf_size, rng);
        let right = self.build_node(right, leaf_size, rng);
        self.nodes.push(Node::Split {
            normal,
            offset,
            left,
            right,
        });
        self.nodes.len() - 1
    }

    fn hyperplane(&self, p: usize, q: usize) -> (Vec<f32>, f32) {
        let (p, q) = (&self.items[p], &self.items[q]);
        match self.distance {
            DistanceType::Angular => {
                let normal = unit(p).iter().zip(unit(q)).map(|(a, b)| a - b).collect();
                (normal, 0.0)
            }
            DistanceType::Euclidean | DistanceType::Manhattan => {
                let normal: Vec<f32> = p.iter().zip(q).map(|(a, b)| a - b).collect();
                let midpoint: Vec<f32> = p.iter().zip(q).map(|(a, b)| (a + b) / 2.0).collect();
                let offset = -margin(&normal, 0.0, &midpoint) as f32;
                (normal, offset)
            }
        }
    }

    fn split(&self, slots: &[u32], rng: &mut StdRng) -> (Vec<f32>, f32, Vec<u32>, Vec<u32>) {
        let n = slots.len();
        for _ in 0..SPLIT_ATTEMPTS {
            let i = rng.random_range(0..n);
            let mut j = rng.random_range(0..n - 1);
            if j >= i {
                j += 1;
            }
            let (normal, offset) = self.hyperplane(slots[i] as usize, slots[j] as usize);
            if normal.iter().all(|v| *v == 0.0) {
                continue;
            }

            let (mut left, mut right) = (Vec::new(), Vec::new());
            for &slot in slots {
                let m = margin(&normal, offset, &self.items[slot as usize]);
                let goes_right = if m == 0.0 { rng.random_bool(0.5) } else { m > 0.0 };
                if goes_right {
                    right.push(slot);
                } else {
                    left.push(slot);
                }
            }
            if !left.is_empty() && !right.is_empty() {
                return (normal, offset, left, right);
            }
        }

        // Identical points: any split is as good as another.
        let mut left = slots.to_vec();
        left.shuffle(rng);
        let right = left.split_off(n / 2);
        (vec![0.0; self.dimension], 0.0, left, right)
    }

    /// Candidate slots from the leaves nearest `query`, collected until at
    /// least `search_k` were seen. The flag is set once every leaf of every
    /// tree was visited.
    fn candidates(&self, query: &[f32], search_k: usize) -> (Vec<u32>, bool) {
        let mut heap: BinaryHeap<Pending> = self
            .roots
            .iter()
            .map(|&node| Pending {
                priority: f64::INFINITY,
                node,
            })
            .collect();
        let mut candidates: Vec<u32> = Vec::new();

        while candidates.len() < search_k {
            let Some(Pending { priority, node }) = heap.pop() else {
                break;
            };
            match &self.nodes[node] {
                Node::Leaf(slots) => candidates.extend_from_slice(slots),
                Node::Split {
                    normal,
                    offset,
                    left,
                    right,
                } => {
                    let m = margin(normal, *offset, query);
                    heap.push(Pending {
                        priority: priority.min(m),
                        node: *right,
                    });
                    heap.push(Pending {
                        priority: priority.min(-m),
                        node: *left,
                    });
                }
            }
        }

        candidates.sort_unstable();
        candidates.dedup();
        (candidates, heap.is_empty())
    }

    fn rank(&self, query: &[f32], candidates: Vec<u32>, k: usize) -> Vec<(usize, f64)> {
        let mut ranked: Vec<(usize, f64)> = candidates
            .into_iter()
            .map(|slot| {
                let slot = slot as usize;
                (slot, self.distance.distance(query, &self.items[slot]))
            })
            .collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        ranked.truncate(k);
        ranked
    }

    /// Approximate `k` nearest slots to `query`, nearest first. At least
    /// `search_k` candidates are collected from the trees before ranking.
    /// Placeholders are ranked like any other slot.
    pub fn search(&self, query: &[f32], k: usize, search_k: usize) -> Vec<(usize, f64)> {
        if k == 0 || self.items.is_empty() {
            return Vec::new();
        }
        let (candidates, _) = self.candidates(query, search_k);
        self.rank(query, candidates, k)
    }

    /// Like [`Forest::search`], but only indexed slots are ranked.
    ///
    /// When placeholders crowd the first `search_k` candidates, `search_k`
    /// doubles until `k` indexed slots are found or the trees run out.
    pub fn search_indexed(&self, query: &[f32], k: usize, search_k: usize) -> Vec<(usize, f64)> {
        let wanted = k.min(self.indexed_count());
        if wanted == 0 {
            return Vec::new();
        }

        let mut search_k = search_k.max(1);
        loop {
            let (mut candidates, exhausted) = self.candidates(query, search_k);
            candidates.retain(|slot| self.is_indexed(*slot as usize));
            if candidates.len() >= wanted || exhausted {
                return self.rank(query, candidates, k);
            }
            log::trace!(
                "{} of {} indexed candidates at search_k={}, widening",
                candidates.len(),
                wanted,
                search_k
            );
            search_k = search_k.saturating_mul(2);
        }
    }

    pub fn item(&self, slot: usize) -> Option<&[f32]> {
        self.items.get(slot).map(Vec::as_slice)
    }

    /// Whether `slot` holds a real item rather than a placeholder.
    pub fn is_indexed(&self, slot: usize) -> bool {
        self.indexed.get(slot).copied().unwrap_or(false)
    }

    pub fn distance(&self) -> DistanceType {
        self.distance
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of slots, placeholders included.
    pub fn slots(&self) -> usize {
        self.items.len()
    }

    pub fn indexed_count(&self) -> usize {
        self.indexed.iter().filter(|i| **i).count()
    }

    pub fn tree_count(&self) -> usize {
        self.roots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(n: usize) -> Vec<Vec<f32>> {
        (0..n)
            .map(|i| vec![(i % 10) as f32, (i / 10) as f32])
            .collect()
    }

    fn build(distance: DistanceType, items: Vec<Vec<f32>>, trees: u32, leaf: usize) -> Forest {
        let indexed = vec![true; items.len()];
        let mut rng = StdRng::seed_from_u64(7);
        Forest::build(distance, 2, items, indexed, trees, leaf, &mut rng)
    }

    #[test]
    fn test_small_forest_is_exact() {
        let forest = build(DistanceType::Euclidean, grid(20), 3, 32);
        let result = forest.search(&[0.0, 0.0], 3, 30);
        assert_eq!(result[0], (0, 0.0));
        assert_eq!(result[1].0, 1);
        assert_eq!(result[2].0, 10);
    }

    #[test]
    fn test_split_forest_finds_neighbours() {
        let forest = build(DistanceType::Euclidean, grid(100), 10, 4);
        assert!(forest.nodes.len() > forest.tree_count());
        let result = forest.search(&[5.0, 5.0], 5, 1000);
        assert_eq!(result[0].0, 55);
        assert!(result.iter().all(|(_, d)| *d <= 1.0 + 1e-9));
    }

    #[test]
    fn test_identical_items_still_split() {
        let items = vec![vec![0.0, 0.0]; 50];
        let forest = build(DistanceType::Angular, items, 2, 4);
        let result = forest.search(&[0.0, 0.0], 50, 500);
        assert_eq!(result.len(), 50);
    }

    #[test]
    fn test_build_is_deterministic_for_seed() {
        let a = build(DistanceType::Angular, grid(60), 4, 3);
        let b = build(DistanceType::Angular, grid(60), 4, 3);
        assert_eq!(
            a.search(&[3.0, 4.0], 10, 40),
            b.search(&[3.0, 4.0], 10, 40)
        );
    }

    #[test]
    fn test_search_indexed_skips_placeholders() {
        // One real item far from a crowd of zero placeholders.
        let mut items = vec![vec![0.0, 0.0]; 40];
        items.push(vec![9.0, 9.0]);
        let mut indexed = vec![false; 41];
        indexed[0] = true;
        indexed[40] = true;
        let mut rng = StdRng::seed_from_u64(7);
        let forest = Forest::build(DistanceType::Euclidean, 2, items, indexed, 2, 2, &mut rng);

        let raw = forest.search(&[0.0, 0.0], 2, 4);
        assert!(raw.iter().any(|(slot, _)| !forest.is_indexed(*slot)));

        let result = forest.search_indexed(&[0.0, 0.0], 2, 4);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0], (0, 0.0));
        assert_eq!(result[1].0, 40);
        assert_eq!(forest.search_indexed(&[0.0, 0.0], 5, 4).len(), 2);
    }

    #[test]
    fn test_empty_search() {
        let forest = build(DistanceType::Manhattan, Vec::new(), 2, 4);
        assert!(forest.search(&[1.0, 1.0], 3, 10).is_empty());
        assert!(forest.search(&[1.0, 1.0], 0, 10).is_empty());
        assert!(forest.search_indexed(&[1.0, 1.0], 3, 10).is_empty());
    }
}
