//! Seeded k-means over dense embedding vectors.
//!
//! Initial centroids are chosen k-means++ style from a deterministic stream of
//! draws derived from the seed, so identical inputs always cluster
//! identically.

use sha2::{Digest as _, Sha256};

#[derive(Debug, Clone, PartialEq)]
pub struct Clustering {
    /// Cluster id per input point.
    pub assignments: Vec<usize>,
    pub centroids: Vec<Vec<f32>>,
    pub iterations: usize,
}

impl Clustering {
    pub fn k(&self) -> usize {
        self.centroids.len()
    }

    /// Point indices assigned to `cluster`, in input order.
    pub fn members(&self, cluster: usize) -> Vec<usize> {
        self.assignments
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == cluster)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Clusters `points` into at most `k` groups.
///
/// `k` is clamped to the number of points. Assignment ties go to the lowest
/// centroid index. A cluster that loses every member keeps its previous
/// centroid.
pub fn kmeans(
    points: &[Vec<f32>],
    k: usize,
    seed: u64,
    max_iterations: usize,
) -> anyhow::Result<Clustering> {
    if points.is_empty() {
        anyhow::bail!("cannot cluster an empty set of vectors");
    }
    if k == 0 {
        anyhow::bail!("cluster count must be > 0");
    }
    let dims = points[0].len();
    if dims == 0 {
        anyhow::bail!("cannot cluster zero-dimensional vectors");
    }
    if let Some(pos) = points.iter().position(|p| p.len() != dims) {
        anyhow::bail!(
            "vector {pos} has {} dimensions, expected {dims}",
            points[pos].len()
        );
    }

    let k = k.min(points.len());
    let mut draws = SeededDraws::new(seed);
    let mut centroids = initial_centroids(points, k, &mut draws);
    let mut assignments = vec![0usize; points.len()];
    let mut iterations = 0usize;

    for iteration in 1..=max_iterations.max(1) {
        iterations = iteration;

        let mut changed = false;
        for (i, point) in points.iter().enumerate() {
            let nearest = nearest_centroid(point, &centroids);
            if iteration == 1 || assignments[i] != nearest {
                changed = true;
            }
            assignments[i] = nearest;
        }
        if !changed {
            break;
        }

        update_centroids(points, &assignments, &mut centroids);
    }

    tracing::debug!(k, points = points.len(), iterations, "k-means converged");

    Ok(Clustering {
        assignments,
        centroids,
        iterations,
    })
}

pub fn squared_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = f64::from(*x) - f64::from(*y);
            d * d
        })
        .sum()
}

fn nearest_centroid(point: &[f32], centroids: &[Vec<f32>]) -> usize {
    let mut best = 0usize;
    let mut best_distance = f64::INFINITY;
    for (idx, centroid) in centroids.iter().enumerate() {
        let distance = squared_distance(point, centroid);
        if distance < best_distance {
            best = idx;
            best_distance = distance;
        }
    }
    best
}

fn update_centroids(points: &[Vec<f32>], assignments: &[usize], centroids: &mut [Vec<f32>]) {
    let dims = centroids.first().map_or(0, Vec::len);
    let mut sums = vec![vec![0f64; dims]; centroids.len()];
    let mut counts = vec![0usize; centroids.len()];

    for (point, &cluster) in points.iter().zip(assignments) {
        counts[cluster] += 1;
        for (sum, value) in sums[cluster].iter_mut().zip(point) {
            *sum += f64::from(*value);
        }
    }

    for (cluster, centroid) in centroids.iter_mut().enumerate() {
        if counts[cluster] == 0 {
            continue;
        }
        let n = counts[cluster] as f64;
        for (value, sum) in centroid.iter_mut().zip(&sums[cluster]) {
            *value = (sum / n) as f32;
        }
    }
}

fn initial_centroids(points: &[Vec<f32>], k: usize, draws: &mut SeededDraws) -> Vec<Vec<f32>> {
    let n = points.len();
    let first = ((draws.next_unit() * n as f64) as usize).min(n - 1);
    let mut chosen = vec![first];

    while chosen.len() < k {
        let weights = points
            .iter()
            .map(|p| {
                chosen
                    .iter()
                    .map(|&c| squared_distance(p, &points[c]))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect::<Vec<_>>();
        let total: f64 = weights.iter().sum();

        let next = if total > 0.0 {
            let target = draws.next_unit() * total;
            let mut cumulative = 0.0;
            let mut picked = None;
            for (idx, weight) in weights.iter().enumerate() {
                if *weight <= 0.0 {
                    continue;
                }
                cumulative += weight;
                picked = Some(idx);
                if cumulative > target {
                    break;
                }
            }
            picked
        } else {
            None
        };

        // Every remaining point duplicates a chosen centroid.
        let next = next.unwrap_or_else(|| {
            (0..n)
                .find(|idx| !chosen.contains(idx))
                .unwrap_or(first)
        });
        chosen.push(next);
    }

    chosen.into_iter().map(|idx| points[idx].clone()).collect()
}

/// Deterministic uniform draws in `[0, 1)` derived from SHA-256.
struct SeededDraws {
    seed: u64,
    counter: u64,
}

impl SeededDraws {
    fn new(seed: u64) -> Self {
        Self { seed, counter: 0 }
    }

    fn next_unit(&mut self) -> f64 {
        let mut hasher = Sha256::new();
        hasher.update(self.seed.to_le_bytes());
        hasher.update(self.counter.to_le_bytes());
        self.counter += 1;

        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        (u64::from_le_bytes(bytes) >> 11) as f64 / (1u64 << 53) as f64
    }
}
