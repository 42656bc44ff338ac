use crate::score::clamp_score;

/// Result of a bounded quality loop.
#[derive(Debug, Clone, PartialEq)]
pub struct BestOf<T> {
    pub candidate: T,
    pub score: f64,
    /// 1-based iteration that produced `candidate`.
    pub iteration: usize,
    /// Number of times `generate` was called.
    pub iterations: usize,
    pub accepted: bool,
}

/// Calls `generate` up to `max_iterations` times and keeps the best candidate.
///
/// Returns the first candidate whose score reaches `threshold`. Otherwise the
/// highest-scoring candidate wins, earliest first on ties. A failed `generate`
/// consumes an iteration; a failed `score` counts as 0.0. `None` only when no
/// call to `generate` succeeded.
pub fn best_of<T, G, S>(
    max_iterations: usize,
    threshold: f64,
    mut generate: G,
    mut score: S,
) -> Option<BestOf<T>>
where
    G: FnMut(usize) -> anyhow::Result<T>,
    S: FnMut(&T) -> anyhow::Result<f64>,
{
    let mut best: Option<BestOf<T>> = None;
    let mut iterations = 0usize;

    for iteration in 1..=max_iterations {
        iterations = iteration;

        let candidate = match generate(iteration) {
            Ok(candidate) => candidate,
            Err(err) => {
                tracing::warn!(iteration, error = %format!("{err:#}"), "candidate generation failed");
                continue;
            }
        };

        let current = match score(&candidate) {
            Ok(value) => clamp_score(value),
            Err(err) => {
                tracing::warn!(iteration, error = %format!("{err:#}"), "candidate scoring failed");
                0.0
            }
        };
        tracing::debug!(iteration, score = current, threshold, "scored candidate");

        if current >= threshold {
            return Some(BestOf {
                candidate,
                score: current,
                iteration,
                iterations,
                accepted: true,
            });
        }

        if best.as_ref().is_none_or(|b| current > b.score) {
            best = Some(BestOf {
                candidate,
                score: current,
                iteration,
                iterations,
                accepted: false,
            });
        }
    }

    best.map(|mut b| {
        b.iterations = iterations;
        b
    })
}
