use crate::error::{AppError, AppResult};
use crate::models::Edge;

use super::CoOccurrenceGraph;

/// Absorbs float noise such as `100.0 * 0.7 == 69.99999999999999`
const SPLIT_EPSILON: f64 = 1e-9;

impl CoOccurrenceGraph {
    /// Splits edges chronologically by `first_seen` into train, validation
    /// and test graphs.
    ///
    /// Every edge lands in exactly one window and no edge in a later window
    /// was first seen at or before an edge in an earlier one. Edges sharing a
    /// `first_seen` instant (the pairs of a single deck) are never separated;
    /// the earlier window absorbs them, so window sizes can exceed the
    /// nominal fractions. The source graph is left untouched.
    ///
    /// Train and validation edges are cut back to the last `first_seen` of
    /// their window, so weights and buckets only count occurrences up to that
    /// point. Buckets are monthly: occurrences later in the cutoff month are
    /// still counted. The test window keeps full edges.
    pub fn split_temporal(&self, train_frac: f64, val_frac: f64) -> AppResult<(Self, Self, Self)> {
        for (name, frac) in [("train_frac", train_frac), ("val_frac", val_frac)] {
            if !frac.is_finite() || frac < 0.0 {
                return Err(AppError::InvalidInput(format!(
                    "{} must be a finite number >= 0, got {}",
                    name, frac
                )));
            }
        }
        if train_frac + val_frac > 1.0 + SPLIT_EPSILON {
            return Err(AppError::InvalidInput(format!(
                "train_frac + val_frac must be <= 1, got {}",
                train_frac + val_frac
            )));
        }

        let mut ordered: Vec<Edge> = self.edges.values().cloned().collect();
        ordered.sort_by(|x, y| {
            (x.first_seen, &x.card_a, &x.card_b).cmp(&(y.first_seen, &y.card_a, &y.card_b))
        });

        let n = ordered.len();
        let cut = |frac: f64| ((n as f64 * frac + SPLIT_EPSILON).floor() as usize).min(n);

        let train_end = extend_past_ties(&ordered, cut(train_frac));
        let val_end = extend_past_ties(&ordered, cut(train_frac + val_frac).max(train_end));

        let test: Vec<Edge> = ordered.split_off(val_end);
        let val = truncate_window(ordered.split_off(train_end));
        let train = truncate_window(ordered);

        tracing::info!(
            train = train.len(),
            val = val.len(),
            test = test.len(),
            "Temporal split computed"
        );

        Ok((self.sub_graph(train), self.sub_graph(val), self.sub_graph(test)))
    }
}

/// Cuts every edge of a window back to the window's last `first_seen`
fn truncate_window(edges: Vec<Edge>) -> Vec<Edge> {
    let Some(cutoff) = edges.iter().map(|e| e.first_seen).max() else {
        return edges;
    };
    edges.iter().filter_map(|edge| edge.truncated_to(cutoff)).collect()
}

/// Moves a boundary forward until it no longer separates equal `first_seen`s
fn extend_past_ties(ordered: &[Edge], mut boundary: usize) -> usize {
    while boundary > 0
        && boundary < ordered.len()
        && ordered[boundary].first_seen == ordered[boundary - 1].first_seen
    {
        boundary += 1;
    }
    boundary
}
