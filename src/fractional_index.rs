//! Pure ordering arithmetic for sibling sort keys ("fractional indexing").
//!
//! No I/O, no knowledge of pages or blocks, just the arithmetic the Store
//! uses to place a new sibling between two existing ones, and to detect
//! when floating-point precision between two neighbors has been exhausted.

use crate::config::FRACTIONAL_INDEX_EPSILON;

/// Calculate a key strictly between `before` and `after`.
///
/// - Neither bound: `1.0` (first block in an empty sibling group).
/// - Only `after`: `after / 2.0`.
/// - Only `before`: `before + 1.0`.
/// - Both: the midpoint.
pub fn calculate_middle(before: Option<f64>, after: Option<f64>) -> f64 {
    match (before, after) {
        (None, None) => 1.0,
        (None, Some(a)) => a / 2.0,
        (Some(b), None) => b + 1.0,
        (Some(b), Some(a)) => (b + a) / 2.0,
    }
}

/// Calculate `count` evenly spaced keys strictly inside `(before, after)`,
/// for bulk insertion (e.g. pasting several blocks at once).
pub fn calculate_between(before: Option<f64>, after: Option<f64>, count: usize) -> Vec<f64> {
    if count == 0 {
        return Vec::new();
    }
    let start = before.unwrap_or(0.0);
    let end = after.unwrap_or(start + count as f64 + 1.0);
    let step = (end - start) / (count + 1) as f64;

    (1..=count).map(|i| start + step * i as f64).collect()
}

/// Whether the interval between two adjacent keys is too small to safely
/// split again, given `before < after`.
pub fn needs_rebalancing(before: f64, after: f64) -> bool {
    (after - before).abs() < FRACTIONAL_INDEX_EPSILON
}

/// Whether a single-sided bound is itself near the edge of safe `f64`
/// arithmetic, so inserting past it should trigger a rebalance even
/// though there's no second bound to compare against.
pub fn needs_rebalancing_one_sided(before: Option<f64>, after: Option<f64>) -> bool {
    match (before, after) {
        (Some(b), None) => b > 1e15,
        (None, Some(a)) => a < 1e-5,
        _ => false,
    }
}

/// Fresh, evenly-spaced order weights for `count` siblings after a
/// rebalance: `1.0, 2.0, …, count`.
pub fn rebalance_order_weights(count: usize) -> Vec<f64> {
    (1..=count).map(|i| i as f64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn middle_both_none_is_one() {
        assert_eq!(calculate_middle(None, None), 1.0);
    }

    #[test]
    fn middle_before_none_halves_after() {
        assert_eq!(calculate_middle(None, Some(4.0)), 2.0);
    }

    #[test]
    fn middle_after_none_increments_before() {
        assert_eq!(calculate_middle(Some(3.0), None), 4.0);
    }

    #[test]
    fn middle_both_some_averages() {
        assert_eq!(calculate_middle(Some(1.0), Some(2.0)), 1.5);
    }

    #[test]
    fn calculate_between_stays_strictly_inside_interval() {
        let result = calculate_between(Some(1.0), Some(2.0), 3);
        assert_eq!(result.len(), 3);
        for w in &result {
            assert!(*w > 1.0 && *w < 2.0);
        }
        // Strictly increasing.
        assert!(result[0] < result[1] && result[1] < result[2]);
    }

    #[test]
    fn rebalance_order_weights_is_one_indexed_integers() {
        assert_eq!(rebalance_order_weights(3), vec![1.0, 2.0, 3.0]);
        assert_eq!(rebalance_order_weights(0), Vec::<f64>::new());
    }

    #[test]
    fn needs_rebalancing_detects_exhausted_interval() {
        assert!(needs_rebalancing(1.0, 1.0 + 1e-12));
        assert!(!needs_rebalancing(1.0, 1.5));
    }

    #[test]
    fn fifty_inserts_between_same_neighbors_eventually_exhausts_precision() {
        let mut before = Some(1.0);
        let after = Some(2.0);
        let mut exhausted_at = None;
        for i in 0..60 {
            if let (Some(b), Some(a)) = (before, after) {
                if needs_rebalancing(b, a) {
                    exhausted_at = Some(i);
                    break;
                }
                before = Some(calculate_middle(before, after));
            }
        }
        assert!(exhausted_at.is_some(), "expected precision exhaustion within 60 halvings");
    }

    #[test]
    fn one_sided_large_before_needs_rebalancing() {
        assert!(needs_rebalancing_one_sided(Some(2e15), None));
        assert!(!needs_rebalancing_one_sided(Some(5.0), None));
    }

    #[test]
    fn one_sided_small_after_needs_rebalancing() {
        assert!(needs_rebalancing_one_sided(None, Some(1e-6)));
        assert!(!needs_rebalancing_one_sided(None, Some(1.0)));
    }
}
